//! # caderneta-db: The Caderneta Data Engine
//!
//! Embedded SQLite data layer for the caderneta crediario system.
//!
//! ## Architecture Position
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────┐
//! │                      Caderneta Data Flow                            │
//! │                                                                     │
//! │  Consumer call (UI / sync queue / backup)                           │
//! │       │                                                             │
//! │       ▼                                                             │
//! │  ┌───────────────────────────────────────────────────────────────┐  │
//! │  │                  caderneta-db (THIS CRATE)                    │  │
//! │  │                                                               │  │
//! │  │   Repositories ──► Query Layer / Txn Executor ──► Connection │  │
//! │  │        │                      │                    Manager   │  │
//! │  │        │                      ▼                       │      │  │
//! │  │        │              Schema & Migrations             │      │  │
//! │  │        ▼                                              ▼      │  │
//! │  │   Mapper (typed rows)                          single SQLite │  │
//! │  │   Cache & Search                               handle (WAL)  │  │
//! │  └───────────────────────────────────────────────────────────────┘  │
//! │       │                                                             │
//! │       ▼                                                             │
//! │  raw rows ──► Mapper ──► typed domain object ──► cache invalidation │
//! └─────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Module Organization
//!
//! - [`config`] - engine configuration
//! - [`connection`] - single-handle lifecycle (open/timeout/health)
//! - [`query`] - non-transactional execution, row caps, error classing
//! - [`txn`] - atomic transactions with a timeout race
//! - [`schema`] - versioned migrations over `PRAGMA user_version`
//! - [`mapper`] - defensive row → domain decoding (internal)
//! - [`repository`] - clients, payments, logs, routes
//! - [`cache`] - TTL totals cache with persisted mirror (internal)
//! - [`search`] - FTS5-first search with LIKE fallback (internal)
//! - [`engine`] - the `Database` facade tying it all together
//!
//! ## Usage
//!
//! ```rust,ignore
//! use caderneta_db::{Database, DbConfig};
//!
//! let db = Database::connect(DbConfig::new("/data/caderneta.db")).await?;
//!
//! let client = db.clients().add_client(new_client).await?;
//! db.payments().add_payment(client.id, amount, next_charge).await?;
//!
//! let totals = db.get_totals().await?;
//! let hits = db.search("joao", 50).await?;
//! db.close().await;
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod config;
pub mod connection;
pub mod engine;
pub mod error;
pub mod query;
pub mod repository;
pub mod schema;
pub mod txn;

mod cache;
mod mapper;
mod search;

// =============================================================================
// Re-exports
// =============================================================================

pub use config::DbConfig;
pub use engine::Database;
pub use error::{DbError, DbResult};
pub use query::SqlParam;

// Repository re-exports for convenience
pub use repository::client::ClientRepository;
pub use repository::log::LogRepository;
pub use repository::payment::PaymentRepository;
pub use repository::route::RouteRepository;
