//! # caderneta-core: Pure Business Logic for the Caderneta Data Engine
//!
//! This crate is the **heart** of the caderneta system. It contains the
//! business rules of a door-to-door crediario operation as pure functions
//! with zero I/O dependencies.
//!
//! ## Architecture Position
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────┐
//! │                     Caderneta Architecture                          │
//! │                                                                     │
//! │  ┌───────────────────────────────────────────────────────────────┐  │
//! │  │          Consumers (UI / sync queue / backup export)          │  │
//! │  └──────────────────────────────┬────────────────────────────────┘  │
//! │                                 │ repository API                    │
//! │  ┌──────────────────────────────▼────────────────────────────────┐  │
//! │  │                 caderneta-db (data engine)                    │  │
//! │  │     connection, migrations, repositories, cache, search       │  │
//! │  └──────────────────────────────┬────────────────────────────────┘  │
//! │                                 │                                   │
//! │  ┌──────────────────────────────▼────────────────────────────────┐  │
//! │  │              ★ caderneta-core (THIS CRATE) ★                  │  │
//! │  │                                                               │  │
//! │  │   ┌──────────┐  ┌──────────┐  ┌──────────┐  ┌────────────┐   │  │
//! │  │   │  types   │  │  money   │  │  error   │  │ validation │   │  │
//! │  │   │  Client  │  │  Money   │  │  typed   │  │ phones,    │   │  │
//! │  │   │  Payment │  │  (cents) │  │  errors  │  │ dates,text │   │  │
//! │  │   └──────────┘  └──────────┘  └──────────┘  └────────────┘   │  │
//! │  │                                                               │  │
//! │  │   NO I/O • NO DATABASE • NO NETWORK • PURE FUNCTIONS          │  │
//! │  └───────────────────────────────────────────────────────────────┘  │
//! └─────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Modules
//!
//! - [`types`] - Domain types (Client, Payment, LogEntry, Bairro, Rua, ...)
//! - [`money`] - Money type with integer arithmetic (no floating point!)
//! - [`error`] - Domain error types
//! - [`validation`] - Business rule validation and defensive normalizers
//!
//! ## Design Principles
//!
//! 1. **Pure Functions**: every function is deterministic
//! 2. **No I/O**: database, network, file system access is FORBIDDEN here
//! 3. **Integer Money**: all monetary values are in cents (i64)
//! 4. **Explicit Errors**: all errors are typed, never strings or panics

// =============================================================================
// Module Declarations
// =============================================================================

pub mod error;
pub mod money;
pub mod types;
pub mod validation;

// =============================================================================
// Re-exports for Convenience
// =============================================================================
// These allow users to do `use caderneta_core::Money` instead of
// `use caderneta_core::money::Money`

pub use error::{CoreError, ValidationError};
pub use money::Money;
pub use types::*;

// =============================================================================
// Crate-Level Constants
// =============================================================================

/// Maximum audit log entries kept per client.
///
/// ## Business Reason
/// The log table exists for "what happened on this client recently", not
/// for unbounded history. Older entries are pruned on insert.
pub const MAX_LOGS_PER_CLIENT: i64 = 50;

/// Maximum length accepted for client and street/neighborhood names.
pub const MAX_NAME_LEN: usize = 120;

/// Maximum length accepted for free-text fields (notes, references,
/// log descriptions).
pub const MAX_TEXT_LEN: usize = 500;
