//! # Engine Facade
//!
//! The `Database` handle: explicit lifecycle (`connect`/`close`), schema
//! initialization guarded by a double-checked lock, repository accessors
//! and the cross-cutting operations (search, totals, optimize, health,
//! export).
//!
//! ## No Ambient Globals
//! Everything the engine owns lives behind one `Arc` inner, injected into
//! repositories by value. Tests get full isolation by constructing their
//! own `Database` per case.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use sqlx::SqlitePool;
use tracing::{info, warn};

use caderneta_core::{AppExport, Client, Totals};

use crate::cache::{self, TotalsCache};
use crate::config::DbConfig;
use crate::connection::ConnectionManager;
use crate::error::DbResult;
use crate::query::{fetch_all_on, QueryLayer};
use crate::repository::client::ClientRepository;
use crate::repository::log::LogRepository;
use crate::repository::payment::PaymentRepository;
use crate::repository::route::RouteRepository;
use crate::schema;
use crate::mapper;
use crate::search::{search_clients, CLIENT_COLUMNS};

#[derive(Debug)]
struct Inner {
    config: DbConfig,
    manager: ConnectionManager,
    cache: TotalsCache,
    initialized: AtomicBool,
    init_lock: tokio::sync::Mutex<()>,
    fts_available: AtomicBool,
}

/// Main database handle providing repository access.
///
/// Cheaply cloneable; clones share the connection, the init state and
/// the totals cache.
///
/// ## Usage
/// ```rust,ignore
/// let db = Database::connect(DbConfig::new("/data/caderneta.db")).await?;
/// let client = db.clients().get_by_id(42).await?;
/// let totals = db.get_totals().await?;
/// db.close().await;
/// ```
#[derive(Debug, Clone)]
pub struct Database {
    inner: Arc<Inner>,
}

impl Database {
    /// Opens the database and, unless disabled in config, brings the
    /// schema to the current version.
    pub async fn connect(config: DbConfig) -> DbResult<Self> {
        let db = Database {
            inner: Arc::new(Inner {
                manager: ConnectionManager::new(config.clone()),
                cache: TotalsCache::default(),
                initialized: AtomicBool::new(false),
                init_lock: tokio::sync::Mutex::new(()),
                fts_available: AtomicBool::new(false),
                config,
            }),
        };

        // Open eagerly so connect() surfaces open/corruption errors
        db.inner.manager.acquire().await?;

        if db.inner.config.run_migrations {
            db.initialize().await?;
        }

        Ok(db)
    }

    /// Brings the schema to the current version. Idempotent.
    ///
    /// Double-checked (flag + async lock): concurrent startup callers
    /// share one run, re-entrant calls are no-ops.
    pub async fn initialize(&self) -> DbResult<()> {
        if self.inner.initialized.load(Ordering::Acquire) {
            return Ok(());
        }

        let _guard = self.inner.init_lock.lock().await;
        if self.inner.initialized.load(Ordering::Acquire) {
            return Ok(());
        }

        let pool = self.inner.manager.acquire().await?;
        let fts_available = schema::initialize(&pool, &self.inner.config).await?;

        self.inner.fts_available.store(fts_available, Ordering::Release);
        self.inner.initialized.store(true, Ordering::Release);
        Ok(())
    }

    /// Acquires the pool for a transactional write, lazily opening and
    /// initializing as needed.
    pub(crate) async fn ready_pool(&self) -> DbResult<SqlitePool> {
        let pool = self.inner.manager.acquire().await?;
        if !self.inner.initialized.load(Ordering::Acquire) && self.inner.config.run_migrations {
            self.initialize().await?;
        }
        Ok(pool)
    }

    /// Acquires the non-transactional query layer.
    pub(crate) async fn query(&self) -> DbResult<QueryLayer> {
        let pool = self.ready_pool().await?;
        Ok(QueryLayer::new(pool, self.inner.config.max_rows))
    }

    pub(crate) fn transaction_timeout(&self) -> Duration {
        self.inner.config.transaction_timeout
    }

    /// Invalidates the totals cache (both layers). Called by writes that
    /// touch value/paid fields; failures are internal and non-fatal.
    pub(crate) async fn invalidate_totals(&self) {
        match self.inner.manager.acquire().await {
            Ok(pool) => cache::invalidate_totals(&pool, &self.inner.cache).await,
            Err(e) => warn!(error = %e, "could not invalidate persisted totals cache"),
        }
    }

    // =========================================================================
    // Repositories
    // =========================================================================

    /// Returns the client repository.
    pub fn clients(&self) -> ClientRepository {
        ClientRepository::new(self.clone())
    }

    /// Returns the payments repository.
    pub fn payments(&self) -> PaymentRepository {
        PaymentRepository::new(self.clone())
    }

    /// Returns the audit log repository.
    pub fn logs(&self) -> LogRepository {
        LogRepository::new(self.clone())
    }

    /// Returns the bairro/rua repository.
    pub fn routes(&self) -> RouteRepository {
        RouteRepository::new(self.clone())
    }

    // =========================================================================
    // Cross-Cutting Operations
    // =========================================================================

    /// Free-text client search, FTS-first with LIKE fallback.
    pub async fn search(&self, term: &str, limit: i64) -> DbResult<Vec<Client>> {
        let query = self.query().await?;
        let fts = self.inner.fts_available.load(Ordering::Acquire);
        search_clients(&query, fts, term, limit).await
    }

    /// Dashboard totals, served through the TTL cache.
    pub async fn get_totals(&self) -> DbResult<Totals> {
        let query = self.query().await?;
        cache::fetch_totals(&query, &self.inner.cache).await
    }

    /// Manual compaction: checkpoint the WAL, vacuum, refresh statistics.
    pub async fn optimize(&self) -> DbResult<()> {
        info!("optimizing database");
        let query = self.query().await?;
        query.exec("PRAGMA wal_checkpoint(TRUNCATE)").await?;
        query.exec("VACUUM").await?;
        query.exec("ANALYZE").await?;
        Ok(())
    }

    /// Liveness check with one transparent reconnect attempt.
    pub async fn health_check(&self) -> bool {
        self.inner.manager.ensure_healthy().await.is_ok()
    }

    /// Bulk read of every domain table for the backup/export consumer.
    ///
    /// Deliberately uncapped: a backup that silently truncates is worse
    /// than a slow one.
    pub async fn export_all(&self) -> DbResult<AppExport> {
        let query = self.query().await?;
        let pool = query.pool();

        let clients_sql =
            format!("SELECT {CLIENT_COLUMNS} FROM clients c ORDER BY c.id");
        let clients = fetch_all_on(pool, &clients_sql, &[])
            .await?
            .iter()
            .map(mapper::map_client)
            .collect();

        let payments = fetch_all_on(
            pool,
            "SELECT id, client_id, amount_cents, created_at FROM payments ORDER BY id",
            &[],
        )
        .await?
        .iter()
        .map(mapper::map_payment)
        .collect();

        let logs = fetch_all_on(
            pool,
            "SELECT id, client_id, description, created_at FROM logs ORDER BY id",
            &[],
        )
        .await?
        .iter()
        .map(mapper::map_log)
        .collect();

        let bairros = fetch_all_on(pool, "SELECT id, name FROM bairros ORDER BY id", &[])
            .await?
            .iter()
            .map(mapper::map_bairro)
            .collect();

        let ruas = fetch_all_on(pool, "SELECT id, bairro_id, name FROM ruas ORDER BY id", &[])
            .await?
            .iter()
            .map(mapper::map_rua)
            .collect();

        Ok(AppExport {
            clients,
            payments,
            logs,
            bairros,
            ruas,
        })
    }

    /// Closes the handle. The next operation transparently reopens (and
    /// re-checks the schema, which is a no-op on an up-to-date file).
    pub async fn close(&self) {
        self.inner.manager.close().await;
        self.inner.initialized.store(false, Ordering::Release);
    }
}

// =============================================================================
// Integration Tests
// =============================================================================
