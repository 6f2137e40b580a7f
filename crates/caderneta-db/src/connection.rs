//! # Connection Manager
//!
//! Owns the single live database handle.
//!
//! ## Lifecycle
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────┐
//! │                   Connection Lifecycle                              │
//! │                                                                     │
//! │  acquire()                                                          │
//! │     │                                                               │
//! │     ├── handle exists and is open? ──► reuse it                     │
//! │     │                                                               │
//! │     └── otherwise: open, raced against a timeout                    │
//! │            │                                                        │
//! │            ├── open wins ──► one-time setup ──► store + return      │
//! │            │                 (pragmas, integrity check,             │
//! │            │                  schema cookie)                        │
//! │            │                                                        │
//! │            └── timeout wins ──► ConnectionTimeout                   │
//! │                  └── if the slow open finishes later, the orphan    │
//! │                      handle is detected and CLOSED, never adopted   │
//! │                                                                     │
//! │  Concurrent acquire() calls queue on one async mutex, so an         │
//! │  in-flight open is shared: no duplicate opens, ever.                │
//! └─────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Why a Single Connection?
//! The whole engine funnels through one SQLite handle (pool of exactly
//! one). SQLite serializes writers anyway; a second handle would only buy
//! "database is locked" errors between our own components.

use std::str::FromStr;
use std::sync::atomic::{AtomicI64, Ordering};
use std::time::Duration;

use sqlx::sqlite::{
    SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous,
};
use sqlx::SqlitePool;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::config::DbConfig;
use crate::error::{DbError, DbResult};

// =============================================================================
// Manager State
// =============================================================================

/// Mutable connection state, guarded by one async mutex.
///
/// Holding the mutex across the whole open is what makes concurrent
/// callers share a single in-flight attempt.
#[derive(Debug, Default)]
struct ConnState {
    pool: Option<SqlitePool>,
    /// Consecutive health-probe failures.
    failures: u32,
}

/// Owns and guards the single database handle.
#[derive(Debug)]
pub struct ConnectionManager {
    config: DbConfig,
    state: Mutex<ConnState>,
    /// SQLite's internal schema cookie, recorded after each open.
    /// Diagnostics only: a jump means another process altered the schema.
    schema_cookie: AtomicI64,
}

impl ConnectionManager {
    pub fn new(config: DbConfig) -> Self {
        ConnectionManager {
            config,
            state: Mutex::new(ConnState::default()),
            schema_cookie: AtomicI64::new(-1),
        }
    }

    /// Returns the live handle, opening it on first use.
    ///
    /// ## Returns
    /// A cheap clone of the pool. Callers use it for the current call
    /// only and must not cache it across awaits; the manager may replace
    /// the pool underneath them on reconnect.
    pub async fn acquire(&self) -> DbResult<SqlitePool> {
        let mut state = self.state.lock().await;

        if let Some(pool) = &state.pool {
            if !pool.is_closed() {
                return Ok(pool.clone());
            }
            debug!("stored handle is closed, reopening");
            state.pool = None;
        }

        let pool = self.open_with_timeout().await?;
        state.pool = Some(pool.clone());
        state.failures = 0;
        Ok(pool)
    }

    /// Opens the database, bounded by the configured timeout.
    ///
    /// The actual open runs in a spawned task. If the timeout fires
    /// first, a detached reaper waits for the slow open and closes the
    /// late handle so it can never leak or be adopted by accident.
    async fn open_with_timeout(&self) -> DbResult<SqlitePool> {
        info!(
            path = %self.config.database_path.display(),
            timeout_ms = self.config.open_timeout.as_millis() as u64,
            "Opening database"
        );

        let config = self.config.clone();
        let mut open_task = tokio::spawn(async move { open_pool(&config).await });

        match tokio::time::timeout(self.config.open_timeout, &mut open_task).await {
            Ok(Ok(Ok(pool))) => {
                if let Err(setup_err) = self.post_open_setup(&pool).await {
                    pool.close().await;
                    return Err(setup_err);
                }
                info!("Database opened");
                Ok(pool)
            }
            Ok(Ok(Err(open_err))) => Err(DbError::ConnectionFailed(open_err.to_string())),
            Ok(Err(join_err)) => Err(DbError::ConnectionFailed(join_err.to_string())),
            Err(_elapsed) => {
                // The open may still complete in the background; never
                // adopt that handle.
                tokio::spawn(async move {
                    if let Ok(Ok(late_pool)) = open_task.await {
                        warn!("database opened after the timeout fired; closing orphan handle");
                        late_pool.close().await;
                    }
                });
                Err(DbError::ConnectionTimeout)
            }
        }
    }

    /// One-time setup after a successful open.
    ///
    /// ## Steps
    /// 1. Integrity probe (`PRAGMA quick_check`), with one
    ///    checkpoint-based recovery attempt on corruption
    /// 2. Record the engine's internal schema cookie
    ///
    /// The probe erroring OUT (as opposed to reporting corruption) is a
    /// read-only diagnostic failure: log it and continue startup.
    async fn post_open_setup(&self, pool: &SqlitePool) -> DbResult<()> {
        match sqlx::query_scalar::<_, String>("PRAGMA quick_check")
            .fetch_one(pool)
            .await
        {
            Ok(verdict) if verdict.eq_ignore_ascii_case("ok") => {}
            Ok(verdict) => {
                warn!(%verdict, "integrity check reported corruption, attempting checkpoint recovery");
                let _ = sqlx::query("PRAGMA wal_checkpoint(TRUNCATE)")
                    .execute(pool)
                    .await;

                let recheck = sqlx::query_scalar::<_, String>("PRAGMA quick_check")
                    .fetch_one(pool)
                    .await;
                match recheck {
                    Ok(v) if v.eq_ignore_ascii_case("ok") => {
                        info!("checkpoint recovery succeeded");
                    }
                    Ok(v) => return Err(DbError::CorruptionUnrecoverable(v)),
                    Err(e) => return Err(DbError::CorruptionUnrecoverable(e.to_string())),
                }
            }
            Err(probe_err) => {
                warn!(error = %probe_err, "integrity check could not run, continuing startup");
            }
        }

        match sqlx::query_scalar::<_, i64>("PRAGMA schema_version")
            .fetch_one(pool)
            .await
        {
            Ok(cookie) => {
                self.schema_cookie.store(cookie, Ordering::Relaxed);
                debug!(schema_cookie = cookie, "recorded schema cookie");
            }
            Err(e) => warn!(error = %e, "could not read schema cookie"),
        }

        Ok(())
    }

    /// Lightweight liveness probe: `SELECT 1`.
    pub async fn is_healthy(&self) -> bool {
        match self.acquire().await {
            Ok(pool) => sqlx::query("SELECT 1").fetch_one(&pool).await.is_ok(),
            Err(_) => false,
        }
    }

    /// Probe and, on failure, transparently discard the handle and reopen.
    ///
    /// After `max_retries` consecutive failures the failure counter and
    /// pending state are wiped so the next attempt starts completely
    /// fresh instead of compounding.
    pub async fn ensure_healthy(&self) -> DbResult<()> {
        if self.is_healthy().await {
            let mut state = self.state.lock().await;
            state.failures = 0;
            return Ok(());
        }

        let discarded = {
            let mut state = self.state.lock().await;
            state.failures += 1;
            if state.failures >= self.config.max_retries {
                warn!(
                    failures = state.failures,
                    "health probe failure ceiling reached, wiping connection state"
                );
                state.failures = 0;
            }
            state.pool.take()
        };
        if let Some(pool) = discarded {
            pool.close().await;
        }

        // One transparent reopen attempt before surfacing to the caller.
        self.acquire().await.map(|_| ())
    }

    /// The schema cookie recorded at the last open (-1 before first open).
    pub fn schema_cookie(&self) -> i64 {
        self.schema_cookie.load(Ordering::Relaxed)
    }

    /// Closes the handle. Later calls to `acquire()` reopen.
    pub async fn close(&self) {
        let taken = self.state.lock().await.pool.take();
        if let Some(pool) = taken {
            info!("Closing database handle");
            pool.close().await;
        }
    }
}

// =============================================================================
// Pool Construction
// =============================================================================

/// Builds the single-connection pool with the engine pragmas applied.
async fn open_pool(config: &DbConfig) -> Result<SqlitePool, sqlx::Error> {
    let options = if config.is_in_memory() {
        // WAL needs a file; in-memory databases get a memory journal.
        SqliteConnectOptions::new()
            .in_memory(true)
            .journal_mode(SqliteJournalMode::Memory)
    } else {
        let url = format!("sqlite://{}?mode=rwc", config.database_path.display());
        SqliteConnectOptions::from_str(&url)?
            .create_if_missing(true)
            // WAL: readers don't block the writer, better crash recovery
            .journal_mode(SqliteJournalMode::Wal)
    };

    // Conservative profile trades write speed for durability on devices
    // that lose power mid-write.
    let synchronous = if config.conservative_durability {
        SqliteSynchronous::Full
    } else {
        SqliteSynchronous::Normal
    };

    let options = options
        .synchronous(synchronous)
        .foreign_keys(true)
        .busy_timeout(config.busy_timeout);

    SqlitePoolOptions::new()
        // Exactly one live handle; the engine's concurrency model
        // depends on it.
        .max_connections(1)
        .min_connections(1)
        .acquire_timeout(config.busy_timeout)
        // Never recycle the only connection while it is healthy.
        .idle_timeout(None::<Duration>)
        .max_lifetime(None::<Duration>)
        .connect_with(options)
        .await
}

// =============================================================================
// Unit Tests
// =============================================================================
