//! # Transaction Executor
//!
//! Wraps multi-statement writes in atomic transactions with a timeout race.
//!
//! ## Contract
//! - The body runs against a transaction-scoped connection; everything
//!   commits on `Ok`, everything rolls back on `Err` (or on drop, if the
//!   timeout wins the race)
//! - Nesting is impossible by construction: the body receives only the
//!   transaction connection, never the engine, so it has no way to start
//!   a second transaction
//! - Primitives surface classified engine errors verbatim to the body so
//!   it can abort and trigger the rollback
//!
//! ## Callback Shape
//! ```rust,ignore
//! let payment_id = run_transaction(&pool, timeout, |conn| {
//!     Box::pin(async move {
//!         let row = fetch_one(conn, "SELECT ...", &params).await?;
//!         // decide, then write
//!         insert_returning_id(conn, "INSERT ...", &params).await
//!     })
//! })
//! .await?;
//! ```
//! The `for<'c> FnOnce(&'c mut SqliteConnection) -> BoxFuture<'c, _>`
//! shape is what lets the async body borrow the connection for exactly
//! the transaction's lifetime.

use std::time::Duration;

use futures_util::future::BoxFuture;
use sqlx::sqlite::{SqliteConnection, SqliteRow};
use sqlx::SqlitePool;
use tracing::debug;

use crate::error::{DbError, DbResult};
use crate::query::{self, SqlParam};

/// Runs `body` inside one atomic transaction, raced against `timeout`.
///
/// ## Returns
/// - `Ok(T)` - the body succeeded and the transaction committed
/// - `Err(TransactionTimeout)` - the race was lost; the transaction is
///   rolled back by drop and the caller must assume nothing persisted
/// - any `Err` from the body - re-raised after a full rollback
pub async fn run_transaction<T, F>(pool: &SqlitePool, timeout: Duration, body: F) -> DbResult<T>
where
    T: Send,
    F: for<'c> FnOnce(&'c mut SqliteConnection) -> BoxFuture<'c, DbResult<T>> + Send,
{
    let work = async {
        let mut tx = pool
            .begin()
            .await
            .map_err(|e| DbError::TransactionFailed(e.to_string()))?;

        match body(&mut *tx).await {
            Ok(value) => {
                tx.commit()
                    .await
                    .map_err(|e| DbError::TransactionFailed(e.to_string()))?;
                Ok(value)
            }
            Err(body_err) => {
                // Explicit rollback; drop would do it too, but this
                // reports rollback failures instead of swallowing them.
                if let Err(rb_err) = tx.rollback().await {
                    debug!(error = %rb_err, "rollback after failed transaction body also failed");
                }
                Err(body_err)
            }
        }
    };

    match tokio::time::timeout(timeout, work).await {
        Ok(result) => result,
        Err(_elapsed) => Err(DbError::TransactionTimeout(timeout.as_millis() as u64)),
    }
}

// =============================================================================
// In-Transaction Primitives
// =============================================================================
// Thin named wrappers over the shared executor-generic helpers, so
// transaction bodies read as a sequence of intents.

/// Executes a statement; no result.
pub async fn exec(conn: &mut SqliteConnection, sql: &str, params: &[SqlParam]) -> DbResult<()> {
    query::run_on(&mut *conn, sql, params).await.map(|_| ())
}

/// Executes a statement, returning affected rows.
pub async fn run(conn: &mut SqliteConnection, sql: &str, params: &[SqlParam]) -> DbResult<u64> {
    query::run_on(&mut *conn, sql, params).await
}

/// Executes a statement and fetches all rows.
pub async fn fetch_all(
    conn: &mut SqliteConnection,
    sql: &str,
    params: &[SqlParam],
) -> DbResult<Vec<SqliteRow>> {
    query::fetch_all_on(&mut *conn, sql, params).await
}

/// Executes a statement and fetches the first row, or None.
pub async fn fetch_one(
    conn: &mut SqliteConnection,
    sql: &str,
    params: &[SqlParam],
) -> DbResult<Option<SqliteRow>> {
    query::fetch_one_on(&mut *conn, sql, params).await
}

/// Executes an INSERT and returns the last-inserted rowid.
pub async fn insert_returning_id(
    conn: &mut SqliteConnection,
    sql: &str,
    params: &[SqlParam],
) -> DbResult<i64> {
    query::run_and_get_id_on(&mut *conn, sql, params).await
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    async fn memory_pool() -> SqlitePool {
        // Single-connection pool; pooled :memory: connections would each
        // see their own database.
        let pool = sqlx::sqlite::SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(sqlx::sqlite::SqliteConnectOptions::new().in_memory(true))
            .await
            .unwrap();
        sqlx::raw_sql("CREATE TABLE t (id INTEGER PRIMARY KEY, v INTEGER NOT NULL)")
            .execute(&pool)
            .await
            .unwrap();
        pool
    }

    const TIMEOUT: Duration = Duration::from_secs(5);

    #[tokio::test]
    async fn test_commit_on_success() {
        let pool = memory_pool().await;

        let id = run_transaction(&pool, TIMEOUT, |conn| {
            Box::pin(async move {
                insert_returning_id(conn, "INSERT INTO t (v) VALUES (?)", &[7i64.into()]).await
            })
        })
        .await
        .unwrap();
        assert_eq!(id, 1);

        let n: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM t")
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(n, 1);
    }

    #[tokio::test]
    async fn test_rollback_on_error() {
        let pool = memory_pool().await;

        let result: DbResult<()> = run_transaction(&pool, TIMEOUT, |conn| {
            Box::pin(async move {
                exec(conn, "INSERT INTO t (v) VALUES (?)", &[1i64.into()]).await?;
                exec(conn, "INSERT INTO t (v) VALUES (?)", &[2i64.into()]).await?;
                // Simulated failure after two successful writes
                Err(DbError::TransactionFailed("injected".to_string()))
            })
        })
        .await;
        assert!(result.is_err());

        // Nothing persisted
        let n: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM t")
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(n, 0);
    }

    #[tokio::test]
    async fn test_engine_error_rolls_back_everything() {
        let pool = memory_pool().await;

        let result: DbResult<()> = run_transaction(&pool, TIMEOUT, |conn| {
            Box::pin(async move {
                exec(conn, "INSERT INTO t (v) VALUES (?)", &[1i64.into()]).await?;
                // NOT NULL violation surfaces verbatim and aborts the body
                exec(conn, "INSERT INTO t (v) VALUES (NULL)", &[]).await
            })
        })
        .await;

        match result {
            Err(DbError::Query { code, .. }) => {
                assert_eq!(code, "SQLITE_CONSTRAINT_NOTNULL");
            }
            other => panic!("expected classified error, got {other:?}"),
        }

        let n: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM t")
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(n, 0);
    }

    #[tokio::test]
    async fn test_timeout_aborts() {
        let pool = memory_pool().await;

        let result: DbResult<()> =
            run_transaction(&pool, Duration::from_millis(20), |conn| {
                Box::pin(async move {
                    exec(conn, "INSERT INTO t (v) VALUES (?)", &[1i64.into()]).await?;
                    tokio::time::sleep(Duration::from_secs(5)).await;
                    Ok(())
                })
            })
            .await;

        assert!(matches!(result, Err(DbError::TransactionTimeout(_))));

        // The dropped transaction rolled back
        let n: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM t")
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(n, 0);
    }

    #[tokio::test]
    async fn test_fetch_primitives() {
        let pool = memory_pool().await;

        let (count, first) = run_transaction(&pool, TIMEOUT, |conn| {
            Box::pin(async move {
                for v in [10i64, 20, 30] {
                    exec(conn, "INSERT INTO t (v) VALUES (?)", &[v.into()]).await?;
                }
                let rows = fetch_all(conn, "SELECT v FROM t ORDER BY v", &[]).await?;
                let first = fetch_one(conn, "SELECT v FROM t ORDER BY v", &[]).await?;
                Ok((rows.len(), first.is_some()))
            })
        })
        .await
        .unwrap();

        assert_eq!(count, 3);
        assert!(first);
    }
}
