//! # Audit Log Repository
//!
//! Append-only per-client history lines with automatic retention.
//!
//! The log is a convenience for the collector ("what happened here
//! recently"), not a system of record. Two consequences:
//!
//! - retention: only the newest [`MAX_LOGS_PER_CLIENT`] rows per client
//!   survive; older rows are pruned on insert
//! - writes from other repositories go through [`add_best_effort`]
//!   (a log failure must never abort the caller's primary operation)
//!
//! [`add_best_effort`]: LogRepository::add_best_effort

use tracing::warn;

use caderneta_core::validation::sanitize_text;
use caderneta_core::{LogEntry, MAX_LOGS_PER_CLIENT};

use crate::engine::Database;
use crate::error::DbResult;
use crate::repository::now_iso;

/// Repository for client audit logs.
#[derive(Debug, Clone)]
pub struct LogRepository {
    db: Database,
}

impl LogRepository {
    pub(crate) fn new(db: Database) -> Self {
        LogRepository { db }
    }

    /// Appends a log line and prunes the client's history to the newest
    /// [`MAX_LOGS_PER_CLIENT`] entries.
    pub async fn add(&self, client_id: i64, description: String) -> DbResult<i64> {
        let description = sanitize_text(&description).unwrap_or_default();

        let query = self.db.query().await?;
        let id = query
            .run_and_get_id(
                "INSERT INTO logs (client_id, description, created_at) VALUES (?, ?, ?)",
                &[client_id.into(), description.into(), now_iso().into()],
            )
            .await?;

        query
            .run(
                "DELETE FROM logs
                 WHERE client_id = ?1
                   AND id NOT IN (
                       SELECT id FROM logs WHERE client_id = ?1
                       ORDER BY id DESC LIMIT ?2
                   )",
                &[client_id.into(), MAX_LOGS_PER_CLIENT.into()],
            )
            .await?;

        Ok(id)
    }

    /// [`add`](Self::add), but failures are logged and swallowed.
    ///
    /// This is the entry point the other repositories use after their
    /// primary write has committed.
    pub async fn add_best_effort(&self, client_id: i64, description: String) {
        if let Err(e) = self.add(client_id, description).await {
            warn!(client_id, error = %e, "audit log write failed (ignored)");
        }
    }

    /// History for one client, newest first.
    pub async fn get_by_client(&self, client_id: i64) -> DbResult<Vec<LogEntry>> {
        let query = self.db.query().await?;
        let rows = query
            .get_all(
                "SELECT id, client_id, description, created_at FROM logs
                 WHERE client_id = ? ORDER BY id DESC",
                &[client_id.into()],
            )
            .await?;
        Ok(rows.iter().map(crate::mapper::map_log).collect())
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DbConfig;
    use caderneta_core::{Money, NewClient};

    async fn test_db() -> Database {
        Database::connect(DbConfig::in_memory()).await.unwrap()
    }

    async fn add_client(db: &Database) -> i64 {
        db.clients()
            .add_client(NewClient {
                name: "Maria".to_string(),
                value_total: Money::from_cents(10000),
                ..Default::default()
            })
            .await
            .unwrap()
            .id
    }

    #[tokio::test]
    async fn test_add_and_read_logs() {
        let db = test_db().await;
        let client_id = add_client(&db).await;

        db.logs().add(client_id, "Visita realizada".to_string()).await.unwrap();
        db.logs().add(client_id, "Segunda visita".to_string()).await.unwrap();

        let logs = db.logs().get_by_client(client_id).await.unwrap();
        // Newest first; creation itself logged one line
        assert_eq!(logs[0].description, "Segunda visita");
        assert!(logs.iter().any(|l| l.description == "Cliente cadastrado"));
    }

    #[tokio::test]
    async fn test_retention_prunes_to_fifty() {
        let db = test_db().await;
        let client_id = add_client(&db).await;

        for i in 0..60 {
            db.logs().add(client_id, format!("linha {i}")).await.unwrap();
        }

        let logs = db.logs().get_by_client(client_id).await.unwrap();
        assert_eq!(logs.len() as i64, MAX_LOGS_PER_CLIENT);
        // The survivors are the newest ones
        assert_eq!(logs[0].description, "linha 59");
        assert!(!logs.iter().any(|l| l.description == "linha 0"));
    }

    #[tokio::test]
    async fn test_retention_is_per_client() {
        let db = test_db().await;
        let a = add_client(&db).await;
        let b = add_client(&db).await;

        for i in 0..55 {
            db.logs().add(a, format!("a {i}")).await.unwrap();
        }
        db.logs().add(b, "b 0".to_string()).await.unwrap();

        assert_eq!(
            db.logs().get_by_client(a).await.unwrap().len() as i64,
            MAX_LOGS_PER_CLIENT
        );
        // Client b's history is untouched by a's pruning
        let b_logs = db.logs().get_by_client(b).await.unwrap();
        assert!(b_logs.iter().any(|l| l.description == "b 0"));
    }

    #[tokio::test]
    async fn test_best_effort_never_fails() {
        let db = test_db().await;
        // Nonexistent client: the FK violation is swallowed
        db.logs().add_best_effort(9999, "orfao".to_string()).await;
    }
}
