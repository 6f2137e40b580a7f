//! # Schema & Migration Engine
//!
//! Declares the table/index set and runs versioned migrations gated by
//! SQLite's own `user_version` header field.
//!
//! ## Migration Chain
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────┐
//! │                    user_version state machine                       │
//! │                                                                     │
//! │   0 ──► 2 ──────────► 3 ──────────────► 4 (current)                 │
//! │   │     │             │                 │                           │
//! │   │     │             │                 └── add last_visit_date     │
//! │   │     │             │                                             │
//! │   │     │             └── route hierarchy (bairros/ruas),           │
//! │   │     │                 status/next_charge_date/visit_order,      │
//! │   │     │                 CHECK-constraint rewrite of clients       │
//! │   │     │                                                           │
//! │   │     └── float money → integer cents, dates → ISO strings        │
//! │   │         (create-new / copy-with-cast / drop-old / rename,       │
//! │   │          FK enforcement off during the rewrite, verified        │
//! │   │          back on afterward)                                     │
//! │   │                                                                 │
//! │   └── legacy base schema (REAL money columns), created for fresh    │
//! │       installs too so every database walks the same path            │
//! │                                                                     │
//! │   Strictly forward, one version at a time, each version inside      │
//! │   its own transaction with user_version set before COMMIT.          │
//! │   Already-applied versions are guaranteed no-ops.                   │
//! └─────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Why user_version and not a migrations table?
//! The integer lives in the database file header, so it survives exactly
//! as long as the data does and costs nothing to read. It also matches
//! the migration-id semantics the data was originally written under,
//! which matters for files carried over from older app versions.

use sqlx::sqlite::SqliteConnection;
use sqlx::SqlitePool;
use tracing::{debug, info, warn};

use crate::config::DbConfig;
use crate::error::{DbError, DbResult};
use crate::query::exec_batch_on;

/// The schema version this build writes.
pub const CURRENT_SCHEMA_VERSION: i64 = 4;

// =============================================================================
// DDL
// =============================================================================

/// Version-0 legacy shape. Money is REAL, dates are whatever the old app
/// felt like writing. Exists so fresh installs and ancient installs run
/// the identical migration chain.
const LEGACY_BASE_DDL: &str = "
CREATE TABLE IF NOT EXISTS clients (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    name TEXT NOT NULL,
    value REAL NOT NULL DEFAULT 0,
    paid REAL NOT NULL DEFAULT 0,
    phone TEXT,
    reference TEXT,
    next_charge TEXT,
    created_at TEXT
);
CREATE TABLE IF NOT EXISTS payments (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    client_id INTEGER NOT NULL REFERENCES clients (id) ON DELETE CASCADE,
    amount REAL NOT NULL,
    created_at TEXT
);
CREATE TABLE IF NOT EXISTS logs (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    client_id INTEGER NOT NULL REFERENCES clients (id) ON DELETE CASCADE,
    description TEXT,
    created_at TEXT
);
";

/// The canonical clients table, produced by the v3 rewrite.
///
/// `IF NOT EXISTS` is deliberate: a previous partial run may have left
/// the staging table behind, and the copy below is `INSERT OR REPLACE`,
/// so resuming over it is safe.
pub(crate) const CLIENTS_FINAL_DDL: &str = "
CREATE TABLE IF NOT EXISTS clients_new (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    name TEXT NOT NULL,
    value_total_cents INTEGER NOT NULL DEFAULT 0 CHECK (value_total_cents >= 0),
    paid_total_cents INTEGER NOT NULL DEFAULT 0 CHECK (paid_total_cents >= 0),
    phone TEXT,
    reference_note TEXT,
    street_id INTEGER REFERENCES ruas (id) ON DELETE SET NULL,
    visit_order INTEGER NOT NULL DEFAULT 1 CHECK (visit_order >= 1),
    priority_flag INTEGER NOT NULL DEFAULT 0 CHECK (priority_flag IN (0, 1)),
    notes TEXT,
    status TEXT NOT NULL DEFAULT 'pending' CHECK (status IN ('pending', 'settled')),
    next_charge_date TEXT CHECK (
        next_charge_date IS NULL
        OR next_charge_date GLOB '[0-9][0-9][0-9][0-9]-[0-9][0-9]-[0-9][0-9]'
    ),
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);
";

/// All indexes, batch-created in one pass after migrations so they are
/// laid down together instead of interleaved with table rewrites.
const INDEX_DDL: &str = "
CREATE INDEX IF NOT EXISTS idx_clients_street ON clients (street_id);
CREATE INDEX IF NOT EXISTS idx_clients_status ON clients (status);
CREATE INDEX IF NOT EXISTS idx_clients_next_charge ON clients (next_charge_date);
CREATE INDEX IF NOT EXISTS idx_clients_updated_at ON clients (updated_at);
CREATE INDEX IF NOT EXISTS idx_payments_client ON payments (client_id);
CREATE INDEX IF NOT EXISTS idx_payments_created ON payments (created_at);
CREATE INDEX IF NOT EXISTS idx_logs_client ON logs (client_id);
CREATE INDEX IF NOT EXISTS idx_ruas_bairro ON ruas (bairro_id);
";

/// Persisted mirror of the in-memory totals cache.
const CACHE_TABLE_DDL: &str = "
CREATE TABLE IF NOT EXISTS financial_cache (
    key TEXT PRIMARY KEY,
    value TEXT NOT NULL,
    expires_at INTEGER NOT NULL
);
";

/// FTS5 index over the searchable client fields, with sync triggers.
/// Created best-effort; absence selects the LIKE fallback at runtime.
const FTS_DDL: &str = "
CREATE VIRTUAL TABLE clients_fts USING fts5(
    name, phone, reference_note,
    content='clients', content_rowid='id',
    tokenize='unicode61 remove_diacritics 2'
);
CREATE TRIGGER clients_fts_ai AFTER INSERT ON clients BEGIN
    INSERT INTO clients_fts (rowid, name, phone, reference_note)
    VALUES (new.id, new.name, coalesce(new.phone, ''), coalesce(new.reference_note, ''));
END;
CREATE TRIGGER clients_fts_ad AFTER DELETE ON clients BEGIN
    INSERT INTO clients_fts (clients_fts, rowid, name, phone, reference_note)
    VALUES ('delete', old.id, old.name, coalesce(old.phone, ''), coalesce(old.reference_note, ''));
END;
CREATE TRIGGER clients_fts_au AFTER UPDATE ON clients BEGIN
    INSERT INTO clients_fts (clients_fts, rowid, name, phone, reference_note)
    VALUES ('delete', old.id, old.name, coalesce(old.phone, ''), coalesce(old.reference_note, ''));
    INSERT INTO clients_fts (rowid, name, phone, reference_note)
    VALUES (new.id, new.name, coalesce(new.phone, ''), coalesce(new.reference_note, ''));
END;
INSERT INTO clients_fts (clients_fts) VALUES ('rebuild');
";

// =============================================================================
// Entry Point
// =============================================================================

/// Brings the database to the current schema version.
///
/// Idempotent: already-applied versions are skipped via `user_version`,
/// and every DDL statement outside the versioned rewrites is
/// `IF NOT EXISTS`. The engine facade guards this with a double-checked
/// lock so concurrent startup callers share one run.
///
/// ## Returns
/// Whether the FTS index is available (false selects the LIKE fallback).
pub(crate) async fn initialize(pool: &SqlitePool, config: &DbConfig) -> DbResult<bool> {
    let mut conn = pool
        .acquire()
        .await
        .map_err(|e| DbError::ConnectionFailed(e.to_string()))?;
    let conn = &mut *conn;

    let mut version = user_version(conn).await?;
    info!(version, target = CURRENT_SCHEMA_VERSION, "initializing schema");

    if version < 2 {
        exec_batch_on(&mut *conn, LEGACY_BASE_DDL).await?;
        migrate_to_v2(conn).await?;
        version = 2;
    }
    if version < 3 {
        migrate_to_v3(conn).await?;
        version = 3;
    }
    if version < 4 {
        migrate_to_v4(conn).await?;
    }

    exec_batch_on(&mut *conn, INDEX_DDL).await?;
    exec_batch_on(&mut *conn, CACHE_TABLE_DDL).await?;

    let fts_available = ensure_fts(conn).await;

    apply_durability(conn, config).await?;
    verify_foreign_keys_enabled(conn, CURRENT_SCHEMA_VERSION).await?;
    purge_expired_cache(conn).await;

    info!(fts_available, "schema ready");
    Ok(fts_available)
}

/// Reads the schema version from the database header.
pub(crate) async fn user_version(conn: &mut SqliteConnection) -> DbResult<i64> {
    sqlx::query_scalar::<_, i64>("PRAGMA user_version")
        .fetch_one(&mut *conn)
        .await
        .map_err(|e| DbError::ConnectionFailed(e.to_string()))
}

// =============================================================================
// Migrations
// =============================================================================

/// v2: float money → integer cents, dates → ISO strings.
///
/// Rewrites clients, payments and logs via create-new / copy-with-cast /
/// drop-old / rename. FK enforcement is off for the duration and its
/// re-enablement is verified afterward; failure to confirm is fatal.
async fn migrate_to_v2(conn: &mut SqliteConnection) -> DbResult<()> {
    info!("migrating schema to v2 (integer cents, ISO dates)");

    set_foreign_keys(conn, false).await?;
    begin(conn).await?;

    let body = exec_batch_on(
        &mut *conn,
        "
        CREATE TABLE clients_v2 (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            name TEXT NOT NULL,
            value_total_cents INTEGER NOT NULL DEFAULT 0,
            paid_total_cents INTEGER NOT NULL DEFAULT 0,
            phone TEXT,
            reference_note TEXT,
            next_charge TEXT,
            created_at TEXT NOT NULL
        );
        INSERT INTO clients_v2
            (id, name, value_total_cents, paid_total_cents, phone, reference_note, next_charge, created_at)
        SELECT id, name,
               CAST(ROUND(COALESCE(value, 0) * 100) AS INTEGER),
               CAST(ROUND(COALESCE(paid, 0) * 100) AS INTEGER),
               phone, reference, next_charge,
               CASE
                   WHEN created_at IS NULL OR created_at = ''
                       THEN strftime('%Y-%m-%dT%H:%M:%fZ', 'now')
                   WHEN created_at LIKE '% %'
                       THEN replace(created_at, ' ', 'T') || 'Z'
                   ELSE created_at
               END
        FROM clients;
        DROP TABLE clients;
        ALTER TABLE clients_v2 RENAME TO clients;

        CREATE TABLE payments_v2 (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            client_id INTEGER NOT NULL REFERENCES clients (id) ON DELETE CASCADE,
            amount_cents INTEGER NOT NULL,
            created_at TEXT NOT NULL
        );
        INSERT INTO payments_v2 (id, client_id, amount_cents, created_at)
        SELECT id, client_id,
               CAST(ROUND(COALESCE(amount, 0) * 100) AS INTEGER),
               CASE
                   WHEN created_at IS NULL OR created_at = ''
                       THEN strftime('%Y-%m-%dT%H:%M:%fZ', 'now')
                   WHEN created_at LIKE '% %'
                       THEN replace(created_at, ' ', 'T') || 'Z'
                   ELSE created_at
               END
        FROM payments;
        DROP TABLE payments;
        ALTER TABLE payments_v2 RENAME TO payments;

        CREATE TABLE logs_v2 (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            client_id INTEGER NOT NULL REFERENCES clients (id) ON DELETE CASCADE,
            description TEXT NOT NULL DEFAULT '',
            created_at TEXT NOT NULL
        );
        INSERT INTO logs_v2 (id, client_id, description, created_at)
        SELECT id, client_id, COALESCE(description, ''),
               CASE
                   WHEN created_at IS NULL OR created_at = ''
                       THEN strftime('%Y-%m-%dT%H:%M:%fZ', 'now')
                   WHEN created_at LIKE '% %'
                       THEN replace(created_at, ' ', 'T') || 'Z'
                   ELSE created_at
               END
        FROM logs;
        DROP TABLE logs;
        ALTER TABLE logs_v2 RENAME TO logs;
        ",
    )
    .await;

    // Re-enable FK enforcement even when the rewrite failed; the
    // connection outlives this migration.
    let finished = finish_versioned(conn, 2, body).await;
    let reenabled = set_foreign_keys(conn, true).await;
    finished?;
    reenabled?;
    verify_foreign_keys_enabled(conn, 2).await
}

/// v3: route hierarchy + route/status columns + constraint rewrite.
async fn migrate_to_v3(conn: &mut SqliteConnection) -> DbResult<()> {
    info!("migrating schema to v3 (route hierarchy, status, charge dates)");

    // Phase A: additive changes and data migration, one transaction.
    // Guarded per column so a rerun after a partial failure converges.
    begin(conn).await?;
    let body = v3_additive(conn).await;
    if let Err(e) = body {
        let _ = rollback(conn).await;
        return Err(migration_error(3, e));
    }
    commit(conn).await?;

    // Phase B: drop legacy columns and add CHECK constraints, but only
    // if a legacy column is still present (idempotent rerun skips this).
    if column_exists(conn, "clients", "next_charge").await? {
        set_foreign_keys(conn, false).await?;
        begin(conn).await?;

        let body = exec_batch_on(
            &mut *conn,
            &format!(
                "{CLIENTS_FINAL_DDL}
                INSERT OR REPLACE INTO clients_new
                    (id, name, value_total_cents, paid_total_cents, phone, reference_note,
                     street_id, visit_order, priority_flag, notes, status, next_charge_date,
                     created_at, updated_at)
                SELECT id, name,
                       MAX(value_total_cents, 0),
                       MIN(MAX(paid_total_cents, 0), MAX(value_total_cents, 0)),
                       phone, reference_note, street_id,
                       MAX(COALESCE(visit_order, 1), 1),
                       CASE WHEN priority_flag IN (0, 1) THEN priority_flag ELSE 0 END,
                       notes,
                       CASE WHEN lower(COALESCE(status, '')) = 'settled'
                            THEN 'settled' ELSE 'pending' END,
                       CASE WHEN next_charge_date GLOB '[0-9][0-9][0-9][0-9]-[0-9][0-9]-[0-9][0-9]'
                            THEN next_charge_date ELSE NULL END,
                       COALESCE(created_at, strftime('%Y-%m-%dT%H:%M:%fZ', 'now')),
                       COALESCE(updated_at, created_at, strftime('%Y-%m-%dT%H:%M:%fZ', 'now'))
                FROM clients;
                DROP TABLE clients;
                ALTER TABLE clients_new RENAME TO clients;
                "
            ),
        )
        .await;

        let finished = finish_versioned(conn, 3, body).await;
        let reenabled = set_foreign_keys(conn, true).await;
        finished?;
        reenabled?;
        verify_foreign_keys_enabled(conn, 3).await?;
    } else {
        // Rewrite already happened in a previous run; just record v3.
        begin(conn).await?;
        finish_versioned(conn, 3, Ok(())).await?;
    }

    Ok(())
}

/// Phase A of v3: everything that can be expressed as ALTER/UPDATE.
async fn v3_additive(conn: &mut SqliteConnection) -> DbResult<()> {
    exec_batch_on(
        &mut *conn,
        "
        CREATE TABLE IF NOT EXISTS bairros (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            name TEXT NOT NULL
        );
        CREATE TABLE IF NOT EXISTS ruas (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            bairro_id INTEGER NOT NULL REFERENCES bairros (id) ON DELETE CASCADE,
            name TEXT NOT NULL
        );
        ",
    )
    .await?;

    let new_columns: [(&str, &str); 7] = [
        ("street_id", "INTEGER REFERENCES ruas (id) ON DELETE SET NULL"),
        ("visit_order", "INTEGER NOT NULL DEFAULT 1"),
        ("priority_flag", "INTEGER NOT NULL DEFAULT 0"),
        ("notes", "TEXT"),
        ("status", "TEXT NOT NULL DEFAULT 'pending'"),
        ("next_charge_date", "TEXT"),
        ("updated_at", "TEXT"),
    ];
    for (name, decl) in new_columns {
        if !column_exists(conn, "clients", name).await? {
            exec_batch_on(
                &mut *conn,
                &format!("ALTER TABLE clients ADD COLUMN {name} {decl};"),
            )
            .await?;
        }
    }

    // Legacy free-text next_charge: take what parses as a date, both in
    // the canonical and the old DD/MM/YYYY form; drop the rest.
    // Then recompute status and enforce "settled clients have no next
    // charge" on the migrated data.
    exec_batch_on(
        &mut *conn,
        "
        UPDATE clients SET next_charge_date = next_charge
         WHERE next_charge_date IS NULL
           AND next_charge GLOB '[0-9][0-9][0-9][0-9]-[0-9][0-9]-[0-9][0-9]';
        UPDATE clients SET next_charge_date =
               substr(next_charge, 7, 4) || '-' || substr(next_charge, 4, 2) || '-' || substr(next_charge, 1, 2)
         WHERE next_charge_date IS NULL
           AND next_charge GLOB '[0-9][0-9]/[0-9][0-9]/[0-9][0-9][0-9][0-9]';
        UPDATE clients SET status = CASE
               WHEN paid_total_cents >= value_total_cents THEN 'settled'
               ELSE 'pending' END;
        UPDATE clients SET next_charge_date = NULL WHERE status = 'settled';
        UPDATE clients SET updated_at = COALESCE(created_at, strftime('%Y-%m-%dT%H:%M:%fZ', 'now'))
         WHERE updated_at IS NULL OR updated_at = '';
        ",
    )
    .await
}

/// v4: last visit timestamp, if absent.
async fn migrate_to_v4(conn: &mut SqliteConnection) -> DbResult<()> {
    info!("migrating schema to v4 (last visit timestamp)");

    begin(conn).await?;
    let body = if column_exists(conn, "clients", "last_visit_date").await? {
        Ok(())
    } else {
        exec_batch_on(&mut *conn, "ALTER TABLE clients ADD COLUMN last_visit_date TEXT;").await
    };
    finish_versioned(conn, 4, body).await
}

/// Commits the step with its version recorded, or rolls everything back.
async fn finish_versioned(
    conn: &mut SqliteConnection,
    version: i64,
    body: DbResult<()>,
) -> DbResult<()> {
    match body {
        Ok(()) => {
            set_user_version(conn, version).await?;
            commit(conn).await?;
            debug!(version, "migration step committed");
            Ok(())
        }
        Err(e) => {
            let _ = rollback(conn).await;
            Err(migration_error(version, e))
        }
    }
}

fn migration_error(version: i64, err: DbError) -> DbError {
    DbError::Migration {
        version,
        message: err.to_string(),
    }
}

// =============================================================================
// Infra: FTS, Durability, Self-Checks
// =============================================================================

/// Creates the FTS index if this SQLite build supports FTS5.
///
/// Failure is soft: search falls back to LIKE. The probe result is
/// cached by the engine for the process lifetime.
async fn ensure_fts(conn: &mut SqliteConnection) -> bool {
    match table_exists(conn, "clients_fts").await {
        Ok(true) => true,
        Ok(false) => match exec_batch_on(&mut *conn, FTS_DDL).await {
            Ok(()) => true,
            Err(e) => {
                warn!(error = %e, "FTS index unavailable, search will use LIKE fallback");
                false
            }
        },
        Err(e) => {
            warn!(error = %e, "FTS probe failed, search will use LIKE fallback");
            false
        }
    }
}

/// Re-asserts the durability pragma for the configured profile.
async fn apply_durability(conn: &mut SqliteConnection, config: &DbConfig) -> DbResult<()> {
    let level = if config.conservative_durability {
        "FULL"
    } else {
        "NORMAL"
    };
    exec_batch_on(&mut *conn, &format!("PRAGMA synchronous = {level};")).await
}

/// Fatal self-check: the FK enforcement flag must actually be on.
async fn verify_foreign_keys_enabled(conn: &mut SqliteConnection, version: i64) -> DbResult<()> {
    let enabled: i64 = sqlx::query_scalar("PRAGMA foreign_keys")
        .fetch_one(&mut *conn)
        .await
        .map_err(|e| migration_error(version, DbError::ConnectionFailed(e.to_string())))?;

    if enabled != 1 {
        return Err(DbError::Migration {
            version,
            message: "foreign key enforcement did not re-enable".to_string(),
        });
    }
    Ok(())
}

/// Startup cleanup of the persisted cache mirror. Best-effort.
async fn purge_expired_cache(conn: &mut SqliteConnection) {
    let now_ms = chrono::Utc::now().timestamp_millis();
    if let Err(e) = sqlx::query("DELETE FROM financial_cache WHERE expires_at < ?")
        .bind(now_ms)
        .execute(&mut *conn)
        .await
    {
        warn!(error = %e, "could not purge expired cache rows");
    }
}

// =============================================================================
// Small Helpers
// =============================================================================

async fn begin(conn: &mut SqliteConnection) -> DbResult<()> {
    exec_batch_on(&mut *conn, "BEGIN IMMEDIATE").await
}

async fn commit(conn: &mut SqliteConnection) -> DbResult<()> {
    exec_batch_on(&mut *conn, "COMMIT").await
}

async fn rollback(conn: &mut SqliteConnection) -> DbResult<()> {
    exec_batch_on(&mut *conn, "ROLLBACK").await
}

async fn set_user_version(conn: &mut SqliteConnection, version: i64) -> DbResult<()> {
    exec_batch_on(&mut *conn, &format!("PRAGMA user_version = {version}")).await
}

async fn set_foreign_keys(conn: &mut SqliteConnection, on: bool) -> DbResult<()> {
    let flag = if on { "ON" } else { "OFF" };
    exec_batch_on(&mut *conn, &format!("PRAGMA foreign_keys = {flag}")).await
}

pub(crate) async fn table_exists(conn: &mut SqliteConnection, name: &str) -> DbResult<bool> {
    let count: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM sqlite_master WHERE type IN ('table', 'view') AND name = ?",
    )
    .bind(name)
    .fetch_one(&mut *conn)
    .await
    .map_err(|e| DbError::ConnectionFailed(e.to_string()))?;
    Ok(count > 0)
}

async fn column_exists(conn: &mut SqliteConnection, table: &str, column: &str) -> DbResult<bool> {
    // PRAGMA arguments cannot be bound; table names here are static.
    let count: i64 = sqlx::query_scalar(&format!(
        "SELECT COUNT(*) FROM pragma_table_info('{table}') WHERE name = ?"
    ))
    .bind(column)
    .fetch_one(&mut *conn)
    .await
    .map_err(|e| DbError::ConnectionFailed(e.to_string()))?;
    Ok(count > 0)
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};

    async fn raw_pool() -> SqlitePool {
        SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(
                SqliteConnectOptions::new()
                    .in_memory(true)
                    .foreign_keys(true),
            )
            .await
            .unwrap()
    }

    fn test_config() -> DbConfig {
        DbConfig::in_memory()
    }

    async fn column_names(pool: &SqlitePool, table: &str) -> Vec<String> {
        sqlx::query_scalar(&format!("SELECT name FROM pragma_table_info('{table}')"))
            .fetch_all(pool)
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_fresh_initialize_reaches_current_version() {
        let pool = raw_pool().await;
        initialize(&pool, &test_config()).await.unwrap();

        let version: i64 = sqlx::query_scalar("PRAGMA user_version")
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(version, CURRENT_SCHEMA_VERSION);

        let cols = column_names(&pool, "clients").await;
        for expected in [
            "value_total_cents",
            "paid_total_cents",
            "street_id",
            "visit_order",
            "status",
            "next_charge_date",
            "last_visit_date",
            "updated_at",
        ] {
            assert!(cols.iter().any(|c| c == expected), "missing column {expected}");
        }
        // Legacy columns are gone
        assert!(!cols.iter().any(|c| c == "value"));
        assert!(!cols.iter().any(|c| c == "next_charge"));
    }

    #[tokio::test]
    async fn test_initialize_is_idempotent() {
        let pool = raw_pool().await;
        initialize(&pool, &test_config()).await.unwrap();
        let cols_first = column_names(&pool, "clients").await;

        initialize(&pool, &test_config()).await.unwrap();
        let cols_second = column_names(&pool, "clients").await;

        assert_eq!(cols_first, cols_second);
        let version: i64 = sqlx::query_scalar("PRAGMA user_version")
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(version, CURRENT_SCHEMA_VERSION);
    }

    #[tokio::test]
    async fn test_v2_converts_float_money_to_cents() {
        let pool = raw_pool().await;

        // Seed a legacy database the way the old app left it
        sqlx::raw_sql(LEGACY_BASE_DDL).execute(&pool).await.unwrap();
        sqlx::query("INSERT INTO clients (name, value, paid, created_at) VALUES (?, ?, ?, ?)")
            .bind("Maria")
            .bind(15.5f64)
            .bind(0.0f64)
            .bind("2023-01-10 08:30:00")
            .execute(&pool)
            .await
            .unwrap();

        initialize(&pool, &test_config()).await.unwrap();

        let (cents, paid, created): (i64, i64, String) = sqlx::query_as(
            "SELECT value_total_cents, paid_total_cents, created_at FROM clients WHERE name = 'Maria'",
        )
        .fetch_one(&pool)
        .await
        .unwrap();
        assert_eq!(cents, 1550);
        assert_eq!(paid, 0);
        assert_eq!(created, "2023-01-10T08:30:00Z");
    }

    #[tokio::test]
    async fn test_v3_migrates_legacy_next_charge_and_status() {
        let pool = raw_pool().await;
        sqlx::raw_sql(LEGACY_BASE_DDL).execute(&pool).await.unwrap();

        // Pending client with ISO next charge
        sqlx::query("INSERT INTO clients (name, value, paid, next_charge) VALUES ('A', 100.0, 40.0, '2025-10-01')")
            .execute(&pool)
            .await
            .unwrap();
        // Pending client with Brazilian-format next charge
        sqlx::query("INSERT INTO clients (name, value, paid, next_charge) VALUES ('B', 50.0, 0.0, '01/10/2025')")
            .execute(&pool)
            .await
            .unwrap();
        // Fully paid client: becomes settled, next charge dropped
        sqlx::query("INSERT INTO clients (name, value, paid, next_charge) VALUES ('C', 30.0, 30.0, '2025-10-01')")
            .execute(&pool)
            .await
            .unwrap();
        // Junk next charge is discarded
        sqlx::query("INSERT INTO clients (name, value, paid, next_charge) VALUES ('D', 10.0, 0.0, 'semana que vem')")
            .execute(&pool)
            .await
            .unwrap();

        initialize(&pool, &test_config()).await.unwrap();

        let rows: Vec<(String, String, Option<String>)> =
            sqlx::query_as("SELECT name, status, next_charge_date FROM clients ORDER BY name")
                .fetch_all(&pool)
                .await
                .unwrap();
        assert_eq!(
            rows,
            vec![
                ("A".into(), "pending".into(), Some("2025-10-01".into())),
                ("B".into(), "pending".into(), Some("2025-10-01".into())),
                ("C".into(), "settled".into(), None),
                ("D".into(), "pending".into(), None),
            ]
        );
    }

    #[tokio::test]
    async fn test_v3_rewrite_survives_stale_staging_table() {
        let pool = raw_pool().await;
        sqlx::raw_sql(LEGACY_BASE_DDL).execute(&pool).await.unwrap();
        sqlx::query("INSERT INTO clients (name, value, paid) VALUES ('A', 10.0, 0.0)")
            .execute(&pool)
            .await
            .unwrap();

        // A previous run died between creating the staging table and the
        // rename. ruas must exist first for the FK reference.
        sqlx::raw_sql(
            "CREATE TABLE bairros (id INTEGER PRIMARY KEY AUTOINCREMENT, name TEXT NOT NULL);
             CREATE TABLE ruas (
                 id INTEGER PRIMARY KEY AUTOINCREMENT,
                 bairro_id INTEGER NOT NULL REFERENCES bairros (id) ON DELETE CASCADE,
                 name TEXT NOT NULL
             );",
        )
        .execute(&pool)
        .await
        .unwrap();
        sqlx::raw_sql(CLIENTS_FINAL_DDL).execute(&pool).await.unwrap();

        initialize(&pool, &test_config()).await.unwrap();

        let n: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM clients")
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(n, 1);
        // Staging table was consumed by the rename
        let mut conn = pool.acquire().await.unwrap();
        assert!(!table_exists(&mut conn, "clients_new").await.unwrap());
    }

    #[tokio::test]
    async fn test_check_constraints_enforced() {
        let pool = raw_pool().await;
        initialize(&pool, &test_config()).await.unwrap();

        let err = sqlx::query(
            "INSERT INTO clients (name, value_total_cents, status, created_at, updated_at)
             VALUES ('X', 100, 'paid', '2024-01-01T00:00:00Z', '2024-01-01T00:00:00Z')",
        )
        .execute(&pool)
        .await;
        assert!(err.is_err(), "status outside the enum must be rejected");

        let err = sqlx::query(
            "INSERT INTO clients (name, value_total_cents, created_at, updated_at)
             VALUES ('X', -5, '2024-01-01T00:00:00Z', '2024-01-01T00:00:00Z')",
        )
        .execute(&pool)
        .await;
        assert!(err.is_err(), "negative totals must be rejected");
    }

    #[tokio::test]
    async fn test_foreign_keys_enforced_after_init() {
        let pool = raw_pool().await;
        initialize(&pool, &test_config()).await.unwrap();

        let err = sqlx::query(
            "INSERT INTO payments (client_id, amount_cents, created_at)
             VALUES (9999, 100, '2024-01-01T00:00:00Z')",
        )
        .execute(&pool)
        .await;
        assert!(err.is_err(), "payment without a client must be rejected");
    }
}
