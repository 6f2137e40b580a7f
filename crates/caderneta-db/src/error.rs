//! # Database Error Types
//!
//! Error types for database operations.
//!
//! ## Error Flow
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────┐
//! │                    Error Propagation                                │
//! │                                                                     │
//! │  SQLite Error (sqlx::Error)                                         │
//! │       │                                                             │
//! │       ▼                                                             │
//! │  DbError (this module) ← classified, statement + params attached    │
//! │       │                                                             │
//! │       ▼                                                             │
//! │  Consumer maps Validation → inline feedback,                        │
//! │  everything else → generic retry prompt                             │
//! │                                                                     │
//! └─────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Policy
//! - Lookup misses are `Ok(None)` / empty vec, never an error
//! - Transactional failures roll back fully and re-raise
//! - Audit-log and cache side effects are logged, never fatal

use thiserror::Error;

use caderneta_core::ValidationError;

/// How many characters of an offending statement are kept on the error.
/// Enough to identify the query without dragging whole scripts into logs.
const STATEMENT_SNIPPET_LEN: usize = 200;

/// Database operation errors.
#[derive(Debug, Error)]
pub enum DbError {
    /// Opening the database exceeded the configured timeout.
    ///
    /// The open attempt keeps running detached; if it succeeds late the
    /// connection manager closes the orphan handle instead of adopting it.
    #[error("Database open timed out")]
    ConnectionTimeout,

    /// Database could not be opened.
    ///
    /// ## When This Occurs
    /// - Database file can't be created (permissions, disk full)
    /// - The file exists but is not a database
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// Integrity check failed and the recovery attempt didn't help.
    #[error("Database corruption detected and not recoverable: {0}")]
    CorruptionUnrecoverable(String),

    /// A transaction exceeded its timeout. The caller must assume the
    /// transaction rolled back.
    #[error("Transaction timed out after {0} ms")]
    TransactionTimeout(u64),

    /// A transaction body failed; everything was rolled back.
    #[error("Transaction failed: {0}")]
    TransactionFailed(String),

    /// Migration failed.
    #[error("Migration to v{version} failed: {message}")]
    Migration { version: i64, message: String },

    /// Update/delete target does not exist.
    ///
    /// Reads return `Ok(None)` instead; this variant is for writes whose
    /// target row must exist (rows_affected == 0).
    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: i64 },

    /// Invariant violation raised before any write was attempted.
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    /// Classified engine failure.
    ///
    /// Carries a best-effort error code parsed from the SQLite message, a
    /// truncated copy of the offending statement and the bound parameters.
    /// Callers must not treat this as "no result".
    #[error("Query failed ({code}): {message} [stmt: {statement}]")]
    Query {
        code: String,
        message: String,
        statement: String,
        params: Vec<String>,
    },
}

impl DbError {
    /// Creates a NotFound error for a write whose target row is missing.
    pub fn not_found(entity: &'static str, id: i64) -> Self {
        DbError::NotFound { entity, id }
    }

    /// Classifies a sqlx error against the statement that produced it.
    ///
    /// ## Error Code Parsing
    /// SQLite messages lead with a recognizable phrase ("UNIQUE constraint
    /// failed", "FOREIGN KEY constraint failed", "no such table", ...).
    /// The phrase becomes the code; anything unrecognized is "SQLITE_ERROR".
    pub fn from_sqlx(err: sqlx::Error, statement: &str, params: &[String]) -> Self {
        let message = match &err {
            sqlx::Error::Database(db_err) => db_err.message().to_string(),
            other => other.to_string(),
        };

        DbError::Query {
            code: classify_code(&message),
            message,
            statement: truncate_statement(statement),
            params: params.to_vec(),
        }
    }
}

/// Best-effort mapping from a SQLite message to a stable code string.
fn classify_code(message: &str) -> String {
    let code = if message.contains("UNIQUE constraint failed") {
        "SQLITE_CONSTRAINT_UNIQUE"
    } else if message.contains("FOREIGN KEY constraint failed") {
        "SQLITE_CONSTRAINT_FOREIGNKEY"
    } else if message.contains("CHECK constraint failed") {
        "SQLITE_CONSTRAINT_CHECK"
    } else if message.contains("NOT NULL constraint failed") {
        "SQLITE_CONSTRAINT_NOTNULL"
    } else if message.contains("no such table") {
        "SQLITE_ERROR_NO_TABLE"
    } else if message.contains("no such column") {
        "SQLITE_ERROR_NO_COLUMN"
    } else if message.contains("database is locked") {
        "SQLITE_BUSY"
    } else if message.contains("database disk image is malformed") {
        "SQLITE_CORRUPT"
    } else if message.contains("syntax error") {
        "SQLITE_ERROR_SYNTAX"
    } else {
        "SQLITE_ERROR"
    };

    code.to_string()
}

/// Truncates a statement for error context (multi-line collapsed).
fn truncate_statement(statement: &str) -> String {
    let compact: String = statement.split_whitespace().collect::<Vec<_>>().join(" ");
    if compact.len() > STATEMENT_SNIPPET_LEN {
        let mut cut = STATEMENT_SNIPPET_LEN;
        while !compact.is_char_boundary(cut) {
            cut -= 1;
        }
        format!("{}...", &compact[..cut])
    } else {
        compact
    }
}

/// Result type for database operations.
pub type DbResult<T> = Result<T, DbError>;

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_code() {
        assert_eq!(
            classify_code("UNIQUE constraint failed: clients.name"),
            "SQLITE_CONSTRAINT_UNIQUE"
        );
        assert_eq!(
            classify_code("FOREIGN KEY constraint failed"),
            "SQLITE_CONSTRAINT_FOREIGNKEY"
        );
        assert_eq!(classify_code("no such table: nada"), "SQLITE_ERROR_NO_TABLE");
        assert_eq!(classify_code("something else entirely"), "SQLITE_ERROR");
    }

    #[test]
    fn test_truncate_statement() {
        let short = "SELECT 1";
        assert_eq!(truncate_statement(short), "SELECT 1");

        let long = format!("SELECT {}", "x, ".repeat(200));
        let truncated = truncate_statement(&long);
        assert!(truncated.len() <= STATEMENT_SNIPPET_LEN + 3);
        assert!(truncated.ends_with("..."));
    }

    #[test]
    fn test_truncate_collapses_whitespace() {
        let stmt = "SELECT *\n  FROM clients\n  WHERE id = ?";
        assert_eq!(truncate_statement(stmt), "SELECT * FROM clients WHERE id = ?");
    }
}
