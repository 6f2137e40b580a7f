//! # Query Layer
//!
//! Non-transactional statement execution with row-limit safety and error
//! classification.
//!
//! ## Contract
//! - Every call lazily ensures the connection is open (the engine hands
//!   this layer a freshly acquired pool)
//! - `get_all` never returns an unbounded result set: statements without
//!   a LIMIT clause get the configured cap appended, and truncation is
//!   logged
//! - Failures surface as [`DbError::Query`] with code, truncated
//!   statement and bound parameters attached; callers must not treat
//!   them as "no result"

use sqlx::sqlite::{SqliteArguments, SqliteRow};
use sqlx::SqlitePool;
use tracing::warn;

use crate::error::{DbError, DbResult};

// =============================================================================
// Parameters
// =============================================================================

/// A dynamically typed bind parameter.
///
/// The repositories build statements at runtime; this enum is the narrow
/// waist between domain values and SQLite's type system, and what gets
/// attached to classified errors for debugging.
#[derive(Debug, Clone, PartialEq)]
pub enum SqlParam {
    Null,
    Int(i64),
    Real(f64),
    Text(String),
}

impl From<i64> for SqlParam {
    fn from(v: i64) -> Self {
        SqlParam::Int(v)
    }
}

impl From<bool> for SqlParam {
    fn from(v: bool) -> Self {
        SqlParam::Int(v as i64)
    }
}

impl From<&str> for SqlParam {
    fn from(v: &str) -> Self {
        SqlParam::Text(v.to_string())
    }
}

impl From<String> for SqlParam {
    fn from(v: String) -> Self {
        SqlParam::Text(v)
    }
}

impl<T: Into<SqlParam>> From<Option<T>> for SqlParam {
    fn from(v: Option<T>) -> Self {
        match v {
            Some(inner) => inner.into(),
            None => SqlParam::Null,
        }
    }
}

/// Renders parameters for error context.
pub(crate) fn render_params(params: &[SqlParam]) -> Vec<String> {
    params
        .iter()
        .map(|p| match p {
            SqlParam::Null => "NULL".to_string(),
            SqlParam::Int(i) => i.to_string(),
            SqlParam::Real(f) => f.to_string(),
            SqlParam::Text(s) => format!("'{s}'"),
        })
        .collect()
}

fn bind_params<'q>(
    mut query: sqlx::query::Query<'q, sqlx::Sqlite, SqliteArguments<'q>>,
    params: &[SqlParam],
) -> sqlx::query::Query<'q, sqlx::Sqlite, SqliteArguments<'q>> {
    for param in params {
        query = match param {
            SqlParam::Null => query.bind(None::<String>),
            SqlParam::Int(i) => query.bind(*i),
            SqlParam::Real(f) => query.bind(*f),
            SqlParam::Text(s) => query.bind(s.clone()),
        };
    }
    query
}

// =============================================================================
// Executor-Generic Primitives
// =============================================================================
// Shared by this layer (pool) and the transaction executor (transaction
// connection). Every primitive classifies its error against the statement
// that produced it.

/// Runs a statement, returning the number of affected rows.
pub(crate) async fn run_on<'e, E>(executor: E, sql: &str, params: &[SqlParam]) -> DbResult<u64>
where
    E: sqlx::Executor<'e, Database = sqlx::Sqlite>,
{
    bind_params(sqlx::query(sql), params)
        .execute(executor)
        .await
        .map(|done| done.rows_affected())
        .map_err(|e| DbError::from_sqlx(e, sql, &render_params(params)))
}

/// Runs an INSERT, returning the last-inserted rowid.
pub(crate) async fn run_and_get_id_on<'e, E>(
    executor: E,
    sql: &str,
    params: &[SqlParam],
) -> DbResult<i64>
where
    E: sqlx::Executor<'e, Database = sqlx::Sqlite>,
{
    bind_params(sqlx::query(sql), params)
        .execute(executor)
        .await
        .map(|done| done.last_insert_rowid())
        .map_err(|e| DbError::from_sqlx(e, sql, &render_params(params)))
}

/// Fetches all rows of a statement.
pub(crate) async fn fetch_all_on<'e, E>(
    executor: E,
    sql: &str,
    params: &[SqlParam],
) -> DbResult<Vec<SqliteRow>>
where
    E: sqlx::Executor<'e, Database = sqlx::Sqlite>,
{
    bind_params(sqlx::query(sql), params)
        .fetch_all(executor)
        .await
        .map_err(|e| DbError::from_sqlx(e, sql, &render_params(params)))
}

/// Fetches the first row, or None.
pub(crate) async fn fetch_one_on<'e, E>(
    executor: E,
    sql: &str,
    params: &[SqlParam],
) -> DbResult<Option<SqliteRow>>
where
    E: sqlx::Executor<'e, Database = sqlx::Sqlite>,
{
    bind_params(sqlx::query(sql), params)
        .fetch_optional(executor)
        .await
        .map_err(|e| DbError::from_sqlx(e, sql, &render_params(params)))
}

/// Runs a multi-statement script (DDL batches).
pub(crate) async fn exec_batch_on<'e, E>(executor: E, sql: &'e str) -> DbResult<()>
where
    E: sqlx::Executor<'e, Database = sqlx::Sqlite>,
{
    sqlx::raw_sql(sql)
        .execute(executor)
        .await
        .map(|_| ())
        .map_err(|e| DbError::from_sqlx(e, sql, &[]))
}

// =============================================================================
// Query Layer
// =============================================================================

/// The non-transactional execution surface handed to repositories.
///
/// Cheap to construct: it wraps an already-acquired pool plus the row cap
/// from config.
#[derive(Debug, Clone)]
pub struct QueryLayer {
    pool: SqlitePool,
    max_rows: i64,
}

impl QueryLayer {
    pub(crate) fn new(pool: SqlitePool, max_rows: i64) -> Self {
        QueryLayer { pool, max_rows }
    }

    pub(crate) fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Runs a multi-statement script. No parameters, no result.
    pub async fn exec(&self, sql: &str) -> DbResult<()> {
        exec_batch_on(&self.pool, sql).await
    }

    /// Runs one statement, returning affected rows.
    pub async fn run(&self, sql: &str, params: &[SqlParam]) -> DbResult<u64> {
        run_on(&self.pool, sql, params).await
    }

    /// Runs one INSERT, returning the new rowid.
    pub async fn run_and_get_id(&self, sql: &str, params: &[SqlParam]) -> DbResult<i64> {
        run_and_get_id_on(&self.pool, sql, params).await
    }

    /// Fetches the first row, or None. NotFound is not an error here.
    pub async fn get_one(&self, sql: &str, params: &[SqlParam]) -> DbResult<Option<SqliteRow>> {
        fetch_one_on(&self.pool, sql, params).await
    }

    /// Fetches all rows, capped.
    ///
    /// When the statement has no LIMIT clause the configured cap is
    /// appended, and hitting it exactly is logged as likely truncation.
    pub async fn get_all(&self, sql: &str, params: &[SqlParam]) -> DbResult<Vec<SqliteRow>> {
        let (effective_sql, capped) = if has_limit_clause(sql) {
            (sql.to_string(), false)
        } else {
            (format!("{} LIMIT {}", sql, self.max_rows), true)
        };

        let rows = fetch_all_on(&self.pool, &effective_sql, params).await?;

        if capped && rows.len() as i64 >= self.max_rows {
            let head: String = sql.chars().take(80).collect();
            warn!(
                max_rows = self.max_rows,
                statement = %head,
                "get_all hit the row cap; results are likely truncated"
            );
        }

        Ok(rows)
    }
}

/// Detects whether a statement already bounds its result set.
fn has_limit_clause(sql: &str) -> bool {
    sql.to_ascii_uppercase().contains(" LIMIT ")
}

// =============================================================================
// Unit Tests
// =============================================================================
