//! # Repositories
//!
//! Domain-specific CRUD plus the invariant-preserving write paths.
//!
//! ## Module Organization
//! - [`client`] - client records and route/filter reads
//! - [`payment`] - the payments ledger (apply, reverse, reschedule)
//! - [`log`] - append-only audit log with retention
//! - [`route`] - bairro/rua hierarchy
//!
//! Every repository borrows the engine handle per call; none caches a
//! connection. Writes that change money invalidate the totals cache, and
//! audit logging is always best-effort: a log failure never aborts the
//! caller's primary operation.

pub mod client;
pub mod log;
pub mod payment;
pub mod route;

use chrono::{DateTime, NaiveDate, SecondsFormat, Utc};

/// Canonical stored timestamp format (UTC, millisecond precision, `Z`).
/// One format everywhere keeps lexicographic comparisons valid in SQL.
pub(crate) fn to_iso(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Current timestamp in the stored format.
pub(crate) fn now_iso() -> String {
    to_iso(Utc::now())
}

/// Canonical stored date format.
pub(crate) fn date_iso(date: NaiveDate) -> String {
    date.format("%Y-%m-%d").to_string()
}
