//! # Mapper/Normalizer Layer
//!
//! Converts raw stored rows into strongly-typed domain records.
//!
//! ## Contract: Reads Never Throw
//! Stored data can be malformed in every way an old app version, a failed
//! sync or a hand-edited backup can produce. The mapper substitutes safe
//! fallbacks instead of erroring:
//!
//! - empty strings collapse to `None`
//! - negative money clamps to 0; paid clamps to <= total
//! - `visit_order` clamps to >= 1
//! - phones must pass the plausibility check or become `None`
//! - dates must be real calendar dates or become `None`
//! - unknown statuses are recomputed from the amounts
//!
//! Every substitution is observable: a `debug!` diagnostic carries the
//! table, row id, field and original value, so a subscriber filtering at
//! debug level sees exactly what was repaired (and nothing at all in
//! normal operation).

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::Row;
use tracing::debug;

use caderneta_core::validation::{normalize_phone, parse_date_lenient, sanitize_text};
use caderneta_core::{Bairro, Client, ClientStatus, LogEntry, Money, Payment, Rua};

// =============================================================================
// Row Reading Helpers
// =============================================================================

/// Reads an integer column, tolerating TEXT storage of numbers.
fn read_i64(row: &SqliteRow, column: &str) -> Option<i64> {
    if let Ok(v) = row.try_get::<i64, _>(column) {
        return Some(v);
    }
    if let Ok(Some(s)) = row.try_get::<Option<String>, _>(column) {
        return s.trim().parse().ok();
    }
    None
}

/// Reads a text column, tolerating INTEGER/REAL storage.
fn read_text(row: &SqliteRow, column: &str) -> Option<String> {
    if let Ok(v) = row.try_get::<Option<String>, _>(column) {
        return v;
    }
    if let Ok(v) = row.try_get::<i64, _>(column) {
        return Some(v.to_string());
    }
    if let Ok(v) = row.try_get::<f64, _>(column) {
        return Some(v.to_string());
    }
    None
}

/// Parses a stored timestamp, accepting the formats this database has
/// historically contained.
fn parse_datetime(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }

    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.with_timezone(&Utc));
    }
    for format in ["%Y-%m-%dT%H:%M:%S", "%Y-%m-%d %H:%M:%S", "%Y-%m-%d %H:%M:%S%.f"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(raw, format) {
            return Some(naive.and_utc());
        }
    }
    // Date-only values occasionally end up in timestamp columns
    if let Ok(date) = NaiveDate::parse_from_str(raw, "%Y-%m-%d") {
        return date.and_hms_opt(0, 0, 0).map(|n| n.and_utc());
    }
    None
}

/// Structured diagnostic for every clamp/rejection.
fn note_repaired(table: &'static str, row_id: i64, field: &'static str, original: &str) {
    debug!(table, row_id, field, original, "normalized malformed stored value");
}

// =============================================================================
// Client
// =============================================================================

/// Maps a clients row, normalizing defensively.
pub(crate) fn map_client(row: &SqliteRow) -> Client {
    let id = read_i64(row, "id").unwrap_or(0);

    let name = read_text(row, "name").unwrap_or_default().trim().to_string();

    let raw_value = read_i64(row, "value_total_cents").unwrap_or(0);
    let value_total = if raw_value < 0 {
        note_repaired("clients", id, "value_total_cents", &raw_value.to_string());
        Money::zero()
    } else {
        Money::from_cents(raw_value)
    };

    let raw_paid = read_i64(row, "paid_total_cents").unwrap_or(0);
    let paid_total = Money::from_cents(raw_paid).clamp_to(value_total);
    if paid_total.cents() != raw_paid {
        note_repaired("clients", id, "paid_total_cents", &raw_paid.to_string());
    }

    let phone = read_text(row, "phone").and_then(|raw| {
        let normalized = normalize_phone(&raw);
        if normalized.is_none() && !raw.trim().is_empty() {
            note_repaired("clients", id, "phone", &raw);
        }
        normalized
    });

    let reference_note = read_text(row, "reference_note").and_then(|s| sanitize_text(&s));
    let notes = read_text(row, "notes").and_then(|s| sanitize_text(&s));

    let street_id = read_i64(row, "street_id");

    let raw_order = read_i64(row, "visit_order").unwrap_or(1);
    let visit_order = if raw_order < 1 {
        note_repaired("clients", id, "visit_order", &raw_order.to_string());
        1
    } else {
        raw_order
    };

    let priority_flag = read_i64(row, "priority_flag").unwrap_or(0) != 0;

    let status = match read_text(row, "status") {
        Some(raw) => match ClientStatus::parse(&raw) {
            Some(status) => status,
            None => {
                note_repaired("clients", id, "status", &raw);
                ClientStatus::from_amounts(paid_total, value_total)
            }
        },
        None => ClientStatus::from_amounts(paid_total, value_total),
    };

    let next_charge_date = read_text(row, "next_charge_date").and_then(|raw| {
        let parsed = parse_date_lenient(&raw);
        if parsed.is_none() && !raw.trim().is_empty() {
            note_repaired("clients", id, "next_charge_date", &raw);
        }
        parsed
    });

    let last_visit_date = read_text(row, "last_visit_date").and_then(|raw| {
        let parsed = parse_datetime(&raw);
        if parsed.is_none() && !raw.trim().is_empty() {
            note_repaired("clients", id, "last_visit_date", &raw);
        }
        parsed
    });

    let created_at = required_timestamp(row, id, "created_at");
    let updated_at = required_timestamp(row, id, "updated_at");

    Client {
        id,
        name,
        value_total,
        paid_total,
        phone,
        reference_note,
        street_id,
        visit_order,
        priority_flag,
        notes,
        status,
        next_charge_date,
        last_visit_date,
        created_at,
        updated_at,
    }
}

/// Timestamps that must always be present; malformed values fall back to
/// "now" rather than failing the read.
fn required_timestamp(row: &SqliteRow, row_id: i64, column: &'static str) -> DateTime<Utc> {
    match read_text(row, column) {
        Some(raw) => parse_datetime(&raw).unwrap_or_else(|| {
            note_repaired("clients", row_id, column, &raw);
            Utc::now()
        }),
        None => {
            note_repaired("clients", row_id, column, "<missing>");
            Utc::now()
        }
    }
}

// =============================================================================
// Payment / Log / Route
// =============================================================================

/// Maps a payments row.
pub(crate) fn map_payment(row: &SqliteRow) -> Payment {
    let id = read_i64(row, "id").unwrap_or(0);

    let raw_amount = read_i64(row, "amount_cents").unwrap_or(0);
    let amount = if raw_amount < 0 {
        note_repaired("payments", id, "amount_cents", &raw_amount.to_string());
        Money::zero()
    } else {
        Money::from_cents(raw_amount)
    };

    Payment {
        id,
        client_id: read_i64(row, "client_id").unwrap_or(0),
        amount,
        created_at: read_text(row, "created_at")
            .and_then(|raw| parse_datetime(&raw))
            .unwrap_or_else(Utc::now),
    }
}

/// Maps a logs row.
pub(crate) fn map_log(row: &SqliteRow) -> LogEntry {
    LogEntry {
        id: read_i64(row, "id").unwrap_or(0),
        client_id: read_i64(row, "client_id").unwrap_or(0),
        description: read_text(row, "description").unwrap_or_default(),
        created_at: read_text(row, "created_at")
            .and_then(|raw| parse_datetime(&raw))
            .unwrap_or_else(Utc::now),
    }
}

/// Maps a bairros row.
pub(crate) fn map_bairro(row: &SqliteRow) -> Bairro {
    Bairro {
        id: read_i64(row, "id").unwrap_or(0),
        name: read_text(row, "name").unwrap_or_default().trim().to_string(),
    }
}

/// Maps a ruas row.
pub(crate) fn map_rua(row: &SqliteRow) -> Rua {
    Rua {
        id: read_i64(row, "id").unwrap_or(0),
        bairro_id: read_i64(row, "bairro_id").unwrap_or(0),
        name: read_text(row, "name").unwrap_or_default().trim().to_string(),
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
