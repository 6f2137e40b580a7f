//! # Domain Types
//!
//! Core domain types used throughout the caderneta engine.
//!
//! ## Type Hierarchy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────┐
//! │                       Route Hierarchy                               │
//! │                                                                     │
//! │   Bairro (neighborhood)                                             │
//! │      └── Rua (street)            delete bairro → ruas cascade       │
//! │             └── Client           delete rua → client.street_id NULL │
//! │                   ├── Payment    delete client → payments cascade   │
//! │                   └── LogEntry   delete client → logs cascade       │
//! │                                                                     │
//! │   Collectors walk a street in visit_order; priority clients and     │
//! │   clients due today float to the top of the day's route.            │
//! └─────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Identity
//! Every entity uses the SQLite rowid (`INTEGER PRIMARY KEY`) as its id.
//! Ids are generated by the database on insert and returned to the caller.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::money::Money;

// =============================================================================
// Client Status
// =============================================================================

/// Payment-completion status of a client.
///
/// Invariant: `Settled` if and only if `paid_total >= value_total`.
/// The repositories recompute this on every write that touches money;
/// it is stored denormalized so route queries can filter on it cheaply.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ClientStatus {
    Pending,
    Settled,
}

impl ClientStatus {
    /// The canonical stored form (`'pending'` / `'settled'`).
    pub const fn as_str(&self) -> &'static str {
        match self {
            ClientStatus::Pending => "pending",
            ClientStatus::Settled => "settled",
        }
    }

    /// Case-insensitive parse against the closed set.
    ///
    /// Returns `None` for anything outside it; the mapper treats that as
    /// malformed data and falls back to recomputing from the amounts.
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "pending" => Some(ClientStatus::Pending),
            "settled" => Some(ClientStatus::Settled),
            _ => None,
        }
    }

    /// Derives the status from the ledger amounts.
    ///
    /// This is THE source of truth; the stored column is a cache of it.
    pub fn from_amounts(paid: Money, total: Money) -> Self {
        if paid.cents() >= total.cents() {
            ClientStatus::Settled
        } else {
            ClientStatus::Pending
        }
    }

    pub const fn is_settled(&self) -> bool {
        matches!(self, ClientStatus::Settled)
    }
}

impl std::fmt::Display for ClientStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// =============================================================================
// Client
// =============================================================================

/// A crediario client: someone paying off a purchase in installments,
/// visited door to door.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Client {
    /// Database id (SQLite rowid).
    pub id: i64,

    /// Client name as the collector knows them.
    pub name: String,

    /// Total owed, in centavos. Never negative.
    pub value_total: Money,

    /// Total paid so far, in centavos. `0 <= paid <= value_total`.
    pub paid_total: Money,

    /// Contact phone (normalized digits), if any.
    pub phone: Option<String>,

    /// Free-text reference ("casa azul perto da padaria").
    pub reference_note: Option<String>,

    /// Street this client lives on, if assigned to a route.
    pub street_id: Option<i64>,

    /// Position within the street's visit sequence (>= 1).
    pub visit_order: i64,

    /// Collector flagged this client for attention today.
    pub priority_flag: bool,

    /// Free-text notes.
    pub notes: Option<String>,

    /// Denormalized payment status.
    pub status: ClientStatus,

    /// Next scheduled charge visit. NULL when settled.
    pub next_charge_date: Option<NaiveDate>,

    /// Last time a collector actually visited.
    pub last_visit_date: Option<DateTime<Utc>>,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Client {
    /// Remaining debt, floored at zero.
    pub fn remaining(&self) -> Money {
        self.value_total.saturating_sub_floor_zero(self.paid_total)
    }
}

/// Fields required to create a client. Everything not listed defaults
/// (paid 0, status pending, visit order 1).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NewClient {
    pub name: String,
    pub value_total: Money,
    pub phone: Option<String>,
    pub reference_note: Option<String>,
    pub street_id: Option<i64>,
    pub visit_order: Option<i64>,
    pub priority_flag: bool,
    pub notes: Option<String>,
    pub next_charge_date: Option<NaiveDate>,
}

/// A partial update to one nullable client field.
///
/// `Keep` leaves the stored value untouched, `Set` replaces it and
/// `Clear` nulls it. This distinction is what lets `update_client`
/// normalize ONLY the fields the caller actually supplied.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub enum Patch<T> {
    #[default]
    Keep,
    Set(T),
    Clear,
}

impl<T> Patch<T> {
    pub fn is_keep(&self) -> bool {
        matches!(self, Patch::Keep)
    }

    /// Resolves the patch against the current value.
    pub fn apply(self, current: Option<T>) -> Option<T> {
        match self {
            Patch::Keep => current,
            Patch::Set(v) => Some(v),
            Patch::Clear => None,
        }
    }
}

/// Partial-field client update. `None`/`Keep` fields are untouched.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ClientUpdate {
    pub name: Option<String>,
    pub value_total: Option<Money>,
    pub paid_total: Option<Money>,
    pub phone: Patch<String>,
    pub reference_note: Patch<String>,
    pub street_id: Patch<i64>,
    pub visit_order: Option<i64>,
    pub priority_flag: Option<bool>,
    pub notes: Patch<String>,
    pub next_charge_date: Patch<NaiveDate>,
    pub last_visit_date: Patch<DateTime<Utc>>,
}

impl ClientUpdate {
    /// True when no field was supplied at all.
    pub fn is_empty(&self) -> bool {
        self.name.is_none()
            && self.value_total.is_none()
            && self.paid_total.is_none()
            && self.phone.is_keep()
            && self.reference_note.is_keep()
            && self.street_id.is_keep()
            && self.visit_order.is_none()
            && self.priority_flag.is_none()
            && self.notes.is_keep()
            && self.next_charge_date.is_keep()
            && self.last_visit_date.is_keep()
    }
}

// =============================================================================
// Payment
// =============================================================================

/// One ledger entry: an installment received from a client.
///
/// Append-only. Deleting one reverses its effect on the client's
/// `paid_total` and recomputes the status; the row itself carries no
/// mutable fields.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Payment {
    pub id: i64,
    pub client_id: i64,
    pub amount: Money,
    pub created_at: DateTime<Utc>,
}

// =============================================================================
// Log Entry
// =============================================================================

/// An audit log line attached to a client ("payment of R$ 40,00",
/// "marked absent", field diffs from edits).
///
/// Retention: only the [`crate::MAX_LOGS_PER_CLIENT`] most recent rows
/// per client survive; older rows are pruned on insert.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogEntry {
    pub id: i64,
    pub client_id: i64,
    pub description: String,
    pub created_at: DateTime<Utc>,
}

// =============================================================================
// Route Hierarchy
// =============================================================================

/// A neighborhood grouping streets for route planning.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Bairro {
    pub id: i64,
    pub name: String,
}

/// A street within a bairro.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Rua {
    pub id: i64,
    pub bairro_id: i64,
    pub name: String,
}

// =============================================================================
// Aggregates & Export
// =============================================================================

/// Financial totals shown on the dashboard.
///
/// Served through the TTL cache; see the cache layer for freshness rules.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Totals {
    /// Outstanding debt across all pending clients.
    pub receivable: Money,
    /// Everything ever collected (sum of paid_total).
    pub paid: Money,
    /// Collected today (payments ledger).
    pub collected_today: Money,
    /// Collected this calendar month (payments ledger).
    pub collected_month: Money,
}

/// Bulk-read snapshot of every domain table, for the backup/export
/// consumer. Plain data, directly serializable to JSON.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppExport {
    pub clients: Vec<Client>,
    pub payments: Vec<Payment>,
    pub logs: Vec<LogEntry>,
    pub bairros: Vec<Bairro>,
    pub ruas: Vec<Rua>,
}

// =============================================================================
// Unit Tests
// =============================================================================
