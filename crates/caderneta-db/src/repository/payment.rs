//! # Payment Repository
//!
//! The payments ledger: apply, reverse, reschedule.
//!
//! ## Payment Application
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────┐
//! │  add_payment(client, amount, next_charge?)      ONE TRANSACTION     │
//! │                                                                     │
//! │  1. read client paid/total                                          │
//! │  2. new_paid = clamp(paid + amount, 0..=total)                      │
//! │  3. settled? ── no ──► next_charge REQUIRED, else ValidationError   │
//! │  │                     (raised before any write)                    │
//! │  4. INSERT payment row                                              │
//! │  5. UPDATE client (paid, status, next_charge, updated_at)           │
//! │          settled clients get next_charge = NULL                     │
//! │                                                                     │
//! │  after COMMIT: audit log (best-effort) + totals cache invalidation  │
//! └─────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Deleting a payment reverses step 2 (floored at zero) and recomputes
//! the status inside the same kind of transaction.

use chrono::{Duration as ChronoDuration, NaiveDate, Utc};

use caderneta_core::validation::validate_payment_amount;
use caderneta_core::{ClientStatus, Money, Payment, ValidationError};

use crate::engine::Database;
use crate::error::{DbError, DbResult};
use crate::repository::{date_iso, now_iso, to_iso};
use crate::txn;

/// Repository for the payments ledger.
#[derive(Debug, Clone)]
pub struct PaymentRepository {
    db: Database,
}

impl PaymentRepository {
    pub(crate) fn new(db: Database) -> Self {
        PaymentRepository { db }
    }

    /// Applies a payment to a client.
    ///
    /// ## Rules
    /// - `amount` must be strictly positive
    /// - when the client remains partially paid, `next_charge_date` is
    ///   REQUIRED: the collector must always know when to come back
    /// - paid never exceeds total (overpayment clamps; the ledger row
    ///   still records the received amount)
    ///
    /// ## Returns
    /// The inserted ledger row.
    pub async fn add_payment(
        &self,
        client_id: i64,
        amount: Money,
        next_charge_date: Option<NaiveDate>,
    ) -> DbResult<Payment> {
        validate_payment_amount(amount.cents())?;

        let pool = self.db.ready_pool().await?;
        let timeout = self.db.transaction_timeout();
        let created_at = Utc::now();
        let created_at_in_txn = to_iso(created_at);

        let (payment_id, before_paid, after_paid, total) =
            txn::run_transaction(&pool, timeout, move |conn| {
                Box::pin(async move {
                    let row = txn::fetch_one(
                        conn,
                        "SELECT paid_total_cents, value_total_cents FROM clients WHERE id = ?",
                        &[client_id.into()],
                    )
                    .await?
                    .ok_or_else(|| DbError::not_found("client", client_id))?;

                    let before_paid: i64 =
                        sqlx::Row::try_get(&row, "paid_total_cents").unwrap_or(0);
                    let total: i64 = sqlx::Row::try_get(&row, "value_total_cents").unwrap_or(0);

                    let after_paid = (Money::from_cents(before_paid) + amount)
                        .clamp_to(Money::from_cents(total));
                    let status =
                        ClientStatus::from_amounts(after_paid, Money::from_cents(total));

                    // Hard rule, checked before any write: a partial
                    // payment without a return date strands the client.
                    if !status.is_settled() && next_charge_date.is_none() {
                        return Err(DbError::Validation(ValidationError::Required {
                            field: "next_charge_date".to_string(),
                        }));
                    }

                    let payment_id = txn::insert_returning_id(
                        conn,
                        "INSERT INTO payments (client_id, amount_cents, created_at)
                         VALUES (?, ?, ?)",
                        &[
                            client_id.into(),
                            amount.cents().into(),
                            created_at_in_txn.clone().into(),
                        ],
                    )
                    .await?;

                    let stored_next_charge = if status.is_settled() {
                        None
                    } else {
                        next_charge_date.map(date_iso)
                    };
                    txn::exec(
                        conn,
                        "UPDATE clients SET
                            paid_total_cents = ?, status = ?, next_charge_date = ?,
                            updated_at = ?
                         WHERE id = ?",
                        &[
                            after_paid.cents().into(),
                            status.as_str().into(),
                            stored_next_charge.into(),
                            created_at_in_txn.into(),
                            client_id.into(),
                        ],
                    )
                    .await?;

                    Ok((payment_id, before_paid, after_paid.cents(), total))
                })
            })
            .await?;

        self.db.invalidate_totals().await;
        self.db
            .logs()
            .add_best_effort(
                client_id,
                format!(
                    "Pagamento de {} (pago: {} -> {} de {})",
                    amount,
                    Money::from_cents(before_paid),
                    Money::from_cents(after_paid),
                    Money::from_cents(total)
                ),
            )
            .await;

        Ok(Payment {
            id: payment_id,
            client_id,
            amount,
            created_at,
        })
    }

    /// Reverses a ledger entry.
    ///
    /// The client's paid total goes down by the payment amount (never
    /// below zero) and the status is recomputed, all in one transaction.
    ///
    /// Returns false when the payment did not exist (a miss, not an
    /// error).
    pub async fn delete_payment(&self, payment_id: i64) -> DbResult<bool> {
        let pool = self.db.ready_pool().await?;
        let timeout = self.db.transaction_timeout();
        let now = now_iso();

        let reversed = txn::run_transaction(&pool, timeout, move |conn| {
            Box::pin(async move {
                let Some(payment_row) = txn::fetch_one(
                    conn,
                    "SELECT client_id, amount_cents FROM payments WHERE id = ?",
                    &[payment_id.into()],
                )
                .await?
                else {
                    return Ok(None);
                };

                let client_id: i64 = sqlx::Row::try_get(&payment_row, "client_id").unwrap_or(0);
                let amount: i64 = sqlx::Row::try_get(&payment_row, "amount_cents").unwrap_or(0);

                let client_row = txn::fetch_one(
                    conn,
                    "SELECT paid_total_cents, value_total_cents FROM clients WHERE id = ?",
                    &[client_id.into()],
                )
                .await?
                .ok_or_else(|| DbError::not_found("client", client_id))?;

                let paid: i64 = sqlx::Row::try_get(&client_row, "paid_total_cents").unwrap_or(0);
                let total: i64 =
                    sqlx::Row::try_get(&client_row, "value_total_cents").unwrap_or(0);

                let after_paid = Money::from_cents(paid)
                    .saturating_sub_floor_zero(Money::from_cents(amount));
                let status = ClientStatus::from_amounts(after_paid, Money::from_cents(total));

                txn::exec(
                    conn,
                    "DELETE FROM payments WHERE id = ?",
                    &[payment_id.into()],
                )
                .await?;
                txn::exec(
                    conn,
                    "UPDATE clients SET paid_total_cents = ?, status = ?, updated_at = ?
                     WHERE id = ?",
                    &[
                        after_paid.cents().into(),
                        status.as_str().into(),
                        now.into(),
                        client_id.into(),
                    ],
                )
                .await?;

                Ok(Some((client_id, amount, after_paid.cents())))
            })
        })
        .await?;

        let Some((client_id, amount, after_paid)) = reversed else {
            return Ok(false);
        };

        self.db.invalidate_totals().await;
        self.db
            .logs()
            .add_best_effort(
                client_id,
                format!(
                    "Pagamento de {} estornado (pago agora: {})",
                    Money::from_cents(amount),
                    Money::from_cents(after_paid)
                ),
            )
            .await;

        Ok(true)
    }

    /// Marks the client absent on today's visit: next charge moves to
    /// tomorrow and the visit itself is recorded.
    pub async fn mark_absent(&self, client_id: i64) -> DbResult<()> {
        let tomorrow = Utc::now().date_naive() + ChronoDuration::days(1);
        let now = now_iso();

        let query = self.db.query().await?;
        let affected = query
            .run(
                "UPDATE clients SET next_charge_date = ?, last_visit_date = ?, updated_at = ?
                 WHERE id = ? AND status = 'pending'",
                &[
                    date_iso(tomorrow).into(),
                    now.clone().into(),
                    now.into(),
                    client_id.into(),
                ],
            )
            .await?;
        if affected == 0 {
            return Err(DbError::not_found("client", client_id));
        }

        self.db
            .logs()
            .add_best_effort(
                client_id,
                format!("Cliente ausente; cobranca reagendada para {}", date_iso(tomorrow)),
            )
            .await;
        Ok(())
    }

    /// Ledger entries for one client, newest first.
    pub async fn get_by_client(&self, client_id: i64) -> DbResult<Vec<Payment>> {
        let query = self.db.query().await?;
        let rows = query
            .get_all(
                "SELECT id, client_id, amount_cents, created_at FROM payments
                 WHERE client_id = ? ORDER BY id DESC",
                &[client_id.into()],
            )
            .await?;
        Ok(rows.iter().map(crate::mapper::map_payment).collect())
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
