//! # Client Repository
//!
//! CRUD and filtered reads for clients, with invariant-preserving writes.
//!
//! ## Write Rules
//! - `0 <= paid_total <= value_total`, always (clamped on the way in)
//! - `status` is recomputed from the amounts on every money change
//! - a settled client never keeps a `next_charge_date`
//! - every successful write leaves an audit log line (best-effort) and
//!   money changes invalidate the totals cache

use chrono::{DateTime, NaiveDate, Utc};

use caderneta_core::validation::{
    sanitize_text, validate_client_name, validate_phone, validate_value_total,
    validate_visit_order,
};
use caderneta_core::{Client, ClientStatus, ClientUpdate, Money, NewClient, Patch};

use crate::engine::Database;
use crate::error::{DbError, DbResult};
use crate::mapper::map_client;
use crate::repository::{date_iso, now_iso, to_iso};
use crate::search::CLIENT_COLUMNS;
use crate::txn;

/// Repository for client records.
#[derive(Debug, Clone)]
pub struct ClientRepository {
    db: Database,
}

impl ClientRepository {
    pub(crate) fn new(db: Database) -> Self {
        ClientRepository { db }
    }

    // =========================================================================
    // Writes
    // =========================================================================

    /// Creates a client.
    ///
    /// Validation happens before anything touches disk. A zero-value
    /// client is born settled; everyone else starts pending with paid 0.
    pub async fn add_client(&self, new: NewClient) -> DbResult<Client> {
        let name = validate_client_name(&new.name)?;
        validate_value_total(new.value_total.cents())?;
        if let Some(order) = new.visit_order {
            validate_visit_order(order)?;
        }
        let phone = match &new.phone {
            Some(raw) => validate_phone(raw)?,
            None => None,
        };
        let reference_note = new.reference_note.as_deref().and_then(sanitize_text);
        let notes = new.notes.as_deref().and_then(sanitize_text);

        let status = ClientStatus::from_amounts(Money::zero(), new.value_total);
        let next_charge_date = if status.is_settled() {
            None
        } else {
            new.next_charge_date
        };
        let now = now_iso();

        let query = self.db.query().await?;
        let id = query
            .run_and_get_id(
                "INSERT INTO clients
                    (name, value_total_cents, paid_total_cents, phone, reference_note,
                     street_id, visit_order, priority_flag, notes, status,
                     next_charge_date, created_at, updated_at)
                 VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
                &[
                    name.into(),
                    new.value_total.cents().into(),
                    0i64.into(),
                    phone.into(),
                    reference_note.into(),
                    new.street_id.into(),
                    new.visit_order.unwrap_or(1).into(),
                    new.priority_flag.into(),
                    notes.into(),
                    status.as_str().into(),
                    next_charge_date.map(date_iso).into(),
                    now.clone().into(),
                    now.into(),
                ],
            )
            .await?;

        self.db.invalidate_totals().await;
        self.db
            .logs()
            .add_best_effort(id, "Cliente cadastrado".to_string())
            .await;

        self.get_by_id(id)
            .await?
            .ok_or_else(|| DbError::not_found("client", id))
    }

    /// Partial-field update.
    ///
    /// Only supplied fields are normalized and applied; status and
    /// next-charge follow the money. The audit log line describes the
    /// actual diff.
    pub async fn update_client(&self, id: i64, update: ClientUpdate) -> DbResult<Client> {
        // Validate everything the caller supplied before any write
        let name = match &update.name {
            Some(raw) => Some(validate_client_name(raw)?),
            None => None,
        };
        if let Some(value) = update.value_total {
            validate_value_total(value.cents())?;
        }
        if let Some(paid) = update.paid_total {
            validate_value_total(paid.cents())?;
        }
        if let Some(order) = update.visit_order {
            validate_visit_order(order)?;
        }
        let phone = match update.phone {
            Patch::Keep => Patch::Keep,
            Patch::Clear => Patch::Clear,
            Patch::Set(raw) => match validate_phone(&raw)? {
                Some(normalized) => Patch::Set(normalized),
                None => Patch::Clear,
            },
        };
        let reference_note = sanitize_patch(update.reference_note);
        let notes = sanitize_patch(update.notes);

        if update.name.is_none()
            && update.value_total.is_none()
            && update.paid_total.is_none()
            && phone.is_keep()
            && reference_note.is_keep()
            && update.street_id.is_keep()
            && update.visit_order.is_none()
            && update.priority_flag.is_none()
            && notes.is_keep()
            && update.next_charge_date.is_keep()
            && update.last_visit_date.is_keep()
        {
            // Nothing to do; hand back the current record
            return self
                .get_by_id(id)
                .await?
                .ok_or_else(|| DbError::not_found("client", id));
        }

        let pool = self.db.ready_pool().await?;
        let timeout = self.db.transaction_timeout();

        let street_id = update.street_id;
        let visit_order = update.visit_order;
        let priority_flag = update.priority_flag;
        let next_charge_patch = update.next_charge_date;
        let last_visit_patch = update.last_visit_date;
        let value_total = update.value_total;
        let paid_total = update.paid_total;

        let (before, after) = txn::run_transaction(&pool, timeout, move |conn| {
            Box::pin(async move {
                let sql = format!("SELECT {CLIENT_COLUMNS} FROM clients c WHERE c.id = ?");
                let row = txn::fetch_one(conn, &sql, &[id.into()])
                    .await?
                    .ok_or_else(|| DbError::not_found("client", id))?;
                let before = map_client(&row);

                let new_value = value_total.unwrap_or(before.value_total);
                let new_paid = paid_total.unwrap_or(before.paid_total).clamp_to(new_value);
                let status = ClientStatus::from_amounts(new_paid, new_value);

                let next_charge_date = if status.is_settled() {
                    None
                } else {
                    next_charge_patch.apply(before.next_charge_date)
                };

                let after = Client {
                    id,
                    name: name.unwrap_or_else(|| before.name.clone()),
                    value_total: new_value,
                    paid_total: new_paid,
                    phone: phone.apply(before.phone.clone()),
                    reference_note: reference_note.apply(before.reference_note.clone()),
                    street_id: street_id.apply(before.street_id),
                    visit_order: visit_order.unwrap_or(before.visit_order),
                    priority_flag: priority_flag.unwrap_or(before.priority_flag),
                    notes: notes.apply(before.notes.clone()),
                    status,
                    next_charge_date,
                    last_visit_date: last_visit_patch.apply(before.last_visit_date),
                    created_at: before.created_at,
                    updated_at: Utc::now(),
                };

                let affected = txn::run(
                    conn,
                    "UPDATE clients SET
                        name = ?, value_total_cents = ?, paid_total_cents = ?,
                        phone = ?, reference_note = ?, street_id = ?,
                        visit_order = ?, priority_flag = ?, notes = ?,
                        status = ?, next_charge_date = ?, last_visit_date = ?,
                        updated_at = ?
                     WHERE id = ?",
                    &[
                        after.name.clone().into(),
                        after.value_total.cents().into(),
                        after.paid_total.cents().into(),
                        after.phone.clone().into(),
                        after.reference_note.clone().into(),
                        after.street_id.into(),
                        after.visit_order.into(),
                        after.priority_flag.into(),
                        after.notes.clone().into(),
                        after.status.as_str().into(),
                        after.next_charge_date.map(date_iso).into(),
                        after.last_visit_date.map(to_iso).into(),
                        to_iso(after.updated_at).into(),
                        id.into(),
                    ],
                )
                .await?;
                if affected == 0 {
                    return Err(DbError::not_found("client", id));
                }

                Ok((before, after))
            })
        })
        .await?;

        let money_changed = before.value_total != after.value_total
            || before.paid_total != after.paid_total;
        if money_changed {
            self.db.invalidate_totals().await;
        }

        if let Some(diff) = describe_diff(&before, &after) {
            self.db.logs().add_best_effort(id, diff).await;
        }

        self.get_by_id(id)
            .await?
            .ok_or_else(|| DbError::not_found("client", id))
    }

    /// Deletes a client; payments and logs cascade.
    ///
    /// Returns false when the client did not exist (a miss, not an error).
    pub async fn delete_client(&self, id: i64) -> DbResult<bool> {
        let query = self.db.query().await?;
        let affected = query
            .run("DELETE FROM clients WHERE id = ?", &[id.into()])
            .await?;

        if affected > 0 {
            self.db.invalidate_totals().await;
        }
        Ok(affected > 0)
    }

    // =========================================================================
    // Reads
    // =========================================================================

    /// Gets a client by id, or None.
    pub async fn get_by_id(&self, id: i64) -> DbResult<Option<Client>> {
        let query = self.db.query().await?;
        let sql = format!("SELECT {CLIENT_COLUMNS} FROM clients c WHERE c.id = ?");
        Ok(query
            .get_one(&sql, &[id.into()])
            .await?
            .map(|row| map_client(&row)))
    }

    /// All clients, name order (row-capped by the query layer).
    pub async fn get_all(&self) -> DbResult<Vec<Client>> {
        let query = self.db.query().await?;
        let sql = format!("SELECT {CLIENT_COLUMNS} FROM clients c ORDER BY c.name");
        let rows = query.get_all(&sql, &[]).await?;
        Ok(rows.iter().map(map_client).collect())
    }

    /// Paginated variant of [`get_all`](Self::get_all).
    pub async fn get_page(&self, limit: i64, offset: i64) -> DbResult<Vec<Client>> {
        let query = self.db.query().await?;
        let sql = format!(
            "SELECT {CLIENT_COLUMNS} FROM clients c ORDER BY c.name LIMIT ? OFFSET ?"
        );
        let rows = query.get_all(&sql, &[limit.into(), offset.into()]).await?;
        Ok(rows.iter().map(map_client).collect())
    }

    /// Clients on one street, in visit order.
    pub async fn get_by_street(&self, street_id: i64) -> DbResult<Vec<Client>> {
        let query = self.db.query().await?;
        let sql = format!(
            "SELECT {CLIENT_COLUMNS} FROM clients c
             WHERE c.street_id = ?
             ORDER BY c.visit_order, c.name"
        );
        let rows = query.get_all(&sql, &[street_id.into()]).await?;
        Ok(rows.iter().map(map_client).collect())
    }

    /// Clients whose next charge falls inside `[from, to]`.
    pub async fn get_by_date_range(
        &self,
        from: NaiveDate,
        to: NaiveDate,
    ) -> DbResult<Vec<Client>> {
        let query = self.db.query().await?;
        let sql = format!(
            "SELECT {CLIENT_COLUMNS} FROM clients c
             WHERE c.next_charge_date IS NOT NULL
               AND c.next_charge_date >= ? AND c.next_charge_date <= ?
             ORDER BY c.next_charge_date, c.visit_order"
        );
        let rows = query
            .get_all(&sql, &[date_iso(from).into(), date_iso(to).into()])
            .await?;
        Ok(rows.iter().map(map_client).collect())
    }

    /// Clients touched after `since` (sync-queue consumer).
    pub async fn get_updated_since(&self, since: DateTime<Utc>) -> DbResult<Vec<Client>> {
        let query = self.db.query().await?;
        let sql = format!(
            "SELECT {CLIENT_COLUMNS} FROM clients c
             WHERE c.updated_at > ?
             ORDER BY c.updated_at"
        );
        let rows = query.get_all(&sql, &[to_iso(since).into()]).await?;
        Ok(rows.iter().map(map_client).collect())
    }

    /// The day's route: pending clients flagged priority or due (today
    /// or overdue), priority first, then visit order.
    pub async fn get_priority_today(&self) -> DbResult<Vec<Client>> {
        let query = self.db.query().await?;
        let today = date_iso(Utc::now().date_naive());
        let sql = format!(
            "SELECT {CLIENT_COLUMNS} FROM clients c
             WHERE c.status = 'pending'
               AND (c.priority_flag = 1
                    OR (c.next_charge_date IS NOT NULL AND c.next_charge_date <= ?))
             ORDER BY c.priority_flag DESC, c.visit_order, c.name"
        );
        let rows = query.get_all(&sql, &[today.into()]).await?;
        Ok(rows.iter().map(map_client).collect())
    }

    /// Total number of clients.
    pub async fn count(&self) -> DbResult<i64> {
        let query = self.db.query().await?;
        let row = query.get_one("SELECT COUNT(*) AS n FROM clients", &[]).await?;
        Ok(row
            .map(|r| sqlx::Row::try_get::<i64, _>(&r, "n").unwrap_or(0))
            .unwrap_or(0))
    }
}

// =============================================================================
// Helpers
// =============================================================================

fn sanitize_patch(patch: Patch<String>) -> Patch<String> {
    match patch {
        Patch::Set(raw) => match sanitize_text(&raw) {
            Some(cleaned) => Patch::Set(cleaned),
            None => Patch::Clear,
        },
        other => other,
    }
}

/// Builds the audit diff line, or None when nothing visible changed.
fn describe_diff(before: &Client, after: &Client) -> Option<String> {
    let mut changes: Vec<String> = Vec::new();

    if before.name != after.name {
        changes.push(format!("nome: {} -> {}", before.name, after.name));
    }
    if before.value_total != after.value_total {
        changes.push(format!("valor: {} -> {}", before.value_total, after.value_total));
    }
    if before.paid_total != after.paid_total {
        changes.push(format!("pago: {} -> {}", before.paid_total, after.paid_total));
    }
    if before.phone != after.phone {
        changes.push(format!(
            "telefone: {} -> {}",
            before.phone.as_deref().unwrap_or("(vazio)"),
            after.phone.as_deref().unwrap_or("(vazio)")
        ));
    }
    if before.street_id != after.street_id {
        changes.push("rua alterada".to_string());
    }
    if before.status != after.status {
        changes.push(format!("status: {} -> {}", before.status, after.status));
    }
    if before.next_charge_date != after.next_charge_date {
        changes.push(format!(
            "proxima cobranca: {} -> {}",
            before.next_charge_date.map(date_iso).unwrap_or_else(|| "(vazio)".into()),
            after.next_charge_date.map(date_iso).unwrap_or_else(|| "(vazio)".into())
        ));
    }

    if changes.is_empty() {
        None
    } else {
        Some(format!("Cadastro atualizado: {}", changes.join("; ")))
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DbConfig;
    use caderneta_core::ValidationError;

    async fn test_db() -> Database {
        Database::connect(DbConfig::in_memory()).await.unwrap()
    }

    fn new_client(name: &str, cents: i64) -> NewClient {
        NewClient {
            name: name.to_string(),
            value_total: Money::from_cents(cents),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_add_client_stores_cents_and_pending() {
        let db = test_db().await;
        let client = db
            .clients()
            .add_client(new_client("Maria", 10000))
            .await
            .unwrap();

        assert_eq!(client.value_total.cents(), 10000);
        assert_eq!(client.paid_total.cents(), 0);
        assert_eq!(client.status, ClientStatus::Pending);
        assert!(client.id > 0);
    }

    #[tokio::test]
    async fn test_add_client_round_trip() {
        let db = test_db().await;
        let new = NewClient {
            name: "  João da Silva ".to_string(),
            value_total: Money::from_cents(25050),
            phone: Some("(11) 98765-4321".to_string()),
            reference_note: Some("portão azul".to_string()),
            street_id: None,
            visit_order: Some(3),
            priority_flag: true,
            notes: Some("paga aos sábados".to_string()),
            next_charge_date: NaiveDate::from_ymd_opt(2030, 6, 1),
        };

        let client = db.clients().add_client(new).await.unwrap();
        let fetched = db.clients().get_by_id(client.id).await.unwrap().unwrap();

        // Every caller-supplied field survives the round trip normalized
        assert_eq!(fetched.name, "João da Silva");
        assert_eq!(fetched.value_total.cents(), 25050);
        assert_eq!(fetched.phone.as_deref(), Some("11987654321"));
        assert_eq!(fetched.reference_note.as_deref(), Some("portão azul"));
        assert_eq!(fetched.visit_order, 3);
        assert!(fetched.priority_flag);
        assert_eq!(fetched.notes.as_deref(), Some("paga aos sábados"));
        assert_eq!(fetched.next_charge_date, NaiveDate::from_ymd_opt(2030, 6, 1));
    }

    #[tokio::test]
    async fn test_add_client_rejects_bad_input() {
        let db = test_db().await;

        let err = db.clients().add_client(new_client("", 100)).await;
        assert!(matches!(err, Err(DbError::Validation(ValidationError::Required { .. }))));

        let err = db.clients().add_client(new_client("X", -5)).await;
        assert!(matches!(err, Err(DbError::Validation(_))));

        let mut bad_phone = new_client("X", 100);
        bad_phone.phone = Some("banana".to_string());
        assert!(matches!(
            db.clients().add_client(bad_phone).await,
            Err(DbError::Validation(_))
        ));
    }

    #[tokio::test]
    async fn test_zero_value_client_is_settled() {
        let db = test_db().await;
        let mut new = new_client("Brinde", 0);
        new.next_charge_date = NaiveDate::from_ymd_opt(2030, 1, 1);

        let client = db.clients().add_client(new).await.unwrap();
        assert_eq!(client.status, ClientStatus::Settled);
        // Settled clients never carry a next charge date
        assert_eq!(client.next_charge_date, None);
    }

    #[tokio::test]
    async fn test_update_client_partial_fields() {
        let db = test_db().await;
        let client = db
            .clients()
            .add_client(new_client("Maria", 10000))
            .await
            .unwrap();

        let updated = db
            .clients()
            .update_client(
                client.id,
                ClientUpdate {
                    value_total: Some(Money::from_cents(15000)),
                    notes: Patch::Set("mudou de casa".to_string()),
                    ..Default::default()
                },
            )
            .await
            .unwrap();

        assert_eq!(updated.value_total.cents(), 15000);
        assert_eq!(updated.notes.as_deref(), Some("mudou de casa"));
        // Untouched fields survive
        assert_eq!(updated.name, "Maria");
        assert_eq!(updated.paid_total.cents(), 0);

        // The audit log recorded the diff
        let logs = db.logs().get_by_client(client.id).await.unwrap();
        assert!(logs.iter().any(|l| l.description.contains("valor")));
    }

    #[tokio::test]
    async fn test_update_to_fully_paid_settles_and_clears_charge_date() {
        let db = test_db().await;
        let mut new = new_client("Maria", 10000);
        new.next_charge_date = NaiveDate::from_ymd_opt(2030, 1, 1);
        let client = db.clients().add_client(new).await.unwrap();

        let updated = db
            .clients()
            .update_client(
                client.id,
                ClientUpdate {
                    paid_total: Some(Money::from_cents(10000)),
                    ..Default::default()
                },
            )
            .await
            .unwrap();

        assert_eq!(updated.status, ClientStatus::Settled);
        assert_eq!(updated.next_charge_date, None);
    }

    #[tokio::test]
    async fn test_update_clamps_paid_to_total() {
        let db = test_db().await;
        let client = db
            .clients()
            .add_client(new_client("Maria", 10000))
            .await
            .unwrap();

        let updated = db
            .clients()
            .update_client(
                client.id,
                ClientUpdate {
                    paid_total: Some(Money::from_cents(99999)),
                    ..Default::default()
                },
            )
            .await
            .unwrap();

        // Hard invariant: paid <= total
        assert_eq!(updated.paid_total.cents(), 10000);
        assert_eq!(updated.status, ClientStatus::Settled);
    }

    #[tokio::test]
    async fn test_update_missing_client_is_not_found() {
        let db = test_db().await;
        let err = db
            .clients()
            .update_client(
                999,
                ClientUpdate {
                    name: Some("X".to_string()),
                    ..Default::default()
                },
            )
            .await;
        assert!(matches!(err, Err(DbError::NotFound { .. })));
    }

    #[tokio::test]
    async fn test_delete_client_cascades() {
        let db = test_db().await;
        let client = db
            .clients()
            .add_client(new_client("Maria", 10000))
            .await
            .unwrap();
        db.payments()
            .add_payment(client.id, Money::from_cents(4000), NaiveDate::from_ymd_opt(2030, 1, 1))
            .await
            .unwrap();

        assert!(db.clients().delete_client(client.id).await.unwrap());
        // Deleting again is a miss, not an error
        assert!(!db.clients().delete_client(client.id).await.unwrap());

        // Payments and logs cascaded away
        assert!(db.payments().get_by_client(client.id).await.unwrap().is_empty());
        assert!(db.logs().get_by_client(client.id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_filtered_reads() {
        let db = test_db().await;
        let bairro = db.routes().add_bairro("Centro").await.unwrap();
        let rua = db.routes().add_rua(bairro.id, "Rua A").await.unwrap();

        let mut on_street = new_client("Ana", 5000);
        on_street.street_id = Some(rua.id);
        on_street.visit_order = Some(2);
        let ana = db.clients().add_client(on_street).await.unwrap();

        let mut due = new_client("Bia", 5000);
        due.next_charge_date = NaiveDate::from_ymd_opt(2030, 5, 10);
        db.clients().add_client(due).await.unwrap();

        // by street
        let street_clients = db.clients().get_by_street(rua.id).await.unwrap();
        assert_eq!(street_clients.len(), 1);
        assert_eq!(street_clients[0].id, ana.id);

        // by date range
        let in_range = db
            .clients()
            .get_by_date_range(
                NaiveDate::from_ymd_opt(2030, 5, 1).unwrap(),
                NaiveDate::from_ymd_opt(2030, 5, 31).unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(in_range.len(), 1);
        assert_eq!(in_range[0].name, "Bia");

        // pagination
        let page = db.clients().get_page(1, 0).await.unwrap();
        assert_eq!(page.len(), 1);
        let rest = db.clients().get_page(10, 1).await.unwrap();
        assert_eq!(rest.len(), 1);

        assert_eq!(db.clients().count().await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_get_updated_since() {
        let db = test_db().await;
        let before_all = Utc::now() - chrono::Duration::seconds(60);
        db.clients().add_client(new_client("Maria", 100)).await.unwrap();

        let hits = db.clients().get_updated_since(before_all).await.unwrap();
        assert_eq!(hits.len(), 1);

        let future = Utc::now() + chrono::Duration::seconds(60);
        let hits = db.clients().get_updated_since(future).await.unwrap();
        assert!(hits.is_empty());
    }

    #[tokio::test]
    async fn test_priority_today_route() {
        let db = test_db().await;

        let mut overdue = new_client("Atrasada", 5000);
        overdue.next_charge_date = NaiveDate::from_ymd_opt(2020, 1, 1);
        db.clients().add_client(overdue).await.unwrap();

        let mut flagged = new_client("Prioridade", 5000);
        flagged.priority_flag = true;
        db.clients().add_client(flagged).await.unwrap();

        let mut far_future = new_client("Futura", 5000);
        far_future.next_charge_date = NaiveDate::from_ymd_opt(2099, 1, 1);
        db.clients().add_client(far_future).await.unwrap();

        let route = db.clients().get_priority_today().await.unwrap();
        let names: Vec<_> = route.iter().map(|c| c.name.as_str()).collect();
        assert!(names.contains(&"Atrasada"));
        assert!(names.contains(&"Prioridade"));
        assert!(!names.contains(&"Futura"));
        // Priority-flagged clients lead the route
        assert_eq!(names[0], "Prioridade");
    }
}
