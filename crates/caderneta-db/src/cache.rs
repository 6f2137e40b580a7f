//! # Totals Cache
//!
//! TTL caching for the dashboard's aggregate financial figures.
//!
//! ## Flow
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────┐
//! │                      get_totals() lookup                            │
//! │                                                                     │
//! │  in-memory TTL map ── hit? ──► return                               │
//! │        │ miss                                                       │
//! │        ▼                                                            │
//! │  financial_cache table ── fresh row? ──► warm memory, return        │
//! │        │ miss                  (survives process restarts)          │
//! │        ▼                                                            │
//! │  SUM() over clients/payments ──► warm both layers, return           │
//! │                                                                     │
//! │  Writes that touch value/paid invalidate both layers explicitly.    │
//! │  Expired persisted rows are purged at startup.                      │
//! └─────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Eviction
//! The in-memory map is size-capped with oldest-first eviction. No
//! garbage-collector tricks: expiry and eviction are explicit.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use sqlx::SqlitePool;
use tracing::{debug, warn};

use caderneta_core::{Money, Totals};

use crate::error::DbResult;
use crate::query::QueryLayer;

/// TTL for slow-moving aggregates (receivable, lifetime paid, month).
pub(crate) const TTL_AGGREGATE: Duration = Duration::from_secs(30);

/// TTL for "today" figures, which the collector watches change.
pub(crate) const TTL_TODAY: Duration = Duration::from_secs(10);

/// In-memory entry cap; far above the handful of keys in use, it exists
/// so a bug can never turn this map into a leak.
const MAX_ENTRIES: usize = 64;

const KEY_RECEIVABLE: &str = "totals.receivable";
const KEY_PAID: &str = "totals.paid";
const KEY_TODAY: &str = "totals.today";
const KEY_MONTH: &str = "totals.month";

// =============================================================================
// In-Memory TTL Map
// =============================================================================

#[derive(Debug)]
struct Entry {
    value: i64,
    expires_at: Instant,
    inserted_at: Instant,
}

/// Size-capped TTL map for aggregate values.
#[derive(Debug, Default)]
pub(crate) struct TotalsCache {
    entries: Mutex<HashMap<String, Entry>>,
}

impl TotalsCache {
    pub(crate) fn get(&self, key: &str) -> Option<i64> {
        let entries = self.entries.lock().expect("totals cache poisoned");
        entries
            .get(key)
            .filter(|e| e.expires_at > Instant::now())
            .map(|e| e.value)
    }

    pub(crate) fn put(&self, key: &str, value: i64, ttl: Duration) {
        let now = Instant::now();
        let mut entries = self.entries.lock().expect("totals cache poisoned");

        if entries.len() >= MAX_ENTRIES && !entries.contains_key(key) {
            // Oldest-first eviction
            if let Some(oldest) = entries
                .iter()
                .min_by_key(|(_, e)| e.inserted_at)
                .map(|(k, _)| k.clone())
            {
                entries.remove(&oldest);
            }
        }

        entries.insert(
            key.to_string(),
            Entry {
                value,
                expires_at: now + ttl,
                inserted_at: now,
            },
        );
    }

    pub(crate) fn invalidate_all(&self) {
        self.entries.lock().expect("totals cache poisoned").clear();
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.entries.lock().unwrap().len()
    }
}

// =============================================================================
// Persisted Mirror
// =============================================================================

/// Reads a still-fresh value from the persisted mirror.
async fn load_persisted(pool: &SqlitePool, key: &str) -> Option<i64> {
    let now_ms = chrono::Utc::now().timestamp_millis();
    let row: Option<(String,)> =
        sqlx::query_as("SELECT value FROM financial_cache WHERE key = ? AND expires_at > ?")
            .bind(key)
            .bind(now_ms)
            .fetch_optional(pool)
            .await
            .ok()
            .flatten();
    row.and_then(|(v,)| v.parse().ok())
}

/// Writes a value through to the persisted mirror. Best-effort: cache
/// persistence must never fail a read path.
async fn store_persisted(pool: &SqlitePool, key: &str, value: i64, ttl: Duration) {
    let expires_at = chrono::Utc::now().timestamp_millis() + ttl.as_millis() as i64;
    let result = sqlx::query(
        "INSERT INTO financial_cache (key, value, expires_at) VALUES (?, ?, ?)
         ON CONFLICT (key) DO UPDATE SET value = excluded.value, expires_at = excluded.expires_at",
    )
    .bind(key)
    .bind(value.to_string())
    .bind(expires_at)
    .execute(pool)
    .await;

    if let Err(e) = result {
        warn!(key, error = %e, "could not persist cache entry");
    }
}

/// Drops the persisted totals rows. Best-effort.
async fn clear_persisted(pool: &SqlitePool) {
    if let Err(e) = sqlx::query("DELETE FROM financial_cache WHERE key LIKE 'totals.%'")
        .execute(pool)
        .await
    {
        warn!(error = %e, "could not clear persisted cache");
    }
}

// =============================================================================
// Totals
// =============================================================================

/// Serves the dashboard totals through both cache layers.
pub(crate) async fn fetch_totals(query: &QueryLayer, cache: &TotalsCache) -> DbResult<Totals> {
    let receivable = cached_sum(
        query,
        cache,
        KEY_RECEIVABLE,
        TTL_AGGREGATE,
        "SELECT COALESCE(SUM(value_total_cents - paid_total_cents), 0)
         FROM clients WHERE status = 'pending'",
    )
    .await?;

    let paid = cached_sum(
        query,
        cache,
        KEY_PAID,
        TTL_AGGREGATE,
        "SELECT COALESCE(SUM(paid_total_cents), 0) FROM clients",
    )
    .await?;

    let collected_today = cached_sum(
        query,
        cache,
        KEY_TODAY,
        TTL_TODAY,
        "SELECT COALESCE(SUM(amount_cents), 0) FROM payments
         WHERE date(created_at) = date('now')",
    )
    .await?;

    let collected_month = cached_sum(
        query,
        cache,
        KEY_MONTH,
        TTL_AGGREGATE,
        "SELECT COALESCE(SUM(amount_cents), 0) FROM payments
         WHERE strftime('%Y-%m', created_at) = strftime('%Y-%m', 'now')",
    )
    .await?;

    Ok(Totals {
        receivable: Money::from_cents(receivable),
        paid: Money::from_cents(paid),
        collected_today: Money::from_cents(collected_today),
        collected_month: Money::from_cents(collected_month),
    })
}

async fn cached_sum(
    query: &QueryLayer,
    cache: &TotalsCache,
    key: &str,
    ttl: Duration,
    sql: &str,
) -> DbResult<i64> {
    if let Some(value) = cache.get(key) {
        return Ok(value);
    }

    if let Some(value) = load_persisted(query.pool(), key).await {
        debug!(key, value, "totals served from persisted cache");
        cache.put(key, value, ttl);
        return Ok(value);
    }

    let value = match query.get_one(sql, &[]).await? {
        Some(row) => sqlx::Row::try_get::<i64, _>(&row, 0).unwrap_or(0),
        None => 0,
    };

    cache.put(key, value, ttl);
    store_persisted(query.pool(), key, value, ttl).await;
    Ok(value)
}

/// Invalidates both cache layers. Called by every write that changes
/// value/paid fields.
pub(crate) async fn invalidate_totals(pool: &SqlitePool, cache: &TotalsCache) {
    cache.invalidate_all();
    clear_persisted(pool).await;
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DbConfig;
    use crate::schema;
    use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};

    async fn ready_pool() -> SqlitePool {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(
                SqliteConnectOptions::new()
                    .in_memory(true)
                    .foreign_keys(true),
            )
            .await
            .unwrap();
        schema::initialize(&pool, &DbConfig::in_memory()).await.unwrap();
        pool
    }

    #[test]
    fn test_ttl_expiry() {
        let cache = TotalsCache::default();
        cache.put("k", 42, Duration::from_millis(20));
        assert_eq!(cache.get("k"), Some(42));

        std::thread::sleep(Duration::from_millis(40));
        assert_eq!(cache.get("k"), None);
    }

    #[test]
    fn test_eviction_oldest_first() {
        let cache = TotalsCache::default();
        for i in 0..MAX_ENTRIES {
            cache.put(&format!("k{i}"), i as i64, Duration::from_secs(60));
        }
        assert_eq!(cache.len(), MAX_ENTRIES);

        // One more evicts the oldest, not the newest
        cache.put("overflow", 1, Duration::from_secs(60));
        assert_eq!(cache.len(), MAX_ENTRIES);
        assert_eq!(cache.get("k0"), None);
        assert_eq!(cache.get("overflow"), Some(1));
    }

    #[test]
    fn test_invalidate_all() {
        let cache = TotalsCache::default();
        cache.put("a", 1, Duration::from_secs(60));
        cache.put("b", 2, Duration::from_secs(60));
        cache.invalidate_all();
        assert_eq!(cache.get("a"), None);
        assert_eq!(cache.get("b"), None);
    }

    #[tokio::test]
    async fn test_totals_computed_and_cached() {
        let pool = ready_pool().await;
        let query = QueryLayer::new(pool.clone(), 10_000);
        let cache = TotalsCache::default();

        sqlx::query(
            "INSERT INTO clients (name, value_total_cents, paid_total_cents, status, created_at, updated_at)
             VALUES ('A', 10000, 4000, 'pending', '2024-01-01T00:00:00Z', '2024-01-01T00:00:00Z')",
        )
        .execute(&pool)
        .await
        .unwrap();

        let totals = fetch_totals(&query, &cache).await.unwrap();
        assert_eq!(totals.receivable.cents(), 6000);
        assert_eq!(totals.paid.cents(), 4000);

        // A direct write bypassing the repositories: cached values hold
        sqlx::query("UPDATE clients SET paid_total_cents = 10000, status = 'settled'")
            .execute(&pool)
            .await
            .unwrap();
        let totals = fetch_totals(&query, &cache).await.unwrap();
        assert_eq!(totals.receivable.cents(), 6000);

        // Until invalidated
        invalidate_totals(&pool, &cache).await;
        let totals = fetch_totals(&query, &cache).await.unwrap();
        assert_eq!(totals.receivable.cents(), 0);
        assert_eq!(totals.paid.cents(), 10000);
    }

    #[tokio::test]
    async fn test_persisted_mirror_roundtrip() {
        let pool = ready_pool().await;

        store_persisted(&pool, "totals.receivable", 1234, Duration::from_secs(60)).await;
        assert_eq!(load_persisted(&pool, "totals.receivable").await, Some(1234));

        // Expired rows are not served
        store_persisted(&pool, "totals.paid", 99, Duration::from_millis(0)).await;
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(load_persisted(&pool, "totals.paid").await, None);

        clear_persisted(&pool).await;
        assert_eq!(load_persisted(&pool, "totals.receivable").await, None);
    }
}
