//! # Client Search
//!
//! FTS5-first search with a LIKE fallback.
//!
//! ## Strategy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────┐
//! │  search("joao", 50)                                                 │
//! │       │                                                             │
//! │       ├── FTS index available? (probed once at init)                │
//! │       │        │                                                    │
//! │       │        ▼                                                    │
//! │       │   MATCH '"joao"*'  ── hits? ──► return                      │
//! │       │        │ empty/error                                        │
//! │       ▼        ▼                                                    │
//! │   LIKE fallback: accent/case-folded compare across name, phone,     │
//! │   reference, street name and bairro name. Staged as a union-of-ids  │
//! │   CTE, then ONE join back to clients, so each predicate scans       │
//! │   narrow columns instead of dragging full rows around.              │
//! │                                                                     │
//! │   Both paths are bounded by the caller's limit.                     │
//! └─────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Accent Folding
//! SQLite's `lower()` only folds ASCII, and there is no `unaccent`. The
//! fallback therefore folds on both sides: the Rust side folds the term,
//! the SQL side folds the column through a nested `replace()` chain
//! covering the Portuguese alphabet. Ugly, but it runs everywhere.

use sqlx::sqlite::SqliteRow;

use caderneta_core::validation::fold_accents;
use caderneta_core::Client;

use crate::error::DbResult;
use crate::mapper::map_client;
use crate::query::{QueryLayer, SqlParam};

/// All stored client columns, used by both search paths.
pub(crate) const CLIENT_COLUMNS: &str = "c.id, c.name, c.value_total_cents, c.paid_total_cents, \
     c.phone, c.reference_note, c.street_id, c.visit_order, c.priority_flag, \
     c.notes, c.status, c.next_charge_date, c.last_visit_date, c.created_at, c.updated_at";

/// Searches clients by free text.
///
/// Tries the FTS index when available; an empty or failed FTS pass falls
/// back to the LIKE search. An empty term returns nothing.
pub(crate) async fn search_clients(
    query: &QueryLayer,
    fts_available: bool,
    term: &str,
    limit: i64,
) -> DbResult<Vec<Client>> {
    let term = term.trim();
    if term.is_empty() || limit <= 0 {
        return Ok(Vec::new());
    }

    if fts_available {
        match fts_search(query, term, limit).await {
            Ok(rows) if !rows.is_empty() => {
                return Ok(rows.iter().map(map_client).collect());
            }
            Ok(_) => {}
            Err(e) => {
                tracing::warn!(error = %e, "FTS search failed, using LIKE fallback");
            }
        }
    }

    let rows = like_search(query, term, limit).await?;
    Ok(rows.iter().map(map_client).collect())
}

// =============================================================================
// FTS Path
// =============================================================================

async fn fts_search(query: &QueryLayer, term: &str, limit: i64) -> DbResult<Vec<SqliteRow>> {
    let sql = format!(
        "SELECT {CLIENT_COLUMNS}
         FROM clients c
         JOIN clients_fts f ON f.rowid = c.id
         WHERE clients_fts MATCH ?
         ORDER BY f.rank
         LIMIT ?"
    );

    query
        .get_all(&sql, &[fts_match_expr(term).into(), limit.into()])
        .await
}

/// Builds a prefix-matching FTS expression: each token quoted (MATCH has
/// its own query syntax; user input must never reach it raw) with a `*`
/// for prefix matching.
fn fts_match_expr(term: &str) -> String {
    term.split_whitespace()
        .map(|token| format!("\"{}\"*", token.replace('"', "\"\"")))
        .collect::<Vec<_>>()
        .join(" ")
}

// =============================================================================
// LIKE Fallback
// =============================================================================

async fn like_search(query: &QueryLayer, term: &str, limit: i64) -> DbResult<Vec<SqliteRow>> {
    let folded = fold_accents(term);
    let pattern = format!("%{}%", escape_like(&folded));
    let digits: String = term.chars().filter(|c| c.is_ascii_digit()).collect();

    // Union-of-ids staging: each predicate produces ids over its own
    // narrow index-friendly scan; clients rows are materialized once.
    let mut id_selects = vec![
        format!(
            "SELECT id FROM clients WHERE {} LIKE ?1 ESCAPE '\\'",
            fold_expr("name")
        ),
        format!(
            "SELECT id FROM clients WHERE {} LIKE ?1 ESCAPE '\\'",
            fold_expr("reference_note")
        ),
        format!(
            "SELECT c.id FROM clients c JOIN ruas r ON r.id = c.street_id \
             WHERE {} LIKE ?1 ESCAPE '\\'",
            fold_expr("r.name")
        ),
        format!(
            "SELECT c.id FROM clients c JOIN ruas r ON r.id = c.street_id \
             JOIN bairros b ON b.id = r.bairro_id WHERE {} LIKE ?1 ESCAPE '\\'",
            fold_expr("b.name")
        ),
    ];

    let mut params: Vec<SqlParam> = vec![pattern.into()];
    if !digits.is_empty() {
        id_selects.push("SELECT id FROM clients WHERE phone LIKE ?2 ESCAPE '\\'".to_string());
        params.push(format!("%{}%", escape_like(&digits)).into());
    }

    let sql = format!(
        "WITH matches (id) AS ({})
         SELECT {CLIENT_COLUMNS}
         FROM clients c
         JOIN matches m ON m.id = c.id
         ORDER BY c.name
         LIMIT {limit}",
        id_selects.join(" UNION ")
    );

    query.get_all(&sql, &params).await
}

/// Escapes LIKE wildcards in user input.
fn escape_like(input: &str) -> String {
    input
        .replace('\\', "\\\\")
        .replace('%', "\\%")
        .replace('_', "\\_")
}

/// Wraps a column in `lower()` plus a `replace()` chain folding the
/// Portuguese accented alphabet, mirroring [`fold_accents`] in SQL.
fn fold_expr(column: &str) -> String {
    const FOLDS: &[(&str, &str)] = &[
        ("á", "a"), ("à", "a"), ("â", "a"), ("ã", "a"), ("ä", "a"),
        ("Á", "a"), ("À", "a"), ("Â", "a"), ("Ã", "a"), ("Ä", "a"),
        ("é", "e"), ("è", "e"), ("ê", "e"), ("ë", "e"),
        ("É", "e"), ("È", "e"), ("Ê", "e"), ("Ë", "e"),
        ("í", "i"), ("ì", "i"), ("î", "i"), ("ï", "i"),
        ("Í", "i"), ("Ì", "i"), ("Î", "i"), ("Ï", "i"),
        ("ó", "o"), ("ò", "o"), ("ô", "o"), ("õ", "o"), ("ö", "o"),
        ("Ó", "o"), ("Ò", "o"), ("Ô", "o"), ("Õ", "o"), ("Ö", "o"),
        ("ú", "u"), ("ù", "u"), ("û", "u"), ("ü", "u"),
        ("Ú", "u"), ("Ù", "u"), ("Û", "u"), ("Ü", "u"),
        ("ç", "c"), ("Ç", "c"),
    ];

    let mut expr = format!("lower({column})");
    for (from, to) in FOLDS {
        expr = format!("replace({expr}, '{from}', '{to}')");
    }
    expr
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
    use sqlx::SqlitePool;

    async fn seeded() -> (SqlitePool, QueryLayer, bool) {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(
                SqliteConnectOptions::new()
                    .in_memory(true)
                    .foreign_keys(true),
            )
            .await
            .unwrap();
        let fts = schema::initialize(&pool, &DbConfig::in_memory()).await.unwrap();

        sqlx::raw_sql(
            "INSERT INTO bairros (name) VALUES ('Centro');
             INSERT INTO ruas (bairro_id, name) VALUES (1, 'Rua São José');
             INSERT INTO clients (name, value_total_cents, phone, reference_note, street_id, created_at, updated_at)
             VALUES ('João Silva', 10000, '11987654321', 'portão verde', 1,
                     '2024-01-01T00:00:00Z', '2024-01-01T00:00:00Z');
             INSERT INTO clients (name, value_total_cents, created_at, updated_at)
             VALUES ('Maria Conceição', 5000, '2024-01-01T00:00:00Z', '2024-01-01T00:00:00Z');",
        )
        .execute(&pool)
        .await
        .unwrap();

        let query = QueryLayer::new(pool.clone(), 10_000);
        (pool, query, fts)
    }

    #[test]
    fn test_fts_match_expr_quotes_tokens() {
        assert_eq!(fts_match_expr("joao"), "\"joao\"*");
        assert_eq!(fts_match_expr("joao silva"), "\"joao\"* \"silva\"*");
        assert_eq!(fts_match_expr("o\"brien"), "\"o\"\"brien\"*");
    }

    #[test]
    fn test_escape_like() {
        assert_eq!(escape_like("50%"), "50\\%");
        assert_eq!(escape_like("a_b"), "a\\_b");
    }

    #[tokio::test]
    async fn test_like_fallback_is_accent_insensitive() {
        let (_pool, query, _fts) = seeded().await;

        // Force the fallback path
        let hits = search_clients(&query, false, "joao", 50).await.unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].name, "João Silva");

        let hits = search_clients(&query, false, "conceicao", 50).await.unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].name, "Maria Conceição");
    }

    #[tokio::test]
    async fn test_like_fallback_searches_all_fields() {
        let (_pool, query, _fts) = seeded().await;

        // Phone digits
        let hits = search_clients(&query, false, "98765", 50).await.unwrap();
        assert_eq!(hits.len(), 1);
        // Reference note
        let hits = search_clients(&query, false, "portão", 50).await.unwrap();
        assert_eq!(hits.len(), 1);
        // Street name, accent-folded
        let hits = search_clients(&query, false, "sao jose", 50).await.unwrap();
        assert_eq!(hits.len(), 1);
        // Bairro name
        let hits = search_clients(&query, false, "centro", 50).await.unwrap();
        assert_eq!(hits.len(), 1);
    }

    #[tokio::test]
    async fn test_fts_path_when_available() {
        let (_pool, query, fts) = seeded().await;
        if !fts {
            // This SQLite build has no FTS5; the fallback tests cover us
            return;
        }

        let hits = search_clients(&query, true, "joao", 50).await.unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].name, "João Silva");
    }

    #[tokio::test]
    async fn test_empty_term_and_limit() {
        let (_pool, query, _fts) = seeded().await;

        assert!(search_clients(&query, false, "  ", 50).await.unwrap().is_empty());
        assert!(search_clients(&query, false, "joao", 0).await.unwrap().is_empty());

        // Limit bounds results
        let hits = search_clients(&query, false, "a", 1).await.unwrap();
        assert_eq!(hits.len(), 1);
    }
}
