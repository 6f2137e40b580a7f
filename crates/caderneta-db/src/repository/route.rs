//! # Route Repository
//!
//! CRUD for the Bairro → Rua hierarchy that organizes visit routes.
//!
//! Cascade semantics (enforced by the schema, exercised here):
//! - deleting a bairro deletes its ruas
//! - deleting a rua NULLs dependent clients' `street_id`; the clients
//!   themselves survive

use caderneta_core::validation::validate_place_name;
use caderneta_core::{Bairro, Rua};

use crate::engine::Database;
use crate::error::{DbError, DbResult};
use crate::mapper::{map_bairro, map_rua};

/// Repository for neighborhoods and streets.
#[derive(Debug, Clone)]
pub struct RouteRepository {
    db: Database,
}

impl RouteRepository {
    pub(crate) fn new(db: Database) -> Self {
        RouteRepository { db }
    }

    // =========================================================================
    // Bairros
    // =========================================================================

    /// Creates a neighborhood.
    pub async fn add_bairro(&self, name: &str) -> DbResult<Bairro> {
        let name = validate_place_name("bairro", name)?;
        let query = self.db.query().await?;
        let id = query
            .run_and_get_id("INSERT INTO bairros (name) VALUES (?)", &[name.clone().into()])
            .await?;
        Ok(Bairro { id, name })
    }

    /// Renames a neighborhood.
    pub async fn rename_bairro(&self, id: i64, name: &str) -> DbResult<()> {
        let name = validate_place_name("bairro", name)?;
        let query = self.db.query().await?;
        let affected = query
            .run(
                "UPDATE bairros SET name = ? WHERE id = ?",
                &[name.into(), id.into()],
            )
            .await?;
        if affected == 0 {
            return Err(DbError::not_found("bairro", id));
        }
        Ok(())
    }

    /// Deletes a neighborhood; its streets cascade away.
    pub async fn delete_bairro(&self, id: i64) -> DbResult<bool> {
        let query = self.db.query().await?;
        let affected = query
            .run("DELETE FROM bairros WHERE id = ?", &[id.into()])
            .await?;
        Ok(affected > 0)
    }

    /// All neighborhoods, name order.
    pub async fn get_bairros(&self) -> DbResult<Vec<Bairro>> {
        let query = self.db.query().await?;
        let rows = query
            .get_all("SELECT id, name FROM bairros ORDER BY name", &[])
            .await?;
        Ok(rows.iter().map(map_bairro).collect())
    }

    // =========================================================================
    // Ruas
    // =========================================================================

    /// Creates a street inside a neighborhood.
    pub async fn add_rua(&self, bairro_id: i64, name: &str) -> DbResult<Rua> {
        let name = validate_place_name("rua", name)?;
        let query = self.db.query().await?;
        let id = query
            .run_and_get_id(
                "INSERT INTO ruas (bairro_id, name) VALUES (?, ?)",
                &[bairro_id.into(), name.clone().into()],
            )
            .await?;
        Ok(Rua {
            id,
            bairro_id,
            name,
        })
    }

    /// Renames a street.
    pub async fn rename_rua(&self, id: i64, name: &str) -> DbResult<()> {
        let name = validate_place_name("rua", name)?;
        let query = self.db.query().await?;
        let affected = query
            .run(
                "UPDATE ruas SET name = ? WHERE id = ?",
                &[name.into(), id.into()],
            )
            .await?;
        if affected == 0 {
            return Err(DbError::not_found("rua", id));
        }
        Ok(())
    }

    /// Deletes a street; dependent clients keep living there, just
    /// without a route assignment (street_id goes NULL).
    pub async fn delete_rua(&self, id: i64) -> DbResult<bool> {
        let query = self.db.query().await?;
        let affected = query
            .run("DELETE FROM ruas WHERE id = ?", &[id.into()])
            .await?;
        Ok(affected > 0)
    }

    /// Streets of one neighborhood, name order.
    pub async fn get_ruas_by_bairro(&self, bairro_id: i64) -> DbResult<Vec<Rua>> {
        let query = self.db.query().await?;
        let rows = query
            .get_all(
                "SELECT id, bairro_id, name FROM ruas WHERE bairro_id = ? ORDER BY name",
                &[bairro_id.into()],
            )
            .await?;
        Ok(rows.iter().map(map_rua).collect())
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
