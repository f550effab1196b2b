//! Registered embedding models and their rolling usage statistics.

use chrono::{DateTime, Utc};
use rusqlite::{Connection, params};
use tracing::instrument;

use vectorhub_core::ModelDescriptor;

use crate::database::Database;
use crate::error::StoreError;
use crate::row_helpers;

const TABLE: &str = "embedding_models";
const COLUMNS: &str =
    "name, dimensions, max_tokens, active, created_at, last_used_at, usage_count, avg_latency_ms";

/// Repository for `embedding_models`.
#[derive(Clone)]
pub struct ModelRepo {
    db: Database,
}

impl ModelRepo {
    /// Repository over `db`.
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Insert a model, or update its shape if it exists.
    ///
    /// The active flag, creation time and usage statistics of an existing
    /// row are kept; only [`Self::set_active`] changes activation.
    #[instrument(skip(self, model), fields(model = %model.name))]
    pub fn upsert(&self, model: &ModelDescriptor) -> Result<(), StoreError> {
        self.db.with_conn(|conn| {
            let _ = conn.execute(
                "INSERT INTO embedding_models (name, dimensions, max_tokens, active, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)
                 ON CONFLICT(name) DO UPDATE SET
                    dimensions = excluded.dimensions,
                    max_tokens = excluded.max_tokens",
                params![
                    model.name,
                    model.dimensions as i64,
                    model.max_tokens as i64,
                    model.active,
                    row_helpers::to_db_timestamp(&model.created_at),
                ],
            )?;
            Ok(())
        })
    }

    /// Soft-(de)activate a model.
    #[instrument(skip(self))]
    pub fn set_active(&self, name: &str, active: bool) -> Result<(), StoreError> {
        self.db.with_conn(|conn| {
            let changed = conn.execute(
                "UPDATE embedding_models SET active = ?1 WHERE name = ?2",
                params![active, name],
            )?;
            if changed == 0 {
                return Err(StoreError::NotFound(format!("model {name}")));
            }
            Ok(())
        })
    }

    /// Get a model by name.
    #[instrument(skip(self))]
    pub fn get(&self, name: &str) -> Result<ModelDescriptor, StoreError> {
        self.db.with_conn(|conn| {
            let mut stmt =
                conn.prepare(&format!("SELECT {COLUMNS} FROM embedding_models WHERE name = ?1"))?;
            let mut rows = stmt.query([name])?;
            match rows.next()? {
                Some(row) => row_to_model(row),
                None => Err(StoreError::NotFound(format!("model {name}"))),
            }
        })
    }

    /// All models, active or not, ordered by name.
    #[instrument(skip(self))]
    pub fn list(&self) -> Result<Vec<ModelDescriptor>, StoreError> {
        self.db.with_conn(|conn| {
            let mut stmt =
                conn.prepare(&format!("SELECT {COLUMNS} FROM embedding_models ORDER BY name"))?;
            let mut rows = stmt.query([])?;
            let mut results = Vec::new();
            while let Some(row) = rows.next()? {
                results.push(row_to_model(row)?);
            }
            Ok(results)
        })
    }

    /// Fold one successful call into the model's rolling statistics.
    pub fn record_success(
        &self,
        name: &str,
        latency_ms: u64,
        at: &DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        self.db
            .with_conn(|conn| Self::record_success_in(conn, name, latency_ms, at))
    }

    /// [`Self::record_success`] on a caller-held connection or transaction.
    ///
    /// Returns false when the model is not registered.
    pub fn record_success_in(
        conn: &Connection,
        name: &str,
        latency_ms: u64,
        at: &DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        let changed = conn.execute(
            "UPDATE embedding_models SET
                avg_latency_ms = (avg_latency_ms * usage_count + ?1) / (usage_count + 1),
                usage_count = usage_count + 1,
                last_used_at = CASE
                    WHEN last_used_at IS NULL OR last_used_at < ?2 THEN ?2
                    ELSE last_used_at
                END
             WHERE name = ?3",
            params![latency_ms as f64, row_helpers::to_db_timestamp(at), name],
        )?;
        Ok(changed > 0)
    }
}

fn row_to_model(row: &rusqlite::Row<'_>) -> Result<ModelDescriptor, StoreError> {
    let created_at: String = row_helpers::get(row, 4, TABLE, "created_at")?;
    let last_used_at: Option<String> = row_helpers::get_opt(row, 5, TABLE, "last_used_at")?;
    let dimensions: i64 = row_helpers::get(row, 1, TABLE, "dimensions")?;
    let max_tokens: i64 = row_helpers::get(row, 2, TABLE, "max_tokens")?;
    let usage_count: i64 = row_helpers::get(row, 6, TABLE, "usage_count")?;
    Ok(ModelDescriptor {
        name: row_helpers::get(row, 0, TABLE, "name")?,
        dimensions: row_helpers::to_u64(dimensions, TABLE, "dimensions")? as usize,
        max_tokens: row_helpers::to_u64(max_tokens, TABLE, "max_tokens")? as usize,
        active: row_helpers::get(row, 3, TABLE, "active")?,
        created_at: row_helpers::parse_timestamp(&created_at, TABLE, "created_at")?,
        last_used_at: last_used_at
            .map(|raw| row_helpers::parse_timestamp(&raw, TABLE, "last_used_at"))
            .transpose()?,
        usage_count: row_helpers::to_u64(usage_count, TABLE, "usage_count")?,
        avg_latency_ms: row_helpers::get(row, 7, TABLE, "avg_latency_ms")?,
    })
}
