//! Append-only usage log and the per-caller dashboard queries over it.

use chrono::{DateTime, Utc};
use rusqlite::types::ToSql;
use rusqlite::{Connection, params};
use tracing::instrument;

use vectorhub_core::{OperationKind, RecordId, SessionId, UsageRecord, UsageSummary};

use crate::database::Database;
use crate::error::StoreError;
use crate::row_helpers;

const TABLE: &str = "usage_log";
const COLUMNS: &str = "id, principal, session_id, operation, model, input_length, batch_size,
    execution_ms, tokens_processed, success, error_message, created_at";

/// Filter for [`UsageRepo::query`]. Unset fields do not filter.
#[derive(Clone, Debug, Default)]
pub struct UsageQuery {
    /// Only records attributed to this principal.
    pub principal: Option<String>,
    /// Only this operation kind.
    pub operation: Option<OperationKind>,
    /// Only records for this model.
    pub model: Option<String>,
    /// Inclusive lower bound on `created_at`.
    pub since: Option<DateTime<Utc>>,
    /// Exclusive upper bound on `created_at`.
    pub until: Option<DateTime<Utc>>,
    /// Only successes (`true`) or failures (`false`).
    pub success: Option<bool>,
    /// Maximum rows returned (default 100).
    pub limit: Option<u32>,
}

/// Repository for `usage_log`.
#[derive(Clone)]
pub struct UsageRepo {
    db: Database,
}

impl UsageRepo {
    /// Repository over `db`.
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// The underlying database handle.
    pub fn database(&self) -> &Database {
        &self.db
    }

    /// Insert records in one transaction. Either all land or none do.
    #[instrument(skip(self, records), fields(count = records.len()))]
    pub fn insert_batch(&self, records: &[UsageRecord]) -> Result<usize, StoreError> {
        self.db.transaction(|conn| {
            for record in records {
                Self::insert_in(conn, record)?;
            }
            Ok(records.len())
        })
    }

    /// Insert one record on a caller-held connection or transaction.
    pub fn insert_in(conn: &Connection, record: &UsageRecord) -> Result<(), StoreError> {
        let _ = conn.execute(
            "INSERT INTO usage_log (id, principal, session_id, operation, model, input_length,
                batch_size, execution_ms, tokens_processed, success, error_message, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
            params![
                record.id.as_str(),
                record.principal,
                record.session_id.as_str(),
                record.operation.as_str(),
                record.model,
                record.input_length.map(|v| v as i64),
                record.batch_size,
                record.execution_ms.map(|v| v as i64),
                record.tokens_processed.map(|v| v as i64),
                record.success,
                record.error_message,
                row_helpers::to_db_timestamp(&record.created_at),
            ],
        )?;
        Ok(())
    }

    /// Records matching `q`, newest first.
    #[instrument(skip(self))]
    pub fn query(&self, q: &UsageQuery) -> Result<Vec<UsageRecord>, StoreError> {
        self.db.with_conn(|conn| {
            let mut sql = format!("SELECT {COLUMNS} FROM usage_log WHERE 1=1");
            let mut params: Vec<Box<dyn ToSql>> = Vec::new();

            if let Some(principal) = &q.principal {
                sql.push_str(&format!(" AND principal = ?{}", params.len() + 1));
                params.push(Box::new(principal.clone()));
            }
            if let Some(operation) = q.operation {
                sql.push_str(&format!(" AND operation = ?{}", params.len() + 1));
                params.push(Box::new(operation.as_str()));
            }
            if let Some(model) = &q.model {
                sql.push_str(&format!(" AND model = ?{}", params.len() + 1));
                params.push(Box::new(model.clone()));
            }
            if let Some(since) = &q.since {
                sql.push_str(&format!(" AND created_at >= ?{}", params.len() + 1));
                params.push(Box::new(row_helpers::to_db_timestamp(since)));
            }
            if let Some(until) = &q.until {
                sql.push_str(&format!(" AND created_at < ?{}", params.len() + 1));
                params.push(Box::new(row_helpers::to_db_timestamp(until)));
            }
            if let Some(success) = q.success {
                sql.push_str(&format!(" AND success = ?{}", params.len() + 1));
                params.push(Box::new(success));
            }

            sql.push_str(" ORDER BY created_at DESC, id DESC");
            let limit = q.limit.unwrap_or(100);
            sql.push_str(&format!(" LIMIT {limit}"));

            let param_refs: Vec<&dyn ToSql> = params.iter().map(|p| p.as_ref()).collect();
            let mut stmt = conn.prepare(&sql)?;
            let mut rows = stmt.query(param_refs.as_slice())?;
            let mut results = Vec::new();
            while let Some(row) = rows.next()? {
                results.push(row_to_usage(row)?);
            }
            Ok(results)
        })
    }

    /// Every record with `from <= created_at < until`, oldest first.
    #[instrument(skip(self))]
    pub fn records_between(
        &self,
        from: &DateTime<Utc>,
        until: &DateTime<Utc>,
    ) -> Result<Vec<UsageRecord>, StoreError> {
        self.db.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {COLUMNS} FROM usage_log
                 WHERE created_at >= ?1 AND created_at < ?2
                 ORDER BY created_at, id"
            ))?;
            let mut rows = stmt.query(params![
                row_helpers::to_db_timestamp(from),
                row_helpers::to_db_timestamp(until)
            ])?;
            let mut results = Vec::new();
            while let Some(row) = rows.next()? {
                results.push(row_to_usage(row)?);
            }
            Ok(results)
        })
    }

    /// Totals for one principal, optionally from `since` onwards.
    #[instrument(skip(self))]
    pub fn summary(
        &self,
        principal: &str,
        since: Option<&DateTime<Utc>>,
    ) -> Result<UsageSummary, StoreError> {
        let since = since.map_or_else(String::new, row_helpers::to_db_timestamp);
        self.db.with_conn(|conn| {
            let (total, failed, tokens, avg): (i64, i64, i64, Option<f64>) = conn.query_row(
                "SELECT COUNT(*),
                        COALESCE(SUM(CASE WHEN success = 0 THEN 1 ELSE 0 END), 0),
                        COALESCE(SUM(tokens_processed), 0),
                        AVG(execution_ms)
                 FROM usage_log WHERE principal = ?1 AND created_at >= ?2",
                params![principal, since],
                |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?)),
            )?;
            Ok(UsageSummary {
                total_calls: row_helpers::to_u64(total, TABLE, "id")?,
                failed_calls: row_helpers::to_u64(failed, TABLE, "success")?,
                total_tokens: row_helpers::to_u64(tokens, TABLE, "tokens_processed")?,
                avg_latency_ms: avg,
            })
        })
    }

    /// Delete records with `created_at <= cutoff`. Returns the number deleted.
    #[instrument(skip(self))]
    pub fn delete_at_or_before(&self, cutoff: &DateTime<Utc>) -> Result<usize, StoreError> {
        self.db.with_conn(|conn| {
            Ok(conn.execute(
                "DELETE FROM usage_log WHERE created_at <= ?1",
                [row_helpers::to_db_timestamp(cutoff)],
            )?)
        })
    }

    /// Total number of stored records.
    pub fn count(&self) -> Result<usize, StoreError> {
        self.db.with_conn(|conn| {
            let n: i64 = conn.query_row("SELECT COUNT(*) FROM usage_log", [], |row| row.get(0))?;
            Ok(row_helpers::to_u64(n, TABLE, "id")? as usize)
        })
    }
}

fn opt_u64(
    row: &rusqlite::Row<'_>,
    idx: usize,
    column: &'static str,
) -> Result<Option<u64>, StoreError> {
    row_helpers::get_opt::<i64>(row, idx, TABLE, column)?
        .map(|v| row_helpers::to_u64(v, TABLE, column))
        .transpose()
}

fn row_to_usage(row: &rusqlite::Row<'_>) -> Result<UsageRecord, StoreError> {
    let id: String = row_helpers::get(row, 0, TABLE, "id")?;
    let session_id: String = row_helpers::get(row, 2, TABLE, "session_id")?;
    let operation: String = row_helpers::get(row, 3, TABLE, "operation")?;
    let created_at: String = row_helpers::get(row, 11, TABLE, "created_at")?;
    Ok(UsageRecord {
        id: RecordId::from_raw(id),
        principal: row_helpers::get(row, 1, TABLE, "principal")?,
        session_id: SessionId::from_raw(session_id),
        operation: row_helpers::parse_enum(&operation, TABLE, "operation")?,
        model: row_helpers::get_opt(row, 4, TABLE, "model")?,
        input_length: opt_u64(row, 5, "input_length")?,
        batch_size: row_helpers::get_opt(row, 6, TABLE, "batch_size")?,
        execution_ms: opt_u64(row, 7, "execution_ms")?,
        tokens_processed: opt_u64(row, 8, "tokens_processed")?,
        success: row_helpers::get(row, 9, TABLE, "success")?,
        error_message: row_helpers::get_opt(row, 10, TABLE, "error_message")?,
        created_at: row_helpers::parse_timestamp(&created_at, TABLE, "created_at")?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 4, 10, 8, 0, 0).unwrap()
    }

    fn record(principal: &str, op: OperationKind, minutes: i64, success: bool) -> UsageRecord {
        UsageRecord {
            id: RecordId::new(),
            principal: principal.into(),
            session_id: SessionId::from_raw("sess_1"),
            operation: op,
            model: Some("minilm".into()),
            input_length: Some(42),
            batch_size: None,
            execution_ms: Some(10 * (minutes as u64 + 1)),
            tokens_processed: Some(9),
            success,
            error_message: (!success).then(|| "boom".to_string()),
            created_at: t0() + chrono::Duration::minutes(minutes),
        }
    }

    fn setup() -> UsageRepo {
        UsageRepo::new(Database::in_memory().unwrap())
    }

    #[test]
    fn insert_and_read_back() {
        let repo = setup();
        let original = record("APP", OperationKind::EmbedSingle, 0, true);
        assert_eq!(repo.insert_batch(std::slice::from_ref(&original)).unwrap(), 1);
        let rows = repo.query(&UsageQuery::default()).unwrap();
        assert_eq!(rows, vec![original]);
    }

    #[test]
    fn nullable_fields_roundtrip() {
        let repo = setup();
        let mut r = record("APP", OperationKind::Similarity, 0, true);
        r.model = None;
        r.input_length = None;
        r.execution_ms = None;
        r.tokens_processed = None;
        r.batch_size = Some(3);
        repo.insert_batch(std::slice::from_ref(&r)).unwrap();
        assert_eq!(repo.query(&UsageQuery::default()).unwrap(), vec![r]);
    }

    #[test]
    fn batch_insert_is_atomic() {
        let repo = setup();
        let a = record("APP", OperationKind::EmbedSingle, 0, true);
        let dup = a.clone();
        assert!(repo.insert_batch(&[a, dup]).is_err());
        assert_eq!(repo.count().unwrap(), 0);
    }

    #[test]
    fn query_filters_and_orders_newest_first() {
        let repo = setup();
        repo.insert_batch(&[
            record("ALICE", OperationKind::EmbedSingle, 0, true),
            record("BOB", OperationKind::EmbedSingle, 1, true),
            record("ALICE", OperationKind::EmbedBatch, 2, false),
            record("ALICE", OperationKind::EmbedSingle, 3, true),
        ])
        .unwrap();

        let alice = repo
            .query(&UsageQuery {
                principal: Some("ALICE".into()),
                ..Default::default()
            })
            .unwrap();
        assert_eq!(alice.len(), 3);
        assert!(alice[0].created_at > alice[1].created_at);

        let failures = repo
            .query(&UsageQuery {
                success: Some(false),
                ..Default::default()
            })
            .unwrap();
        assert_eq!(failures.len(), 1);
        assert_eq!(failures[0].operation, OperationKind::EmbedBatch);

        let singles_since = repo
            .query(&UsageQuery {
                operation: Some(OperationKind::EmbedSingle),
                since: Some(t0() + chrono::Duration::minutes(1)),
                limit: Some(1),
                ..Default::default()
            })
            .unwrap();
        assert_eq!(singles_since.len(), 1);
        assert_eq!(singles_since[0].principal, "ALICE");
    }

    #[test]
    fn records_between_is_half_open() {
        let repo = setup();
        repo.insert_batch(&[
            record("A", OperationKind::EmbedSingle, 0, true),
            record("A", OperationKind::EmbedSingle, 5, true),
            record("A", OperationKind::EmbedSingle, 10, true),
        ])
        .unwrap();
        let rows = repo
            .records_between(&t0(), &(t0() + chrono::Duration::minutes(10)))
            .unwrap();
        assert_eq!(rows.len(), 2);
        assert!(rows[0].created_at < rows[1].created_at);
    }

    #[test]
    fn summary_for_principal() {
        let repo = setup();
        repo.insert_batch(&[
            record("ALICE", OperationKind::EmbedSingle, 0, true),
            record("ALICE", OperationKind::EmbedSingle, 1, false),
            record("BOB", OperationKind::EmbedSingle, 2, true),
        ])
        .unwrap();
        let summary = repo.summary("ALICE", None).unwrap();
        assert_eq!(summary.total_calls, 2);
        assert_eq!(summary.failed_calls, 1);
        assert_eq!(summary.total_tokens, 18);
        assert_eq!(summary.avg_latency_ms, Some(15.0));

        let later = t0() + chrono::Duration::minutes(1);
        assert_eq!(repo.summary("ALICE", Some(&later)).unwrap().total_calls, 1);
    }

    #[test]
    fn summary_empty() {
        let summary = setup().summary("NOBODY", None).unwrap();
        assert_eq!(summary, UsageSummary::default());
    }

    #[test]
    fn delete_is_inclusive_of_cutoff() {
        let repo = setup();
        repo.insert_batch(&[
            record("A", OperationKind::EmbedSingle, 0, true),
            record("A", OperationKind::EmbedSingle, 1, true),
            record("A", OperationKind::EmbedSingle, 2, true),
        ])
        .unwrap();
        let deleted = repo
            .delete_at_or_before(&(t0() + chrono::Duration::minutes(1)))
            .unwrap();
        assert_eq!(deleted, 2);
        assert_eq!(repo.count().unwrap(), 1);
    }
}
