//! Daily performance rollups, one row per (model, day).

use chrono::NaiveDate;
use rusqlite::params;
use rusqlite::types::ToSql;
use tracing::instrument;

use vectorhub_core::PerformanceMetric;

use crate::database::Database;
use crate::error::StoreError;
use crate::row_helpers;

const TABLE: &str = "performance_metrics";
const COLUMNS: &str = "model, metric_date, total_calls, successful_calls, failed_calls,
    avg_latency_ms, min_latency_ms, max_latency_ms, p95_latency_ms, p99_latency_ms,
    total_tokens, distinct_callers";

/// Filter for [`MetricsRepo::query`].
#[derive(Clone, Debug, Default)]
pub struct MetricsQuery {
    /// Only this model.
    pub model: Option<String>,
    /// Inclusive first day.
    pub from: Option<NaiveDate>,
    /// Inclusive last day.
    pub to: Option<NaiveDate>,
    /// Maximum rows returned (default 100).
    pub limit: Option<u32>,
}

/// Repository for `performance_metrics`.
#[derive(Clone)]
pub struct MetricsRepo {
    db: Database,
}

impl MetricsRepo {
    /// Repository over `db`.
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Replace every row for `date` with `rows`, atomically.
    ///
    /// Rows whose `metric_date` differs from `date` are rejected.
    #[instrument(skip(self, rows), fields(date = %date, count = rows.len()))]
    pub fn replace_day(
        &self,
        date: NaiveDate,
        rows: &[PerformanceMetric],
    ) -> Result<usize, StoreError> {
        if let Some(stray) = rows.iter().find(|r| r.metric_date != date) {
            return Err(StoreError::Conflict(format!(
                "metric for {} does not belong to {date}",
                stray.metric_date
            )));
        }
        let day = row_helpers::to_db_date(date);
        self.db.transaction(|conn| {
            let _ = conn.execute(
                "DELETE FROM performance_metrics WHERE metric_date = ?1",
                [&day],
            )?;
            let mut stmt = conn.prepare(
                "INSERT INTO performance_metrics (model, metric_date, total_calls,
                    successful_calls, failed_calls, avg_latency_ms, min_latency_ms,
                    max_latency_ms, p95_latency_ms, p99_latency_ms, total_tokens, distinct_callers)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
            )?;
            for m in rows {
                let _ = stmt.execute(params![
                    m.model,
                    day,
                    m.total_calls as i64,
                    m.successful_calls as i64,
                    m.failed_calls as i64,
                    m.avg_latency_ms,
                    m.min_latency_ms,
                    m.max_latency_ms,
                    m.p95_latency_ms,
                    m.p99_latency_ms,
                    m.total_tokens as i64,
                    m.distinct_callers as i64,
                ])?;
            }
            Ok(rows.len())
        })
    }

    /// Rollups matching `q`, newest day first then by model.
    #[instrument(skip(self))]
    pub fn query(&self, q: &MetricsQuery) -> Result<Vec<PerformanceMetric>, StoreError> {
        self.db.with_conn(|conn| {
            let mut sql = format!("SELECT {COLUMNS} FROM performance_metrics WHERE 1=1");
            let mut params: Vec<Box<dyn ToSql>> = Vec::new();

            if let Some(model) = &q.model {
                sql.push_str(&format!(" AND model = ?{}", params.len() + 1));
                params.push(Box::new(model.clone()));
            }
            if let Some(from) = q.from {
                sql.push_str(&format!(" AND metric_date >= ?{}", params.len() + 1));
                params.push(Box::new(row_helpers::to_db_date(from)));
            }
            if let Some(to) = q.to {
                sql.push_str(&format!(" AND metric_date <= ?{}", params.len() + 1));
                params.push(Box::new(row_helpers::to_db_date(to)));
            }

            sql.push_str(" ORDER BY metric_date DESC, model ASC");
            let limit = q.limit.unwrap_or(100);
            sql.push_str(&format!(" LIMIT {limit}"));

            let param_refs: Vec<&dyn ToSql> = params.iter().map(|p| p.as_ref()).collect();
            let mut stmt = conn.prepare(&sql)?;
            let mut rows = stmt.query(param_refs.as_slice())?;
            let mut results = Vec::new();
            while let Some(row) = rows.next()? {
                results.push(row_to_metric(row)?);
            }
            Ok(results)
        })
    }

    /// All rollups for one day, ordered by model.
    pub fn for_day(&self, date: NaiveDate) -> Result<Vec<PerformanceMetric>, StoreError> {
        let mut rows = self.query(&MetricsQuery {
            from: Some(date),
            to: Some(date),
            limit: Some(u32::MAX),
            ..Default::default()
        })?;
        rows.sort_by(|a, b| a.model.cmp(&b.model));
        Ok(rows)
    }
}

fn counter(row: &rusqlite::Row<'_>, idx: usize, column: &'static str) -> Result<u64, StoreError> {
    let raw: i64 = row_helpers::get(row, idx, TABLE, column)?;
    row_helpers::to_u64(raw, TABLE, column)
}

fn row_to_metric(row: &rusqlite::Row<'_>) -> Result<PerformanceMetric, StoreError> {
    let date: String = row_helpers::get(row, 1, TABLE, "metric_date")?;
    Ok(PerformanceMetric {
        model: row_helpers::get(row, 0, TABLE, "model")?,
        metric_date: row_helpers::parse_date(&date, TABLE, "metric_date")?,
        total_calls: counter(row, 2, "total_calls")?,
        successful_calls: counter(row, 3, "successful_calls")?,
        failed_calls: counter(row, 4, "failed_calls")?,
        avg_latency_ms: row_helpers::get_opt(row, 5, TABLE, "avg_latency_ms")?,
        min_latency_ms: row_helpers::get_opt(row, 6, TABLE, "min_latency_ms")?,
        max_latency_ms: row_helpers::get_opt(row, 7, TABLE, "max_latency_ms")?,
        p95_latency_ms: row_helpers::get_opt(row, 8, TABLE, "p95_latency_ms")?,
        p99_latency_ms: row_helpers::get_opt(row, 9, TABLE, "p99_latency_ms")?,
        total_tokens: counter(row, 10, "total_tokens")?,
        distinct_callers: counter(row, 11, "distinct_callers")?,
    })
}
