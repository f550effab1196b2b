//! Offline daily rollups over the usage log, and retention cleanup.

use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

use chrono::{Duration, NaiveDate};
use tracing::{info, instrument};

use vectorhub_core::{Clock, PerformanceMetric, UsageRecord};
use vectorhub_store::{Database, MetricsRepo, StoreError, UsageRepo};

/// Linear-interpolated percentile of an ascending slice.
///
/// `p` is in `[0, 1]`; the rank is `p * (n - 1)` and the result interpolates
/// between the two closest ranks. `None` for an empty slice.
pub fn percentile(sorted: &[f64], p: f64) -> Option<f64> {
    if sorted.is_empty() {
        return None;
    }
    let rank = p.clamp(0.0, 1.0) * (sorted.len() - 1) as f64;
    let lo = rank.floor() as usize;
    let hi = rank.ceil() as usize;
    let frac = rank - lo as f64;
    Some(sorted[lo] + (sorted[hi] - sorted[lo]) * frac)
}

/// Recomputes [`PerformanceMetric`] rows from raw usage records.
pub struct MetricsAggregator {
    usage: UsageRepo,
    metrics: MetricsRepo,
    clock: Arc<dyn Clock>,
}

impl MetricsAggregator {
    /// Aggregator over `db`, using `clock` for retention cutoffs.
    pub fn new(db: Database, clock: Arc<dyn Clock>) -> Self {
        Self {
            usage: UsageRepo::new(db.clone()),
            metrics: MetricsRepo::new(db),
            clock,
        }
    }

    /// Recompute every model's rollup for `date` (UTC). Returns rows written.
    ///
    /// Existing rows for the day are replaced in one transaction, so running
    /// this twice gives the same result. Records with no model are skipped.
    #[instrument(skip(self), fields(date = %date))]
    pub fn aggregate_day(&self, date: NaiveDate) -> Result<usize, StoreError> {
        let start = date.and_time(chrono::NaiveTime::MIN).and_utc();
        let end = start + Duration::days(1);
        let records = self.usage.records_between(&start, &end)?;
        let rows = summarize_day(date, &records);
        let written = self.metrics.replace_day(date, &rows)?;
        info!(records = records.len(), rows = written, "daily metrics aggregated");
        Ok(written)
    }

    /// Delete usage records at or before `now - retention_days`.
    ///
    /// Aggregated rows are never touched. Returns the number deleted.
    #[instrument(skip(self))]
    pub fn cleanup(&self, retention_days: u32) -> Result<usize, StoreError> {
        let cutoff = self.clock.now() - Duration::days(i64::from(retention_days));
        let deleted = self.usage.delete_at_or_before(&cutoff)?;
        info!(deleted, cutoff = %cutoff, "usage records cleaned up");
        Ok(deleted)
    }

    /// The clock cutoffs are computed against.
    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }
}

/// Group a day's records by model and compute one rollup per model.
pub fn summarize_day(date: NaiveDate, records: &[UsageRecord]) -> Vec<PerformanceMetric> {
    let mut by_model: BTreeMap<&str, Vec<&UsageRecord>> = BTreeMap::new();
    for record in records {
        if let Some(model) = record.model.as_deref() {
            by_model.entry(model).or_default().push(record);
        }
    }

    by_model
        .into_iter()
        .map(|(model, group)| {
            let successful = group.iter().filter(|r| r.success).count() as u64;
            let total = group.len() as u64;
            let mut latencies: Vec<f64> = group
                .iter()
                .filter_map(|r| r.execution_ms)
                .map(|ms| ms as f64)
                .collect();
            latencies.sort_by(f64::total_cmp);
            let avg = (!latencies.is_empty())
                .then(|| latencies.iter().sum::<f64>() / latencies.len() as f64);
            let callers: HashSet<&str> = group.iter().map(|r| r.principal.as_str()).collect();

            PerformanceMetric {
                model: model.to_string(),
                metric_date: date,
                total_calls: total,
                successful_calls: successful,
                failed_calls: total - successful,
                avg_latency_ms: avg,
                min_latency_ms: latencies.first().copied(),
                max_latency_ms: latencies.last().copied(),
                p95_latency_ms: percentile(&latencies, 0.95),
                p99_latency_ms: percentile(&latencies, 0.99),
                total_tokens: group.iter().filter_map(|r| r.tokens_processed).sum(),
                distinct_callers: callers.len() as u64,
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{DateTime, TimeZone, Utc};
    use vectorhub_core::{FixedClock, OperationKind, RecordId, SessionId};

    fn day() -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 7, 14).unwrap()
    }

    fn at(hour: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 7, 14, hour, 0, 0).unwrap()
    }

    fn record(
        principal: &str,
        model: Option<&str>,
        latency: Option<u64>,
        success: bool,
        created_at: DateTime<Utc>,
    ) -> UsageRecord {
        UsageRecord {
            id: RecordId::new(),
            principal: principal.into(),
            session_id: SessionId::from_raw("sess_x"),
            operation: OperationKind::EmbedSingle,
            model: model.map(String::from),
            input_length: Some(10),
            batch_size: None,
            execution_ms: latency,
            tokens_processed: Some(2),
            success,
            error_message: None,
            created_at,
        }
    }

    #[test]
    fn percentile_hand_computed() {
        let v = [10.0, 20.0, 30.0, 40.0];
        // rank = 0.95 * 3 = 2.85 -> 30 + 0.85 * 10
        assert!((percentile(&v, 0.95).unwrap() - 38.5).abs() < 1e-9);
        // rank = 0.99 * 3 = 2.97
        assert!((percentile(&v, 0.99).unwrap() - 39.7).abs() < 1e-9);
        assert_eq!(percentile(&v, 0.0), Some(10.0));
        assert_eq!(percentile(&v, 1.0), Some(40.0));
        assert_eq!(percentile(&v, 0.5), Some(25.0));
    }

    #[test]
    fn percentile_edge_cases() {
        assert_eq!(percentile(&[], 0.5), None);
        assert_eq!(percentile(&[7.0], 0.99), Some(7.0));
    }

    #[test]
    fn summarize_groups_by_model_and_skips_unmodelled() {
        let records = vec![
            record("A", Some("m1"), Some(10), true, at(1)),
            record("B", Some("m1"), Some(30), false, at(2)),
            record("A", Some("m1"), None, true, at(3)),
            record("A", Some("m2"), Some(5), true, at(4)),
            record("C", None, Some(99), true, at(5)),
        ];
        let rows = summarize_day(day(), &records);
        assert_eq!(rows.len(), 2);

        let m1 = &rows[0];
        assert_eq!(m1.model, "m1");
        assert_eq!(m1.total_calls, 3);
        assert_eq!(m1.successful_calls, 2);
        assert_eq!(m1.failed_calls, 1);
        assert_eq!(m1.avg_latency_ms, Some(20.0));
        assert_eq!(m1.min_latency_ms, Some(10.0));
        assert_eq!(m1.max_latency_ms, Some(30.0));
        assert_eq!(m1.total_tokens, 6);
        assert_eq!(m1.distinct_callers, 2);

        assert_eq!(rows[1].model, "m2");
        assert_eq!(rows[1].total_calls, 1);
    }

    #[test]
    fn summarize_without_latencies() {
        let rows = summarize_day(day(), &[record("A", Some("m"), None, false, at(1))]);
        assert_eq!(rows[0].avg_latency_ms, None);
        assert_eq!(rows[0].p95_latency_ms, None);
        assert_eq!(rows[0].failed_calls, 1);
    }

    fn seeded() -> (MetricsAggregator, UsageRepo, MetricsRepo, Arc<FixedClock>) {
        let db = Database::in_memory().unwrap();
        let clock = Arc::new(FixedClock::new(at(23)));
        let usage = UsageRepo::new(db.clone());
        usage
            .insert_batch(&[
                record("A", Some("m1"), Some(10), true, at(0)),
                record("B", Some("m1"), Some(20), true, at(12)),
                record("A", Some("m1"), Some(30), true, at(23)),
                // previous and next day
                record("A", Some("m1"), Some(1000), true, at(0) - Duration::seconds(1)),
                record("A", Some("m1"), Some(1000), true, at(0) + Duration::days(1)),
            ])
            .unwrap();
        let aggregator = MetricsAggregator::new(db.clone(), clock.clone());
        (aggregator, usage, MetricsRepo::new(db), clock)
    }

    #[test]
    fn aggregate_day_uses_utc_day_bounds() {
        let (aggregator, _, metrics, _) = seeded();
        assert_eq!(aggregator.aggregate_day(day()).unwrap(), 1);
        let rows = metrics.for_day(day()).unwrap();
        assert_eq!(rows[0].total_calls, 3);
        assert_eq!(rows[0].max_latency_ms, Some(30.0));
        assert_eq!(rows[0].distinct_callers, 2);
    }

    #[test]
    fn aggregate_day_is_idempotent() {
        let (aggregator, _, metrics, _) = seeded();
        let _ = aggregator.aggregate_day(day()).unwrap();
        let first = metrics.for_day(day()).unwrap();
        let _ = aggregator.aggregate_day(day()).unwrap();
        let second = metrics.for_day(day()).unwrap();
        assert_eq!(first, second);
        assert_eq!(second.len(), 1);
    }

    #[test]
    fn aggregate_empty_day_clears_rows() {
        let (aggregator, usage, metrics, clock) = seeded();
        let _ = aggregator.aggregate_day(day()).unwrap();
        clock.set(at(0) + Duration::days(30));
        let _ = aggregator.cleanup(0).unwrap();
        assert_eq!(usage.count().unwrap(), 0);
        assert_eq!(aggregator.aggregate_day(day()).unwrap(), 0);
        assert!(metrics.for_day(day()).unwrap().is_empty());
    }

    #[test]
    fn cleanup_respects_retention_and_keeps_metrics() {
        let (aggregator, usage, metrics, clock) = seeded();
        let _ = aggregator.aggregate_day(day()).unwrap();

        // now = day + 1 at 12:00; keep one day -> cutoff = day at 12:00
        clock.set(at(12) + Duration::days(1));
        assert_eq!(aggregator.cleanup(1).unwrap(), 3);
        assert_eq!(usage.count().unwrap(), 2);
        assert_eq!(metrics.for_day(day()).unwrap().len(), 1);
    }

    #[test]
    fn cleanup_zero_days_deletes_everything_up_to_now() {
        let (aggregator, usage, _, clock) = seeded();
        clock.set(at(0) + Duration::days(1));
        assert_eq!(aggregator.cleanup(0).unwrap(), 5);
        assert_eq!(usage.count().unwrap(), 0);
    }
}
