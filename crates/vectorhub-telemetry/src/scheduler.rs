//! Periodic aggregation and retention task.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use vectorhub_settings::MetricsSettings;

use crate::aggregator::MetricsAggregator;

/// Maintenance cadence and retention.
#[derive(Clone, Debug)]
pub struct MaintenanceConfig {
    /// Time between runs. The first run starts immediately.
    pub interval: Duration,
    /// Days of raw usage kept by cleanup.
    pub retention_days: u32,
}

impl Default for MaintenanceConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(3600),
            retention_days: 90,
        }
    }
}

impl MaintenanceConfig {
    /// Build from settings.
    pub fn from_settings(settings: &MetricsSettings) -> Self {
        Self {
            interval: Duration::from_secs(settings.maintenance_interval_secs.max(1)),
            retention_days: settings.retention_days,
        }
    }
}

/// What one maintenance pass did.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct MaintenanceReport {
    /// Metric rows written across the aggregated days.
    pub rows_written: usize,
    /// Usage records removed by cleanup.
    pub records_deleted: usize,
    /// Steps that failed (each is logged).
    pub failures: usize,
}

/// Aggregate yesterday and today, then apply retention.
///
/// Failures are logged and counted; later steps still run.
pub fn run_maintenance(aggregator: &MetricsAggregator, config: &MaintenanceConfig) -> MaintenanceReport {
    let today = aggregator.clock().now().date_naive();
    let mut report = MaintenanceReport::default();

    for date in [today.pred_opt(), Some(today)].into_iter().flatten() {
        match aggregator.aggregate_day(date) {
            Ok(rows) => report.rows_written += rows,
            Err(e) => {
                report.failures += 1;
                warn!(date = %date, error = %e, "daily aggregation failed");
            }
        }
    }

    match aggregator.cleanup(config.retention_days) {
        Ok(deleted) => report.records_deleted = deleted,
        Err(e) => {
            report.failures += 1;
            warn!(error = %e, "usage cleanup failed");
        }
    }
    report
}

/// Run [`run_maintenance`] every `config.interval` until `cancel` fires.
pub fn spawn_maintenance(
    aggregator: Arc<MetricsAggregator>,
    config: MaintenanceConfig,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(config.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        loop {
            tokio::select! {
                () = cancel.cancelled() => break,
                _ = ticker.tick() => {
                    let aggregator = Arc::clone(&aggregator);
                    let config = config.clone();
                    match tokio::task::spawn_blocking(move || run_maintenance(&aggregator, &config)).await {
                        Ok(report) => info!(
                            rows = report.rows_written,
                            deleted = report.records_deleted,
                            failures = report.failures,
                            "maintenance pass complete"
                        ),
                        Err(e) => warn!(error = %e, "maintenance pass panicked"),
                    }
                }
            }
        }
        info!("maintenance task stopped");
    })
}
