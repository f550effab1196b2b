//! # vectorhub-telemetry
//!
//! Operational logging and the usage audit trail:
//! - [`init_telemetry`]: `tracing` subscriber with env filter and JSON output
//! - [`recorder`]: non-blocking, batched [`UsageRecorder`]
//! - [`aggregator`]: daily [`MetricsAggregator`] and retention cleanup
//! - [`scheduler`]: background maintenance task

#![deny(unsafe_code)]

pub mod aggregator;
pub mod recorder;
pub mod scheduler;

pub use aggregator::{MetricsAggregator, percentile};
pub use recorder::{RecorderConfig, SqliteUsageSink, UsageEvent, UsageRecorder, UsageSink};
pub use scheduler::{MaintenanceConfig, MaintenanceReport, run_maintenance, spawn_maintenance};

use tracing::Level;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::{SubscriberInitExt, TryInitError};
use tracing_subscriber::EnvFilter;
use vectorhub_settings::LoggingSettings;

/// Configuration for the operational log.
#[derive(Clone, Debug)]
pub struct TelemetryConfig {
    /// Default log level. Overridden by `RUST_LOG` env var.
    pub log_level: Level,
    /// Per-module level overrides (e.g. `"vectorhub_store" => DEBUG`).
    pub module_levels: Vec<(String, Level)>,
    /// JSON lines when true, compact text otherwise.
    pub json: bool,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            log_level: Level::INFO,
            module_levels: Vec::new(),
            json: true,
        }
    }
}

impl TelemetryConfig {
    /// Build from settings. An unparseable level falls back to INFO.
    pub fn from_settings(settings: &LoggingSettings) -> Self {
        let log_level = settings.level.parse().unwrap_or_else(|_| {
            eprintln!(
                "vectorhub-telemetry: unknown log level {:?}, using info",
                settings.level
            );
            Level::INFO
        });
        Self {
            log_level,
            module_levels: Vec::new(),
            json: settings.json,
        }
    }

    /// Filter directive string, e.g. `info,vectorhub_store=debug`.
    pub fn filter_directives(&self) -> String {
        let mut filter = self.log_level.to_string().to_lowercase();
        for (module, level) in &self.module_levels {
            filter.push_str(&format!(",{module}={}", level.to_string().to_lowercase()));
        }
        filter
    }
}

/// Install the global `tracing` subscriber. Call once at startup.
///
/// Fails if a global subscriber is already set.
pub fn init_telemetry(config: &TelemetryConfig) -> Result<(), TryInitError> {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.filter_directives()));

    let json_layer = config.json.then(|| {
        tracing_subscriber::fmt::layer()
            .json()
            .with_target(true)
            .with_span_list(true)
    });
    let compact_layer = (!config.json).then(|| tracing_subscriber::fmt::layer().compact());

    tracing_subscriber::registry()
        .with(env_filter)
        .with(json_layer)
        .with(compact_layer)
        .try_init()
}
