//! Usage recording, metrics, database, and logging settings.

use serde::{Deserialize, Serialize};

/// Usage recorder buffering.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RecorderSettings {
    /// When false, usage events are discarded.
    pub enabled: bool,
    /// Buffered records that trigger a flush.
    pub batch_size: usize,
    /// Periodic flush interval in milliseconds.
    pub flush_interval_ms: u64,
    /// Pending events held before new ones are dropped.
    pub channel_capacity: usize,
}

impl Default for RecorderSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            batch_size: 100,
            flush_interval_ms: 1000,
            channel_capacity: 10_000,
        }
    }
}

/// Daily aggregation and retention.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct MetricsSettings {
    /// Raw usage records older than this are deleted by cleanup.
    pub retention_days: u32,
    /// How often the maintenance task runs, in seconds.
    pub maintenance_interval_secs: u64,
}

impl Default for MetricsSettings {
    fn default() -> Self {
        Self {
            retention_days: 90,
            maintenance_interval_secs: 3600,
        }
    }
}

/// Usage database location.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DatabaseSettings {
    /// Path to the usage database (relative to `~/.vectorhub`).
    pub path: String,
}

impl Default for DatabaseSettings {
    fn default() -> Self {
        Self {
            path: "database/usage.db".to_string(),
        }
    }
}

/// Operational log output.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LoggingSettings {
    /// Default level; `RUST_LOG` wins when set.
    pub level: String,
    /// Emit JSON lines instead of compact text.
    pub json: bool,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: true,
        }
    }
}

impl DatabaseSettings {
    /// Absolute database path; relative paths resolve under `~/.vectorhub`.
    pub fn resolved_path(&self) -> std::path::PathBuf {
        let path = std::path::PathBuf::from(&self.path);
        if path.is_absolute() {
            path
        } else {
            crate::loader::vectorhub_dir().join(path)
        }
    }
}
