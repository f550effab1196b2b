//! Settings type definitions.
//!
//! All types use `#[serde(rename_all = "camelCase")]` and `#[serde(default)]`
//! so partial JSON files only need the keys they change.

mod service;
mod telemetry;

pub use service::*;
pub use telemetry::*;

use serde::{Deserialize, Serialize};

use crate::errors::{Result, SettingsError};

/// Root settings type for the vectorhub service.
///
/// ```json
/// {
///   "service": { "defaultModel": "all_minilm_l12_v2" },
///   "search": { "topK": 5 }
/// }
/// ```
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct VectorHubSettings {
    /// Settings schema version.
    pub version: String,
    /// Facade limits and defaults.
    pub service: ServiceSettings,
    /// Token estimation and chunking.
    pub text: TextSettings,
    /// Similarity search defaults.
    pub search: SearchSettings,
    /// Usage recorder buffering.
    pub recorder: RecorderSettings,
    /// Daily aggregation and retention.
    pub metrics: MetricsSettings,
    /// Usage database location.
    pub database: DatabaseSettings,
    /// Operational log output.
    pub logging: LoggingSettings,
}

impl Default for VectorHubSettings {
    fn default() -> Self {
        Self {
            version: "0.1.0".to_string(),
            service: ServiceSettings::default(),
            text: TextSettings::default(),
            search: SearchSettings::default(),
            recorder: RecorderSettings::default(),
            metrics: MetricsSettings::default(),
            database: DatabaseSettings::default(),
            logging: LoggingSettings::default(),
        }
    }
}

impl VectorHubSettings {
    /// Reject combinations no component can run with.
    pub fn validate(&self) -> Result<()> {
        if self.text.chunk_size_tokens == 0 {
            return Err(SettingsError::InvalidValue(
                "text.chunkSizeTokens must be positive".into(),
            ));
        }
        if self.text.chunk_overlap_tokens >= self.text.chunk_size_tokens {
            return Err(SettingsError::InvalidValue(format!(
                "text.chunkOverlapTokens ({}) must be smaller than text.chunkSizeTokens ({})",
                self.text.chunk_overlap_tokens, self.text.chunk_size_tokens
            )));
        }
        if !(-1.0..=1.0).contains(&self.search.threshold) {
            return Err(SettingsError::InvalidValue(format!(
                "search.threshold {} outside [-1, 1]",
                self.search.threshold
            )));
        }
        if self.search.top_k == 0 || self.search.top_k > self.service.max_top_k {
            return Err(SettingsError::InvalidValue(format!(
                "search.topK {} outside 1..={}",
                self.search.top_k, self.service.max_top_k
            )));
        }
        if self.recorder.batch_size == 0 || self.recorder.channel_capacity == 0 {
            return Err(SettingsError::InvalidValue(
                "recorder.batchSize and recorder.channelCapacity must be positive".into(),
            ));
        }
        Ok(())
    }
}
