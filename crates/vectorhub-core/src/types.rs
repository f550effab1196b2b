//! Persisted data model: registered models, usage facts, daily rollups.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::ids::{RecordId, SessionId};

/// Kind of operation a usage record describes.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OperationKind {
    /// One text embedded.
    EmbedSingle,
    /// A batch of texts embedded.
    EmbedBatch,
    /// Vector similarity scan.
    Similarity,
    /// Text query embedded then scanned.
    SemanticSearch,
    /// Backend probe.
    HealthCheck,
    /// Anything else.
    Other,
}

impl OperationKind {
    /// Stable storage / wire name.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::EmbedSingle => "EMBED_SINGLE",
            Self::EmbedBatch => "EMBED_BATCH",
            Self::Similarity => "SIMILARITY",
            Self::SemanticSearch => "SEMANTIC_SEARCH",
            Self::HealthCheck => "HEALTH_CHECK",
            Self::Other => "OTHER",
        }
    }
}

impl std::fmt::Display for OperationKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for OperationKind {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "EMBED_SINGLE" => Ok(Self::EmbedSingle),
            "EMBED_BATCH" => Ok(Self::EmbedBatch),
            "SIMILARITY" => Ok(Self::Similarity),
            "SEMANTIC_SEARCH" => Ok(Self::SemanticSearch),
            "HEALTH_CHECK" => Ok(Self::HealthCheck),
            "OTHER" => Ok(Self::Other),
            other => Err(format!("unknown operation kind: {other}")),
        }
    }
}

/// Outcome of a backend health probe.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum HealthStatus {
    /// Embedding works and the vector store answers.
    Healthy,
    /// Embedding works but something around it does not.
    Degraded,
    /// Embedding fails.
    Down,
}

impl std::fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Healthy => write!(f, "HEALTHY"),
            Self::Degraded => write!(f, "DEGRADED"),
            Self::Down => write!(f, "DOWN"),
        }
    }
}

/// A registered embedding model.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ModelDescriptor {
    /// Unique model name used for dispatch.
    pub name: String,
    /// Declared output dimensionality.
    pub dimensions: usize,
    /// Maximum estimated input tokens accepted per text.
    pub max_tokens: usize,
    /// Inactive models reject every request.
    pub active: bool,
    /// Registration time.
    pub created_at: DateTime<Utc>,
    /// Time of the most recent successful call.
    pub last_used_at: Option<DateTime<Utc>>,
    /// Successful calls so far.
    pub usage_count: u64,
    /// Running mean latency over successful calls.
    pub avg_latency_ms: f64,
}

impl ModelDescriptor {
    /// A fresh, active descriptor with no usage.
    pub fn new(
        name: impl Into<String>,
        dimensions: usize,
        max_tokens: usize,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            name: name.into(),
            dimensions,
            max_tokens,
            active: true,
            created_at,
            last_used_at: None,
            usage_count: 0,
            avg_latency_ms: 0.0,
        }
    }
}

/// One logged operation attempt. Immutable once written.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct UsageRecord {
    pub id: RecordId,
    pub principal: String,
    pub session_id: SessionId,
    pub operation: OperationKind,
    pub model: Option<String>,
    pub input_length: Option<u64>,
    pub batch_size: Option<u32>,
    pub execution_ms: Option<u64>,
    pub tokens_processed: Option<u64>,
    pub success: bool,
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Daily rollup of usage for one model.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PerformanceMetric {
    pub model: String,
    pub metric_date: NaiveDate,
    pub total_calls: u64,
    pub successful_calls: u64,
    pub failed_calls: u64,
    pub avg_latency_ms: Option<f64>,
    pub min_latency_ms: Option<f64>,
    pub max_latency_ms: Option<f64>,
    pub p95_latency_ms: Option<f64>,
    pub p99_latency_ms: Option<f64>,
    pub total_tokens: u64,
    pub distinct_callers: u64,
}

/// Usage totals for one caller over a window.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct UsageSummary {
    pub total_calls: u64,
    pub failed_calls: u64,
    pub total_tokens: u64,
    pub avg_latency_ms: Option<f64>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn operation_kind_roundtrip() {
        let all = [
            OperationKind::EmbedSingle,
            OperationKind::EmbedBatch,
            OperationKind::Similarity,
            OperationKind::SemanticSearch,
            OperationKind::HealthCheck,
            OperationKind::Other,
        ];
        for kind in all {
            let parsed: OperationKind = kind.as_str().parse().unwrap();
            assert_eq!(parsed, kind);
        }
    }

    #[test]
    fn operation_kind_unknown() {
        let err = "EMBED_ALL".parse::<OperationKind>().unwrap_err();
        assert!(err.contains("EMBED_ALL"));
    }

    #[test]
    fn operation_kind_serde_matches_storage_name() {
        let json = serde_json::to_string(&OperationKind::SemanticSearch).unwrap();
        assert_eq!(json, "\"SEMANTIC_SEARCH\"");
    }

    #[test]
    fn health_status_display() {
        assert_eq!(HealthStatus::Healthy.to_string(), "HEALTHY");
        assert_eq!(HealthStatus::Degraded.to_string(), "DEGRADED");
        assert_eq!(HealthStatus::Down.to_string(), "DOWN");
    }

    #[test]
    fn new_descriptor_is_active_and_unused() {
        let d = ModelDescriptor::new("minilm", 384, 512, Utc::now());
        assert!(d.active);
        assert_eq!(d.usage_count, 0);
        assert!(d.last_used_at.is_none());
    }
}
