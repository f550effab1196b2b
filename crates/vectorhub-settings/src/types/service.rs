//! Facade, text, and search settings.

use serde::{Deserialize, Serialize};

/// Facade limits and defaults.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ServiceSettings {
    /// Model used when a call names none.
    pub default_model: String,
    /// Largest accepted batch for `generate_embedding_batch`.
    pub max_batch_size: usize,
    /// Largest accepted `top_k` for searches.
    pub max_top_k: usize,
    /// Text embedded by `health_check`.
    pub health_probe_text: String,
}

impl Default for ServiceSettings {
    fn default() -> Self {
        Self {
            default_model: "all_minilm_l12_v2".to_string(),
            max_batch_size: 100,
            max_top_k: 1000,
            health_probe_text: "health check".to_string(),
        }
    }
}

/// Token estimation and chunking defaults.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TextSettings {
    /// Token limit for models registered without an explicit one.
    pub default_max_tokens: usize,
    /// Chunk window, in estimated tokens.
    pub chunk_size_tokens: usize,
    /// Overlap between consecutive chunks, in estimated tokens.
    pub chunk_overlap_tokens: usize,
}

impl Default for TextSettings {
    fn default() -> Self {
        Self {
            default_max_tokens: 512,
            chunk_size_tokens: 512,
            chunk_overlap_tokens: 50,
        }
    }
}

/// Similarity search defaults.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SearchSettings {
    /// Results returned when the caller does not say.
    pub top_k: usize,
    /// Minimum cosine similarity for a hit.
    pub threshold: f32,
}

impl Default for SearchSettings {
    fn default() -> Self {
        Self {
            top_k: 10,
            threshold: 0.7,
        }
    }
}
