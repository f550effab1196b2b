//! Error taxonomy surfaced by the vector service facade.
//!
//! Validation errors fail fast before any backend call. Backend failures are
//! logged before they are surfaced. Audit-logging failures never appear here.

use thiserror::Error;

/// Errors returned by facade operations.
#[derive(Clone, Debug, PartialEq, Error)]
pub enum ServiceError {
    /// The model is not registered, or is registered but inactive.
    #[error("model not found or inactive: {0}")]
    ModelNotFound(String),

    /// Malformed input: empty text, bad chunking parameters, bad vectors.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// Estimated tokens exceed the model's limit. Chunk and retry.
    #[error("text too long: ~{estimated} tokens exceeds limit of {limit}")]
    TextTooLong { estimated: usize, limit: usize },

    /// Batch larger than the fixed cap. Split and retry.
    #[error("batch size {size} exceeds limit of {limit}")]
    BatchSizeExceeded { size: usize, limit: usize },

    /// The embedding backend failed; carries the backend's diagnostic.
    #[error("embedding failed: {0}")]
    EmbeddingFailed(String),

    /// The vector store failed to run a scan.
    #[error("search failed: {0}")]
    SearchFailed(String),
}

impl ServiceError {
    /// Whether retrying the same call unchanged could succeed.
    ///
    /// The facade itself never retries; this is advice for callers.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::EmbeddingFailed(_) | Self::SearchFailed(_))
    }

    /// Short classification string for logging and usage records.
    pub fn error_kind(&self) -> &'static str {
        match self {
            Self::ModelNotFound(_) => "model_not_found",
            Self::InvalidArgument(_) => "invalid_argument",
            Self::TextTooLong { .. } => "text_too_long",
            Self::BatchSizeExceeded { .. } => "batch_size_exceeded",
            Self::EmbeddingFailed(_) => "embedding_failed",
            Self::SearchFailed(_) => "search_failed",
        }
    }
}

/// Result alias for facade operations.
pub type Result<T> = std::result::Result<T, ServiceError>;
