//! Embedding and vector-store error types.

use thiserror::Error;
use vectorhub_core::ServiceError;

/// Errors from embedding backends, vector math, and vector stores.
#[derive(Debug, Error)]
pub enum EmbeddingError {
    /// The backend cannot serve the requested model.
    #[error("Model unavailable: {0}")]
    ModelUnavailable(String),

    /// Inference failed.
    #[error("Inference failed: {0}")]
    Inference(String),

    /// Vector operands are unusable (dimension mismatch, zero magnitude).
    #[error("Invalid vector: {0}")]
    InvalidVector(String),

    /// Caller-supplied parameters are malformed.
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// `SQLite` error (preserves source chain).
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// Vector storage operation failed (non-SQLite).
    #[error("Storage failed: {0}")]
    Storage(String),

    /// Backend not ready (model not loaded).
    #[error("Embedding backend not ready")]
    NotReady,
}

/// Result alias for embedding operations.
pub type Result<T> = std::result::Result<T, EmbeddingError>;

impl From<EmbeddingError> for ServiceError {
    fn from(err: EmbeddingError) -> Self {
        match err {
            EmbeddingError::InvalidVector(_) | EmbeddingError::InvalidArgument(_) => {
                ServiceError::InvalidArgument(err.to_string())
            }
            EmbeddingError::ModelUnavailable(_)
            | EmbeddingError::Inference(_)
            | EmbeddingError::NotReady => ServiceError::EmbeddingFailed(err.to_string()),
            EmbeddingError::Sqlite(_) | EmbeddingError::Storage(_) => {
                ServiceError::SearchFailed(err.to_string())
            }
        }
    }
}
