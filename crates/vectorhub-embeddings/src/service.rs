//! Embedder capability and mock implementation.

use async_trait::async_trait;
use parking_lot::Mutex;
use sha2::{Digest, Sha256};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use crate::errors::{EmbeddingError, Result};
use crate::normalize::l2_normalize;

/// Backend that turns text into vectors for a named model.
///
/// Implementations own the model runtime. The facade resolves which
/// embedder serves a model before calling it, so `model` is informational
/// for single-model backends.
#[async_trait]
pub trait Embedder: Send + Sync {
    /// Embed one text with the given model.
    async fn embed(&self, text: &str, model: &str) -> Result<Vec<f32>>;

    /// Whether the backend is ready for inference.
    fn is_ready(&self) -> bool {
        true
    }
}

/// Mock embedder for testing.
///
/// Generates deterministic embeddings by hashing input text with SHA-256,
/// using the hash bytes as seeds for the vector components.
pub struct MockEmbedder {
    dims: usize,
    ready: AtomicBool,
    calls: AtomicUsize,
    fail_on: Mutex<Option<String>>,
}

impl MockEmbedder {
    /// Create a new mock embedder with the given dimensions.
    pub fn new(dims: usize) -> Self {
        Self {
            dims,
            ready: AtomicBool::new(true),
            calls: AtomicUsize::new(0),
            fail_on: Mutex::new(None),
        }
    }

    /// Set whether this mock is ready.
    pub fn set_ready(&self, ready: bool) {
        self.ready.store(ready, Ordering::SeqCst);
    }

    /// Fail inference for any text containing `needle`.
    pub fn fail_on(&self, needle: impl Into<String>) {
        *self.fail_on.lock() = Some(needle.into());
    }

    /// Number of `embed` calls received, including failed ones.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Output dimensionality.
    pub fn dimensions(&self) -> usize {
        self.dims
    }

    fn hash_to_vector(&self, text: &str) -> Vec<f32> {
        let mut hasher = Sha256::new();
        hasher.update(text.as_bytes());
        let hash = hasher.finalize();

        let mut v: Vec<f32> = (0..self.dims)
            .map(|i| {
                let byte_idx = i % hash.len();
                // Map byte to [-1, 1] range
                (f32::from(hash[byte_idx]) / 127.5) - 1.0
            })
            .collect();

        l2_normalize(&mut v);
        v
    }
}

#[async_trait]
impl Embedder for MockEmbedder {
    async fn embed(&self, text: &str, model: &str) -> Result<Vec<f32>> {
        let _ = self.calls.fetch_add(1, Ordering::SeqCst);
        if !self.is_ready() {
            return Err(EmbeddingError::NotReady);
        }
        if let Some(needle) = self.fail_on.lock().as_deref() {
            if text.contains(needle) {
                return Err(EmbeddingError::Inference(format!(
                    "{model}: rejected input containing {needle:?}"
                )));
            }
        }
        Ok(self.hash_to_vector(text))
    }

    fn is_ready(&self) -> bool {
        self.ready.load(Ordering::SeqCst)
    }
}
