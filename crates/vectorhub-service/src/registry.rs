//! Model name to embedding backend dispatch table.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use thiserror::Error;
use tracing::{info, instrument, warn};

use vectorhub_core::{Clock, ModelDescriptor, ServiceError};
use vectorhub_embeddings::Embedder;
use vectorhub_embeddings::text::DEFAULT_MAX_TOKENS;
use vectorhub_store::{ModelRepo, StoreError};

/// Errors from registry administration.
#[derive(Debug, Error)]
pub enum RegistryError {
    /// Registration parameters are unusable.
    #[error("invalid model registration: {0}")]
    Invalid(String),

    /// No model with this name is registered.
    #[error("unknown model: {0}")]
    UnknownModel(String),

    /// Write-through to the model table failed.
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// A resolved model: its descriptor and the backend that serves it.
#[derive(Clone)]
pub struct RegisteredModel {
    /// Current descriptor.
    pub descriptor: ModelDescriptor,
    /// Backend to call.
    pub embedder: Arc<dyn Embedder>,
}

impl std::fmt::Debug for RegisteredModel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RegisteredModel")
            .field("descriptor", &self.descriptor)
            .finish_non_exhaustive()
    }
}

/// Registry of embedding models, populated at startup.
///
/// Reads are lock-shared; registration and (de)activation take the write
/// lock briefly. When built [`with_repo`](Self::with_repo), registration and
/// activation changes are persisted too.
pub struct ModelRegistry {
    models: RwLock<HashMap<String, RegisteredModel>>,
    repo: Option<ModelRepo>,
    clock: Arc<dyn Clock>,
    default_max_tokens: usize,
}

impl ModelRegistry {
    /// In-memory registry.
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            models: RwLock::new(HashMap::new()),
            repo: None,
            clock,
            default_max_tokens: DEFAULT_MAX_TOKENS,
        }
    }

    /// Registry that writes through to `repo`.
    pub fn with_repo(repo: ModelRepo, clock: Arc<dyn Clock>) -> Self {
        Self {
            models: RwLock::new(HashMap::new()),
            repo: Some(repo),
            clock,
            default_max_tokens: DEFAULT_MAX_TOKENS,
        }
    }

    /// Token limit used by [`Self::register_with_default_limit`].
    #[must_use]
    pub fn with_default_max_tokens(mut self, limit: usize) -> Self {
        self.default_max_tokens = limit;
        self
    }

    /// Register `name` with the registry's default token limit.
    pub fn register_with_default_limit(
        &self,
        name: &str,
        dimensions: usize,
        embedder: Arc<dyn Embedder>,
    ) -> Result<ModelDescriptor, RegistryError> {
        self.register(name, dimensions, self.default_max_tokens, embedder)
    }

    /// Register a model. New models start active.
    ///
    /// Re-registering replaces the backend and shape but keeps creation time,
    /// usage statistics and the active flag, in memory and in the repo. A
    /// deactivated model stays deactivated until [`Self::activate`].
    #[instrument(skip(self, embedder))]
    pub fn register(
        &self,
        name: &str,
        dimensions: usize,
        max_tokens: usize,
        embedder: Arc<dyn Embedder>,
    ) -> Result<ModelDescriptor, RegistryError> {
        if name.trim().is_empty() {
            return Err(RegistryError::Invalid("model name is empty".into()));
        }
        if dimensions == 0 {
            return Err(RegistryError::Invalid(format!(
                "{name}: dimensions must be positive"
            )));
        }
        if max_tokens == 0 {
            return Err(RegistryError::Invalid(format!(
                "{name}: max tokens must be positive"
            )));
        }

        let mut descriptor = match self.models.read().get(name) {
            Some(existing) => ModelDescriptor {
                dimensions,
                max_tokens,
                ..existing.descriptor.clone()
            },
            None => ModelDescriptor::new(name, dimensions, max_tokens, self.clock.now()),
        };

        if let Some(repo) = &self.repo {
            repo.upsert(&descriptor)?;
            descriptor = repo.get(name)?;
        }

        let _ = self.models.write().insert(
            name.to_string(),
            RegisteredModel {
                descriptor: descriptor.clone(),
                embedder,
            },
        );
        info!(model = name, dimensions, max_tokens, "model registered");
        Ok(descriptor)
    }

    /// Allow requests for `name` again.
    pub fn activate(&self, name: &str) -> Result<(), RegistryError> {
        self.set_active(name, true)
    }

    /// Reject every request for `name` until reactivated. Never deletes.
    pub fn deactivate(&self, name: &str) -> Result<(), RegistryError> {
        self.set_active(name, false)
    }

    #[instrument(skip(self))]
    fn set_active(&self, name: &str, active: bool) -> Result<(), RegistryError> {
        if !self.models.read().contains_key(name) {
            return Err(RegistryError::UnknownModel(name.to_string()));
        }
        if let Some(repo) = &self.repo {
            repo.set_active(name, active)?;
        }
        if let Some(entry) = self.models.write().get_mut(name) {
            entry.descriptor.active = active;
        }
        info!(model = name, active, "model activation changed");
        Ok(())
    }

    /// Look up an active model for dispatch.
    pub fn resolve(&self, name: &str) -> Result<RegisteredModel, ServiceError> {
        match self.models.read().get(name) {
            Some(entry) if entry.descriptor.active => Ok(entry.clone()),
            _ => Err(ServiceError::ModelNotFound(name.to_string())),
        }
    }

    /// Descriptor of `name`, active or not.
    pub fn describe(&self, name: &str) -> Option<ModelDescriptor> {
        self.models.read().get(name).map(|e| e.descriptor.clone())
    }

    /// Every registered model, ordered by name.
    pub fn list(&self) -> Vec<ModelDescriptor> {
        let mut all: Vec<ModelDescriptor> = self
            .models
            .read()
            .values()
            .map(|e| e.descriptor.clone())
            .collect();
        all.sort_by(|a, b| a.name.cmp(&b.name));
        all
    }

    /// Fold one successful backend call into the rolling statistics.
    ///
    /// The repo write is best-effort: a failure is logged and the in-memory
    /// statistics are still updated.
    pub fn note_success(&self, name: &str, latency_ms: u64, at: DateTime<Utc>) {
        if let Some(entry) = self.models.write().get_mut(name) {
            let d = &mut entry.descriptor;
            let n = d.usage_count as f64;
            d.avg_latency_ms = (d.avg_latency_ms * n + latency_ms as f64) / (n + 1.0);
            d.usage_count += 1;
            if d.last_used_at.is_none_or(|prev| prev < at) {
                d.last_used_at = Some(at);
            }
        }
        if let Some(repo) = &self.repo {
            if let Err(e) = repo.record_success(name, latency_ms, &at) {
                warn!(model = name, error = %e, "model stats write failed");
            }
        }
    }
}
