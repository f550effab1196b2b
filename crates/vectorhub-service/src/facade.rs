//! The vector service facade.
//!
//! Every public operation follows the same shape: resolve the caller,
//! validate, call the backend, then hand exactly one usage event to the
//! [`UsageRecorder`]. Validation fails before any backend call. Failures are
//! recorded and then returned unchanged; recording itself never fails.

use std::pin::Pin;
use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Utc};
use futures::Stream;
use tracing::{debug, info, warn};

use vectorhub_core::{
    CallerContext, CallerIdentity, Clock, HealthStatus, OperationKind, PerformanceMetric, Result,
    ServiceError, UsageRecord, UsageSummary,
};
use vectorhub_embeddings::normalize::normalize;
use vectorhub_embeddings::text::{DEFAULT_CHUNK_OVERLAP, DEFAULT_CHUNK_SIZE, chunk, estimate_tokens};
use vectorhub_embeddings::{DistanceMetric, ScanRequest, ScanRow, TableRef, VectorStore, shape_rows};
use vectorhub_settings::{SearchSettings, VectorHubSettings};
use vectorhub_store::{
    Database, MetricsQuery, MetricsRepo, ModelRepo, StoreError, UsageQuery, UsageRepo,
};
use vectorhub_telemetry::{RecorderConfig, SqliteUsageSink, UsageEvent, UsageRecorder};

use crate::registry::{ModelRegistry, RegisteredModel};

/// Facade limits and defaults.
#[derive(Clone, Debug)]
pub struct ServiceConfig {
    /// Model used when a call names none.
    pub default_model: String,
    /// Largest batch accepted by [`VectorService::generate_embedding_batch`].
    pub max_batch_size: usize,
    /// Largest `top_k` accepted by searches.
    pub max_top_k: usize,
    /// Text embedded by [`VectorService::health_check`].
    pub health_probe_text: String,
    /// Chunk window for [`VectorService::embed_document`], in estimated tokens.
    pub chunk_size_tokens: usize,
    /// Overlap between document chunks, in estimated tokens.
    pub chunk_overlap_tokens: usize,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            default_model: "all_minilm_l12_v2".to_string(),
            max_batch_size: 100,
            max_top_k: 1000,
            health_probe_text: "health check".to_string(),
            chunk_size_tokens: DEFAULT_CHUNK_SIZE,
            chunk_overlap_tokens: DEFAULT_CHUNK_OVERLAP,
        }
    }
}

impl ServiceConfig {
    /// Build from settings.
    pub fn from_settings(settings: &VectorHubSettings) -> Self {
        Self {
            default_model: settings.service.default_model.clone(),
            max_batch_size: settings.service.max_batch_size,
            max_top_k: settings.service.max_top_k,
            health_probe_text: settings.service.health_probe_text.clone(),
            chunk_size_tokens: settings.text.chunk_size_tokens,
            chunk_overlap_tokens: settings.text.chunk_overlap_tokens,
        }
    }
}

/// Per-call embedding options.
#[derive(Clone, Debug)]
pub struct EmbedOptions {
    /// Model to use; the configured default when `None`.
    pub model: Option<String>,
    /// L2-normalize the returned vectors.
    pub normalize: bool,
    /// Write a usage record for the call.
    pub log: bool,
}

impl Default for EmbedOptions {
    fn default() -> Self {
        Self {
            model: None,
            normalize: true,
            log: true,
        }
    }
}

impl EmbedOptions {
    /// Use `model` instead of the default.
    #[must_use]
    pub fn model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    /// Return raw backend vectors.
    #[must_use]
    pub fn raw(mut self) -> Self {
        self.normalize = false;
        self
    }

    /// Skip the usage record.
    #[must_use]
    pub fn unlogged(mut self) -> Self {
        self.log = false;
        self
    }
}

/// Ranking parameters for searches.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct SearchParams {
    /// Maximum hits returned.
    pub top_k: usize,
    /// Minimum cosine similarity, in `[-1, 1]`.
    pub threshold: f32,
}

impl Default for SearchParams {
    fn default() -> Self {
        Self {
            top_k: 10,
            threshold: 0.7,
        }
    }
}

impl SearchParams {
    /// Defaults from settings.
    pub fn from_settings(settings: &SearchSettings) -> Self {
        Self {
            top_k: settings.top_k,
            threshold: settings.threshold,
        }
    }
}

/// One search result.
#[derive(Clone, Debug, PartialEq)]
pub struct SearchHit {
    /// Row id, stringified.
    pub id: String,
    /// Cosine similarity to the query.
    pub similarity: f32,
    /// Text column value, when one was requested.
    pub text: Option<String>,
}

impl From<ScanRow> for SearchHit {
    fn from(row: ScanRow) -> Self {
        Self {
            id: row.id,
            similarity: row.similarity,
            text: row.text,
        }
    }
}

/// Forward-only stream of search hits, most similar first.
pub type SearchStream = Pin<Box<dyn Stream<Item = SearchHit> + Send>>;

/// One embedded window of a chunked document.
#[derive(Clone, Debug, PartialEq)]
pub struct EmbeddedChunk {
    /// Position in the chunk sequence.
    pub index: usize,
    /// Character offset of the chunk in the source text.
    pub char_offset: usize,
    /// Chunk text.
    pub text: String,
    /// Its embedding.
    pub embedding: Vec<f32>,
}

/// A batch failure and the item that caused it, if any.
struct BatchFailure {
    item: Option<usize>,
    error: ServiceError,
}

impl BatchFailure {
    fn message(&self) -> String {
        match self.item {
            Some(i) => format!("item {i}: {}", self.error),
            None => self.error.to_string(),
        }
    }
}

impl From<ServiceError> for BatchFailure {
    fn from(error: ServiceError) -> Self {
        Self { item: None, error }
    }
}

#[derive(Clone)]
struct Dashboard {
    usage: UsageRepo,
    metrics: MetricsRepo,
}

/// Single entry point for embeddings and vector search.
pub struct VectorService {
    config: ServiceConfig,
    registry: Arc<ModelRegistry>,
    store: Arc<dyn VectorStore>,
    recorder: UsageRecorder,
    caller: Arc<dyn CallerContext>,
    clock: Arc<dyn Clock>,
    dashboard: Option<Dashboard>,
}

impl VectorService {
    /// Assemble a facade from its capabilities.
    pub fn new(
        config: ServiceConfig,
        registry: Arc<ModelRegistry>,
        store: Arc<dyn VectorStore>,
        recorder: UsageRecorder,
        caller: Arc<dyn CallerContext>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            config,
            registry,
            store,
            recorder,
            caller,
            clock,
            dashboard: None,
        }
    }

    /// Wire a facade from settings.
    ///
    /// Opens the usage database at the configured path, persists the model
    /// registry there, and spawns a recorder writing to it. Models are then
    /// registered through [`Self::registry`]. Must run inside a Tokio runtime.
    pub fn from_settings(
        settings: &VectorHubSettings,
        store: Arc<dyn VectorStore>,
        caller: Arc<dyn CallerContext>,
        clock: Arc<dyn Clock>,
    ) -> std::result::Result<Self, StoreError> {
        let db = Database::open(&settings.database.resolved_path())?;
        let registry = ModelRegistry::with_repo(ModelRepo::new(db.clone()), clock.clone())
            .with_default_max_tokens(settings.text.default_max_tokens);
        let recorder = UsageRecorder::spawn(
            Arc::new(SqliteUsageSink::new(db.clone())),
            RecorderConfig::from_settings(&settings.recorder),
            clock.clone(),
        );
        Ok(Self::new(
            ServiceConfig::from_settings(settings),
            Arc::new(registry),
            store,
            recorder,
            caller,
            clock,
        )
        .with_dashboard(db))
    }

    /// Enable the dashboard reads over the usage database.
    #[must_use]
    pub fn with_dashboard(mut self, db: Database) -> Self {
        self.dashboard = Some(Dashboard {
            usage: UsageRepo::new(db.clone()),
            metrics: MetricsRepo::new(db),
        });
        self
    }

    /// Limits and defaults in effect.
    pub fn config(&self) -> &ServiceConfig {
        &self.config
    }

    /// The model registry.
    pub fn registry(&self) -> &Arc<ModelRegistry> {
        &self.registry
    }

    /// The usage recorder.
    pub fn recorder(&self) -> &UsageRecorder {
        &self.recorder
    }

    fn model_name<'a>(&'a self, requested: Option<&'a str>) -> &'a str {
        requested.unwrap_or(&self.config.default_model)
    }

    /// Embed one text.
    ///
    /// Fails `ModelNotFound` for unknown or inactive models,
    /// `InvalidArgument` for blank text, `TextTooLong` when the estimate
    /// exceeds the model limit, and `EmbeddingFailed` when the backend fails
    /// or returns a vector of the wrong length.
    pub async fn generate_embedding(&self, text: &str, options: &EmbedOptions) -> Result<Vec<f32>> {
        let caller = self.caller.identity();
        let model = self.model_name(options.model.as_deref());
        let started = Instant::now();

        let result = match self.registry.resolve(model) {
            Ok(resolved) => self.embed_one(&resolved, text, options.normalize).await,
            Err(e) => Err(e),
        };

        if options.log {
            let event = UsageEvent::new(OperationKind::EmbedSingle)
                .model(model)
                .input_length(text.chars().count())
                .tokens(estimate_tokens(text))
                .elapsed(started.elapsed());
            self.finish(&caller, event, result.as_ref().map(|_| ()).map_err(ToString::to_string));
        }
        if let Err(e) = &result {
            warn!(model, kind = e.error_kind(), error = %e, "embedding failed");
        }
        result
    }

    /// Embed up to `max_batch_size` texts, in order.
    ///
    /// Items run sequentially and the first failure aborts the batch. One
    /// aggregate record covers the whole call.
    pub async fn generate_embedding_batch<T>(
        &self,
        texts: &[T],
        options: &EmbedOptions,
    ) -> Result<Vec<Vec<f32>>>
    where
        T: AsRef<str> + Sync,
    {
        let caller = self.caller.identity();
        let model = self.model_name(options.model.as_deref());
        let started = Instant::now();

        let result = self.embed_batch(model, texts, options.normalize).await;

        if options.log {
            let chars: usize = texts.iter().map(|t| t.as_ref().chars().count()).sum();
            let tokens: usize = texts.iter().map(|t| estimate_tokens(t.as_ref())).sum();
            let event = UsageEvent::new(OperationKind::EmbedBatch)
                .model(model)
                .input_length(chars)
                .tokens(tokens)
                .batch_size(texts.len())
                .elapsed(started.elapsed());
            self.finish(&caller, event, result.as_ref().map(|_| ()).map_err(BatchFailure::message));
        }

        match result {
            Ok(vectors) => {
                debug!(model, size = vectors.len(), "batch embedded");
                Ok(vectors)
            }
            Err(failure) => {
                warn!(model, item = ?failure.item, error = %failure.error, "batch embedding failed");
                Err(failure.error)
            }
        }
    }

    /// Rank the rows of `target` against `query`.
    #[allow(clippy::unused_async)]
    pub async fn similarity_search(
        &self,
        query: &[f32],
        target: &TableRef,
        params: &SearchParams,
    ) -> Result<Vec<SearchHit>> {
        let caller = self.caller.identity();
        let started = Instant::now();

        let result = self.scan(query, target, params);

        let event = UsageEvent::new(OperationKind::Similarity).elapsed(started.elapsed());
        self.finish(&caller, event, result.as_ref().map(|_| ()).map_err(ToString::to_string));
        if let Err(e) = &result {
            warn!(table = %target.table, kind = e.error_kind(), error = %e, "similarity search failed");
        }
        result
    }

    /// Embed `query` with `model` (or the default) and search `target`.
    ///
    /// The scan completes before the stream is returned.
    pub async fn semantic_search(
        &self,
        query: &str,
        target: &TableRef,
        params: &SearchParams,
        model: Option<&str>,
    ) -> Result<SearchStream> {
        let caller = self.caller.identity();
        let model = self.model_name(model);
        let started = Instant::now();

        let result = match self.registry.resolve(model) {
            Ok(resolved) => match self.embed_one(&resolved, query, true).await {
                Ok(vector) => self.scan(&vector, target, params),
                Err(e) => Err(e),
            },
            Err(e) => Err(e),
        };

        let event = UsageEvent::new(OperationKind::SemanticSearch)
            .model(model)
            .input_length(query.chars().count())
            .tokens(estimate_tokens(query))
            .elapsed(started.elapsed());
        self.finish(&caller, event, result.as_ref().map(|_| ()).map_err(ToString::to_string));

        match result {
            Ok(hits) => {
                debug!(model, hits = hits.len(), "semantic search complete");
                Ok(Box::pin(futures::stream::iter(hits)))
            }
            Err(e) => {
                warn!(model, kind = e.error_kind(), error = %e, "semantic search failed");
                Err(e)
            }
        }
    }

    /// Probe `model` (or the default) and the vector store. Never fails.
    pub async fn health_check(&self, model: Option<&str>) -> HealthStatus {
        let caller = self.caller.identity();
        let model = self.model_name(model);
        let started = Instant::now();

        let (status, reason) = self.probe(model).await;

        let event = UsageEvent::new(OperationKind::HealthCheck)
            .model(model)
            .elapsed(started.elapsed());
        let outcome = match (status, &reason) {
            (HealthStatus::Down, Some(reason)) => Err(reason.clone()),
            _ => Ok(()),
        };
        self.finish(&caller, event, outcome);

        match status {
            HealthStatus::Healthy => info!(model, %status, "health check"),
            _ => warn!(model, %status, reason = reason.as_deref().unwrap_or(""), "health check"),
        }
        status
    }

    /// Chunk `text` and embed every chunk as one batch.
    ///
    /// `chunk_size` and `overlap` are in estimated tokens. Chunking errors
    /// fail `InvalidArgument` before anything is recorded.
    pub async fn chunk_and_embed(
        &self,
        text: &str,
        chunk_size: usize,
        overlap: usize,
        options: &EmbedOptions,
    ) -> Result<Vec<EmbeddedChunk>> {
        if text.trim().is_empty() {
            return Err(ServiceError::InvalidArgument("text is empty".into()));
        }
        let chunks: Vec<_> = chunk(text, chunk_size, overlap)?.collect();
        let texts: Vec<&str> = chunks.iter().map(|c| c.text).collect();
        let vectors = self.generate_embedding_batch(&texts, options).await?;

        Ok(chunks
            .into_iter()
            .zip(vectors)
            .map(|(window, embedding)| EmbeddedChunk {
                index: window.index,
                char_offset: window.char_offset,
                text: window.text.to_string(),
                embedding,
            })
            .collect())
    }

    /// [`Self::chunk_and_embed`] with the configured chunk window and overlap.
    pub async fn embed_document(
        &self,
        text: &str,
        options: &EmbedOptions,
    ) -> Result<Vec<EmbeddedChunk>> {
        self.chunk_and_embed(
            text,
            self.config.chunk_size_tokens,
            self.config.chunk_overlap_tokens,
            options,
        )
        .await
    }

    /// The current caller's usage records, newest first.
    ///
    /// Records still buffered in the recorder are not visible until flushed.
    pub fn my_usage(&self, limit: u32) -> std::result::Result<Vec<UsageRecord>, StoreError> {
        let dashboard = self.dashboard()?;
        dashboard.usage.query(&UsageQuery {
            principal: Some(self.caller.identity().principal),
            limit: Some(limit),
            ..UsageQuery::default()
        })
    }

    /// Totals for the current caller since `since` (all time when `None`).
    pub fn my_usage_summary(
        &self,
        since: Option<DateTime<Utc>>,
    ) -> std::result::Result<UsageSummary, StoreError> {
        let dashboard = self.dashboard()?;
        dashboard
            .usage
            .summary(&self.caller.identity().principal, since.as_ref())
    }

    /// Daily per-model rollups.
    pub fn performance_metrics(
        &self,
        query: &MetricsQuery,
    ) -> std::result::Result<Vec<PerformanceMetric>, StoreError> {
        self.dashboard()?.metrics.query(query)
    }

    fn dashboard(&self) -> std::result::Result<&Dashboard, StoreError> {
        self.dashboard
            .as_ref()
            .ok_or_else(|| StoreError::NotFound("usage database not configured".into()))
    }

    async fn embed_one(&self, model: &RegisteredModel, text: &str, normalized: bool) -> Result<Vec<f32>> {
        let descriptor = &model.descriptor;
        if text.trim().is_empty() {
            return Err(ServiceError::InvalidArgument("text is empty".into()));
        }
        let estimated = estimate_tokens(text);
        if estimated > descriptor.max_tokens {
            return Err(ServiceError::TextTooLong {
                estimated,
                limit: descriptor.max_tokens,
            });
        }

        let started = Instant::now();
        let raw = model
            .embedder
            .embed(text, &descriptor.name)
            .await
            .map_err(|e| ServiceError::EmbeddingFailed(e.to_string()))?;
        if raw.len() != descriptor.dimensions {
            return Err(ServiceError::EmbeddingFailed(format!(
                "{} returned {} dimensions, expected {}",
                descriptor.name,
                raw.len(),
                descriptor.dimensions
            )));
        }
        self.registry.note_success(
            &descriptor.name,
            started.elapsed().as_millis() as u64,
            self.clock.now(),
        );

        Ok(if normalized { normalize(&raw) } else { raw })
    }

    async fn embed_batch<T>(
        &self,
        model: &str,
        texts: &[T],
        normalized: bool,
    ) -> std::result::Result<Vec<Vec<f32>>, BatchFailure>
    where
        T: AsRef<str> + Sync,
    {
        if texts.len() > self.config.max_batch_size {
            return Err(ServiceError::BatchSizeExceeded {
                size: texts.len(),
                limit: self.config.max_batch_size,
            }
            .into());
        }
        let resolved = self.registry.resolve(model)?;

        let mut vectors = Vec::with_capacity(texts.len());
        for (i, text) in texts.iter().enumerate() {
            let vector = self
                .embed_one(&resolved, text.as_ref(), normalized)
                .await
                .map_err(|error| BatchFailure {
                    item: Some(i),
                    error,
                })?;
            vectors.push(vector);
        }
        Ok(vectors)
    }

    fn scan(&self, query: &[f32], target: &TableRef, params: &SearchParams) -> Result<Vec<SearchHit>> {
        if query.is_empty() {
            return Err(ServiceError::InvalidArgument("query vector is empty".into()));
        }
        if query.iter().any(|x| !x.is_finite()) {
            return Err(ServiceError::InvalidArgument(
                "query vector contains non-finite values".into(),
            ));
        }
        target.validate()?;
        if params.top_k == 0 || params.top_k > self.config.max_top_k {
            return Err(ServiceError::InvalidArgument(format!(
                "top_k {} outside 1..={}",
                params.top_k, self.config.max_top_k
            )));
        }
        if !(-1.0..=1.0).contains(&params.threshold) {
            return Err(ServiceError::InvalidArgument(format!(
                "threshold {} outside [-1, 1]",
                params.threshold
            )));
        }

        let request = ScanRequest {
            target: target.clone(),
            query: query.to_vec(),
            metric: DistanceMetric::Cosine,
            top_k: params.top_k,
            threshold: params.threshold,
        };
        let rows = self
            .store
            .scan(&request)
            .map_err(|e| ServiceError::SearchFailed(e.to_string()))?;
        Ok(shape_rows(rows, params.threshold, params.top_k)
            .into_iter()
            .map(SearchHit::from)
            .collect())
    }

    async fn probe(&self, model: &str) -> (HealthStatus, Option<String>) {
        let resolved = match self.registry.resolve(model) {
            Ok(resolved) => resolved,
            Err(e) => return (HealthStatus::Down, Some(e.to_string())),
        };
        if !resolved.embedder.is_ready() {
            return (HealthStatus::Down, Some(format!("{model}: backend not ready")));
        }
        let vector = match resolved
            .embedder
            .embed(&self.config.health_probe_text, model)
            .await
        {
            Ok(vector) => vector,
            Err(e) => return (HealthStatus::Down, Some(e.to_string())),
        };
        if vector.len() != resolved.descriptor.dimensions {
            return (
                HealthStatus::Degraded,
                Some(format!(
                    "{model} returned {} dimensions, expected {}",
                    vector.len(),
                    resolved.descriptor.dimensions
                )),
            );
        }
        if let Err(e) = self.store.ping() {
            return (HealthStatus::Degraded, Some(format!("vector store: {e}")));
        }
        (HealthStatus::Healthy, None)
    }

    fn finish(&self, caller: &CallerIdentity, event: UsageEvent, outcome: std::result::Result<(), String>) {
        let event = match outcome {
            Ok(()) => event,
            Err(message) => event.failed(message),
        };
        self.recorder.record(caller, event);
    }
}
