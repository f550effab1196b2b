//! # vectorhub-service
//!
//! The single entry point callers use for embeddings and vector search.
//! [`VectorService`] validates input, resolves the model through the
//! [`ModelRegistry`], calls the backend, and writes one usage record per
//! operation attempt.

#![deny(unsafe_code)]

pub mod facade;
pub mod registry;

pub use facade::{
    EmbedOptions, EmbeddedChunk, SearchHit, SearchParams, SearchStream, ServiceConfig,
    VectorService,
};
pub use registry::{ModelRegistry, RegisteredModel, RegistryError};
