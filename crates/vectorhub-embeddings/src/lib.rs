//! # vectorhub-embeddings
//!
//! The leaf capabilities the vector service facade orchestrates:
//! - [`text`]: token estimation and overlapping chunking
//! - [`normalize`]: L2 normalization and similarity math
//! - [`service`]: the [`Embedder`] capability plus a deterministic mock
//! - [`vector_store`]: the [`VectorStore`] capability plus a `SQLite`
//!   brute-force implementation over caller-owned tables

#![deny(unsafe_code)]

pub mod errors;
pub mod normalize;
pub mod service;
pub mod text;
pub mod vector_store;

pub use errors::{EmbeddingError, Result};
pub use service::{Embedder, MockEmbedder};
pub use text::{TextChunk, TextChunks};
pub use vector_store::{
    DistanceMetric, ScanRequest, ScanRow, SqliteVectorStore, TableRef, VectorStore, shape_rows,
};
