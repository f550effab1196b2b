//! # vectorhub-store
//!
//! `SQLite` persistence for the vector service: the model registry, the
//! append-only usage log, and daily performance rollups. Repositories share
//! one [`Database`] handle and are synchronous; async callers hold the lock
//! only for the duration of a statement or transaction.

#![deny(unsafe_code)]

pub mod database;
pub mod error;
pub mod metrics;
pub mod models;
pub mod row_helpers;
pub mod schema;
pub mod usage;

pub use database::Database;
pub use error::StoreError;
pub use metrics::{MetricsQuery, MetricsRepo};
pub use models::ModelRepo;
pub use usage::{UsageQuery, UsageRepo};
