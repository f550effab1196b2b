//! # vectorhub-core
//!
//! Types shared by every vectorhub crate:
//! - Branded string ids ([`ids`])
//! - Host-supplied capabilities: caller identity and clock ([`context`])
//! - The persisted data model: models, usage records, daily metrics ([`types`])
//! - The facade error taxonomy ([`errors`])

#![deny(unsafe_code)]

pub mod context;
pub mod errors;
pub mod ids;
pub mod types;

pub use context::{CallerContext, CallerIdentity, Clock, FixedClock, StaticCaller, SystemClock};
pub use errors::{Result, ServiceError};
pub use ids::{RecordId, SessionId};
pub use types::{
    HealthStatus, ModelDescriptor, OperationKind, PerformanceMetric, UsageRecord, UsageSummary,
};
