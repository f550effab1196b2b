//! Capabilities supplied by the host: who is calling, and what time it is.

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::ids::SessionId;

/// The identity a facade call is attributed to.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallerIdentity {
    /// Schema / user / tenant name.
    pub principal: String,
    /// Host session the call belongs to.
    pub session_id: SessionId,
}

impl CallerIdentity {
    /// Identity with a freshly generated session id.
    pub fn new(principal: impl Into<String>) -> Self {
        Self {
            principal: principal.into(),
            session_id: SessionId::new(),
        }
    }
}

/// Resolves the identity of the current caller.
pub trait CallerContext: Send + Sync {
    /// Identity for the operation in progress.
    fn identity(&self) -> CallerIdentity;
}

/// A caller context that always reports the same identity.
#[derive(Clone, Debug)]
pub struct StaticCaller(CallerIdentity);

impl StaticCaller {
    /// Wrap a fixed identity.
    pub fn new(identity: CallerIdentity) -> Self {
        Self(identity)
    }
}

impl CallerContext for StaticCaller {
    fn identity(&self) -> CallerIdentity {
        self.0.clone()
    }
}

/// Source of wall-clock time.
pub trait Clock: Send + Sync {
    /// Current UTC time.
    fn now(&self) -> DateTime<Utc>;
}

/// The real system clock.
#[derive(Clone, Copy, Debug, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// A settable clock for tests and replays.
#[derive(Debug)]
pub struct FixedClock {
    now: Mutex<DateTime<Utc>>,
}

impl FixedClock {
    /// Clock frozen at `now`.
    pub fn new(now: DateTime<Utc>) -> Self {
        Self {
            now: Mutex::new(now),
        }
    }

    /// Move the clock to `now`.
    pub fn set(&self, now: DateTime<Utc>) {
        *self.now.lock() = now;
    }

    /// Advance the clock by `delta`.
    pub fn advance(&self, delta: chrono::Duration) {
        let mut now = self.now.lock();
        *now += delta;
    }
}

impl Clock for FixedClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock()
    }
}
