//! Worker versions and their states.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};
use url::Url;

/// Unique identifier for a service worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ServiceWorkerId(u64);

impl ServiceWorkerId {
    fn new() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(1);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }
}

impl std::fmt::Display for ServiceWorkerId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "sw-{}", self.0)
    }
}

/// Service worker state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ServiceWorkerState {
    /// Created, nothing run yet.
    #[default]
    Parsed,
    /// Populating the static bucket.
    Installing,
    /// Installed but waiting for activation.
    Installed,
    /// Pruning buckets.
    Activating,
    /// Active and controlling pages.
    Activated,
    /// Replaced, or install failed.
    Redundant,
}

/// One version of the cache layer.
#[derive(Debug, Clone)]
pub struct ServiceWorker {
    pub id: ServiceWorkerId,

    /// Origin whose requests this worker intercepts.
    pub scope: Url,

    /// Version suffix of the buckets this worker owns.
    pub version: String,

    pub state: ServiceWorkerState,

    /// Why the worker became redundant, if it failed.
    pub error: Option<String>,
}

impl ServiceWorker {
    /// Create a new service worker.
    pub fn new(scope: Url, version: impl Into<String>) -> Self {
        Self {
            id: ServiceWorkerId::new(),
            scope,
            version: version.into(),
            state: ServiceWorkerState::Parsed,
            error: None,
        }
    }

    /// Set state.
    pub fn set_state(&mut self, state: ServiceWorkerState) {
        self.state = state;
    }

    /// Check if active.
    pub fn is_active(&self) -> bool {
        self.state == ServiceWorkerState::Activated
    }

    /// Check if redundant.
    pub fn is_redundant(&self) -> bool {
        self.state == ServiceWorkerState::Redundant
    }

    /// Whether `url` falls under this worker's scope.
    pub fn controls(&self, url: &Url) -> bool {
        url.origin() == self.scope.origin() && url.path().starts_with(self.scope.path())
    }
}
