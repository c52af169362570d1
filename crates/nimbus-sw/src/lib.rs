//! # Nimbus Service Worker
//!
//! Offline cache layer for the weather dashboard: installs the app shell,
//! intercepts every outgoing request and answers it from the network or from
//! versioned buckets.
//!
//! ## Features
//!
//! - **Lifecycle**: install, skip waiting, activate, claim clients
//! - **Routing**: weather API host vs. everything else
//! - **Strategies**: cache-first for static assets, network-first with
//!   fallback for API calls
//! - **Eviction**: dynamic bucket capped, oldest entry dropped per write
//!
//! ## Architecture
//!
//! ```text
//! ServiceWorkerContainer
//!     ├── ServiceWorkerRegistration
//!     │       ├── installing (ServiceWorker)
//!     │       ├── waiting (ServiceWorker)
//!     │       └── active (ServiceWorker)
//!     ├── Clients
//!     └── Controller (when active)
//!             ├── Router ── Api ────> Strategies::network_first ──> EvictionPolicy
//!             │          └─ Static ─> Strategies::cache_first
//!             └── CacheStore / Fetcher
//! ```

use nimbus_common::NimbusError;
use nimbus_net::NetError;
use nimbus_store::CacheError;
use thiserror::Error;
use url::Url;

pub mod container;
pub mod eviction;
pub mod events;
pub mod lifecycle;
pub mod registration;
pub mod router;
pub mod strategy;
pub mod worker;

pub use container::ServiceWorkerContainer;
pub use eviction::{EvictionPolicy, TrimOldest};
pub use events::{FetchEvent, ServiceWorkerEvent};
pub use lifecycle::BucketLifecycle;
pub use registration::{Client, Clients, ServiceWorkerRegistration};
pub use router::{HostPattern, RequestClass, Router};
pub use strategy::Strategies;
pub use worker::{ServiceWorker, ServiceWorkerId, ServiceWorkerState};

// ==================== Errors ====================

/// Errors that can occur in service worker operations.
#[derive(Error, Debug)]
pub enum ServiceWorkerError {
    /// Network failed and nothing cached matched the request.
    #[error("No response available for {url}")]
    NoResponse {
        url: Url,
        #[source]
        source: NetError,
    },

    /// A manifest entry could not be fetched or was not ok.
    #[error("Install failed: {0}")]
    Install(String),

    #[error("State error: {0}")]
    State(String),

    #[error("Invalid configuration: {0}")]
    Config(#[source] NimbusError),

    #[error("Network error: {0}")]
    Network(#[from] NetError),

    #[error("Cache error: {0}")]
    Cache(#[from] CacheError),
}

impl From<ServiceWorkerError> for NimbusError {
    fn from(err: ServiceWorkerError) -> Self {
        match err {
            ServiceWorkerError::Network(e) => e.into(),
            ServiceWorkerError::Cache(e) => e.into(),
            ServiceWorkerError::Config(e) => e,
            err @ ServiceWorkerError::NoResponse { .. } => {
                NimbusError::network_with_source("request could not be answered", err)
            }
            err => NimbusError::lifecycle_with_source("service worker failure", err),
        }
    }
}

impl From<ServiceWorkerError> for NetError {
    fn from(err: ServiceWorkerError) -> Self {
        match err {
            ServiceWorkerError::Network(e) => e,
            other => NetError::RequestFailed(other.to_string()),
        }
    }
}
