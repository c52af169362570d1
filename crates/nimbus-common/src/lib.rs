//! # Nimbus Common
//!
//! Common utilities, error types, and logging configuration for the Nimbus
//! offline cache.
//!
//! ## Features
//!
//! - Unified error type with caller locations for internal errors
//! - Logging configuration and setup
//! - Retry utilities
//! - Result extension traits

use std::panic::Location;

use thiserror::Error;

pub mod logging;
pub mod retry;

pub use logging::{init_logging, LogConfig, LogFormat};
pub use retry::{retry_if, retry_with_backoff, RetryConfig};

type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Unified error type for Nimbus.
///
/// Each crate keeps its own narrow error enum; this is what they convert into
/// once an error crosses into the host binary.
#[derive(Error, Debug)]
pub enum NimbusError {
    /// Network-related errors.
    #[error("Network error: {message}")]
    Network {
        message: String,
        #[source]
        source: Option<BoxError>,
    },

    /// Cache storage errors.
    #[error("Cache error: {message}")]
    Cache {
        message: String,
        #[source]
        source: Option<BoxError>,
    },

    /// Install or activation of a worker version failed.
    #[error("Lifecycle error: {message}")]
    Lifecycle {
        message: String,
        #[source]
        source: Option<BoxError>,
    },

    /// Weather API errors.
    #[error("API error: {message}")]
    Api {
        message: String,
        #[source]
        source: Option<BoxError>,
    },

    /// Configuration errors.
    #[error("Config error: {message}")]
    Config {
        message: String,
        #[source]
        source: Option<BoxError>,
    },

    /// I/O errors.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Resource not found.
    #[error("Resource not found: {0}")]
    NotFound(String),

    /// Invalid argument.
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// Internal error (unexpected).
    #[error("Internal error: {message} (at {location})")]
    Internal {
        message: String,
        location: &'static Location<'static>,
    },
}

impl NimbusError {
    /// Create a network error.
    pub fn network(message: impl Into<String>) -> Self {
        Self::Network {
            message: message.into(),
            source: None,
        }
    }

    /// Create a network error with source.
    pub fn network_with_source<E: std::error::Error + Send + Sync + 'static>(
        message: impl Into<String>,
        source: E,
    ) -> Self {
        Self::Network {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    /// Create a cache error.
    pub fn cache(message: impl Into<String>) -> Self {
        Self::Cache {
            message: message.into(),
            source: None,
        }
    }

    /// Create a cache error with source.
    pub fn cache_with_source<E: std::error::Error + Send + Sync + 'static>(
        message: impl Into<String>,
        source: E,
    ) -> Self {
        Self::Cache {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    /// Create a lifecycle error with source.
    pub fn lifecycle_with_source<E: std::error::Error + Send + Sync + 'static>(
        message: impl Into<String>,
        source: E,
    ) -> Self {
        Self::Lifecycle {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    /// Create an API error with source.
    pub fn api_with_source<E: std::error::Error + Send + Sync + 'static>(
        message: impl Into<String>,
        source: E,
    ) -> Self {
        Self::Api {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    /// Create a config error.
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
            source: None,
        }
    }

    /// Create a config error with source.
    pub fn config_with_source<E: std::error::Error + Send + Sync + 'static>(
        message: impl Into<String>,
        source: E,
    ) -> Self {
        Self::Config {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    /// Check if this error is retryable.
    ///
    /// Lifecycle failures count as retryable: the host may try an install
    /// again later.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            NimbusError::Network { .. } | NimbusError::Lifecycle { .. } | NimbusError::Io(_)
        )
    }

    /// Get the error category for logging.
    pub fn category(&self) -> &'static str {
        match self {
            NimbusError::Network { .. } => "network",
            NimbusError::Cache { .. } => "cache",
            NimbusError::Lifecycle { .. } => "lifecycle",
            NimbusError::Api { .. } => "api",
            NimbusError::Config { .. } => "config",
            NimbusError::Io(_) => "io",
            NimbusError::NotFound(_) => "not_found",
            NimbusError::InvalidArgument(_) => "invalid_argument",
            NimbusError::Internal { .. } => "internal",
        }
    }
}

/// Result type alias for Nimbus operations.
pub type Result<T> = std::result::Result<T, NimbusError>;

/// Extension trait for Result.
pub trait ResultExt<T> {
    /// Add context to an error.
    fn context(self, message: impl Into<String>) -> Result<T>;
}

impl<T, E: std::error::Error + Send + Sync + 'static> ResultExt<T> for std::result::Result<T, E> {
    #[track_caller]
    fn context(self, message: impl Into<String>) -> Result<T> {
        let location = Location::caller();
        self.map_err(|e| NimbusError::Internal {
            message: format!("{}: {}", message.into(), e),
            location,
        })
    }
}

/// Extension trait for Option.
pub trait OptionExt<T> {
    /// Convert None to a NotFound error.
    fn ok_or_not_found(self, resource: impl Into<String>) -> Result<T>;
}

impl<T> OptionExt<T> for Option<T> {
    fn ok_or_not_found(self, resource: impl Into<String>) -> Result<T> {
        self.ok_or_else(|| NimbusError::NotFound(resource.into()))
    }
}
