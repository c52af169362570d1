//! Nimbus Core Library
//!
//! This crate provides configuration and shared types for the offline cache
//! layer of the weather dashboard.

pub mod config;
pub mod types;

pub use config::{
    ApiConfig, CacheConfig, HostMatch, NetworkConfig, NimbusConfig, StorageConfig,
};
pub use types::BucketNames;
