//! Common types used throughout Nimbus

use serde::{Deserialize, Serialize};

use crate::config::CacheConfig;

/// Versioned names of the buckets owned by one worker version.
///
/// Install populates `static_name` from the manifest; the dynamic bucket
/// holds API responses. Bumping the version yields a disjoint pair of names,
/// which is how all previously cached entries get invalidated at activation.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BucketNames {
    pub static_name: String,
    pub dynamic_name: String,
}

impl BucketNames {
    /// Build names for a version, e.g. `static-v1` / `dynamic-v1`.
    pub fn new(prefix: Option<&str>, version: &str) -> Self {
        let name = |kind: &str| match prefix.filter(|p| !p.is_empty()) {
            Some(prefix) => format!("{}-{}-{}", prefix, kind, version),
            None => format!("{}-{}", kind, version),
        };
        Self {
            static_name: name("static"),
            dynamic_name: name("dynamic"),
        }
    }

    /// Names derived from the cache section of the config.
    pub fn from_config(config: &CacheConfig) -> Self {
        Self::new(config.prefix.as_deref(), config.version.trim())
    }

    /// Buckets that survive activation.
    pub fn allow_list(&self) -> Vec<String> {
        vec![self.static_name.clone(), self.dynamic_name.clone()]
    }

    /// Whether a bucket belongs to this version.
    pub fn contains(&self, name: &str) -> bool {
        self.static_name == name || self.dynamic_name == name
    }
}

impl Default for BucketNames {
    fn default() -> Self {
        Self::from_config(&CacheConfig::default())
    }
}
