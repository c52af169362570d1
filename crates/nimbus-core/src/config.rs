//! Nimbus configuration

use std::path::{Path, PathBuf};

use nimbus_common::{NimbusError, Result};
use serde::{Deserialize, Serialize};
use tracing::debug;
use url::Url;

/// Environment variable that overrides `api.key`.
pub const API_KEY_ENV: &str = "WEATHER_API_KEY";

/// Default origin the app shell is served from.
pub const DEFAULT_ORIGIN: &str = "http://localhost:3000";

/// Default external weather API host.
pub const DEFAULT_API_HOST: &str = "api.weatherapi.com";

/// Upper bound the weather API accepts for `days`.
pub const MAX_FORECAST_DAYS: u8 = 14;

/// Top-level configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NimbusConfig {
    /// Origin serving the static app shell
    pub origin: String,

    /// Bucket naming, manifest and eviction settings
    pub cache: CacheConfig,

    /// Weather API settings
    pub api: ApiConfig,

    /// Outgoing HTTP settings
    pub network: NetworkConfig,

    /// Persistent store settings
    pub storage: StorageConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Version suffix of every bucket name
    pub version: String,

    /// Optional prefix, e.g. `weather-app` gives `weather-app-static-v1`
    pub prefix: Option<String>,

    /// Dynamic bucket size above which the oldest entry is evicted
    pub max_dynamic_entries: usize,

    /// Root-relative app shell paths cached at install time
    pub manifest: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
    /// Host whose requests are routed network-first
    pub host: String,

    /// How request hosts are compared against `host`
    pub host_match: HostMatch,

    /// Base URL of the REST endpoints
    pub base_url: String,

    /// API key sent as the `key` query parameter
    pub key: Option<String>,

    /// Days requested from the forecast endpoint
    pub forecast_days: u8,
}

/// Host comparison used to route API requests.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HostMatch {
    /// The host only.
    Exact,
    /// The host or any subdomain of it.
    #[default]
    Domain,
    /// Any host containing the configured text.
    Contains,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    /// User agent string
    pub user_agent: String,

    /// Transport timeout in seconds
    pub timeout_secs: u64,

    /// Maximum redirects followed by the transport
    pub max_redirects: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// SQLite database holding the buckets
    pub database: PathBuf,
}

impl Default for NimbusConfig {
    fn default() -> Self {
        Self {
            origin: DEFAULT_ORIGIN.to_string(),
            cache: CacheConfig::default(),
            api: ApiConfig::default(),
            network: NetworkConfig::default(),
            storage: StorageConfig::default(),
        }
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            version: "v1".to_string(),
            prefix: None,
            max_dynamic_entries: 30,
            manifest: [
                "/",
                "/index.html",
                "/static/js/main.chunk.js",
                "/static/js/bundle.js",
                "/static/css/main.chunk.css",
                "/manifest.json",
                "/logo192.png",
                "/logo512.png",
                "/favicon.ico",
            ]
            .iter()
            .map(|p| p.to_string())
            .collect(),
        }
    }
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            host: DEFAULT_API_HOST.to_string(),
            host_match: HostMatch::Domain,
            base_url: format!("https://{}/v1", DEFAULT_API_HOST),
            key: None,
            forecast_days: MAX_FORECAST_DAYS,
        }
    }
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            user_agent: format!("Nimbus/{}", env!("CARGO_PKG_VERSION")),
            timeout_secs: 30,
            max_redirects: 10,
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            database: dirs::cache_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join("nimbus")
                .join("caches.sqlite3"),
        }
    }
}

impl NimbusConfig {
    /// Load configuration from a TOML file, apply environment overrides and
    /// validate the result.
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        let mut config = Self::from_toml_str(&text)?;
        config.apply_env();
        config.validate()?;
        debug!(path = %path.display(), version = %config.cache.version, "Loaded config");
        Ok(config)
    }

    /// Parse configuration from TOML text. Missing fields take defaults.
    pub fn from_toml_str(text: &str) -> Result<Self> {
        toml::from_str(text).map_err(|e| NimbusError::config_with_source("invalid TOML", e))
    }

    /// Apply overrides taken from the process environment.
    pub fn apply_env(&mut self) {
        self.apply_api_key(std::env::var(API_KEY_ENV).ok());
    }

    fn apply_api_key(&mut self, key: Option<String>) {
        if let Some(key) = key.filter(|k| !k.trim().is_empty()) {
            self.api.key = Some(key);
        }
    }

    /// Check invariants the rest of the system relies on.
    pub fn validate(&self) -> Result<()> {
        let origin = self.origin_url()?;
        if !matches!(origin.scheme(), "http" | "https") {
            return Err(NimbusError::config(format!(
                "origin must be http(s), got '{}'",
                origin.scheme()
            )));
        }
        self.api_base_url()?;

        let version = self.cache.version.trim();
        if version.is_empty() || version.chars().any(char::is_whitespace) {
            return Err(NimbusError::config(
                "cache.version must be a non-empty token",
            ));
        }
        if self.cache.max_dynamic_entries == 0 {
            return Err(NimbusError::config(
                "cache.max_dynamic_entries must be at least 1",
            ));
        }
        if let Some(bad) = self.cache.manifest.iter().find(|p| !p.starts_with('/')) {
            return Err(NimbusError::config(format!(
                "manifest entry '{}' is not root-relative",
                bad
            )));
        }
        if self.api.host.trim().is_empty() {
            return Err(NimbusError::config("api.host must not be empty"));
        }
        if self.api.forecast_days == 0 || self.api.forecast_days > MAX_FORECAST_DAYS {
            return Err(NimbusError::config(format!(
                "api.forecast_days must be within 1..={}",
                MAX_FORECAST_DAYS
            )));
        }
        Ok(())
    }

    /// Parsed origin.
    pub fn origin_url(&self) -> Result<Url> {
        Url::parse(&self.origin)
            .map_err(|e| NimbusError::config_with_source(format!("bad origin '{}'", self.origin), e))
    }

    /// Parsed API base URL.
    pub fn api_base_url(&self) -> Result<Url> {
        Url::parse(&self.api.base_url).map_err(|e| {
            NimbusError::config_with_source(format!("bad api.base_url '{}'", self.api.base_url), e)
        })
    }

    /// Manifest paths resolved against the origin, in manifest order.
    pub fn manifest_urls(&self) -> Result<Vec<Url>> {
        let origin = self.origin_url()?;
        self.cache
            .manifest
            .iter()
            .map(|path| {
                origin.join(path).map_err(|e| {
                    NimbusError::config_with_source(format!("bad manifest path '{}'", path), e)
                })
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults_are_valid() {
        let config = NimbusConfig::default();
        config.validate().unwrap();
        assert_eq!(config.cache.version, "v1");
        assert_eq!(config.cache.max_dynamic_entries, 30);
        assert_eq!(config.api.host, "api.weatherapi.com");
        assert_eq!(config.cache.manifest[0], "/");
        assert_eq!(config.cache.manifest.len(), 9);
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config = NimbusConfig::from_toml_str(
            r#"
            origin = "https://weather.example"

            [cache]
            version = "v2"
            manifest = ["/", "/index.html"]
            "#,
        )
        .unwrap();

        assert_eq!(config.origin, "https://weather.example");
        assert_eq!(config.cache.version, "v2");
        assert_eq!(config.cache.max_dynamic_entries, 30);
        assert_eq!(config.api, ApiConfig::default());
    }

    #[test]
    fn test_host_match_from_toml() {
        let config = NimbusConfig::from_toml_str(
            r#"
            [api]
            host = "weatherapi"
            host_match = "contains"
            "#,
        )
        .unwrap();
        assert_eq!(config.api.host_match, HostMatch::Contains);
        assert!(NimbusConfig::from_toml_str("[api]\nhost_match = \"fuzzy\"").is_err());
    }

    #[test]
    fn test_invalid_toml_is_config_error() {
        let err = NimbusConfig::from_toml_str("origin = [").unwrap_err();
        assert_eq!(err.category(), "config");
    }

    #[test]
    fn test_validate_rejects_relative_manifest_path() {
        let mut config = NimbusConfig::default();
        config.cache.manifest.push("logo.png".to_string());
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_zero_threshold() {
        let mut config = NimbusConfig::default();
        config.cache.max_dynamic_entries = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_blank_version() {
        let mut config = NimbusConfig::default();
        config.cache.version = "  ".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_non_http_origin() {
        let mut config = NimbusConfig::default();
        config.origin = "file:///srv/app".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_manifest_urls_resolve_against_origin() {
        let mut config = NimbusConfig::default();
        config.origin = "https://weather.example".to_string();
        config.cache.manifest = vec!["/".to_string(), "/index.html".to_string()];

        let urls = config.manifest_urls().unwrap();
        assert_eq!(urls[0].as_str(), "https://weather.example/");
        assert_eq!(urls[1].as_str(), "https://weather.example/index.html");
    }

    #[test]
    fn test_api_key_override_ignores_blank() {
        let mut config = NimbusConfig::default();
        config.api.key = Some("from-file".to_string());

        config.apply_api_key(Some("   ".to_string()));
        assert_eq!(config.api.key.as_deref(), Some("from-file"));

        config.apply_api_key(Some("from-env".to_string()));
        assert_eq!(config.api.key.as_deref(), Some("from-env"));
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[cache]\nmax_dynamic_entries = 5").unwrap();

        let config = NimbusConfig::load(file.path()).unwrap();
        assert_eq!(config.cache.max_dynamic_entries, 5);
    }

    #[test]
    fn test_load_missing_file_is_io_error() {
        let err = NimbusConfig::load(Path::new("/nonexistent/nimbus.toml")).unwrap_err();
        assert_eq!(err.category(), "io");
    }
}
