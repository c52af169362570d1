//! # Nimbus Store
//!
//! Persistent cache store: named buckets mapping a request identity to a
//! snapshot of the response it produced.
//!
//! ## Architecture
//!
//! ```text
//! CacheStore (trait)
//!     ├── MemoryCacheStore   (process lifetime)
//!     └── SqliteCacheStore   (survives restarts)
//!
//! Bucket ("static-v1", "dynamic-v1", ...)
//!     └── RequestKey → StoredResponse, plus an insertion-ordered key index
//! ```
//!
//! Key enumeration is oldest first. Overwriting a key moves it to the newest
//! position, so "first key" always means "least recently written".

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use http::{HeaderMap, HeaderName, HeaderValue};
use nimbus_common::NimbusError;
use nimbus_net::{Request, Response, ResponseType};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use url::Url;

pub mod bucket;
pub mod memory;
pub mod sqlite;

pub use bucket::Bucket;
pub use memory::MemoryCacheStore;
pub use sqlite::SqliteCacheStore;

// ==================== Errors ====================

/// Errors raised by cache stores.
#[derive(Error, Debug)]
pub enum CacheError {
    #[error("Method {0} cannot be cached")]
    MethodNotCacheable(String),

    #[error("Invalid stored entry: {0}")]
    Corrupt(String),

    #[error("Storage error: {0}")]
    Storage(#[from] rusqlite::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<CacheError> for NimbusError {
    fn from(err: CacheError) -> Self {
        NimbusError::cache_with_source("cache store failure", err)
    }
}

// ==================== Keys ====================

/// Identity of a cached entry: method plus URL without fragment.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RequestKey {
    method: String,
    url: String,
}

impl RequestKey {
    /// Key for a GET of `url`.
    pub fn get(url: &Url) -> Self {
        Self {
            method: "GET".to_string(),
            url: canonical_url(url),
        }
    }

    /// Key for a request. Only GET requests are cacheable.
    pub fn for_request(request: &Request) -> Result<Self, CacheError> {
        if request.method != http::Method::GET {
            return Err(CacheError::MethodNotCacheable(request.method.to_string()));
        }
        Ok(Self::get(&request.url))
    }

    /// Rebuild a key from its stored parts.
    pub fn from_parts(method: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            method: method.into(),
            url: url.into(),
        }
    }

    pub fn method(&self) -> &str {
        &self.method
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

impl std::fmt::Display for RequestKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} {}", self.method, self.url)
    }
}

fn canonical_url(url: &Url) -> String {
    let mut url = url.clone();
    url.set_fragment(None);
    url.to_string()
}

// ==================== Stored responses ====================

/// Immutable snapshot of a response taken when it was cached.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredResponse {
    pub url: String,
    pub status: u16,
    pub status_text: String,
    /// Header values as raw bytes; not every value is visible ASCII.
    pub headers: Vec<(String, Vec<u8>)>,
    pub response_type: ResponseType,
    pub body: Vec<u8>,
    pub cached_at: DateTime<Utc>,
}

impl StoredResponse {
    /// Snapshot a response. Consumes it: pass the copy, not the original.
    pub fn capture(response: Response) -> Self {
        let headers = response
            .headers
            .iter()
            .map(|(name, value)| (name.as_str().to_string(), value.as_bytes().to_vec()))
            .collect();

        Self {
            url: response.url.to_string(),
            status: response.status,
            status_text: response.status_text.clone(),
            headers,
            response_type: response.response_type,
            cached_at: Utc::now(),
            body: response.bytes().to_vec(),
        }
    }

    /// Rebuild a response to hand back to a caller.
    pub fn to_response(&self) -> Result<Response, CacheError> {
        let url = Url::parse(&self.url)
            .map_err(|e| CacheError::Corrupt(format!("url '{}': {}", self.url, e)))?;

        let mut headers = HeaderMap::new();
        for (name, value) in &self.headers {
            let name = HeaderName::try_from(name.as_str())
                .map_err(|e| CacheError::Corrupt(format!("header name '{}': {}", name, e)))?;
            let value = HeaderValue::from_bytes(value)
                .map_err(|e| CacheError::Corrupt(format!("header '{}': {}", name, e)))?;
            headers.append(name, value);
        }

        let mut response = Response::new(url, self.status, self.response_type, self.body.clone());
        response.status_text = self.status_text.clone();
        response.headers = headers;
        response.from_cache = true;
        Ok(response)
    }
}

// ==================== Store ====================

/// Named buckets of cached responses.
///
/// Single reads and single writes are atomic; nothing spans a read followed
/// by a write.
#[async_trait]
pub trait CacheStore: Send + Sync {
    /// Open a bucket, creating it if absent.
    async fn open(&self, bucket: &str) -> Result<(), CacheError>;

    /// Check if a bucket exists.
    async fn has(&self, bucket: &str) -> Result<bool, CacheError>;

    /// All bucket names, in creation order.
    async fn bucket_names(&self) -> Result<Vec<String>, CacheError>;

    /// Delete a bucket and everything in it.
    async fn delete_bucket(&self, bucket: &str) -> Result<bool, CacheError>;

    /// Look a key up in one bucket. A missing bucket is a miss.
    async fn match_in(
        &self,
        bucket: &str,
        key: &RequestKey,
    ) -> Result<Option<StoredResponse>, CacheError>;

    /// Look a key up across all buckets, in creation order.
    async fn match_any(&self, key: &RequestKey) -> Result<Option<StoredResponse>, CacheError>;

    /// Store an entry, creating the bucket if needed.
    async fn put(
        &self,
        bucket: &str,
        key: RequestKey,
        response: StoredResponse,
    ) -> Result<(), CacheError>;

    /// Store several entries; either all are written or none.
    async fn put_all(
        &self,
        bucket: &str,
        entries: Vec<(RequestKey, StoredResponse)>,
    ) -> Result<(), CacheError>;

    /// Keys of a bucket, oldest first. A missing bucket has no keys.
    async fn keys(&self, bucket: &str) -> Result<Vec<RequestKey>, CacheError>;

    /// Delete one entry.
    async fn delete_entry(&self, bucket: &str, key: &RequestKey) -> Result<bool, CacheError>;

    /// Number of entries in a bucket.
    async fn len(&self, bucket: &str) -> Result<usize, CacheError>;
}
