//! # Nimbus Net
//!
//! Request and response model plus the network seam used by the offline
//! cache layer.
//!
//! ## Design Goals
//!
//! 1. **One fetch abstraction**: everything that reaches the network goes
//!    through [`Fetcher`], so strategies can be tested against a stub
//! 2. **Browser response types**: responses carry `basic` / `cors` /
//!    `opaque` typing, which decides what may be cached
//! 3. **Single-read bodies**: reading a body consumes the response; a second
//!    consumer needs an explicit `clone()` taken beforehand

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use bytes::Bytes;
use http::{HeaderMap, HeaderName, HeaderValue};
use nimbus_common::NimbusError;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use url::Url;

pub mod fetch;
pub mod stub;

pub use fetch::{Fetcher, HttpFetcher, LoaderConfig};
pub use http::Method;
pub use stub::StubFetcher;

/// Errors that can occur in networking.
#[derive(Error, Debug)]
pub enum NetError {
    #[error("Request failed: {0}")]
    RequestFailed(String),

    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    #[error("Timeout after {0:?}")]
    Timeout(Duration),

    #[error("Body decode failed: {0}")]
    Decode(String),

    #[error("HTTP error: {0}")]
    HttpError(#[from] reqwest::Error),
}

impl From<NetError> for NimbusError {
    fn from(err: NetError) -> Self {
        NimbusError::network_with_source("fetch failed", err)
    }
}

/// Unique identifier for a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RequestId(u64);

impl RequestId {
    pub fn new() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(1);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    pub fn raw(&self) -> u64 {
        self.0
    }
}

impl Default for RequestId {
    fn default() -> Self {
        Self::new()
    }
}

/// Request mode, as set by the page issuing the fetch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RequestMode {
    /// Only same-origin targets are allowed.
    SameOrigin,
    /// Cross-origin with CORS; responses are readable.
    #[default]
    Cors,
    /// Cross-origin without CORS; responses come back opaque.
    NoCors,
    /// Top-level navigation.
    Navigate,
}

/// Outgoing request.
#[derive(Debug, Clone)]
pub struct Request {
    pub id: RequestId,
    pub url: Url,
    pub method: Method,
    pub headers: HeaderMap,
    pub mode: RequestMode,
}

impl Request {
    /// Create a GET request.
    pub fn get(url: Url) -> Self {
        Self {
            id: RequestId::new(),
            url,
            method: Method::GET,
            headers: HeaderMap::new(),
            mode: RequestMode::default(),
        }
    }

    /// Parse a URL and create a GET request.
    pub fn parse(url: &str) -> Result<Self, NetError> {
        let url = Url::parse(url).map_err(|e| NetError::InvalidUrl(format!("{}: {}", url, e)))?;
        Ok(Self::get(url))
    }

    /// Set the method.
    pub fn method(mut self, method: Method) -> Self {
        self.method = method;
        self
    }

    /// Set the mode.
    pub fn mode(mut self, mode: RequestMode) -> Self {
        self.mode = mode;
        self
    }

    /// Add a header.
    pub fn header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.headers.insert(name, value);
        self
    }

    /// Whether the target shares scheme, host and port with `origin`.
    pub fn is_same_origin(&self, origin: &Url) -> bool {
        self.url.origin() == origin.origin()
    }
}

/// Response type as exposed to the page.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResponseType {
    /// Same-origin response; fully readable.
    #[default]
    Basic,
    /// Cross-origin response obtained with CORS.
    Cors,
    /// Cross-origin `no-cors` response; status 0, nothing readable.
    Opaque,
    /// Unfollowed redirect; status 0, nothing readable.
    OpaqueRedirect,
}

impl ResponseType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResponseType::Basic => "basic",
            ResponseType::Cors => "cors",
            ResponseType::Opaque => "opaque",
            ResponseType::OpaqueRedirect => "opaqueredirect",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "basic" => Some(ResponseType::Basic),
            "cors" => Some(ResponseType::Cors),
            "opaque" => Some(ResponseType::Opaque),
            "opaqueredirect" => Some(ResponseType::OpaqueRedirect),
            _ => None,
        }
    }
}

/// HTTP response.
///
/// Body accessors take `self`: the body is read once. Call `clone()` first
/// when the response has to go to two consumers.
#[derive(Debug, Clone)]
pub struct Response {
    pub url: Url,
    /// Status code; 0 for opaque responses.
    pub status: u16,
    pub status_text: String,
    pub headers: HeaderMap,
    pub response_type: ResponseType,
    pub redirected: bool,
    /// Served from a bucket rather than the network.
    pub from_cache: bool,
    body: Bytes,
}

impl Response {
    /// Create a response with the given type.
    pub fn new(url: Url, status: u16, response_type: ResponseType, body: impl Into<Bytes>) -> Self {
        Self {
            url,
            status,
            status_text: reason_phrase(status).to_string(),
            headers: HeaderMap::new(),
            response_type,
            redirected: false,
            from_cache: false,
            body: body.into(),
        }
    }

    /// Same-origin response.
    pub fn basic(url: Url, status: u16, body: impl Into<Bytes>) -> Self {
        Self::new(url, status, ResponseType::Basic, body)
    }

    /// Cross-origin CORS response.
    pub fn cors(url: Url, status: u16, body: impl Into<Bytes>) -> Self {
        Self::new(url, status, ResponseType::Cors, body)
    }

    /// Opaque response for a `no-cors` cross-origin request.
    pub fn opaque(url: Url) -> Self {
        Self::new(url, 0, ResponseType::Opaque, Bytes::new())
    }

    /// Strip everything a page may not observe from an opaque response.
    pub fn into_opaque(self, response_type: ResponseType) -> Self {
        Self {
            status: 0,
            status_text: String::new(),
            headers: HeaderMap::new(),
            response_type,
            body: Bytes::new(),
            ..self
        }
    }

    /// Add a header.
    pub fn with_header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.headers.insert(name, value);
        self
    }

    /// Check if request was successful (2xx).
    pub fn ok(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// Get a header value as a string.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }

    /// Body length without consuming it.
    pub fn body_len(&self) -> usize {
        self.body.len()
    }

    /// Get the body as bytes.
    pub fn bytes(self) -> Bytes {
        self.body
    }

    /// Get the body as text.
    pub fn text(self) -> Result<String, NetError> {
        String::from_utf8(self.body.to_vec()).map_err(|e| NetError::Decode(e.to_string()))
    }

    /// Get the body as JSON.
    pub fn json<T: serde::de::DeserializeOwned>(self) -> Result<T, NetError> {
        serde_json::from_slice(&self.body).map_err(|e| NetError::Decode(e.to_string()))
    }
}

/// Canonical reason phrase for a status code.
pub fn reason_phrase(status: u16) -> &'static str {
    http::StatusCode::from_u16(status)
        .ok()
        .and_then(|s| s.canonical_reason())
        .unwrap_or("")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn url(s: &str) -> Url {
        Url::parse(s).unwrap()
    }

    #[test]
    fn test_request_builder() {
        let request = Request::get(url("https://example.com/a"))
            .mode(RequestMode::NoCors)
            .header(
                HeaderName::from_static("accept"),
                HeaderValue::from_static("application/json"),
            );

        assert_eq!(request.method, Method::GET);
        assert_eq!(request.mode, RequestMode::NoCors);
        assert!(request.headers.contains_key("accept"));
    }

    #[test]
    fn test_request_parse_rejects_garbage() {
        assert!(matches!(
            Request::parse("not a url"),
            Err(NetError::InvalidUrl(_))
        ));
    }

    #[test]
    fn test_request_id_uniqueness() {
        let id1 = RequestId::new();
        let id2 = RequestId::new();
        assert_ne!(id1, id2);
    }

    #[test]
    fn test_same_origin() {
        let origin = url("http://localhost:3000");
        assert!(Request::get(url("http://localhost:3000/index.html")).is_same_origin(&origin));
        assert!(!Request::get(url("http://localhost:4000/")).is_same_origin(&origin));
        assert!(!Request::get(url("https://localhost:3000/")).is_same_origin(&origin));
    }

    #[test]
    fn test_response_ok_range() {
        let u = url("https://example.com/");
        assert!(Response::basic(u.clone(), 200, "").ok());
        assert!(Response::basic(u.clone(), 204, "").ok());
        assert!(!Response::basic(u.clone(), 304, "").ok());
        assert!(!Response::basic(u.clone(), 404, "").ok());
        assert!(!Response::opaque(u).ok());
    }

    #[test]
    fn test_response_status_text() {
        let r = Response::basic(url("https://example.com/"), 404, "");
        assert_eq!(r.status_text, "Not Found");
    }

    #[test]
    fn test_clone_gives_two_readable_bodies() {
        let response = Response::basic(url("https://example.com/"), 200, "hello");
        let copy = response.clone();
        assert_eq!(response.text().unwrap(), "hello");
        assert_eq!(copy.bytes(), Bytes::from_static(b"hello"));
    }

    #[test]
    fn test_into_opaque_strips_everything() {
        let response = Response::cors(url("https://cdn.example/x.js"), 200, "body").with_header(
            HeaderName::from_static("content-type"),
            HeaderValue::from_static("text/javascript"),
        );
        let opaque = response.into_opaque(ResponseType::Opaque);
        assert_eq!(opaque.status, 0);
        assert!(opaque.headers.is_empty());
        assert_eq!(opaque.body_len(), 0);
        assert_eq!(opaque.response_type, ResponseType::Opaque);
    }

    #[test]
    fn test_json_body() {
        #[derive(serde::Deserialize)]
        struct Payload {
            temp_c: f64,
        }
        let r = Response::cors(url("https://api.example/"), 200, r#"{"temp_c": 21.5}"#);
        let p: Payload = r.json().unwrap();
        assert_eq!(p.temp_c, 21.5);
    }

    #[test]
    fn test_response_type_names_round_trip() {
        for t in [
            ResponseType::Basic,
            ResponseType::Cors,
            ResponseType::Opaque,
            ResponseType::OpaqueRedirect,
        ] {
            assert_eq!(ResponseType::parse(t.as_str()), Some(t));
        }
        assert_eq!(ResponseType::parse("error"), None);
    }
}
