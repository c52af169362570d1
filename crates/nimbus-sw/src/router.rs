//! Request classification.

use nimbus_core::HostMatch;
use nimbus_net::Request;
use tracing::trace;
use url::Url;

/// Host pattern for matching.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HostPattern {
    /// Exact host match.
    Exact(String),
    /// The host itself or any subdomain of it.
    Domain(String),
    /// Contains substring.
    Contains(String),
}

impl HostPattern {
    /// Pattern for `host` compared the configured way.
    pub fn new(host: &str, kind: HostMatch) -> Self {
        match kind {
            HostMatch::Exact => Self::exact(host),
            HostMatch::Domain => Self::domain(host),
            HostMatch::Contains => Self::contains(host),
        }
    }

    /// Create an exact match pattern.
    pub fn exact(host: &str) -> Self {
        Self::Exact(host.to_ascii_lowercase())
    }

    /// Create a domain pattern.
    pub fn domain(domain: &str) -> Self {
        Self::Domain(domain.trim_start_matches('.').to_ascii_lowercase())
    }

    /// Create a contains pattern.
    pub fn contains(substring: &str) -> Self {
        Self::Contains(substring.to_ascii_lowercase())
    }

    /// Check if a URL's host matches this pattern. URLs without a host never
    /// match.
    pub fn matches(&self, url: &Url) -> bool {
        let Some(host) = url.host_str() else {
            return false;
        };
        let host = host.to_ascii_lowercase();
        match self {
            HostPattern::Exact(pattern) => host == *pattern,
            HostPattern::Domain(pattern) => {
                host == *pattern
                    || host
                        .strip_suffix(pattern.as_str())
                        .is_some_and(|rest| rest.ends_with('.'))
            }
            HostPattern::Contains(pattern) => host.contains(pattern.as_str()),
        }
    }
}

/// Which strategy answers a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestClass {
    /// Weather API call: network first, cached fallback.
    Api,
    /// Everything else: cache first.
    Static,
}

/// Classifies intercepted requests. Total: every request is exactly one of
/// [`RequestClass::Api`] or [`RequestClass::Static`].
#[derive(Debug, Clone)]
pub struct Router {
    api_hosts: Vec<HostPattern>,
}

impl Router {
    pub fn new(api_hosts: Vec<HostPattern>) -> Self {
        Self { api_hosts }
    }

    /// Router for a single API host.
    pub fn for_api_host(host: &str, kind: HostMatch) -> Self {
        Self::new(vec![HostPattern::new(host, kind)])
    }

    /// Classify a request by its URL alone.
    pub fn classify(&self, request: &Request) -> RequestClass {
        let class = if self.api_hosts.iter().any(|p| p.matches(&request.url)) {
            RequestClass::Api
        } else {
            RequestClass::Static
        };
        trace!(url = %request.url, ?class, "Classified request");
        class
    }
}
