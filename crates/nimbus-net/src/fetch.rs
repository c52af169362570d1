//! Network fetchers.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use tracing::{debug, info, trace};
use url::Url;

use crate::{reason_phrase, NetError, Request, RequestMode, Response, ResponseType};

/// Anything that can turn a request into a response.
///
/// A rejected future is a network-layer failure (offline, DNS, TLS, reset).
/// HTTP error statuses are successful fetches.
#[async_trait]
pub trait Fetcher: Send + Sync {
    async fn fetch(&self, request: &Request) -> Result<Response, NetError>;
}

#[async_trait]
impl<F: Fetcher + ?Sized> Fetcher for Arc<F> {
    async fn fetch(&self, request: &Request) -> Result<Response, NetError> {
        (**self).fetch(request).await
    }
}

/// Loader configuration.
#[derive(Debug, Clone)]
pub struct LoaderConfig {
    /// Origin of the page issuing requests; decides basic vs. cors typing.
    pub origin: Url,
    /// User agent string.
    pub user_agent: String,
    /// Accept-Language header.
    pub accept_language: String,
    /// Transport timeout.
    pub timeout: Duration,
    /// Maximum redirects. Zero leaves redirects to the caller.
    pub max_redirects: usize,
}

impl LoaderConfig {
    /// Create a configuration for pages served from `origin`.
    pub fn new(origin: Url) -> Self {
        Self {
            origin,
            user_agent: format!("Nimbus/{}", env!("CARGO_PKG_VERSION")),
            accept_language: "en-US,en;q=0.9".to_string(),
            timeout: Duration::from_secs(30),
            max_redirects: 10,
        }
    }

    /// Set the user agent.
    pub fn user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = user_agent.into();
        self
    }

    /// Set the transport timeout.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Set the redirect limit.
    pub fn max_redirects(mut self, max: usize) -> Self {
        self.max_redirects = max;
        self
    }
}

/// reqwest-backed fetcher.
pub struct HttpFetcher {
    client: Client,
    config: LoaderConfig,
}

impl HttpFetcher {
    /// Create a new fetcher.
    pub fn new(config: LoaderConfig) -> Result<Self, NetError> {
        let redirect = if config.max_redirects == 0 {
            reqwest::redirect::Policy::none()
        } else {
            reqwest::redirect::Policy::limited(config.max_redirects)
        };

        let client = Client::builder()
            .user_agent(&config.user_agent)
            .timeout(config.timeout)
            .redirect(redirect)
            .build()
            .map_err(|e| NetError::RequestFailed(e.to_string()))?;

        info!(origin = %config.origin, "HttpFetcher initialized");

        Ok(Self { client, config })
    }

    pub fn config(&self) -> &LoaderConfig {
        &self.config
    }
}

#[async_trait]
impl Fetcher for HttpFetcher {
    async fn fetch(&self, request: &Request) -> Result<Response, NetError> {
        debug!(url = %request.url, method = %request.method, "Fetching resource");

        let mut req_builder = self
            .client
            .request(request.method.clone(), request.url.clone());

        for (name, value) in request.headers.iter() {
            req_builder = req_builder.header(name, value);
        }
        req_builder = req_builder.header("Accept-Language", &self.config.accept_language);

        let response = req_builder.send().await.map_err(|e| {
            if e.is_timeout() {
                NetError::Timeout(self.config.timeout)
            } else {
                NetError::HttpError(e)
            }
        })?;

        let status = response.status().as_u16();
        let headers = response.headers().clone();
        let final_url = response.url().clone();
        let body = response.bytes().await?;

        let response_type = classify(request, &final_url, &self.config.origin, status, &headers);

        trace!(
            url = %final_url,
            status,
            response_type = response_type.as_str(),
            body_len = body.len(),
            "Response received"
        );

        let response = Response {
            redirected: final_url != request.url,
            url: final_url,
            status,
            status_text: reason_phrase(status).to_string(),
            headers,
            response_type,
            from_cache: false,
            body,
        };

        Ok(match response_type {
            ResponseType::Opaque | ResponseType::OpaqueRedirect => {
                response.into_opaque(response_type)
            }
            _ => response,
        })
    }
}

/// Response typing as a browser would expose it to the page.
///
/// A response is basic only when both the request and the URL the redirect
/// chain ended on share the loader's origin.
fn classify(
    request: &Request,
    final_url: &Url,
    origin: &Url,
    status: u16,
    headers: &http::HeaderMap,
) -> ResponseType {
    if (300..400).contains(&status) && headers.contains_key(http::header::LOCATION) {
        return ResponseType::OpaqueRedirect;
    }
    if request.is_same_origin(origin) && final_url.origin() == origin.origin() {
        return ResponseType::Basic;
    }
    match request.mode {
        RequestMode::NoCors => ResponseType::Opaque,
        _ => ResponseType::Cors,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use http::{HeaderMap, HeaderValue};

    fn origin() -> Url {
        Url::parse("http://localhost:3000").unwrap()
    }

    fn request(url: &str) -> Request {
        Request::get(Url::parse(url).unwrap())
    }

    #[test]
    fn test_classify_same_origin_is_basic() {
        let req = request("http://localhost:3000/app.js");
        let t = classify(&req, &req.url, &origin(), 200, &HeaderMap::new());
        assert_eq!(t, ResponseType::Basic);
    }

    #[test]
    fn test_classify_redirect_off_origin_is_not_basic() {
        let req = request("http://localhost:3000/app.js");
        let landed = Url::parse("https://cdn.example/app.js").unwrap();
        let t = classify(&req, &landed, &origin(), 200, &HeaderMap::new());
        assert_eq!(t, ResponseType::Cors);

        let no_cors = req.mode(RequestMode::NoCors);
        let t = classify(&no_cors, &landed, &origin(), 200, &HeaderMap::new());
        assert_eq!(t, ResponseType::Opaque);
    }

    #[test]
    fn test_classify_cross_origin() {
        let api = request("https://api.weatherapi.com/v1/current.json");
        let cors = classify(
            &api,
            &api.url,
            &origin(),
            200,
            &HeaderMap::new(),
        );
        assert_eq!(cors, ResponseType::Cors);

        let font = request("https://fonts.example/font.woff2").mode(RequestMode::NoCors);
        let no_cors = classify(
            &font,
            &font.url,
            &origin(),
            200,
            &HeaderMap::new(),
        );
        assert_eq!(no_cors, ResponseType::Opaque);
    }

    #[test]
    fn test_classify_unfollowed_redirect() {
        let mut headers = HeaderMap::new();
        headers.insert(http::header::LOCATION, HeaderValue::from_static("/index.html"));
        let req = request("http://localhost:3000/");
        let t = classify(&req, &req.url, &origin(), 302, &headers);
        assert_eq!(t, ResponseType::OpaqueRedirect);
    }

    #[test]
    fn test_loader_config_builder() {
        let config = LoaderConfig::new(origin())
            .user_agent("Test/1.0")
            .timeout(Duration::from_secs(5))
            .max_redirects(0);
        assert_eq!(config.user_agent, "Test/1.0");
        assert_eq!(config.timeout, Duration::from_secs(5));
        assert_eq!(config.max_redirects, 0);
    }
}
