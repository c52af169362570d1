//! Scripted in-process fetcher.
//!
//! Stands in for the host network in tests and dry runs: responses are
//! registered per URL, unknown URLs answer `404`, and the whole network (or a
//! single URL) can be taken offline.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use bytes::Bytes;
use tracing::trace;
use url::Url;

use crate::{Fetcher, NetError, Request, Response};

/// Fetcher answering from a fixed routing table.
#[derive(Default)]
pub struct StubFetcher {
    routes: Mutex<HashMap<String, Response>>,
    failing: Mutex<HashSet<String>>,
    offline: AtomicBool,
    calls: Mutex<Vec<Url>>,
}

impl StubFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Serve `response` for `url`.
    pub fn route(&self, url: &Url, response: Response) {
        lock(&self.routes).insert(url.to_string(), response);
    }

    /// Serve a basic `200` with `body` for `url`.
    pub fn route_ok(&self, url: &Url, body: impl Into<Bytes>) {
        self.route(url, Response::basic(url.clone(), 200, body));
    }

    /// Reject every fetch of `url` at the network layer.
    pub fn fail(&self, url: &Url) {
        lock(&self.failing).insert(url.to_string());
    }

    /// Take the whole network down (or bring it back).
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    /// Number of fetches issued.
    pub fn call_count(&self) -> usize {
        lock(&self.calls).len()
    }

    /// Number of fetches issued for `url`.
    pub fn calls_to(&self, url: &Url) -> usize {
        lock(&self.calls).iter().filter(|u| *u == url).count()
    }
}

#[async_trait]
impl Fetcher for StubFetcher {
    async fn fetch(&self, request: &Request) -> Result<Response, NetError> {
        lock(&self.calls).push(request.url.clone());
        let key = request.url.to_string();

        if self.offline.load(Ordering::SeqCst) || lock(&self.failing).contains(&key) {
            trace!(url = %request.url, "Stub network failure");
            return Err(NetError::RequestFailed(format!(
                "network unreachable: {}",
                request.url
            )));
        }

        let response = lock(&self.routes)
            .get(&key)
            .cloned()
            .unwrap_or_else(|| Response::basic(request.url.clone(), 404, Bytes::new()));
        Ok(response)
    }
}

/// Poisoning is ignored.
fn lock<T>(m: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|e| e.into_inner())
}
