//! Cache-first and network-first strategies.
//!
//! Both strategies hand the page its response before the bucket write
//! finishes: the write runs on a spawned task registered with
//! [`FetchEvent::wait_until`]. A response body is read once, so the cached
//! copy is an explicit `clone()` taken before the original goes back.

use std::sync::Arc;

use nimbus_core::BucketNames;
use nimbus_net::{Fetcher, Response, ResponseType};
use nimbus_store::{CacheStore, RequestKey, StoredResponse};
use tokio::sync::mpsc;
use tracing::{debug, trace, warn};

use crate::eviction::EvictionPolicy;
use crate::events::{FetchEvent, ServiceWorkerEvent};
use crate::ServiceWorkerError;

/// Whether a static response may be written to the static bucket.
pub fn is_cacheable_static(response: &Response) -> bool {
    response.status == 200 && response.response_type == ResponseType::Basic
}

/// The two fetch strategies, sharing one store and one network.
#[derive(Clone)]
pub struct Strategies {
    store: Arc<dyn CacheStore>,
    fetcher: Arc<dyn Fetcher>,
    buckets: BucketNames,
    eviction: Arc<dyn EvictionPolicy>,
    events: mpsc::UnboundedSender<ServiceWorkerEvent>,
}

impl Strategies {
    pub fn new(
        store: Arc<dyn CacheStore>,
        fetcher: Arc<dyn Fetcher>,
        buckets: BucketNames,
        eviction: Arc<dyn EvictionPolicy>,
        events: mpsc::UnboundedSender<ServiceWorkerEvent>,
    ) -> Self {
        Self {
            store,
            fetcher,
            buckets,
            eviction,
            events,
        }
    }

    pub fn buckets(&self) -> &BucketNames {
        &self.buckets
    }

    /// Serve from any bucket; on a miss fetch, and keep a copy when the
    /// response is a plain `200`.
    ///
    /// No staleness check. A network failure on a miss propagates.
    pub async fn cache_first(&self, event: &FetchEvent) -> Result<Response, ServiceWorkerError> {
        let request = event.request();
        let key = RequestKey::for_request(request).ok();

        if let Some(key) = &key {
            if let Some(stored) = self.store.match_any(key).await? {
                trace!(key = %key, "Cache hit");
                return Ok(stored.to_response()?);
            }
        }

        let response = self.fetcher.fetch(request).await?;

        match key {
            Some(key) if is_cacheable_static(&response) => {
                self.write_behind(event, self.buckets.static_name.clone(), key, &response, false);
            }
            _ => {
                debug!(
                    url = %request.url,
                    status = response.status,
                    response_type = response.response_type.as_str(),
                    "Passing static response through uncached"
                );
            }
        }

        Ok(response)
    }

    /// Fetch first and keep a copy of whatever came back, error statuses
    /// included. On a network failure fall back to any cached entry.
    pub async fn network_first(&self, event: &FetchEvent) -> Result<Response, ServiceWorkerError> {
        let request = event.request();
        let key = RequestKey::for_request(request).ok();

        match self.fetcher.fetch(request).await {
            Ok(response) => {
                if let Some(key) = key {
                    self.write_behind(event, self.buckets.dynamic_name.clone(), key, &response, true);
                }
                Ok(response)
            }
            Err(err) => {
                warn!(url = %request.url, error = %err, "Network failed, trying cache");
                let stored = match &key {
                    Some(key) => self.store.match_any(key).await?,
                    None => None,
                };
                match stored {
                    Some(stored) => Ok(stored.to_response()?),
                    None => Err(ServiceWorkerError::NoResponse {
                        url: request.url.clone(),
                        source: err,
                    }),
                }
            }
        }
    }

    /// Persist a copy of `response` off the response path.
    fn write_behind(
        &self,
        event: &FetchEvent,
        bucket: String,
        key: RequestKey,
        response: &Response,
        evict: bool,
    ) {
        let copy = response.clone();
        let this = self.clone();

        event.wait_until(tokio::spawn(async move {
            if let Err(e) = this.store_entry(&bucket, key, copy, evict).await {
                warn!(bucket = %bucket, error = %e, "Cache write failed");
            }
        }));
    }

    async fn store_entry(
        &self,
        bucket: &str,
        key: RequestKey,
        copy: Response,
        evict: bool,
    ) -> Result<(), ServiceWorkerError> {
        trace!(bucket, key = %key, "Writing cache entry");
        self.store
            .put(bucket, key, StoredResponse::capture(copy))
            .await?;

        if evict {
            if let Some(evicted) = self.eviction.after_write(self.store.as_ref(), bucket).await? {
                let _ = self.events.send(ServiceWorkerEvent::Evicted {
                    bucket: bucket.to_string(),
                    key: evicted.to_string(),
                });
            }
        }
        Ok(())
    }
}
