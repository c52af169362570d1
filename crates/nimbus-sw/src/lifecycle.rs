//! Bucket population at install and pruning at activation.

use std::sync::Arc;

use futures::future::try_join_all;
use nimbus_net::{Fetcher, Request};
use nimbus_store::{CacheStore, RequestKey, StoredResponse};
use tracing::{debug, info};
use url::Url;

use crate::ServiceWorkerError;

/// Creates, fills and prunes buckets.
#[derive(Clone)]
pub struct BucketLifecycle {
    store: Arc<dyn CacheStore>,
    fetcher: Arc<dyn Fetcher>,
}

impl BucketLifecycle {
    pub fn new(store: Arc<dyn CacheStore>, fetcher: Arc<dyn Fetcher>) -> Self {
        Self { store, fetcher }
    }

    /// Write every manifest entry into `bucket`.
    ///
    /// Entries already resident are not refetched. The rest are fetched
    /// concurrently; if any fetch fails or is not ok, nothing is written and
    /// the bucket is not created. Returns the number of entries written.
    pub async fn install(&self, bucket: &str, manifest: &[Url]) -> Result<usize, ServiceWorkerError> {
        let mut missing = Vec::with_capacity(manifest.len());
        for url in manifest {
            let key = RequestKey::get(url);
            if self.store.match_in(bucket, &key).await?.is_some() {
                debug!(bucket, key = %key, "Manifest entry already cached");
                continue;
            }
            if !missing.iter().any(|(k, _): &(RequestKey, &Url)| k == &key) {
                missing.push((key, url));
            }
        }

        let entries = try_join_all(missing.into_iter().map(|(key, url)| async move {
            let response = self
                .fetcher
                .fetch(&Request::get(url.clone()))
                .await
                .map_err(|e| ServiceWorkerError::Install(format!("{}: {}", url, e)))?;
            if !response.ok() {
                return Err(ServiceWorkerError::Install(format!(
                    "{} answered {}",
                    url, response.status
                )));
            }
            Ok((key, StoredResponse::capture(response)))
        }))
        .await?;

        let written = entries.len();
        self.store.put_all(bucket, entries).await?;
        info!(bucket, written, total = manifest.len(), "Installed manifest");
        Ok(written)
    }

    /// Delete every bucket whose name is not in `allowed`. Returns the
    /// deleted names.
    pub async fn activate(&self, allowed: &[String]) -> Result<Vec<String>, ServiceWorkerError> {
        let stale: Vec<String> = self
            .store
            .bucket_names()
            .await?
            .into_iter()
            .filter(|name| !allowed.contains(name))
            .collect();

        try_join_all(stale.iter().map(|name| async move {
            info!(bucket = %name, "Deleting old bucket");
            self.store.delete_bucket(name).await
        }))
        .await?;

        Ok(stale)
    }
}
