//! Bounded-size eviction for the dynamic bucket.

use async_trait::async_trait;
use nimbus_store::{CacheError, CacheStore, RequestKey};
use tracing::debug;

/// Runs once after every write to a bucket.
#[async_trait]
pub trait EvictionPolicy: Send + Sync {
    /// Trim `bucket` after a write. Returns the evicted key, if any.
    async fn after_write(
        &self,
        store: &dyn CacheStore,
        bucket: &str,
    ) -> Result<Option<RequestKey>, CacheError>;
}

/// Drops the single oldest entry when a bucket holds more than
/// `max_entries`. One deletion per write, never a loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TrimOldest {
    pub max_entries: usize,
}

impl TrimOldest {
    pub const DEFAULT_MAX_ENTRIES: usize = 30;

    pub fn new(max_entries: usize) -> Self {
        Self { max_entries }
    }
}

impl Default for TrimOldest {
    fn default() -> Self {
        Self::new(Self::DEFAULT_MAX_ENTRIES)
    }
}

#[async_trait]
impl EvictionPolicy for TrimOldest {
    async fn after_write(
        &self,
        store: &dyn CacheStore,
        bucket: &str,
    ) -> Result<Option<RequestKey>, CacheError> {
        if store.len(bucket).await? <= self.max_entries {
            return Ok(None);
        }

        let Some(oldest) = store.keys(bucket).await?.into_iter().next() else {
            return Ok(None);
        };

        if store.delete_entry(bucket, &oldest).await? {
            debug!(bucket, key = %oldest, max = self.max_entries, "Evicted oldest entry");
            Ok(Some(oldest))
        } else {
            Ok(None)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use nimbus_net::ResponseType;
    use nimbus_store::{MemoryCacheStore, StoredResponse};

    fn key(n: usize) -> RequestKey {
        RequestKey::from_parts("GET", format!("https://api.weatherapi.com/v1/current.json?q={}", n))
    }

    fn entry() -> StoredResponse {
        StoredResponse {
            url: "https://api.weatherapi.com/v1/current.json".to_string(),
            status: 200,
            status_text: "OK".to_string(),
            headers: Vec::new(),
            response_type: ResponseType::Cors,
            body: Vec::new(),
            cached_at: Utc::now(),
        }
    }

    async fn fill(store: &MemoryCacheStore, n: usize) {
        for i in 0..n {
            store.put("dynamic-v1", key(i), entry()).await.unwrap();
        }
    }

    #[tokio::test]
    async fn test_at_threshold_nothing_evicted() {
        let store = MemoryCacheStore::new();
        fill(&store, 30).await;

        let evicted = TrimOldest::default().after_write(&store, "dynamic-v1").await.unwrap();
        assert!(evicted.is_none());
        assert_eq!(store.len("dynamic-v1").await.unwrap(), 30);
    }

    #[tokio::test]
    async fn test_over_threshold_drops_oldest() {
        let store = MemoryCacheStore::new();
        fill(&store, 31).await;

        let evicted = TrimOldest::default().after_write(&store, "dynamic-v1").await.unwrap();
        assert_eq!(evicted, Some(key(0)));
        assert_eq!(store.len("dynamic-v1").await.unwrap(), 30);
        assert!(store.match_in("dynamic-v1", &key(30)).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_single_deletion_per_write() {
        let store = MemoryCacheStore::new();
        fill(&store, 5).await;

        let policy = TrimOldest::new(2);
        assert_eq!(policy.after_write(&store, "dynamic-v1").await.unwrap(), Some(key(0)));
        assert_eq!(store.len("dynamic-v1").await.unwrap(), 4);
        assert_eq!(policy.after_write(&store, "dynamic-v1").await.unwrap(), Some(key(1)));
        assert_eq!(store.len("dynamic-v1").await.unwrap(), 3);
    }

    #[tokio::test]
    async fn test_missing_bucket_is_noop() {
        let store = MemoryCacheStore::new();
        let evicted = TrimOldest::default().after_write(&store, "dynamic-v1").await.unwrap();
        assert!(evicted.is_none());
    }
}
