//! Process-lifetime cache store.

use async_trait::async_trait;
use tokio::sync::RwLock;
use tracing::{debug, trace};

use crate::{Bucket, CacheError, CacheStore, RequestKey, StoredResponse};

/// Cache store held entirely in memory.
#[derive(Debug, Default)]
pub struct MemoryCacheStore {
    /// Creation order.
    buckets: RwLock<Vec<Bucket>>,
}

impl MemoryCacheStore {
    pub fn new() -> Self {
        Self::default()
    }
}

fn find<'a>(buckets: &'a [Bucket], name: &str) -> Option<&'a Bucket> {
    buckets.iter().find(|b| b.name() == name)
}

fn find_or_create<'a>(buckets: &'a mut Vec<Bucket>, name: &str) -> &'a mut Bucket {
    let index = match buckets.iter().position(|b| b.name() == name) {
        Some(index) => index,
        None => {
            debug!(bucket = name, "Creating bucket");
            buckets.push(Bucket::new(name));
            buckets.len() - 1
        }
    };
    &mut buckets[index]
}

#[async_trait]
impl CacheStore for MemoryCacheStore {
    async fn open(&self, bucket: &str) -> Result<(), CacheError> {
        let mut buckets = self.buckets.write().await;
        find_or_create(&mut buckets, bucket);
        Ok(())
    }

    async fn has(&self, bucket: &str) -> Result<bool, CacheError> {
        Ok(find(&self.buckets.read().await, bucket).is_some())
    }

    async fn bucket_names(&self) -> Result<Vec<String>, CacheError> {
        Ok(self
            .buckets
            .read()
            .await
            .iter()
            .map(|b| b.name().to_string())
            .collect())
    }

    async fn delete_bucket(&self, bucket: &str) -> Result<bool, CacheError> {
        let mut buckets = self.buckets.write().await;
        let before = buckets.len();
        buckets.retain(|b| b.name() != bucket);
        Ok(buckets.len() != before)
    }

    async fn match_in(
        &self,
        bucket: &str,
        key: &RequestKey,
    ) -> Result<Option<StoredResponse>, CacheError> {
        let buckets = self.buckets.read().await;
        Ok(find(&buckets, bucket).and_then(|b| b.get(key)).cloned())
    }

    async fn match_any(&self, key: &RequestKey) -> Result<Option<StoredResponse>, CacheError> {
        let buckets = self.buckets.read().await;
        Ok(buckets.iter().find_map(|b| b.get(key)).cloned())
    }

    async fn put(
        &self,
        bucket: &str,
        key: RequestKey,
        response: StoredResponse,
    ) -> Result<(), CacheError> {
        trace!(bucket, key = %key, "Storing entry");
        let mut buckets = self.buckets.write().await;
        find_or_create(&mut buckets, bucket).put(key, response);
        Ok(())
    }

    async fn put_all(
        &self,
        bucket: &str,
        entries: Vec<(RequestKey, StoredResponse)>,
    ) -> Result<(), CacheError> {
        let mut buckets = self.buckets.write().await;
        let target = find_or_create(&mut buckets, bucket);
        for (key, response) in entries {
            target.put(key, response);
        }
        Ok(())
    }

    async fn keys(&self, bucket: &str) -> Result<Vec<RequestKey>, CacheError> {
        let buckets = self.buckets.read().await;
        Ok(find(&buckets, bucket).map(Bucket::keys).unwrap_or_default())
    }

    async fn delete_entry(&self, bucket: &str, key: &RequestKey) -> Result<bool, CacheError> {
        let mut buckets = self.buckets.write().await;
        Ok(buckets
            .iter_mut()
            .find(|b| b.name() == bucket)
            .map(|b| b.delete(key))
            .unwrap_or(false))
    }

    async fn len(&self, bucket: &str) -> Result<usize, CacheError> {
        let buckets = self.buckets.read().await;
        Ok(find(&buckets, bucket).map(Bucket::len).unwrap_or(0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use nimbus_net::ResponseType;

    fn key(path: &str) -> RequestKey {
        RequestKey::from_parts("GET", format!("http://localhost:3000{}", path))
    }

    fn entry(status: u16) -> StoredResponse {
        StoredResponse {
            url: "http://localhost:3000/".to_string(),
            status,
            status_text: String::new(),
            headers: Vec::new(),
            response_type: ResponseType::Basic,
            body: Vec::new(),
            cached_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_open_and_list_in_creation_order() {
        let store = MemoryCacheStore::new();
        store.open("static-v1").await.unwrap();
        store.open("dynamic-v1").await.unwrap();
        store.open("static-v1").await.unwrap();

        assert_eq!(
            store.bucket_names().await.unwrap(),
            vec!["static-v1", "dynamic-v1"]
        );
        assert!(store.has("dynamic-v1").await.unwrap());
        assert!(!store.has("dynamic-v0").await.unwrap());
    }

    #[tokio::test]
    async fn test_put_creates_bucket() {
        let store = MemoryCacheStore::new();
        store.put("dynamic-v1", key("/a"), entry(200)).await.unwrap();
        assert!(store.has("dynamic-v1").await.unwrap());
        assert_eq!(store.len("dynamic-v1").await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_match_any_searches_in_creation_order() {
        let store = MemoryCacheStore::new();
        store.put("first", key("/a"), entry(200)).await.unwrap();
        store.put("second", key("/a"), entry(404)).await.unwrap();

        let hit = store.match_any(&key("/a")).await.unwrap().unwrap();
        assert_eq!(hit.status, 200);
        assert!(store.match_any(&key("/b")).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_missing_bucket_reads_as_empty() {
        let store = MemoryCacheStore::new();
        assert!(store.match_in("nope", &key("/")).await.unwrap().is_none());
        assert!(store.keys("nope").await.unwrap().is_empty());
        assert_eq!(store.len("nope").await.unwrap(), 0);
        assert!(!store.delete_entry("nope", &key("/")).await.unwrap());
        assert!(!store.delete_bucket("nope").await.unwrap());
    }

    #[tokio::test]
    async fn test_delete_bucket_drops_entries() {
        let store = MemoryCacheStore::new();
        store.put("static-v0", key("/"), entry(200)).await.unwrap();
        assert!(store.delete_bucket("static-v0").await.unwrap());
        assert!(store.match_any(&key("/")).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_put_all_keeps_order() {
        let store = MemoryCacheStore::new();
        store
            .put_all(
                "static-v1",
                vec![(key("/"), entry(200)), (key("/index.html"), entry(200))],
            )
            .await
            .unwrap();
        assert_eq!(
            store.keys("static-v1").await.unwrap(),
            vec![key("/"), key("/index.html")]
        );
    }
}
