//! In-memory bucket with an insertion-ordered key index.

use std::collections::VecDeque;

use hashbrown::HashMap;

use crate::{RequestKey, StoredResponse};

/// One named bucket.
#[derive(Debug, Clone)]
pub struct Bucket {
    name: String,
    entries: HashMap<RequestKey, StoredResponse>,
    /// Oldest first.
    order: VecDeque<RequestKey>,
}

impl Bucket {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            entries: HashMap::new(),
            order: VecDeque::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Look up an entry.
    pub fn get(&self, key: &RequestKey) -> Option<&StoredResponse> {
        self.entries.get(key)
    }

    /// Insert or overwrite. Either way the key becomes the newest.
    pub fn put(&mut self, key: RequestKey, response: StoredResponse) {
        if self.entries.insert(key.clone(), response).is_some() {
            self.order.retain(|k| k != &key);
        }
        self.order.push_back(key);
    }

    /// Remove an entry.
    pub fn delete(&mut self, key: &RequestKey) -> bool {
        if self.entries.remove(key).is_some() {
            self.order.retain(|k| k != key);
            true
        } else {
            false
        }
    }

    /// Keys, oldest first.
    pub fn keys(&self) -> Vec<RequestKey> {
        self.order.iter().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
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

    fn entry(body: &str) -> StoredResponse {
        StoredResponse {
            url: "http://localhost:3000/".to_string(),
            status: 200,
            status_text: "OK".to_string(),
            headers: Vec::new(),
            response_type: ResponseType::Basic,
            body: body.as_bytes().to_vec(),
            cached_at: Utc::now(),
        }
    }

    #[test]
    fn test_put_get_delete() {
        let mut bucket = Bucket::new("static-v1");
        bucket.put(key("/"), entry("shell"));

        assert_eq!(bucket.len(), 1);
        assert_eq!(bucket.get(&key("/")).map(|e| e.body.as_slice()), Some(&b"shell"[..]));
        assert!(bucket.delete(&key("/")));
        assert!(!bucket.delete(&key("/")));
        assert!(bucket.is_empty());
    }

    #[test]
    fn test_keys_in_insertion_order() {
        let mut bucket = Bucket::new("dynamic-v1");
        bucket.put(key("/a"), entry("a"));
        bucket.put(key("/b"), entry("b"));
        bucket.put(key("/c"), entry("c"));

        assert_eq!(bucket.keys(), vec![key("/a"), key("/b"), key("/c")]);
    }

    #[test]
    fn test_overwrite_moves_to_newest() {
        let mut bucket = Bucket::new("dynamic-v1");
        bucket.put(key("/a"), entry("a1"));
        bucket.put(key("/b"), entry("b"));
        bucket.put(key("/a"), entry("a2"));

        assert_eq!(bucket.len(), 2);
        assert_eq!(bucket.keys(), vec![key("/b"), key("/a")]);
        assert_eq!(bucket.get(&key("/a")).map(|e| e.body.clone()), Some(b"a2".to_vec()));
    }
}
