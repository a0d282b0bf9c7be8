//! In-memory store backend.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use parking_lot::RwLock;

use super::{ETag, Object, StoreClient, StoreError};

/// Process-local [`StoreClient`] used by tests and single-node deployments.
///
/// Cheap to clone; clones share the same underlying map.
#[derive(Clone, Default)]
pub struct InMemoryStore {
    inner: std::sync::Arc<Inner>,
}

#[derive(Default)]
struct Inner {
    objects: RwLock<BTreeMap<String, Entry>>,
    versions: AtomicU64,
}

struct Entry {
    etag: ETag,
    data: serde_json::Value,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn next_etag(&self) -> ETag {
        format!("{:x}", self.inner.versions.fetch_add(1, Ordering::Relaxed) + 1)
    }
}

#[async_trait]
impl StoreClient for InMemoryStore {
    async fn get(&self, id: &str) -> Result<Object, StoreError> {
        let key = id.to_lowercase();
        let objects = self.inner.objects.read();
        let entry = objects
            .get(&key)
            .ok_or_else(|| StoreError::NotFound(id.to_string()))?;
        Ok(Object {
            id: id.to_string(),
            etag: entry.etag.clone(),
            data: entry.data.clone(),
        })
    }

    async fn save(
        &self,
        id: &str,
        data: &serde_json::Value,
        etag: Option<&str>,
    ) -> Result<ETag, StoreError> {
        let key = id.to_lowercase();
        let next = self.next_etag();
        let mut objects = self.inner.objects.write();
        match (objects.get(&key), etag) {
            (Some(entry), Some(expected)) if entry.etag != expected => {
                return Err(StoreError::Concurrency { id: id.to_string() });
            }
            (None, Some(_)) => {
                return Err(StoreError::Concurrency { id: id.to_string() });
            }
            _ => {}
        }
        objects.insert(
            key,
            Entry {
                etag: next.clone(),
                data: data.clone(),
            },
        );
        Ok(next)
    }

    async fn delete(&self, id: &str) -> Result<(), StoreError> {
        let key = id.to_lowercase();
        let mut objects = self.inner.objects.write();
        objects
            .remove(&key)
            .map(|_| ())
            .ok_or_else(|| StoreError::NotFound(id.to_string()))
    }

    async fn query(&self, prefix: &str) -> Result<Vec<Object>, StoreError> {
        let prefix = prefix.to_lowercase();
        let objects = self.inner.objects.read();
        Ok(objects
            .range(prefix.clone()..)
            .take_while(|(k, _)| k.starts_with(&prefix))
            .map(|(k, entry)| Object {
                id: k.clone(),
                etag: entry.etag.clone(),
                data: entry.data.clone(),
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn save_then_get_roundtrips() {
        let store = InMemoryStore::new();
        let etag = store
            .save("/planes/radius/local/a", &json!({"v": 1}), None)
            .await
            .unwrap();

        let obj = store.get("/planes/radius/LOCAL/a").await.unwrap();
        assert_eq!(obj.etag, etag);
        assert_eq!(obj.data, json!({"v": 1}));
    }

    #[tokio::test]
    async fn get_missing_is_not_found() {
        let store = InMemoryStore::new();
        let err = store.get("/nope").await.unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn save_with_stale_etag_conflicts() {
        let store = InMemoryStore::new();
        let first = store.save("/a", &json!({"v": 1}), None).await.unwrap();
        store.save("/a", &json!({"v": 2}), None).await.unwrap();

        let err = store
            .save("/a", &json!({"v": 3}), Some(&first))
            .await
            .unwrap_err();
        assert!(err.is_concurrency());
    }

    #[tokio::test]
    async fn save_with_etag_against_missing_object_conflicts() {
        let store = InMemoryStore::new();
        let err = store
            .save("/a", &json!({}), Some("deadbeef"))
            .await
            .unwrap_err();
        assert!(err.is_concurrency());
    }

    #[tokio::test]
    async fn save_with_current_etag_succeeds() {
        let store = InMemoryStore::new();
        let first = store.save("/a", &json!({"v": 1}), None).await.unwrap();
        let second = store
            .save("/a", &json!({"v": 2}), Some(&first))
            .await
            .unwrap();
        assert_ne!(first, second);
        assert_eq!(store.get("/a").await.unwrap().data, json!({"v": 2}));
    }

    #[tokio::test]
    async fn delete_removes_object() {
        let store = InMemoryStore::new();
        store.save("/a", &json!({}), None).await.unwrap();
        store.delete("/a").await.unwrap();
        assert!(store.get("/a").await.unwrap_err().is_not_found());
        assert!(store.delete("/a").await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn query_returns_prefix_matches_only() {
        let store = InMemoryStore::new();
        store.save("/scope/a/one", &json!({"n": 1}), None).await.unwrap();
        store.save("/scope/a/two", &json!({"n": 2}), None).await.unwrap();
        store.save("/scope/b/one", &json!({"n": 3}), None).await.unwrap();

        let matched = store.query("/scope/a/").await.unwrap();
        assert_eq!(matched.len(), 2);
        assert!(matched.iter().all(|o| o.id.starts_with("/scope/a/")));
    }
}
