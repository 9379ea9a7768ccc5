//! Fail-soft cache of computed results on top of the key-value store.
//!
//! Caching is an optimization: store failures on read count as misses, and
//! failures on write or delete are logged and dropped.

use serde::de::DeserializeOwned;
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::infrastructure::ports::{KeyValueStore, StoreError};

/// Lifetime hit/miss counts.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct CacheMetrics {
    pub hits: u64,
    pub misses: u64,
    /// `hits / total_requests`, 0 before the first lookup.
    pub hit_rate: f64,
    pub total_requests: u64,
}

pub struct ActionCache {
    store: Arc<dyn KeyValueStore>,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl ActionCache {
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self {
            store,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    /// Look up and decode a value. Anything short of a decodable value is a miss.
    pub async fn get<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        match self.try_get(key).await {
            Ok(Some(value)) => {
                self.hits.fetch_add(1, Ordering::Relaxed);
                tracing::debug!(key, "Cache hit");
                Some(value)
            }
            Ok(None) => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
            Err(e) => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                tracing::warn!(key, error = %e, "Cache read failed, treating as miss");
                None
            }
        }
    }

    async fn try_get<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>, StoreError> {
        let Some(raw) = self.store.get(key).await? else {
            return Ok(None);
        };
        serde_json::from_str(&raw)
            .map(Some)
            .map_err(|e| StoreError::Serialization(e.to_string()))
    }

    pub async fn set<T: Serialize>(&self, key: &str, value: &T, ttl: Duration) {
        let raw = match serde_json::to_string(value) {
            Ok(raw) => raw,
            Err(e) => {
                tracing::warn!(key, error = %e, "Cache value could not be serialized");
                return;
            }
        };
        if let Err(e) = self.store.set_with_ttl(key, raw, ttl).await {
            tracing::warn!(key, error = %e, "Cache write failed");
        }
    }

    pub async fn delete(&self, key: &str) {
        if let Err(e) = self.store.delete(key).await {
            tracing::warn!(key, error = %e, "Cache delete failed");
        }
    }

    pub fn get_metrics(&self) -> CacheMetrics {
        let hits = self.hits.load(Ordering::Relaxed);
        let misses = self.misses.load(Ordering::Relaxed);
        let total_requests = hits + misses;
        let hit_rate = if total_requests == 0 {
            0.0
        } else {
            hits as f64 / total_requests as f64
        };
        CacheMetrics {
            hits,
            misses,
            hit_rate,
            total_requests,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::memory_store::MemoryStore;
    use crate::infrastructure::ports::MockKeyValueStore;
    use serde::Deserialize;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Sample {
        text: String,
    }

    fn sample() -> Sample {
        Sample {
            text: "The door creaks open.".into(),
        }
    }

    #[tokio::test]
    async fn set_then_get_counts_a_hit() {
        let cache = ActionCache::new(Arc::new(MemoryStore::new()));
        cache.set("k", &sample(), Duration::from_secs(60)).await;

        assert_eq!(cache.get::<Sample>("k").await, Some(sample()));
        let metrics = cache.get_metrics();
        assert_eq!(metrics.hits, 1);
        assert_eq!(metrics.misses, 0);
        assert_eq!(metrics.hit_rate, 1.0);
    }

    #[tokio::test]
    async fn metrics_start_at_zero() {
        let cache = ActionCache::new(Arc::new(MemoryStore::new()));
        let metrics = cache.get_metrics();
        assert_eq!(metrics.total_requests, 0);
        assert_eq!(metrics.hit_rate, 0.0);
    }

    #[tokio::test]
    async fn hit_rate_is_a_ratio() {
        let cache = ActionCache::new(Arc::new(MemoryStore::new()));
        cache.set("k", &sample(), Duration::from_secs(60)).await;
        cache.get::<Sample>("k").await;
        cache.get::<Sample>("missing").await;
        cache.get::<Sample>("missing").await;
        cache.get::<Sample>("k").await;

        let metrics = cache.get_metrics();
        assert_eq!(metrics.total_requests, 4);
        assert_eq!(metrics.hit_rate, 0.5);
    }

    #[tokio::test]
    async fn delete_makes_next_get_miss() {
        let cache = ActionCache::new(Arc::new(MemoryStore::new()));
        cache.set("k", &sample(), Duration::from_secs(60)).await;
        cache.delete("k").await;
        assert_eq!(cache.get::<Sample>("k").await, None);
    }

    #[tokio::test]
    async fn store_errors_are_misses_and_writes_are_swallowed() {
        let mut store = MockKeyValueStore::new();
        store
            .expect_get()
            .returning(|_| Err(StoreError::backend("get", "connection refused")));
        store
            .expect_set_with_ttl()
            .returning(|_, _, _| Err(StoreError::backend("set_with_ttl", "connection refused")));
        store
            .expect_delete()
            .returning(|_| Err(StoreError::backend("delete", "connection refused")));

        let cache = ActionCache::new(Arc::new(store));
        cache.set("k", &sample(), Duration::from_secs(60)).await;
        cache.delete("k").await;
        assert_eq!(cache.get::<Sample>("k").await, None);
        assert_eq!(cache.get_metrics().misses, 1);
    }

    #[tokio::test]
    async fn undecodable_value_is_a_miss() {
        let store = Arc::new(MemoryStore::new());
        store
            .set_with_ttl("k", "not json".into(), Duration::from_secs(60))
            .await
            .unwrap();

        let cache = ActionCache::new(store);
        assert_eq!(cache.get::<Sample>("k").await, None);
        assert_eq!(cache.get_metrics().misses, 1);
    }
}
