//! In-process key-value store.
//!
//! Suitable for a single engine process and for tests. Entries expire lazily:
//! a read of an expired key drops it, and every `SWEEP_INTERVAL` writes the
//! whole map is swept so keys that are never read again do not pile up.

use async_trait::async_trait;
use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use crate::infrastructure::ports::{KeyValueStore, StoreError};

/// Writes between full expiry sweeps.
pub const SWEEP_INTERVAL: u64 = 1024;

pub struct MemoryStore {
    entries: DashMap<String, StoredValue>,
    writes: AtomicU64,
    sweep_every: u64,
}

struct StoredValue {
    value: String,
    expires_at: Option<Instant>,
}

impl StoredValue {
    fn is_expired(&self, now: Instant) -> bool {
        self.expires_at.is_some_and(|at| now >= at)
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::with_sweep_interval(SWEEP_INTERVAL)
    }

    /// Store that sweeps expired entries every `writes` writes.
    pub fn with_sweep_interval(writes: u64) -> Self {
        Self {
            entries: DashMap::new(),
            writes: AtomicU64::new(0),
            sweep_every: writes.max(1),
        }
    }

    /// Drop every expired entry. Returns how many were removed.
    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let before = self.entries.len();
        self.entries.retain(|_, entry| !entry.is_expired(now));
        before.saturating_sub(self.entries.len())
    }

    fn record_write(&self) {
        let writes = self.writes.fetch_add(1, Ordering::Relaxed) + 1;
        if writes % self.sweep_every == 0 {
            let removed = self.purge_expired();
            if removed > 0 {
                tracing::debug!(removed, "Swept expired key-value entries");
            }
        }
    }

    /// Number of entries held, including expired ones not yet swept.
    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[cfg(test)]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Insert a value with an explicit expiry instant (tests only).
    #[cfg(test)]
    pub fn insert_at(&self, key: &str, value: &str, expires_at: Instant) {
        self.entries.insert(
            key.to_string(),
            StoredValue {
                value: value.to_string(),
                expires_at: Some(expires_at),
            },
        );
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl KeyValueStore for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        let now = Instant::now();
        if let Some(entry) = self.entries.get(key) {
            if !entry.is_expired(now) {
                return Ok(Some(entry.value.clone()));
            }
        }
        self.entries.remove_if(key, |_, entry| entry.is_expired(now));
        Ok(None)
    }

    async fn set_with_ttl(
        &self,
        key: &str,
        value: String,
        ttl: Duration,
    ) -> Result<(), StoreError> {
        self.entries.insert(
            key.to_string(),
            StoredValue {
                value,
                expires_at: Some(Instant::now() + ttl),
            },
        );
        self.record_write();
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), StoreError> {
        self.entries.remove(key);
        Ok(())
    }

    async fn increment_window(&self, key: &str, window: Duration) -> Result<u64, StoreError> {
        let now = Instant::now();
        // The entry guard holds the shard lock, so read-modify-write is atomic.
        let mut entry = self
            .entries
            .entry(key.to_string())
            .or_insert_with(|| StoredValue {
                value: "0".to_string(),
                expires_at: Some(now + window),
            });

        if entry.is_expired(now) {
            *entry = StoredValue {
                value: "0".to_string(),
                expires_at: Some(now + window),
            };
        }

        let count: u64 = entry
            .value
            .parse()
            .map_err(|_| StoreError::backend("increment_window", "value is not an integer"))?;
        let next = count + 1;
        entry.value = next.to_string();
        if entry.expires_at.is_none() {
            entry.expires_at = Some(now + window);
        }
        // Release the shard lock before a sweep walks every shard.
        drop(entry);
        self.record_write();
        Ok(next)
    }

    async fn ping(&self) -> Result<(), StoreError> {
        Ok(())
    }

    async fn close(&self) {}
}
