//! Shared key-value store port.

use std::time::Duration;

use async_trait::async_trait;

use super::error::StoreError;

/// Network-style key-value store holding serialized values with expiry.
///
/// Shaped after the handful of Redis commands the engine needs. Expired keys
/// must never be returned by `get`.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError>;
    async fn set_with_ttl(&self, key: &str, value: String, ttl: Duration)
        -> Result<(), StoreError>;
    async fn delete(&self, key: &str) -> Result<(), StoreError>;

    /// Atomically increment the counter at `key` and return the new value.
    ///
    /// When the increment creates the counter (or replaces an expired one), the
    /// counter expires `window` from now. Creation and expiry happen in one step,
    /// so a counter can never be left without an expiry.
    async fn increment_window(&self, key: &str, window: Duration) -> Result<u64, StoreError>;

    async fn ping(&self) -> Result<(), StoreError>;

    /// Release connections. Safe to call more than once.
    async fn close(&self);
}
