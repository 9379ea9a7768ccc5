//! Fixed-window admission control per actor.

use std::sync::Arc;
use std::time::Duration;

use langomni_domain::ActorId;

use crate::infrastructure::ports::KeyValueStore;

pub const DEFAULT_MAX_REQUESTS: u64 = 4;
pub const DEFAULT_WINDOW: Duration = Duration::from_secs(1);

/// Counts requests per actor in fixed windows held in the key-value store.
///
/// A refused request still counts toward the window. Store failures admit the
/// request.
pub struct RateLimiter {
    store: Arc<dyn KeyValueStore>,
    max_requests: u64,
    window: Duration,
}

impl RateLimiter {
    pub fn new(store: Arc<dyn KeyValueStore>, max_requests: u64, window: Duration) -> Self {
        Self {
            store,
            max_requests,
            window,
        }
    }

    fn key(actor_id: &ActorId) -> String {
        format!("ratelimit:{actor_id}")
    }

    /// Whether `actor_id` may issue another request in the current window.
    pub async fn check(&self, actor_id: &ActorId) -> bool {
        match self
            .store
            .increment_window(&Self::key(actor_id), self.window)
            .await
        {
            Ok(count) if count > self.max_requests => {
                tracing::debug!(actor_id = %actor_id, count, limit = self.max_requests, "Rate limit exceeded");
                false
            }
            Ok(_) => true,
            Err(e) => {
                tracing::warn!(actor_id = %actor_id, error = %e, "Rate limiter store failed, admitting request");
                true
            }
        }
    }

    /// Clear the actor's current window.
    pub async fn reset(&self, actor_id: &ActorId) {
        if let Err(e) = self.store.delete(&Self::key(actor_id)).await {
            tracing::warn!(actor_id = %actor_id, error = %e, "Rate limit reset failed");
        }
    }
}
