//! Resilient backend client with exponential backoff retry and metrics
//!
//! Wraps any `CompletionPort` with retry logic to handle transient failures and
//! keeps per-backend request, token, and latency counters.

use rand::Rng;
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::infrastructure::ports::{BackendError, CompletionPort, CompletionRequest};

/// Default sampling temperature for generation.
pub const DEFAULT_TEMPERATURE: f32 = 0.7;

/// Default nucleus sampling cutoff for generation.
pub const DEFAULT_TOP_P: f32 = 0.9;

/// Liveness probes get their own short budget.
const HEALTH_CHECK_TIMEOUT: Duration = Duration::from_secs(5);

/// Configuration for retry behavior
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Total attempts including the first one
    pub max_attempts: u32,
    /// Base delay in milliseconds before first retry
    pub base_delay_ms: u64,
    /// Maximum delay in milliseconds (caps exponential growth)
    pub max_delay_ms: u64,
    /// Jitter factor (0.0-1.0) for randomizing delays to prevent thundering herd
    pub jitter_factor: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 1000,
            max_delay_ms: 10_000,
            jitter_factor: 0.2,
        }
    }
}

/// Lock-free counters; many requests hit the same backend concurrently.
#[derive(Debug, Default)]
struct MetricsCounters {
    total_requests: AtomicU64,
    failed_requests: AtomicU64,
    total_tokens: AtomicU64,
    total_latency_us: AtomicU64,
}

/// Read-only view of one backend's counters.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BackendMetricsSnapshot {
    pub backend: String,
    pub model: String,
    /// Successful generations
    pub total_requests: u64,
    /// Generations that exhausted every attempt
    pub failed_requests: u64,
    /// `total / (total + failed)`, 0 before any request
    pub success_rate: f64,
    pub total_tokens: u64,
    /// Mean latency of successful generations, 0 before any request
    pub avg_latency_ms: f64,
}

/// One inference backend: retry, backoff, and metrics around a transport.
pub struct BackendClient {
    name: String,
    model: String,
    transport: Arc<dyn CompletionPort>,
    config: RetryConfig,
    metrics: MetricsCounters,
}

impl BackendClient {
    pub fn new(
        name: impl Into<String>,
        model: impl Into<String>,
        transport: Arc<dyn CompletionPort>,
        config: RetryConfig,
    ) -> Self {
        Self {
            name: name.into(),
            model: model.into(),
            transport,
            config,
            metrics: MetricsCounters::default(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub async fn initialize(&self) -> Result<(), BackendError> {
        self.transport.initialize().await?;
        tracing::info!(backend = %self.name, model = %self.model, "Backend client initialized");
        Ok(())
    }

    /// Release the transport pool. Safe even if `initialize` never succeeded.
    pub async fn shutdown(&self) {
        self.transport.shutdown().await;
        tracing::info!(backend = %self.name, "Backend client shut down");
    }

    /// Calculate delay for a given retry number using exponential backoff with jitter
    fn calculate_delay(&self, retry: u32) -> u64 {
        let base = self.config.base_delay_ms;
        // Exponential: base * 2^(retry-1)
        let exponential = base.saturating_mul(2u64.saturating_pow(retry.saturating_sub(1)));
        let capped = exponential.min(self.config.max_delay_ms);

        // Add jitter: ±jitter_factor around the delay
        let jitter_range = (capped as f64 * self.config.jitter_factor) as i64;
        if jitter_range > 0 {
            let jitter = rand::thread_rng().gen_range(-jitter_range..=jitter_range);
            (capped as i64 + jitter).max(0) as u64
        } else {
            capped
        }
    }

    /// Generate text for `prompt`.
    ///
    /// Transient failures are retried up to `max_attempts` in total. The request
    /// counts toward `total_requests` once, on success, and toward
    /// `failed_requests` once, when the last attempt fails.
    pub async fn generate(
        &self,
        prompt: &str,
        max_tokens: u32,
        temperature: f32,
        top_p: f32,
    ) -> Result<String, BackendError> {
        if prompt.trim().is_empty() {
            return Err(BackendError::InvalidRequest("prompt is empty".to_string()));
        }
        if max_tokens == 0 {
            return Err(BackendError::InvalidRequest(
                "max_tokens must be positive".to_string(),
            ));
        }

        let request = CompletionRequest {
            prompt: prompt.to_string(),
            max_tokens,
            temperature,
            top_p,
        };
        let max_attempts = self.config.max_attempts.max(1);
        let mut attempt = 0;

        loop {
            attempt += 1;
            let started = Instant::now();

            let error = match self.transport.complete(request.clone()).await {
                Ok(completion) => {
                    let elapsed = started.elapsed();
                    self.record_success(completion.total_tokens, elapsed);
                    if attempt > 1 {
                        tracing::info!(
                            backend = %self.name,
                            attempt,
                            "Backend request succeeded after retry"
                        );
                    }
                    tracing::debug!(
                        backend = %self.name,
                        chars = completion.text.len(),
                        elapsed_ms = elapsed.as_millis() as u64,
                        "Backend generated text"
                    );
                    return Ok(completion.text);
                }
                Err(e) => e,
            };

            if attempt < max_attempts && error.is_transient() {
                let delay = self.calculate_delay(attempt);
                tracing::warn!(
                    backend = %self.name,
                    attempt,
                    max_attempts,
                    delay_ms = delay,
                    error = %error,
                    "Backend request failed, retrying..."
                );
                tokio::time::sleep(Duration::from_millis(delay)).await;
                continue;
            }

            self.metrics.failed_requests.fetch_add(1, Ordering::Relaxed);
            tracing::error!(
                backend = %self.name,
                attempts = attempt,
                error = %error,
                "Backend request failed"
            );
            return Err(BackendError::Unavailable {
                backend: self.name.clone(),
                attempts: attempt,
                last_error: error.to_string(),
            });
        }
    }

    fn record_success(&self, tokens: u64, elapsed: Duration) {
        self.metrics.total_requests.fetch_add(1, Ordering::Relaxed);
        self.metrics.total_tokens.fetch_add(tokens, Ordering::Relaxed);
        self.metrics
            .total_latency_us
            .fetch_add(elapsed.as_micros() as u64, Ordering::Relaxed);
    }

    /// Liveness probe with its own short timeout. Never fails.
    pub async fn health_check(&self) -> bool {
        match tokio::time::timeout(HEALTH_CHECK_TIMEOUT, self.transport.health()).await {
            Ok(healthy) => healthy,
            Err(_) => {
                tracing::warn!(backend = %self.name, "Health check timed out");
                false
            }
        }
    }

    pub fn get_metrics(&self) -> BackendMetricsSnapshot {
        let total = self.metrics.total_requests.load(Ordering::Relaxed);
        let failed = self.metrics.failed_requests.load(Ordering::Relaxed);
        let tokens = self.metrics.total_tokens.load(Ordering::Relaxed);
        let latency_us = self.metrics.total_latency_us.load(Ordering::Relaxed);

        let attempted = total + failed;
        let success_rate = if attempted > 0 {
            total as f64 / attempted as f64
        } else {
            0.0
        };
        let avg_latency_ms = if total > 0 {
            latency_us as f64 / total as f64 / 1000.0
        } else {
            0.0
        };

        BackendMetricsSnapshot {
            backend: self.name.clone(),
            model: self.model.clone(),
            total_requests: total,
            failed_requests: failed,
            success_rate,
            total_tokens: tokens,
            avg_latency_ms,
        }
    }
}
