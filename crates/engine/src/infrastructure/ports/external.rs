//! Inference backend port.

use async_trait::async_trait;

use super::error::BackendError;

/// One completion call, in the shape every OpenAI-style completion server accepts.
#[derive(Debug, Clone, PartialEq)]
pub struct CompletionRequest {
    pub prompt: String,
    pub max_tokens: u32,
    pub temperature: f32,
    pub top_p: f32,
}

/// Generated text plus the usage the backend reported.
#[derive(Debug, Clone, PartialEq)]
pub struct Completion {
    pub text: String,
    /// `usage.total_tokens`, or 0 when the backend omitted usage.
    pub total_tokens: u64,
}

/// A single inference endpoint.
///
/// Implementations own their transport connection pool: `initialize` creates it,
/// `shutdown` releases it, and `shutdown` must be a no-op when nothing was created.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait CompletionPort: Send + Sync {
    async fn initialize(&self) -> Result<(), BackendError>;
    async fn complete(&self, request: CompletionRequest) -> Result<Completion, BackendError>;
    /// Lightweight liveness probe; never fails, reports `false` instead.
    async fn health(&self) -> bool;
    async fn shutdown(&self);
}
