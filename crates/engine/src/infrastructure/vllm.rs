//! vLLM client (OpenAI-compatible completions API)

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::sync::RwLock;

use crate::infrastructure::ports::{BackendError, Completion, CompletionPort, CompletionRequest};

/// Timeout for a single completion request. Generation on a busy GPU is slow.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

/// Liveness probes must answer quickly or count as down.
const HEALTH_TIMEOUT: Duration = Duration::from_secs(5);

/// Client for one vLLM (or any OpenAI-style `/v1/completions`) server.
///
/// Owns a single `reqwest::Client` connection pool, created by `initialize`
/// and dropped by `shutdown`.
pub struct VllmClient {
    client: RwLock<Option<Client>>,
    base_url: String,
    model: String,
    request_timeout: Duration,
}

impl VllmClient {
    pub fn new(base_url: &str, model: &str) -> Self {
        Self::with_timeout(base_url, model, REQUEST_TIMEOUT)
    }

    /// Create client with a custom per-request timeout.
    pub fn with_timeout(base_url: &str, model: &str, request_timeout: Duration) -> Self {
        Self {
            client: RwLock::new(None),
            base_url: base_url.trim_end_matches('/').to_string(),
            model: model.to_string(),
            request_timeout,
        }
    }

    async fn pool(&self) -> Result<Client, BackendError> {
        self.client
            .read()
            .await
            .clone()
            .ok_or(BackendError::NotInitialized)
    }
}

#[async_trait]
impl CompletionPort for VllmClient {
    async fn initialize(&self) -> Result<(), BackendError> {
        let mut guard = self.client.write().await;
        if guard.is_some() {
            return Ok(());
        }

        let client = Client::builder()
            .timeout(self.request_timeout)
            .connect_timeout(CONNECT_TIMEOUT)
            .build()
            .map_err(|e| BackendError::RequestFailed(e.to_string()))?;
        *guard = Some(client);

        tracing::info!(base_url = %self.base_url, model = %self.model, "Completion client initialized");
        Ok(())
    }

    async fn complete(&self, request: CompletionRequest) -> Result<Completion, BackendError> {
        let client = self.pool().await?;

        let api_request = CompletionApiRequest {
            model: &self.model,
            prompt: &request.prompt,
            max_tokens: request.max_tokens,
            temperature: request.temperature,
            top_p: request.top_p,
            stream: false,
        };

        let response = client
            .post(format!("{}/v1/completions", self.base_url))
            .json(&api_request)
            .send()
            .await
            .map_err(|e| BackendError::RequestFailed(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .map_err(|e| BackendError::RequestFailed(e.to_string()))?;
            return Err(BackendError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let api_response: CompletionApiResponse = response
            .json()
            .await
            .map_err(|e| BackendError::InvalidResponse(e.to_string()))?;

        convert_response(api_response)
    }

    async fn health(&self) -> bool {
        let Ok(client) = self.pool().await else {
            return false;
        };

        match client
            .get(format!("{}/health", self.base_url))
            .timeout(HEALTH_TIMEOUT)
            .send()
            .await
        {
            Ok(response) => response.status() == reqwest::StatusCode::OK,
            Err(e) => {
                tracing::debug!(base_url = %self.base_url, error = %e, "Health probe failed");
                false
            }
        }
    }

    async fn shutdown(&self) {
        if self.client.write().await.take().is_some() {
            tracing::info!(base_url = %self.base_url, "Completion client shut down");
        }
    }
}

fn convert_response(response: CompletionApiResponse) -> Result<Completion, BackendError> {
    let choice = response
        .choices
        .into_iter()
        .next()
        .ok_or_else(|| BackendError::InvalidResponse("No choices in completion response".to_string()))?;

    Ok(Completion {
        text: choice.text,
        total_tokens: response.usage.map(|u| u.total_tokens).unwrap_or(0),
    })
}

// =============================================================================
// Completion API types
// =============================================================================

#[derive(Debug, Serialize)]
struct CompletionApiRequest<'a> {
    model: &'a str,
    prompt: &'a str,
    max_tokens: u32,
    temperature: f32,
    top_p: f32,
    stream: bool,
}

#[derive(Debug, Deserialize)]
struct CompletionApiResponse {
    choices: Vec<CompletionApiChoice>,
    usage: Option<CompletionApiUsage>,
}

#[derive(Debug, Deserialize)]
struct CompletionApiChoice {
    text: String,
}

#[derive(Debug, Deserialize)]
struct CompletionApiUsage {
    total_tokens: u64,
}
