//! Error types for port operations.

/// Failures talking to one inference backend.
#[derive(Debug, Clone, thiserror::Error)]
pub enum BackendError {
    /// Transport-level failure (connect, timeout, reset).
    #[error("Backend request failed: {0}")]
    RequestFailed(String),

    /// The backend answered with a non-success status.
    #[error("Backend returned HTTP {status}: {body}")]
    Status { status: u16, body: String },

    /// The body did not match the completion wire format.
    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    /// Rejected before any network call (empty prompt, zero token budget).
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// `initialize()` has not completed, or `shutdown()` already ran.
    #[error("Backend client is not initialized")]
    NotInitialized,

    /// Every allowed attempt failed.
    #[error("Backend {backend} unavailable after {attempts} attempt(s): {last_error}")]
    Unavailable {
        backend: String,
        attempts: u32,
        last_error: String,
    },
}

impl BackendError {
    /// Whether another attempt could plausibly succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::RequestFailed(_) | Self::InvalidResponse(_) => true,
            // Client errors will fail the same way again, except throttling and timeouts
            Self::Status { status, .. } => *status >= 500 || *status == 408 || *status == 429,
            Self::InvalidRequest(_) | Self::NotInitialized | Self::Unavailable { .. } => false,
        }
    }
}

/// Key-value store failures. Callers in the dispatch path never surface these.
#[derive(Debug, Clone, thiserror::Error)]
pub enum StoreError {
    #[error("Store error in {operation}: {message}")]
    Backend {
        operation: &'static str,
        message: String,
    },

    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl StoreError {
    pub fn backend(operation: &'static str, message: impl ToString) -> Self {
        Self::Backend {
            operation,
            message: message.to_string(),
        }
    }
}

/// Record lookup errors with context for debugging.
#[derive(Debug, thiserror::Error)]
pub enum RepoError {
    #[error("{entity_type} not found: {id}")]
    NotFound {
        entity_type: &'static str,
        id: String,
    },

    #[error("Database error in {operation}: {message}")]
    Database {
        operation: &'static str,
        message: String,
    },
}

impl RepoError {
    #[cfg(test)]
    pub fn database(operation: &'static str, message: impl ToString) -> Self {
        Self::Database {
            operation,
            message: message.to_string(),
        }
    }
}
