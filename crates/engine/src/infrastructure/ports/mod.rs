//! Port traits for infrastructure boundaries.
//!
//! These are the only abstractions in the engine. Everything else is concrete types.
//! Ports exist for:
//! - Inference backends (could swap vLLM -> any OpenAI-style completion server)
//! - The shared key-value store (in-process map or SQLite, Redis-shaped contract)
//! - Player/location/NPC record lookup (owned by another service)
//! - Clock (for testing)

mod error;
mod external;
mod records;
mod store;
mod testing;

// =============================================================================
// External Service Ports
// =============================================================================
pub use external::{Completion, CompletionPort, CompletionRequest};
pub use records::RecordStore;
pub use store::KeyValueStore;

#[cfg(test)]
pub use external::MockCompletionPort;
#[cfg(test)]
pub use records::MockRecordStore;
#[cfg(test)]
pub use store::MockKeyValueStore;
#[cfg(test)]
pub use testing::MockClockPort;

// =============================================================================
// Testing Ports
// =============================================================================
pub use testing::ClockPort;

// =============================================================================
// Error Types
// =============================================================================
pub use error::{BackendError, RepoError, StoreError};
