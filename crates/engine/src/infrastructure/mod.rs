//! Infrastructure implementations.
//!
//! Contains port trait implementations for external dependencies.

pub mod action_cache;
pub mod backend_client;
pub mod clock;
pub mod memory_store;
pub mod ports;
pub mod rate_limiter;
pub mod records;
pub mod sqlite_store;
pub mod vllm;
