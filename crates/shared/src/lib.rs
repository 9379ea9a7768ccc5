//! LangOmni Protocol - types exchanged over the live game connection.
//!
//! # Design Principles
//!
//! 1. **Minimal dependencies** - serde and the domain crate only
//! 2. **No business logic** - pure data types and serialization
//! 3. **Tagged JSON** - every message carries a snake_case `type` field

pub mod messages;

pub use messages::{ActionPayload, ClientMessage, ErrorCode, ServerMessage};
