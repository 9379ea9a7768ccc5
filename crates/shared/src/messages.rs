//! WebSocket message types for engine-client communication.
//!
//! ## Versioning Policy
//!
//! - New variants can be added at the end (forward compatible)
//! - Renaming variants is a breaking change

use serde::{Deserialize, Serialize};

use langomni_domain::{ActionParams, ActionResult, GameEvent};

// =============================================================================
// Client Messages (Player → Engine)
// =============================================================================

/// Messages from a connected client to the engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    /// Connection keep-alive
    Ping,
    /// Perform a game action
    Action { data: ActionPayload },
    /// Say something to every connected player
    Chat {
        #[serde(default)]
        message: String,
    },
}

/// Body of an `action` message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionPayload {
    pub action_type: String,
    #[serde(default)]
    pub action_data: ActionParams,
}

// =============================================================================
// Server Messages (Engine → Player)
// =============================================================================

/// Messages from the engine to a connected client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    /// Sent once after the connection is registered
    Connected { message: String, player_id: String },
    Pong,
    /// The action was accepted for processing
    ActionReceived { action_type: String },
    /// Final merged outcome for the sender's action
    ActionResult { result: ActionResult },
    /// Another player's action changed shared state
    GameEvent { event: GameEvent },
    Chat { player_id: String, message: String },
    PlayerDisconnected { player_id: String },
    Error { code: ErrorCode, message: String },
}

impl ServerMessage {
    pub fn error(code: ErrorCode, message: impl Into<String>) -> Self {
        Self::Error {
            code,
            message: message.into(),
        }
    }
}

/// Machine-readable error codes carried by `ServerMessage::Error`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    ParseError,
    RateLimited,
    BadRequest,
    /// Fallback for codes added by newer engines
    #[serde(other)]
    Unknown,
}
