//! Events republished to every connected client.

use serde::{Deserialize, Serialize};

use crate::{ActionKind, ActorId};

/// A state change other players should hear about.
///
/// Produced by the dispatcher when a merged action result is broadcast-worthy
/// and delivered to the connection registry by the notification relay.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GameEvent {
    pub actor_id: ActorId,
    pub action_kind: ActionKind,
    pub summary: String,
}

impl GameEvent {
    pub fn new(actor_id: ActorId, action_kind: ActionKind, summary: impl Into<String>) -> Self {
        Self {
            actor_id,
            action_kind,
            summary: summary.into(),
        }
    }
}
