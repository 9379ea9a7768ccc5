//! Read-only world records.
//!
//! The engine looks these up from the record service; it never writes them.

use serde::{Deserialize, Serialize};

use crate::ActorId;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlayerRecord {
    pub player_id: ActorId,
    pub username: String,
    pub level: u32,
    pub hp: i32,
    pub max_hp: i32,
    pub location: String,
    #[serde(default)]
    pub inventory: Vec<String>,
}

impl PlayerRecord {
    /// A fresh level-1 character standing in `location`.
    pub fn new_adventurer(player_id: ActorId, location: impl Into<String>) -> Self {
        Self {
            username: player_id.to_string(),
            player_id,
            level: 1,
            hp: 100,
            max_hp: 100,
            location: location.into(),
            inventory: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LocationRecord {
    pub name: String,
    pub description: String,
    #[serde(default)]
    pub npcs: Vec<String>,
    #[serde(default)]
    pub items: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NpcRecord {
    pub npc_id: String,
    pub name: String,
    pub location: String,
    pub disposition: String,
}
