//! Player actions and their merged results.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{ActorId, GameEvent};

/// Which inference backend family an action needs.
///
/// Classes are not exclusive: an action kind may need neither, one, or both.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionClass {
    /// Changes the world; answered by the world-simulation backend.
    World,
    /// Involves an NPC; answered by the NPC backend.
    Character,
}

/// The category of a requested action.
///
/// Unknown kinds are kept verbatim in `Other` so the wire value survives a
/// round trip; they route to no backend class.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ActionKind {
    Move,
    Explore,
    Combat,
    Craft,
    Talk,
    Trade,
    Quest,
    Other(String),
}

impl ActionKind {
    pub fn as_str(&self) -> &str {
        match self {
            Self::Move => "move",
            Self::Explore => "explore",
            Self::Combat => "combat",
            Self::Craft => "craft",
            Self::Talk => "talk",
            Self::Trade => "trade",
            Self::Quest => "quest",
            Self::Other(kind) => kind,
        }
    }

    /// Backend classes this kind fans out to, in submission order.
    pub fn classes(&self) -> &'static [ActionClass] {
        match self {
            Self::Move | Self::Explore | Self::Combat | Self::Craft => &[ActionClass::World],
            Self::Talk | Self::Trade | Self::Quest => &[ActionClass::Character],
            Self::Other(_) => &[],
        }
    }

    /// Whether a successful world outcome for this kind is announced to
    /// every connected client.
    pub fn is_announced(&self) -> bool {
        matches!(self, Self::Combat)
    }
}

impl fmt::Display for ActionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<&str> for ActionKind {
    fn from(value: &str) -> Self {
        match value.trim().to_ascii_lowercase().as_str() {
            "move" | "movement" => Self::Move,
            "explore" | "exploration" => Self::Explore,
            "combat" | "attack" => Self::Combat,
            "craft" | "crafting" => Self::Craft,
            "talk" | "dialogue" => Self::Talk,
            "trade" => Self::Trade,
            "quest" => Self::Quest,
            _ => Self::Other(value.trim().to_string()),
        }
    }
}

impl From<String> for ActionKind {
    fn from(value: String) -> Self {
        Self::from(value.as_str())
    }
}

impl From<ActionKind> for String {
    fn from(value: ActionKind) -> Self {
        value.as_str().to_string()
    }
}

impl Serialize for ActionKind {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for ActionKind {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Ok(Self::from(raw))
    }
}

/// Parameters attached to an action.
///
/// The fields every kind understands are typed; anything else (chat text,
/// client-specific hints) lands in `extra`. `extra` is ordered so prompts built
/// from it are deterministic. A typed key carrying a non-string value (say a
/// coordinate map under `target`) is kept verbatim in `extra` instead.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ActionParams {
    /// Destination, opponent, or object the action is aimed at.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target: Option<String>,
    /// NPC addressed by character-class actions.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub npc: Option<String>,
    /// Item used, crafted, or traded.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub item: Option<String>,
    #[serde(flatten)]
    pub extra: BTreeMap<String, serde_json::Value>,
}

impl<'de> Deserialize<'de> for ActionParams {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let mut extra = BTreeMap::<String, serde_json::Value>::deserialize(deserializer)?;
        Ok(Self {
            target: take_string(&mut extra, "target"),
            npc: take_string(&mut extra, "npc"),
            item: take_string(&mut extra, "item"),
            extra,
        })
    }
}

fn take_string(map: &mut BTreeMap<String, serde_json::Value>, key: &str) -> Option<String> {
    match map.remove(key)? {
        serde_json::Value::String(s) => Some(s),
        serde_json::Value::Null => None,
        other => {
            map.insert(key.to_string(), other);
            None
        }
    }
}

impl ActionParams {
    pub fn with_target(mut self, target: impl Into<String>) -> Self {
        self.target = Some(target.into());
        self
    }

    pub fn with_npc(mut self, npc: impl Into<String>) -> Self {
        self.npc = Some(npc.into());
        self
    }

    pub fn with_extra(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.extra.insert(key.into(), value);
        self
    }

    /// Render as `key=value` pairs for prompt text.
    pub fn describe(&self) -> String {
        let mut parts = Vec::new();
        if let Some(target) = &self.target {
            parts.push(format!("target={target}"));
        }
        if let Some(npc) = &self.npc {
            parts.push(format!("npc={npc}"));
        }
        if let Some(item) = &self.item {
            parts.push(format!("item={item}"));
        }
        for (key, value) in &self.extra {
            match value {
                serde_json::Value::String(s) => parts.push(format!("{key}={s}")),
                other => parts.push(format!("{key}={other}")),
            }
        }
        if parts.is_empty() {
            "none".to_string()
        } else {
            parts.join(", ")
        }
    }
}

/// One player-originated action. Immutable once received.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionRequest {
    pub actor_id: ActorId,
    pub kind: ActionKind,
    #[serde(default)]
    pub params: ActionParams,
}

impl ActionRequest {
    pub fn new(actor_id: ActorId, kind: ActionKind, params: ActionParams) -> Self {
        Self {
            actor_id,
            kind,
            params,
        }
    }
}

/// The merged answer to one action.
///
/// Built once per dispatch and never mutated afterwards; the cache stores it
/// verbatim, so a cache hit returns exactly what the first caller saw.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionResult {
    pub success: bool,
    pub timestamp: DateTime<Utc>,
    /// Primary narrative, taken from the world-class outcome.
    pub result: String,
    #[serde(default)]
    pub world_state: Option<serde_json::Value>,
    /// NPC replies in the order their tasks completed.
    #[serde(default)]
    pub npc_responses: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub broadcast: Option<GameEvent>,
}

impl ActionResult {
    /// An empty successful result, ready for merging into.
    pub fn empty(timestamp: DateTime<Utc>) -> Self {
        Self {
            success: true,
            timestamp,
            result: String::new(),
            world_state: None,
            npc_responses: Vec::new(),
            broadcast: None,
        }
    }

    /// The response used when the fan-out deadline elapses.
    pub fn generic_fallback(kind: &ActionKind, timestamp: DateTime<Utc>) -> Self {
        Self {
            result: format!("Action '{kind}' processed with basic response."),
            ..Self::empty(timestamp)
        }
    }
}
