//! Prompt text for the inference backends and the local stand-ins used when a
//! backend is disabled or fails.

use langomni_domain::{ActionKind, ActionRequest};

pub const NPC_FALLBACK: &str = "The NPC nods silently.";

pub fn world_prompt(request: &ActionRequest, location: Option<&str>) -> String {
    let mut prompt = format!(
        "You are the world simulator for an adventure game.\n\
         Player: {}\n\
         Action: {}\n\
         Data: {}\n",
        request.actor_id,
        request.kind,
        request.params.describe(),
    );
    if let Some(location) = location {
        prompt.push_str(&format!("Location: {location}\n"));
    }
    prompt.push_str("\nDescribe the consequences and world changes from this action.");
    prompt
}

pub fn npc_prompt(request: &ActionRequest) -> String {
    let npc = request.params.npc.as_deref().unwrap_or("Unknown");
    format!(
        "You are {npc}, an NPC in an adventure game.\n\
         Player {} wants to: {}\n\
         Context: {}\n\
         \n\
         Respond in character.",
        request.actor_id,
        request.kind,
        request.params.describe(),
    )
}

pub fn world_fallback(kind: &ActionKind) -> String {
    format!("You performed {kind}. The world changes slightly.")
}

pub fn npc_fallback() -> String {
    NPC_FALLBACK.to_string()
}
