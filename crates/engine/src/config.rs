//! Process configuration read from the environment.

use std::time::Duration;

pub const DEFAULT_WORLD_URL: &str = "http://localhost:11434";
pub const DEFAULT_WORLD_MODEL: &str = "llama3.1:70b";
pub const DEFAULT_NPC_URL: &str = "http://localhost:11435";
pub const DEFAULT_NPC_MODEL: &str = "llama3.1:8b";

/// Identity of one inference backend. Fixed at startup.
#[derive(Debug, Clone, PartialEq)]
pub struct BackendTarget {
    pub name: String,
    pub endpoint: String,
    pub model: String,
    pub enabled: bool,
    pub max_tokens: u32,
}

/// Where cached results and rate-limit windows live.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreLocation {
    Memory,
    Sqlite(String),
}

#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub server_host: String,
    pub server_port: u16,
    pub store: StoreLocation,
    pub world_backend: BackendTarget,
    pub npc_backend: BackendTarget,
    pub action_timeout: Duration,
    pub rate_limit_per_player: u64,
    pub rate_limit_window: Duration,
    pub cache_ttl: Duration,
}

impl EngineConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from any variable source. Missing or unparseable values use defaults.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let vars = Vars(&lookup);

        Self {
            server_host: vars.string("SERVER_HOST", "0.0.0.0"),
            server_port: vars.parse("SERVER_PORT", 8000),
            store: parse_store(&vars.string("STORE_URL", "memory")),
            world_backend: BackendTarget {
                name: "world".into(),
                endpoint: vars.string("WORLD_BACKEND_URL", DEFAULT_WORLD_URL),
                model: vars.string("WORLD_BACKEND_MODEL", DEFAULT_WORLD_MODEL),
                enabled: vars.parse("WORLD_BACKEND_ENABLED", false),
                max_tokens: vars.parse("WORLD_BACKEND_MAX_TOKENS", 256),
            },
            npc_backend: BackendTarget {
                name: "npc".into(),
                endpoint: vars.string("NPC_BACKEND_URL", DEFAULT_NPC_URL),
                model: vars.string("NPC_BACKEND_MODEL", DEFAULT_NPC_MODEL),
                enabled: vars.parse("NPC_BACKEND_ENABLED", false),
                max_tokens: vars.parse("NPC_BACKEND_MAX_TOKENS", 128),
            },
            action_timeout: Duration::from_millis(vars.parse("ACTION_TIMEOUT_MS", 5000)),
            rate_limit_per_player: vars.parse("RATE_LIMIT_PER_PLAYER", 4),
            rate_limit_window: Duration::from_secs(vars.parse("RATE_LIMIT_WINDOW_SECS", 1)),
            cache_ttl: Duration::from_secs(vars.parse("CACHE_TTL_SECONDS", 300)),
        }
    }

    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.server_host, self.server_port)
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self::from_lookup(|_| None)
    }
}

fn parse_store(url: &str) -> StoreLocation {
    match url.strip_prefix("sqlite:") {
        Some(path) if !path.is_empty() => StoreLocation::Sqlite(path.to_string()),
        _ => {
            if url != "memory" {
                tracing::warn!(store_url = %url, "Unrecognised STORE_URL, using in-memory store");
            }
            StoreLocation::Memory
        }
    }
}

struct Vars<'a, F: Fn(&str) -> Option<String>>(&'a F);

impl<F: Fn(&str) -> Option<String>> Vars<'_, F> {
    fn get(&self, key: &str) -> Option<String> {
        (self.0)(key)
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
    }

    fn string(&self, key: &str, default: &str) -> String {
        self.get(key).unwrap_or_else(|| default.to_string())
    }

    fn parse<T: std::str::FromStr + std::fmt::Debug>(&self, key: &str, default: T) -> T {
        let Some(raw) = self.get(key) else {
            return default;
        };
        match raw.parse() {
            Ok(value) => value,
            Err(_) => {
                tracing::warn!(key, value = %raw, default = ?default, "Unparseable setting, using default");
                default
            }
        }
    }
}
