//! LangOmni Engine library.
//!
//! Server-side code for the LangOmni adventure game: player actions come in over
//! HTTP or WebSocket, fan out to inference backends, and come back merged.
//!
//! ## Structure
//!
//! - `use_cases/` - action dispatch
//! - `infrastructure/` - external dependency implementations (ports + adapters)
//! - `api/` - HTTP and WebSocket entry points, connection registry
//! - `app` - application composition
//! - `config` - environment configuration

pub mod api;
pub mod app;
pub mod config;
pub mod infrastructure;
pub mod use_cases;

pub use app::App;
pub use config::EngineConfig;
