//! API layer - HTTP and WebSocket entry points.

pub mod connections;
pub mod http;
pub mod notifications;
pub mod websocket;

use std::sync::Arc;

use axum::{routing::get, Router};

use crate::app::App;

pub use connections::{ConnectionError, ConnectionRegistry};
pub use notifications::NotificationRelay;

/// HTTP routes plus the game WebSocket, bound to `app`.
pub fn router(app: Arc<App>) -> Router {
    http::routes()
        .route("/ws/game/{actor_id}", get(websocket::ws_handler))
        .with_state(app)
}
