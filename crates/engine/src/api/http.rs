//! HTTP routes.

use std::collections::BTreeMap;
use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use langomni_domain::{ActionParams, ActionResult, ActorId, LocationRecord, NpcRecord, PlayerRecord};

use crate::app::{App, HealthReport, SystemStats};
use crate::infrastructure::action_cache::CacheMetrics;
use crate::infrastructure::backend_client::BackendMetricsSnapshot;
use crate::use_cases::dispatch::DispatchError;

/// Create all HTTP routes.
pub fn routes() -> Router<Arc<App>> {
    Router::new()
        .route("/", get(health))
        .route("/api/health", get(health))
        .route("/api/health/detailed", get(detailed_health))
        .route("/api/game/action", post(perform_action))
        .route("/api/game/player/{id}", get(get_player))
        .route("/api/game/world/{location}", get(get_location))
        .route("/api/game/npcs/{location}", get(get_npcs_at))
        .route("/api/admin/stats", get(system_stats))
        .route("/api/admin/players", get(list_players))
        .route("/api/admin/npcs", get(list_npcs))
        .route("/api/admin/metrics/backends", get(backend_metrics))
        .route("/api/admin/metrics/cache", get(cache_metrics))
        .route(
            "/api/admin/rate-limit/{actor_id}/reset",
            post(reset_rate_limit),
        )
}

#[derive(Debug, Serialize)]
struct HealthResponse {
    status: &'static str,
    timestamp: DateTime<Utc>,
}

async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy",
        timestamp: Utc::now(),
    })
}

async fn detailed_health(State(app): State<Arc<App>>) -> Json<HealthReport> {
    Json(app.health_report().await)
}

// =============================================================================
// Game
// =============================================================================

#[derive(Debug, Deserialize)]
struct ActionBody {
    player_id: String,
    action_type: String,
    #[serde(default)]
    action_data: ActionParams,
}

async fn perform_action(
    State(app): State<Arc<App>>,
    Json(body): Json<ActionBody>,
) -> Result<Json<ActionResult>, ApiError> {
    let result = app
        .dispatcher
        .process_action(&body.player_id, &body.action_type, body.action_data)
        .await?;
    Ok(Json(result))
}

async fn get_player(
    State(app): State<Arc<App>>,
    Path(id): Path<String>,
) -> Result<Json<PlayerRecord>, ApiError> {
    let actor_id = parse_actor(&id)?;
    let player = app.records.player(&actor_id).await?.ok_or(ApiError::NotFound)?;
    Ok(Json(player))
}

async fn get_location(
    State(app): State<Arc<App>>,
    Path(location): Path<String>,
) -> Result<Json<LocationRecord>, ApiError> {
    let record = app
        .records
        .location(&location)
        .await?
        .ok_or(ApiError::NotFound)?;
    Ok(Json(record))
}

#[derive(Debug, Serialize)]
struct NpcsAtLocation {
    location: String,
    npcs: Vec<NpcRecord>,
}

async fn get_npcs_at(
    State(app): State<Arc<App>>,
    Path(location): Path<String>,
) -> Result<Json<NpcsAtLocation>, ApiError> {
    let npcs = app.records.npcs_at(&location).await?;
    Ok(Json(NpcsAtLocation { location, npcs }))
}

// =============================================================================
// Admin
// =============================================================================

#[derive(Debug, Serialize)]
struct Listing<T> {
    items: Vec<T>,
    count: usize,
}

impl<T> From<Vec<T>> for Listing<T> {
    fn from(items: Vec<T>) -> Self {
        Self {
            count: items.len(),
            items,
        }
    }
}

async fn system_stats(State(app): State<Arc<App>>) -> Json<SystemStats> {
    Json(app.system_stats().await)
}

async fn list_players(State(app): State<Arc<App>>) -> Result<Json<Listing<PlayerRecord>>, ApiError> {
    Ok(Json(app.records.players().await?.into()))
}

async fn list_npcs(State(app): State<Arc<App>>) -> Result<Json<Listing<NpcRecord>>, ApiError> {
    Ok(Json(app.records.npcs().await?.into()))
}

async fn backend_metrics(
    State(app): State<Arc<App>>,
) -> Json<BTreeMap<String, BackendMetricsSnapshot>> {
    Json(app.backend_metrics())
}

async fn cache_metrics(State(app): State<Arc<App>>) -> Json<CacheMetrics> {
    Json(app.cache_metrics())
}

async fn reset_rate_limit(
    State(app): State<Arc<App>>,
    Path(actor_id): Path<String>,
) -> Result<StatusCode, ApiError> {
    let actor_id = parse_actor(&actor_id)?;
    app.rate_limiter.reset(&actor_id).await;
    tracing::info!(actor_id = %actor_id, "Rate limit window reset");
    Ok(StatusCode::NO_CONTENT)
}

fn parse_actor(raw: &str) -> Result<ActorId, ApiError> {
    ActorId::new(raw).map_err(|e| ApiError::BadRequest(e.to_string()))
}

#[derive(Debug)]
pub enum ApiError {
    NotFound,
    BadRequest(String),
    RateLimited(String),
    Internal(String),
}

impl axum::response::IntoResponse for ApiError {
    fn into_response(self) -> axum::response::Response {
        match self {
            ApiError::NotFound => (StatusCode::NOT_FOUND, "Not found").into_response(),
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg).into_response(),
            ApiError::RateLimited(msg) => (StatusCode::TOO_MANY_REQUESTS, msg).into_response(),
            ApiError::Internal(msg) => {
                tracing::error!(error = %msg, "Request failed");
                (StatusCode::INTERNAL_SERVER_ERROR, "Internal error").into_response()
            }
        }
    }
}

impl From<crate::infrastructure::ports::RepoError> for ApiError {
    fn from(e: crate::infrastructure::ports::RepoError) -> Self {
        match e {
            crate::infrastructure::ports::RepoError::NotFound { .. } => ApiError::NotFound,
            other => ApiError::Internal(other.to_string()),
        }
    }
}

impl From<DispatchError> for ApiError {
    fn from(e: DispatchError) -> Self {
        match e {
            DispatchError::RateLimited { .. } => ApiError::RateLimited(e.to_string()),
            DispatchError::InvalidRequest(msg) => ApiError::BadRequest(msg),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::test_support::in_memory_app;
    use crate::config::EngineConfig;
    use axum::body::{to_bytes, Body};
    use axum::http::Request;
    use serde_json::{json, Value};
    use tower::ServiceExt;

    fn router(config: &EngineConfig) -> Router {
        routes().with_state(Arc::new(in_memory_app(config)))
    }

    async fn send(router: &Router, request: Request<Body>) -> (StatusCode, Value) {
        let response = router.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let body = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
        (status, body)
    }

    fn get(uri: &str) -> Request<Body> {
        Request::builder().uri(uri).body(Body::empty()).unwrap()
    }

    fn post_json(uri: &str, body: Value) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri(uri)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    #[tokio::test]
    async fn health_reports_healthy() {
        let router = router(&EngineConfig::default());
        let (status, body) = send(&router, get("/api/health")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "healthy");

        let (status, body) = send(&router, get("/api/health/detailed")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["services"]["store"], "healthy");
        assert_eq!(body["services"]["npc_backend"], "disabled");
    }

    #[tokio::test]
    async fn action_returns_merged_result_then_429() {
        let mut config = EngineConfig::default();
        config.rate_limit_per_player = 1;
        let router = router(&config);

        let action = json!({
            "player_id": "p1",
            "action_type": "talk",
            "action_data": { "npc": "Mira", "message": "hello" }
        });
        let (status, body) = send(&router, post_json("/api/game/action", action.clone())).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["success"], true);
        assert_eq!(body["npc_responses"], json!(["The NPC nods silently."]));

        let (status, _) = send(&router, post_json("/api/game/action", action)).await;
        assert_eq!(status, StatusCode::TOO_MANY_REQUESTS);

        let (status, _) = send(&router, post_json("/api/admin/rate-limit/p1/reset", json!({}))).await;
        assert_eq!(status, StatusCode::NO_CONTENT);
    }

    #[tokio::test]
    async fn blank_player_is_bad_request() {
        let router = router(&EngineConfig::default());
        let (status, _) = send(
            &router,
            post_json(
                "/api/game/action",
                json!({ "player_id": " ", "action_type": "move" }),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn record_lookups_and_misses() {
        let router = router(&EngineConfig::default());

        let (status, _) = send(&router, get("/api/game/player/nobody")).await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let (status, body) = send(&router, get("/api/game/world/rusty_tankard")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["npcs"], json!(["Mira the Innkeeper"]));

        let (status, _) = send(&router, get("/api/game/world/atlantis")).await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let (_, body) = send(&router, get("/api/game/npcs/north_gate")).await;
        assert_eq!(body["location"], "north_gate");
        assert_eq!(body["npcs"][0]["name"], "Captain Hale");
    }

    #[tokio::test]
    async fn admin_endpoints_report_state() {
        let router = router(&EngineConfig::default());
        send(
            &router,
            post_json(
                "/api/game/action",
                json!({ "player_id": "p1", "action_type": "move" }),
            ),
        )
        .await;

        let (_, stats) = send(&router, get("/api/admin/stats")).await;
        assert_eq!(stats["total_actions"], 1);
        assert_eq!(stats["backends"]["world"], "offline");

        let (_, npcs) = send(&router, get("/api/admin/npcs")).await;
        assert_eq!(npcs["count"], 3);

        let (_, players) = send(&router, get("/api/admin/players")).await;
        assert_eq!(players["count"], 0);

        let (_, cache) = send(&router, get("/api/admin/metrics/cache")).await;
        assert_eq!(cache["misses"], 1);
        assert_eq!(cache["hits"], 0);

        let (status, backends) = send(&router, get("/api/admin/metrics/backends")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(backends, json!({}));
    }
}
