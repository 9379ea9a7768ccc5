//! LangOmni Engine - Main entry point.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::http::{HeaderValue, Method};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use langomni_engine::api;
use langomni_engine::app::{App, BackendTransports};
use langomni_engine::config::{EngineConfig, StoreLocation};
use langomni_engine::infrastructure::{
    clock::SystemClock,
    memory_store::MemoryStore,
    ports::{ClockPort, KeyValueStore},
    records::InMemoryRecords,
    sqlite_store::SqliteStore,
    vllm::VllmClient,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment from repo root (the engine may be started from `crates/engine`).
    load_dotenv_from_repo_root();

    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "langomni_engine=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting LangOmni Engine");

    let config = EngineConfig::from_env();
    let clock: Arc<dyn ClockPort> = Arc::new(SystemClock::new());

    let store: Arc<dyn KeyValueStore> = match &config.store {
        StoreLocation::Memory => {
            tracing::info!("Using in-process key-value store");
            Arc::new(MemoryStore::new())
        }
        StoreLocation::Sqlite(path) => {
            tracing::info!(path = %path, "Using SQLite key-value store");
            Arc::new(SqliteStore::new(path, clock.clone()).await?)
        }
    };

    let transports = BackendTransports {
        world: Arc::new(VllmClient::new(
            &config.world_backend.endpoint,
            &config.world_backend.model,
        )),
        npc: Arc::new(VllmClient::new(
            &config.npc_backend.endpoint,
            &config.npc_backend.model,
        )),
    };

    let app = Arc::new(App::new(
        &config,
        store,
        Arc::new(InMemoryRecords::starting_town()),
        transports,
        clock,
    ));
    app.initialize().await?;

    let mut router = api::router(app.clone()).layer(TraceLayer::new_for_http());
    if let Some(cors) = build_cors_layer_from_env() {
        router = router.layer(cors);
    }

    // Start server
    let addr: SocketAddr = config.listen_addr().parse()?;
    tracing::info!("Listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    app.shutdown().await;
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown signal received");
}

fn load_dotenv_from_repo_root() {
    let repo_root = std::path::Path::new(env!("CARGO_MANIFEST_DIR"))
        .join("..")
        .join("..");

    // Prefer local overrides.
    for filename in [".env.local", ".env"] {
        let path = repo_root.join(filename);
        if path.exists() {
            let _ = dotenvy::from_path(path);
        }
    }
}

fn build_cors_layer_from_env() -> Option<CorsLayer> {
    let allowed_origins = std::env::var("CORS_ALLOWED_ORIGINS")
        .ok()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())?;

    let cors = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([axum::http::header::CONTENT_TYPE]);

    if allowed_origins == "*" {
        return Some(cors.allow_origin(Any));
    }

    let origins: Vec<HeaderValue> = allowed_origins
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .filter_map(|s| HeaderValue::from_str(s).ok())
        .collect();

    if origins.is_empty() {
        return None;
    }
    Some(cors.allow_origin(origins))
}
