//! Application state and composition.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::api::connections::ConnectionRegistry;
use crate::api::notifications::{NotificationRelay, NOTIFICATION_BUFFER};
use crate::config::{BackendTarget, EngineConfig};
use crate::infrastructure::action_cache::{ActionCache, CacheMetrics};
use crate::infrastructure::backend_client::{BackendClient, BackendMetricsSnapshot, RetryConfig};
use crate::infrastructure::ports::{
    ClockPort, CompletionPort, KeyValueStore, RecordStore, StoreError,
};
use crate::infrastructure::rate_limiter::RateLimiter;
use crate::use_cases::dispatch::{ActionDispatcher, DispatchConfig};

/// Transports for the two inference backends. Only enabled backends use theirs.
pub struct BackendTransports {
    pub world: Arc<dyn CompletionPort>,
    pub npc: Arc<dyn CompletionPort>,
}

/// Main application state.
///
/// Built once in `main` and shared with HTTP/WebSocket handlers via Axum state.
pub struct App {
    pub dispatcher: Arc<ActionDispatcher>,
    pub connections: Arc<ConnectionRegistry>,
    pub records: Arc<dyn RecordStore>,
    pub rate_limiter: Arc<RateLimiter>,
    cache: Arc<ActionCache>,
    store: Arc<dyn KeyValueStore>,
    backends: Vec<BackendSlot>,
    relay: Mutex<RelayState>,
    shutdown: CancellationToken,
}

struct BackendSlot {
    name: String,
    client: Option<Arc<BackendClient>>,
}

enum RelayState {
    Pending(NotificationRelay),
    Running(JoinHandle<()>),
    Stopped,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BackendStatus {
    Online,
    Offline,
}

#[derive(Debug, Clone, Serialize)]
pub struct SystemStats {
    pub active_players: usize,
    pub connections: usize,
    pub total_actions: u64,
    pub backends: BTreeMap<String, BackendStatus>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ServiceStatus {
    Healthy,
    Unhealthy,
    Disabled,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum OverallStatus {
    Healthy,
    Degraded,
}

#[derive(Debug, Clone, Serialize)]
pub struct HealthReport {
    pub status: OverallStatus,
    pub timestamp: DateTime<Utc>,
    pub services: BTreeMap<String, ServiceStatus>,
}

impl App {
    pub fn new(
        config: &EngineConfig,
        store: Arc<dyn KeyValueStore>,
        records: Arc<dyn RecordStore>,
        transports: BackendTransports,
        clock: Arc<dyn ClockPort>,
    ) -> Self {
        let world = build_backend(&config.world_backend, transports.world);
        let npc = build_backend(&config.npc_backend, transports.npc);

        let cache = Arc::new(ActionCache::new(store.clone()));
        let rate_limiter = Arc::new(RateLimiter::new(
            store.clone(),
            config.rate_limit_per_player,
            config.rate_limit_window,
        ));
        let connections = Arc::new(ConnectionRegistry::new());
        let shutdown = CancellationToken::new();

        let (events_tx, events_rx) = mpsc::channel(NOTIFICATION_BUFFER);
        let relay = NotificationRelay::new(events_rx, connections.clone(), shutdown.clone());

        let dispatcher = Arc::new(ActionDispatcher::new(
            rate_limiter.clone(),
            cache.clone(),
            world.clone(),
            npc.clone(),
            records.clone(),
            clock,
            events_tx,
            DispatchConfig {
                deadline: config.action_timeout,
                cache_ttl: config.cache_ttl,
                world_max_tokens: config.world_backend.max_tokens,
                npc_max_tokens: config.npc_backend.max_tokens,
            },
        ));

        Self {
            dispatcher,
            connections,
            records,
            rate_limiter,
            cache,
            store,
            backends: vec![
                BackendSlot {
                    name: config.world_backend.name.clone(),
                    client: world,
                },
                BackendSlot {
                    name: config.npc_backend.name.clone(),
                    client: npc,
                },
            ],
            relay: Mutex::new(RelayState::Pending(relay)),
            shutdown,
        }
    }

    /// Probe the store, bring up enabled backends, and start the relay.
    ///
    /// An unreachable store is fatal. A backend that fails to initialize stays
    /// registered and reports unhealthy; its requests fall back to local text.
    pub async fn initialize(&self) -> Result<(), StoreError> {
        self.store.ping().await?;
        tracing::info!("Key-value store reachable");

        for client in self.enabled_backends() {
            if let Err(e) = client.initialize().await {
                tracing::error!(backend = %client.name(), error = %e, "Backend failed to initialize");
            }
        }

        let mut relay = self.relay.lock().await;
        *relay = match std::mem::replace(&mut *relay, RelayState::Stopped) {
            RelayState::Pending(pending) => RelayState::Running(pending.spawn()),
            other => other,
        };
        Ok(())
    }

    /// Stop the relay, release backend pools, and close the store. Idempotent.
    pub async fn shutdown(&self) {
        self.shutdown.cancel();
        let previous = std::mem::replace(&mut *self.relay.lock().await, RelayState::Stopped);
        if let RelayState::Running(handle) = previous {
            if let Err(e) = handle.await {
                tracing::warn!(error = %e, "Notification relay ended abnormally");
            }
        }

        for client in self.enabled_backends() {
            client.shutdown().await;
        }
        self.store.close().await;
        tracing::info!("Engine shut down");
    }

    fn enabled_backends(&self) -> impl Iterator<Item = &Arc<BackendClient>> {
        self.backends.iter().filter_map(|slot| slot.client.as_ref())
    }

    pub async fn system_stats(&self) -> SystemStats {
        SystemStats {
            active_players: self.connections.connected_actors().await.len(),
            connections: self.connections.connection_count().await,
            total_actions: self.dispatcher.total_dispatched(),
            backends: self
                .backends
                .iter()
                .map(|slot| {
                    let status = if slot.client.is_some() {
                        BackendStatus::Online
                    } else {
                        BackendStatus::Offline
                    };
                    (slot.name.clone(), status)
                })
                .collect(),
        }
    }

    /// Metrics for each enabled backend, keyed by backend name.
    pub fn backend_metrics(&self) -> BTreeMap<String, BackendMetricsSnapshot> {
        self.enabled_backends()
            .map(|client| (client.name().to_string(), client.get_metrics()))
            .collect()
    }

    pub fn cache_metrics(&self) -> CacheMetrics {
        self.cache.get_metrics()
    }

    /// Probe the store and every enabled backend. Disabled backends do not
    /// degrade the overall status.
    pub async fn health_report(&self) -> HealthReport {
        let mut services = BTreeMap::new();

        let store = match self.store.ping().await {
            Ok(()) => ServiceStatus::Healthy,
            Err(e) => {
                tracing::warn!(error = %e, "Store health probe failed");
                ServiceStatus::Unhealthy
            }
        };
        services.insert("store".to_string(), store);

        for slot in &self.backends {
            let status = match &slot.client {
                Some(client) if client.health_check().await => ServiceStatus::Healthy,
                Some(_) => ServiceStatus::Unhealthy,
                None => ServiceStatus::Disabled,
            };
            services.insert(format!("{}_backend", slot.name), status);
        }

        let status = if services.values().any(|s| *s == ServiceStatus::Unhealthy) {
            OverallStatus::Degraded
        } else {
            OverallStatus::Healthy
        };

        HealthReport {
            status,
            timestamp: Utc::now(),
            services,
        }
    }
}

fn build_backend(
    target: &BackendTarget,
    transport: Arc<dyn CompletionPort>,
) -> Option<Arc<BackendClient>> {
    if !target.enabled {
        tracing::info!(backend = %target.name, "Backend disabled, using local fallbacks");
        return None;
    }
    tracing::info!(
        backend = %target.name,
        endpoint = %target.endpoint,
        model = %target.model,
        "Backend enabled"
    );
    Some(Arc::new(BackendClient::new(
        target.name.clone(),
        target.model.clone(),
        transport,
        RetryConfig::default(),
    )))
}
