//! Action dispatch: admission, cache, concurrent backend fan-out under one
//! deadline, merge, and broadcast hand-off.

mod prompts;

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures_util::stream::{FuturesUnordered, StreamExt};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use langomni_domain::{
    ActionClass, ActionKind, ActionParams, ActionRequest, ActionResult, ActorId, DomainError,
    GameEvent,
};

use crate::infrastructure::action_cache::ActionCache;
use crate::infrastructure::backend_client::{BackendClient, DEFAULT_TEMPERATURE, DEFAULT_TOP_P};
use crate::infrastructure::ports::{BackendError, ClockPort, RecordStore};
use crate::infrastructure::rate_limiter::RateLimiter;

pub use prompts::{npc_fallback, world_fallback};

#[derive(Debug, Clone)]
pub struct DispatchConfig {
    /// One deadline for the whole fan-out.
    pub deadline: Duration,
    pub cache_ttl: Duration,
    pub world_max_tokens: u32,
    pub npc_max_tokens: u32,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            deadline: Duration::from_secs(5),
            cache_ttl: Duration::from_secs(300),
            world_max_tokens: 256,
            npc_max_tokens: 128,
        }
    }
}

/// Errors that reach the caller. Every other failure degrades to fallback text.
#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    #[error("Rate limit exceeded for {actor_id}")]
    RateLimited { actor_id: ActorId },

    #[error("Invalid request: {0}")]
    InvalidRequest(String),
}

impl From<DomainError> for DispatchError {
    fn from(e: DomainError) -> Self {
        Self::InvalidRequest(e.to_string())
    }
}

/// What one fan-out task produced.
#[derive(Debug, Clone, PartialEq)]
struct TaskOutput {
    class: ActionClass,
    text: String,
    broadcast: Option<GameEvent>,
}

#[derive(Debug)]
enum TaskFailure {
    /// The backend for `class` gave up; the class falls back to local text.
    Backend {
        class: ActionClass,
        source: BackendError,
    },
    /// The task itself died (panic or cancellation); its output is lost.
    Aborted(String),
}

type TaskOutcome = Result<TaskOutput, TaskFailure>;

/// Cache key for an action. Parameters are not part of the key: repeated
/// actions of one kind by one actor share an entry until it expires.
///
/// Actor ids and unrecognised kinds may both contain `:`, so the actor id is
/// length-prefixed to keep `("a:move", "explore")` and `("a", "move:explore")`
/// apart.
pub fn cache_key(actor_id: &ActorId, kind: &ActionKind) -> String {
    let actor = actor_id.as_str();
    format!("action:{}:{actor}:{kind}", actor.len())
}

pub struct ActionDispatcher {
    rate_limiter: Arc<RateLimiter>,
    cache: Arc<ActionCache>,
    world: Option<Arc<BackendClient>>,
    npc: Option<Arc<BackendClient>>,
    records: Arc<dyn RecordStore>,
    clock: Arc<dyn ClockPort>,
    events: mpsc::Sender<GameEvent>,
    config: DispatchConfig,
    dispatched: AtomicU64,
}

impl ActionDispatcher {
    /// `world` and `npc` are `None` when that backend is disabled.
    pub fn new(
        rate_limiter: Arc<RateLimiter>,
        cache: Arc<ActionCache>,
        world: Option<Arc<BackendClient>>,
        npc: Option<Arc<BackendClient>>,
        records: Arc<dyn RecordStore>,
        clock: Arc<dyn ClockPort>,
        events: mpsc::Sender<GameEvent>,
        config: DispatchConfig,
    ) -> Self {
        Self {
            rate_limiter,
            cache,
            world,
            npc,
            records,
            clock,
            events,
            config,
            dispatched: AtomicU64::new(0),
        }
    }

    /// Validate raw input from the transport and dispatch it.
    pub async fn process_action(
        &self,
        actor_id: &str,
        action_kind: &str,
        action_data: ActionParams,
    ) -> Result<ActionResult, DispatchError> {
        let actor_id = ActorId::new(actor_id)?;
        if action_kind.trim().is_empty() {
            return Err(DispatchError::InvalidRequest(
                "action type cannot be empty".to_string(),
            ));
        }
        let request = ActionRequest::new(actor_id, ActionKind::from(action_kind), action_data);
        self.dispatch(request).await
    }

    pub async fn dispatch(&self, request: ActionRequest) -> Result<ActionResult, DispatchError> {
        if !self.rate_limiter.check(&request.actor_id).await {
            return Err(DispatchError::RateLimited {
                actor_id: request.actor_id,
            });
        }
        self.dispatched.fetch_add(1, Ordering::Relaxed);

        let key = cache_key(&request.actor_id, &request.kind);
        if let Some(cached) = self.cache.get::<ActionResult>(&key).await {
            return Ok(cached);
        }

        let result = self.fan_out(&request).await;

        self.cache.set(&key, &result, self.config.cache_ttl).await;
        if let Some(event) = &result.broadcast {
            self.publish(event.clone());
        }

        Ok(result)
    }

    /// Actions admitted since startup, cache hits included.
    pub fn total_dispatched(&self) -> u64 {
        self.dispatched.load(Ordering::Relaxed)
    }

    async fn fan_out(&self, request: &ActionRequest) -> ActionResult {
        let mut pending: FuturesUnordered<JoinHandle<TaskOutcome>> = request
            .kind
            .classes()
            .iter()
            .map(|class| self.spawn_task(*class, request))
            .collect();

        let collect = async {
            let mut outcomes = Vec::with_capacity(pending.len());
            while let Some(joined) = pending.next().await {
                outcomes.push(joined.unwrap_or_else(|e| Err(TaskFailure::Aborted(e.to_string()))));
            }
            outcomes
        };

        // Dropping the JoinHandles on timeout detaches the tasks: they run to
        // completion in the background but their output is discarded.
        match tokio::time::timeout(self.config.deadline, collect).await {
            Ok(outcomes) => merge(&request.kind, outcomes, self.clock.now()),
            Err(_) => {
                tracing::warn!(
                    actor_id = %request.actor_id,
                    action = %request.kind,
                    deadline_ms = self.config.deadline.as_millis() as u64,
                    "Action deadline elapsed, using generic fallback"
                );
                ActionResult::generic_fallback(&request.kind, self.clock.now())
            }
        }
    }

    fn spawn_task(&self, class: ActionClass, request: &ActionRequest) -> JoinHandle<TaskOutcome> {
        let request = request.clone();
        match class {
            ActionClass::World => {
                let backend = self.world.clone();
                let records = self.records.clone();
                let max_tokens = self.config.world_max_tokens;
                tokio::spawn(async move { run_world_task(backend, records, request, max_tokens).await })
            }
            ActionClass::Character => {
                let backend = self.npc.clone();
                let max_tokens = self.config.npc_max_tokens;
                tokio::spawn(async move { run_npc_task(backend, request, max_tokens).await })
            }
        }
    }

    fn publish(&self, event: GameEvent) {
        match self.events.try_send(event) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(event)) => {
                tracing::warn!(actor_id = %event.actor_id, "Notification channel full, dropping game event");
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                tracing::debug!("Notification relay stopped, dropping game event");
            }
        }
    }
}

async fn run_world_task(
    backend: Option<Arc<BackendClient>>,
    records: Arc<dyn RecordStore>,
    request: ActionRequest,
    max_tokens: u32,
) -> TaskOutcome {
    let text = match backend {
        Some(backend) => {
            let location = current_location(records.as_ref(), &request.actor_id).await;
            let prompt = prompts::world_prompt(&request, location.as_deref());
            backend
                .generate(&prompt, max_tokens, DEFAULT_TEMPERATURE, DEFAULT_TOP_P)
                .await
                .map(|text| text.trim().to_string())
                .map_err(|source| TaskFailure::Backend {
                    class: ActionClass::World,
                    source,
                })?
        }
        None => prompts::world_fallback(&request.kind),
    };

    let broadcast = request
        .kind
        .is_announced()
        .then(|| GameEvent::new(request.actor_id.clone(), request.kind.clone(), text.clone()));

    Ok(TaskOutput {
        class: ActionClass::World,
        text,
        broadcast,
    })
}

async fn run_npc_task(
    backend: Option<Arc<BackendClient>>,
    request: ActionRequest,
    max_tokens: u32,
) -> TaskOutcome {
    let text = match backend {
        Some(backend) => backend
            .generate(
                &prompts::npc_prompt(&request),
                max_tokens,
                DEFAULT_TEMPERATURE,
                DEFAULT_TOP_P,
            )
            .await
            .map(|text| text.trim().to_string())
            .map_err(|source| TaskFailure::Backend {
                class: ActionClass::Character,
                source,
            })?,
        None => prompts::npc_fallback(),
    };

    Ok(TaskOutput {
        class: ActionClass::Character,
        text,
        broadcast: None,
    })
}

/// The actor's location, when the record service knows it. Lookup failures
/// only cost the prompt some context.
async fn current_location(records: &dyn RecordStore, actor_id: &ActorId) -> Option<String> {
    match records.player(actor_id).await {
        Ok(player) => player.map(|p| p.location),
        Err(e) => {
            tracing::warn!(actor_id = %actor_id, error = %e, "Player lookup failed, prompting without location");
            None
        }
    }
}

/// Fold task outcomes, in completion order, into one result.
fn merge(kind: &ActionKind, outcomes: Vec<TaskOutcome>, timestamp: DateTime<Utc>) -> ActionResult {
    let mut result = ActionResult::empty(timestamp);

    for outcome in outcomes {
        let (class, text, broadcast) = match outcome {
            Ok(output) => (output.class, output.text, output.broadcast),
            Err(TaskFailure::Backend { class, source }) => {
                tracing::warn!(action = %kind, error = %source, "Backend failed, using local fallback");
                let text = match class {
                    ActionClass::World => prompts::world_fallback(kind),
                    ActionClass::Character => prompts::npc_fallback(),
                };
                (class, text, None)
            }
            Err(TaskFailure::Aborted(reason)) => {
                tracing::error!(action = %kind, reason = %reason, "Dispatch task aborted");
                continue;
            }
        };

        match class {
            ActionClass::World => result.result = text,
            ActionClass::Character => result.npc_responses.push(text),
        }
        if broadcast.is_some() {
            result.broadcast = broadcast;
        }
    }

    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::backend_client::RetryConfig;
    use crate::infrastructure::clock::FixedClock;
    use crate::infrastructure::memory_store::MemoryStore;
    use crate::infrastructure::ports::{
        Completion, CompletionPort, CompletionRequest, MockCompletionPort, MockRecordStore,
        RepoError,
    };
    use crate::infrastructure::records::InMemoryRecords;
    use async_trait::async_trait;
    use langomni_domain::PlayerRecord;
    use serde_json::json;

    const NO_RETRY: RetryConfig = RetryConfig {
        max_attempts: 1,
        base_delay_ms: 0,
        max_delay_ms: 0,
        jitter_factor: 0.0,
    };

    fn backend(name: &str, transport: impl CompletionPort + 'static) -> Arc<BackendClient> {
        Arc::new(BackendClient::new(name, "test-model", Arc::new(transport), NO_RETRY))
    }

    fn answering(text: &'static str, times: usize) -> MockCompletionPort {
        let mut transport = MockCompletionPort::new();
        transport.expect_complete().times(times).returning(move |_| {
            Ok(Completion {
                text: text.to_string(),
                total_tokens: 10,
            })
        });
        transport
    }

    fn failing(status: u16) -> MockCompletionPort {
        let mut transport = MockCompletionPort::new();
        transport.expect_complete().returning(move |_| {
            Err(BackendError::Status {
                status,
                body: "boom".into(),
            })
        });
        transport
    }

    struct SlowTransport {
        delay: Duration,
    }

    #[async_trait]
    impl CompletionPort for SlowTransport {
        async fn initialize(&self) -> Result<(), BackendError> {
            Ok(())
        }

        async fn complete(&self, _request: CompletionRequest) -> Result<Completion, BackendError> {
            tokio::time::sleep(self.delay).await;
            Ok(Completion {
                text: "Too late.".into(),
                total_tokens: 5,
            })
        }

        async fn health(&self) -> bool {
            true
        }

        async fn shutdown(&self) {}
    }

    struct PanickingTransport;

    #[async_trait]
    impl CompletionPort for PanickingTransport {
        async fn initialize(&self) -> Result<(), BackendError> {
            Ok(())
        }

        async fn complete(&self, _request: CompletionRequest) -> Result<Completion, BackendError> {
            panic!("transport bug");
        }

        async fn health(&self) -> bool {
            false
        }

        async fn shutdown(&self) {}
    }

    struct Harness {
        dispatcher: ActionDispatcher,
        events: mpsc::Receiver<GameEvent>,
    }

    fn harness(
        world: Option<Arc<BackendClient>>,
        npc: Option<Arc<BackendClient>>,
        deadline: Duration,
    ) -> Harness {
        harness_with_records(world, npc, deadline, Arc::new(InMemoryRecords::starting_town()))
    }

    fn harness_with_records(
        world: Option<Arc<BackendClient>>,
        npc: Option<Arc<BackendClient>>,
        deadline: Duration,
        records: Arc<dyn RecordStore>,
    ) -> Harness {
        let store = Arc::new(MemoryStore::new());
        let (tx, rx) = mpsc::channel(8);
        let dispatcher = ActionDispatcher::new(
            Arc::new(RateLimiter::new(store.clone(), 4, Duration::from_secs(60))),
            Arc::new(ActionCache::new(store)),
            world,
            npc,
            records,
            Arc::new(FixedClock(Utc::now())),
            tx,
            DispatchConfig {
                deadline,
                ..DispatchConfig::default()
            },
        );
        Harness {
            dispatcher,
            events: rx,
        }
    }

    fn request(actor: &str, kind: &str, params: ActionParams) -> ActionRequest {
        ActionRequest::new(ActorId::new(actor).unwrap(), ActionKind::from(kind), params)
    }

    #[tokio::test]
    async fn fifth_call_in_window_is_rate_limited_without_backend_calls() {
        // One real call; the next three are cache hits.
        let world = backend("world", answering("You walk north.", 1));
        let h = harness(Some(world.clone()), None, Duration::from_secs(5));

        for _ in 0..4 {
            let result = h
                .dispatcher
                .process_action("p1", "move", ActionParams::default())
                .await
                .unwrap();
            assert_eq!(result.result, "You walk north.");
        }

        let refused = h
            .dispatcher
            .process_action("p1", "move", ActionParams::default())
            .await;
        assert!(matches!(refused, Err(DispatchError::RateLimited { .. })));
        assert_eq!(world.get_metrics().total_requests, 1);
        assert_eq!(h.dispatcher.total_dispatched(), 4);
    }

    #[tokio::test]
    async fn cache_key_ignores_action_parameters() {
        // Known coarse policy: same actor and kind share one entry whatever the parameters.
        let npc = backend("npc", answering("Welcome, traveller.", 1));
        let h = harness(None, Some(npc.clone()), Duration::from_secs(5));

        let first = h
            .dispatcher
            .dispatch(request("p1", "talk", ActionParams::default().with_npc("Mira")))
            .await
            .unwrap();
        let second = h
            .dispatcher
            .dispatch(request(
                "p1",
                "talk",
                ActionParams::default()
                    .with_npc("Old Tomas")
                    .with_extra("message", json!("Any news?")),
            ))
            .await
            .unwrap();

        assert_eq!(first, second);
        assert_eq!(
            serde_json::to_string(&first).unwrap(),
            serde_json::to_string(&second).unwrap()
        );
        assert_eq!(npc.get_metrics().total_requests, 1);
    }

    #[tokio::test]
    async fn deadline_replaces_everything_with_generic_fallback() {
        let world = backend(
            "world",
            SlowTransport {
                delay: Duration::from_millis(200),
            },
        );
        let h = harness(Some(world.clone()), None, Duration::from_millis(30));

        let result = h
            .dispatcher
            .dispatch(request("p1", "explore", ActionParams::default()))
            .await
            .unwrap();
        assert!(result.success);
        assert_eq!(result.result, "Action 'explore' processed with basic response.");
        assert!(result.npc_responses.is_empty());

        // The abandoned call finishes in the background and still counts.
        tokio::time::sleep(Duration::from_millis(300)).await;
        assert_eq!(world.get_metrics().total_requests, 1);

        let cached = h
            .dispatcher
            .dispatch(request("p1", "explore", ActionParams::default()))
            .await
            .unwrap();
        assert_eq!(cached, result);
    }

    #[tokio::test]
    async fn world_backend_failure_yields_world_fallback() {
        let world = backend("world", failing(500));
        let h = harness(Some(world.clone()), None, Duration::from_secs(5));

        let result = h
            .dispatcher
            .dispatch(request("p1", "craft", ActionParams::default()))
            .await
            .unwrap();
        assert!(result.success);
        assert_eq!(result.result, "You performed craft. The world changes slightly.");
        assert!(result.npc_responses.is_empty());
        assert_eq!(world.get_metrics().failed_requests, 1);
    }

    #[tokio::test]
    async fn npc_backend_failure_yields_npc_fallback() {
        let npc = backend("npc", failing(503));
        let h = harness(None, Some(npc), Duration::from_secs(5));

        let result = h
            .dispatcher
            .dispatch(request("p1", "trade", ActionParams::default()))
            .await
            .unwrap();
        assert_eq!(result.npc_responses, vec!["The NPC nods silently.".to_string()]);
        assert_eq!(result.result, "");
    }

    #[tokio::test]
    async fn disabled_backends_use_local_fallbacks() {
        let h = harness(None, None, Duration::from_secs(5));

        let moved = h
            .dispatcher
            .dispatch(request("p1", "movement", ActionParams::default()))
            .await
            .unwrap();
        assert_eq!(moved.result, "You performed move. The world changes slightly.");

        let talked = h
            .dispatcher
            .dispatch(request("p1", "talk", ActionParams::default()))
            .await
            .unwrap();
        assert_eq!(talked.npc_responses, vec!["The NPC nods silently.".to_string()]);
    }

    #[tokio::test]
    async fn panicked_task_is_omitted() {
        let world = backend("world", PanickingTransport);
        let mut h = harness(Some(world), None, Duration::from_secs(5));

        let result = h
            .dispatcher
            .dispatch(request("p1", "combat", ActionParams::default()))
            .await
            .unwrap();
        assert!(result.success);
        assert_eq!(result.result, "");
        assert!(result.broadcast.is_none());
        assert!(h.events.try_recv().is_err());
    }

    #[tokio::test]
    async fn unknown_kind_fans_out_to_nothing() {
        let h = harness(None, None, Duration::from_secs(5));
        let result = h
            .dispatcher
            .process_action("p1", "dance", ActionParams::default())
            .await
            .unwrap();
        assert!(result.success);
        assert_eq!(result.result, "");
        assert!(result.npc_responses.is_empty());
    }

    #[tokio::test]
    async fn combat_result_is_published_once() {
        let world = backend("world", answering("You strike the goblin.", 1));
        let mut h = harness(Some(world), None, Duration::from_secs(5));

        let result = h
            .dispatcher
            .dispatch(request("p1", "attack", ActionParams::default().with_target("goblin")))
            .await
            .unwrap();

        let event = h.events.try_recv().unwrap();
        assert_eq!(event.actor_id.as_str(), "p1");
        assert_eq!(event.action_kind, ActionKind::Combat);
        assert_eq!(event.summary, "You strike the goblin.");
        assert_eq!(result.broadcast, Some(event));

        // Cache hits are not re-announced.
        h.dispatcher
            .dispatch(request("p1", "combat", ActionParams::default()))
            .await
            .unwrap();
        assert!(h.events.try_recv().is_err());
    }

    #[tokio::test]
    async fn world_prompt_carries_player_location() {
        let mut transport = MockCompletionPort::new();
        transport
            .expect_complete()
            .withf(|req| req.prompt.contains("Location: rusty_tankard") && req.max_tokens == 256)
            .times(1)
            .returning(|_| {
                Ok(Completion {
                    text: "  The fire crackles.\n".into(),
                    total_tokens: 4,
                })
            });

        let records = InMemoryRecords::starting_town();
        records.add_player(PlayerRecord::new_adventurer(
            ActorId::new("p1").unwrap(),
            "rusty_tankard",
        ));
        let h = harness_with_records(
            Some(backend("world", transport)),
            None,
            Duration::from_secs(5),
            Arc::new(records),
        );

        let result = h
            .dispatcher
            .dispatch(request("p1", "explore", ActionParams::default()))
            .await
            .unwrap();
        assert_eq!(result.result, "The fire crackles.");
    }

    #[tokio::test]
    async fn record_lookup_failure_still_dispatches() {
        let mut records = MockRecordStore::new();
        records
            .expect_player()
            .returning(|_| Err(RepoError::database("player", "connection reset")));

        let h = harness_with_records(
            Some(backend("world", answering("Fog rolls in.", 1))),
            None,
            Duration::from_secs(5),
            Arc::new(records),
        );
        let result = h
            .dispatcher
            .dispatch(request("p1", "explore", ActionParams::default()))
            .await
            .unwrap();
        assert_eq!(result.result, "Fog rolls in.");
    }

    #[tokio::test]
    async fn invalid_input_is_rejected_before_admission() {
        let h = harness(None, None, Duration::from_secs(5));
        assert!(matches!(
            h.dispatcher.process_action("  ", "move", ActionParams::default()).await,
            Err(DispatchError::InvalidRequest(_))
        ));
        assert!(matches!(
            h.dispatcher.process_action("p1", "", ActionParams::default()).await,
            Err(DispatchError::InvalidRequest(_))
        ));
        assert_eq!(h.dispatcher.total_dispatched(), 0);
    }

    #[test]
    fn cache_key_is_actor_and_kind() {
        let key = cache_key(&ActorId::new("p1").unwrap(), &ActionKind::from("movement"));
        assert_eq!(key, "action:2:p1:move");
    }

    #[test]
    fn cache_key_separates_colons_in_actor_and_kind() {
        let left = cache_key(&ActorId::new("a:move").unwrap(), &ActionKind::from("explore"));
        let right = cache_key(&ActorId::new("a").unwrap(), &ActionKind::from("move:explore"));
        assert_ne!(left, right);
    }

    #[tokio::test]
    async fn colon_in_actor_id_does_not_leak_another_actors_result() {
        let world = backend("world", answering("The cellar door is unlocked.", 1));
        let h = harness(Some(world.clone()), None, Duration::from_secs(5));

        let first = h
            .dispatcher
            .process_action("a:move", "explore", ActionParams::default())
            .await
            .unwrap();
        assert_eq!(first.result, "The cellar door is unlocked.");

        let second = h
            .dispatcher
            .process_action("a", "move:explore", ActionParams::default())
            .await
            .unwrap();
        assert_eq!(second.result, "");
        assert_eq!(world.get_metrics().total_requests, 1);
    }

    #[test]
    fn merge_keeps_npc_completion_order_and_skips_aborted() {
        let now = Utc::now();
        let npc = |text: &str| {
            Ok(TaskOutput {
                class: ActionClass::Character,
                text: text.into(),
                broadcast: None,
            })
        };
        let outcomes = vec![
            npc("second to submit, first to finish"),
            Err(TaskFailure::Aborted("task panicked".into())),
            npc("first to submit"),
            Err(TaskFailure::Backend {
                class: ActionClass::Character,
                source: BackendError::NotInitialized,
            }),
        ];

        let result = merge(&ActionKind::Quest, outcomes, now);
        assert_eq!(
            result.npc_responses,
            vec![
                "second to submit, first to finish".to_string(),
                "first to submit".to_string(),
                "The NPC nods silently.".to_string(),
            ]
        );
        assert_eq!(result.timestamp, now);
        assert!(result.broadcast.is_none());
    }
}
