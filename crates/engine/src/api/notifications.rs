//! Delivers dispatcher events to every connected client.

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use langomni_domain::GameEvent;
use langomni_shared::ServerMessage;

use crate::api::connections::ConnectionRegistry;

/// Capacity of the dispatcher → relay channel.
pub const NOTIFICATION_BUFFER: usize = 256;

pub struct NotificationRelay {
    events: mpsc::Receiver<GameEvent>,
    connections: Arc<ConnectionRegistry>,
    shutdown: CancellationToken,
}

impl NotificationRelay {
    pub fn new(
        events: mpsc::Receiver<GameEvent>,
        connections: Arc<ConnectionRegistry>,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            events,
            connections,
            shutdown,
        }
    }

    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(self.run())
    }

    /// Drain events until cancelled or every sender is gone.
    pub async fn run(mut self) {
        tracing::debug!("Notification relay started");
        loop {
            tokio::select! {
                _ = self.shutdown.cancelled() => break,
                event = self.events.recv() => {
                    let Some(event) = event else { break };
                    let actor_id = event.actor_id.clone();
                    let delivered = self
                        .connections
                        .broadcast(ServerMessage::GameEvent { event })
                        .await;
                    tracing::debug!(actor_id = %actor_id, delivered, "Broadcast game event");
                }
            }
        }
        tracing::debug!("Notification relay stopped");
    }
}
