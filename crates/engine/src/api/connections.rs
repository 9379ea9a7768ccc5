//! Connection registry for live WebSocket clients.
//!
//! Tracks every open connection and which one is current for each actor.

use std::collections::HashMap;

use tokio::sync::{mpsc, RwLock};

use langomni_domain::{ActorId, ConnectionId};
use langomni_shared::ServerMessage;

/// Information about a connected client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionInfo {
    pub connection_id: ConnectionId,
    pub actor_id: ActorId,
}

#[derive(Default)]
struct Registry {
    connections: HashMap<ConnectionId, (ConnectionInfo, mpsc::Sender<ServerMessage>)>,
    /// The current connection per actor. A reconnect overwrites the entry
    /// without touching the older connection.
    current: HashMap<ActorId, ConnectionId>,
}

impl Registry {
    fn remove(&mut self, connection_id: ConnectionId) -> Option<ConnectionInfo> {
        let (info, _) = self.connections.remove(&connection_id)?;
        if self.current.get(&info.actor_id) == Some(&connection_id) {
            self.current.remove(&info.actor_id);
        }
        Some(info)
    }
}

/// Manages all active WebSocket connections.
pub struct ConnectionRegistry {
    inner: RwLock<Registry>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(Registry::default()),
        }
    }

    /// Register a connection and make it the actor's current one.
    pub async fn connect(
        &self,
        sender: mpsc::Sender<ServerMessage>,
        actor_id: ActorId,
    ) -> ConnectionId {
        let connection_id = ConnectionId::new();
        let info = ConnectionInfo {
            connection_id,
            actor_id: actor_id.clone(),
        };

        let mut inner = self.inner.write().await;
        if let Some(previous) = inner.current.insert(actor_id.clone(), connection_id) {
            tracing::debug!(actor_id = %actor_id, previous = %previous, "Actor reconnected, superseding earlier connection");
        }
        inner.connections.insert(connection_id, (info, sender));
        tracing::info!(connection_id = %connection_id, actor_id = %actor_id, "Connection registered");
        connection_id
    }

    pub async fn disconnect(
        &self,
        connection_id: ConnectionId,
        actor_id: &ActorId,
    ) -> Result<(), ConnectionError> {
        let mut inner = self.inner.write().await;
        match inner.connections.get(&connection_id) {
            None => return Err(ConnectionError::NotFound),
            Some((info, _)) if &info.actor_id != actor_id => {
                return Err(ConnectionError::ActorMismatch)
            }
            Some(_) => {}
        }
        inner.remove(connection_id);
        tracing::info!(connection_id = %connection_id, actor_id = %actor_id, "Connection unregistered");
        Ok(())
    }

    /// Send to the actor's current connection. No connection is not an error.
    pub async fn send(&self, actor_id: &ActorId, message: ServerMessage) {
        let failed = {
            let inner = self.inner.read().await;
            let Some(connection_id) = inner.current.get(actor_id) else {
                tracing::debug!(actor_id = %actor_id, "No live connection, message dropped");
                return;
            };
            let Some((_, sender)) = inner.connections.get(connection_id) else {
                return;
            };
            match sender.try_send(message) {
                Ok(()) => None,
                Err(e) => {
                    tracing::warn!(actor_id = %actor_id, error = %e, "Failed to send message");
                    Some(*connection_id)
                }
            }
        };

        if let Some(connection_id) = failed {
            self.inner.write().await.remove(connection_id);
        }
    }

    /// Deliver to every connection. Returns the number of successful deliveries.
    ///
    /// A connection that fails to accept the message is removed; delivery to
    /// the rest continues.
    pub async fn broadcast(&self, message: ServerMessage) -> usize {
        let mut delivered = 0;
        let mut failed = Vec::new();
        {
            let inner = self.inner.read().await;
            for (info, sender) in inner.connections.values() {
                match sender.try_send(message.clone()) {
                    Ok(()) => delivered += 1,
                    Err(e) => {
                        tracing::warn!(
                            connection_id = %info.connection_id,
                            actor_id = %info.actor_id,
                            error = %e,
                            "Failed to broadcast message, dropping connection"
                        );
                        failed.push(info.connection_id);
                    }
                }
            }
        }

        if !failed.is_empty() {
            let mut inner = self.inner.write().await;
            for connection_id in failed {
                inner.remove(connection_id);
            }
        }
        delivered
    }

    #[cfg(test)]
    pub async fn get(&self, connection_id: ConnectionId) -> Option<ConnectionInfo> {
        let inner = self.inner.read().await;
        inner
            .connections
            .get(&connection_id)
            .map(|(info, _)| info.clone())
    }

    /// Actors with a current connection, sorted.
    pub async fn connected_actors(&self) -> Vec<ActorId> {
        let mut actors: Vec<ActorId> = self.inner.read().await.current.keys().cloned().collect();
        actors.sort();
        actors
    }

    pub async fn connection_count(&self) -> usize {
        self.inner.read().await.connections.len()
    }
}

impl Default for ConnectionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Errors that can occur during connection operations.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConnectionError {
    #[error("Connection not found")]
    NotFound,
    #[error("Connection belongs to a different actor")]
    ActorMismatch,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn actor(id: &str) -> ActorId {
        ActorId::new(id).unwrap()
    }

    fn chat(text: &str) -> ServerMessage {
        ServerMessage::Chat {
            player_id: "p0".into(),
            message: text.into(),
        }
    }

    #[tokio::test]
    async fn broadcast_survives_one_failed_connection() {
        let registry = ConnectionRegistry::new();
        let mut receivers = Vec::new();
        let mut ids = Vec::new();
        for i in 0..5 {
            let (tx, rx) = mpsc::channel(4);
            ids.push(registry.connect(tx, actor(&format!("p{i}"))).await);
            receivers.push(rx);
        }

        // p2's transport is gone.
        drop(receivers.remove(2));

        let delivered = registry.broadcast(chat("hello")).await;
        assert_eq!(delivered, 4);
        assert_eq!(registry.connection_count().await, 4);
        assert!(registry.get(ids[2]).await.is_none());
        assert!(!registry.connected_actors().await.contains(&actor("p2")));

        for rx in receivers.iter_mut() {
            assert_eq!(rx.try_recv().unwrap(), chat("hello"));
        }
    }

    #[tokio::test]
    async fn send_goes_to_current_connection_only() {
        let registry = ConnectionRegistry::new();
        let (old_tx, mut old_rx) = mpsc::channel(4);
        let (new_tx, mut new_rx) = mpsc::channel(4);
        registry.connect(old_tx, actor("p1")).await;
        registry.connect(new_tx, actor("p1")).await;

        registry.send(&actor("p1"), ServerMessage::Pong).await;

        assert_eq!(new_rx.try_recv().unwrap(), ServerMessage::Pong);
        assert!(old_rx.try_recv().is_err());
        // The superseded connection is still registered.
        assert_eq!(registry.connection_count().await, 2);
        assert_eq!(registry.connected_actors().await, vec![actor("p1")]);
    }

    #[tokio::test]
    async fn send_to_absent_actor_is_a_no_op() {
        let registry = ConnectionRegistry::new();
        registry.send(&actor("ghost"), ServerMessage::Pong).await;
        assert_eq!(registry.connection_count().await, 0);
    }

    #[tokio::test]
    async fn send_failure_removes_connection() {
        let registry = ConnectionRegistry::new();
        let (tx, rx) = mpsc::channel(4);
        registry.connect(tx, actor("p1")).await;
        drop(rx);

        registry.send(&actor("p1"), ServerMessage::Pong).await;
        assert_eq!(registry.connection_count().await, 0);
        assert!(registry.connected_actors().await.is_empty());
    }

    #[tokio::test]
    async fn disconnecting_stale_connection_keeps_current_mapping() {
        let registry = ConnectionRegistry::new();
        let (old_tx, _old_rx) = mpsc::channel(4);
        let (new_tx, _new_rx) = mpsc::channel(4);
        let old = registry.connect(old_tx, actor("p1")).await;
        let new = registry.connect(new_tx, actor("p1")).await;

        registry.disconnect(old, &actor("p1")).await.unwrap();
        assert_eq!(registry.connected_actors().await, vec![actor("p1")]);

        registry.disconnect(new, &actor("p1")).await.unwrap();
        assert!(registry.connected_actors().await.is_empty());
    }

    #[tokio::test]
    async fn disconnect_misuse_is_reported() {
        let registry = ConnectionRegistry::new();
        let (tx, _rx) = mpsc::channel(4);
        let id = registry.connect(tx, actor("p1")).await;

        assert_eq!(
            registry.disconnect(id, &actor("p2")).await,
            Err(ConnectionError::ActorMismatch)
        );
        assert_eq!(
            registry.disconnect(ConnectionId::new(), &actor("p1")).await,
            Err(ConnectionError::NotFound)
        );
        assert_eq!(registry.connection_count().await, 1);
    }
}
