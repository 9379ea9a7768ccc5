//! Record lookup port for player, location, and NPC state.

use async_trait::async_trait;
use langomni_domain::{ActorId, LocationRecord, NpcRecord, PlayerRecord};

use super::error::RepoError;

/// Read-only view of the persistent record service.
///
/// A missing record is `Ok(None)`; `Err` means the service itself failed.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait RecordStore: Send + Sync {
    async fn player(&self, player_id: &ActorId) -> Result<Option<PlayerRecord>, RepoError>;
    async fn location(&self, name: &str) -> Result<Option<LocationRecord>, RepoError>;
    async fn npcs_at(&self, location: &str) -> Result<Vec<NpcRecord>, RepoError>;
    async fn players(&self) -> Result<Vec<PlayerRecord>, RepoError>;
    async fn npcs(&self) -> Result<Vec<NpcRecord>, RepoError>;
}
