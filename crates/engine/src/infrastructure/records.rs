//! In-process record service.
//!
//! Holds players, locations, and NPCs in memory, seeded with a starting town.

use async_trait::async_trait;
use dashmap::DashMap;
use langomni_domain::{ActorId, LocationRecord, NpcRecord, PlayerRecord};

use crate::infrastructure::ports::{RecordStore, RepoError};

pub const STARTING_LOCATION: &str = "town_square";

pub struct InMemoryRecords {
    players: DashMap<ActorId, PlayerRecord>,
    locations: DashMap<String, LocationRecord>,
    npcs: DashMap<String, NpcRecord>,
}

impl InMemoryRecords {
    pub fn new() -> Self {
        Self {
            players: DashMap::new(),
            locations: DashMap::new(),
            npcs: DashMap::new(),
        }
    }

    /// A small town with an inn, a market, and the folk who work there.
    pub fn starting_town() -> Self {
        let records = Self::new();

        records.add_location(LocationRecord {
            name: STARTING_LOCATION.into(),
            description: "A cobbled square around a dry fountain. Market stalls line the edges."
                .into(),
            npcs: vec!["Old Tomas".into()],
            items: vec!["notice board".into()],
        });
        records.add_location(LocationRecord {
            name: "rusty_tankard".into(),
            description: "A low-beamed inn that smells of woodsmoke and ale.".into(),
            npcs: vec!["Mira the Innkeeper".into()],
            items: vec!["mug".into(), "fireplace".into()],
        });
        records.add_location(LocationRecord {
            name: "north_gate".into(),
            description: "Weathered walls and a half-open gate facing the forest road.".into(),
            npcs: vec!["Captain Hale".into()],
            items: Vec::new(),
        });

        records.add_npc(NpcRecord {
            npc_id: "npc_tomas".into(),
            name: "Old Tomas".into(),
            location: STARTING_LOCATION.into(),
            disposition: "talkative".into(),
        });
        records.add_npc(NpcRecord {
            npc_id: "npc_mira".into(),
            name: "Mira the Innkeeper".into(),
            location: "rusty_tankard".into(),
            disposition: "friendly".into(),
        });
        records.add_npc(NpcRecord {
            npc_id: "npc_hale".into(),
            name: "Captain Hale".into(),
            location: "north_gate".into(),
            disposition: "wary".into(),
        });

        records
    }

    pub fn add_player(&self, player: PlayerRecord) {
        self.players.insert(player.player_id.clone(), player);
    }

    pub fn add_location(&self, location: LocationRecord) {
        self.locations.insert(location.name.clone(), location);
    }

    pub fn add_npc(&self, npc: NpcRecord) {
        self.npcs.insert(npc.npc_id.clone(), npc);
    }
}

impl Default for InMemoryRecords {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl RecordStore for InMemoryRecords {
    async fn player(&self, player_id: &ActorId) -> Result<Option<PlayerRecord>, RepoError> {
        Ok(self.players.get(player_id).map(|entry| entry.value().clone()))
    }

    async fn location(&self, name: &str) -> Result<Option<LocationRecord>, RepoError> {
        Ok(self.locations.get(name).map(|entry| entry.value().clone()))
    }

    async fn npcs_at(&self, location: &str) -> Result<Vec<NpcRecord>, RepoError> {
        let mut npcs: Vec<NpcRecord> = self
            .npcs
            .iter()
            .filter(|entry| entry.location == location)
            .map(|entry| entry.value().clone())
            .collect();
        npcs.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(npcs)
    }

    async fn players(&self) -> Result<Vec<PlayerRecord>, RepoError> {
        let mut players: Vec<PlayerRecord> =
            self.players.iter().map(|entry| entry.value().clone()).collect();
        players.sort_by(|a, b| a.player_id.cmp(&b.player_id));
        Ok(players)
    }

    async fn npcs(&self) -> Result<Vec<NpcRecord>, RepoError> {
        let mut npcs: Vec<NpcRecord> = self.npcs.iter().map(|entry| entry.value().clone()).collect();
        npcs.sort_by(|a, b| a.npc_id.cmp(&b.npc_id));
        Ok(npcs)
    }
}
