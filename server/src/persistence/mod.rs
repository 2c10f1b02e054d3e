//! Persistence layer for the idle server.
//!
//! The engine talks to a [`CharacterRepository`]. In production that is a
//! [`PersistenceHandle`]: all database and cache I/O happens in a background
//! task fed through a channel, so encounter timers only ever await a reply.

mod cache;
mod database;
mod memory;

use cache::Cache;
use database::Database;
pub use memory::MemoryRepository;

use std::collections::BTreeMap;

use async_trait::async_trait;
use log::{error, info, warn};
use tokio::sync::{mpsc, oneshot};

use idle_shared::{CharacterData, CharacterId, EquipSlot, Item};

use crate::error::PersistenceError;

/// Keyed character store
#[async_trait]
pub trait CharacterRepository: Send + Sync {
    async fn find_by_id(&self, id: CharacterId) -> Result<Option<CharacterData>, PersistenceError>;

    /// Apply a partial update and return the stored record
    async fn update(&self, id: CharacterId, update: CharacterUpdate) -> Result<CharacterData, PersistenceError>;
}

/// Partial character update. `None` fields are left untouched.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CharacterUpdate {
    pub level: Option<u32>,
    pub experience: Option<u64>,
    pub zone_id: Option<String>,
    pub current_hp: Option<u32>,
    pub stat_points: Option<u32>,
    pub inventory: Option<Vec<Item>>,
    pub equipment: Option<BTreeMap<EquipSlot, Item>>,
    pub kills: Option<BTreeMap<String, u32>>,
}

impl CharacterUpdate {
    /// Everything a victory can change
    pub fn after_victory(character: &CharacterData) -> Self {
        Self {
            level: Some(character.level),
            experience: Some(character.experience),
            current_hp: Some(character.current_hp),
            stat_points: Some(character.stat_points),
            inventory: Some(character.inventory.clone()),
            kills: Some(character.kills.clone()),
            ..Self::default()
        }
    }

    /// Respawn location and health
    pub fn after_death(character: &CharacterData) -> Self {
        Self {
            zone_id: Some(character.zone_id.clone()),
            current_hp: Some(character.current_hp),
            ..Self::default()
        }
    }

    pub fn travel(zone_id: &str) -> Self {
        Self {
            zone_id: Some(zone_id.to_string()),
            ..Self::default()
        }
    }

    /// Inventory and equipment after an equip/unequip
    pub fn equipment(character: &CharacterData) -> Self {
        Self {
            current_hp: Some(character.current_hp),
            inventory: Some(character.inventory.clone()),
            equipment: Some(character.equipment.clone()),
            ..Self::default()
        }
    }

    pub fn apply(self, character: &mut CharacterData) {
        if let Some(level) = self.level {
            character.level = level;
        }
        if let Some(experience) = self.experience {
            character.experience = experience;
        }
        if let Some(zone_id) = self.zone_id {
            character.zone_id = zone_id;
        }
        if let Some(hp) = self.current_hp {
            character.current_hp = hp;
        }
        if let Some(points) = self.stat_points {
            character.stat_points = points;
        }
        if let Some(inventory) = self.inventory {
            character.inventory = inventory;
        }
        if let Some(equipment) = self.equipment {
            character.equipment = equipment;
        }
        if let Some(kills) = self.kills {
            character.kills = kills;
        }
    }
}

/// Commands sent to the persistence background task
#[derive(Debug)]
enum PersistenceCommand {
    /// Load a character (cache first, then database)
    LoadCharacter {
        character_id: CharacterId,
        response: oneshot::Sender<Result<Option<CharacterData>, PersistenceError>>,
    },
    /// Apply an update and write it through to database and cache
    UpdateCharacter {
        character_id: CharacterId,
        update: CharacterUpdate,
        response: oneshot::Sender<Result<CharacterData, PersistenceError>>,
    },
    /// Shutdown the persistence task
    Shutdown,
}

/// Handle for sending commands to the persistence task
#[derive(Clone)]
pub struct PersistenceHandle {
    sender: mpsc::Sender<PersistenceCommand>,
}

impl PersistenceHandle {
    /// Shutdown the persistence task
    pub async fn shutdown(&self) {
        let _ = self.sender.send(PersistenceCommand::Shutdown).await;
    }
}

#[async_trait]
impl CharacterRepository for PersistenceHandle {
    async fn find_by_id(&self, id: CharacterId) -> Result<Option<CharacterData>, PersistenceError> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(PersistenceCommand::LoadCharacter { character_id: id, response: tx })
            .await
            .map_err(|_| PersistenceError::Unavailable)?;
        rx.await.map_err(|_| PersistenceError::Unavailable)?
    }

    async fn update(&self, id: CharacterId, update: CharacterUpdate) -> Result<CharacterData, PersistenceError> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(PersistenceCommand::UpdateCharacter { character_id: id, update, response: tx })
            .await
            .map_err(|_| PersistenceError::Unavailable)?;
        rx.await.map_err(|_| PersistenceError::Unavailable)?
    }
}

/// Initialize the persistence system and spawn the background task.
/// Returns a handle for sending commands.
pub async fn init(database_url: &str, redis_url: &str) -> Result<PersistenceHandle, PersistenceError> {
    // Connect to PostgreSQL
    let db = Database::connect(database_url).await?;
    db.ensure_schema().await?;
    info!("Connected to PostgreSQL");

    // Connect to Redis
    let cache = Cache::connect(redis_url).await?;
    info!("Connected to Redis");

    let (tx, rx) = mpsc::channel(256);

    tokio::spawn(persistence_task(db, cache, rx));
    info!("Persistence background task started");

    Ok(PersistenceHandle { sender: tx })
}

/// Load from cache, falling back to the database and repopulating the cache
async fn load_character(
    db: &Database,
    cache: &Cache,
    character_id: CharacterId,
) -> Result<Option<CharacterData>, PersistenceError> {
    match cache.load_character(character_id).await {
        Ok(Some(character)) => return Ok(Some(character)),
        Ok(None) => {}
        Err(e) => warn!("Failed to read character {} from cache: {}", character_id, e),
    }

    let character = db.load_character(character_id).await?;
    if let Some(character) = &character {
        if let Err(e) = cache.save_character(character).await {
            warn!("Failed to cache character {}: {}", character_id, e);
        }
    }
    Ok(character)
}

/// Apply an update and write it through. The database is the source of truth,
/// the cache only follows it.
async fn update_character(
    db: &Database,
    cache: &Cache,
    character_id: CharacterId,
    update: CharacterUpdate,
) -> Result<CharacterData, PersistenceError> {
    let mut character = load_character(db, cache, character_id)
        .await?
        .ok_or(PersistenceError::NotFound(character_id))?;
    update.apply(&mut character);

    db.save_character(&character).await?;
    if let Err(e) = cache.save_character(&character).await {
        warn!("Failed to cache character {}: {}", character_id, e);
        // A stale entry would shadow the new database row
        let _ = cache.delete_character(character_id).await;
    }
    Ok(character)
}

/// Background task that handles all persistence operations
async fn persistence_task(db: Database, cache: Cache, mut rx: mpsc::Receiver<PersistenceCommand>) {
    info!("Persistence task running");

    while let Some(cmd) = rx.recv().await {
        match cmd {
            PersistenceCommand::LoadCharacter { character_id, response } => {
                let _ = response.send(load_character(&db, &cache, character_id).await);
            }

            PersistenceCommand::UpdateCharacter { character_id, update, response } => {
                let result = update_character(&db, &cache, character_id, update).await;

                if let Err(e) = &result {
                    error!("Failed to save character {}: {}", character_id, e);
                }
                let _ = response.send(result);
            }

            PersistenceCommand::Shutdown => {
                info!("Persistence task shutting down");
                break;
            }
        }
    }

    info!("Persistence task stopped");
}
