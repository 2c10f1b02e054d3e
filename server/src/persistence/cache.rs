//! Redis cache operations for hot character data.

use redis::{aio::ConnectionManager, AsyncCommands};

use idle_shared::{CharacterData, CharacterId};

use crate::error::PersistenceError;

/// Cache key prefix
const CHARACTER_PREFIX: &str = "idle:char:";

/// TTL for cached data (1 hour)
const CACHE_TTL_SECONDS: u64 = 3600;

fn character_key(character_id: CharacterId) -> String {
    format!("{}{}", CHARACTER_PREFIX, character_id)
}

/// Redis cache wrapper
#[derive(Clone)]
pub struct Cache {
    conn: ConnectionManager,
}

impl Cache {
    /// Connect to Redis
    pub async fn connect(url: &str) -> Result<Self, redis::RedisError> {
        let client = redis::Client::open(url)?;
        let conn = ConnectionManager::new(client).await?;
        Ok(Self { conn })
    }

    pub async fn save_character(&self, character: &CharacterData) -> Result<(), PersistenceError> {
        let json = serde_json::to_string(character)?;

        let mut conn = self.conn.clone();
        conn.set_ex::<_, _, ()>(character_key(character.id), json, CACHE_TTL_SECONDS).await?;

        Ok(())
    }

    /// Load a cached character. Entries that no longer parse are treated as misses.
    pub async fn load_character(&self, character_id: CharacterId) -> Result<Option<CharacterData>, PersistenceError> {
        let mut conn = self.conn.clone();
        let json: Option<String> = conn.get(character_key(character_id)).await?;

        Ok(json.and_then(|j| serde_json::from_str(&j).ok()))
    }

    pub async fn delete_character(&self, character_id: CharacterId) -> Result<(), PersistenceError> {
        let mut conn = self.conn.clone();
        conn.del::<_, ()>(character_key(character_id)).await?;

        Ok(())
    }
}
