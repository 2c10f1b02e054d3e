//! PostgreSQL database operations.
//!
//! Characters are stored as one JSON document per row; inventory and
//! equipment change shape far more often than the table would.

use sqlx::{postgres::PgPoolOptions, PgPool, Row};

use idle_shared::{CharacterData, CharacterId};

use crate::error::PersistenceError;

const CREATE_CHARACTERS_TABLE: &str = "CREATE TABLE IF NOT EXISTS idle_characters (
    id BIGINT PRIMARY KEY,
    name TEXT NOT NULL,
    data TEXT NOT NULL,
    updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
)";

pub struct Database {
    pool: PgPool,
}

impl Database {
    /// Connect to the database
    pub async fn connect(url: &str) -> Result<Self, sqlx::Error> {
        let pool = PgPoolOptions::new()
            .max_connections(10)
            .connect(url)
            .await?;

        Ok(Self { pool })
    }

    /// Create the characters table if it does not exist yet
    pub async fn ensure_schema(&self) -> Result<(), sqlx::Error> {
        sqlx::query(CREATE_CHARACTERS_TABLE).execute(&self.pool).await?;
        Ok(())
    }

    /// Load a character from the database
    pub async fn load_character(&self, character_id: CharacterId) -> Result<Option<CharacterData>, PersistenceError> {
        let row = sqlx::query("SELECT data FROM idle_characters WHERE id = $1")
            .bind(character_id)
            .fetch_optional(&self.pool)
            .await?;

        match row {
            Some(r) => {
                let json: String = r.try_get("data")?;
                Ok(Some(serde_json::from_str(&json)?))
            }
            None => Ok(None),
        }
    }

    /// Save a character to the database (insert or replace)
    pub async fn save_character(&self, character: &CharacterData) -> Result<(), PersistenceError> {
        let json = serde_json::to_string(character)?;

        sqlx::query(
            "INSERT INTO idle_characters (id, name, data, updated_at)
             VALUES ($1, $2, $3, NOW())
             ON CONFLICT (id) DO UPDATE SET
                name = EXCLUDED.name,
                data = EXCLUDED.data,
                updated_at = NOW()"
        )
            .bind(character.id)
            .bind(&character.name)
            .bind(json)
            .execute(&self.pool)
            .await?;

        Ok(())
    }
}
