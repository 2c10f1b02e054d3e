//! Error types for the server.

use thiserror::Error;

use idle_shared::CharacterId;

/// Errors returned by the encounter engine
#[derive(Error, Debug)]
pub enum CombatError {
    /// An encounter or timer already existed; it has been cleared and the
    /// request may be retried.
    #[error("already in combat")]
    AlreadyInCombat,

    #[error("no monsters available in zone '{0}'")]
    NoMonstersAvailable(String),

    #[error("character {0} not found")]
    CharacterNotFound(CharacterId),

    #[error("character session error: {0}")]
    CharacterSessionError(String),

    #[error("unknown zone '{0}'")]
    UnknownZone(String),

    #[error("persistence failure: {0}")]
    Persistence(#[from] PersistenceError),
}

impl CombatError {
    /// Text shown to the player. Internal failures stay generic.
    pub fn user_message(&self) -> String {
        match self {
            Self::AlreadyInCombat => "Already in combat, please try again".to_string(),
            Self::NoMonstersAvailable(_) => "There are no monsters here".to_string(),
            Self::UnknownZone(zone) => format!("Unknown zone '{}'", zone),
            Self::CharacterNotFound(_) | Self::CharacterSessionError(_) | Self::Persistence(_) => {
                "Something went wrong, please try again later".to_string()
            }
        }
    }
}

/// Errors from the character store
#[derive(Error, Debug)]
pub enum PersistenceError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("cache error: {0}")]
    Cache(#[from] redis::RedisError),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("character {0} not found")]
    NotFound(CharacterId),

    #[error("persistence unavailable")]
    Unavailable,
}

/// Reference data failed to load or validate
#[derive(Error, Debug)]
pub enum ContentError {
    #[error("failed to read content file: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse content file: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("{0}")]
    Invalid(String),
}

/// Equip/unequip request could not be applied
#[derive(Error, Debug, PartialEq, Eq)]
pub enum InventoryError {
    #[error("no item at inventory index {0}")]
    NoSuchItem(usize),

    #[error("item cannot be equipped")]
    NotEquippable,

    #[error("nothing equipped in that slot")]
    SlotEmpty,

    #[error("inventory is full")]
    InventoryFull,

    #[error("cannot change equipment during combat")]
    InCombat,
}
