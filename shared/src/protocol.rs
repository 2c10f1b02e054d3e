//! Network protocol definitions shared between client and server.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::entities::{CharacterData, CharacterId, CombatantStats};
use crate::items::{EquipSlot, Item};

/// Protocol version for compatibility checking
pub const PROTOCOL_VERSION: u32 = 1;

/// Default server port
pub const DEFAULT_PORT: u16 = 7777;

// =============================================================================
// Combat Types
// =============================================================================

/// Which side of an encounter is attacking
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Attacker {
    Player,
    Monster,
}

impl Attacker {
    pub fn opponent(&self) -> Attacker {
        match self {
            Self::Player => Self::Monster,
            Self::Monster => Self::Player,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Player => "player",
            Self::Monster => "monster",
        }
    }
}

/// Monster state sent at encounter start
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MonsterSnapshot {
    pub id: String,
    pub name: String,
    pub level: u32,
    pub current_hp: u32,
    pub max_hp: u32,
    pub attack_speed_ms: u32,
}

/// Client-facing view of a character after a state change
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CharacterProjection {
    pub id: CharacterId,
    pub name: String,
    pub level: u32,
    pub experience: u64,
    pub experience_to_next_level: u64,
    pub zone_id: String,
    pub current_hp: u32,
    pub stats: CombatantStats,
    pub stat_points: u32,
    pub kills_in_zone: u32,
}

impl CharacterProjection {
    pub fn new(character: &CharacterData, stats: CombatantStats, experience_to_next_level: u64) -> Self {
        Self {
            id: character.id,
            name: character.name.clone(),
            level: character.level,
            experience: character.experience,
            experience_to_next_level,
            zone_id: character.zone_id.clone(),
            current_hp: character.current_hp,
            stats,
            stat_points: character.stat_points,
            kills_in_zone: character.kills_in_zone(&character.zone_id),
        }
    }
}

// =============================================================================
// Client -> Server Messages
// =============================================================================

/// Messages sent from client to server
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum ClientMessage {
    /// Select a character to play (session is established by the auth collaborator)
    SelectCharacter {
        protocol_version: u32,
        character_id: CharacterId,
    },

    /// Ask the server to start an encounter in the current zone
    FindMonster,

    /// Travel to another zone; combat restarts automatically if it has monsters
    TravelToZone {
        zone_id: String,
    },

    /// Equip an item from inventory
    EquipItem {
        inventory_index: u16,
    },

    /// Unequip the item in an equipment slot
    UnequipItem {
        slot: EquipSlot,
    },

    /// Disconnect gracefully
    Disconnect,
}

// =============================================================================
// Server -> Client Messages
// =============================================================================

/// Messages sent from server to client
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ServerMessage {
    /// Character selected and loaded
    CharacterSelected {
        character: CharacterProjection,
    },

    /// A new encounter started
    EncounterStart {
        monster: MonsterSnapshot,
        player_hp: u32,
        player_max_hp: u32,
        player_attack_speed_ms: u32,
    },

    /// One attack tick was resolved
    AttackUpdate {
        attacker: Attacker,
        damage: u32,
        defender_hp: u32,
        defender_max_hp: u32,
    },

    /// Monster defeated
    Victory {
        monster_id: String,
        loot: Vec<Item>,
        experience_gained: u64,
        leveled_up: bool,
        character: CharacterProjection,
    },

    /// Player killed and respawned in the safe zone
    Death {
        monster_id: String,
        respawn: CharacterProjection,
    },

    /// A combat request was refused
    CombatError {
        reason: String,
    },

    /// Inventory and equipment after a change
    InventoryUpdate {
        inventory: Vec<Item>,
        equipment: BTreeMap<EquipSlot, Item>,
        character: CharacterProjection,
    },

    /// Generic request failure
    Error {
        reason: String,
    },
}

// =============================================================================
// Serialization
// =============================================================================

impl ClientMessage {
    pub fn serialize(&self) -> Result<Vec<u8>, bincode::Error> {
        bincode::serialize(self)
    }

    pub fn deserialize(data: &[u8]) -> Result<Self, bincode::Error> {
        bincode::deserialize(data)
    }
}

impl ServerMessage {
    pub fn serialize(&self) -> Result<Vec<u8>, bincode::Error> {
        bincode::serialize(self)
    }

    pub fn deserialize(data: &[u8]) -> Result<Self, bincode::Error> {
        bincode::deserialize(data)
    }

    /// Whether this message ends an encounter
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Victory { .. } | Self::Death { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_attacker_opponent() {
        assert_eq!(Attacker::Player.opponent(), Attacker::Monster);
        assert_eq!(Attacker::Monster.opponent(), Attacker::Player);
    }

    #[test]
    fn test_client_message_decodes_travel() {
        let bytes = ClientMessage::TravelToZone { zone_id: "forest".into() }
            .serialize()
            .unwrap();
        match ClientMessage::deserialize(&bytes).unwrap() {
            ClientMessage::TravelToZone { zone_id } => assert_eq!(zone_id, "forest"),
            other => panic!("unexpected message: {:?}", other),
        }
    }

    #[test]
    fn test_terminal_messages() {
        let update = ServerMessage::AttackUpdate {
            attacker: Attacker::Player,
            damage: 3,
            defender_hp: 10,
            defender_max_hp: 20,
        };
        assert!(!update.is_terminal());
        let error = ServerMessage::CombatError { reason: "busy".into() };
        assert!(!error.is_terminal());
    }

    #[test]
    fn test_garbage_is_rejected() {
        assert!(ClientMessage::deserialize(&[0xff, 0xff, 0xff, 0xff, 0xff]).is_err());
    }
}
