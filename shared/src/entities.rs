//! Shared entity definitions.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::items::{EquipSlot, Item};

pub type CharacterId = i64;

/// Additive stat modifiers carried by items, affixes and buffs.
/// Values may be negative (debuffs).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StatBlock {
    pub strength: i32,
    pub dexterity: i32,
    pub vitality: i32,
    pub energy: i32,
    pub damage: i32,
    pub magic_find: i32,
}

impl StatBlock {
    pub fn add(&self, other: &StatBlock) -> StatBlock {
        StatBlock {
            strength: self.strength + other.strength,
            dexterity: self.dexterity + other.dexterity,
            vitality: self.vitality + other.vitality,
            energy: self.energy + other.energy,
            damage: self.damage + other.damage,
            magic_find: self.magic_find + other.magic_find,
        }
    }
}

/// A character's own attributes, before equipment
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BaseStats {
    pub strength: u32,
    pub dexterity: u32,
    pub vitality: u32,
    pub energy: u32,
}

impl Default for BaseStats {
    fn default() -> Self {
        Self {
            strength: 5,
            dexterity: 5,
            vitality: 10,
            energy: 5,
        }
    }
}

/// Effective combat stats of a player or monster
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CombatantStats {
    pub strength: u32,
    pub dexterity: u32,
    pub vitality: u32,
    pub energy: u32,
    pub max_hp: u32,
    pub max_resource: u32,
    /// Milliseconds between attacks
    pub attack_speed_ms: u32,
    pub base_damage: u32,
    /// Percent bonus applied to magic-find-sensitive drops
    #[serde(default)]
    pub magic_find: u32,
}

/// Persisted character record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CharacterData {
    pub id: CharacterId,
    pub name: String,
    pub level: u32,
    pub experience: u64,
    pub zone_id: String,
    pub current_hp: u32,
    pub base_stats: BaseStats,
    #[serde(default)]
    pub stat_points: u32,
    #[serde(default)]
    pub inventory: Vec<Item>,
    #[serde(default)]
    pub equipment: BTreeMap<EquipSlot, Item>,
    /// Kill counters keyed by zone id
    #[serde(default)]
    pub kills: BTreeMap<String, u32>,
}

impl CharacterData {
    pub fn new(id: CharacterId, name: String, zone_id: String) -> Self {
        Self {
            id,
            name,
            level: 1,
            experience: 0,
            zone_id,
            current_hp: 100,
            base_stats: BaseStats::default(),
            stat_points: 0,
            inventory: Vec::new(),
            equipment: BTreeMap::new(),
            kills: BTreeMap::new(),
        }
    }

    pub fn equipped_items(&self) -> impl Iterator<Item = &Item> {
        self.equipment.values()
    }

    pub fn kills_in_zone(&self, zone_id: &str) -> u32 {
        self.kills.get(zone_id).copied().unwrap_or(0)
    }
}
