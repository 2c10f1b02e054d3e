//! Monster templates and per-encounter monster instances.

use serde::{Deserialize, Serialize};

use idle_shared::{CombatantStats, MonsterSnapshot};

/// Monster definition (reference data, shared by every encounter)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MonsterTemplate {
    pub id: String,
    pub name: String,
    pub level: u32,
    pub stats: CombatantStats,
    pub loot_table_id: String,
    #[serde(default)]
    pub xp_reward: u64,
}

/// A monster being fought in one encounter. Owns its HP so concurrent
/// encounters against the same template never share state.
#[derive(Debug, Clone)]
pub struct MonsterInstance {
    pub id: String,
    pub name: String,
    pub level: u32,
    pub stats: CombatantStats,
    pub loot_table_id: String,
    pub xp_reward: u64,
    pub current_hp: u32,
}

impl MonsterInstance {
    /// Fresh copy of a template at full health
    pub fn from_template(template: &MonsterTemplate) -> Self {
        Self {
            id: template.id.clone(),
            name: template.name.clone(),
            level: template.level,
            stats: template.stats,
            loot_table_id: template.loot_table_id.clone(),
            xp_reward: template.xp_reward,
            current_hp: template.stats.max_hp,
        }
    }

    /// Take damage, returns the new HP
    pub fn take_damage(&mut self, damage: u32) -> u32 {
        self.current_hp = self.current_hp.saturating_sub(damage);
        self.current_hp
    }

    pub fn is_dead(&self) -> bool {
        self.current_hp == 0
    }

    pub fn snapshot(&self) -> MonsterSnapshot {
        MonsterSnapshot {
            id: self.id.clone(),
            name: self.name.clone(),
            level: self.level,
            current_hp: self.current_hp,
            max_hp: self.stats.max_hp,
            attack_speed_ms: self.stats.attack_speed_ms,
        }
    }
}
