//! Game world reference data: items, affixes, monsters, loot tables and zones.
//!
//! Loaded once at startup and never mutated afterwards. Every cross-reference
//! is checked by [`WorldContent::validate`]; the server refuses to start on
//! broken data.

mod defaults;
mod zone_manager;

pub use zone_manager::{ZoneDefinition, ZoneManager};

use std::collections::HashMap;
use std::path::Path;
use log::{info, warn};
use serde::Deserialize;

use idle_shared::{AffixDef, ItemTemplate};

use crate::entities::MonsterTemplate;
use crate::error::ContentError;
use crate::loot::LootTable;

/// On-disk layout of a content file
#[derive(Debug, Deserialize)]
struct ContentFile {
    items: Vec<ItemTemplate>,
    #[serde(default)]
    affixes: Vec<AffixDef>,
    monsters: Vec<MonsterTemplate>,
    loot_tables: Vec<LootTable>,
    zones: Vec<ZoneDefinition>,
}

/// All reference data the combat engine reads
#[derive(Debug)]
pub struct WorldContent {
    items: HashMap<String, ItemTemplate>,
    /// Kept in file order so affix rolls are reproducible
    affixes: Vec<AffixDef>,
    monsters: HashMap<String, MonsterTemplate>,
    loot_tables: HashMap<String, LootTable>,
    pub zone_manager: ZoneManager,
}

impl WorldContent {
    fn from_parts(
        items: Vec<ItemTemplate>,
        affixes: Vec<AffixDef>,
        monsters: Vec<MonsterTemplate>,
        loot_tables: Vec<LootTable>,
        zones: Vec<ZoneDefinition>,
    ) -> Self {
        let mut zone_manager = ZoneManager::new();
        zone_manager.load_zones(zones);

        Self {
            items: items.into_iter().map(|i| (i.id.clone(), i)).collect(),
            affixes,
            monsters: monsters.into_iter().map(|m| (m.id.clone(), m)).collect(),
            loot_tables: loot_tables.into_iter().map(|t| (t.id.clone(), t)).collect(),
            zone_manager,
        }
    }

    /// Built-in content used when no content file is present
    pub fn with_defaults() -> Self {
        Self::from_parts(
            defaults::items(),
            defaults::affixes(),
            defaults::monsters(),
            defaults::loot_tables(),
            defaults::zones(),
        )
    }

    /// Load content from a JSON file
    pub fn load_from_json<P: AsRef<Path>>(path: P) -> Result<Self, ContentError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)?;
        let file: ContentFile = serde_json::from_str(&text)?;

        info!(
            "Loaded content from {:?}: {} items, {} affixes, {} monsters, {} loot tables, {} zones",
            path,
            file.items.len(),
            file.affixes.len(),
            file.monsters.len(),
            file.loot_tables.len(),
            file.zones.len()
        );

        Ok(Self::from_parts(file.items, file.affixes, file.monsters, file.loot_tables, file.zones))
    }

    /// Load from `path`, falling back to built-in content if the file does not exist
    pub fn load_or_default<P: AsRef<Path>>(path: P) -> Result<Self, ContentError> {
        match Self::load_from_json(&path) {
            Err(ContentError::Io(e)) if e.kind() == std::io::ErrorKind::NotFound => {
                info!("No content file at {:?}, using built-in content", path.as_ref());
                Ok(Self::with_defaults())
            }
            other => other,
        }
    }

    pub fn get_item(&self, id: &str) -> Option<&ItemTemplate> {
        self.items.get(id)
    }

    pub fn affixes(&self) -> &[AffixDef] {
        &self.affixes
    }

    pub fn get_monster(&self, id: &str) -> Option<&MonsterTemplate> {
        self.monsters.get(id)
    }

    pub fn get_loot_table(&self, id: &str) -> Option<&LootTable> {
        self.loot_tables.get(id)
    }

    /// Max stack size for an item id (1 if unknown)
    pub fn max_stack(&self, id: &str) -> u32 {
        self.items.get(id).map(|i| i.max_stack).unwrap_or(1)
    }

    /// Check every cross-reference and value range
    pub fn validate(&self) -> Result<(), ContentError> {
        let mut problems = Vec::new();

        let safe_zone = self.zone_manager.safe_zone_id();
        match safe_zone {
            None => problems.push("no safe zone defined".to_string()),
            Some(id) if !self.zone_manager.get_monster_ids(id).is_empty() => {
                warn!("Safe zone '{}' has monsters", id);
            }
            Some(_) => {}
        }

        for zone in self.zone_manager.zones() {
            for monster_id in &zone.monsters {
                if !self.monsters.contains_key(monster_id) {
                    problems.push(format!("zone '{}' references unknown monster '{}'", zone.id, monster_id));
                }
            }
        }

        for monster in self.monsters.values() {
            if !self.loot_tables.contains_key(&monster.loot_table_id) {
                problems.push(format!(
                    "monster '{}' references unknown loot table '{}'",
                    monster.id, monster.loot_table_id
                ));
            }
            if monster.stats.attack_speed_ms == 0 {
                problems.push(format!("monster '{}' has zero attack speed", monster.id));
            }
            if monster.stats.max_hp == 0 {
                problems.push(format!("monster '{}' has zero max HP", monster.id));
            }
        }

        for table in self.loot_tables.values() {
            if !(0.0..=1.0).contains(&table.no_drop_chance) {
                problems.push(format!("loot table '{}' has no_drop_chance outside [0, 1]", table.id));
            }
            if let Some(weights) = &table.quality_weights {
                if weights.total() == 0 {
                    problems.push(format!("loot table '{}' has all-zero quality weights", table.id));
                }
            }
            for drop in &table.drops {
                if !self.items.contains_key(&drop.base_id) {
                    problems.push(format!("loot table '{}' references unknown item '{}'", table.id, drop.base_id));
                }
                if !(0.0..=1.0).contains(&drop.chance) {
                    problems.push(format!("loot table '{}' drop '{}' has chance outside [0, 1]", table.id, drop.base_id));
                }
                if drop.min_quantity > drop.max_quantity {
                    problems.push(format!("loot table '{}' drop '{}' has min_quantity > max_quantity", table.id, drop.base_id));
                }
            }
        }

        for affix in &self.affixes {
            if affix.tiers.is_empty() {
                problems.push(format!("affix '{}' has no tiers", affix.id));
            }
        }

        if problems.is_empty() {
            Ok(())
        } else {
            Err(ContentError::Invalid(problems.join("; ")))
        }
    }
}
