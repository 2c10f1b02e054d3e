//! Server-side player state: the combat snapshot used during an encounter and
//! the character mutations applied when combat or equipment changes.

use log::{info, warn};

use idle_shared::{CharacterData, CharacterProjection, CombatantStats, EquipSlot, Item};

use crate::error::InventoryError;
use crate::stats::{self, MAX_LEVEL, STAT_POINTS_PER_LEVEL};

/// Maximum inventory entries
pub const INVENTORY_SIZE: usize = 40;

/// Player side of an encounter
#[derive(Debug, Clone)]
pub struct PlayerSnapshot {
    pub character: CharacterData,
    pub stats: CombatantStats,
    pub current_hp: u32,
}

impl PlayerSnapshot {
    pub fn new(character: CharacterData) -> Self {
        let stats = stats::compute_combat_stats(&character.base_stats, character.equipped_items());
        let current_hp = stats::reclamp_hp(character.current_hp, stats.max_hp);
        Self {
            character,
            stats,
            current_hp,
        }
    }

    /// Take damage, returns the new HP
    pub fn take_damage(&mut self, damage: u32) -> u32 {
        self.current_hp = self.current_hp.saturating_sub(damage);
        self.current_hp
    }

    /// Check if dead
    pub fn is_dead(&self) -> bool {
        self.current_hp == 0
    }
}

/// Current combat stats of a character
pub fn combat_stats(character: &CharacterData) -> CombatantStats {
    stats::compute_combat_stats(&character.base_stats, character.equipped_items())
}

/// Client-facing projection of a character
pub fn projection(character: &CharacterData) -> CharacterProjection {
    CharacterProjection::new(
        character,
        combat_stats(character),
        stats::xp_to_next_level(character.level, character.experience),
    )
}

/// Add experience and apply any level-ups. Returns the number of levels gained.
pub fn gain_experience(character: &mut CharacterData, amount: u64) -> u32 {
    character.experience = character.experience.saturating_add(amount);

    let new_level = stats::level_for_xp(character.experience).min(MAX_LEVEL);
    if new_level <= character.level {
        return 0;
    }

    let gained = new_level - character.level;
    character.level = new_level;
    character.stat_points += gained * STAT_POINTS_PER_LEVEL;
    character.current_hp = stats::reclamp_hp(character.current_hp, combat_stats(character).max_hp);
    info!("Character {} reached level {}", character.id, new_level);
    gained
}

/// Record a kill in the character's current zone
pub fn record_kill(character: &mut CharacterData) -> u32 {
    let counter = character.kills.entry(character.zone_id.clone()).or_insert(0);
    *counter += 1;
    *counter
}

/// Move a dead character to the safe zone at full health
pub fn respawn(character: &mut CharacterData, safe_zone_id: &str) {
    character.zone_id = safe_zone_id.to_string();
    character.current_hp = combat_stats(character).max_hp;
}

/// Add an item to the inventory, stacking if possible.
/// Returns false if some of it did not fit.
pub fn add_to_inventory(character: &mut CharacterData, mut item: Item, max_stack: u32) -> bool {
    let max_stack = max_stack.max(1);

    // Try to stack with existing items
    if !item.is_equippable() {
        for slot in character.inventory.iter_mut() {
            if item.quantity == 0 {
                return true;
            }
            if slot.base_id == item.base_id && slot.quantity < max_stack {
                let can_add = (max_stack - slot.quantity).min(item.quantity);
                slot.quantity += can_add;
                item.quantity -= can_add;
            }
        }
    }

    // New entries for the remainder
    while item.quantity > 0 {
        if character.inventory.len() >= INVENTORY_SIZE {
            warn!(
                "Inventory of character {} is full, {} x {} lost",
                character.id, item.quantity, item.base_id
            );
            return false;
        }
        let take = item.quantity.min(max_stack);
        let mut entry = item.clone();
        entry.quantity = take;
        item.quantity -= take;
        if item.quantity > 0 {
            // Split stacks need their own identity
            entry.instance_id = uuid::Uuid::new_v4();
        }
        character.inventory.push(entry);
    }

    true
}

/// Move an item from the inventory into its equipment slot, swapping out
/// anything already there. HP is re-clamped to the new maximum.
pub fn equip_item(character: &mut CharacterData, index: usize) -> Result<CombatantStats, InventoryError> {
    let slot = character
        .inventory
        .get(index)
        .ok_or(InventoryError::NoSuchItem(index))?
        .slot
        .ok_or(InventoryError::NotEquippable)?;

    let item = character.inventory.remove(index);
    if let Some(previous) = character.equipment.insert(slot, item) {
        character.inventory.insert(index, previous);
    }

    let stats = combat_stats(character);
    character.current_hp = stats::reclamp_hp(character.current_hp, stats.max_hp);
    Ok(stats)
}

/// Move the item in `slot` back into the inventory. HP is re-clamped.
pub fn unequip_item(character: &mut CharacterData, slot: EquipSlot) -> Result<CombatantStats, InventoryError> {
    if !character.equipment.contains_key(&slot) {
        return Err(InventoryError::SlotEmpty);
    }
    if character.inventory.len() >= INVENTORY_SIZE {
        return Err(InventoryError::InventoryFull);
    }

    if let Some(item) = character.equipment.remove(&slot) {
        character.inventory.push(item);
    }

    let stats = combat_stats(character);
    character.current_hp = stats::reclamp_hp(character.current_hp, stats.max_hp);
    Ok(stats)
}
