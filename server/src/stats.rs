//! Stat calculation and the experience curve.
//!
//! Everything here is pure: the same base stats and equipment always produce
//! the same combat stats.

use log::warn;

use idle_shared::{BaseStats, CombatantStats, Item};

/// Highest reachable character level
pub const MAX_LEVEL: u32 = 99;

/// Unspent stat points granted per level gained
pub const STAT_POINTS_PER_LEVEL: u32 = 5;

const BASE_HP: i64 = 50;
const HP_PER_VITALITY: i64 = 5;
const BASE_RESOURCE: i64 = 20;
const RESOURCE_PER_ENERGY: i64 = 2;
const BASE_DAMAGE: i64 = 2;
const STRENGTH_PER_DAMAGE: i64 = 3;
const BASE_ATTACK_SPEED_MS: i64 = 2000;
const ATTACK_SPEED_PER_DEXTERITY_MS: i64 = 10;
const MIN_ATTACK_SPEED_MS: i64 = 500;

/// Clamp a summed stat to zero, warning when the data drove it negative
fn clamp_stat(name: &str, value: i64) -> u32 {
    if value < 0 {
        warn!("Stat '{}' summed to {} - clamping to 0", name, value);
        0
    } else {
        value.min(u32::MAX as i64) as u32
    }
}

/// Compute effective combat stats from base stats and equipped items
pub fn compute_combat_stats<'a>(
    base: &BaseStats,
    equipped: impl IntoIterator<Item = &'a Item>,
) -> CombatantStats {
    let mut strength = base.strength as i64;
    let mut dexterity = base.dexterity as i64;
    let mut vitality = base.vitality as i64;
    let mut energy = base.energy as i64;
    let mut damage = 0i64;
    let mut magic_find = 0i64;

    for item in equipped {
        let stats = item.total_stats();
        strength += stats.strength as i64;
        dexterity += stats.dexterity as i64;
        vitality += stats.vitality as i64;
        energy += stats.energy as i64;
        damage += stats.damage as i64;
        magic_find += stats.magic_find as i64;
    }

    let strength = clamp_stat("strength", strength);
    let dexterity = clamp_stat("dexterity", dexterity);
    let vitality = clamp_stat("vitality", vitality);
    let energy = clamp_stat("energy", energy);

    let max_hp = clamp_stat("max_hp", BASE_HP + HP_PER_VITALITY * vitality as i64).max(1);
    let max_resource = clamp_stat("max_resource", BASE_RESOURCE + RESOURCE_PER_ENERGY * energy as i64);
    let base_damage = clamp_stat(
        "base_damage",
        BASE_DAMAGE + strength as i64 / STRENGTH_PER_DAMAGE + damage,
    );
    let attack_speed_ms = (BASE_ATTACK_SPEED_MS - ATTACK_SPEED_PER_DEXTERITY_MS * dexterity as i64)
        .max(MIN_ATTACK_SPEED_MS) as u32;

    CombatantStats {
        strength,
        dexterity,
        vitality,
        energy,
        max_hp,
        max_resource,
        attack_speed_ms,
        base_damage,
        magic_find: clamp_stat("magic_find", magic_find),
    }
}

/// Re-clamp current HP after a stat change. Never raises HP.
pub fn reclamp_hp(current_hp: u32, new_max_hp: u32) -> u32 {
    current_hp.min(new_max_hp)
}

/// Multiplier applied to magic-find-sensitive drop chances
pub fn magic_find_modifier(stats: &CombatantStats) -> f64 {
    1.0 + stats.magic_find as f64 / 100.0
}

/// Total experience required to reach `level`
pub fn xp_for_level(level: u32) -> u64 {
    if level <= 1 {
        return 0;
    }
    (100.0 * ((level - 1) as f64).powf(1.5)).floor() as u64
}

/// Highest level whose threshold is covered by `experience`
pub fn level_for_xp(experience: u64) -> u32 {
    let mut level = 1;
    while level < MAX_LEVEL && xp_for_level(level + 1) <= experience {
        level += 1;
    }
    level
}

/// Experience still needed for the next level (0 at max level)
pub fn xp_to_next_level(level: u32, experience: u64) -> u64 {
    if level >= MAX_LEVEL {
        return 0;
    }
    xp_for_level(level + 1).saturating_sub(experience)
}
