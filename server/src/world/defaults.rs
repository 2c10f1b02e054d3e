//! Built-in content used when no content file is present.

use idle_shared::{AffixDef, AffixKind, AffixTier, CombatantStats, EquipSlot, ItemKind, ItemTemplate, StatBlock};

use super::ZoneDefinition;
use crate::entities::MonsterTemplate;
use crate::loot::{LootDrop, LootTable, QualityWeights};

fn equipment(id: &str, name: &str, kind: ItemKind, slot: EquipSlot, stats: StatBlock) -> ItemTemplate {
    ItemTemplate {
        id: id.into(),
        name: name.into(),
        kind,
        slot: Some(slot),
        stats,
        max_stack: 1,
    }
}

fn stackable(id: &str, name: &str, kind: ItemKind, max_stack: u32) -> ItemTemplate {
    ItemTemplate {
        id: id.into(),
        name: name.into(),
        kind,
        slot: None,
        stats: StatBlock::default(),
        max_stack,
    }
}

pub fn items() -> Vec<ItemTemplate> {
    vec![
        equipment("rusty_sword", "Rusty Sword", ItemKind::Weapon, EquipSlot::Weapon,
            StatBlock { damage: 2, ..StatBlock::default() }),
        equipment("iron_sword", "Iron Sword", ItemKind::Weapon, EquipSlot::Weapon,
            StatBlock { damage: 5, strength: 2, ..StatBlock::default() }),
        equipment("leather_cap", "Leather Cap", ItemKind::Armor, EquipSlot::Helmet,
            StatBlock { vitality: 2, ..StatBlock::default() }),
        equipment("cloth_tunic", "Cloth Tunic", ItemKind::Armor, EquipSlot::Armor,
            StatBlock { vitality: 3, ..StatBlock::default() }),
        equipment("worn_boots", "Worn Boots", ItemKind::Armor, EquipSlot::Boots,
            StatBlock { dexterity: 3, ..StatBlock::default() }),
        equipment("copper_ring", "Copper Ring", ItemKind::Jewelry, EquipSlot::Ring,
            StatBlock { magic_find: 5, ..StatBlock::default() }),
        equipment("bone_charm", "Bone Charm", ItemKind::Jewelry, EquipSlot::Amulet,
            StatBlock { energy: 3, ..StatBlock::default() }),
        stackable("rat_tail", "Rat Tail", ItemKind::Material, 99),
        stackable("wolf_pelt", "Wolf Pelt", ItemKind::Material, 99),
        stackable("health_potion", "Health Potion", ItemKind::Consumable, 20),
    ]
}

fn affix(id: &str, name: &str, kind: AffixKind, slots: &[EquipSlot], per_tier: StatBlock) -> AffixDef {
    let tiers = (1..=3)
        .map(|tier| AffixTier {
            tier,
            stats: StatBlock {
                strength: per_tier.strength * tier as i32,
                dexterity: per_tier.dexterity * tier as i32,
                vitality: per_tier.vitality * tier as i32,
                energy: per_tier.energy * tier as i32,
                damage: per_tier.damage * tier as i32,
                magic_find: per_tier.magic_find * tier as i32,
            },
        })
        .collect();

    AffixDef {
        id: id.into(),
        name: name.into(),
        kind,
        slots: slots.to_vec(),
        tiers,
    }
}

pub fn affixes() -> Vec<AffixDef> {
    use AffixKind::{Prefix, Suffix};
    use EquipSlot::*;

    vec![
        affix("sharp", "Sharp", Prefix, &[Weapon], StatBlock { damage: 2, ..StatBlock::default() }),
        affix("mighty", "Mighty", Prefix, &[], StatBlock { strength: 2, ..StatBlock::default() }),
        affix("nimble", "Nimble", Prefix, &[], StatBlock { dexterity: 2, ..StatBlock::default() }),
        affix("sturdy", "Sturdy", Prefix, &[Helmet, Armor, Boots, Gloves], StatBlock { vitality: 3, ..StatBlock::default() }),
        affix("lucky", "Lucky", Prefix, &[Ring, Amulet], StatBlock { magic_find: 5, ..StatBlock::default() }),
        affix("of_the_bear", "of the Bear", Suffix, &[], StatBlock { vitality: 3, ..StatBlock::default() }),
        affix("of_the_fox", "of the Fox", Suffix, &[], StatBlock { dexterity: 2, ..StatBlock::default() }),
        affix("of_wisdom", "of Wisdom", Suffix, &[], StatBlock { energy: 3, ..StatBlock::default() }),
        affix("of_fortune", "of Fortune", Suffix, &[Ring, Amulet], StatBlock { magic_find: 8, ..StatBlock::default() }),
        affix("of_power", "of Power", Suffix, &[Weapon, Gloves], StatBlock { strength: 3, ..StatBlock::default() }),
    ]
}

fn monster(
    id: &str,
    name: &str,
    level: u32,
    max_hp: u32,
    base_damage: u32,
    attack_speed_ms: u32,
    loot_table_id: &str,
    xp_reward: u64,
) -> MonsterTemplate {
    MonsterTemplate {
        id: id.into(),
        name: name.into(),
        level,
        stats: CombatantStats {
            strength: level,
            dexterity: level,
            vitality: level,
            energy: 0,
            max_hp,
            max_resource: 0,
            attack_speed_ms,
            base_damage,
            magic_find: 0,
        },
        loot_table_id: loot_table_id.into(),
        xp_reward,
    }
}

pub fn monsters() -> Vec<MonsterTemplate> {
    vec![
        monster("rat1", "Sewer Rat", 1, 20, 1, 1500, "low_level_common", 10),
        monster("spider1", "Cellar Spider", 2, 30, 2, 1700, "low_level_common", 15),
        monster("wolf1", "Grey Wolf", 3, 45, 3, 1400, "forest_common", 25),
        monster("bandit1", "Bandit", 5, 70, 5, 1600, "forest_common", 40),
    ]
}

fn drop(base_id: &str, chance: f64, min_quantity: u32, max_quantity: u32, magic_find_sensitive: bool) -> LootDrop {
    LootDrop {
        base_id: base_id.into(),
        chance,
        min_quantity,
        max_quantity,
        magic_find_sensitive,
    }
}

pub fn loot_tables() -> Vec<LootTable> {
    vec![
        LootTable {
            id: "low_level_common".into(),
            no_drop_chance: 0.3,
            max_drops: 2,
            drops: vec![
                drop("rat_tail", 0.6, 1, 3, false),
                drop("health_potion", 0.2, 1, 1, true),
                drop("rusty_sword", 0.1, 1, 1, true),
                drop("leather_cap", 0.1, 1, 1, true),
                drop("worn_boots", 0.08, 1, 1, true),
                drop("copper_ring", 0.05, 1, 1, true),
            ],
            quality_weights: None,
        },
        LootTable {
            id: "forest_common".into(),
            no_drop_chance: 0.2,
            max_drops: 3,
            drops: vec![
                drop("wolf_pelt", 0.5, 1, 2, false),
                drop("health_potion", 0.25, 1, 2, true),
                drop("iron_sword", 0.08, 1, 1, true),
                drop("cloth_tunic", 0.1, 1, 1, true),
                drop("bone_charm", 0.05, 1, 1, true),
                drop("copper_ring", 0.06, 1, 1, true),
            ],
            quality_weights: Some(QualityWeights {
                gray: 20,
                white: 40,
                green: 25,
                blue: 10,
                purple: 4,
                red: 1,
            }),
        },
    ]
}

pub fn zones() -> Vec<ZoneDefinition> {
    vec![
        ZoneDefinition {
            id: "town".into(),
            name: "Town".into(),
            monsters: vec![],
            safe: true,
        },
        ZoneDefinition {
            id: "cellar".into(),
            name: "Damp Cellar".into(),
            monsters: vec!["rat1".into(), "spider1".into()],
            safe: false,
        },
        ZoneDefinition {
            id: "forest".into(),
            name: "Whispering Forest".into(),
            monsters: vec!["wolf1".into(), "bandit1".into()],
            safe: false,
        },
    ]
}
