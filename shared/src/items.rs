//! Item definitions shared between client and server.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::entities::StatBlock;

/// Equipment slots a character can fill
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum EquipSlot {
    Weapon,
    Helmet,
    Armor,
    Gloves,
    Boots,
    Ring,
    Amulet,
}

/// Item kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ItemKind {
    Weapon,
    Armor,
    Jewelry,
    Material,
    Consumable,
}

/// Item quality tier, ordered from worst to best
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum QualityTier {
    Gray = 0,
    White = 1,
    Green = 2,
    Blue = 3,
    Purple = 4,
    Red = 5,
}

impl QualityTier {
    pub const ALL: [QualityTier; 6] = [
        QualityTier::Gray,
        QualityTier::White,
        QualityTier::Green,
        QualityTier::Blue,
        QualityTier::Purple,
        QualityTier::Red,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Self::Gray => "Gray",
            Self::White => "White",
            Self::Green => "Green",
            Self::Blue => "Blue",
            Self::Purple => "Purple",
            Self::Red => "Red",
        }
    }

    /// How many times an item of this quality may be upgraded
    pub fn max_upgrades(&self) -> u8 {
        match self {
            Self::Gray | Self::White => 1,
            Self::Green => 2,
            Self::Blue => 3,
            Self::Purple => 4,
            Self::Red => 5,
        }
    }

    /// Inclusive (min, max) number of affixes rolled for this quality
    pub fn affix_count_range(&self) -> (usize, usize) {
        match self {
            Self::Gray | Self::White => (0, 0),
            Self::Green => (1, 1),
            Self::Blue => (1, 2),
            Self::Purple => (2, 3),
            Self::Red => (3, 4),
        }
    }
}

/// Whether an affix is placed before or after the base name
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AffixKind {
    Prefix,
    Suffix,
}

/// One tier of an affix progression
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AffixTier {
    pub tier: u8,
    pub stats: StatBlock,
}

/// Affix definition from the affix pool
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AffixDef {
    pub id: String,
    pub name: String,
    pub kind: AffixKind,
    /// Empty means every equipment slot
    #[serde(default)]
    pub slots: Vec<EquipSlot>,
    pub tiers: Vec<AffixTier>,
}

impl AffixDef {
    pub fn allows(&self, slot: EquipSlot) -> bool {
        self.slots.is_empty() || self.slots.contains(&slot)
    }

    pub fn lowest_tier(&self) -> Option<&AffixTier> {
        self.tiers.iter().min_by_key(|t| t.tier)
    }
}

/// An affix rolled onto an item instance
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Affix {
    pub id: String,
    pub tier: u8,
    pub stats: StatBlock,
}

/// Item template (reference data)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ItemTemplate {
    pub id: String,
    pub name: String,
    pub kind: ItemKind,
    #[serde(default)]
    pub slot: Option<EquipSlot>,
    #[serde(default)]
    pub stats: StatBlock,
    #[serde(default = "default_max_stack")]
    pub max_stack: u32,
}

fn default_max_stack() -> u32 {
    1
}

impl ItemTemplate {
    pub fn is_equippable(&self) -> bool {
        self.slot.is_some()
    }
}

/// A concrete item owned by a character
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Item {
    pub instance_id: Uuid,
    pub base_id: String,
    pub slot: Option<EquipSlot>,
    pub quantity: u32,
    pub quality: QualityTier,
    pub base_stats: StatBlock,
    pub prefixes: Vec<Affix>,
    pub suffixes: Vec<Affix>,
    pub upgrade_count: u8,
    pub max_upgrades: u8,
}

impl Item {
    /// Create a plain item of the given quality with no affixes
    pub fn from_template(template: &ItemTemplate, instance_id: Uuid, quantity: u32, quality: QualityTier) -> Self {
        Self {
            instance_id,
            base_id: template.id.clone(),
            slot: template.slot,
            quantity,
            quality,
            base_stats: template.stats.clone(),
            prefixes: Vec::new(),
            suffixes: Vec::new(),
            upgrade_count: 0,
            max_upgrades: quality.max_upgrades(),
        }
    }

    pub fn is_equippable(&self) -> bool {
        self.slot.is_some()
    }

    pub fn affixes(&self) -> impl Iterator<Item = &Affix> {
        self.prefixes.iter().chain(self.suffixes.iter())
    }

    /// Base stats plus every affix modifier
    pub fn total_stats(&self) -> StatBlock {
        self.affixes()
            .fold(self.base_stats.clone(), |acc, affix| acc.add(&affix.stats))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sword() -> ItemTemplate {
        ItemTemplate {
            id: "rusty_sword".into(),
            name: "Rusty Sword".into(),
            kind: ItemKind::Weapon,
            slot: Some(EquipSlot::Weapon),
            stats: StatBlock { damage: 3, ..StatBlock::default() },
            max_stack: 1,
        }
    }

    #[test]
    fn test_quality_ordering() {
        assert!(QualityTier::Gray < QualityTier::White);
        assert!(QualityTier::White < QualityTier::Green);
        assert!(QualityTier::Green < QualityTier::Blue);
        assert!(QualityTier::Blue < QualityTier::Purple);
        assert!(QualityTier::Purple < QualityTier::Red);
    }

    #[test]
    fn test_max_upgrades_by_quality() {
        assert_eq!(QualityTier::Gray.max_upgrades(), 1);
        assert_eq!(QualityTier::White.max_upgrades(), 1);
        assert!(QualityTier::Green.max_upgrades() > 1);
        assert!(QualityTier::Blue.max_upgrades() > QualityTier::Green.max_upgrades());
    }

    #[test]
    fn test_total_stats_includes_affixes() {
        let mut item = Item::from_template(&sword(), Uuid::nil(), 1, QualityTier::Blue);
        item.prefixes.push(Affix {
            id: "sharp".into(),
            tier: 1,
            stats: StatBlock { damage: 2, ..StatBlock::default() },
        });
        item.suffixes.push(Affix {
            id: "of_the_bear".into(),
            tier: 1,
            stats: StatBlock { vitality: 4, ..StatBlock::default() },
        });

        let total = item.total_stats();
        assert_eq!(total.damage, 5);
        assert_eq!(total.vitality, 4);
        assert_eq!(item.max_upgrades, 3);
    }

    #[test]
    fn test_affix_lowest_tier() {
        let affix = AffixDef {
            id: "sturdy".into(),
            name: "Sturdy".into(),
            kind: AffixKind::Prefix,
            slots: vec![EquipSlot::Armor],
            tiers: vec![
                AffixTier { tier: 2, stats: StatBlock { vitality: 6, ..StatBlock::default() } },
                AffixTier { tier: 1, stats: StatBlock { vitality: 3, ..StatBlock::default() } },
            ],
        };
        assert_eq!(affix.lowest_tier().map(|t| t.tier), Some(1));
        assert!(affix.allows(EquipSlot::Armor));
        assert!(!affix.allows(EquipSlot::Weapon));
    }
}
