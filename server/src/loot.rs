//! Loot tables and item generation.
//!
//! Rolling is a pure function of the table, the magic-find modifier and the
//! random source: the same seed always yields the same items, instance ids
//! included.

use rand::seq::SliceRandom;
use rand::Rng;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use idle_shared::{Affix, AffixKind, EquipSlot, Item, ItemTemplate, QualityTier};

use crate::world::WorldContent;

/// Maximum prefixes (and, separately, suffixes) on one item
pub const MAX_AFFIXES_PER_KIND: usize = 2;

/// One possible drop in a loot table
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LootDrop {
    pub base_id: String,
    /// Probability in [0, 1]
    pub chance: f64,
    #[serde(default = "default_quantity")]
    pub min_quantity: u32,
    #[serde(default = "default_quantity")]
    pub max_quantity: u32,
    #[serde(default)]
    pub magic_find_sensitive: bool,
}

fn default_quantity() -> u32 {
    1
}

/// Relative weights for each quality tier
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QualityWeights {
    pub gray: u32,
    pub white: u32,
    pub green: u32,
    pub blue: u32,
    pub purple: u32,
    pub red: u32,
}

impl Default for QualityWeights {
    fn default() -> Self {
        Self {
            gray: 30,
            white: 40,
            green: 18,
            blue: 8,
            purple: 3,
            red: 1,
        }
    }
}

impl QualityWeights {
    fn weight(&self, tier: QualityTier) -> u32 {
        match tier {
            QualityTier::Gray => self.gray,
            QualityTier::White => self.white,
            QualityTier::Green => self.green,
            QualityTier::Blue => self.blue,
            QualityTier::Purple => self.purple,
            QualityTier::Red => self.red,
        }
    }

    pub fn total(&self) -> u32 {
        QualityTier::ALL.iter().map(|t| self.weight(*t)).sum()
    }
}

/// Loot table (reference data)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LootTable {
    pub id: String,
    /// Chance that nothing drops at all
    pub no_drop_chance: f64,
    pub max_drops: u32,
    pub drops: Vec<LootDrop>,
    /// Overrides the default quality distribution
    #[serde(default)]
    pub quality_weights: Option<QualityWeights>,
}

/// Roll a loot table. Returns zero or more item instances.
pub fn roll_loot(
    table: &LootTable,
    magic_find_modifier: f64,
    content: &WorldContent,
    rng: &mut impl Rng,
) -> Vec<Item> {
    let mut items = Vec::new();

    if rng.gen::<f64>() < table.no_drop_chance {
        return items;
    }

    let weights = table.quality_weights.clone().unwrap_or_default();

    // Visit drops in random order so earlier entries are not favoured
    // when max_drops cuts the list short
    let mut order: Vec<usize> = (0..table.drops.len()).collect();
    order.shuffle(rng);

    let mut successes = 0;
    for index in order {
        if successes >= table.max_drops {
            break;
        }

        let drop = &table.drops[index];
        let chance = if drop.magic_find_sensitive {
            (drop.chance * magic_find_modifier.max(0.0)).min(1.0)
        } else {
            drop.chance
        };
        if !rng.gen_bool(chance.clamp(0.0, 1.0)) {
            continue;
        }

        let template = match content.get_item(&drop.base_id) {
            Some(t) => t,
            // Content validation makes this unreachable in practice
            None => continue,
        };
        successes += 1;

        let low = drop.min_quantity.min(drop.max_quantity);
        let high = drop.max_quantity.max(drop.min_quantity);
        let quantity = rng.gen_range(low..=high);

        if template.is_equippable() {
            for _ in 0..quantity {
                items.push(generate_equipment(template, &weights, content, rng));
            }
        } else if quantity > 0 {
            items.push(Item::from_template(template, new_instance_id(rng), quantity, QualityTier::White));
        }
    }

    items
}

/// Instance ids come from the same random source so rolls stay reproducible
fn new_instance_id(rng: &mut impl Rng) -> Uuid {
    uuid::Builder::from_random_bytes(rng.gen()).into_uuid()
}

/// Instantiate an equippable template with a rolled quality and affixes
pub fn generate_equipment(
    template: &ItemTemplate,
    weights: &QualityWeights,
    content: &WorldContent,
    rng: &mut impl Rng,
) -> Item {
    let quality = roll_quality(weights, rng);
    let mut item = Item::from_template(template, new_instance_id(rng), 1, quality);
    if let Some(slot) = template.slot {
        roll_affixes(&mut item, slot, content, rng);
    }
    item
}

/// Roll a quality tier from weights
pub fn roll_quality(weights: &QualityWeights, rng: &mut impl Rng) -> QualityTier {
    let total = weights.total();
    if total == 0 {
        return QualityTier::Gray;
    }

    let roll = rng.gen_range(0..total);
    let mut cumulative = 0;
    for tier in QualityTier::ALL {
        cumulative += weights.weight(tier);
        if roll < cumulative {
            return tier;
        }
    }

    QualityTier::Gray
}

/// Attach affixes according to the item's quality. Each affix is drawn
/// uniformly from unused pool entries of its kind at their lowest tier.
fn roll_affixes(item: &mut Item, slot: EquipSlot, content: &WorldContent, rng: &mut impl Rng) {
    let (min, max) = item.quality.affix_count_range();
    if max == 0 {
        return;
    }
    let count = rng.gen_range(min..=max);

    for _ in 0..count {
        let prefix_open = item.prefixes.len() < MAX_AFFIXES_PER_KIND;
        let suffix_open = item.suffixes.len() < MAX_AFFIXES_PER_KIND;
        let first = match (prefix_open, suffix_open) {
            (true, true) => {
                if rng.gen_bool(0.5) {
                    AffixKind::Prefix
                } else {
                    AffixKind::Suffix
                }
            }
            (true, false) => AffixKind::Prefix,
            (false, true) => AffixKind::Suffix,
            (false, false) => break,
        };
        let second = match first {
            AffixKind::Prefix if suffix_open => Some(AffixKind::Suffix),
            AffixKind::Suffix if prefix_open => Some(AffixKind::Prefix),
            _ => None,
        };

        let picked = pick_affix(item, slot, first, content, rng)
            .or_else(|| second.and_then(|kind| pick_affix(item, slot, kind, content, rng)));

        match picked {
            Some((AffixKind::Prefix, affix)) => item.prefixes.push(affix),
            Some((AffixKind::Suffix, affix)) => item.suffixes.push(affix),
            None => break,
        }
    }
}

fn pick_affix(
    item: &Item,
    slot: EquipSlot,
    kind: AffixKind,
    content: &WorldContent,
    rng: &mut impl Rng,
) -> Option<(AffixKind, Affix)> {
    let candidates: Vec<_> = content
        .affixes()
        .iter()
        .filter(|def| def.kind == kind && def.allows(slot))
        .filter(|def| !item.affixes().any(|a| a.id == def.id))
        .filter_map(|def| def.lowest_tier().map(|tier| (def, tier)))
        .collect();

    let (def, tier) = candidates.choose(rng)?;
    Some((
        kind,
        Affix {
            id: def.id.clone(),
            tier: tier.tier,
            stats: tier.stats.clone(),
        },
    ))
}
