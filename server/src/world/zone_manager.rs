//! Zone management system.
//!
//! A zone is a named area with a pool of monsters. Exactly one zone is marked
//! safe; dead characters respawn there.

use std::collections::HashMap;
use log::{info, warn};
use rand::Rng;
use serde::{Deserialize, Serialize};

/// Zone definition loaded from content data
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ZoneDefinition {
    pub id: String,
    pub name: String,
    /// Monster template ids that can be encountered here
    #[serde(default)]
    pub monsters: Vec<String>,
    /// Respawn point for dead characters
    #[serde(default)]
    pub safe: bool,
}

/// Manages zone definitions and provides zone-related queries
#[derive(Debug, Default)]
pub struct ZoneManager {
    /// All zone definitions, keyed by zone ID
    zones: HashMap<String, ZoneDefinition>,
    /// Zone where dead characters respawn
    safe_zone: Option<String>,
}

impl ZoneManager {
    /// Create a new zone manager with empty data
    pub fn new() -> Self {
        Self::default()
    }

    /// Built-in zones used when no content file is available
    pub fn with_defaults() -> Self {
        let mut manager = Self::new();
        manager.load_zones(super::defaults::zones());
        manager
    }

    /// Replace all zones
    pub fn load_zones(&mut self, zones: Vec<ZoneDefinition>) {
        self.zones.clear();
        self.safe_zone = None;

        for zone in zones {
            if zone.safe {
                if let Some(existing) = &self.safe_zone {
                    warn!("Zone '{}' is also marked safe, keeping '{}' as respawn zone", zone.id, existing);
                } else {
                    self.safe_zone = Some(zone.id.clone());
                }
            }
            self.zones.insert(zone.id.clone(), zone);
        }

        info!("Loaded {} zones", self.zones.len());
    }

    pub fn get_zone(&self, zone_id: &str) -> Option<&ZoneDefinition> {
        self.zones.get(zone_id)
    }

    pub fn zones(&self) -> impl Iterator<Item = &ZoneDefinition> {
        self.zones.values()
    }

    pub fn zone_exists(&self, zone_id: &str) -> bool {
        self.zones.contains_key(zone_id)
    }

    /// Zone where dead characters respawn
    pub fn safe_zone_id(&self) -> Option<&str> {
        self.safe_zone.as_deref()
    }

    /// Monster ids for a zone (empty if the zone is unknown)
    pub fn get_monster_ids(&self, zone_id: &str) -> &[String] {
        self.zones
            .get(zone_id)
            .map(|z| z.monsters.as_slice())
            .unwrap_or(&[])
    }

    /// Pick a monster id uniformly at random from the zone's pool
    pub fn pick_monster(&self, zone_id: &str, rng: &mut impl Rng) -> Option<&str> {
        let monsters = self.get_monster_ids(zone_id);
        if monsters.is_empty() {
            return None;
        }
        Some(monsters[rng.gen_range(0..monsters.len())].as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;

    #[test]
    fn test_defaults_have_safe_zone() {
        let manager = ZoneManager::with_defaults();
        assert_eq!(manager.safe_zone_id(), Some("town"));
        assert!(manager.get_monster_ids("town").is_empty());
        assert!(manager.zone_exists("cellar"));
    }

    #[test]
    fn test_pick_monster_stays_in_pool() {
        let manager = ZoneManager::with_defaults();
        let mut rng = ChaCha8Rng::seed_from_u64(3);
        for _ in 0..100 {
            let id = manager.pick_monster("cellar", &mut rng).unwrap();
            assert!(id == "rat1" || id == "spider1");
        }
        assert!(manager.pick_monster("town", &mut rng).is_none());
        assert!(manager.pick_monster("nowhere", &mut rng).is_none());
    }

    #[test]
    fn test_first_safe_zone_wins() {
        let mut manager = ZoneManager::new();
        manager.load_zones(vec![
            ZoneDefinition { id: "a".into(), name: "A".into(), monsters: vec![], safe: true },
            ZoneDefinition { id: "b".into(), name: "B".into(), monsters: vec![], safe: true },
        ]);
        assert_eq!(manager.safe_zone_id(), Some("a"));
    }
}
