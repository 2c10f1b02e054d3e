//! Live encounters, keyed by connection.
//!
//! The table is the only record of "this connection is fighting". Every
//! mutation happens under one lock, which is what makes termination
//! exactly-once: the lethal hit removes the entry in the same critical
//! section that applied the damage.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;

use idle_shared::{Attacker, CharacterId, MonsterSnapshot, ServerMessage};

use crate::entities::{MonsterInstance, PlayerSnapshot};

/// Network connection identifier
pub type ConnectionId = u64;

/// Monotonic per-process encounter id
pub type EncounterId = u64;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EncounterPhase {
    Idle,
    Searching,
    Engaged,
    EndedVictory,
    EndedDeath,
}

#[derive(Debug, Clone)]
pub struct EncounterState {
    pub id: EncounterId,
    pub character_id: CharacterId,
    pub monster: MonsterInstance,
    pub player: PlayerSnapshot,
    pub phase: EncounterPhase,
}

/// Read-only view of a live encounter
#[derive(Debug, Clone, PartialEq)]
pub struct EncounterSnapshot {
    pub encounter_id: EncounterId,
    pub character_id: CharacterId,
    pub phase: EncounterPhase,
    pub monster: MonsterSnapshot,
    pub player_hp: u32,
    pub player_max_hp: u32,
}

/// Result of applying one attack
#[derive(Debug)]
pub enum HitResult {
    /// No live encounter (or a newer one than the caller expected)
    Stale,
    Hit { damage: u32, defender_hp: u32 },
    /// The defender died. The encounter has already been removed.
    Lethal { damage: u32, state: Box<EncounterState> },
}

/// `floor(base × multiplier)`, never below 1
pub fn roll_damage(base_damage: u32, multiplier: f64) -> u32 {
    let damage = (base_damage as f64 * multiplier).floor();
    if damage.is_finite() && damage >= 1.0 {
        damage.min(u32::MAX as f64) as u32
    } else {
        1
    }
}

#[derive(Debug, Default)]
pub struct EncounterTable {
    next_id: AtomicU64,
    encounters: Mutex<HashMap<ConnectionId, EncounterState>>,
}

impl EncounterTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contains(&self, connection: ConnectionId) -> bool {
        self.encounters.lock().contains_key(&connection)
    }

    /// Create an encounter in `Searching`. Returns `None` if the connection
    /// already has one.
    pub fn insert(
        &self,
        connection: ConnectionId,
        character_id: CharacterId,
        monster: MonsterInstance,
        player: PlayerSnapshot,
    ) -> Option<EncounterId> {
        let mut encounters = self.encounters.lock();
        if encounters.contains_key(&connection) {
            return None;
        }

        let id = self.next_id.fetch_add(1, Ordering::Relaxed) + 1;
        encounters.insert(
            connection,
            EncounterState {
                id,
                character_id,
                monster,
                player,
                phase: EncounterPhase::Searching,
            },
        );
        Some(id)
    }

    /// Mark the encounter as engaged once its timers run
    pub fn engage(&self, connection: ConnectionId, id: EncounterId) -> bool {
        match self.encounters.lock().get_mut(&connection) {
            Some(state) if state.id == id && state.phase == EncounterPhase::Searching => {
                state.phase = EncounterPhase::Engaged;
                true
            }
            _ => false,
        }
    }

    pub fn phase(&self, connection: ConnectionId) -> EncounterPhase {
        self.encounters
            .lock()
            .get(&connection)
            .map_or(EncounterPhase::Idle, |state| state.phase)
    }

    pub fn snapshot(&self, connection: ConnectionId) -> Option<EncounterSnapshot> {
        self.encounters.lock().get(&connection).map(|state| EncounterSnapshot {
            encounter_id: state.id,
            character_id: state.character_id,
            phase: state.phase,
            monster: state.monster.snapshot(),
            player_hp: state.player.current_hp,
            player_max_hp: state.player.stats.max_hp,
        })
    }

    pub fn remove(&self, connection: ConnectionId) -> Option<EncounterState> {
        self.encounters.lock().remove(&connection)
    }

    pub fn len(&self) -> usize {
        self.encounters.lock().len()
    }

    #[cfg(test)]
    pub fn lock_for_test(&self) -> parking_lot::MutexGuard<'_, HashMap<ConnectionId, EncounterState>> {
        self.encounters.lock()
    }

    /// Apply one attack. `expected` pins the hit to a specific encounter; a
    /// timer from an older encounter gets `Stale`.
    ///
    /// `on_hit` receives the `AttackUpdate` while the table is still locked,
    /// so no update can be delivered after the terminal event of the same
    /// encounter.
    pub fn apply_hit(
        &self,
        connection: ConnectionId,
        expected: Option<EncounterId>,
        attacker: Attacker,
        multiplier: f64,
        on_hit: impl FnOnce(ServerMessage),
    ) -> HitResult {
        let mut encounters = self.encounters.lock();
        let state = match encounters.get_mut(&connection) {
            Some(state) if expected.map_or(true, |id| id == state.id) => state,
            _ => return HitResult::Stale,
        };

        let (damage, defender_hp, defender_max_hp, lethal) = match attacker {
            Attacker::Player => {
                let damage = roll_damage(state.player.stats.base_damage, multiplier);
                let hp = state.monster.take_damage(damage);
                (damage, hp, state.monster.stats.max_hp, state.monster.is_dead())
            }
            Attacker::Monster => {
                let damage = roll_damage(state.monster.stats.base_damage, multiplier);
                let hp = state.player.take_damage(damage);
                (damage, hp, state.player.stats.max_hp, state.player.is_dead())
            }
        };

        on_hit(ServerMessage::AttackUpdate {
            attacker,
            damage,
            defender_hp,
            defender_max_hp,
        });

        if !lethal {
            return HitResult::Hit { damage, defender_hp };
        }

        match encounters.remove(&connection) {
            Some(mut state) => {
                state.phase = match attacker {
                    Attacker::Player => EncounterPhase::EndedVictory,
                    Attacker::Monster => EncounterPhase::EndedDeath,
                };
                HitResult::Lethal { damage, state: Box::new(state) }
            }
            None => HitResult::Stale,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::world::WorldContent;
    use idle_shared::CharacterData;

    fn encounter_parts() -> (MonsterInstance, PlayerSnapshot) {
        let content = WorldContent::with_defaults();
        let monster = MonsterInstance::from_template(content.get_monster("rat1").unwrap());
        let player = PlayerSnapshot::new(CharacterData::new(1, "Hero".into(), "cellar".into()));
        (monster, player)
    }

    #[test]
    fn test_roll_damage() {
        assert_eq!(roll_damage(10, 0.8), 8);
        assert_eq!(roll_damage(10, 1.2), 12);
        assert_eq!(roll_damage(5, 0.99), 4);
        assert_eq!(roll_damage(1, 0.8), 1);
        assert_eq!(roll_damage(0, 1.0), 1);
    }

    #[test]
    fn test_one_encounter_per_connection() {
        let table = EncounterTable::new();
        let (monster, player) = encounter_parts();
        let first = table.insert(7, 1, monster.clone(), player.clone()).unwrap();
        assert!(table.insert(7, 1, monster.clone(), player.clone()).is_none());
        table.remove(7);
        let second = table.insert(7, 1, monster, player).unwrap();
        assert!(second > first);
    }

    #[test]
    fn test_phases() {
        let table = EncounterTable::new();
        let (monster, player) = encounter_parts();
        assert_eq!(table.phase(1), EncounterPhase::Idle);
        let id = table.insert(1, 1, monster, player).unwrap();
        assert_eq!(table.phase(1), EncounterPhase::Searching);
        assert!(!table.engage(1, id + 1));
        assert!(table.engage(1, id));
        assert_eq!(table.phase(1), EncounterPhase::Engaged);
        assert!(!table.engage(1, id));
    }

    #[test]
    fn test_stale_encounter_id_is_ignored() {
        let table = EncounterTable::new();
        let (monster, player) = encounter_parts();
        let id = table.insert(1, 1, monster, player).unwrap();

        let result = table.apply_hit(1, Some(id + 1), Attacker::Player, 1.0, |_| panic!("no update expected"));
        assert!(matches!(result, HitResult::Stale));
        assert_eq!(table.snapshot(1).unwrap().monster.current_hp, 20);
    }

    #[test]
    fn test_lethal_hit_removes_exactly_once() {
        let table = EncounterTable::new();
        let (mut monster, player) = encounter_parts();
        monster.current_hp = 1;
        let id = table.insert(1, 1, monster, player).unwrap();

        let mut updates = Vec::new();
        match table.apply_hit(1, Some(id), Attacker::Player, 1.0, |m| updates.push(m)) {
            HitResult::Lethal { state, .. } => {
                assert_eq!(state.phase, EncounterPhase::EndedVictory);
                assert_eq!(state.monster.current_hp, 0);
            }
            other => panic!("expected lethal hit, got {:?}", other),
        }
        assert_eq!(updates.len(), 1);
        assert!(!table.contains(1));

        let again = table.apply_hit(1, Some(id), Attacker::Monster, 1.0, |m| updates.push(m));
        assert!(matches!(again, HitResult::Stale));
        assert_eq!(updates.len(), 1);
    }

    #[test]
    fn test_monster_hit_lowers_player_hp() {
        let table = EncounterTable::new();
        let (monster, player) = encounter_parts();
        table.insert(1, 1, monster, player).unwrap();

        match table.apply_hit(1, None, Attacker::Monster, 1.0, |_| {}) {
            HitResult::Hit { damage, defender_hp } => {
                assert_eq!(damage, 1);
                assert_eq!(defender_hp, 99);
            }
            other => panic!("expected hit, got {:?}", other),
        }
    }
}
