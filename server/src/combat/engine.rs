//! The encounter engine: starts encounters, resolves attack ticks and ends
//! them exactly once with loot and experience or a respawn.

use std::sync::Arc;
use std::time::Duration;

use futures::future::BoxFuture;
use futures::FutureExt;
use log::{debug, error, info, warn};
use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tokio::task::JoinHandle;

use idle_shared::{Attacker, CharacterId, Item, MonsterSnapshot, ServerMessage};

use super::encounter::{EncounterState, EncounterTable, HitResult};
use super::scheduler::{AttackScheduler, TickFn};
use super::{ConnectionId, EncounterId, EncounterPhase, EncounterSnapshot, EventSink};
use crate::config::EngineConfig;
use crate::entities::{player, MonsterInstance, PlayerSnapshot};
use crate::error::CombatError;
use crate::loot;
use crate::persistence::{CharacterRepository, CharacterUpdate};
use crate::stats;
use crate::world::WorldContent;

/// Damage multiplier range applied to every hit
const DAMAGE_VARIANCE: (f64, f64) = (0.8, 1.2);

/// What `find_monster` hands back to start the timers
#[derive(Debug, Clone, PartialEq)]
pub struct FoundMonster {
    pub encounter_id: EncounterId,
    pub monster: MonsterSnapshot,
    pub player_hp: u32,
    pub player_max_hp: u32,
    pub player_attack_speed_ms: u32,
    pub monster_attack_speed_ms: u32,
}

/// Result of one `resolve_attack` call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttackOutcome {
    /// Nothing to resolve: no encounter, or it already ended
    NoEncounter,
    Hit { damage: u32, defender_hp: u32 },
    /// This call ended the encounter (`EndedVictory` or `EndedDeath`)
    Ended(EncounterPhase),
}

impl AttackOutcome {
    /// Whether the attack loop that produced this should keep running
    pub fn continues(&self) -> bool {
        matches!(self, Self::Hit { .. })
    }
}

struct EngineInner {
    content: Arc<WorldContent>,
    repository: Arc<dyn CharacterRepository>,
    sink: Arc<dyn EventSink>,
    encounters: EncounterTable,
    scheduler: AttackScheduler,
    config: EngineConfig,
    rng: Mutex<StdRng>,
}

#[derive(Clone)]
pub struct EncounterEngine {
    inner: Arc<EngineInner>,
}

impl EncounterEngine {
    pub fn new(
        content: Arc<WorldContent>,
        repository: Arc<dyn CharacterRepository>,
        sink: Arc<dyn EventSink>,
        config: EngineConfig,
    ) -> Self {
        Self::with_rng(content, repository, sink, config, StdRng::from_entropy())
    }

    /// Engine with a caller-supplied random source
    pub fn with_rng(
        content: Arc<WorldContent>,
        repository: Arc<dyn CharacterRepository>,
        sink: Arc<dyn EventSink>,
        config: EngineConfig,
        rng: StdRng,
    ) -> Self {
        Self {
            inner: Arc::new(EngineInner {
                content,
                repository,
                sink,
                encounters: EncounterTable::new(),
                scheduler: AttackScheduler::new(),
                config,
                rng: Mutex::new(rng),
            }),
        }
    }

    // =========================================================================
    // Queries
    // =========================================================================

    /// True from `find_monster` until the outcome of the encounter has been saved
    pub fn is_in_combat(&self, connection: ConnectionId) -> bool {
        self.inner.encounters.contains(connection) || self.inner.scheduler.terminating(connection).is_some()
    }

    pub fn phase(&self, connection: ConnectionId) -> EncounterPhase {
        match self.inner.encounters.phase(connection) {
            EncounterPhase::Idle => match self.inner.scheduler.terminating(connection) {
                Some(Attacker::Player) => EncounterPhase::EndedVictory,
                Some(Attacker::Monster) => EncounterPhase::EndedDeath,
                None => EncounterPhase::Idle,
            },
            phase => phase,
        }
    }

    pub fn encounter_snapshot(&self, connection: ConnectionId) -> Option<EncounterSnapshot> {
        self.inner.encounters.snapshot(connection)
    }

    pub fn active_encounters(&self) -> usize {
        self.inner.encounters.len()
    }

    // =========================================================================
    // Encounter lifecycle
    // =========================================================================

    /// Pick a monster in the character's zone and create the encounter.
    ///
    /// If the connection still has an encounter or attack timers, they are
    /// cleared and `AlreadyInCombat` is returned; a retry then succeeds.
    pub async fn find_monster(
        &self,
        connection: ConnectionId,
        character_id: CharacterId,
    ) -> Result<FoundMonster, CombatError> {
        let inner = &self.inner;

        // The previous outcome is still being saved; it clears itself
        if inner.scheduler.terminating(connection).is_some() {
            debug!("Connection {} asked for a monster while its last encounter is still ending", connection);
            return Err(CombatError::AlreadyInCombat);
        }

        if inner.encounters.contains(connection) || inner.scheduler.has_attack_timers(connection) {
            warn!("Connection {} asked for a monster while still in combat, clearing stale state", connection);
            self.clear_combat_state(connection);
            return Err(CombatError::AlreadyInCombat);
        }

        let character = inner
            .repository
            .find_by_id(character_id)
            .await?
            .ok_or(CombatError::CharacterNotFound(character_id))?;

        let zone_id = character.zone_id.clone();
        if !inner.content.zone_manager.zone_exists(&zone_id) {
            return Err(CombatError::CharacterSessionError(format!(
                "character {} is in unknown zone '{}'",
                character_id, zone_id
            )));
        }

        let template = {
            let mut rng = inner.rng.lock();
            inner
                .content
                .zone_manager
                .pick_monster(&zone_id, &mut *rng)
                .and_then(|id| inner.content.get_monster(id))
        }
        .ok_or_else(|| CombatError::NoMonstersAvailable(zone_id.clone()))?;

        let monster = MonsterInstance::from_template(template);
        let player = PlayerSnapshot::new(character);

        let found = FoundMonster {
            encounter_id: 0,
            monster: monster.snapshot(),
            player_hp: player.current_hp,
            player_max_hp: player.stats.max_hp,
            player_attack_speed_ms: player.stats.attack_speed_ms,
            monster_attack_speed_ms: monster.stats.attack_speed_ms,
        };

        // Another request may have won the race while the character loaded
        let encounter_id = inner
            .encounters
            .insert(connection, character_id, monster, player)
            .ok_or(CombatError::AlreadyInCombat)?;

        debug!(
            "Connection {} found {} in '{}' (encounter {})",
            connection, found.monster.id, zone_id, encounter_id
        );
        Ok(FoundMonster { encounter_id, ..found })
    }

    /// Find a monster, announce the encounter and start both attack timers.
    /// Failures are also reported to the client as `CombatError`.
    pub async fn start_encounter(
        &self,
        connection: ConnectionId,
        character_id: CharacterId,
    ) -> Result<EncounterId, CombatError> {
        let found = match self.find_monster(connection, character_id).await {
            Ok(found) => found,
            Err(e) => {
                self.inner.sink.send(connection, ServerMessage::CombatError { reason: e.user_message() });
                return Err(e);
            }
        };

        self.inner.sink.send(
            connection,
            ServerMessage::EncounterStart {
                monster: found.monster.clone(),
                player_hp: found.player_hp,
                player_max_hp: found.player_max_hp,
                player_attack_speed_ms: found.player_attack_speed_ms,
            },
        );

        let jitter = {
            let (low, high) = self.inner.config.monster_jitter_ms;
            let mut rng = self.inner.rng.lock();
            Duration::from_millis(rng.gen_range(low.min(high)..=high.max(low)))
        };

        let encounter_id = found.encounter_id;
        let engine = self.clone();
        let tick: TickFn = Arc::new(move |attacker| {
            let engine = engine.clone();
            async move {
                engine
                    .resolve_tick(connection, Some(encounter_id), attacker)
                    .await
                    .continues()
            }
            .boxed()
        });

        self.inner.scheduler.start(
            connection,
            Duration::from_millis(found.player_attack_speed_ms as u64),
            Duration::from_millis(found.monster_attack_speed_ms as u64),
            jitter,
            tick,
        );
        self.inner.encounters.engage(connection, encounter_id);

        info!(
            "Character {} engaged {} (encounter {}, player every {}ms, monster every {}ms)",
            character_id,
            found.monster.name,
            encounter_id,
            found.player_attack_speed_ms,
            found.monster_attack_speed_ms
        );
        Ok(encounter_id)
    }

    /// Resolve one attack against whatever encounter the connection has
    pub fn resolve_attack(&self, connection: ConnectionId, attacker: Attacker) -> BoxFuture<'_, AttackOutcome> {
        self.resolve_tick(connection, None, attacker)
    }

    fn resolve_tick(
        &self,
        connection: ConnectionId,
        expected: Option<EncounterId>,
        attacker: Attacker,
    ) -> BoxFuture<'_, AttackOutcome> {
        async move {
            let multiplier = self.inner.rng.lock().gen_range(DAMAGE_VARIANCE.0..=DAMAGE_VARIANCE.1);
            let sink = &self.inner.sink;

            let result = self.inner.encounters.apply_hit(connection, expected, attacker, multiplier, |update| {
                sink.send(connection, update)
            });

            match result {
                HitResult::Stale => AttackOutcome::NoEncounter,
                HitResult::Hit { damage, defender_hp } => {
                    debug!(
                        "Connection {}: {} hit for {} ({} HP left)",
                        connection,
                        attacker.name(),
                        damage,
                        defender_hp
                    );
                    AttackOutcome::Hit { damage, defender_hp }
                }
                HitResult::Lethal { state, .. } => {
                    // Timers go first so nothing can trail the terminal event
                    self.inner.scheduler.begin_termination(connection, attacker);
                    let phase = state.phase;
                    match attacker {
                        Attacker::Player => self.finish_victory(connection, *state).await,
                        Attacker::Monster => self.finish_death(connection, *state).await,
                    }
                    AttackOutcome::Ended(phase)
                }
            }
        }
        .boxed()
    }

    async fn finish_victory(&self, connection: ConnectionId, state: EncounterState) {
        let inner = &self.inner;
        let EncounterState { character_id, monster, player: snapshot, .. } = state;
        let mut character = snapshot.character;
        character.current_hp = snapshot.current_hp;

        let loot: Vec<Item> = match inner.content.get_loot_table(&monster.loot_table_id) {
            Some(table) => {
                let modifier = stats::magic_find_modifier(&snapshot.stats);
                let mut rng = inner.rng.lock();
                loot::roll_loot(table, modifier, &inner.content, &mut *rng)
            }
            None => {
                error!("Monster '{}' has unknown loot table '{}'", monster.id, monster.loot_table_id);
                Vec::new()
            }
        };

        for item in &loot {
            player::add_to_inventory(&mut character, item.clone(), inner.content.max_stack(&item.base_id));
        }
        let levels = player::gain_experience(&mut character, monster.xp_reward);
        player::record_kill(&mut character);

        info!(
            "Character {} defeated {}: {} xp, {} item(s)",
            character_id,
            monster.name,
            monster.xp_reward,
            loot.len()
        );

        if let Err(e) = inner.repository.update(character_id, CharacterUpdate::after_victory(&character)).await {
            error!(
                "Failed to save victory for character {}: {} ({} xp and {} item(s) not persisted)",
                character_id,
                e,
                monster.xp_reward,
                loot.len()
            );
        }

        inner.sink.send(
            connection,
            ServerMessage::Victory {
                monster_id: monster.id.clone(),
                loot,
                experience_gained: monster.xp_reward,
                leveled_up: levels > 0,
                character: player::projection(&character),
            },
        );

        self.schedule_reengage(connection, character_id);
    }

    async fn finish_death(&self, connection: ConnectionId, state: EncounterState) {
        let inner = &self.inner;
        let EncounterState { character_id, monster, player: snapshot, .. } = state;
        let mut character = snapshot.character;

        match inner.content.zone_manager.safe_zone_id() {
            Some(safe_zone) => player::respawn(&mut character, safe_zone),
            None => {
                error!("No safe zone to respawn character {}", character_id);
                character.current_hp = player::combat_stats(&character).max_hp;
            }
        }

        info!(
            "Character {} was killed by {}, respawning in '{}'",
            character_id, monster.name, character.zone_id
        );

        if let Err(e) = inner.repository.update(character_id, CharacterUpdate::after_death(&character)).await {
            error!(
                "Failed to save respawn for character {}: {} (zone and HP not persisted)",
                character_id, e
            );
        }

        inner.sink.send(
            connection,
            ServerMessage::Death {
                monster_id: monster.id,
                respawn: player::projection(&character),
            },
        );

        inner.scheduler.finish_termination(connection, None::<fn() -> JoinHandle<()>>);
    }

    /// End the terminating window and start the next encounter after a short
    /// pause, unless the connection was cleared meanwhile or is already
    /// fighting again by then
    fn schedule_reengage(&self, connection: ConnectionId, character_id: CharacterId) {
        let engine = self.clone();
        let delay = self.inner.config.reengage_delay;

        let spawn = move || {
            tokio::spawn(async move {
                tokio::time::sleep(delay).await;

                if engine.is_in_combat(connection) || engine.inner.scheduler.has_attack_timers(connection) {
                    info!("Connection {} is already in combat, skipping automatic re-engage", connection);
                } else if let Err(e) = engine.start_encounter(connection, character_id).await {
                    warn!("Automatic re-engage failed for connection {}: {}", connection, e);
                }

                engine.inner.scheduler.finish_reengage(connection);
            })
        };

        if !self.inner.scheduler.finish_termination(connection, Some(spawn)) {
            debug!("Connection {} was cleared while its victory was saved, no re-engage", connection);
        }
    }

    /// Forced teardown: cancel timers and any pending restart, drop the
    /// encounter. No events, no persistence. An outcome that is still being
    /// saved finishes, but nothing is scheduled after it. Returns whether
    /// anything was cleared.
    pub fn clear_combat_state(&self, connection: ConnectionId) -> bool {
        let timers = self.inner.scheduler.clear(connection);
        let encounter = self.inner.encounters.remove(connection);
        if let Some(state) = &encounter {
            debug!("Cleared encounter {} on connection {}", state.id, connection);
        }
        timers || encounter.is_some()
    }

    /// Move a character to another zone and start fighting there if it has
    /// monsters. Returns the new encounter id, if one started.
    pub async fn enter_zone(
        &self,
        connection: ConnectionId,
        character_id: CharacterId,
        zone_id: &str,
    ) -> Result<Option<EncounterId>, CombatError> {
        let zones = &self.inner.content.zone_manager;
        if !zones.zone_exists(zone_id) {
            return Err(CombatError::UnknownZone(zone_id.to_string()));
        }

        self.clear_combat_state(connection);
        self.inner
            .repository
            .update(character_id, CharacterUpdate::travel(zone_id))
            .await?;
        info!("Character {} entered zone '{}'", character_id, zone_id);

        if zones.get_monster_ids(zone_id).is_empty() {
            return Ok(None);
        }

        // Start failures were already reported to the client
        match self.start_encounter(connection, character_id).await {
            Ok(id) => Ok(Some(id)),
            Err(e) => {
                warn!("Could not start encounter in '{}' for character {}: {}", zone_id, character_id, e);
                Ok(None)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::combat::RecordingSink;
    use crate::error::PersistenceError;
    use crate::persistence::MemoryRepository;
    use idle_shared::{CharacterData, QualityTier};

    const CONN: ConnectionId = 1;
    const HERO: CharacterId = 10;

    struct Harness {
        engine: EncounterEngine,
        repo: Arc<MemoryRepository>,
        sink: Arc<RecordingSink>,
    }

    fn harness_with(character: CharacterData, seed: u64) -> Harness {
        let repo = Arc::new(MemoryRepository::new());
        repo.insert(character);
        let sink = Arc::new(RecordingSink::default());
        let engine = EncounterEngine::with_rng(
            Arc::new(WorldContent::with_defaults()),
            repo.clone(),
            sink.clone(),
            EngineConfig::default(),
            StdRng::seed_from_u64(seed),
        );
        Harness { engine, repo, sink }
    }

    fn hero_in(zone: &str) -> CharacterData {
        CharacterData::new(HERO, "Hero".into(), zone.into())
    }

    fn harness() -> Harness {
        harness_with(hero_in("cellar"), 7)
    }

    /// Memory store whose writes take a while, like a real database round trip
    struct SlowRepository {
        inner: Arc<MemoryRepository>,
        delay: Duration,
    }

    #[async_trait::async_trait]
    impl CharacterRepository for SlowRepository {
        async fn find_by_id(&self, id: CharacterId) -> Result<Option<CharacterData>, PersistenceError> {
            self.inner.find_by_id(id).await
        }

        async fn update(&self, id: CharacterId, update: CharacterUpdate) -> Result<CharacterData, PersistenceError> {
            tokio::time::sleep(self.delay).await;
            self.inner.update(id, update).await
        }
    }

    fn slow_harness(character: CharacterData) -> Harness {
        let repo = Arc::new(MemoryRepository::new());
        repo.insert(character);
        let sink = Arc::new(RecordingSink::default());
        let slow = Arc::new(SlowRepository {
            inner: repo.clone(),
            delay: Duration::from_millis(500),
        });
        let engine = EncounterEngine::with_rng(
            Arc::new(WorldContent::with_defaults()),
            slow,
            sink.clone(),
            EngineConfig::default(),
            StdRng::seed_from_u64(3),
        );
        Harness { engine, repo, sink }
    }

    fn monster_one_hit_from_death(engine: &EncounterEngine) {
        let mut encounters = engine.inner.encounters.lock_for_test();
        encounters.get_mut(&CONN).unwrap().monster.current_hp = 1;
    }

    fn count_starts(sink: &RecordingSink) -> usize {
        sink.messages_for(CONN)
            .iter()
            .filter(|m| matches!(m, ServerMessage::EncounterStart { .. }))
            .count()
    }

    fn terminal_events(sink: &RecordingSink) -> Vec<ServerMessage> {
        sink.messages_for(CONN).into_iter().filter(|m| m.is_terminal()).collect()
    }

    #[tokio::test]
    async fn test_find_monster_creates_one_encounter() {
        let h = harness();
        let found = h.engine.find_monster(CONN, HERO).await.unwrap();

        assert!(found.monster.id == "rat1" || found.monster.id == "spider1");
        assert_eq!(found.monster.current_hp, found.monster.max_hp);
        assert_eq!(found.player_max_hp, 100);
        assert_eq!(h.engine.phase(CONN), EncounterPhase::Searching);
        assert_eq!(h.engine.active_encounters(), 1);
    }

    #[tokio::test]
    async fn test_second_find_monster_is_refused_and_self_heals() {
        let h = harness();
        h.engine.find_monster(CONN, HERO).await.unwrap();

        let err = h.engine.find_monster(CONN, HERO).await.unwrap_err();
        assert!(matches!(err, CombatError::AlreadyInCombat));
        assert!(!h.engine.is_in_combat(CONN));

        h.engine.find_monster(CONN, HERO).await.unwrap();
        assert_eq!(h.engine.active_encounters(), 1);
    }

    #[tokio::test]
    async fn test_find_monster_errors() {
        let h = harness_with(hero_in("town"), 1);
        let err = h.engine.find_monster(CONN, HERO).await.unwrap_err();
        assert!(matches!(err, CombatError::NoMonstersAvailable(ref zone) if zone == "town"));

        let err = h.engine.find_monster(CONN, 999).await.unwrap_err();
        assert!(matches!(err, CombatError::CharacterNotFound(999)));

        let h = harness_with(hero_in("atlantis"), 1);
        let err = h.engine.find_monster(CONN, HERO).await.unwrap_err();
        assert!(matches!(err, CombatError::CharacterSessionError(_)));
        assert!(!h.engine.is_in_combat(CONN));
    }

    #[tokio::test]
    async fn test_resolve_without_encounter_is_noop() {
        let h = harness();
        assert_eq!(h.engine.resolve_attack(CONN, Attacker::Player).await, AttackOutcome::NoEncounter);
        assert!(h.sink.events().is_empty());
    }

    #[tokio::test]
    async fn test_hp_never_negative_or_raised() {
        let h = harness();
        h.engine.find_monster(CONN, HERO).await.unwrap();

        let mut last_player_hp = 100;
        let mut last_monster_hp = u32::MAX;
        for i in 0..200 {
            let attacker = if i % 2 == 0 { Attacker::Monster } else { Attacker::Player };
            match h.engine.resolve_attack(CONN, attacker).await {
                AttackOutcome::Hit { damage, defender_hp } => {
                    assert!(damage >= 1);
                    let last = match attacker {
                        Attacker::Monster => &mut last_player_hp,
                        Attacker::Player => &mut last_monster_hp,
                    };
                    assert!(defender_hp < *last);
                    *last = defender_hp;
                }
                AttackOutcome::Ended(_) => break,
                AttackOutcome::NoEncounter => panic!("encounter vanished"),
            }
        }

        for message in h.sink.messages_for(CONN) {
            if let ServerMessage::AttackUpdate { defender_hp, defender_max_hp, .. } = message {
                assert!(defender_hp <= defender_max_hp);
            }
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_rat_fight_ends_in_victory() {
        let h = harness_with(hero_in("cellar"), 3);

        // Force the rat so the scenario does not depend on the zone roll
        let content = WorldContent::with_defaults();
        let rat = MonsterInstance::from_template(content.get_monster("rat1").unwrap());
        let player = PlayerSnapshot::new(h.repo.get(HERO).unwrap());
        let id = h.engine.inner.encounters.insert(CONN, HERO, rat, player).unwrap();

        let mut outcome = AttackOutcome::NoEncounter;
        for _ in 0..100 {
            outcome = h.engine.resolve_tick(CONN, Some(id), Attacker::Player).await;
            if !outcome.continues() {
                break;
            }
        }
        assert_eq!(outcome, AttackOutcome::Ended(EncounterPhase::EndedVictory));
        assert!(!h.engine.is_in_combat(CONN));

        let terminal = terminal_events(&h.sink);
        assert_eq!(terminal.len(), 1);
        let loot_table = content.get_loot_table("low_level_common").unwrap();
        match &terminal[0] {
            ServerMessage::Victory { monster_id, loot, experience_gained, character, .. } => {
                assert_eq!(monster_id, "rat1");
                assert_eq!(*experience_gained, 10);
                assert_eq!(character.kills_in_zone, 1);
                for item in loot {
                    assert!(loot_table.drops.iter().any(|d| d.base_id == item.base_id));
                }
            }
            other => panic!("expected victory, got {:?}", other),
        }

        let stored = h.repo.get(HERO).unwrap();
        assert_eq!(stored.experience, 10);
        assert_eq!(stored.kills_in_zone("cellar"), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timed_encounter_runs_to_victory_and_reengages() {
        let h = harness();
        h.engine.start_encounter(CONN, HERO).await.unwrap();
        assert_eq!(h.engine.phase(CONN), EncounterPhase::Engaged);

        // Base hero deals ~3 per hit every 1950ms; monsters have at most 30 HP
        let mut victories = 0;
        for _ in 0..120 {
            tokio::time::sleep(Duration::from_millis(1000)).await;
            victories = h
                .sink
                .messages_for(CONN)
                .iter()
                .filter(|m| matches!(m, ServerMessage::Victory { .. }))
                .count();
            if victories > 0 {
                break;
            }
        }
        assert_eq!(victories, 1);

        // The pending restart begins a new encounter
        tokio::time::sleep(Duration::from_millis(1600)).await;
        let starts = h
            .sink
            .messages_for(CONN)
            .iter()
            .filter(|m| matches!(m, ServerMessage::EncounterStart { .. }))
            .count();
        assert_eq!(starts, 2);
        assert!(h.engine.is_in_combat(CONN));

        h.engine.clear_combat_state(CONN);
    }

    #[tokio::test(start_paused = true)]
    async fn test_death_respawns_in_town_without_rewards() {
        let mut hero = hero_in("forest");
        hero.current_hp = 1;
        let h = harness_with(hero, 11);

        h.engine.start_encounter(CONN, HERO).await.unwrap();
        // The monster's first hit (1500..=1900ms) lands before the player's (1950ms)
        tokio::time::sleep(Duration::from_millis(1920)).await;

        let terminal = terminal_events(&h.sink);
        assert_eq!(terminal.len(), 1);
        match &terminal[0] {
            ServerMessage::Death { respawn, .. } => {
                assert_eq!(respawn.zone_id, "town");
                assert_eq!(respawn.current_hp, respawn.stats.max_hp);
                assert_eq!(respawn.kills_in_zone, 0);
            }
            other => panic!("expected death, got {:?}", other),
        }

        assert!(!h.engine.is_in_combat(CONN));
        assert!(!h.engine.inner.scheduler.has_attack_timers(CONN));
        assert!(!h.engine.inner.scheduler.has_reengage(CONN));

        let stored = h.repo.get(HERO).unwrap();
        assert_eq!(stored.zone_id, "town");
        assert_eq!(stored.current_hp, 100);
        assert_eq!(stored.experience, 0);
        assert!(stored.inventory.is_empty());
        assert!(stored.kills.is_empty());

        // Nothing arrives after the terminal event
        let count = h.sink.events().len();
        tokio::time::sleep(Duration::from_millis(10_000)).await;
        assert_eq!(h.sink.events().len(), count);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_lethal_ticks_terminate_once() {
        for seed in 0..20 {
            let h = harness_with(hero_in("cellar"), seed);
            h.engine.find_monster(CONN, HERO).await.unwrap();
            {
                // Both sides one hit from death
                let mut encounters = h.engine.inner.encounters.lock_for_test();
                let state = encounters.get_mut(&CONN).unwrap();
                state.monster.current_hp = 1;
                state.player.current_hp = 1;
            }

            let a = tokio::spawn({
                let engine = h.engine.clone();
                async move { engine.resolve_attack(CONN, Attacker::Player).await }
            });
            let b = tokio::spawn({
                let engine = h.engine.clone();
                async move { engine.resolve_attack(CONN, Attacker::Monster).await }
            });
            let (a, b) = futures::join!(a, b);
            let outcomes = [a.unwrap(), b.unwrap()];

            let ended = outcomes.iter().filter(|o| matches!(o, AttackOutcome::Ended(_))).count();
            let noop = outcomes.iter().filter(|o| **o == AttackOutcome::NoEncounter).count();
            assert_eq!((ended, noop), (1, 1), "seed {}: {:?}", seed, outcomes);
            assert_eq!(terminal_events(&h.sink).len(), 1);

            h.engine.clear_combat_state(CONN);
        }
    }

    #[tokio::test]
    async fn test_persistence_failure_still_reports_victory() {
        let h = harness();
        h.engine.find_monster(CONN, HERO).await.unwrap();
        h.repo.set_fail_updates(true);

        loop {
            match h.engine.resolve_attack(CONN, Attacker::Player).await {
                AttackOutcome::Hit { .. } => continue,
                AttackOutcome::Ended(phase) => {
                    assert_eq!(phase, EncounterPhase::EndedVictory);
                    break;
                }
                AttackOutcome::NoEncounter => panic!("encounter vanished"),
            }
        }
        assert_eq!(terminal_events(&h.sink).len(), 1);
        assert_eq!(h.repo.get(HERO).unwrap().experience, 0);
        h.engine.clear_combat_state(CONN);
    }

    #[tokio::test(start_paused = true)]
    async fn test_clear_is_idempotent_and_silent() {
        let h = harness();
        h.engine.start_encounter(CONN, HERO).await.unwrap();
        let events = h.sink.events().len();

        assert!(h.engine.clear_combat_state(CONN));
        assert!(!h.engine.clear_combat_state(CONN));
        assert_eq!(h.engine.phase(CONN), EncounterPhase::Idle);

        tokio::time::sleep(Duration::from_millis(10_000)).await;
        assert_eq!(h.sink.events().len(), events);
    }

    #[tokio::test(start_paused = true)]
    async fn test_disconnect_while_victory_saves_schedules_nothing() {
        let h = slow_harness(hero_in("cellar"));
        h.engine.find_monster(CONN, HERO).await.unwrap();
        monster_one_hit_from_death(&h.engine);

        let tick = tokio::spawn({
            let engine = h.engine.clone();
            async move { engine.resolve_attack(CONN, Attacker::Player).await }
        });

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(h.engine.phase(CONN), EncounterPhase::EndedVictory);
        assert!(h.engine.is_in_combat(CONN));
        assert!(h.engine.clear_combat_state(CONN));

        assert_eq!(tick.await.unwrap(), AttackOutcome::Ended(EncounterPhase::EndedVictory));
        tokio::time::sleep(Duration::from_millis(3000)).await;

        assert!(!h.engine.is_in_combat(CONN));
        assert_eq!(h.engine.active_encounters(), 0);
        assert!(!h.engine.inner.scheduler.has_reengage(CONN));
        assert!(!h.engine.inner.scheduler.has_attack_timers(CONN));
        assert_eq!(count_starts(&h.sink), 0);
        // The kill itself still counts
        assert!(h.repo.get(HERO).unwrap().experience > 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_equipment_is_locked_until_victory_is_saved() {
        let content = WorldContent::with_defaults();
        let mut hero = hero_in("cellar");
        let sword = Item::from_template(
            content.get_item("rusty_sword").unwrap(),
            uuid::Uuid::new_v4(),
            1,
            QualityTier::White,
        );
        hero.inventory.push(sword.clone());
        let h = slow_harness(hero);

        h.engine.find_monster(CONN, HERO).await.unwrap();
        monster_one_hit_from_death(&h.engine);
        let tick = tokio::spawn({
            let engine = h.engine.clone();
            async move { engine.resolve_attack(CONN, Attacker::Player).await }
        });

        // An equip request only goes through once the connection is out of combat
        async fn try_equip(h: &Harness) -> bool {
            if h.engine.is_in_combat(CONN) {
                return false;
            }
            let mut character = h.repo.get(HERO).unwrap();
            let index = character
                .inventory
                .iter()
                .position(|i| i.base_id == "rusty_sword")
                .unwrap();
            player::equip_item(&mut character, index).unwrap();
            h.repo.update(HERO, CharacterUpdate::equipment(&character)).await.unwrap();
            true
        }

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(!try_equip(&h).await, "equip accepted while the victory was being saved");

        tick.await.unwrap();
        assert!(!h.engine.is_in_combat(CONN));
        assert!(try_equip(&h).await);

        let stored = h.repo.get(HERO).unwrap();
        let copies = stored.inventory.iter().filter(|i| i.instance_id == sword.instance_id).count()
            + stored.equipment.values().filter(|i| i.instance_id == sword.instance_id).count();
        assert_eq!(copies, 1);
        assert!(stored.equipment.values().any(|i| i.instance_id == sword.instance_id));
        assert!(stored.experience > 0);

        h.engine.clear_combat_state(CONN);
    }

    #[tokio::test(start_paused = true)]
    async fn test_find_monster_refused_while_outcome_is_saved() {
        let h = slow_harness(hero_in("cellar"));
        h.engine.find_monster(CONN, HERO).await.unwrap();
        monster_one_hit_from_death(&h.engine);
        let tick = tokio::spawn({
            let engine = h.engine.clone();
            async move { engine.resolve_attack(CONN, Attacker::Player).await }
        });

        tokio::time::sleep(Duration::from_millis(100)).await;
        let err = h.engine.find_monster(CONN, HERO).await.unwrap_err();
        assert!(matches!(err, CombatError::AlreadyInCombat));
        assert_eq!(h.engine.active_encounters(), 0);

        tick.await.unwrap();
        assert_eq!(terminal_events(&h.sink).len(), 1);
        h.engine.clear_combat_state(CONN);
    }

    #[tokio::test(start_paused = true)]
    async fn test_reengage_skips_when_already_fighting() {
        let h = harness();
        h.engine.find_monster(CONN, HERO).await.unwrap();
        monster_one_hit_from_death(&h.engine);
        assert_eq!(
            h.engine.resolve_attack(CONN, Attacker::Player).await,
            AttackOutcome::Ended(EncounterPhase::EndedVictory)
        );
        assert!(h.engine.inner.scheduler.has_reengage(CONN));

        // The client asks for a fight before the automatic restart is due
        tokio::time::sleep(Duration::from_millis(500)).await;
        let manual = h.engine.start_encounter(CONN, HERO).await.unwrap();
        assert_eq!(count_starts(&h.sink), 1);

        tokio::time::sleep(Duration::from_millis(1100)).await;
        assert!(!h.engine.inner.scheduler.has_reengage(CONN));
        assert_eq!(h.engine.active_encounters(), 1);
        assert_eq!(h.engine.encounter_snapshot(CONN).unwrap().encounter_id, manual);
        assert_eq!(count_starts(&h.sink), 1);

        h.engine.clear_combat_state(CONN);
    }

    #[tokio::test(start_paused = true)]
    async fn test_enter_zone() {
        let h = harness_with(hero_in("town"), 5);

        let err = h.engine.enter_zone(CONN, HERO, "atlantis").await.unwrap_err();
        assert!(matches!(err, CombatError::UnknownZone(_)));

        let id = h.engine.enter_zone(CONN, HERO, "forest").await.unwrap();
        assert!(id.is_some());
        assert_eq!(h.repo.get(HERO).unwrap().zone_id, "forest");
        let monster = h.engine.encounter_snapshot(CONN).unwrap().monster;
        assert!(monster.id == "wolf1" || monster.id == "bandit1");

        // Travelling to town ends the fight without a terminal event
        assert_eq!(h.engine.enter_zone(CONN, HERO, "town").await.unwrap(), None);
        assert!(!h.engine.is_in_combat(CONN));
        assert!(terminal_events(&h.sink).is_empty());
    }
}
