//! Per-connection attack timers.
//!
//! Each encounter runs two independent tokio tasks, one per attacker. A
//! task sleeps, asks the engine to resolve a tick, and exits as soon as the
//! tick reports that the encounter is gone. Handles are kept here so that
//! travel, disconnect and termination can cancel them.
//!
//! Between a lethal hit and the end of its save the connection is in a
//! terminating window. The automatic restart is only registered when that
//! window closes without having been cleared.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use futures::future::BoxFuture;
use log::debug;
use parking_lot::Mutex;
use tokio::task::JoinHandle;

use idle_shared::Attacker;

use super::ConnectionId;

/// Resolves one attack. Returns `false` once the encounter is over.
pub type TickFn = Arc<dyn Fn(Attacker) -> BoxFuture<'static, bool> + Send + Sync>;

/// A lethal hit whose rewards or respawn are still being saved
struct Termination {
    /// Side that landed the lethal hit
    winner: Attacker,
    /// Set by `clear`: the encounter was torn down mid-save, so nothing may
    /// follow it
    cancelled: bool,
}

#[derive(Default)]
struct TimerSet {
    player: Option<JoinHandle<()>>,
    monster: Option<JoinHandle<()>>,
    /// Pending automatic restart after a victory
    reengage: Option<JoinHandle<()>>,
    termination: Option<Termination>,
}

impl TimerSet {
    fn slot(&mut self, attacker: Attacker) -> &mut Option<JoinHandle<()>> {
        match attacker {
            Attacker::Player => &mut self.player,
            Attacker::Monster => &mut self.monster,
        }
    }

    fn is_empty(&self) -> bool {
        self.player.is_none() && self.monster.is_none() && self.reengage.is_none() && self.termination.is_none()
    }
}

fn abort(handle: Option<JoinHandle<()>>) -> bool {
    match handle {
        Some(handle) => {
            handle.abort();
            true
        }
        None => false,
    }
}

#[derive(Default)]
pub struct AttackScheduler {
    timers: Mutex<HashMap<ConnectionId, TimerSet>>,
}

impl AttackScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Spawn both attack loops. Any attack timers still registered for the
    /// connection are aborted first.
    pub fn start(
        &self,
        connection: ConnectionId,
        player_interval: Duration,
        monster_interval: Duration,
        monster_jitter: Duration,
        tick: TickFn,
    ) {
        let player = tokio::spawn(attack_loop(Attacker::Player, player_interval, player_interval, tick.clone()));
        let monster = tokio::spawn(attack_loop(
            Attacker::Monster,
            monster_interval + monster_jitter,
            monster_interval,
            tick,
        ));

        let mut timers = self.timers.lock();
        let set = timers.entry(connection).or_default();
        abort(set.player.replace(player));
        abort(set.monster.replace(monster));
    }

    pub fn has_attack_timers(&self, connection: ConnectionId) -> bool {
        self.timers
            .lock()
            .get(&connection)
            .map_or(false, |set| set.player.is_some() || set.monster.is_some())
    }

    /// Enter the terminating window after `winner` landed a lethal hit. The
    /// opponent's loop is aborted; the winner's handle is only dropped so its
    /// task can finish the terminal work and exit on its own.
    pub fn begin_termination(&self, connection: ConnectionId, winner: Attacker) {
        let mut timers = self.timers.lock();
        let set = timers.entry(connection).or_default();

        abort(set.slot(winner.opponent()).take());
        set.slot(winner).take();
        set.termination = Some(Termination { winner, cancelled: false });
    }

    /// Winner of the encounter whose outcome is still being saved
    pub fn terminating(&self, connection: ConnectionId) -> Option<Attacker> {
        self.timers
            .lock()
            .get(&connection)
            .and_then(|set| set.termination.as_ref())
            .map(|t| t.winner)
    }

    /// Leave the terminating window. If it was not cancelled meanwhile,
    /// `reengage` is spawned and registered under the same lock, so a
    /// concurrent `clear` either sees the restart or prevents it.
    /// Returns whether the restart was scheduled.
    pub fn finish_termination<F>(&self, connection: ConnectionId, reengage: Option<F>) -> bool
    where
        F: FnOnce() -> JoinHandle<()>,
    {
        let mut timers = self.timers.lock();
        let Some(set) = timers.get_mut(&connection) else {
            return false;
        };

        let live = matches!(set.termination.take(), Some(Termination { cancelled: false, .. }));
        let scheduled = match reengage {
            Some(spawn) if live => {
                abort(set.reengage.replace(spawn()));
                true
            }
            _ => false,
        };
        if set.is_empty() {
            timers.remove(&connection);
        }
        scheduled
    }

    /// Abort attack timers and any pending restart. A termination in
    /// progress is marked cancelled and stays registered until it finishes.
    pub fn clear(&self, connection: ConnectionId) -> bool {
        let mut timers = self.timers.lock();
        let Some(mut set) = timers.remove(&connection) else {
            return false;
        };

        let attacks = abort(set.player.take()) | abort(set.monster.take());
        let reengage = abort(set.reengage.take());
        let terminating = match set.termination.take() {
            Some(Termination { winner, cancelled }) => {
                timers.insert(
                    connection,
                    TimerSet {
                        termination: Some(Termination { winner, cancelled: true }),
                        ..TimerSet::default()
                    },
                );
                !cancelled
            }
            None => false,
        };
        attacks || reengage || terminating
    }

    #[cfg(test)]
    pub fn has_reengage(&self, connection: ConnectionId) -> bool {
        self.timers
            .lock()
            .get(&connection)
            .map_or(false, |set| set.reengage.is_some())
    }

    /// Called by the restart task once it is done; drops its handle without aborting
    pub fn finish_reengage(&self, connection: ConnectionId) {
        let mut timers = self.timers.lock();
        if let Some(set) = timers.get_mut(&connection) {
            set.reengage.take();
            if set.is_empty() {
                timers.remove(&connection);
            }
        }
    }
}

async fn attack_loop(attacker: Attacker, first_delay: Duration, interval: Duration, tick: TickFn) {
    tokio::time::sleep(first_delay).await;
    loop {
        if !tick(attacker).await {
            debug!("{} attack loop finished", attacker.name());
            break;
        }
        tokio::time::sleep(interval).await;
    }
}
