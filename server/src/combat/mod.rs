//! Combat encounter engine.
//!
//! One encounter per connection: a player against a single monster, driven
//! by two attack timers until one side reaches zero HP.

mod encounter;
mod engine;
mod events;
mod scheduler;

pub use encounter::{ConnectionId, EncounterId, EncounterPhase, EncounterSnapshot};
pub use engine::{AttackOutcome, EncounterEngine, FoundMonster};
pub use events::{ChannelSink, EventSink};

#[cfg(test)]
pub use events::RecordingSink;
