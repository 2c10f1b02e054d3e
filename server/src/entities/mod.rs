//! Server-side entity definitions.

pub mod player;
mod enemy;

pub use player::PlayerSnapshot;
pub use enemy::{MonsterInstance, MonsterTemplate};
