//! In-process character store. Used when the database is unreachable and by tests.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use parking_lot::Mutex;

use idle_shared::{CharacterData, CharacterId};

use super::{CharacterRepository, CharacterUpdate};
use crate::error::PersistenceError;

#[derive(Debug, Default)]
pub struct MemoryRepository {
    characters: Mutex<HashMap<CharacterId, CharacterData>>,
    /// When set, every update fails with `Unavailable`
    fail_updates: AtomicBool,
}

impl MemoryRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, character: CharacterData) {
        self.characters.lock().insert(character.id, character);
    }

    pub fn get(&self, id: CharacterId) -> Option<CharacterData> {
        self.characters.lock().get(&id).cloned()
    }

    pub fn set_fail_updates(&self, fail: bool) {
        self.fail_updates.store(fail, Ordering::SeqCst);
    }
}

#[async_trait]
impl CharacterRepository for MemoryRepository {
    async fn find_by_id(&self, id: CharacterId) -> Result<Option<CharacterData>, PersistenceError> {
        Ok(self.get(id))
    }

    async fn update(&self, id: CharacterId, update: CharacterUpdate) -> Result<CharacterData, PersistenceError> {
        if self.fail_updates.load(Ordering::SeqCst) {
            return Err(PersistenceError::Unavailable);
        }

        let mut characters = self.characters.lock();
        let character = characters.get_mut(&id).ok_or(PersistenceError::NotFound(id))?;
        update.apply(character);
        Ok(character.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_update_applies_and_returns_record() {
        let repo = MemoryRepository::new();
        repo.insert(CharacterData::new(5, "Hero".into(), "cellar".into()));

        let stored = repo.update(5, CharacterUpdate::travel("forest")).await.unwrap();
        assert_eq!(stored.zone_id, "forest");
        assert_eq!(repo.find_by_id(5).await.unwrap().unwrap().zone_id, "forest");
    }

    #[tokio::test]
    async fn test_update_unknown_character() {
        let repo = MemoryRepository::new();
        let err = repo.update(9, CharacterUpdate::default()).await.unwrap_err();
        assert!(matches!(err, PersistenceError::NotFound(9)));
    }

    #[tokio::test]
    async fn test_failing_updates() {
        let repo = MemoryRepository::new();
        repo.insert(CharacterData::new(1, "Hero".into(), "cellar".into()));
        repo.set_fail_updates(true);
        assert!(repo.update(1, CharacterUpdate::travel("town")).await.is_err());
        assert_eq!(repo.get(1).unwrap().zone_id, "cellar");
    }
}
