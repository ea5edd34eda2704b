use std::collections::HashMap;

use crate::errors::{Result, UnitasError};
use crate::model::{EntityHandle, IdentityKey};

/// One live instance per (type, primary key) within a scope
#[derive(Debug, Default, Clone)]
pub struct IdentityMap {
    entries: HashMap<IdentityKey, EntityHandle>,
}

impl IdentityMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `handle` under `key`
    ///
    /// Registering the same handle twice is a no-op.
    ///
    /// # Errors
    ///
    /// Returns `Conflict` if a different instance already holds `key`.
    pub fn register(&mut self, key: IdentityKey, handle: EntityHandle) -> Result<()> {
        match self.entries.get(&key) {
            Some(existing) if *existing != handle => Err(UnitasError::Conflict { key }),
            Some(_) => Ok(()),
            None => {
                self.entries.insert(key, handle);
                Ok(())
            }
        }
    }

    pub fn lookup(&self, key: &IdentityKey) -> Option<EntityHandle> {
        self.entries.get(key).copied()
    }

    /// Drop the entry for `key`; returns the handle it held
    pub fn forget(&mut self, key: &IdentityKey) -> Option<EntityHandle> {
        self.entries.remove(key)
    }

    /// Drop `key` only if it is held by `handle`
    pub fn forget_if(&mut self, key: &IdentityKey, handle: EntityHandle) {
        if self.entries.get(key) == Some(&handle) {
            self.entries.remove(key);
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn iter(&self) -> impl Iterator<Item = (&IdentityKey, &EntityHandle)> {
        self.entries.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{EntityType, PrimaryKey};

    fn key(id: i64) -> IdentityKey {
        IdentityKey::new(EntityType::new("Product"), PrimaryKey::from(id))
    }

    #[test]
    fn test_register_and_lookup() {
        let mut map = IdentityMap::new();
        let h = EntityHandle::new(1, 0);
        map.register(key(1), h).unwrap();
        assert_eq!(map.lookup(&key(1)), Some(h));
        assert_eq!(map.lookup(&key(2)), None);
    }

    #[test]
    fn test_same_handle_twice_is_ok() {
        let mut map = IdentityMap::new();
        let h = EntityHandle::new(1, 0);
        map.register(key(1), h).unwrap();
        map.register(key(1), h).unwrap();
        assert_eq!(map.len(), 1);
    }

    #[test]
    fn test_conflict_on_different_instance() {
        let mut map = IdentityMap::new();
        map.register(key(1), EntityHandle::new(1, 0)).unwrap();
        let err = map.register(key(1), EntityHandle::new(1, 1)).unwrap_err();
        assert_eq!(err, UnitasError::Conflict { key: key(1) });
    }

    #[test]
    fn test_forget_if_only_removes_owner() {
        let mut map = IdentityMap::new();
        let h = EntityHandle::new(1, 0);
        map.register(key(1), h).unwrap();
        map.forget_if(&key(1), EntityHandle::new(1, 5));
        assert_eq!(map.lookup(&key(1)), Some(h));
        map.forget_if(&key(1), h);
        assert!(map.is_empty());
    }
}
