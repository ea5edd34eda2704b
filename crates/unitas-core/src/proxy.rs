//! Lazy placeholders
//!
//! Every arena slot carries a [`ProxyBody`]. A slot created by
//! `get_reference` starts `Uninitialized` and knows only its key; the first
//! non-identifier access loads the row and moves it to `Loaded`. A load that
//! finds no row moves it to `Failed`, which is permanent: later accesses
//! report `EntityNotFound` without touching storage again.

use crate::model::{EntityHandle, EntityType, IdentityKey, PrimaryKey, Record};
use crate::state::EntityState;

/// Observable initialisation state of an instance
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProxyState {
    Uninitialized,
    Initialized,
    Failed,
}

#[derive(Debug, Clone)]
pub(crate) enum ProxyBody {
    Uninitialized,
    Loaded(Record),
    Failed,
}

impl ProxyBody {
    pub(crate) fn state(&self) -> ProxyState {
        match self {
            ProxyBody::Uninitialized => ProxyState::Uninitialized,
            ProxyBody::Loaded(_) => ProxyState::Initialized,
            ProxyBody::Failed => ProxyState::Failed,
        }
    }

    /// Install the loaded record; a no-op unless still uninitialised
    pub(crate) fn initialize(&mut self, record: Record) -> bool {
        if matches!(self, ProxyBody::Uninitialized) {
            *self = ProxyBody::Loaded(record);
            true
        } else {
            false
        }
    }

    pub(crate) fn fail(&mut self) {
        if matches!(self, ProxyBody::Uninitialized) {
            *self = ProxyBody::Failed;
        }
    }
}

/// One arena entry: the instance and its lifecycle bookkeeping
#[derive(Debug, Clone)]
pub(crate) struct EntitySlot {
    pub(crate) entity_type: EntityType,
    pub(crate) state: EntityState,
    pub(crate) key: Option<PrimaryKey>,
    pub(crate) body: ProxyBody,
}

impl EntitySlot {
    /// Application-created instance
    pub(crate) fn new_entity(entity_type: EntityType, record: Record) -> Self {
        Self {
            entity_type,
            state: EntityState::New,
            key: None,
            body: ProxyBody::Loaded(record),
        }
    }

    /// Managed placeholder for a stored row
    pub(crate) fn proxy(entity_type: EntityType, key: PrimaryKey) -> Self {
        Self {
            entity_type,
            state: EntityState::Managed,
            key: Some(key),
            body: ProxyBody::Uninitialized,
        }
    }

    pub(crate) fn is_initialized(&self) -> bool {
        matches!(self.body, ProxyBody::Loaded(_))
    }

    pub(crate) fn record(&self) -> Option<&Record> {
        match &self.body {
            ProxyBody::Loaded(record) => Some(record),
            _ => None,
        }
    }

    pub(crate) fn record_mut(&mut self) -> Option<&mut Record> {
        match &mut self.body {
            ProxyBody::Loaded(record) => Some(record),
            _ => None,
        }
    }

    pub(crate) fn identity_key(&self) -> Option<IdentityKey> {
        self.key
            .as_ref()
            .map(|key| IdentityKey::new(self.entity_type.clone(), key.clone()))
    }

    /// Human-readable name for errors and logs
    pub(crate) fn describe(&self, handle: EntityHandle) -> String {
        match &self.key {
            Some(key) => format!("{}#{}", self.entity_type, key),
            None => format!("{}{}", self.entity_type, handle),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_initialize_only_once() {
        let mut body = ProxyBody::Uninitialized;
        assert!(body.initialize(Record::default()));
        assert!(!body.initialize(Record::default()));
        assert_eq!(body.state(), ProxyState::Initialized);
    }

    #[test]
    fn test_failure_is_permanent() {
        let mut body = ProxyBody::Uninitialized;
        body.fail();
        assert_eq!(body.state(), ProxyState::Failed);
        assert!(!body.initialize(Record::default()));
        assert_eq!(body.state(), ProxyState::Failed);
    }

    #[test]
    fn test_slot_describe() {
        let h = EntityHandle::new(1, 4);
        let proxy = EntitySlot::proxy(EntityType::new("Product"), PrimaryKey::from(5));
        assert_eq!(proxy.describe(h), "Product#5");
        assert!(!proxy.is_initialized());
        assert_eq!(proxy.state, EntityState::Managed);
        let fresh = EntitySlot::new_entity(EntityType::new("Product"), Record::default());
        assert_eq!(fresh.describe(h), "Product@1.4");
        assert_eq!(fresh.identity_key(), None);
    }
}
