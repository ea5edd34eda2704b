use super::UnitOfWork;
use crate::backend::PersistenceBackend;
use crate::errors::Result;
use crate::model::{EntityHandle, EntityType, PersistentCollection, PrimaryKey, Record, Value};
use crate::state::EntityState;

/// Read-only look at a loaded instance
#[derive(Debug, Clone, Copy)]
pub struct EntityView<'a> {
    handle: EntityHandle,
    entity_type: &'a EntityType,
    state: EntityState,
    key: Option<&'a PrimaryKey>,
    record: &'a Record,
}

impl<'a> EntityView<'a> {
    pub fn handle(&self) -> EntityHandle {
        self.handle
    }

    pub fn entity_type(&self) -> &'a EntityType {
        self.entity_type
    }

    pub fn state(&self) -> EntityState {
        self.state
    }

    pub fn key(&self) -> Option<&'a PrimaryKey> {
        self.key
    }

    pub fn get(&self, field: &str) -> Option<&'a Value> {
        self.record.field(field)
    }

    pub fn get_int(&self, field: &str) -> Option<i64> {
        self.get(field).and_then(Value::as_int)
    }

    pub fn get_text(&self, field: &str) -> Option<&'a str> {
        self.get(field).and_then(Value::as_text)
    }

    pub fn reference(&self, association: &str) -> Option<EntityHandle> {
        self.record.reference(association)
    }

    /// The collection as held in memory; may be uninitialised
    pub fn collection(&self, association: &str) -> Option<&'a PersistentCollection> {
        self.record.collection(association)
    }

    pub fn record(&self) -> &'a Record {
        self.record
    }
}

/// Write access to one instance, for chained updates
///
/// ```ignore
/// uow.entity_mut(product)?
///     .set("name", "anvil")?
///     .set("price", 12.5)?
///     .set_reference("category", Some(tools))?;
/// ```
pub struct EntityMut<'a, B: PersistenceBackend> {
    uow: &'a mut UnitOfWork<B>,
    handle: EntityHandle,
}

impl<'a, B: PersistenceBackend> EntityMut<'a, B> {
    pub fn handle(&self) -> EntityHandle {
        self.handle
    }

    pub fn set(&mut self, field: &str, value: impl Into<Value>) -> Result<&mut Self> {
        self.uow.set(self.handle, field, value)?;
        Ok(self)
    }

    pub fn set_reference(&mut self, association: &str, target: Option<EntityHandle>) -> Result<&mut Self> {
        self.uow.set_reference(self.handle, association, target)?;
        Ok(self)
    }

    pub fn add_to_collection(&mut self, association: &str, target: EntityHandle) -> Result<&mut Self> {
        self.uow.add_to_collection(self.handle, association, target)?;
        Ok(self)
    }

    pub fn remove_from_collection(&mut self, association: &str, target: EntityHandle) -> Result<&mut Self> {
        self.uow.remove_from_collection(self.handle, association, target)?;
        Ok(self)
    }
}

impl<B: PersistenceBackend> UnitOfWork<B> {
    /// Load `handle` if needed and borrow it for reading
    ///
    /// # Errors
    ///
    /// Returns `EntityNotFound` if a placeholder's row is missing and
    /// `InvalidState` for detached placeholders.
    pub fn entity(&mut self, handle: EntityHandle) -> Result<EntityView<'_>> {
        self.ensure_loaded(handle)?;
        self.resolve_references(handle, |_| true)?;
        let slot = self.slot(handle)?;
        let record = slot.record().ok_or_else(|| {
            crate::state::invalid_state("read", slot.describe(handle), slot.state, "instance is not loaded")
        })?;
        Ok(EntityView {
            handle,
            entity_type: &slot.entity_type,
            state: slot.state,
            key: slot.key.as_ref(),
            record,
        })
    }

    /// Load `handle` if needed and borrow it for writing
    pub fn entity_mut(&mut self, handle: EntityHandle) -> Result<EntityMut<'_, B>> {
        self.ensure_loaded(handle)?;
        Ok(EntityMut { uow: self, handle })
    }
}
