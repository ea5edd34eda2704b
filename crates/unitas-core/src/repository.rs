//! Per-type facade over a scope
//!
//! A [`Repository`] fixes the entity type and delegates to the
//! [`UnitOfWork`]; it holds no state of its own, so every instance it
//! returns is the scope's registered instance.

use crate::backend::PersistenceBackend;
use crate::errors::{Result, UnitasError};
use crate::model::{EntityHandle, EntityType, PrimaryKey, Value};
use crate::uow::UnitOfWork;

pub struct Repository<'a, B: PersistenceBackend> {
    uow: &'a mut UnitOfWork<B>,
    entity_type: EntityType,
}

impl<B: PersistenceBackend> UnitOfWork<B> {
    /// Facade for one entity type
    ///
    /// # Errors
    ///
    /// Returns `Mapping` for unknown types.
    pub fn repository(&mut self, entity_type: impl Into<EntityType>) -> Result<Repository<'_, B>> {
        let entity_type = entity_type.into();
        self.registry().get(&entity_type)?;
        Ok(Repository {
            uow: self,
            entity_type,
        })
    }
}

impl<'a, B: PersistenceBackend> Repository<'a, B> {
    pub fn entity_type(&self) -> &EntityType {
        &self.entity_type
    }

    fn check_type(&self, handle: EntityHandle) -> Result<()> {
        let actual = self.uow.entity_type_of(handle)?;
        if actual != self.entity_type {
            return Err(UnitasError::mapping(format!(
                "{} repository cannot handle a {}",
                self.entity_type, actual
            )));
        }
        Ok(())
    }

    /// NEW instance of the repository's type
    pub fn create(&mut self) -> Result<EntityHandle> {
        self.uow.new_entity(self.entity_type.clone())
    }

    pub fn find(&mut self, key: impl Into<PrimaryKey>) -> Result<EntityHandle> {
        self.uow.find(self.entity_type.clone(), key)
    }

    pub fn try_find(&mut self, key: impl Into<PrimaryKey>) -> Result<Option<EntityHandle>> {
        self.uow.try_find(self.entity_type.clone(), key)
    }

    pub fn get_reference(&mut self, key: impl Into<PrimaryKey>) -> Result<EntityHandle> {
        self.uow.get_reference(self.entity_type.clone(), key)
    }

    pub fn find_all(&mut self) -> Result<Vec<EntityHandle>> {
        self.uow.find_all(self.entity_type.clone())
    }

    pub fn find_by(&mut self, field: &str, value: impl Into<Value>) -> Result<Vec<EntityHandle>> {
        self.uow.find_by(self.entity_type.clone(), field, value)
    }

    pub fn persist(&mut self, handle: EntityHandle) -> Result<()> {
        self.check_type(handle)?;
        self.uow.persist(handle)
    }

    pub fn remove(&mut self, handle: EntityHandle) -> Result<()> {
        self.check_type(handle)?;
        self.uow.remove(handle)
    }
}
