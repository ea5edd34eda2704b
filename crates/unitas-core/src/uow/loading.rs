//! Reading rows into the scope
//!
//! Rows become instances through one queue. Materialising a row registers
//! (or finds) its slot and queues a populate job; populating may discover
//! eager targets and queue more jobs. Draining the queue iteratively keeps
//! cyclic eager graphs from recursing, and the identity map makes every
//! row land in at most one slot.

use std::sync::Arc;

use tracing::debug;

use super::{LoadJob, UnitOfWork};
use crate::backend::{LinkSide, PersistenceBackend};
use crate::cascade::CascadeOp;
use crate::errors::{Result, UnitasError};
use crate::metadata::{AssociationMetadata, FetchMode, Ownership};
use crate::model::{
    EntityHandle, EntityType, IdentityKey, KeyPart, PersistentCollection, PrimaryKey, Record, Row,
    Value,
};
use crate::proxy::{EntitySlot, ProxyBody};
use crate::state::{invalid_state, EntityState};

impl<B: PersistenceBackend> UnitOfWork<B> {
    /// Placeholder for a stored row, without reading storage
    ///
    /// Returns the registered instance if the key is already known.
    ///
    /// # Errors
    ///
    /// Returns `Mapping` for unknown types or malformed keys.
    pub fn get_reference(
        &mut self,
        entity_type: impl Into<EntityType>,
        key: impl Into<PrimaryKey>,
    ) -> Result<EntityHandle> {
        self.reference_to(entity_type.into(), key.into())
    }

    pub(crate) fn reference_to(&mut self, entity_type: EntityType, key: PrimaryKey) -> Result<EntityHandle> {
        self.registry.get(&entity_type)?.check_key(&key)?;
        let ikey = IdentityKey::new(entity_type.clone(), key.clone());
        if let Some(handle) = self.identity_map.lookup(&ikey) {
            return Ok(handle);
        }
        let handle = self.alloc(EntitySlot::proxy(entity_type, key));
        self.identity_map.register(ikey, handle)?;
        Ok(handle)
    }

    /// Load an instance by key
    ///
    /// # Errors
    ///
    /// Returns `EntityNotFound` if no row exists or the registered instance
    /// is scheduled for removal.
    pub fn find(
        &mut self,
        entity_type: impl Into<EntityType>,
        key: impl Into<PrimaryKey>,
    ) -> Result<EntityHandle> {
        let entity_type = entity_type.into();
        let key = key.into();
        let ikey = IdentityKey::new(entity_type.clone(), key.clone());
        self.instrumented("find", |uow| {
            uow.find_inner(entity_type, key)?
                .ok_or(UnitasError::EntityNotFound { key: ikey })
        })
    }

    /// Like [`find`](Self::find), but a missing row is `Ok(None)`
    pub fn try_find(
        &mut self,
        entity_type: impl Into<EntityType>,
        key: impl Into<PrimaryKey>,
    ) -> Result<Option<EntityHandle>> {
        let entity_type = entity_type.into();
        let key = key.into();
        self.instrumented("find", |uow| uow.find_inner(entity_type, key))
    }

    fn find_inner(&mut self, entity_type: EntityType, key: PrimaryKey) -> Result<Option<EntityHandle>> {
        let registry = Arc::clone(&self.registry);
        let meta = registry.get(&entity_type)?;
        meta.check_key(&key)?;
        let ikey = IdentityKey::new(entity_type.clone(), key.clone());

        if let Some(handle) = self.identity_map.lookup(&ikey) {
            let slot = self.slot(handle)?;
            if slot.state == EntityState::Removed {
                return Ok(None);
            }
            return match slot.body {
                ProxyBody::Loaded(_) => Ok(Some(handle)),
                ProxyBody::Failed => Ok(None),
                ProxyBody::Uninitialized => match self.ensure_loaded(handle) {
                    Ok(()) => Ok(Some(handle)),
                    Err(UnitasError::EntityNotFound { .. }) => Ok(None),
                    Err(err) => Err(err),
                },
            };
        }

        match self.backend.fetch_by_key(meta, &key)? {
            Some(row) => {
                let handle = self.materialize(entity_type, row)?;
                self.drain_load_queue()?;
                Ok(Some(handle))
            }
            None => Ok(None),
        }
    }

    /// Every stored instance of a type, skipping ones scheduled for removal
    pub fn find_all(&mut self, entity_type: impl Into<EntityType>) -> Result<Vec<EntityHandle>> {
        let entity_type = entity_type.into();
        self.instrumented("find_all", |uow| {
            let registry = Arc::clone(&uow.registry);
            let rows = uow.backend.fetch_all(registry.get(&entity_type)?)?;
            uow.materialize_all(&entity_type, rows)
        })
    }

    /// Stored instances whose `field` equals `value`
    pub fn find_by(
        &mut self,
        entity_type: impl Into<EntityType>,
        field: &str,
        value: impl Into<Value>,
    ) -> Result<Vec<EntityHandle>> {
        let entity_type = entity_type.into();
        let value = value.into();
        self.instrumented("find_by", |uow| {
            let registry = Arc::clone(&uow.registry);
            let meta = registry.get(&entity_type)?;
            let column = meta.require_field(field)?.column.clone();
            let rows = uow.backend.fetch_where(meta, &column, &value)?;
            uow.materialize_all(&entity_type, rows)
        })
    }

    fn materialize_all(&mut self, entity_type: &EntityType, rows: Vec<Row>) -> Result<Vec<EntityHandle>> {
        let mut handles = Vec::with_capacity(rows.len());
        for row in rows {
            handles.push(self.materialize(entity_type.clone(), row)?);
        }
        self.drain_load_queue()?;
        Ok(handles
            .into_iter()
            .filter(|h| self.state_of(*h).map(|s| s != EntityState::Removed).unwrap_or(false))
            .collect())
    }

    /// Turn a row obtained elsewhere into the scope's instance for it
    ///
    /// An instance already registered and loaded keeps its in-memory
    /// state; an uninitialised one is filled from `row`.
    ///
    /// # Errors
    ///
    /// Returns `Mapping` if the row lacks identifier columns.
    pub fn hydrate(&mut self, entity_type: impl Into<EntityType>, row: Row) -> Result<EntityHandle> {
        let entity_type = entity_type.into();
        self.instrumented("hydrate", |uow| {
            let handle = uow.materialize(entity_type, row)?;
            uow.drain_load_queue()?;
            Ok(handle)
        })
    }

    /// Register the instance for `row` and queue its population
    pub(crate) fn materialize(&mut self, entity_type: EntityType, row: Row) -> Result<EntityHandle> {
        let key = self.registry.get(&entity_type)?.key_from_row(&row)?;
        let ikey = IdentityKey::new(entity_type.clone(), key.clone());
        let handle = match self.identity_map.lookup(&ikey) {
            Some(handle) => handle,
            None => {
                let handle = self.alloc(EntitySlot::proxy(entity_type, key));
                self.identity_map.register(ikey, handle)?;
                handle
            }
        };
        if matches!(self.slot(handle)?.body, ProxyBody::Uninitialized) {
            self.load_queue.push_back(LoadJob::Populate(handle, row));
        }
        Ok(handle)
    }

    pub(crate) fn drain_load_queue(&mut self) -> Result<()> {
        while let Some(job) = self.load_queue.pop_front() {
            let outcome = match job {
                LoadJob::Populate(handle, row) => self.populate(handle, row),
                LoadJob::Initialize(handle) => self.fetch_into_queue(handle),
                LoadJob::Collection(handle, name) => self.load_collection(handle, &name),
            };
            if let Err(err) = outcome {
                self.load_queue.clear();
                return Err(err);
            }
        }
        Ok(())
    }

    /// Fetch the row of an uninitialised slot and queue its population
    fn fetch_into_queue(&mut self, handle: EntityHandle) -> Result<()> {
        let registry = Arc::clone(&self.registry);
        let slot = self.slot(handle)?;
        match slot.body {
            ProxyBody::Loaded(_) => return Ok(()),
            ProxyBody::Failed => {
                return Err(UnitasError::EntityNotFound {
                    key: self.placeholder_key(handle)?,
                })
            }
            ProxyBody::Uninitialized => {}
        }
        if !slot.state.is_tracked() {
            return Err(invalid_state(
                "initialize",
                slot.describe(handle),
                slot.state,
                "placeholder is no longer attached to a scope",
            ));
        }
        let ikey = self.placeholder_key(handle)?;
        let meta = registry.get(ikey.entity_type())?;
        match self.backend.fetch_by_key(meta, ikey.key())? {
            Some(row) => {
                self.load_queue.push_back(LoadJob::Populate(handle, row));
                Ok(())
            }
            None => {
                debug!(
                    scope_id = self.scope_id.as_str(),
                    entity = %ikey,
                    "placeholder has no row"
                );
                self.slot_mut(handle)?.body.fail();
                Err(UnitasError::EntityNotFound { key: ikey })
            }
        }
    }

    fn placeholder_key(&self, handle: EntityHandle) -> Result<IdentityKey> {
        let slot = self.slot(handle)?;
        slot.identity_key().ok_or_else(|| {
            invalid_state(
                "initialize",
                slot.describe(handle),
                slot.state,
                "instance has no identifier",
            )
        })
    }

    /// Load an instance on first access
    ///
    /// # Errors
    ///
    /// Returns `EntityNotFound` if the row is gone and `InvalidState` for a
    /// detached placeholder.
    pub(crate) fn ensure_loaded(&mut self, handle: EntityHandle) -> Result<()> {
        if self.slot(handle)?.is_initialized() {
            return Ok(());
        }
        self.fetch_into_queue(handle)?;
        self.drain_load_queue()
    }

    /// Load an instance and one of its collections
    pub(crate) fn ensure_collection(&mut self, handle: EntityHandle, association: &str) -> Result<()> {
        self.ensure_loaded(handle)?;
        self.load_collection(handle, association)?;
        self.drain_load_queue()
    }

    fn populate(&mut self, handle: EntityHandle, row: Row) -> Result<()> {
        let registry = Arc::clone(&self.registry);
        let slot = self.slot(handle)?;
        if !matches!(slot.body, ProxyBody::Uninitialized) {
            return Ok(());
        }
        let meta = registry.get(&slot.entity_type)?;
        let key = slot.key.clone();

        let mut record = Record::default();
        for field in &meta.fields {
            let value = row.get(&field.column).cloned().unwrap_or(Value::Null);
            record.fields.insert(field.name.clone(), value);
        }
        for assoc in &meta.associations {
            if assoc.is_to_one() {
                if !assoc.is_owning() && assoc.fetch == FetchMode::Lazy {
                    record.unresolved.insert(assoc.name.clone());
                    continue;
                }
                let target = self.resolve_to_one(assoc, &row, key.as_ref())?;
                record.references.insert(assoc.name.clone(), target);
            } else {
                record
                    .collections
                    .insert(assoc.name.clone(), PersistentCollection::uninitialized());
                if assoc.fetch == FetchMode::Eager {
                    self.load_queue
                        .push_back(LoadJob::Collection(handle, assoc.name.clone()));
                }
            }
        }

        self.ledger.snapshot(handle, &record);
        self.slot_mut(handle)?.body.initialize(record);
        debug!(
            scope_id = self.scope_id.as_str(),
            entity = %self.describe(handle),
            "instance loaded"
        );
        self.fire(handle, |l, e| {
            l.post_load(e);
            Ok(())
        })
    }

    fn resolve_to_one(
        &mut self,
        assoc: &AssociationMetadata,
        row: &Row,
        key: Option<&PrimaryKey>,
    ) -> Result<Option<EntityHandle>> {
        match &assoc.ownership {
            Ownership::Owning { join_column, .. } => {
                let Some(part) = row.get(join_column).and_then(KeyPart::from_value) else {
                    return Ok(None);
                };
                let target = self.reference_to(assoc.target.clone(), PrimaryKey::from(part))?;
                if assoc.fetch == FetchMode::Eager {
                    self.load_queue.push_back(LoadJob::Initialize(target));
                }
                Ok(Some(target))
            }
            Ownership::Inverse { mapped_by } => self.fetch_inverse_one(assoc, mapped_by, key),
            Ownership::JoinTable(_) => Ok(None),
        }
    }

    /// Read the row whose foreign key names `key` on the owning side
    fn fetch_inverse_one(
        &mut self,
        assoc: &AssociationMetadata,
        mapped_by: &str,
        key: Option<&PrimaryKey>,
    ) -> Result<Option<EntityHandle>> {
        let Some(part) = key.and_then(|k| k.single()) else {
            return Ok(None);
        };
        let registry = Arc::clone(&self.registry);
        let target_meta = registry.get(&assoc.target)?;
        let owner = target_meta.require_association(mapped_by)?;
        let Some((join_column, _)) = owner.join_column() else {
            return Ok(None);
        };
        let rows = self
            .backend
            .fetch_where(target_meta, join_column, &part.to_value())?;
        match rows.into_iter().next() {
            Some(row) => Ok(Some(self.materialize(assoc.target.clone(), row)?)),
            None => Ok(None),
        }
    }

    /// Read a lazy inverse to-one association left unresolved at load
    pub(crate) fn resolve_reference(&mut self, handle: EntityHandle, association: &str) -> Result<()> {
        let registry = Arc::clone(&self.registry);
        let slot = self.slot(handle)?;
        if slot.record().map(|r| r.is_resolved(association)).unwrap_or(true) {
            return Ok(());
        }
        if !slot.state.is_tracked() {
            return Err(invalid_state(
                "initialize",
                slot.describe(handle),
                slot.state,
                "reference can no longer be read from storage",
            ));
        }
        let assoc = registry.get(&slot.entity_type)?.require_association(association)?;
        let Ownership::Inverse { mapped_by } = &assoc.ownership else {
            return Ok(());
        };
        let key = slot.key.clone();
        let target = self.fetch_inverse_one(assoc, mapped_by, key.as_ref())?;
        self.drain_load_queue()?;
        if let Some(record) = self.slot_mut(handle)?.record_mut() {
            record.put_reference(association, target);
        }
        self.ledger.settle_reference(handle, association, target);
        debug!(
            scope_id = self.scope_id.as_str(),
            entity = %self.describe(handle),
            association,
            "reference resolved"
        );
        Ok(())
    }

    /// Resolve every pending reference of `handle` that `keep` selects
    pub(crate) fn resolve_references(
        &mut self,
        handle: EntityHandle,
        keep: impl Fn(&AssociationMetadata) -> bool,
    ) -> Result<()> {
        let registry = Arc::clone(&self.registry);
        let slot = self.slot(handle)?;
        let Some(record) = slot.record() else {
            return Ok(());
        };
        if record.unresolved.is_empty() {
            return Ok(());
        }
        let meta = registry.get(&slot.entity_type)?;
        let pending: Vec<String> = meta
            .associations
            .iter()
            .filter(|a| !record.is_resolved(&a.name) && keep(a))
            .map(|a| a.name.clone())
            .collect();
        for name in pending {
            self.resolve_reference(handle, &name)?;
        }
        Ok(())
    }

    /// Read the members of an uninitialised collection
    fn load_collection(&mut self, handle: EntityHandle, association: &str) -> Result<()> {
        let registry = Arc::clone(&self.registry);
        let slot = self.slot(handle)?;
        let meta = registry.get(&slot.entity_type)?;
        let assoc = meta.require_association(association)?;
        if assoc.is_to_one() {
            return Err(UnitasError::mapping(format!(
                "'{}' is a reference, not a collection",
                association
            )));
        }
        let Some(record) = slot.record() else {
            return Ok(());
        };
        if record
            .collection(association)
            .map(|c| c.is_initialized())
            .unwrap_or(false)
        {
            return Ok(());
        }
        let part = slot
            .key
            .as_ref()
            .and_then(|k| k.single())
            .cloned()
            .ok_or_else(|| {
                UnitasError::mapping(format!(
                    "{} needs a single-column identifier to load '{}'",
                    meta.entity_type, association
                ))
            })?;

        let items = match &assoc.ownership {
            Ownership::JoinTable(join) => {
                let keys = self.backend.fetch_links(join, LinkSide::Owner, &part)?;
                self.references_for(assoc, keys)?
            }
            Ownership::Inverse { mapped_by } => {
                let target_meta = registry.get(&assoc.target)?;
                let owner = target_meta.require_association(mapped_by)?;
                if let Some((join_column, _)) = owner.join_column() {
                    let rows = self
                        .backend
                        .fetch_where(target_meta, join_column, &part.to_value())?;
                    let mut items = Vec::with_capacity(rows.len());
                    for row in rows {
                        items.push(self.materialize(assoc.target.clone(), row)?);
                    }
                    items
                } else if let Some(join) = owner.join_table() {
                    let keys = self.backend.fetch_links(join, LinkSide::Target, &part)?;
                    self.references_for(assoc, keys)?
                } else {
                    Vec::new()
                }
            }
            Ownership::Owning { .. } => Vec::new(),
        };

        debug!(
            scope_id = self.scope_id.as_str(),
            entity = %self.describe(handle),
            association,
            size = items.len(),
            "collection loaded"
        );
        if let Some(record) = self.slot_mut(handle)?.record_mut() {
            record
                .collections
                .insert(association.to_string(), PersistentCollection::loaded(items));
        }
        Ok(())
    }

    fn references_for(&mut self, assoc: &AssociationMetadata, keys: Vec<KeyPart>) -> Result<Vec<EntityHandle>> {
        let mut items = Vec::with_capacity(keys.len());
        for key in keys {
            let target = self.reference_to(assoc.target.clone(), PrimaryKey::from(key))?;
            if assoc.fetch == FetchMode::Eager {
                self.load_queue.push_back(LoadJob::Initialize(target));
            }
            items.push(target);
        }
        Ok(items)
    }

    /// Overwrite a managed instance with its stored state
    ///
    /// Pending changes are discarded, collections return to uninitialised
    /// and the baseline is reset. Cascades along refresh edges.
    ///
    /// # Errors
    ///
    /// Returns `InvalidState` unless MANAGED and already inserted, and
    /// `EntityNotFound` if the row is gone.
    pub fn refresh(&mut self, handle: EntityHandle) -> Result<()> {
        self.instrumented("refresh", |uow| {
            let state = uow.slot(handle)?.state;
            if let Err(reason) = state.on_refresh() {
                return Err(invalid_state("refresh", uow.describe(handle), state, reason));
            }
            if uow.is_pending_insert(handle) {
                return Err(invalid_state(
                    "refresh",
                    uow.describe(handle),
                    state,
                    "instance has not been flushed yet",
                ));
            }
            let graph = uow.cascade_graph(handle, CascadeOp::Refresh)?;
            for target in graph {
                let slot = uow.slot(target)?;
                if slot.state != EntityState::Managed || uow.is_pending_insert(target) {
                    continue;
                }
                uow.reload(target)?;
            }
            Ok(())
        })
    }

    fn reload(&mut self, handle: EntityHandle) -> Result<()> {
        let registry = Arc::clone(&self.registry);
        let ikey = self.placeholder_key(handle)?;
        let meta = registry.get(ikey.entity_type())?;
        match self.backend.fetch_by_key(meta, ikey.key())? {
            Some(row) => {
                self.slot_mut(handle)?.body = ProxyBody::Uninitialized;
                self.load_queue.push_back(LoadJob::Populate(handle, row));
                self.drain_load_queue()
            }
            None => Err(UnitasError::EntityNotFound { key: ikey }),
        }
    }

    /// Detached copy of an instance, loading it first if needed
    ///
    /// The copy carries the same identifier and references, belongs to no
    /// identity map entry and can later be merged back.
    pub fn clone_entity(&mut self, handle: EntityHandle) -> Result<EntityHandle> {
        self.instrumented("clone", |uow| {
            uow.ensure_loaded(handle)?;
            uow.resolve_references(handle, |_| true)?;
            let key = uow.identifier(handle)?;
            let slot = uow.slot(handle)?;
            let record = slot
                .record()
                .map(|r| r.detached_copy())
                .unwrap_or_default();
            let entity_type = slot.entity_type.clone();
            let mut copy = EntitySlot::new_entity(entity_type, record);
            copy.state = EntityState::Detached;
            copy.key = key;
            Ok(uow.alloc(copy))
        })
    }
}
