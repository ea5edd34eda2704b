//! The Unit-of-Work scope
//!
//! A [`UnitOfWork`] owns every instance it hands out. Instances live in an
//! arena and are addressed by [`EntityHandle`]; the identity map guarantees
//! one handle per stored row, the ledger keeps the persisted baseline of
//! each managed instance, and the scheduled registers hold pending inserts
//! and deletes until [`flush`](UnitOfWork::flush).
//!
//! A scope is single-writer. It is `Send` so it can move between threads,
//! but it is never shared; run one scope per logical transaction.

mod loading;
mod merge;
mod view;

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Instant;

use tracing::{debug, info};
use unitas_core_types::{RequestContext, ScopeId, Sensitive};

use crate::backend::PersistenceBackend;
use crate::cascade::{cascade_targets, CascadeOp, CascadeWalk};
use crate::config::UnitOfWorkConfig;
use crate::errors::{Result, UnitasError};
use crate::identity_map::IdentityMap;
use crate::ledger::{ChangeSet, Ledger};
use crate::listener::{LifecycleEvent, LifecycleListener};
use crate::metadata::{EntityMetadata, MetadataRegistry};
use crate::model::handle::next_scope_tag;
use crate::model::{
    EntityHandle, EntityType, IdentityKey, PersistentCollection, PrimaryKey, Record, Row, Value,
};
use crate::proxy::{EntitySlot, ProxyState};
use crate::state::{invalid_state, EntityState, Transition};
use crate::{log_op_end, log_op_error, log_op_start};

pub use view::{EntityMut, EntityView};

/// Work deferred while rows are being turned into instances
#[derive(Debug)]
pub(crate) enum LoadJob {
    /// Fill an uninitialised slot from an already fetched row
    Populate(EntityHandle, Row),
    /// Fetch and fill an eager to-one target
    Initialize(EntityHandle),
    /// Fetch an eager collection
    Collection(EntityHandle, String),
}

/// Point-in-time counters of a scope
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScopeStats {
    pub instances: usize,
    pub new: usize,
    pub managed: usize,
    pub removed: usize,
    pub detached: usize,
    pub uninitialized_proxies: usize,
    pub identity_map_entries: usize,
    pub snapshots: usize,
    pub scheduled_inserts: usize,
    pub scheduled_deletes: usize,
}

pub struct UnitOfWork<B: PersistenceBackend> {
    pub(crate) scope_tag: u32,
    pub(crate) scope_id: ScopeId,
    pub(crate) context: Option<RequestContext>,
    pub(crate) registry: Arc<MetadataRegistry>,
    pub(crate) backend: B,
    pub(crate) config: UnitOfWorkConfig,
    pub(crate) slots: Vec<EntitySlot>,
    pub(crate) identity_map: IdentityMap,
    pub(crate) ledger: Ledger,
    pub(crate) scheduled_inserts: Vec<EntityHandle>,
    pub(crate) scheduled_deletes: Vec<EntityHandle>,
    pub(crate) listeners: Vec<Arc<dyn LifecycleListener>>,
    pub(crate) load_queue: VecDeque<LoadJob>,
}

impl<B: PersistenceBackend> std::fmt::Debug for UnitOfWork<B> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UnitOfWork")
            .field("scope_id", &self.scope_id)
            .field("instances", &self.slots.len())
            .field("scheduled_inserts", &self.scheduled_inserts.len())
            .field("scheduled_deletes", &self.scheduled_deletes.len())
            .finish()
    }
}

impl<B: PersistenceBackend> UnitOfWork<B> {
    /// Open a scope with the default configuration
    pub fn new(registry: Arc<MetadataRegistry>, backend: B) -> Self {
        let scope_id = ScopeId::new();
        debug!(scope_id = scope_id.as_str(), "unit of work opened");
        Self {
            scope_tag: next_scope_tag(),
            scope_id,
            context: None,
            registry,
            backend,
            config: UnitOfWorkConfig::default(),
            slots: Vec::new(),
            identity_map: IdentityMap::new(),
            ledger: Ledger::new(),
            scheduled_inserts: Vec::new(),
            scheduled_deletes: Vec::new(),
            listeners: Vec::new(),
            load_queue: VecDeque::new(),
        }
    }

    /// Open a scope with an explicit configuration
    ///
    /// # Errors
    ///
    /// Returns `Configuration` if the configuration does not validate.
    pub fn with_config(
        registry: Arc<MetadataRegistry>,
        backend: B,
        config: UnitOfWorkConfig,
    ) -> Result<Self> {
        config.validate()?;
        let mut uow = Self::new(registry, backend);
        uow.config = config;
        Ok(uow)
    }

    /// Attach the correlation context of the request this scope serves
    pub fn with_context(mut self, context: RequestContext) -> Self {
        info!(
            scope_id = self.scope_id.as_str(),
            request_id = context.request_id.as_str(),
            trace_id = context.trace_id.as_ref().map(|t| t.as_str()),
            "unit of work bound to request"
        );
        self.context = Some(context);
        self
    }

    pub fn scope_id(&self) -> &ScopeId {
        &self.scope_id
    }

    pub fn context(&self) -> Option<&RequestContext> {
        self.context.as_ref()
    }

    pub fn registry(&self) -> &Arc<MetadataRegistry> {
        &self.registry
    }

    pub fn config(&self) -> &UnitOfWorkConfig {
        &self.config
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn backend_mut(&mut self) -> &mut B {
        &mut self.backend
    }

    /// Tear the scope down and hand back its backend
    pub fn into_backend(self) -> B {
        self.backend
    }

    pub fn add_listener(&mut self, listener: Arc<dyn LifecycleListener>) {
        self.listeners.push(listener);
    }

    // ----- arena plumbing -----

    pub(crate) fn check_handle(&self, handle: EntityHandle) -> Result<()> {
        if handle.scope != self.scope_tag || handle.index() >= self.slots.len() {
            return Err(UnitasError::InvalidState {
                op: "resolve".to_string(),
                entity: handle.to_string(),
                state: "UNKNOWN".to_string(),
                reason: "handle was not issued by this scope".to_string(),
            });
        }
        Ok(())
    }

    pub(crate) fn slot(&self, handle: EntityHandle) -> Result<&EntitySlot> {
        self.check_handle(handle)?;
        Ok(&self.slots[handle.index()])
    }

    pub(crate) fn slot_mut(&mut self, handle: EntityHandle) -> Result<&mut EntitySlot> {
        self.check_handle(handle)?;
        Ok(&mut self.slots[handle.index()])
    }

    pub(crate) fn alloc(&mut self, slot: EntitySlot) -> EntityHandle {
        let handle = EntityHandle::new(self.scope_tag, self.slots.len());
        self.slots.push(slot);
        handle
    }

    pub(crate) fn handles(&self) -> impl Iterator<Item = EntityHandle> + '_ {
        (0..self.slots.len()).map(move |i| EntityHandle::new(self.scope_tag, i))
    }

    pub(crate) fn describe(&self, handle: EntityHandle) -> String {
        self.slot(handle)
            .map(|slot| slot.describe(handle))
            .unwrap_or_else(|_| handle.to_string())
    }

    pub(crate) fn is_pending_insert(&self, handle: EntityHandle) -> bool {
        self.scheduled_inserts.contains(&handle)
    }

    /// Run `f` between `start` and `end`/`end_error` events
    pub(crate) fn instrumented<T>(
        &mut self,
        op: &'static str,
        f: impl FnOnce(&mut Self) -> Result<T>,
    ) -> Result<T> {
        let started = Instant::now();
        log_op_start!(op, scope_id = self.scope_id.as_str());
        let result = f(self);
        let duration_ms = started.elapsed().as_millis() as u64;
        match &result {
            Ok(_) => log_op_end!(op, duration_ms = duration_ms, scope_id = self.scope_id.as_str()),
            Err(err) => log_op_error!(
                op,
                err,
                duration_ms = duration_ms,
                scope_id = self.scope_id.as_str()
            ),
        }
        result
    }

    pub(crate) fn fire(
        &self,
        handle: EntityHandle,
        hook: impl Fn(&dyn LifecycleListener, &LifecycleEvent<'_>) -> Result<()>,
    ) -> Result<()> {
        if self.listeners.is_empty() {
            return Ok(());
        }
        let slot = self.slot(handle)?;
        let Some(record) = slot.record() else {
            return Ok(());
        };
        let event = LifecycleEvent {
            handle,
            entity_type: &slot.entity_type,
            key: slot.key.as_ref(),
            record,
        };
        for listener in &self.listeners {
            hook(listener.as_ref(), &event)?;
        }
        Ok(())
    }

    pub(crate) fn empty_record(meta: &EntityMetadata) -> Record {
        let mut record = Record::default();
        for field in &meta.fields {
            record.fields.insert(field.name.clone(), Value::Null);
        }
        for assoc in &meta.associations {
            if assoc.is_to_one() {
                record.references.insert(assoc.name.clone(), None);
            } else {
                record
                    .collections
                    .insert(assoc.name.clone(), PersistentCollection::empty());
            }
        }
        record
    }

    // ----- instance access -----

    /// Create a NEW instance with every field null and empty collections
    ///
    /// # Errors
    ///
    /// Returns `Mapping` for an unknown type.
    pub fn new_entity(&mut self, entity_type: impl Into<EntityType>) -> Result<EntityHandle> {
        let entity_type = entity_type.into();
        let registry = Arc::clone(&self.registry);
        let meta = registry.get(&entity_type)?;
        let record = Self::empty_record(meta);
        Ok(self.alloc(EntitySlot::new_entity(entity_type, record)))
    }

    /// Identifier of an instance, without loading it
    ///
    /// NEW instances with assigned identifiers report the key their fields
    /// currently spell; generated identifiers are `None` until inserted.
    pub fn identifier(&self, handle: EntityHandle) -> Result<Option<PrimaryKey>> {
        let slot = self.slot(handle)?;
        if let Some(key) = &slot.key {
            return Ok(Some(key.clone()));
        }
        let meta = self.registry.get(&slot.entity_type)?;
        if meta.is_generated() {
            return Ok(None);
        }
        Ok(slot.record().and_then(|r| meta.key_from_fields(&r.fields)))
    }

    pub fn entity_type_of(&self, handle: EntityHandle) -> Result<EntityType> {
        Ok(self.slot(handle)?.entity_type.clone())
    }

    pub fn state_of(&self, handle: EntityHandle) -> Result<EntityState> {
        Ok(self.slot(handle)?.state)
    }

    pub fn is_initialized(&self, handle: EntityHandle) -> Result<bool> {
        Ok(self.slot(handle)?.is_initialized())
    }

    pub fn proxy_state(&self, handle: EntityHandle) -> Result<ProxyState> {
        Ok(self.slot(handle)?.body.state())
    }

    /// Whether `handle` is a MANAGED instance of this scope
    pub fn contains(&self, handle: EntityHandle) -> bool {
        self.slot(handle)
            .map(|slot| slot.state == EntityState::Managed)
            .unwrap_or(false)
    }

    /// Read a scalar field, loading the instance if needed
    ///
    /// # Errors
    ///
    /// Returns `Mapping` for unknown fields and `EntityNotFound` if a
    /// placeholder's row is missing.
    pub fn get(&mut self, handle: EntityHandle, field: &str) -> Result<Value> {
        self.ensure_loaded(handle)?;
        let registry = Arc::clone(&self.registry);
        let slot = self.slot(handle)?;
        registry.get(&slot.entity_type)?.require_field(field)?;
        Ok(slot
            .record()
            .and_then(|r| r.field(field).cloned())
            .unwrap_or(Value::Null))
    }

    /// Target of a to-one association, loading the instance if needed
    pub fn reference(&mut self, handle: EntityHandle, association: &str) -> Result<Option<EntityHandle>> {
        self.ensure_loaded(handle)?;
        self.resolve_reference(handle, association)?;
        let registry = Arc::clone(&self.registry);
        let slot = self.slot(handle)?;
        let assoc = registry.get(&slot.entity_type)?.require_association(association)?;
        if !assoc.is_to_one() {
            return Err(UnitasError::mapping(format!(
                "'{}' is a collection, not a reference",
                association
            )));
        }
        Ok(slot.record().and_then(|r| r.reference(association)))
    }

    /// Members of a to-many association, loading it if needed
    pub fn collection(&mut self, handle: EntityHandle, association: &str) -> Result<Vec<EntityHandle>> {
        self.ensure_collection(handle, association)?;
        Ok(self
            .slot(handle)?
            .record()
            .and_then(|r| r.collection(association))
            .map(|c| c.items().to_vec())
            .unwrap_or_default())
    }

    /// Set a scalar field
    ///
    /// # Errors
    ///
    /// Returns `Mapping` for unknown fields or values of the wrong kind and
    /// `InvalidState` when changing the identifier of a keyed instance.
    pub fn set(&mut self, handle: EntityHandle, field: &str, value: impl Into<Value>) -> Result<()> {
        let value = value.into();
        self.ensure_loaded(handle)?;
        let registry = Arc::clone(&self.registry);
        let slot = self.slot(handle)?;
        let meta = registry.get(&slot.entity_type)?;
        let field_meta = meta.require_field(field)?;
        if !field_meta.kind.accepts(&value) {
            return Err(UnitasError::mapping(format!(
                "{}.{} expects {:?}, got {}",
                meta.entity_type,
                field,
                field_meta.kind,
                value.type_name()
            )));
        }
        if meta.is_id_field(field) && slot.key.is_some() && slot.state != EntityState::New {
            let current = slot.record().and_then(|r| r.field(field));
            if current != Some(&value) {
                return Err(invalid_state(
                    "set",
                    slot.describe(handle),
                    slot.state,
                    "identifier fields cannot change once the instance is keyed",
                ));
            }
        }
        debug!(
            scope_id = self.scope_id.as_str(),
            entity = %slot.describe(handle),
            field,
            value = ?Sensitive::with_reveal(&value, self.config.log_field_values),
            "field set"
        );
        if let Some(record) = self.slot_mut(handle)?.record_mut() {
            record.fields.insert(field.to_string(), value);
        }
        Ok(())
    }

    fn check_target(
        &self,
        meta: &EntityMetadata,
        association: &str,
        target: EntityHandle,
    ) -> Result<()> {
        let assoc = meta.require_association(association)?;
        let target_type = &self.slot(target)?.entity_type;
        if *target_type != assoc.target {
            return Err(UnitasError::mapping(format!(
                "{}.{} holds {}, not {}",
                meta.entity_type, association, assoc.target, target_type
            )));
        }
        Ok(())
    }

    /// Point a to-one association at `target` (or clear it)
    pub fn set_reference(
        &mut self,
        handle: EntityHandle,
        association: &str,
        target: Option<EntityHandle>,
    ) -> Result<()> {
        self.ensure_loaded(handle)?;
        let registry = Arc::clone(&self.registry);
        let meta = registry.get(&self.slot(handle)?.entity_type)?;
        let assoc = meta.require_association(association)?;
        if !assoc.is_to_one() {
            return Err(UnitasError::mapping(format!(
                "'{}' is a collection, use add_to_collection",
                association
            )));
        }
        if let Some(target) = target {
            self.check_target(meta, association, target)?;
        }
        if let Some(record) = self.slot_mut(handle)?.record_mut() {
            record.put_reference(association, target);
        }
        Ok(())
    }

    /// Add `target` to a to-many association; returns false if present
    pub fn add_to_collection(
        &mut self,
        handle: EntityHandle,
        association: &str,
        target: EntityHandle,
    ) -> Result<bool> {
        self.ensure_collection(handle, association)?;
        let registry = Arc::clone(&self.registry);
        let meta = registry.get(&self.slot(handle)?.entity_type)?;
        self.check_target(meta, association, target)?;
        Ok(self
            .slot_mut(handle)?
            .record_mut()
            .and_then(|r| r.collections.get_mut(association))
            .map(|c| c.add(target))
            .unwrap_or(false))
    }

    /// Remove `target` from a to-many association; returns false if absent
    pub fn remove_from_collection(
        &mut self,
        handle: EntityHandle,
        association: &str,
        target: EntityHandle,
    ) -> Result<bool> {
        self.ensure_collection(handle, association)?;
        self.check_handle(target)?;
        Ok(self
            .slot_mut(handle)?
            .record_mut()
            .and_then(|r| r.collections.get_mut(association))
            .map(|c| c.remove(target))
            .unwrap_or(false))
    }

    // ----- lifecycle -----

    /// Collect the cascade graph of `root` for `op`
    pub(crate) fn cascade_graph(&mut self, root: EntityHandle, op: CascadeOp) -> Result<Vec<EntityHandle>> {
        self.cascade_graph_from(vec![root], op)
    }

    pub(crate) fn cascade_graph_from(&mut self, roots: Vec<EntityHandle>, op: CascadeOp) -> Result<Vec<EntityHandle>> {
        let registry = Arc::clone(&self.registry);
        let mut walk = CascadeWalk::from_roots(roots);
        while let Some(handle) = walk.next_handle() {
            let entity_type = self.slot(handle)?.entity_type.clone();
            let meta = registry.get(&entity_type)?;
            if op.initializes_targets() && self.slot(handle)?.state.is_tracked() {
                self.ensure_loaded(handle)?;
                for assoc in meta.associations.iter().filter(|a| !a.is_to_one() && op.applies_to(a)) {
                    self.ensure_collection(handle, &assoc.name)?;
                }
            }
            if self.slot(handle)?.state.is_tracked() {
                self.resolve_references(handle, |a| op.applies_to(a))?;
            }
            if let Some(record) = self.slot(handle)?.record() {
                walk.extend(cascade_targets(meta, record, op));
            }
        }
        Ok(walk.into_order())
    }

    /// Validate a NEW instance for management and fire `pre_persist`
    pub(crate) fn prepare_new(&self, handle: EntityHandle) -> Result<Option<IdentityKey>> {
        let slot = self.slot(handle)?;
        let meta = self.registry.get(&slot.entity_type)?;
        let key = if meta.is_generated() {
            None
        } else {
            let key = slot
                .record()
                .and_then(|r| meta.key_from_fields(&r.fields))
                .ok_or_else(|| {
                    invalid_state(
                        "persist",
                        slot.describe(handle),
                        slot.state,
                        "assigned identifier fields are not set",
                    )
                })?;
            let ikey = IdentityKey::new(slot.entity_type.clone(), key);
            if let Some(existing) = self.identity_map.lookup(&ikey) {
                if existing != handle {
                    return Err(UnitasError::Conflict { key: ikey });
                }
            }
            Some(ikey)
        };
        self.fire(handle, |l, e| l.pre_persist(e))?;
        Ok(key)
    }

    /// Move a prepared NEW instance to MANAGED and schedule its insert
    pub(crate) fn activate_new(&mut self, handle: EntityHandle, key: Option<IdentityKey>) -> Result<()> {
        if let Some(ikey) = key {
            self.identity_map.register(ikey.clone(), handle)?;
            self.slot_mut(handle)?.key = Some(ikey.key().clone());
        }
        self.slot_mut(handle)?.state = EntityState::Managed;
        if !self.scheduled_inserts.contains(&handle) {
            self.scheduled_inserts.push(handle);
        }
        Ok(())
    }

    /// Apply persist to every instance of an already collected graph
    ///
    /// All checks run before the first state change, so a rejected persist
    /// leaves the scope untouched. Without an explicit `root` (the flush-time
    /// cascade) REMOVED instances stay scheduled for deletion.
    pub(crate) fn persist_graph(&mut self, graph: &[EntityHandle], root: Option<EntityHandle>) -> Result<()> {
        let mut prepared: Vec<(EntityHandle, Option<IdentityKey>)> = Vec::new();
        let mut claimed: HashMap<IdentityKey, EntityHandle> = HashMap::new();
        for &handle in graph {
            let state = self.slot(handle)?.state;
            match state.on_persist() {
                Err(reason) => {
                    let reason = if Some(handle) == root {
                        reason.to_string()
                    } else {
                        format!("reached by persist cascade: {}", reason)
                    };
                    return Err(invalid_state("persist", self.describe(handle), state, reason));
                }
                Ok(Transition::To(_)) if state == EntityState::New => {
                    let key = self.prepare_new(handle)?;
                    if let Some(ikey) = &key {
                        if let Some(other) = claimed.insert(ikey.clone(), handle) {
                            if other != handle {
                                return Err(UnitasError::Conflict { key: ikey.clone() });
                            }
                        }
                    }
                    prepared.push((handle, key));
                }
                _ => {}
            }
        }

        for (handle, key) in prepared {
            self.activate_new(handle, key)?;
        }
        for &handle in graph.iter().filter(|_| root.is_some()) {
            if self.slot(handle)?.state == EntityState::Removed {
                self.slot_mut(handle)?.state = EntityState::Managed;
                self.scheduled_deletes.retain(|h| *h != handle);
                debug!(
                    scope_id = self.scope_id.as_str(),
                    entity = %self.describe(handle),
                    "pending removal cancelled"
                );
            }
        }
        Ok(())
    }

    /// Make a NEW instance managed, cascading along persist edges
    ///
    /// MANAGED is a no-op, REMOVED cancels the pending deletion.
    ///
    /// # Errors
    ///
    /// Returns `InvalidState` for detached instances (use `merge`) and
    /// `Conflict` if another instance already holds the assigned key.
    pub fn persist(&mut self, handle: EntityHandle) -> Result<()> {
        self.instrumented("persist", |uow| {
            uow.check_handle(handle)?;
            let state = uow.slot(handle)?.state;
            if let Err(reason) = state.on_persist() {
                return Err(invalid_state("persist", uow.describe(handle), state, reason));
            }
            let graph = uow.cascade_graph(handle, CascadeOp::Persist)?;
            uow.persist_graph(&graph, Some(handle))
        })
    }

    pub(crate) fn remove_inner(&mut self, root: EntityHandle) -> Result<()> {
        let state = self.slot(root)?.state;
        match state.on_remove() {
            Err(reason) => return Err(invalid_state("remove", self.describe(root), state, reason)),
            Ok(Transition::Stay) => return Ok(()),
            Ok(Transition::To(EntityState::Detached)) => {
                self.slot_mut(root)?.state = EntityState::Detached;
                return Ok(());
            }
            Ok(Transition::To(_)) => {}
        }

        let graph = self.cascade_graph(root, CascadeOp::Remove)?;
        let managed: Vec<EntityHandle> = graph
            .into_iter()
            .filter(|h| self.slot(*h).map(|s| s.state == EntityState::Managed).unwrap_or(false))
            .collect();
        for &handle in &managed {
            self.fire(handle, |l, e| l.pre_remove(e))?;
        }
        for handle in managed {
            if self.is_pending_insert(handle) {
                // never written: forget it instead of deleting it
                self.scheduled_inserts.retain(|h| *h != handle);
                let slot = self.slot_mut(handle)?;
                let key = slot.identity_key();
                slot.key = None;
                slot.state = EntityState::New;
                if let Some(key) = key {
                    self.identity_map.forget_if(&key, handle);
                }
                self.ledger.forget(handle);
            } else {
                self.slot_mut(handle)?.state = EntityState::Removed;
                self.scheduled_deletes.push(handle);
            }
        }
        Ok(())
    }

    /// Schedule a MANAGED instance for deletion, cascading along remove edges
    ///
    /// A NEW instance is detached immediately; REMOVED is a no-op.
    ///
    /// # Errors
    ///
    /// Returns `InvalidState` for detached instances.
    pub fn remove(&mut self, handle: EntityHandle) -> Result<()> {
        self.instrumented("remove", |uow| {
            uow.check_handle(handle)?;
            uow.remove_inner(handle)
        })
    }

    fn detach_one(&mut self, handle: EntityHandle) -> Result<()> {
        let slot = self.slot_mut(handle)?;
        if let Transition::To(next) = slot.state.on_detach() {
            slot.state = next;
            let key = slot.identity_key();
            if let Some(key) = key {
                self.identity_map.forget_if(&key, handle);
            }
            self.ledger.forget(handle);
            self.scheduled_inserts.retain(|h| *h != handle);
            self.scheduled_deletes.retain(|h| *h != handle);
        }
        Ok(())
    }

    /// Disconnect an instance (and detach-cascaded targets) from the scope
    pub fn detach(&mut self, handle: EntityHandle) -> Result<()> {
        self.instrumented("detach", |uow| {
            uow.check_handle(handle)?;
            let graph = uow.cascade_graph(handle, CascadeOp::Detach)?;
            for h in graph {
                uow.detach_one(h)?;
            }
            Ok(())
        })
    }

    /// Detach every tracked instance and reset the identity map and ledger
    pub fn clear(&mut self) {
        let started = Instant::now();
        log_op_start!("clear", scope_id = self.scope_id.as_str());
        for slot in self.slots.iter_mut() {
            if let Transition::To(next) = slot.state.on_detach() {
                slot.state = next;
            }
        }
        self.identity_map.clear();
        self.ledger.clear();
        self.scheduled_inserts.clear();
        self.scheduled_deletes.clear();
        self.load_queue.clear();
        log_op_end!(
            "clear",
            duration_ms = started.elapsed().as_millis() as u64,
            scope_id = self.scope_id.as_str()
        );
    }

    // ----- diagnostics -----

    /// Current diff of a managed instance against its baseline
    pub fn change_set(&self, handle: EntityHandle) -> Result<ChangeSet> {
        let slot = self.slot(handle)?;
        let Some(record) = slot.record() else {
            return Ok(ChangeSet::default());
        };
        if !slot.state.is_tracked() {
            return Ok(ChangeSet::default());
        }
        let meta = self.registry.get(&slot.entity_type)?;
        let ignored: Vec<&str> = meta.version_field.as_deref().into_iter().collect();
        Ok(self.ledger.compute_change_set(handle, record, &ignored))
    }

    /// Whether a flush would have anything to do
    pub fn is_dirty(&self) -> bool {
        if !self.scheduled_inserts.is_empty() || !self.scheduled_deletes.is_empty() {
            return true;
        }
        self.handles().any(|h| {
            self.slot(h)
                .map(|s| s.state == EntityState::Managed && s.is_initialized())
                .unwrap_or(false)
                && self.change_set(h).map(|cs| !cs.is_empty()).unwrap_or(false)
        })
    }

    pub fn stats(&self) -> ScopeStats {
        let mut stats = ScopeStats {
            instances: self.slots.len(),
            identity_map_entries: self.identity_map.len(),
            snapshots: self.ledger.len(),
            scheduled_inserts: self.scheduled_inserts.len(),
            scheduled_deletes: self.scheduled_deletes.len(),
            ..ScopeStats::default()
        };
        for slot in &self.slots {
            match slot.state {
                EntityState::New => stats.new += 1,
                EntityState::Managed => stats.managed += 1,
                EntityState::Removed => stats.removed += 1,
                EntityState::Detached => stats.detached += 1,
            }
            if slot.body.state() == ProxyState::Uninitialized {
                stats.uninitialized_proxies += 1;
            }
        }
        stats
    }
}
