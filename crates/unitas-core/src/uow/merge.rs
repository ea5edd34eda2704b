//! Reattaching detached state
//!
//! Merge runs in two passes. The first walks the merge cascade and pairs
//! every NEW or DETACHED source with its managed counterpart, loading or
//! creating it. The second pass stages the copies, remapping references and
//! collections through the pairing, and fills only the freshly created
//! counterparts so they can be validated. Existing managed instances are
//! overwritten only once every created instance passed its checks, so a
//! failed merge leaves the scope unchanged apart from rows read on the way.

use std::collections::HashMap;
use std::sync::Arc;

use tracing::debug;

use super::UnitOfWork;
use crate::backend::PersistenceBackend;
use crate::cascade::{cascade_targets, CascadeOp, CascadeWalk};
use crate::errors::{Result, UnitasError};
use crate::model::{EntityHandle, IdentityKey, Value};
use crate::proxy::EntitySlot;
use crate::state::{invalid_state, EntityState};

impl<B: PersistenceBackend> UnitOfWork<B> {
    /// Copy the state of a detached or new instance onto its managed
    /// counterpart and return that counterpart
    ///
    /// The source itself is left untouched. A MANAGED source is returned
    /// as is.
    ///
    /// # Errors
    ///
    /// Returns `EntityNotFound` when a detached source's row is gone,
    /// `OptimisticLock` when its version is stale and `InvalidState` for
    /// removed instances or references to unsaved instances.
    pub fn merge(&mut self, handle: EntityHandle) -> Result<EntityHandle> {
        self.instrumented("merge", |uow| uow.merge_inner(handle))
    }

    fn merge_inner(&mut self, root: EntityHandle) -> Result<EntityHandle> {
        let state = self.slot(root)?.state;
        match state {
            EntityState::Managed => return Ok(root),
            EntityState::Removed => {
                return Err(invalid_state(
                    "merge",
                    self.describe(root),
                    state,
                    "instance is scheduled for removal",
                ))
            }
            EntityState::New | EntityState::Detached => {}
        }

        let registry = Arc::clone(&self.registry);
        let mut pairs: HashMap<EntityHandle, EntityHandle> = HashMap::new();
        let mut order: Vec<EntityHandle> = Vec::new();
        let mut created: Vec<EntityHandle> = Vec::new();
        let mut walk = CascadeWalk::new(root);

        while let Some(source) = walk.next_handle() {
            let state = self.slot(source)?.state;
            let target = match state {
                EntityState::Managed => source,
                EntityState::Removed => {
                    return Err(invalid_state(
                        "merge",
                        self.describe(source),
                        state,
                        "reached by merge cascade while scheduled for removal",
                    ))
                }
                EntityState::New | EntityState::Detached => {
                    let target = self.counterpart(source, &mut created)?;
                    order.push(source);
                    target
                }
            };
            pairs.insert(source, target);
            if state != EntityState::Managed {
                let slot = self.slot(source)?;
                if let Some(record) = slot.record() {
                    let meta = registry.get(&slot.entity_type)?;
                    walk.extend(cascade_targets(meta, record, CascadeOp::Merge));
                }
            }
        }

        let mut staged = Vec::with_capacity(order.len());
        for source in order {
            let target = pairs[&source];
            if let Some(copy) = self.stage_copy(source, target, &pairs)? {
                staged.push((target, copy));
            }
        }

        // fresh counterparts are unreachable until activated
        for (target, copy) in staged.iter().filter(|(t, _)| created.contains(t)) {
            self.apply_copy(*target, copy.clone())?;
        }
        let mut prepared = Vec::with_capacity(created.len());
        let mut claimed: HashMap<IdentityKey, EntityHandle> = HashMap::new();
        for &handle in &created {
            let key = self.prepare_new(handle)?;
            if let Some(ikey) = &key {
                if claimed.insert(ikey.clone(), handle).is_some() {
                    return Err(UnitasError::Conflict { key: ikey.clone() });
                }
            }
            prepared.push((handle, key));
        }

        for (target, copy) in staged.into_iter().filter(|(t, _)| !created.contains(t)) {
            self.apply_copy(target, copy)?;
        }
        for (handle, key) in prepared {
            self.activate_new(handle, key)?;
        }
        Ok(pairs[&root])
    }

    /// Managed instance that `source` maps onto, loading or creating it
    fn counterpart(&mut self, source: EntityHandle, created: &mut Vec<EntityHandle>) -> Result<EntityHandle> {
        let registry = Arc::clone(&self.registry);
        let slot = self.slot(source)?;
        let state = slot.state;
        let entity_type = slot.entity_type.clone();
        let meta = registry.get(&entity_type)?;
        let key = match &slot.key {
            Some(key) => Some(key.clone()),
            None => slot.record().and_then(|r| meta.key_from_fields(&r.fields)),
        };

        if let Some(key) = key {
            let ikey = IdentityKey::new(entity_type.clone(), key.clone());
            let existing = match self.identity_map.lookup(&ikey) {
                Some(existing) => Some(existing),
                None => match self.backend.fetch_by_key(meta, &key)? {
                    Some(row) => Some(self.materialize(entity_type.clone(), row)?),
                    None => None,
                },
            };
            match existing {
                Some(existing) => {
                    let existing_state = self.slot(existing)?.state;
                    if existing_state == EntityState::Removed {
                        return Err(invalid_state(
                            "merge",
                            ikey,
                            existing_state,
                            "managed counterpart is scheduled for removal",
                        ));
                    }
                    self.drain_load_queue()?;
                    self.ensure_loaded(existing)?;
                    self.check_merge_version(source, existing, &ikey)?;
                    return Ok(existing);
                }
                None if state == EntityState::Detached => {
                    return Err(UnitasError::EntityNotFound { key: ikey });
                }
                None => {}
            }
        }

        let record = Self::empty_record(meta);
        let handle = self.alloc(EntitySlot::new_entity(entity_type, record));
        created.push(handle);
        debug!(
            scope_id = self.scope_id.as_str(),
            source = %self.describe(source),
            "merge creates a new instance"
        );
        Ok(handle)
    }

    fn check_merge_version(&self, source: EntityHandle, target: EntityHandle, ikey: &IdentityKey) -> Result<()> {
        let meta = self.registry.get(ikey.entity_type())?;
        let Some(version_field) = meta.version_field.as_deref() else {
            return Ok(());
        };
        let Some(theirs) = self.slot(source)?.record().and_then(|r| r.field(version_field)) else {
            return Ok(());
        };
        if theirs.is_null() {
            return Ok(());
        }
        let ours = self.slot(target)?.record().and_then(|r| r.field(version_field));
        if ours != Some(theirs) {
            return Err(UnitasError::OptimisticLock {
                key: ikey.clone(),
                expected: theirs.to_string(),
            });
        }
        Ok(())
    }

    /// Managed handle a source reference should point at after merge
    fn remap(&mut self, target: EntityHandle, pairs: &HashMap<EntityHandle, EntityHandle>) -> Result<EntityHandle> {
        if let Some(mapped) = pairs.get(&target) {
            return Ok(*mapped);
        }
        let slot = self.slot(target)?;
        if slot.state.is_tracked() {
            return Ok(target);
        }
        match self.identifier(target)? {
            Some(key) => {
                let entity_type = slot.entity_type.clone();
                self.reference_to(entity_type, key)
            }
            None => Err(invalid_state(
                "merge",
                self.describe(target),
                slot.state,
                "references an unsaved instance that is not merged along",
            )),
        }
    }

    /// Everything `source` contributes to `target`, with references remapped
    fn stage_copy(
        &mut self,
        source: EntityHandle,
        target: EntityHandle,
        pairs: &HashMap<EntityHandle, EntityHandle>,
    ) -> Result<Option<StagedCopy>> {
        // an uninitialised detached placeholder carries nothing to copy
        let Some(incoming) = self.slot(source)?.record().cloned() else {
            return Ok(None);
        };
        let registry = Arc::clone(&self.registry);
        let meta = registry.get(&self.slot(target)?.entity_type)?;
        let keyed = self.slot(target)?.key.is_some();

        let mut references = Vec::new();
        for assoc in meta.associations.iter().filter(|a| a.is_to_one()) {
            if !incoming.is_resolved(&assoc.name) {
                continue;
            }
            let mapped = match incoming.reference(&assoc.name) {
                Some(t) => Some(self.remap(t, pairs)?),
                None => None,
            };
            references.push((assoc.name.clone(), mapped));
        }
        let mut collections = Vec::new();
        for assoc in meta.associations.iter().filter(|a| !a.is_to_one()) {
            let Some(coll) = incoming.collection(&assoc.name).filter(|c| c.is_initialized()) else {
                continue;
            };
            let mut desired = Vec::with_capacity(coll.len());
            for item in coll.items() {
                desired.push(self.remap(*item, pairs)?);
            }
            self.ensure_collection(target, &assoc.name)?;
            collections.push((assoc.name.clone(), desired));
        }

        let fields = incoming
            .fields()
            .iter()
            .filter(|(name, _)| !(meta.is_version_field(name) || (keyed && meta.is_id_field(name))))
            .map(|(name, value)| (name.clone(), value.clone()))
            .collect();
        Ok(Some(StagedCopy {
            fields,
            references,
            collections,
        }))
    }

    fn apply_copy(&mut self, target: EntityHandle, copy: StagedCopy) -> Result<()> {
        let Some(record) = self.slot_mut(target)?.record_mut() else {
            return Ok(());
        };
        record.fields.extend(copy.fields);
        for (name, mapped) in copy.references {
            record.put_reference(&name, mapped);
        }
        for (name, desired) in copy.collections {
            if let Some(current) = record.collections.get_mut(&name) {
                let stale: Vec<EntityHandle> = current
                    .items()
                    .iter()
                    .filter(|h| !desired.contains(h))
                    .copied()
                    .collect();
                for item in stale {
                    current.remove(item);
                }
                for item in desired {
                    current.add(item);
                }
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone)]
struct StagedCopy {
    fields: Vec<(String, Value)>,
    references: Vec<(String, Option<EntityHandle>)>,
    collections: Vec<(String, Vec<EntityHandle>)>,
}
