//! Flush: turning tracked changes into ordered writes
//!
//! A flush runs in three stages.
//!
//! 1. Prepare: diff every managed instance against its baseline, re-run
//!    the persist cascade, apply orphan removal and reject references to
//!    unsaved instances. Nothing is written yet.
//! 2. Plan: order inserts so referenced rows come first, order deletes so
//!    referencing rows go first, and break nullable cycles with deferred
//!    foreign keys.
//! 3. Execute inside one backend transaction. On success the scope rolls
//!    forward (versions, baselines, registers); on failure the transaction
//!    is rolled back and generated keys are withdrawn, so the scope can be
//!    corrected and flushed again.

pub mod planner;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use serde::Serialize;
use tracing::{debug, warn};

use crate::backend::{LinkSide, PersistenceBackend, VersionGuard};
use crate::cascade::CascadeOp;
use crate::errors::{Result, UnitasError};
use crate::ledger::ChangeSet;
use crate::metadata::{EntityMetadata, JoinTableMetadata, Ownership};
use crate::model::{EntityHandle, EntityType, IdentityKey, KeyPart, PrimaryKey, Row, Value};
use crate::state::{invalid_state, EntityState};
use crate::uow::UnitOfWork;
use crate::{log_op_end, log_op_error, log_op_start};

use planner::{order_nodes, Dependency};

/// Statement counts of one successful flush
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct FlushReport {
    pub inserted: usize,
    pub updated: usize,
    pub deleted: usize,
    pub links_inserted: usize,
    pub links_deleted: usize,
    /// Foreign keys written in a second statement to break a cycle
    pub deferred_fixups: usize,
}

impl FlushReport {
    pub fn is_empty(&self) -> bool {
        *self == FlushReport::default()
    }
}

#[derive(Debug)]
struct PlannedInsert {
    handle: EntityHandle,
    /// Owning references inserted as NULL and fixed up afterwards
    deferred: Vec<String>,
}

/// One foreign key written separately from its row
#[derive(Debug)]
struct ReferenceWrite {
    handle: EntityHandle,
    association: String,
}

#[derive(Debug)]
struct PlannedUpdate {
    handle: EntityHandle,
    fields: Vec<String>,
    references: Vec<String>,
}

#[derive(Debug)]
struct LinkChange {
    join: JoinTableMetadata,
    owner: EntityHandle,
    target: EntityHandle,
}

#[derive(Debug, Default)]
struct CommitPlan {
    inserts: Vec<PlannedInsert>,
    fixups: Vec<ReferenceWrite>,
    updates: Vec<PlannedUpdate>,
    link_removals: Vec<LinkChange>,
    link_additions: Vec<LinkChange>,
    /// References cleared before deletes to break a cycle among them
    nullings: Vec<ReferenceWrite>,
    deletes: Vec<EntityHandle>,
}

impl CommitPlan {
    fn is_empty(&self) -> bool {
        self.inserts.is_empty()
            && self.updates.is_empty()
            && self.link_removals.is_empty()
            && self.link_additions.is_empty()
            && self.deletes.is_empty()
    }
}

impl<B: PersistenceBackend> UnitOfWork<B> {
    /// Write every pending change in one transaction
    ///
    /// # Errors
    ///
    /// Returns `InvalidState` for references to unsaved instances or changed
    /// identifiers, `CommitOrder` for cycles of required references,
    /// `OptimisticLock` when a versioned row changed underneath,
    /// `EntityNotFound` when an unversioned row is gone, and any backend
    /// error. After an error nothing is committed and the scope is
    /// left as it was before the call, apart from orphan removals and
    /// persist cascades applied during preparation.
    pub fn flush(&mut self) -> Result<FlushReport> {
        let started = Instant::now();
        log_op_start!(
            "flush",
            scope_id = self.scope_id.as_str(),
            scheduled_inserts = self.scheduled_inserts.len(),
            scheduled_deletes = self.scheduled_deletes.len()
        );
        let result = self.flush_inner();
        let duration_ms = started.elapsed().as_millis() as u64;
        match &result {
            Ok(report) => log_op_end!(
                "flush",
                duration_ms = duration_ms,
                scope_id = self.scope_id.as_str(),
                inserted = report.inserted,
                updated = report.updated,
                deleted = report.deleted,
                links_inserted = report.links_inserted,
                links_deleted = report.links_deleted,
                deferred_fixups = report.deferred_fixups
            ),
            Err(err) => log_op_error!(
                "flush",
                err,
                duration_ms = duration_ms,
                scope_id = self.scope_id.as_str()
            ),
        }
        result
    }

    fn flush_inner(&mut self) -> Result<FlushReport> {
        let changes = self.pending_changes()?;
        self.cascade_persist_on_flush()?;
        self.remove_orphans(&changes)?;
        self.check_transient_references()?;
        let changes: Vec<(EntityHandle, ChangeSet)> = changes
            .into_iter()
            .filter(|(h, _)| self.slot(*h).map(|s| s.state == EntityState::Managed).unwrap_or(false))
            .collect();

        let plan = self.plan_commit(&changes)?;
        if plan.is_empty() {
            debug!(scope_id = self.scope_id.as_str(), "nothing to write");
            self.roll_forward(&plan)?;
            return Ok(FlushReport::default());
        }
        for update in &plan.updates {
            self.fire(update.handle, |l, e| l.pre_update(e))?;
        }

        self.backend.begin_transaction()?;
        let mut generated = Vec::new();
        let outcome = match self.execute_plan(&plan, &mut generated) {
            Ok(report) => self.backend.commit().map(|()| report),
            Err(err) => Err(err),
        };
        match outcome {
            Ok(report) => {
                self.roll_forward(&plan)?;
                Ok(report)
            }
            Err(err) => {
                if let Err(rollback_err) = self.backend.rollback() {
                    warn!(
                        scope_id = self.scope_id.as_str(),
                        error = %rollback_err,
                        "rollback after failed flush also failed"
                    );
                }
                self.recover(&generated);
                Err(err)
            }
        }
    }

    // ----- prepare -----

    fn pending_changes(&self) -> Result<Vec<(EntityHandle, ChangeSet)>> {
        let mut changes = Vec::new();
        for handle in self.handles() {
            let slot = self.slot(handle)?;
            if slot.state != EntityState::Managed
                || !slot.is_initialized()
                || self.is_pending_insert(handle)
            {
                continue;
            }
            let change_set = self.change_set(handle)?;
            if !change_set.is_empty() {
                changes.push((handle, change_set));
            }
        }
        Ok(changes)
    }

    fn cascade_persist_on_flush(&mut self) -> Result<()> {
        let roots: Vec<EntityHandle> = self
            .handles()
            .filter(|h| self.contains(*h))
            .collect();
        if roots.is_empty() {
            return Ok(());
        }
        let graph = self.cascade_graph_from(roots, CascadeOp::Persist)?;
        self.persist_graph(&graph, None)
    }

    fn remove_orphans(&mut self, changes: &[(EntityHandle, ChangeSet)]) -> Result<()> {
        let registry = Arc::clone(&self.registry);
        for (handle, change_set) in changes {
            let meta = registry.get(&self.slot(*handle)?.entity_type)?;
            let mut orphans = Vec::new();
            for (name, diff) in &change_set.collections {
                if meta.association(name).map(|a| a.orphan_removal).unwrap_or(false) {
                    orphans.extend(diff.removed.iter().copied());
                }
            }
            for (name, change) in &change_set.references {
                if !meta.association(name).map(|a| a.orphan_removal).unwrap_or(false) {
                    continue;
                }
                if let Some(old) = change.old {
                    if change.new != Some(old) {
                        orphans.push(old);
                    }
                }
            }
            for orphan in orphans {
                if self.contains(orphan) {
                    debug!(
                        scope_id = self.scope_id.as_str(),
                        parent = %self.describe(*handle),
                        orphan = %self.describe(orphan),
                        "removing orphan"
                    );
                    self.remove_inner(orphan)?;
                }
            }
        }
        Ok(())
    }

    fn check_transient_references(&self) -> Result<()> {
        for handle in self.handles() {
            let slot = self.slot(handle)?;
            if slot.state != EntityState::Managed {
                continue;
            }
            let Some(record) = slot.record() else {
                continue;
            };
            let meta = self.registry.get(&slot.entity_type)?;
            for assoc in meta.associations.iter().filter(|a| a.is_owning()) {
                let targets: Vec<EntityHandle> = if assoc.is_to_one() {
                    record.reference(&assoc.name).into_iter().collect()
                } else {
                    record
                        .collection(&assoc.name)
                        .map(|c| c.items().to_vec())
                        .unwrap_or_default()
                };
                for target in targets {
                    if self.slot(target)?.state == EntityState::New {
                        return Err(invalid_state(
                            "flush",
                            slot.describe(handle),
                            slot.state,
                            format!(
                                "'{}' references unsaved instance {}; persist it or cascade persist",
                                assoc.name,
                                self.describe(target)
                            ),
                        ));
                    }
                }
            }
        }
        Ok(())
    }

    // ----- plan -----

    fn plan_commit(&self, changes: &[(EntityHandle, ChangeSet)]) -> Result<CommitPlan> {
        let mut plan = CommitPlan::default();
        self.plan_inserts(&mut plan)?;
        self.plan_updates(&mut plan, changes)?;
        self.plan_links(&mut plan)?;
        self.plan_deletes(&mut plan)?;
        debug!(
            scope_id = self.scope_id.as_str(),
            inserts = plan.inserts.len(),
            updates = plan.updates.len(),
            deletes = plan.deletes.len(),
            fixups = plan.fixups.len() + plan.nullings.len(),
            "commit planned"
        );
        Ok(plan)
    }

    fn commit_order_error(&self, handles: impl IntoIterator<Item = EntityHandle>) -> UnitasError {
        UnitasError::CommitOrder {
            entities: handles.into_iter().map(|h| self.describe(h)).collect(),
        }
    }

    fn plan_inserts(&self, plan: &mut CommitPlan) -> Result<()> {
        let inserts = self.scheduled_inserts.clone();
        let index: HashMap<EntityHandle, usize> =
            inserts.iter().enumerate().map(|(i, h)| (*h, i)).collect();
        let mut deps = Vec::new();
        let mut dep_names = Vec::new();
        let mut deferred: HashMap<usize, Vec<String>> = HashMap::new();

        for (i, &handle) in inserts.iter().enumerate() {
            let slot = self.slot(handle)?;
            let meta = self.registry.get(&slot.entity_type)?;
            let Some(record) = slot.record() else {
                continue;
            };
            for assoc in &meta.associations {
                let Some((_, nullable)) = assoc.join_column() else {
                    continue;
                };
                let Some(target) = record.reference(&assoc.name) else {
                    continue;
                };
                if target == handle {
                    // a row can name itself only once its own key is known
                    if meta.is_generated() {
                        if !nullable {
                            return Err(self.commit_order_error([handle]));
                        }
                        deferred.entry(i).or_default().push(assoc.name.clone());
                    }
                    continue;
                }
                if let Some(&j) = index.get(&target) {
                    deps.push(Dependency {
                        dependent: i,
                        prerequisite: j,
                        nullable,
                    });
                    dep_names.push(assoc.name.clone());
                }
            }
        }

        let ordering = order_nodes(inserts.len(), &deps)
            .map_err(|stuck| self.commit_order_error(stuck.into_iter().map(|i| inserts[i])))?;
        for d in ordering.deferred {
            deferred
                .entry(deps[d].dependent)
                .or_default()
                .push(dep_names[d].clone());
        }
        for i in ordering.order {
            let names = deferred.remove(&i).unwrap_or_default();
            for name in &names {
                plan.fixups.push(ReferenceWrite {
                    handle: inserts[i],
                    association: name.clone(),
                });
            }
            plan.inserts.push(PlannedInsert {
                handle: inserts[i],
                deferred: names,
            });
        }
        Ok(())
    }

    fn plan_updates(&self, plan: &mut CommitPlan, changes: &[(EntityHandle, ChangeSet)]) -> Result<()> {
        for (handle, change_set) in changes {
            let slot = self.slot(*handle)?;
            let meta = self.registry.get(&slot.entity_type)?;
            if let Some(id) = change_set.fields.keys().find(|f| meta.is_id_field(f)) {
                return Err(invalid_state(
                    "flush",
                    slot.describe(*handle),
                    slot.state,
                    format!("identifier field '{}' was changed", id),
                ));
            }
            let fields: Vec<String> = change_set
                .fields
                .keys()
                .filter(|f| !meta.is_version_field(f))
                .cloned()
                .collect();
            let references: Vec<String> = change_set
                .references
                .keys()
                .filter(|name| {
                    meta.association(name)
                        .and_then(|a| a.join_column())
                        .is_some()
                })
                .cloned()
                .collect();
            if fields.is_empty() && references.is_empty() {
                continue;
            }
            plan.updates.push(PlannedUpdate {
                handle: *handle,
                fields,
                references,
            });
        }
        Ok(())
    }

    fn plan_links(&self, plan: &mut CommitPlan) -> Result<()> {
        for handle in self.handles() {
            let slot = self.slot(handle)?;
            if slot.state != EntityState::Managed {
                continue;
            }
            let Some(record) = slot.record() else {
                continue;
            };
            let meta = self.registry.get(&slot.entity_type)?;
            for assoc in &meta.associations {
                let Some(join) = assoc.join_table() else {
                    continue;
                };
                let Some(coll) = record.collection(&assoc.name) else {
                    continue;
                };
                for &target in coll.removed() {
                    plan.link_removals.push(LinkChange {
                        join: join.clone(),
                        owner: handle,
                        target,
                    });
                }
                for &target in coll.added() {
                    plan.link_additions.push(LinkChange {
                        join: join.clone(),
                        owner: handle,
                        target,
                    });
                }
            }
        }
        Ok(())
    }

    /// Children before parents, using the references each removed row was
    /// last stored with
    fn plan_deletes(&self, plan: &mut CommitPlan) -> Result<()> {
        let deletes = self.scheduled_deletes.clone();
        let index: HashMap<EntityHandle, usize> =
            deletes.iter().enumerate().map(|(i, h)| (*h, i)).collect();
        let mut deps = Vec::new();
        let mut dep_names = Vec::new();

        for (i, &handle) in deletes.iter().enumerate() {
            let meta = self.registry.get(&self.slot(handle)?.entity_type)?;
            let Some(snapshot) = self.ledger.get(handle) else {
                continue;
            };
            for assoc in &meta.associations {
                let Some((_, nullable)) = assoc.join_column() else {
                    continue;
                };
                let Some(target) = snapshot.reference(&assoc.name) else {
                    continue;
                };
                if target == handle {
                    continue;
                }
                if let Some(&j) = index.get(&target) {
                    deps.push(Dependency {
                        dependent: j,
                        prerequisite: i,
                        nullable,
                    });
                    dep_names.push(assoc.name.clone());
                }
            }
        }

        let ordering = order_nodes(deletes.len(), &deps)
            .map_err(|stuck| self.commit_order_error(stuck.into_iter().map(|i| deletes[i])))?;
        for d in ordering.deferred {
            plan.nullings.push(ReferenceWrite {
                handle: deletes[deps[d].prerequisite],
                association: dep_names[d].clone(),
            });
        }
        plan.deletes = ordering.order.into_iter().map(|i| deletes[i]).collect();
        Ok(())
    }

    // ----- execute -----

    fn key_of(&self, handle: EntityHandle) -> Result<PrimaryKey> {
        self.identifier(handle)?.ok_or_else(|| {
            invalid_state(
                "flush",
                self.describe(handle),
                self.slot(handle).map(|s| s.state).unwrap_or(EntityState::New),
                "instance has no identifier",
            )
        })
    }

    fn single_key_of(&self, handle: EntityHandle) -> Result<KeyPart> {
        let key = self.key_of(handle)?;
        key.single().cloned().ok_or_else(|| {
            UnitasError::mapping(format!(
                "{} cannot be referenced through a single column",
                self.describe(handle)
            ))
        })
    }

    fn foreign_key(&self, target: Option<EntityHandle>) -> Result<Value> {
        match target {
            Some(target) => Ok(self.single_key_of(target)?.to_value()),
            None => Ok(Value::Null),
        }
    }

    fn reference_column<'m>(meta: &'m EntityMetadata, association: &str) -> Result<&'m str> {
        meta.require_association(association)?
            .join_column()
            .map(|(column, _)| column)
            .ok_or_else(|| {
                UnitasError::mapping(format!(
                    "{}.{} has no join column",
                    meta.entity_type, association
                ))
            })
    }

    fn current_reference(&self, handle: EntityHandle, association: &str) -> Result<Option<EntityHandle>> {
        Ok(self
            .slot(handle)?
            .record()
            .and_then(|r| r.reference(association)))
    }

    fn insert_row(&self, meta: &EntityMetadata, insert: &PlannedInsert) -> Result<Row> {
        let slot = self.slot(insert.handle)?;
        let record = slot.record().ok_or_else(|| {
            invalid_state("flush", slot.describe(insert.handle), slot.state, "instance is not loaded")
        })?;
        let mut row = Row::new();
        for field in &meta.fields {
            if meta.is_version_field(&field.name) {
                row.insert(field.column.clone(), Value::Int(self.config.initial_version));
                continue;
            }
            let value = record.field(&field.name).cloned().unwrap_or(Value::Null);
            if meta.is_generated() && meta.is_id_field(&field.name) && value.is_null() {
                continue;
            }
            row.insert(field.column.clone(), value);
        }
        for assoc in &meta.associations {
            let Some((column, _)) = assoc.join_column() else {
                continue;
            };
            let value = if insert.deferred.contains(&assoc.name) {
                Value::Null
            } else {
                self.foreign_key(record.reference(&assoc.name))?
            };
            row.insert(column.to_string(), value);
        }
        Ok(row)
    }

    fn assign_generated_key(
        &mut self,
        handle: EntityHandle,
        meta: &EntityMetadata,
        part: KeyPart,
        generated: &mut Vec<EntityHandle>,
    ) -> Result<()> {
        let key = PrimaryKey::from(part.clone());
        let slot = self.slot_mut(handle)?;
        if let Some(record) = slot.record_mut() {
            for id in &meta.id_fields {
                record.fields.insert(id.clone(), part.to_value());
            }
        }
        slot.key = Some(key.clone());
        generated.push(handle);
        self.identity_map
            .register(IdentityKey::new(meta.entity_type.clone(), key), handle)
    }

    /// Guard on the version the instance was last stored with
    fn version_guard(&self, meta: &EntityMetadata, handle: EntityHandle) -> Option<VersionGuard> {
        let field = meta.version_field.as_deref()?;
        let column = meta.field(field)?.column.clone();
        let expected = self.ledger.get(handle)?.field(field)?.clone();
        if expected.is_null() {
            return None;
        }
        Some(VersionGuard { column, expected })
    }

    /// A guarded row that matched nothing lost a race; an unguarded one is gone
    fn stale_row_error(&self, meta: &EntityMetadata, key: PrimaryKey, guard: Option<&VersionGuard>) -> UnitasError {
        let key = IdentityKey::new(meta.entity_type.clone(), key);
        match guard {
            Some(guard) => UnitasError::OptimisticLock {
                key,
                expected: guard.expected.to_string(),
            },
            None => UnitasError::EntityNotFound { key },
        }
    }

    fn execute_plan(&mut self, plan: &CommitPlan, generated: &mut Vec<EntityHandle>) -> Result<FlushReport> {
        let registry = Arc::clone(&self.registry);
        let mut report = FlushReport::default();

        for insert in &plan.inserts {
            let meta = registry.get(&self.slot(insert.handle)?.entity_type)?;
            let row = self.insert_row(meta, insert)?;
            let key = self.backend.execute_insert(meta, &row)?;
            if meta.is_generated() {
                let part = key.ok_or_else(|| {
                    UnitasError::backend(
                        "execute_insert",
                        format!("no key was generated for {}", meta.entity_type),
                    )
                })?;
                self.assign_generated_key(insert.handle, meta, part, generated)?;
            }
            report.inserted += 1;
        }

        for fixup in &plan.fixups {
            self.write_reference(fixup, true)?;
            report.deferred_fixups += 1;
        }

        for update in &plan.updates {
            let meta = registry.get(&self.slot(update.handle)?.entity_type)?;
            let key = self.key_of(update.handle)?;
            let mut changes = Row::new();
            for name in &update.fields {
                let value = self
                    .slot(update.handle)?
                    .record()
                    .and_then(|r| r.field(name).cloned())
                    .unwrap_or(Value::Null);
                changes.insert(meta.require_field(name)?.column.clone(), value);
            }
            for name in &update.references {
                let column = Self::reference_column(meta, name)?;
                let value = self.foreign_key(self.current_reference(update.handle, name)?)?;
                changes.insert(column.to_string(), value);
            }
            let guard = self.version_guard(meta, update.handle);
            if let Some(guard) = &guard {
                let next = guard.expected.as_int().unwrap_or(0) + 1;
                changes.insert(guard.column.clone(), Value::Int(next));
            } else if let Some(column) = meta.version_column() {
                changes.insert(column.to_string(), Value::Int(self.config.initial_version));
            }
            let rows = self
                .backend
                .execute_update(meta, &key, &changes, guard.as_ref())?;
            if rows == 0 {
                return Err(self.stale_row_error(meta, key, guard.as_ref()));
            }
            report.updated += 1;
        }

        for link in &plan.link_removals {
            let owner = self.single_key_of(link.owner)?;
            let target = self.single_key_of(link.target)?;
            report.links_deleted += self.backend.delete_link(&link.join, &owner, &target)? as usize;
        }
        for link in &plan.link_additions {
            let owner = self.single_key_of(link.owner)?;
            let target = self.single_key_of(link.target)?;
            self.backend.insert_link(&link.join, &owner, &target)?;
            report.links_inserted += 1;
        }

        for nulling in &plan.nullings {
            self.write_reference(nulling, false)?;
            report.deferred_fixups += 1;
        }

        // link rows go before any entity row they point at
        for &handle in &plan.deletes {
            let meta = registry.get(&self.slot(handle)?.entity_type)?;
            for assoc in &meta.associations {
                let (join, side) = match &assoc.ownership {
                    Ownership::JoinTable(join) => (join, LinkSide::Owner),
                    Ownership::Inverse { mapped_by } => {
                        let owner = registry.get(&assoc.target)?.require_association(mapped_by)?;
                        match owner.join_table() {
                            Some(join) => (join, LinkSide::Target),
                            None => continue,
                        }
                    }
                    Ownership::Owning { .. } => continue,
                };
                let part = self.single_key_of(handle)?;
                report.links_deleted += self.backend.delete_links(join, side, &part)? as usize;
            }
        }
        for &handle in &plan.deletes {
            let meta = registry.get(&self.slot(handle)?.entity_type)?;
            let key = self.key_of(handle)?;
            let guard = self.version_guard(meta, handle);
            let rows = self.backend.execute_delete(meta, &key, guard.as_ref())?;
            if rows == 0 {
                return Err(self.stale_row_error(meta, key, guard.as_ref()));
            }
            report.deleted += 1;
        }
        Ok(report)
    }

    /// Write one foreign key on its own: the current target, or NULL
    fn write_reference(&mut self, write: &ReferenceWrite, current: bool) -> Result<()> {
        let registry = Arc::clone(&self.registry);
        let meta = registry.get(&self.slot(write.handle)?.entity_type)?;
        let column = Self::reference_column(meta, &write.association)?;
        let value = if current {
            self.foreign_key(self.current_reference(write.handle, &write.association)?)?
        } else {
            Value::Null
        };
        let key = self.key_of(write.handle)?;
        let mut changes = Row::new();
        changes.insert(column.to_string(), value);
        let rows = self.backend.execute_update(meta, &key, &changes, None)?;
        if rows == 0 {
            return Err(self.stale_row_error(meta, key, None));
        }
        Ok(())
    }

    // ----- finish -----

    fn roll_forward(&mut self, plan: &CommitPlan) -> Result<()> {
        let registry = Arc::clone(&self.registry);
        let initial = self.config.initial_version;

        for insert in &plan.inserts {
            let slot = &mut self.slots[insert.handle.index()];
            let meta = registry.get(&slot.entity_type)?;
            if let (Some(field), Some(record)) = (meta.version_field.as_ref(), slot.record_mut()) {
                record.fields.insert(field.clone(), Value::Int(initial));
            }
        }
        for update in &plan.updates {
            let meta = registry.get(&self.slot(update.handle)?.entity_type)?;
            let Some(field) = meta.version_field.as_ref() else {
                continue;
            };
            let next = match self.version_guard(meta, update.handle) {
                Some(guard) => guard.expected.as_int().unwrap_or(0) + 1,
                None => initial,
            };
            if let Some(record) = self.slots[update.handle.index()].record_mut() {
                record.fields.insert(field.clone(), Value::Int(next));
            }
        }
        for &handle in &plan.deletes {
            let slot = &mut self.slots[handle.index()];
            slot.state = EntityState::Detached;
            if let Some(key) = slot.identity_key() {
                self.identity_map.forget_if(&key, handle);
            }
            self.ledger.forget(handle);
        }
        self.scheduled_inserts.clear();
        self.scheduled_deletes.clear();

        let handles: Vec<EntityHandle> = self.handles().collect();
        for handle in handles {
            let slot = &mut self.slots[handle.index()];
            if slot.state != EntityState::Managed {
                continue;
            }
            if let Some(record) = slot.record_mut() {
                for coll in record.collections.values_mut() {
                    coll.mark_synchronized();
                }
                self.ledger.snapshot(handle, record);
            }
        }
        Ok(())
    }

    /// Undo in-memory effects of a failed flush
    fn recover(&mut self, generated: &[EntityHandle]) {
        let registry = Arc::clone(&self.registry);
        for &handle in generated.iter().rev() {
            let slot = &mut self.slots[handle.index()];
            if let Some(key) = slot.identity_key() {
                self.identity_map.forget_if(&key, handle);
            }
            slot.key = None;
            if let (Ok(meta), Some(record)) = (registry.get(&slot.entity_type), slot.record_mut()) {
                for id in &meta.id_fields {
                    record.fields.insert(id.clone(), Value::Null);
                }
            }
        }
        if self.config.resync_collections_on_failure {
            self.resync_link_collections();
        }
        debug!(
            scope_id = self.scope_id.as_str(),
            withdrawn_keys = generated.len(),
            "scope restored after failed flush"
        );
    }

    /// Re-diff owning link collections against what storage holds now
    fn resync_link_collections(&mut self) {
        let registry = Arc::clone(&self.registry);
        let handles: Vec<EntityHandle> = self.handles().collect();
        for handle in handles {
            let Ok(slot) = self.slot(handle) else {
                continue;
            };
            if slot.state != EntityState::Managed || self.is_pending_insert(handle) {
                continue;
            }
            let Some(part) = slot.key.as_ref().and_then(|k| k.single()).cloned() else {
                continue;
            };
            let Some(record) = slot.record() else {
                continue;
            };
            let Ok(meta) = registry.get(&slot.entity_type) else {
                continue;
            };
            let owned: Vec<(String, JoinTableMetadata, EntityType)> = meta
                .associations
                .iter()
                .filter(|a| {
                    record
                        .collection(&a.name)
                        .map(|c| c.is_initialized())
                        .unwrap_or(false)
                })
                .filter_map(|a| a.join_table().map(|j| (a.name.clone(), j.clone(), a.target.clone())))
                .collect();

            for (name, join, target_type) in owned {
                let keys = match self.backend.fetch_links(&join, LinkSide::Owner, &part) {
                    Ok(keys) => keys,
                    Err(err) => {
                        warn!(
                            scope_id = self.scope_id.as_str(),
                            association = name.as_str(),
                            error = %err,
                            "could not resync collection"
                        );
                        continue;
                    }
                };
                let mut persisted = Vec::with_capacity(keys.len());
                for key in keys {
                    if let Ok(target) = self.reference_to(target_type.clone(), PrimaryKey::from(key)) {
                        persisted.push(target);
                    }
                }
                if let Some(coll) = self.slots[handle.index()]
                    .record_mut()
                    .and_then(|r| r.collections.get_mut(&name))
                {
                    coll.resync(&persisted);
                }
            }
        }
    }
}
