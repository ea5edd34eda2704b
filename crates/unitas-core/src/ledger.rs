//! Change-tracking ledger
//!
//! Holds, per managed instance, a deep copy of the field values and
//! reference targets last synchronised with storage. Change sets are
//! computed by diffing the live record against that copy. Collections are
//! not snapshotted; their diff is the add/remove log kept by
//! [`PersistentCollection`](crate::model::PersistentCollection).

use std::collections::{BTreeMap, HashMap};

use crate::model::{EntityHandle, Record, Value};

/// Baseline of one instance
#[derive(Debug, Clone, PartialEq)]
pub struct Snapshot {
    pub(crate) fields: BTreeMap<String, Value>,
    pub(crate) references: BTreeMap<String, Option<EntityHandle>>,
}

impl Snapshot {
    fn of(record: &Record) -> Self {
        Self {
            fields: record.fields.clone(),
            references: record.references.clone(),
        }
    }

    pub fn field(&self, name: &str) -> Option<&Value> {
        self.fields.get(name)
    }

    pub fn reference(&self, name: &str) -> Option<EntityHandle> {
        self.references.get(name).copied().flatten()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct FieldChange {
    pub old: Value,
    pub new: Value,
}

/// Re-pointed to-one association, compared by instance identity
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReferenceChange {
    pub old: Option<EntityHandle>,
    pub new: Option<EntityHandle>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CollectionDiff {
    pub added: Vec<EntityHandle>,
    pub removed: Vec<EntityHandle>,
}

/// Field-level diff of one instance against its baseline
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ChangeSet {
    pub fields: BTreeMap<String, FieldChange>,
    pub references: BTreeMap<String, ReferenceChange>,
    pub collections: BTreeMap<String, CollectionDiff>,
}

impl ChangeSet {
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty() && self.references.is_empty() && self.collections.is_empty()
    }

    /// Names of every changed member, fields first
    pub fn changed_members(&self) -> Vec<&str> {
        self.fields
            .keys()
            .chain(self.references.keys())
            .chain(self.collections.keys())
            .map(String::as_str)
            .collect()
    }
}

#[derive(Debug, Default, Clone)]
pub struct Ledger {
    snapshots: HashMap<EntityHandle, Snapshot>,
}

impl Ledger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record `record` as the persisted baseline of `handle`
    pub fn snapshot(&mut self, handle: EntityHandle, record: &Record) {
        self.snapshots.insert(handle, Snapshot::of(record));
    }

    /// Fold a reference read after loading into the baseline of `handle`
    pub fn settle_reference(&mut self, handle: EntityHandle, name: &str, target: Option<EntityHandle>) {
        if let Some(snapshot) = self.snapshots.get_mut(&handle) {
            snapshot.references.insert(name.to_string(), target);
        }
    }

    pub fn get(&self, handle: EntityHandle) -> Option<&Snapshot> {
        self.snapshots.get(&handle)
    }

    pub fn contains(&self, handle: EntityHandle) -> bool {
        self.snapshots.contains_key(&handle)
    }

    pub fn forget(&mut self, handle: EntityHandle) -> Option<Snapshot> {
        self.snapshots.remove(&handle)
    }

    pub fn clear(&mut self) {
        self.snapshots.clear();
    }

    pub fn len(&self) -> usize {
        self.snapshots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.snapshots.is_empty()
    }

    /// Diff `record` against the baseline of `handle`
    ///
    /// Fields named in `ignored` are skipped (the version column is
    /// maintained by the commit path, not by callers). Without a baseline
    /// every field counts as changed.
    pub fn compute_change_set(
        &self,
        handle: EntityHandle,
        record: &Record,
        ignored: &[&str],
    ) -> ChangeSet {
        let empty = Snapshot {
            fields: BTreeMap::new(),
            references: BTreeMap::new(),
        };
        let base = self.snapshots.get(&handle).unwrap_or(&empty);
        let mut changes = ChangeSet::default();

        for (name, value) in &record.fields {
            if ignored.contains(&name.as_str()) {
                continue;
            }
            let old = base.fields.get(name).cloned().unwrap_or(Value::Null);
            if old != *value {
                changes.fields.insert(
                    name.clone(),
                    FieldChange {
                        old,
                        new: value.clone(),
                    },
                );
            }
        }

        for (name, target) in &record.references {
            let old = base.references.get(name).copied().flatten();
            if old != *target {
                changes.references.insert(
                    name.clone(),
                    ReferenceChange {
                        old,
                        new: *target,
                    },
                );
            }
        }

        for (name, coll) in &record.collections {
            if coll.is_dirty() {
                changes.collections.insert(
                    name.clone(),
                    CollectionDiff {
                        added: coll.added().to_vec(),
                        removed: coll.removed().to_vec(),
                    },
                );
            }
        }
        changes
    }
}
