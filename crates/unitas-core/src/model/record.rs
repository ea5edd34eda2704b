//! Entity bodies and persistent collections

use std::collections::{BTreeMap, BTreeSet};

use super::handle::EntityHandle;
use super::value::Value;

/// Loaded state of one entity
///
/// Scalar fields are keyed by field name (not column). To-one associations
/// hold the handle of the target instance, to-many associations hold a
/// [`PersistentCollection`]. Lazy inverse to-one associations stay
/// unresolved until first read, since their key lives on the other row.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Record {
    pub(crate) fields: BTreeMap<String, Value>,
    pub(crate) references: BTreeMap<String, Option<EntityHandle>>,
    pub(crate) collections: BTreeMap<String, PersistentCollection>,
    pub(crate) unresolved: BTreeSet<String>,
}

impl Record {
    pub fn field(&self, name: &str) -> Option<&Value> {
        self.fields.get(name)
    }

    pub fn fields(&self) -> &BTreeMap<String, Value> {
        &self.fields
    }

    /// Target of a to-one association; `None` when unset or unknown
    pub fn reference(&self, name: &str) -> Option<EntityHandle> {
        self.references.get(name).copied().flatten()
    }

    pub fn references(&self) -> &BTreeMap<String, Option<EntityHandle>> {
        &self.references
    }

    /// Whether a to-one association has been read (or assigned)
    pub fn is_resolved(&self, name: &str) -> bool {
        !self.unresolved.contains(name)
    }

    pub(crate) fn put_reference(&mut self, name: &str, target: Option<EntityHandle>) {
        self.unresolved.remove(name);
        self.references.insert(name.to_string(), target);
    }

    pub fn collection(&self, name: &str) -> Option<&PersistentCollection> {
        self.collections.get(name)
    }

    pub fn collections(&self) -> &BTreeMap<String, PersistentCollection> {
        &self.collections
    }

    /// Copy without pending collection logs, as used for detached clones
    pub(crate) fn detached_copy(&self) -> Record {
        Record {
            fields: self.fields.clone(),
            references: self.references.clone(),
            collections: self
                .collections
                .iter()
                .map(|(name, coll)| (name.clone(), coll.rebased()))
                .collect(),
            unresolved: self.unresolved.clone(),
        }
    }
}

/// Membership of a to-many association, tracked incrementally
///
/// `items` is the current membership. `added`/`removed` are the changes
/// since the last synchronised baseline, so the baseline is always
/// `items - added + removed`. An uninitialised collection has not been
/// read from storage yet and carries no changes.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PersistentCollection {
    items: Vec<EntityHandle>,
    added: Vec<EntityHandle>,
    removed: Vec<EntityHandle>,
    initialized: bool,
}

impl PersistentCollection {
    /// A collection that must be fetched before use
    pub fn uninitialized() -> Self {
        Self::default()
    }

    /// An empty, initialised collection (new entities)
    pub fn empty() -> Self {
        Self {
            initialized: true,
            ..Self::default()
        }
    }

    /// An initialised collection whose baseline is `items`
    pub fn loaded(items: Vec<EntityHandle>) -> Self {
        let mut deduped: Vec<EntityHandle> = Vec::with_capacity(items.len());
        for item in items {
            if !deduped.contains(&item) {
                deduped.push(item);
            }
        }
        Self {
            items: deduped,
            added: Vec::new(),
            removed: Vec::new(),
            initialized: true,
        }
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized
    }

    pub fn items(&self) -> &[EntityHandle] {
        &self.items
    }

    pub fn added(&self) -> &[EntityHandle] {
        &self.added
    }

    pub fn removed(&self) -> &[EntityHandle] {
        &self.removed
    }

    pub fn contains(&self, handle: EntityHandle) -> bool {
        self.items.contains(&handle)
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn is_dirty(&self) -> bool {
        !self.added.is_empty() || !self.removed.is_empty()
    }

    /// Add a member; returns false if it was already present
    pub(crate) fn add(&mut self, handle: EntityHandle) -> bool {
        if self.items.contains(&handle) {
            return false;
        }
        self.items.push(handle);
        if let Some(pos) = self.removed.iter().position(|h| *h == handle) {
            self.removed.remove(pos);
        } else {
            self.added.push(handle);
        }
        true
    }

    /// Remove a member; returns false if it was not present
    pub(crate) fn remove(&mut self, handle: EntityHandle) -> bool {
        let Some(pos) = self.items.iter().position(|h| *h == handle) else {
            return false;
        };
        self.items.remove(pos);
        if let Some(added_pos) = self.added.iter().position(|h| *h == handle) {
            self.added.remove(added_pos);
        } else {
            self.removed.push(handle);
        }
        true
    }

    /// Members of the last synchronised baseline
    pub fn baseline(&self) -> Vec<EntityHandle> {
        let mut base: Vec<EntityHandle> = self
            .items
            .iter()
            .filter(|h| !self.added.contains(h))
            .copied()
            .collect();
        base.extend(self.removed.iter().copied());
        base
    }

    /// Accept current membership as the new baseline
    pub(crate) fn mark_synchronized(&mut self) {
        self.added.clear();
        self.removed.clear();
    }

    /// Keep current membership but diff it against `persisted` instead
    pub(crate) fn resync(&mut self, persisted: &[EntityHandle]) {
        self.added = self
            .items
            .iter()
            .filter(|h| !persisted.contains(h))
            .copied()
            .collect();
        self.removed = persisted
            .iter()
            .filter(|h| !self.items.contains(h))
            .copied()
            .collect();
    }

    fn rebased(&self) -> Self {
        Self {
            items: self.items.clone(),
            added: Vec::new(),
            removed: Vec::new(),
            initialized: self.initialized,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn h(slot: usize) -> EntityHandle {
        EntityHandle::new(1, slot)
    }

    #[test]
    fn test_add_then_remove_cancels() {
        let mut coll = PersistentCollection::loaded(vec![h(1)]);
        assert!(coll.add(h(2)));
        assert!(coll.remove(h(2)));
        assert!(!coll.is_dirty());
        assert_eq!(coll.items(), &[h(1)]);
    }

    #[test]
    fn test_remove_then_add_cancels() {
        let mut coll = PersistentCollection::loaded(vec![h(1), h(2)]);
        assert!(coll.remove(h(1)));
        assert_eq!(coll.removed(), &[h(1)]);
        assert!(coll.add(h(1)));
        assert!(!coll.is_dirty());
    }

    #[test]
    fn test_duplicate_add_is_ignored() {
        let mut coll = PersistentCollection::empty();
        assert!(coll.add(h(1)));
        assert!(!coll.add(h(1)));
        assert_eq!(coll.len(), 1);
        assert_eq!(coll.added(), &[h(1)]);
    }

    #[test]
    fn test_baseline_reconstruction() {
        let mut coll = PersistentCollection::loaded(vec![h(1), h(2)]);
        coll.add(h(3));
        coll.remove(h(1));
        let mut base = coll.baseline();
        base.sort();
        assert_eq!(base, vec![h(1), h(2)]);
    }

    #[test]
    fn test_resync_against_persisted() {
        let mut coll = PersistentCollection::loaded(vec![h(1)]);
        coll.add(h(2));
        coll.add(h(3));
        // storage already holds 2 and 4
        coll.resync(&[h(2), h(4)]);
        assert_eq!(coll.added(), &[h(1), h(3)]);
        assert_eq!(coll.removed(), &[h(4)]);
    }

    #[test]
    fn test_loaded_dedupes() {
        let coll = PersistentCollection::loaded(vec![h(1), h(1), h(2)]);
        assert_eq!(coll.items(), &[h(1), h(2)]);
        assert!(coll.is_initialized());
        assert!(!PersistentCollection::uninitialized().is_initialized());
    }
}
