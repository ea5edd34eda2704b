//! Cascade traversal
//!
//! A cascade is a breadth-first walk over the object graph starting at a
//! root, following only associations whose flag for the operation is set.
//! The walk is iterative and keeps a visited set keyed by handle, so cyclic
//! graphs are processed once per instance and per run. Within one level,
//! targets are visited in association-declaration order.

use std::collections::{HashSet, VecDeque};

use crate::metadata::{AssociationMetadata, EntityMetadata};
use crate::model::{EntityHandle, Record};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CascadeOp {
    Persist,
    Remove,
    Merge,
    Detach,
    Refresh,
}

impl CascadeOp {
    pub fn applies_to(&self, assoc: &AssociationMetadata) -> bool {
        match self {
            CascadeOp::Persist => assoc.cascade.persist,
            CascadeOp::Remove => assoc.cascades_remove(),
            CascadeOp::Merge => assoc.cascade.merge,
            CascadeOp::Detach => assoc.cascade.detach,
            CascadeOp::Refresh => assoc.cascade.refresh,
        }
    }

    /// Whether the walk must load proxies and lazy collections to see targets
    pub fn initializes_targets(&self) -> bool {
        matches!(self, CascadeOp::Remove)
    }

    pub fn name(&self) -> &'static str {
        match self {
            CascadeOp::Persist => "persist",
            CascadeOp::Remove => "remove",
            CascadeOp::Merge => "merge",
            CascadeOp::Detach => "detach",
            CascadeOp::Refresh => "refresh",
        }
    }
}

/// Worklist of one cascade run
#[derive(Debug)]
pub struct CascadeWalk {
    queue: VecDeque<EntityHandle>,
    visited: HashSet<EntityHandle>,
    order: Vec<EntityHandle>,
}

impl CascadeWalk {
    pub fn new(root: EntityHandle) -> Self {
        Self::from_roots([root])
    }

    pub fn from_roots(roots: impl IntoIterator<Item = EntityHandle>) -> Self {
        let mut walk = Self {
            queue: VecDeque::new(),
            visited: HashSet::new(),
            order: Vec::new(),
        };
        walk.extend(roots);
        walk
    }

    /// Enqueue targets not seen in this run
    pub fn extend(&mut self, targets: impl IntoIterator<Item = EntityHandle>) {
        for target in targets {
            if self.visited.insert(target) {
                self.queue.push_back(target);
            }
        }
    }

    /// Next instance to process; each is returned exactly once
    pub fn next_handle(&mut self) -> Option<EntityHandle> {
        let next = self.queue.pop_front()?;
        self.order.push(next);
        Some(next)
    }

    pub fn is_visited(&self, handle: EntityHandle) -> bool {
        self.visited.contains(&handle)
    }

    /// Every instance processed, in visit order
    pub fn into_order(self) -> Vec<EntityHandle> {
        self.order
    }
}

/// Cascade targets held by `record`, in association-declaration order
///
/// Uninitialised collections contribute nothing; callers that need them
/// (remove) load them first.
pub fn cascade_targets(meta: &EntityMetadata, record: &Record, op: CascadeOp) -> Vec<EntityHandle> {
    let mut targets = Vec::new();
    for assoc in meta.associations.iter().filter(|a| op.applies_to(a)) {
        if assoc.is_to_one() {
            if let Some(target) = record.reference(&assoc.name) {
                targets.push(target);
            }
        } else if let Some(coll) = record.collection(&assoc.name) {
            targets.extend(coll.items().iter().copied());
        }
    }
    targets
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::{CascadeFlags, FieldKind};
    use crate::model::PersistentCollection;

    fn h(slot: usize) -> EntityHandle {
        EntityHandle::new(9, slot)
    }

    #[test]
    fn test_walk_visits_each_once_in_cycle() {
        let mut walk = CascadeWalk::new(h(0));
        let mut seen = Vec::new();
        while let Some(next) = walk.next_handle() {
            seen.push(next);
            // 0 -> 1 -> 2 -> 0
            let succ = h((next.index() + 1) % 3);
            walk.extend([succ]);
        }
        assert_eq!(seen, vec![h(0), h(1), h(2)]);
        assert_eq!(walk.into_order(), seen);
    }

    #[test]
    fn test_targets_follow_flags_and_declaration_order() {
        let meta = EntityMetadata::builder("Order")
            .id("id", FieldKind::Int)
            .association(
                AssociationMetadata::many_to_one("customer", "Customer", "customer_id")
                    .cascade(CascadeFlags::MERGE),
            )
            .association(
                AssociationMetadata::one_to_many("lines", "OrderLine", "order")
                    .cascade(CascadeFlags::ALL),
            )
            .association(
                AssociationMetadata::many_to_one("shipper", "Shipper", "shipper_id")
                    .cascade(CascadeFlags::PERSIST),
            )
            .build();
        let mut record = Record::default();
        record.references.insert("customer".into(), Some(h(1)));
        record.references.insert("shipper".into(), Some(h(4)));
        record
            .collections
            .insert("lines".into(), PersistentCollection::loaded(vec![h(2), h(3)]));

        assert_eq!(
            cascade_targets(&meta, &record, CascadeOp::Persist),
            vec![h(2), h(3), h(4)]
        );
        assert_eq!(
            cascade_targets(&meta, &record, CascadeOp::Merge),
            vec![h(1), h(2), h(3)]
        );
        assert_eq!(
            cascade_targets(&meta, &record, CascadeOp::Remove),
            vec![h(2), h(3)]
        );
    }

    #[test]
    fn test_orphan_removal_implies_remove_cascade() {
        let assoc = AssociationMetadata::one_to_many("lines", "OrderLine", "order").orphan_removal();
        assert!(CascadeOp::Remove.applies_to(&assoc));
        assert!(!CascadeOp::Persist.applies_to(&assoc));
    }
}
