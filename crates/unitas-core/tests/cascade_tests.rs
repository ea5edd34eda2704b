//! Cascade scenarios
//!
//! Scenarios:
//! - persist follows PERSIST edges to new targets, and only those
//! - remove loads lazy collections and placeholders to find targets
//! - detach and refresh follow their own flags
//! - cyclic graphs are visited once per instance

#![allow(clippy::unwrap_used, clippy::expect_used)]

mod common;

use std::sync::Arc;

use common::{new_category, new_product, Fixture};
use unitas_core::{
    AssociationMetadata, CascadeFlags, EntityMetadata, EntityState, FieldKind, MemoryDatabase,
    MetadataRegistry, PrimaryKey, UnitOfWork, UnitasError, Value,
};

#[test]
fn test_persist_cascades_to_new_category_and_tags() {
    let fx = Fixture::new();
    let mut uow = fx.scope();

    let category = new_category(&mut uow, 1, "lighting");
    let tag = uow.new_entity("Tag").unwrap();
    uow.set(tag, "id", 5).unwrap();
    uow.set(tag, "label", "sale").unwrap();
    let p = new_product(&mut uow, "lamp");
    uow.set_reference(p, "category", Some(category)).unwrap();
    uow.add_to_collection(p, "tags", tag).unwrap();

    uow.persist(p).unwrap();

    for h in [p, category, tag] {
        assert_eq!(uow.state_of(h).unwrap(), EntityState::Managed);
    }
    assert_eq!(uow.stats().scheduled_inserts, 3);

    let report = uow.flush().unwrap();
    assert_eq!(report.inserted, 3);
    assert_eq!(report.links_inserted, 1);
    let pid = uow.identifier(p).unwrap().unwrap();
    let row = fx.db.row("product", &pid).unwrap();
    assert_eq!(row.get("category_id"), Some(&Value::Int(1)));
    assert_eq!(fx.product_tags().len(), 1);
}

#[test]
fn test_persist_does_not_cross_edges_without_flag() {
    let fx = Fixture::new();
    let mut uow = fx.scope();

    let customer = uow.new_entity("Customer").unwrap();
    uow.set(customer, "name", "Ada").unwrap();
    let order = uow.new_entity("Order").unwrap();
    uow.set(order, "reference", "A-1").unwrap();
    uow.set_reference(order, "customer", Some(customer)).unwrap();

    uow.persist(order).unwrap();
    assert_eq!(uow.state_of(order).unwrap(), EntityState::Managed);
    assert_eq!(uow.state_of(customer).unwrap(), EntityState::New);

    // the unsaved customer blocks the flush
    let err = uow.flush().unwrap_err();
    assert!(matches!(err, UnitasError::InvalidState { .. }));
    assert!(uow.backend().probe().writes().is_empty());

    // persisting it explicitly unblocks it
    uow.persist(customer).unwrap();
    let report = uow.flush().unwrap();
    assert_eq!(report.inserted, 2);
}

#[test]
fn test_persist_cascade_into_detached_is_rejected() {
    let fx = Fixture::new();
    fx.seed_category(1, "lighting");
    let mut uow = fx.scope();

    let category = uow.find("Category", 1).unwrap();
    uow.detach(category).unwrap();
    let p = new_product(&mut uow, "lamp");
    uow.set_reference(p, "category", Some(category)).unwrap();

    match uow.persist(p).unwrap_err() {
        UnitasError::InvalidState { op, reason, .. } => {
            assert_eq!(op, "persist");
            assert!(reason.contains("cascade"));
        }
        other => panic!("expected InvalidState, got {:?}", other),
    }
    // nothing changed
    assert_eq!(uow.state_of(p).unwrap(), EntityState::New);
    assert_eq!(uow.stats().scheduled_inserts, 0);
}

#[test]
fn test_remove_cascade_loads_lazy_lines() {
    let fx = Fixture::new();
    let customer = fx.seed_customer("Ada");
    let order = fx.seed_order(customer, "A-1");
    fx.seed_line(order, 2);
    fx.seed_line(order, 3);
    let mut uow = fx.scope();
    let probe = uow.backend().probe();

    let o = uow.find("Order", order).unwrap();
    assert_eq!(probe.reads(), 1);

    uow.remove(o).unwrap();
    assert_eq!(probe.reads(), 2);
    let stats = uow.stats();
    assert_eq!(stats.removed, 3);
    assert_eq!(stats.scheduled_deletes, 3);

    // the customer is not reached by the cascade
    let c = uow.reference(o, "customer").unwrap().unwrap();
    assert_ne!(uow.state_of(c).unwrap(), EntityState::Removed);

    let report = uow.flush().unwrap();
    assert_eq!(report.deleted, 3);
    assert_eq!(fx.db.row_count("order_line"), 0);
    assert_eq!(fx.db.row_count("orders"), 0);
    assert_eq!(fx.db.row_count("customer"), 1);
}

#[test]
fn test_detach_and_refresh_follow_their_flags() {
    let fx = Fixture::new();
    let mut uow = fx.scope();
    let customer = uow.new_entity("Customer").unwrap();
    uow.set(customer, "name", "Ada").unwrap();
    let address = uow.new_entity("Address").unwrap();
    uow.set(address, "street", "Main St").unwrap();
    uow.set_reference(customer, "address", Some(address)).unwrap();
    uow.set_reference(address, "resident", Some(customer)).unwrap();
    uow.persist(customer).unwrap();
    uow.flush().unwrap();

    // refresh reaches the address through the ALL cascade
    uow.set(address, "street", "scribbled").unwrap();
    uow.refresh(customer).unwrap();
    assert_eq!(uow.get(address, "street").unwrap(), Value::from("Main St"));

    // detach does too
    uow.detach(customer).unwrap();
    assert_eq!(uow.state_of(customer).unwrap(), EntityState::Detached);
    assert_eq!(uow.state_of(address).unwrap(), EntityState::Detached);
    assert_eq!(uow.stats().identity_map_entries, 0);
}

fn tree_registry() -> Arc<MetadataRegistry> {
    Arc::new(
        MetadataRegistry::build(vec![EntityMetadata::builder("Node")
            .id("id", FieldKind::Int)
            .generated()
            .field("name", FieldKind::Text)
            .association(
                AssociationMetadata::many_to_one("parent", "Node", "parent_id")
                    .nullable()
                    .cascade(CascadeFlags::ALL),
            )
            .association(
                AssociationMetadata::one_to_many("children", "Node", "parent")
                    .cascade(CascadeFlags::ALL),
            )
            .build()])
        .unwrap(),
    )
}

#[test]
fn test_cyclic_graph_is_visited_once() {
    let registry = tree_registry();
    let db = MemoryDatabase::new(&registry);
    let mut uow = UnitOfWork::new(Arc::clone(&registry), db.connect());

    let root = uow.new_entity("Node").unwrap();
    uow.set(root, "name", "root").unwrap();
    let leaf = uow.new_entity("Node").unwrap();
    uow.set(leaf, "name", "leaf").unwrap();
    uow.set_reference(leaf, "parent", Some(root)).unwrap();
    uow.add_to_collection(root, "children", leaf).unwrap();

    // root <-> leaf is a cycle in both directions
    uow.persist(leaf).unwrap();
    assert_eq!(uow.stats().scheduled_inserts, 2);

    let report = uow.flush().unwrap();
    assert_eq!(report.inserted, 2);
    assert_eq!(report.deferred_fixups, 0);

    let leaf_id = uow.identifier(leaf).unwrap().unwrap();
    let root_id = uow.identifier(root).unwrap().unwrap();
    let row = db.row("node", &leaf_id).unwrap();
    assert_eq!(Some(PrimaryKey::from(row["parent_id"].as_int().unwrap())), Some(root_id));

    // removing either end removes both, children first
    uow.remove(root).unwrap();
    assert_eq!(uow.stats().removed, 2);
    let report = uow.flush().unwrap();
    assert_eq!(report.deleted, 2);
    assert_eq!(db.row_count("node"), 0);
}
