//! Lifecycle listener scenarios
//!
//! Scenarios:
//! - each hook fires for the instances its operation touches
//! - a vetoing pre-hook aborts the operation before any state change

#![allow(clippy::unwrap_used, clippy::expect_used)]

mod common;

use std::sync::Arc;

use common::{new_product, Fixture, RecordingListener};
use unitas_core::backend::StatementKind;
use unitas_core::{EntityState, UnitasError};

#[test]
fn test_hooks_fire_per_operation() {
    let fx = Fixture::new();
    fx.seed_category(1, "lighting");
    let id = fx.seed_product("lamp", Some(1));
    let mut uow = fx.scope();
    let listener = Arc::new(RecordingListener::default());
    uow.add_listener(listener.clone());

    let p = uow.find("Product", id).unwrap();
    assert_eq!(listener.calls(), vec!["post_load:Product"]);

    uow.set(p, "name", "desk lamp").unwrap();
    uow.flush().unwrap();
    assert_eq!(listener.calls().last().unwrap(), "pre_update:Product");

    let fresh = new_product(&mut uow, "chair");
    uow.persist(fresh).unwrap();
    assert_eq!(listener.calls().last().unwrap(), "pre_persist:Product");

    uow.remove(p).unwrap();
    assert_eq!(listener.calls().last().unwrap(), "pre_remove:Product");

    // inserts do not fire pre_update
    uow.flush().unwrap();
    assert_eq!(listener.calls().last().unwrap(), "pre_remove:Product");
}

#[test]
fn test_post_load_fires_for_lazy_loads() {
    let fx = Fixture::new();
    fx.seed_category(1, "lighting");
    let id = fx.seed_product("lamp", Some(1));
    let mut uow = fx.scope();
    let listener = Arc::new(RecordingListener::default());
    uow.add_listener(listener.clone());

    let p = uow.get_reference("Product", id).unwrap();
    assert!(listener.calls().is_empty());

    let category = uow.reference(p, "category").unwrap().unwrap();
    uow.get(category, "name").unwrap();
    assert_eq!(
        listener.calls(),
        vec!["post_load:Product", "post_load:Category"]
    );
}

#[test]
fn test_pre_persist_fires_for_whole_cascade() {
    let fx = Fixture::new();
    let mut uow = fx.scope();
    let listener = Arc::new(RecordingListener::default());
    uow.add_listener(listener.clone());

    let p = new_product(&mut uow, "lamp");
    let category = common::new_category(&mut uow, 1, "lighting");
    uow.set_reference(p, "category", Some(category)).unwrap();
    uow.persist(p).unwrap();

    assert_eq!(
        listener.calls(),
        vec!["pre_persist:Product", "pre_persist:Category"]
    );
}

#[test]
fn test_vetoed_persist_changes_nothing() {
    let fx = Fixture::new();
    let mut uow = fx.scope();
    uow.add_listener(Arc::new(RecordingListener::vetoing("pre_persist")));

    let p = new_product(&mut uow, "lamp");
    let err = uow.persist(p).unwrap_err();

    assert!(matches!(err, UnitasError::InvalidState { .. }));
    assert_eq!(uow.state_of(p).unwrap(), EntityState::New);
    assert_eq!(uow.stats().scheduled_inserts, 0);
}

#[test]
fn test_vetoed_update_aborts_flush_before_writing() {
    let fx = Fixture::new();
    let id = fx.seed_product("lamp", None);
    let mut uow = fx.scope();
    uow.add_listener(Arc::new(RecordingListener::vetoing("pre_update")));

    let p = uow.find("Product", id).unwrap();
    uow.set(p, "name", "desk lamp").unwrap();

    assert!(uow.flush().is_err());
    assert_eq!(uow.backend().probe().count(StatementKind::Begin), 0);
    assert!(uow.is_dirty());
}

#[test]
fn test_vetoed_remove_keeps_instance_managed() {
    let fx = Fixture::new();
    let customer = fx.seed_customer("Ada");
    let order = fx.seed_order(customer, "A-1");
    fx.seed_line(order, 1);
    let mut uow = fx.scope();
    let listener = Arc::new(RecordingListener::vetoing("pre_remove"));
    uow.add_listener(listener.clone());

    let o = uow.find("Order", order).unwrap();
    assert!(uow.remove(o).is_err());

    assert_eq!(uow.state_of(o).unwrap(), EntityState::Managed);
    assert_eq!(uow.stats().removed, 0);
    assert_eq!(uow.stats().scheduled_deletes, 0);
}
