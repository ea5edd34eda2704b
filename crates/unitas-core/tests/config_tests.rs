//! Scope configuration

#![allow(clippy::unwrap_used, clippy::expect_used)]

mod common;

use std::sync::Arc;

use common::{new_product, Fixture};
use unitas_core::{UnitOfWork, UnitOfWorkConfig, UnitasError, Value};
use unitas_core_types::correlation::{RequestContext, RequestId};

#[test]
fn test_initial_version_is_configurable() {
    let fx = Fixture::new();
    let config = UnitOfWorkConfig::from_json(r#"{"initial_version": 0}"#).unwrap();
    let mut uow =
        UnitOfWork::with_config(Arc::clone(&fx.registry), fx.db.connect(), config).unwrap();

    let p = new_product(&mut uow, "lamp");
    uow.persist(p).unwrap();
    uow.flush().unwrap();
    assert_eq!(uow.get(p, "version").unwrap(), Value::Int(0));

    uow.set(p, "name", "desk lamp").unwrap();
    uow.flush().unwrap();
    assert_eq!(uow.get(p, "version").unwrap(), Value::Int(1));
}

#[test]
fn test_invalid_config_is_rejected() {
    let fx = Fixture::new();
    let config = UnitOfWorkConfig {
        initial_version: -3,
        ..UnitOfWorkConfig::default()
    };
    let err = UnitOfWork::with_config(Arc::clone(&fx.registry), fx.db.connect(), config)
        .unwrap_err();
    assert!(matches!(err, UnitasError::Configuration { .. }));
}

#[test]
fn test_request_context_is_kept() {
    let fx = Fixture::new();
    let request_id = RequestId::from_string("req-17");
    let uow = fx
        .scope()
        .with_context(RequestContext::with_request_id(request_id.clone()));

    let context = uow.context().expect("context attached");
    assert_eq!(context.request_id.as_str(), "req-17");
    assert!(uow.config().resync_collections_on_failure);
}
