//! Unitas Core - Unit-of-Work persistence engine
//!
//! This crate tracks in-memory entity graphs against a relational store:
//! - Identity map guaranteeing one instance per (type, primary key)
//! - Lifecycle state machine (persist, remove, merge, detach, refresh)
//! - Lazy placeholders and lazily loaded collections
//! - Snapshot-based change detection
//! - Ordered, transactional flush with cycle breaking and optimistic locking
//!
//! Storage is reached only through the [`backend::PersistenceBackend`]
//! trait. An in-memory backend ships here; `unitas-store` provides SQLite.

pub mod backend;
pub mod cascade;
pub mod commit;
pub mod config;
pub mod errors;
pub mod identity_map;
pub mod ledger;
pub mod listener;
pub mod logging_facility;
pub mod metadata;
pub mod model;
pub mod proxy;
pub mod repository;
pub mod state;
pub mod uow;

// Macros refer to schema constants through this path
pub use unitas_core_types;

// Re-export commonly used types
pub use backend::{LinkSide, MemoryBackend, MemoryDatabase, PersistenceBackend, RowSource, VersionGuard};
pub use commit::FlushReport;
pub use config::UnitOfWorkConfig;
pub use errors::{ExError, ExErrorKind, Result, UnitasError};
pub use ledger::{ChangeSet, CollectionDiff, FieldChange, ReferenceChange};
pub use listener::{LifecycleEvent, LifecycleListener};
pub use metadata::{
    AssociationMetadata, CascadeFlags, EntityMetadata, FetchMode, FieldKind, FieldMetadata,
    IdGeneration, JoinTableMetadata, MetadataRegistry,
};
pub use model::{
    EntityHandle, EntityType, IdentityKey, KeyPart, PersistentCollection, PrimaryKey, Record, Row,
    Value,
};
pub use proxy::ProxyState;
pub use repository::Repository;
pub use state::EntityState;
pub use uow::{EntityMut, EntityView, ScopeStats, UnitOfWork};
