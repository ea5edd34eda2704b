//! Persistence backend contract
//!
//! The Unit of Work talks to storage only through these two traits. Reads
//! go through [`RowSource`] and never require the write path; writes go
//! through [`PersistenceBackend`], always inside one transaction per flush.

pub mod memory;

use crate::errors::Result;
use crate::metadata::{EntityMetadata, JoinTableMetadata};
use crate::model::{KeyPart, PrimaryKey, Row, Value};

pub use memory::{MemoryBackend, MemoryDatabase, MemoryProbe, StatementKind, StatementRecord};

/// Version predicate attached to an update or delete
///
/// The statement only applies if `column` still holds `expected`.
#[derive(Debug, Clone, PartialEq)]
pub struct VersionGuard {
    pub column: String,
    pub expected: Value,
}

/// Which column of a link table a lookup matches on
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkSide {
    /// Match `owner_column`, return `target_column`
    Owner,
    /// Match `target_column`, return `owner_column`
    Target,
}

impl LinkSide {
    /// (matched column, returned column)
    pub fn columns<'a>(&self, join: &'a JoinTableMetadata) -> (&'a str, &'a str) {
        match self {
            LinkSide::Owner => (&join.owner_column, &join.target_column),
            LinkSide::Target => (&join.target_column, &join.owner_column),
        }
    }
}

/// Read-only access to stored rows
pub trait RowSource {
    /// # Errors
    ///
    /// Returns `Backend` if storage cannot be read.
    fn fetch_by_key(&self, meta: &EntityMetadata, key: &PrimaryKey) -> Result<Option<Row>>;

    /// # Errors
    ///
    /// Returns `Backend` if storage cannot be read.
    fn fetch_all(&self, meta: &EntityMetadata) -> Result<Vec<Row>>;

    /// Rows whose `column` equals `value`, in key order
    ///
    /// # Errors
    ///
    /// Returns `Backend` if storage cannot be read.
    fn fetch_where(&self, meta: &EntityMetadata, column: &str, value: &Value) -> Result<Vec<Row>>;

    /// Keys linked to `key` through a link table
    ///
    /// # Errors
    ///
    /// Returns `Backend` if storage cannot be read.
    fn fetch_links(
        &self,
        join: &JoinTableMetadata,
        side: LinkSide,
        key: &KeyPart,
    ) -> Result<Vec<KeyPart>>;
}

/// Transactional single-row writes
///
/// Rejections of integrity constraints must surface as
/// `UnitasError::ConstraintViolation`; every other failure as `Backend`.
pub trait PersistenceBackend: RowSource {
    /// # Errors
    ///
    /// Returns `Backend` if a transaction is already open or cannot start.
    fn begin_transaction(&mut self) -> Result<()>;

    /// # Errors
    ///
    /// Returns `Backend` if no transaction is open or the commit fails.
    fn commit(&mut self) -> Result<()>;

    /// # Errors
    ///
    /// Returns `Backend` if the rollback fails.
    fn rollback(&mut self) -> Result<()>;

    /// Insert one row; returns the generated key for generated-id types
    ///
    /// # Errors
    ///
    /// Returns `ConstraintViolation` on key, null or foreign-key conflicts.
    fn execute_insert(&mut self, meta: &EntityMetadata, row: &Row) -> Result<Option<KeyPart>>;

    /// Update the listed columns of one row; returns rows affected
    ///
    /// # Errors
    ///
    /// Returns `ConstraintViolation` on null or foreign-key conflicts.
    fn execute_update(
        &mut self,
        meta: &EntityMetadata,
        key: &PrimaryKey,
        changes: &Row,
        guard: Option<&VersionGuard>,
    ) -> Result<u64>;

    /// Delete one row; returns rows affected
    ///
    /// # Errors
    ///
    /// Returns `ConstraintViolation` if the row is still referenced.
    fn execute_delete(
        &mut self,
        meta: &EntityMetadata,
        key: &PrimaryKey,
        guard: Option<&VersionGuard>,
    ) -> Result<u64>;

    /// # Errors
    ///
    /// Returns `ConstraintViolation` for duplicate or dangling links.
    fn insert_link(&mut self, join: &JoinTableMetadata, owner: &KeyPart, target: &KeyPart)
        -> Result<()>;

    /// # Errors
    ///
    /// Returns `Backend` if storage cannot be written.
    fn delete_link(
        &mut self,
        join: &JoinTableMetadata,
        owner: &KeyPart,
        target: &KeyPart,
    ) -> Result<u64>;

    /// Delete every link whose `side` column equals `key`
    ///
    /// # Errors
    ///
    /// Returns `Backend` if storage cannot be written.
    fn delete_links(&mut self, join: &JoinTableMetadata, side: LinkSide, key: &KeyPart)
        -> Result<u64>;
}
