//! Unitas Store - SQLite persistence backend
//!
//! Provides:
//! - Connection opening and pragma setup
//! - [`SqliteBackend`], implementing the Unit-of-Work backend contract with
//!   single-row statements generated from the metadata descriptor
//! - Mapping of SQLite failures onto the core error taxonomy
//!
//! Table definitions are the caller's business; the backend only reads and
//! writes the columns the metadata names.

pub mod db;
pub mod errors;
pub mod repo;

// Re-export key types
pub use errors::{Result, StoreError};
pub use repo::SqliteBackend;
