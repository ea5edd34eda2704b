//! Repository layer backing the Unit of Work with SQLite
//!
//! Rows are read and written one statement at a time; the Unit of Work
//! decides ordering and the transaction boundary.

pub mod hydration;
pub mod sqlite_backend;
pub mod statements;

pub use sqlite_backend::SqliteBackend;
