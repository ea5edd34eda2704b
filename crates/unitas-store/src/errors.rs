//! Error handling for unitas-store
//!
//! Store failures are shaped as [`StoreError`] and handed to the Unit of
//! Work as [`UnitasError`]: SQLite constraint failures become
//! `ConstraintViolation`, undecodable columns `Serialization`, and every
//! other driver failure `Backend` tagged with the operation.

use rusqlite::ErrorCode;
use thiserror::Error;
use unitas_core::errors::UnitasError;

/// Result type alias shared with the core
pub type Result<T> = unitas_core::errors::Result<T>;

#[derive(Error, Debug)]
pub enum StoreError {
    /// Failure reported by the SQLite driver
    #[error("SQLite error in {op}: {source}")]
    Sqlite {
        op: &'static str,
        #[source]
        source: rusqlite::Error,
    },

    /// A stored value does not fit the field kind it is read as
    #[error("Cannot decode {table}.{column}: {reason}")]
    Decode {
        table: String,
        column: String,
        reason: String,
    },
}

impl StoreError {
    /// Whether SQLite rejected the statement on an integrity constraint
    pub fn is_constraint(&self) -> bool {
        match self {
            StoreError::Sqlite {
                source: rusqlite::Error::SqliteFailure(failure, _),
                ..
            } => failure.code == ErrorCode::ConstraintViolation,
            _ => false,
        }
    }
}

impl From<StoreError> for UnitasError {
    fn from(err: StoreError) -> Self {
        if err.is_constraint() {
            let message = match &err {
                StoreError::Sqlite { source, .. } => source.to_string(),
                other => other.to_string(),
            };
            return UnitasError::ConstraintViolation { message };
        }
        match err {
            StoreError::Sqlite { op, source } => UnitasError::backend(op, source.to_string()),
            decode @ StoreError::Decode { .. } => UnitasError::Serialization {
                message: decode.to_string(),
            },
        }
    }
}

/// Map a driver error raised while running `op`
///
/// ```
/// use unitas_store::errors::sqlite;
///
/// let conn = rusqlite::Connection::open_in_memory().unwrap();
/// let err = conn.execute("SELEC 1", []).map_err(sqlite("probe")).unwrap_err();
/// assert!(err.to_string().contains("probe"));
/// ```
pub fn sqlite(op: &'static str) -> impl FnOnce(rusqlite::Error) -> UnitasError {
    move |source| StoreError::Sqlite { op, source }.into()
}

/// Create a decode error for one column
pub fn decode_error(table: &str, column: &str, reason: impl Into<String>) -> UnitasError {
    StoreError::Decode {
        table: table.to_string(),
        column: column.to_string(),
        reason: reason.into(),
    }
    .into()
}
