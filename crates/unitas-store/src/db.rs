//! Database connection management
//!
//! Provides utilities for opening and configuring SQLite connections

use std::path::Path;
use std::time::Duration;

use rusqlite::Connection;

use crate::errors::{sqlite, Result};

/// Open a SQLite database at the given path and configure it
///
/// # Errors
///
/// Returns `Backend` if the file cannot be opened or configured.
pub fn open<P: AsRef<Path>>(path: P) -> Result<Connection> {
    let conn = Connection::open(path).map_err(sqlite("open"))?;
    configure(&conn)?;
    Ok(conn)
}

/// Open an in-memory SQLite database (for testing)
///
/// # Errors
///
/// Returns `Backend` if SQLite cannot allocate the database.
pub fn open_in_memory() -> Result<Connection> {
    let conn = Connection::open_in_memory().map_err(sqlite("open"))?;
    configure(&conn)?;
    Ok(conn)
}

/// Configure a connection for Unit-of-Work use
///
/// # Errors
///
/// Returns `Backend` if a pragma is rejected.
pub fn configure(conn: &Connection) -> Result<()> {
    // Flush ordering relies on foreign keys being checked per statement
    conn.pragma_update(None, "foreign_keys", "ON")
        .map_err(sqlite("configure"))?;

    // In-memory databases report "memory" and keep it
    let _mode: String = conn
        .pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get(0))
        .map_err(sqlite("configure"))?;

    conn.busy_timeout(Duration::from_secs(5))
        .map_err(sqlite("configure"))?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_foreign_keys_enabled() {
        let conn = open_in_memory().unwrap();
        let enabled: i64 = conn
            .query_row("PRAGMA foreign_keys", [], |row| row.get(0))
            .unwrap();
        assert_eq!(enabled, 1);
    }

    #[test]
    fn test_file_database_uses_wal() {
        let dir = tempfile::tempdir().unwrap();
        let conn = open(dir.path().join("unitas.db")).unwrap();
        let mode: String = conn
            .query_row("PRAGMA journal_mode", [], |row| row.get(0))
            .unwrap();
        assert_eq!(mode.to_lowercase(), "wal");
    }
}
