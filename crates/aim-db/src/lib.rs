//! # aim-db
//!
//! The durable message store: a single SQLite database holding the
//! `message_id → Message` map and the pending-retry queue.
//!
//! ## Schema
//!
//! - WAL mode, foreign keys enforced
//! - Timestamps are Unix-epoch nanoseconds (i64)
//! - Schema version stored in `PRAGMA user_version`

pub mod migrations;
pub mod queries;
pub mod repo;
pub mod schema;

use rusqlite::Connection;
use std::path::Path;

pub use repo::{MemoryMessageRepository, MessageRepository, SqliteMessageRepository};

/// Current schema version.
pub const SCHEMA_VERSION: u32 = 1;

/// Listing bound: maximum page size.
pub const MAX_LIST_LIMIT: u32 = 1000;

/// Listing bound: maximum offset.
pub const MAX_LIST_OFFSET: u32 = 1_000_000;

/// Database error types.
#[derive(Debug, thiserror::Error)]
pub enum DbError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("migration failed: {0}")]
    Migration(String),

    #[error("not found: {0}")]
    NotFound(String),

    /// A message with this id already exists.
    #[error("message id conflict: {0}")]
    MessageIdConflict(String),

    /// Limit/offset outside the listing bounds.
    #[error("invalid query: {0}")]
    InvalidQuery(String),

    #[error("serialization error: {0}")]
    Serialization(String),
}

pub type Result<T> = std::result::Result<T, DbError>;

/// Open or create the message database at the given path.
pub fn open(path: &Path) -> Result<Connection> {
    let conn = Connection::open(path)?;
    configure(&conn)?;
    migrations::run(&conn)?;
    Ok(conn)
}

/// Open an in-memory database (for testing).
pub fn open_memory() -> Result<Connection> {
    let conn = Connection::open_in_memory()?;
    configure(&conn)?;
    migrations::run(&conn)?;
    Ok(conn)
}

fn configure(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "PRAGMA journal_mode = WAL;
         PRAGMA foreign_keys = ON;
         PRAGMA busy_timeout = 5000;
         PRAGMA synchronous = NORMAL;",
    )?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn open_memory_migrates() {
        let conn = open_memory().expect("open in-memory db");
        let version: u32 = conn
            .pragma_query_value(None, "user_version", |row| row.get(0))
            .expect("get user_version");
        assert_eq!(version, SCHEMA_VERSION);
    }

    #[test]
    fn foreign_keys_enabled() {
        let conn = open_memory().expect("open");
        let fk: i32 = conn
            .pragma_query_value(None, "foreign_keys", |row| row.get(0))
            .expect("get foreign_keys");
        assert_eq!(fk, 1);
    }

    #[test]
    fn open_file_backed() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("messages.db");
        let conn = open(&path).expect("open");
        drop(conn);
        assert!(path.exists());
    }
}
