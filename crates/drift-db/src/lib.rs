//! # drift-db
//!
//! Durable storage for the drift node: the message table and the
//! friend/identity tables, both in one SQLite database.
//!
//! ## Schema
//!
//! - WAL mode, foreign keys on
//! - All timestamps are wall-clock milliseconds (i64 columns)
//! - Schema version lives in `PRAGMA user_version`; v2 added the location
//!   and threading columns to `messages`

pub mod friend_store;
pub mod message_store;
pub mod migrations;
pub mod schema;

use std::path::Path;

use rusqlite::Connection;

pub use friend_store::FriendStore;
pub use message_store::{MessageStore, StoreVersion};

/// Current schema version.
pub const SCHEMA_VERSION: u32 = 2;

/// Database error types.
#[derive(Debug, thiserror::Error)]
pub enum DbError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("migration failed: {0}")]
    Migration(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("store lock poisoned")]
    Poisoned,
}

pub type Result<T> = std::result::Result<T, DbError>;

/// Open or create the drift database at the given path.
///
/// Configures WAL mode and foreign keys and runs any pending migrations.
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

/// Configure SQLite pragmas.
fn configure(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "PRAGMA journal_mode = WAL;
         PRAGMA foreign_keys = ON;
         PRAGMA busy_timeout = 5000;
         PRAGMA synchronous = NORMAL;",
    )?;
    Ok(())
}
