//! Database migration runner.
//!
//! Schema version stored in `PRAGMA user_version`. Migrations are
//! forward-only; a database newer than this build is refused.

use rusqlite::Connection;

use crate::{schema, DbError, Result, SCHEMA_VERSION};

/// Run all pending migrations.
pub fn run(conn: &Connection) -> Result<()> {
    let mut current: u32 = conn
        .pragma_query_value(None, "user_version", |row| row.get(0))
        .map_err(DbError::Sqlite)?;

    if current > SCHEMA_VERSION {
        return Err(DbError::Migration(format!(
            "database version {current} is newer than supported {SCHEMA_VERSION}"
        )));
    }

    if current == 0 {
        tracing::info!("initializing database schema v1");
        conn.execute_batch(schema::SCHEMA_V1)
            .map_err(DbError::Sqlite)?;
        conn.pragma_update(None, "user_version", 1)
            .map_err(DbError::Sqlite)?;
        current = 1;
    }

    for version in (current + 1)..=SCHEMA_VERSION {
        tracing::info!("running migration to v{version}");
        run_migration(conn, version)?;
        conn.pragma_update(None, "user_version", version)
            .map_err(DbError::Sqlite)?;
    }

    Ok(())
}

/// Run a specific migration step.
fn run_migration(conn: &Connection, version: u32) -> Result<()> {
    match version {
        2 => conn
            .execute_batch(schema::MIGRATION_V2)
            .map_err(DbError::Sqlite),
        _ => Err(DbError::Migration(format!(
            "unknown migration version: {version}"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn raw_conn() -> Connection {
        let conn = Connection::open_in_memory().expect("open");
        conn.execute_batch("PRAGMA foreign_keys = ON;").expect("pragma");
        conn
    }

    #[test]
    fn test_fresh_migration_reaches_latest() {
        let conn = raw_conn();
        run(&conn).expect("migrate");
        let version: u32 = conn
            .pragma_query_value(None, "user_version", |row| row.get(0))
            .expect("version");
        assert_eq!(version, SCHEMA_VERSION);
    }

    #[test]
    fn test_idempotent() {
        let conn = raw_conn();
        run(&conn).expect("first run");
        run(&conn).expect("second run should be a no-op");
    }

    #[test]
    fn test_v1_to_v2_adds_columns() {
        let conn = raw_conn();
        conn.execute_batch(schema::SCHEMA_V1).expect("v1");
        conn.pragma_update(None, "user_version", 1).expect("set v1");

        run(&conn).expect("migrate to v2");

        // The v2 columns must now accept values.
        conn.execute(
            "INSERT INTO messages
             (message_id, body, trust, composed_at, latlong, parent_id, bigparent_id)
             VALUES ('m1', 'hi', 1.0, 0, '1.0 2.0', 'p', 'bp')",
            [],
        )
        .expect("insert with v2 columns");
    }

    #[test]
    fn test_newer_database_refused() {
        let conn = raw_conn();
        conn.pragma_update(None, "user_version", SCHEMA_VERSION + 1)
            .expect("set future version");
        assert!(matches!(run(&conn), Err(DbError::Migration(_))));
    }

    #[test]
    fn test_tables_created() {
        let conn = raw_conn();
        run(&conn).expect("migrate");
        for table in ["messages", "friends", "identity"] {
            let count: i64 = conn
                .query_row(
                    "SELECT COUNT(*) FROM sqlite_master WHERE type='table' AND name=?1",
                    [table],
                    |row| row.get(0),
                )
                .expect("query sqlite_master");
            assert_eq!(count, 1, "table '{table}' should exist");
        }
    }
}
