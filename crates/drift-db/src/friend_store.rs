//! The friend set and the local identity keypair.
//!
//! Friends are public identities (DH public elements). The identity table
//! holds exactly one keypair, split over two rows keyed by `key_type`.

use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use rusqlite::{params, Connection, OptionalExtension};

use drift_types::friend::Friend;

use crate::{DbError, Result};

/// Durable friend and identity store over one SQLite connection.
pub struct FriendStore {
    conn: Mutex<Connection>,
}

impl FriendStore {
    /// Open (or create) the friend store at `path`.
    pub fn open(path: &Path) -> Result<Self> {
        Ok(Self::from_connection(crate::open(path)?))
    }

    /// Open an in-memory store (for testing).
    pub fn open_memory() -> Result<Self> {
        Ok(Self::from_connection(crate::open_memory()?))
    }

    /// Wrap an already-migrated connection.
    pub fn from_connection(conn: Connection) -> Self {
        Self {
            conn: Mutex::new(conn),
        }
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn.lock().map_err(|_| DbError::Poisoned)
    }

    /// Add a friend by public id. Idempotent; returns whether a new entry
    /// was created.
    pub fn add_friend(
        &self,
        public_id: &[u8],
        nickname: Option<&str>,
        now_ms: u64,
    ) -> Result<bool> {
        let conn = self.conn()?;
        let inserted = conn.execute(
            "INSERT OR IGNORE INTO friends (public_id, nickname, added_at)
             VALUES (?1, ?2, ?3)",
            params![public_id, nickname, now_ms as i64],
        )? == 1;
        if inserted {
            let total = self.count_locked(&conn)?;
            tracing::info!(friends = total, "friend added");
        }
        Ok(inserted)
    }

    /// Remove a friend. Returns whether an entry existed.
    pub fn remove_friend(&self, public_id: &[u8]) -> Result<bool> {
        let conn = self.conn()?;
        Ok(conn.execute("DELETE FROM friends WHERE public_id = ?1", [public_id])? == 1)
    }

    /// Set or clear a friend's nickname.
    pub fn set_nickname(&self, public_id: &[u8], nickname: Option<&str>) -> Result<()> {
        let conn = self.conn()?;
        let updated = conn.execute(
            "UPDATE friends SET nickname = ?1 WHERE public_id = ?2",
            params![nickname, public_id],
        )?;
        if updated == 0 {
            return Err(DbError::NotFound("friend".into()));
        }
        Ok(())
    }

    /// All friends, oldest first.
    pub fn all_friends(&self) -> Result<Vec<Friend>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT public_id, nickname, added_at FROM friends ORDER BY added_at ASC",
        )?;
        let rows = stmt
            .query_map([], |row| {
                Ok(Friend {
                    public_id: row.get(0)?,
                    nickname: row.get(1)?,
                    added_at_ms: row.get::<_, i64>(2)? as u64,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }

    /// All friend public ids (the PSI input set, before the local id is
    /// appended).
    pub fn all_friend_ids(&self) -> Result<Vec<Vec<u8>>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare("SELECT public_id FROM friends ORDER BY added_at ASC")?;
        let rows = stmt
            .query_map([], |row| row.get(0))?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }

    /// Number of friends.
    pub fn friend_count(&self) -> Result<usize> {
        let conn = self.conn()?;
        self.count_locked(&conn)
    }

    fn count_locked(&self, conn: &Connection) -> Result<usize> {
        let n: i64 = conn.query_row("SELECT COUNT(*) FROM friends", [], |r| r.get(0))?;
        Ok(n.max(0) as usize)
    }

    /// The local identity keypair as `(public, private)` bytes, if one has
    /// been stored.
    pub fn identity(&self) -> Result<Option<(Vec<u8>, Vec<u8>)>> {
        let conn = self.conn()?;
        let public: Option<Vec<u8>> = conn
            .query_row(
                "SELECT key_bytes FROM identity WHERE key_type = 'public'",
                [],
                |r| r.get(0),
            )
            .optional()?;
        let private: Option<Vec<u8>> = conn
            .query_row(
                "SELECT key_bytes FROM identity WHERE key_type = 'private'",
                [],
                |r| r.get(0),
            )
            .optional()?;
        match (public, private) {
            (Some(public), Some(private)) => Ok(Some((public, private))),
            (None, None) => Ok(None),
            _ => Err(DbError::Migration("identity table is half-populated".into())),
        }
    }

    /// Store (or replace) the local identity keypair.
    pub fn store_identity(&self, public: &[u8], private: &[u8]) -> Result<()> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        tx.execute(
            "INSERT OR REPLACE INTO identity (key_type, key_bytes) VALUES ('public', ?1)",
            [public],
        )?;
        tx.execute(
            "INSERT OR REPLACE INTO identity (key_type, key_bytes) VALUES ('private', ?1)",
            [private],
        )?;
        tx.commit()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> FriendStore {
        FriendStore::open_memory().expect("open store")
    }

    #[test]
    fn test_add_is_idempotent() {
        let store = store();
        assert!(store.add_friend(b"peer-1", Some("Ada"), 100).expect("add"));
        assert!(!store.add_friend(b"peer-1", Some("Other"), 200).expect("dup"));
        let friends = store.all_friends().expect("all");
        assert_eq!(friends.len(), 1);
        assert_eq!(friends[0].nickname.as_deref(), Some("Ada"));
        assert_eq!(friends[0].added_at_ms, 100);
    }

    #[test]
    fn test_remove() {
        let store = store();
        store.add_friend(b"peer-1", None, 100).expect("add");
        assert!(store.remove_friend(b"peer-1").expect("remove"));
        assert!(!store.remove_friend(b"peer-1").expect("remove again"));
        assert_eq!(store.friend_count().expect("count"), 0);
    }

    #[test]
    fn test_nickname() {
        let store = store();
        store.add_friend(b"peer-1", None, 100).expect("add");
        store.set_nickname(b"peer-1", Some("Grace")).expect("set");
        let friends = store.all_friends().expect("all");
        assert_eq!(friends[0].nickname.as_deref(), Some("Grace"));
        assert!(store.set_nickname(b"ghost", Some("x")).is_err());
    }

    #[test]
    fn test_friend_ids_in_added_order() {
        let store = store();
        store.add_friend(b"a", None, 100).expect("add");
        store.add_friend(b"b", None, 200).expect("add");
        store.add_friend(b"c", None, 300).expect("add");
        let ids = store.all_friend_ids().expect("ids");
        assert_eq!(ids, vec![b"a".to_vec(), b"b".to_vec(), b"c".to_vec()]);
    }

    #[test]
    fn test_identity_roundtrip() {
        let store = store();
        assert!(store.identity().expect("empty").is_none());
        store.store_identity(b"pub-bytes", b"priv-bytes").expect("store");
        let (public, private) = store.identity().expect("get").expect("present");
        assert_eq!(public, b"pub-bytes");
        assert_eq!(private, b"priv-bytes");

        // Replacing is allowed (key rotation).
        store.store_identity(b"pub-2", b"priv-2").expect("replace");
        let (public, _) = store.identity().expect("get").expect("present");
        assert_eq!(public, b"pub-2");
    }
}
