//! The durable message table.
//!
//! Content-addressed by `message_id`; insertion order (rowid) is the
//! protocol's fairness contract for exchange batches, so eligibility queries
//! order by rowid descending and nothing may re-sort them.

use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use rand::RngCore;
use rusqlite::{params, Connection, OptionalExtension, Row};

use drift_types::config::RetentionPolicy;
use drift_types::message::{clamp_trust, Message};

use crate::{DbError, Result};

/// Opaque store-version token.
///
/// Regenerated on every mutation that could make a peer productive again
/// (message added, trust raised). Compared for equality only.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct StoreVersion(u128);

fn fresh_version() -> StoreVersion {
    let mut bytes = [0u8; 16];
    rand::rngs::OsRng.fill_bytes(&mut bytes);
    StoreVersion(u128::from_be_bytes(bytes))
}

/// Durable message store over one SQLite connection.
///
/// Single-writer discipline: all access serialises through the internal
/// mutex. Calls are short and indexed.
pub struct MessageStore {
    conn: Mutex<Connection>,
    version: Mutex<StoreVersion>,
}

const MESSAGE_COLUMNS: &str = "message_id, body, pseudonym, trust, likes, liked, composed_at, \
     received_at, read, hop_count, min_contacts_for_hop, expiration, \
     latlong, parent_id, bigparent_id";

fn row_to_message(row: &Row<'_>) -> rusqlite::Result<Message> {
    Ok(Message {
        id: row.get(0)?,
        body: row.get(1)?,
        pseudonym: row.get(2)?,
        trust: row.get(3)?,
        likes: row.get::<_, i64>(4)?.max(0) as u32,
        liked: row.get(5)?,
        composed_at_ms: row.get::<_, i64>(6)? as u64,
        received_at_ms: row.get::<_, i64>(7)? as u64,
        read: row.get(8)?,
        hop_count: row.get::<_, i64>(9)?.max(0) as u32,
        min_contacts_for_hop: row.get::<_, i64>(10)?.max(0) as u32,
        expiration_ms: row.get::<_, i64>(11)? as u64,
        latlong: row.get(12)?,
        parent_id: row.get(13)?,
        bigparent_id: row.get(14)?,
    })
}

impl MessageStore {
    /// Open (or create) the message store at `path`.
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
            version: Mutex::new(fresh_version()),
        }
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn.lock().map_err(|_| DbError::Poisoned)
    }

    fn bump_version(&self) -> Result<()> {
        *self.version.lock().map_err(|_| DbError::Poisoned)? = fresh_version();
        Ok(())
    }

    /// The current store-version token.
    pub fn store_version(&self) -> Result<StoreVersion> {
        Ok(*self.version.lock().map_err(|_| DbError::Poisoned)?)
    }

    /// Insert a message iff its id is absent. Returns whether it was added.
    ///
    /// Bumps the store-version on success.
    pub fn add(&self, msg: &Message) -> Result<bool> {
        let inserted = {
            let conn = self.conn()?;
            conn.execute(
                "INSERT OR IGNORE INTO messages
                 (message_id, body, pseudonym, trust, likes, liked, composed_at,
                  received_at, read, hop_count, min_contacts_for_hop, expiration,
                  latlong, parent_id, bigparent_id)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15)",
                params![
                    msg.id,
                    msg.body,
                    msg.pseudonym,
                    clamp_trust(msg.trust),
                    msg.likes as i64,
                    msg.liked,
                    msg.composed_at_ms as i64,
                    msg.received_at_ms as i64,
                    msg.read,
                    msg.hop_count as i64,
                    msg.min_contacts_for_hop as i64,
                    msg.expiration_ms as i64,
                    msg.latlong,
                    msg.parent_id,
                    msg.bigparent_id,
                ],
            )? == 1
        };
        if inserted {
            tracing::debug!(id = %msg.id, hop = msg.hop_count, "message stored");
            self.bump_version()?;
        }
        Ok(inserted)
    }

    /// Fetch a message by id.
    pub fn get(&self, id: &str) -> Result<Option<Message>> {
        let conn = self.conn()?;
        let sql = format!("SELECT {MESSAGE_COLUMNS} FROM messages WHERE message_id = ?1");
        Ok(conn
            .query_row(&sql, [id], row_to_message)
            .optional()?)
    }

    /// All non-expired messages, newest composition first.
    pub fn all(&self, now_ms: u64) -> Result<Vec<Message>> {
        let conn = self.conn()?;
        let sql = format!(
            "SELECT {MESSAGE_COLUMNS} FROM messages
             WHERE expiration = 0 OR composed_at + expiration > ?1
             ORDER BY composed_at DESC"
        );
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt
            .query_map([now_ms as i64], row_to_message)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }

    /// Messages eligible to send to a peer sharing `common_friends` mutual
    /// friends, newest insertion first, at most `limit`.
    ///
    /// A message qualifies iff it is unexpired and either carries no
    /// propagation restriction or is a first-hop message whose restriction
    /// is met by `common_friends`.
    pub fn eligible_for_exchange(
        &self,
        common_friends: u32,
        limit: usize,
        now_ms: u64,
    ) -> Result<Vec<Message>> {
        let conn = self.conn()?;
        let sql = format!(
            "SELECT {MESSAGE_COLUMNS} FROM messages
             WHERE (expiration = 0 OR composed_at + expiration > ?1)
               AND (min_contacts_for_hop <= 0
                    OR (hop_count = 0 AND min_contacts_for_hop <= ?2))
             ORDER BY rowid DESC
             LIMIT ?3"
        );
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt
            .query_map(
                params![now_ms as i64, common_friends as i64, limit as i64],
                row_to_message,
            )?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }

    /// Set a message's trust, clamped to the valid range.
    ///
    /// Returns whether the stored value changed; bumps the store-version
    /// iff it did.
    pub fn update_trust(&self, id: &str, new_trust: f64) -> Result<bool> {
        let clamped = clamp_trust(new_trust);
        let changed = {
            let conn = self.conn()?;
            let existing: Option<f64> = conn
                .query_row("SELECT trust FROM messages WHERE message_id = ?1", [id], |r| {
                    r.get(0)
                })
                .optional()?;
            match existing {
                None => return Err(DbError::NotFound(format!("message {id}"))),
                Some(t) if t == clamped => false,
                Some(_) => {
                    conn.execute(
                        "UPDATE messages SET trust = ?1 WHERE message_id = ?2",
                        params![clamped, id],
                    )?;
                    true
                }
            }
        };
        if changed {
            self.bump_version()?;
        }
        Ok(changed)
    }

    /// Like or unlike a message: adjusts the like count by one (never below
    /// zero) and records the local flag.
    pub fn like(&self, id: &str, liked: bool) -> Result<()> {
        let conn = self.conn()?;
        let updated = conn.execute(
            "UPDATE messages
             SET likes = CASE WHEN ?1 THEN likes + 1 ELSE MAX(likes - 1, 0) END,
                 liked = ?1
             WHERE message_id = ?2",
            params![liked, id],
        )?;
        if updated == 0 {
            return Err(DbError::NotFound(format!("message {id}")));
        }
        Ok(())
    }

    /// Mark a message read.
    pub fn mark_read(&self, id: &str) -> Result<()> {
        let conn = self.conn()?;
        let updated = conn.execute(
            "UPDATE messages SET read = 1 WHERE message_id = ?1",
            [id],
        )?;
        if updated == 0 {
            return Err(DbError::NotFound(format!("message {id}")));
        }
        Ok(())
    }

    /// Delete messages per the retention policy: trust at or below the
    /// threshold, older than the age cutoff, or past their expiration.
    ///
    /// No-op when the policy is disabled. Returns the number deleted.
    pub fn auto_delete(&self, policy: &RetentionPolicy, now_ms: u64) -> Result<usize> {
        if !policy.autodelete_enabled {
            return Ok(0);
        }
        let age_cutoff =
            now_ms.saturating_sub(u64::from(policy.autodelete_age_days) * 86_400_000);
        let deleted = {
            let mut conn = self.conn()?;
            let tx = conn.transaction()?;
            let deleted = tx.execute(
                "DELETE FROM messages
                 WHERE trust <= ?1
                    OR composed_at < ?2
                    OR (expiration > 0 AND composed_at + expiration < ?3)",
                params![
                    policy.autodelete_trust_threshold,
                    age_cutoff as i64,
                    now_ms as i64
                ],
            )?;
            tx.commit()?;
            deleted
        };
        if deleted > 0 {
            tracing::info!(deleted, "auto-delete sweep removed messages");
        }
        Ok(deleted)
    }

    /// Non-expired messages ordered by the diagnostic priority score,
    /// best first. Display ordering only; exchange batches use insertion
    /// order.
    pub fn all_by_priority(&self, now_ms: u64) -> Result<Vec<Message>> {
        let mut messages = self.all(now_ms)?;
        messages.sort_by(|a, b| {
            b.priority(now_ms)
                .partial_cmp(&a.priority(now_ms))
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        Ok(messages)
    }

    /// Number of stored messages, expired included.
    pub fn count(&self) -> Result<usize> {
        let conn = self.conn()?;
        let n: i64 = conn.query_row("SELECT COUNT(*) FROM messages", [], |r| r.get(0))?;
        Ok(n.max(0) as usize)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> MessageStore {
        MessageStore::open_memory().expect("open store")
    }

    fn msg(id: &str, composed_at_ms: u64) -> Message {
        Message::compose(id.to_string(), "hello", composed_at_ms)
    }

    #[test]
    fn test_add_is_idempotent() {
        let store = store();
        let m = msg("m1", 100);
        assert!(store.add(&m).expect("first add"));
        let mut dup = msg("m1", 999);
        dup.body = "different body".into();
        assert!(!store.add(&dup).expect("second add"));
        let stored = store.get("m1").expect("get").expect("present");
        assert_eq!(stored.body, "hello");
        assert_eq!(stored.composed_at_ms, 100);
    }

    #[test]
    fn test_all_ordered_and_excludes_expired() {
        let store = store();
        store.add(&msg("old", 100)).expect("add");
        store.add(&msg("new", 300)).expect("add");
        let mut expired = msg("gone", 200);
        expired.expiration_ms = 50;
        store.add(&expired).expect("add");

        let all = store.all(1_000).expect("all");
        let ids: Vec<&str> = all.iter().map(|m| m.id.as_str()).collect();
        assert_eq!(ids, ["new", "old"]);
    }

    #[test]
    fn test_eligibility_newest_insertion_first() {
        let store = store();
        for i in 0..5 {
            // Composition times deliberately reversed: ordering is by
            // insertion, not composition.
            store.add(&msg(&format!("m{i}"), 1_000 - i)).expect("add");
        }
        let batch = store.eligible_for_exchange(0, 3, 2_000).expect("eligible");
        let ids: Vec<&str> = batch.iter().map(|m| m.id.as_str()).collect();
        assert_eq!(ids, ["m4", "m3", "m2"]);
    }

    #[test]
    fn test_eligibility_hop_restriction() {
        let store = store();
        let mut restricted = msg("first-hop", 100);
        restricted.min_contacts_for_hop = 3;
        store.add(&restricted).expect("add");

        let mut travelled = msg("second-hop", 100);
        travelled.min_contacts_for_hop = 3;
        travelled.hop_count = 1;
        store.add(&travelled).expect("add");

        // Not enough mutual friends: neither restricted message flows.
        assert!(store
            .eligible_for_exchange(2, 10, 1_000)
            .expect("eligible")
            .is_empty());

        // Enough mutual friends: only the hop-0 copy flows; a restricted
        // message that already travelled never flows again.
        let ids: Vec<String> = store
            .eligible_for_exchange(3, 10, 1_000)
            .expect("eligible")
            .into_iter()
            .map(|m| m.id)
            .collect();
        assert_eq!(ids, ["first-hop"]);
    }

    #[test]
    fn test_eligibility_monotone_in_common_friends() {
        let store = store();
        for i in 0..4 {
            let mut m = msg(&format!("m{i}"), 100);
            m.min_contacts_for_hop = i;
            store.add(&m).expect("add");
        }
        let mut previous: Vec<String> = vec![];
        for common in 0..5 {
            let ids: Vec<String> = store
                .eligible_for_exchange(common, 100, 1_000)
                .expect("eligible")
                .into_iter()
                .map(|m| m.id)
                .collect();
            for id in &previous {
                assert!(ids.contains(id), "eligible({common}) lost {id}");
            }
            previous = ids;
        }
    }

    #[test]
    fn test_trust_clamped_and_version_semantics() {
        let store = store();
        store.add(&msg("m1", 100)).expect("add");

        let v0 = store.store_version().expect("version");
        assert!(store.update_trust("m1", 5.0).expect("raise"));
        let v1 = store.store_version().expect("version");
        assert_ne!(v0, v1, "trust change must bump version");
        assert_eq!(store.get("m1").expect("get").expect("m").trust, 1.0);

        // Same clamped value again: no change, no bump.
        assert!(!store.update_trust("m1", 2.0).expect("same"));
        assert_eq!(store.store_version().expect("version"), v1);

        assert!(store.update_trust("m1", -3.0).expect("lower"));
        assert_eq!(store.get("m1").expect("get").expect("m").trust, 0.01);
    }

    #[test]
    fn test_update_trust_missing_message() {
        let store = store();
        assert!(matches!(
            store.update_trust("ghost", 0.5),
            Err(DbError::NotFound(_))
        ));
    }

    #[test]
    fn test_like_floor_at_zero() {
        let store = store();
        store.add(&msg("m1", 100)).expect("add");
        store.like("m1", false).expect("unlike");
        assert_eq!(store.get("m1").expect("get").expect("m").likes, 0);
        store.like("m1", true).expect("like");
        store.like("m1", true).expect("like again");
        assert_eq!(store.get("m1").expect("get").expect("m").likes, 2);
    }

    #[test]
    fn test_mark_read() {
        let store = store();
        let mut m = msg("m1", 100);
        m.read = false;
        store.add(&m).expect("add");
        store.mark_read("m1").expect("mark");
        assert!(store.get("m1").expect("get").expect("m").read);
    }

    #[test]
    fn test_auto_delete_criteria() {
        let store = store();
        let now: u64 = 100 * 86_400_000;

        let mut low_trust = msg("low-trust", now - 1_000);
        low_trust.trust = 0.05;
        store.add(&low_trust).expect("add");

        store.add(&msg("ancient", now - 40 * 86_400_000)).expect("add");

        let mut lapsed = msg("lapsed", now - 10_000);
        lapsed.expiration_ms = 5_000;
        store.add(&lapsed).expect("add");

        store.add(&msg("keeper", now - 1_000)).expect("add");

        let policy = RetentionPolicy {
            autodelete_enabled: true,
            autodelete_trust_threshold: 0.1,
            autodelete_age_days: 30,
            timebound_period_days: 7,
        };
        let deleted = store.auto_delete(&policy, now).expect("sweep");
        assert_eq!(deleted, 3);
        assert_eq!(store.count().expect("count"), 1);
        assert!(store.get("keeper").expect("get").is_some());
    }

    #[test]
    fn test_auto_delete_disabled_is_noop() {
        let store = store();
        let mut m = msg("m1", 0);
        m.trust = 0.05;
        store.add(&m).expect("add");
        let policy = RetentionPolicy::default();
        assert_eq!(store.auto_delete(&policy, u64::MAX / 2).expect("sweep"), 0);
        assert_eq!(store.count().expect("count"), 1);
    }

    #[test]
    fn test_priority_ordering_prefers_trusted_and_liked() {
        let store = store();
        let now = 10 * 3_600_000;

        let mut trusted = msg("trusted", now - 3_600_000);
        trusted.trust = 1.0;
        store.add(&trusted).expect("add");

        let mut doubted = msg("doubted", now - 3_600_000);
        doubted.trust = 0.05;
        store.add(&doubted).expect("add");

        let mut popular = msg("popular", now - 3_600_000);
        popular.trust = 0.05;
        popular.likes = 500;
        store.add(&popular).expect("add");

        let ordered: Vec<String> = store
            .all_by_priority(now)
            .expect("priority")
            .into_iter()
            .map(|m| m.id)
            .collect();
        assert_eq!(ordered[0], "trusted");
        assert_eq!(ordered[1], "popular", "likes outrank nothing at all");
        assert_eq!(ordered[2], "doubted");
    }

    #[test]
    fn test_add_bumps_version() {
        let store = store();
        let v0 = store.store_version().expect("version");
        store.add(&msg("m1", 100)).expect("add");
        assert_ne!(store.store_version().expect("version"), v0);

        // A rejected duplicate adds no information.
        let v1 = store.store_version().expect("version");
        store.add(&msg("m1", 100)).expect("dup");
        assert_eq!(store.store_version().expect("version"), v1);
    }
}
