//! Per-address exchange bookkeeping and the backoff schedule.

use std::collections::{HashMap, HashSet};

use drift_db::StoreVersion;

/// What the scheduler remembers about one remote address.
#[derive(Clone, Debug)]
pub struct PeerHistory {
    /// When the last attempt against this address finished.
    pub last_exchange_ms: u64,
    /// When this address was last picked by the selection step.
    pub last_picked_ms: u64,
    /// The local store-version observed when the last attempt finished.
    /// A change since then makes the peer worth retrying immediately.
    pub last_store_version: StoreVersion,
    /// Consecutive unproductive attempts.
    pub failed_attempts: u32,
}

/// The minimum wait after `attempts` unproductive tries:
/// `min(base · 2^attempts, max)`, saturating.
pub fn backoff_wait_ms(base_ms: u64, max_ms: u64, attempts: u32) -> u64 {
    if attempts >= 63 {
        return max_ms;
    }
    base_ms.saturating_mul(1u64 << attempts).min(max_ms)
}

/// History table, keyed by remote address. Owned solely by the scheduler.
#[derive(Default)]
pub struct ExchangeHistory {
    entries: HashMap<String, PeerHistory>,
}

impl ExchangeHistory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, address: &str) -> Option<&PeerHistory> {
        self.entries.get(address)
    }

    /// Note that the selection step picked this address, creating the
    /// entry if this is the first contact.
    pub fn record_picked(&mut self, address: &str, now_ms: u64, store_version: StoreVersion) {
        let entry = self
            .entries
            .entry(address.to_string())
            .or_insert(PeerHistory {
                last_exchange_ms: 0,
                last_picked_ms: now_ms,
                last_store_version: store_version,
                failed_attempts: 0,
            });
        entry.last_picked_ms = now_ms;
    }

    /// Record a finished attempt. A productive exchange resets the failure
    /// counter; anything else increments it. The current store-version is
    /// stamped either way.
    pub fn record_attempt(
        &mut self,
        address: &str,
        productive: bool,
        now_ms: u64,
        store_version: StoreVersion,
    ) {
        let entry = self
            .entries
            .entry(address.to_string())
            .or_insert(PeerHistory {
                last_exchange_ms: 0,
                last_picked_ms: now_ms,
                last_store_version: store_version,
                failed_attempts: 0,
            });
        entry.last_exchange_ms = now_ms;
        entry.last_store_version = store_version;
        if productive {
            entry.failed_attempts = 0;
        } else {
            entry.failed_attempts = entry.failed_attempts.saturating_add(1);
        }
    }

    /// Drop entries for addresses no longer visible.
    pub fn prune_to(&mut self, visible: &HashSet<String>) {
        self.entries.retain(|address, _| visible.contains(address));
    }

    /// When this address was last picked; addresses with no history sort
    /// first in least-recently-picked selection.
    pub fn last_picked_ms(&self, address: &str) -> Option<u64> {
        self.entries.get(address).map(|e| e.last_picked_ms)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn version() -> StoreVersion {
        drift_db::MessageStore::open_memory()
            .expect("store")
            .store_version()
            .expect("version")
    }

    #[test]
    fn test_backoff_monotone_and_capped() {
        let base = 1_000;
        let max = 60_000;
        let mut previous = 0;
        for attempts in 0..100 {
            let wait = backoff_wait_ms(base, max, attempts);
            assert!(wait >= previous, "backoff must be non-decreasing");
            assert!(wait <= max);
            previous = wait;
        }
        // Saturates at the cap, not at base * 2^10.
        assert_eq!(backoff_wait_ms(base, max, 10), 60_000);
        assert_eq!(backoff_wait_ms(base, max, 0), 1_000);
        assert_eq!(backoff_wait_ms(base, max, 5), 32_000);
    }

    #[test]
    fn test_backoff_no_overflow() {
        assert_eq!(backoff_wait_ms(u64::MAX / 2, u64::MAX, 64), u64::MAX);
        assert_eq!(backoff_wait_ms(1, u64::MAX, 200), u64::MAX);
    }

    #[test]
    fn test_failures_accumulate_and_reset() {
        let mut history = ExchangeHistory::new();
        let v = version();
        for _ in 0..3 {
            history.record_attempt("addr", false, 100, v);
        }
        assert_eq!(history.get("addr").expect("entry").failed_attempts, 3);

        history.record_attempt("addr", true, 200, v);
        let entry = history.get("addr").expect("entry");
        assert_eq!(entry.failed_attempts, 0);
        assert_eq!(entry.last_exchange_ms, 200);
    }

    #[test]
    fn test_prune_to_visible() {
        let mut history = ExchangeHistory::new();
        let v = version();
        history.record_attempt("gone", false, 100, v);
        history.record_attempt("here", false, 100, v);

        let visible: HashSet<String> = ["here".to_string()].into();
        history.prune_to(&visible);
        assert!(history.get("gone").is_none());
        assert!(history.get("here").is_some());
        assert_eq!(history.len(), 1);
    }

    #[test]
    fn test_record_picked_upserts() {
        let mut history = ExchangeHistory::new();
        let v = version();
        history.record_picked("fresh", 100, v);
        let entry = history.get("fresh").expect("entry");
        assert_eq!(entry.last_picked_ms, 100);
        assert_eq!(entry.last_exchange_ms, 0);
        assert_eq!(entry.failed_attempts, 0);

        history.record_attempt("fresh", false, 200, v);
        history.record_picked("fresh", 500, v);
        let entry = history.get("fresh").expect("entry");
        assert_eq!(entry.last_picked_ms, 500);
        assert_eq!(entry.failed_attempts, 1, "picking must not clear failures");
    }
}
