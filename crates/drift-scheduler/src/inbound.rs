//! Inbound-session tracking.
//!
//! On BLE the radio cannot reliably serve a GATT session and act as a GATT
//! client at once, so the scheduler defers outbound work while an inbound
//! session has been active within the grace window. The listener wraps
//! each responder session in an [`InboundGuard`]; the guard keeps the
//! active count and last-activity stamp honest even when the session
//! panics or is cancelled.

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

/// Shared inbound-session state.
#[derive(Debug, Default)]
pub struct InboundTracker {
    active: AtomicUsize,
    last_activity_ms: AtomicU64,
}

impl InboundTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an inbound session. Drop the guard when it ends.
    pub fn begin(self: &Arc<Self>, now_ms: u64) -> InboundGuard {
        self.active.fetch_add(1, Ordering::SeqCst);
        self.touch(now_ms);
        InboundGuard {
            tracker: Arc::clone(self),
        }
    }

    /// Stamp activity on the current inbound session.
    pub fn touch(&self, now_ms: u64) {
        self.last_activity_ms.fetch_max(now_ms, Ordering::SeqCst);
    }

    pub fn active_count(&self) -> usize {
        self.active.load(Ordering::SeqCst)
    }

    /// Whether an inbound session is active and was busy within the grace
    /// window, the condition under which outbound work defers.
    pub fn should_defer(&self, now_ms: u64, grace_ms: u64) -> bool {
        if self.active.load(Ordering::SeqCst) == 0 {
            return false;
        }
        let idle = now_ms.saturating_sub(self.last_activity_ms.load(Ordering::SeqCst));
        idle < grace_ms
    }
}

/// RAII registration of one inbound session.
pub struct InboundGuard {
    tracker: Arc<InboundTracker>,
}

impl Drop for InboundGuard {
    fn drop(&mut self) {
        self.tracker.active.fetch_sub(1, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defer_only_while_active_and_fresh() {
        let tracker = Arc::new(InboundTracker::new());
        assert!(!tracker.should_defer(1_000, 500));

        let guard = tracker.begin(1_000);
        assert_eq!(tracker.active_count(), 1);
        assert!(tracker.should_defer(1_200, 500), "fresh activity defers");
        assert!(!tracker.should_defer(2_000, 500), "idle session does not");

        tracker.touch(2_000);
        assert!(tracker.should_defer(2_300, 500));

        drop(guard);
        assert_eq!(tracker.active_count(), 0);
        assert!(!tracker.should_defer(2_300, 500), "no active session");
    }

    #[test]
    fn test_nested_guards() {
        let tracker = Arc::new(InboundTracker::new());
        let g1 = tracker.begin(100);
        let g2 = tracker.begin(200);
        assert_eq!(tracker.active_count(), 2);
        drop(g1);
        assert_eq!(tracker.active_count(), 1);
        drop(g2);
        assert_eq!(tracker.active_count(), 0);
    }
}
