//! Runtime policy structs injected into the core subsystems.
//!
//! These are plain values: the daemon builds them from its settings file and
//! hands them to the scheduler and each exchange session. The core never
//! reads configuration from a global.

use serde::{Deserialize, Serialize};

/// Policy for one exchange session.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ExchangePolicy {
    /// Run the PSI rounds and gate on mutual friends.
    pub use_trust: bool,
    /// Minimum mutual-friend count a peer must share before messages flow.
    pub min_shared_contacts_for_exchange: u32,
    /// Variance of the Gaussian noise added to outgoing trust values.
    pub trust_noise_variance: f64,
    /// Upper bound on messages sent per session.
    pub max_messages_per_exchange: usize,
    /// Include the author pseudonym in outgoing envelopes.
    pub include_pseudonym: bool,
    /// Include the location string in outgoing envelopes.
    pub share_location: bool,
    /// Per-session progress timeout in milliseconds.
    pub exchange_session_timeout_ms: u64,
}

impl Default for ExchangePolicy {
    fn default() -> Self {
        Self {
            use_trust: true,
            min_shared_contacts_for_exchange: 1,
            trust_noise_variance: 0.001,
            max_messages_per_exchange: 100,
            include_pseudonym: true,
            share_location: false,
            exchange_session_timeout_ms: 10_000,
        }
    }
}

/// Policy for the scheduling loop.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SchedulerPolicy {
    /// Loop period in milliseconds.
    pub exchange_interval_ms: u64,
    /// Minimum gap between outbound exchanges, in seconds.
    pub exchange_cooldown_seconds: u64,
    /// Defer outbound work while an inbound session was active within this
    /// window, in milliseconds.
    pub inbound_session_grace_ms: u64,
    /// Gate repeat attempts behind exponential backoff.
    pub use_backoff: bool,
    /// Backoff base in milliseconds.
    pub backoff_attempt_millis: u64,
    /// Backoff ceiling in milliseconds.
    pub backoff_max_millis: u64,
    /// Pick a single least-recently-picked peer per tick instead of all.
    pub random_exchange: bool,
    /// Bounded worker-pool size for in-flight sessions.
    pub max_concurrent_sessions: usize,
}

impl Default for SchedulerPolicy {
    fn default() -> Self {
        Self {
            exchange_interval_ms: 15_000,
            exchange_cooldown_seconds: 60,
            inbound_session_grace_ms: 5_000,
            use_backoff: true,
            backoff_attempt_millis: 30_000,
            backoff_max_millis: 1_800_000,
            random_exchange: true,
            max_concurrent_sessions: 4,
        }
    }
}

/// BLE framing and timing knobs.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct BlePolicy {
    /// MTU negotiation target.
    pub ble_mtu: u32,
    /// Maximum GATT attribute length.
    pub gatt_max_attribute_length: u32,
    /// How long to wait for a write-complete or ACK before issuing the
    /// recovery read, in milliseconds.
    pub gatt_read_fallback_delay_ms: u64,
    /// Delay before the first write after connect, in milliseconds.
    pub initial_write_delay_ms: u64,
}

impl Default for BlePolicy {
    fn default() -> Self {
        Self {
            ble_mtu: 247,
            gatt_max_attribute_length: 512,
            gatt_read_fallback_delay_ms: 1_000,
            initial_write_delay_ms: 100,
        }
    }
}

/// Message retention policy.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RetentionPolicy {
    /// Run the auto-delete sweep.
    pub autodelete_enabled: bool,
    /// Delete messages at or below this trust.
    pub autodelete_trust_threshold: f64,
    /// Delete messages older than this many days.
    pub autodelete_age_days: u32,
    /// Default expiry applied to newly composed messages, in days
    /// (informational; 0 = never).
    pub timebound_period_days: u32,
}

impl Default for RetentionPolicy {
    fn default() -> Self {
        Self {
            autodelete_enabled: false,
            autodelete_trust_threshold: 0.1,
            autodelete_age_days: 30,
            timebound_period_days: 7,
        }
    }
}
