//! The message record carried by the mesh.

use rand::RngCore;
use serde::{Deserialize, Serialize};

/// Lower trust clamp.
pub const TRUST_MIN: f64 = 0.01;

/// Upper trust clamp.
pub const TRUST_MAX: f64 = 1.0;

/// Maximum message body length in Unicode code points; longer input is
/// truncated, not rejected.
pub const MAX_BODY_CHARS: usize = 140;

/// A mesh message.
///
/// Identity is by `id`: two messages with equal ids are the same message,
/// whatever the rest of their fields say.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Message {
    /// 128-bit opaque identifier, hex-encoded for locally authored messages.
    pub id: String,
    /// Body text, at most [`MAX_BODY_CHARS`] code points.
    pub body: String,
    /// Optional author pseudonym.
    pub pseudonym: Option<String>,
    /// Trust score in `[TRUST_MIN, TRUST_MAX]`.
    pub trust: f64,
    /// Like count.
    pub likes: u32,
    /// Whether the local user liked this message.
    pub liked: bool,
    /// Wall-clock composition time, milliseconds.
    pub composed_at_ms: u64,
    /// Wall-clock reception time in milliseconds; 0 for locally authored
    /// messages.
    pub received_at_ms: u64,
    /// Whether the local user has read this message.
    pub read: bool,
    /// Number of exchange hops traversed since authorship.
    pub hop_count: u32,
    /// Minimum mutual-friend count required before this message propagates
    /// past its first hop. 0 disables the restriction.
    pub min_contacts_for_hop: u32,
    /// Expiration duration in milliseconds from `composed_at_ms`; 0 = never.
    pub expiration_ms: u64,
    /// Optional "lat lng" location string.
    pub latlong: Option<String>,
    /// Optional parent message id (reply threading).
    pub parent_id: Option<String>,
    /// Optional thread-root message id.
    pub bigparent_id: Option<String>,
}

impl PartialEq for Message {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for Message {}

impl std::hash::Hash for Message {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

impl Message {
    /// Compose a new local message.
    ///
    /// Local authorship means: not yet received from anyone
    /// (`received_at_ms = 0`, `hop_count = 0`), fully trusted, liked and read
    /// by its author. The body is truncated to [`MAX_BODY_CHARS`] code
    /// points.
    pub fn compose(id: String, body: &str, composed_at_ms: u64) -> Self {
        Self {
            id,
            body: truncate_body(body),
            pseudonym: None,
            trust: TRUST_MAX,
            likes: 0,
            liked: true,
            composed_at_ms,
            received_at_ms: 0,
            read: true,
            hop_count: 0,
            min_contacts_for_hop: 0,
            expiration_ms: 0,
            latlong: None,
            parent_id: None,
            bigparent_id: None,
        }
    }

    /// Whether this message has expired at `now_ms`.
    pub fn expired(&self, now_ms: u64) -> bool {
        self.expiration_ms > 0 && self.composed_at_ms.saturating_add(self.expiration_ms) <= now_ms
    }

    /// Diagnostic priority score in `[0, 1]`:
    /// `0.5·trust + 0.3·recency + 0.2·likes_log`.
    ///
    /// Used for display ordering only, never for network selection.
    pub fn priority(&self, now_ms: u64) -> f64 {
        let age_hours = now_ms.saturating_sub(self.composed_at_ms) as f64 / 3_600_000.0;
        let recency = (1.0 - age_hours / 24.0).max(0.0);
        let likes_log = (((self.likes as f64) + 1.0).log10() / 3.0).min(1.0);
        0.5 * self.trust + 0.3 * recency + 0.2 * likes_log
    }
}

/// Truncate a body to [`MAX_BODY_CHARS`] Unicode code points.
pub fn truncate_body(body: &str) -> String {
    body.chars().take(MAX_BODY_CHARS).collect()
}

/// Clamp a trust value into `[TRUST_MIN, TRUST_MAX]`.
pub fn clamp_trust(trust: f64) -> f64 {
    trust.clamp(TRUST_MIN, TRUST_MAX)
}

/// Generate a fresh 128-bit message id, hex-encoded.
pub fn new_message_id<R: RngCore>(rng: &mut R) -> String {
    let mut bytes = [0u8; 16];
    rng.fill_bytes(&mut bytes);
    let mut out = String::with_capacity(32);
    for b in bytes {
        out.push_str(&format!("{b:02x}"));
    }
    out
}
