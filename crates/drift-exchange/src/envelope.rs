//! The legacy JSON message envelope.
//!
//! Field names below are bit-exact with the deployed wire format and must
//! never be renamed. That includes `latlang`, a historical misspelling
//! that existing peers expect verbatim.
//!
//! The `hop` field is written pre-incremented (`hop_count + 1`) while the
//! decode path stores the received value as-is. The asymmetry is part of
//! the propagation semantics; do not make it symmetric.

use rand::{CryptoRng, RngCore};
use serde::{Deserialize, Serialize};

use drift_types::config::ExchangePolicy;
use drift_types::message::{clamp_trust, truncate_body, Message, TRUST_MIN};

use crate::trust::noisy_trust;
use crate::{ExchangeError, Result};

/// One message as it appears on the wire.
#[derive(Debug, Serialize, Deserialize)]
pub struct WireMessage {
    #[serde(rename = "messageId")]
    pub message_id: String,
    pub text: String,
    /// The like count.
    #[serde(default)]
    pub priority: u32,
    #[serde(default)]
    pub hop: u32,
    #[serde(default)]
    pub min_users_p_hop: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bigparent: Option<String>,
    /// Expiration duration in milliseconds; 0 = never.
    #[serde(default)]
    pub timebound: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pseudonym: Option<String>,
    /// "lat lng" string; the field name is historical.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub latlang: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trust: Option<f64>,
}

/// Encode a stored message for transmission.
///
/// Policy toggles decide the optional fields; the trust value (when
/// shared) carries Gaussian noise so the receiver cannot learn the exact
/// stored score.
pub fn encode_message<R: RngCore + CryptoRng>(
    msg: &Message,
    policy: &ExchangePolicy,
    rng: &mut R,
) -> Result<Vec<u8>> {
    let wire = WireMessage {
        message_id: msg.id.clone(),
        text: msg.body.clone(),
        priority: msg.likes,
        hop: msg.hop_count + 1,
        min_users_p_hop: msg.min_contacts_for_hop,
        parent: msg.parent_id.clone(),
        bigparent: msg.bigparent_id.clone(),
        timebound: msg.expiration_ms,
        pseudonym: if policy.include_pseudonym {
            msg.pseudonym.clone()
        } else {
            None
        },
        latlang: if policy.share_location {
            msg.latlong.clone()
        } else {
            None
        },
        trust: if policy.use_trust {
            Some(noisy_trust(msg.trust, policy.trust_noise_variance, rng))
        } else {
            None
        },
    };
    serde_json::to_vec(&wire).map_err(|e| ExchangeError::Protocol(e.to_string()))
}

/// Decode a received envelope into a storable message.
///
/// The receiver has no authored timestamp on the wire, so both
/// `composed_at_ms` and `received_at_ms` are stamped with `now_ms`. A
/// missing trust field gets the legacy default of [`TRUST_MIN`].
pub fn decode_message(bytes: &[u8], now_ms: u64) -> Result<Message> {
    let wire: WireMessage =
        serde_json::from_slice(bytes).map_err(|e| ExchangeError::Protocol(e.to_string()))?;
    Ok(Message {
        id: wire.message_id,
        body: truncate_body(&wire.text),
        pseudonym: wire.pseudonym,
        trust: clamp_trust(wire.trust.unwrap_or(TRUST_MIN)),
        likes: wire.priority,
        liked: false,
        composed_at_ms: now_ms,
        received_at_ms: now_ms,
        read: false,
        hop_count: wire.hop,
        min_contacts_for_hop: wire.min_users_p_hop,
        expiration_ms: wire.timebound,
        latlong: wire.latlang,
        parent_id: wire.parent,
        bigparent_id: wire.bigparent,
    })
}
