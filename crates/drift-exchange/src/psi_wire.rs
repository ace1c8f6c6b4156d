//! JSON bodies for the PSI rounds and the admission refusal.
//!
//! Binary values travel as standard-alphabet base64 without padding.

use base64::engine::general_purpose::STANDARD_NO_PAD;
use base64::Engine;
use serde::{Deserialize, Serialize};

use drift_crypto::psi::PsiReply;

use crate::{ExchangeError, Result};

/// A blinded friend set, sent in rounds A and B.
#[derive(Debug, Serialize, Deserialize)]
pub struct BlindedSet {
    pub blinded_friends: Vec<String>,
}

/// A round-C reply: the peer's set double-blinded plus our own blinded
/// list hashed.
#[derive(Debug, Serialize, Deserialize)]
pub struct ReplyBody {
    pub double_blinded: Vec<String>,
    pub hashed_blinded: Vec<String>,
}

/// The admission refusal sent instead of a message batch.
#[derive(Debug, Serialize, Deserialize)]
pub struct RefusalBody {
    pub error: String,
    pub common_friends: u32,
    pub required: u32,
}

/// Label carried in [`RefusalBody::error`].
pub const REFUSAL_INSUFFICIENT_TRUST: &str = "insufficient_trust";

/// Encode a blinded set.
pub fn encode_blinded_set(blinded: &[Vec<u8>]) -> Result<Vec<u8>> {
    let body = BlindedSet {
        blinded_friends: blinded.iter().map(|b| STANDARD_NO_PAD.encode(b)).collect(),
    };
    serde_json::to_vec(&body).map_err(|e| ExchangeError::Protocol(e.to_string()))
}

/// Decode a blinded set.
pub fn decode_blinded_set(bytes: &[u8]) -> Result<Vec<Vec<u8>>> {
    let body: BlindedSet =
        serde_json::from_slice(bytes).map_err(|e| ExchangeError::Protocol(e.to_string()))?;
    body.blinded_friends
        .iter()
        .map(|s| decode_b64(s))
        .collect()
}

/// Encode a PSI reply.
pub fn encode_reply(reply: &PsiReply) -> Result<Vec<u8>> {
    let body = ReplyBody {
        double_blinded: reply
            .double_blinded
            .iter()
            .map(|b| STANDARD_NO_PAD.encode(b))
            .collect(),
        hashed_blinded: reply
            .hashed_blinded
            .iter()
            .map(|h| STANDARD_NO_PAD.encode(h))
            .collect(),
    };
    serde_json::to_vec(&body).map_err(|e| ExchangeError::Protocol(e.to_string()))
}

/// Decode a PSI reply. Hashed entries must be exactly 20 bytes (SHA-1).
pub fn decode_reply(bytes: &[u8]) -> Result<PsiReply> {
    let body: ReplyBody =
        serde_json::from_slice(bytes).map_err(|e| ExchangeError::Protocol(e.to_string()))?;
    let double_blinded = body
        .double_blinded
        .iter()
        .map(|s| decode_b64(s))
        .collect::<Result<Vec<_>>>()?;
    let hashed_blinded = body
        .hashed_blinded
        .iter()
        .map(|s| {
            let bytes = decode_b64(s)?;
            <[u8; 20]>::try_from(bytes.as_slice()).map_err(|_| {
                ExchangeError::Protocol(format!(
                    "hashed entry of {} bytes, expected 20",
                    bytes.len()
                ))
            })
        })
        .collect::<Result<Vec<_>>>()?;
    Ok(PsiReply {
        double_blinded,
        hashed_blinded,
    })
}

/// Encode the admission refusal.
pub fn encode_refusal(common_friends: u32, required: u32) -> Result<Vec<u8>> {
    let body = RefusalBody {
        error: REFUSAL_INSUFFICIENT_TRUST.to_string(),
        common_friends,
        required,
    };
    serde_json::to_vec(&body).map_err(|e| ExchangeError::Protocol(e.to_string()))
}

/// Try to read a frame as a refusal. Returns `None` for anything else.
pub fn try_decode_refusal(bytes: &[u8]) -> Option<RefusalBody> {
    let body: RefusalBody = serde_json::from_slice(bytes).ok()?;
    (body.error == REFUSAL_INSUFFICIENT_TRUST).then_some(body)
}

fn decode_b64(s: &str) -> Result<Vec<u8>> {
    STANDARD_NO_PAD
        .decode(s)
        .map_err(|e| ExchangeError::Protocol(format!("bad base64: {e}")))
}
