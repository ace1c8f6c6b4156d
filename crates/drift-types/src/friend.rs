//! Friend entries: remote public identities the local user trusts.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use serde::{Deserialize, Serialize};

use crate::{Result, TypeError};

/// A friend is a peer's DH public key, optionally nicknamed.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Friend {
    /// The peer's public identity bytes (big-endian DH public element).
    pub public_id: Vec<u8>,
    /// Local display nickname.
    pub nickname: Option<String>,
    /// When this friend was added, wall-clock milliseconds.
    pub added_at_ms: u64,
}

impl Friend {
    /// The URL-safe base64 encoding of the public id, as stored and shown.
    pub fn encoded_id(&self) -> String {
        encode_public_id(&self.public_id)
    }
}

/// Encode a public id as URL-safe unpadded base64.
pub fn encode_public_id(public_id: &[u8]) -> String {
    URL_SAFE_NO_PAD.encode(public_id)
}

/// Decode a URL-safe unpadded base64 public id.
///
/// # Errors
///
/// Returns [`TypeError::InvalidPublicId`] when the input is not valid
/// URL-safe base64.
pub fn decode_public_id(encoded: &str) -> Result<Vec<u8>> {
    URL_SAFE_NO_PAD
        .decode(encoded)
        .map_err(|e| TypeError::InvalidPublicId(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_public_id_roundtrip() {
        let id = vec![0x00, 0xff, 0x10, 0x80, 0x7f];
        let encoded = encode_public_id(&id);
        assert!(!encoded.contains('='));
        assert_eq!(decode_public_id(&encoded).expect("decode"), id);
    }

    #[test]
    fn test_bad_encoding_rejected() {
        assert!(decode_public_id("not!!valid??").is_err());
    }
}
