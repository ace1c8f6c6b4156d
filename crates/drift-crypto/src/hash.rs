//! SHA-1 hashing and hash-to-group-element.
//!
//! The exchange protocol hashes with SHA-1 everywhere (item blinding and
//! blinded-list fingerprints). The 20-byte digest is lifted into the group
//! by interpreting it as an unsigned big-endian integer exponent.

use num_bigint::BigUint;
use sha1::{Digest, Sha1};

use crate::group::DhGroup;

/// SHA-1 digest of `bytes`.
pub fn sha1_digest(bytes: &[u8]) -> [u8; 20] {
    let mut hasher = Sha1::new();
    hasher.update(bytes);
    hasher.finalize().into()
}

/// Map an item to a group element: `g^(int(SHA-1(item))) mod p`.
pub fn hash_to_group(group: &DhGroup, item: &[u8]) -> BigUint {
    let digest = sha1_digest(item);
    let exponent = BigUint::from_bytes_be(&digest);
    group.exp_g(&exponent)
}
