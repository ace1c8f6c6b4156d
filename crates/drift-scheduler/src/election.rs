//! Deterministic initiator election.
//!
//! When two peers see each other simultaneously, exactly one of them may
//! open the outbound session. Both sides hash the lexicographically
//! ordered pair of identity strings and read one bit of the digest; since
//! both compute the same function of the same inputs, they agree without
//! any coordination.

use sha2::{Digest, Sha256};

/// Whether the local side initiates the exchange with `peer`.
///
/// A missing identity on either side breaks the symmetry argument, so the
/// local side initiates unconditionally rather than risk neither side
/// dialing.
pub fn elect_initiator(local: &str, peer: &str) -> bool {
    if local.is_empty() || peer.is_empty() {
        return true;
    }
    let (first, second) = if local <= peer {
        (local, peer)
    } else {
        (peer, local)
    };
    let mut hasher = Sha256::new();
    hasher.update(first.as_bytes());
    hasher.update(second.as_bytes());
    let digest = hasher.finalize();
    let initiator = if digest[0] & 0x80 != 0 { first } else { second };
    initiator == local
}
