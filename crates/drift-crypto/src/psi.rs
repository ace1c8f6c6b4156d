//! PSI-Ca: private set intersection cardinality.
//!
//! One [`PsiSession`] encodes one side of the Cristofaro et al. PSI-Ca
//! protocol. Both peers blind their item sets with a fresh secret exponent,
//! swap blinded lists, double-blind each other's list, and count matches
//! after unblinding. Each learns only how many items they share, never
//! which.
//!
//! A session is single-use: it is constructed per exchange and consumed by
//! [`PsiSession::cardinality`]. The secret exponent never leaves the session.

use std::collections::HashSet;

use num_bigint::BigUint;
use rand::seq::SliceRandom;
use rand::{CryptoRng, RngCore};

use crate::group::group;
use crate::hash::{hash_to_group, sha1_digest};
use crate::{CryptoError, Result};

/// The server-role response to a peer's blinded list.
#[derive(Clone, Debug)]
pub struct PsiReply {
    /// The peer's blinded elements raised to our secret, shuffled.
    pub double_blinded: Vec<Vec<u8>>,
    /// SHA-1 of each of our own blinded elements, in emission order.
    pub hashed_blinded: Vec<[u8; 20]>,
}

/// One side of a PSI-Ca exchange.
pub struct PsiSession {
    /// Session secret `x = g^r mod p`; `r` is discarded at construction.
    x: BigUint,
    /// Blinded local items, shuffled once at construction.
    blinded: Vec<BigUint>,
}

impl PsiSession {
    /// Construct a session over the local item set.
    ///
    /// Samples `r` uniformly from `[2, q-1]`, derives the session secret
    /// `x = g^r mod p`, blinds every item as `(g^(int(SHA-1(item))))^x mod p`
    /// and shuffles the blinded list. The order fixed here is the order
    /// [`encode_blinded`](Self::encode_blinded) and the `hashed_blinded`
    /// half of [`reply`](Self::reply) emit.
    pub fn new<R: RngCore + CryptoRng>(items: &[Vec<u8>], rng: &mut R) -> Self {
        let grp = group();
        let r = grp.random_exponent(rng);
        let x = grp.exp_g(&r);

        let mut blinded: Vec<BigUint> = items
            .iter()
            .map(|item| grp.mod_exp(&hash_to_group(grp, item), &x))
            .collect();
        blinded.shuffle(rng);

        Self { x, blinded }
    }

    /// Number of local items in this session.
    pub fn len(&self) -> usize {
        self.blinded.len()
    }

    /// Whether the local item set is empty.
    pub fn is_empty(&self) -> bool {
        self.blinded.is_empty()
    }

    /// The blinded local items as big-endian unsigned bytes.
    ///
    /// Deterministic after construction.
    pub fn encode_blinded(&self) -> Vec<Vec<u8>> {
        self.blinded.iter().map(|b| b.to_bytes_be()).collect()
    }

    /// Build the response to the peer's blinded list: their elements raised
    /// to our secret (shuffled) plus SHA-1 fingerprints of our own blinded
    /// list in its emission order.
    ///
    /// # Errors
    ///
    /// Returns [`CryptoError::InvalidElement`] or
    /// [`CryptoError::MalformedInput`] when a remote element is empty, zero,
    /// one, or not less than the modulus.
    pub fn reply<R: RngCore + CryptoRng>(
        &self,
        remote_blinded: &[Vec<u8>],
        rng: &mut R,
    ) -> Result<PsiReply> {
        let grp = group();

        let mut double_blinded = Vec::with_capacity(remote_blinded.len());
        for bytes in remote_blinded {
            let element = grp.decode_element(bytes)?;
            double_blinded.push(grp.mod_exp(&element, &self.x).to_bytes_be());
        }
        double_blinded.shuffle(rng);

        let hashed_blinded = self
            .blinded
            .iter()
            .map(|b| sha1_digest(&b.to_bytes_be()))
            .collect();

        Ok(PsiReply {
            double_blinded,
            hashed_blinded,
        })
    }

    /// Compute the intersection cardinality from the peer's reply, consuming
    /// the session.
    ///
    /// Unblinds every double-blinded element with `x^-1 mod q` and counts how
    /// many land in the peer's hashed-blinded set.
    ///
    /// # Errors
    ///
    /// Returns [`CryptoError::EmptyReply`] for a reply with no content,
    /// [`CryptoError::NonInvertible`] when the session secret has no inverse
    /// modulo `q` (a hostile peer or a bug), and element errors as in
    /// [`reply`](Self::reply).
    pub fn cardinality(self, reply: &PsiReply) -> Result<usize> {
        if reply.double_blinded.is_empty() && reply.hashed_blinded.is_empty() {
            return Err(CryptoError::EmptyReply);
        }

        let grp = group();
        let x_inv = grp.mod_inverse_q(&self.x)?;

        let peer_hashes: HashSet<[u8; 20]> = reply.hashed_blinded.iter().copied().collect();

        let mut shared = 0usize;
        for bytes in &reply.double_blinded {
            let element = grp.decode_element(bytes)?;
            let unblinded = grp.mod_exp(&element, &x_inv);
            if peer_hashes.contains(&sha1_digest(&unblinded.to_bytes_be())) {
                shared += 1;
            }
        }
        Ok(shared)
    }
}
