//! DH identity keypair generation.
//!
//! A node's identity is one keypair in the fixed group: the private half is
//! an exponent in `[2, q-1]`, the public half `g^x mod p` is the node's
//! public-ID, the byte string other peers store as a friend entry.

use rand::{CryptoRng, RngCore};
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::group::group;

/// A DH identity keypair. The private exponent is wiped on drop.
#[derive(Zeroize, ZeroizeOnDrop)]
pub struct DhKeyPair {
    /// Big-endian public element `g^x mod p`.
    #[zeroize(skip)]
    pub public: Vec<u8>,
    /// Big-endian private exponent `x`.
    pub private: Vec<u8>,
}

/// Generate a fresh identity keypair.
pub fn generate_keypair<R: RngCore + CryptoRng>(rng: &mut R) -> DhKeyPair {
    let grp = group();
    let x = grp.random_exponent(rng);
    let public = grp.exp_g(&x);
    DhKeyPair {
        public: public.to_bytes_be(),
        private: x.to_bytes_be(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use num_bigint::BigUint;

    #[test]
    fn test_keypair_consistent() {
        let mut rng = rand::rngs::OsRng;
        let pair = generate_keypair(&mut rng);
        let grp = group();
        let x = BigUint::from_bytes_be(&pair.private);
        assert_eq!(grp.exp_g(&x).to_bytes_be(), pair.public);
    }

    #[test]
    fn test_keypairs_distinct() {
        let mut rng = rand::rngs::OsRng;
        let a = generate_keypair(&mut rng);
        let b = generate_keypair(&mut rng);
        assert_ne!(a.public, b.public);
    }
}
