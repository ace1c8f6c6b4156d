//! The fixed 1024-bit MODP Diffie-Hellman group.
//!
//! Parameters are the RFC 5114 section 2.1 group: a 1024-bit modulus `p`
//! with a 160-bit prime-order subgroup of order `q` generated by `g`. The
//! constants are part of the deployed wire protocol and must be bit-exact;
//! every exponentiation in the exchange happens modulo this `p`.

use std::sync::LazyLock;

use num_bigint::{BigUint, RandBigInt};
use num_traits::{One, Zero};
use rand::{CryptoRng, RngCore};

use crate::{CryptoError, Result};

/// 1024-bit modulus `p`, big-endian hex.
const P_HEX: &[u8] = b"B10B8F96A080E01DDE92DE5EAE5D54EC52C99FBCFB06A3C6\
9A6A9DCA52D23B616073E28675A23D189838EF1E2EE652C0\
13ECB4AEA906112324975C3CD49B83BFACCBDD7D90C4BD70\
98488E9C219A73724EFFD6FAE5644738FAA31A4FF55BCCC0\
A151AF5F0DC8B4BD45BF37DF365C1A65E68CFDA76D4DA708\
DF1FB2BC2E4A4371";

/// Generator `g` of the order-`q` subgroup, big-endian hex.
const G_HEX: &[u8] = b"A4D1CBD5C3FD34126765A442EFB99905F8104DD258AC507F\
D6406CFF14266D31266FEA1E5C41564B777E690F5504F213\
160217B4B01B886A5E91547F9E2749F4D7FBD7D3B9A92EE1\
909D0D2263F80A76A6A24C087A091F531DBF0A0169B6A28A\
D662A4D18E73AFA32D779D5918D08BC8858F4DCEF97C2A24\
855E6EEB22B3B2E5";

/// 160-bit subgroup order `q`, big-endian hex.
const Q_HEX: &[u8] = b"F518AA8781A8DF278ABA4E7D64B7CB9D49462353";

/// The group parameters, parsed once.
pub struct DhGroup {
    p: BigUint,
    g: BigUint,
    q: BigUint,
}

static GROUP: LazyLock<DhGroup> = LazyLock::new(|| DhGroup {
    // The hex constants above are compile-time fixed; a parse failure is a
    // build defect, not a runtime condition.
    p: BigUint::parse_bytes(P_HEX, 16).expect("fixed modulus constant"),
    g: BigUint::parse_bytes(G_HEX, 16).expect("fixed generator constant"),
    q: BigUint::parse_bytes(Q_HEX, 16).expect("fixed subgroup order constant"),
});

/// The process-wide group parameters.
pub fn group() -> &'static DhGroup {
    &GROUP
}

impl DhGroup {
    /// The 1024-bit modulus.
    pub fn p(&self) -> &BigUint {
        &self.p
    }

    /// The subgroup generator.
    pub fn g(&self) -> &BigUint {
        &self.g
    }

    /// The 160-bit subgroup order.
    pub fn q(&self) -> &BigUint {
        &self.q
    }

    /// `base^exp mod p`.
    pub fn mod_exp(&self, base: &BigUint, exp: &BigUint) -> BigUint {
        base.modpow(exp, &self.p)
    }

    /// `g^exp mod p`.
    pub fn exp_g(&self, exp: &BigUint) -> BigUint {
        self.g.modpow(exp, &self.p)
    }

    /// Sample a uniform exponent in `[2, q-1]`.
    pub fn random_exponent<R: RngCore + CryptoRng>(&self, rng: &mut R) -> BigUint {
        rng.gen_biguint_range(&BigUint::from(2u32), &self.q)
    }

    /// The inverse of `x mod q`, computed as `x^(q-2) mod q` (`q` is prime).
    ///
    /// # Errors
    ///
    /// Returns [`CryptoError::NonInvertible`] when `x ≡ 0 (mod q)`.
    pub fn mod_inverse_q(&self, x: &BigUint) -> Result<BigUint> {
        let reduced = x % &self.q;
        if reduced.is_zero() {
            return Err(CryptoError::NonInvertible);
        }
        let exp = &self.q - BigUint::from(2u32);
        Ok(reduced.modpow(&exp, &self.q))
    }

    /// Decode a big-endian group element, rejecting zero, one, and values
    /// not less than `p`.
    ///
    /// # Errors
    ///
    /// Returns [`CryptoError::MalformedInput`] for an empty encoding and
    /// [`CryptoError::InvalidElement`] for out-of-range values.
    pub fn decode_element(&self, bytes: &[u8]) -> Result<BigUint> {
        if bytes.is_empty() {
            return Err(CryptoError::MalformedInput("empty element encoding".into()));
        }
        let value = BigUint::from_bytes_be(bytes);
        if value.is_zero() || value.is_one() {
            return Err(CryptoError::InvalidElement("element in {0, 1}".into()));
        }
        if value >= self.p {
            return Err(CryptoError::InvalidElement(
                "element not less than modulus".into(),
            ));
        }
        Ok(value)
    }
}
