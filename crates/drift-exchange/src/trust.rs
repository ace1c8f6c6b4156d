//! Trust scoring: the merge rule applied to re-received messages and the
//! noise added to outgoing trust values.

use rand::{CryptoRng, Rng, RngCore};

use drift_types::message::clamp_trust;

/// Multiplier applied when a message is seen again through a peer with
/// mutual friends.
///
/// 1.0 with no mutual friends; otherwise grows linearly with the ratio of
/// mutual friends to the local friend count, topping out at 1.5 when every
/// local friend is shared. Monotone in `common_friends`.
pub fn boost(common_friends: u32, my_friend_count: u32) -> f64 {
    if common_friends == 0 {
        return 1.0;
    }
    let ratio = f64::from(common_friends) / f64::from(my_friend_count.max(1));
    1.0 + ratio / 2.0
}

/// Merge a re-received trust value into the stored one.
///
/// The better of the two values is boosted by the mutual-friend multiplier
/// and clamped. The caller persists the result only when it exceeds the
/// stored value.
pub fn merge_trust(
    existing: f64,
    received: f64,
    common_friends: u32,
    my_friend_count: u32,
) -> f64 {
    clamp_trust(existing.max(received) * boost(common_friends, my_friend_count))
}

/// An outgoing trust value with Gaussian noise of the given variance,
/// clamped back into the valid range.
///
/// Box-Muller over two uniforms; one sample per call is plenty here.
pub fn noisy_trust<R: RngCore + CryptoRng>(trust: f64, variance: f64, rng: &mut R) -> f64 {
    if variance <= 0.0 {
        return clamp_trust(trust);
    }
    let u1: f64 = rng.gen_range(f64::MIN_POSITIVE..1.0);
    let u2: f64 = rng.gen_range(0.0..1.0);
    let standard = (-2.0 * u1.ln()).sqrt() * (std::f64::consts::TAU * u2).cos();
    clamp_trust(trust + standard * variance.sqrt())
}
