//! Deterministic Random Number Generator
//!
//! Xorshift128+ seeded through SplitMix64. Crash points are derived from a
//! round seed through this generator, so anyone holding the revealed seed can
//! recompute the crash point exactly.

use sha2::{Digest, Sha256};

/// Domain separator for round seed derivation.
const ROUND_SEED_DOMAIN: &[u8] = b"CRASH_ROUND_SEED_V1";

/// Deterministic PRNG using Xorshift128+.
///
/// # Example
///
/// ```
/// use crash_round::core::rng::DeterministicRng;
///
/// let mut rng = DeterministicRng::new(12345);
/// let value = rng.next_u64();
/// assert_eq!(value, 6233086606872742541);
/// ```
#[derive(Clone, Debug)]
pub struct DeterministicRng {
    state: [u64; 2],
}

impl Default for DeterministicRng {
    fn default() -> Self {
        Self::new(0)
    }
}

impl DeterministicRng {
    /// Create a new RNG from a 64-bit seed.
    pub fn new(seed: u64) -> Self {
        let mut s = seed;
        let state0 = splitmix64(&mut s);
        let state1 = splitmix64(&mut s);

        // Xorshift must never sit in the all-zero state
        let state = if state0 == 0 && state1 == 0 {
            [1, 1]
        } else {
            [state0, state1]
        };

        Self { state }
    }

    /// Create an RNG for one round from its 32-byte server seed.
    pub fn for_round(server_seed: &[u8; 32], round_id: u64) -> Self {
        Self::new(derive_round_seed(server_seed, round_id))
    }

    /// Generate the next 64-bit random value.
    #[inline]
    pub fn next_u64(&mut self) -> u64 {
        let s0 = self.state[0];
        let mut s1 = self.state[1];
        let result = s0.wrapping_add(s1);

        s1 ^= s0;
        self.state[0] = s0.rotate_left(24) ^ s1 ^ (s1 << 16);
        self.state[1] = s1.rotate_left(37);

        result
    }

    /// Uniform value in `[0, 1)` built from the top 53 bits.
    #[inline]
    pub fn next_unit_f64(&mut self) -> f64 {
        (self.next_u64() >> 11) as f64 * (1.0 / (1u64 << 53) as f64)
    }

    /// Get current state.
    pub fn state(&self) -> [u64; 2] {
        self.state
    }
}

/// SplitMix64 for seed initialization.
#[inline]
fn splitmix64(state: &mut u64) -> u64 {
    *state = state.wrapping_add(0x9E3779B97F4A7C15);
    let mut z = *state;
    z = (z ^ (z >> 30)).wrapping_mul(0xBF58476D1CE4E5B9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94D049BB133111EB);
    z ^ (z >> 31)
}

/// Derive the 64-bit PRNG seed for a round.
///
/// Binds the server seed to the round id so a seed reused across rounds
/// still yields unrelated crash points.
pub fn derive_round_seed(server_seed: &[u8; 32], round_id: u64) -> u64 {
    let mut hasher = Sha256::new();
    hasher.update(ROUND_SEED_DOMAIN);
    hasher.update(server_seed);
    hasher.update(round_id.to_le_bytes());
    let hash = hasher.finalize();

    let mut seed = [0u8; 8];
    seed.copy_from_slice(&hash[..8]);
    u64::from_le_bytes(seed)
}
