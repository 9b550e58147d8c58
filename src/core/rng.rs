//! Deterministic Random Number Generator
//!
//! Uses Xorshift128+ algorithm for fast, high-quality, deterministic randomness.
//! Given the same seed, produces identical sequence on all platforms.
//!
//! The generator state is stored inside each game state, so dice rolls are a
//! pure function of the state they are rolled from and replaying the event log
//! reproduces every roll exactly.

use serde::{Serialize, Deserialize};
use sha2::{Sha256, Digest};

use super::ids::MatchId;

/// Deterministic PRNG using Xorshift128+ algorithm.
///
/// # Determinism Guarantee
///
/// Given the same seed, this RNG will produce the exact same sequence
/// of random numbers on any platform.
///
/// # Example
///
/// ```
/// use tabletop::core::rng::DeterministicRng;
///
/// let mut rng = DeterministicRng::new(12345);
/// let value = rng.next_u64();
/// assert_eq!(value, 6233086606872742541); // Always the same!
/// ```
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
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
    ///
    /// Uses SplitMix64 to initialize the internal state, ensuring
    /// good distribution even from weak seeds.
    pub fn new(seed: u64) -> Self {
        let mut s = seed;
        let state0 = splitmix64(&mut s);
        let state1 = splitmix64(&mut s);

        // Ensure state is never all zeros
        let state = if state0 == 0 && state1 == 0 {
            [1, 1]
        } else {
            [state0, state1]
        };

        Self { state }
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

    /// Generate a random integer in range [0, max).
    #[inline]
    pub fn next_int(&mut self, max: u32) -> u32 {
        if max == 0 {
            return 0;
        }
        // Simple modulo - slight bias for very large max, irrelevant for dice
        (self.next_u64() % max as u64) as u32
    }

    /// Roll a six-sided die: uniform in 1..=6.
    #[inline]
    pub fn roll_die(&mut self) -> u8 {
        self.next_int(6) as u8 + 1
    }

    /// Raw generator state, for hashing.
    pub fn state(&self) -> [u64; 2] {
        self.state
    }
}

/// SplitMix64 for seed initialization.
/// Produces well-distributed values from sequential seeds.
#[inline]
fn splitmix64(state: &mut u64) -> u64 {
    *state = state.wrapping_add(0x9E3779B97F4A7C15);
    let mut z = *state;
    z = (z ^ (z >> 30)).wrapping_mul(0xBF58476D1CE4E5B9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94D049BB133111EB);
    z ^ (z >> 31)
}

/// Derive the dice seed for a new match.
///
/// - `match_id`: Unique match identifier
/// - `entropy`: Fresh server-side randomness, so seeds cannot be predicted
///   from the match id alone
pub fn derive_match_seed(match_id: &MatchId, entropy: &[u8; 16]) -> u64 {
    let mut hasher = Sha256::new();

    // Domain separator
    hasher.update(b"TABLETOP_DICE_SEED_V1");
    hasher.update(match_id.as_bytes());
    hasher.update(entropy);

    let hash = hasher.finalize();

    let mut seed = [0u8; 8];
    seed.copy_from_slice(&hash[0..8]);
    u64::from_le_bytes(seed)
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rng_determinism() {
        // Same seed must produce same sequence
        let mut rng1 = DeterministicRng::new(12345);
        let mut rng2 = DeterministicRng::new(12345);

        for _ in 0..1000 {
            assert_eq!(rng1.next_u64(), rng2.next_u64());
        }
    }

    #[test]
    fn test_rng_known_values() {
        // These values must never change!
        // If they do, existing event logs will no longer replay.
        let mut rng = DeterministicRng::new(42);
        assert_eq!(rng.next_u64(), 16629283624882167704);
        assert_eq!(rng.next_u64(), 1420492921613871959);
        assert_eq!(rng.next_u64(), 9768315062676884790);
    }

    #[test]
    fn test_known_dice_sequence() {
        let mut rng = DeterministicRng::new(7);
        let rolls: Vec<u8> = (0..8).map(|_| rng.roll_die()).collect();
        assert_eq!(rolls, vec![4, 6, 6, 5, 4, 5, 1, 4]);
    }

    #[test]
    fn test_roll_die_range() {
        let mut rng = DeterministicRng::new(1234);
        let mut seen = [false; 6];
        for _ in 0..1000 {
            let value = rng.roll_die();
            assert!((1..=6).contains(&value));
            seen[(value - 1) as usize] = true;
        }
        assert!(seen.iter().all(|s| *s), "every face should appear");
    }

    #[test]
    fn test_next_int_edges() {
        let mut rng = DeterministicRng::new(1234);
        assert_eq!(rng.next_int(0), 0);
        assert_eq!(rng.next_int(1), 0);
    }

    #[test]
    fn test_derive_match_seed() {
        let match_id = MatchId::from_bytes([1u8; 16]);
        let entropy = [2u8; 16];

        let seed1 = derive_match_seed(&match_id, &entropy);
        let seed2 = derive_match_seed(&match_id, &entropy);
        assert_eq!(seed1, seed2);

        let other = MatchId::from_bytes([99u8; 16]);
        assert_ne!(seed1, derive_match_seed(&other, &entropy));
        assert_ne!(seed1, derive_match_seed(&match_id, &[3u8; 16]));
    }

    #[test]
    fn test_clone_continues_sequence() {
        let mut rng = DeterministicRng::new(5555);
        for _ in 0..50 {
            rng.next_u64();
        }

        let mut fork = rng.clone();
        assert_eq!(fork.state(), rng.state());
        for _ in 0..10 {
            assert_eq!(fork.next_u64(), rng.next_u64());
        }
    }

    #[test]
    fn test_serde_preserves_sequence() {
        let mut rng = DeterministicRng::new(77);
        rng.next_u64();

        let json = serde_json::to_string(&rng).unwrap();
        let mut restored: DeterministicRng = serde_json::from_str(&json).unwrap();
        assert_eq!(restored.next_u64(), rng.next_u64());
    }
}
