//! Deterministic Random Number Generator
//!
//! Uses Xorshift128+ for fast, reproducible randomness. Every random
//! decision a participant makes (pellet spread, bomb carrier choice,
//! spawn jitter) draws from one of these, so a seeded session replays
//! identically under test.

use serde::{Serialize, Deserialize};
use sha2::{Sha256, Digest};

/// Deterministic PRNG using Xorshift128+ algorithm.
///
/// # Example
///
/// ```
/// use bombsite::core::rng::DeterministicRng;
///
/// let mut a = DeterministicRng::new(12345);
/// let mut b = DeterministicRng::new(12345);
/// assert_eq!(a.next_u64(), b.next_u64());
/// ```
#[derive(Clone, Debug, Serialize, Deserialize)]
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

    /// Create the RNG a participant uses inside a room.
    pub fn for_participant(room_id: &str, participant: &[u8; 16]) -> Self {
        Self::new(derive_room_seed(room_id, participant))
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
        (self.next_u64() % max as u64) as u32
    }

    /// Generate a random integer in range [min, max].
    #[inline]
    pub fn next_int_range(&mut self, min: i32, max: i32) -> i32 {
        if min >= max {
            return min;
        }
        let range = (max - min + 1) as u32;
        min + self.next_int(range) as i32
    }

    /// Generate a uniform `f32` in [0, 1).
    #[inline]
    pub fn next_f32(&mut self) -> f32 {
        // Top 24 bits fill the f32 mantissa exactly
        (self.next_u64() >> 40) as f32 / (1u32 << 24) as f32
    }

    /// Generate a uniform `f32` in [min, max).
    #[inline]
    pub fn next_f32_range(&mut self, min: f32, max: f32) -> f32 {
        if min >= max {
            return min;
        }
        min + self.next_f32() * (max - min)
    }

    /// Select a random element from a slice.
    pub fn choose<'a, T>(&mut self, slice: &'a [T]) -> Option<&'a T> {
        if slice.is_empty() {
            None
        } else {
            let idx = self.next_int(slice.len() as u32) as usize;
            slice.get(idx)
        }
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

/// Derive a per-participant seed for a room.
///
/// Two participants in the same room get different streams; the same
/// participant rejoining the same room gets the same stream.
pub fn derive_room_seed(room_id: &str, participant: &[u8; 16]) -> u64 {
    let mut hasher = Sha256::new();

    // Domain separator
    hasher.update(b"BOMBSITE_SEED_V1");
    hasher.update(room_id.as_bytes());
    hasher.update(participant);

    let hash = hasher.finalize();

    let mut seed = [0u8; 8];
    seed.copy_from_slice(&hash[..8]);
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
        let mut rng1 = DeterministicRng::new(12345);
        let mut rng2 = DeterministicRng::new(12345);

        for _ in 0..1000 {
            assert_eq!(rng1.next_u64(), rng2.next_u64());
        }
    }

    #[test]
    fn test_rng_different_seeds() {
        let mut rng1 = DeterministicRng::new(12345);
        let mut rng2 = DeterministicRng::new(54321);
        assert_ne!(rng1.next_u64(), rng2.next_u64());
    }

    #[test]
    fn test_next_int_bounds() {
        let mut rng = DeterministicRng::new(1234);
        for _ in 0..1000 {
            assert!(rng.next_int(100) < 100);
            let v = rng.next_int_range(-2, 2);
            assert!((-2..=2).contains(&v));
        }
        assert_eq!(rng.next_int(0), 0);
        assert_eq!(rng.next_int_range(5, 5), 5);
    }

    #[test]
    fn test_next_f32_range() {
        let mut rng = DeterministicRng::new(9999);
        for _ in 0..1000 {
            let unit = rng.next_f32();
            assert!((0.0..1.0).contains(&unit));

            let spread = rng.next_f32_range(-0.15, 0.15);
            assert!((-0.15..0.15).contains(&spread));
        }
        assert_eq!(rng.next_f32_range(0.5, 0.5), 0.5);
    }

    #[test]
    fn test_choose_replays_per_participant() {
        let carriers = [10, 20, 30, 40];
        let mut a = DeterministicRng::for_participant("ROOM1", &[7; 16]);
        let mut b = DeterministicRng::for_participant("ROOM1", &[7; 16]);
        let picks_a: Vec<_> = (0..16).map(|_| a.choose(&carriers).copied()).collect();
        let picks_b: Vec<_> = (0..16).map(|_| b.choose(&carriers).copied()).collect();
        assert_eq!(picks_a, picks_b);

        let empty: [u8; 0] = [];
        assert!(a.choose(&empty).is_none());
    }

    #[test]
    fn test_derive_room_seed() {
        let a = derive_room_seed("ROOM1", &[1; 16]);
        assert_eq!(a, derive_room_seed("ROOM1", &[1; 16]));
        assert_ne!(a, derive_room_seed("ROOM1", &[2; 16]));
        assert_ne!(a, derive_room_seed("ROOM2", &[1; 16]));
    }
}
