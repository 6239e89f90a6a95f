//! State Fingerprints
//!
//! SHA-256 fingerprints over the replicated part of a room's state.
//! Two participants that have converged on the same round, bomb and
//! player records produce the same fingerprint, which makes
//! convergence a one-line assertion in multi-peer tests and a cheap
//! value to log when diagnosing a desync.

use sha2::{Sha256, Digest};
use super::vec2::Vec2;

/// Hash output type (256 bits / 32 bytes)
pub type StateHash = [u8; 32];

/// Deterministic hasher for room state.
///
/// Order of updates is significant: callers must walk collections in
/// sorted order (BTreeMap iteration).
pub struct StateHasher {
    hasher: Sha256,
}

impl StateHasher {
    /// Create a new hasher with domain separator.
    pub fn new(domain: &[u8]) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(domain);
        Self { hasher }
    }

    /// Create hasher for replicated room state.
    pub fn for_room_state() -> Self {
        Self::new(b"BOMBSITE_ROOM_V1")
    }

    /// Update with raw bytes.
    #[inline]
    pub fn update_bytes(&mut self, bytes: &[u8]) {
        self.hasher.update(bytes);
    }

    /// Update with a u8 value.
    #[inline]
    pub fn update_u8(&mut self, value: u8) {
        self.hasher.update([value]);
    }

    /// Update with a u32 value (little-endian).
    #[inline]
    pub fn update_u32(&mut self, value: u32) {
        self.hasher.update(value.to_le_bytes());
    }

    /// Update with a u64 value (little-endian).
    #[inline]
    pub fn update_u64(&mut self, value: u64) {
        self.hasher.update(value.to_le_bytes());
    }

    /// Update with an f32, treating -0.0 and 0.0 as equal.
    #[inline]
    pub fn update_f32(&mut self, value: f32) {
        let canonical = if value == 0.0 { 0.0f32 } else { value };
        self.hasher.update(canonical.to_bits().to_le_bytes());
    }

    /// Update with a Vec2.
    #[inline]
    pub fn update_vec2(&mut self, value: Vec2) {
        self.update_f32(value.x);
        self.update_f32(value.y);
    }

    /// Update with a boolean.
    #[inline]
    pub fn update_bool(&mut self, value: bool) {
        self.update_u8(value as u8);
    }

    /// Update with a length-prefixed string.
    #[inline]
    pub fn update_str(&mut self, value: &str) {
        self.update_u32(value.len() as u32);
        self.hasher.update(value.as_bytes());
    }

    /// Update with a UUID (16 bytes).
    #[inline]
    pub fn update_uuid(&mut self, uuid: &[u8; 16]) {
        self.hasher.update(uuid);
    }

    /// Finalize and return the hash.
    pub fn finalize(self) -> StateHash {
        self.hasher.finalize().into()
    }
}

/// Compute hash with domain separator.
pub fn hash_with_domain(domain: &[u8], data: &[u8]) -> StateHash {
    let mut hasher = Sha256::new();
    hasher.update(domain);
    hasher.update(data);
    hasher.finalize().into()
}

/// Compute a room fingerprint.
///
/// The round number is always hashed first; the closure adds the rest.
pub fn compute_room_hash<F>(round_number: u32, add_state: F) -> StateHash
where
    F: FnOnce(&mut StateHasher),
{
    let mut hasher = StateHasher::for_room_state();
    hasher.update_u32(round_number);
    add_state(&mut hasher);
    hasher.finalize()
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_hasher_determinism() {
        let make_hash = || {
            let mut hasher = StateHasher::for_room_state();
            hasher.update_u32(3);
            hasher.update_f32(75.5);
            hasher.update_vec2(Vec2::new(1.0, 2.0));
            hasher.update_str("bomb_defused");
            hasher.update_bool(true);
            hasher.finalize()
        };

        assert_eq!(make_hash(), make_hash());
    }

    #[test]
    fn test_hash_order_matters() {
        let hash1 = {
            let mut h = StateHasher::new(b"test");
            h.update_u32(1);
            h.update_u32(2);
            h.finalize()
        };

        let hash2 = {
            let mut h = StateHasher::new(b"test");
            h.update_u32(2);
            h.update_u32(1);
            h.finalize()
        };

        assert_ne!(hash1, hash2);
    }

    #[test]
    fn test_negative_zero_is_canonical() {
        let pos = compute_room_hash(1, |h| h.update_f32(0.0));
        let neg = compute_room_hash(1, |h| h.update_f32(-0.0));
        assert_eq!(pos, neg);
    }

    #[test]
    fn test_domain_separation() {
        let data = [1u8, 2, 3, 4];
        assert_ne!(hash_with_domain(b"DOMAIN_A", &data), hash_with_domain(b"DOMAIN_B", &data));
    }

    #[test]
    fn test_compute_room_hash() {
        let hash = compute_room_hash(4, |h| h.update_bool(true));
        assert_eq!(hash, compute_room_hash(4, |h| h.update_bool(true)));
        assert_ne!(hash, compute_room_hash(5, |h| h.update_bool(true)));
    }
}
