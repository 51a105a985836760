//! Deterministic slate shuffle
//!
//! Every node must arrive at the same post-shuffle slate from the same
//! parent hash and epoch index, so both the seed derivation and the
//! generator are pinned at the consensus level. Changing either is a hard
//! fork.

use alloy_primitives::B256;
use sha3::{Digest, Keccak512};

/// Shuffle seed for an epoch: the first four bytes of
/// Keccak-512(parent hash), read little-endian, widened to `i64`, plus the
/// epoch index. Wraps two's-complement; the discarded high digest bits are
/// part of the protocol.
pub fn seed_for_epoch(parent_hash: B256, epoch: i64) -> i64 {
    let digest = Keccak512::digest(parent_hash.as_slice());
    let low = u32::from_le_bytes([digest[0], digest[1], digest[2], digest[3]]);
    (low as i64).wrapping_add(epoch)
}

/// The pinned shuffle generator: a 64-bit linear congruential state
/// transition (Knuth's MMIX multiplier and increment) with top-bits
/// extraction and rejection sampling for uniform ranges.
#[derive(Debug, Clone)]
pub struct ShuffleRng {
    state: u64,
}

const MULTIPLIER: u64 = 6364136223846793005;
const INCREMENT: u64 = 1442695040888963407;

impl ShuffleRng {
    /// Generator seeded for one epoch's shuffle
    pub fn new(seed: i64) -> Self {
        Self { state: seed as u64 }
    }

    /// Uniform non-negative 63-bit integer
    pub fn int63(&mut self) -> i64 {
        self.state = self
            .state
            .wrapping_mul(MULTIPLIER)
            .wrapping_add(INCREMENT);
        (self.state >> 1) as i64
    }

    /// Uniform non-negative 31-bit integer
    pub fn int31(&mut self) -> i32 {
        (self.int63() >> 32) as i32
    }

    /// Uniform integer in `[0, n)`; `n` must be positive.
    ///
    /// Power-of-two bounds mask directly; other bounds reject draws above
    /// the largest multiple of `n` below 2^31 to stay unbiased.
    pub fn int31n(&mut self, n: i32) -> i32 {
        debug_assert!(n > 0, "bound must be positive");
        if n & (n - 1) == 0 {
            return self.int31() & (n - 1);
        }
        let max = ((1u32 << 31) - 1 - (1u32 << 31) % n as u32) as i32;
        let mut v = self.int31();
        while v > max {
            v = self.int31();
        }
        v % n
    }
}

/// Fisher–Yates in descending index order: for `k` from `len-1` down to 1,
/// swap position `k` with a uniform position in `[0, k]`.
pub fn shuffle<T>(items: &mut [T], seed: i64) {
    let mut rng = ShuffleRng::new(seed);
    for k in (1..items.len()).rev() {
        let j = rng.int31n(k as i32 + 1) as usize;
        items.swap(k, j);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_seed_matches_digest_construction() {
        let hash = B256::repeat_byte(0x5a);
        let digest = Keccak512::digest(hash.as_slice());
        let low = u32::from_le_bytes([digest[0], digest[1], digest[2], digest[3]]);

        assert_eq!(seed_for_epoch(hash, 0), low as i64);
    }

    #[test]
    fn test_seed_shifts_by_epoch() {
        let hash = B256::repeat_byte(0x5a);
        let base = seed_for_epoch(hash, 0);

        assert_eq!(seed_for_epoch(hash, 7), base + 7);
        assert_eq!(seed_for_epoch(hash, -3), base - 3);
    }

    #[test]
    fn test_seed_depends_on_hash() {
        assert_ne!(
            seed_for_epoch(B256::repeat_byte(0x01), 0),
            seed_for_epoch(B256::repeat_byte(0x02), 0)
        );
    }

    #[test]
    fn test_same_seed_same_sequence() {
        let mut a = ShuffleRng::new(12345);
        let mut b = ShuffleRng::new(12345);

        for _ in 0..100 {
            assert_eq!(a.int63(), b.int63());
        }
    }

    #[test]
    fn test_different_seeds_diverge() {
        let mut a = ShuffleRng::new(1);
        let mut b = ShuffleRng::new(2);
        let same = (0..10).filter(|_| a.int63() == b.int63()).count();

        assert!(same < 10);
    }

    #[test]
    fn test_int63_is_non_negative() {
        let mut rng = ShuffleRng::new(-99);
        for _ in 0..1000 {
            assert!(rng.int63() >= 0);
        }
    }

    #[test]
    fn test_int31n_stays_in_range() {
        let mut rng = ShuffleRng::new(42);
        for n in [1, 2, 3, 7, 8, 21, 100] {
            for _ in 0..500 {
                let v = rng.int31n(n);
                assert!((0..n).contains(&v), "{v} out of [0, {n})");
            }
        }
    }

    #[test]
    fn test_int31n_power_of_two_path() {
        // n = 8 takes the mask fast path; outputs must still cover only [0, 8)
        let mut rng = ShuffleRng::new(7);
        let mut seen = [false; 8];
        for _ in 0..2000 {
            seen[rng.int31n(8) as usize] = true;
        }

        assert!(seen.iter().all(|&s| s));
    }

    #[test]
    fn test_shuffle_is_deterministic() {
        let mut a: Vec<u32> = (0..21).collect();
        let mut b: Vec<u32> = (0..21).collect();
        shuffle(&mut a, 987654321);
        shuffle(&mut b, 987654321);

        assert_eq!(a, b);
    }

    #[test]
    fn test_shuffle_is_a_permutation() {
        let mut items: Vec<u32> = (0..21).collect();
        shuffle(&mut items, 31337);

        let mut sorted = items.clone();
        sorted.sort_unstable();
        assert_eq!(sorted, (0..21).collect::<Vec<_>>());
    }

    #[test]
    fn test_shuffle_of_short_slices_is_identity() {
        let mut empty: Vec<u32> = vec![];
        shuffle(&mut empty, 1);
        assert!(empty.is_empty());

        let mut one = vec![9u32];
        shuffle(&mut one, 1);
        assert_eq!(one, vec![9]);
    }
}
