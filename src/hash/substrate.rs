//! The shared indexing substrate: two base hashes per element, expanded by
//! double hashing into as many distinct indices as a filter needs.
//!
//! This is deliberately the only place the crate calls into a hash function
//! directly — every sketch routes through [`hash_pair`] or
//! [`distinct_indices`] rather than hashing its own way.

use std::collections::HashSet;
use std::hash::Hasher;

use crate::error::Error;
use crate::hash::xxhash::XxHash64;

/// Default seed used when a builder doesn't override it.
pub(crate) const DEFAULT_SEED: u64 = 0x1234567890;

/// Seed tweak used to derive the IBLT's second, independent `checkHash`.
const CHECK_HASH_SEED_TWEAK: u64 = 0x5bd1_e995_c2b2_ae35;

fn hash_with_seed(bytes: &[u8], seed: u64) -> u64 {
    let mut hasher = XxHash64::with_seed(seed);
    hasher.write(bytes);
    hasher.finish64()
}

/// Computes the two base 64-bit hash values for `bytes` under `seed`.
///
/// `h2` is `h1`'s partner under a perturbed seed (`seed + 1`), not an
/// independent hash call — this is what lets every index beyond the first
/// come from arithmetic on `(h1, h2)` instead of a fresh hash pass.
pub(crate) fn hash_pair(bytes: &[u8], seed: u64) -> (u64, u64) {
    let h1 = hash_with_seed(bytes, seed);
    let h2 = hash_with_seed(bytes, seed.wrapping_add(1));
    (h1, h2)
}

/// A second, independent hash to a fixed 32-bit width, used by the IBLT's
/// `checkHash`.
pub(crate) fn check_hash32(bytes: &[u8], seed: u64) -> u32 {
    let h = hash_with_seed(bytes, seed ^ CHECK_HASH_SEED_TWEAK);
    (h ^ (h >> 32)) as u32
}

/// Reduces the `i`-th double-hashed value `h1 + i*h2` into `0..range`.
///
/// Used directly by the Bloom filter family, where indices are *not*
/// required to be distinct (two hash slots legitimately colliding is
/// ordinary Bloom filter behavior, not an error).
pub(crate) fn index_at(h1: u64, h2: u64, i: u64, range: u64) -> u64 {
    h1.wrapping_add(i.wrapping_mul(h2)) % range
}

/// Produces `k` distinct indices in `0..range` via double hashing
/// (`h1 + i*h2`), resolving any collision with a deterministic `i^2` tweak,
/// falling back to a linear probe if the tweak itself collides repeatedly.
///
/// Fails with [`ErrorKind::InvalidArgument`](crate::error::ErrorKind::InvalidArgument)
/// if `k` distinct values cannot possibly fit in `range`.
pub(crate) fn distinct_indices(
    bytes: &[u8],
    range: u64,
    k: u32,
    seed: u64,
) -> Result<Vec<u64>, Error> {
    if range == 0 || u64::from(k) > range {
        return Err(Error::invalid_argument(format!(
            "cannot draw {k} distinct indices from a range of {range}"
        ))
        .with_context("k", k)
        .with_context("range", range));
    }

    let (h1, h2) = hash_pair(bytes, seed);
    let mut seen = HashSet::with_capacity(k as usize);
    let mut indices = Vec::with_capacity(k as usize);

    for i in 0..u64::from(k) {
        let base = index_at(h1, h2, i, range);
        let index = if seen.contains(&base) {
            resolve_collision(base, range, &seen)
        } else {
            base
        };
        seen.insert(index);
        indices.push(index);
    }

    Ok(indices)
}

/// Finds a free slot near `base`, first by the `i^2` tweak the design notes
/// describe, then (if the tweak itself keeps colliding) by linear probing —
/// which always terminates because `seen.len() < range` is an invariant of
/// the caller.
fn resolve_collision(base: u64, range: u64, seen: &HashSet<u64>) -> u64 {
    let mut tweak: u64 = 1;
    while tweak <= range {
        let candidate = base.wrapping_add(tweak.wrapping_mul(tweak)) % range;
        if !seen.contains(&candidate) {
            return candidate;
        }
        tweak += 1;
    }

    let mut probe = base;
    loop {
        if !seen.contains(&probe) {
            return probe;
        }
        probe = (probe + 1) % range;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn distinct_indices_are_distinct() {
        let indices = distinct_indices(b"hello", 1000, 7, DEFAULT_SEED).unwrap();
        let unique: HashSet<_> = indices.iter().copied().collect();
        assert_eq!(unique.len(), indices.len());
        assert!(indices.iter().all(|&i| i < 1000));
    }

    #[test]
    fn distinct_indices_deterministic() {
        let a = distinct_indices(b"repeatable", 500, 5, DEFAULT_SEED).unwrap();
        let b = distinct_indices(b"repeatable", 500, 5, DEFAULT_SEED).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn distinct_indices_rejects_k_over_range() {
        let err = distinct_indices(b"x", 3, 4, DEFAULT_SEED).unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::InvalidArgument);
    }

    #[test]
    fn distinct_indices_at_capacity() {
        // k == range forces the collision resolver to touch every slot.
        let indices = distinct_indices(b"tight", 8, 8, DEFAULT_SEED).unwrap();
        let unique: HashSet<_> = indices.iter().copied().collect();
        assert_eq!(unique.len(), 8);
    }

    #[test]
    fn seed_sensitivity() {
        let a = hash_pair(b"alice", 1);
        let b = hash_pair(b"alice", 2);
        assert_ne!(a, b);
    }

    #[test]
    fn check_hash32_independent_of_main_pair() {
        let (h1, _) = hash_pair(b"bob", DEFAULT_SEED);
        let c = check_hash32(b"bob", DEFAULT_SEED);
        assert_ne!(u64::from(c), h1 & 0xffff_ffff);
    }
}
