//! Near-duplicate detection via 64-bit simhash.
//!
//! Fingerprints are computed over the canonical token set, so token order
//! and surrounding whitespace do not affect the hash. Two contents within
//! a small Hamming distance are treated as the same memory at insert time.

use crate::memory::text::canonical_token_set;

/// Hamming distance at or under which two fingerprints are duplicates.
pub const HAMMING_THRESHOLD: u32 = 3;

const FNV_OFFSET: u64 = 0xcbf2_9ce4_8422_2325;
const FNV_PRIME: u64 = 0x0000_0100_0000_01b3;

fn fnv1a64(data: &str) -> u64 {
    let mut hash = FNV_OFFSET;
    for byte in data.bytes() {
        hash ^= byte as u64;
        hash = hash.wrapping_mul(FNV_PRIME);
    }
    hash
}

/// 64-bit simhash of the content's canonical token set.
///
/// Each token votes its hash bits up or down; the sign of each column
/// becomes the output bit. Empty token sets hash to 0.
pub fn simhash64(content: &str) -> u64 {
    let tokens = canonical_token_set(content);
    if tokens.is_empty() {
        return 0;
    }
    let mut counts = [0i32; 64];
    for token in &tokens {
        let hash = fnv1a64(token);
        for (bit, count) in counts.iter_mut().enumerate() {
            if hash >> bit & 1 == 1 {
                *count += 1;
            } else {
                *count -= 1;
            }
        }
    }
    let mut out = 0u64;
    for (bit, count) in counts.iter().enumerate() {
        if *count > 0 {
            out |= 1 << bit;
        }
    }
    out
}

pub fn hamming_distance(a: u64, b: u64) -> u32 {
    (a ^ b).count_ones()
}

/// True when two fingerprints are close enough to be the same memory.
pub fn is_near_duplicate(a: u64, b: u64) -> bool {
    hamming_distance(a, b) <= HAMMING_THRESHOLD
}
