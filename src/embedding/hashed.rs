//! Deterministic feature-hash embeddings.
//!
//! Each canonical token (and each adjacent bigram) hashes to a dimension
//! and a sign; the sector contributes a salt so the same text lands in a
//! different subspace per sector. No model, no I/O, fully reproducible,
//! and similar texts still share most dimensions. Good enough for the
//! CLI and for tests; real deployments bring their own provider.

use super::EmbeddingProvider;
use crate::memory::sectors::Sector;
use crate::memory::text::canonical_tokens;
use crate::memory::vectors::l2_normalize;
use anyhow::Result;

pub struct HashedProvider {
    dimensions: usize,
}

impl HashedProvider {
    pub fn new(dimensions: usize) -> Self {
        Self {
            dimensions: dimensions.max(8),
        }
    }
}

fn fnv1a64_seeded(data: &str, seed: u64) -> u64 {
    let mut hash = 0xcbf2_9ce4_8422_2325u64 ^ seed;
    for byte in data.bytes() {
        hash ^= byte as u64;
        hash = hash.wrapping_mul(0x0000_0100_0000_01b3);
    }
    hash
}

fn sector_salt(sector: Sector) -> u64 {
    // Stable per sector, never persisted.
    match sector {
        Sector::Episodic => 0x45_50,
        Sector::Semantic => 0x53_45,
        Sector::Procedural => 0x50_52,
        Sector::Emotional => 0x45_4d,
        Sector::Reflective => 0x52_46,
    }
}

impl EmbeddingProvider for HashedProvider {
    fn embed(&self, text: &str, sector: Sector) -> Result<Vec<f32>> {
        let salt = sector_salt(sector);
        let tokens = canonical_tokens(text);
        let mut vec = vec![0.0f32; self.dimensions];

        let mut add_feature = |feature: &str, weight: f32| {
            let hash = fnv1a64_seeded(feature, salt);
            let dim = (hash % self.dimensions as u64) as usize;
            let sign = if hash >> 63 == 1 { 1.0 } else { -1.0 };
            vec[dim] += sign * weight;
        };

        for token in &tokens {
            add_feature(token, 1.0);
        }
        for pair in tokens.windows(2) {
            add_feature(&format!("{} {}", pair[0], pair[1]), 0.5);
        }

        l2_normalize(&mut vec);
        Ok(vec)
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::vectors::cosine_similarity;

    #[test]
    fn deterministic_per_sector() {
        let p = HashedProvider::new(64);
        let a = p.embed("the cat sat", Sector::Semantic).unwrap();
        let b = p.embed("the cat sat", Sector::Semantic).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn sectors_use_distinct_subspaces() {
        let p = HashedProvider::new(64);
        let sem = p.embed("the cat sat on the mat", Sector::Semantic).unwrap();
        let epi = p.embed("the cat sat on the mat", Sector::Episodic).unwrap();
        assert!(cosine_similarity(&sem, &epi) < 0.99);
    }

    #[test]
    fn similar_text_scores_higher_than_unrelated() {
        let p = HashedProvider::new(128);
        let base = p.embed("user prefers dark mode themes", Sector::Semantic).unwrap();
        let close = p.embed("user prefers dark theme", Sector::Semantic).unwrap();
        let far = p.embed("quantum chromodynamics lattice simulation", Sector::Semantic).unwrap();
        assert!(cosine_similarity(&base, &close) > cosine_similarity(&base, &far));
    }

    #[test]
    fn output_is_unit_length() {
        let p = HashedProvider::new(64);
        let v = p.embed("normalize me please", Sector::Reflective).unwrap();
        let norm: f32 = v.iter().map(|x| x * x).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-4);
    }

    #[test]
    fn empty_text_is_zero_vector() {
        let p = HashedProvider::new(64);
        let v = p.embed("", Sector::Semantic).unwrap();
        assert!(v.iter().all(|x| *x == 0.0));
    }
}
