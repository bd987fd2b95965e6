//! Deterministic feature-hashing embedder.
//!
//! Tokenizes on non-alphanumeric boundaries, hashes each lowercased token
//! into one of [`EMBEDDING_DIM`](super::EMBEDDING_DIM) buckets with a signed
//! contribution, and L2-normalizes the result. Texts sharing vocabulary land
//! near each other, which is enough signal for the vector index without any
//! model download, and identical text always embeds identically.

use std::hash::{DefaultHasher, Hash, Hasher};

use anyhow::Result;

use super::{EmbeddingProvider, EMBEDDING_DIM};

pub struct HashEmbeddingProvider {
    dims: usize,
}

impl HashEmbeddingProvider {
    pub fn new() -> Self {
        Self { dims: EMBEDDING_DIM }
    }
}

impl Default for HashEmbeddingProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl EmbeddingProvider for HashEmbeddingProvider {
    fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let mut vector = vec![0.0f32; self.dims];

        for token in text
            .split(|c: char| !c.is_alphanumeric())
            .filter(|t| !t.is_empty())
        {
            let token = token.to_lowercase();
            let mut hasher = DefaultHasher::new();
            token.hash(&mut hasher);
            let h = hasher.finish();

            let bucket = (h % self.dims as u64) as usize;
            // one hash bit decides the sign so colliding tokens can cancel
            let sign = if h & (1 << 63) == 0 { 1.0 } else { -1.0 };
            vector[bucket] += sign;
        }

        let norm: f32 = vector.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm > 0.0 {
            for x in &mut vector {
                *x /= norm;
            }
        }
        Ok(vector)
    }

    fn dimensions(&self) -> usize {
        self.dims
    }
}
