//! Hash-based embedding fallback
//!
//! Deterministic word + character-bigram hash embeddings, L2-normalized.
//! Far weaker than MiniLM semantically, but fully offline, dependency-free
//! at runtime, and stable across processes - which is what matters for a
//! degraded-mode index that must stay self-consistent.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

use super::Embedder;
use crate::constants::EMBEDDING_DIM;
use crate::errors::Result;

/// Deterministic hash-based embedder
pub struct SimplifiedEmbedder {
    dimension: usize,
}

impl SimplifiedEmbedder {
    pub fn new() -> Self {
        tracing::warn!(
            "Using simplified hash-based embeddings; semantic search quality will be limited"
        );
        Self {
            dimension: EMBEDDING_DIM,
        }
    }

    fn generate(&self, text: &str) -> Vec<f32> {
        let mut embedding = vec![0.0f32; self.dimension];
        let mut hasher = DefaultHasher::new();

        // Word features
        for (i, word) in text.split_whitespace().enumerate() {
            word.to_lowercase().hash(&mut hasher);
            let hash = hasher.finish();

            for j in 0..64usize {
                let index = (i * 64 + j) % self.dimension;
                embedding[index] += ((hash >> j) & 1) as f32 * 0.1;
            }
        }

        // Character bigram features
        let chars: Vec<char> = text.to_lowercase().chars().collect();
        for i in 0..chars.len().saturating_sub(1) {
            let bigram = [chars[i], chars[i + 1]];
            bigram.hash(&mut hasher);
            let hash = hasher.finish();

            for j in 0..32usize {
                let index = ((hash as usize).wrapping_add(j)) % self.dimension;
                embedding[index] += ((hash >> (j % 64)) & 1) as f32 * 0.05;
            }
        }

        // L2 normalize
        let norm: f32 = embedding.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm > 0.0 {
            for val in &mut embedding {
                *val /= norm;
            }
        }

        embedding
    }
}

impl Default for SimplifiedEmbedder {
    fn default() -> Self {
        Self::new()
    }
}

impl Embedder for SimplifiedEmbedder {
    fn embed(&self, text: &str) -> Result<Vec<f32>> {
        if text.is_empty() {
            return Ok(vec![0.0; self.dimension]);
        }
        Ok(self.generate(text))
    }

    fn dimension(&self) -> usize {
        self.dimension
    }
}
