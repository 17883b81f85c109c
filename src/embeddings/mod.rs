//! Embedding generation module
//!
//! Provides semantic embeddings for conversation retrieval. The production
//! adapter runs sentence-transformers/all-MiniLM-L6-v2 through ONNX Runtime
//! for 384-dimensional vectors; a deterministic hash-based embedder covers
//! environments without model files.
//!
//! Adapter selection happens at construction. An adapter with no usable
//! model reports `EmbeddingUnavailable` from `embed` - it never silently
//! substitutes a different embedding space, since mixed spaces poison the
//! vector index.

pub mod minilm;
pub mod simplified;

use crate::errors::Result;

pub use minilm::{EmbeddingConfig, MiniLmEmbedder};
pub use simplified::SimplifiedEmbedder;

/// Trait for embedding generation
pub trait Embedder: Send + Sync {
    /// Generate an embedding for text.
    ///
    /// Errors with `EmbeddingUnavailable` when no model is configured and
    /// `EmbeddingDimensionMismatch` when model output does not match
    /// `dimension()`.
    fn embed(&self, text: &str) -> Result<Vec<f32>>;

    /// Embedding dimension this adapter produces
    fn dimension(&self) -> usize;

    /// Batch embed multiple texts (default: sequential)
    fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>> {
        texts.iter().map(|text| self.embed(text)).collect()
    }
}
