//! Configuration management
//!
//! All configurable parameters in one place with environment variable
//! overrides. Sensible defaults, configurable in production.
//!
//! Model paths are owned by the adapters themselves
//! (`embeddings::EmbeddingConfig`, `extraction::NerConfig`); this module
//! covers storage layout and engine behavior.

use serde::{Deserialize, Serialize};
use std::env;
use std::path::PathBuf;

use crate::constants::{DEFAULT_SEARCH_LIMIT, EXTRACTION_CONFIDENCE_THRESHOLD};

/// Which search backend to construct
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SearchBackendKind {
    /// Cosine vector search over embedded entries
    Vector,
    /// Recency-ordered listing only (no vector search capability)
    RecencyOnly,
}

/// Configuration for the conversation memory system
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryConfig {
    /// Base directory for all stores (entries, vectors, graph)
    pub storage_path: PathBuf,

    /// Search backend selected at construction
    pub search_backend: SearchBackendKind,

    /// Minimum confidence for extracted entity spans
    pub extraction_confidence_threshold: f32,

    /// Default result limit for search
    pub default_search_limit: usize,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            storage_path: PathBuf::from("./chronicle_store"),
            search_backend: SearchBackendKind::Vector,
            extraction_confidence_threshold: EXTRACTION_CONFIDENCE_THRESHOLD,
            default_search_limit: DEFAULT_SEARCH_LIMIT,
        }
    }
}

impl MemoryConfig {
    /// Load configuration from environment variables
    ///
    /// - `CHRONICLE_STORAGE_PATH`: base storage directory
    /// - `CHRONICLE_SEARCH_BACKEND`: `vector` (default) or `recency`
    /// - `CHRONICLE_EXTRACTION_CONFIDENCE`: span confidence threshold
    /// - `CHRONICLE_SEARCH_LIMIT`: default search result limit
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(path) = env::var("CHRONICLE_STORAGE_PATH") {
            config.storage_path = PathBuf::from(path);
        }

        if let Ok(backend) = env::var("CHRONICLE_SEARCH_BACKEND") {
            config.search_backend = match backend.to_lowercase().as_str() {
                "recency" | "recency_only" => SearchBackendKind::RecencyOnly,
                "vector" => SearchBackendKind::Vector,
                other => {
                    tracing::warn!(
                        "Unknown search backend '{}', defaulting to vector",
                        other
                    );
                    SearchBackendKind::Vector
                }
            };
        }

        if let Ok(val) = env::var("CHRONICLE_EXTRACTION_CONFIDENCE") {
            if let Ok(threshold) = val.parse::<f32>() {
                if (0.0..=1.0).contains(&threshold) {
                    config.extraction_confidence_threshold = threshold;
                }
            }
        }

        if let Ok(val) = env::var("CHRONICLE_SEARCH_LIMIT") {
            if let Ok(limit) = val.parse::<usize>() {
                if limit > 0 {
                    config.default_search_limit = limit;
                }
            }
        }

        config
    }

    /// Directory for the entry record store
    pub fn entries_path(&self) -> PathBuf {
        self.storage_path.join("entries")
    }

    /// Directory for the vector store
    pub fn vectors_path(&self) -> PathBuf {
        self.storage_path.join("vectors")
    }

    /// Directory for the entity graph
    pub fn graph_path(&self) -> PathBuf {
        self.storage_path.join("graph")
    }
}
