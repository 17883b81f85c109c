//! Vector store boundary
//!
//! `VectorSearchable` is the nearest-neighbor interface the search engine
//! consumes. `CosineVectorStore` implements it with an exhaustive cosine
//! scan over an in-memory index persisted to RocksDB - the exact-search
//! equivalent of a FLAT/COSINE collection, which is the semantics the
//! vector schema was designed for.
//!
//! Backend capability is decided at construction via `SearchBackend`:
//! deployments without vector search get a recency-only engine instead of
//! runtime capability sniffing.

use chrono::{DateTime, Utc};
use ordered_float::OrderedFloat;
use parking_lot::RwLock;
use rocksdb::{Options, DB};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use std::sync::Arc;

use crate::constants::EMBEDDING_DIM;
use crate::entry::{Entry, EntryType};
use crate::errors::{MemoryError, Result};

/// Inclusive created_at bounds
#[derive(Debug, Clone, Copy, Default)]
pub struct TemporalFilter {
    pub start: Option<DateTime<Utc>>,
    pub end: Option<DateTime<Utc>>,
}

impl TemporalFilter {
    pub fn contains(&self, at: DateTime<Utc>) -> bool {
        if let Some(start) = self.start {
            if at < start {
                return false;
            }
        }
        if let Some(end) = self.end {
            if at > end {
                return false;
            }
        }
        true
    }
}

/// Entry-type and temporal constraints on a search
#[derive(Debug, Clone, Default)]
pub struct SearchFilter {
    pub entry_types: Option<Vec<EntryType>>,
    pub temporal: Option<TemporalFilter>,
}

impl SearchFilter {
    pub fn is_empty(&self) -> bool {
        self.entry_types.is_none() && self.temporal.is_none()
    }

    /// Check a hydrated entry against the filter
    pub fn matches_entry(&self, entry: &Entry) -> bool {
        if let Some(types) = &self.entry_types {
            if !types.contains(&entry.entry_type) {
                return false;
            }
        }
        if let Some(temporal) = &self.temporal {
            if !temporal.contains(entry.created_at) {
                return false;
            }
        }
        true
    }

    /// Check an inline hit payload against the filter.
    ///
    /// A payload missing the filtered field fails the filter; pre-filtering
    /// must not wave through records it cannot judge.
    pub fn matches_payload(&self, payload: &HitPayload) -> bool {
        if let Some(types) = &self.entry_types {
            match payload.entry_type {
                Some(t) if types.contains(&t) => {}
                _ => return false,
            }
        }
        if let Some(temporal) = &self.temporal {
            match payload.created_at {
                Some(at) if temporal.contains(at) => {}
                _ => return false,
            }
        }
        true
    }
}

/// Inline fields carried alongside a vector.
///
/// Enough to reconstruct a minimal record when the full entry has gone
/// missing from the record store.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HitPayload {
    pub content: Option<String>,
    pub entry_type: Option<EntryType>,
    pub created_at: Option<DateTime<Utc>>,
    pub metadata: BTreeMap<String, serde_json::Value>,
}

/// A raw nearest-neighbor hit
#[derive(Debug, Clone)]
pub struct VectorHit {
    pub entry_id: String,
    /// Raw similarity from the store; higher is more relevant
    pub score: f32,
    pub payload: HitPayload,
}

/// Nearest-neighbor store boundary
pub trait VectorSearchable: Send + Sync {
    /// Insert or replace the vector for an entry
    fn upsert(&self, entry_id: &str, vector: &[f32], payload: HitPayload) -> Result<()>;

    /// K nearest neighbors by similarity, optionally pre-filtered
    fn search(
        &self,
        vector: &[f32],
        k: usize,
        filter: Option<&SearchFilter>,
    ) -> Result<Vec<VectorHit>>;

    /// Whether `search` honors the filter argument; when false the caller
    /// over-fetches and post-filters hydrated results
    fn supports_filtered_search(&self) -> bool {
        false
    }

    /// Number of stored vectors
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Search capability selected at construction
#[derive(Clone)]
pub enum SearchBackend {
    /// Full semantic search over a vector store
    Vector(Arc<dyn VectorSearchable>),
    /// No vector capability; searches answer with recency listings
    RecencyOnly,
}

#[derive(Serialize, Deserialize)]
struct StoredVector {
    vector: Vec<f32>,
    payload: HitPayload,
}

/// Compute cosine similarity between two vectors
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() {
        return 0.0;
    }

    let mut dot = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;
    for (&x, &y) in a.iter().zip(b.iter()) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    let denom = norm_a.sqrt() * norm_b.sqrt();
    if denom == 0.0 {
        return 0.0;
    }
    dot / denom
}

/// Exhaustive cosine-scan vector store with RocksDB persistence
pub struct CosineVectorStore {
    db: Arc<DB>,
    index: RwLock<HashMap<String, Arc<StoredVector>>>,
    dimension: usize,
}

impl CosineVectorStore {
    pub fn new(path: &Path) -> Result<Self> {
        std::fs::create_dir_all(path)
            .map_err(|e| MemoryError::StorageError(format!("create {}: {e}", path.display())))?;

        let mut opts = Options::default();
        opts.create_if_missing(true);
        opts.set_compression_type(rocksdb::DBCompressionType::Lz4);

        let db = Arc::new(
            DB::open(&opts, path.join("vectors"))
                .map_err(|e| MemoryError::StorageError(e.to_string()))?,
        );

        // Load the full index into memory; exhaustive scan search needs it
        // resident anyway
        let mut index = HashMap::new();
        for item in db.iterator(rocksdb::IteratorMode::Start) {
            match item {
                Ok((key, value)) => {
                    let entry_id = String::from_utf8_lossy(&key).to_string();
                    match serde_json::from_slice::<StoredVector>(&value) {
                        Ok(stored) => {
                            index.insert(entry_id, Arc::new(stored));
                        }
                        Err(e) => {
                            tracing::warn!("Skipping undecodable vector for {}: {}", entry_id, e)
                        }
                    }
                }
                Err(e) => tracing::warn!("RocksDB iterator error (continuing): {}", e),
            }
        }

        if !index.is_empty() {
            tracing::info!("Loaded vector store with {} vectors", index.len());
        }

        Ok(Self {
            db,
            index: RwLock::new(index),
            dimension: EMBEDDING_DIM,
        })
    }
}

impl VectorSearchable for CosineVectorStore {
    fn upsert(&self, entry_id: &str, vector: &[f32], payload: HitPayload) -> Result<()> {
        if vector.len() != self.dimension {
            return Err(MemoryError::EmbeddingDimensionMismatch {
                expected: self.dimension,
                actual: vector.len(),
            });
        }

        let stored = StoredVector {
            vector: vector.to_vec(),
            payload,
        };
        // JSON for the same reason as the record store: payloads carry
        // arbitrary metadata values
        let bytes = serde_json::to_vec(&stored)
            .map_err(|e| MemoryError::SerializationError(e.to_string()))?;
        self.db
            .put(entry_id.as_bytes(), bytes)
            .map_err(|e| MemoryError::StorageError(e.to_string()))?;

        self.index
            .write()
            .insert(entry_id.to_string(), Arc::new(stored));
        Ok(())
    }

    fn search(
        &self,
        vector: &[f32],
        k: usize,
        filter: Option<&SearchFilter>,
    ) -> Result<Vec<VectorHit>> {
        if vector.len() != self.dimension {
            return Err(MemoryError::EmbeddingDimensionMismatch {
                expected: self.dimension,
                actual: vector.len(),
            });
        }

        let index = self.index.read();
        let mut scored: Vec<(OrderedFloat<f32>, VectorHit)> = index
            .iter()
            .filter(|(_, stored)| {
                filter.map_or(true, |f| f.matches_payload(&stored.payload))
            })
            .map(|(entry_id, stored)| {
                let score = cosine_similarity(vector, &stored.vector);
                (
                    OrderedFloat(score),
                    VectorHit {
                        entry_id: entry_id.clone(),
                        score,
                        payload: stored.payload.clone(),
                    },
                )
            })
            .collect();

        // Sort by score descending, take top k
        scored.sort_by(|a, b| b.0.cmp(&a.0));
        Ok(scored.into_iter().take(k).map(|(_, hit)| hit).collect())
    }

    fn supports_filtered_search(&self) -> bool {
        true
    }

    fn len(&self) -> usize {
        self.index.read().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn payload(entry_type: EntryType) -> HitPayload {
        HitPayload {
            content: Some("content".to_string()),
            entry_type: Some(entry_type),
            created_at: Some(Utc::now()),
            metadata: BTreeMap::new(),
        }
    }

    fn unit(dim_hot: usize) -> Vec<f32> {
        let mut v = vec![0.0; EMBEDDING_DIM];
        v[dim_hot] = 1.0;
        v
    }

    #[test]
    fn test_cosine_similarity_basics() {
        let a = vec![1.0, 0.0, 0.0];
        let b = vec![1.0, 0.0, 0.0];
        assert!((cosine_similarity(&a, &b) - 1.0).abs() < 0.001);

        let c = vec![0.0, 1.0, 0.0];
        assert!(cosine_similarity(&a, &c).abs() < 0.001);

        // Length mismatch scores zero, not panic
        assert_eq!(cosine_similarity(&a, &[1.0, 0.0]), 0.0);
    }

    #[test]
    fn test_upsert_rejects_wrong_dimension() {
        let dir = TempDir::new().unwrap();
        let store = CosineVectorStore::new(dir.path()).unwrap();
        let err = store
            .upsert("e1", &[0.5; 100], payload(EntryType::Conversation))
            .unwrap_err();
        assert_eq!(err.code(), "EMBEDDING_DIMENSION_MISMATCH");
    }

    #[test]
    fn test_search_ranks_by_similarity() {
        let dir = TempDir::new().unwrap();
        let store = CosineVectorStore::new(dir.path()).unwrap();

        store.upsert("near", &unit(0), payload(EntryType::Conversation)).unwrap();
        store.upsert("far", &unit(1), payload(EntryType::Conversation)).unwrap();

        let mut query = unit(0);
        query[1] = 0.1;
        let hits = store.search(&query, 2, None).unwrap();
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].entry_id, "near");
        assert!(hits[0].score > hits[1].score);
    }

    #[test]
    fn test_upsert_replaces() {
        let dir = TempDir::new().unwrap();
        let store = CosineVectorStore::new(dir.path()).unwrap();

        store.upsert("e1", &unit(0), payload(EntryType::Conversation)).unwrap();
        store.upsert("e1", &unit(1), payload(EntryType::Conversation)).unwrap();
        assert_eq!(store.len(), 1);

        let hits = store.search(&unit(1), 1, None).unwrap();
        assert!((hits[0].score - 1.0).abs() < 0.001);
    }

    #[test]
    fn test_filtered_search_excludes_mismatched_payloads() {
        let dir = TempDir::new().unwrap();
        let store = CosineVectorStore::new(dir.path()).unwrap();
        assert!(store.supports_filtered_search());

        store.upsert("conv", &unit(0), payload(EntryType::Conversation)).unwrap();
        store.upsert("doc", &unit(0), payload(EntryType::Document)).unwrap();
        // No type info at all: must not pass a typed filter
        store
            .upsert(
                "untyped",
                &unit(0),
                HitPayload {
                    entry_type: None,
                    ..payload(EntryType::Conversation)
                },
            )
            .unwrap();

        let filter = SearchFilter {
            entry_types: Some(vec![EntryType::Conversation]),
            temporal: None,
        };
        let hits = store.search(&unit(0), 10, Some(&filter)).unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].entry_id, "conv");
    }

    #[test]
    fn test_temporal_filter_inclusive_bounds() {
        let now = Utc::now();
        let filter = TemporalFilter {
            start: Some(now),
            end: Some(now),
        };
        assert!(filter.contains(now));
        assert!(!filter.contains(now + chrono::Duration::seconds(1)));
        assert!(!filter.contains(now - chrono::Duration::seconds(1)));
    }

    #[test]
    fn test_persistence_across_reopen() {
        let dir = TempDir::new().unwrap();
        {
            let store = CosineVectorStore::new(dir.path()).unwrap();
            store.upsert("e1", &unit(3), payload(EntryType::Conversation)).unwrap();
        }

        let reopened = CosineVectorStore::new(dir.path()).unwrap();
        assert_eq!(reopened.len(), 1);
        let hits = reopened.search(&unit(3), 1, None).unwrap();
        assert_eq!(hits[0].entry_id, "e1");
    }
}
