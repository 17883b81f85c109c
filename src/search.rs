//! Semantic search over conversation records
//!
//! Embeds the query, asks the vector backend for nearest neighbors,
//! hydrates hits into full entries through the record store, filters,
//! and ranks by raw similarity. Every failure path degrades: embedding
//! trouble yields an empty outcome with a warning, a hydration miss
//! falls back to the hit's inline payload, and a backend with no vector
//! capability answers with recency listings.

use dashmap::DashMap;
use ordered_float::OrderedFloat;
use sha2::{Digest, Sha256};
use std::sync::Arc;

use crate::constants::VECTOR_SEARCH_CANDIDATE_MULTIPLIER;
use crate::embeddings::Embedder;
use crate::entry::{Entry, EntryType};
use crate::entry_store::EntryStore;
use crate::errors::{MemoryError, Result};
use crate::vector_store::{SearchBackend, SearchFilter, TemporalFilter, VectorHit};

/// Where a result came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResultSource {
    /// Vector similarity search
    Vector,
    /// Recency listing (no vector capability or degraded path)
    Recency,
}

impl ResultSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Vector => "vector",
            Self::Recency => "recency",
        }
    }
}

/// One ranked search result
#[derive(Debug, Clone)]
pub struct SearchResult {
    pub entry: Entry,
    /// Raw similarity score; 0.0 for recency results
    pub score: f32,
    pub source: ResultSource,
}

/// Results plus accumulated warnings.
///
/// Search never fails outright; degraded paths surface here.
#[derive(Debug, Default)]
pub struct SearchOutcome {
    pub results: Vec<SearchResult>,
    pub warnings: Vec<String>,
}

impl SearchOutcome {
    fn degraded(warning: String) -> Self {
        Self {
            results: Vec::new(),
            warnings: vec![warning],
        }
    }

    pub fn is_empty(&self) -> bool {
        self.results.is_empty()
    }
}

/// Search engine over a capability-selected backend
pub struct SearchEngine {
    embedder: Arc<dyn Embedder>,
    backend: SearchBackend,
    entry_store: Arc<EntryStore>,

    /// Query embedding cache: SHA-256(query text) -> embedding.
    /// Stable across repeated context searches for the same message.
    query_cache: DashMap<[u8; 32], Vec<f32>>,
}

impl SearchEngine {
    pub fn new(
        embedder: Arc<dyn Embedder>,
        backend: SearchBackend,
        entry_store: Arc<EntryStore>,
    ) -> Self {
        Self {
            embedder,
            backend,
            entry_store,
            query_cache: DashMap::new(),
        }
    }

    fn query_embedding(&self, query: &str) -> Result<Vec<f32>> {
        let key: [u8; 32] = Sha256::digest(query.as_bytes()).into();

        if let Some(cached) = self.query_cache.get(&key) {
            return Ok(cached.clone());
        }

        let embedding = self.embedder.embed(query)?;
        self.query_cache.insert(key, embedding.clone());
        Ok(embedding)
    }

    /// Main search interface.
    ///
    /// Returns entries ranked by similarity descending, truncated to
    /// `limit`, plus warnings for every degraded step along the way.
    pub fn search(
        &self,
        query: &str,
        entry_types: Option<&[EntryType]>,
        temporal: Option<TemporalFilter>,
        limit: usize,
    ) -> SearchOutcome {
        tracing::debug!("Search request: query len {}, limit {}", query.len(), limit);

        let filter = SearchFilter {
            entry_types: entry_types.map(|t| t.to_vec()),
            temporal,
        };

        match &self.backend {
            SearchBackend::RecencyOnly => self.recency_search(&filter, limit),
            SearchBackend::Vector(store) => {
                let embedding = match self.query_embedding(query) {
                    Ok(v) => v,
                    Err(e) => {
                        tracing::warn!("Search degraded to empty results: {}", e);
                        return SearchOutcome::degraded(e.message());
                    }
                };

                let mut outcome = SearchOutcome::default();

                let prefiltered = store.supports_filtered_search();
                let k = if filter.is_empty() || prefiltered {
                    limit
                } else {
                    limit * VECTOR_SEARCH_CANDIDATE_MULTIPLIER
                };

                let hits = match store.search(
                    &embedding,
                    k,
                    if prefiltered { Some(&filter) } else { None },
                ) {
                    Ok(hits) => hits,
                    Err(e) => {
                        tracing::warn!("Vector search failed: {}", e);
                        return SearchOutcome::degraded(e.message());
                    }
                };

                for hit in hits {
                    match self.hydrate(hit) {
                        Ok(result) => {
                            if prefiltered || filter.matches_entry(&result.entry) {
                                outcome.results.push(result);
                            }
                        }
                        Err(e) => {
                            tracing::warn!("Dropping search hit: {}", e);
                            outcome.warnings.push(e.message());
                        }
                    }
                }

                // Rank by score descending and truncate
                outcome
                    .results
                    .sort_by_key(|r| std::cmp::Reverse(OrderedFloat(r.score)));
                outcome.results.truncate(limit);

                tracing::debug!("Search returned {} results", outcome.results.len());
                outcome
            }
        }
    }

    /// Search optimized for finding conversation context.
    ///
    /// Restricts to conversation entries; when the primary path comes back
    /// empty, retries exactly once with filters relaxed in case filtering
    /// or hydration silently dropped everything.
    pub fn conversation_context_search(
        &self,
        message: &str,
        temporal: Option<TemporalFilter>,
        limit: usize,
    ) -> SearchOutcome {
        let conversation_only = [EntryType::Conversation];
        let primary = self.search(message, Some(&conversation_only), temporal, limit);

        if !primary.is_empty() {
            return primary;
        }

        tracing::debug!("Conversation search empty; retrying once with relaxed filters");
        let mut retry = self.search(message, None, None, limit);
        retry.warnings.extend(primary.warnings);
        retry
    }

    /// Hydrate a raw hit into a search result.
    ///
    /// Prefers the full record; falls back to a minimal record built from
    /// the hit's inline payload; errors (dropping the hit) only when
    /// neither source is usable.
    fn hydrate(&self, hit: VectorHit) -> Result<SearchResult> {
        match self.entry_store.get(&hit.entry_id) {
            Ok(Some(entry)) => {
                return Ok(SearchResult {
                    entry,
                    score: hit.score,
                    source: ResultSource::Vector,
                })
            }
            Ok(None) => {}
            Err(e) => {
                tracing::warn!("Could not fetch entry {}: {}", hit.entry_id, e);
            }
        }

        let payload = hit.payload;
        match (payload.content, payload.entry_type) {
            (Some(content), Some(entry_type)) => {
                tracing::debug!(
                    "Hydration miss for {}; using inline payload",
                    hit.entry_id
                );
                let entry = Entry::minimal(
                    Some(hit.entry_id),
                    content,
                    entry_type,
                    payload.created_at,
                    payload.metadata,
                );
                Ok(SearchResult {
                    entry,
                    score: hit.score,
                    source: ResultSource::Vector,
                })
            }
            _ => Err(MemoryError::HydrationMiss(hit.entry_id)),
        }
    }

    /// Recency fallback for backends without vector search
    fn recency_search(&self, filter: &SearchFilter, limit: usize) -> SearchOutcome {
        let types = filter.entry_types.as_deref();

        match self.entry_store.recent(limit, types) {
            Ok(entries) => SearchOutcome {
                results: entries
                    .into_iter()
                    .filter(|entry| {
                        filter
                            .temporal
                            .as_ref()
                            .map_or(true, |t| t.contains(entry.created_at))
                    })
                    .map(|entry| SearchResult {
                        entry,
                        score: 0.0,
                        source: ResultSource::Recency,
                    })
                    .collect(),
                warnings: Vec::new(),
            },
            Err(e) => {
                tracing::warn!("Recency listing failed: {}", e);
                SearchOutcome::degraded(e.message())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embeddings::SimplifiedEmbedder;
    use crate::entry::Entry;
    use crate::errors::MemoryError;
    use std::collections::BTreeMap;
    use tempfile::TempDir;

    /// Embedder that always reports no model
    struct UnavailableEmbedder;

    impl Embedder for UnavailableEmbedder {
        fn embed(&self, _text: &str) -> Result<Vec<f32>> {
            Err(MemoryError::EmbeddingUnavailable("not configured".to_string()))
        }

        fn dimension(&self) -> usize {
            crate::constants::EMBEDDING_DIM
        }
    }

    fn entry_store() -> (Arc<EntryStore>, TempDir) {
        let dir = TempDir::new().unwrap();
        (Arc::new(EntryStore::new(dir.path()).unwrap()), dir)
    }

    #[test]
    fn test_unavailable_embedder_degrades_to_empty() {
        let (store, _dir) = entry_store();
        let vdir = TempDir::new().unwrap();
        let vectors =
            Arc::new(crate::vector_store::CosineVectorStore::new(vdir.path()).unwrap());
        let engine = SearchEngine::new(
            Arc::new(UnavailableEmbedder),
            SearchBackend::Vector(vectors),
            store,
        );

        let outcome = engine.search("machine learning", None, None, 5);
        assert!(outcome.results.is_empty());
        assert_eq!(outcome.warnings.len(), 1);
        assert!(outcome.warnings[0].contains("unavailable"));
    }

    #[test]
    fn test_recency_backend_lists_newest_first() {
        let (store, _dir) = entry_store();
        let older = {
            let mut e = Entry::conversation("User: old", "conv-1", BTreeMap::new());
            e.created_at = chrono::Utc::now() - chrono::Duration::hours(1);
            e
        };
        let newer = Entry::conversation("User: new", "conv-2", BTreeMap::new());
        store.save(&older).unwrap();
        store.save(&newer).unwrap();

        let engine = SearchEngine::new(
            Arc::new(SimplifiedEmbedder::new()),
            SearchBackend::RecencyOnly,
            store,
        );

        let outcome = engine.search("anything", None, None, 5);
        assert_eq!(outcome.results.len(), 2);
        assert_eq!(outcome.results[0].entry.id, newer.id);
        assert_eq!(outcome.results[0].source, ResultSource::Recency);
        assert_eq!(outcome.results[0].score, 0.0);
    }

    #[test]
    fn test_query_cache_returns_same_embedding() {
        let (store, _dir) = entry_store();
        let engine = SearchEngine::new(
            Arc::new(SimplifiedEmbedder::new()),
            SearchBackend::RecencyOnly,
            store,
        );

        let a = engine.query_embedding("repeated query").unwrap();
        let b = engine.query_embedding("repeated query").unwrap();
        assert_eq!(a, b);
        assert_eq!(engine.query_cache.len(), 1);
    }
}
