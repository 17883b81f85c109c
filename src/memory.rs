//! Conversation memory orchestrator
//!
//! `ConversationMemory` owns the stores and engines and runs the archive
//! pipeline: persist the entry, extract entities, enrich entry metadata,
//! embed + upsert into the vector store, and merge the extraction batch
//! into the knowledge graph. Adapters are injected at construction;
//! nothing here reaches for global state.

use std::collections::BTreeMap;
use std::sync::Arc;
use uuid::Uuid;

use crate::config::{MemoryConfig, SearchBackendKind};
use crate::constants::VECTOR_PAYLOAD_CONTENT_LIMIT;
use crate::embeddings::Embedder;
use crate::entry::{Entry, EntryType};
use crate::entry_store::EntryStore;
use crate::errors::Result;
use crate::extraction::{dedupe_spans, entity_summary, EntityExtraction, DEFAULT_ENTITY_LABELS};
use crate::graph_memory::{EntityCounts, EntityVariant, GraphMemory, GraphStats};
use crate::search::{SearchEngine, SearchOutcome};
use crate::vector_store::{
    CosineVectorStore, HitPayload, SearchBackend, TemporalFilter, VectorSearchable,
};

/// Outcome of archiving one conversation
#[derive(Debug)]
pub struct ArchiveOutcome {
    /// Id of the stored entry
    pub entry_id: String,

    /// Entities merged into the graph, per variant
    pub entity_counts: EntityCounts,

    /// Degraded steps along the pipeline (extraction unavailable,
    /// embedding skipped, individual merge failures)
    pub warnings: Vec<String>,
}

/// Core system for storing and searching archived conversations
pub struct ConversationMemory {
    config: MemoryConfig,
    entry_store: Arc<EntryStore>,
    graph: Arc<GraphMemory>,
    vector_store: Option<Arc<CosineVectorStore>>,
    search_engine: SearchEngine,
    extractor: Arc<dyn EntityExtraction>,
    embedder: Arc<dyn Embedder>,
}

impl ConversationMemory {
    /// Construct the memory system with injected model adapters.
    ///
    /// Store open failures are fatal here; adapter unavailability is not -
    /// the pipeline degrades per operation instead.
    pub fn new(
        config: MemoryConfig,
        extractor: Arc<dyn EntityExtraction>,
        embedder: Arc<dyn Embedder>,
    ) -> Result<Self> {
        let entry_store = Arc::new(EntryStore::new(&config.entries_path())?);
        let graph = Arc::new(GraphMemory::new(&config.graph_path())?);

        let (vector_store, backend) = match config.search_backend {
            SearchBackendKind::Vector => {
                let store = Arc::new(CosineVectorStore::new(&config.vectors_path())?);
                (
                    Some(Arc::clone(&store)),
                    SearchBackend::Vector(store as Arc<dyn VectorSearchable>),
                )
            }
            SearchBackendKind::RecencyOnly => {
                tracing::info!("Vector search disabled; using recency-only backend");
                (None, SearchBackend::RecencyOnly)
            }
        };

        let search_engine = SearchEngine::new(
            Arc::clone(&embedder),
            backend,
            Arc::clone(&entry_store),
        );

        tracing::info!(
            "Conversation memory ready at {} ({} entries)",
            config.storage_path.display(),
            entry_store.len()
        );

        Ok(Self {
            config,
            entry_store,
            graph,
            vector_store,
            search_engine,
            extractor,
            embedder,
        })
    }

    /// Format speaker-tagged messages into storable conversation text
    pub fn format_messages<'a>(
        messages: impl IntoIterator<Item = (&'a str, &'a str)>,
    ) -> String {
        messages
            .into_iter()
            .map(|(sender, content)| format!("{sender}: {content}"))
            .collect::<Vec<_>>()
            .join("\n\n")
    }

    /// Archive a conversation into long-term memory.
    ///
    /// Runs the full pipeline. Extraction and embedding failures degrade
    /// with warnings; only record-store failures abort, since an archive
    /// that persisted nothing has nothing to degrade to.
    pub fn archive_conversation(
        &self,
        content: &str,
        title: &str,
        conversation_id: Option<&str>,
        metadata: BTreeMap<String, serde_json::Value>,
    ) -> Result<ArchiveOutcome> {
        let conversation_id = conversation_id
            .map(str::to_string)
            .unwrap_or_else(|| Uuid::new_v4().to_string());
        let mut warnings = Vec::new();

        // Extract entities; a missing model means zero entities, not a failure
        let spans = match self
            .extractor
            .extract(content, Some(DEFAULT_ENTITY_LABELS))
        {
            Ok(spans) => spans
                .into_iter()
                .filter(|s| s.confidence >= self.config.extraction_confidence_threshold)
                .collect::<Vec<_>>(),
            Err(e) => {
                tracing::warn!("Entity extraction degraded to zero entities: {}", e);
                warnings.push(e.message());
                Vec::new()
            }
        };

        // Build the entry with extraction-derived metadata
        let mut entry_metadata = metadata;
        entry_metadata.insert("title".to_string(), title.into());

        let deduped = dedupe_spans(spans.clone());
        entry_metadata.insert("entity_count".to_string(), deduped.len().into());
        entry_metadata.insert("entity_summary".to_string(), entity_summary(&deduped).into());
        if let Ok(entities_json) = serde_json::to_value(&deduped) {
            entry_metadata.insert("entities".to_string(), entities_json);
        }

        let entry = Entry::conversation(content, conversation_id.as_str(), entry_metadata);
        self.entry_store.save(&entry)?;

        // Embed and index; skipping on failure leaves the entry reachable
        // through recency and graph lookups
        if let Some(vector_store) = &self.vector_store {
            match self.embedder.embed(content) {
                Ok(vector) => {
                    let payload = HitPayload {
                        content: Some(truncate_chars(content, VECTOR_PAYLOAD_CONTENT_LIMIT)),
                        entry_type: Some(entry.entry_type),
                        created_at: Some(entry.created_at),
                        metadata: entry.metadata.clone(),
                    };
                    if let Err(e) = vector_store.upsert(&entry.id, &vector, payload) {
                        tracing::warn!("Vector upsert failed for {}: {}", entry.id, e);
                        warnings.push(e.message());
                    }
                }
                Err(e) => {
                    tracing::warn!("Embedding skipped for {}: {}", entry.id, e);
                    warnings.push(e.message());
                }
            }
        }

        // Merge raw spans into the graph; repeats within one conversation
        // are observations too
        let report =
            self.graph
                .process_extraction_batch(&spans, &conversation_id, &entry.id, title);
        warnings.extend(report.warnings);

        tracing::info!(
            "Archived conversation {} as entry {} ({} entities)",
            conversation_id,
            entry.id,
            report.stored.total()
        );

        Ok(ArchiveOutcome {
            entry_id: entry.id,
            entity_counts: report.stored,
            warnings,
        })
    }

    /// Search entries by semantic similarity
    pub fn search(
        &self,
        query: &str,
        entry_types: Option<&[EntryType]>,
        temporal: Option<TemporalFilter>,
        limit: usize,
    ) -> SearchOutcome {
        self.search_engine.search(query, entry_types, temporal, limit)
    }

    /// Search for conversation context around a message
    pub fn search_conversation(
        &self,
        message: &str,
        temporal: Option<TemporalFilter>,
        limit: usize,
    ) -> SearchOutcome {
        self.search_engine
            .conversation_context_search(message, temporal, limit)
    }

    /// Get an entry by id
    pub fn get_entry(&self, entry_id: &str) -> Result<Option<Entry>> {
        self.entry_store.get(entry_id)
    }

    /// Most recent entries, newest first
    pub fn recent(&self, limit: usize, entry_types: Option<&[EntryType]>) -> Result<Vec<Entry>> {
        self.entry_store.recent(limit, entry_types)
    }

    /// Entries an entity was observed in (graph lookup + hydration).
    ///
    /// `name` is normalized before lookup. Edges pointing at entries that
    /// no longer hydrate are skipped.
    pub fn entries_discussing(
        &self,
        variant: EntityVariant,
        name: &str,
    ) -> Result<Vec<Entry>> {
        let key = crate::normalize::normalize(name);
        let entry_ids = self.graph.entries_mentioning(variant, &key)?;

        let mut entries = Vec::with_capacity(entry_ids.len());
        for entry_id in entry_ids {
            match self.entry_store.get(&entry_id)? {
                Some(entry) => entries.push(entry),
                None => tracing::warn!("Graph edge points at missing entry {}", entry_id),
            }
        }
        Ok(entries)
    }

    /// Graph node/edge counts
    pub fn graph_stats(&self) -> GraphStats {
        self.graph.get_stats()
    }

    /// The underlying graph (entity lookups, stats)
    pub fn graph(&self) -> &GraphMemory {
        &self.graph
    }

    /// The underlying record store
    pub fn entry_store(&self) -> &EntryStore {
        &self.entry_store
    }

    pub fn config(&self) -> &MemoryConfig {
        &self.config
    }
}

/// Truncate to at most `limit` characters on a char boundary
fn truncate_chars(text: &str, limit: usize) -> String {
    match text.char_indices().nth(limit) {
        Some((idx, _)) => text[..idx].to_string(),
        None => text.to_string(),
    }
}
