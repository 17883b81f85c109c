//! Entity knowledge graph - merge engine
//!
//! Typed entity nodes (Person, Organization, Technology, Topic) merged
//! incrementally from extraction batches, with weighted relationship edges
//! to the conversation entries they were observed in.
//!
//! Merge semantics ("create-or-strengthen"):
//! - exactly one node per (variant, normalized_key)
//! - confidence is a running maximum, never decreased
//! - mention_count strictly increases on every observation
//! - first_seen is immutable, last_seen tracks the newest observation
//!
//! Merges to the same key serialize through a per-key mutex table, the
//! explicit two-branch equivalent of a graph-native MERGE ON CREATE /
//! ON MATCH upsert. Merges to different keys and all reads run freely in
//! parallel.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parking_lot::Mutex;
use rocksdb::{Options, DB};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use crate::errors::{MemoryError, Result};
use crate::extraction::ExtractedSpan;
use crate::normalize::{normalize, Categorizer};

/// Entity variants tracked in the graph
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EntityVariant {
    Person,
    Organization,
    Technology,
    Topic,
}

impl EntityVariant {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Person => "Person",
            Self::Organization => "Organization",
            Self::Technology => "Technology",
            Self::Topic => "Topic",
        }
    }

    /// All variants, in stats/reporting order
    pub const ALL: [EntityVariant; 4] = [
        Self::Person,
        Self::Organization,
        Self::Technology,
        Self::Topic,
    ];

    fn index(&self) -> usize {
        match self {
            Self::Person => 0,
            Self::Organization => 1,
            Self::Technology => 2,
            Self::Topic => 3,
        }
    }
}

/// Relationship kinds, one per entity variant
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RelationKind {
    DiscussedIn,
    OrgIn,
    TechIn,
    TopicIn,
}

impl RelationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::DiscussedIn => "DISCUSSED_IN",
            Self::OrgIn => "ORG_IN",
            Self::TechIn => "TECH_IN",
            Self::TopicIn => "TOPIC_IN",
        }
    }

    /// The edge kind linking this entity variant to an entry
    pub fn for_variant(variant: EntityVariant) -> Self {
        match variant {
            EntityVariant::Person => Self::DiscussedIn,
            EntityVariant::Organization => Self::OrgIn,
            EntityVariant::Technology => Self::TechIn,
            EntityVariant::Topic => Self::TopicIn,
        }
    }

    fn index(&self) -> usize {
        match self {
            Self::DiscussedIn => 0,
            Self::OrgIn => 1,
            Self::TechIn => 2,
            Self::TopicIn => 3,
        }
    }
}

/// Entity node in the knowledge graph
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EntityNode {
    /// Which variant this node belongs to
    pub variant: EntityVariant,

    /// Entity name in original casing, as first observed
    pub display_name: String,

    /// Lowercased, trimmed dedup key; the node's identity within its variant
    pub normalized_key: String,

    /// Subcategory tag; present for Technology and Topic nodes only
    pub category: Option<String>,

    /// Running maximum confidence across observations
    pub confidence: f32,

    /// When this entity was first observed (immutable after creation)
    pub first_seen: DateTime<Utc>,

    /// When this entity was last observed
    pub last_seen: DateTime<Utc>,

    /// How many times this entity has been observed
    pub mention_count: u64,
}

/// Variant-specific descriptive edge attributes, set once on creation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum EdgeAttrs {
    DiscussedIn {
        context: String,
    },
    OrgIn {
        context: String,
        relationship_type: String,
    },
    TechIn {
        usage_context: String,
        proficiency_level: String,
    },
    TopicIn {
        importance_level: String,
        discussion_depth: String,
    },
}

impl EdgeAttrs {
    /// Default attributes for an entity observed in an entry with a title
    pub fn for_entry(variant: EntityVariant, entry_title: &str) -> Self {
        match variant {
            EntityVariant::Person => Self::DiscussedIn {
                context: entry_title.to_string(),
            },
            EntityVariant::Organization => Self::OrgIn {
                context: entry_title.to_string(),
                relationship_type: "mentioned".to_string(),
            },
            EntityVariant::Technology => Self::TechIn {
                usage_context: entry_title.to_string(),
                proficiency_level: "discussed".to_string(),
            },
            EntityVariant::Topic => Self::TopicIn {
                importance_level: "medium".to_string(),
                discussion_depth: "mentioned".to_string(),
            },
        }
    }
}

/// Relationship edge from an entity to a conversation entry
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelationshipEdge {
    pub kind: RelationKind,

    /// Source entity key within its variant
    pub normalized_key: String,

    /// Target entry id
    pub entry_id: String,

    /// Running maximum confidence across observations
    pub confidence: f32,

    pub created_at: DateTime<Utc>,

    /// Descriptive attributes; set on creation, never strengthened on merge
    pub attrs: EdgeAttrs,

    /// Mention counter. Tracked for DISCUSSED_IN edges only; the other
    /// kinds track confidence alone. Preserved asymmetry (see DESIGN.md).
    pub mentioned_count: Option<u64>,
}

/// Per-variant counts stored by one extraction batch
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntityCounts {
    pub persons: usize,
    pub organizations: usize,
    pub technologies: usize,
    pub topics: usize,
}

impl EntityCounts {
    pub fn total(&self) -> usize {
        self.persons + self.organizations + self.technologies + self.topics
    }

    fn bump(&mut self, variant: EntityVariant) {
        match variant {
            EntityVariant::Person => self.persons += 1,
            EntityVariant::Organization => self.organizations += 1,
            EntityVariant::Technology => self.technologies += 1,
            EntityVariant::Topic => self.topics += 1,
        }
    }
}

/// Outcome of `process_extraction_batch`
///
/// `stored.total() + skipped + warnings.len()` accounts for every input
/// span, so callers can detect partial failure by comparing against the
/// batch size.
#[derive(Debug, Clone, Default)]
pub struct ExtractionReport {
    /// Entities stored per variant
    pub stored: EntityCounts,

    /// Spans skipped for empty/whitespace-only text (not an error)
    pub skipped: usize,

    /// One message per span that failed to merge or link
    pub warnings: Vec<String>,
}

/// Graph-wide node and edge counts
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GraphStats {
    pub persons: usize,
    pub organizations: usize,
    pub technologies: usize,
    pub topics: usize,
    pub discussed_in: usize,
    pub org_in: usize,
    pub tech_in: usize,
    pub topic_in: usize,
}

impl GraphStats {
    pub fn total_nodes(&self) -> usize {
        self.persons + self.organizations + self.technologies + self.topics
    }

    pub fn total_edges(&self) -> usize {
        self.discussed_in + self.org_in + self.tech_in + self.topic_in
    }
}

/// Entity graph storage and merge operations
pub struct GraphMemory {
    /// RocksDB storage for entity nodes, keyed "Variant:normalized_key"
    entities_db: Arc<DB>,

    /// RocksDB storage for edges, keyed "KIND:normalized_key:entry_id"
    edges_db: Arc<DB>,

    /// Per-key mutex table serializing merges to the same node or edge
    key_locks: DashMap<String, Arc<Mutex<()>>>,

    /// Node counts per variant (index via EntityVariant::index)
    node_counts: [AtomicUsize; 4],

    /// Edge counts per kind (index via RelationKind::index)
    edge_counts: [AtomicUsize; 4],

    categorizer: Categorizer,
}

impl GraphMemory {
    /// Open (or create) the graph at the given path
    pub fn new(path: &Path) -> Result<Self> {
        std::fs::create_dir_all(path)
            .map_err(|e| MemoryError::StorageError(format!("create {}: {e}", path.display())))?;

        let mut opts = Options::default();
        opts.create_if_missing(true);
        opts.set_compression_type(rocksdb::DBCompressionType::Lz4);

        let entities_db = Arc::new(
            DB::open(&opts, path.join("graph_entities"))
                .map_err(|e| MemoryError::StorageError(e.to_string()))?,
        );
        let edges_db = Arc::new(
            DB::open(&opts, path.join("graph_edges"))
                .map_err(|e| MemoryError::StorageError(e.to_string()))?,
        );

        let node_counts = Self::count_by_prefix(&entities_db, |key| {
            EntityVariant::ALL
                .iter()
                .position(|v| key.starts_with(v.as_str().as_bytes()))
        });
        let edge_counts = Self::count_by_prefix(&edges_db, |key| {
            [
                RelationKind::DiscussedIn,
                RelationKind::OrgIn,
                RelationKind::TechIn,
                RelationKind::TopicIn,
            ]
            .iter()
            .position(|k| key.starts_with(k.as_str().as_bytes()))
        });

        let graph = Self {
            entities_db,
            edges_db,
            key_locks: DashMap::new(),
            node_counts,
            edge_counts,
            categorizer: Categorizer::new(),
        };

        let stats = graph.get_stats();
        if stats.total_nodes() > 0 || stats.total_edges() > 0 {
            tracing::info!(
                "Loaded graph with {} entities, {} relationships",
                stats.total_nodes(),
                stats.total_edges()
            );
        }

        Ok(graph)
    }

    /// One-time startup scan classifying stored keys into counter slots
    fn count_by_prefix(db: &DB, classify: impl Fn(&[u8]) -> Option<usize>) -> [AtomicUsize; 4] {
        let mut counts = [0usize; 4];
        for item in db.iterator(rocksdb::IteratorMode::Start) {
            match item {
                Ok((key, _)) => {
                    if let Some(idx) = classify(&key) {
                        counts[idx] += 1;
                    }
                }
                Err(e) => tracing::warn!("RocksDB iterator error (continuing): {}", e),
            }
        }
        counts.map(AtomicUsize::new)
    }

    fn key_lock(&self, storage_key: &str) -> Arc<Mutex<()>> {
        self.key_locks
            .entry(storage_key.to_string())
            .or_default()
            .clone()
    }

    fn entity_key(variant: EntityVariant, normalized_key: &str) -> String {
        format!("{}:{}", variant.as_str(), normalized_key)
    }

    fn edge_key(kind: RelationKind, normalized_key: &str, entry_id: &str) -> String {
        format!("{}:{}:{}", kind.as_str(), normalized_key, entry_id)
    }

    fn encode<T: Serialize>(value: &T) -> Result<Vec<u8>> {
        bincode::serde::encode_to_vec(value, bincode::config::standard())
            .map_err(|e| MemoryError::SerializationError(e.to_string()))
    }

    fn decode<T: for<'de> Deserialize<'de>>(bytes: &[u8]) -> Result<T> {
        bincode::serde::decode_from_slice(bytes, bincode::config::standard())
            .map(|(v, _)| v)
            .map_err(|e| MemoryError::SerializationError(e.to_string()))
    }

    /// Create-or-strengthen upsert for an entity observation.
    ///
    /// Atomic per (variant, normalized_key): concurrent merges to the same
    /// key serialize; merges to different keys do not contend.
    pub fn merge_entity(
        &self,
        variant: EntityVariant,
        display_name: &str,
        confidence: f32,
        observed_at: DateTime<Utc>,
    ) -> Result<EntityNode> {
        let normalized_key = normalize(display_name);
        if normalized_key.is_empty() {
            return Err(MemoryError::MergeFailure {
                entity: display_name.to_string(),
                reason: "empty normalized key".to_string(),
            });
        }

        let storage_key = Self::entity_key(variant, &normalized_key);
        let lock = self.key_lock(&storage_key);
        let _guard = lock.lock();

        let existing = self
            .entities_db
            .get(storage_key.as_bytes())
            .map_err(|e| MemoryError::StorageError(e.to_string()))?;

        let node = match existing {
            Some(bytes) => {
                let mut node: EntityNode = Self::decode(&bytes)?;
                node.confidence = node.confidence.max(confidence);
                node.mention_count += 1;
                node.last_seen = observed_at;
                node
            }
            None => {
                let category = self
                    .categorizer
                    .categorize(display_name, variant)
                    .map(str::to_string);
                let node = EntityNode {
                    variant,
                    display_name: display_name.trim().to_string(),
                    normalized_key: normalized_key.clone(),
                    category,
                    confidence,
                    first_seen: observed_at,
                    last_seen: observed_at,
                    mention_count: 1,
                };
                self.node_counts[variant.index()].fetch_add(1, Ordering::Relaxed);
                node
            }
        };

        self.entities_db
            .put(storage_key.as_bytes(), Self::encode(&node)?)
            .map_err(|e| MemoryError::StorageError(e.to_string()))?;

        Ok(node)
    }

    /// Get an entity by its normalized key
    pub fn get_entity(
        &self,
        variant: EntityVariant,
        normalized_key: &str,
    ) -> Result<Option<EntityNode>> {
        let storage_key = Self::entity_key(variant, normalized_key);
        match self
            .entities_db
            .get(storage_key.as_bytes())
            .map_err(|e| MemoryError::StorageError(e.to_string()))?
        {
            Some(bytes) => Ok(Some(Self::decode(&bytes)?)),
            None => Ok(None),
        }
    }

    /// Get an entity by display text (normalizes first)
    pub fn find_entity(&self, variant: EntityVariant, raw_text: &str) -> Result<Option<EntityNode>> {
        self.get_entity(variant, &normalize(raw_text))
    }

    /// Create or strengthen the edge linking an entity to an entry.
    ///
    /// On creation the edge takes `confidence` and `attrs`. On an existing
    /// edge only confidence (max) and, for DISCUSSED_IN, the mention
    /// counter change; descriptive attributes stay as first written.
    pub fn link_entity_to_entry(
        &self,
        variant: EntityVariant,
        normalized_key: &str,
        entry_id: &str,
        confidence: f32,
        attrs: EdgeAttrs,
    ) -> Result<RelationshipEdge> {
        let kind = RelationKind::for_variant(variant);
        let storage_key = Self::edge_key(kind, normalized_key, entry_id);
        let lock = self.key_lock(&storage_key);
        let _guard = lock.lock();

        let existing = self
            .edges_db
            .get(storage_key.as_bytes())
            .map_err(|e| MemoryError::StorageError(e.to_string()))?;

        let edge = match existing {
            Some(bytes) => {
                let mut edge: RelationshipEdge = Self::decode(&bytes)?;
                edge.confidence = edge.confidence.max(confidence);
                if let Some(count) = edge.mentioned_count.as_mut() {
                    *count += 1;
                }
                edge
            }
            None => {
                let edge = RelationshipEdge {
                    kind,
                    normalized_key: normalized_key.to_string(),
                    entry_id: entry_id.to_string(),
                    confidence,
                    created_at: Utc::now(),
                    attrs,
                    mentioned_count: match kind {
                        RelationKind::DiscussedIn => Some(1),
                        _ => None,
                    },
                };
                self.edge_counts[kind.index()].fetch_add(1, Ordering::Relaxed);
                edge
            }
        };

        self.edges_db
            .put(storage_key.as_bytes(), Self::encode(&edge)?)
            .map_err(|e| MemoryError::StorageError(e.to_string()))?;

        Ok(edge)
    }

    /// Get the edge between an entity and an entry, if any
    pub fn get_edge(
        &self,
        variant: EntityVariant,
        normalized_key: &str,
        entry_id: &str,
    ) -> Result<Option<RelationshipEdge>> {
        let kind = RelationKind::for_variant(variant);
        let storage_key = Self::edge_key(kind, normalized_key, entry_id);
        match self
            .edges_db
            .get(storage_key.as_bytes())
            .map_err(|e| MemoryError::StorageError(e.to_string()))?
        {
            Some(bytes) => Ok(Some(Self::decode(&bytes)?)),
            None => Ok(None),
        }
    }

    /// Entry ids an entity was observed in (edge prefix scan)
    pub fn entries_mentioning(
        &self,
        variant: EntityVariant,
        normalized_key: &str,
    ) -> Result<Vec<String>> {
        let kind = RelationKind::for_variant(variant);
        let prefix = format!("{}:{}:", kind.as_str(), normalized_key);

        let mut entry_ids = Vec::new();
        let iter = self.edges_db.iterator(rocksdb::IteratorMode::From(
            prefix.as_bytes(),
            rocksdb::Direction::Forward,
        ));
        for item in iter {
            let (key, _) = item.map_err(|e| MemoryError::StorageError(e.to_string()))?;
            let key = String::from_utf8_lossy(&key);
            match key.strip_prefix(&prefix) {
                Some(entry_id) => entry_ids.push(entry_id.to_string()),
                None => break,
            }
        }

        Ok(entry_ids)
    }

    /// Route an extraction label to its entity variant.
    ///
    /// `person` and `organization` map directly; everything else (location,
    /// misc, or extractor-specific labels) goes through the technology-term
    /// heuristic.
    fn route_label(&self, label: &str, text: &str) -> EntityVariant {
        match label.to_lowercase().as_str() {
            "person" => EntityVariant::Person,
            "organization" => EntityVariant::Organization,
            _ => {
                if self.categorizer.is_technology_term(text) {
                    EntityVariant::Technology
                } else {
                    EntityVariant::Topic
                }
            }
        }
    }

    /// Merge one extraction batch into the graph.
    ///
    /// Every span triggers one `merge_entity` and one `link_entity_to_entry`.
    /// Empty-text spans are silently skipped. A failing span is logged and
    /// recorded as a warning; the batch always continues.
    pub fn process_extraction_batch(
        &self,
        spans: &[ExtractedSpan],
        conversation_id: &str,
        entry_id: &str,
        entry_title: &str,
    ) -> ExtractionReport {
        let mut report = ExtractionReport::default();

        for span in spans {
            if span.text.trim().is_empty() {
                report.skipped += 1;
                continue;
            }

            let variant = self.route_label(&span.label, &span.text);
            let observed_at = Utc::now();

            let merged = self
                .merge_entity(variant, &span.text, span.confidence, observed_at)
                .and_then(|node| {
                    self.link_entity_to_entry(
                        variant,
                        &node.normalized_key,
                        entry_id,
                        span.confidence,
                        EdgeAttrs::for_entry(variant, entry_title),
                    )
                });

            match merged {
                Ok(_) => report.stored.bump(variant),
                Err(e) => {
                    let err = MemoryError::MergeFailure {
                        entity: span.text.clone(),
                        reason: e.to_string(),
                    };
                    tracing::warn!(
                        "Entity merge failed in conversation {}: {}",
                        conversation_id,
                        err
                    );
                    report.warnings.push(err.message());
                }
            }
        }

        tracing::debug!(
            "Extraction batch for entry {}: {} stored, {} skipped, {} failed",
            entry_id,
            report.stored.total(),
            report.skipped,
            report.warnings.len()
        );

        report
    }

    /// Node and edge counts by type
    pub fn get_stats(&self) -> GraphStats {
        GraphStats {
            persons: self.node_counts[0].load(Ordering::Relaxed),
            organizations: self.node_counts[1].load(Ordering::Relaxed),
            technologies: self.node_counts[2].load(Ordering::Relaxed),
            topics: self.node_counts[3].load(Ordering::Relaxed),
            discussed_in: self.edge_counts[0].load(Ordering::Relaxed),
            org_in: self.edge_counts[1].load(Ordering::Relaxed),
            tech_in: self.edge_counts[2].load(Ordering::Relaxed),
            topic_in: self.edge_counts[3].load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn setup() -> (GraphMemory, TempDir) {
        let dir = TempDir::new().expect("tempdir");
        let graph = GraphMemory::new(dir.path()).expect("graph");
        (graph, dir)
    }

    fn span(text: &str, label: &str, confidence: f32) -> ExtractedSpan {
        ExtractedSpan {
            text: text.to_string(),
            label: label.to_string(),
            confidence,
            start: 0,
            end: text.len(),
        }
    }

    #[test]
    fn test_merge_creates_then_strengthens() {
        let (graph, _dir) = setup();
        let t0 = Utc::now();
        let t1 = t0 + chrono::Duration::minutes(5);

        let created = graph
            .merge_entity(EntityVariant::Person, "Jane Doe", 0.8, t0)
            .unwrap();
        assert_eq!(created.mention_count, 1);
        assert_eq!(created.first_seen, t0);
        assert_eq!(created.last_seen, t0);

        let merged = graph
            .merge_entity(EntityVariant::Person, "jane doe", 0.6, t1)
            .unwrap();
        assert_eq!(merged.mention_count, 2);
        assert_eq!(merged.confidence, 0.8); // running max, 0.6 does not lower it
        assert_eq!(merged.first_seen, t0); // immutable
        assert_eq!(merged.last_seen, t1);
        // Display name keeps the first-observed casing
        assert_eq!(merged.display_name, "Jane Doe");
    }

    #[test]
    fn test_one_node_per_variant_and_key() {
        let (graph, _dir) = setup();
        let now = Utc::now();

        graph
            .merge_entity(EntityVariant::Person, "  Ruby  ", 0.7, now)
            .unwrap();
        graph
            .merge_entity(EntityVariant::Technology, "Ruby", 0.9, now)
            .unwrap();

        // Same key, different variants: two distinct nodes
        assert!(graph.get_entity(EntityVariant::Person, "ruby").unwrap().is_some());
        assert!(graph
            .get_entity(EntityVariant::Technology, "ruby")
            .unwrap()
            .is_some());

        let stats = graph.get_stats();
        assert_eq!(stats.persons, 1);
        assert_eq!(stats.technologies, 1);
    }

    #[test]
    fn test_technology_node_gets_category() {
        let (graph, _dir) = setup();
        let node = graph
            .merge_entity(EntityVariant::Technology, "Python", 0.9, Utc::now())
            .unwrap();
        assert_eq!(node.category.as_deref(), Some("programming_language"));

        let person = graph
            .merge_entity(EntityVariant::Person, "Jane Doe", 0.9, Utc::now())
            .unwrap();
        assert_eq!(person.category, None);
    }

    #[test]
    fn test_link_is_idempotent_per_entry() {
        let (graph, _dir) = setup();
        graph
            .merge_entity(EntityVariant::Person, "Jane Doe", 0.8, Utc::now())
            .unwrap();

        let first = graph
            .link_entity_to_entry(
                EntityVariant::Person,
                "jane doe",
                "entry-1",
                0.5,
                EdgeAttrs::for_entry(EntityVariant::Person, "Standup notes"),
            )
            .unwrap();
        assert_eq!(first.mentioned_count, Some(1));

        let second = graph
            .link_entity_to_entry(
                EntityVariant::Person,
                "jane doe",
                "entry-1",
                0.9,
                EdgeAttrs::for_entry(EntityVariant::Person, "Different title"),
            )
            .unwrap();
        assert_eq!(second.mentioned_count, Some(2));
        assert_eq!(second.confidence, 0.9);
        // Descriptive attrs were set on creation and not overwritten
        match second.attrs {
            EdgeAttrs::DiscussedIn { ref context } => assert_eq!(context, "Standup notes"),
            ref other => panic!("unexpected attrs: {other:?}"),
        }

        assert_eq!(graph.get_stats().discussed_in, 1);
    }

    #[test]
    fn test_non_person_edges_do_not_count_mentions() {
        let (graph, _dir) = setup();
        graph
            .merge_entity(EntityVariant::Technology, "Rust", 0.9, Utc::now())
            .unwrap();

        let edge = graph
            .link_entity_to_entry(
                EntityVariant::Technology,
                "rust",
                "entry-1",
                0.9,
                EdgeAttrs::for_entry(EntityVariant::Technology, "Borrow checker chat"),
            )
            .unwrap();
        assert_eq!(edge.mentioned_count, None);

        let again = graph
            .link_entity_to_entry(
                EntityVariant::Technology,
                "rust",
                "entry-1",
                0.95,
                EdgeAttrs::for_entry(EntityVariant::Technology, "Borrow checker chat"),
            )
            .unwrap();
        assert_eq!(again.mentioned_count, None);
        assert_eq!(again.confidence, 0.95);
    }

    #[test]
    fn test_batch_routes_and_counts() {
        let (graph, _dir) = setup();
        let spans = vec![
            span("Python", "technology", 0.9),
            span("Jane Doe", "person", 0.85),
            span("Acme Corp", "organization", 0.8),
            span("gardening", "misc", 0.6),
        ];

        let report = graph.process_extraction_batch(&spans, "conv-1", "entry-1", "Weekly sync");
        assert_eq!(report.stored.technologies, 1);
        assert_eq!(report.stored.persons, 1);
        assert_eq!(report.stored.organizations, 1);
        assert_eq!(report.stored.topics, 1); // "gardening" is not a tech term
        assert_eq!(report.skipped, 0);
        assert!(report.warnings.is_empty());

        // Python went through merge + link with the right category and edge
        let node = graph
            .get_entity(EntityVariant::Technology, "python")
            .unwrap()
            .unwrap();
        assert_eq!(node.category.as_deref(), Some("programming_language"));
        assert_eq!(node.mention_count, 1);
        assert_eq!(
            graph.entries_mentioning(EntityVariant::Technology, "python").unwrap(),
            vec!["entry-1".to_string()]
        );
        assert_eq!(
            graph.entries_mentioning(EntityVariant::Person, "jane doe").unwrap(),
            vec!["entry-1".to_string()]
        );
    }

    #[test]
    fn test_batch_skips_empty_spans_silently() {
        let (graph, _dir) = setup();
        let spans = vec![span("   ", "person", 0.9), span("Jane Doe", "person", 0.9)];

        let report = graph.process_extraction_batch(&spans, "conv-1", "entry-1", "Title");
        assert_eq!(report.stored.total(), 1);
        assert_eq!(report.skipped, 1);
        assert!(report.warnings.is_empty());
    }

    #[test]
    fn test_ambiguous_labels_route_through_tech_heuristic() {
        let (graph, _dir) = setup();
        let spans = vec![
            span("Docker", "misc", 0.8),
            span("Berlin", "location", 0.8),
            span("llamafarm", "project_name", 0.7),
        ];

        let report = graph.process_extraction_batch(&spans, "conv-1", "entry-1", "Infra chat");
        assert_eq!(report.stored.technologies, 1); // Docker
        assert_eq!(report.stored.topics, 2); // Berlin, llamafarm
    }

    #[test]
    fn test_entries_mentioning_prefix_isolation() {
        let (graph, _dir) = setup();
        let now = Utc::now();
        graph.merge_entity(EntityVariant::Person, "Ann", 0.9, now).unwrap();
        graph.merge_entity(EntityVariant::Person, "Anna", 0.9, now).unwrap();

        graph
            .link_entity_to_entry(
                EntityVariant::Person,
                "ann",
                "entry-1",
                0.9,
                EdgeAttrs::for_entry(EntityVariant::Person, "t"),
            )
            .unwrap();
        graph
            .link_entity_to_entry(
                EntityVariant::Person,
                "anna",
                "entry-2",
                0.9,
                EdgeAttrs::for_entry(EntityVariant::Person, "t"),
            )
            .unwrap();

        // "ann" scan must not pick up "anna" edges
        assert_eq!(
            graph.entries_mentioning(EntityVariant::Person, "ann").unwrap(),
            vec!["entry-1".to_string()]
        );
    }

    #[test]
    fn test_counts_survive_reopen() {
        let dir = TempDir::new().unwrap();
        {
            let graph = GraphMemory::new(dir.path()).unwrap();
            graph
                .merge_entity(EntityVariant::Technology, "Rust", 0.9, Utc::now())
                .unwrap();
            graph
                .link_entity_to_entry(
                    EntityVariant::Technology,
                    "rust",
                    "entry-1",
                    0.9,
                    EdgeAttrs::for_entry(EntityVariant::Technology, "t"),
                )
                .unwrap();
        }

        let reopened = GraphMemory::new(dir.path()).unwrap();
        let stats = reopened.get_stats();
        assert_eq!(stats.technologies, 1);
        assert_eq!(stats.tech_in, 1);

        let node = reopened
            .get_entity(EntityVariant::Technology, "rust")
            .unwrap()
            .unwrap();
        assert_eq!(node.display_name, "Rust");
    }

    #[test]
    fn test_concurrent_merges_same_key_lose_no_updates() {
        use std::sync::Arc;
        use std::thread;

        let dir = TempDir::new().unwrap();
        let graph = Arc::new(GraphMemory::new(dir.path()).unwrap());
        let threads = 8;
        let merges_per_thread = 25;

        let handles: Vec<_> = (0..threads)
            .map(|_| {
                let graph = Arc::clone(&graph);
                thread::spawn(move || {
                    for _ in 0..merges_per_thread {
                        graph
                            .merge_entity(EntityVariant::Topic, "rollout plan", 0.5, Utc::now())
                            .unwrap();
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        let node = graph
            .get_entity(EntityVariant::Topic, "rollout plan")
            .unwrap()
            .unwrap();
        assert_eq!(node.mention_count as usize, threads * merges_per_thread);
        assert_eq!(graph.get_stats().topics, 1);
    }
}
