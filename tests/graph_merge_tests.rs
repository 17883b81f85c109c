//! Graph Merge Tests
//!
//! Invariants of the entity merge engine:
//! - Create-or-strengthen upsert semantics (confidence max, mention counts,
//!   first/last seen)
//! - Edge idempotency per (entity, entry) pair
//! - Extraction batch routing, skip, and partial-failure reporting

use chrono::{Duration, Utc};
use chronicle_memory::extraction::ExtractedSpan;
use chronicle_memory::graph_memory::{
    EdgeAttrs, EntityVariant, GraphMemory, RelationKind,
};
use tempfile::TempDir;

fn setup_graph() -> (GraphMemory, TempDir) {
    let temp_dir = TempDir::new().expect("Failed to create temp dir");
    let graph = GraphMemory::new(temp_dir.path()).expect("Failed to create graph");
    (graph, temp_dir)
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
fn merge_n_times_accumulates_observations() {
    let (graph, _dir) = setup_graph();
    let t0 = Utc::now() - Duration::hours(3);

    let observations = [
        ("OpenAI", 0.6f32),
        ("  openai ", 0.9),
        ("OPENAI", 0.7),
        ("openai", 0.5),
    ];

    for (i, (text, confidence)) in observations.iter().enumerate() {
        graph
            .merge_entity(
                EntityVariant::Organization,
                text,
                *confidence,
                t0 + Duration::minutes(i as i64),
            )
            .unwrap();
    }

    let node = graph
        .get_entity(EntityVariant::Organization, "openai")
        .unwrap()
        .expect("node exists");

    assert_eq!(node.mention_count, observations.len() as u64);
    assert_eq!(node.confidence, 0.9); // max over observations
    assert_eq!(node.first_seen, t0); // earliest observation
    assert_eq!(node.last_seen, t0 + Duration::minutes(3)); // latest observation
    assert_eq!(node.display_name, "OpenAI"); // first-observed casing

    // One node, not four
    assert_eq!(graph.get_stats().organizations, 1);
}

#[test]
fn repeated_link_produces_one_edge() {
    let (graph, _dir) = setup_graph();
    graph
        .merge_entity(EntityVariant::Person, "Jane Doe", 0.8, Utc::now())
        .unwrap();

    for confidence in [0.5f32, 0.9, 0.7] {
        graph
            .link_entity_to_entry(
                EntityVariant::Person,
                "jane doe",
                "entry-1",
                confidence,
                EdgeAttrs::for_entry(EntityVariant::Person, "Planning session"),
            )
            .unwrap();
    }

    let stats = graph.get_stats();
    assert_eq!(stats.discussed_in, 1);

    let edge = graph
        .get_edge(EntityVariant::Person, "jane doe", "entry-1")
        .unwrap()
        .expect("edge exists");
    assert_eq!(edge.kind, RelationKind::DiscussedIn);
    assert_eq!(edge.confidence, 0.9);
    assert_eq!(edge.mentioned_count, Some(3));
}

#[test]
fn edge_mention_counting_is_asymmetric_by_variant() {
    let (graph, _dir) = setup_graph();
    let now = Utc::now();

    let cases = [
        (EntityVariant::Person, "jane doe", Some(2)),
        (EntityVariant::Organization, "acme corp", None),
        (EntityVariant::Technology, "rust", None),
        (EntityVariant::Topic, "roadmap", None),
    ];

    for (variant, key, expected_count) in cases {
        graph.merge_entity(variant, key, 0.8, now).unwrap();
        for _ in 0..2 {
            graph
                .link_entity_to_entry(
                    variant,
                    key,
                    "entry-1",
                    0.8,
                    EdgeAttrs::for_entry(variant, "title"),
                )
                .unwrap();
        }

        let edge = graph.get_edge(variant, key, "entry-1").unwrap().unwrap();
        assert_eq!(
            edge.mentioned_count, expected_count,
            "variant {:?} count mismatch",
            variant
        );
    }
}

#[test]
fn batch_stores_typed_nodes_and_edges() {
    let (graph, _dir) = setup_graph();

    // The canonical two-entity scenario: a technology and a person
    let spans = vec![
        span("Python", "technology", 0.92),
        span("Jane Doe", "person", 0.88),
    ];

    let report = graph.process_extraction_batch(&spans, "conv-1", "E1", "Tech catchup");
    assert_eq!(report.stored.technologies, 1);
    assert_eq!(report.stored.persons, 1);
    assert_eq!(report.stored.total(), 2);
    assert!(report.warnings.is_empty());

    let tech = graph
        .get_entity(EntityVariant::Technology, "python")
        .unwrap()
        .expect("technology node");
    assert_eq!(tech.category.as_deref(), Some("programming_language"));
    assert_eq!(tech.mention_count, 1);

    let person = graph
        .get_entity(EntityVariant::Person, "jane doe")
        .unwrap()
        .expect("person node");
    assert_eq!(person.mention_count, 1);
    assert_eq!(person.category, None);

    // Typed edges to E1
    let tech_edge = graph
        .get_edge(EntityVariant::Technology, "python", "E1")
        .unwrap()
        .expect("tech edge");
    assert_eq!(tech_edge.kind, RelationKind::TechIn);

    let person_edge = graph
        .get_edge(EntityVariant::Person, "jane doe", "E1")
        .unwrap()
        .expect("person edge");
    assert_eq!(person_edge.kind, RelationKind::DiscussedIn);
    assert_eq!(person_edge.mentioned_count, Some(1));
}

#[test]
fn batch_skips_empty_text_and_counts_only_valid() {
    let (graph, _dir) = setup_graph();

    let spans = vec![span("", "person", 0.9), span("Jane Doe", "person", 0.9)];
    let report = graph.process_extraction_batch(&spans, "conv-1", "E1", "title");

    assert_eq!(report.stored.persons, 1);
    assert_eq!(report.stored.total(), 1);
    assert_eq!(report.skipped, 1);
    assert!(report.warnings.is_empty());
    // Batch size accounting: stored + skipped covers the whole input
    assert_eq!(report.stored.total() + report.skipped, spans.len());
}

#[test]
fn ambiguous_labels_split_between_technology_and_topic() {
    let (graph, _dir) = setup_graph();

    let spans = vec![
        span("Kubernetes", "misc", 0.8),      // tech vocabulary
        span("Paris", "location", 0.8),       // not tech -> topic
        span("sourdough baking", "misc", 0.7), // not tech -> topic
        span("PostgreSQL", "unknown_label", 0.9), // unrecognized label, tech vocab
    ];

    let report = graph.process_extraction_batch(&spans, "conv-1", "E1", "title");
    assert_eq!(report.stored.technologies, 2);
    assert_eq!(report.stored.topics, 2);

    let kube = graph
        .get_entity(EntityVariant::Technology, "kubernetes")
        .unwrap()
        .unwrap();
    assert_eq!(kube.category.as_deref(), Some("infrastructure"));

    let pg = graph
        .get_entity(EntityVariant::Technology, "postgresql")
        .unwrap()
        .unwrap();
    assert_eq!(pg.category.as_deref(), Some("database"));

    let paris = graph
        .get_entity(EntityVariant::Topic, "paris")
        .unwrap()
        .unwrap();
    assert_eq!(paris.category.as_deref(), Some("general"));
}

#[test]
fn batches_across_entries_accumulate_mentions() {
    let (graph, _dir) = setup_graph();

    let spans = vec![span("Rust", "technology", 0.9)];
    graph.process_extraction_batch(&spans, "conv-1", "E1", "first");
    graph.process_extraction_batch(&spans, "conv-2", "E2", "second");

    let node = graph
        .get_entity(EntityVariant::Technology, "rust")
        .unwrap()
        .unwrap();
    assert_eq!(node.mention_count, 2);

    let mut entries = graph
        .entries_mentioning(EntityVariant::Technology, "rust")
        .unwrap();
    entries.sort();
    assert_eq!(entries, vec!["E1".to_string(), "E2".to_string()]);

    // One node, two edges
    let stats = graph.get_stats();
    assert_eq!(stats.technologies, 1);
    assert_eq!(stats.tech_in, 2);
}

#[test]
fn graph_state_survives_reopen() {
    let dir = TempDir::new().unwrap();

    {
        let graph = GraphMemory::new(dir.path()).unwrap();
        let spans = vec![
            span("Jane Doe", "person", 0.9),
            span("Docker", "misc", 0.8),
        ];
        graph.process_extraction_batch(&spans, "conv-1", "E1", "title");
    }

    let graph = GraphMemory::new(dir.path()).unwrap();
    let stats = graph.get_stats();
    assert_eq!(stats.persons, 1);
    assert_eq!(stats.technologies, 1);
    assert_eq!(stats.discussed_in, 1);
    assert_eq!(stats.tech_in, 1);

    let node = graph
        .get_entity(EntityVariant::Person, "jane doe")
        .unwrap()
        .unwrap();
    assert_eq!(node.display_name, "Jane Doe");
    assert_eq!(node.mention_count, 1);
}
