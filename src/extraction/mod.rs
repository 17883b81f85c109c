//! Entity extraction boundary
//!
//! Wraps an external NER model behind the `EntityExtraction` trait; the
//! graph merge engine consumes extracted spans without knowing which model
//! (or fallback) produced them. Adapters are constructed explicitly and
//! injected - no global singleton.

pub mod ner;

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::errors::Result;
use crate::normalize::normalize;

pub use ner::{NerConfig, NeuralExtractor};

/// Entity labels requested from the extractor by default.
///
/// The merge engine routes `person` and `organization` directly; all other
/// labels go through the technology/topic routing heuristic.
pub const DEFAULT_ENTITY_LABELS: &[&str] = &[
    "person",
    "organization",
    "technology",
    "programming_language",
    "framework",
    "tool",
    "protocol",
    "project_name",
    "conversation_topic",
    "location",
    "misc",
];

/// An extracted entity span
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractedSpan {
    /// The entity text as it appeared
    pub text: String,

    /// Extractor-assigned label (e.g. "person", "organization", "misc")
    pub label: String,

    /// Confidence score (0.0 - 1.0)
    pub confidence: f32,

    /// Start character offset in the source text
    pub start: usize,

    /// End character offset in the source text
    pub end: usize,
}

/// Trait for entity extraction adapters
pub trait EntityExtraction: Send + Sync {
    /// Extract entity spans from text.
    ///
    /// `target_labels` restricts output to the given labels when provided.
    /// Empty input yields no entities. Fails with `ExtractionUnavailable`
    /// when no model is configured; callers degrade to zero entities.
    fn extract(&self, text: &str, target_labels: Option<&[&str]>) -> Result<Vec<ExtractedSpan>>;
}

/// Deduplicate spans within one extraction batch.
///
/// Spans of the same label whose texts normalize identically collapse to
/// the highest-confidence occurrence. Order of first appearance is kept;
/// spans with no text after normalization identify nothing and are dropped.
pub fn dedupe_spans(spans: Vec<ExtractedSpan>) -> Vec<ExtractedSpan> {
    let mut best: BTreeMap<(String, String), usize> = BTreeMap::new();
    let mut result: Vec<ExtractedSpan> = Vec::new();

    for span in spans {
        let normalized = normalize(&span.text);
        if normalized.is_empty() {
            continue;
        }
        let key = (span.label.clone(), normalized);
        match best.get(&key) {
            Some(&idx) if result[idx].confidence >= span.confidence => {}
            Some(&idx) => result[idx] = span,
            None => {
                best.insert(key, result.len());
                result.push(span);
            }
        }
    }

    result
}

/// Human-readable summary of extracted entities, grouped by label.
///
/// Stored into entry metadata at archive time so search results can show
/// what a conversation was about without re-running extraction.
pub fn entity_summary(spans: &[ExtractedSpan]) -> String {
    if spans.is_empty() {
        return "No entities extracted".to_string();
    }

    let mut by_label: BTreeMap<&str, Vec<&str>> = BTreeMap::new();
    for span in spans {
        by_label
            .entry(span.label.as_str())
            .or_default()
            .push(span.text.as_str());
    }

    by_label
        .into_iter()
        .map(|(label, texts)| format!("{}: {}", label, texts.join(", ")))
        .collect::<Vec<_>>()
        .join("; ")
}
