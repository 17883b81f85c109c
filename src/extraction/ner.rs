//! Neural named entity recognition using ONNX Runtime
//!
//! Token-classification NER with BIO tagging over a compact BERT model.
//! The adapter reports `ExtractionUnavailable` when model files are
//! missing so the archive pipeline can degrade to zero entities instead
//! of failing the batch.
//!
//! # Architecture
//! - Input: raw text
//! - Tokenization: WordPiece (HuggingFace tokenizer)
//! - Model: BERT token classification, 9 BIO labels
//! - Output: labelled spans with character offsets and confidence
//!
//! Label indices: O=0, B-MISC=1, I-MISC=2, B-ORG=3, I-ORG=4, B-LOC=5,
//! I-LOC=6, B-PER=7, I-PER=8.

use anyhow::{Context, Result as AnyResult};
use ort::session::Session;
use ort::value::Value;
use parking_lot::Mutex;
use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::{Arc, OnceLock};
use tokenizers::Tokenizer;

use super::{EntityExtraction, ExtractedSpan};
use crate::errors::{MemoryError, Result};

const NUM_LABELS: usize = 9;

/// BIO tags emitted by the token classifier
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BioTag {
    Outside,
    BeginMisc,
    InsideMisc,
    BeginOrg,
    InsideOrg,
    BeginLoc,
    InsideLoc,
    BeginPerson,
    InsidePerson,
}

impl BioTag {
    fn from_index(idx: usize) -> Self {
        match idx {
            1 => Self::BeginMisc,
            2 => Self::InsideMisc,
            3 => Self::BeginOrg,
            4 => Self::InsideOrg,
            5 => Self::BeginLoc,
            6 => Self::InsideLoc,
            7 => Self::BeginPerson,
            8 => Self::InsidePerson,
            _ => Self::Outside,
        }
    }

    fn is_begin(&self) -> bool {
        matches!(
            self,
            Self::BeginMisc | Self::BeginOrg | Self::BeginLoc | Self::BeginPerson
        )
    }

    fn is_inside(&self) -> bool {
        matches!(
            self,
            Self::InsideMisc | Self::InsideOrg | Self::InsideLoc | Self::InsidePerson
        )
    }

    /// Extraction label for this tag, in the string form the merge engine routes on
    fn label(&self) -> Option<&'static str> {
        match self {
            Self::BeginPerson | Self::InsidePerson => Some("person"),
            Self::BeginOrg | Self::InsideOrg => Some("organization"),
            Self::BeginLoc | Self::InsideLoc => Some("location"),
            Self::BeginMisc | Self::InsideMisc => Some("misc"),
            Self::Outside => None,
        }
    }

    fn same_label(&self, other: &BioTag) -> bool {
        self.label() == other.label()
    }
}

/// Configuration for the NER model
#[derive(Debug, Clone)]
pub struct NerConfig {
    /// Path to ONNX model file
    pub model_path: PathBuf,

    /// Path to tokenizer file
    pub tokenizer_path: PathBuf,

    /// Maximum sequence length
    pub max_length: usize,

    /// Minimum confidence threshold for extracted spans
    pub confidence_threshold: f32,
}

impl Default for NerConfig {
    fn default() -> Self {
        Self::from_env()
    }
}

impl NerConfig {
    /// Create configuration from environment variables
    ///
    /// Search order for model files:
    /// 1. CHRONICLE_NER_MODEL_PATH environment variable
    /// 2. ./models/bert-tiny-ner (local)
    /// 3. system data directory
    pub fn from_env() -> Self {
        let base_path = std::env::var("CHRONICLE_NER_MODEL_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|_| {
                let candidates: Vec<Option<PathBuf>> = vec![
                    Some(PathBuf::from("./models/bert-tiny-ner")),
                    Some(PathBuf::from("../models/bert-tiny-ner")),
                    dirs::data_dir().map(|p| p.join("chronicle-memory/models/bert-tiny-ner")),
                ];

                candidates
                    .into_iter()
                    .flatten()
                    .find(|p| p.join("model.onnx").exists())
                    .unwrap_or_else(|| PathBuf::from("./models/bert-tiny-ner"))
            });

        let confidence_threshold = std::env::var("CHRONICLE_NER_CONFIDENCE")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(0.7);

        Self {
            model_path: base_path.join("model.onnx"),
            tokenizer_path: base_path.join("tokenizer.json"),
            max_length: 128,
            confidence_threshold,
        }
    }
}

/// Lazily initialized NER session and tokenizer
struct LazyNerModel {
    session: Mutex<Session>,
    tokenizer: Tokenizer,
}

impl LazyNerModel {
    fn new(config: &NerConfig) -> AnyResult<Self> {
        let num_threads = std::env::var("CHRONICLE_ONNX_THREADS")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(2);

        tracing::info!(
            "Loading NER model from {:?} with {} threads",
            config.model_path,
            num_threads
        );

        let session = Session::builder()
            .context("Failed to create NER session builder")?
            .with_intra_threads(num_threads)
            .context("Failed to set NER thread count")?
            .commit_from_file(&config.model_path)
            .context("Failed to load NER ONNX model")?;

        let tokenizer = Tokenizer::from_file(&config.tokenizer_path)
            .map_err(|e| anyhow::anyhow!("Failed to load NER tokenizer: {e}"))?;

        tracing::info!("NER model loaded successfully");

        Ok(Self {
            session: Mutex::new(session),
            tokenizer,
        })
    }
}

/// ONNX-backed entity extractor with lazy model loading
pub struct NeuralExtractor {
    config: NerConfig,
    lazy_model: OnceLock<std::result::Result<Arc<LazyNerModel>, String>>,
    /// Model files were absent at construction; every extract call reports
    /// unavailable rather than attempting a doomed load
    unavailable: bool,
}

impl NeuralExtractor {
    /// Create a new extractor with lazy loading
    pub fn new(config: NerConfig) -> Self {
        let model_available =
            config.model_path.exists() && config.tokenizer_path.exists();

        if !model_available {
            tracing::warn!(
                "NER model not found at {:?}; entity extraction disabled",
                config.model_path
            );
        }

        Self {
            config,
            lazy_model: OnceLock::new(),
            unavailable: !model_available,
        }
    }

    /// Whether the adapter has a model to run
    pub fn is_available(&self) -> bool {
        !self.unavailable
    }

    fn ensure_model_loaded(&self) -> Result<&Arc<LazyNerModel>> {
        if self.unavailable {
            return Err(MemoryError::ExtractionUnavailable(format!(
                "model files missing at {:?}",
                self.config.model_path
            )));
        }

        let result = self.lazy_model.get_or_init(|| {
            LazyNerModel::new(&self.config)
                .map(Arc::new)
                .map_err(|e| e.to_string())
        });

        match result {
            Ok(model) => Ok(model),
            Err(e) => Err(MemoryError::ExtractionUnavailable(e.clone())),
        }
    }

    fn extract_neural(&self, text: &str) -> Result<Vec<ExtractedSpan>> {
        let model = self.ensure_model_loaded()?;
        let mut session = model.session.lock();

        let encoding = model
            .tokenizer
            .encode(text, true)
            .map_err(|e| MemoryError::Internal(anyhow::anyhow!("NER tokenization failed: {e}")))?;

        let tokens = encoding.get_ids();
        let attention_mask = encoding.get_attention_mask();
        let offsets = encoding.get_offsets();
        let max_length = self.config.max_length;

        let mut input_ids = vec![0i64; max_length];
        let mut attention = vec![0i64; max_length];

        for (i, &token) in tokens.iter().take(max_length).enumerate() {
            input_ids[i] = token as i64;
        }
        for (i, &mask) in attention_mask.iter().take(max_length).enumerate() {
            attention[i] = mask as i64;
        }

        // token_type_ids: all zeros for single sentence
        let token_type_ids = vec![0i64; max_length];

        let run = || -> AnyResult<Vec<f32>> {
            let input_ids_value = Value::from_array((vec![1, max_length], input_ids))
                .context("Failed to create input_ids tensor")?;
            let attention_mask_value =
                Value::from_array((vec![1, max_length], attention.clone()))
                    .context("Failed to create attention_mask tensor")?;
            let token_type_ids_value = Value::from_array((vec![1, max_length], token_type_ids))
                .context("Failed to create token_type_ids tensor")?;

            let outputs = session
                .run(ort::inputs![
                    "input_ids" => &input_ids_value,
                    "attention_mask" => &attention_mask_value,
                    "token_type_ids" => &token_type_ids_value,
                ])
                .context("NER inference failed")?;

            let output_tensor = outputs[0]
                .try_extract_tensor::<f32>()
                .context("Failed to extract NER output tensor")?;
            let (_shape, logits) = output_tensor;
            Ok(logits.to_vec())
        };
        let logits = run().map_err(MemoryError::Internal)?;

        let seq_len = tokens.len().min(max_length);
        let mut spans = Vec::new();
        let mut current: Option<(BioTag, Vec<usize>, f32)> = None;

        for i in 0..seq_len {
            // Skip [CLS] and padding
            if i == 0 || attention[i] == 0 {
                continue;
            }

            let token_logits = &logits[i * NUM_LABELS..(i + 1) * NUM_LABELS];
            let probs = softmax(token_logits);

            let (best_idx, best_prob) = probs
                .iter()
                .enumerate()
                .max_by(|a, b| a.1.total_cmp(b.1))
                .unwrap();

            let tag = BioTag::from_index(best_idx);

            match (&current, tag.is_begin(), tag.is_inside()) {
                // Begin new span
                (None, true, _) => {
                    current = Some((tag, vec![i], *best_prob));
                }
                // Continue current span
                (Some((prev, indices, acc)), _, true) if tag.same_label(prev) => {
                    let mut indices = indices.clone();
                    indices.push(i);
                    current = Some((*prev, indices, acc + best_prob));
                }
                // Close current span, possibly begin the next
                (Some((prev, indices, acc)), _, _) => {
                    if let Some(span) = self.build_span(text, prev, indices, *acc, offsets) {
                        if span.confidence >= self.config.confidence_threshold {
                            spans.push(span);
                        }
                    }
                    current = if tag.is_begin() {
                        Some((tag, vec![i], *best_prob))
                    } else {
                        None
                    };
                }
                _ => {}
            }
        }

        if let Some((tag, indices, acc)) = current {
            if let Some(span) = self.build_span(text, &tag, &indices, acc, offsets) {
                if span.confidence >= self.config.confidence_threshold {
                    spans.push(span);
                }
            }
        }

        Ok(dedupe_overlaps(spans))
    }

    /// Build a span from token indices via the tokenizer's char offsets
    fn build_span(
        &self,
        text: &str,
        tag: &BioTag,
        token_indices: &[usize],
        accumulated_prob: f32,
        offsets: &[(usize, usize)],
    ) -> Option<ExtractedSpan> {
        let label = tag.label()?;
        let first = *token_indices.first()?;
        let last = *token_indices.last()?;

        if first >= offsets.len() || last >= offsets.len() {
            return None;
        }

        let start = offsets[first].0;
        let end = offsets[last].1;
        if start >= end || end > text.len() {
            return None;
        }

        let span_text = text[start..end].trim().to_string();
        if span_text.is_empty() {
            return None;
        }

        Some(ExtractedSpan {
            text: span_text,
            label: label.to_string(),
            // Average confidence over all tokens of the span
            confidence: accumulated_prob / token_indices.len() as f32,
            start,
            end,
        })
    }
}

impl EntityExtraction for NeuralExtractor {
    fn extract(&self, text: &str, target_labels: Option<&[&str]>) -> Result<Vec<ExtractedSpan>> {
        if text.trim().is_empty() {
            return Ok(Vec::new());
        }

        let spans = self.extract_neural(text)?;

        match target_labels {
            Some(labels) => {
                let wanted: HashSet<&str> = labels.iter().copied().collect();
                Ok(spans
                    .into_iter()
                    .filter(|s| wanted.contains(s.label.as_str()))
                    .collect())
            }
            None => Ok(spans),
        }
    }
}

/// Drop overlapping spans, preferring earlier starts and longer extents
fn dedupe_overlaps(mut spans: Vec<ExtractedSpan>) -> Vec<ExtractedSpan> {
    if spans.len() <= 1 {
        return spans;
    }

    spans.sort_by(|a, b| {
        a.start
            .cmp(&b.start)
            .then_with(|| (b.end - b.start).cmp(&(a.end - a.start)))
    });

    let mut kept: Vec<ExtractedSpan> = Vec::new();
    for span in spans {
        let overlaps = kept.iter().any(|k| span.start < k.end && span.end > k.start);
        if !overlaps {
            kept.push(span);
        }
    }
    kept
}

fn softmax(logits: &[f32]) -> Vec<f32> {
    let max = logits.iter().copied().fold(f32::NEG_INFINITY, f32::max);
    let exps: Vec<f32> = logits.iter().map(|&x| (x - max).exp()).collect();
    let sum: f32 = exps.iter().sum();
    exps.iter().map(|&x| x / sum).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_softmax_sums_to_one() {
        let probs = softmax(&[1.0, 2.0, 3.0]);
        let sum: f32 = probs.iter().sum();
        assert!((sum - 1.0).abs() < 1e-5);
        assert!(probs[2] > probs[1] && probs[1] > probs[0]);
    }

    #[test]
    fn test_bio_tag_labels() {
        assert_eq!(BioTag::BeginPerson.label(), Some("person"));
        assert_eq!(BioTag::InsideOrg.label(), Some("organization"));
        assert_eq!(BioTag::BeginLoc.label(), Some("location"));
        assert_eq!(BioTag::Outside.label(), None);
        assert!(BioTag::BeginPerson.same_label(&BioTag::InsidePerson));
        assert!(!BioTag::BeginPerson.same_label(&BioTag::InsideOrg));
    }

    #[test]
    fn test_dedupe_overlaps_prefers_longer() {
        let spans = vec![
            ExtractedSpan {
                text: "Jane Doe".to_string(),
                label: "person".to_string(),
                confidence: 0.9,
                start: 0,
                end: 8,
            },
            ExtractedSpan {
                text: "Doe".to_string(),
                label: "person".to_string(),
                confidence: 0.8,
                start: 5,
                end: 8,
            },
        ];
        let kept = dedupe_overlaps(spans);
        assert_eq!(kept.len(), 1);
        assert_eq!(kept[0].text, "Jane Doe");
    }

    #[test]
    fn test_missing_model_reports_unavailable() {
        let config = NerConfig {
            model_path: PathBuf::from("/nonexistent/model.onnx"),
            tokenizer_path: PathBuf::from("/nonexistent/tokenizer.json"),
            max_length: 128,
            confidence_threshold: 0.7,
        };
        let extractor = NeuralExtractor::new(config);
        assert!(!extractor.is_available());

        let err = extractor.extract("Jane met Bob at Acme Corp.", None).unwrap_err();
        assert_eq!(err.code(), "EXTRACTION_UNAVAILABLE");
    }

    #[test]
    fn test_empty_input_yields_no_entities_even_when_unavailable() {
        let config = NerConfig {
            model_path: PathBuf::from("/nonexistent/model.onnx"),
            tokenizer_path: PathBuf::from("/nonexistent/tokenizer.json"),
            max_length: 128,
            confidence_threshold: 0.7,
        };
        let extractor = NeuralExtractor::new(config);
        assert!(extractor.extract("   ", None).unwrap().is_empty());
    }
}
