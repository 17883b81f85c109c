//! MiniLM-L6-v2 embedding model using ONNX Runtime
//!
//! Generates 384-dimensional sentence embeddings for semantic similarity.
//! Model: sentence-transformers/all-MiniLM-L6-v2.
//!
//! The model is loaded lazily on the first `embed` call. When model files
//! are absent at construction the adapter enters an unavailable state and
//! every `embed` call returns `EmbeddingUnavailable`; the search engine
//! turns that into an empty result set.
//!
//! Configuration via environment variables:
//! - CHRONICLE_MODEL_PATH: base path to model files
//! - CHRONICLE_ONNX_THREADS: ONNX intra-op thread count (default: 2)

use anyhow::{Context, Result as AnyResult};
use ort::session::Session;
use ort::value::Value;
use parking_lot::Mutex;
use std::path::PathBuf;
use std::sync::{Arc, OnceLock};
use tokenizers::Tokenizer;

use super::Embedder;
use crate::constants::EMBEDDING_DIM;
use crate::errors::{MemoryError, Result};

/// Lazily initialized ONNX session and tokenizer
struct LazyModel {
    session: Mutex<Session>,
    tokenizer: Tokenizer,
}

impl LazyModel {
    fn new(config: &EmbeddingConfig) -> AnyResult<Self> {
        let num_threads = std::env::var("CHRONICLE_ONNX_THREADS")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(2);

        tracing::info!(
            "Loading MiniLM-L6-v2 model from {:?} with {} threads",
            config.model_path,
            num_threads
        );

        let session = Session::builder()
            .context("Failed to create ONNX session builder")?
            .with_intra_threads(num_threads)
            .context("Failed to set intra threads")?
            .commit_from_file(&config.model_path)
            .context("Failed to load ONNX model")?;

        let tokenizer = Tokenizer::from_file(&config.tokenizer_path)
            .map_err(|e| anyhow::anyhow!("Failed to load tokenizer: {e}"))?;

        tracing::info!("MiniLM-L6-v2 model loaded successfully");

        Ok(Self {
            session: Mutex::new(session),
            tokenizer,
        })
    }
}

/// Configuration for the MiniLM embedder
#[derive(Debug, Clone)]
pub struct EmbeddingConfig {
    /// Path to ONNX model file
    pub model_path: PathBuf,

    /// Path to tokenizer file
    pub tokenizer_path: PathBuf,

    /// Maximum sequence length
    pub max_length: usize,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self::from_env()
    }
}

impl EmbeddingConfig {
    /// Create configuration from environment variables with sensible defaults
    ///
    /// Search order for model files:
    /// 1. CHRONICLE_MODEL_PATH environment variable
    /// 2. ./models/minilm-l6 (local)
    /// 3. system data directory
    pub fn from_env() -> Self {
        let base_path = std::env::var("CHRONICLE_MODEL_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|_| {
                let candidates: Vec<Option<PathBuf>> = vec![
                    Some(PathBuf::from("./models/minilm-l6")),
                    Some(PathBuf::from("../models/minilm-l6")),
                    dirs::data_dir().map(|p| p.join("chronicle-memory/models/minilm-l6")),
                ];

                candidates
                    .into_iter()
                    .flatten()
                    .find(|p| p.join("model.onnx").exists())
                    .unwrap_or_else(|| PathBuf::from("./models/minilm-l6"))
            });

        Self {
            model_path: base_path.join("model.onnx"),
            tokenizer_path: base_path.join("tokenizer.json"),
            max_length: 256,
        }
    }
}

/// MiniLM-L6-v2 embedder with lazy model loading
pub struct MiniLmEmbedder {
    config: EmbeddingConfig,
    lazy_model: OnceLock<std::result::Result<Arc<LazyModel>, String>>,
    /// Model files were absent at construction
    unavailable: bool,
}

impl MiniLmEmbedder {
    /// Create a new embedder with lazy loading.
    ///
    /// The model is NOT loaded until the first `embed` call. Missing model
    /// files put the adapter into the unavailable state instead of failing
    /// construction, so bootstrap can proceed and search can degrade.
    pub fn new(config: EmbeddingConfig) -> Self {
        let model_available =
            config.model_path.exists() && config.tokenizer_path.exists();

        if !model_available {
            tracing::warn!(
                "Embedding model not found at {:?}; semantic search disabled",
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

    /// Check if the model is currently loaded (for diagnostics)
    pub fn is_model_loaded(&self) -> bool {
        self.lazy_model.get().is_some()
    }

    fn ensure_model_loaded(&self) -> Result<&Arc<LazyModel>> {
        if self.unavailable {
            return Err(MemoryError::EmbeddingUnavailable(format!(
                "model files missing at {:?}",
                self.config.model_path
            )));
        }

        let result = self.lazy_model.get_or_init(|| {
            LazyModel::new(&self.config)
                .map(Arc::new)
                .map_err(|e| e.to_string())
        });

        match result {
            Ok(model) => Ok(model),
            Err(e) => Err(MemoryError::EmbeddingUnavailable(e.clone())),
        }
    }

    fn generate_embedding(&self, text: &str) -> Result<Vec<f32>> {
        let model = self.ensure_model_loaded()?;
        let mut session = model.session.lock();

        let encoding = model
            .tokenizer
            .encode(text, true)
            .map_err(|e| MemoryError::Internal(anyhow::anyhow!("Tokenization failed: {e}")))?;

        let tokens = encoding.get_ids();
        let attention_mask = encoding.get_attention_mask();
        let max_length = self.config.max_length;

        // Truncate or pad to max_length
        let mut input_ids = vec![0i64; max_length];
        let mut attention = vec![0i64; max_length];
        let token_type_ids = vec![0i64; max_length];

        for (i, &token) in tokens.iter().take(max_length).enumerate() {
            input_ids[i] = token as i64;
        }
        for (i, &mask) in attention_mask.iter().take(max_length).enumerate() {
            attention[i] = mask as i64;
        }

        let run = || -> AnyResult<Vec<f32>> {
            let input_ids_value = Value::from_array((vec![1, max_length], input_ids))?;
            let attention_mask_value =
                Value::from_array((vec![1, max_length], attention.clone()))?;
            let token_type_ids_value = Value::from_array((vec![1, max_length], token_type_ids))?;

            let outputs = session.run(ort::inputs![
                "input_ids" => &input_ids_value,
                "attention_mask" => &attention_mask_value,
                "token_type_ids" => &token_type_ids_value,
            ])?;

            let output_tensor = outputs[0].try_extract_tensor::<f32>()?;
            let (_shape, output_data) = output_tensor;
            Ok(output_data.to_vec())
        };
        let output_data = run().map_err(MemoryError::Internal)?;

        // The token-level output must be a whole number of hidden vectors
        if output_data.len() % EMBEDDING_DIM != 0 {
            let per_token = output_data.len() / max_length.max(1);
            return Err(MemoryError::EmbeddingDimensionMismatch {
                expected: EMBEDDING_DIM,
                actual: per_token,
            });
        }

        // Mean pooling over sequence dimension
        let mut pooled = vec![0.0f32; EMBEDDING_DIM];
        let mut mask_sum = 0.0f32;

        for (seq_idx, &att) in attention.iter().enumerate() {
            if att == 1 {
                let base = seq_idx * EMBEDDING_DIM;
                if base + EMBEDDING_DIM > output_data.len() {
                    break;
                }
                for (dim_idx, pooled_val) in pooled.iter_mut().enumerate() {
                    *pooled_val += output_data[base + dim_idx];
                }
                mask_sum += 1.0;
            }
        }

        // Average and L2 normalize
        if mask_sum > 0.0 {
            for val in &mut pooled {
                *val /= mask_sum;
            }
        }

        let norm: f32 = pooled.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm > 0.0 {
            for val in &mut pooled {
                *val /= norm;
            }
        }

        Ok(pooled)
    }
}

impl Embedder for MiniLmEmbedder {
    fn embed(&self, text: &str) -> Result<Vec<f32>> {
        if text.is_empty() {
            return Ok(vec![0.0; EMBEDDING_DIM]);
        }

        let embedding = self.generate_embedding(text)?;

        if embedding.len() != EMBEDDING_DIM {
            return Err(MemoryError::EmbeddingDimensionMismatch {
                expected: EMBEDDING_DIM,
                actual: embedding.len(),
            });
        }

        Ok(embedding)
    }

    fn dimension(&self) -> usize {
        EMBEDDING_DIM
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn missing_model_config() -> EmbeddingConfig {
        EmbeddingConfig {
            model_path: PathBuf::from("/nonexistent/model.onnx"),
            tokenizer_path: PathBuf::from("/nonexistent/tokenizer.json"),
            max_length: 256,
        }
    }

    #[test]
    fn test_missing_model_reports_unavailable() {
        let embedder = MiniLmEmbedder::new(missing_model_config());
        assert!(!embedder.is_available());

        let err = embedder.embed("machine learning").unwrap_err();
        assert_eq!(err.code(), "EMBEDDING_UNAVAILABLE");
    }

    #[test]
    fn test_empty_text_short_circuits() {
        // Empty text never touches the model, even when unavailable
        let embedder = MiniLmEmbedder::new(missing_model_config());
        let vec = embedder.embed("").unwrap();
        assert_eq!(vec.len(), EMBEDDING_DIM);
    }

    #[test]
    fn test_dimension_constant() {
        let embedder = MiniLmEmbedder::new(missing_model_config());
        assert_eq!(embedder.dimension(), 384);
    }
}
