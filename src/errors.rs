//! Structured error types with stable codes
//!
//! Every degradable failure in the pipeline has its own variant so callers
//! can distinguish "model missing" from "store broken" without string
//! matching. Top-level operations (`process_extraction_batch`, `search`)
//! never surface these as unhandled faults; they degrade and accumulate
//! warnings instead.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Serializable error report, used in batch warning lists
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorReport {
    /// Machine-readable error code
    pub code: String,

    /// Human-readable error message
    pub message: String,
}

/// Application error types with proper categorization
#[derive(Debug)]
pub enum MemoryError {
    // Degradable adapter failures
    /// NER model not loaded/installed - entity pipeline degrades to zero entities
    ExtractionUnavailable(String),
    /// No embedding model configured - search degrades to empty results
    EmbeddingUnavailable(String),
    /// Model output length does not match the vector store schema
    EmbeddingDimensionMismatch { expected: usize, actual: usize },

    // Per-item pipeline failures
    /// Single-entity merge or link failed - logged, batch continues
    MergeFailure { entity: String, reason: String },
    /// Vector hit has no corresponding full record and no inline payload
    HydrationMiss(String),

    // Validation
    InvalidEntry { field: String, reason: String },

    // Not found
    EntryNotFound(String),

    // Internal
    StorageError(String),
    SerializationError(String),

    // Generic wrapper for external errors
    Internal(anyhow::Error),
}

impl MemoryError {
    /// Get error code for client identification
    pub fn code(&self) -> &'static str {
        match self {
            Self::ExtractionUnavailable(_) => "EXTRACTION_UNAVAILABLE",
            Self::EmbeddingUnavailable(_) => "EMBEDDING_UNAVAILABLE",
            Self::EmbeddingDimensionMismatch { .. } => "EMBEDDING_DIMENSION_MISMATCH",
            Self::MergeFailure { .. } => "MERGE_FAILURE",
            Self::HydrationMiss(_) => "HYDRATION_MISS",
            Self::InvalidEntry { .. } => "INVALID_ENTRY",
            Self::EntryNotFound(_) => "ENTRY_NOT_FOUND",
            Self::StorageError(_) => "STORAGE_ERROR",
            Self::SerializationError(_) => "SERIALIZATION_ERROR",
            Self::Internal(_) => "INTERNAL_ERROR",
        }
    }

    /// True when the failure means "degrade, don't fail the operation"
    pub fn is_degradable(&self) -> bool {
        matches!(
            self,
            Self::ExtractionUnavailable(_)
                | Self::EmbeddingUnavailable(_)
                | Self::EmbeddingDimensionMismatch { .. }
                | Self::MergeFailure { .. }
                | Self::HydrationMiss(_)
        )
    }

    /// Get detailed error message
    pub fn message(&self) -> String {
        match self {
            Self::ExtractionUnavailable(msg) => format!("Entity extraction unavailable: {msg}"),
            Self::EmbeddingUnavailable(msg) => format!("Embedding model unavailable: {msg}"),
            Self::EmbeddingDimensionMismatch { expected, actual } => {
                format!("Embedding dimension mismatch: expected {expected}, got {actual}")
            }
            Self::MergeFailure { entity, reason } => {
                format!("Failed to merge entity '{entity}': {reason}")
            }
            Self::HydrationMiss(id) => format!("No record or inline payload for hit '{id}'"),
            Self::InvalidEntry { field, reason } => {
                format!("Invalid entry field '{field}': {reason}")
            }
            Self::EntryNotFound(id) => format!("Entry not found: {id}"),
            Self::StorageError(msg) => format!("Storage error: {msg}"),
            Self::SerializationError(msg) => format!("Serialization error: {msg}"),
            Self::Internal(err) => format!("Internal error: {err}"),
        }
    }

    /// Convert to a serializable report for warning lists
    pub fn to_report(&self) -> ErrorReport {
        ErrorReport {
            code: self.code().to_string(),
            message: self.message(),
        }
    }
}

impl fmt::Display for MemoryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message())
    }
}

impl std::error::Error for MemoryError {}

/// Convert from anyhow::Error to MemoryError
impl From<anyhow::Error> for MemoryError {
    fn from(err: anyhow::Error) -> Self {
        Self::Internal(err)
    }
}

/// Type alias for Results using MemoryError
pub type Result<T> = std::result::Result<T, MemoryError>;
