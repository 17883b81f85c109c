//! System-wide constants
//!
//! Single source of truth for tunable values shared across modules.
//! Values that need deployment-time tuning are overridable through
//! `MemoryConfig` / environment variables; these are the defaults.

/// Embedding dimension for all-MiniLM-L6-v2.
///
/// The vector store schema is created against this dimension; the embedding
/// adapter rejects model output of any other length.
pub const EMBEDDING_DIM: usize = 384;

/// Default number of results returned by `search`.
pub const DEFAULT_SEARCH_LIMIT: usize = 5;

/// Default number of results for conversation context search.
///
/// Context enrichment wants fewer, higher-precision hits than general search.
pub const DEFAULT_CONTEXT_LIMIT: usize = 3;

/// Minimum confidence for an extracted entity span to enter the pipeline.
pub const EXTRACTION_CONFIDENCE_THRESHOLD: f32 = 0.3;

/// Over-fetch multiplier for vector search candidates.
///
/// When filters must be applied post-hydration (backend lacks filtered
/// search), fetching exactly `limit` candidates risks returning fewer than
/// `limit` results after filtering. Fetch `limit * multiplier` instead.
pub const VECTOR_SEARCH_CANDIDATE_MULTIPLIER: usize = 3;

/// Maximum characters of entry content stored inline in the vector payload.
///
/// The inline copy exists so a hit can still be surfaced as a minimal
/// record when the full entry is missing from the record store.
pub const VECTOR_PAYLOAD_CONTENT_LIMIT: usize = 2048;

/// Default cap on recency listings.
pub const DEFAULT_RECENT_LIMIT: usize = 10;
