//! Chronicle-Memory Library
//!
//! Persistent memory layer over archived conversational text.
//!
//! # Key Features
//! - Entity extraction (ONNX NER) merged into a typed knowledge graph
//!   with confidence tracking and mention counts
//! - Semantic retrieval over conversation records (MiniLM-L6 embeddings,
//!   cosine similarity) with graceful degradation
//! - Graph-based entity lookups linking entities to the conversations
//!   they were discussed in
//! - RocksDB embedded storage (no external database)
//!
//! # Architecture
//! Adapters (`extraction`, `embeddings`) wrap external models behind traits
//! and are dependency-injected into the engines. The graph merge engine and
//! the record store own their respective lifecycles and associate only by
//! entry id. `ConversationMemory` wires everything together.

pub mod config;
pub mod constants;
pub mod embeddings;
pub mod entry;
pub mod entry_store;
pub mod errors;
pub mod extraction;
pub mod graph_memory;
pub mod memory;
pub mod normalize;
pub mod search;
pub mod tracing_setup;
pub mod vector_store;

// Re-export dependencies to ensure tests/benchmarks use the same version
pub use chrono;
pub use parking_lot;
pub use uuid;

pub use config::MemoryConfig;
pub use entry::{Entry, EntryType};
pub use errors::{MemoryError, Result};
pub use memory::ConversationMemory;
