//! Conversation record types
//!
//! An `Entry` is the persisted unit of conversational memory: the full
//! archived text of a conversation plus an open metadata map. Entries are
//! immutable after creation except for metadata enrichment appended by the
//! entity extraction pipeline.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

use crate::errors::{MemoryError, Result};

/// Types of entries in the memory layer
///
/// Only `Conversation` is implemented; the others are reserved for future
/// document/image/code pipelines and cannot currently be constructed
/// through the public constructors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntryType {
    Conversation,
    Document,
    Image,
    Code,
}

impl EntryType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Conversation => "conversation",
            Self::Document => "document",
            Self::Image => "image",
            Self::Code => "code",
        }
    }

    /// Parse from the stored string form
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "conversation" => Some(Self::Conversation),
            "document" => Some(Self::Document),
            "image" => Some(Self::Image),
            "code" => Some(Self::Code),
            _ => None,
        }
    }
}

/// A persisted conversation record
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Entry {
    /// Unique identifier
    pub id: String,

    /// Groups the record to its source conversation
    pub conversation_id: String,

    /// Kind of content this entry holds
    pub entry_type: EntryType,

    /// Full archived text
    pub content: String,

    /// When the entry was created
    pub created_at: DateTime<Utc>,

    /// Open key-value metadata: title, participants, entity summaries.
    /// BTreeMap keeps serialization deterministic across runs.
    pub metadata: BTreeMap<String, serde_json::Value>,
}

impl Entry {
    /// Create a conversation entry
    ///
    /// Stamps a `speaker_count` metadata field derived from the formatted
    /// content, so downstream consumers can distinguish monologues from
    /// dialogues without re-parsing.
    pub fn conversation(
        content: impl Into<String>,
        conversation_id: impl Into<String>,
        metadata: BTreeMap<String, serde_json::Value>,
    ) -> Self {
        let content = content.into();
        let speaker_count =
            content.matches("Assistant:").count() + content.matches("User:").count();

        let mut metadata = metadata;
        metadata.insert("speaker_count".to_string(), speaker_count.into());

        Self {
            id: Uuid::new_v4().to_string(),
            conversation_id: conversation_id.into(),
            entry_type: EntryType::Conversation,
            content,
            created_at: Utc::now(),
            metadata,
        }
    }

    /// Create an entry of an arbitrary type
    ///
    /// Document, image, and code entries require processing pipelines that
    /// do not exist yet; requesting one is an error rather than a silent
    /// misfile.
    pub fn new(
        entry_type: EntryType,
        content: impl Into<String>,
        conversation_id: impl Into<String>,
        metadata: BTreeMap<String, serde_json::Value>,
    ) -> Result<Self> {
        match entry_type {
            EntryType::Conversation => Ok(Self::conversation(content, conversation_id, metadata)),
            other => Err(MemoryError::InvalidEntry {
                field: "entry_type".to_string(),
                reason: format!(
                    "{} entries are not yet implemented; only conversation entries can be stored",
                    other.as_str()
                ),
            }),
        }
    }

    /// Rebuild a minimal entry from inline search-hit fields
    ///
    /// Used when a vector hit cannot be hydrated from the record store.
    /// The id falls back to a content-derived placeholder when the hit
    /// carried none.
    pub fn minimal(
        id: Option<String>,
        content: String,
        entry_type: EntryType,
        created_at: Option<DateTime<Utc>>,
        metadata: BTreeMap<String, serde_json::Value>,
    ) -> Self {
        let id = id.unwrap_or_else(|| {
            use sha2::{Digest, Sha256};
            let digest = Sha256::digest(content.as_bytes());
            let mut prefix = [0u8; 8];
            prefix.copy_from_slice(&digest[..8]);
            format!("inline-{:016x}", u64::from_be_bytes(prefix))
        });

        Self {
            id,
            conversation_id: String::new(),
            entry_type,
            content,
            created_at: created_at.unwrap_or_else(Utc::now),
            metadata,
        }
    }

    /// Entry title from metadata, if any
    pub fn title(&self) -> Option<&str> {
        self.metadata.get("title").and_then(|v| v.as_str())
    }

    /// Append enrichment metadata without touching existing keys' content
    ///
    /// Later values win on key collision; this is the one mutation the
    /// lifecycle allows after creation.
    pub fn enrich_metadata(
        &mut self,
        extra: impl IntoIterator<Item = (String, serde_json::Value)>,
    ) {
        self.metadata.extend(extra);
    }
}
