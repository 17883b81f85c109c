//! Storage backend for conversation records
//!
//! RocksDB-backed CRUD for `Entry` values plus secondary indices for
//! temporal and type-filtered listings. Entries are written once at archive
//! time; the only later mutation is metadata enrichment from the entity
//! extraction pipeline.

use rocksdb::{Options, WriteBatch, DB};
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use crate::entry::{Entry, EntryType};
use crate::errors::{MemoryError, Result};

/// Helper trait to safely iterate over RocksDB results with error logging.
/// Unlike `.flatten()` which silently ignores errors, this logs them.
trait LogErrors<T> {
    fn log_errors(self) -> impl Iterator<Item = T>;
}

impl<I, T, E> LogErrors<T> for I
where
    I: Iterator<Item = std::result::Result<T, E>>,
    E: std::fmt::Display,
{
    fn log_errors(self) -> impl Iterator<Item = T> {
        self.filter_map(|r| match r {
            Ok(v) => Some(v),
            Err(e) => {
                tracing::warn!("RocksDB iterator error (continuing): {}", e);
                None
            }
        })
    }
}

const CREATED_PREFIX: &str = "created:";

/// Storage engine for conversation record persistence
pub struct EntryStore {
    db: Arc<DB>,
    /// Secondary indices: created:<ts>:<id>, type:<entry_type>:<id>
    index_db: Arc<DB>,
    entry_count: AtomicUsize,
}

impl EntryStore {
    pub fn new(path: &Path) -> Result<Self> {
        std::fs::create_dir_all(path)
            .map_err(|e| MemoryError::StorageError(format!("create {}: {e}", path.display())))?;

        let mut opts = Options::default();
        opts.create_if_missing(true);
        opts.set_compression_type(rocksdb::DBCompressionType::Lz4);

        let db = Arc::new(
            DB::open(&opts, path.join("records"))
                .map_err(|e| MemoryError::StorageError(e.to_string()))?,
        );
        let index_db = Arc::new(
            DB::open(&opts, path.join("record_index"))
                .map_err(|e| MemoryError::StorageError(e.to_string()))?,
        );

        let entry_count = db.iterator(rocksdb::IteratorMode::Start).log_errors().count();
        if entry_count > 0 {
            tracing::info!("Loaded entry store with {} records", entry_count);
        }

        Ok(Self {
            db,
            index_db,
            entry_count: AtomicUsize::new(entry_count),
        })
    }

    // JSON, not bincode: the open metadata map holds arbitrary
    // serde_json::Value trees, which need a self-describing format.
    fn encode(entry: &Entry) -> Result<Vec<u8>> {
        serde_json::to_vec(entry).map_err(|e| MemoryError::SerializationError(e.to_string()))
    }

    fn decode(bytes: &[u8]) -> Result<Entry> {
        serde_json::from_slice(bytes).map_err(|e| MemoryError::SerializationError(e.to_string()))
    }

    fn created_key(entry: &Entry) -> String {
        format!(
            "{}{}:{}",
            CREATED_PREFIX,
            entry.created_at.format("%Y%m%d%H%M%S"),
            entry.id
        )
    }

    /// Persist an entry and its index keys
    pub fn save(&self, entry: &Entry) -> Result<()> {
        if entry.id.is_empty() {
            return Err(MemoryError::InvalidEntry {
                field: "id".to_string(),
                reason: "empty entry id".to_string(),
            });
        }

        let is_new = self
            .db
            .get(entry.id.as_bytes())
            .map_err(|e| MemoryError::StorageError(e.to_string()))?
            .is_none();

        self.db
            .put(entry.id.as_bytes(), Self::encode(entry)?)
            .map_err(|e| MemoryError::StorageError(e.to_string()))?;

        let mut batch = WriteBatch::default();
        batch.put(Self::created_key(entry).as_bytes(), b"1");
        let type_key = format!("type:{}:{}", entry.entry_type.as_str(), entry.id);
        batch.put(type_key.as_bytes(), b"1");
        self.index_db
            .write(batch)
            .map_err(|e| MemoryError::StorageError(e.to_string()))?;

        if is_new {
            self.entry_count.fetch_add(1, Ordering::Relaxed);
        }

        tracing::debug!("Saved entry {} ({})", entry.id, entry.entry_type.as_str());
        Ok(())
    }

    /// Fetch an entry by id
    pub fn get(&self, entry_id: &str) -> Result<Option<Entry>> {
        match self
            .db
            .get(entry_id.as_bytes())
            .map_err(|e| MemoryError::StorageError(e.to_string()))?
        {
            Some(bytes) => Ok(Some(Self::decode(&bytes)?)),
            None => Ok(None),
        }
    }

    /// Fetch an entry by id, erroring when absent
    pub fn get_required(&self, entry_id: &str) -> Result<Entry> {
        self.get(entry_id)?
            .ok_or_else(|| MemoryError::EntryNotFound(entry_id.to_string()))
    }

    /// Append enrichment metadata to a stored entry.
    ///
    /// The index keys depend only on immutable fields, so no reindex.
    pub fn enrich_metadata(
        &self,
        entry_id: &str,
        extra: impl IntoIterator<Item = (String, serde_json::Value)>,
    ) -> Result<()> {
        let mut entry = self.get_required(entry_id)?;
        entry.enrich_metadata(extra);
        self.db
            .put(entry.id.as_bytes(), Self::encode(&entry)?)
            .map_err(|e| MemoryError::StorageError(e.to_string()))?;
        Ok(())
    }

    /// Most recent entries, newest first, optionally filtered by type
    pub fn recent(&self, limit: usize, entry_types: Option<&[EntryType]>) -> Result<Vec<Entry>> {
        // Reverse scan from the top of the created: keyspace; the scan
        // stops at the first key outside the prefix.
        let upper = format!("{}\u{10FFFF}", CREATED_PREFIX);
        let iter = self.index_db.iterator(rocksdb::IteratorMode::From(
            upper.as_bytes(),
            rocksdb::Direction::Reverse,
        ));

        let mut entries = Vec::new();
        for (key, _) in iter.log_errors() {
            let key = String::from_utf8_lossy(&key);
            let Some(rest) = key.strip_prefix(CREATED_PREFIX) else {
                break;
            };
            // created:<ts>:<id>
            let Some((_, entry_id)) = rest.split_once(':') else {
                continue;
            };

            let Some(entry) = self.get(entry_id)? else {
                tracing::warn!("Index points at missing entry {}", entry_id);
                continue;
            };

            if let Some(types) = entry_types {
                if !types.contains(&entry.entry_type) {
                    continue;
                }
            }

            entries.push(entry);
            if entries.len() >= limit {
                break;
            }
        }

        Ok(entries)
    }

    /// Number of stored entries
    pub fn len(&self) -> usize {
        self.entry_count.load(Ordering::Relaxed)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
