//! The fingerprint ledger: persisted identity → fingerprint mapping.
//!
//! The ledger is the cache metadata that makes sync incremental. After a
//! fully successful sync it mirrors the corpus exactly: one entry per present
//! document, none for removed ones. On the next sync, a matching fingerprint
//! means the document is skipped entirely — no chunking, no embedding, no
//! index write.
//!
//! ## Persistence contract
//!
//! The ledger is stored as a single JSON file and rewritten whole, via a
//! temporary file in the same directory followed by an atomic rename. A crash
//! mid-write therefore never leaves a half-written ledger observable on the
//! next load. A missing file is a cold cache; an unparsable file surfaces as
//! [`LedgerError::Corrupt`], which callers also treat as cold rather than
//! fatal.
//!
//! ## Compatibility header
//!
//! Besides the entries, the ledger records the chunking parameters and the
//! embedding model identity in effect when it was written. Entries are only
//! meaningful under those parameters: a chunk-size change or a model swap
//! makes every cached fingerprint moot even though document content is
//! unchanged. A header mismatch at load time invalidates the whole cache.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::io::Write;
use std::path::{Path, PathBuf};

use super::chunking_strategy::ChunkingConfig;
use super::fingerprint::Fingerprint;
use crate::error::LedgerError;

/// Bumped when the persisted layout changes incompatibly.
pub const LEDGER_VERSION: u32 = 1;

/// One ledger entry: the fingerprint a document had when it was last
/// successfully chunked, embedded, and written to the index.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LedgerEntry {
    pub fingerprint: Fingerprint,
    /// Unix timestamp (seconds) of the sync that produced this entry.
    pub last_synced_at: i64,
}

/// Persisted mapping from document identity to content fingerprint.
///
/// `BTreeMap` keeps the serialized form deterministic, so two syncs that end
/// in the same logical state write byte-identical ledgers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FingerprintLedger {
    pub version: u32,
    pub chunking: ChunkingConfig,
    /// Identity of the embedding model the indexed vectors came from.
    pub embedding_model: Option<String>,
    pub entries: BTreeMap<String, LedgerEntry>,
}

impl FingerprintLedger {
    /// An empty ledger for the given configuration.
    pub fn new(chunking: ChunkingConfig, embedding_model: Option<String>) -> Self {
        Self {
            version: LEDGER_VERSION,
            chunking,
            embedding_model,
            entries: BTreeMap::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// The stored fingerprint for an identity, if any.
    pub fn fingerprint_for(&self, id: &str) -> Option<&Fingerprint> {
        self.entries.get(id).map(|entry| &entry.fingerprint)
    }

    /// Whether entries written under this ledger's header are still usable
    /// under the given configuration.
    pub fn is_compatible_with(
        &self,
        chunking: &ChunkingConfig,
        embedding_model: Option<&str>,
    ) -> bool {
        self.version == LEDGER_VERSION
            && &self.chunking == chunking
            && self.embedding_model.as_deref() == embedding_model
    }
}

/// Persistence seam for the fingerprint ledger.
///
/// Any backend that can load and atomically replace a ledger can sit behind
/// this trait; [`JsonLedgerStore`] is the single-file implementation.
#[async_trait]
pub trait FingerprintStore: Send + Sync {
    /// Read the persisted ledger. `Ok(None)` means no ledger exists yet (cold
    /// cache); [`LedgerError::Corrupt`] means one exists but cannot be
    /// parsed.
    async fn load(&self) -> Result<Option<FingerprintLedger>, LedgerError>;

    /// Atomically replace the persisted ledger.
    async fn save(&self, ledger: &FingerprintLedger) -> Result<(), LedgerError>;
}

/// Stores the ledger as one JSON file with atomic whole-file rewrites.
#[derive(Debug, Clone)]
pub struct JsonLedgerStore {
    path: PathBuf,
}

impl JsonLedgerStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn save_blocking(path: &Path, json: Vec<u8>) -> Result<(), LedgerError> {
        let parent = path.parent().unwrap_or(Path::new("."));
        std::fs::create_dir_all(parent)?;

        // Write-to-temp + rename: the final path never holds partial content.
        let mut temp = tempfile::NamedTempFile::new_in(parent)?;
        temp.write_all(&json)?;
        temp.flush()?;
        temp.persist(path).map_err(|e| LedgerError::Io {
            source: e.error,
        })?;
        Ok(())
    }
}

#[async_trait]
impl FingerprintStore for JsonLedgerStore {
    async fn load(&self) -> Result<Option<FingerprintLedger>, LedgerError> {
        let bytes = match tokio::fs::read(&self.path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(LedgerError::Io { source: e }),
        };

        let ledger = serde_json::from_slice(&bytes)
            .map_err(|source| LedgerError::Corrupt { source })?;
        Ok(Some(ledger))
    }

    async fn save(&self, ledger: &FingerprintLedger) -> Result<(), LedgerError> {
        let json = serde_json::to_vec_pretty(ledger)
            .map_err(|e| LedgerError::Io {
                source: std::io::Error::other(e),
            })?;
        let path = self.path.clone();

        tokio::task::spawn_blocking(move || Self::save_blocking(&path, json))
            .await
            .map_err(|e| LedgerError::Io {
                source: std::io::Error::other(e),
            })?
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn sample_ledger() -> FingerprintLedger {
        let mut ledger =
            FingerprintLedger::new(ChunkingConfig::default(), Some("test-model:4".into()));
        ledger.entries.insert(
            "docs/a.md".to_string(),
            LedgerEntry {
                fingerprint: Fingerprint::compute("alpha"),
                last_synced_at: 1_700_000_000,
            },
        );
        ledger
    }

    #[tokio::test]
    async fn missing_file_is_a_cold_cache() {
        let dir = tempdir().unwrap();
        let store = JsonLedgerStore::new(dir.path().join("ledger.json"));
        assert!(store.load().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn save_then_load_round_trips() {
        let dir = tempdir().unwrap();
        let store = JsonLedgerStore::new(dir.path().join("state").join("ledger.json"));

        let ledger = sample_ledger();
        store.save(&ledger).await.unwrap();

        let loaded = store.load().await.unwrap().unwrap();
        assert_eq!(loaded, ledger);
    }

    #[tokio::test]
    async fn save_replaces_previous_ledger_atomically() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("ledger.json");
        let store = JsonLedgerStore::new(&path);

        let mut ledger = sample_ledger();
        store.save(&ledger).await.unwrap();

        ledger.entries.clear();
        store.save(&ledger).await.unwrap();

        let loaded = store.load().await.unwrap().unwrap();
        assert!(loaded.is_empty());

        // No temp-file debris next to the ledger.
        let siblings: Vec<_> = std::fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name())
            .collect();
        assert_eq!(siblings, vec![std::ffi::OsString::from("ledger.json")]);
    }

    #[tokio::test]
    async fn corrupt_file_is_reported_not_fatal() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("ledger.json");
        std::fs::write(&path, b"{ this is not json").unwrap();

        let store = JsonLedgerStore::new(&path);
        let err = store.load().await.unwrap_err();
        assert!(matches!(err, LedgerError::Corrupt { .. }));
    }

    #[test]
    fn compatibility_requires_matching_header() {
        let ledger = sample_ledger();
        let chunking = ChunkingConfig::default();

        assert!(ledger.is_compatible_with(&chunking, Some("test-model:4")));
        assert!(!ledger.is_compatible_with(&chunking, Some("other-model:8")));
        assert!(!ledger.is_compatible_with(&chunking, None));
        assert!(
            !ledger.is_compatible_with(&chunking.clone().with_max_chunk_size(123), Some("test-model:4"))
        );
    }

    #[test]
    fn serialized_form_is_deterministic() {
        let a = serde_json::to_string(&sample_ledger()).unwrap();
        let b = serde_json::to_string(&sample_ledger()).unwrap();
        assert_eq!(a, b);
    }
}
