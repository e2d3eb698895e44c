//! The index manager: orchestration of the incremental embedding pipeline.
//!
//! This is the service object the rest of the system hangs off: it owns the
//! fingerprint ledger, drives chunking and embedding for documents whose
//! content actually changed, keeps the vector index consistent with the
//! ledger, and serves similarity queries. One instance is constructed per
//! process with its collaborators injected; request handlers share it by
//! reference.
//!
//! ## Pipeline flow
//!
//! ```text
//! Corpus snapshot → classify against ledger → changed docs only
//!        ↓                                          ↓
//!   removed docs                      Chunker → Embedder → VectorIndex
//!        ↓                                          ↓
//!   delete vectors  ───────────────→  ledger commit (disk, then memory)
//! ```
//!
//! ## Consistency rules
//!
//! - At most one sync runs at a time; a second caller is rejected with
//!   [`SyncError::SyncInProgress`] rather than queued or interleaved.
//! - Searches run concurrently with sync and observe each document's vectors
//!   either entirely pre-update or entirely post-update.
//! - The ledger is advanced only for documents whose chunks all reached the
//!   index, and is persisted to disk before the in-memory copy moves, so the
//!   persisted state never claims more progress than the index holds.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::stream::{self, StreamExt};
use itertools::Itertools;
use serde::Serialize;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info, warn};

use opal_ai_embed::EmbeddingProvider;

use super::chunking_strategy::{ChunkingConfig, ChunkingStrategy};
use super::corpus::Document;
use super::fingerprint::{Fingerprint, fingerprint_of};
use super::ledger::{FingerprintLedger, FingerprintStore, LedgerEntry};
use crate::error::{
    DocumentFailure, FailureKind, LedgerError, SearchError, SyncError,
    failure_kind_for_embed_error,
};
use crate::status::StatsSnapshot;
use crate::storage::{IndexedVector, SearchHit, VectorIndex};

/// Configuration for the index manager.
#[derive(Debug, Clone)]
pub struct IndexManagerConfig {
    /// Chunking configuration; recorded in the ledger header.
    pub chunking_config: ChunkingConfig,
    /// Bounded concurrency for per-document embedding during sync.
    pub max_workers: usize,
    /// Timeout for a single embedding call (one batched call per document).
    pub embed_timeout: Duration,
    /// Timeout for index and ledger I/O operations.
    pub io_timeout: Duration,
}

impl Default for IndexManagerConfig {
    fn default() -> Self {
        Self {
            chunking_config: ChunkingConfig::default(),
            max_workers: 4,
            embed_timeout: Duration::from_secs(30),
            io_timeout: Duration::from_secs(10),
        }
    }
}

impl IndexManagerConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_chunking_config(mut self, chunking_config: ChunkingConfig) -> Self {
        self.chunking_config = chunking_config;
        self
    }

    /// Set the worker-pool size for concurrent embedding during sync.
    pub fn with_max_workers(mut self, max_workers: usize) -> Self {
        self.max_workers = max_workers;
        self
    }

    pub fn with_embed_timeout(mut self, embed_timeout: Duration) -> Self {
        self.embed_timeout = embed_timeout;
        self
    }

    pub fn with_io_timeout(mut self, io_timeout: Duration) -> Self {
        self.io_timeout = io_timeout;
        self
    }
}

/// Options for a single sync call.
#[derive(Debug, Clone, Copy, Default)]
pub struct SyncOptions {
    /// Re-embed every present document regardless of its stored fingerprint.
    /// Removal handling is unchanged. Used for parameter or model migrations.
    pub force: bool,
}

/// Outcome of one sync round.
///
/// `new`, `changed`, and `unchanged` count how the corpus classified against
/// the ledger; `removed` counts identities actually deleted. Documents that
/// failed mid-pipeline appear in `failed` (and their classification count),
/// keep their stale ledger entry, and are retried on the next sync.
#[derive(Debug, Clone, Serialize)]
pub struct SyncReport {
    pub new: usize,
    pub changed: usize,
    pub unchanged: usize,
    pub removed: usize,
    pub failed: Vec<DocumentFailure>,
    pub chunks_indexed: usize,
    pub embeddings_generated: usize,
    pub elapsed_seconds: f64,
}

impl SyncReport {
    /// Whether every document in the round fully succeeded.
    pub fn is_complete(&self) -> bool {
        self.failed.is_empty()
    }
}

struct WorkItem {
    document: Document,
    fingerprint: Fingerprint,
    is_new: bool,
}

struct ProcessedDocument {
    document_id: String,
    fingerprint: Fingerprint,
    chunks: usize,
    embeddings: usize,
}

/// Mutable manager state, guarded by one lock so stats snapshots are atomic
/// with respect to sync commits.
struct ManagerState {
    ledger: FingerprintLedger,
    last_sync_at: Option<i64>,
    failing: Vec<String>,
    vector_count: usize,
    /// Set once any successful sync has populated this state, in-process or
    /// via a persisted ledger from an earlier run.
    index_ready: bool,
    /// Set when the persisted ledger was unusable (corrupt or written under
    /// different parameters); the next sync clears the index first.
    needs_rebuild: bool,
}

/// Orchestrates FingerprintStore + Chunker + Embedder + VectorIndex.
pub struct IndexManager {
    config: IndexManagerConfig,
    chunking: ChunkingStrategy,
    provider: Arc<dyn EmbeddingProvider>,
    index: Arc<dyn VectorIndex>,
    ledger_store: Arc<dyn FingerprintStore>,
    state: RwLock<ManagerState>,
    sync_gate: Mutex<()>,
}

impl IndexManager {
    /// Construct the manager, loading any persisted ledger.
    ///
    /// A missing ledger is a cold cache. A corrupt ledger, or one written
    /// under different chunking parameters or a different embedding model,
    /// is also treated as cold — with the additional effect that the first
    /// sync clears the vector index, since its contents can no longer be
    /// trusted to match the ledger.
    pub async fn new(
        config: IndexManagerConfig,
        provider: Arc<dyn EmbeddingProvider>,
        index: Arc<dyn VectorIndex>,
        ledger_store: Arc<dyn FingerprintStore>,
    ) -> anyhow::Result<Self> {
        anyhow::ensure!(
            config.chunking_config.is_valid(),
            "invalid chunking configuration: max_chunk_size {} / overlap {}",
            config.chunking_config.max_chunk_size,
            config.chunking_config.overlap
        );
        anyhow::ensure!(config.max_workers > 0, "max_workers must be at least 1");

        let chunking = ChunkingStrategy::new(config.chunking_config.clone());
        let model_id = provider.model_id();

        let fresh =
            || FingerprintLedger::new(config.chunking_config.clone(), Some(model_id.clone()));
        let (ledger, index_ready, needs_rebuild) = match ledger_store.load().await {
            Ok(Some(ledger))
                if ledger.is_compatible_with(&config.chunking_config, Some(&model_id)) =>
            {
                info!("Loaded fingerprint ledger with {} entries", ledger.len());
                (ledger, true, false)
            }
            Ok(Some(_)) => {
                warn!(
                    "Persisted ledger was written under different chunking or model \
                     configuration; treating cache as cold"
                );
                (fresh(), false, true)
            }
            Ok(None) => {
                debug!("No persisted ledger found; starting cold");
                (fresh(), false, false)
            }
            Err(LedgerError::Corrupt { source }) => {
                warn!("Persisted ledger is corrupt ({source}); treating cache as cold");
                (fresh(), false, true)
            }
            Err(e) => return Err(e.into()),
        };

        let vector_count = index.vector_count().await?;

        Ok(Self {
            config,
            chunking,
            provider,
            index,
            ledger_store,
            state: RwLock::new(ManagerState {
                ledger,
                last_sync_at: None,
                failing: Vec::new(),
                vector_count,
                index_ready,
                needs_rebuild,
            }),
            sync_gate: Mutex::new(()),
        })
    }

    pub fn config(&self) -> &IndexManagerConfig {
        &self.config
    }

    /// Reconcile ledger and index with a corpus snapshot.
    ///
    /// Unchanged documents are skipped entirely; new and changed ones are
    /// chunked, embedded, and replaced in the index; identities absent from
    /// the snapshot are deleted. Per-document failures are collected into the
    /// report, not escalated. Re-running after a partial failure reprocesses
    /// only the documents whose ledger entry is still stale or missing.
    pub async fn sync(&self, corpus: Vec<Document>) -> Result<SyncReport, SyncError> {
        self.sync_with_options(corpus, SyncOptions::default()).await
    }

    /// [`sync`](Self::sync) with explicit options.
    pub async fn sync_with_options(
        &self,
        corpus: Vec<Document>,
        options: SyncOptions,
    ) -> Result<SyncReport, SyncError> {
        let _gate = self
            .sync_gate
            .try_lock()
            .map_err(|_| SyncError::SyncInProgress)?;
        let started = Instant::now();

        if let Some(id) = corpus.iter().map(|d| d.id.as_str()).duplicates().next() {
            return Err(SyncError::DuplicateIdentity { id: id.to_string() });
        }

        let (previous, needs_rebuild) = {
            let state = self.state.read().await;
            (state.ledger.clone(), state.needs_rebuild)
        };

        if needs_rebuild {
            let removed = tokio::time::timeout(self.config.io_timeout, self.index.clear())
                .await
                .map_err(|_| SyncError::Index {
                    source: anyhow::anyhow!(
                        "clearing the index timed out after {:?}",
                        self.config.io_timeout
                    ),
                })?
                .map_err(|source| SyncError::Index { source })?;
            info!("Cold cache: cleared {removed} stale vectors before rebuild");
        }

        // Classify the snapshot against the ledger.
        let present: HashSet<String> = corpus.iter().map(|d| d.id.clone()).collect();
        let mut work: Vec<WorkItem> = Vec::new();
        let mut unchanged = 0usize;
        for document in corpus {
            let fingerprint = fingerprint_of(&document);
            match previous.fingerprint_for(&document.id) {
                Some(existing) if *existing == fingerprint && !options.force => unchanged += 1,
                Some(_) => work.push(WorkItem {
                    document,
                    fingerprint,
                    is_new: false,
                }),
                None => work.push(WorkItem {
                    document,
                    fingerprint,
                    is_new: true,
                }),
            }
        }
        let removed_ids: Vec<String> = previous
            .entries
            .keys()
            .filter(|id| !present.contains(*id))
            .cloned()
            .collect();

        let new_count = work.iter().filter(|w| w.is_new).count();
        let changed_count = work.len() - new_count;
        info!(
            "Sync classified corpus: {} new, {} changed, {} unchanged, {} removed",
            new_count,
            changed_count,
            unchanged,
            removed_ids.len()
        );

        // Chunk + embed + replace, bounded fan-out across documents. A
        // worker's failure never cancels its siblings.
        let outcomes: Vec<Result<ProcessedDocument, DocumentFailure>> = stream::iter(work)
            .map(|item| self.process_document(item.document, item.fingerprint))
            .buffer_unordered(self.config.max_workers)
            .collect()
            .await;

        let mut failures: Vec<DocumentFailure> = Vec::new();
        let mut successes: Vec<ProcessedDocument> = Vec::new();
        for outcome in outcomes {
            match outcome {
                Ok(processed) => successes.push(processed),
                Err(failure) => {
                    warn!(
                        "Document {} failed ({}): {}",
                        failure.document_id, failure.kind, failure.error
                    );
                    failures.push(failure);
                }
            }
        }

        // Removals. A failed delete keeps its ledger entry so the next sync
        // retries it.
        let mut removed_ok: Vec<String> = Vec::new();
        for id in &removed_ids {
            match tokio::time::timeout(self.config.io_timeout, self.index.delete_document(id))
                .await
            {
                Ok(Ok(count)) => {
                    debug!("Removed {count} vectors for deleted document {id}");
                    removed_ok.push(id.clone());
                }
                Ok(Err(e)) => failures.push(DocumentFailure::new(
                    id,
                    FailureKind::IndexWrite,
                    e.to_string(),
                )),
                Err(_) => failures.push(DocumentFailure::new(
                    id,
                    FailureKind::Timeout,
                    format!("delete timed out after {:?}", self.config.io_timeout),
                )),
            }
        }

        // Advance the ledger for fully-successful documents only, persist it,
        // and only then swap it into memory: disk never claims more progress
        // than the index holds, and memory never claims more than disk.
        let now = chrono::Utc::now().timestamp();
        let mut next = previous;
        for id in &removed_ok {
            next.entries.remove(id);
        }
        let mut chunks_indexed = 0usize;
        let mut embeddings_generated = 0usize;
        for processed in &successes {
            chunks_indexed += processed.chunks;
            embeddings_generated += processed.embeddings;
            next.entries.insert(
                processed.document_id.clone(),
                LedgerEntry {
                    fingerprint: processed.fingerprint,
                    last_synced_at: now,
                },
            );
        }

        tokio::time::timeout(self.config.io_timeout, self.ledger_store.save(&next))
            .await
            .map_err(|_| SyncError::LedgerPersist {
                source: LedgerError::Io {
                    source: std::io::Error::new(
                        std::io::ErrorKind::TimedOut,
                        format!("ledger save timed out after {:?}", self.config.io_timeout),
                    ),
                },
            })?
            .map_err(|source| SyncError::LedgerPersist { source })?;

        let vector_count = match self.index.vector_count().await {
            Ok(count) => Some(count),
            Err(e) => {
                warn!("Could not refresh vector count after sync: {e}");
                None
            }
        };

        {
            let mut state = self.state.write().await;
            state.ledger = next;
            state.last_sync_at = Some(now);
            state.failing = failures.iter().map(|f| f.document_id.clone()).collect();
            state.index_ready = true;
            state.needs_rebuild = false;
            if let Some(count) = vector_count {
                state.vector_count = count;
            }
        }

        let report = SyncReport {
            new: new_count,
            changed: changed_count,
            unchanged,
            removed: removed_ok.len(),
            failed: failures,
            chunks_indexed,
            embeddings_generated,
            elapsed_seconds: started.elapsed().as_secs_f64(),
        };
        info!(
            "Sync finished in {:.2}s: {} chunks indexed, {} failures",
            report.elapsed_seconds,
            report.chunks_indexed,
            report.failed.len()
        );
        Ok(report)
    }

    /// Chunk, embed, and index one document. Every failure path maps to a
    /// [`DocumentFailure`] so the caller can aggregate without aborting.
    async fn process_document(
        &self,
        document: Document,
        fingerprint: Fingerprint,
    ) -> Result<ProcessedDocument, DocumentFailure> {
        let chunks = self.chunking.chunk_text(&document.id, &document.text);
        let chunk_count = chunks.len();

        // An empty document legitimately produces zero vectors; it still goes
        // through replace_document so stale vectors from earlier revisions
        // are cleared.
        let vectors: Vec<IndexedVector> = if chunks.is_empty() {
            Vec::new()
        } else {
            let texts: Vec<String> = chunks.iter().map(|c| c.text.clone()).collect();
            let embedded = match tokio::time::timeout(
                self.config.embed_timeout,
                self.provider.embed_texts(&texts),
            )
            .await
            {
                Ok(Ok(result)) => result,
                Ok(Err(e)) => {
                    return Err(DocumentFailure::new(
                        &document.id,
                        failure_kind_for_embed_error(&e),
                        e.to_string(),
                    ));
                }
                Err(_) => {
                    return Err(DocumentFailure::new(
                        &document.id,
                        FailureKind::Timeout,
                        format!(
                            "embedding timed out after {:?}",
                            self.config.embed_timeout
                        ),
                    ));
                }
            };

            if embedded.len() != chunk_count {
                return Err(DocumentFailure::new(
                    &document.id,
                    FailureKind::Embedding,
                    format!(
                        "provider returned {} embeddings for {} chunks",
                        embedded.len(),
                        chunk_count
                    ),
                ));
            }
            if embedded.dimension != self.provider.embedding_dimension() {
                return Err(DocumentFailure::new(
                    &document.id,
                    FailureKind::Embedding,
                    format!(
                        "provider returned dimension {}, expected {}",
                        embedded.dimension,
                        self.provider.embedding_dimension()
                    ),
                ));
            }

            chunks
                .into_iter()
                .zip(embedded.embeddings)
                .map(|(chunk, embedding)| IndexedVector {
                    document_id: document.id.clone(),
                    sequence: chunk.sequence,
                    fingerprint,
                    content: chunk.text,
                    embedding,
                })
                .collect()
        };

        let embeddings = vectors.len();
        match tokio::time::timeout(
            self.config.io_timeout,
            self.index.replace_document(&document.id, &vectors),
        )
        .await
        {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                return Err(DocumentFailure::new(
                    &document.id,
                    FailureKind::IndexWrite,
                    e.to_string(),
                ));
            }
            Err(_) => {
                return Err(DocumentFailure::new(
                    &document.id,
                    FailureKind::Timeout,
                    format!("index write timed out after {:?}", self.config.io_timeout),
                ));
            }
        }

        debug!(
            "Indexed {}: {} chunks, {} embeddings",
            document.id, chunk_count, embeddings
        );
        Ok(ProcessedDocument {
            document_id: document.id,
            fingerprint,
            chunks: chunk_count,
            embeddings,
        })
    }

    /// Semantic search over the indexed corpus.
    ///
    /// Returns up to `k` hits with cosine similarity of at least `threshold`
    /// (the boundary itself matches), in descending similarity order. An
    /// index that a sync legitimately left empty yields an empty result; an
    /// index no sync has ever populated yields
    /// [`SearchError::IndexUnavailable`].
    pub async fn search(
        &self,
        query: &str,
        k: usize,
        threshold: f32,
    ) -> Result<Vec<SearchHit>, SearchError> {
        if query.trim().is_empty() {
            return Err(SearchError::invalid_parameter("query must not be empty"));
        }
        if k == 0 {
            return Err(SearchError::invalid_parameter("k must be at least 1"));
        }
        if !threshold.is_finite() || !(-1.0..=1.0).contains(&threshold) {
            return Err(SearchError::invalid_parameter(format!(
                "threshold {threshold} outside the cosine range [-1, 1]"
            )));
        }

        {
            let state = self.state.read().await;
            if !state.index_ready {
                return Err(SearchError::IndexUnavailable);
            }
        }

        let embedding = tokio::time::timeout(
            self.config.embed_timeout,
            self.provider.embed_text(query),
        )
        .await
        .map_err(|_| SearchError::Timeout {
            timeout: self.config.embed_timeout,
        })??;

        let hits = tokio::time::timeout(self.config.io_timeout, self.index.query(&embedding, k))
            .await
            .map_err(|_| SearchError::Timeout {
                timeout: self.config.io_timeout,
            })?
            .map_err(|source| SearchError::Index { source })?;

        debug!("Search returned {} raw hits for k={k}", hits.len());
        Ok(hits
            .into_iter()
            .filter(|hit| hit.similarity >= threshold)
            .collect())
    }

    /// Read-only snapshot of ledger and index health.
    ///
    /// Served entirely from manager state (vector count included, refreshed
    /// at sync commit), so a concurrent sync is observed either wholly before
    /// or wholly after.
    pub async fn stats(&self) -> StatsSnapshot {
        let state = self.state.read().await;
        StatsSnapshot {
            documents: state.ledger.len(),
            vectors: state.vector_count,
            last_sync_at: state.last_sync_at,
            failing_documents: state.failing.len(),
            index_size_bytes: None,
        }
    }
}
