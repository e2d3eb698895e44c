//! Integration tests for the sync/search/stats lifecycle.
//!
//! These run against the real SQLite index and JSON ledger store, with a
//! deterministic stub embedding provider so similarity scores are exact and
//! no network is involved:
//! - incremental sync (new / changed / unchanged / removed classification)
//! - idempotence: a repeated sync embeds nothing and leaves state identical
//! - partial-failure isolation and retry on the next sync
//! - threshold boundary semantics and query parameter validation
//! - cold-start behavior with missing or corrupt ledgers

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use tempfile::tempdir;
use tracing_test::traced_test;

use opal_ai_embed::{EmbedError, EmbeddingProvider, EmbeddingResult};
use opal_ai_retriever::error::{FailureKind, SearchError, SyncError};
use opal_ai_retriever::retrieval::corpus::Document;
use opal_ai_retriever::retrieval::fingerprint::Fingerprint;
use opal_ai_retriever::retrieval::index_manager::{
    IndexManager, IndexManagerConfig, SyncOptions,
};
use opal_ai_retriever::retrieval::ledger::{FingerprintStore, JsonLedgerStore};
use opal_ai_retriever::storage::sqlite_index::SqliteVectorIndex;

/// Marker that makes the stub provider reject a text.
const POISON: &str = "[unembeddable]";

/// Deterministic embedding provider for tests.
///
/// Texts can be scripted to exact vectors (for known-similarity scenarios);
/// anything else gets a deterministic pseudo-embedding derived from its
/// bytes. Texts containing [`POISON`] fail with a non-retryable error.
struct StubEmbedder {
    dimension: usize,
    scripted: HashMap<String, Vec<f32>>,
    batches: AtomicUsize,
    texts_embedded: AtomicUsize,
    delay: Option<Duration>,
}

impl StubEmbedder {
    fn new(dimension: usize) -> Self {
        Self {
            dimension,
            scripted: HashMap::new(),
            batches: AtomicUsize::new(0),
            texts_embedded: AtomicUsize::new(0),
            delay: None,
        }
    }

    fn script(mut self, text: &str, vector: Vec<f32>) -> Self {
        assert_eq!(vector.len(), self.dimension);
        self.scripted.insert(text.to_string(), vector);
        self
    }

    fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    fn texts_embedded(&self) -> usize {
        self.texts_embedded.load(Ordering::SeqCst)
    }

    fn vector_for(&self, text: &str) -> Vec<f32> {
        if let Some(vector) = self.scripted.get(text) {
            return vector.clone();
        }
        let mut vector = vec![0.0f32; self.dimension];
        for (i, byte) in text.bytes().enumerate() {
            vector[i % self.dimension] += byte as f32;
        }
        let norm: f32 = vector.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm > 0.0 {
            for value in &mut vector {
                *value /= norm;
            }
        }
        vector
    }
}

#[async_trait]
impl EmbeddingProvider for StubEmbedder {
    async fn embed_text(&self, text: &str) -> opal_ai_embed::Result<Vec<f32>> {
        if text.contains(POISON) {
            return Err(EmbedError::embedding_failed("stub refuses this text"));
        }
        Ok(self.vector_for(text))
    }

    async fn embed_texts(&self, texts: &[String]) -> opal_ai_embed::Result<EmbeddingResult> {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        self.batches.fetch_add(1, Ordering::SeqCst);
        if let Some(poisoned) = texts.iter().find(|t| t.contains(POISON)) {
            return Err(EmbedError::embedding_failed(format!(
                "stub refuses: {poisoned}"
            )));
        }
        self.texts_embedded.fetch_add(texts.len(), Ordering::SeqCst);
        Ok(EmbeddingResult::new(
            texts.iter().map(|t| self.vector_for(t)).collect(),
        ))
    }

    fn embedding_dimension(&self) -> usize {
        self.dimension
    }

    fn provider_name(&self) -> &str {
        "stub"
    }
}

async fn new_manager(provider: Arc<StubEmbedder>, state_dir: &Path) -> Arc<IndexManager> {
    let index = Arc::new(SqliteVectorIndex::open_memory().await.unwrap());
    let store = Arc::new(JsonLedgerStore::new(state_dir.join("ledger.json")));
    let manager = IndexManager::new(IndexManagerConfig::new(), provider, index, store)
        .await
        .unwrap();
    Arc::new(manager)
}

#[tokio::test]
async fn sync_then_search_finds_semantic_match() {
    let dir = tempdir().unwrap();
    let provider = Arc::new(
        StubEmbedder::new(4)
            .script("react components", vec![0.9, 0.435_889_9, 0.0, 0.0])
            .script("frontend ui", vec![1.0, 0.0, 0.0, 0.0]),
    );
    let manager = new_manager(provider, dir.path()).await;

    let report = manager
        .sync(vec![Document::new("a", "react components")])
        .await
        .unwrap();
    assert_eq!(report.new, 1);
    assert_eq!(report.chunks_indexed, 1);
    assert!(report.is_complete());

    let hits = manager.search("frontend ui", 5, 0.0).await.unwrap();
    assert!(!hits.is_empty());
    assert_eq!(hits[0].document_id, "a");
    assert!(hits[0].similarity > 0.0);
}

#[tokio::test]
async fn repeated_sync_is_idempotent_and_embeds_nothing() {
    let dir = tempdir().unwrap();
    let provider = Arc::new(StubEmbedder::new(4));
    let manager = new_manager(provider.clone(), dir.path()).await;

    let corpus = vec![
        Document::new("a.md", "first document body"),
        Document::new("b.md", "second document body"),
    ];

    let first = manager.sync(corpus.clone()).await.unwrap();
    assert_eq!(first.new, 2);
    let embedded_after_first = provider.texts_embedded();
    assert!(embedded_after_first >= 2);

    let ledger_path = dir.path().join("ledger.json");
    let ledger_after_first = std::fs::read(&ledger_path).unwrap();

    let second = manager.sync(corpus).await.unwrap();
    assert_eq!(second.new, 0);
    assert_eq!(second.changed, 0);
    assert_eq!(second.unchanged, 2);
    // The core performance invariant: nothing was re-embedded.
    assert_eq!(provider.texts_embedded(), embedded_after_first);

    // Ledger persisted after the second sync is byte-identical.
    let ledger_after_second = std::fs::read(&ledger_path).unwrap();
    assert_eq!(ledger_after_first, ledger_after_second);

    let stats = manager.stats().await;
    assert_eq!(stats.documents, 2);
    assert_eq!(stats.vectors, 2);
}

#[tokio::test]
async fn changed_document_is_reembedded_and_replaced() {
    let dir = tempdir().unwrap();
    let provider = Arc::new(
        StubEmbedder::new(4)
            .script("the quick brown fox", vec![1.0, 0.0, 0.0, 0.0])
            .script("completely different content", vec![0.0, 1.0, 0.0, 0.0])
            .script("old probe", vec![1.0, 0.0, 0.0, 0.0])
            .script("new probe", vec![0.0, 1.0, 0.0, 0.0]),
    );
    let manager = new_manager(provider, dir.path()).await;

    manager
        .sync(vec![Document::new("a.md", "the quick brown fox")])
        .await
        .unwrap();

    let report = manager
        .sync(vec![Document::new("a.md", "completely different content")])
        .await
        .unwrap();
    assert_eq!(report.changed, 1);
    assert_eq!(report.new, 0);

    // The old revision's vectors are gone, wholesale.
    let old_hits = manager.search("old probe", 5, 0.5).await.unwrap();
    assert!(old_hits.is_empty());

    let new_hits = manager.search("new probe", 5, 0.5).await.unwrap();
    assert_eq!(new_hits.len(), 1);
    assert_eq!(new_hits[0].content, "completely different content");

    let stats = manager.stats().await;
    assert_eq!(stats.documents, 1);
    assert_eq!(stats.vectors, 1);
}

#[tokio::test]
async fn removed_document_leaves_no_trace() {
    let dir = tempdir().unwrap();
    let provider = Arc::new(StubEmbedder::new(4));
    let manager = new_manager(provider, dir.path()).await;

    manager
        .sync(vec![
            Document::new("keep.md", "kept content"),
            Document::new("drop.md", "dropped content"),
        ])
        .await
        .unwrap();

    let report = manager
        .sync(vec![Document::new("keep.md", "kept content")])
        .await
        .unwrap();
    assert_eq!(report.removed, 1);
    assert_eq!(report.unchanged, 1);

    let stats = manager.stats().await;
    assert_eq!(stats.documents, 1);
    assert_eq!(stats.vectors, 1);

    // Neither a ledger entry nor vectors remain for the removed identity.
    let store = JsonLedgerStore::new(dir.path().join("ledger.json"));
    let ledger = store.load().await.unwrap().unwrap();
    assert!(ledger.fingerprint_for("drop.md").is_none());
    assert!(ledger.fingerprint_for("keep.md").is_some());

    let hits = manager.search("dropped content", 10, -1.0).await.unwrap();
    assert!(hits.iter().all(|h| h.document_id != "drop.md"));
}

#[tokio::test]
async fn empty_corpus_sync_clears_everything() {
    let dir = tempdir().unwrap();
    let provider = Arc::new(StubEmbedder::new(4));
    let manager = new_manager(provider, dir.path()).await;

    manager
        .sync(vec![
            Document::new("a.md", "alpha"),
            Document::new("b.md", "beta"),
        ])
        .await
        .unwrap();

    let report = manager.sync(vec![]).await.unwrap();
    assert_eq!(report.removed, 2);

    let stats = manager.stats().await;
    assert_eq!(stats.documents, 0);
    assert_eq!(stats.vectors, 0);

    // Synced-but-empty is a valid state, not IndexUnavailable.
    let hits = manager.search("alpha", 5, 0.0).await.unwrap();
    assert!(hits.is_empty());
}

#[tokio::test]
async fn partial_failure_commits_the_rest_and_retries_later() {
    let dir = tempdir().unwrap();
    let provider = Arc::new(StubEmbedder::new(4));
    let manager = new_manager(provider, dir.path()).await;

    let report = manager
        .sync(vec![
            Document::new("good.md", "healthy document"),
            Document::new("bad.md", format!("{POISON} broken document")),
        ])
        .await
        .unwrap();

    assert_eq!(report.failed.len(), 1);
    assert_eq!(report.failed[0].document_id, "bad.md");
    assert_eq!(report.failed[0].kind, FailureKind::Embedding);

    // The healthy document committed; the failing one has no ledger entry.
    let stats = manager.stats().await;
    assert_eq!(stats.documents, 1);
    assert_eq!(stats.failing_documents, 1);
    let hits = manager.search("healthy document", 5, 0.5).await.unwrap();
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].document_id, "good.md");

    // Next sync retries the stale document; once fixed it commits.
    let retry = manager
        .sync(vec![
            Document::new("good.md", "healthy document"),
            Document::new("bad.md", "repaired document"),
        ])
        .await
        .unwrap();
    assert_eq!(retry.new, 1);
    assert_eq!(retry.unchanged, 1);
    assert!(retry.is_complete());
    assert_eq!(manager.stats().await.documents, 2);
    assert_eq!(manager.stats().await.failing_documents, 0);
}

#[tokio::test]
async fn empty_document_gets_a_ledger_entry_but_no_vectors() {
    let dir = tempdir().unwrap();
    let provider = Arc::new(StubEmbedder::new(4));
    let manager = new_manager(provider, dir.path()).await;

    let report = manager.sync(vec![Document::new("empty.md", "")]).await.unwrap();
    assert_eq!(report.new, 1);
    assert_eq!(report.chunks_indexed, 0);
    assert!(report.is_complete());

    // "Processed, empty" is distinguishable from "never seen".
    let stats = manager.stats().await;
    assert_eq!(stats.documents, 1);
    assert_eq!(stats.vectors, 0);

    let store = JsonLedgerStore::new(dir.path().join("ledger.json"));
    let ledger = store.load().await.unwrap().unwrap();
    assert_eq!(
        ledger.fingerprint_for("empty.md"),
        Some(&Fingerprint::compute(""))
    );
}

#[tokio::test]
async fn duplicate_identities_are_rejected_before_any_mutation() {
    let dir = tempdir().unwrap();
    let provider = Arc::new(StubEmbedder::new(4));
    let manager = new_manager(provider.clone(), dir.path()).await;

    let err = manager
        .sync(vec![
            Document::new("a.md", "one"),
            Document::new("a.md", "two"),
        ])
        .await
        .unwrap_err();
    assert!(matches!(err, SyncError::DuplicateIdentity { id } if id == "a.md"));
    assert_eq!(provider.texts_embedded(), 0);
}

#[tokio::test]
async fn threshold_boundary_is_inclusive() {
    let dir = tempdir().unwrap();
    let provider = Arc::new(
        StubEmbedder::new(4)
            .script("axis aligned", vec![1.0, 0.0, 0.0, 0.0])
            .script("orthogonal thing", vec![0.0, 1.0, 0.0, 0.0])
            .script("probe", vec![1.0, 0.0, 0.0, 0.0]),
    );
    let manager = new_manager(provider, dir.path()).await;

    manager
        .sync(vec![
            Document::new("axis.md", "axis aligned"),
            Document::new("ortho.md", "orthogonal thing"),
        ])
        .await
        .unwrap();

    // Similarities are exactly 1.0 and 0.0 by construction.
    let at_zero = manager.search("probe", 5, 0.0).await.unwrap();
    assert_eq!(at_zero.len(), 2, "score exactly at threshold must match");

    let above_zero = manager.search("probe", 5, f32::EPSILON).await.unwrap();
    assert_eq!(above_zero.len(), 1);
    assert_eq!(above_zero[0].document_id, "axis.md");

    let at_one = manager.search("probe", 5, 1.0).await.unwrap();
    assert_eq!(at_one.len(), 1);
}

#[tokio::test]
async fn query_parameters_are_validated_not_clamped() {
    let dir = tempdir().unwrap();
    let provider = Arc::new(StubEmbedder::new(4));
    let manager = new_manager(provider, dir.path()).await;
    manager.sync(vec![Document::new("a.md", "text")]).await.unwrap();

    for (query, k, threshold) in [
        ("text", 0, 0.0),
        ("text", 5, 1.5),
        ("text", 5, -1.5),
        ("text", 5, f32::NAN),
        ("   ", 5, 0.0),
    ] {
        let err = manager.search(query, k, threshold).await.unwrap_err();
        assert!(
            matches!(err, SearchError::InvalidQueryParameter { .. }),
            "expected InvalidQueryParameter for k={k}, threshold={threshold}"
        );
    }
}

#[tokio::test]
async fn search_before_any_sync_is_index_unavailable() {
    let dir = tempdir().unwrap();
    let provider = Arc::new(StubEmbedder::new(4));
    let manager = new_manager(provider, dir.path()).await;

    let err = manager.search("anything", 5, 0.0).await.unwrap_err();
    assert!(matches!(err, SearchError::IndexUnavailable));
}

#[tokio::test]
async fn concurrent_sync_is_rejected_not_interleaved() {
    let dir = tempdir().unwrap();
    let provider = Arc::new(StubEmbedder::new(4).with_delay(Duration::from_millis(300)));
    let manager = new_manager(provider, dir.path()).await;

    let background = manager.clone();
    let handle = tokio::spawn(async move {
        background
            .sync(vec![Document::new("slow.md", "slow document")])
            .await
    });

    // Give the first sync time to take the gate and park in the embedder.
    tokio::time::sleep(Duration::from_millis(50)).await;

    let err = manager
        .sync(vec![Document::new("other.md", "other document")])
        .await
        .unwrap_err();
    assert!(matches!(err, SyncError::SyncInProgress));

    let first = handle.await.unwrap().unwrap();
    assert!(first.is_complete());
}

#[traced_test]
#[tokio::test]
async fn corrupt_ledger_is_a_cold_cache_not_a_crash() {
    let dir = tempdir().unwrap();
    std::fs::write(dir.path().join("ledger.json"), b"{ not valid json").unwrap();

    let provider = Arc::new(StubEmbedder::new(4));
    let manager = new_manager(provider, dir.path()).await;
    assert!(logs_contain("corrupt"));

    // A corrupt ledger proves nothing about the index.
    let err = manager.search("anything", 5, 0.0).await.unwrap_err();
    assert!(matches!(err, SearchError::IndexUnavailable));

    // Syncing from cold works and repairs the ledger.
    let report = manager
        .sync(vec![Document::new("a.md", "fresh start")])
        .await
        .unwrap();
    assert_eq!(report.new, 1);
    assert_eq!(manager.search("fresh start", 5, 0.5).await.unwrap().len(), 1);

    let store = JsonLedgerStore::new(dir.path().join("ledger.json"));
    assert!(store.load().await.unwrap().is_some());
}

#[tokio::test]
async fn persisted_state_survives_a_new_manager_instance() {
    let dir = tempdir().unwrap();
    let corpus = vec![Document::new("a.md", "durable document")];

    {
        let provider = Arc::new(StubEmbedder::new(4));
        let index = Arc::new(SqliteVectorIndex::open(dir.path()).await.unwrap());
        let store = Arc::new(JsonLedgerStore::new(dir.path().join("ledger.json")));
        let manager = IndexManager::new(IndexManagerConfig::new(), provider, index, store)
            .await
            .unwrap();
        manager.sync(corpus.clone()).await.unwrap();
    }

    // Second process: the persisted ledger proves a prior successful sync,
    // so search is available immediately and re-sync embeds nothing.
    let provider = Arc::new(StubEmbedder::new(4));
    let index = Arc::new(SqliteVectorIndex::open(dir.path()).await.unwrap());
    let store = Arc::new(JsonLedgerStore::new(dir.path().join("ledger.json")));
    let manager = IndexManager::new(IndexManagerConfig::new(), provider.clone(), index, store)
        .await
        .unwrap();

    let hits = manager.search("durable document", 5, 0.5).await.unwrap();
    assert_eq!(hits.len(), 1);

    let report = manager.sync(corpus).await.unwrap();
    assert_eq!(report.unchanged, 1);
    assert_eq!(provider.texts_embedded(), 0);
}

#[tokio::test]
async fn force_resync_reembeds_unchanged_documents() {
    let dir = tempdir().unwrap();
    let provider = Arc::new(StubEmbedder::new(4));
    let manager = new_manager(provider.clone(), dir.path()).await;

    let corpus = vec![Document::new("a.md", "stable content")];
    manager.sync(corpus.clone()).await.unwrap();
    let baseline = provider.texts_embedded();

    let forced = manager
        .sync_with_options(corpus, SyncOptions { force: true })
        .await
        .unwrap();
    assert_eq!(forced.changed, 1);
    assert_eq!(forced.unchanged, 0);
    assert!(provider.texts_embedded() > baseline);
}
