//! Error taxonomy for sync, search, and persistence.
//!
//! The split follows how callers must react:
//!
//! - [`SyncError`] / [`SearchError`] are structural: the whole operation
//!   failed and nothing was partially committed.
//! - [`DocumentFailure`] is per-document: collected into the sync report,
//!   never aborting the round; the failing document stays stale in the ledger
//!   and is retried on the next sync.
//! - [`LedgerError`] and [`LoadError`] belong to the persistence and loader
//!   seams respectively.

use std::time::Duration;

use opal_ai_embed::EmbedError;

/// Structural failure of a whole sync round.
#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    /// Another sync holds the gate. Rejected, not queued; the caller may
    /// retry later.
    #[error("a sync is already in progress")]
    SyncInProgress,

    /// The corpus snapshot contained the same identity more than once.
    #[error("duplicate document identity in corpus: {id}")]
    DuplicateIdentity { id: String },

    /// The ledger could not be persisted. Index writes for this round may
    /// have landed, but the in-memory ledger was not advanced, so affected
    /// documents simply re-embed on the next sync.
    #[error("failed to persist fingerprint ledger: {source}")]
    LedgerPersist {
        #[source]
        source: LedgerError,
    },

    /// The vector index could not be prepared for this round (e.g. clearing
    /// stale vectors after a cold start).
    #[error("vector index error: {source}")]
    Index {
        #[source]
        source: anyhow::Error,
    },
}

/// Failure of a search call.
#[derive(Debug, thiserror::Error)]
pub enum SearchError {
    /// No successful sync has ever populated this index.
    #[error("index unavailable: no successful sync has populated it yet")]
    IndexUnavailable,

    /// The caller passed an out-of-range parameter; nothing is clamped
    /// silently.
    #[error("invalid query parameter: {message}")]
    InvalidQueryParameter { message: String },

    /// Embedding the query text failed.
    #[error("query embedding failed: {source}")]
    Embedding {
        #[from]
        source: EmbedError,
    },

    /// The vector index could not answer the query.
    #[error("vector index query failed: {source}")]
    Index {
        #[source]
        source: anyhow::Error,
    },

    /// An external call did not complete within the configured timeout.
    #[error("search timed out after {timeout:?}")]
    Timeout { timeout: Duration },
}

impl SearchError {
    pub fn invalid_parameter<S: Into<String>>(message: S) -> Self {
        Self::InvalidQueryParameter {
            message: message.into(),
        }
    }
}

/// Failure of the fingerprint ledger persistence layer.
#[derive(Debug, thiserror::Error)]
pub enum LedgerError {
    /// The persisted ledger exists but cannot be parsed. Callers treat the
    /// cache as cold instead of crashing.
    #[error("persisted ledger is corrupt: {source}")]
    Corrupt {
        #[source]
        source: serde_json::Error,
    },

    #[error("ledger I/O error: {source}")]
    Io {
        #[from]
        source: std::io::Error,
    },
}

/// Failure of the corpus loader collaborator.
#[derive(Debug, thiserror::Error)]
pub enum LoadError {
    /// The corpus source could not be reached at all. Sync never starts;
    /// ledger and index are untouched.
    #[error("corpus source unavailable: {message}")]
    SourceUnavailable { message: String },
}

impl LoadError {
    pub fn source_unavailable<S: Into<String>>(message: S) -> Self {
        Self::SourceUnavailable {
            message: message.into(),
        }
    }
}

/// What went wrong for one document during a sync round.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
pub enum FailureKind {
    /// Chunking the document text failed.
    Chunking,
    /// The embedding provider failed for this document's chunks.
    Embedding,
    /// The embedding provider reported rate limiting; retryable.
    RateLimited,
    /// Writing the document's vectors to the index failed.
    IndexWrite,
    /// An external call exceeded the configured timeout.
    Timeout,
}

impl std::fmt::Display for FailureKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            FailureKind::Chunking => "chunking",
            FailureKind::Embedding => "embedding",
            FailureKind::RateLimited => "rate-limited",
            FailureKind::IndexWrite => "index-write",
            FailureKind::Timeout => "timeout",
        };
        f.write_str(name)
    }
}

/// A per-document failure recorded in the sync report. The document's ledger
/// entry is left stale so the next sync retries it.
#[derive(Debug, Clone, serde::Serialize)]
pub struct DocumentFailure {
    pub document_id: String,
    pub kind: FailureKind,
    pub error: String,
}

impl DocumentFailure {
    pub fn new(document_id: impl Into<String>, kind: FailureKind, error: impl Into<String>) -> Self {
        Self {
            document_id: document_id.into(),
            kind,
            error: error.into(),
        }
    }
}

/// Map an embedding error onto the per-document failure kind.
pub(crate) fn failure_kind_for_embed_error(error: &EmbedError) -> FailureKind {
    match error {
        EmbedError::RateLimited { .. } => FailureKind::RateLimited,
        EmbedError::Timeout { .. } => FailureKind::Timeout,
        _ => FailureKind::Embedding,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn embed_errors_map_to_failure_kinds() {
        assert_eq!(
            failure_kind_for_embed_error(&EmbedError::RateLimited { retry_after: None }),
            FailureKind::RateLimited
        );
        assert_eq!(
            failure_kind_for_embed_error(&EmbedError::Timeout {
                timeout: Duration::from_secs(1)
            }),
            FailureKind::Timeout
        );
        assert_eq!(
            failure_kind_for_embed_error(&EmbedError::embedding_failed("boom")),
            FailureKind::Embedding
        );
    }

    #[test]
    fn failure_kind_display_is_stable() {
        assert_eq!(FailureKind::IndexWrite.to_string(), "index-write");
        assert_eq!(FailureKind::RateLimited.to_string(), "rate-limited");
    }
}
