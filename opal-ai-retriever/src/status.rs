//! Read-only statistics over ledger and index state.

use serde::{Deserialize, Serialize};

/// Snapshot of index and cache health.
///
/// Produced by [`IndexManager::stats`](crate::retrieval::index_manager::IndexManager::stats)
/// from manager-held state, so the numbers are mutually consistent even while
/// a sync is running.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatsSnapshot {
    /// Documents tracked by the fingerprint ledger.
    pub documents: usize,
    /// Vectors currently stored in the index.
    pub vectors: usize,
    /// Unix timestamp (seconds) of the last successful sync in this process.
    pub last_sync_at: Option<i64>,
    /// Documents that failed during the last sync attempt and are still
    /// stale in the ledger.
    pub failing_documents: usize,
    /// On-disk size of the vector index, where the caller knows it.
    pub index_size_bytes: Option<u64>,
}
