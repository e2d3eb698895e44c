//! Storage abstraction for indexed vectors.
//!
//! The vector index is an external capability as far as orchestration is
//! concerned: anything that can replace a document's vectors atomically and
//! answer k-nearest-neighbor queries can sit behind [`VectorIndex`]. The
//! in-tree implementation is [`sqlite_index::SqliteVectorIndex`].
//!
//! ## Consistency requirements on implementations
//!
//! - `replace_document` must be atomic with respect to concurrent readers: a
//!   query observes either the document's old vectors or its new ones, never
//!   a mixture. This is what lets search run concurrently with sync.
//! - `query` ranks by cosine similarity, descending, and must be read-only.

use anyhow::Result;
use async_trait::async_trait;

pub mod sqlite_index;

use crate::retrieval::fingerprint::Fingerprint;

/// A chunk embedding plus the metadata needed to trace it back to its
/// document. The fingerprint is the parent document's fingerprint at
/// embedding time, which ties every stored vector to the exact content
/// revision it was computed from.
#[derive(Debug, Clone, PartialEq)]
pub struct IndexedVector {
    pub document_id: String,
    /// Chunk position within the document (0-indexed).
    pub sequence: usize,
    /// Parent document fingerprint at embedding time.
    pub fingerprint: Fingerprint,
    /// The chunk text, returned verbatim in search results.
    pub content: String,
    pub embedding: Vec<f32>,
}

/// One ranked result from a vector index query.
#[derive(Debug, Clone, serde::Serialize)]
pub struct SearchHit {
    pub document_id: String,
    pub sequence: usize,
    pub fingerprint: Fingerprint,
    pub content: String,
    pub similarity: f32,
}

/// Nearest-neighbor store for chunk embeddings.
#[async_trait]
pub trait VectorIndex: Send + Sync {
    /// Atomically replace every vector belonging to `document_id` with the
    /// given set (which may be empty, e.g. for a document that became empty).
    async fn replace_document(&self, document_id: &str, vectors: &[IndexedVector]) -> Result<()>;

    /// Delete every vector belonging to `document_id`; returns how many were
    /// removed.
    async fn delete_document(&self, document_id: &str) -> Result<usize>;

    /// The `limit` nearest vectors to `embedding` by cosine similarity,
    /// descending. An empty index yields an empty result.
    async fn query(&self, embedding: &[f32], limit: usize) -> Result<Vec<SearchHit>>;

    /// Total number of stored vectors.
    async fn vector_count(&self) -> Result<usize>;

    /// Remove every vector. Used when a cold cache forces a full rebuild.
    async fn clear(&self) -> Result<usize>;

    /// Flush state to durable storage.
    async fn persist(&self) -> Result<()>;

    /// Re-read persisted state, discarding anything buffered.
    async fn reload(&self) -> Result<()>;
}

/// Cosine similarity between two f32 vectors. Mismatched lengths and zero
/// vectors yield 0.0 rather than an error: such pairs are simply not similar.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() {
        return 0.0;
    }

    let mut dot_product = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;

    for (x, y) in a.iter().zip(b.iter()) {
        dot_product += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    let norm_a = norm_a.sqrt();
    let norm_b = norm_b.sqrt();

    if norm_a == 0.0 || norm_b == 0.0 {
        0.0
    } else {
        dot_product / (norm_a * norm_b)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cosine_similarity() {
        // Identical vectors
        assert_eq!(cosine_similarity(&[1.0, 0.0, 0.0], &[1.0, 0.0, 0.0]), 1.0);

        // Orthogonal vectors
        assert_eq!(cosine_similarity(&[1.0, 0.0], &[0.0, 1.0]), 0.0);

        // Opposite vectors
        assert_eq!(cosine_similarity(&[1.0, 0.0], &[-1.0, 0.0]), -1.0);

        // Non-normalized vectors still land in [-1, 1]
        let similarity = cosine_similarity(&[0.6, 0.8], &[0.8, 0.6]);
        assert!((similarity - 0.96).abs() < 1e-6);

        // Zero vector
        assert_eq!(cosine_similarity(&[0.0, 0.0], &[1.0, 1.0]), 0.0);

        // Mismatched lengths
        assert_eq!(cosine_similarity(&[1.0, 2.0], &[1.0, 2.0, 3.0]), 0.0);
    }
}
