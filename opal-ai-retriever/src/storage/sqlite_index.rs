//! SQLite implementation of the vector index.
//!
//! Vectors live in one table, keyed by document identity, with embeddings
//! stored as little-endian f32 blobs. Ranking is brute-force cosine
//! similarity computed in Rust over all stored vectors — appropriate for the
//! corpus sizes this workspace targets; a dedicated ANN store can replace
//! this behind the [`VectorIndex`](super::VectorIndex) trait without touching
//! orchestration.
//!
//! WAL mode plus one transaction per document replacement gives readers the
//! snapshot guarantee the trait requires: a concurrent query sees a
//! document's vectors entirely before or entirely after a replacement.

use anyhow::Result;
use async_trait::async_trait;
use sqlx::sqlite::SqliteConnectOptions;
use sqlx::{Row, SqlitePool};
use std::path::Path;

use super::{IndexedVector, SearchHit, VectorIndex, cosine_similarity};
use crate::retrieval::fingerprint::Fingerprint;

/// Vector store backed by a single SQLite database file.
#[derive(Clone)]
pub struct SqliteVectorIndex {
    pool: SqlitePool,
}

impl SqliteVectorIndex {
    /// Opens (creating if missing) the index database `.opal-index.db` under
    /// `base`.
    pub async fn open(base: &Path) -> Result<Self> {
        tokio::fs::create_dir_all(base).await?;
        let db_path = base.join(".opal-index.db");

        let pool = SqlitePool::connect_with(
            SqliteConnectOptions::new()
                .filename(db_path)
                .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal)
                .synchronous(sqlx::sqlite::SqliteSynchronous::Normal)
                .busy_timeout(std::time::Duration::from_secs(5))
                .create_if_missing(true),
        )
        .await?;
        Self::new_with_pool(pool).await
    }

    /// Opens an in-memory index for testing.
    pub async fn open_memory() -> Result<Self> {
        // One connection only: every new :memory: connection is a distinct,
        // empty database.
        let pool = sqlx::sqlite::SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await?;
        Self::new_with_pool(pool).await
    }

    async fn new_with_pool(pool: SqlitePool) -> Result<Self> {
        Self::create_tables(&pool).await?;
        Ok(Self { pool })
    }

    async fn create_tables(pool: &SqlitePool) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS vectors (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                document_id TEXT NOT NULL,
                sequence INTEGER NOT NULL,
                fingerprint TEXT NOT NULL,
                content TEXT NOT NULL,
                embedding BLOB NOT NULL,
                created_at TIMESTAMP DEFAULT CURRENT_TIMESTAMP,
                CONSTRAINT unique_vector UNIQUE(document_id, sequence)
            )
            "#,
        )
        .execute(pool)
        .await?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_vectors_document ON vectors(document_id)")
            .execute(pool)
            .await?;

        Ok(())
    }

    fn hit_from_row(row: &sqlx::sqlite::SqliteRow, similarity: f32) -> Result<SearchHit> {
        let document_id: String = row.get("document_id");
        let sequence: i64 = row.get("sequence");
        let fingerprint_hex: String = row.get("fingerprint");
        let content: String = row.get("content");

        Ok(SearchHit {
            document_id,
            sequence: sequence as usize,
            fingerprint: Fingerprint::from_hex(&fingerprint_hex)
                .map_err(|e| anyhow::anyhow!("stored fingerprint is not valid hex: {e}"))?,
            content,
            similarity,
        })
    }
}

#[async_trait]
impl VectorIndex for SqliteVectorIndex {
    async fn replace_document(&self, document_id: &str, vectors: &[IndexedVector]) -> Result<()> {
        // Delete-then-insert inside one transaction: readers see the old set
        // or the new set, nothing in between.
        let mut tx = self.pool.begin().await?;

        sqlx::query("DELETE FROM vectors WHERE document_id = ?1")
            .bind(document_id)
            .execute(&mut *tx)
            .await?;

        for vector in vectors {
            let embedding_bytes: &[u8] = bytemuck::cast_slice(&vector.embedding);
            sqlx::query(
                r#"
                INSERT INTO vectors (document_id, sequence, fingerprint, content, embedding)
                VALUES (?1, ?2, ?3, ?4, ?5)
                "#,
            )
            .bind(&vector.document_id)
            .bind(vector.sequence as i64)
            .bind(vector.fingerprint.to_hex())
            .bind(&vector.content)
            .bind(embedding_bytes)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    async fn delete_document(&self, document_id: &str) -> Result<usize> {
        let result = sqlx::query("DELETE FROM vectors WHERE document_id = ?1")
            .bind(document_id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() as usize)
    }

    async fn query(&self, embedding: &[f32], limit: usize) -> Result<Vec<SearchHit>> {
        if limit == 0 {
            return Ok(Vec::new());
        }

        let rows = sqlx::query(
            "SELECT document_id, sequence, fingerprint, content, embedding
             FROM vectors ORDER BY document_id, sequence",
        )
        .fetch_all(&self.pool)
        .await?;

        let mut hits: Vec<SearchHit> = Vec::with_capacity(rows.len());
        for row in &rows {
            let embedding_bytes: Vec<u8> = row.get("embedding");
            // pod_collect_to_vec copies, so blob alignment does not matter.
            let stored: Vec<f32> = bytemuck::pod_collect_to_vec(&embedding_bytes);
            let similarity = cosine_similarity(embedding, &stored);
            hits.push(Self::hit_from_row(row, similarity)?);
        }

        hits.sort_by(|a, b| {
            b.similarity
                .partial_cmp(&a.similarity)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        hits.truncate(limit);

        Ok(hits)
    }

    async fn vector_count(&self) -> Result<usize> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM vectors")
            .fetch_one(&self.pool)
            .await?;
        Ok(count as usize)
    }

    async fn clear(&self) -> Result<usize> {
        let result = sqlx::query("DELETE FROM vectors")
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() as usize)
    }

    async fn persist(&self) -> Result<()> {
        // Transactions are already durable at commit; checkpointing the WAL
        // folds them into the main database file. The pragma reports a status
        // row, fetched and discarded.
        sqlx::query("PRAGMA wal_checkpoint(FULL)")
            .fetch_optional(&self.pool)
            .await?;
        Ok(())
    }

    async fn reload(&self) -> Result<()> {
        // SQLite reads always observe the latest committed state through the
        // pool; reloading reduces to verifying the connection is usable.
        sqlx::query("SELECT 1").fetch_one(&self.pool).await?;
        Ok(())
    }
}
