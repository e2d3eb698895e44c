//! opal-ai-retriever: incremental embedding cache and vector-index manager
//!
//! This crate keeps a semantic search index consistent with a document corpus
//! while re-embedding as little as possible. A persisted fingerprint ledger
//! records the content digest each document had when it was last indexed;
//! syncing a corpus snapshot re-chunks and re-embeds only documents whose
//! digest changed, deletes vectors for documents that disappeared, and skips
//! the rest entirely.
//!
//! ## Key Modules
//!
//! - **[`retrieval`]**: fingerprints, the persisted ledger, corpus loading,
//!   and the [`IndexManager`](retrieval::index_manager::IndexManager)
//!   orchestrating sync and search
//! - **[`storage`]**: the vector-index abstraction and its SQLite
//!   implementation
//! - **[`status`]**: read-only statistics types
//! - **[`error`]**: the caller-facing error taxonomy
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use opal_ai_embed::{EmbedConfig, HttpEmbedProvider};
//! use opal_ai_retriever::retrieval::index_manager::{IndexManager, IndexManagerConfig};
//! use opal_ai_retriever::retrieval::ledger::JsonLedgerStore;
//! use opal_ai_retriever::storage::sqlite_index::SqliteVectorIndex;
//! use std::path::Path;
//!
//! # async fn example() -> anyhow::Result<()> {
//! let provider = Arc::new(HttpEmbedProvider::new(EmbedConfig::openai_small())?);
//! let index = Arc::new(SqliteVectorIndex::open(Path::new(".opal")).await?);
//! let ledger = Arc::new(JsonLedgerStore::new(".opal/ledger.json"));
//!
//! let manager =
//!     IndexManager::new(IndexManagerConfig::new(), provider, index, ledger).await?;
//! let report = manager.sync(vec![]).await?;
//! println!("removed {} documents", report.removed);
//! # Ok(())
//! # }
//! ```

pub mod error;
pub mod retrieval;
pub mod status;
pub mod storage;
