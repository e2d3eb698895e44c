//! # opal-ai-embed
//!
//! Embedding generation for the opal retrieval workspace: a provider trait
//! plus an HTTP implementation for OpenAI-compatible embeddings APIs.
//!
//! ## Design
//!
//! The embedding model is an external capability. Everything downstream (the
//! index manager, the vector index) depends only on the [`EmbeddingProvider`]
//! trait, so a local model, a different vendor, or a deterministic test stub
//! can be swapped in without touching orchestration code.
//!
//! ## Error handling
//!
//! All operations return [`Result<T>`] using the crate's [`EmbedError`] type.
//! The taxonomy distinguishes retryable failures (rate limits, timeouts) from
//! per-input failures, which callers aggregate without aborting a batch.
//!
//! ## Quick Start
//!
//! ```no_run
//! use opal_ai_embed::{EmbedConfig, EmbeddingProvider, HttpEmbedProvider};
//!
//! # async fn example() -> opal_ai_embed::Result<()> {
//! let provider = HttpEmbedProvider::new(EmbedConfig::openai_small())?;
//!
//! let texts = vec!["Hello world".to_string(), "How are you?".to_string()];
//! let result = provider.embed_texts(&texts).await?;
//!
//! println!("Generated {} embeddings of dimension {}", result.len(), result.dimension);
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod error;
pub mod provider;

// Re-export main types for easy access
pub use config::EmbedConfig;
pub use error::{EmbedError, Result};
pub use provider::{EmbeddingProvider, EmbeddingResult, HttpEmbedProvider};
