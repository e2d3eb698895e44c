//! Configuration for embedding providers

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::error::{EmbedError, Result};

/// Default per-request timeout in seconds.
const DEFAULT_TIMEOUT_SECS: u64 = 30;

/// Default number of texts sent per API request.
const DEFAULT_BATCH_SIZE: usize = 64;

/// Configuration for an embedding provider.
///
/// Identifies the remote model and how to reach it. The `model` string plus
/// `dimension` form the provider's identity as far as index compatibility is
/// concerned: vectors produced under different configurations must never be
/// compared against each other.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbedConfig {
    /// Base URL of the embeddings API, without a trailing slash
    /// (e.g. `https://api.openai.com/v1`).
    pub api_base: String,
    /// Model identifier sent with each request.
    pub model: String,
    /// Dimension of the vectors this model produces.
    pub dimension: usize,
    /// Per-request timeout in seconds.
    pub timeout_secs: u64,
    /// Maximum number of texts per API request.
    pub batch_size: usize,
    /// Bearer token for the API. Not serialized.
    #[serde(skip)]
    pub api_key: Option<String>,
}

impl EmbedConfig {
    /// Create a configuration for an arbitrary OpenAI-style embeddings
    /// endpoint.
    pub fn new(
        api_base: impl Into<String>,
        model: impl Into<String>,
        dimension: usize,
    ) -> Self {
        Self {
            api_base: api_base.into(),
            model: model.into(),
            dimension,
            timeout_secs: DEFAULT_TIMEOUT_SECS,
            batch_size: DEFAULT_BATCH_SIZE,
            api_key: None,
        }
    }

    /// Configuration for OpenAI's `text-embedding-3-small` (1536 dimensions),
    /// reading the API key from the `OPENAI_API_KEY` environment variable if
    /// it is set.
    pub fn openai_small() -> Self {
        Self::new("https://api.openai.com/v1", "text-embedding-3-small", 1536)
            .with_api_key(std::env::var("OPENAI_API_KEY").ok())
    }

    /// Set the API key (`None` leaves requests unauthenticated, as local
    /// OpenAI-compatible servers expect).
    pub fn with_api_key(mut self, api_key: Option<String>) -> Self {
        self.api_key = api_key;
        self
    }

    /// Set the per-request timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout_secs = timeout.as_secs().max(1);
        self
    }

    /// Set the maximum number of texts per API request.
    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    /// The per-request timeout as a [`Duration`].
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    /// Validate that the configuration is usable.
    pub fn validate(&self) -> Result<()> {
        if self.api_base.is_empty() {
            return Err(EmbedError::invalid_config("api_base must not be empty"));
        }
        if self.model.is_empty() {
            return Err(EmbedError::invalid_config("model must not be empty"));
        }
        if self.dimension == 0 {
            return Err(EmbedError::invalid_config("dimension must be positive"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builders_apply_and_clamp() {
        let config = EmbedConfig::new("http://localhost:8080/v1", "test-model", 384)
            .with_timeout(Duration::from_secs(0))
            .with_batch_size(0);

        assert_eq!(config.timeout(), Duration::from_secs(1));
        assert_eq!(config.batch_size, 1);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn validation_rejects_incomplete_config() {
        assert!(EmbedConfig::new("", "model", 10).validate().is_err());
        assert!(EmbedConfig::new("http://x", "", 10).validate().is_err());
        assert!(EmbedConfig::new("http://x", "model", 0).validate().is_err());
    }

    #[test]
    fn api_key_is_not_serialized() {
        let config = EmbedConfig::new("http://x", "model", 8)
            .with_api_key(Some("secret".to_string()));
        let json = serde_json::to_string(&config).unwrap();
        assert!(!json.contains("secret"));
    }
}
