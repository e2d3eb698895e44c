//! Error types for the embedding system

use std::time::Duration;

/// Result type for embedding operations.
///
/// Convenience alias using [`EmbedError`] as the error type, used throughout
/// the crate for operations that can fail.
pub type Result<T> = std::result::Result<T, EmbedError>;

/// Error type for all embedding operations.
///
/// The variants split along the axis callers care about: whether the same
/// input is worth retrying. Rate limits and timeouts are transient; a
/// generation failure for a given input is not.
#[derive(Debug, thiserror::Error)]
pub enum EmbedError {
    /// The embedding API rejected the request due to rate limiting.
    /// Retryable; `retry_after` carries the server's hint when present.
    #[error("embedding API rate limited")]
    RateLimited { retry_after: Option<Duration> },

    /// Embedding generation failed for this input. Not retryable for the
    /// same input.
    #[error("embedding generation failed: {message}")]
    EmbeddingFailed { message: String },

    /// The request did not complete within the configured timeout.
    #[error("embedding request timed out after {timeout:?}")]
    Timeout { timeout: Duration },

    /// The provider configuration is invalid.
    #[error("invalid embedding configuration: {message}")]
    InvalidConfig { message: String },

    /// The API returned vectors of an unexpected dimension.
    #[error("embedding dimension mismatch: expected {expected}, got {actual}")]
    UnexpectedDimension { expected: usize, actual: usize },

    /// Transport-level HTTP failure.
    #[error("HTTP transport error: {source}")]
    Http {
        #[from]
        source: reqwest::Error,
    },
}

impl EmbedError {
    /// Create a generation failure with a custom message.
    pub fn embedding_failed<S: Into<String>>(message: S) -> Self {
        Self::EmbeddingFailed {
            message: message.into(),
        }
    }

    /// Create an invalid configuration error with a custom message.
    pub fn invalid_config<S: Into<String>>(message: S) -> Self {
        Self::InvalidConfig {
            message: message.into(),
        }
    }

    /// Whether retrying the same input later could reasonably succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::RateLimited { .. } | Self::Timeout { .. })
    }
}
