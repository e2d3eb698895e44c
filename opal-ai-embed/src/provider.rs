//! Embedding provider implementations

use crate::config::EmbedConfig;
use crate::error::{EmbedError, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Result of embedding generation
#[derive(Debug, Clone)]
pub struct EmbeddingResult {
    /// The generated embeddings, one per input text
    pub embeddings: Vec<Vec<f32>>,
    /// The dimension of each embedding vector
    pub dimension: usize,
}

impl EmbeddingResult {
    /// Create a new embedding result; the dimension is inferred from the
    /// first vector (0 for an empty result).
    pub fn new(embeddings: Vec<Vec<f32>>) -> Self {
        let dimension = embeddings.first().map(|e| e.len()).unwrap_or(0);
        Self {
            embeddings,
            dimension,
        }
    }

    /// Number of embedding vectors in this result.
    pub fn len(&self) -> usize {
        self.embeddings.len()
    }

    /// Returns `true` if this result contains no embedding vectors.
    pub fn is_empty(&self) -> bool {
        self.embeddings.is_empty()
    }
}

/// Trait for embedding providers that can generate embeddings from text
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Generate an embedding for a single text
    async fn embed_text(&self, text: &str) -> Result<Vec<f32>>;

    /// Generate embeddings for multiple texts (batch processing)
    async fn embed_texts(&self, texts: &[String]) -> Result<EmbeddingResult>;

    /// Get the dimension of embeddings produced by this provider
    fn embedding_dimension(&self) -> usize;

    /// Get the name/identifier of this provider
    fn provider_name(&self) -> &str;

    /// Identity of the underlying model. Vectors produced under different
    /// model identities must never be compared, so callers record this
    /// alongside indexed vectors and invalidate on mismatch.
    fn model_id(&self) -> String {
        format!("{}:{}", self.provider_name(), self.embedding_dimension())
    }
}

/// Request body for an OpenAI-style `/embeddings` call.
#[derive(Debug, Serialize)]
struct EmbeddingsRequest<'a> {
    model: &'a str,
    input: &'a [String],
}

/// One embedding entry in the API response. `index` ties the vector back to
/// its input position; the API does not guarantee response order.
#[derive(Debug, Deserialize)]
struct EmbeddingsEntry {
    index: usize,
    embedding: Vec<f32>,
}

/// Response body for an OpenAI-style `/embeddings` call.
#[derive(Debug, Deserialize)]
struct EmbeddingsResponse {
    data: Vec<EmbeddingsEntry>,
}

/// Embedding provider backed by an OpenAI-compatible HTTP embeddings API.
///
/// Texts are sent in batches of at most [`EmbedConfig::batch_size`], each
/// under the configured timeout. Returned vectors are L2-normalized so cosine
/// similarity downstream reduces to a dot product.
#[derive(Debug, Clone)]
pub struct HttpEmbedProvider {
    config: EmbedConfig,
    client: reqwest::Client,
}

impl HttpEmbedProvider {
    /// Create a provider from the given configuration.
    pub fn new(config: EmbedConfig) -> Result<Self> {
        config.validate()?;
        let client = reqwest::Client::builder()
            .timeout(config.timeout())
            .build()?;
        Ok(Self { config, client })
    }

    /// The configuration this provider was built with.
    pub fn config(&self) -> &EmbedConfig {
        &self.config
    }

    async fn embed_batch(&self, batch: &[String]) -> Result<Vec<Vec<f32>>> {
        let url = format!("{}/embeddings", self.config.api_base);
        let body = EmbeddingsRequest {
            model: &self.config.model,
            input: batch,
        };

        let mut request = self.client.post(&url).json(&body);
        if let Some(key) = &self.config.api_key {
            request = request.bearer_auth(key);
        }

        let response = request.send().await.map_err(|e| {
            if e.is_timeout() {
                EmbedError::Timeout {
                    timeout: self.config.timeout(),
                }
            } else {
                EmbedError::Http { source: e }
            }
        })?;

        let status = response.status();
        if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            let retry_after = response
                .headers()
                .get(reqwest::header::RETRY_AFTER)
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.parse::<u64>().ok())
                .map(std::time::Duration::from_secs);
            return Err(EmbedError::RateLimited { retry_after });
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(EmbedError::embedding_failed(format!(
                "{url} returned {status}: {body}"
            )));
        }

        let parsed: EmbeddingsResponse = response.json().await?;
        if parsed.data.len() != batch.len() {
            return Err(EmbedError::embedding_failed(format!(
                "expected {} embeddings, API returned {}",
                batch.len(),
                parsed.data.len()
            )));
        }

        // Reassemble in input order; the index field is authoritative.
        let mut ordered: Vec<Option<Vec<f32>>> = vec![None; batch.len()];
        for entry in parsed.data {
            let slot = ordered.get_mut(entry.index).ok_or_else(|| {
                EmbedError::embedding_failed(format!(
                    "API returned out-of-range index {}",
                    entry.index
                ))
            })?;
            *slot = Some(entry.embedding);
        }

        let mut embeddings = Vec::with_capacity(batch.len());
        for (i, slot) in ordered.into_iter().enumerate() {
            let vector = slot.ok_or_else(|| {
                EmbedError::embedding_failed(format!("API returned no embedding for input {i}"))
            })?;
            if vector.len() != self.config.dimension {
                return Err(EmbedError::UnexpectedDimension {
                    expected: self.config.dimension,
                    actual: vector.len(),
                });
            }
            embeddings.push(normalize(vector));
        }
        Ok(embeddings)
    }
}

#[async_trait]
impl EmbeddingProvider for HttpEmbedProvider {
    async fn embed_text(&self, text: &str) -> Result<Vec<f32>> {
        let texts = vec![text.to_string()];
        let result = self.embed_texts(&texts).await?;
        result
            .embeddings
            .into_iter()
            .next()
            .ok_or_else(|| EmbedError::embedding_failed("no embedding generated for text"))
    }

    async fn embed_texts(&self, texts: &[String]) -> Result<EmbeddingResult> {
        if texts.is_empty() {
            return Ok(EmbeddingResult::new(vec![]));
        }

        tracing::debug!("Generating embeddings for {} texts", texts.len());

        let mut all_embeddings = Vec::with_capacity(texts.len());
        for batch in texts.chunks(self.config.batch_size) {
            all_embeddings.extend(self.embed_batch(batch).await?);
        }

        tracing::debug!("Generated {} embeddings", all_embeddings.len());
        Ok(EmbeddingResult::new(all_embeddings))
    }

    fn embedding_dimension(&self) -> usize {
        self.config.dimension
    }

    fn provider_name(&self) -> &str {
        "http"
    }

    fn model_id(&self) -> String {
        format!("{}:{}", self.config.model, self.config.dimension)
    }
}

/// Scale a vector to unit L2 norm. Zero vectors pass through unchanged.
fn normalize(mut vector: Vec<f32>) -> Vec<f32> {
    let norm: f32 = vector.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > 0.0 {
        for value in &mut vector {
            *value /= norm;
        }
    }
    vector
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_embedding_result() {
        let embeddings = vec![vec![0.1, 0.2, 0.3], vec![0.4, 0.5, 0.6]];
        let result = EmbeddingResult::new(embeddings);

        assert_eq!(result.len(), 2);
        assert_eq!(result.dimension, 3);
        assert!(!result.is_empty());
    }

    #[test]
    fn test_normalize_produces_unit_vectors() {
        let normalized = normalize(vec![3.0, 4.0]);
        assert!((normalized[0] - 0.6).abs() < 1e-6);
        assert!((normalized[1] - 0.8).abs() < 1e-6);

        let norm: f32 = normalized.iter().map(|x| x * x).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-6);

        // Zero vectors must not become NaN.
        let zero = normalize(vec![0.0, 0.0]);
        assert_eq!(zero, vec![0.0, 0.0]);
    }

    #[test]
    fn test_response_parsing_preserves_input_order() {
        // The API may return entries out of order; index wins.
        let raw = r#"{
            "data": [
                {"index": 1, "embedding": [0.0, 1.0]},
                {"index": 0, "embedding": [1.0, 0.0]}
            ]
        }"#;
        let parsed: EmbeddingsResponse = serde_json::from_str(raw).unwrap();
        assert_eq!(parsed.data.len(), 2);
        assert_eq!(parsed.data[0].index, 1);
        assert_eq!(parsed.data[1].embedding, vec![1.0, 0.0]);
    }

    #[test]
    fn test_provider_creation() {
        let config = EmbedConfig::new("http://localhost:9999/v1", "test-model", 4);
        let provider = HttpEmbedProvider::new(config).unwrap();

        assert_eq!(provider.provider_name(), "http");
        assert_eq!(provider.embedding_dimension(), 4);
        assert_eq!(provider.model_id(), "test-model:4");
    }

    #[test]
    fn test_provider_rejects_invalid_config() {
        let config = EmbedConfig::new("", "test-model", 4);
        assert!(HttpEmbedProvider::new(config).is_err());
    }

    #[tokio::test]
    async fn test_empty_input_short_circuits_without_a_request() {
        // Port 1 is never listening; an empty batch must not touch the wire.
        let config = EmbedConfig::new("http://127.0.0.1:1/v1", "test-model", 4);
        let provider = HttpEmbedProvider::new(config).unwrap();

        let result = provider.embed_texts(&[]).await.unwrap();
        assert!(result.is_empty());
        assert_eq!(result.dimension, 0);
    }

    #[test]
    fn test_request_body_shape() {
        let input = vec!["hello".to_string()];
        let request = EmbeddingsRequest {
            model: "test-model",
            input: &input,
        };
        let json = serde_json::to_value(&request).unwrap();
        assert_eq!(json["model"], "test-model");
        assert_eq!(json["input"][0], "hello");
    }
}
