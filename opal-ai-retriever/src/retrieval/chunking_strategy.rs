use opal_ai_context::{TextChunk, TextSplitter};
use serde::{Deserialize, Serialize};

/// Configuration for chunking documents.
///
/// These parameters are part of the index's identity: the fingerprint ledger
/// records them, and a mismatch at load time invalidates the cache (see
/// [`super::ledger::FingerprintLedger`]), because chunks produced under
/// different parameters are different index content.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChunkingConfig {
    /// Maximum size of each chunk in bytes.
    pub max_chunk_size: usize,
    /// Bytes of the previous chunk carried into the next one.
    pub overlap: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            max_chunk_size: 1000,
            overlap: 200,
        }
    }
}

impl ChunkingConfig {
    pub fn with_max_chunk_size(mut self, max_chunk_size: usize) -> Self {
        self.max_chunk_size = max_chunk_size;
        self
    }

    pub fn with_overlap(mut self, overlap: usize) -> Self {
        self.overlap = overlap;
        self
    }

    /// Whether the configuration can construct a splitter.
    pub fn is_valid(&self) -> bool {
        self.max_chunk_size > 0 && self.overlap < self.max_chunk_size
    }
}

/// Strategy for chunking documents - delegates entirely to opal-ai-context.
#[derive(Clone)]
pub struct ChunkingStrategy {
    config: ChunkingConfig,
    splitter: TextSplitter,
}

impl ChunkingStrategy {
    /// Create a new chunking strategy with the given configuration.
    ///
    /// # Panics
    /// Panics if the configuration is invalid; callers validate with
    /// [`ChunkingConfig::is_valid`] first.
    pub fn new(config: ChunkingConfig) -> Self {
        let splitter = TextSplitter::new(config.max_chunk_size, config.overlap);
        Self { config, splitter }
    }

    pub fn config(&self) -> &ChunkingConfig {
        &self.config
    }

    /// Chunk a document's text. Deterministic; empty text yields no chunks.
    pub fn chunk_text(&self, document_id: &str, text: &str) -> Vec<TextChunk> {
        let chunks = self.splitter.split(text);

        tracing::debug!(
            "Chunked {} into {} chunks (max size: {}, overlap: {})",
            document_id,
            chunks.len(),
            self.config.max_chunk_size,
            self.config.overlap
        );

        chunks
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chunking_strategy() {
        let config = ChunkingConfig::default().with_max_chunk_size(80).with_overlap(10);
        let strategy = ChunkingStrategy::new(config);

        let content = "# Heading\n\nA paragraph of text that talks about something.\n\n\
                       Another paragraph, long enough that the splitter has to cut \
                       the document into more than one chunk overall.";

        let chunks = strategy.chunk_text("doc.md", content);
        assert!(chunks.len() > 1);
        for (i, chunk) in chunks.iter().enumerate() {
            assert_eq!(chunk.sequence, i);
        }
    }

    #[test]
    fn empty_document_produces_no_chunks() {
        let strategy = ChunkingStrategy::new(ChunkingConfig::default());
        assert!(strategy.chunk_text("empty.md", "").is_empty());
    }

    #[test]
    fn config_validation() {
        assert!(ChunkingConfig::default().is_valid());
        assert!(!ChunkingConfig { max_chunk_size: 0, overlap: 0 }.is_valid());
        assert!(!ChunkingConfig { max_chunk_size: 100, overlap: 100 }.is_valid());
    }
}
