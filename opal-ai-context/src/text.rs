//! Deterministic splitting of document text into bounded, overlapping chunks.
//!
//! This module turns a document's raw text into the segments that get embedded
//! for semantic retrieval. Chunks are bounded in size so they fit a model's
//! input window, and consecutive chunks can share an overlapping tail so that
//! sentences straddling a boundary are still retrievable from either side.
//!
//! The splitter is a pure function of its inputs: the same text, chunk size,
//! overlap, and delimiter set always produce the same chunks, regardless of
//! process or call ordering. That determinism is load-bearing for the callers
//! that fingerprint documents and skip re-embedding unchanged ones.
//!
//! Splitting is recursive: the text is first divided at the most significant
//! delimiter (e.g. a heading or a paragraph break), and any piece still larger
//! than the chunk budget is re-divided with the next delimiter down, ending at
//! single characters as the final fallback. The resulting atomic segments are
//! then packed greedily into chunks of at most `max_chunk_size` bytes.
//!
//! # Usage
//!
//! ```
//! use opal_ai_context::TextSplitter;
//!
//! let splitter = TextSplitter::new(40, 0);
//! let chunks = splitter.split("First paragraph.\n\nSecond paragraph, somewhat longer.");
//!
//! assert!(!chunks.is_empty());
//! // With zero overlap, concatenating the chunks reconstructs the input.
//! let rebuilt: String = chunks.iter().map(|c| c.text.as_str()).collect();
//! assert_eq!(rebuilt, "First paragraph.\n\nSecond paragraph, somewhat longer.");
//! ```

use regex::Regex;
use serde::Serialize;
use std::ops::Range;

/// Default delimiter patterns, ordered from most to least significant.
///
/// The hierarchy is tuned for prose and Markdown, the dominant content in the
/// corpora this workspace indexes:
///
/// - `^\s*#{1,6}\s+.*$`: Markdown headings
/// - ```` ``` ````: code block fences
/// - `\n\n`: paragraph breaks
/// - `\n`: line breaks
/// - ` `: spaces, the most granular delimiter
pub const DEFAULT_DELIMITERS: &[&str] = &[
    r"(?m)^\s*#{1,6}\s+.*$", // Headings (e.g. # Heading, ## Subheading)
    r"```",                  // Code block fences
    r"\n\n",                 // Paragraphs
    r"\n",                   // Line breaks
    r" ",                    // Spaces
];

/// A single bounded segment of a document's text.
///
/// Chunks are numbered in document order starting at 0. When the splitter is
/// configured with a non-zero overlap, each chunk after the first begins with
/// the tail of its predecessor, so `text` fields of adjacent chunks share
/// content at the boundary.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TextChunk {
    /// Position of this chunk within the document (0-indexed).
    pub sequence: usize,
    /// The chunk's text, including any overlap carried from the previous chunk.
    pub text: String,
}

/// Splits text into chunks of bounded size with configurable overlap.
///
/// See the [module documentation](self) for the splitting algorithm. The
/// splitter owns its compiled delimiter set, so construct it once and reuse it
/// across documents.
#[derive(Clone)]
pub struct TextSplitter {
    max_chunk_size: usize,
    overlap: usize,
    delimiters: Vec<Regex>,
}

impl TextSplitter {
    /// Creates a splitter with the default delimiter hierarchy.
    ///
    /// # Arguments
    /// * `max_chunk_size` - Maximum chunk length in bytes, excluding overlap
    /// * `overlap` - How many bytes of the previous chunk to carry into the
    ///   next one (0 disables overlap)
    ///
    /// # Panics
    /// Panics if `max_chunk_size` is 0 or if `overlap >= max_chunk_size`.
    pub fn new(max_chunk_size: usize, overlap: usize) -> Self {
        Self::with_delimiters(max_chunk_size, overlap, DEFAULT_DELIMITERS)
    }

    /// Creates a splitter with a custom delimiter hierarchy.
    ///
    /// Delimiters are applied in order, most significant first. Each pattern
    /// is a regular expression; a segment that a pattern cannot shrink below
    /// `max_chunk_size` falls through to the next pattern, and finally to a
    /// hard character split.
    ///
    /// # Panics
    /// Panics if any pattern is not a valid regular expression, if
    /// `max_chunk_size` is 0, or if `overlap >= max_chunk_size`.
    pub fn with_delimiters(max_chunk_size: usize, overlap: usize, patterns: &[&str]) -> Self {
        assert!(max_chunk_size > 0, "max_chunk_size must be positive");
        assert!(
            overlap < max_chunk_size,
            "overlap must be smaller than max_chunk_size"
        );

        let delimiters = patterns
            .iter()
            .map(|&pattern| Regex::new(pattern).unwrap())
            .collect();

        TextSplitter {
            max_chunk_size,
            overlap,
            delimiters,
        }
    }

    /// The configured maximum chunk size in bytes.
    pub fn max_chunk_size(&self) -> usize {
        self.max_chunk_size
    }

    /// The configured overlap in bytes.
    pub fn overlap(&self) -> usize {
        self.overlap
    }

    /// Splits `text` into sequenced chunks.
    ///
    /// Empty input produces an empty vector. With `overlap == 0` the chunk
    /// texts concatenate back to the original input exactly; with a non-zero
    /// overlap each chunk after the first is prefixed with up to `overlap`
    /// bytes from the end of its predecessor (aligned to a character
    /// boundary, so multi-byte characters are never torn).
    pub fn split(&self, text: &str) -> Vec<TextChunk> {
        if text.is_empty() {
            return Vec::new();
        }

        let segments = self.split_recursively(text, 0, 0);

        // Pack segments greedily into windows of at most max_chunk_size.
        let mut windows: Vec<Range<usize>> = Vec::new();
        let mut start = 0;
        let mut end = 0;
        for segment in segments {
            let segment_len = segment.end - segment.start;
            if end - start + segment_len > self.max_chunk_size && start != end {
                windows.push(start..end);
                start = segment.start;
            } else if start == end {
                start = segment.start;
            }
            end = segment.end;
        }
        if start != end {
            windows.push(start..end);
        }

        let mut chunks: Vec<TextChunk> = Vec::with_capacity(windows.len());
        for window in windows {
            let mut chunk_text = String::new();
            if self.overlap > 0 {
                if let Some(previous) = chunks.last() {
                    chunk_text.push_str(overlap_tail(&previous.text, self.overlap));
                }
            }
            chunk_text.push_str(&text[window]);
            chunks.push(TextChunk {
                sequence: chunks.len(),
                text: chunk_text,
            });
        }

        chunks
    }

    // Recursively splits `text` into atomic byte ranges, each at most
    // max_chunk_size long. Ranges are relative to the original input; `offset`
    // is the starting position of `text` within it.
    fn split_recursively(
        &self,
        text: &str,
        delimiter_idx: usize,
        offset: usize,
    ) -> Vec<Range<usize>> {
        let mut segments: Vec<Range<usize>> = Vec::new();

        if text.is_empty() {
            return segments;
        }

        // Already small enough: one atomic segment.
        if text.len() <= self.max_chunk_size {
            segments.push(offset..offset + text.len());
            return segments;
        }

        // Out of delimiters: hard split on character boundaries.
        if delimiter_idx >= self.delimiters.len() {
            let mut local_start = 0;
            while local_start < text.len() {
                let mut local_end = (local_start + self.max_chunk_size).min(text.len());
                while !text.is_char_boundary(local_end) {
                    local_end -= 1;
                }
                if local_end == local_start {
                    // A single character wider than the budget: emit it whole
                    // rather than looping forever.
                    local_end = local_start
                        + text[local_start..]
                            .chars()
                            .next()
                            .map_or(1, char::len_utf8);
                }
                segments.push(offset + local_start..offset + local_end);
                local_start = local_end;
            }
            return segments;
        }

        let delimiter = &self.delimiters[delimiter_idx];
        let mut local_start = 0;

        for found in delimiter.find_iter(text) {
            if found.start() > local_start {
                segments.extend(self.split_recursively(
                    &text[local_start..found.start()],
                    delimiter_idx + 1,
                    offset + local_start,
                ));
            }
            // The delimiter itself is kept as a segment so nothing is lost.
            segments.push(offset + found.start()..offset + found.end());
            local_start = found.end();
        }

        if local_start < text.len() {
            segments.extend(self.split_recursively(
                &text[local_start..],
                delimiter_idx + 1,
                offset + local_start,
            ));
        }

        segments
    }
}

/// Returns the last `overlap` bytes of `text`, aligned forward to a character
/// boundary so the slice is always valid UTF-8.
fn overlap_tail(text: &str, overlap: usize) -> &str {
    if overlap >= text.len() {
        return text;
    }
    let mut start = text.len() - overlap;
    while !text.is_char_boundary(start) {
        start += 1;
    }
    &text[start..]
}
