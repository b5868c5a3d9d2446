//! Document sources and the default chunker.

use std::collections::HashMap;
use std::sync::RwLock;

use serde::{Deserialize, Serialize};

use crate::error::{ExtractionError, ValidationError};

/// One span of a document, with character offsets into the full text.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Chunk {
    /// Identifier unique within the document.
    pub id: String,
    /// Position in the document's chunk sequence.
    pub index: usize,
    /// Chunk text.
    pub text: String,
    /// First character (inclusive).
    pub start: usize,
    /// Last character (exclusive).
    pub end: usize,
}

impl Chunk {
    /// Builds a chunk whose id is `{document_id}#{index}`.
    #[must_use]
    pub fn new(document_id: &str, index: usize, text: impl Into<String>, start: usize, end: usize) -> Self {
        Self {
            id: format!("{document_id}#{index}"),
            index,
            text: text.into(),
            start,
            end,
        }
    }
}

/// Yields the ordered chunks of a document.
pub trait DocumentSource: Send + Sync {
    /// Returns every chunk of the document in order.
    ///
    /// # Errors
    /// `Source` if the document is unknown or cannot be read.
    fn chunks(&self, document_id: &str) -> Result<Vec<Chunk>, ExtractionError>;
}

/// Overlapping character windows that prefer paragraph and sentence breaks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TextChunker {
    size: usize,
    overlap: usize,
}

const SENTENCE_BREAKS: [&str; 3] = [". ", "! ", "? "];

impl TextChunker {
    /// Creates a chunker.
    ///
    /// # Errors
    /// `InvalidConfig` if `size` is zero or `overlap >= size`.
    pub fn new(size: usize, overlap: usize) -> Result<Self, ValidationError> {
        if size == 0 || overlap >= size {
            return Err(ValidationError::InvalidConfig {
                reason: format!("chunk size {size} must be > 0 and exceed overlap {overlap}"),
            });
        }
        Ok(Self { size, overlap })
    }

    /// Splits `text` into chunks.
    ///
    /// A window ends after the last paragraph break in its second half,
    /// else after the last sentence break there, else at `size` characters.
    #[must_use]
    pub fn split(&self, document_id: &str, text: &str) -> Vec<Chunk> {
        let chars: Vec<char> = text.chars().collect();
        let n = chars.len();
        let mut chunks = Vec::new();
        let mut start = 0usize;

        while start < n {
            let mut end = (start + self.size).min(n);
            if end < n {
                if let Some(brk) = self.break_point(&chars[start..end]) {
                    end = start + brk;
                }
            }
            let body: String = chars[start..end].iter().collect();
            if !body.trim().is_empty() {
                chunks.push(Chunk::new(document_id, chunks.len(), body, start, end));
            }
            if end == n {
                break;
            }
            let next = end.saturating_sub(self.overlap);
            start = if next > start { next } else { end };
        }
        chunks
    }

    fn break_point(&self, window: &[char]) -> Option<usize> {
        let half = self.size / 2;
        let found = |pattern: &str| {
            let pat: Vec<char> = pattern.chars().collect();
            window
                .windows(pat.len())
                .rposition(|w| w == pat.as_slice())
                .filter(|&pos| pos > half)
                .map(|pos| pos + pat.len())
        };
        found("\n\n").or_else(|| SENTENCE_BREAKS.iter().filter_map(|p| found(p)).max())
    }
}

/// Document source over texts and pre-chunked documents held in memory.
#[derive(Debug)]
pub struct InMemoryDocumentSource {
    chunker: TextChunker,
    documents: RwLock<HashMap<String, Vec<Chunk>>>,
}

impl InMemoryDocumentSource {
    /// Creates an empty source that splits texts with `chunker`.
    #[must_use]
    pub fn new(chunker: TextChunker) -> Self {
        Self {
            chunker,
            documents: RwLock::new(HashMap::new()),
        }
    }

    /// Stores a document's text, chunked now. Returns the chunk count.
    ///
    /// # Errors
    /// `Source` on a poisoned lock.
    pub fn insert_text(&self, document_id: &str, text: &str) -> Result<usize, ExtractionError> {
        let chunks = self.chunker.split(document_id, text);
        let count = chunks.len();
        self.insert_chunks(document_id, chunks)?;
        Ok(count)
    }

    /// Stores pre-split chunks for a document.
    ///
    /// # Errors
    /// `Source` on a poisoned lock.
    pub fn insert_chunks(&self, document_id: &str, chunks: Vec<Chunk>) -> Result<(), ExtractionError> {
        self.documents
            .write()
            .map_err(|_| poisoned(document_id))?
            .insert(document_id.to_string(), chunks);
        Ok(())
    }
}

impl DocumentSource for InMemoryDocumentSource {
    fn chunks(&self, document_id: &str) -> Result<Vec<Chunk>, ExtractionError> {
        self.documents
            .read()
            .map_err(|_| poisoned(document_id))?
            .get(document_id)
            .cloned()
            .ok_or_else(|| ExtractionError::Source {
                document_id: document_id.to_string(),
                message: "unknown document".to_string(),
            })
    }
}

fn poisoned(document_id: &str) -> ExtractionError {
    ExtractionError::Source {
        document_id: document_id.to_string(),
        message: "document lock poisoned".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn covers(text: &str, chunks: &[Chunk]) {
        let chars: Vec<char> = text.chars().collect();
        assert_eq!(chunks.first().map(|c| c.start), Some(0));
        assert_eq!(chunks.last().map(|c| c.end), Some(chars.len()));
        for pair in chunks.windows(2) {
            assert!(pair[1].start <= pair[0].end, "gap between chunks");
            assert!(pair[1].start > pair[0].start, "no progress");
        }
        for c in chunks {
            let expected: String = chars[c.start..c.end].iter().collect();
            assert_eq!(c.text, expected);
        }
    }

    #[test]
    fn short_text_is_one_chunk() {
        let chunker = TextChunker::new(100, 20).unwrap();
        let chunks = chunker.split("doc", "Just one sentence.");
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].id, "doc#0");
        assert_eq!((chunks[0].start, chunks[0].end), (0, 18));
    }

    #[test]
    fn prefers_paragraph_breaks() {
        let text = format!("{}\n\n{}", "a".repeat(70), "b".repeat(70));
        let chunker = TextChunker::new(100, 10).unwrap();
        let chunks = chunker.split("doc", &text);
        assert_eq!(chunks[0].end, 72);
        assert!(chunks[0].text.ends_with("\n\n"));
        covers(&text, &chunks);
    }

    #[test]
    fn falls_back_to_sentence_breaks() {
        let text = format!("{}. {}! {}", "a".repeat(55), "b".repeat(20), "c".repeat(80));
        let chunker = TextChunker::new(100, 10).unwrap();
        let chunks = chunker.split("doc", &text);
        assert_eq!(chunks[0].end, 79);
        covers(&text, &chunks);
    }

    #[test]
    fn ignores_breaks_in_first_half() {
        let text = format!("{}. {}", "a".repeat(10), "b".repeat(200));
        let chunker = TextChunker::new(100, 10).unwrap();
        let chunks = chunker.split("doc", &text);
        assert_eq!(chunks[0].end, 100);
        covers(&text, &chunks);
    }

    #[test]
    fn offsets_count_characters() {
        let text = "é".repeat(250);
        let chunker = TextChunker::new(100, 30).unwrap();
        let chunks = chunker.split("doc", &text);
        assert_eq!(chunks.len(), 4);
        covers(&text, &chunks);
    }

    #[test]
    fn rejects_overlap_at_least_size() {
        assert!(TextChunker::new(10, 10).is_err());
        assert!(TextChunker::new(0, 0).is_err());
    }

    #[test]
    fn in_memory_source_round_trip() {
        let source = InMemoryDocumentSource::new(TextChunker::new(50, 5).unwrap());
        let count = source.insert_text("a", &"word ".repeat(40)).unwrap();
        assert_eq!(source.chunks("a").unwrap().len(), count);
        assert!(matches!(
            source.chunks("missing"),
            Err(ExtractionError::Source { .. })
        ));
    }
}
