//! Boundary-aware text chunking with overlap
//!
//! Text is first cut into units at paragraph breaks, oversized paragraphs at
//! sentence ends, and oversized sentences at hard character offsets. Units are
//! then packed greedily into spans of at most `size` characters. Spans
//! partition the input exactly; each emitted chunk is its span prefixed with up
//! to `overlap` characters of the text that precedes it.

use crate::error::ChunkingError;
use regex::Regex;
use std::sync::LazyLock;

static PARAGRAPH_BREAK: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\n[ \t\r]*\n\s*").expect("paragraph break pattern is valid")
});

static SENTENCE_END: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"[.!?]+["')\]]*\s+"#).expect("sentence end pattern is valid")
});

/// One chunk of a document
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextChunk {
    /// Position within the document, starting at 0
    pub index: usize,
    /// Overlap prefix followed by the chunk's own span
    pub text: String,
    /// Byte length of the overlap prefix at the start of `text`
    pub overlap_len: usize,
}

impl TextChunk {
    /// The part of the chunk not repeated from its predecessor
    pub fn body(&self) -> &str {
        &self.text[self.overlap_len..]
    }

    /// Whitespace-delimited word count of the full chunk text
    pub fn token_count(&self) -> usize {
        self.text.split_whitespace().count()
    }
}

/// Splits text into bounded, overlapping chunks
#[derive(Debug, Clone, Copy)]
pub struct Chunker {
    size: usize,
    overlap: usize,
}

impl Chunker {
    /// `size` and `overlap` are measured in characters; overlap must be smaller than size
    pub fn new(size: usize, overlap: usize) -> Result<Self, ChunkingError> {
        if size == 0 {
            return Err(ChunkingError::InvalidChunkSize(
                "chunk size must be greater than 0".to_string(),
            ));
        }
        if overlap >= size {
            return Err(ChunkingError::InvalidOverlap { size, overlap });
        }
        Ok(Self { size, overlap })
    }

    /// Chunk `text`; empty input yields no chunks
    pub fn chunk(&self, text: &str) -> Vec<TextChunk> {
        if text.is_empty() {
            return Vec::new();
        }

        self.spans(text)
            .into_iter()
            .enumerate()
            .map(|(index, (start, end))| {
                let prefix_start = overlap_start(text, start, self.overlap);
                TextChunk {
                    index,
                    text: text[prefix_start..end].to_string(),
                    overlap_len: start - prefix_start,
                }
            })
            .collect()
    }

    /// Byte ranges that partition `text`, each at most `size` characters
    fn spans(&self, text: &str) -> Vec<(usize, usize)> {
        let mut units = Vec::new();
        for (p_start, p_end) in split_after(text, 0, text.len(), &PARAGRAPH_BREAK) {
            if char_len(&text[p_start..p_end]) <= self.size {
                units.push((p_start, p_end));
                continue;
            }
            for (s_start, s_end) in split_after(text, p_start, p_end, &SENTENCE_END) {
                if char_len(&text[s_start..s_end]) <= self.size {
                    units.push((s_start, s_end));
                } else {
                    units.extend(hard_cut(text, s_start, s_end, self.size));
                }
            }
        }

        let mut spans = Vec::new();
        let mut current: Option<(usize, usize, usize)> = None; // (start, end, chars)
        for (start, end) in units {
            let len = char_len(&text[start..end]);
            current = match current {
                Some((c_start, _, c_len)) if c_len + len <= self.size => {
                    Some((c_start, end, c_len + len))
                }
                Some((c_start, c_end, _)) => {
                    spans.push((c_start, c_end));
                    Some((start, end, len))
                }
                None => Some((start, end, len)),
            };
        }
        if let Some((start, end, _)) = current {
            spans.push((start, end));
        }
        spans
    }
}

/// Chunk `text` with the given size and overlap
pub fn chunk_text(text: &str, size: usize, overlap: usize) -> Result<Vec<TextChunk>, ChunkingError> {
    Ok(Chunker::new(size, overlap)?.chunk(text))
}

/// Concatenate chunk bodies back into the source text
pub fn reassemble(chunks: &[TextChunk]) -> String {
    chunks.iter().map(TextChunk::body).collect()
}

fn char_len(s: &str) -> usize {
    s.chars().count()
}

/// Split `text[start..end]` after every match of `boundary`
fn split_after(text: &str, start: usize, end: usize, boundary: &Regex) -> Vec<(usize, usize)> {
    let slice = &text[start..end];
    let mut pieces = Vec::new();
    let mut cursor = 0;
    for m in boundary.find_iter(slice) {
        if m.end() > cursor {
            pieces.push((start + cursor, start + m.end()));
            cursor = m.end();
        }
    }
    if cursor < slice.len() {
        pieces.push((start + cursor, end));
    }
    pieces
}

/// Cut `text[start..end]` every `size` characters
fn hard_cut(text: &str, start: usize, end: usize, size: usize) -> Vec<(usize, usize)> {
    let mut pieces = Vec::new();
    let mut piece_start = start;
    let mut count = 0;
    for (offset, _) in text[start..end].char_indices() {
        if count == size {
            pieces.push((piece_start, start + offset));
            piece_start = start + offset;
            count = 0;
        }
        count += 1;
    }
    if piece_start < end {
        pieces.push((piece_start, end));
    }
    pieces
}

/// Byte offset where the overlap prefix for a span starting at `start` begins
fn overlap_start(text: &str, start: usize, overlap: usize) -> usize {
    if overlap == 0 || start == 0 {
        return start;
    }
    text[..start]
        .char_indices()
        .rev()
        .nth(overlap - 1)
        .map(|(idx, _)| idx)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_invalid_parameters() {
        assert!(matches!(
            Chunker::new(0, 0),
            Err(ChunkingError::InvalidChunkSize(_))
        ));
        assert!(matches!(
            Chunker::new(10, 10),
            Err(ChunkingError::InvalidOverlap { size: 10, overlap: 10 })
        ));
    }

    #[test]
    fn test_empty_text_has_no_chunks() {
        assert!(chunk_text("", 100, 10).unwrap().is_empty());
    }

    #[test]
    fn test_short_text_is_single_chunk() {
        let chunks = chunk_text("Employees get 20 days of vacation.", 100, 10).unwrap();
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].index, 0);
        assert_eq!(chunks[0].overlap_len, 0);
        assert_eq!(chunks[0].token_count(), 6);
    }

    #[test]
    fn test_splits_on_paragraphs() {
        let text = "First paragraph here.\n\nSecond paragraph here.\n\nThird one.";
        let chunks = chunk_text(text, 30, 0).unwrap();
        assert_eq!(chunks.len(), 3);
        assert_eq!(chunks[0].text, "First paragraph here.\n\n");
        assert_eq!(chunks[1].text, "Second paragraph here.\n\n");
        assert_eq!(chunks[2].text, "Third one.");
    }

    #[test]
    fn test_packs_small_paragraphs_together() {
        let text = "One.\n\nTwo.\n\nThree.";
        let chunks = chunk_text(text, 100, 0).unwrap();
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].text, text);
    }

    #[test]
    fn test_splits_long_paragraph_on_sentences() {
        let text = "Alpha beta gamma. Delta epsilon zeta. Eta theta iota.";
        let chunks = chunk_text(text, 20, 0).unwrap();
        assert_eq!(chunks[0].text, "Alpha beta gamma. ");
        assert_eq!(chunks[1].text, "Delta epsilon zeta. ");
        assert_eq!(chunks[2].text, "Eta theta iota.");
    }

    #[test]
    fn test_hard_cuts_unbroken_text() {
        let text = "x".repeat(25);
        let chunks = chunk_text(&text, 10, 0).unwrap();
        let lens: Vec<usize> = chunks.iter().map(|c| c.text.len()).collect();
        assert_eq!(lens, vec![10, 10, 5]);
    }

    #[test]
    fn test_overlap_prefix() {
        let text = "abcdefghij".repeat(3);
        let chunks = chunk_text(&text, 10, 3).unwrap();
        assert_eq!(chunks.len(), 3);
        assert_eq!(chunks[1].text, "hijabcdefghij");
        assert_eq!(chunks[1].overlap_len, 3);
        assert_eq!(chunks[1].body(), "abcdefghij");
        assert_eq!(reassemble(&chunks), text);
    }

    #[test]
    fn test_multibyte_boundaries() {
        let text = "héllo wörld ünïcödé ".repeat(10);
        let chunks = chunk_text(&text, 7, 2).unwrap();
        assert!(chunks.iter().all(|c| c.body().chars().count() <= 7));
        assert_eq!(reassemble(&chunks), text);
    }

    #[test]
    fn test_deterministic() {
        let text = "Some text. More text.\n\nAnother paragraph!";
        assert_eq!(
            chunk_text(text, 12, 4).unwrap(),
            chunk_text(text, 12, 4).unwrap()
        );
    }

    proptest! {
        #[test]
        fn prop_reassembly_is_lossless(text in "\\PC*", size in 1usize..64, overlap_frac in 0usize..100) {
            let overlap = (size - 1) * overlap_frac / 100;
            let chunks = chunk_text(&text, size, overlap).unwrap();
            prop_assert_eq!(reassemble(&chunks), text);
        }

        #[test]
        fn prop_chunks_respect_bounds(text in "[a-z .!?\n]{0,400}", size in 1usize..50) {
            let overlap = size / 3;
            let chunks = chunk_text(&text, size, overlap).unwrap();
            for (i, chunk) in chunks.iter().enumerate() {
                prop_assert_eq!(chunk.index, i);
                prop_assert!(!chunk.body().is_empty());
                prop_assert!(chunk.body().chars().count() <= size);
                prop_assert!(chunk.text[..chunk.overlap_len].chars().count() <= overlap);
            }
        }
    }
}
