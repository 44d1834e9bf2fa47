//! Turning raw candidates into a bounded generation context

use super::retriever::Candidate;
use crate::types::Chunk;
use chrono::{DateTime, Utc};
use std::cmp::Ordering;
use std::collections::HashMap;

/// A chunk selected for the generation context
#[derive(Debug, Clone, PartialEq)]
pub struct RankedChunk {
    pub chunk_id: String,
    pub file_id: String,
    pub filename: String,
    pub relative_path: String,
    pub chunk_index: usize,
    pub score: f32,
    pub last_modified: DateTime<Utc>,
    /// Chunk text without the overlap repeated from its predecessor, cut at
    /// the tail if it alone exceeded the budget
    pub text: String,
    pub truncated: bool,
}

/// Ranked chunks, best first, and their combined length in characters
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RankedContext {
    pub chunks: Vec<RankedChunk>,
    pub total_chars: usize,
}

impl RankedContext {
    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }

    pub fn top_score(&self) -> Option<f32> {
        self.chunks.first().map(|c| c.score)
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ContextRanker {
    pub min_score: f32,
    pub max_sources: usize,
    pub max_context_chars: usize,
}

impl ContextRanker {
    pub fn new(min_score: f32, max_sources: usize, max_context_chars: usize) -> Self {
        Self {
            min_score,
            max_sources,
            max_context_chars,
        }
    }

    /// Deduplicate, filter, order and budget `candidates`
    ///
    /// Duplicates keep their best score. Ties on score go to the more recently
    /// modified file, then the lower chunk index, then the chunk id. The budget
    /// counts chunk text without its overlap prefix. A chunk that does not fit
    /// is skipped so a smaller, lower ranked one can still take the space; only
    /// a best chunk that exceeds the budget on its own is cut.
    pub fn rank(&self, candidates: Vec<Candidate>) -> RankedContext {
        let mut best: HashMap<String, Candidate> = HashMap::new();
        for candidate in candidates {
            match best.get(&candidate.chunk.id) {
                Some(existing) if existing.score >= candidate.score => {}
                _ => {
                    best.insert(candidate.chunk.id.clone(), candidate);
                }
            }
        }

        let mut kept: Vec<Candidate> = best
            .into_values()
            .filter(|c| c.score >= self.min_score)
            .collect();
        kept.sort_by(compare_candidates);

        let mut context = RankedContext::default();
        for candidate in kept {
            if context.chunks.len() >= self.max_sources {
                break;
            }
            let body = body_of(&candidate.chunk);
            let chars = body.chars().count();
            let remaining = self.max_context_chars - context.total_chars;

            if chars <= remaining {
                context.total_chars += chars;
                context.chunks.push(to_ranked(candidate, body, false));
            } else if context.chunks.is_empty() {
                let cut = body.chars().take(remaining).collect();
                context.total_chars = remaining;
                context.chunks.push(to_ranked(candidate, cut, true));
            }
        }
        context
    }
}

fn compare_candidates(a: &Candidate, b: &Candidate) -> Ordering {
    b.score
        .total_cmp(&a.score)
        .then_with(|| b.file.last_modified.cmp(&a.file.last_modified))
        .then_with(|| a.chunk.chunk_index.cmp(&b.chunk.chunk_index))
        .then_with(|| a.chunk.id.cmp(&b.chunk.id))
}

/// Chunk text without the overlap repeated from its predecessor
fn body_of(chunk: &Chunk) -> String {
    chunk
        .text
        .get(chunk.overlap_len..)
        .unwrap_or(chunk.text.as_str())
        .to_string()
}

fn to_ranked(candidate: Candidate, text: String, truncated: bool) -> RankedChunk {
    let Candidate { chunk, file, score } = candidate;
    RankedChunk {
        chunk_id: chunk.id,
        file_id: file.id.clone(),
        filename: file.filename().to_string(),
        relative_path: file.relative_path.clone(),
        chunk_index: chunk.chunk_index,
        score,
        last_modified: file.last_modified,
        text,
        truncated,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{FileRecord, FileSyncState, TenantId};
    use chrono::Duration;

    fn candidate(id: &str, index: usize, score: f32, text: &str, age_days: i64) -> Candidate {
        let file_id = format!("file-{}", id.split('-').next().unwrap_or(id));
        Candidate {
            chunk: Chunk {
                id: id.to_string(),
                file_id: file_id.clone(),
                chunk_index: index,
                text: text.to_string(),
                token_count: 1,
                vector_ref: id.to_string(),
                overlap_len: 0,
            },
            file: FileRecord {
                id: file_id,
                tenant_id: TenantId::parse("acme").unwrap(),
                relative_path: format!("docs/{}.txt", id),
                content_hash: "h".to_string(),
                size: 1,
                last_modified: Utc::now() - Duration::days(age_days),
                sync_state: FileSyncState::Synced,
                error_message: None,
                chunk_count: 1,
                synced_at: None,
                deleted_at: None,
            },
            score,
        }
    }

    fn ids(context: &RankedContext) -> Vec<&str> {
        context.chunks.iter().map(|c| c.chunk_id.as_str()).collect()
    }

    #[test]
    fn test_dedupe_keeps_highest_score() {
        let ranker = ContextRanker::new(0.0, 5, 1000);
        let context = ranker.rank(vec![
            candidate("a", 0, 0.4, "alpha", 0),
            candidate("a", 0, 0.9, "alpha", 0),
            candidate("b", 0, 0.5, "beta", 0),
        ]);
        assert_eq!(ids(&context), vec!["a", "b"]);
        assert_eq!(context.chunks[0].score, 0.9);
    }

    #[test]
    fn test_min_score_filter() {
        let ranker = ContextRanker::new(0.5, 5, 1000);
        let context = ranker.rank(vec![
            candidate("a", 0, 0.49, "alpha", 0),
            candidate("b", 0, 0.5, "beta", 0),
        ]);
        assert_eq!(ids(&context), vec!["b"]);
    }

    #[test]
    fn test_tie_breaks() {
        let ranker = ContextRanker::new(0.0, 10, 1000);
        let context = ranker.rank(vec![
            candidate("old", 0, 0.7, "x", 10),
            candidate("new-1", 1, 0.7, "x", 1),
            candidate("new-0", 0, 0.7, "x", 1),
            candidate("top", 3, 0.8, "x", 30),
        ]);
        assert_eq!(ids(&context)[0], "top");
        assert_eq!(ids(&context)[3], "old");
    }

    #[test]
    fn test_same_file_orders_by_chunk_index() {
        let now = Utc::now();
        let mut first = candidate("f-1", 1, 0.6, "one", 0);
        let mut second = candidate("f-0", 0, 0.6, "zero", 0);
        first.file.last_modified = now;
        second.file.last_modified = now;

        let context = ContextRanker::new(0.0, 5, 1000).rank(vec![first, second]);
        assert_eq!(ids(&context), vec!["f-0", "f-1"]);
    }

    #[test]
    fn test_max_sources() {
        let ranker = ContextRanker::new(0.0, 2, 1000);
        let context = ranker.rank(vec![
            candidate("a", 0, 0.9, "a", 0),
            candidate("b", 0, 0.8, "b", 0),
            candidate("c", 0, 0.7, "c", 0),
        ]);
        assert_eq!(context.chunks.len(), 2);
    }

    #[test]
    fn test_budget_keeps_whole_chunks() {
        let ranker = ContextRanker::new(0.0, 5, 10);
        let context = ranker.rank(vec![
            candidate("a", 0, 0.9, "123456", 0),
            candidate("b", 0, 0.8, "123456", 0),
        ]);
        assert_eq!(ids(&context), vec!["a"]);
        assert_eq!(context.total_chars, 6);
        assert!(!context.chunks[0].truncated);
    }

    #[test]
    fn test_oversized_first_chunk_is_cut() {
        let ranker = ContextRanker::new(0.0, 5, 4);
        let context = ranker.rank(vec![candidate("a", 0, 0.9, "héllo wörld", 0)]);
        assert_eq!(context.chunks[0].text, "héll");
        assert!(context.chunks[0].truncated);
        assert_eq!(context.total_chars, 4);
    }

    #[test]
    fn test_empty_input() {
        let context = ContextRanker::new(0.2, 5, 100).rank(Vec::new());
        assert!(context.is_empty());
        assert_eq!(context.top_score(), None);
    }

    #[test]
    fn test_context_text_skips_overlap() {
        let mut c = candidate("a", 1, 0.9, "tail. Fresh text", 0);
        c.chunk.overlap_len = "tail. ".len();
        let context = ContextRanker::new(0.0, 5, 100).rank(vec![c]);
        assert_eq!(context.chunks[0].text, "Fresh text");
        assert_eq!(context.chunks[0].filename, "a.txt");
        assert_eq!(context.total_chars, 10);
    }

    #[test]
    fn test_overlap_does_not_count_against_budget() {
        let mut c = candidate("a", 1, 0.9, "tail. Fresh text", 0);
        c.chunk.overlap_len = "tail. ".len();
        let context = ContextRanker::new(0.0, 5, 10).rank(vec![c]);
        assert_eq!(context.chunks[0].text, "Fresh text");
        assert!(!context.chunks[0].truncated);
    }

    #[test]
    fn test_smaller_chunk_fills_space_left_by_skipped_one() {
        let ranker = ContextRanker::new(0.0, 5, 10);
        let context = ranker.rank(vec![
            candidate("a", 0, 0.9, "123456", 0),
            candidate("b", 0, 0.8, "12345678", 0),
            candidate("c", 0, 0.7, "1234", 0),
        ]);
        assert_eq!(ids(&context), vec!["a", "c"]);
        assert_eq!(context.total_chars, 10);
    }

    #[test]
    fn test_skipped_chunks_do_not_use_up_sources() {
        let ranker = ContextRanker::new(0.0, 2, 10);
        let context = ranker.rank(vec![
            candidate("a", 0, 0.9, "123456", 0),
            candidate("b", 0, 0.8, "12345678", 0),
            candidate("c", 0, 0.7, "12", 0),
            candidate("d", 0, 0.6, "1", 0),
        ]);
        assert_eq!(ids(&context), vec!["a", "c"]);
    }
}
