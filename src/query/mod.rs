//! Question answering over a tenant's synced documents
//!
//! [`QueryEngine::run`] validates the request, then goes
//! embed → retrieve → rank → generate and assembles a [`QueryResult`].

use crate::config::QueryConfig;
use crate::error::{RagResult, ValidationError};
use crate::generation::AnswerGenerator;
use crate::retrieval::{ContextRanker, RankedChunk, Retriever};
use crate::types::{QueryResult, SourceRef, TenantId};
use std::time::Instant;

/// Caller-facing query parameters; `None` means use the configured default
#[derive(Debug, Clone, PartialEq)]
pub struct QueryRequest {
    pub query_text: String,
    pub max_sources: Option<usize>,
    pub min_score: Option<f32>,
}

impl QueryRequest {
    pub fn new(query_text: impl Into<String>) -> Self {
        Self {
            query_text: query_text.into(),
            max_sources: None,
            min_score: None,
        }
    }

    pub fn with_max_sources(mut self, max_sources: usize) -> Self {
        self.max_sources = Some(max_sources);
        self
    }

    pub fn with_min_score(mut self, min_score: f32) -> Self {
        self.min_score = Some(min_score);
        self
    }

    /// Check bounds and fill in defaults
    pub fn validate(&self, config: &QueryConfig) -> Result<ValidatedQuery, ValidationError> {
        let text = self.query_text.trim();
        if text.is_empty() {
            return Err(ValidationError::Empty("query".to_string()));
        }

        let chars = text.chars().count();
        if chars < config.min_query_chars || chars > config.max_query_chars {
            return Err(ValidationError::ConstraintViolation {
                field: "query".to_string(),
                constraint: format!(
                    "between {} and {} characters",
                    config.min_query_chars, config.max_query_chars
                ),
                actual: chars.to_string(),
            });
        }

        let max_sources = self.max_sources.unwrap_or(config.default_max_sources);
        if max_sources == 0 || max_sources > config.max_sources_limit {
            return Err(ValidationError::ConstraintViolation {
                field: "max_sources".to_string(),
                constraint: format!("between 1 and {}", config.max_sources_limit),
                actual: max_sources.to_string(),
            });
        }

        let min_score = self.min_score.unwrap_or(config.min_score);
        if !(0.0..=1.0).contains(&min_score) {
            return Err(ValidationError::ConstraintViolation {
                field: "min_score".to_string(),
                constraint: "between 0.0 and 1.0".to_string(),
                actual: min_score.to_string(),
            });
        }

        Ok(ValidatedQuery {
            text: text.to_string(),
            max_sources,
            min_score,
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ValidatedQuery {
    pub text: String,
    pub max_sources: usize,
    pub min_score: f32,
}

pub struct QueryEngine {
    retriever: Retriever,
    generator: AnswerGenerator,
    config: QueryConfig,
}

impl QueryEngine {
    pub fn new(retriever: Retriever, generator: AnswerGenerator, config: QueryConfig) -> Self {
        Self {
            retriever,
            generator,
            config,
        }
    }

    /// Answer `request` from `tenant`'s documents
    ///
    /// Invalid requests fail before anything is embedded. A query that finds
    /// nothing relevant is not an error: it returns the no-information answer
    /// with confidence 0.
    pub async fn run(&self, tenant: &TenantId, request: &QueryRequest) -> RagResult<QueryResult> {
        let query = request.validate(&self.config)?;
        let start = Instant::now();

        let candidate_k = self.config.candidate_k.max(query.max_sources);
        let retrieval = self
            .retriever
            .retrieve(tenant, &query.text, candidate_k)
            .await?;
        let backend = retrieval.backend;

        let ranker = ContextRanker::new(
            query.min_score,
            query.max_sources,
            self.config.max_context_chars,
        );
        let context = ranker.rank(retrieval.candidates);
        let generated = self.generator.generate(&query.text, &context).await?;

        let sources = context
            .chunks
            .iter()
            .map(|chunk| self.source_ref(chunk))
            .collect();

        let result = QueryResult {
            query_text: query.text,
            answer: generated.answer,
            sources,
            confidence: generated.confidence,
            processing_time_ms: start.elapsed().as_millis() as u64,
            retrieval_backend: backend,
        };
        tracing::info!(
            "Query for tenant '{}' answered from {} sources via {:?} in {}ms (confidence {:.2})",
            tenant,
            result.sources.len(),
            result.retrieval_backend,
            result.processing_time_ms,
            result.confidence
        );
        Ok(result)
    }

    fn source_ref(&self, chunk: &RankedChunk) -> SourceRef {
        SourceRef {
            chunk_id: chunk.chunk_id.clone(),
            filename: chunk.filename.clone(),
            score: chunk.score,
            excerpt: excerpt(&chunk.text, self.config.excerpt_chars),
        }
    }
}

/// Whitespace-collapsed prefix of `text`, at most `max_chars` plus an ellipsis
pub fn excerpt(text: &str, max_chars: usize) -> String {
    let collapsed = text.split_whitespace().collect::<Vec<_>>().join(" ");
    if collapsed.chars().count() <= max_chars {
        return collapsed;
    }
    let cut: String = collapsed.chars().take(max_chars).collect();
    format!("{}...", cut.trim_end())
}
