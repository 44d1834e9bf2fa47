//! Tenant-scoped candidate retrieval
//!
//! The vector index is asked first. When it errors, or comes back empty, the
//! tenant's keyword index answers instead. Every hit is resolved through the
//! tenant's own catalog, so ids that do not belong to the tenant's active
//! files never surface.

use crate::bm25_search::KeywordIndexes;
use crate::embedding::{self, EmbeddingProvider};
use crate::error::{RagError, RagResult, RetrievalError};
use crate::store::{ChunkView, StateStore};
use crate::types::{Chunk, FileRecord, RetrievalBackend, TenantId};
use crate::vector_db::VectorIndex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

/// A retrieved chunk with its similarity score in [0, 1]
#[derive(Debug, Clone, PartialEq)]
pub struct Candidate {
    pub chunk: Chunk,
    pub file: FileRecord,
    pub score: f32,
}

/// Candidates in backend order plus the backend that produced them
#[derive(Debug, Clone, PartialEq)]
pub struct Retrieval {
    pub candidates: Vec<Candidate>,
    pub backend: RetrievalBackend,
}

pub struct Retriever {
    store: Arc<StateStore>,
    vectors: Arc<dyn VectorIndex>,
    keywords: Arc<KeywordIndexes>,
    embedder: Arc<dyn EmbeddingProvider>,
    embed_timeout: Duration,
}

impl Retriever {
    pub fn new(
        store: Arc<StateStore>,
        vectors: Arc<dyn VectorIndex>,
        keywords: Arc<KeywordIndexes>,
        embedder: Arc<dyn EmbeddingProvider>,
        embed_timeout: Duration,
    ) -> Self {
        Self {
            store,
            vectors,
            keywords,
            embedder,
            embed_timeout,
        }
    }

    /// Embed `query_text` and retrieve up to `top_k` candidates
    ///
    /// Falls back to keyword search when embedding or vector search fails or
    /// finds nothing. Errors only when both paths fail.
    pub async fn retrieve(
        &self,
        tenant: &TenantId,
        query_text: &str,
        top_k: usize,
    ) -> RagResult<Retrieval> {
        let vector_result = match embedding::embed_with_timeout(
            self.embedder.clone(),
            vec![query_text.to_string()],
            self.embed_timeout,
        )
        .await
        {
            Ok(mut vectors) => match vectors.pop() {
                Some(vector) => self.retrieve_by_vector(tenant, vector, top_k).await,
                None => Err(RagError::other("embedder returned no query vector")),
            },
            Err(e) => Err(e.into()),
        };

        let vector_error = match vector_result {
            Ok(candidates) if !candidates.is_empty() => {
                return Ok(Retrieval {
                    candidates,
                    backend: RetrievalBackend::Vector,
                });
            }
            Ok(_) => {
                tracing::debug!("Vector search found nothing for tenant '{}'", tenant);
                None
            }
            Err(e) => {
                tracing::warn!(
                    "Vector retrieval failed for tenant '{}', using keyword fallback: {}",
                    tenant,
                    e
                );
                Some(e)
            }
        };

        match self.retrieve_by_keyword(tenant, query_text, top_k).await {
            Ok(candidates) => Ok(Retrieval {
                candidates,
                backend: RetrievalBackend::Keyword,
            }),
            Err(keyword_error) => match vector_error {
                Some(vector_error) => Err(RetrievalError::AllBackendsFailed {
                    vector: vector_error.to_string(),
                    keyword: keyword_error.to_string(),
                }
                .into()),
                None => {
                    tracing::warn!(
                        "Keyword fallback failed for tenant '{}': {}",
                        tenant,
                        keyword_error
                    );
                    Ok(Retrieval {
                        candidates: Vec::new(),
                        backend: RetrievalBackend::Vector,
                    })
                }
            },
        }
    }

    /// Nearest chunks to `vector` in the tenant's namespace
    pub async fn retrieve_by_vector(
        &self,
        tenant: &TenantId,
        vector: Vec<f32>,
        top_k: usize,
    ) -> RagResult<Vec<Candidate>> {
        let hits = self
            .vectors
            .query(&tenant.namespace(), vector, top_k)
            .await?;
        let scored: Vec<(String, f32)> = hits
            .into_iter()
            .map(|hit| (hit.chunk_id, hit.score))
            .collect();
        self.resolve(tenant, scored).await
    }

    /// Chunks ranked by query-token coverage in the tenant's keyword index
    pub async fn retrieve_by_keyword(
        &self,
        tenant: &TenantId,
        query_text: &str,
        top_k: usize,
    ) -> RagResult<Vec<Candidate>> {
        let keywords = self.keywords.clone();
        let owner = tenant.clone();
        let query = query_text.to_string();
        // Opening and searching a Tantivy index blocks
        let hits = tokio::task::spawn_blocking(move || {
            keywords.for_tenant(&owner)?.search(&query, top_k)
        })
        .await
        .map_err(|e| RetrievalError::KeywordIndex(format!("search task failed: {}", e)))?
        .map_err(|e| RetrievalError::KeywordIndex(format!("{:#}", e)))?;
        let scored: Vec<(String, f32)> = hits
            .into_iter()
            .map(|hit| (hit.chunk_id, hit.score))
            .collect();
        self.resolve(tenant, scored).await
    }

    /// Attach chunk and file data, dropping ids outside the tenant's catalog
    async fn resolve(
        &self,
        tenant: &TenantId,
        scored: Vec<(String, f32)>,
    ) -> RagResult<Vec<Candidate>> {
        let ids: Vec<String> = scored.iter().map(|(id, _)| id.clone()).collect();
        let mut views: HashMap<String, ChunkView> = self.store.chunk_views(tenant, &ids).await?;

        let candidates: Vec<Candidate> = scored
            .into_iter()
            .filter_map(|(chunk_id, score)| {
                let view = views.remove(&chunk_id)?;
                Some(Candidate {
                    chunk: view.chunk,
                    file: view.file,
                    score: score.clamp(0.0, 1.0),
                })
            })
            .collect();

        if candidates.len() < ids.len() {
            tracing::debug!(
                "Dropped {} hits without an active chunk for tenant '{}'",
                ids.len() - candidates.len(),
                tenant
            );
        }
        Ok(candidates)
    }
}
