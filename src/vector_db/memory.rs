//! In-memory vector index with brute-force cosine search

use super::{ScoredRef, VectorEntry, VectorIndex};
use crate::error::VectorDbError;
use std::collections::HashMap;
use std::sync::RwLock;

#[derive(Debug)]
struct Namespace {
    dimension: usize,
    entries: HashMap<String, VectorEntry>,
}

/// Vector index held entirely in process memory
#[derive(Debug, Default)]
pub struct MemoryVectorIndex {
    namespaces: RwLock<HashMap<String, Namespace>>,
}

impl MemoryVectorIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Names of all namespaces currently present
    pub fn namespaces(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .namespaces
            .read()
            .map(|ns| ns.keys().cloned().collect())
            .unwrap_or_default();
        names.sort();
        names
    }
}

fn lock_error(e: impl std::fmt::Display) -> VectorDbError {
    VectorDbError::ConnectionFailed(format!("index lock poisoned: {}", e))
}

/// Cosine similarity clamped to [0, 1]
pub(crate) fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    let mut dot = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;
    for (x, y) in a.iter().zip(b) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    (dot / (norm_a.sqrt() * norm_b.sqrt())).clamp(0.0, 1.0)
}

#[async_trait::async_trait]
impl VectorIndex for MemoryVectorIndex {
    async fn ensure_namespace(
        &self,
        namespace: &str,
        dimension: usize,
    ) -> Result<(), VectorDbError> {
        let mut namespaces = self.namespaces.write().map_err(lock_error)?;
        match namespaces.get(namespace) {
            Some(existing) if existing.dimension != dimension => {
                Err(VectorDbError::DimensionMismatch {
                    namespace: namespace.to_string(),
                    expected: existing.dimension,
                    actual: dimension,
                })
            }
            Some(_) => Ok(()),
            None => {
                namespaces.insert(
                    namespace.to_string(),
                    Namespace {
                        dimension,
                        entries: HashMap::new(),
                    },
                );
                Ok(())
            }
        }
    }

    async fn upsert(
        &self,
        namespace: &str,
        entries: Vec<VectorEntry>,
    ) -> Result<usize, VectorDbError> {
        let mut namespaces = self.namespaces.write().map_err(lock_error)?;
        let ns = namespaces
            .get_mut(namespace)
            .ok_or_else(|| VectorDbError::NamespaceNotFound(namespace.to_string()))?;

        if let Some(bad) = entries.iter().find(|e| e.vector.len() != ns.dimension) {
            return Err(VectorDbError::DimensionMismatch {
                namespace: namespace.to_string(),
                expected: ns.dimension,
                actual: bad.vector.len(),
            });
        }

        let count = entries.len();
        for entry in entries {
            ns.entries.insert(entry.vector_ref.clone(), entry);
        }
        Ok(count)
    }

    async fn query(
        &self,
        namespace: &str,
        vector: Vec<f32>,
        top_k: usize,
    ) -> Result<Vec<ScoredRef>, VectorDbError> {
        let namespaces = self.namespaces.read().map_err(lock_error)?;
        let Some(ns) = namespaces.get(namespace) else {
            return Ok(Vec::new());
        };

        if vector.len() != ns.dimension {
            return Err(VectorDbError::DimensionMismatch {
                namespace: namespace.to_string(),
                expected: ns.dimension,
                actual: vector.len(),
            });
        }

        let mut hits: Vec<ScoredRef> = ns
            .entries
            .values()
            .map(|entry| ScoredRef {
                vector_ref: entry.vector_ref.clone(),
                chunk_id: entry.chunk_id.clone(),
                file_id: entry.file_id.clone(),
                score: cosine_similarity(&vector, &entry.vector),
            })
            .collect();

        hits.sort_by(|a, b| {
            b.score
                .total_cmp(&a.score)
                .then_with(|| a.vector_ref.cmp(&b.vector_ref))
        });
        hits.truncate(top_k);
        Ok(hits)
    }

    async fn delete(&self, namespace: &str, vector_refs: &[String]) -> Result<(), VectorDbError> {
        let mut namespaces = self.namespaces.write().map_err(lock_error)?;
        if let Some(ns) = namespaces.get_mut(namespace) {
            for vector_ref in vector_refs {
                ns.entries.remove(vector_ref);
            }
        }
        Ok(())
    }

    async fn drop_namespace(&self, namespace: &str) -> Result<(), VectorDbError> {
        self.namespaces
            .write()
            .map_err(lock_error)?
            .remove(namespace);
        Ok(())
    }

    async fn count(&self, namespace: &str) -> Result<usize, VectorDbError> {
        Ok(self
            .namespaces
            .read()
            .map_err(lock_error)?
            .get(namespace)
            .map_or(0, |ns| ns.entries.len()))
    }
}
