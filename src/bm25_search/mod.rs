//! Per-tenant keyword index using Tantivy
//!
//! Serves as the retrieval fallback when the vector path is down or finds
//! nothing. Hits are scored by query-token coverage in [0, 1], with the BM25
//! rank kept as the tie-break.

use crate::embedding::tokenize;
use crate::types::TenantId;
use anyhow::{Context, Result};
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, RwLock};
use tantivy::collector::TopDocs;
use tantivy::query::QueryParser;
use tantivy::schema::*;
use tantivy::{Index, IndexWriter, ReloadPolicy, TantivyDocument, doc};

/// Heap handed to each short-lived index writer
const WRITER_HEAP_BYTES: usize = 50_000_000;

/// Lock files older than this are assumed to belong to a crashed process
const STALE_LOCK_SECS: u64 = 300;

/// BM25-based keyword search over one tenant's chunks
pub struct BM25Search {
    index: Index,
    chunk_id_field: Field,
    file_id_field: Field,
    content_field: Field,
    /// On-disk location, `None` for in-memory indexes
    index_path: Option<PathBuf>,
    /// Mutex to ensure only one IndexWriter is created at a time
    writer_lock: Mutex<()>,
}

/// A keyword hit
#[derive(Debug, Clone, PartialEq)]
pub struct KeywordHit {
    pub chunk_id: String,
    pub file_id: String,
    /// Fraction of distinct query tokens present in the chunk
    pub score: f32,
    pub bm25: f32,
}

fn build_schema() -> (Schema, Field, Field, Field) {
    let mut schema_builder = Schema::builder();
    let chunk_id_field = schema_builder.add_text_field("chunk_id", STRING | STORED);
    let file_id_field = schema_builder.add_text_field("file_id", STRING | STORED);
    let content_field = schema_builder.add_text_field("content", TEXT | STORED);
    (
        schema_builder.build(),
        chunk_id_field,
        file_id_field,
        content_field,
    )
}

impl BM25Search {
    /// Create or open an index stored in `index_path`
    pub fn new<P: AsRef<Path>>(index_path: P) -> Result<Self> {
        let index_path = index_path.as_ref().to_path_buf();
        let (schema, chunk_id_field, file_id_field, content_field) = build_schema();

        std::fs::create_dir_all(&index_path).context("Failed to create BM25 index directory")?;

        let index = if index_path.join("meta.json").exists() {
            Index::open_in_dir(&index_path).context("Failed to open existing BM25 index")?
        } else {
            Index::create_in_dir(&index_path, schema).context("Failed to create BM25 index")?
        };

        Ok(Self {
            index,
            chunk_id_field,
            file_id_field,
            content_field,
            index_path: Some(index_path),
            writer_lock: Mutex::new(()),
        })
    }

    /// Create an index that lives only in memory
    pub fn in_memory() -> Self {
        let (schema, chunk_id_field, file_id_field, content_field) = build_schema();
        Self {
            index: Index::create_in_ram(schema),
            chunk_id_field,
            file_id_field,
            content_field,
            index_path: None,
            writer_lock: Mutex::new(()),
        }
    }

    fn is_lock_stale(lock_path: &Path) -> bool {
        std::fs::metadata(lock_path)
            .and_then(|m| m.modified())
            .ok()
            .and_then(|modified| modified.elapsed().ok())
            .is_some_and(|elapsed| elapsed.as_secs() > STALE_LOCK_SECS)
    }

    /// Remove Tantivy lock files left behind by a crashed process
    fn cleanup_stale_locks(index_path: &Path) -> Result<bool> {
        let mut removed = false;
        for name in [".tantivy-writer.lock", ".tantivy-meta.lock"] {
            let lock = index_path.join(name);
            if Self::is_lock_stale(&lock) {
                tracing::warn!("Removing stale Tantivy lock file: {:?}", lock);
                std::fs::remove_file(&lock).context("Failed to remove stale lock file")?;
                removed = true;
            }
        }
        Ok(removed)
    }

    fn writer(&self) -> Result<IndexWriter<TantivyDocument>> {
        match self.index.writer(WRITER_HEAP_BYTES) {
            Ok(writer) => Ok(writer),
            Err(e) if e.to_string().to_lowercase().contains("lock") => {
                let Some(path) = &self.index_path else {
                    return Err(e).context("Failed to create index writer");
                };
                if Self::cleanup_stale_locks(path)? {
                    self.index
                        .writer(WRITER_HEAP_BYTES)
                        .context("Failed to create index writer after cleaning stale locks")
                } else {
                    Err(anyhow::anyhow!(
                        "Keyword index is in use by another process: {}",
                        e
                    ))
                }
            }
            Err(e) => Err(e).context("Failed to create index writer"),
        }
    }

    /// Add chunks as `(chunk_id, file_id, text)` tuples
    pub fn add_chunks(&self, chunks: Vec<(String, String, String)>) -> Result<()> {
        if chunks.is_empty() {
            return Ok(());
        }

        let _guard = self
            .writer_lock
            .lock()
            .map_err(|e| anyhow::anyhow!("Failed to acquire writer lock: {}", e))?;
        let mut index_writer = self.writer()?;

        for (chunk_id, file_id, content) in chunks {
            index_writer
                .add_document(doc!(
                    self.chunk_id_field => chunk_id,
                    self.file_id_field => file_id,
                    self.content_field => content,
                ))
                .context("Failed to add document")?;
        }

        index_writer
            .commit()
            .context("Failed to commit documents")?;
        Ok(())
    }

    /// Delete every chunk of a file
    pub fn delete_file(&self, file_id: &str) -> Result<()> {
        let _guard = self
            .writer_lock
            .lock()
            .map_err(|e| anyhow::anyhow!("Failed to acquire writer lock: {}", e))?;
        let mut index_writer = self.writer()?;

        index_writer.delete_term(Term::from_field_text(self.file_id_field, file_id));
        index_writer
            .commit()
            .context("Failed to commit file deletion")?;
        Ok(())
    }

    /// Clear the entire index
    pub fn clear(&self) -> Result<()> {
        let _guard = self
            .writer_lock
            .lock()
            .map_err(|e| anyhow::anyhow!("Failed to acquire writer lock: {}", e))?;
        let mut index_writer = self.writer()?;

        index_writer
            .delete_all_documents()
            .context("Failed to delete all documents")?;
        index_writer.commit().context("Failed to commit clear")?;
        Ok(())
    }

    /// Search by keyword overlap
    ///
    /// Candidates come from BM25; each is rescored by the share of distinct
    /// query tokens it contains. Chunks sharing no token with the query are
    /// dropped.
    pub fn search(&self, query_text: &str, limit: usize) -> Result<Vec<KeywordHit>> {
        let query_tokens: HashSet<String> = tokenize(query_text).collect();
        if query_tokens.is_empty() || limit == 0 {
            return Ok(Vec::new());
        }

        let reader = self
            .index
            .reader_builder()
            .reload_policy(ReloadPolicy::Manual)
            .try_into()
            .context("Failed to create index reader")?;
        let searcher = reader.searcher();

        // Lenient parsing tolerates punctuation such as '?' or ':' in questions
        let query_parser = QueryParser::for_index(&self.index, vec![self.content_field]);
        let (query, _errors) = query_parser.parse_query_lenient(query_text);

        // Over-fetch so coverage re-ranking has room to reorder
        let top_docs = searcher
            .search(&query, &TopDocs::with_limit(limit.saturating_mul(4).max(limit)))
            .context("Failed to execute search")?;

        let mut hits = Vec::new();
        for (bm25, doc_address) in top_docs {
            let retrieved: TantivyDocument = searcher
                .doc(doc_address)
                .context("Failed to retrieve document")?;

            let text_of = |field: Field| {
                retrieved
                    .get_first(field)
                    .and_then(|v| v.as_str())
                    .map(str::to_string)
            };
            let (Some(chunk_id), Some(file_id), Some(content)) = (
                text_of(self.chunk_id_field),
                text_of(self.file_id_field),
                text_of(self.content_field),
            ) else {
                continue;
            };

            let score = token_coverage(&query_tokens, &content);
            if score > 0.0 {
                hits.push(KeywordHit {
                    chunk_id,
                    file_id,
                    score,
                    bm25,
                });
            }
        }

        // Stable sort keeps BM25 order among equal coverage
        hits.sort_by(|a, b| b.score.total_cmp(&a.score));
        hits.truncate(limit);
        Ok(hits)
    }

    /// Number of indexed chunks
    pub fn num_docs(&self) -> Result<usize> {
        let reader = self
            .index
            .reader_builder()
            .reload_policy(ReloadPolicy::Manual)
            .try_into()
            .context("Failed to create index reader")?;
        Ok(reader.searcher().num_docs() as usize)
    }
}

/// Share of `query_tokens` that occur in `content`
pub fn token_coverage(query_tokens: &HashSet<String>, content: &str) -> f32 {
    if query_tokens.is_empty() {
        return 0.0;
    }
    let content_tokens: HashSet<String> = tokenize(content).collect();
    let matched = query_tokens
        .iter()
        .filter(|t| content_tokens.contains(*t))
        .count();
    matched as f32 / query_tokens.len() as f32
}

/// Registry of per-tenant keyword indexes
///
/// With a base directory each tenant's index lives in `<base>/<tenant>/bm25`;
/// without one, indexes are kept in memory.
pub struct KeywordIndexes {
    base_dir: Option<PathBuf>,
    indexes: RwLock<HashMap<TenantId, Arc<BM25Search>>>,
}

impl KeywordIndexes {
    pub fn new(base_dir: Option<PathBuf>) -> Self {
        Self {
            base_dir,
            indexes: RwLock::new(HashMap::new()),
        }
    }

    fn path_for(&self, tenant: &TenantId) -> Option<PathBuf> {
        self.base_dir
            .as_ref()
            .map(|base| base.join(tenant.as_str()).join("bm25"))
    }

    /// Get or create the index of a tenant
    pub fn for_tenant(&self, tenant: &TenantId) -> Result<Arc<BM25Search>> {
        {
            let indexes = self
                .indexes
                .read()
                .map_err(|e| anyhow::anyhow!("Failed to acquire read lock on BM25 indexes: {}", e))?;
            if let Some(index) = indexes.get(tenant) {
                return Ok(index.clone());
            }
        }

        let mut indexes = self
            .indexes
            .write()
            .map_err(|e| anyhow::anyhow!("Failed to acquire write lock on BM25 indexes: {}", e))?;

        // Another caller may have created it while we waited
        if let Some(index) = indexes.get(tenant) {
            return Ok(index.clone());
        }

        let index = match self.path_for(tenant) {
            Some(path) => {
                tracing::info!("Opening keyword index for tenant '{}' at {:?}", tenant, path);
                BM25Search::new(&path)
                    .with_context(|| format!("Failed to open keyword index for tenant {}", tenant))?
            }
            None => BM25Search::in_memory(),
        };
        let index = Arc::new(index);
        indexes.insert(tenant.clone(), index.clone());
        Ok(index)
    }

    /// Clear and forget a tenant's index
    pub fn drop_tenant(&self, tenant: &TenantId) -> Result<()> {
        let removed = self
            .indexes
            .write()
            .map_err(|e| anyhow::anyhow!("Failed to acquire write lock on BM25 indexes: {}", e))?
            .remove(tenant);

        if let Some(index) = removed {
            index.clear()?;
        }
        if let Some(path) = self.path_for(tenant)
            && path.exists()
        {
            std::fs::remove_dir_all(&path)
                .with_context(|| format!("Failed to remove keyword index at {:?}", path))?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests;
