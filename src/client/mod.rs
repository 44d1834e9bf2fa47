//! Library entry point for tenant-rag
//!
//! [`RagClient`] wires the configured backends together and exposes the
//! tenant-level operations: sync, status, query, statistics and purge.

use crate::bm25_search::KeywordIndexes;
use crate::config::Config;
use crate::embedding;
use crate::error::{RagError, RagResult, SyncError};
use crate::generation::{self, AnswerGenerator, TextGenerator};
use crate::query::{QueryEngine, QueryRequest};
use crate::retrieval::Retriever;
use crate::store::StateStore;
use crate::sync::{FsLockGuard, SyncBackends, SyncOrchestrator};
use crate::types::{QueryResult, SyncOperation, TenantId, TenantStats};
use crate::vector_db;
use std::sync::Arc;
use std::time::Duration;

/// Which operation a status lookup refers to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncLookup<'a> {
    /// Latest operation of the tenant
    Tenant(&'a str),
    /// A specific operation, whatever its tenant
    Operation(&'a str),
}

/// Main client for syncing tenant documents and answering questions
///
/// Cheap to clone; clones share backends and the in-process sync registry.
///
/// # Example
///
/// ```no_run
/// use tenant_rag::{Config, RagClient};
///
/// #[tokio::main]
/// async fn main() -> anyhow::Result<()> {
///     let client = RagClient::with_config(Config::new()?).await?;
///
///     let sync_id = client.trigger_sync("acme", false).await?;
///     let op = client.wait_for_sync("acme", &sync_id).await?;
///     println!("sync {} finished: {}", op.id, op.status);
///
///     let result = client
///         .run_query("acme", "What is the vacation policy?", None, None)
///         .await?;
///     println!("{} (confidence {:.2})", result.answer, result.confidence);
///     Ok(())
/// }
/// ```
#[derive(Clone)]
pub struct RagClient {
    config: Arc<Config>,
    backends: SyncBackends,
    sync: SyncOrchestrator,
    query: Arc<QueryEngine>,
}

impl RagClient {
    /// Create a client from the default configuration file and environment
    pub async fn new() -> RagResult<Self> {
        Self::with_config(Config::new()?).await
    }

    /// Create a client, building every backend named by `config`
    ///
    /// Loading a FastEmbed model may download it on first use.
    pub async fn with_config(config: Config) -> RagResult<Self> {
        config.validate()?;

        let state_dir = config.storage.state_dir.clone();
        let vectors = vector_db::from_config(&config.storage).await?;
        let embedding_config = config.embedding.clone();
        let embedder = tokio::task::spawn_blocking(move || embedding::from_config(&embedding_config))
            .await
            .map_err(|e| RagError::other(format!("embedder initialization panicked: {}", e)))??;
        let generator = generation::from_config(&config.generation)?;

        let backends = SyncBackends {
            store: Arc::new(StateStore::new(state_dir.clone())),
            vectors,
            keywords: Arc::new(KeywordIndexes::new(state_dir)),
            embedder,
        };
        tracing::info!(
            "RAG client ready (vectors: {}, embedder: {}, generator: {})",
            config.storage.vector_backend,
            backends.embedder.model_name(),
            generator.name()
        );
        Self::with_backends(config, backends, generator)
    }

    /// Create a client around already constructed backends
    pub fn with_backends(
        config: Config,
        backends: SyncBackends,
        generator: Arc<dyn TextGenerator>,
    ) -> RagResult<Self> {
        let sync = SyncOrchestrator::new(backends.clone(), &config)?;
        let retriever = Retriever::new(
            backends.store.clone(),
            backends.vectors.clone(),
            backends.keywords.clone(),
            backends.embedder.clone(),
            Duration::from_secs(config.embedding.timeout_secs),
        );
        let query = QueryEngine::new(
            retriever,
            AnswerGenerator::new(generator),
            config.query.clone(),
        );

        Ok(Self {
            config: Arc::new(config),
            backends,
            sync,
            query: Arc::new(query),
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Start a delta sync of the tenant's root directory
    ///
    /// Returns at once with the operation id. A second trigger while a sync is
    /// running returns the running operation's id.
    pub async fn trigger_sync(&self, tenant_id: &str, force_full: bool) -> RagResult<String> {
        let tenant = TenantId::parse(tenant_id)?;
        self.sync.trigger(&tenant, force_full).await
    }

    /// Snapshot of an operation, looked up by tenant or by id
    pub async fn get_sync_status(&self, lookup: SyncLookup<'_>) -> RagResult<Option<SyncOperation>> {
        match lookup {
            SyncLookup::Tenant(tenant_id) => self.sync_status(tenant_id).await,
            SyncLookup::Operation(sync_id) => self.sync_status_by_id(sync_id).await,
        }
    }

    /// Latest operation of a tenant
    pub async fn sync_status(&self, tenant_id: &str) -> RagResult<Option<SyncOperation>> {
        let tenant = TenantId::parse(tenant_id)?;
        self.sync.status(&tenant).await
    }

    pub async fn sync_status_by_id(&self, sync_id: &str) -> RagResult<Option<SyncOperation>> {
        self.sync.status_by_id(sync_id).await
    }

    /// Wait for an operation to reach a terminal status
    pub async fn wait_for_sync(&self, tenant_id: &str, sync_id: &str) -> RagResult<SyncOperation> {
        let tenant = TenantId::parse(tenant_id)?;
        self.sync.wait(&tenant, sync_id).await
    }

    /// Ask the tenant's running sync to stop at the next file boundary
    pub async fn cancel_sync(&self, tenant_id: &str) -> RagResult<Option<String>> {
        let tenant = TenantId::parse(tenant_id)?;
        Ok(self.sync.cancel(&tenant).await)
    }

    /// Answer a question from the tenant's synced documents
    ///
    /// `None` for `max_sources` or `min_score` uses the configured default.
    pub async fn run_query(
        &self,
        tenant_id: &str,
        query_text: &str,
        max_sources: Option<usize>,
        min_score: Option<f32>,
    ) -> RagResult<QueryResult> {
        let request = QueryRequest {
            query_text: query_text.to_string(),
            max_sources,
            min_score,
        };
        self.query(tenant_id, &request).await
    }

    pub async fn query(&self, tenant_id: &str, request: &QueryRequest) -> RagResult<QueryResult> {
        let tenant = TenantId::parse(tenant_id)?;
        self.query.run(&tenant, request).await
    }

    /// File and chunk counts for a tenant
    pub async fn tenant_stats(&self, tenant_id: &str) -> RagResult<TenantStats> {
        let tenant = TenantId::parse(tenant_id)?;
        // Refreshes the status of a dead sync before it is reported
        self.sync.status(&tenant).await?;
        Ok(self.backends.store.stats(&tenant).await?)
    }

    /// Remove everything stored for a tenant
    ///
    /// Drops the vector namespace, the keyword index and the catalog. Refused
    /// while a sync of the tenant is running here or in another process.
    pub async fn purge_tenant(&self, tenant_id: &str) -> RagResult<()> {
        let tenant = TenantId::parse(tenant_id)?;
        let _idle = self.sync.lock_idle(&tenant).await?;

        let _lock = match self.config.storage.state_dir.as_deref() {
            Some(state_dir) => match FsLockGuard::try_acquire(state_dir, &tenant)? {
                Some(lock) => Some(lock),
                None => return Err(SyncError::LockedByAnotherProcess(tenant.to_string()).into()),
            },
            None => None,
        };

        self.backends
            .vectors
            .drop_namespace(&tenant.namespace())
            .await?;
        self.backends.keywords.drop_tenant(&tenant)?;
        self.backends.store.purge(&tenant).await?;
        tracing::info!("Purged tenant '{}'", tenant);
        Ok(())
    }
}
