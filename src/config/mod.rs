//! Configuration system for tenant-rag
//!
//! Supports loading from multiple sources with priority:
//! CLI args > Environment variables > Config file > Defaults

use crate::error::{ConfigError, RagError};
use crate::paths::PlatformPaths;
use crate::types::TenantId;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Prefix of every environment override
pub const ENV_PREFIX: &str = "TENANT_RAG_";

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct Config {
    /// Where state and vectors live
    #[serde(default)]
    pub storage: StorageConfig,

    /// Tenant file roots
    #[serde(default)]
    pub tenants: TenantsConfig,

    /// Embedding model configuration
    #[serde(default)]
    pub embedding: EmbeddingConfig,

    /// Chunking and file selection
    #[serde(default)]
    pub chunking: ChunkingConfig,

    /// Sync retry and liveness settings
    #[serde(default)]
    pub sync: SyncConfig,

    /// Query validation and ranking limits
    #[serde(default)]
    pub query: QueryConfig,

    /// Answer generation backend
    #[serde(default)]
    pub generation: GenerationConfig,
}

/// Storage configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StorageConfig {
    /// Directory for per-tenant catalogs, BM25 indexes and lock files.
    /// `None` keeps all state in memory.
    #[serde(default = "default_state_dir")]
    pub state_dir: Option<PathBuf>,

    /// LanceDB data directory path
    #[serde(default = "default_lancedb_path")]
    pub lancedb_path: PathBuf,

    /// Vector backend: "lancedb" or "memory"
    #[serde(default = "default_vector_backend")]
    pub vector_backend: String,
}

/// Tenant root configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TenantsConfig {
    /// Tenant roots default to `root_dir/<tenant_id>`
    #[serde(default = "default_tenants_root")]
    pub root_dir: PathBuf,

    /// Explicit per-tenant roots, keyed by tenant id
    #[serde(default)]
    pub roots: BTreeMap<String, PathBuf>,
}

/// Embedding model configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EmbeddingConfig {
    /// Model name ("all-MiniLM-L6-v2", "BAAI/bge-small-en-v1.5", ... or "hashing")
    #[serde(default = "default_model_name")]
    pub model_name: String,

    /// Batch size for embedding generation
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    /// Timeout in seconds for one embedding batch
    #[serde(default = "default_embedding_timeout")]
    pub timeout_secs: u64,

    /// Dimension used by the hashing embedder
    #[serde(default = "default_hashing_dimension")]
    pub hashing_dimension: usize,
}

/// Chunking configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ChunkingConfig {
    /// Target chunk size in characters
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,

    /// Characters repeated from the previous chunk
    #[serde(default = "default_chunk_overlap")]
    pub chunk_overlap: usize,

    /// Maximum file size to index (in bytes)
    #[serde(default = "default_max_file_size")]
    pub max_file_size: u64,

    /// Glob patterns a file must match (empty = everything)
    #[serde(default)]
    pub include_patterns: Vec<String>,

    /// Glob patterns that exclude a file
    #[serde(default = "default_exclude_patterns")]
    pub exclude_patterns: Vec<String>,
}

/// Sync configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SyncConfig {
    /// Retries for embedding/vector calls per file batch
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Base delay for exponential backoff
    #[serde(default = "default_retry_base_delay_ms")]
    pub retry_base_delay_ms: u64,

    /// Background heartbeat period
    #[serde(default = "default_heartbeat_interval")]
    pub heartbeat_interval_secs: u64,

    /// A running sync without a heartbeat for this long is considered dead
    #[serde(default = "default_heartbeat_timeout")]
    pub heartbeat_timeout_secs: u64,
}

/// Query configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct QueryConfig {
    #[serde(default = "default_min_query_chars")]
    pub min_query_chars: usize,

    #[serde(default = "default_max_query_chars")]
    pub max_query_chars: usize,

    /// Sources returned when the caller does not say
    #[serde(default = "default_max_sources")]
    pub default_max_sources: usize,

    /// Upper bound accepted for max_sources
    #[serde(default = "default_max_sources_limit")]
    pub max_sources_limit: usize,

    /// Default minimum similarity score (0.0 to 1.0)
    #[serde(default = "default_min_score")]
    pub min_score: f32,

    /// Candidates fetched from the retriever before ranking
    #[serde(default = "default_candidate_k")]
    pub candidate_k: usize,

    /// Character budget of the generation context
    #[serde(default = "default_max_context_chars")]
    pub max_context_chars: usize,

    /// Length of per-source excerpts
    #[serde(default = "default_excerpt_chars")]
    pub excerpt_chars: usize,
}

/// Generation configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct GenerationConfig {
    /// Backend: "openai" (any OpenAI-compatible endpoint) or "extractive"
    #[serde(default = "default_generation_backend")]
    pub backend: String,

    #[serde(default = "default_generation_base_url")]
    pub base_url: String,

    #[serde(default = "default_generation_model")]
    pub model: String,

    /// Name of the environment variable holding the API key
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,

    #[serde(default = "default_generation_timeout")]
    pub timeout_secs: u64,

    #[serde(default = "default_generation_retries")]
    pub max_retries: u32,
}

// Default value functions
fn default_state_dir() -> Option<PathBuf> {
    Some(PlatformPaths::default_state_dir())
}

fn default_lancedb_path() -> PathBuf {
    PlatformPaths::default_lancedb_path()
}

fn default_vector_backend() -> String {
    "lancedb".to_string()
}

fn default_tenants_root() -> PathBuf {
    PlatformPaths::default_tenants_root()
}

fn default_model_name() -> String {
    "all-MiniLM-L6-v2".to_string()
}

fn default_batch_size() -> usize {
    32
}

fn default_embedding_timeout() -> u64 {
    30
}

fn default_hashing_dimension() -> usize {
    256
}

fn default_chunk_size() -> usize {
    1000
}

fn default_chunk_overlap() -> usize {
    150
}

fn default_max_file_size() -> u64 {
    10 * 1_048_576 // 10 MB
}

fn default_exclude_patterns() -> Vec<String> {
    vec!["**/.git/**".to_string(), "**/*.tmp".to_string()]
}

fn default_max_retries() -> u32 {
    3
}

fn default_retry_base_delay_ms() -> u64 {
    250
}

fn default_heartbeat_interval() -> u64 {
    5
}

fn default_heartbeat_timeout() -> u64 {
    300
}

fn default_min_query_chars() -> usize {
    1
}

fn default_max_query_chars() -> usize {
    2000
}

fn default_max_sources() -> usize {
    5
}

fn default_max_sources_limit() -> usize {
    20
}

fn default_min_score() -> f32 {
    0.2
}

fn default_candidate_k() -> usize {
    20
}

fn default_max_context_chars() -> usize {
    6000
}

fn default_excerpt_chars() -> usize {
    240
}

fn default_generation_backend() -> String {
    "extractive".to_string()
}

fn default_generation_base_url() -> String {
    "https://api.openai.com/v1".to_string()
}

fn default_generation_model() -> String {
    "gpt-4o-mini".to_string()
}

fn default_api_key_env() -> String {
    "OPENAI_API_KEY".to_string()
}

fn default_generation_timeout() -> u64 {
    60
}

fn default_generation_retries() -> u32 {
    2
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            state_dir: default_state_dir(),
            lancedb_path: default_lancedb_path(),
            vector_backend: default_vector_backend(),
        }
    }
}

impl Default for TenantsConfig {
    fn default() -> Self {
        Self {
            root_dir: default_tenants_root(),
            roots: BTreeMap::new(),
        }
    }
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            model_name: default_model_name(),
            batch_size: default_batch_size(),
            timeout_secs: default_embedding_timeout(),
            hashing_dimension: default_hashing_dimension(),
        }
    }
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            chunk_size: default_chunk_size(),
            chunk_overlap: default_chunk_overlap(),
            max_file_size: default_max_file_size(),
            include_patterns: Vec::new(),
            exclude_patterns: default_exclude_patterns(),
        }
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            retry_base_delay_ms: default_retry_base_delay_ms(),
            heartbeat_interval_secs: default_heartbeat_interval(),
            heartbeat_timeout_secs: default_heartbeat_timeout(),
        }
    }
}

impl Default for QueryConfig {
    fn default() -> Self {
        Self {
            min_query_chars: default_min_query_chars(),
            max_query_chars: default_max_query_chars(),
            default_max_sources: default_max_sources(),
            max_sources_limit: default_max_sources_limit(),
            min_score: default_min_score(),
            candidate_k: default_candidate_k(),
            max_context_chars: default_max_context_chars(),
            excerpt_chars: default_excerpt_chars(),
        }
    }
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            backend: default_generation_backend(),
            base_url: default_generation_base_url(),
            model: default_generation_model(),
            api_key_env: default_api_key_env(),
            timeout_secs: default_generation_timeout(),
            max_retries: default_generation_retries(),
        }
    }
}

impl SyncConfig {
    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_secs(self.heartbeat_interval_secs)
    }

    pub fn heartbeat_timeout(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.heartbeat_timeout_secs as i64)
    }

    /// Delay before retry number `attempt` (1-based): base, 2*base, 4*base, ...
    pub fn backoff_delay(&self, attempt: u32) -> Duration {
        let factor = 1u64 << attempt.saturating_sub(1).min(6);
        Duration::from_millis(self.retry_base_delay_ms.saturating_mul(factor))
    }
}

impl TenantsConfig {
    /// Resolve the file root of a tenant
    pub fn root_for(&self, tenant: &TenantId) -> PathBuf {
        self.roots
            .get(tenant.as_str())
            .cloned()
            .unwrap_or_else(|| self.root_dir.join(tenant.as_str()))
    }
}

fn invalid(key: &str, reason: impl Into<String>) -> RagError {
    ConfigError::InvalidValue {
        key: key.to_string(),
        reason: reason.into(),
    }
    .into()
}

impl Config {
    /// Load configuration from file
    pub fn from_file(path: &Path) -> Result<Self, RagError> {
        if !path.exists() {
            return Err(ConfigError::FileNotFound(path.display().to_string()).into());
        }

        let content = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::LoadFailed(format!("Failed to read config file: {}", e)))?;

        let config: Config = toml::from_str(&content)
            .map_err(|e| ConfigError::ParseFailed(format!("Invalid TOML: {}", e)))?;

        config.validate()?;
        Ok(config)
    }

    /// Load configuration from default location or create default
    pub fn load_or_default() -> Result<Self, RagError> {
        let config_path = PlatformPaths::default_config_path();

        if config_path.exists() {
            tracing::info!("Loading config from: {}", config_path.display());
            Self::from_file(&config_path)
        } else {
            tracing::info!("No config file found, using defaults");
            Ok(Self::default())
        }
    }

    /// Save configuration to file
    pub fn save(&self, path: &Path) -> Result<(), RagError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                ConfigError::SaveFailed(format!("Failed to create config directory: {}", e))
            })?;
        }

        let content = toml::to_string_pretty(self)
            .map_err(|e| ConfigError::SaveFailed(format!("Failed to serialize config: {}", e)))?;

        std::fs::write(path, content)
            .map_err(|e| ConfigError::SaveFailed(format!("Failed to write config file: {}", e)))?;

        tracing::info!("Saved config to: {}", path.display());
        Ok(())
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<(), RagError> {
        if self.storage.vector_backend != "lancedb" && self.storage.vector_backend != "memory" {
            return Err(invalid(
                "storage.vector_backend",
                format!(
                    "must be 'lancedb' or 'memory', got '{}'",
                    self.storage.vector_backend
                ),
            ));
        }

        for tenant in self.tenants.roots.keys() {
            if let Err(e) = TenantId::parse(tenant.as_str()) {
                return Err(invalid("tenants.roots", e.to_string()));
            }
        }

        if self.embedding.batch_size == 0 {
            return Err(invalid("embedding.batch_size", "must be greater than 0"));
        }

        if self.embedding.hashing_dimension == 0 {
            return Err(invalid("embedding.hashing_dimension", "must be greater than 0"));
        }

        if self.chunking.chunk_size == 0 {
            return Err(invalid("chunking.chunk_size", "must be greater than 0"));
        }

        if self.chunking.chunk_overlap >= self.chunking.chunk_size {
            return Err(invalid(
                "chunking.chunk_overlap",
                format!(
                    "must be smaller than chunk_size ({}), got {}",
                    self.chunking.chunk_size, self.chunking.chunk_overlap
                ),
            ));
        }

        if self.chunking.max_file_size == 0 {
            return Err(invalid("chunking.max_file_size", "must be greater than 0"));
        }

        if self.sync.heartbeat_interval_secs == 0 {
            return Err(invalid("sync.heartbeat_interval_secs", "must be greater than 0"));
        }

        if self.sync.heartbeat_timeout_secs <= self.sync.heartbeat_interval_secs {
            return Err(invalid(
                "sync.heartbeat_timeout_secs",
                "must be greater than sync.heartbeat_interval_secs",
            ));
        }

        if self.query.max_query_chars < self.query.min_query_chars.max(1) {
            return Err(invalid(
                "query.max_query_chars",
                "must be at least query.min_query_chars and greater than 0",
            ));
        }

        if self.query.max_sources_limit == 0
            || self.query.default_max_sources == 0
            || self.query.default_max_sources > self.query.max_sources_limit
        {
            return Err(invalid(
                "query.default_max_sources",
                format!(
                    "must be between 1 and max_sources_limit ({})",
                    self.query.max_sources_limit
                ),
            ));
        }

        if !(0.0..=1.0).contains(&self.query.min_score) {
            return Err(invalid(
                "query.min_score",
                format!("must be between 0.0 and 1.0, got {}", self.query.min_score),
            ));
        }

        if self.query.candidate_k == 0 || self.query.max_context_chars == 0 {
            return Err(invalid(
                "query.candidate_k",
                "candidate_k and max_context_chars must be greater than 0",
            ));
        }

        if self.generation.backend != "openai" && self.generation.backend != "extractive" {
            return Err(invalid(
                "generation.backend",
                format!(
                    "must be 'openai' or 'extractive', got '{}'",
                    self.generation.backend
                ),
            ));
        }

        Ok(())
    }

    /// Apply environment variable overrides
    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides(|key| std::env::var(format!("{}{}", ENV_PREFIX, key)).ok());
    }

    /// Apply overrides from an arbitrary key lookup (keys without the prefix)
    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(dir) = lookup("STATE_DIR") {
            self.storage.state_dir = if dir.is_empty() {
                None
            } else {
                Some(PathBuf::from(dir))
            };
        }

        if let Some(path) = lookup("LANCEDB_PATH") {
            self.storage.lancedb_path = PathBuf::from(path);
        }

        if let Some(backend) = lookup("VECTOR_BACKEND") {
            self.storage.vector_backend = backend;
        }

        if let Some(root) = lookup("TENANTS_ROOT") {
            self.tenants.root_dir = PathBuf::from(root);
        }

        if let Some(model) = lookup("MODEL") {
            self.embedding.model_name = model;
        }

        if let Some(batch_size) = lookup("BATCH_SIZE")
            && let Ok(size) = batch_size.parse()
        {
            self.embedding.batch_size = size;
        }

        if let Some(min_score) = lookup("MIN_SCORE")
            && let Ok(score) = min_score.parse()
        {
            self.query.min_score = score;
        }

        if let Some(retries) = lookup("MAX_RETRIES")
            && let Ok(retries) = retries.parse()
        {
            self.sync.max_retries = retries;
        }

        if let Some(backend) = lookup("GENERATION_BACKEND") {
            self.generation.backend = backend;
        }

        if let Some(url) = lookup("GENERATION_URL") {
            self.generation.base_url = url;
        }

        if let Some(model) = lookup("GENERATION_MODEL") {
            self.generation.model = model;
        }
    }

    /// Create a new Config with defaults and environment overrides
    pub fn new() -> Result<Self, RagError> {
        let mut config = Self::load_or_default()?;
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// A fully in-memory configuration with the offline backends
    ///
    /// Nothing touches the platform data directories, which makes it the
    /// starting point for tests and throwaway runs.
    pub fn ephemeral(tenants_root: impl Into<PathBuf>) -> Self {
        let mut config = Self::default();
        config.storage.state_dir = None;
        config.storage.vector_backend = "memory".to_string();
        config.tenants.root_dir = tenants_root.into();
        config.embedding.model_name = "hashing".to_string();
        config.generation.backend = "extractive".to_string();
        config
    }
}

#[cfg(test)]
mod tests;
