//! # tenant-rag - multi-tenant document sync and question answering
//!
//! Each tenant owns a folder of documents. A delta sync keeps that folder's
//! content mirrored in a vector index and a BM25 keyword index; queries
//! retrieve the best passages of one tenant and turn them into a cited
//! answer with a confidence score.
//!
//! ## Architecture
//!
//! ```text
//!            trigger_sync                         run_query
//!                 │                                   │
//!      ┌──────────▼──────────┐             ┌──────────▼──────────┐
//!      │  SyncOrchestrator   │             │     QueryEngine     │
//!      │ detect → chunk →    │             │ embed → retrieve →  │
//!      │ embed → write       │             │ rank → generate     │
//!      └──┬───────┬───────┬──┘             └──┬───────┬───────┬──┘
//!         │       │       │                   │       │       │
//!   ┌─────▼──┐ ┌──▼────┐ ┌▼──────────┐        │  ┌────▼───┐ ┌─▼─────────┐
//!   │ State  │ │Vector │ │ BM25      │◄───────┘  │Embedder│ │ Generator │
//!   │ store  │ │ index │ │ (Tantivy) │           └────────┘ └───────────┘
//!   └────────┘ └───────┘ └───────────┘
//! ```
//!
//! Every tenant has its own vector namespace, keyword index, catalog and
//! operation history; nothing is shared between tenants' syncs.
//!
//! ## Modules
//!
//! - [`client`]: [`RagClient`], the facade over everything below
//! - [`sync`]: change detection, per-tenant exclusion and the sync state machine
//! - [`query`]: query validation and the answer pipeline
//! - [`retrieval`]: tenant-scoped retrieval with keyword fallback, context ranking
//! - [`generation`]: answer generation backends and confidence scoring
//! - [`store`]: persisted file records, chunks and sync operations
//! - [`indexer`]: directory listing, text extraction and chunking
//! - [`embedding`]: FastEmbed and hashing embedders
//! - [`vector_db`]: LanceDB and in-memory vector indexes
//! - [`bm25_search`]: per-tenant Tantivy keyword indexes
//! - [`config`]: TOML configuration with environment overrides
//!
//! ## Usage Example
//!
//! ```no_run
//! use tenant_rag::{Config, RagClient};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::ephemeral("/srv/tenants");
//!     let client = RagClient::with_config(config).await?;
//!
//!     let sync_id = client.trigger_sync("acme", false).await?;
//!     client.wait_for_sync("acme", &sync_id).await?;
//!
//!     let result = client
//!         .run_query("acme", "What is the vacation policy?", Some(3), None)
//!         .await?;
//!     for source in &result.sources {
//!         println!("{} ({:.2})", source.filename, source.score);
//!     }
//!     Ok(())
//! }
//! ```

/// Per-tenant BM25 keyword indexes using Tantivy
pub mod bm25_search;

/// High-level client tying the subsystems together
pub mod client;

/// Configuration management with environment variable overrides
pub mod config;

/// Embedding generation (FastEmbed or feature hashing)
pub mod embedding;

/// Error types and utilities
pub mod error;

/// Answer generation backends
pub mod generation;

/// SHA-256 content hashing
pub mod hasher;

/// File listing, text extraction and chunking
pub mod indexer;

/// Platform paths for config and state
pub mod paths;

/// Query validation and the answer pipeline
pub mod query;

/// Candidate retrieval and context ranking
pub mod retrieval;

/// Persisted per-tenant catalogs and sync operation history
pub mod store;

/// Delta sync of tenant document folders
pub mod sync;

/// Domain types shared across modules
pub mod types;

/// Vector index abstraction (LanceDB and in-memory)
pub mod vector_db;

pub use client::{RagClient, SyncLookup};
pub use config::Config;
pub use error::{RagError, RagResult};
pub use query::QueryRequest;
pub use types::{
    Chunk, FileRecord, FileSyncState, QueryResult, RetrievalBackend, SourceRef, SyncOperation,
    SyncStage, SyncStatus, TenantId, TenantStats,
};
