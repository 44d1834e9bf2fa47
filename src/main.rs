//! # tenant-rag CLI
//!
//! ```bash
//! tenant-rag sync acme                 # sync tenants_root/acme and wait for it
//! tenant-rag sync acme --no-wait       # print the operation id and return
//! tenant-rag status acme
//! tenant-rag query acme "What is the vacation policy?" --max-sources 3
//! tenant-rag stats acme
//! tenant-rag purge acme
//! ```
//!
//! Logging is controlled with `RUST_LOG` (default `info`).

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tenant_rag::{Config, RagClient, SyncLookup, SyncOperation};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(
    name = "tenant-rag",
    about = "Sync tenant document folders and answer questions over them",
    version = concat!(
        env!("CARGO_PKG_VERSION"),
        " (",
        env!("GIT_COMMIT_HASH"),
        ", built ",
        env!("BUILD_TIMESTAMP"),
        ")"
    )
)]
struct Cli {
    /// Configuration file (TOML); defaults to the platform config location
    #[arg(long, global = true, env = "TENANT_RAG_CONFIG")]
    config: Option<PathBuf>,

    /// Directory holding one document folder per tenant
    #[arg(long, global = true)]
    tenants_root: Option<PathBuf>,

    /// Directory for catalogs, keyword indexes and locks
    #[arg(long, global = true)]
    state_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Sync a tenant's documents into the indexes
    Sync {
        tenant: String,
        /// Reprocess every file, changed or not
        #[arg(long)]
        force_full: bool,
        /// Return right after the sync was started
        #[arg(long)]
        no_wait: bool,
    },
    /// Show the latest sync of a tenant, or a specific one
    Status {
        tenant: String,
        #[arg(long)]
        sync_id: Option<String>,
    },
    /// Ask a question against a tenant's documents
    Query {
        tenant: String,
        text: String,
        #[arg(long)]
        max_sources: Option<usize>,
        /// Minimum similarity score (0.0 to 1.0)
        #[arg(long)]
        min_score: Option<f32>,
        /// Print the full result as JSON
        #[arg(long)]
        json: bool,
    },
    /// File and chunk counts of a tenant
    Stats { tenant: String },
    /// Remove all indexed data of a tenant
    Purge { tenant: String },
}

fn load_config(cli: &Cli) -> Result<Config> {
    let mut config = match &cli.config {
        Some(path) => Config::from_file(path)
            .with_context(|| format!("Failed to load config from {}", path.display()))?,
        None => Config::load_or_default()?,
    };
    config.apply_env_overrides();

    if let Some(root) = &cli.tenants_root {
        config.tenants.root_dir = root.clone();
    }
    if let Some(dir) = &cli.state_dir {
        config.storage.state_dir = Some(dir.clone());
    }
    config.validate()?;
    Ok(config)
}

fn print_operation(op: &SyncOperation) {
    println!("sync {} [{}] {}", op.id, op.tenant_id, op.status);
    println!(
        "  stage {:?}, {:.0}% ({}/{} files)",
        op.progress_stage, op.progress_percentage, op.files_processed, op.files_total
    );
    println!(
        "  files: {} added, {} updated, {} deleted, {} failed",
        op.files_added, op.files_updated, op.files_deleted, op.files_failed
    );
    println!(
        "  chunks: {} created, {} updated, {} deleted",
        op.chunks_created, op.chunks_updated, op.chunks_deleted
    );
    if let Some(error) = &op.error_message {
        println!("  error: {}", error);
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = load_config(&cli)?;
    let client = RagClient::with_config(config).await?;

    match cli.command {
        Commands::Sync {
            tenant,
            force_full,
            no_wait,
        } => {
            let sync_id = client.trigger_sync(&tenant, force_full).await?;
            if no_wait {
                println!("{}", sync_id);
                return Ok(());
            }
            let op = client.wait_for_sync(&tenant, &sync_id).await?;
            print_operation(&op);
            if op.status != tenant_rag::SyncStatus::Completed {
                bail!("sync {} ended as {}", op.id, op.status);
            }
        }
        Commands::Status { tenant, sync_id } => {
            let lookup = match &sync_id {
                Some(id) => SyncLookup::Operation(id),
                None => SyncLookup::Tenant(&tenant),
            };
            match client.get_sync_status(lookup).await? {
                Some(op) => print_operation(&op),
                None => println!("no sync recorded for '{}'", tenant),
            }
        }
        Commands::Query {
            tenant,
            text,
            max_sources,
            min_score,
            json,
        } => {
            let result = client.run_query(&tenant, &text, max_sources, min_score).await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&result)?);
            } else {
                println!("{}\n", result.answer);
                println!(
                    "confidence {:.2}, {} ms, {:?} retrieval",
                    result.confidence, result.processing_time_ms, result.retrieval_backend
                );
                for (i, source) in result.sources.iter().enumerate() {
                    println!(
                        "[{}] {} ({:.3})\n    {}",
                        i + 1,
                        source.filename,
                        source.score,
                        source.excerpt
                    );
                }
            }
        }
        Commands::Stats { tenant } => {
            let stats = client.tenant_stats(&tenant).await?;
            println!("{}", serde_json::to_string_pretty(&stats)?);
        }
        Commands::Purge { tenant } => {
            client.purge_tenant(&tenant).await?;
            println!("purged '{}'", tenant);
        }
    }

    Ok(())
}
