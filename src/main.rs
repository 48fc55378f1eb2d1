//! # Goldie server binary
//!
//! Starts the stdio tool server: initializes logging, loads configuration,
//! creates the embedder and store, spawns the queue worker, and serves the
//! line-delimited tool protocol until stdin closes.
//!
//! ```bash
//! goldie                          # defaults (Ollama embedder, local db)
//! goldie --config goldie.toml     # explicit configuration
//! goldie --log-file goldie.log    # keep stderr clean for the host
//! ```
//!
//! Stdout is reserved for protocol responses; logs go to stderr or the
//! `--log-file`.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

use goldie::config;
use goldie::embedding::{self, Embedder, SharedEmbedder};
use goldie::server;
use goldie::tools::ToolContext;
use goldie::{Indexer, Queue, Store};

/// Goldie: local retrieval-augmented generation over a stdio tool protocol.
#[derive(Parser)]
#[command(
    name = "goldie",
    about = "Local RAG service for AI assistants, driven over stdin/stdout",
    version
)]
struct Cli {
    /// Path to a TOML configuration file; defaults apply when omitted.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Append logs to this file instead of stderr.
    #[arg(long)]
    log_file: Option<PathBuf>,
}

fn init_tracing(log_file: Option<&Path>) -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_env("GOLDIE_LOG").unwrap_or_else(|_| EnvFilter::new("info"));

    match log_file {
        Some(path) => {
            let file = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("Failed to open log file: {}", path.display()))?;
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_writer(Arc::new(file))
                .with_ansi(false)
                .init();
        }
        None => {
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_writer(std::io::stderr)
                .init();
        }
    }

    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_file.as_deref())?;

    let config = config::load_config(cli.config.as_deref())?;
    info!("database: {}", config.db.path.display());
    info!(
        "embedding backend: {} (model {}, {} dims)",
        config.embedding.backend,
        config.embedding.model,
        config.embedding.resolved_dimensions()
    );

    let embedder = embedding::create_embedder(&config.embedding)
        .context("Failed to initialize embedder")?;
    let embedder = SharedEmbedder::new(embedder);

    embedder
        .warmup()
        .await
        .context("Failed to warm up embedding model")?;
    info!("embedding model ready");

    let store = Arc::new(
        Store::open(&config.db.path, embedder.dimensions())
            .await
            .context("Failed to open database")?,
    );

    let indexer = Arc::new(Indexer::new(
        store.clone(),
        embedder,
        config.chunking.chunk_size,
        config.chunking.chunk_overlap,
    ));

    let queue = Arc::new(Queue::new(store.clone(), indexer.clone()));
    queue.start();

    let ctx = ToolContext::new(store.clone(), indexer, queue.clone());
    let served = server::run_stdio(ctx).await;

    queue.stop().await;
    store.close().await;

    served
}
