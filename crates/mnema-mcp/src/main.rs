//! mnema-mcp - cognitive memory MCP server
//!
//! Speaks JSON-RPC over stdio. Logs go to stderr so stdout stays clean
//! for the protocol.

mod envelope;
mod protocol;
mod server;
mod tools;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tracing_subscriber::EnvFilter;

use mnema_core::{Indexer, Storage};

#[derive(Debug, Parser)]
#[command(name = "mnema-mcp", version, about = "Cognitive memory MCP server")]
struct Cli {
    /// Store file path; defaults to the platform data directory
    /// (context-index-<profile>.sqlite)
    #[arg(long)]
    db_path: Option<PathBuf>,

    /// Directory the memory roots (specs/, .opencode/) live under
    #[arg(long)]
    base_dir: Option<PathBuf>,

    /// Log filter, e.g. "info" or "mnema_core=debug"
    #[arg(long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // stderr only: stdout carries the protocol
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cli.log_level)),
        )
        .with_writer(std::io::stderr)
        .json()
        .init();

    let provider = build_provider()?;
    let storage = Arc::new(
        Storage::open(cli.db_path, provider).context("failed to open the memory store")?,
    );
    tracing::info!(
        db_path = %storage.db_path().display(),
        profile = ?storage.profile(),
        "store opened"
    );

    let base_dir = match cli.base_dir {
        Some(dir) => dir,
        None => std::env::current_dir().context("failed to resolve working directory")?,
    };
    let indexer = Arc::new(Indexer::new(Arc::clone(&storage), base_dir));

    let ctx = tools::ToolContext::new(storage, indexer);
    let server = server::McpServer::new(ctx);
    protocol::stdio::StdioTransport::new()
        .run(server)
        .await
        .context("stdio transport failed")?;
    Ok(())
}

#[cfg(feature = "local-embeddings")]
fn build_provider() -> anyhow::Result<Arc<dyn mnema_core::EmbeddingProvider>> {
    Ok(Arc::new(mnema_core::LocalEmbedder::new()))
}

#[cfg(not(feature = "local-embeddings"))]
fn build_provider() -> anyhow::Result<Arc<dyn mnema_core::EmbeddingProvider>> {
    anyhow::bail!(
        "built without the local-embeddings feature; no embedding provider is available"
    )
}
