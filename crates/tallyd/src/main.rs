//! # tallyd
//!
//! Tally server binary — binds the HTTP/WebSocket server and runs until
//! ctrl-c.

#![deny(unsafe_code)]

use anyhow::{Context, Result};
use clap::Parser;
use tracing_subscriber::EnvFilter;

use tally_server::config::ServerConfig;
use tally_server::server::TallyServer;

/// Tally estimation room server.
#[derive(Parser, Debug)]
#[command(name = "tallyd", about = "Tally estimation room server")]
struct Cli {
    /// Host to bind.
    #[arg(long, default_value = "127.0.0.1")]
    host: String,

    /// Port to bind (0 for auto-assign).
    #[arg(long, default_value = "9613")]
    port: u16,

    /// Maximum concurrent WebSocket connections.
    #[arg(long)]
    max_connections: Option<usize>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let metrics_handle = tally_server::metrics::install_recorder();

    let defaults = ServerConfig::default();
    let config = ServerConfig {
        host: args.host,
        port: args.port,
        max_connections: args.max_connections.unwrap_or(defaults.max_connections),
        ..defaults
    };

    let server = TallyServer::new(config, metrics_handle);
    let (addr, handle) = server.listen().await.context("Failed to bind server")?;

    tracing::info!("tallyd listening on http://{addr} (ws at /ws/{{room}})");

    // Wait for shutdown signal
    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for ctrl-c")?;

    tracing::info!("Shutting down...");
    server.shutdown().shutdown();
    let _ = handle.await;

    tracing::info!("Shutdown complete");
    Ok(())
}
