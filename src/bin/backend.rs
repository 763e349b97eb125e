//! gpuwire backend daemon.
//!
//! Loads the JSON endpoint configuration, resolves the configured plugins
//! against the linked capability providers, and serves until interrupted.

use std::fs::File;
use std::io::BufReader;
use std::path::PathBuf;

use clap::Parser;
use serde_json::Value;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use gpuwire::process::DEFAULT_MAX_CONNECTIONS;
use gpuwire::{endpoint_from_json, plugins_from_json, PluginLoader, Process};

#[derive(Parser, Debug)]
#[command(name = "gpuwire-backend", about = "Serve GPU-API calls for remote frontends")]
struct Args {
    /// Path to the JSON endpoint configuration.
    #[arg(short, long, default_value = "gpuwire.json")]
    config: PathBuf,

    /// Maximum concurrently served connections.
    #[arg(long, default_value_t = DEFAULT_MAX_CONNECTIONS)]
    max_connections: usize,

    /// Enable debug logging (overridden by RUST_LOG when set).
    #[arg(short, long)]
    debug: bool,
}

/// Capability providers linked into this binary register here.
fn linked_providers() -> PluginLoader {
    PluginLoader::new()
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let fallback = if args.debug { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(fallback)),
        )
        .init();

    let config: Value = serde_json::from_reader(BufReader::new(File::open(&args.config)?))?;
    let endpoint = endpoint_from_json(&config, 0)?;
    let plugins = plugins_from_json(&config);

    let registry = linked_providers().load(&plugins);
    if registry.is_empty() {
        warn!("no handlers loaded; every routine will report unknown");
    } else {
        info!(handlers = ?registry.names().collect::<Vec<_>>(), "handlers loaded");
    }

    let mut process =
        Process::new(endpoint.build()?, registry).with_max_connections(args.max_connections);

    let shutdown = process.shutdown_handle();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("interrupt received, stopping accept loop");
            shutdown.shutdown();
        }
    });

    process.serve().await?;
    info!(addr = ?process.bound_addr(), "serving");
    process.run().await?;
    info!("backend stopped");
    Ok(())
}
