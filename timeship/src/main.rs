use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

mod config;
mod http;
mod server;
mod storage;

#[cfg(test)]
mod api_tests;

use config::{Overrides, Settings};
use http::AppState;
use server::HttpServer;
use storage::StorageRegistry;
use storage::local::LocalStorage;

#[derive(Parser)]
#[command(
    name = "timeship",
    version,
    about = "Browse a directory tree and its ZFS snapshots over HTTP"
)]
struct Cli {
    /// Root directory to serve (overrides TIMESHIP_ROOT)
    #[arg(long)]
    root: Option<PathBuf>,

    /// Listen address, e.g. ":8080" or "127.0.0.1:9000" (overrides TIMESHIP_ADDRESS)
    #[arg(long)]
    address: Option<String>,

    /// Prefix under which API routes are mounted (overrides TIMESHIP_API_PREFIX)
    #[arg(long)]
    api_prefix: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr))
        .init();

    let settings = Settings::load(Overrides {
        root: cli.root,
        address: cli.address,
        api_prefix: cli.api_prefix,
    })?;

    info!(version = env!("CARGO_PKG_VERSION"), "timeship starting");
    info!(root = %settings.root.display(), prefix = %settings.api_prefix, "configuration");

    let local = LocalStorage::open(&settings.root)
        .with_context(|| format!("opening storage root {}", settings.root.display()))?;
    let mut registry = StorageRegistry::new("local");
    registry.register("local", Arc::new(local));
    info!(
        default = registry.default_name(),
        storages = ?registry.names(),
        "storages registered"
    );

    let registry = Arc::new(registry);
    let state = AppState {
        registry: Arc::clone(&registry),
        settings: Arc::new(settings.clone()),
    };
    let router = http::router(state);

    let shutdown = CancellationToken::new();
    spawn_signal_handler(shutdown.clone());

    HttpServer::new(settings.listen_addr(), router)
        .start(shutdown)
        .await?;

    // The router and its state are gone once the server future resolves;
    // release root handles in reverse registration order.
    match Arc::try_unwrap(registry) {
        Ok(mut registry) => registry.shutdown(),
        Err(_) => error!("storage registry still shared at shutdown"),
    }

    info!("server stopped");
    Ok(())
}

fn spawn_signal_handler(shutdown: CancellationToken) {
    tokio::spawn(async move {
        let ctrl_c = tokio::signal::ctrl_c();
        let mut terminate =
            match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
                Ok(signal) => signal,
                Err(err) => {
                    error!(error = %err, "failed to install SIGTERM handler");
                    let _ = ctrl_c.await;
                    shutdown.cancel();
                    return;
                }
            };
        tokio::select! {
            _ = ctrl_c => info!("received SIGINT, shutting down"),
            _ = terminate.recv() => info!("received SIGTERM, shutting down"),
        }
        shutdown.cancel();
    });
}
