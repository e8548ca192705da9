use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

use args::Args;
use config::{Config, ConfigStore};
use gateway::storage::{LogStore, MemoryLogStore};

mod args;
mod logger;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    logger::init(&args.log_filter);
    log::info!("Switchboard {}", env!("CARGO_PKG_VERSION"));

    let config = Config::load(&args.config)
        .with_context(|| format!("failed to load configuration from {}", args.config.display()))?;

    let listen = args.listen.clone().unwrap_or_else(|| config.server.listen.clone());

    if config.providers.is_empty() {
        log::warn!("No providers configured; every request will fail routing");
    }

    let config_store = Arc::new(ConfigStore::new(config));
    let store: Arc<dyn LogStore> = Arc::new(MemoryLogStore::new());

    let app = gateway::router(config_store, store);

    let listener = TcpListener::bind(&listen)
        .await
        .with_context(|| format!("failed to bind {listen}"))?;
    log::info!("Listening on {}", listener.local_addr()?);

    let shutdown = CancellationToken::new();
    let signal_token = shutdown.clone();

    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            log::info!("Shutdown signal received");
            signal_token.cancel();
        }
    });

    axum::serve(listener, app)
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await
        .context("server error")?;

    log::info!("Shut down cleanly");
    Ok(())
}
