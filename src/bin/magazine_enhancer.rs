// magazine_enhancer - photo enhancement HTTP daemon
// Loads the models once, then serves the multipart enhancement API

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use std::sync::Arc;
use std::time::Instant;
use tokio::net::TcpListener;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use magazine_enhancer::api::{self, AppState, ServiceSettings};
use magazine_enhancer::{weights, Config, Enhancer, Metrics, ModelHandles, StorageGateway};

#[derive(Parser)]
#[command(name = "magazine_enhancer", version, about = "Magazine-grade AI photo enhancement service")]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,

    #[command(flatten)]
    config: Config,
}

#[derive(Subcommand)]
enum Command {
    /// Run the HTTP server (default)
    Serve,
    /// Download missing model weights into --weights-dir
    FetchWeights,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info"))
        )
        .init();

    let cli = Cli::parse();
    match cli.command.unwrap_or(Command::Serve) {
        Command::Serve => serve(cli.config).await,
        Command::FetchWeights => fetch_weights(&cli.config).await,
    }
}

async fn serve(config: Config) -> Result<()> {
    info!("📸 Starting Magazine Enhancer v{}", env!("CARGO_PKG_VERSION"));
    let started = Instant::now();

    let temp_root = config.temp_root();
    std::fs::create_dir_all(&temp_root)
        .with_context(|| format!("Failed to create temp root {}", temp_root.display()))?;

    let metrics = Metrics::new();

    // Models load before the listener exists
    let handles = ModelHandles::load(&config).context("Failed to load enhancement models")?;
    let enhancer = Arc::new(Enhancer::new(handles, config.max_side, metrics.clone()));
    let storage = Arc::new(StorageGateway::from_config(&config, metrics.clone()));

    let state = AppState {
        enhancer,
        storage,
        metrics,
        settings: Arc::new(ServiceSettings::from_config(&config)),
        started,
    };

    let listener = TcpListener::bind(&config.bind)
        .await
        .with_context(|| format!("Failed to bind {}", config.bind))?;
    info!("   ✓ Listening on http://{}", listener.local_addr()?);
    info!("✅ System ready in {} ms", started.elapsed().as_millis());

    axum::serve(listener, api::router(state))
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("HTTP server failed")?;

    info!("👋 Shut down cleanly");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    info!("Shutdown requested, draining in-flight requests");
}

async fn fetch_weights(config: &Config) -> Result<()> {
    info!("🚀 Fetching model weights into {}", config.weights_dir.display());
    let summary = weights::fetch_weights(&config.weights_dir).await?;
    info!(
        "   downloaded: {}, already present: {}, failed: {}",
        summary.downloaded.len(),
        summary.skipped.len(),
        summary.failed.len()
    );
    if !summary.is_complete() {
        bail!("{} weight file(s) could not be downloaded", summary.failed.len());
    }
    info!("✨ All models ready!");
    Ok(())
}
