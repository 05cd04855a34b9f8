//! Curve sniper binary
//!
//! Loads the configuration, builds the engine and runs it until Ctrl-C.

use anyhow::{Context, Result};
use clap::Parser;
use curve_sniper::config::Config;
use curve_sniper::wallet::WalletManager;
use curve_sniper::{endpoints, Engine};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(10);

/// Command line arguments
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to configuration file
    #[arg(short, long, default_value = "config.toml")]
    config: String,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    /// Emit logs as JSON lines
    #[arg(long)]
    json_logs: bool,

    /// Metrics port, overrides the config file
    #[arg(long)]
    metrics_port: Option<u16>,

    /// Build and log transactions without submitting them
    #[arg(long)]
    dry_run: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_logging(args.verbose, args.json_logs);

    info!(version = env!("CARGO_PKG_VERSION"), dry_run = args.dry_run, "Starting curve sniper");

    let config = load_config(&args.config)?;
    let wallet = WalletManager::from_config(&config.wallet).context("Failed to load wallet")?;
    info!(wallet = %wallet.pubkey(), "Wallet loaded");

    let metrics_cancel = CancellationToken::new();
    if config.monitoring.enable_metrics {
        let port = args.metrics_port.unwrap_or(config.monitoring.metrics_port);
        let cancel = metrics_cancel.clone();
        tokio::spawn(async move {
            if let Err(e) = endpoints::serve_metrics(port, cancel).await {
                error!("Metrics server error: {}", e);
            }
        });
    }

    let engine = Engine::new(config, &wallet, args.dry_run)?;
    engine.start().await?;

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for the shutdown signal")?;
    info!("Received shutdown signal");

    engine.stop(SHUTDOWN_TIMEOUT).await?;
    metrics_cancel.cancel();
    info!("Shut down gracefully");
    Ok(())
}

/// Initialize logging subsystem
fn init_logging(verbose: bool, json: bool) {
    let default_filter = if verbose {
        "curve_sniper=debug,info"
    } else {
        "curve_sniper=info,warn"
    };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| default_filter.into());

    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry
            .with(tracing_subscriber::fmt::layer().json().with_target(true))
            .init();
    } else {
        registry
            .with(tracing_subscriber::fmt::layer().with_target(true))
            .init();
    }
}

/// Load configuration from file with fallback to defaults
fn load_config(path: &str) -> Result<Config> {
    if std::path::Path::new(path).exists() {
        Config::from_file_with_env(path).with_context(|| format!("Failed to load config from {}", path))
    } else {
        warn!("Config file '{}' not found, using defaults", path);
        Ok(Config::default())
    }
}
