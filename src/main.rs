mod allowance;
mod bot;
mod config;
mod dispatch;
mod render;
mod respond;
mod secrets;
mod transport;
mod update;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::sync::watch;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, reload, util::SubscriberInitExt, EnvFilter};

use crate::config::Config;

const DEFAULT_FILTER: &str = "info,d2bot=info";
const VERBOSE_FILTER: &str = "info,d2bot=debug,teloxide=debug";

fn print_usage(program: &str) {
    println!("Usage:\n\n\t$ {} [CONFIG_FILE_PATH]", program);
}

#[tokio::main]
async fn main() -> Result<()> {
    let mut args = std::env::args();
    let program = args.next().unwrap_or_else(|| "d2bot".to_string());
    let Some(config_path) = args.next().map(PathBuf::from) else {
        print_usage(&program);
        return Ok(());
    };

    // Initialize logging; RUST_LOG wins over the config's verbose flag
    let env_filter = EnvFilter::try_from_default_env().ok();
    let from_env = env_filter.is_some();
    let (filter, filter_handle) =
        reload::Layer::new(env_filter.unwrap_or_else(|| EnvFilter::new(DEFAULT_FILTER)));
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Loading configuration from: {}", config_path.display());
    let config = Config::load(&config_path)
        .await
        .with_context(|| format!("Failed to load config from {}", config_path.display()))?;

    if config.is_verbose && !from_env {
        filter_handle
            .reload(EnvFilter::new(VERBOSE_FILTER))
            .context("Failed to enable verbose logging")?;
    }

    info!("Configuration loaded successfully");
    info!("  d2: {}", config.renderer.d2_path.display());
    info!("  Rasterizer: {}", config.renderer.rasterizer.command);

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Shutdown requested, cancelling in-flight renders");
            let _ = shutdown_tx.send(true);
        }
    });

    bot::run(Arc::new(config), shutdown_rx).await?;

    Ok(())
}
