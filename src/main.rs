use std::sync::Arc;

use margay::bootstrap::app;
use margay::config::Configuration;
use tracing::{error, info};

const CONFIG_PATH_ENV_VAR: &str = "MARGAY_CONFIG_PATH";
const DEFAULT_CONFIG_PATH: &str = "./margay.toml";

#[tokio::main]
async fn main() {
    let config_path = std::env::var(CONFIG_PATH_ENV_VAR).unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_string());

    let config = match Configuration::load(&config_path) {
        Ok(config) => Arc::new(config),
        Err(err) => {
            eprintln!("margay: failed to load configuration from {config_path}: {err}");
            std::process::exit(1);
        }
    };

    let tracker = match app::start(config).await {
        Ok(tracker) => tracker,
        Err(err) => {
            error!("margay: startup failed: {err}");
            std::process::exit(1);
        }
    };

    if let Err(err) = tokio::signal::ctrl_c().await {
        error!("failed to listen for the shutdown signal: {err}");
    }

    info!("shutting down: syncing swarms and flushing stats..");
    tracker.shutdown().await;
    info!("goodbye");
}
