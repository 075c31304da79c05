//! Logging setup.
//!
//! One `tracing` subscriber for the whole process. The threshold comes from
//! the `log_level` configuration option; `RUST_LOG` overrides it when set.
use std::sync::Once;

use tracing::info;
use tracing_subscriber::EnvFilter;

use crate::config::Configuration;

static INIT: Once = Once::new();

pub fn setup(config: &Configuration) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(config.log_level.clone()));

    INIT.call_once(|| {
        tracing_subscriber::fmt().with_env_filter(filter).init();
        info!("logging initialized");
    });
}
