//! Enrollment Sync - CSV enrollment feed to Bubble and Back4App
//!
//! Downloads an enrollment export on request and upserts every row into two
//! record stores keyed by normalized email, with chunked lookups, bounded
//! concurrency and retrying HTTP.

// Module declarations
pub mod application;
pub mod domain;
pub mod infrastructure;
pub mod server;
#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;

use anyhow::{Context, Result};
use tracing::info;

use crate::application::build_services;
use crate::infrastructure::{AppConfig, init_logging};

/// Load configuration, start logging and serve the trigger until shutdown.
pub async fn run() -> Result<()> {
    let config = AppConfig::from_env().context("Failed to load configuration")?;
    init_logging(&config.logging)?;

    info!(
        "🚀 enrollment-sync {} starting (bubble table: {}, back4app table: {})",
        env!("CARGO_PKG_VERSION"),
        config.bubble.table,
        config.back4app.table
    );

    let services = build_services(&config)?;
    let state = server::AppState::from_services(services, &config.server);
    server::serve(&config.server, state).await
}
