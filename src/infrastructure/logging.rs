//! Logging system configuration and initialization
//!
//! - Console output, plain or JSON
//! - Optional file output under `LOG_DIR` through a non-blocking writer
//! - `RUST_LOG` overrides the configured level
//! - UTC timestamps

use std::fs;
use std::sync::Mutex;

use anyhow::{Context, Result};
use chrono::Utc;
use lazy_static::lazy_static;
use tracing::info;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::{non_blocking, rolling};
use tracing_subscriber::{
    EnvFilter, Layer, Registry,
    fmt::{self, time::FormatTime},
    layer::SubscriberExt,
    util::SubscriberInitExt,
};

pub use crate::infrastructure::config::LoggingConfig;

const LOG_FILE_NAME: &str = "enrollment-sync.log";

// Keeps the file writer alive for the life of the process
lazy_static! {
    static ref LOG_GUARDS: Mutex<Vec<WorkerGuard>> = Mutex::new(Vec::new());
}

struct UtcTimeFormatter;

impl FormatTime for UtcTimeFormatter {
    fn format_time(&self, w: &mut fmt::format::Writer<'_>) -> std::fmt::Result {
        write!(w, "{}", Utc::now().format("%Y-%m-%dT%H:%M:%S%.3fZ"))
    }
}

/// Filter for `level`, with chatty HTTP internals capped unless tracing.
pub fn build_env_filter(level: &str) -> EnvFilter {
    if let Ok(filter) = EnvFilter::try_from_default_env() {
        return filter;
    }

    let mut filter = EnvFilter::try_new(level).unwrap_or_else(|_| EnvFilter::new("info"));
    if !level.to_lowercase().contains("trace") {
        for directive in ["hyper=warn", "hyper_util=warn", "reqwest=info", "h2=warn"] {
            if let Ok(d) = directive.parse() {
                filter = filter.add_directive(d);
            }
        }
    }
    filter
}

pub fn init_logging(config: &LoggingConfig) -> Result<()> {
    let env_filter = build_env_filter(&config.level);

    let console_layer = if config.json {
        fmt::Layer::new()
            .json()
            .with_timer(UtcTimeFormatter)
            .with_current_span(true)
            .with_writer(std::io::stdout)
            .boxed()
    } else {
        fmt::Layer::new()
            .with_timer(UtcTimeFormatter)
            .with_target(false)
            .with_writer(std::io::stdout)
            .boxed()
    };

    let file_layer = match &config.log_dir {
        Some(dir) => {
            fs::create_dir_all(dir)
                .with_context(|| format!("Failed to create log directory {}", dir.display()))?;
            let (writer, guard) = non_blocking(rolling::never(dir, LOG_FILE_NAME));
            LOG_GUARDS
                .lock()
                .map_err(|_| anyhow::anyhow!("log guard registry poisoned"))?
                .push(guard);

            let layer = fmt::Layer::new()
                .with_timer(UtcTimeFormatter)
                .with_writer(writer)
                .with_ansi(false);
            Some(if config.json {
                layer.json().with_current_span(true).boxed()
            } else {
                layer.with_target(true).boxed()
            })
        }
        None => None,
    };

    Registry::default()
        .with(env_filter)
        .with(console_layer)
        .with(file_layer)
        .try_init()
        .context("Failed to install tracing subscriber")?;

    info!(
        "📝 Logging initialized (level: {}, json: {}, file: {})",
        config.level,
        config.json,
        config
            .log_dir
            .as_ref()
            .map_or_else(|| "off".to_string(), |d| d.join(LOG_FILE_NAME).display().to_string())
    );
    Ok(())
}
