//! Configuration infrastructure
//!
//! All settings come from the process environment. They are read once at
//! startup through the `config` crate into a flat `EnvSettings`, then
//! checked and assembled into the typed `AppConfig` sections.

use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::path::PathBuf;

use serde::Deserialize;
use thiserror::Error;
use url::Url;

use super::http_client::HttpClientConfig;
use super::retry_policy::RetryPolicy;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read environment: {source}")]
    Source {
        #[from]
        source: config::ConfigError,
    },

    #[error("Missing required environment variable {0}")]
    Missing(&'static str),

    #[error("Invalid value for {key}: {message}")]
    Invalid { key: &'static str, message: String },
}

/// Default values for optional settings
pub mod defaults {
    /// Bubble field searched by the email lookup
    pub const BUBBLE_SEARCH_KEY: &str = "UserPreLicensingEMAIL";

    /// Bubble Data API page size (its documented maximum)
    pub const BUBBLE_PAGE_SIZE: u32 = 100;

    pub const BACK4APP_API_BASE_URL: &str = "https://parseapi.back4app.com/classes";

    pub const BACK4APP_TABLE_NAME: &str = "API_Connector_Users";

    /// Parse Server query limit
    pub const BACK4APP_PAGE_SIZE: u32 = 1000;

    /// Rows reconciling at once across the whole run
    pub const MAX_CONCURRENT: usize = 25;

    /// Rows per lookup batch
    pub const CHUNK_SIZE: usize = 25;

    /// Attempts per request, first one included
    pub const RETRY_TOTAL: u32 = 3;

    /// Seconds, doubled per retry
    pub const BACKOFF_FACTOR: f64 = 1.0;

    pub const RETRY_STATUS_FORCELIST: &str = "429,500,502,503,504";

    pub const HTTP_TIMEOUT_SECONDS: u64 = 30;

    pub const SYNC_TRIGGER_HEADER: &str = "bubble";

    pub const HOST: &str = "0.0.0.0";

    pub const PORT: u16 = 8080;

    pub const LOG_LEVEL: &str = "info";
}

/// A credential. Never printed.
#[derive(Clone, PartialEq, Eq)]
pub struct Secret(String);

impl Secret {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Secret(***)")
    }
}

/// Raw environment, one field per variable (lowercased by `config`).
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct EnvSettings {
    pub bubble_api_base_url: Option<String>,
    pub bubble_api_token: Option<String>,
    pub bubble_table_name: Option<String>,
    pub bubble_search_key: Option<String>,
    pub bubble_page_size: Option<u32>,

    pub back4app_api_base_url: Option<String>,
    pub back4app_app_id: Option<String>,
    pub back4app_master_key: Option<String>,
    pub back4app_table_name: Option<String>,
    pub back4app_page_size: Option<u32>,

    pub max_concurrent: Option<usize>,
    pub chunk_size: Option<usize>,
    pub retry_total: Option<u32>,
    pub backoff_factor: Option<f64>,
    pub retry_status_forcelist: Option<String>,
    pub http_timeout_seconds: Option<u64>,
    pub sync_dedupe_chunk_emails: Option<bool>,

    pub sync_trigger_secret: Option<String>,
    pub sync_trigger_header: Option<String>,
    pub host: Option<String>,
    pub port: Option<u16>,

    pub log_level: Option<String>,
    pub log_json: Option<bool>,
    pub log_dir: Option<String>,
}

impl EnvSettings {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::load(config::Environment::default())
    }

    /// Same as `from_env` but reads `vars` instead of the process environment.
    pub fn from_map(vars: HashMap<String, String>) -> Result<Self, ConfigError> {
        Self::load(config::Environment::default().source(Some(vars)))
    }

    fn load(source: config::Environment) -> Result<Self, ConfigError> {
        let settings = config::Config::builder().add_source(source).build()?;
        Ok(settings.try_deserialize()?)
    }
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// Header carrying the shared secret
    pub trigger_header: String,
    pub trigger_secret: Secret,
}

impl ServerConfig {
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SyncConfig {
    pub chunk_size: usize,
    pub max_concurrent: usize,
    pub dedupe_chunk_emails: bool,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            chunk_size: defaults::CHUNK_SIZE,
            max_concurrent: defaults::MAX_CONCURRENT,
            dedupe_chunk_emails: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoggingConfig {
    /// `tracing` level or filter directive; `RUST_LOG` wins when set
    pub level: String,
    pub json: bool,
    /// Also write to `<dir>/enrollment-sync.log` when set
    pub log_dir: Option<PathBuf>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: defaults::LOG_LEVEL.to_string(),
            json: false,
            log_dir: None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct BubbleConfig {
    pub base_url: Url,
    pub api_token: Secret,
    pub table: String,
    pub search_key: String,
    pub page_size: u32,
}

#[derive(Debug, Clone)]
pub struct Back4AppConfig {
    pub base_url: Url,
    pub app_id: String,
    pub master_key: Secret,
    pub table: String,
    pub page_size: u32,
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub sync: SyncConfig,
    pub retry: RetryPolicy,
    pub http: HttpClientConfig,
    pub logging: LoggingConfig,
    pub bubble: BubbleConfig,
    pub back4app: Back4AppConfig,
}

impl AppConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_settings(EnvSettings::from_env()?)
    }

    pub fn from_settings(env: EnvSettings) -> Result<Self, ConfigError> {
        let bubble = BubbleConfig {
            base_url: parse_base_url(
                "BUBBLE_API_BASE_URL",
                &required("BUBBLE_API_BASE_URL", env.bubble_api_base_url)?,
            )?,
            api_token: Secret::new(required("BUBBLE_API_TOKEN", env.bubble_api_token)?),
            table: required("BUBBLE_TABLE_NAME", env.bubble_table_name)?,
            search_key: non_empty_or(env.bubble_search_key, defaults::BUBBLE_SEARCH_KEY),
            page_size: positive(
                "BUBBLE_PAGE_SIZE",
                env.bubble_page_size.unwrap_or(defaults::BUBBLE_PAGE_SIZE),
            )?,
        };

        let back4app = Back4AppConfig {
            base_url: parse_base_url(
                "BACK4APP_API_BASE_URL",
                &non_empty_or(env.back4app_api_base_url, defaults::BACK4APP_API_BASE_URL),
            )?,
            app_id: required("BACK4APP_APP_ID", env.back4app_app_id)?,
            master_key: Secret::new(required("BACK4APP_MASTER_KEY", env.back4app_master_key)?),
            table: non_empty_or(env.back4app_table_name, defaults::BACK4APP_TABLE_NAME),
            page_size: positive(
                "BACK4APP_PAGE_SIZE",
                env.back4app_page_size.unwrap_or(defaults::BACK4APP_PAGE_SIZE),
            )?,
        };

        let sync = SyncConfig {
            chunk_size: positive("CHUNK_SIZE", env.chunk_size.unwrap_or(defaults::CHUNK_SIZE))?,
            max_concurrent: positive(
                "MAX_CONCURRENT",
                env.max_concurrent.unwrap_or(defaults::MAX_CONCURRENT),
            )?,
            dedupe_chunk_emails: env.sync_dedupe_chunk_emails.unwrap_or(false),
        };

        let backoff_factor = env.backoff_factor.unwrap_or(defaults::BACKOFF_FACTOR);
        if !backoff_factor.is_finite() || backoff_factor < 0.0 {
            return Err(ConfigError::Invalid {
                key: "BACKOFF_FACTOR",
                message: format!("{backoff_factor} is not a non-negative number"),
            });
        }
        let retry = RetryPolicy {
            max_attempts: positive("RETRY_TOTAL", env.retry_total.unwrap_or(defaults::RETRY_TOTAL))?,
            backoff_factor,
            retry_statuses: parse_status_list(
                env.retry_status_forcelist
                    .as_deref()
                    .unwrap_or(defaults::RETRY_STATUS_FORCELIST),
            )?,
        };

        let http = HttpClientConfig {
            timeout_seconds: positive(
                "HTTP_TIMEOUT_SECONDS",
                env.http_timeout_seconds.unwrap_or(defaults::HTTP_TIMEOUT_SECONDS),
            )?,
            ..HttpClientConfig::default()
        };

        let server = ServerConfig {
            host: non_empty_or(env.host, defaults::HOST),
            port: env.port.unwrap_or(defaults::PORT),
            trigger_header: non_empty_or(env.sync_trigger_header, defaults::SYNC_TRIGGER_HEADER)
                .to_lowercase(),
            trigger_secret: Secret::new(required("SYNC_TRIGGER_SECRET", env.sync_trigger_secret)?),
        };

        let logging = LoggingConfig {
            level: non_empty_or(env.log_level, defaults::LOG_LEVEL),
            json: env.log_json.unwrap_or(false),
            log_dir: env.log_dir.filter(|d| !d.trim().is_empty()).map(PathBuf::from),
        };

        Ok(Self {
            server,
            sync,
            retry,
            http,
            logging,
            bubble,
            back4app,
        })
    }
}

fn required(key: &'static str, value: Option<String>) -> Result<String, ConfigError> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .ok_or(ConfigError::Missing(key))
}

fn non_empty_or(value: Option<String>, default: &str) -> String {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .unwrap_or_else(|| default.to_string())
}

fn positive<T>(key: &'static str, value: T) -> Result<T, ConfigError>
where
    T: PartialOrd + Default + fmt::Display,
{
    if value > T::default() {
        Ok(value)
    } else {
        Err(ConfigError::Invalid {
            key,
            message: format!("{value} must be greater than zero"),
        })
    }
}

fn parse_base_url(key: &'static str, raw: &str) -> Result<Url, ConfigError> {
    let url = Url::parse(raw).map_err(|e| ConfigError::Invalid {
        key,
        message: format!("{raw}: {e}"),
    })?;
    if !matches!(url.scheme(), "http" | "https") || url.cannot_be_a_base() {
        return Err(ConfigError::Invalid {
            key,
            message: format!("{raw} is not an http(s) base URL"),
        });
    }
    Ok(url)
}

/// `"429, 500,502"` -> {429, 500, 502}
pub fn parse_status_list(raw: &str) -> Result<BTreeSet<u16>, ConfigError> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| {
            s.parse::<u16>()
                .ok()
                .filter(|code| (100..=599).contains(code))
                .ok_or_else(|| ConfigError::Invalid {
                    key: "RETRY_STATUS_FORCELIST",
                    message: format!("'{s}' is not an HTTP status code"),
                })
        })
        .collect()
}
