//! Infrastructure layer: HTTP, record stores, CSV download, configuration, logging

pub mod config;
pub mod csv_source;
pub mod http_client;
pub mod logging;
pub mod record_store;
pub mod retry_policy;

pub use config::{AppConfig, ConfigError, EnvSettings, LoggingConfig, Secret};
pub use csv_source::{CsvSource, CsvSourceError, HttpCsvSource};
pub use http_client::{
    HttpClientConfig, HttpError, OutboundRequest, ReqwestTransport, ResilientHttpClient, Transport,
    TransportError, TransportResponse,
};
pub use logging::init_logging;
pub use record_store::{BubbleDataApiStore, ParseServerStore, RecordStore, StoreError};
pub use retry_policy::RetryPolicy;
