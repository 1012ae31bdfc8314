//! Record stores: the two remote tables enrollment rows are upserted into
//!
//! Both adapters speak JSON over the shared `ResilientHttpClient` and differ
//! only in auth headers, search syntax, pagination and update verb.

pub mod bubble;
pub mod parse;

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;
use url::Url;

use super::http_client::HttpError;

pub use bubble::BubbleDataApiStore;
pub use parse::ParseServerStore;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    #[error(transparent)]
    Http(#[from] HttpError),

    #[error("{store}: could not decode response: {message}")]
    Decode { store: String, message: String },

    #[error("{store}: invalid URL: {message}")]
    Url { store: String, message: String },
}

#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Short name used in logs and reports
    fn name(&self) -> &str;

    /// All records whose email field matches one of `emails`, across pages.
    /// An empty slice performs no request.
    async fn search_by_emails(&self, emails: &[String]) -> Result<Vec<Value>, StoreError>;

    async fn create(&self, body: &Value) -> Result<(), StoreError>;

    async fn update(&self, record_id: &str, body: &Value) -> Result<(), StoreError>;
}

/// `{base}/{segments...}` without doubling or dropping slashes.
pub(crate) fn join_segments(store: &str, base: &Url, segments: &[&str]) -> Result<Url, StoreError> {
    let mut url = base.clone();
    {
        let mut path = url.path_segments_mut().map_err(|()| StoreError::Url {
            store: store.to_string(),
            message: format!("{base} cannot be a base URL"),
        })?;
        path.pop_if_empty();
        for segment in segments {
            path.push(segment);
        }
    }
    Ok(url)
}

/// Empty bodies decode as the default value.
pub(crate) fn decode_body<T>(store: &str, body: &str) -> Result<T, StoreError>
where
    T: serde::de::DeserializeOwned + Default,
{
    if body.trim().is_empty() {
        return Ok(T::default());
    }
    serde_json::from_str(body).map_err(|e| StoreError::Decode {
        store: store.to_string(),
        message: e.to_string(),
    })
}
