//! Resilient HTTP client used for every record-store call
//!
//! One client per target. The wire sits behind the `Transport` trait so the
//! retry loop can be driven by scripted responses in tests.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, Method};
use serde_json::Value;
use thiserror::Error;
use tokio::time::sleep;
use tracing::{debug, error, warn};
use url::Url;

use super::retry_policy::RetryPolicy;

/// HTTP client configuration
#[derive(Debug, Clone, serde::Serialize)]
pub struct HttpClientConfig {
    pub user_agent: String,
    pub timeout_seconds: u64,
}

impl Default for HttpClientConfig {
    fn default() -> Self {
        Self {
            user_agent: format!("enrollment-sync/{}", env!("CARGO_PKG_VERSION")),
            timeout_seconds: 30,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct OutboundRequest {
    pub method: Method,
    pub url: Url,
    pub headers: Vec<(String, String)>,
    pub body: Option<Value>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportResponse {
    pub status: u16,
    pub body: String,
}

impl TransportResponse {
    pub fn new(status: u16, body: impl Into<String>) -> Self {
        Self {
            status,
            body: body.into(),
        }
    }

    pub const fn is_success(&self) -> bool {
        self.status >= 200 && self.status < 300
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    #[error("request timed out: {0}")]
    Timeout(String),

    #[error("network error: {0}")]
    Network(String),
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum HttpError {
    #[error("{target} {method} {url}: gave up after {attempts} attempts: {last_error}")]
    TransientExhausted {
        target: String,
        method: String,
        url: String,
        attempts: u32,
        last_error: String,
    },

    #[error("{target} {method} {url}: rejected with HTTP {status}: {body}")]
    HardFailure {
        target: String,
        method: String,
        url: String,
        status: u16,
        body: String,
    },

    #[error("failed to build HTTP client: {0}")]
    Build(String),
}

/// A single request/response exchange, no retries.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(&self, request: &OutboundRequest) -> Result<TransportResponse, TransportError>;
}

/// Production transport over a shared reqwest client.
#[derive(Debug, Clone)]
pub struct ReqwestTransport {
    client: Client,
}

impl ReqwestTransport {
    pub fn new(config: &HttpClientConfig) -> Result<Self, HttpError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_seconds))
            .user_agent(config.user_agent.clone())
            .gzip(true)
            .build()
            .map_err(|e| HttpError::Build(e.to_string()))?;
        Ok(Self { client })
    }

    pub fn client(&self) -> &Client {
        &self.client
    }
}

fn classify(err: &reqwest::Error) -> TransportError {
    if err.is_timeout() {
        TransportError::Timeout(err.to_string())
    } else {
        TransportError::Network(err.to_string())
    }
}

#[async_trait]
impl Transport for ReqwestTransport {
    async fn send(&self, request: &OutboundRequest) -> Result<TransportResponse, TransportError> {
        let mut builder = self
            .client
            .request(request.method.clone(), request.url.clone());
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        if let Some(body) = &request.body {
            builder = builder.json(body);
        }

        let response = builder.send().await.map_err(|e| classify(&e))?;
        let status = response.status().as_u16();
        let body = response.text().await.map_err(|e| classify(&e))?;
        Ok(TransportResponse { status, body })
    }
}

/// Retrying client bound to one target.
#[derive(Clone)]
pub struct ResilientHttpClient {
    target: String,
    transport: Arc<dyn Transport>,
    default_headers: Vec<(String, String)>,
    policy: RetryPolicy,
}

impl std::fmt::Debug for ResilientHttpClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // header values carry credentials
        let header_names: Vec<&str> = self.default_headers.iter().map(|(k, _)| k.as_str()).collect();
        f.debug_struct("ResilientHttpClient")
            .field("target", &self.target)
            .field("headers", &header_names)
            .field("policy", &self.policy)
            .finish_non_exhaustive()
    }
}

impl ResilientHttpClient {
    pub fn new(target: impl Into<String>, transport: Arc<dyn Transport>, policy: RetryPolicy) -> Self {
        Self {
            target: target.into(),
            transport,
            default_headers: vec![("Content-Type".to_string(), "application/json".to_string())],
            policy,
        }
    }

    #[must_use]
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.default_headers.push((name.into(), value.into()));
        self
    }

    pub fn target(&self) -> &str {
        &self.target
    }

    /// Send with retries. 2xx returns the response; retryable statuses and
    /// transport errors are retried up to the policy's attempt budget; any
    /// other status fails immediately.
    pub async fn execute(
        &self,
        method: Method,
        url: Url,
        body: Option<&Value>,
    ) -> Result<TransportResponse, HttpError> {
        let request = OutboundRequest {
            method,
            url,
            headers: self.default_headers.clone(),
            body: body.cloned(),
        };
        let max_attempts = self.policy.max_attempts.max(1);
        let mut last_error = String::new();

        for attempt in 1..=max_attempts {
            debug!(
                "🌐 [{}] {} (attempt {}/{}) : {}",
                self.target, request.method, attempt, max_attempts, request.url
            );

            match self.transport.send(&request).await {
                Ok(response) if response.is_success() => {
                    debug!(
                        "✅ [{}] {} {} -> {} (attempt {}/{})",
                        self.target, request.method, request.url, response.status, attempt, max_attempts
                    );
                    return Ok(response);
                }
                Ok(response) if self.policy.is_retryable_status(response.status) => {
                    warn!(
                        "⚠️ [{}] {} {} -> {} (attempt {}/{})",
                        self.target, request.method, request.url, response.status, attempt, max_attempts
                    );
                    last_error = format!("HTTP {}: {}", response.status, response.body);
                }
                Ok(response) => {
                    error!(
                        "❌ [{}] {} {} -> {} (attempt {}/{}): {}",
                        self.target,
                        request.method,
                        request.url,
                        response.status,
                        attempt,
                        max_attempts,
                        response.body
                    );
                    return Err(HttpError::HardFailure {
                        target: self.target.clone(),
                        method: request.method.to_string(),
                        url: request.url.to_string(),
                        status: response.status,
                        body: response.body,
                    });
                }
                Err(e) => {
                    warn!(
                        "⚠️ [{}] {} {} failed (attempt {}/{}): {}",
                        self.target, request.method, request.url, attempt, max_attempts, e
                    );
                    last_error = e.to_string();
                }
            }

            if attempt < max_attempts {
                let delay = self.policy.backoff_for(attempt);
                debug!("⏳ [{}] retrying in {:?}", self.target, delay);
                sleep(delay).await;
            }
        }

        error!(
            "❌ [{}] {} {} gave up after {} attempts",
            self.target, request.method, request.url, max_attempts
        );
        Err(HttpError::TransientExhausted {
            target: self.target.clone(),
            method: request.method.to_string(),
            url: request.url.to_string(),
            attempts: max_attempts,
            last_error,
        })
    }
}
