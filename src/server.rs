//! HTTP trigger
//!
//! `POST /` (alias `POST /sync`) with a JSON body `{"csvfile": "<url>"}` and
//! the shared-secret header downloads the CSV and runs one sync, answering
//! with the run's `SyncReport`. `GET /health` is a liveness probe.

use std::future::Future;
use std::sync::Arc;

use anyhow::{Context, Result};
use axum::{
    Json, Router,
    body::Bytes,
    extract::{DefaultBodyLimit, State},
    http::{HeaderMap, StatusCode, header::CONTENT_TYPE},
    response::{IntoResponse, Response},
    routing::{get, post},
};
use serde_json::{Value, json};
use tokio::net::TcpListener;
use tracing::{error, info, warn};
use url::Url;

use crate::application::{Services, SyncOrchestrator};
use crate::infrastructure::config::{Secret, ServerConfig};
use crate::infrastructure::csv_source::CsvSource;

const MAX_HTTP_BODY_BYTES: usize = 64 * 1024;

#[derive(Clone)]
pub struct AppState {
    orchestrator: Arc<SyncOrchestrator>,
    csv_source: Arc<dyn CsvSource>,
    trigger_header: String,
    trigger_secret: Secret,
}

impl AppState {
    pub fn new(
        orchestrator: Arc<SyncOrchestrator>,
        csv_source: Arc<dyn CsvSource>,
        trigger_header: impl Into<String>,
        trigger_secret: Secret,
    ) -> Self {
        Self {
            orchestrator,
            csv_source,
            trigger_header: trigger_header.into(),
            trigger_secret,
        }
    }

    pub fn from_services(services: Services, config: &ServerConfig) -> Self {
        Self::new(
            services.orchestrator,
            services.csv_source,
            config.trigger_header.clone(),
            config.trigger_secret.clone(),
        )
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/", post(trigger_sync))
        .route("/sync", post(trigger_sync))
        .route("/health", get(health))
        .with_state(state)
        .layer(DefaultBodyLimit::max(MAX_HTTP_BODY_BYTES))
}

pub async fn serve(config: &ServerConfig, state: AppState) -> Result<()> {
    let bind_addr = config.bind_address();
    let listener = TcpListener::bind(&bind_addr)
        .await
        .with_context(|| format!("failed to bind {bind_addr}"))?;
    serve_with_listener(listener, state, shutdown_signal()).await
}

pub async fn serve_with_listener<F>(listener: TcpListener, state: AppState, shutdown: F) -> Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let local_addr = listener.local_addr().context("listener has no local address")?;
    info!("🌐 Trigger listening on http://{}", local_addr);
    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown)
        .await
        .context("axum server failed")
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }
    info!("🛑 Shutdown signal received");
}

fn error_response(status: StatusCode, message: impl Into<String>) -> Response {
    (status, Json(json!({ "error": message.into() }))).into_response()
}

async fn health() -> impl IntoResponse {
    Json(json!({
        "status": "ok",
        "service": "enrollment-sync",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

/// Extract and check `csvfile`: a non-empty http(s) URL.
fn csv_url_from_body(body: &[u8]) -> Result<Url, String> {
    let value: Value =
        serde_json::from_slice(body).map_err(|e| format!("Request body must be JSON: {e}"))?;
    let Some(object) = value.as_object() else {
        return Err("Request body must be a JSON object with a 'csvfile' key".to_string());
    };
    let Some(raw) = object.get("csvfile") else {
        return Err("Request body must be a JSON object with a 'csvfile' key".to_string());
    };
    let raw = raw
        .as_str()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .ok_or_else(|| "Invalid or empty URL".to_string())?;
    let url = Url::parse(raw).map_err(|e| format!("Invalid URL '{raw}': {e}"))?;
    if !matches!(url.scheme(), "http" | "https") {
        return Err(format!("Unsupported URL scheme '{}'", url.scheme()));
    }
    Ok(url)
}

pub async fn trigger_sync(State(state): State<AppState>, headers: HeaderMap, body: Bytes) -> Response {
    let authorized = headers
        .get(state.trigger_header.as_str())
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v == state.trigger_secret.expose());
    if !authorized {
        warn!(
            "🔒 Rejected trigger: missing or invalid '{}' header",
            state.trigger_header
        );
        return error_response(
            StatusCode::UNAUTHORIZED,
            format!("Unauthorized: missing or invalid '{}' header", state.trigger_header),
        );
    }

    let is_json = headers
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v.to_ascii_lowercase().contains("application/json"));
    if !is_json {
        return error_response(StatusCode::BAD_REQUEST, "Content-Type must be application/json");
    }

    let csv_url = match csv_url_from_body(&body) {
        Ok(url) => url,
        Err(message) => {
            warn!("Rejected trigger: {}", message);
            return error_response(StatusCode::BAD_REQUEST, message);
        }
    };

    let rows = match state.csv_source.fetch_rows(&csv_url).await {
        Ok(rows) => rows,
        Err(e) => {
            error!("❌ CSV load failed: {}", e);
            return error_response(StatusCode::INTERNAL_SERVER_ERROR, e.to_string());
        }
    };

    info!("▶️ Processing {} rows from {}", rows.len(), csv_url);
    let report = state.orchestrator.run(rows).await;
    (StatusCode::OK, Json(report)).into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::{Reconciler, SyncOptions, SyncTarget};
    use crate::domain::TargetSpec;
    use crate::infrastructure::csv_source::CsvSourceError;
    use crate::test_utils::{InMemoryRecordStore, StaticCsvSource, enrollment_row};
    use axum::body::to_bytes;
    use axum::http::HeaderValue;

    fn state_with(source: StaticCsvSource) -> (AppState, Arc<StaticCsvSource>) {
        let store = Arc::new(InMemoryRecordStore::new("bubble", "pre_licensing_email"));
        let reconciler = Reconciler::new(vec![SyncTarget::new(TargetSpec::bubble(), store)]).unwrap();
        let orchestrator = Arc::new(SyncOrchestrator::new(Arc::new(reconciler), SyncOptions::default()));
        let source = Arc::new(source);
        let state = AppState::new(orchestrator, source.clone(), "bubble", Secret::new("s3cret"));
        (state, source)
    }

    fn headers(secret: Option<&str>, content_type: Option<&str>) -> HeaderMap {
        let mut h = HeaderMap::new();
        if let Some(s) = secret {
            h.insert("bubble", HeaderValue::from_str(s).unwrap());
        }
        if let Some(ct) = content_type {
            h.insert(CONTENT_TYPE, HeaderValue::from_str(ct).unwrap());
        }
        h
    }

    async fn body_json(response: Response) -> Value {
        let bytes = to_bytes(response.into_body(), MAX_HTTP_BODY_BYTES).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    const GOOD_BODY: &str = r#"{"csvfile":"https://files.test/export.csv"}"#;

    #[tokio::test]
    async fn test_wrong_secret_is_unauthorized() {
        let (state, source) = state_with(StaticCsvSource::rows(vec![]));
        for secret in [None, Some("nope")] {
            let response = trigger_sync(
                State(state.clone()),
                headers(secret, Some("application/json")),
                Bytes::from_static(GOOD_BODY.as_bytes()),
            )
            .await;
            assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        }
        assert!(source.requested().is_empty());
    }

    #[tokio::test]
    async fn test_content_type_must_be_json() {
        let (state, _) = state_with(StaticCsvSource::rows(vec![]));
        for ct in [None, Some("text/plain")] {
            let response = trigger_sync(
                State(state.clone()),
                headers(Some("s3cret"), ct),
                Bytes::from_static(GOOD_BODY.as_bytes()),
            )
            .await;
            assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        }
    }

    #[tokio::test]
    async fn test_bad_bodies_are_rejected() {
        let (state, source) = state_with(StaticCsvSource::rows(vec![]));
        for body in [
            "not json",
            "[]",
            r#"{"file":"https://files.test/a.csv"}"#,
            r#"{"csvfile":""}"#,
            r#"{"csvfile":"   "}"#,
            r#"{"csvfile":42}"#,
            r#"{"csvfile":"not a url"}"#,
            r#"{"csvfile":"ftp://files.test/a.csv"}"#,
        ] {
            let response = trigger_sync(
                State(state.clone()),
                headers(Some("s3cret"), Some("application/json; charset=utf-8")),
                Bytes::from(body.to_string()),
            )
            .await;
            assert_eq!(response.status(), StatusCode::BAD_REQUEST, "body: {body}");
        }
        assert!(source.requested().is_empty());
    }

    #[tokio::test]
    async fn test_success_returns_report() {
        let (state, source) = state_with(StaticCsvSource::rows(vec![
            enrollment_row("a@x.com", "2024-01-01"),
            enrollment_row("b@x.com", "2024-01-01"),
        ]));
        let response = trigger_sync(
            State(state),
            headers(Some("s3cret"), Some("Application/JSON")),
            Bytes::from_static(GOOD_BODY.as_bytes()),
        )
        .await;

        assert_eq!(response.status(), StatusCode::OK);
        let report = body_json(response).await;
        assert_eq!(report["bubble"]["new"], json!(2));
        assert_eq!(report["rows"], json!(2));
        assert_eq!(
            source.requested()[0].as_str(),
            "https://files.test/export.csv"
        );
    }

    #[tokio::test]
    async fn test_csv_failure_is_server_error() {
        let (state, _) = state_with(StaticCsvSource::failing(CsvSourceError::Status {
            url: "https://files.test/export.csv".into(),
            status: 404,
        }));
        let response = trigger_sync(
            State(state),
            headers(Some("s3cret"), Some("application/json")),
            Bytes::from_static(GOOD_BODY.as_bytes()),
        )
        .await;

        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let body = body_json(response).await;
        assert!(body["error"].as_str().unwrap().contains("404"));
    }

    #[tokio::test]
    async fn test_health() {
        let response = health().await.into_response();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_json(response).await["status"], json!("ok"));
    }

    #[test]
    fn test_router_builds() {
        let (state, _) = state_with(StaticCsvSource::rows(vec![]));
        let _ = router(state);
    }
}
