//! Trigger endpoint served on a real socket
use std::net::SocketAddr;
use std::sync::Arc;

use enrollment_sync_lib::application::{Reconciler, SyncOptions, SyncOrchestrator, SyncTarget};
use enrollment_sync_lib::domain::TargetSpec;
use enrollment_sync_lib::infrastructure::Secret;
use enrollment_sync_lib::server::{AppState, serve_with_listener};
use enrollment_sync_lib::test_utils::{InMemoryRecordStore, StaticCsvSource, enrollment_row};
use serde_json::{Value, json};
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

struct RunningServer {
    addr: SocketAddr,
    store: Arc<InMemoryRecordStore>,
    shutdown: oneshot::Sender<()>,
    handle: JoinHandle<anyhow::Result<()>>,
}

impl RunningServer {
    fn url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }

    async fn stop(self) {
        let _ = self.shutdown.send(());
        self.handle.await.unwrap().unwrap();
    }
}

async fn start() -> RunningServer {
    let store = Arc::new(InMemoryRecordStore::new("bubble", "pre_licensing_email"));
    let reconciler = Reconciler::new(vec![SyncTarget::new(TargetSpec::bubble(), store.clone())]).unwrap();
    let orchestrator = Arc::new(SyncOrchestrator::new(Arc::new(reconciler), SyncOptions::default()));
    let csv = Arc::new(StaticCsvSource::rows(vec![
        enrollment_row("a@x.com", "2024-01-01"),
        enrollment_row("b@x.com", "2024-01-01"),
        enrollment_row("c@x.com", "2024-01-01"),
    ]));
    let state = AppState::new(orchestrator, csv, "bubble", Secret::new("s3cret"));

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let (shutdown, rx) = oneshot::channel::<()>();
    let handle = tokio::spawn(serve_with_listener(listener, state, async move {
        let _ = rx.await;
    }));

    RunningServer {
        addr,
        store,
        shutdown,
        handle,
    }
}

const BODY: &str = r#"{"csvfile":"https://files.test/export.csv"}"#;

#[tokio::test]
async fn sync_over_http_returns_the_report() {
    let server = start().await;
    let client = reqwest::Client::new();

    let response = client
        .post(server.url("/"))
        .header("bubble", "s3cret")
        .header("content-type", "application/json")
        .body(BODY)
        .send()
        .await
        .unwrap();

    assert_eq!(response.status().as_u16(), 200);
    let report: Value = response.json().await.unwrap();
    assert_eq!(report["bubble"]["new"], json!(3));
    assert_eq!(report["rows"], json!(3));
    assert_eq!(server.store.records().len(), 3);

    // second trigger via the alias path: nothing newer, nothing created
    let response = client
        .post(server.url("/sync"))
        .header("bubble", "s3cret")
        .header("content-type", "application/json")
        .body(BODY)
        .send()
        .await
        .unwrap();
    let report: Value = response.json().await.unwrap();
    assert_eq!(report["bubble"]["new"], json!(0));
    assert_eq!(report["bubble"]["skipped"], json!(3));

    server.stop().await;
}

#[tokio::test]
async fn rejected_requests_touch_nothing() {
    let server = start().await;
    let client = reqwest::Client::new();

    let unauthorized = client
        .post(server.url("/"))
        .header("bubble", "wrong")
        .header("content-type", "application/json")
        .body(BODY)
        .send()
        .await
        .unwrap();
    assert_eq!(unauthorized.status().as_u16(), 401);

    let bad_body = client
        .post(server.url("/"))
        .header("bubble", "s3cret")
        .header("content-type", "application/json")
        .body(r#"{"csv":"x"}"#)
        .send()
        .await
        .unwrap();
    assert_eq!(bad_body.status().as_u16(), 400);
    let error: Value = bad_body.json().await.unwrap();
    assert!(error["error"].as_str().unwrap().contains("csvfile"));

    assert!(server.store.records().is_empty());
    assert_eq!(server.store.search_calls(), 0);
    server.stop().await;
}

#[tokio::test]
async fn health_answers_get() {
    let server = start().await;
    let response = reqwest::get(server.url("/health")).await.unwrap();
    assert_eq!(response.status().as_u16(), 200);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["status"], json!("ok"));
    server.stop().await;
}
