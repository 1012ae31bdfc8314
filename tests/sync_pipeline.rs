//! Orchestrator behaviour over in-memory record stores
use std::sync::Arc;
use std::time::Duration;

use enrollment_sync_lib::application::{Reconciler, SyncOptions, SyncOrchestrator, SyncTarget};
use enrollment_sync_lib::domain::enrollment::columns;
use enrollment_sync_lib::domain::{InputRow, TargetSpec};
use enrollment_sync_lib::test_utils::{InMemoryRecordStore, enrollment_row};
use serde_json::json;

struct Harness {
    bubble: Arc<InMemoryRecordStore>,
    back4app: Arc<InMemoryRecordStore>,
    orchestrator: SyncOrchestrator,
}

fn harness(options: SyncOptions) -> Harness {
    let bubble = Arc::new(InMemoryRecordStore::new("bubble", "pre_licensing_email"));
    let back4app = Arc::new(
        InMemoryRecordStore::new("back4app", "pre_licensing_email_text").with_id_field("objectId"),
    );
    let reconciler = Reconciler::new(vec![
        SyncTarget::new(TargetSpec::bubble(), bubble.clone()),
        SyncTarget::new(TargetSpec::back4app(), back4app.clone()),
    ])
    .unwrap();
    Harness {
        bubble,
        back4app,
        orchestrator: SyncOrchestrator::new(Arc::new(reconciler), options),
    }
}

fn rows(n: usize, last_login: &str) -> Vec<InputRow> {
    (0..n)
        .map(|i| enrollment_row(&format!("user{i}@x.com"), last_login))
        .collect()
}

#[tokio::test]
async fn first_run_creates_every_row_in_both_targets() {
    let h = harness(SyncOptions::default());
    let report = h.orchestrator.run(rows(30, "2024-03-01")).await;

    assert_eq!(report.rows, 30);
    assert_eq!(report.chunks, 2);
    assert_eq!(report.target("bubble").new, 30);
    assert_eq!(report.target("back4app").new, 30);
    assert_eq!(h.bubble.records().len(), 30);
    assert_eq!(h.back4app.records().len(), 30);

    let stored = &h.back4app.records()[0];
    assert_eq!(stored["phone_text"], json!("5551234567"));
    assert_eq!(
        stored["pre_licensing_course_last_login_date"],
        json!({"__type": "Date", "iso": "2024-03-01T00:00:00.000Z"})
    );
}

#[tokio::test]
async fn rerun_of_the_same_file_never_creates() {
    let h = harness(SyncOptions::default());
    h.orchestrator.run(rows(12, "2024-03-01")).await;
    let report = h.orchestrator.run(rows(12, "2024-03-01")).await;

    assert_eq!(report.target("bubble").new, 0);
    assert_eq!(report.target("back4app").new, 0);
    // same last-login: change-gated target skips
    assert_eq!(report.target("bubble").skipped, 12);
    // always-update target refreshes non-empty fields
    assert_eq!(report.target("back4app").updated, 12);
    assert_eq!(h.bubble.records().len(), 12);
    assert_eq!(h.back4app.records().len(), 12);
}

#[tokio::test]
async fn newer_last_login_updates_change_gated_target() {
    let h = harness(SyncOptions::default());
    h.orchestrator.run(rows(3, "2024-03-01")).await;
    let report = h.orchestrator.run(rows(3, "2024-03-02 08:00")).await;

    assert_eq!(report.target("bubble").updated, 3);
    let stored = &h.bubble.records()[0];
    assert_eq!(
        stored["pre_licensing_course_last_login"],
        json!("2024-03-02T08:00:00Z")
    );
    // creation-only fields are untouched by the update
    assert_eq!(stored["first_name"], json!("Jane"));
}

#[tokio::test]
async fn failing_target_does_not_affect_the_other() {
    let h = harness(SyncOptions::default());
    h.bubble.fail_writes(true);

    let report = h.orchestrator.run(rows(5, "2024-03-01")).await;

    assert_eq!(report.target("bubble").failed, 5);
    assert_eq!(report.target("bubble").new, 0);
    assert_eq!(report.target("back4app").new, 5);
    assert_eq!(h.back4app.records().len(), 5);
}

#[tokio::test]
async fn failed_lookup_degrades_to_create_and_is_counted() {
    let h = harness(SyncOptions {
        chunk_size: 2,
        ..SyncOptions::default()
    });
    h.back4app.fail_search(true);

    let report = h.orchestrator.run(rows(4, "2024-03-01")).await;

    assert_eq!(report.target("back4app").lookup_failures, 2);
    assert_eq!(report.target("back4app").new, 4);
    assert_eq!(report.target("bubble").lookup_failures, 0);
    assert_eq!(report.target("bubble").new, 4);
}

#[tokio::test(start_paused = true)]
async fn concurrency_never_exceeds_the_limit() {
    let h = harness(SyncOptions {
        chunk_size: 20,
        max_concurrent: 3,
        dedupe_chunk_emails: false,
    });
    h.bubble.set_write_delay(Duration::from_millis(50));
    h.back4app.set_write_delay(Duration::from_millis(50));

    let report = h.orchestrator.run(rows(20, "2024-03-01")).await;

    assert_eq!(report.target("bubble").new, 20);
    assert_eq!(h.bubble.max_in_flight(), 3);
    assert_eq!(h.back4app.max_in_flight(), 3);
}

#[tokio::test]
async fn chunks_run_strictly_in_sequence() {
    let h = harness(SyncOptions {
        chunk_size: 2,
        ..SyncOptions::default()
    });
    h.orchestrator.run(rows(4, "2024-03-01")).await;

    let events = h.bubble.events();
    assert_eq!(events.len(), 6);
    assert_eq!(events[0], "search:user0@x.com,user1@x.com");
    assert!(events[1].starts_with("create:"));
    assert!(events[2].starts_with("create:"));
    assert_eq!(events[3], "search:user2@x.com,user3@x.com");
    assert!(events[4].starts_with("create:"));
    assert!(events[5].starts_with("create:"));
}

#[tokio::test]
async fn rows_without_email_are_created_and_never_looked_up() {
    let h = harness(SyncOptions::default());
    let anonymous = InputRow::from_pairs([(columns::EMAIL, "  "), (columns::FIRST_NAME, "Ghost")]);

    for _ in 0..2 {
        let report = h.orchestrator.run(vec![anonymous.clone()]).await;
        assert_eq!(report.target("bubble").new, 1);
    }

    assert_eq!(h.bubble.records().len(), 2);
    assert_eq!(h.bubble.search_calls(), 0);
}

#[tokio::test]
async fn duplicate_emails_in_a_chunk_collapse_when_dedupe_is_on() {
    let h = harness(SyncOptions {
        dedupe_chunk_emails: true,
        ..SyncOptions::default()
    });
    let report = h
        .orchestrator
        .run(vec![
            enrollment_row("Dup@x.com", "2024-03-01"),
            enrollment_row("dup@x.com ", "2024-03-05"),
        ])
        .await;

    assert_eq!(report.rows, 1);
    assert_eq!(report.target("bubble").new, 1);
    let records = h.bubble.records();
    assert_eq!(records.len(), 1);
    assert_eq!(
        records[0]["pre_licensing_course_last_login"],
        json!("2024-03-05T00:00:00Z")
    );
}

#[tokio::test]
async fn existing_records_are_matched_case_insensitively() {
    let h = harness(SyncOptions::default());
    h.bubble.seed(json!({
        "_id": "seeded",
        "pre_licensing_email": "Jane@X.com",
        "pre_licensing_course_last_login": "2024-01-01T00:00:00Z"
    }));

    let report = h
        .orchestrator
        .run(vec![enrollment_row(" JANE@x.com", "2024-02-01")])
        .await;

    assert_eq!(report.target("bubble").new, 0);
    assert_eq!(report.target("bubble").updated, 1);
    assert_eq!(h.bubble.events().last().map(String::as_str), Some("update:seeded"));
}
