//! Test utilities for enrollment-sync
//!
//! In-memory fakes for the three I/O seams (`RecordStore`, `Transport`,
//! `CsvSource`) so reconciliation, retries and the trigger can be exercised
//! without a network.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use url::Url;

use crate::domain::enrollment::columns;
use crate::domain::{InputRow, normalize_email};
use crate::infrastructure::csv_source::{CsvSource, CsvSourceError};
use crate::infrastructure::http_client::{
    HttpError, OutboundRequest, Transport, TransportError, TransportResponse,
};
use crate::infrastructure::record_store::{RecordStore, StoreError};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// A typical export row.
pub fn enrollment_row(email: &str, last_logged_in: &str) -> InputRow {
    InputRow::from_pairs([
        (columns::EMAIL, email),
        (columns::FIRST_NAME, "Jane"),
        (columns::LAST_NAME, "Doe"),
        (columns::PHONE, "+1 (555) 123-4567"),
        (columns::DEPARTMENT, "North"),
        (columns::DATE_ENROLLED, "2024-01-02"),
        (columns::LAST_LOGGED_IN, last_logged_in),
        (columns::TIME_SPENT, "3h 10m"),
        (columns::PLE_COMPLETE, "45.5"),
        (columns::PREP_COMPLETE, "10"),
        (columns::SIM_COMPLETE, ""),
        (columns::PLE_DATE_COMPLETED, ""),
        (columns::COURSE, "Life & Health"),
        (columns::HIRING_MANAGER, "Sam"),
        (columns::PREPARED_TO_PASS, "No"),
    ])
}

/// Record store backed by a vector, with failure switches and call tracing.
#[derive(Debug)]
pub struct InMemoryRecordStore {
    name: String,
    identity_field: String,
    id_field: String,
    records: Mutex<Vec<Value>>,
    events: Mutex<Vec<String>>,
    next_id: AtomicUsize,
    fail_writes: AtomicBool,
    fail_search: AtomicBool,
    write_delay: Mutex<Option<Duration>>,
    search_calls: AtomicUsize,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl InMemoryRecordStore {
    pub fn new(name: &str, identity_field: &str) -> Self {
        Self {
            name: name.to_string(),
            identity_field: identity_field.to_string(),
            id_field: "_id".to_string(),
            records: Mutex::new(Vec::new()),
            events: Mutex::new(Vec::new()),
            next_id: AtomicUsize::new(1),
            fail_writes: AtomicBool::new(false),
            fail_search: AtomicBool::new(false),
            write_delay: Mutex::new(None),
            search_calls: AtomicUsize::new(0),
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
        }
    }

    #[must_use]
    pub fn with_id_field(mut self, id_field: &str) -> Self {
        self.id_field = id_field.to_string();
        self
    }

    pub fn seed(&self, record: Value) {
        lock(&self.records).push(record);
    }

    pub fn fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    pub fn fail_search(&self, fail: bool) {
        self.fail_search.store(fail, Ordering::SeqCst);
    }

    /// Hold every write for `delay` (pairs with a paused tokio clock).
    pub fn set_write_delay(&self, delay: Duration) {
        *lock(&self.write_delay) = Some(delay);
    }

    pub fn records(&self) -> Vec<Value> {
        lock(&self.records).clone()
    }

    /// `search:<emails>`, `create:<email>` and `update:<id>` in call order.
    pub fn events(&self) -> Vec<String> {
        lock(&self.events).clone()
    }

    pub fn search_calls(&self) -> usize {
        self.search_calls.load(Ordering::SeqCst)
    }

    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    fn email_of(&self, record: &Value) -> String {
        record
            .get(&self.identity_field)
            .and_then(Value::as_str)
            .map(normalize_email)
            .unwrap_or_default()
    }

    fn rejected(&self, method: &str, status: u16) -> StoreError {
        StoreError::Http(HttpError::HardFailure {
            target: self.name.clone(),
            method: method.to_string(),
            url: format!("memory://{}", self.name),
            status,
            body: "rejected by test store".to_string(),
        })
    }

    async fn simulate_write(&self) {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        let delay = *lock(&self.write_delay);
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        } else {
            tokio::task::yield_now().await;
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl RecordStore for InMemoryRecordStore {
    fn name(&self) -> &str {
        &self.name
    }

    async fn search_by_emails(&self, emails: &[String]) -> Result<Vec<Value>, StoreError> {
        self.search_calls.fetch_add(1, Ordering::SeqCst);
        lock(&self.events).push(format!("search:{}", emails.join(",")));
        if self.fail_search.load(Ordering::SeqCst) {
            return Err(StoreError::Http(HttpError::TransientExhausted {
                target: self.name.clone(),
                method: "GET".to_string(),
                url: format!("memory://{}", self.name),
                attempts: 3,
                last_error: "HTTP 503: unavailable".to_string(),
            }));
        }
        Ok(lock(&self.records)
            .iter()
            .filter(|r| emails.contains(&self.email_of(r)))
            .cloned()
            .collect())
    }

    async fn create(&self, body: &Value) -> Result<(), StoreError> {
        self.simulate_write().await;
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(self.rejected("POST", 400));
        }
        let mut record = body.clone();
        let id = format!("{}-{}", self.name, self.next_id.fetch_add(1, Ordering::SeqCst));
        if let Some(obj) = record.as_object_mut() {
            obj.insert(self.id_field.clone(), Value::String(id));
        }
        lock(&self.events).push(format!("create:{}", self.email_of(&record)));
        lock(&self.records).push(record);
        Ok(())
    }

    async fn update(&self, record_id: &str, body: &Value) -> Result<(), StoreError> {
        self.simulate_write().await;
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(self.rejected("PATCH", 400));
        }
        let mut records = lock(&self.records);
        let Some(record) = records
            .iter_mut()
            .find(|r| r.get(&self.id_field).and_then(Value::as_str) == Some(record_id))
        else {
            return Err(self.rejected("PATCH", 404));
        };
        if let (Some(target), Some(changes)) = (record.as_object_mut(), body.as_object()) {
            for (k, v) in changes {
                target.insert(k.clone(), v.clone());
            }
        }
        drop(records);
        lock(&self.events).push(format!("update:{record_id}"));
        Ok(())
    }
}

/// Transport that replays canned responses in order and records requests.
#[derive(Debug, Default)]
pub struct ScriptedTransport {
    responses: Mutex<VecDeque<Result<TransportResponse, TransportError>>>,
    requests: Mutex<Vec<OutboundRequest>>,
}

impl ScriptedTransport {
    pub fn new<I>(responses: I) -> Self
    where
        I: IntoIterator<Item = Result<TransportResponse, TransportError>>,
    {
        Self {
            responses: Mutex::new(responses.into_iter().collect()),
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn requests(&self) -> Vec<OutboundRequest> {
        lock(&self.requests).clone()
    }
}

#[async_trait]
impl Transport for ScriptedTransport {
    async fn send(&self, request: &OutboundRequest) -> Result<TransportResponse, TransportError> {
        lock(&self.requests).push(request.clone());
        lock(&self.responses)
            .pop_front()
            .unwrap_or_else(|| Err(TransportError::Network("no scripted response left".to_string())))
    }
}

/// CSV source returning fixed rows (or a fixed error).
#[derive(Debug)]
pub struct StaticCsvSource {
    result: Result<Vec<InputRow>, CsvSourceError>,
    requested: Mutex<Vec<Url>>,
}

impl StaticCsvSource {
    pub fn rows(rows: Vec<InputRow>) -> Self {
        Self {
            result: Ok(rows),
            requested: Mutex::new(Vec::new()),
        }
    }

    pub fn failing(error: CsvSourceError) -> Self {
        Self {
            result: Err(error),
            requested: Mutex::new(Vec::new()),
        }
    }

    pub fn requested(&self) -> Vec<Url> {
        lock(&self.requested).clone()
    }
}

#[async_trait]
impl CsvSource for StaticCsvSource {
    async fn fetch_rows(&self, url: &Url) -> Result<Vec<InputRow>, CsvSourceError> {
        lock(&self.requested).push(url.clone());
        self.result.clone()
    }
}
