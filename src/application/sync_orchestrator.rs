//! Batch orchestration of one sync run
//!
//! Rows are processed in fixed-size chunks, strictly one chunk after another.
//! For each chunk every target is looked up once, then all rows reconcile
//! concurrently under a run-wide semaphore.

use std::collections::HashMap;
use std::sync::Arc;

use futures::future::join_all;
use tokio::sync::Semaphore;
use tracing::{Instrument, info, info_span, warn};
use uuid::Uuid;

use super::lookup::{collect_lookup_emails, lookup_existing};
use super::reconciler::Reconciler;
use crate::domain::{ExistingRecordMap, InputRow, RunCounters, SyncReport};
use crate::infrastructure::config::{SyncConfig, defaults};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SyncOptions {
    pub chunk_size: usize,
    pub max_concurrent: usize,
    /// Keep only the last row per email within a chunk
    pub dedupe_chunk_emails: bool,
}

impl Default for SyncOptions {
    fn default() -> Self {
        Self {
            chunk_size: defaults::CHUNK_SIZE,
            max_concurrent: defaults::MAX_CONCURRENT,
            dedupe_chunk_emails: false,
        }
    }
}

impl From<&SyncConfig> for SyncOptions {
    fn from(config: &SyncConfig) -> Self {
        Self {
            chunk_size: config.chunk_size,
            max_concurrent: config.max_concurrent,
            dedupe_chunk_emails: config.dedupe_chunk_emails,
        }
    }
}

pub struct SyncOrchestrator {
    reconciler: Arc<Reconciler>,
    options: SyncOptions,
}

impl SyncOrchestrator {
    pub fn new(reconciler: Arc<Reconciler>, options: SyncOptions) -> Self {
        Self {
            reconciler,
            options: SyncOptions {
                chunk_size: options.chunk_size.max(1),
                max_concurrent: options.max_concurrent.max(1),
                ..options
            },
        }
    }

    pub const fn options(&self) -> &SyncOptions {
        &self.options
    }

    /// Reconcile every row against every target. Per-row failures are
    /// counted, never raised.
    pub async fn run(&self, rows: Vec<InputRow>) -> SyncReport {
        let run_id = Uuid::new_v4();
        let span = info_span!("sync_run", %run_id, rows = rows.len());
        self.run_chunks(rows).instrument(span).await
    }

    async fn run_chunks(&self, rows: Vec<InputRow>) -> SyncReport {
        let counters = RunCounters::new(self.reconciler.target_names());
        let semaphore = Arc::new(Semaphore::new(self.options.max_concurrent));
        let total_chunks = rows.len().div_ceil(self.options.chunk_size);

        info!(
            "🚀 Sync started: {} rows, {} chunks of up to {}, {} concurrent",
            rows.len(),
            total_chunks,
            self.options.chunk_size,
            self.options.max_concurrent
        );

        for (index, chunk) in rows.chunks(self.options.chunk_size).enumerate() {
            let chunk_rows = if self.options.dedupe_chunk_emails {
                dedupe_by_email(chunk)
            } else {
                chunk.iter().collect()
            };

            let snapshots = self.lookup_chunk(&chunk_rows, &counters).await;

            let tasks = chunk_rows.iter().map(|row| {
                let semaphore = Arc::clone(&semaphore);
                let snapshots = Arc::clone(&snapshots);
                async move {
                    let Ok(_permit) = semaphore.acquire().await else {
                        return self.reconciler.fail_all("concurrency limiter closed");
                    };
                    self.reconciler.reconcile(row, &snapshots).await
                }
            });

            for outcomes in join_all(tasks).await {
                counters.record_row(&outcomes);
            }
            counters.record_chunk();

            info!(
                "📦 Chunk {}/{} done ({} rows)",
                index + 1,
                total_chunks,
                chunk_rows.len()
            );
        }

        let report = counters.report();
        for (name, summary) in &report.targets {
            info!(
                "✅ [{}] {} new, {} updated, {} skipped, {} failed, {} lookup failures",
                name,
                summary.new,
                summary.updated,
                summary.skipped,
                summary.failed,
                summary.lookup_failures
            );
        }
        report
    }

    /// One snapshot per target. A failed lookup degrades that target to an
    /// empty map (create-only for this chunk).
    async fn lookup_chunk(
        &self,
        rows: &[&InputRow],
        counters: &RunCounters,
    ) -> Arc<[ExistingRecordMap]> {
        let emails = collect_lookup_emails(rows.iter().copied());

        let lookups = self.reconciler.targets().iter().map(|target| {
            lookup_existing(target.store.as_ref(), &target.spec.identity_field, &emails)
        });

        join_all(lookups)
            .await
            .into_iter()
            .enumerate()
            .map(|(i, result)| match result {
                Ok(map) => map,
                Err(e) => {
                    let target = self.reconciler.targets().get(i).map_or("?", |t| t.name());
                    warn!(
                        "⚠️ [{}] lookup of {} emails failed, treating all as new: {}",
                        target,
                        emails.len(),
                        e
                    );
                    if let Some(c) = counters.target(i) {
                        c.record_lookup_failure();
                    }
                    ExistingRecordMap::new()
                }
            })
            .collect()
    }
}

/// Last row per non-empty email wins; rows with no email are all kept.
pub fn dedupe_by_email(chunk: &[InputRow]) -> Vec<&InputRow> {
    let emails: Vec<String> = chunk.iter().map(InputRow::normalized_email).collect();
    let mut last_index = HashMap::new();
    for (i, email) in emails.iter().enumerate() {
        if !email.is_empty() {
            last_index.insert(email.as_str(), i);
        }
    }

    let kept: Vec<&InputRow> = chunk
        .iter()
        .zip(&emails)
        .enumerate()
        .filter(|(i, (_, email))| email.is_empty() || last_index.get(email.as_str()) == Some(i))
        .map(|(_, (row, _))| row)
        .collect();

    if kept.len() < chunk.len() {
        info!(
            "🧹 Dropped {} duplicate-email rows from chunk",
            chunk.len() - kept.len()
        );
    }
    kept
}
