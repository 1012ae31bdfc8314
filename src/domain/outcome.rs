//! Reconciliation outcomes and run-scoped counters

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReconciliationOutcome {
    Created,
    Updated,
    Skipped,
    Failed(String),
}

impl ReconciliationOutcome {
    pub const fn is_failure(&self) -> bool {
        matches!(self, Self::Failed(_))
    }
}

/// Per-target tallies, shared across concurrently reconciling rows.
#[derive(Debug, Default)]
pub struct TargetCounters {
    created: AtomicU64,
    updated: AtomicU64,
    skipped: AtomicU64,
    failed: AtomicU64,
    lookup_failures: AtomicU64,
}

impl TargetCounters {
    pub fn record(&self, outcome: &ReconciliationOutcome) {
        let counter = match outcome {
            ReconciliationOutcome::Created => &self.created,
            ReconciliationOutcome::Updated => &self.updated,
            ReconciliationOutcome::Skipped => &self.skipped,
            ReconciliationOutcome::Failed(_) => &self.failed,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_lookup_failure(&self) {
        self.lookup_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> TargetSummary {
        TargetSummary {
            new: self.created.load(Ordering::Relaxed),
            updated: self.updated.load(Ordering::Relaxed),
            skipped: self.skipped.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            lookup_failures: self.lookup_failures.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct TargetSummary {
    pub new: u64,
    pub updated: u64,
    pub skipped: u64,
    pub failed: u64,
    pub lookup_failures: u64,
}

/// Counters for one run, indexed in target order.
#[derive(Debug)]
pub struct RunCounters {
    names: Vec<String>,
    targets: Vec<TargetCounters>,
    rows: AtomicU64,
    chunks: AtomicU64,
}

impl RunCounters {
    pub fn new<I, S>(target_names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let names: Vec<String> = target_names.into_iter().map(Into::into).collect();
        let targets = names.iter().map(|_| TargetCounters::default()).collect();
        Self {
            names,
            targets,
            rows: AtomicU64::new(0),
            chunks: AtomicU64::new(0),
        }
    }

    pub fn target(&self, index: usize) -> Option<&TargetCounters> {
        self.targets.get(index)
    }

    /// Outcomes arrive in target order.
    pub fn record_row(&self, outcomes: &[ReconciliationOutcome]) {
        self.rows.fetch_add(1, Ordering::Relaxed);
        for (counters, outcome) in self.targets.iter().zip(outcomes) {
            counters.record(outcome);
        }
    }

    pub fn record_chunk(&self) {
        self.chunks.fetch_add(1, Ordering::Relaxed);
    }

    pub fn report(&self) -> SyncReport {
        SyncReport {
            targets: self
                .names
                .iter()
                .cloned()
                .zip(self.targets.iter().map(TargetCounters::snapshot))
                .collect(),
            rows: self.rows.load(Ordering::Relaxed),
            chunks: self.chunks.load(Ordering::Relaxed),
        }
    }
}

/// Aggregate result of one run, keyed by target name when serialized.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SyncReport {
    #[serde(flatten)]
    pub targets: BTreeMap<String, TargetSummary>,
    pub rows: u64,
    pub chunks: u64,
}

impl SyncReport {
    pub fn target(&self, name: &str) -> TargetSummary {
        self.targets.get(name).copied().unwrap_or_default()
    }
}
