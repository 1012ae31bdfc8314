//! Per-row reconciliation against every target
//!
//! Each target is decided and written independently: a failure in one is
//! turned into `ReconciliationOutcome::Failed` and never reaches the others.

use std::sync::Arc;

use futures::future::join_all;
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, error, info};

use crate::domain::normalizer::parse_record_timestamp;
use crate::domain::{
    ExistingRecordMap, InputRow, NormalizedPayload, ReconciliationOutcome, SpecError, TargetSpec,
    UpdatePolicy, normalize,
};
use crate::infrastructure::record_store::{RecordStore, StoreError};

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ReconcileError {
    #[error(transparent)]
    Spec(#[from] SpecError),

    #[error("existing {target} record for '{email}' has no id field")]
    MissingRecordId { target: String, email: String },

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// A target's field layout paired with the store it writes to.
#[derive(Clone)]
pub struct SyncTarget {
    pub spec: TargetSpec,
    pub store: Arc<dyn RecordStore>,
}

impl SyncTarget {
    pub fn new(spec: TargetSpec, store: Arc<dyn RecordStore>) -> Self {
        Self { spec, store }
    }

    pub fn name(&self) -> &str {
        &self.spec.name
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// Freshness timestamp missing or not newer than the stored one
    NotNewer,
    /// Nothing allow-listed and non-empty to send
    NothingToUpdate,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Decision {
    Create(Value),
    Update { record_id: String, body: Value },
    Skip(SkipReason),
}

/// What to do with `payload` given the record already stored for its email.
pub fn decide(
    spec: &TargetSpec,
    payload: &NormalizedPayload,
    existing: Option<&Value>,
) -> Result<Decision, ReconcileError> {
    let Some(record) = existing else {
        return Ok(Decision::Create(payload.to_json(spec.date_encoding)));
    };

    if let UpdatePolicy::ChangeGated { freshness_field } = &spec.update_policy {
        let Some(incoming) = payload.timestamp(freshness_field) else {
            return Ok(Decision::Skip(SkipReason::NotNewer));
        };
        // unparsable stored value counts as absent
        let stored = record.get(freshness_field).and_then(parse_record_timestamp);
        if stored.is_some_and(|stored| incoming <= stored) {
            return Ok(Decision::Skip(SkipReason::NotNewer));
        }
    }

    let body = payload.restricted_to(&spec.update_allow_list, spec.date_encoding);
    if body.is_empty() {
        return Ok(Decision::Skip(SkipReason::NothingToUpdate));
    }

    let record_id = record_id(spec, record).ok_or_else(|| ReconcileError::MissingRecordId {
        target: spec.name.clone(),
        email: payload.email().to_string(),
    })?;

    Ok(Decision::Update {
        record_id,
        body: Value::Object(body),
    })
}

fn record_id(spec: &TargetSpec, record: &Value) -> Option<String> {
    spec.record_id_fields
        .iter()
        .find_map(|field| match record.get(field) {
            Some(Value::String(s)) if !s.is_empty() => Some(s.clone()),
            Some(Value::Number(n)) => Some(n.to_string()),
            _ => None,
        })
}

pub struct Reconciler {
    targets: Vec<SyncTarget>,
}

impl Reconciler {
    /// Rejects malformed target specs up front.
    pub fn new(targets: Vec<SyncTarget>) -> Result<Self, SpecError> {
        for target in &targets {
            target.spec.validate()?;
        }
        Ok(Self { targets })
    }

    pub fn targets(&self) -> &[SyncTarget] {
        &self.targets
    }

    pub fn target_names(&self) -> Vec<String> {
        self.targets.iter().map(|t| t.spec.name.clone()).collect()
    }

    /// One outcome per target, in target order. `existing` is indexed the
    /// same way; a missing snapshot means nothing exists yet.
    pub async fn reconcile(
        &self,
        row: &InputRow,
        existing: &[ExistingRecordMap],
    ) -> Vec<ReconciliationOutcome> {
        join_all(
            self.targets
                .iter()
                .enumerate()
                .map(|(i, target)| self.reconcile_target(target, row, existing.get(i))),
        )
        .await
    }

    /// `Failed(reason)` for every target, for rows that could not run at all.
    pub fn fail_all(&self, reason: &str) -> Vec<ReconciliationOutcome> {
        self.targets
            .iter()
            .map(|_| ReconciliationOutcome::Failed(reason.to_string()))
            .collect()
    }

    async fn reconcile_target(
        &self,
        target: &SyncTarget,
        row: &InputRow,
        existing: Option<&ExistingRecordMap>,
    ) -> ReconciliationOutcome {
        match Self::try_reconcile(target, row, existing).await {
            Ok(outcome) => outcome,
            Err(e) => {
                error!(
                    "❌ [{}] {} failed: {}",
                    target.name(),
                    row.normalized_email(),
                    e
                );
                ReconciliationOutcome::Failed(e.to_string())
            }
        }
    }

    async fn try_reconcile(
        target: &SyncTarget,
        row: &InputRow,
        existing: Option<&ExistingRecordMap>,
    ) -> Result<ReconciliationOutcome, ReconcileError> {
        let payload = normalize(row, &target.spec)?;
        let stored = existing.and_then(|map| map.get(payload.email()));

        match decide(&target.spec, &payload, stored)? {
            Decision::Create(body) => {
                target.store.create(&body).await?;
                info!("➕ [{}] created {}", target.name(), payload.email());
                Ok(ReconciliationOutcome::Created)
            }
            Decision::Update { record_id, body } => {
                target.store.update(&record_id, &body).await?;
                info!(
                    "✏️ [{}] updated {} ({}): {}",
                    target.name(),
                    payload.email(),
                    record_id,
                    body
                );
                Ok(ReconciliationOutcome::Updated)
            }
            Decision::Skip(reason) => {
                debug!("⏭️ [{}] skipped {}: {:?}", target.name(), payload.email(), reason);
                Ok(ReconciliationOutcome::Skipped)
            }
        }
    }
}
