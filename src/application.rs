//! Application layer
//!
//! Use cases that drive the domain rules against the record stores:
//! chunked lookups, per-row reconciliation and the run orchestration.

pub mod lookup;
pub mod reconciler;
pub mod sync_orchestrator;
pub mod wiring;

pub use lookup::{collect_lookup_emails, index_by_email, lookup_existing};
pub use reconciler::{Decision, ReconcileError, Reconciler, SkipReason, SyncTarget, decide};
pub use sync_orchestrator::{SyncOptions, SyncOrchestrator};
pub use wiring::{Services, build_services};
