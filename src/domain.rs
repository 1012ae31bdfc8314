//! Domain module - enrollment rows and the rules that map them onto targets
//!
//! Everything in here is pure: no I/O, no clocks, no global state.
//! - `enrollment`: raw CSV rows and the source column names
//! - `target_spec`: per-target field declarations and update policy
//! - `normalizer`: row -> target payload mapping (phone, numbers, dates)
//! - `payload`: typed payload values and their JSON rendering
//! - `outcome`: per-target outcomes and the run-scoped counters

pub mod enrollment;
pub mod normalizer;
pub mod outcome;
pub mod payload;
pub mod target_spec;

pub use enrollment::{InputRow, normalize_email};
pub use normalizer::normalize;
pub use outcome::{ReconciliationOutcome, RunCounters, SyncReport, TargetSummary};
pub use payload::{ExistingRecordMap, FieldValue, NormalizedPayload};
pub use target_spec::{
    DateEncoding, FieldKind, FieldPresence, FieldSpec, SpecError, TargetSpec, UpdatePolicy,
};
