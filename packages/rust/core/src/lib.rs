//! Core pipeline orchestration and domain logic for jobharvest.
//!
//! This crate ties the collector and the catalog together:
//! - [`classify`]: the relevance gate and the `ClassifiedRecord` boundary
//! - [`enrich`]: the optional detail-page pass
//! - [`reconcile`]: insert / refresh / mark-stale against the catalog
//! - [`orchestrator`]: concurrent per-source runs and the aggregate report

pub mod classify;
pub mod enrich;
pub mod orchestrator;
pub mod reconcile;

pub use classify::{
    AcceptAll, ClassifiedRecord, ClassifierGate, ClassifyOutcome, KeywordGate, classify,
    gate_from_config,
};
pub use enrich::{EnrichmentSummary, enrich_details};
pub use orchestrator::{
    GateCounts, HarvestReport, Harvester, ProgressReporter, SilentProgress, SourceReport,
};
pub use reconcile::{
    ReconcileOptions, ReconciliationOutcome, RecordError, reconcile, reconcile_with,
};
