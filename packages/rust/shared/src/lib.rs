//! Shared types, error model, and configuration for jobharvest.
//!
//! This crate is the foundation depended on by all other jobharvest crates.
//! It provides:
//! - [`HarvestError`]: the unified error type
//! - Domain types ([`RawRecord`], [`CanonicalKey`], [`PersistedJobRecord`], ids)
//! - Configuration ([`AppConfig`], [`CollectorSettings`], config loading)

pub mod config;
pub mod error;
pub mod types;

// Re-export public API at crate root for ergonomic imports.
pub use config::{
    AppConfig, ClassifierConfig, CollectorConfig, CollectorSettings, DefaultsConfig, DetailConfig,
    FieldSelectors, ReconcileConfig, ReconcileSettings, RunSettings, SourceEntry, config_dir,
    config_file_path, expand_home, init_config, load_config, load_config_from, parse_daily_at,
};
pub use error::{HarvestError, Result};
pub use types::{
    CanonicalKey, CatalogSnapshot, JobId, NewJobRecord, PersistedJobRecord, RawRecord, SourceId,
    SourceStats, normalize_whitespace,
};
