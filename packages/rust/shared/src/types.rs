//! Core domain types for the job catalog.
//!
//! Records move through three shapes: [`RawRecord`] (one observation from a
//! rendered list), a classified record (gate-approved, built in the core
//! crate), and [`PersistedJobRecord`] (the catalog's durable row).

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ---------------------------------------------------------------------------
// Identifiers
// ---------------------------------------------------------------------------

/// A UUID v7 wrapper for catalog source identifiers (time-sortable).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SourceId(pub Uuid);

impl SourceId {
    /// Generate a new time-sortable source identifier.
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }
}

impl Default for SourceId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for SourceId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

/// Catalog row identifier for a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(pub Uuid);

impl JobId {
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for JobId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

// ---------------------------------------------------------------------------
// RawRecord / CanonicalKey
// ---------------------------------------------------------------------------

/// One observation of a listing at collection time. Transient, never stored as-is.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawRecord {
    /// Listing title. Records without one are discarded by the adapters.
    pub title: String,
    /// Absolute URL of the listing's detail page: the stable external identity.
    pub detail_url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub salary: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
    /// Filled by the optional detail pass.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Name of the configured source this was observed on.
    pub source_name: String,
}

impl RawRecord {
    /// Build a record with only the identity fields set.
    pub fn new(
        title: impl Into<String>,
        detail_url: impl Into<String>,
        source_name: impl Into<String>,
    ) -> Self {
        Self {
            title: title.into(),
            detail_url: detail_url.into(),
            location: None,
            salary: None,
            tags: Vec::new(),
            description: None,
            source_name: source_name.into(),
        }
    }

    /// Intra-collection deduplication key for this record.
    pub fn canonical_key(&self) -> CanonicalKey {
        CanonicalKey::new(&self.title, &self.detail_url)
    }
}

/// `normalize(title) + "_" + normalize(detail_url)`.
///
/// Only used to deduplicate within one collection run; the catalog keys jobs
/// by detail URL alone.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CanonicalKey(String);

impl CanonicalKey {
    pub fn new(title: &str, detail_url: &str) -> Self {
        Self(format!(
            "{}_{}",
            normalize_whitespace(title),
            normalize_whitespace(detail_url)
        ))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CanonicalKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Trim and collapse every run of whitespace into a single space.
pub fn normalize_whitespace(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}

// ---------------------------------------------------------------------------
// Persisted records
// ---------------------------------------------------------------------------

/// A job row as first written to the catalog.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewJobRecord {
    pub source_id: SourceId,
    pub detail_url: String,
    pub title: String,
    pub location: Option<String>,
    pub salary: Option<String>,
    pub description: Option<String>,
    pub tags: Vec<String>,
}

/// The catalog's durable job entity. Identity is `detail_url`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PersistedJobRecord {
    pub id: JobId,
    pub source_id: SourceId,
    pub detail_url: String,
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub salary: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
    /// `false` once the listing stopped being observed upstream.
    pub is_active: bool,
    /// Set on first sighting, never rewritten.
    pub created_at: DateTime<Utc>,
    /// Rewritten on every touch.
    pub updated_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Catalog snapshot
// ---------------------------------------------------------------------------

/// Aggregate catalog counts, logged after every orchestrated run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CatalogSnapshot {
    pub total: usize,
    pub active: usize,
    pub inactive: usize,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub sources: Vec<SourceStats>,
}

/// Per-source slice of a [`CatalogSnapshot`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceStats {
    pub name: String,
    pub total: usize,
    pub active: usize,
}
