//! The catalog store seam used by the reconciliation pipeline.

use std::collections::HashSet;

use async_trait::async_trait;
use jobharvest_shared::{
    CatalogSnapshot, JobId, NewJobRecord, PersistedJobRecord, Result, SourceId,
};

/// Persistent job catalog.
///
/// Implementations own their consistency guarantees: callers perform no
/// locking and issue one read-then-write per record.
#[async_trait]
pub trait CatalogStore: Send + Sync {
    /// Idempotent get-or-create of a source's identity.
    async fn get_or_create_source(&self, name: &str) -> Result<SourceId>;

    /// Look up a job of `source_id` by its detail URL.
    async fn find_by_url(
        &self,
        source_id: SourceId,
        detail_url: &str,
    ) -> Result<Option<PersistedJobRecord>>;

    /// Insert a new active job together with its tags.
    async fn insert(&self, record: &NewJobRecord) -> Result<PersistedJobRecord>;

    /// Rewrite `updated_at` and reactivate the job.
    async fn touch(&self, id: JobId) -> Result<()>;

    /// Deactivate every active job of `source_id` whose URL is not in
    /// `active_urls`. Returns the number of jobs deactivated.
    async fn mark_inactive_except(
        &self,
        source_id: SourceId,
        active_urls: &HashSet<String>,
    ) -> Result<usize>;

    /// All jobs of a source, active or not, ordered by detail URL.
    async fn list_jobs(&self, source_id: SourceId) -> Result<Vec<PersistedJobRecord>>;

    /// Aggregate counts across the catalog.
    async fn snapshot(&self) -> Result<CatalogSnapshot>;
}
