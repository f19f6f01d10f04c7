//! Reconciliation of one source's collected batch into the catalog.
//!
//! Per record: insert when the detail URL is unknown, otherwise touch (bump
//! `updated_at`, reactivate). Descriptive fields of known jobs are left
//! alone so manual corrections survive re-scrapes. Once every record has
//! been handled, active jobs of the source that were not observed are
//! marked inactive.

use std::collections::HashSet;
use std::time::Instant;

use serde::Serialize;
use tracing::{debug, info, instrument, warn};

use jobharvest_shared::{NewJobRecord, Result, SourceId};
use jobharvest_storage::CatalogStore;

use crate::classify::ClassifiedRecord;

/// Knobs for one reconciliation run.
#[derive(Debug, Clone, Copy)]
pub struct ReconcileOptions {
    /// Deactivate jobs missing from the batch. Off when the batch is known
    /// to be truncated.
    pub mark_stale: bool,
}

impl Default for ReconcileOptions {
    fn default() -> Self {
        Self { mark_stale: true }
    }
}

/// Why one record was skipped.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RecordError {
    pub detail_url: String,
    pub message: String,
}

/// Summary of one reconciliation run.
///
/// Every input record is counted in exactly one of `inserted`, `refreshed`
/// or `errors`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ReconciliationOutcome {
    pub inserted: usize,
    pub refreshed: usize,
    pub marked_stale: usize,
    pub errors: Vec<RecordError>,
    /// Set when the stale pass failed. Insert and refresh work is kept.
    pub stale_error: Option<String>,
}

impl ReconciliationOutcome {
    pub fn is_clean(&self) -> bool {
        self.errors.is_empty() && self.stale_error.is_none()
    }
}

/// Reconcile `records` for `source_name`, marking unseen jobs stale.
pub async fn reconcile(
    store: &dyn CatalogStore,
    source_name: &str,
    records: &[ClassifiedRecord],
) -> Result<ReconciliationOutcome> {
    reconcile_with(store, source_name, records, ReconcileOptions::default()).await
}

/// Reconcile with explicit options.
///
/// Only a failure to resolve the source itself is returned as `Err`; every
/// later failure is recorded in the outcome.
#[instrument(skip_all, fields(source = %source_name, records = records.len()))]
pub async fn reconcile_with(
    store: &dyn CatalogStore,
    source_name: &str,
    records: &[ClassifiedRecord],
    options: ReconcileOptions,
) -> Result<ReconciliationOutcome> {
    let start = Instant::now();
    let source_id = store.get_or_create_source(source_name).await?;
    let mut outcome = ReconciliationOutcome::default();
    let mut seen: HashSet<String> = HashSet::with_capacity(records.len());

    for record in records {
        let url = record.detail_url();
        if !seen.insert(url.to_string()) {
            outcome.errors.push(RecordError {
                detail_url: url.to_string(),
                message: "detail URL repeated in batch".into(),
            });
            continue;
        }

        match upsert(store, source_id, record).await {
            Ok(Applied::Inserted) => outcome.inserted += 1,
            Ok(Applied::Refreshed) => outcome.refreshed += 1,
            Err(e) => {
                warn!(detail_url = %url, error = %e, "record skipped");
                outcome.errors.push(RecordError {
                    detail_url: url.to_string(),
                    message: e.to_string(),
                });
            }
        }
    }

    if options.mark_stale {
        match store.mark_inactive_except(source_id, &seen).await {
            Ok(count) => outcome.marked_stale = count,
            Err(e) => {
                warn!(error = %e, "stale marking failed");
                outcome.stale_error = Some(e.to_string());
            }
        }
    } else {
        debug!("stale marking skipped");
    }

    info!(
        inserted = outcome.inserted,
        refreshed = outcome.refreshed,
        marked_stale = outcome.marked_stale,
        errors = outcome.errors.len(),
        elapsed_ms = start.elapsed().as_millis(),
        "reconciliation finished"
    );

    Ok(outcome)
}

enum Applied {
    Inserted,
    Refreshed,
}

async fn upsert(
    store: &dyn CatalogStore,
    source_id: SourceId,
    record: &ClassifiedRecord,
) -> Result<Applied> {
    match store.find_by_url(source_id, record.detail_url()).await? {
        Some(existing) => {
            store.touch(existing.id).await?;
            Ok(Applied::Refreshed)
        }
        None => {
            let raw = record.record();
            store
                .insert(&NewJobRecord {
                    source_id,
                    detail_url: raw.detail_url.clone(),
                    title: raw.title.clone(),
                    location: raw.location.clone(),
                    salary: raw.salary.clone(),
                    description: raw.description.clone(),
                    tags: raw.tags.clone(),
                })
                .await?;
            Ok(Applied::Inserted)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use async_trait::async_trait;
    use jobharvest_shared::{CatalogSnapshot, HarvestError, JobId, PersistedJobRecord, RawRecord};
    use jobharvest_storage::Storage;
    use uuid::Uuid;

    use crate::classify::{AcceptAll, classify};

    async fn test_storage() -> Storage {
        let tmp = std::env::temp_dir().join(format!("jh_reconcile_{}.db", Uuid::now_v7()));
        Storage::open(&tmp).await.expect("open test db")
    }

    fn batch(urls: &[&str]) -> Vec<ClassifiedRecord> {
        let raw = urls
            .iter()
            .map(|u| {
                let mut r = RawRecord::new(format!("Engineer {u}"), *u, "board");
                r.tags = vec!["rust".into()];
                r
            })
            .collect::<Vec<_>>();
        classify(&AcceptAll, raw).accepted
    }

    async fn active_urls(store: &dyn CatalogStore, source: &str) -> HashSet<String> {
        let id = store.get_or_create_source(source).await.unwrap();
        store
            .list_jobs(id)
            .await
            .unwrap()
            .into_iter()
            .filter(|j| j.is_active)
            .map(|j| j.detail_url)
            .collect()
    }

    /// Delegates to a real store but fails inserts for one URL and,
    /// optionally, the stale pass.
    struct FlakyStore {
        inner: Storage,
        poisoned_url: String,
        fail_stale: bool,
    }

    #[async_trait]
    impl CatalogStore for FlakyStore {
        async fn get_or_create_source(&self, name: &str) -> Result<SourceId> {
            self.inner.get_or_create_source(name).await
        }
        async fn find_by_url(
            &self,
            source_id: SourceId,
            detail_url: &str,
        ) -> Result<Option<PersistedJobRecord>> {
            self.inner.find_by_url(source_id, detail_url).await
        }
        async fn insert(&self, record: &NewJobRecord) -> Result<PersistedJobRecord> {
            if record.detail_url == self.poisoned_url {
                return Err(HarvestError::Storage("simulated tag write failure".into()));
            }
            self.inner.insert(record).await
        }
        async fn touch(&self, id: JobId) -> Result<()> {
            self.inner.touch(id).await
        }
        async fn mark_inactive_except(
            &self,
            source_id: SourceId,
            active_urls: &HashSet<String>,
        ) -> Result<usize> {
            if self.fail_stale {
                return Err(HarvestError::Storage("simulated lock timeout".into()));
            }
            self.inner.mark_inactive_except(source_id, active_urls).await
        }
        async fn list_jobs(&self, source_id: SourceId) -> Result<Vec<PersistedJobRecord>> {
            self.inner.list_jobs(source_id).await
        }
        async fn snapshot(&self) -> Result<CatalogSnapshot> {
            self.inner.snapshot().await
        }
    }

    #[tokio::test]
    async fn first_run_inserts_everything() {
        let store = test_storage().await;
        let outcome = reconcile(&store, "board", &batch(&["/a", "/b", "/c"]))
            .await
            .unwrap();

        assert_eq!(outcome.inserted, 3);
        assert_eq!(outcome.refreshed, 0);
        assert_eq!(outcome.marked_stale, 0);
        assert!(outcome.is_clean());

        let id = store.get_or_create_source("board").await.unwrap();
        let job = store.find_by_url(id, "/a").await.unwrap().expect("job");
        assert_eq!(job.title, "Engineer /a");
        assert_eq!(job.tags, vec!["rust".to_string()]);
    }

    #[tokio::test]
    async fn rerun_is_idempotent() {
        let store = test_storage().await;
        let records = batch(&["/a", "/b", "/c"]);

        reconcile(&store, "board", &records).await.unwrap();
        let before = store.snapshot().await.unwrap();
        let second = reconcile(&store, "board", &records).await.unwrap();

        assert_eq!(second.inserted, 0);
        assert_eq!(second.refreshed, 3);
        assert_eq!(second.marked_stale, 0);
        assert_eq!(store.snapshot().await.unwrap(), before);
    }

    #[tokio::test]
    async fn shrinking_input_converges() {
        let store = test_storage().await;
        reconcile(&store, "board", &batch(&["/a", "/b", "/c", "/d"]))
            .await
            .unwrap();

        let shrunk = batch(&["/a", "/c"]);
        let outcome = reconcile(&store, "board", &shrunk).await.unwrap();
        assert_eq!(outcome.marked_stale, 2);
        assert_eq!(
            active_urls(&store, "board").await,
            HashSet::from(["/a".to_string(), "/c".to_string()])
        );

        let again = reconcile(&store, "board", &shrunk).await.unwrap();
        assert_eq!(again.marked_stale, 0);
        assert_eq!(active_urls(&store, "board").await.len(), 2);
        assert_eq!(store.snapshot().await.unwrap().inactive, 2);
    }

    #[tokio::test]
    async fn reappearing_job_is_reactivated() {
        let store = test_storage().await;
        reconcile(&store, "board", &batch(&["/a", "/b"])).await.unwrap();
        reconcile(&store, "board", &batch(&["/a"])).await.unwrap();

        let outcome = reconcile(&store, "board", &batch(&["/a", "/b"])).await.unwrap();
        assert_eq!(outcome.inserted, 0);
        assert_eq!(outcome.refreshed, 2);
        assert_eq!(active_urls(&store, "board").await.len(), 2);
    }

    #[tokio::test]
    async fn one_bad_record_does_not_abort_batch() {
        let store = FlakyStore {
            inner: test_storage().await,
            poisoned_url: "/j4".into(),
            fail_stale: false,
        };
        let urls: Vec<String> = (0..10).map(|i| format!("/j{i}")).collect();
        let refs: Vec<&str> = urls.iter().map(String::as_str).collect();

        let outcome = reconcile(&store, "board", &batch(&refs)).await.unwrap();
        assert_eq!(outcome.inserted, 9);
        assert_eq!(outcome.errors.len(), 1);
        assert_eq!(outcome.errors[0].detail_url, "/j4");
        assert!(outcome.errors[0].message.contains("tag write"));

        let active = active_urls(&store, "board").await;
        assert_eq!(active.len(), 9);
        assert!(!active.contains("/j4"));
    }

    #[tokio::test]
    async fn stale_failure_keeps_upserts() {
        let store = FlakyStore {
            inner: test_storage().await,
            poisoned_url: String::new(),
            fail_stale: true,
        };
        let outcome = reconcile(&store, "board", &batch(&["/a", "/b"])).await.unwrap();

        assert_eq!(outcome.inserted, 2);
        assert!(outcome.stale_error.is_some());
        assert!(!outcome.is_clean());
        assert_eq!(active_urls(&store, "board").await.len(), 2);
    }

    #[tokio::test]
    async fn skipping_stale_pass_leaves_missing_jobs_active() {
        let store = test_storage().await;
        reconcile(&store, "board", &batch(&["/a", "/b", "/c"])).await.unwrap();

        let outcome = reconcile_with(
            &store,
            "board",
            &batch(&["/a"]),
            ReconcileOptions { mark_stale: false },
        )
        .await
        .unwrap();
        assert_eq!(outcome.refreshed, 1);
        assert_eq!(outcome.marked_stale, 0);
        assert_eq!(active_urls(&store, "board").await.len(), 3);
    }

    #[tokio::test]
    async fn repeated_url_in_batch_is_an_error_entry() {
        let store = test_storage().await;
        let mut records = batch(&["/a", "/b"]);
        records.extend(batch(&["/a"]));

        let outcome = reconcile(&store, "board", &records).await.unwrap();
        assert_eq!(outcome.inserted, 2);
        assert_eq!(outcome.errors.len(), 1);
        assert_eq!(outcome.inserted + outcome.refreshed + outcome.errors.len(), records.len());
    }

    #[tokio::test]
    async fn sources_are_partitioned() {
        let store = test_storage().await;
        reconcile(&store, "alpha", &batch(&["/a1", "/a2"])).await.unwrap();
        reconcile(&store, "beta", &batch(&["/b1"])).await.unwrap();

        // An empty batch for beta deactivates only beta's jobs.
        let outcome = reconcile(&store, "beta", &[]).await.unwrap();
        assert_eq!(outcome.marked_stale, 1);
        assert_eq!(active_urls(&store, "alpha").await.len(), 2);
        assert!(active_urls(&store, "beta").await.is_empty());
    }

    #[tokio::test]
    async fn url_listed_by_two_sources_is_tracked_per_source() {
        let store = test_storage().await;
        reconcile(&store, "alpha", &batch(&["/a"])).await.unwrap();

        let first = reconcile(&store, "beta", &batch(&["/a"])).await.unwrap();
        assert_eq!(first.inserted, 1);
        assert!(first.is_clean());

        let second = reconcile(&store, "beta", &batch(&["/a"])).await.unwrap();
        assert_eq!(second.refreshed, 1);
        assert!(second.is_clean());

        // Alpha drops the listing; beta still sees it.
        reconcile(&store, "alpha", &[]).await.unwrap();
        let outcome = reconcile(&store, "beta", &batch(&["/a"])).await.unwrap();
        assert_eq!(outcome.refreshed, 1);
        assert!(active_urls(&store, "alpha").await.is_empty());
        assert_eq!(active_urls(&store, "beta").await.len(), 1);
    }

    #[tokio::test]
    async fn two_item_scenario() {
        let store = test_storage().await;
        reconcile(&store, "board", &batch(&["/a", "/b"])).await.unwrap();

        let outcome = reconcile(&store, "board", &batch(&["/a"])).await.unwrap();
        assert_eq!(outcome.inserted, 0);
        assert_eq!(outcome.refreshed, 1);
        assert_eq!(outcome.marked_stale, 1);
    }
}
