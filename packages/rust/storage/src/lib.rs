//! libSQL storage layer for the job catalog (local file mode).
//!
//! The [`Storage`] struct wraps a libSQL database holding sources, jobs and
//! job tags, and implements [`CatalogStore`] for the reconciliation pipeline.
//!
//! **Access rules:**
//! - every statement goes through one async lock on the shared connection,
//!   so no read or write ever lands inside another task's open insert
//!   transaction
//! - a job is identified by its detail URL within its source; two sources
//!   listing the same URL each own a row
//! - jobs are never deleted; staleness is `is_active = 0`

mod catalog;
mod migrations;

use std::collections::HashSet;
use std::path::Path;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use jobharvest_shared::{
    CatalogSnapshot, HarvestError, JobId, NewJobRecord, PersistedJobRecord, Result, SourceId,
    SourceStats,
};
use libsql::{Connection, Database, params};
use tokio::sync::Mutex;
use tracing::{debug, info};
use uuid::Uuid;

pub use catalog::CatalogStore;

/// Default number of ids per mark-stale `UPDATE`.
pub const DEFAULT_STALE_BATCH_SIZE: usize = 200;

/// Separator used when tags are folded into one column by `GROUP_CONCAT`.
const TAG_SEPARATOR: char = '\u{1f}';

/// Column list shared by every job query; see [`row_to_job`].
const JOB_COLUMNS: &str = "j.id, j.source_id, j.detail_url, j.title, j.location, j.salary, \
     j.description, j.is_active, j.created_at, j.updated_at, \
     (SELECT GROUP_CONCAT(t.tag, char(31)) FROM job_tags t WHERE t.job_id = j.id)";

/// Primary storage handle wrapping a libSQL database.
pub struct Storage {
    #[allow(dead_code)]
    db: Database,
    conn: Connection,
    lock: Mutex<()>,
    stale_batch_size: usize,
}

impl Storage {
    /// Open or create a database at `path`, applying pending migrations.
    pub async fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| HarvestError::io(parent, e))?;
        }

        let db = libsql::Builder::new_local(path)
            .build()
            .await
            .map_err(storage_err)?;

        let conn = db.connect().map_err(storage_err)?;

        let storage = Self {
            db,
            conn,
            lock: Mutex::new(()),
            stale_batch_size: DEFAULT_STALE_BATCH_SIZE,
        };
        storage.run_migrations().await?;
        Ok(storage)
    }

    /// Bound the number of rows touched by a single mark-stale `UPDATE`.
    pub fn with_stale_batch_size(mut self, size: usize) -> Self {
        self.stale_batch_size = size.max(1);
        self
    }

    /// Run pending schema migrations.
    async fn run_migrations(&self) -> Result<()> {
        let current_version = self.get_schema_version().await;

        for migration in migrations::all_migrations() {
            if migration.version > current_version {
                info!(
                    version = migration.version,
                    description = migration.description,
                    "applying migration"
                );
                self.conn.execute_batch(migration.sql).await.map_err(|e| {
                    HarvestError::Storage(format!("migration v{} failed: {e}", migration.version))
                })?;
            }
        }
        Ok(())
    }

    /// Get the current schema version, or 0 if no migrations have been applied.
    async fn get_schema_version(&self) -> u32 {
        let result = self
            .conn
            .query("SELECT MAX(version) FROM schema_migrations", params![])
            .await;

        match result {
            Ok(mut rows) => {
                if let Ok(Some(row)) = rows.next().await {
                    row.get::<u32>(0).unwrap_or(0)
                } else {
                    0
                }
            }
            Err(_) => 0, // Table doesn't exist yet
        }
    }

    /// Insert the job row and its tags inside one transaction.
    async fn insert_job_tx(&self, job: &PersistedJobRecord) -> Result<()> {
        let tx = self.conn.transaction().await.map_err(storage_err)?;

        let written = async {
            tx.execute(
                "INSERT INTO jobs (id, source_id, detail_url, title, location, salary, description,
                                   is_active, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, 1, ?8, ?9)",
                params![
                    job.id.to_string(),
                    job.source_id.to_string(),
                    job.detail_url.as_str(),
                    job.title.as_str(),
                    job.location.as_deref(),
                    job.salary.as_deref(),
                    job.description.as_deref(),
                    job.created_at.to_rfc3339(),
                    job.updated_at.to_rfc3339(),
                ],
            )
            .await?;

            for tag in &job.tags {
                tx.execute(
                    "INSERT OR IGNORE INTO job_tags (job_id, tag) VALUES (?1, ?2)",
                    params![job.id.to_string(), tag.as_str()],
                )
                .await?;
            }
            Ok::<(), libsql::Error>(())
        }
        .await;

        match written {
            Ok(()) => tx.commit().await.map_err(storage_err),
            Err(e) => {
                let _ = tx.rollback().await;
                Err(HarvestError::Storage(format!(
                    "insert {} failed: {e}",
                    job.detail_url
                )))
            }
        }
    }

    /// Run a job query and decode every row.
    async fn query_jobs(
        &self,
        sql: &str,
        params: impl libsql::params::IntoParams,
    ) -> Result<Vec<PersistedJobRecord>> {
        let mut rows = self.conn.query(sql, params).await.map_err(storage_err)?;

        let mut results = Vec::new();
        while let Some(row) = rows.next().await.map_err(storage_err)? {
            results.push(row_to_job(&row)?);
        }
        Ok(results)
    }
}

#[async_trait]
impl CatalogStore for Storage {
    async fn get_or_create_source(&self, name: &str) -> Result<SourceId> {
        let _guard = self.lock.lock().await;

        let candidate = SourceId::new();
        self.conn
            .execute(
                "INSERT INTO sources (id, name, created_at) VALUES (?1, ?2, ?3)
                 ON CONFLICT(name) DO NOTHING",
                params![candidate.to_string(), name, Utc::now().to_rfc3339()],
            )
            .await
            .map_err(storage_err)?;

        let mut rows = self
            .conn
            .query("SELECT id FROM sources WHERE name = ?1", params![name])
            .await
            .map_err(storage_err)?;

        let row = rows
            .next()
            .await
            .map_err(storage_err)?
            .ok_or_else(|| HarvestError::Storage(format!("source '{name}' vanished")))?;
        let id: String = row.get(0).map_err(storage_err)?;
        parse_id(&id)
    }

    async fn find_by_url(
        &self,
        source_id: SourceId,
        detail_url: &str,
    ) -> Result<Option<PersistedJobRecord>> {
        let sql = format!(
            "SELECT {JOB_COLUMNS} FROM jobs j WHERE j.source_id = ?1 AND j.detail_url = ?2"
        );
        let _guard = self.lock.lock().await;
        let mut found = self
            .query_jobs(&sql, params![source_id.to_string(), detail_url])
            .await?;
        Ok(found.pop())
    }

    async fn insert(&self, record: &NewJobRecord) -> Result<PersistedJobRecord> {
        let now = Utc::now();
        let job = PersistedJobRecord {
            id: JobId::new(),
            source_id: record.source_id,
            detail_url: record.detail_url.clone(),
            title: record.title.clone(),
            location: record.location.clone(),
            salary: record.salary.clone(),
            description: record.description.clone(),
            tags: record.tags.clone(),
            is_active: true,
            created_at: now,
            updated_at: now,
        };

        let _guard = self.lock.lock().await;
        self.insert_job_tx(&job).await?;
        debug!(url = %job.detail_url, id = %job.id, "job inserted");
        Ok(job)
    }

    async fn touch(&self, id: JobId) -> Result<()> {
        let _guard = self.lock.lock().await;
        let changed = self
            .conn
            .execute(
                "UPDATE jobs SET updated_at = ?1, is_active = 1 WHERE id = ?2",
                params![Utc::now().to_rfc3339(), id.to_string()],
            )
            .await
            .map_err(storage_err)?;

        if changed == 0 {
            return Err(HarvestError::Storage(format!("no job with id {id}")));
        }
        Ok(())
    }

    async fn mark_inactive_except(
        &self,
        source_id: SourceId,
        active_urls: &HashSet<String>,
    ) -> Result<usize> {
        let _guard = self.lock.lock().await;

        let mut rows = self
            .conn
            .query(
                "SELECT id, detail_url FROM jobs WHERE source_id = ?1 AND is_active = 1",
                params![source_id.to_string()],
            )
            .await
            .map_err(storage_err)?;

        let mut stale_ids: Vec<String> = Vec::new();
        while let Some(row) = rows.next().await.map_err(storage_err)? {
            let id: String = row.get(0).map_err(storage_err)?;
            let url: String = row.get(1).map_err(storage_err)?;
            if !active_urls.contains(&url) {
                stale_ids.push(id);
            }
        }

        let mut marked = 0usize;
        for chunk in stale_ids.chunks(self.stale_batch_size) {
            let placeholders = (1..=chunk.len())
                .map(|i| format!("?{i}"))
                .collect::<Vec<_>>()
                .join(", ");
            let sql = format!("UPDATE jobs SET is_active = 0 WHERE id IN ({placeholders})");
            let values: Vec<libsql::Value> = chunk
                .iter()
                .map(|id| libsql::Value::Text(id.clone()))
                .collect();

            let changed = self
                .conn
                .execute(&sql, libsql::params::Params::Positional(values))
                .await
                .map_err(storage_err)?;
            marked += changed as usize;
        }

        debug!(
            %source_id,
            marked,
            batches = stale_ids.len().div_ceil(self.stale_batch_size),
            "stale jobs marked"
        );
        Ok(marked)
    }

    async fn list_jobs(&self, source_id: SourceId) -> Result<Vec<PersistedJobRecord>> {
        let sql = format!(
            "SELECT {JOB_COLUMNS} FROM jobs j WHERE j.source_id = ?1 ORDER BY j.detail_url"
        );
        let _guard = self.lock.lock().await;
        self.query_jobs(&sql, params![source_id.to_string()]).await
    }

    async fn snapshot(&self) -> Result<CatalogSnapshot> {
        let _guard = self.lock.lock().await;
        let mut rows = self
            .conn
            .query(
                "SELECT s.name,
                        COUNT(j.id),
                        COALESCE(SUM(CASE WHEN j.is_active = 1 THEN 1 ELSE 0 END), 0)
                 FROM sources s
                 LEFT JOIN jobs j ON j.source_id = s.id
                 GROUP BY s.name
                 ORDER BY s.name",
                params![],
            )
            .await
            .map_err(storage_err)?;

        let mut snapshot = CatalogSnapshot::default();
        while let Some(row) = rows.next().await.map_err(storage_err)? {
            let name: String = row.get(0).map_err(storage_err)?;
            let total = row.get::<i64>(1).map_err(storage_err)? as usize;
            let active = row.get::<i64>(2).map_err(storage_err)? as usize;

            snapshot.total += total;
            snapshot.active += active;
            snapshot.sources.push(SourceStats {
                name,
                total,
                active,
            });
        }
        snapshot.inactive = snapshot.total - snapshot.active;
        Ok(snapshot)
    }
}

fn storage_err(e: impl std::fmt::Display) -> HarvestError {
    HarvestError::Storage(e.to_string())
}

fn parse_id(s: &str) -> Result<SourceId> {
    s.parse()
        .map_err(|e| HarvestError::Storage(format!("invalid id '{s}': {e}")))
}

fn parse_time(s: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| HarvestError::Storage(format!("invalid date: {e}")))
}

/// Convert a database row selected with [`JOB_COLUMNS`] to a [`PersistedJobRecord`].
fn row_to_job(row: &libsql::Row) -> Result<PersistedJobRecord> {
    let id: String = row.get(0).map_err(storage_err)?;
    let source_id: String = row.get(1).map_err(storage_err)?;
    let created_at: String = row.get(8).map_err(storage_err)?;
    let updated_at: String = row.get(9).map_err(storage_err)?;

    let mut tags: Vec<String> = row
        .get::<String>(10)
        .ok()
        .map(|joined| joined.split(TAG_SEPARATOR).map(String::from).collect())
        .unwrap_or_default();
    tags.sort();

    Ok(PersistedJobRecord {
        id: JobId(
            Uuid::parse_str(&id)
                .map_err(|e| HarvestError::Storage(format!("invalid id '{id}': {e}")))?,
        ),
        source_id: parse_id(&source_id)?,
        detail_url: row.get(2).map_err(storage_err)?,
        title: row.get(3).map_err(storage_err)?,
        location: row.get::<String>(4).ok(),
        salary: row.get::<String>(5).ok(),
        description: row.get::<String>(6).ok(),
        tags,
        is_active: row.get::<i64>(7).map_err(storage_err)? != 0,
        created_at: parse_time(&created_at)?,
        updated_at: parse_time(&updated_at)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Create a temp file storage for testing.
    async fn test_storage() -> Storage {
        let tmp = std::env::temp_dir().join(format!("jh_test_{}.db", Uuid::now_v7()));
        Storage::open(&tmp).await.expect("open test db")
    }

    fn new_job(source_id: SourceId, url: &str) -> NewJobRecord {
        NewJobRecord {
            source_id,
            detail_url: url.into(),
            title: format!("Job at {url}"),
            location: Some("Remote".into()),
            salary: None,
            description: None,
            tags: vec!["rust".into(), "backend".into()],
        }
    }

    fn urls(list: &[&str]) -> HashSet<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[tokio::test]
    async fn open_and_migrate() {
        let storage = test_storage().await;
        assert_eq!(storage.get_schema_version().await, 1);
    }

    #[tokio::test]
    async fn idempotent_migration() {
        let tmp = std::env::temp_dir().join(format!("jh_test_{}.db", Uuid::now_v7()));
        let s1 = Storage::open(&tmp).await.expect("first open");
        drop(s1);
        let s2 = Storage::open(&tmp).await.expect("second open");
        assert_eq!(s2.get_schema_version().await, 1);
    }

    #[tokio::test]
    async fn source_get_or_create_is_idempotent() {
        let storage = test_storage().await;
        let a = storage.get_or_create_source("acme").await.unwrap();
        let b = storage.get_or_create_source("acme").await.unwrap();
        let c = storage.get_or_create_source("globex").await.unwrap();
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[tokio::test]
    async fn insert_and_find_by_url() {
        let storage = test_storage().await;
        let source = storage.get_or_create_source("acme").await.unwrap();

        let inserted = storage
            .insert(&new_job(source, "https://acme.example/jobs/1"))
            .await
            .expect("insert");
        assert!(inserted.is_active);
        assert_eq!(inserted.created_at, inserted.updated_at);

        let found = storage
            .find_by_url(source, "https://acme.example/jobs/1")
            .await
            .unwrap()
            .expect("job present");
        assert_eq!(found.id, inserted.id);
        assert_eq!(found.tags, vec!["backend".to_string(), "rust".to_string()]);
        assert_eq!(found.location.as_deref(), Some("Remote"));
        assert_eq!(found.salary, None);

        let missing = storage
            .find_by_url(source, "https://acme.example/jobs/2")
            .await
            .unwrap();
        assert!(missing.is_none());
    }

    #[tokio::test]
    async fn duplicate_url_insert_fails() {
        let storage = test_storage().await;
        let source = storage.get_or_create_source("acme").await.unwrap();
        storage
            .insert(&new_job(source, "https://acme.example/jobs/1"))
            .await
            .unwrap();

        let err = storage
            .insert(&new_job(source, "https://acme.example/jobs/1"))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("storage error"));

        // The failed transaction left no orphan tags or rows behind.
        assert_eq!(storage.list_jobs(source).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn same_url_in_two_sources_gets_two_rows() {
        let storage = test_storage().await;
        let alpha = storage.get_or_create_source("alpha").await.unwrap();
        let beta = storage.get_or_create_source("beta").await.unwrap();
        let url = "https://shared.example/jobs/1";

        let a = storage.insert(&new_job(alpha, url)).await.expect("alpha insert");
        let b = storage.insert(&new_job(beta, url)).await.expect("beta insert");
        assert_ne!(a.id, b.id);

        let found = storage.find_by_url(beta, url).await.unwrap().expect("beta row");
        assert_eq!(found.id, b.id);

        // Deactivating it for alpha leaves beta's row alone.
        storage.mark_inactive_except(alpha, &urls(&[])).await.unwrap();
        assert!(storage.find_by_url(beta, url).await.unwrap().unwrap().is_active);
        assert!(!storage.find_by_url(alpha, url).await.unwrap().unwrap().is_active);
    }

    #[tokio::test]
    async fn reads_never_see_half_written_jobs() {
        let storage = test_storage().await;
        let source = storage.get_or_create_source("acme").await.unwrap();

        let writer = async {
            for i in 0..40 {
                storage
                    .insert(&new_job(source, &format!("https://acme.example/jobs/{i}")))
                    .await
                    .unwrap();
            }
        };
        let reader = async {
            for _ in 0..40 {
                for job in storage.list_jobs(source).await.unwrap() {
                    assert_eq!(job.tags.len(), 2, "job {} read without its tags", job.detail_url);
                }
                tokio::task::yield_now().await;
            }
        };
        tokio::join!(writer, reader);

        assert_eq!(storage.list_jobs(source).await.unwrap().len(), 40);
    }

    #[tokio::test]
    async fn touch_reactivates_and_keeps_created_at() {
        let storage = test_storage().await;
        let source = storage.get_or_create_source("acme").await.unwrap();
        let job = storage
            .insert(&new_job(source, "https://acme.example/jobs/1"))
            .await
            .unwrap();

        let marked = storage.mark_inactive_except(source, &urls(&[])).await.unwrap();
        assert_eq!(marked, 1);

        storage.touch(job.id).await.expect("touch");
        let found = storage
            .find_by_url(source, &job.detail_url)
            .await
            .unwrap()
            .unwrap();
        assert!(found.is_active);
        assert_eq!(found.created_at, job.created_at);
        assert!(found.updated_at >= job.updated_at);
    }

    #[tokio::test]
    async fn touch_unknown_job_fails() {
        let storage = test_storage().await;
        assert!(storage.touch(JobId::new()).await.is_err());
    }

    #[tokio::test]
    async fn mark_inactive_except_in_chunks() {
        let storage = test_storage().await.with_stale_batch_size(2);
        let acme = storage.get_or_create_source("acme").await.unwrap();
        let globex = storage.get_or_create_source("globex").await.unwrap();

        for i in 0..6 {
            storage
                .insert(&new_job(acme, &format!("https://acme.example/jobs/{i}")))
                .await
                .unwrap();
        }
        storage
            .insert(&new_job(globex, "https://globex.example/jobs/1"))
            .await
            .unwrap();

        let live = urls(&["https://acme.example/jobs/0"]);
        let marked = storage.mark_inactive_except(acme, &live).await.unwrap();
        assert_eq!(marked, 5);

        // Already-inactive jobs are not counted again.
        let marked = storage.mark_inactive_except(acme, &live).await.unwrap();
        assert_eq!(marked, 0);

        let jobs = storage.list_jobs(acme).await.unwrap();
        let active: Vec<_> = jobs.iter().filter(|j| j.is_active).collect();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].detail_url, "https://acme.example/jobs/0");

        // Other sources are untouched.
        let globex_jobs = storage.list_jobs(globex).await.unwrap();
        assert!(globex_jobs.iter().all(|j| j.is_active));
    }

    #[tokio::test]
    async fn snapshot_counts() {
        let storage = test_storage().await;
        let acme = storage.get_or_create_source("acme").await.unwrap();
        let _empty = storage.get_or_create_source("empty").await.unwrap();
        for i in 0..3 {
            storage
                .insert(&new_job(acme, &format!("https://acme.example/jobs/{i}")))
                .await
                .unwrap();
        }
        storage
            .mark_inactive_except(acme, &urls(&["https://acme.example/jobs/0"]))
            .await
            .unwrap();

        let snapshot = storage.snapshot().await.unwrap();
        assert_eq!(snapshot.total, 3);
        assert_eq!(snapshot.active, 1);
        assert_eq!(snapshot.inactive, 2);
        assert_eq!(snapshot.sources.len(), 2);
        assert_eq!(snapshot.sources[0].name, "acme");
        assert_eq!(snapshot.sources[1].total, 0);
    }
}
