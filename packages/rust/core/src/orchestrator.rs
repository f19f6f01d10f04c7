//! Fan-out of collect → classify → reconcile over all sources.
//!
//! Every source runs as its own tokio task with its own render surface. A
//! semaphore bounds how many run at once. Each source gets a time budget for
//! collection and the detail pass, and reconciliation is bounded separately,
//! so [`Harvester::run_all`] always settles without discarding what was
//! collected. Whatever happens inside one task (error, truncation, panic)
//! ends up in that source's [`SourceReport`]; siblings are never affected.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::Semaphore;
use tracing::{Instrument, error, info, info_span, instrument, warn};
use url::Url;

use jobharvest_collector::{Collector, SelectorAdapter, SurfaceFactory, Termination, bounded};
use jobharvest_shared::{
    CatalogSnapshot, CollectorSettings, HarvestError, Result, RunSettings, SourceEntry,
};
use jobharvest_storage::CatalogStore;

use crate::classify::{ClassifierGate, classify};
use crate::enrich::{EnrichmentSummary, enrich_details};
use crate::reconcile::{ReconcileOptions, ReconciliationOutcome, reconcile_with};

// ---------------------------------------------------------------------------
// Reports
// ---------------------------------------------------------------------------

/// What the classifier gate did with one source's batch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct GateCounts {
    pub accepted: usize,
    pub rejected: usize,
    pub missing_url: usize,
    pub duplicate_url: usize,
}

/// Outcome of one source's pipeline.
#[derive(Debug, Clone)]
pub struct SourceReport {
    pub name: String,
    /// Unique records returned by the collector.
    pub collected: usize,
    /// `None` when the source failed before collection finished.
    pub termination: Option<Termination>,
    pub gate: GateCounts,
    pub enrichment: Option<EnrichmentSummary>,
    pub reconciliation: Option<ReconciliationOutcome>,
    /// Source-fatal failure, if any.
    pub error: Option<String>,
    pub elapsed: Duration,
}

impl SourceReport {
    fn empty(name: &str) -> Self {
        Self {
            name: name.to_string(),
            collected: 0,
            termination: None,
            gate: GateCounts::default(),
            enrichment: None,
            reconciliation: None,
            error: None,
            elapsed: Duration::ZERO,
        }
    }

    fn failed(name: &str, error: impl Into<String>, elapsed: Duration) -> Self {
        Self {
            error: Some(error.into()),
            elapsed,
            ..Self::empty(name)
        }
    }

    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }
}

/// Aggregate result of [`Harvester::run_all`].
#[derive(Debug, Clone)]
pub struct HarvestReport {
    /// One entry per source, in input order.
    pub sources: Vec<SourceReport>,
    /// Catalog totals after the run; `None` if the store could not be read.
    pub snapshot: Option<CatalogSnapshot>,
    pub elapsed: Duration,
}

impl HarvestReport {
    pub fn succeeded(&self) -> usize {
        self.sources.iter().filter(|s| s.is_success()).count()
    }

    pub fn failed(&self) -> usize {
        self.sources.len() - self.succeeded()
    }
}

// ---------------------------------------------------------------------------
// Progress
// ---------------------------------------------------------------------------

/// Progress callback for reporting run status.
pub trait ProgressReporter: Send + Sync {
    /// Called once before any source starts.
    fn run_started(&self, total: usize);
    /// Called when a source acquires its slot.
    fn source_started(&self, name: &str);
    /// Called when a source settles, successfully or not.
    fn source_finished(&self, report: &SourceReport);
    /// Called when the run completes.
    fn done(&self, report: &HarvestReport);
}

/// No-op progress reporter for headless/test usage.
pub struct SilentProgress;

impl ProgressReporter for SilentProgress {
    fn run_started(&self, _total: usize) {}
    fn source_started(&self, _name: &str) {}
    fn source_finished(&self, _report: &SourceReport) {}
    fn done(&self, _report: &HarvestReport) {}
}

// ---------------------------------------------------------------------------
// Harvester
// ---------------------------------------------------------------------------

/// Runs the ingestion pipeline for a set of sources.
#[derive(Clone)]
pub struct Harvester {
    store: Arc<dyn CatalogStore>,
    gate: Arc<dyn ClassifierGate>,
    surfaces: Arc<dyn SurfaceFactory>,
    collector: CollectorSettings,
    run: RunSettings,
}

impl Harvester {
    pub fn new(
        store: Arc<dyn CatalogStore>,
        gate: Arc<dyn ClassifierGate>,
        surfaces: Arc<dyn SurfaceFactory>,
        collector: CollectorSettings,
        run: RunSettings,
    ) -> Self {
        Self {
            store,
            gate,
            surfaces,
            collector,
            run,
        }
    }

    /// Run every source concurrently and wait for all of them to settle.
    #[instrument(skip_all, fields(sources = sources.len(), concurrency = self.run.concurrency))]
    pub async fn run_all(
        &self,
        sources: &[SourceEntry],
        progress: Arc<dyn ProgressReporter>,
    ) -> HarvestReport {
        let start = Instant::now();
        let semaphore = Arc::new(Semaphore::new(self.run.concurrency.max(1)));
        progress.run_started(sources.len());
        info!("starting harvest");

        let mut handles = Vec::with_capacity(sources.len());
        for source in sources {
            let harvester = self.clone();
            let source = source.clone();
            let sem = semaphore.clone();
            let progress = progress.clone();
            let span = info_span!("source", name = %source.name);

            handles.push((
                source.name.clone(),
                tokio::spawn(
                    async move {
                        let Ok(_permit) = sem.acquire_owned().await else {
                            return SourceReport::failed(
                                &source.name,
                                "scheduler shut down",
                                Duration::ZERO,
                            );
                        };
                        progress.source_started(&source.name);
                        let report = harvester.run_source(&source).await;
                        progress.source_finished(&report);
                        report
                    }
                    .instrument(span),
                ),
            ));
        }

        let mut reports = Vec::with_capacity(handles.len());
        for (name, handle) in handles {
            match handle.await {
                Ok(report) => reports.push(report),
                Err(e) => {
                    error!(source = %name, error = %e, "source task panicked");
                    let report =
                        SourceReport::failed(&name, format!("task failed: {e}"), Duration::ZERO);
                    progress.source_finished(&report);
                    reports.push(report);
                }
            }
        }

        let snapshot = match self.store.snapshot().await {
            Ok(snapshot) => {
                info!(
                    total = snapshot.total,
                    active = snapshot.active,
                    inactive = snapshot.inactive,
                    "catalog snapshot"
                );
                Some(snapshot)
            }
            Err(e) => {
                warn!(error = %e, "catalog snapshot unavailable");
                None
            }
        };

        let report = HarvestReport {
            sources: reports,
            snapshot,
            elapsed: start.elapsed(),
        };
        info!(
            succeeded = report.succeeded(),
            failed = report.failed(),
            elapsed_ms = report.elapsed.as_millis(),
            "harvest finished"
        );
        progress.done(&report);
        report
    }

    async fn run_source(&self, source: &SourceEntry) -> SourceReport {
        let start = Instant::now();
        let mut report = SourceReport::empty(&source.name);

        if let Err(e) = self.pipeline(source, &mut report).await {
            warn!(error = %e, "source failed");
            report.error = Some(e.to_string());
        }

        report.elapsed = start.elapsed();
        info!(
            collected = report.collected,
            accepted = report.gate.accepted,
            ok = report.is_success(),
            elapsed_ms = report.elapsed.as_millis(),
            "source finished"
        );
        report
    }

    /// The per-source pipeline. Fills `report` as it goes so partial
    /// progress is kept when a later stage fails.
    ///
    /// The source's time budget covers opening the surface, collection and
    /// the detail pass. Whatever was collected by then is always reconciled,
    /// under a bound of its own.
    async fn pipeline(&self, source: &SourceEntry, report: &mut SourceReport) -> Result<()> {
        let deadline = Instant::now() + self.run.source_timeout;
        let url = Url::parse(&source.url)
            .map_err(|e| HarvestError::config(format!("source '{}' URL: {e}", source.name)))?;
        let adapter = SelectorAdapter::new(source.name.as_str(), &source.fields)?;

        let mut surface =
            bounded("open surface", time_left(deadline), self.surfaces.open(source)).await?;
        bounded(
            "navigate listing",
            self.collector.navigation_timeout.min(time_left(deadline)),
            surface.navigate(&url),
        )
        .await?;

        let collector = Collector::new(
            self.collector.clone(),
            source.item_selector.as_str(),
            &adapter,
        )
        .with_deadline(deadline);
        let outcome = collector.collect(surface.as_mut()).await;
        let termination = outcome.termination.clone();
        report.collected = outcome.records.len();
        report.termination = Some(termination.clone());

        let gated = classify(self.gate.as_ref(), outcome.into_records());
        report.gate = GateCounts {
            accepted: gated.accepted.len(),
            rejected: gated.rejected,
            missing_url: gated.missing_url,
            duplicate_url: gated.duplicate_url,
        };
        let mut accepted = gated.accepted;

        let detail = source
            .detail
            .as_ref()
            .filter(|_| termination.surface_usable() && termination != Termination::Deadline);
        if let Some(detail) = detail {
            match self.known_urls(&source.name).await {
                Ok(known) => {
                    report.enrichment = Some(
                        enrich_details(
                            surface.as_mut(),
                            &adapter,
                            &mut accepted,
                            &known,
                            detail,
                            &self.collector,
                            deadline,
                        )
                        .await,
                    );
                }
                Err(e) => warn!(error = %e, "catalog unreadable, detail pass skipped"),
            }
        }
        // Close the page before writing to the catalog.
        drop(surface);

        let complete = termination.is_complete();
        if !complete {
            warn!(
                termination = termination.label(),
                "collection truncated, stale marking skipped"
            );
        }
        let limit = self.run.reconcile_timeout;
        let reconciled = tokio::time::timeout(
            limit,
            reconcile_with(
                self.store.as_ref(),
                &source.name,
                &accepted,
                ReconcileOptions {
                    mark_stale: complete,
                },
            ),
        )
        .await
        .map_err(|_| {
            HarvestError::timeout(
                format!("reconcile source '{}'", source.name),
                limit.as_millis() as u64,
            )
        })??;
        report.reconciliation = Some(reconciled);
        Ok(())
    }

    async fn known_urls(&self, source_name: &str) -> Result<HashSet<String>> {
        let id = self.store.get_or_create_source(source_name).await?;
        Ok(self
            .store
            .list_jobs(id)
            .await?
            .into_iter()
            .map(|j| j.detail_url)
            .collect())
    }
}

fn time_left(deadline: Instant) -> Duration {
    deadline.saturating_duration_since(Instant::now())
}
