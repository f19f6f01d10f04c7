//! Incremental collector for virtualized listing pages.
//!
//! A virtualized list only keeps the items near the viewport in the DOM and
//! recycles nodes as they scroll out. The collector steps the container down
//! by about a third of a viewport at a time, extracts whatever is rendered
//! after each step settles, and deduplicates by [`CanonicalKey`] so that an
//! item seen in two overlapping windows counts once.

use std::collections::HashMap;
use std::time::Instant;

use jobharvest_shared::{CanonicalKey, CollectorSettings, RawRecord, Result};
use tracing::{debug, info, instrument, warn};

use crate::adapters::ExtractionAdapter;
use crate::surface::{ContainerMetrics, PROBE_SCRIPT, RenderSurface, bounded};

// ---------------------------------------------------------------------------
// Session & outcome
// ---------------------------------------------------------------------------

/// Working state of one collection run. Owned by a single [`Collector::collect`] call.
#[derive(Debug, Default)]
pub struct CollectionSession {
    /// Current scroll offset in pixels.
    pub offset: u32,
    /// Maximum offset discovered from the container.
    pub max_scroll: u32,
    /// Unique records seen so far. First occurrence of a key wins.
    pub records: HashMap<CanonicalKey, RawRecord>,
    /// Consecutive attempts that added nothing new.
    pub stagnant: u32,
    /// Scroll attempts made.
    pub attempts: u32,
}

impl CollectionSession {
    /// Merge a batch of records, returning how many keys were new.
    pub fn merge(&mut self, batch: impl IntoIterator<Item = RawRecord>) -> usize {
        let mut added = 0;
        for record in batch {
            let key = record.canonical_key();
            if !self.records.contains_key(&key) {
                self.records.insert(key, record);
                added += 1;
            }
        }
        added
    }
}

/// Why a collection run stopped. None of these are failures.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Termination {
    /// No virtualized container; the page was read in a single pass.
    Fallback,
    /// The scan moved past the container's maximum offset.
    ReachedEnd,
    /// The hard cap on scroll attempts was hit; the list may go on.
    AttemptCap,
    /// Too many consecutive attempts produced no new item.
    Stagnation,
    /// The source's time budget ran out; results are partial.
    Deadline,
    /// The surface stopped responding; results are partial.
    SurfaceLost(String),
}

impl Termination {
    /// Whether the run saw the whole list. Only a complete run may be used
    /// to decide which listings disappeared upstream.
    pub fn is_complete(&self) -> bool {
        matches!(self, Self::Fallback | Self::ReachedEnd | Self::Stagnation)
    }

    /// Whether the surface can still be driven after the run.
    pub fn surface_usable(&self) -> bool {
        !matches!(self, Self::SurfaceLost(_))
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::Fallback => "fallback",
            Self::ReachedEnd => "reached-end",
            Self::AttemptCap => "attempt-cap",
            Self::Stagnation => "stagnation",
            Self::Deadline => "deadline",
            Self::SurfaceLost(_) => "surface-lost",
        }
    }
}

/// Result of one collection run.
#[derive(Debug)]
pub struct CollectionOutcome {
    /// Unique records keyed by canonical key.
    pub records: HashMap<CanonicalKey, RawRecord>,
    pub termination: Termination,
    /// Scroll attempts made (zero on the fallback path).
    pub attempts: u32,
    /// Items that failed extraction and were skipped.
    pub extraction_failures: usize,
}

impl CollectionOutcome {
    /// Records ordered by canonical key.
    pub fn into_records(self) -> Vec<RawRecord> {
        let mut entries: Vec<_> = self.records.into_iter().collect();
        entries.sort_by(|a, b| a.0.cmp(&b.0));
        entries.into_iter().map(|(_, record)| record).collect()
    }
}

// ---------------------------------------------------------------------------
// Collector
// ---------------------------------------------------------------------------

/// Drives a [`RenderSurface`] through the incremental scroll protocol.
pub struct Collector<'a> {
    settings: CollectorSettings,
    item_selector: String,
    adapter: &'a dyn ExtractionAdapter,
    deadline: Option<Instant>,
}

impl<'a> Collector<'a> {
    pub fn new(
        settings: CollectorSettings,
        item_selector: impl Into<String>,
        adapter: &'a dyn ExtractionAdapter,
    ) -> Self {
        Self {
            settings,
            item_selector: item_selector.into(),
            adapter,
            deadline: None,
        }
    }

    /// Stop scrolling once `deadline` has passed. Checked between scroll
    /// attempts; a step already in flight finishes under its own timeout.
    pub fn with_deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(deadline);
        self
    }

    /// Collect every item from an already-navigated surface.
    ///
    /// Never fails: if the surface breaks mid-scan, whatever was gathered so
    /// far is returned with [`Termination::SurfaceLost`].
    #[instrument(skip_all, fields(adapter = self.adapter.name(), selector = %self.item_selector))]
    pub async fn collect(&self, surface: &mut dyn RenderSurface) -> CollectionOutcome {
        let start = Instant::now();
        let mut session = CollectionSession::default();
        let mut failures = 0usize;

        let termination = match self.probe(surface).await {
            Some(metrics) if metrics.max_scroll() > 0 => {
                session.max_scroll = metrics.max_scroll();
                self.scan(surface, &mut session, metrics, &mut failures)
                    .await
            }
            _ => {
                debug!("no virtualized container, single pass");
                match self.extract_visible(surface, &mut session, &mut failures).await {
                    Ok(_) => Termination::Fallback,
                    Err(e) => Termination::SurfaceLost(e.to_string()),
                }
            }
        };

        match &termination {
            Termination::SurfaceLost(reason) => {
                warn!(
                    %reason,
                    kept = session.records.len(),
                    "surface lost, keeping partial results"
                );
            }
            Termination::Deadline => {
                warn!(kept = session.records.len(), "time budget spent, keeping partial results");
            }
            _ => {}
        }

        info!(
            items = session.records.len(),
            attempts = session.attempts,
            extraction_failures = failures,
            termination = termination.label(),
            elapsed_ms = start.elapsed().as_millis(),
            "collection finished"
        );

        CollectionOutcome {
            records: session.records,
            termination,
            attempts: session.attempts,
            extraction_failures: failures,
        }
    }

    /// Look for the virtualized scroll container.
    async fn probe(&self, surface: &mut dyn RenderSurface) -> Option<ContainerMetrics> {
        match bounded(
            "probe container",
            self.settings.step_timeout,
            surface.evaluate(PROBE_SCRIPT),
        )
        .await
        {
            Ok(value) => ContainerMetrics::from_probe(value),
            Err(e) => {
                debug!(error = %e, "container probe failed");
                None
            }
        }
    }

    /// The overlapping scroll loop.
    async fn scan(
        &self,
        surface: &mut dyn RenderSurface,
        session: &mut CollectionSession,
        metrics: ContainerMetrics,
        failures: &mut usize,
    ) -> Termination {
        let increment = (metrics.client_height_px() / 3).max(self.settings.min_increment_px);
        let settle_ms = self.settings.settle_delay.as_millis() as u64;

        debug!(
            max_scroll = session.max_scroll,
            client_height = metrics.client_height_px(),
            increment,
            "starting incremental scan"
        );

        loop {
            if session.offset > session.max_scroll {
                // Lazy feeds grow once the bottom is reached.
                match self.probe(surface).await {
                    Some(grown) if grown.max_scroll() > session.max_scroll => {
                        debug!(
                            from = session.max_scroll,
                            to = grown.max_scroll(),
                            "container grew"
                        );
                        session.offset = session.max_scroll;
                        session.max_scroll = grown.max_scroll();
                    }
                    _ => return Termination::ReachedEnd,
                }
            }
            if session.attempts >= self.settings.max_attempts {
                return Termination::AttemptCap;
            }
            if self.deadline.is_some_and(|d| Instant::now() >= d) {
                return Termination::Deadline;
            }
            session.attempts += 1;

            if let Err(e) = bounded(
                "scroll container",
                self.settings.step_timeout,
                surface.scroll_container_to(session.offset),
            )
            .await
            {
                return Termination::SurfaceLost(e.to_string());
            }
            surface.wait_ms(settle_ms).await;

            let added = match self.extract_visible(surface, session, failures).await {
                Ok(added) => added,
                Err(e) => return Termination::SurfaceLost(e.to_string()),
            };

            if added == 0 {
                session.stagnant += 1;
            } else {
                session.stagnant = 0;
            }
            debug!(
                offset = session.offset,
                added,
                total = session.records.len(),
                stagnant = session.stagnant,
                "scan step"
            );

            if let Some(limit) = self.settings.stagnation_limit {
                if session.stagnant >= limit {
                    return Termination::Stagnation;
                }
            }

            session.offset = next_offset(session.offset, increment, session.max_scroll);
        }
    }

    /// Extract every rendered item and merge it into the session.
    ///
    /// Per-item failures are counted and skipped; only a failing surface
    /// call is returned as an error.
    async fn extract_visible(
        &self,
        surface: &mut dyn RenderSurface,
        session: &mut CollectionSession,
        failures: &mut usize,
    ) -> Result<usize> {
        let items = bounded(
            "find items",
            self.settings.step_timeout,
            surface.find_elements(&self.item_selector),
        )
        .await?;

        let mut batch = Vec::with_capacity(items.len());
        for item in &items {
            match self.adapter.extract(item) {
                Ok(Some(record)) => batch.push(record),
                Ok(None) => {}
                Err(e) => {
                    *failures += 1;
                    debug!(error = %e, "item extraction failed, skipping");
                }
            }
        }
        Ok(session.merge(batch))
    }
}

/// Advance by `increment`, landing exactly on `max_scroll` once before
/// stepping past it so the bottom window is always read.
fn next_offset(offset: u32, increment: u32, max_scroll: u32) -> u32 {
    let next = offset.saturating_add(increment);
    if offset < max_scroll && next > max_scroll {
        max_scroll
    } else {
        next
    }
}
