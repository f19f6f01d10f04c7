//! Optional detail-page pass run after collection.
//!
//! Visits the detail pages of records the catalog has not seen yet and
//! stores their description text. Known jobs are skipped: their stored
//! fields are never rewritten by a refresh anyway.

use std::collections::HashSet;
use std::time::{Duration, Instant};

use tracing::{debug, info, instrument, warn};
use url::Url;

use jobharvest_collector::{ExtractionAdapter, RenderSurface, bounded};
use jobharvest_shared::{CollectorSettings, DetailConfig, HarvestError, Result};

use crate::classify::ClassifiedRecord;

/// Counts from one enrichment pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize)]
pub struct EnrichmentSummary {
    pub visited: usize,
    pub enriched: usize,
    pub failed: usize,
    /// The pass stopped early because the source's time budget ran out.
    pub out_of_time: bool,
}

/// Fill in `description` for up to `detail.max_details` new records.
///
/// No page is visited after `deadline`, and each navigation is cut short at
/// it; records left without a description are still reconciled.
#[instrument(skip_all, fields(candidates = records.len(), max = detail.max_details))]
pub async fn enrich_details(
    surface: &mut dyn RenderSurface,
    adapter: &dyn ExtractionAdapter,
    records: &mut [ClassifiedRecord],
    known_urls: &HashSet<String>,
    detail: &DetailConfig,
    settings: &CollectorSettings,
    deadline: Instant,
) -> EnrichmentSummary {
    let mut summary = EnrichmentSummary::default();

    let pending = records.iter_mut().filter(|r| {
        r.record().description.is_none() && !known_urls.contains(r.detail_url())
    });

    for record in pending.take(detail.max_details) {
        let left = deadline.saturating_duration_since(Instant::now());
        if left.is_zero() {
            summary.out_of_time = true;
            break;
        }
        let limit = settings.navigation_timeout.min(left);

        summary.visited += 1;
        match fetch_description(surface, adapter, record.detail_url(), detail, settings, limit)
            .await
        {
            Ok(text) => {
                record.set_description(text);
                summary.enriched += 1;
            }
            Err(e) => {
                summary.failed += 1;
                warn!(detail_url = %record.detail_url(), error = %e, "detail page skipped");
            }
        }
    }

    info!(
        visited = summary.visited,
        enriched = summary.enriched,
        failed = summary.failed,
        out_of_time = summary.out_of_time,
        "detail pass finished"
    );
    summary
}

async fn fetch_description(
    surface: &mut dyn RenderSurface,
    adapter: &dyn ExtractionAdapter,
    detail_url: &str,
    detail: &DetailConfig,
    settings: &CollectorSettings,
    navigation_limit: Duration,
) -> Result<String> {
    let url = Url::parse(detail_url)
        .map_err(|e| HarvestError::validation(format!("detail URL '{detail_url}': {e}")))?;

    bounded("navigate detail", navigation_limit, surface.navigate(&url)).await?;
    surface.wait_ms(settings.settle_delay.as_millis() as u64).await;

    let found = bounded(
        "find detail",
        settings.step_timeout,
        surface.find_elements(&detail.selector),
    )
    .await?;

    let text = found
        .first()
        .and_then(|item| adapter.extract_detail(item))
        .ok_or_else(|| HarvestError::extraction(format!("no '{}' text", detail.selector)))?;
    debug!(chars = text.len(), "description extracted");
    Ok(text)
}

#[cfg(test)]
mod tests {
    use super::*;

    use jobharvest_collector::SelectorAdapter;
    use jobharvest_collector::testing::VirtualListSurface;
    use jobharvest_shared::RawRecord;

    use crate::classify::{AcceptAll, classify};

    const BASE: &str = "https://jobs.example.test";

    fn settings() -> CollectorSettings {
        CollectorSettings {
            settle_delay: Duration::ZERO,
            ..CollectorSettings::default()
        }
    }

    fn records(paths: &[&str]) -> Vec<ClassifiedRecord> {
        let raw = paths
            .iter()
            .map(|p| RawRecord::new(format!("Job {p}"), format!("{BASE}{p}"), "board"));
        classify(&AcceptAll, raw).accepted
    }

    fn later() -> Instant {
        Instant::now() + Duration::from_secs(30)
    }

    fn detail(max: usize) -> DetailConfig {
        DetailConfig {
            selector: "main".into(),
            max_details: max,
        }
    }

    #[tokio::test]
    async fn fills_descriptions_of_new_records() {
        let mut surface = VirtualListSurface::new(Vec::new(), 80, 600)
            .with_detail_page(&format!("{BASE}/1"), "<main><p>Build   the core.</p></main>")
            .with_detail_page(&format!("{BASE}/2"), "<main>Own the API.</main>");
        let adapter = SelectorAdapter::generic("board");
        let mut batch = records(&["/1", "/2"]);

        let summary = enrich_details(
            &mut surface,
            &adapter,
            &mut batch,
            &HashSet::new(),
            &detail(10),
            &settings(),
            later(),
        )
        .await;

        assert_eq!(
            summary,
            EnrichmentSummary {
                visited: 2,
                enriched: 2,
                failed: 0,
                out_of_time: false,
            }
        );
        assert_eq!(batch[0].record().description.as_deref(), Some("Build the core."));
        assert_eq!(batch[1].record().description.as_deref(), Some("Own the API."));
    }

    #[tokio::test]
    async fn skips_known_and_respects_cap() {
        let mut surface = VirtualListSurface::new(Vec::new(), 80, 600)
            .with_detail_page(&format!("{BASE}/1"), "<main>one</main>")
            .with_detail_page(&format!("{BASE}/2"), "<main>two</main>")
            .with_detail_page(&format!("{BASE}/3"), "<main>three</main>");
        let adapter = SelectorAdapter::generic("board");
        let mut batch = records(&["/1", "/2", "/3"]);
        let known = HashSet::from([format!("{BASE}/1")]);

        let summary = enrich_details(
            &mut surface,
            &adapter,
            &mut batch,
            &known,
            &detail(1),
            &settings(),
            later(),
        )
        .await;

        assert_eq!(summary.visited, 1);
        assert!(batch[0].record().description.is_none());
        assert_eq!(batch[1].record().description.as_deref(), Some("two"));
        assert!(batch[2].record().description.is_none());
        assert_eq!(surface.navigations(), 1);
    }

    #[tokio::test]
    async fn failures_are_skipped() {
        let mut surface = VirtualListSurface::new(Vec::new(), 80, 600)
            .with_detail_page(&format!("{BASE}/1"), "<main>   </main>")
            .with_detail_page(&format!("{BASE}/2"), "<main>fine</main>");
        let adapter = SelectorAdapter::generic("board");
        let mut batch = records(&["/1", "/2"]);

        let summary = enrich_details(
            &mut surface,
            &adapter,
            &mut batch,
            &HashSet::new(),
            &detail(10),
            &settings(),
            later(),
        )
        .await;

        assert_eq!(summary.failed, 1);
        assert_eq!(summary.enriched, 1);
        assert_eq!(batch[1].record().description.as_deref(), Some("fine"));
    }

    #[tokio::test]
    async fn stops_when_time_runs_out() {
        let mut surface = VirtualListSurface::new(Vec::new(), 80, 600)
            .with_detail_delay(Duration::from_millis(60));
        let paths: Vec<String> = (0..10).map(|i| format!("/{i}")).collect();
        for p in &paths {
            surface = surface.with_detail_page(&format!("{BASE}{p}"), "<main>text</main>");
        }
        let adapter = SelectorAdapter::generic("board");
        let refs: Vec<&str> = paths.iter().map(String::as_str).collect();
        let mut batch = records(&refs);

        let summary = enrich_details(
            &mut surface,
            &adapter,
            &mut batch,
            &HashSet::new(),
            &detail(50),
            &settings(),
            Instant::now() + Duration::from_millis(200),
        )
        .await;

        assert!(summary.out_of_time);
        assert!(summary.visited < 10);
        assert!(summary.enriched >= 1);
        assert!(batch.iter().any(|r| r.record().description.is_none()));
    }
}
