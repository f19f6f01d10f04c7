//! Render surface abstraction over whatever drives a listing page.
//!
//! A browser automation layer, a plain HTTP fetch, and the in-memory test
//! list all sit behind [`RenderSurface`]. Items come back as [`ItemHandle`]
//! snapshots so that extraction never needs to await the surface.

use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use jobharvest_shared::{HarvestError, Result, SourceEntry};
use serde::Deserialize;
use url::Url;

/// Script evaluated to find the virtualized scroll container.
///
/// Returns `{ scrollHeight, clientHeight }` for the first `overflow: auto`
/// block whose children are positioned with transforms, or `null`. The
/// element found is tagged `data-jobharvest-scroll` for
/// [`RenderSurface::scroll_container_to`] to target.
pub const PROBE_SCRIPT: &str = r#"(() => {
  for (const el of document.querySelectorAll('div, ul, section')) {
    const style = getComputedStyle(el);
    if (style.overflowY !== 'auto' && style.overflow !== 'auto') continue;
    if (!el.querySelector('[style*="transform"]')) continue;
    el.setAttribute('data-jobharvest-scroll', '1');
    return { scrollHeight: el.scrollHeight, clientHeight: el.clientHeight };
  }
  return null;
})()"#;

/// A snapshot of one rendered list item.
#[derive(Debug, Clone, PartialEq)]
pub struct ItemHandle {
    /// Outer HTML of the item at the time it was rendered.
    pub html: String,
    /// URL of the page the item was rendered on, for resolving relative links.
    pub page_url: Url,
}

/// Geometry of the scroll container, as reported by [`PROBE_SCRIPT`].
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContainerMetrics {
    pub scroll_height: f64,
    pub client_height: f64,
}

impl ContainerMetrics {
    /// `scrollHeight - clientHeight`, floored at zero.
    pub fn max_scroll(&self) -> u32 {
        (self.scroll_height - self.client_height).max(0.0).round() as u32
    }

    pub fn client_height_px(&self) -> u32 {
        self.client_height.max(0.0).round() as u32
    }

    /// Decode a probe result; `null` or a malformed value means no container.
    pub fn from_probe(value: serde_json::Value) -> Option<Self> {
        if value.is_null() {
            return None;
        }
        serde_json::from_value(value).ok()
    }
}

/// A live, navigable page whose list may be virtualized.
///
/// Every call may suspend; a failing call means the surface is no longer
/// usable for the rest of the run.
#[async_trait]
pub trait RenderSurface: Send {
    /// Load `url` and wait for it to render.
    async fn navigate(&mut self, url: &Url) -> Result<()>;

    /// Snapshot every currently rendered element matching `selector`.
    async fn find_elements(&mut self, selector: &str) -> Result<Vec<ItemHandle>>;

    /// Evaluate a script in the page and return its JSON result.
    async fn evaluate(&mut self, script: &str) -> Result<serde_json::Value>;

    /// Scroll the probed container to `offset` pixels from the top.
    async fn scroll_container_to(&mut self, offset: u32) -> Result<()>;

    /// Suspend for `ms` milliseconds.
    async fn wait_ms(&mut self, ms: u64);
}

/// Opens one fresh render surface per source.
#[async_trait]
pub trait SurfaceFactory: Send + Sync {
    async fn open(&self, source: &SourceEntry) -> Result<Box<dyn RenderSurface>>;
}

/// Run `fut`, failing with [`HarvestError::Timeout`] if it outlives `limit`.
pub async fn bounded<T>(
    operation: &str,
    limit: Duration,
    fut: impl Future<Output = Result<T>>,
) -> Result<T> {
    match tokio::time::timeout(limit, fut).await {
        Ok(result) => result,
        Err(_) => Err(HarvestError::timeout(operation, limit.as_millis() as u64)),
    }
}
