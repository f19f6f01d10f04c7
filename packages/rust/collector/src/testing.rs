//! In-memory render surface simulating a virtualized job list.
//!
//! Only the items intersecting the viewport (plus optional overscan) are
//! "rendered" at any scroll offset, the way windowing libraries recycle
//! DOM nodes. Waits return immediately unless real waits are enabled.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use jobharvest_shared::{HarvestError, Result, SourceEntry};
use serde_json::json;
use url::Url;

use crate::surface::{ItemHandle, RenderSurface, SurfaceFactory};

const DEFAULT_PAGE_URL: &str = "https://jobs.example.test/board";

#[derive(Debug, Default)]
struct Counters {
    scrolls: AtomicUsize,
    extraction_passes: AtomicUsize,
    max_rendered: AtomicUsize,
    navigations: AtomicUsize,
}

/// A scriptable virtualized list. Clones share their counters.
#[derive(Debug, Clone)]
pub struct VirtualListSurface {
    items: Vec<(String, String)>,
    item_height: u32,
    client_height: u32,
    overscan: usize,
    virtualized: bool,
    bottom_padding: u32,
    page_size: Option<usize>,
    loaded: usize,
    fail_after_scrolls: Option<usize>,
    fail_navigation: bool,
    detail_pages: HashMap<String, String>,
    detail_delay: Duration,
    real_waits: bool,
    offset: u32,
    current_url: Url,
    on_detail: Option<String>,
    counters: Arc<Counters>,
}

impl VirtualListSurface {
    /// `items` are `(title, href)` pairs, each `item_height` pixels tall, in a
    /// viewport `client_height` pixels tall.
    pub fn new(items: Vec<(String, String)>, item_height: u32, client_height: u32) -> Self {
        let loaded = items.len();
        Self {
            items,
            item_height: item_height.max(1),
            client_height,
            overscan: 0,
            virtualized: true,
            bottom_padding: 0,
            page_size: None,
            loaded,
            fail_after_scrolls: None,
            fail_navigation: false,
            detail_pages: HashMap::new(),
            detail_delay: Duration::ZERO,
            real_waits: false,
            offset: 0,
            current_url: default_page_url(),
            on_detail: None,
            counters: Arc::new(Counters::default()),
        }
    }

    /// Render `n` extra items above and below the viewport.
    pub fn with_client_overscan(mut self, n: usize) -> Self {
        self.overscan = n;
        self
    }

    /// Plain page: no scroll container, every item rendered at once.
    pub fn not_virtualized(mut self) -> Self {
        self.virtualized = false;
        self
    }

    /// Empty space below the last item.
    pub fn with_bottom_padding(mut self, px: u32) -> Self {
        self.bottom_padding = px;
        self
    }

    /// Load `page_size` items at a time, adding a page whenever the
    /// container is scrolled to its bottom.
    pub fn with_lazy_pages(mut self, page_size: usize) -> Self {
        let page_size = page_size.max(1);
        self.page_size = Some(page_size);
        self.loaded = page_size.min(self.items.len());
        self
    }

    /// Every surface call fails once more than `n` scrolls have happened.
    pub fn fail_after_scrolls(mut self, n: usize) -> Self {
        self.fail_after_scrolls = Some(n);
        self
    }

    /// Navigation always fails.
    pub fn failing_navigation(mut self) -> Self {
        self.fail_navigation = true;
        self
    }

    /// Serve `html` as the detail page at `url`.
    pub fn with_detail_page(mut self, url: &str, html: &str) -> Self {
        self.detail_pages.insert(url.to_string(), html.to_string());
        self
    }

    /// Navigating to a detail page takes `delay`.
    pub fn with_detail_delay(mut self, delay: Duration) -> Self {
        self.detail_delay = delay;
        self
    }

    /// `wait_ms` actually sleeps.
    pub fn with_real_waits(mut self) -> Self {
        self.real_waits = true;
        self
    }

    pub fn scrolls(&self) -> usize {
        self.counters.scrolls.load(Ordering::SeqCst)
    }

    /// Number of `find_elements` calls.
    pub fn extraction_passes(&self) -> usize {
        self.counters.extraction_passes.load(Ordering::SeqCst)
    }

    /// Most list items rendered by a single `find_elements` call.
    pub fn max_rendered(&self) -> usize {
        self.counters.max_rendered.load(Ordering::SeqCst)
    }

    pub fn navigations(&self) -> usize {
        self.counters.navigations.load(Ordering::SeqCst)
    }

    fn scroll_height(&self) -> u32 {
        self.loaded as u32 * self.item_height + self.bottom_padding
    }

    fn max_scroll(&self) -> u32 {
        self.scroll_height().saturating_sub(self.client_height)
    }

    fn check_alive(&self) -> Result<()> {
        match self.fail_after_scrolls {
            Some(n) if self.scrolls() > n => {
                Err(HarvestError::Surface("simulated page crashed".into()))
            }
            _ => Ok(()),
        }
    }

    /// Indices of the items currently in the DOM.
    fn rendered_range(&self) -> std::ops::Range<usize> {
        if !self.virtualized {
            return 0..self.loaded;
        }
        let h = self.item_height;
        let first = (self.offset / h) as usize;
        let end = (self.offset + self.client_height).div_ceil(h) as usize;
        let first = first.saturating_sub(self.overscan).min(self.loaded);
        let end = (end + self.overscan).min(self.loaded);
        first..end.max(first)
    }
}

#[async_trait]
impl RenderSurface for VirtualListSurface {
    async fn navigate(&mut self, url: &Url) -> Result<()> {
        self.counters.navigations.fetch_add(1, Ordering::SeqCst);
        if self.fail_navigation {
            return Err(HarvestError::Network(format!("simulated: cannot reach {url}")));
        }
        self.check_alive()?;
        self.on_detail = self.detail_pages.get(url.as_str()).cloned();
        if self.on_detail.is_some() && !self.detail_delay.is_zero() {
            tokio::time::sleep(self.detail_delay).await;
        }
        self.current_url = url.clone();
        self.offset = 0;
        Ok(())
    }

    async fn find_elements(&mut self, _selector: &str) -> Result<Vec<ItemHandle>> {
        self.check_alive()?;
        self.counters.extraction_passes.fetch_add(1, Ordering::SeqCst);

        if let Some(html) = &self.on_detail {
            return Ok(vec![ItemHandle {
                html: html.clone(),
                page_url: self.current_url.clone(),
            }]);
        }

        let range = self.rendered_range();
        self.counters
            .max_rendered
            .fetch_max(range.len(), Ordering::SeqCst);

        Ok(range
            .map(|i| {
                let (title, href) = &self.items[i];
                ItemHandle {
                    html: format!(
                        r#"<article data-index="{i}"><h3>{}</h3><a href="{}">View</a></article>"#,
                        escape(title),
                        escape(href)
                    ),
                    page_url: self.current_url.clone(),
                }
            })
            .collect())
    }

    async fn evaluate(&mut self, _script: &str) -> Result<serde_json::Value> {
        self.check_alive()?;
        if !self.virtualized || self.on_detail.is_some() {
            return Ok(serde_json::Value::Null);
        }
        Ok(json!({
            "scrollHeight": self.scroll_height(),
            "clientHeight": self.client_height,
        }))
    }

    async fn scroll_container_to(&mut self, offset: u32) -> Result<()> {
        self.counters.scrolls.fetch_add(1, Ordering::SeqCst);
        self.check_alive()?;
        self.offset = offset.min(self.max_scroll());
        if let Some(page) = self.page_size {
            if self.offset >= self.max_scroll() && self.loaded < self.items.len() {
                self.loaded = (self.loaded + page).min(self.items.len());
            }
        }
        Ok(())
    }

    async fn wait_ms(&mut self, ms: u64) {
        if self.real_waits {
            tokio::time::sleep(Duration::from_millis(ms)).await;
        }
    }
}

/// Hands out clones of pre-registered surfaces by source name.
#[derive(Debug, Default, Clone)]
pub struct VirtualListFactory {
    surfaces: HashMap<String, VirtualListSurface>,
}

impl VirtualListFactory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_source(mut self, name: &str, surface: VirtualListSurface) -> Self {
        self.surfaces.insert(name.to_string(), surface);
        self
    }
}

#[async_trait]
impl SurfaceFactory for VirtualListFactory {
    async fn open(&self, source: &SourceEntry) -> Result<Box<dyn RenderSurface>> {
        self.surfaces
            .get(&source.name)
            .cloned()
            .map(|s| Box::new(s) as Box<dyn RenderSurface>)
            .ok_or_else(|| HarvestError::Surface(format!("no surface for '{}'", source.name)))
    }
}

fn default_page_url() -> Url {
    Url::parse(DEFAULT_PAGE_URL).expect("constant URL parses")
}

fn escape(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn three() -> Vec<(String, String)> {
        (0..3).map(|i| (format!("Job {i}"), format!("/jobs/{i}"))).collect()
    }

    #[tokio::test]
    async fn renders_only_the_viewport() {
        let items = (0..50).map(|i| (format!("Job {i}"), format!("/jobs/{i}"))).collect();
        let mut surface = VirtualListSurface::new(items, 100, 300);

        assert_eq!(surface.find_elements("article").await.unwrap().len(), 3);
        surface.scroll_container_to(150).await.unwrap();
        let visible = surface.find_elements("article").await.unwrap();
        assert_eq!(visible.len(), 4);
        assert!(visible[0].html.contains(r#"data-index="1""#));
    }

    #[tokio::test]
    async fn scroll_clamps_to_bottom() {
        let mut surface = VirtualListSurface::new(three(), 100, 200);
        surface.scroll_container_to(10_000).await.unwrap();
        let visible = surface.find_elements("article").await.unwrap();
        assert_eq!(visible.last().map(|i| i.html.contains("Job 2")), Some(true));
    }

    #[tokio::test]
    async fn probe_reports_geometry() {
        let mut surface = VirtualListSurface::new(three(), 100, 200);
        let value = surface.evaluate("probe").await.unwrap();
        assert_eq!(value["scrollHeight"], 300);
        assert_eq!(value["clientHeight"], 200);

        let mut plain = VirtualListSurface::new(three(), 100, 200).not_virtualized();
        assert!(plain.evaluate("probe").await.unwrap().is_null());
    }

    #[tokio::test]
    async fn clones_share_counters() {
        let surface = VirtualListSurface::new(three(), 100, 200);
        let mut copy = surface.clone();
        copy.scroll_container_to(50).await.unwrap();
        assert_eq!(surface.scrolls(), 1);
    }

    #[tokio::test]
    async fn serves_detail_pages() {
        let mut surface = VirtualListSurface::new(three(), 100, 200)
            .with_detail_page("https://jobs.example.test/jobs/1", "<main>Details</main>");
        surface
            .navigate(&Url::parse("https://jobs.example.test/jobs/1").unwrap())
            .await
            .unwrap();
        let found = surface.find_elements("main").await.unwrap();
        assert_eq!(found.len(), 1);
        assert!(found[0].html.contains("Details"));
    }

    #[tokio::test]
    async fn factory_rejects_unknown_source() {
        let factory = VirtualListFactory::new();
        let source = SourceEntry::new("x", "https://x.test");
        let err = factory.open(&source).await.err().expect("error");
        assert!(err.to_string().contains("no surface"));
    }
}
