//! HTTP-backed render surface for pages that render their listings server-side.
//!
//! There is no script engine behind this surface: [`RenderSurface::evaluate`]
//! always yields `null`, so the collector takes its single-pass fallback.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use scraper::{Html, Selector};
use tracing::{debug, instrument};
use url::Url;

use jobharvest_shared::{CollectorSettings, HarvestError, Result, SourceEntry};

use crate::surface::{ItemHandle, RenderSurface, SurfaceFactory};

/// User-Agent string for listing requests.
const USER_AGENT: &str = concat!("jobharvest/", env!("CARGO_PKG_VERSION"));

struct LoadedPage {
    url: Url,
    body: String,
}

/// One fetched page, queried with CSS selectors.
pub struct StaticSurface {
    client: Client,
    page: Option<LoadedPage>,
}

impl StaticSurface {
    pub fn new(client: Client) -> Self {
        Self { client, page: None }
    }
}

#[async_trait]
impl RenderSurface for StaticSurface {
    #[instrument(skip_all, fields(url = %url))]
    async fn navigate(&mut self, url: &Url) -> Result<()> {
        let response = self
            .client
            .get(url.clone())
            .send()
            .await
            .map_err(|e| HarvestError::Network(format!("GET {url}: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            return Err(HarvestError::Network(format!("GET {url}: HTTP {status}")));
        }

        // Relative links resolve against the post-redirect URL.
        let final_url = response.url().clone();
        let body = response
            .text()
            .await
            .map_err(|e| HarvestError::Network(format!("reading body of {url}: {e}")))?;

        debug!(bytes = body.len(), final_url = %final_url, "page loaded");
        self.page = Some(LoadedPage {
            url: final_url,
            body,
        });
        Ok(())
    }

    async fn find_elements(&mut self, selector: &str) -> Result<Vec<ItemHandle>> {
        let page = self
            .page
            .as_ref()
            .ok_or_else(|| HarvestError::Surface("no page loaded".into()))?;
        select_items(page, selector)
    }

    async fn evaluate(&mut self, _script: &str) -> Result<serde_json::Value> {
        Ok(serde_json::Value::Null)
    }

    async fn scroll_container_to(&mut self, _offset: u32) -> Result<()> {
        Ok(())
    }

    async fn wait_ms(&mut self, ms: u64) {
        tokio::time::sleep(Duration::from_millis(ms)).await;
    }
}

fn select_items(page: &LoadedPage, selector: &str) -> Result<Vec<ItemHandle>> {
    let selector = Selector::parse(selector)
        .map_err(|e| HarvestError::validation(format!("invalid selector '{selector}': {e}")))?;
    let doc = Html::parse_document(&page.body);
    Ok(doc
        .select(&selector)
        .map(|el| ItemHandle {
            html: el.html(),
            page_url: page.url.clone(),
        })
        .collect())
}

/// Opens a [`StaticSurface`] per source, sharing one HTTP client.
pub struct StaticSurfaceFactory {
    client: Client,
}

impl StaticSurfaceFactory {
    pub fn new(settings: &CollectorSettings) -> Result<Self> {
        let client = Client::builder()
            .user_agent(USER_AGENT)
            .redirect(reqwest::redirect::Policy::limited(5))
            .timeout(settings.navigation_timeout)
            .build()
            .map_err(|e| HarvestError::Network(format!("failed to build HTTP client: {e}")))?;
        Ok(Self { client })
    }
}

#[async_trait]
impl SurfaceFactory for StaticSurfaceFactory {
    async fn open(&self, _source: &SourceEntry) -> Result<Box<dyn RenderSurface>> {
        Ok(Box::new(StaticSurface::new(self.client.clone())))
    }
}
