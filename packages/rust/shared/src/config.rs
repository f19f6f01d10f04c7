//! Application configuration for jobharvest.
//!
//! User config lives at `~/.jobharvest/jobharvest.toml`.
//! CLI flags override config file values, which override defaults.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::{HarvestError, Result};

/// Default configuration file name.
const CONFIG_FILE_NAME: &str = "jobharvest.toml";

/// Default config directory name under the user's home.
const CONFIG_DIR_NAME: &str = ".jobharvest";

// ---------------------------------------------------------------------------
// Config structs (matching jobharvest.toml schema)
// ---------------------------------------------------------------------------

/// Top-level application config, deserialized from TOML.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Global defaults.
    #[serde(default)]
    pub defaults: DefaultsConfig,

    /// Virtualized collector tuning.
    #[serde(default)]
    pub collector: CollectorConfig,

    /// Reconciliation tuning.
    #[serde(default)]
    pub reconcile: ReconcileConfig,

    /// Keyword classifier gate.
    #[serde(default)]
    pub classifier: ClassifierConfig,

    /// Listing sources to harvest.
    #[serde(default)]
    pub sources: Vec<SourceEntry>,
}

/// `[defaults]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DefaultsConfig {
    /// Catalog database file. A leading `~/` expands to the home directory.
    #[serde(default = "default_database_path")]
    pub database_path: String,

    /// Maximum number of sources harvested at once.
    #[serde(default = "default_concurrency")]
    pub concurrency: u32,

    /// Time budget for one source's collection and detail pass, in seconds.
    /// Whatever was collected when it runs out is still reconciled.
    #[serde(default = "default_source_timeout_secs")]
    pub source_timeout_secs: u64,

    /// Local wall-clock time (`HH:MM`) for `jobharvest schedule`.
    #[serde(default = "default_daily_at")]
    pub daily_at: String,
}

impl Default for DefaultsConfig {
    fn default() -> Self {
        Self {
            database_path: default_database_path(),
            concurrency: default_concurrency(),
            source_timeout_secs: default_source_timeout_secs(),
            daily_at: default_daily_at(),
        }
    }
}

fn default_database_path() -> String {
    "~/.jobharvest/catalog.db".into()
}
fn default_concurrency() -> u32 {
    4
}
fn default_source_timeout_secs() -> u64 {
    900
}
fn default_daily_at() -> String {
    "06:00".into()
}

/// `[collector]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CollectorConfig {
    /// Pause after each scroll so the list can re-render.
    #[serde(default = "default_settle_delay_ms")]
    pub settle_delay_ms: u64,

    /// Hard cap on scroll attempts per source.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Stop after this many consecutive attempts without a new item. `0` disables.
    #[serde(default = "default_stagnation_limit")]
    pub stagnation_limit: u32,

    /// Lower bound for the scroll increment in pixels.
    #[serde(default = "default_min_increment_px")]
    pub min_increment_px: u32,

    /// Timeout for page navigation.
    #[serde(default = "default_navigation_timeout_ms")]
    pub navigation_timeout_ms: u64,

    /// Timeout for every other surface call (query, scroll, evaluate).
    #[serde(default = "default_step_timeout_ms")]
    pub step_timeout_ms: u64,
}

impl Default for CollectorConfig {
    fn default() -> Self {
        Self {
            settle_delay_ms: default_settle_delay_ms(),
            max_attempts: default_max_attempts(),
            stagnation_limit: default_stagnation_limit(),
            min_increment_px: default_min_increment_px(),
            navigation_timeout_ms: default_navigation_timeout_ms(),
            step_timeout_ms: default_step_timeout_ms(),
        }
    }
}

fn default_settle_delay_ms() -> u64 {
    800
}
fn default_max_attempts() -> u32 {
    300
}
fn default_stagnation_limit() -> u32 {
    10
}
fn default_min_increment_px() -> u32 {
    100
}
fn default_navigation_timeout_ms() -> u64 {
    30_000
}
fn default_step_timeout_ms() -> u64 {
    10_000
}

/// `[reconcile]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReconcileConfig {
    /// Maximum number of rows touched by one mark-stale `UPDATE`.
    #[serde(default = "default_stale_batch_size")]
    pub stale_batch_size: usize,

    /// Upper bound for reconciling one source's batch, in seconds.
    #[serde(default = "default_reconcile_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for ReconcileConfig {
    fn default() -> Self {
        Self {
            stale_batch_size: default_stale_batch_size(),
            timeout_secs: default_reconcile_timeout_secs(),
        }
    }
}

fn default_stale_batch_size() -> usize {
    200
}
fn default_reconcile_timeout_secs() -> u64 {
    300
}

/// `[classifier]` section.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ClassifierConfig {
    /// Whole-word keywords; if non-empty a record must match at least one.
    #[serde(default)]
    pub include_keywords: Vec<String>,

    /// Whole-word keywords that reject a record outright.
    #[serde(default)]
    pub exclude_keywords: Vec<String>,
}

/// `[[sources]]` entry: one listing page and how to read it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceEntry {
    /// Unique source name; also the catalog's source key.
    pub name: String,
    /// Listing page URL.
    pub url: String,
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// CSS selector matching one rendered listing item.
    #[serde(default = "default_item_selector")]
    pub item_selector: String,
    /// Per-field selectors, relative to an item.
    #[serde(default)]
    pub fields: FieldSelectors,
    /// Optional detail-page enrichment pass.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<DetailConfig>,
}

impl SourceEntry {
    /// An enabled source with default selectors.
    pub fn new(name: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            url: url.into(),
            enabled: true,
            item_selector: default_item_selector(),
            fields: FieldSelectors::default(),
            detail: None,
        }
    }
}

fn default_true() -> bool {
    true
}
fn default_item_selector() -> String {
    "article".into()
}

/// Field selectors inside one listing item. Unset fields use generic fallbacks.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FieldSelectors {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub link: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub salary: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tags: Option<String>,
}

/// `[sources.detail]` table.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DetailConfig {
    /// Selector for the description block on a detail page.
    pub selector: String,
    /// Upper bound on detail pages visited per run.
    #[serde(default = "default_max_details")]
    pub max_details: usize,
}

fn default_max_details() -> usize {
    50
}

impl AppConfig {
    /// Sources with `enabled = true`, in file order.
    pub fn enabled_sources(&self) -> impl Iterator<Item = &SourceEntry> {
        self.sources.iter().filter(|s| s.enabled)
    }

    /// Check source names are unique and URLs parse.
    pub fn validate(&self) -> Result<()> {
        let mut seen = HashSet::new();
        for source in &self.sources {
            if source.name.trim().is_empty() {
                return Err(HarvestError::config("source with empty name"));
            }
            if !seen.insert(source.name.as_str()) {
                return Err(HarvestError::config(format!(
                    "duplicate source name '{}'",
                    source.name
                )));
            }
            Url::parse(&source.url).map_err(|e| {
                HarvestError::config(format!("source '{}': invalid url: {e}", source.name))
            })?;
        }
        parse_daily_at(&self.defaults.daily_at)?;
        Ok(())
    }

    /// Resolved catalog database path.
    pub fn database_path(&self) -> Result<PathBuf> {
        expand_home(&self.defaults.database_path)
    }
}

// ---------------------------------------------------------------------------
// Runtime settings (merged from config + CLI flags)
// ---------------------------------------------------------------------------

/// Runtime collector settings.
#[derive(Debug, Clone)]
pub struct CollectorSettings {
    pub settle_delay: Duration,
    pub max_attempts: u32,
    /// `None` disables the stagnation bound.
    pub stagnation_limit: Option<u32>,
    pub min_increment_px: u32,
    pub navigation_timeout: Duration,
    pub step_timeout: Duration,
}

impl Default for CollectorSettings {
    fn default() -> Self {
        Self::from(&CollectorConfig::default())
    }
}

impl From<&CollectorConfig> for CollectorSettings {
    fn from(config: &CollectorConfig) -> Self {
        Self {
            settle_delay: Duration::from_millis(config.settle_delay_ms),
            max_attempts: config.max_attempts,
            stagnation_limit: (config.stagnation_limit > 0).then_some(config.stagnation_limit),
            min_increment_px: config.min_increment_px,
            navigation_timeout: Duration::from_millis(config.navigation_timeout_ms),
            step_timeout: Duration::from_millis(config.step_timeout_ms),
        }
    }
}

impl From<&AppConfig> for CollectorSettings {
    fn from(config: &AppConfig) -> Self {
        Self::from(&config.collector)
    }
}

/// Runtime reconciliation settings.
#[derive(Debug, Clone)]
pub struct ReconcileSettings {
    pub stale_batch_size: usize,
}

impl From<&AppConfig> for ReconcileSettings {
    fn from(config: &AppConfig) -> Self {
        Self {
            stale_batch_size: config.reconcile.stale_batch_size.max(1),
        }
    }
}

/// Runtime orchestration settings.
#[derive(Debug, Clone)]
pub struct RunSettings {
    pub concurrency: usize,
    /// Budget for opening, collecting and the detail pass.
    pub source_timeout: Duration,
    pub reconcile_timeout: Duration,
}

impl From<&AppConfig> for RunSettings {
    fn from(config: &AppConfig) -> Self {
        Self {
            concurrency: config.defaults.concurrency.max(1) as usize,
            source_timeout: Duration::from_secs(config.defaults.source_timeout_secs),
            reconcile_timeout: Duration::from_secs(config.reconcile.timeout_secs),
        }
    }
}

// ---------------------------------------------------------------------------
// Config loading
// ---------------------------------------------------------------------------

/// Get the path to the config directory (`~/.jobharvest/`).
pub fn config_dir() -> Result<PathBuf> {
    let home =
        dirs::home_dir().ok_or_else(|| HarvestError::config("could not determine home directory"))?;
    Ok(home.join(CONFIG_DIR_NAME))
}

/// Get the path to the config file (`~/.jobharvest/jobharvest.toml`).
pub fn config_file_path() -> Result<PathBuf> {
    Ok(config_dir()?.join(CONFIG_FILE_NAME))
}

/// Load the application config from disk. Returns defaults if the file does not exist.
pub fn load_config() -> Result<AppConfig> {
    let path = config_file_path()?;

    if !path.exists() {
        tracing::debug!(?path, "config file not found, using defaults");
        return Ok(AppConfig::default());
    }

    load_config_from(&path)
}

/// Load the application config from a specific file path.
pub fn load_config_from(path: &Path) -> Result<AppConfig> {
    let content = std::fs::read_to_string(path).map_err(|e| HarvestError::io(path, e))?;

    let config: AppConfig = toml::from_str(&content).map_err(|e| {
        HarvestError::config(format!("failed to parse {}: {e}", path.display()))
    })?;
    config.validate()?;
    Ok(config)
}

/// Create the config directory and write a default config file.
/// Returns the path to the created file.
pub fn init_config() -> Result<PathBuf> {
    let dir = config_dir()?;
    std::fs::create_dir_all(&dir).map_err(|e| HarvestError::io(&dir, e))?;

    let path = dir.join(CONFIG_FILE_NAME);
    let config = AppConfig::default();
    let content =
        toml::to_string_pretty(&config).map_err(|e| HarvestError::config(e.to_string()))?;

    std::fs::write(&path, content).map_err(|e| HarvestError::io(&path, e))?;
    tracing::info!(?path, "created default config file");

    Ok(path)
}

/// Expand a leading `~/` to the user's home directory.
pub fn expand_home(path: &str) -> Result<PathBuf> {
    match path.strip_prefix("~/") {
        Some(rest) => {
            let home = dirs::home_dir()
                .ok_or_else(|| HarvestError::config("could not determine home directory"))?;
            Ok(home.join(rest))
        }
        None => Ok(PathBuf::from(path)),
    }
}

/// Parse a `HH:MM` schedule time into `(hour, minute)`.
pub fn parse_daily_at(value: &str) -> Result<(u32, u32)> {
    let invalid = || HarvestError::config(format!("invalid daily time '{value}', expected HH:MM"));
    let (h, m) = value.trim().split_once(':').ok_or_else(invalid)?;
    let hour: u32 = h.parse().map_err(|_| invalid())?;
    let minute: u32 = m.parse().map_err(|_| invalid())?;
    if hour > 23 || minute > 59 {
        return Err(invalid());
    }
    Ok((hour, minute))
}
