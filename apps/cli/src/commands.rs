//! CLI command definitions, routing, and tracing setup.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Local, NaiveTime, TimeZone};
use clap::{Parser, Subcommand};
use color_eyre::eyre::{Result, eyre};
use indicatif::{ProgressBar, ProgressStyle};
use tracing::{info, warn};

use jobharvest_collector::StaticSurfaceFactory;
use jobharvest_core::{
    HarvestReport, Harvester, ProgressReporter, SourceReport, gate_from_config,
};
use jobharvest_shared::{
    AppConfig, CatalogSnapshot, CollectorSettings, ReconcileSettings, RunSettings, SourceEntry,
    config_file_path, init_config, load_config, load_config_from, parse_daily_at,
};
use jobharvest_storage::{CatalogStore, Storage};

// ---------------------------------------------------------------------------
// CLI structure
// ---------------------------------------------------------------------------

/// jobharvest: keep a local catalog in sync with job boards.
#[derive(Parser)]
#[command(
    name = "jobharvest",
    version,
    about = "Collect job listings from configured boards into a local catalog.",
    long_about = None,
)]
pub(crate) struct Cli {
    /// Config file (defaults to ~/.jobharvest/jobharvest.toml).
    #[arg(long, env = "JOBHARVEST_CONFIG", global = true)]
    pub config: Option<PathBuf>,

    /// Log format: text (default) or json.
    #[arg(long, default_value = "text", global = true)]
    pub log_format: LogFormat,

    /// Verbosity level (-v, -vv, -vvv).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Command,
}

/// Log output format.
#[derive(Clone, Debug, clap::ValueEnum)]
pub(crate) enum LogFormat {
    Text,
    Json,
}

/// Top-level CLI subcommands.
#[derive(Subcommand)]
pub(crate) enum Command {
    /// Run one harvest pass over the enabled sources.
    Run {
        /// Only run the named source (repeatable).
        #[arg(short, long = "source")]
        sources: Vec<String>,
    },

    /// Run a harvest pass every day at a fixed local time.
    Schedule {
        /// Time of day as HH:MM (defaults to `daily_at` from the config).
        #[arg(long)]
        at: Option<String>,
    },

    /// List configured sources.
    Sources,

    /// Print catalog totals.
    Stats {
        /// Print as JSON.
        #[arg(long)]
        json: bool,
    },

    /// Configuration management.
    Config {
        /// Config subcommand.
        #[command(subcommand)]
        action: ConfigAction,
    },
}

/// Config subcommands.
#[derive(Subcommand)]
pub(crate) enum ConfigAction {
    /// Initialize config file with defaults.
    Init,
    /// Show resolved configuration.
    Show,
}

// ---------------------------------------------------------------------------
// Tracing setup
// ---------------------------------------------------------------------------

/// Initialize tracing based on CLI flags.
pub(crate) fn init_tracing(cli: &Cli) {
    use tracing_subscriber::{EnvFilter, fmt};

    let filter = match cli.verbose {
        0 => "jobharvest=info",
        1 => "jobharvest=debug",
        _ => "jobharvest=trace",
    };

    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter));

    match cli.log_format {
        LogFormat::Text => {
            fmt()
                .with_env_filter(env_filter)
                .with_target(false)
                .with_writer(std::io::stderr)
                .init();
        }
        LogFormat::Json => {
            fmt()
                .json()
                .with_env_filter(env_filter)
                .with_writer(std::io::stderr)
                .init();
        }
    }
}

// ---------------------------------------------------------------------------
// Command dispatch
// ---------------------------------------------------------------------------

/// Run the CLI command.
pub(crate) async fn run(cli: Cli) -> Result<()> {
    let config_path = cli.config.as_deref();
    match cli.command {
        Command::Run { sources } => cmd_run(config_path, &sources).await,
        Command::Schedule { at } => cmd_schedule(config_path, at.as_deref()).await,
        Command::Sources => cmd_sources(config_path),
        Command::Stats { json } => cmd_stats(config_path, json).await,
        Command::Config { action } => match action {
            ConfigAction::Init => cmd_config_init(config_path),
            ConfigAction::Show => cmd_config_show(config_path),
        },
    }
}

fn resolve_config(path: Option<&Path>) -> Result<AppConfig> {
    Ok(match path {
        Some(p) => load_config_from(p)?,
        None => load_config()?,
    })
}

async fn open_storage(config: &AppConfig) -> Result<Storage> {
    let path = config.database_path()?;
    let settings = ReconcileSettings::from(config);
    let storage = Storage::open(&path)
        .await?
        .with_stale_batch_size(settings.stale_batch_size);
    Ok(storage)
}

fn build_harvester(config: &AppConfig, storage: Storage) -> Result<Harvester> {
    let collector = CollectorSettings::from(config);
    let surfaces = StaticSurfaceFactory::new(&collector)?;
    Ok(Harvester::new(
        Arc::new(storage),
        gate_from_config(&config.classifier)?,
        Arc::new(surfaces),
        collector,
        RunSettings::from(config),
    ))
}

/// Sources to run: the named ones, or every enabled one.
fn select_sources(config: &AppConfig, names: &[String]) -> Result<Vec<SourceEntry>> {
    if names.is_empty() {
        return Ok(config.enabled_sources().cloned().collect());
    }
    names
        .iter()
        .map(|name| {
            config
                .sources
                .iter()
                .find(|s| &s.name == name)
                .cloned()
                .ok_or_else(|| eyre!("unknown source '{name}'"))
        })
        .collect()
}

// ---------------------------------------------------------------------------
// Command handlers
// ---------------------------------------------------------------------------

async fn cmd_run(config_path: Option<&Path>, names: &[String]) -> Result<()> {
    let config = resolve_config(config_path)?;
    let sources = select_sources(&config, names)?;
    if sources.is_empty() {
        println!("No sources to run. Add [[sources]] entries to the config file.");
        return Ok(());
    }

    let harvester = build_harvester(&config, open_storage(&config).await?)?;
    let report = harvester.run_all(&sources, Arc::new(CliProgress::new())).await;
    print_report(&report);
    Ok(())
}

async fn cmd_schedule(config_path: Option<&Path>, at: Option<&str>) -> Result<()> {
    let config = resolve_config(config_path)?;
    let (hour, minute) = parse_daily_at(at.unwrap_or(&config.defaults.daily_at))?;
    let time = NaiveTime::from_hms_opt(hour, minute, 0)
        .ok_or_else(|| eyre!("invalid schedule time {hour:02}:{minute:02}"))?;

    let sources: Vec<SourceEntry> = config.enabled_sources().cloned().collect();
    let harvester = build_harvester(&config, open_storage(&config).await?)?;
    info!(at = %time, sources = sources.len(), "daily schedule armed");

    loop {
        let now = Local::now();
        let next = next_run(now, time);
        let wait = (next - now).to_std().unwrap_or(Duration::ZERO);
        println!("Next run at {}", next.format("%Y-%m-%d %H:%M"));

        tokio::select! {
            _ = tokio::time::sleep(wait) => {}
            _ = tokio::signal::ctrl_c() => {
                info!("schedule stopped");
                return Ok(());
            }
        }

        let report = harvester.run_all(&sources, Arc::new(CliProgress::new())).await;
        print_report(&report);
    }
}

/// First local `time` strictly after `now`.
fn next_run<Tz: TimeZone>(now: DateTime<Tz>, time: NaiveTime) -> DateTime<Tz> {
    let tz = now.timezone();
    let mut day = now.date_naive();
    for _ in 0..3 {
        // Times inside a DST gap do not exist on that day.
        if let Some(candidate) = tz.from_local_datetime(&day.and_time(time)).earliest() {
            if candidate > now {
                return candidate;
            }
        }
        match day.succ_opt() {
            Some(next) => day = next,
            None => break,
        }
    }
    now + chrono::Duration::days(1)
}

fn cmd_sources(config_path: Option<&Path>) -> Result<()> {
    let config = resolve_config(config_path)?;
    if config.sources.is_empty() {
        println!("No sources configured.");
        return Ok(());
    }

    println!("{:<20} {:<8} {:<10} URL", "NAME", "ENABLED", "DETAILS");
    for source in &config.sources {
        let details = source
            .detail
            .as_ref()
            .map(|d| format!("max {}", d.max_details))
            .unwrap_or_else(|| "-".into());
        println!(
            "{:<20} {:<8} {:<10} {}",
            source.name,
            if source.enabled { "yes" } else { "no" },
            details,
            source.url
        );
    }
    Ok(())
}

async fn cmd_stats(config_path: Option<&Path>, json: bool) -> Result<()> {
    let config = resolve_config(config_path)?;
    let snapshot = open_storage(&config).await?.snapshot().await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&snapshot)?);
    } else {
        print_snapshot(&snapshot);
    }
    Ok(())
}

fn cmd_config_init(config_path: Option<&Path>) -> Result<()> {
    if config_path.is_some() {
        warn!("--config is ignored by `config init`");
    }
    let path = init_config()?;
    println!("Config initialized at: {}", path.display());
    Ok(())
}

fn cmd_config_show(config_path: Option<&Path>) -> Result<()> {
    let config = resolve_config(config_path)?;
    let shown = match config_path {
        Some(p) => p.to_path_buf(),
        None => config_file_path()?,
    };
    println!("# {}", shown.display());
    println!("{}", toml::to_string_pretty(&config)?);
    Ok(())
}

// ---------------------------------------------------------------------------
// Output
// ---------------------------------------------------------------------------

fn print_report(report: &HarvestReport) {
    println!();
    println!(
        "  {:<20} {:<13} {:>9} {:>8} {:>8} {:>9} {:>6} {:>6}",
        "SOURCE", "END", "COLLECTED", "ACCEPTED", "INSERTED", "REFRESHED", "STALE", "ERRORS"
    );
    for source in &report.sources {
        let end = source.termination.as_ref().map_or("-", |t| t.label());
        let (inserted, refreshed, stale, errors) = source
            .reconciliation
            .as_ref()
            .map_or((0, 0, 0, 0), |r| (r.inserted, r.refreshed, r.marked_stale, r.errors.len()));
        println!(
            "  {:<20} {:<13} {:>9} {:>8} {:>8} {:>9} {:>6} {:>6}",
            source.name,
            end,
            source.collected,
            source.gate.accepted,
            inserted,
            refreshed,
            stale,
            errors
        );
        if let Some(error) = &source.error {
            println!("    failed: {error}");
        }
    }
    println!();
    println!(
        "  {} succeeded, {} failed in {:.1}s",
        report.succeeded(),
        report.failed(),
        report.elapsed.as_secs_f64()
    );
    if let Some(snapshot) = &report.snapshot {
        print_snapshot(snapshot);
    }
}

fn print_snapshot(snapshot: &CatalogSnapshot) {
    println!(
        "  Catalog: {} jobs ({} active, {} inactive)",
        snapshot.total, snapshot.active, snapshot.inactive
    );
    for source in &snapshot.sources {
        println!(
            "    {:<20} {:>6} total {:>6} active",
            source.name, source.total, source.active
        );
    }
    println!();
}

// ---------------------------------------------------------------------------
// CLI progress reporter
// ---------------------------------------------------------------------------

/// CLI progress reporter using an indicatif bar over sources.
struct CliProgress {
    bar: ProgressBar,
}

impl CliProgress {
    fn new() -> Self {
        let bar = ProgressBar::new(0);
        let style = ProgressStyle::with_template("{spinner:.cyan} [{pos}/{len}] {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"]);
        bar.set_style(style);
        bar.enable_steady_tick(Duration::from_millis(80));
        Self { bar }
    }
}

impl ProgressReporter for CliProgress {
    fn run_started(&self, total: usize) {
        self.bar.set_length(total as u64);
        self.bar.set_message("starting");
    }

    fn source_started(&self, name: &str) {
        self.bar.set_message(format!("collecting {name}"));
    }

    fn source_finished(&self, report: &SourceReport) {
        self.bar.inc(1);
        if let Some(error) = &report.error {
            self.bar.println(format!("  {} failed: {error}", report.name));
        }
    }

    fn done(&self, _report: &HarvestReport) {
        self.bar.finish_and_clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{FixedOffset, Timelike};

    fn config_with(sources: &[(&str, bool)]) -> AppConfig {
        let mut config = AppConfig::default();
        for (name, enabled) in sources {
            let mut source = SourceEntry::new(*name, "https://jobs.example.test/");
            source.enabled = *enabled;
            config.sources.push(source);
        }
        config
    }

    #[test]
    fn cli_parses_run_with_sources() {
        let cli = Cli::try_parse_from(["jobharvest", "-v", "run", "-s", "a", "--source", "b"])
            .expect("parse");
        assert_eq!(cli.verbose, 1);
        match cli.command {
            Command::Run { sources } => assert_eq!(sources, vec!["a", "b"]),
            _ => panic!("expected run"),
        }
    }

    #[test]
    fn default_selection_skips_disabled() {
        let config = config_with(&[("a", true), ("b", false), ("c", true)]);
        let names: Vec<_> = select_sources(&config, &[])
            .unwrap()
            .into_iter()
            .map(|s| s.name)
            .collect();
        assert_eq!(names, vec!["a", "c"]);
    }

    #[test]
    fn named_selection_includes_disabled_and_rejects_unknown() {
        let config = config_with(&[("a", true), ("b", false)]);
        let picked = select_sources(&config, &["b".to_string()]).unwrap();
        assert_eq!(picked[0].name, "b");

        let err = select_sources(&config, &["zzz".to_string()]).unwrap_err();
        assert!(err.to_string().contains("unknown source 'zzz'"));
    }

    #[test]
    fn next_run_is_today_or_tomorrow() {
        let tz = FixedOffset::east_opt(0).unwrap();
        let six = NaiveTime::from_hms_opt(6, 0, 0).unwrap();

        let early = tz.with_ymd_and_hms(2026, 3, 10, 5, 30, 0).unwrap();
        let next = next_run(early, six);
        assert_eq!(next.date_naive(), early.date_naive());
        assert_eq!(next.hour(), 6);

        let late = tz.with_ymd_and_hms(2026, 3, 10, 6, 0, 0).unwrap();
        let next = next_run(late, six);
        assert_eq!(next.date_naive(), late.date_naive().succ_opt().unwrap());
    }
}
