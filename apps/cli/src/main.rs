//! jobharvest CLI: job-posting ingestion into a local catalog.
//!
//! Collects listings from configured job boards, reconciles them into a
//! libSQL catalog, and reports what changed.

mod commands;

use clap::Parser;
use color_eyre::eyre::Result;

use commands::Cli;

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;
    let cli = Cli::parse();
    commands::init_tracing(&cli);
    commands::run(cli).await
}
