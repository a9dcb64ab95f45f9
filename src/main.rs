//! Kraken2 species abundance pipeline.
//!
//! Trims paired reads, optionally removes host reads with Bowtie2,
//! classifies them with Kraken2 and merges the per-sample reports with
//! sample metadata into one species table.

mod aggregate;
mod cli;
mod config;
mod io;
mod kraken_report;
mod metadata;
mod pipeline;

use anyhow::Result;
use clap::Parser;
use cli::{run_cli, Cli};
use log::info;

fn main() -> Result<()> {
    let cli = Cli::parse();

    // RUST_LOG still overrides the default level.
    let default_level = if cli.verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_level))
        .init();

    info!("Starting kraken-abundance v{}", env!("CARGO_PKG_VERSION"));
    run_cli(cli)
}
