//! Anomaly detector CLI
//!
//! Replays recorded metric streams through configured detectors and runs
//! random-walk simulations comparing EWMA and PEWMA.

mod commands;
mod config;
mod output;
mod source;

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};
use commands::{detectors, replay, simulate};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};
use uuid::Uuid;

/// Online anomaly detector harness
#[derive(Parser)]
#[command(name = "aad")]
#[command(author, version, about = "Anomaly Detector harness for EWMA, PEWMA and CUSUM", long_about = None)]
pub struct Cli {
    /// Detector catalog file (TOML)
    #[arg(long, env = "AAD_CONFIG")]
    pub config: Option<PathBuf>,

    /// Output format
    #[arg(long, short, default_value = "table")]
    pub format: output::OutputFormat,

    /// Enable debug logging
    #[arg(long, short)]
    pub verbose: bool,

    /// Emit logs as JSON
    #[arg(long)]
    pub log_json: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// List detectors defined in the catalog
    Detectors,

    /// Classify a JSON-lines file of observations
    Replay {
        /// Input file, one observation per line ("-" for stdin)
        input: PathBuf,

        /// Use this detector model for every series
        #[arg(long, short)]
        detector: Option<Uuid>,

        /// Only print weak and strong results
        #[arg(long)]
        anomalies_only: bool,

        /// Print Prometheus metrics after the run
        #[arg(long)]
        metrics: bool,
    },

    /// Feed a random walk to EWMA and PEWMA side by side
    Simulate {
        /// Number of points to generate
        #[arg(long, default_value_t = 500)]
        steps: usize,

        /// Random seed
        #[arg(long, default_value_t = 42)]
        seed: u64,
    },
}

fn init_tracing(verbose: bool, json: bool) {
    let default_level = if verbose { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    let registry = tracing_subscriber::registry().with(filter);

    if json {
        registry
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        registry.with(fmt::layer().with_writer(std::io::stderr)).init();
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose, cli.log_json);

    match cli.command {
        Commands::Detectors => {
            let catalog = config::CatalogConfig::load(cli.config.as_deref())?;
            detectors::list_detectors(&catalog, cli.format)?;
        }
        Commands::Replay {
            input,
            detector,
            anomalies_only,
            metrics,
        } => {
            let catalog = config::CatalogConfig::load(cli.config.as_deref())?;
            let options = replay::ReplayOptions {
                detector,
                anomalies_only,
                show_metrics: metrics,
            };
            replay::replay(&catalog, &input, &options, cli.format)?;
        }
        Commands::Simulate { steps, seed } => {
            simulate::simulate(steps, seed, cli.format)?;
        }
    }

    Ok(())
}
