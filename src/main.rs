//! # bias_sweep
//!
//! Sweeps the bias of a two-supply device under test and records its
//! S-parameters with a vector network analyzer at every bias point.
//!
//! ## Usage
//!
//! ```bash
//! # Run against the instruments in config/default.toml
//! bias_sweep run
//!
//! # Dry run against the simulated bench
//! bias_sweep run --simulate --output-dir /tmp/sweep
//!
//! # List the bias points and the files each one produces
//! bias_sweep plan --config bench.toml
//! ```

use anyhow::{bail, Context, Result};
use bias_sweep::data::{network_path, raw_capture_path};
use bias_sweep::data::storage::{OPERATING_POINT_DIR, OPERATING_POINT_FILE};
use bias_sweep::measurement::ScatteringTerm;
use bias_sweep::session::InstrumentSessions;
use bias_sweep::{Settings, SweepOrchestrator};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

/// Bias sweep S-parameter acquisition
#[derive(Parser)]
#[command(name = "bias_sweep")]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a sweep
    Run {
        /// Settings file layered over the built-in defaults
        #[arg(short, long, default_value = "config/default.toml")]
        config: PathBuf,

        /// Override the configured output directory
        #[arg(short, long)]
        output_dir: Option<PathBuf>,

        /// Use simulated instruments instead of VISA sessions
        #[arg(long)]
        simulate: bool,

        /// Log filter used when RUST_LOG is not set
        #[arg(long, default_value = "info")]
        log_level: String,

        /// Emit logs as JSON lines
        #[arg(long)]
        json_logs: bool,
    },

    /// Print the bias grid and the files each point produces
    Plan {
        /// Settings file layered over the built-in defaults
        #[arg(short, long, default_value = "config/default.toml")]
        config: PathBuf,
    },
}

fn init_tracing(log_level: &str, json: bool) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level));
    let builder = tracing_subscriber::fmt().with_env_filter(filter).with_target(false);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Run {
            config,
            output_dir,
            simulate,
            log_level,
            json_logs,
        } => {
            init_tracing(&log_level, json_logs);
            run(config, output_dir, simulate).await
        }
        Commands::Plan { config } => plan(config),
    }
}

async fn run(config: PathBuf, output_dir: Option<PathBuf>, simulate: bool) -> Result<()> {
    let mut settings = Settings::load_from(&config)
        .with_context(|| format!("Failed to load settings from {}", config.display()))?;
    if let Some(dir) = output_dir {
        settings.storage.output_dir = dir;
    }

    let sessions = if simulate {
        warn!("Running against simulated instruments");
        InstrumentSessions::simulated(&settings.instruments)
    } else {
        InstrumentSessions::open(&settings.instruments)
            .await
            .context("Failed to open instrument sessions")?
    };

    let mut orchestrator = SweepOrchestrator::new(settings, sessions)?;
    let report = orchestrator.run().await.context("Sweep aborted")?;

    for point in report.failed_points() {
        if let Some(failure) = &point.failure {
            error!(
                "Point {} {} failed during {:?}: {}",
                point.index + 1,
                point.bias,
                failure.stage,
                failure.message
            );
        }
    }
    for message in &report.shutdown_errors {
        error!("Shutdown: {}", message);
    }

    let failed = report.failed_points().count();
    if failed > 0 || !report.shutdown_errors.is_empty() {
        bail!(
            "{} of {} bias points failed, {} shutdown errors",
            failed,
            report.points.len(),
            report.shutdown_errors.len()
        );
    }
    info!("All {} bias points recorded", report.points.len());
    Ok(())
}

fn plan(config: PathBuf) -> Result<()> {
    let settings = Settings::load_from(&config)
        .with_context(|| format!("Failed to load settings from {}", config.display()))?;
    let grid = settings.sweep.bias_grid()?;
    let root = &settings.storage.output_dir;

    println!(
        "{} bias points, {}-{} GHz at {} points",
        grid.len(),
        settings.sweep.start_ghz,
        settings.sweep.stop_ghz,
        settings.sweep.points
    );
    println!(
        "Operating points: {}",
        root.join(OPERATING_POINT_DIR).join(OPERATING_POINT_FILE).display()
    );
    for (index, bias) in grid.iter().enumerate() {
        println!("{:>4}  {}", index + 1, bias);
        for term in ScatteringTerm::ALL {
            println!("        {}", raw_capture_path(root, term, bias).display());
        }
        println!("        {}", network_path(root, bias).display());
    }
    Ok(())
}
