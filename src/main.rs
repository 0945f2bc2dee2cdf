//! # Channel-Scan Simulator - Main Entry Point
//!
//! Discrete-event simulator of a multi-channel packet reception regime:
//! many periodic senders spread over a bank of narrowband channels, a small
//! fleet of single-tuner receivers recovering their packets under a
//! configurable channel-visitation policy (sequential polling vs.
//! predictive scheduling), composed under four coexistence modes.
//!
//! ## Run modes
//!
//! - **Single run** (default): simulate one scenario and print the
//!   aggregate summary; optionally write the per-sender markdown table and
//!   per-receiver state traces for plotting.
//! - **Batch sweep** (`--batch`): sweep the sender population 1..=40 at 30
//!   minutes of simulated time each, appending one CSV row per population.
//!
//! Scenario parameters come from an optional TOML file, selectively
//! overridden by CLI flags; every parameter has a default matching the
//! original experiment setup.

use anyhow::Result;
use clap::Parser;
use env_logger::Builder;
use log::{LevelFilter, info};
use std::path::PathBuf;

mod report;
mod scenario;
mod simulation;

use scenario::{CoexistenceMode, Scenario};
use simulation::Simulator;

/// Simulated milliseconds per batch-sweep run (30 minutes).
const BATCH_STEP_LIMIT: u64 = 30 * 60 * 1000;

/// Discrete-event simulator of multi-channel packet reception.
#[derive(Parser, Debug)]
#[command(name = "channel-scan-simulator", version, about)]
struct Cli {
    /// Scenario file (TOML); built-in defaults apply when omitted
    #[arg(long)]
    scenario: Option<PathBuf>,

    /// Coexistence mode override
    #[arg(long, value_enum)]
    mode: Option<CoexistenceMode>,

    /// Sender population override
    #[arg(long)]
    senders: Option<usize>,

    /// Simulated milliseconds to run (single-run mode)
    #[arg(long)]
    steps: Option<u64>,

    /// RNG seed override for reproducible runs
    #[arg(long)]
    seed: Option<u64>,

    /// Write per-receiver state traces (JSON) into this directory
    #[arg(long)]
    trace_dir: Option<PathBuf>,

    /// Write the per-sender markdown table to this file
    #[arg(long)]
    sender_table: Option<PathBuf>,

    /// Sweep sender populations 1..=40 and append one CSV row per run
    #[arg(long)]
    batch: bool,

    /// CSV file collecting batch results
    #[arg(long, default_value = "sim_result.csv")]
    csv: PathBuf,
}

fn main() -> Result<()> {
    Builder::new()
        .filter_level(LevelFilter::Info)
        .filter(Some("channel_scan_simulator"), LevelFilter::Debug)
        .parse_default_env()
        .init();

    let cli = Cli::parse();

    let mut scenario = match &cli.scenario {
        Some(path) => Scenario::load(path)?,
        None => Scenario::default(),
    };
    if let Some(mode) = cli.mode {
        scenario.mode = mode;
    }
    if let Some(senders) = cli.senders {
        scenario.num_senders = senders;
    }
    if let Some(steps) = cli.steps {
        scenario.step_limit = steps;
    }
    if let Some(seed) = cli.seed {
        scenario.seed = Some(seed);
    }
    scenario.validate()?;

    if cli.batch {
        run_batch(&scenario, &cli)
    } else {
        run_single(scenario, &cli)
    }
}

/// Simulate one scenario and report it.
fn run_single(scenario: Scenario, cli: &Cli) -> Result<()> {
    let step_limit = scenario.step_limit;
    let mut sim = Simulator::new(scenario);
    sim.run(step_limit);

    report::print_summary(&sim);
    if let Some(path) = &cli.sender_table {
        report::write_sender_table(&sim, path)?;
        info!("sender table written to {}", path.display());
    }
    if let Some(dir) = &cli.trace_dir {
        report::write_traces(&sim, dir)?;
        info!("state traces written to {}", dir.display());
    }
    Ok(())
}

/// Sweep the sender population and append one CSV row per run.
fn run_batch(base: &Scenario, cli: &Cli) -> Result<()> {
    for num_senders in 1..=40 {
        let mut scenario = base.clone();
        scenario.num_senders = num_senders;
        scenario.seed = base.seed.map(|seed| seed.wrapping_add(num_senders as u64));

        info!("batch run: {num_senders} sender(s)");
        let mut sim = Simulator::new(scenario);
        sim.run(BATCH_STEP_LIMIT);
        report::append_batch_csv(&sim, &cli.csv)?;
    }
    info!("batch sweep finished, results in {}", cli.csv.display());
    Ok(())
}
