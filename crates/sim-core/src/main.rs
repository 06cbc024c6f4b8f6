//! netsim
//!
//! Runs a simulation described by a TOML or JSON configuration file.

use clap::Parser;
use sim_core::{BehaviorRegistry, ConfigFormat, Simulation, SimulationConfig, TrialOutcome};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use tracing::{error, info, warn, Level};
use tracing_subscriber::FmtSubscriber;

#[derive(Parser, Debug)]
#[command(name = "netsim")]
#[command(about = "Run network diffusion simulations")]
struct Args {
    /// Simulation configuration (.toml or .json)
    config: PathBuf,

    /// Keep results in memory only
    #[arg(long)]
    dry_run: bool,

    /// Override the configured base seed
    #[arg(long)]
    seed: Option<u64>,

    /// Override the configured number of trials
    #[arg(long)]
    trials: Option<usize>,

    /// Override the configured tick limit (runs are unbounded without one)
    #[arg(long)]
    max_time: Option<u64>,

    /// Override the configured output directory
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Print the live configuration and exit
    #[arg(long)]
    print_config: bool,

    /// Enable debug logging
    #[arg(short, long)]
    verbose: bool,
}

fn main() -> ExitCode {
    let args = Args::parse();

    let level = if args.verbose { Level::DEBUG } else { Level::INFO };
    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(false)
        .finish();
    tracing::subscriber::set_global_default(subscriber).expect("Failed to set tracing subscriber");

    match run(&args) {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::from(1),
        Err(e) => {
            error!("{}", e);
            ExitCode::from(2)
        }
    }
}

fn run(args: &Args) -> Result<bool, Box<dyn std::error::Error>> {
    let format = ConfigFormat::from_path(&args.config)?;
    let mut config = SimulationConfig::from_file(&args.config)?;
    if let Some(seed) = args.seed {
        config.seed = Some(seed);
    }
    if let Some(trials) = args.trials {
        config.num_trials = trials;
    }
    if let Some(max_time) = args.max_time {
        config.max_time = Some(max_time);
    }
    if let Some(output) = &args.output {
        config.dir_path = Some(output.clone());
    }

    let base_dir = args.config.parent().unwrap_or_else(|| Path::new("."));
    let sim = Simulation::from_config_in(config, BehaviorRegistry::builtin(), base_dir)?.with_format(format);
    if args.print_config {
        println!("{}", sim.serialize(args.dry_run)?);
        return Ok(true);
    }

    if sim.config().max_time.is_none() {
        warn!("No max_time set; trials run until interrupted");
    }
    let report = sim.run_simulation(args.dry_run)?;
    for trial in &report.trials {
        match &trial.outcome {
            TrialOutcome::Complete => info!(
                "trial {} (seed {}): {} ticks, {} history entries",
                trial.index,
                trial.seed,
                trial.env.now(),
                trial.env.history().len()
            ),
            TrialOutcome::Aborted => info!("trial {} aborted", trial.index),
            TrialOutcome::Failed(e) => error!("trial {} failed: {}", trial.index, e),
        }
    }
    if !args.dry_run {
        info!("Results written to {}", sim.output_dir().display());
    }
    Ok(report.is_success())
}
