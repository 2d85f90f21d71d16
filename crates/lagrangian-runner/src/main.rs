//! Lagrangian Runner CLI.
//!
//! Commands:
//! - run: trace one scenario across all ranks and print the summary
//! - show-config: print the effective tracer and scenario configuration
//! - seeds: print the seeds a scenario would place on each rank

use std::path::{Path, PathBuf};

use anyhow::Result;
use chrono::{Local, Utc};
use clap::{Parser, Subcommand};
use tracing::info;
use tracing_subscriber::EnvFilter;

use lagrangian_kernel::{QueueOrder, TracerConfig};
use lagrangian_runner::results::{format_duration, RunResults};
use lagrangian_runner::scenario::ScenarioConfig;

/// Generate a timestamped output path from the given path.
/// e.g., "trace.json" -> "trace-20260108-010530.json"
fn timestamped_path(path: &Path) -> PathBuf {
    let timestamp = Local::now().format("%Y%m%d-%H%M%S");
    let stem = path.file_stem().and_then(|s| s.to_str()).unwrap_or("trace");
    let ext = path.extension().and_then(|s| s.to_str()).unwrap_or("json");
    let parent = path.parent().unwrap_or(Path::new("."));
    parent.join(format!("{}-{}.{}", stem, timestamp, ext))
}

#[derive(Parser)]
#[command(name = "lagrangian-runner")]
#[command(version)]
#[command(about = "Distributed Lagrangian particle tracing over slab-partitioned ranks")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Tracer configuration file (TOML or JSON)
    #[arg(long, short, env = "LAGRANGIAN_CONFIG")]
    config: Option<PathBuf>,

    /// Enable verbose output
    #[arg(long, short)]
    verbose: bool,
}

/// Scenario options shared by every command.
#[derive(clap::Args, Clone)]
struct ScenarioArgs {
    /// Number of ranks (one slab each)
    #[arg(long, default_value = "4")]
    ranks: usize,
    /// Seeds placed per rank
    #[arg(long, default_value = "25")]
    seeds: usize,
    /// Random seed for seed placement
    #[arg(long, default_value = "42")]
    seed: u64,
    /// Wrap particles around in x
    #[arg(long)]
    periodic: bool,
    /// Split every seeded particle at this step
    #[arg(long)]
    split_at: Option<i64>,
    /// Ranks without seeds (comma-separated)
    #[arg(long, value_delimiter = ',')]
    seedless: Vec<usize>,
}

impl ScenarioArgs {
    fn scenario(&self) -> ScenarioConfig {
        ScenarioConfig {
            ranks: self.ranks,
            seeds_per_rank: self.seeds,
            rng_seed: self.seed,
            periodic: self.periodic,
            split_at_step: self.split_at,
            seedless_ranks: self.seedless.clone(),
            ..ScenarioConfig::default()
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Trace a scenario to completion.
    Run {
        #[command(flatten)]
        scenario: ScenarioArgs,
        /// Pop the newest queued particle first
        #[arg(long)]
        lifo: bool,
        /// Override the per-particle step limit
        #[arg(long)]
        max_steps: Option<u64>,
        /// Output file for results (JSON, timestamped)
        #[arg(short, long)]
        output: Option<PathBuf>,
        /// Include path segments in the output
        #[arg(long)]
        paths: bool,
    },

    /// Print the effective configuration.
    ShowConfig {
        #[command(flatten)]
        scenario: ScenarioArgs,
    },

    /// Print the seeds of a scenario.
    Seeds {
        #[command(flatten)]
        scenario: ScenarioArgs,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("info")
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let tracer = match &cli.config {
        Some(path) => TracerConfig::load(path)?,
        None => TracerConfig::default(),
    };

    match cli.command {
        Commands::Run {
            scenario,
            lifo,
            max_steps,
            output,
            paths,
        } => {
            let scenario = scenario.scenario();
            let mut tracer = tracer;
            if lifo {
                tracer.queue_order = QueueOrder::Lifo;
            }
            if max_steps.is_some() {
                tracer.max_steps = max_steps;
            }

            info!(
                ranks = scenario.ranks,
                seeds_per_rank = scenario.seeds_per_rank,
                periodic = scenario.periodic,
                "Starting scenario"
            );

            let started_at = Utc::now();
            let outcome = scenario.trace_run(tracer.clone())?.run().await?;
            let results = RunResults::from_outcome(&outcome, scenario, tracer, started_at, paths);
            let elapsed = (results.ended_at - results.started_at)
                .num_milliseconds()
                .max(0) as u64;

            let summary = &results.summary;
            println!("\n=== Trace Result ===");
            println!("Run: {}", results.run_id);
            println!("Ranks: {}", summary.ranks.len());
            println!("Seeds in domain: {}", summary.seeds());
            println!("Spawned: {}", summary.spawned());
            println!("Steps: {}", summary.steps());
            println!("Migrations: {}", summary.migrations());
            println!("Terminated: {}", summary.terminated());
            println!("Left domain: {}", summary.exited());
            println!("Discarded: {}", summary.discarded());
            println!("Elapsed: {}", format_duration(elapsed));

            println!("\nOutcomes:");
            for (termination, count) in results.outcome_counts() {
                println!("  {}: {}", termination, count);
            }

            println!("\nPer-Rank:");
            println!(
                "  {:>4} {:>6} {:>8} {:>8} {:>8} {:>9} {:>8}",
                "Rank", "Seeds", "Steps", "Migrated", "Accepted", "Converged", "Absorbed"
            );
            for stats in &summary.ranks {
                println!(
                    "  {:>4} {:>6} {:>8} {:>8} {:>8} {:>9} {:>8}",
                    stats.rank,
                    stats.seeds_local + stats.seeds_forwarded,
                    stats.steps,
                    stats.migrated,
                    stats.accepted,
                    stats.converged,
                    stats.absorbed
                );
            }

            if let Some(output) = output {
                let output_path = timestamped_path(&output);
                results.save(&output_path)?;
                println!("\nResults saved to: {}", output_path.display());
            }
        }

        Commands::ShowConfig { scenario } => {
            let scenario = scenario.scenario();
            scenario.validate()?;
            let mut tracer = tracer;
            tracer.model = ScenarioConfig::model();

            println!("Tracer:");
            println!("{}", serde_json::to_string_pretty(&tracer)?);
            println!("\nScenario:");
            println!("{}", serde_json::to_string_pretty(&scenario)?);
        }

        Commands::Seeds { scenario } => {
            let scenario = scenario.scenario();
            scenario.validate()?;
            for (rank, seeds) in scenario.seeds().iter().enumerate() {
                println!("Rank {} ({} seeds):", rank, seeds.len());
                for seed in seeds {
                    let v = &seed.variables;
                    println!(
                        "  pos=({:.3}, {:.3}, {:.3}) vel=({:.3}, {:.3}, {:.3})",
                        v[0], v[1], v[2], v[3], v[4], v[5]
                    );
                }
            }
        }
    }

    Ok(())
}
