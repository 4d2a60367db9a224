//! Runs a federation scenario in the simulator.
//!
//! `--scenario` takes a built-in name or a path to a JSON file. Each
//! iteration uses the next seed. Exit code 1 if any invocation misses its
//! expectation.

use std::process;

use clap::Parser;
use faasnet::scenario::{Scenario, ScenarioError, ScenarioReport, run_scenario};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// CLI arguments
#[derive(Parser, Debug)]
#[command(name = "faasnet-sim")]
#[command(about = "Simulate peer-federated function execution", long_about = None)]
struct Args {
    /// Built-in scenario name or path to a scenario JSON file
    #[arg(short, long, default_value = "point-to-point")]
    scenario: String,

    /// Seed of the first iteration
    #[arg(long, default_value_t = 1)]
    seed: u64,

    /// Number of seeds to run
    #[arg(short, long, default_value_t = 1)]
    iterations: u64,

    /// Default log filter when RUST_LOG is unset
    #[arg(long, default_value = "warn")]
    log_level: String,

    /// Print reports as JSON
    #[arg(long)]
    json: bool,

    /// List built-in scenarios and exit
    #[arg(long)]
    list: bool,
}

fn load(name: &str) -> Result<Scenario, ScenarioError> {
    match Scenario::builtin(name) {
        Err(ScenarioError::UnknownBuiltin(_)) => Scenario::load(name),
        found => found,
    }
}

fn print(report: &ScenarioReport, json: bool) {
    if !json {
        println!("{report}");
        return;
    }
    match serde_json::to_string_pretty(report) {
        Ok(out) => println!("{out}"),
        Err(e) => eprintln!("cannot serialize report: {e}"),
    }
}

fn main() {
    let args = Args::parse();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| args.log_level.as_str().into()),
        )
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .init();

    if args.list {
        for name in Scenario::builtin_names() {
            println!("{name}");
        }
        return;
    }

    let scenario = match load(&args.scenario) {
        Ok(scenario) => scenario,
        Err(e) => {
            eprintln!("{e}");
            process::exit(2);
        }
    };

    let mut failing = Vec::new();
    for seed in args.seed..args.seed.saturating_add(args.iterations) {
        let report = match run_scenario(&scenario, seed) {
            Ok(report) => report,
            Err(e) => {
                eprintln!("{e}");
                process::exit(2);
            }
        };
        print(&report, args.json);
        if !report.all_expectations_met() {
            failing.push(seed);
        }
    }

    if !failing.is_empty() {
        eprintln!("FAILED: {} failing seeds: {failing:?}", failing.len());
        process::exit(1);
    }
}
