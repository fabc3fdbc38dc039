//! Headless combat scenario runner.
//!
//! # Usage
//!
//! ```bash
//! # Run a scenario for its configured length
//! cargo run -p warband_headless -- run --scenario scenarios/skirmish.ron
//!
//! # Override the run length
//! cargo run -p warband_headless -- run --scenario scenarios/skirmish.ron --ticks 2000
//!
//! # Validate a combat tables file
//! cargo run -p warband_headless -- validate --tables scenarios/tables.ron
//!
//! # Verify determinism across parallel runs
//! cargo run -p warband_headless -- verify --scenario scenarios/skirmish.ron --runs 8
//! ```
//!
//! Results go to stdout as JSON; logs go to stderr.

use std::path::{Path, PathBuf};

use clap::{Parser, Subcommand};
use serde::Serialize;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use warband_headless::{load_tables, verify_scenario, Scenario, ScenarioRunner};

#[derive(Parser)]
#[command(name = "warband_headless")]
#[command(about = "Headless combat scenario runner for CI")]
#[command(version)]
struct Cli {
    /// Enable verbose logging to stderr
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a scenario and print its summary
    Run {
        /// Scenario file to load
        #[arg(short, long)]
        scenario: PathBuf,

        /// Ticks to run (defaults to the scenario's own length)
        #[arg(short, long)]
        ticks: Option<u64>,
    },

    /// Parse and validate a combat tables file
    Validate {
        /// Tables file to check
        #[arg(short, long)]
        tables: PathBuf,
    },

    /// Verify determinism by running the same scenario several times
    Verify {
        /// Scenario file to load
        #[arg(short, long)]
        scenario: PathBuf,

        /// Number of verification runs
        #[arg(short, long, default_value = "5")]
        runs: u32,

        /// Ticks per run (defaults to the scenario's own length)
        #[arg(short, long)]
        ticks: Option<u64>,
    },
}

#[derive(Serialize)]
struct TablesReport {
    weapons: Vec<String>,
    spells: Vec<String>,
}

fn main() {
    let cli = Cli::parse();

    // Logs go to stderr; stdout carries JSON results
    let default_level = if cli.verbose { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stderr)
                .with_ansi(true),
        )
        .with(filter)
        .init();

    match cli.command {
        Commands::Run { scenario, ticks } => cmd_run(&scenario, ticks),
        Commands::Validate { tables } => cmd_validate(&tables),
        Commands::Verify {
            scenario,
            runs,
            ticks,
        } => cmd_verify(&scenario, runs, ticks),
    }
}

/// Run a scenario and print the summary
fn cmd_run(path: &Path, ticks: Option<u64>) {
    let scenario = load_scenario(path);
    let ticks = ticks.unwrap_or(scenario.ticks);

    let mut runner = match ScenarioRunner::new(&scenario) {
        Ok(runner) => runner,
        Err(e) => {
            eprintln!("Failed to build scenario: {}", e);
            std::process::exit(1);
        }
    };

    let summary = runner.run(ticks);
    print_json(&summary);
}

/// Validate a tables file
fn cmd_validate(path: &Path) {
    tracing::info!("Validating tables: {}", path.display());

    match load_tables(path) {
        Ok(tables) => {
            eprintln!(
                "PASS: {} weapons, {} spells",
                tables.weapons().len(),
                tables.spells().len()
            );
            print_json(&TablesReport {
                weapons: tables.weapons().iter().map(|w| w.name.clone()).collect(),
                spells: tables.spells().iter().map(|s| s.name.clone()).collect(),
            });
        }
        Err(e) => {
            eprintln!("FAIL: {}", e);
            std::process::exit(1);
        }
    }
}

/// Verify determinism across repeated runs
fn cmd_verify(path: &Path, runs: u32, ticks: Option<u64>) {
    let scenario = load_scenario(path);
    let ticks = ticks.unwrap_or(scenario.ticks);

    tracing::info!(
        "Verifying determinism: {} ({} runs, {} ticks)",
        scenario.name,
        runs,
        ticks
    );

    let report = match verify_scenario(&scenario, runs, ticks) {
        Ok(report) => report,
        Err(e) => {
            eprintln!("Failed to build scenario: {}", e);
            std::process::exit(1);
        }
    };

    print_json(&report);
    if report.deterministic {
        eprintln!("PASS: All {} runs produced identical results", runs);
    } else {
        eprintln!("FAIL: Non-determinism detected!");
        std::process::exit(1);
    }
}

fn load_scenario(path: &Path) -> Scenario {
    match Scenario::load(path) {
        Ok(scenario) => scenario,
        Err(e) => {
            eprintln!("Failed to load scenario: {}", e);
            std::process::exit(1);
        }
    }
}

fn print_json<T: Serialize>(value: &T) {
    match serde_json::to_string_pretty(value) {
        Ok(json) => println!("{}", json),
        Err(e) => {
            eprintln!("Failed to encode result: {}", e);
            std::process::exit(1);
        }
    }
}
