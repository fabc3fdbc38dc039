//! Headless scenario runner for CI verification.
//!
//! Loads a RON scenario and its combat tables, drives the simulation with a
//! scripted decision layer and an instant-impact presentation stand-in, and
//! reports a JSON summary.
//!
//! - **stdout**: JSON results
//! - **stderr**: logs (human-readable)
//!
//! # Example
//!
//! ```bash
//! # Run a scenario and print its summary
//! cargo run -p warband_headless -- run --scenario scenarios/skirmish.ron
//!
//! # Check a tables file
//! cargo run -p warband_headless -- validate --tables scenarios/tables.ron
//!
//! # Verify determinism
//! cargo run -p warband_headless -- verify --scenario scenarios/skirmish.ron --runs 8
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod decision;
pub mod playback;
pub mod runner;
pub mod scenario;
pub mod verify;

pub use decision::{aggressive, Script, ScriptAction, ScriptEntry};
pub use playback::{Playback, PlaybackSettings, PlaybackStats};
pub use runner::{GroupSummary, RunSummary, ScenarioRunner};
pub use scenario::{load_tables, AgentGroup, Point, Scenario, ScenarioError, Setup, TablesSource};
pub use verify::{verify_scenario, VerifyReport};
