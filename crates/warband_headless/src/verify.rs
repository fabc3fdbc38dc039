//! Determinism verification.
//!
//! Runs one scenario several times on the rayon pool and compares final
//! state hashes. A sequential-read-pass run is added as a reference, so a
//! pass also proves the parallel read passes change nothing.

use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::runner::{RunSummary, ScenarioRunner};
use crate::scenario::{Scenario, ScenarioError};

/// JSON report of a verification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerifyReport {
    /// Scenario name.
    pub scenario: String,
    /// Parallel runs compared.
    pub runs: u32,
    /// Ticks per run.
    pub ticks: u64,
    /// Final hash of each run, hex encoded.
    pub hashes: Vec<String>,
    /// Final hash of the sequential reference run.
    pub sequential_hash: String,
    /// Every hash matched the reference.
    pub deterministic: bool,
}

/// Run `scenario` `runs` times for `ticks` ticks and compare.
pub fn verify_scenario(
    scenario: &Scenario,
    runs: u32,
    ticks: u64,
) -> Result<VerifyReport, ScenarioError> {
    let setup = scenario.build()?;

    let mut sequential = scenario.clone();
    sequential.config.parallel = false;
    let reference = ScenarioRunner::new(&sequential)?.run(ticks);

    let summaries: Vec<RunSummary> = (0..runs)
        .into_par_iter()
        .map(|_| ScenarioRunner::from_setup(scenario.name.clone(), setup.clone()).run(ticks))
        .collect();

    let deterministic = summaries.iter().all(|summary| *summary == reference);
    let hashes: Vec<String> = summaries.into_iter().map(|s| s.state_hash).collect();

    if deterministic {
        info!(scenario = %scenario.name, runs, ticks, "All runs identical");
    } else {
        warn!(scenario = %scenario.name, ?hashes, reference = %reference.state_hash, "Runs diverged");
    }

    Ok(VerifyReport {
        scenario: scenario.name.clone(),
        runs,
        ticks,
        hashes,
        sequential_hash: reference.state_hash,
        deterministic,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const ARCHERS: &str = r#"
Scenario(
    name: "volley",
    config: (seed: 99),
    tables: Inline(CombatTables(weapons: [
        WeaponConfig(name: "bow", range: 12.0, damage: 6, cooldown_seconds: 1.0,
            cooldown_jitter_seconds: 0.3, crit_chance: 0.25, crit_multiplier: 2.0,
            style: Ranged(RangedProfile(windup_seconds: 0.3, projectile_speed: 20.0, max_distance: 30.0))),
    ])),
    autopilot: true,
    groups: [
        AgentGroup(label: "west", faction: Ally, at: (x: -5.0, z: 0.0), count: 4, health: Some(40), weapon: Some("bow")),
        AgentGroup(label: "east", faction: Enemy, at: (x: 5.0, z: 0.0), count: 4, health: Some(40), weapon: Some("bow")),
    ],
)
"#;

    #[test]
    fn test_repeated_runs_are_identical() {
        let scenario = Scenario::from_ron_str(ARCHERS).unwrap();
        let report = verify_scenario(&scenario, 4, 200).unwrap();

        assert!(report.deterministic);
        assert_eq!(report.hashes.len(), 4);
        assert!(report.hashes.iter().all(|h| *h == report.sequential_hash));
    }

    #[test]
    fn test_zero_runs_is_trivially_deterministic() {
        let scenario = Scenario::from_ron_str(ARCHERS).unwrap();
        let report = verify_scenario(&scenario, 0, 5).unwrap();
        assert!(report.deterministic);
        assert!(report.hashes.is_empty());
    }
}
