//! Loading and running scenario files from disk.

use std::path::PathBuf;

use warband_headless::{load_tables, verify_scenario, Scenario, ScenarioError, ScenarioRunner};

fn bundled(name: &str) -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .join("scenarios")
        .join(name)
}

const TABLES: &str = r#"
CombatTables(
    weapons: [
        WeaponConfig(name: "club", range: 2.0, acquire_range: Some(16.0), damage: 7, cooldown_seconds: 1.0,
            style: Melee(MeleeProfile(half_angle_degrees: 75.0, max_targets: 2))),
    ],
)
"#;

const BRAWL: &str = r#"
Scenario(
    name: "brawl",
    tables: File("tables.ron"),
    ticks: 300,
    autopilot: true,
    groups: [
        AgentGroup(label: "reds", faction: Ally, at: (x: -4.0, z: 0.0), count: 2, health: Some(30), weapon: Some("club")),
        AgentGroup(label: "blues", faction: Enemy, at: (x: 4.0, z: 0.0), count: 2, health: Some(30), weapon: Some("club")),
    ],
)
"#;

#[test]
fn test_bundled_tables_validate() {
    let tables = load_tables(bundled("tables.ron")).unwrap();
    assert_eq!(tables.weapons().len(), 4);
    assert_eq!(tables.spells().len(), 5);
}

#[test]
fn test_bundled_skirmish_runs() {
    let scenario = Scenario::load(bundled("skirmish.ron")).unwrap();
    let mut runner = ScenarioRunner::new(&scenario).unwrap();
    let summary = runner.run(400);

    assert_eq!(summary.ticks, 400);
    assert!(summary.damage_dealt > 0);
    assert_eq!(summary.groups.len(), 6);
}

#[test]
fn test_gauntlet_script_damages_every_dummy() {
    let scenario = Scenario::load(bundled("gauntlet.ron")).unwrap();
    let mut runner = ScenarioRunner::new(&scenario).unwrap();
    let summary = runner.run(scenario.ticks);

    let dummies = summary
        .groups
        .iter()
        .find(|g| g.label == "dummies")
        .unwrap();
    assert_eq!(dummies.alive, 4);
    assert!(dummies.health < 4 * 200);
    for &id in &runner.groups()["dummies"] {
        let health = runner.simulation().agent(id).unwrap().health.unwrap();
        assert!(health.current < health.max, "dummy {id} untouched");
    }
    assert_eq!(summary.rejected_requests, 0);
}

#[test]
fn test_relative_tables_path_resolves_next_to_scenario() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("tables.ron"), TABLES).unwrap();
    let path = dir.path().join("brawl.ron");
    std::fs::write(&path, BRAWL).unwrap();

    let scenario = Scenario::load(&path).unwrap();
    assert_eq!(scenario.base_dir.as_deref(), Some(dir.path()));

    let summary = ScenarioRunner::new(&scenario).unwrap().run(scenario.ticks);
    assert!(summary.damage_dealt > 0);
}

#[test]
fn test_missing_tables_file_reported() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("brawl.ron");
    std::fs::write(&path, BRAWL).unwrap();

    let scenario = Scenario::load(&path).unwrap();
    let error = ScenarioRunner::new(&scenario).unwrap_err();
    assert!(matches!(error, ScenarioError::FileNotFound(ref p) if p.ends_with("tables.ron")));
}

#[test]
fn test_invalid_tables_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("tables.ron");
    std::fs::write(&path, TABLES.replace("range: 2.0", "range: -2.0")).unwrap();

    let error = load_tables(&path).unwrap_err();
    assert!(matches!(error, ScenarioError::Combat(_)));
}

#[test]
fn test_malformed_scenario_is_a_parse_error() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("broken.ron");
    std::fs::write(&path, "Scenario(name: \"broken\",").unwrap();

    let error = Scenario::load(&path).unwrap_err();
    assert!(matches!(error, ScenarioError::ParseError(_)));
}

#[test]
fn test_verify_bundled_skirmish() {
    let scenario = Scenario::load(bundled("skirmish.ron")).unwrap();
    let report = verify_scenario(&scenario, 3, 300).unwrap();
    assert!(report.deterministic, "hashes diverged: {:?}", report.hashes);
}
