//! Scenario loading and configuration.
//!
//! A scenario names its combat tables, places labelled groups of agents and
//! scripts decision-layer requests against those labels.
//!
//! # Example RON
//!
//! ```ron
//! Scenario(
//!     name: "duel",
//!     tables: File("tables.ron"),
//!     ticks: 200,
//!     groups: [
//!         AgentGroup(label: "knight", faction: Ally, at: (x: 0.0, z: 0.0), health: Some(100), weapon: Some("sword")),
//!         AgentGroup(label: "raider", faction: Enemy, at: (x: 0.0, z: 1.5), health: Some(60), weapon: Some("sword")),
//!     ],
//!     script: [ScriptEntry(tick: 1, group: "knight", action: Attack)],
//! )
//! ```

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info};

use warband_core::components::{AgentId, CombatStats};
use warband_core::config::SimulationConfig;
use warband_core::data::CombatTables;
use warband_core::error::CombatError;
use warband_core::factions::Faction;
use warband_core::math::{fixed_decimal, option_fixed_decimal, Fixed, Vec2Fixed};
use warband_core::simulation::{AgentSpawnParams, Simulation};

use crate::decision::{Script, ScriptAction, ScriptEntry};
use crate::playback::{Playback, PlaybackSettings};

/// Error type for scenario operations.
#[derive(Error, Debug)]
pub enum ScenarioError {
    /// File not found.
    #[error("Scenario file not found: {0}")]
    FileNotFound(String),
    /// Failed to read file.
    #[error("Failed to read scenario file: {0}")]
    ReadError(#[from] std::io::Error),
    /// Failed to parse RON.
    #[error("Failed to parse scenario: {0}")]
    ParseError(#[from] ron::error::SpannedError),
    /// Tables, config or an agent were rejected by the engine.
    #[error("Invalid scenario: {0}")]
    Combat(#[from] CombatError),
    /// Two groups share a label.
    #[error("Duplicate group label '{0}'")]
    DuplicateGroup(String),
    /// A script entry names a group that does not exist.
    #[error("Script entry {index} refers to unknown group '{group}'")]
    UnknownGroup {
        /// Position of the entry in the script.
        index: usize,
        /// Label that failed to resolve.
        group: String,
    },
}

/// A ground-plane point written as decimals.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Point {
    /// World X.
    #[serde(with = "fixed_decimal")]
    pub x: Fixed,
    /// World Z.
    #[serde(with = "fixed_decimal")]
    pub z: Fixed,
}

impl Point {
    /// Point from integer coordinates.
    #[must_use]
    pub fn from_num(x: i32, z: i32) -> Self {
        Self {
            x: Fixed::from_num(x),
            z: Fixed::from_num(z),
        }
    }
}

impl From<Point> for Vec2Fixed {
    fn from(point: Point) -> Self {
        Vec2Fixed::new(point.x, point.z)
    }
}

/// Where a scenario's combat tables come from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum TablesSource {
    /// A RON tables file, relative to the scenario file.
    File(PathBuf),
    /// Tables written into the scenario itself.
    Inline(CombatTables),
}

/// A labelled group of identical agents placed in a column along Z.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentGroup {
    /// Label referenced by script entries and the run summary.
    pub label: String,
    /// Faction of every member.
    pub faction: Faction,
    /// Position of the first member.
    pub at: Point,
    /// Number of members.
    #[serde(default = "default_count")]
    pub count: u32,
    /// Gap between members along Z.
    #[serde(default = "default_spacing", with = "fixed_decimal")]
    pub spacing: Fixed,
    /// Point the group faces on spawn.
    #[serde(default)]
    pub facing: Option<Point>,
    /// Maximum health; omitted makes members untargetable.
    #[serde(default)]
    pub health: Option<u32>,
    /// Weapon name from the tables.
    #[serde(default)]
    pub weapon: Option<String>,
    /// Spell names from the tables, one slot each.
    #[serde(default)]
    pub spells: Vec<String>,
    /// Attack speed multiplier.
    #[serde(default, with = "option_fixed_decimal")]
    pub attack_speed: Option<Fixed>,
    /// Cast speed multiplier.
    #[serde(default, with = "option_fixed_decimal")]
    pub cast_speed: Option<Fixed>,
}

fn default_count() -> u32 {
    1
}

fn default_spacing() -> Fixed {
    Fixed::from_num(2)
}

fn default_ticks() -> u64 {
    600
}

/// A complete scenario configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Scenario {
    /// Scenario name.
    pub name: String,
    /// Human-readable description.
    #[serde(default)]
    pub description: String,
    /// Engine configuration.
    #[serde(default)]
    pub config: SimulationConfig,
    /// Weapon and spell tables.
    pub tables: TablesSource,
    /// Default run length.
    #[serde(default = "default_ticks")]
    pub ticks: u64,
    /// Agents to place, in spawn order.
    pub groups: Vec<AgentGroup>,
    /// Drive every agent with the aggressive decision layer as well.
    #[serde(default)]
    pub autopilot: bool,
    /// Presentation tuning.
    #[serde(default)]
    pub playback: PlaybackSettings,
    /// Authored requests.
    #[serde(default)]
    pub script: Vec<ScriptEntry>,
    /// Directory relative table paths resolve against.
    #[serde(skip)]
    pub base_dir: Option<PathBuf>,
}

/// A scenario resolved into a ready-to-run simulation.
#[derive(Debug, Clone)]
pub struct Setup {
    /// Populated simulation at tick 0.
    pub simulation: Simulation,
    /// Agent ids per group label, in spawn order.
    pub groups: BTreeMap<String, Vec<AgentId>>,
    /// Script to replay.
    pub script: Script,
    /// Presentation stand-in.
    pub playback: Playback,
    /// Whether the aggressive decision layer runs every tick.
    pub autopilot: bool,
}

impl Scenario {
    /// Load a scenario from a RON file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ScenarioError> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(ScenarioError::FileNotFound(path.display().to_string()));
        }
        let contents = std::fs::read_to_string(path)?;
        let mut scenario = Self::from_ron_str(&contents)?;
        scenario.base_dir = path.parent().map(Path::to_path_buf);
        Ok(scenario)
    }

    /// Load from a RON string. Relative table paths resolve against the
    /// working directory.
    pub fn from_ron_str(ron: &str) -> Result<Self, ScenarioError> {
        let scenario: Scenario = ron::from_str(ron)?;
        Ok(scenario)
    }

    /// Read and validate the combat tables.
    pub fn load_tables(&self) -> Result<CombatTables, ScenarioError> {
        match &self.tables {
            TablesSource::Inline(tables) => Ok(CombatTables::new(
                tables.weapons().to_vec(),
                tables.spells().to_vec(),
            )?),
            TablesSource::File(path) => {
                let path = match &self.base_dir {
                    Some(base) if path.is_relative() => base.join(path),
                    _ => path.clone(),
                };
                load_tables(path)
            }
        }
    }

    /// Resolve tables, spawn every group and compile the script.
    pub fn build(&self) -> Result<Setup, ScenarioError> {
        let tables = self.load_tables()?;
        let summon_weapon = self
            .playback
            .summon_weapon
            .as_deref()
            .map(|name| tables.weapon_id(name))
            .transpose()?;

        let mut placements = Vec::new();
        for group in &self.groups {
            let weapon = group
                .weapon
                .as_deref()
                .map(|name| tables.weapon_id(name))
                .transpose()?;
            let spells = group
                .spells
                .iter()
                .map(|name| tables.spell_id(name))
                .collect::<Result<Vec<_>, _>>()?;
            placements.push((group, weapon, spells));
        }

        let mut simulation = Simulation::new(self.config.clone(), tables)?;
        let mut groups: BTreeMap<String, Vec<AgentId>> = BTreeMap::new();

        for (group, weapon, spells) in placements {
            if groups.contains_key(&group.label) {
                return Err(ScenarioError::DuplicateGroup(group.label.clone()));
            }
            let origin = Vec2Fixed::from(group.at);
            let stats = CombatStats {
                attack_speed: group.attack_speed.unwrap_or(Fixed::ONE),
                cast_speed: group.cast_speed.unwrap_or(Fixed::ONE),
            };

            let mut members = Vec::with_capacity(group.count as usize);
            for i in 0..group.count {
                let position = origin + Vec2Fixed::new(Fixed::ZERO, group.spacing * Fixed::from_num(i));
                let facing = group
                    .facing
                    .map_or(Vec2Fixed::FORWARD, |point| {
                        position.direction_to(point.into(), Vec2Fixed::FORWARD)
                    });
                let mut params = AgentSpawnParams::new(group.faction, position)
                    .with_facing(facing)
                    .with_stats(stats)
                    .with_spells(spells.iter().copied());
                if let Some(max) = group.health {
                    params = params.with_health(max);
                }
                if let Some(weapon) = weapon {
                    params = params.with_weapon(weapon);
                }
                members.push(simulation.spawn_agent(params)?);
            }
            debug!(label = %group.label, count = members.len(), "Placed group");
            groups.insert(group.label.clone(), members);
        }

        for (index, entry) in self.script.iter().enumerate() {
            let mut labels = vec![&entry.group];
            if let ScriptAction::CastAtGroup { target, .. } = &entry.action {
                labels.push(target);
            }
            if let Some(missing) = labels.into_iter().find(|label| !groups.contains_key(*label)) {
                return Err(ScenarioError::UnknownGroup {
                    index,
                    group: missing.clone(),
                });
            }
        }

        info!(
            scenario = %self.name,
            agents = simulation.agents().len(),
            script = self.script.len(),
            "Scenario ready"
        );

        Ok(Setup {
            simulation,
            groups,
            script: Script::new(self.script.clone()),
            playback: Playback::from_settings(&self.playback, summon_weapon),
            autopilot: self.autopilot,
        })
    }
}

/// Read and validate a RON combat tables file.
pub fn load_tables<P: AsRef<Path>>(path: P) -> Result<CombatTables, ScenarioError> {
    let path = path.as_ref();
    if !path.exists() {
        return Err(ScenarioError::FileNotFound(path.display().to_string()));
    }
    let contents = std::fs::read_to_string(path)?;
    Ok(CombatTables::from_ron_str(&contents)?)
}
