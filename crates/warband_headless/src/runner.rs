//! Scenario runner.
//!
//! Each step writes decision-layer requests, ticks the simulation and plays
//! the frame back through [`Playback`], then acknowledges it.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use warband_core::components::AgentId;
use warband_core::factions::Faction;
use warband_core::simulation::{Simulation, TickEvents};

use crate::decision::{aggressive, Script};
use crate::playback::{Playback, PlaybackStats};
use crate::scenario::{Scenario, ScenarioError, Setup};

/// Per-group outcome.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupSummary {
    /// Group label.
    pub label: String,
    /// Members placed.
    pub placed: usize,
    /// Members still alive.
    pub alive: usize,
    /// Remaining health summed over living members.
    pub health: u64,
}

/// JSON summary of a run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunSummary {
    /// Scenario name.
    pub scenario: String,
    /// Ticks simulated.
    pub ticks: u64,
    /// Final state hash, hex encoded.
    pub state_hash: String,
    /// Total health removed.
    pub damage_dealt: u64,
    /// Total health restored.
    pub healing_done: u64,
    /// Critical hits landed.
    pub crits: u64,
    /// Agents that died.
    pub deaths: u64,
    /// Agents despawned after their grace period.
    pub despawned: u64,
    /// Presentation-side counters.
    pub playback: PlaybackStats,
    /// Scripted requests refused at write time.
    pub rejected_requests: u64,
    /// Living agents per faction, summons included.
    pub survivors: BTreeMap<Faction, usize>,
    /// Outcome per placed group.
    pub groups: Vec<GroupSummary>,
}

#[derive(Debug, Clone, Copy, Default)]
struct Totals {
    damage: u64,
    healing: u64,
    crits: u64,
    deaths: u64,
    despawned: u64,
}

impl Totals {
    fn record(&mut self, events: &TickEvents) {
        self.damage += events.damage.iter().map(|d| u64::from(d.amount)).sum::<u64>();
        self.healing += events.heals.iter().map(|h| u64::from(h.amount)).sum::<u64>();
        self.crits += events.damage.iter().filter(|d| d.crit).count() as u64;
        self.deaths += events.deaths.len() as u64;
        self.despawned += events.despawned.len() as u64;
    }
}

/// Drives a [`Setup`] tick by tick.
#[derive(Debug, Clone)]
pub struct ScenarioRunner {
    name: String,
    simulation: Simulation,
    groups: BTreeMap<String, Vec<AgentId>>,
    script: Script,
    playback: Playback,
    autopilot: bool,
    totals: Totals,
}

impl ScenarioRunner {
    /// Build a runner for `scenario`.
    pub fn new(scenario: &Scenario) -> Result<Self, ScenarioError> {
        Ok(Self::from_setup(scenario.name.clone(), scenario.build()?))
    }

    /// Wrap an already built setup.
    #[must_use]
    pub fn from_setup(name: String, setup: Setup) -> Self {
        Self {
            name,
            simulation: setup.simulation,
            groups: setup.groups,
            script: setup.script,
            playback: setup.playback,
            autopilot: setup.autopilot,
            totals: Totals::default(),
        }
    }

    /// The simulation being driven.
    #[must_use]
    pub fn simulation(&self) -> &Simulation {
        &self.simulation
    }

    /// Agent ids per group label.
    #[must_use]
    pub fn groups(&self) -> &BTreeMap<String, Vec<AgentId>> {
        &self.groups
    }

    /// Advance one tick.
    pub fn step(&mut self) -> TickEvents {
        self.script.apply(&mut self.simulation, &self.groups);
        if self.autopilot {
            aggressive(&mut self.simulation);
        }

        let events = self.simulation.tick();
        self.playback.present(&mut self.simulation, &events);
        self.simulation.acknowledge_frame(events.tick);
        self.totals.record(&events);

        if !events.deaths.is_empty() {
            debug!(tick = events.tick, deaths = ?events.deaths, "Agents died");
        }
        events
    }

    /// Run `ticks` steps and summarize.
    pub fn run(&mut self, ticks: u64) -> RunSummary {
        info!(scenario = %self.name, ticks, "Running scenario");
        for _ in 0..ticks {
            self.step();
        }
        let summary = self.summary();
        info!(
            scenario = %self.name,
            state_hash = %summary.state_hash,
            deaths = summary.deaths,
            "Run complete"
        );
        summary
    }

    /// Summary of everything run so far.
    #[must_use]
    pub fn summary(&self) -> RunSummary {
        let sim = &self.simulation;
        let mut survivors = BTreeMap::new();
        for agent in sim.agents().iter().filter(|a| a.is_alive()) {
            *survivors.entry(agent.faction).or_insert(0) += 1;
        }

        let groups = self
            .groups
            .iter()
            .map(|(label, members)| {
                let living: Vec<_> = members
                    .iter()
                    .filter_map(|&id| sim.agent(id))
                    .filter(|agent| agent.is_alive())
                    .collect();
                GroupSummary {
                    label: label.clone(),
                    placed: members.len(),
                    alive: living.len(),
                    health: living
                        .iter()
                        .filter_map(|agent| agent.health)
                        .map(|health| u64::from(health.current))
                        .sum(),
                }
            })
            .collect();

        RunSummary {
            scenario: self.name.clone(),
            ticks: sim.current_tick(),
            state_hash: format!("{:016x}", sim.state_hash()),
            damage_dealt: self.totals.damage,
            healing_done: self.totals.healing,
            crits: self.totals.crits,
            deaths: self.totals.deaths,
            despawned: self.totals.despawned,
            playback: self.playback.stats(),
            rejected_requests: self.script.rejected(),
            survivors,
            groups,
        }
    }
}
