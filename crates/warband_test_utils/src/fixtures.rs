//! Test fixtures and helpers.
//!
//! Pre-built combat tables, skirmish layouts and an [`Autopilot`] that plays
//! both external roles (decision layer and presentation) so a simulation
//! can be driven end to end without a game engine.

use std::collections::BTreeMap;

use fixed::types::I32F32;
use tracing::trace;

use warband_core::components::AgentId;
use warband_core::config::SimulationConfig;
use warband_core::data::{CombatTables, WeaponId};
use warband_core::factions::Faction;
use warband_core::math::Vec2Fixed;
use warband_core::simulation::{AgentSpawnParams, Simulation, TickEvents};
use warband_headless::decision::aggressive;
use warband_headless::playback::Playback;

/// Create a fixed-point number from an integer.
#[must_use]
pub fn fixed(n: i32) -> I32F32 {
    I32F32::from_num(n)
}

/// Create a fixed-point number from a float (for tests only).
///
/// Note: In real simulation code, never use floats.
/// This is only for convenient test setup.
#[must_use]
pub fn fixed_f(n: f64) -> I32F32 {
    I32F32::from_num(n)
}

/// Weapon and spell tables covering every style and spell kind.
pub const SAMPLE_TABLES: &str = r#"
CombatTables(
    weapons: [
        WeaponConfig(
            name: "sword",
            range: 2.0,
            damage: 12,
            cooldown_seconds: 1.0,
            cooldown_jitter_seconds: 0.1,
            crit_chance: 0.1,
            crit_multiplier: 2.0,
            style: Melee(MeleeProfile(half_angle_degrees: 60.0, max_targets: 1, swing_lock_seconds: 0.3)),
        ),
        WeaponConfig(
            name: "greatsword",
            range: 2.5,
            damage: 9,
            cooldown_seconds: 1.5,
            style: Melee(MeleeProfile(half_angle_degrees: 90.0, max_targets: 3, swing_lock_seconds: 0.5)),
        ),
        WeaponConfig(
            name: "bow",
            range: 12.0,
            damage: 8,
            cooldown_seconds: 1.2,
            cooldown_jitter_seconds: 0.2,
            style: Ranged(RangedProfile(
                windup_seconds: 0.4,
                projectile_speed: 25.0,
                max_distance: 30.0,
                muzzle: MuzzleOffset(forward: 0.5, right: 0.2, height: 1.4),
            )),
        ),
    ],
    spells: [
        SpellConfig(
            name: "firebolt",
            range: 14.0,
            cast_time_seconds: 0.6,
            cooldown_seconds: 4.0,
            post_cast_attack_lock_seconds: 0.3,
            acquire: ClosestEnemy,
            kind: ProjectileLine(damage: 20, projectile_speed: 18.0, max_distance: 20.0),
        ),
        SpellConfig(
            name: "blaze",
            range: 10.0,
            cast_time_seconds: 0.8,
            cooldown_seconds: 8.0,
            acquire: DensestEnemyCluster,
            kind: EffectOverTimeArea(
                payload: Payload(amount: 4, polarity: Harmful),
                radius: 3.0,
                interval_seconds: 1.0,
                duration_seconds: 3.0,
            ),
        ),
        SpellConfig(
            name: "mend",
            range: 10.0,
            cast_time_seconds: 0.5,
            cooldown_seconds: 3.0,
            acquire: LowestHealthAlly,
            kind: EffectOverTimeTarget(
                payload: Payload(amount: 6, polarity: Beneficial),
                interval_seconds: 1.0,
                duration_seconds: 3.0,
            ),
        ),
        SpellConfig(
            name: "spark",
            range: 10.0,
            cast_time_seconds: 0.3,
            cooldown_seconds: 5.0,
            acquire: ClosestEnemy,
            kind: Chain(
                payload: Payload(amount: 10, polarity: Harmful),
                hops: 4,
                radius: 5.0,
                hop_delay_seconds: 0.1,
                projectile_speed: 30.0,
            ),
        ),
        SpellConfig(
            name: "wolves",
            range: 6.0,
            cast_time_seconds: 1.0,
            cooldown_seconds: 20.0,
            acquire: None,
            kind: Summon(prefab: "wolf", count: 2),
        ),
    ],
)
"#;

/// Parse [`SAMPLE_TABLES`].
///
/// # Panics
///
/// Panics if the sample tables no longer parse.
#[must_use]
pub fn sample_tables() -> CombatTables {
    CombatTables::from_ron_str(SAMPLE_TABLES).expect("sample tables parse")
}

/// Build a two-sided skirmish: `per_side` agents for each faction facing
/// each other across a 20-unit gap, with mixed weapons and spell books.
///
/// # Panics
///
/// Panics if the sample tables or the config are invalid.
#[must_use]
pub fn skirmish(config: SimulationConfig, per_side: u32) -> Simulation {
    let tables = sample_tables();
    let weapons = ["sword", "greatsword", "bow"].map(|name| tables.weapon_id(name).ok());
    let books = [
        vec![],
        vec!["mend"],
        vec!["firebolt", "spark"],
        vec!["blaze"],
    ]
    .map(|names| {
        names
            .into_iter()
            .filter_map(|name| tables.spell_id(name).ok())
            .collect::<Vec<_>>()
    });

    let mut sim = Simulation::new(config, tables).expect("valid skirmish config");
    for (faction, side) in [(Faction::Ally, -1), (Faction::Enemy, 1)] {
        for i in 0..per_side {
            let column = (i / 8) as i32;
            let row = (i % 8) as i32;
            let position = Vec2Fixed::from_num(side * (10 + column * 2), row * 2 - 7);
            let mut params = AgentSpawnParams::new(faction, position)
                .with_facing(Vec2Fixed::from_num(-side, 0))
                .with_health(100)
                .with_spells(books[i as usize % books.len()].clone());
            if let Some(weapon) = weapons[i as usize % weapons.len()] {
                params = params.with_weapon(weapon);
            }
            sim.spawn_agent(params).expect("skirmish agent spawns");
        }
    }
    sim
}

/// Stand-in for the decision layer and presentation.
///
/// Each [`step`](Self::step) runs the aggressive decision layer, ticks the
/// simulation, then hands the frame to an instant-impact [`Playback`].
#[derive(Debug, Clone, Default)]
pub struct Autopilot {
    playback: Playback,
}

impl Autopilot {
    /// Create an autopilot with default tuning.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder: arm summoned agents.
    #[must_use]
    pub fn with_summon_weapon(mut self, weapon: WeaponId) -> Self {
        self.playback = self.playback.with_summon_weapon(weapon);
        self
    }

    /// Destinations locomotion is currently walking towards.
    #[must_use]
    pub fn destinations(&self) -> &BTreeMap<AgentId, Vec2Fixed> {
        self.playback.destinations()
    }

    /// Issue requests, tick once and play the frame back.
    pub fn step(&mut self, sim: &mut Simulation) -> TickEvents {
        aggressive(sim);
        let events = sim.tick();
        self.playback.present(sim, &events);
        sim.acknowledge_frame(events.tick);
        trace!(tick = events.tick, damage = events.damage.len(), "Autopilot step");
        events
    }

    /// Run `ticks` steps, returning every tick's events.
    pub fn run(&mut self, sim: &mut Simulation, ticks: u64) -> Vec<TickEvents> {
        (0..ticks).map(|_| self.step(sim)).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sample_tables_parse() {
        let tables = sample_tables();
        assert_eq!(tables.weapons().len(), 3);
        assert_eq!(tables.spells().len(), 5);
    }

    #[test]
    fn test_skirmish_layout() {
        let sim = skirmish(SimulationConfig::default(), 10);
        assert_eq!(sim.agents().len(), 20);
        let allies = sim
            .agents()
            .iter()
            .filter(|a| a.faction == Faction::Ally)
            .count();
        assert_eq!(allies, 10);
    }

    #[test]
    fn test_autopilot_closes_distance_and_fights() {
        let mut sim = skirmish(SimulationConfig::default().with_parallel(false), 4);
        let mut pilot = Autopilot::new();
        let events = pilot.run(&mut sim, 200);

        let damage: usize = events.iter().map(|e| e.damage.len()).sum();
        assert!(damage > 0, "no damage dealt in 10 seconds");
        assert_eq!(sim.last_acknowledged_frame(), Some(199));
    }
}
