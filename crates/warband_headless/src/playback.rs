//! Instant-impact presentation.
//!
//! Stands in for a game engine on the far side of the bridge: facings snap,
//! destinations are walked at a fixed speed, projectiles land on the tick
//! they are requested, and summons appear next to their summoner.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use tracing::trace;

use warband_core::bridge::{Impact, ProjectileSource, ProjectileSpawnRequest};
use warband_core::components::{AgentId, Pose};
use warband_core::data::WeaponId;
use warband_core::math::{fixed_decimal, Fixed, Vec2Fixed};
use warband_core::simulation::{AgentSpawnParams, Simulation, TickEvents};

/// Tuning for [`Playback`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlaybackSettings {
    /// Walking speed, world units per second.
    #[serde(with = "fixed_decimal")]
    pub move_speed: Fixed,
    /// Health of summoned agents.
    pub summon_health: u32,
    /// Weapon name given to summoned agents.
    pub summon_weapon: Option<String>,
    /// Radius of line projectiles.
    #[serde(with = "fixed_decimal")]
    pub line_radius: Fixed,
}

impl Default for PlaybackSettings {
    fn default() -> Self {
        Self {
            move_speed: Fixed::from_num(4),
            summon_health: 40,
            summon_weapon: None,
            line_radius: Fixed::from_num(1) / Fixed::from_num(2),
        }
    }
}

/// Counters for what the presentation side did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlaybackStats {
    /// Projectile requests played.
    pub projectiles: u64,
    /// Impacts reported back into the simulation.
    pub impacts: u64,
    /// Summoned agents spawned.
    pub summoned: u64,
}

/// Presentation stand-in that plays one bridge frame per tick.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Playback {
    /// Walking speed, world units per second.
    pub move_speed: Fixed,
    /// Health of summoned agents.
    pub summon_health: u32,
    /// Weapon given to summoned agents.
    pub summon_weapon: Option<WeaponId>,
    /// Radius of line projectiles.
    pub line_radius: Fixed,
    destinations: BTreeMap<AgentId, Vec2Fixed>,
    stats: PlaybackStats,
}

impl Default for Playback {
    fn default() -> Self {
        let settings = PlaybackSettings::default();
        Self {
            move_speed: settings.move_speed,
            summon_health: settings.summon_health,
            summon_weapon: None,
            line_radius: settings.line_radius,
            destinations: BTreeMap::new(),
            stats: PlaybackStats::default(),
        }
    }
}

impl Playback {
    /// Playback with default tuning.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Playback tuned by `settings`, with the summon weapon already resolved.
    #[must_use]
    pub fn from_settings(settings: &PlaybackSettings, summon_weapon: Option<WeaponId>) -> Self {
        Self {
            move_speed: settings.move_speed,
            summon_health: settings.summon_health,
            summon_weapon,
            line_radius: settings.line_radius,
            ..Self::default()
        }
    }

    /// Builder: arm summoned agents.
    #[must_use]
    pub fn with_summon_weapon(mut self, weapon: WeaponId) -> Self {
        self.summon_weapon = Some(weapon);
        self
    }

    /// Destinations locomotion is currently walking towards.
    #[must_use]
    pub fn destinations(&self) -> &BTreeMap<AgentId, Vec2Fixed> {
        &self.destinations
    }

    /// Running counters.
    #[must_use]
    pub fn stats(&self) -> PlaybackStats {
        self.stats
    }

    /// Play back one tick's frame.
    pub fn present(&mut self, sim: &mut Simulation, events: &TickEvents) {
        let frame = &events.bridge;

        for facing in frame.facings.iter().filter(|f| f.valid) {
            if let Some(pose) = sim.agent(facing.agent).map(|a| a.pose) {
                let direction = facing.point - pose.position;
                let pose = Pose {
                    facing: direction,
                    ..pose
                };
                if let Err(error) = sim.update_pose(facing.agent, pose) {
                    trace!(agent = facing.agent, %error, "Facing dropped");
                }
            }
        }

        for destination in &frame.destinations {
            if destination.valid {
                self.destinations.insert(destination.agent, destination.position);
            } else {
                self.destinations.remove(&destination.agent);
            }
        }

        for projectile in &frame.projectiles {
            self.stats.projectiles += 1;
            for impact in self.impacts_of(sim, projectile) {
                self.stats.impacts += 1;
                sim.report_impact(impact);
            }
        }

        for summon in &frame.summons {
            for i in 0..summon.count {
                let offset = Vec2Fixed::from_num(i as i32, 0);
                let mut params = AgentSpawnParams::new(summon.faction, summon.position + offset)
                    .with_health(self.summon_health)
                    .with_summoner(summon.summoner);
                if let Some(weapon) = self.summon_weapon {
                    params = params.with_weapon(weapon);
                }
                match sim.spawn_agent(params) {
                    Ok(_) => self.stats.summoned += 1,
                    Err(_) => trace!(summoner = summon.summoner, "Summoner gone, summon dropped"),
                }
            }
        }

        self.walk(sim, events);
    }

    fn impacts_of(&self, sim: &Simulation, projectile: &ProjectileSpawnRequest) -> Vec<Impact> {
        let impact = |target| Impact {
            source: projectile.shooter,
            target,
            amount: projectile.amount,
            polarity: projectile.polarity,
        };

        match (projectile.source, projectile.target) {
            (ProjectileSource::Weapon | ProjectileSource::ChainHop { .. }, Some(target)) => {
                vec![impact(target)]
            }
            _ => {
                let Some(shooter_root) = sim.agent(projectile.shooter).map(|a| a.root) else {
                    return Vec::new();
                };
                let end = projectile.origin + projectile.direction.scale(projectile.max_distance);
                let mut hits = sim.query_corridor(
                    projectile.origin,
                    end,
                    self.line_radius,
                    projectile.polarity.target_mask(projectile.faction),
                    Some(shooter_root),
                );
                if !projectile.pierce {
                    hits.truncate(1);
                }
                hits.into_iter().map(impact).collect()
            }
        }
    }

    fn walk(&mut self, sim: &mut Simulation, events: &TickEvents) {
        let step = self.move_speed / Fixed::from_num(sim.config().tick_rate);
        let mut arrived = Vec::new();

        for (&id, &destination) in &self.destinations {
            if events.bridge.lock_of(id).is_locked() {
                continue;
            }
            let Some(agent) = sim.agent(id) else {
                arrived.push(id);
                continue;
            };

            let pose = agent.pose;
            let delta = destination - pose.position;
            let distance = delta.length();
            let (position, remaining) = if distance <= step {
                (destination, Fixed::ZERO)
            } else {
                (pose.position + delta.normalize().scale(step), distance - step)
            };

            if let Err(error) = sim.update_pose(id, Pose { position, ..pose }) {
                trace!(agent = id, %error, "Step dropped");
            }
            if let Err(error) = sim.report_locomotion(id, remaining) {
                trace!(agent = id, %error, "Locomotion report dropped");
            }
            if remaining == Fixed::ZERO {
                arrived.push(id);
            }
        }

        for id in arrived {
            self.destinations.remove(&id);
        }
    }
}
