//! Spell definitions for data-driven casting.

use serde::{Deserialize, Serialize};

use super::weapon_data::MuzzleOffset;
use crate::error::{CombatError, Result};
use crate::factions::{Faction, FactionMask};
use crate::math::{fixed_decimal, Fixed};

/// Index of a spell in [`CombatTables`](super::CombatTables).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SpellId(pub u16);

/// Whether an effect hurts or helps the agents it lands on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Polarity {
    /// Damage, applied to the caster's opponents.
    Harmful,
    /// Healing, applied to the caster's own faction.
    Beneficial,
}

impl Polarity {
    /// Factions an effect of this polarity applies to when cast by `caster`.
    #[must_use]
    pub const fn target_mask(self, caster: Faction) -> FactionMask {
        match self {
            Self::Harmful => caster.opposing().mask(),
            Self::Beneficial => caster.mask(),
        }
    }
}

/// Target selection policy used when a cast decision is requested.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AcquireMode {
    /// Nearest opponent within range.
    ClosestEnemy,
    /// Point covering the most opponents within the effect radius.
    DensestEnemyCluster,
    /// Same-faction agent with the lowest health fraction.
    LowestHealthAlly,
    /// No selection: the caster itself (or its position).
    None,
}

/// Amount and polarity carried by an effect.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Payload {
    /// Damage or heal amount.
    pub amount: u32,
    /// Damage or heal.
    pub polarity: Polarity,
}

/// Whether a spell resolves against an agent or a point.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TargetShape {
    /// Needs a specific agent; fizzles if the agent is gone at release.
    Single,
    /// Needs a world point.
    Point,
}

/// Per-kind resolution parameters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum SpellKind {
    /// Ask presentation to spawn a prefab at the aim point.
    Summon {
        /// Prefab identifier understood by presentation.
        prefab: String,
        /// Number of copies.
        #[serde(default = "default_summon_count")]
        count: u32,
    },
    /// Straight piercing projectile towards the aim point.
    ProjectileLine {
        /// Damage per agent hit.
        damage: u32,
        /// Projectile speed in world units per second.
        #[serde(with = "fixed_decimal")]
        projectile_speed: Fixed,
        /// Distance after which the projectile expires.
        #[serde(with = "fixed_decimal")]
        max_distance: Fixed,
        /// Spawn offset relative to the caster.
        #[serde(default)]
        muzzle: MuzzleOffset,
        /// Whether the projectile continues through hits.
        #[serde(default = "default_pierce")]
        pierce: bool,
    },
    /// Periodic effect bound to one agent.
    EffectOverTimeTarget {
        /// Amount per pulse.
        payload: Payload,
        /// Seconds between pulses.
        #[serde(with = "fixed_decimal")]
        interval_seconds: Fixed,
        /// Total lifetime.
        #[serde(with = "fixed_decimal")]
        duration_seconds: Fixed,
    },
    /// Periodic effect over a circle at a point.
    EffectOverTimeArea {
        /// Amount per pulse per agent.
        payload: Payload,
        /// Circle radius.
        #[serde(with = "fixed_decimal")]
        radius: Fixed,
        /// Seconds between pulses.
        #[serde(with = "fixed_decimal")]
        interval_seconds: Fixed,
        /// Total lifetime.
        #[serde(with = "fixed_decimal")]
        duration_seconds: Fixed,
    },
    /// Bouncing projectile that hops between nearby agents.
    Chain {
        /// Amount per hop.
        payload: Payload,
        /// Total spawn requests, including the first.
        hops: u32,
        /// Search radius around the current target for the next hop.
        #[serde(with = "fixed_decimal")]
        radius: Fixed,
        /// Extra delay between hops.
        #[serde(default, with = "fixed_decimal")]
        hop_delay_seconds: Fixed,
        /// Hop projectile speed in world units per second.
        #[serde(with = "fixed_decimal")]
        projectile_speed: Fixed,
    },
}

fn default_summon_count() -> u32 {
    1
}

fn default_pierce() -> bool {
    true
}

impl SpellKind {
    /// Whether this kind resolves against an agent or a point.
    #[must_use]
    pub const fn shape(&self) -> TargetShape {
        match self {
            Self::EffectOverTimeTarget { .. } | Self::Chain { .. } => TargetShape::Single,
            Self::Summon { .. } | Self::ProjectileLine { .. } | Self::EffectOverTimeArea { .. } => {
                TargetShape::Point
            }
        }
    }

    /// Radius used to score cluster targets.
    #[must_use]
    pub const fn effect_radius(&self) -> Option<Fixed> {
        match self {
            Self::EffectOverTimeArea { radius, .. } | Self::Chain { radius, .. } => Some(*radius),
            _ => None,
        }
    }

    /// Polarity of the effect, if it has one.
    #[must_use]
    pub const fn polarity(&self) -> Option<Polarity> {
        match self {
            Self::EffectOverTimeTarget { payload, .. }
            | Self::EffectOverTimeArea { payload, .. }
            | Self::Chain { payload, .. } => Some(payload.polarity),
            Self::ProjectileLine { .. } => Some(Polarity::Harmful),
            Self::Summon { .. } => None,
        }
    }
}

/// Data-driven spell definition.
///
/// # Example RON
///
/// ```ron
/// SpellConfig(
///     name: "chain_lightning",
///     range: 12.0,
///     cast_time_seconds: 0.6,
///     cooldown_seconds: 6.0,
///     post_cast_attack_lock_seconds: 0.3,
///     acquire: ClosestEnemy,
///     kind: Chain(
///         payload: Payload(amount: 18, polarity: Harmful),
///         hops: 4,
///         radius: 6.0,
///         hop_delay_seconds: 0.1,
///         projectile_speed: 30.0,
///     ),
/// )
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpellConfig {
    /// Unique name, referenced from scenarios.
    pub name: String,

    /// Maximum selection distance from the caster.
    #[serde(with = "fixed_decimal")]
    pub range: Fixed,

    /// Windup before the spell fires.
    #[serde(with = "fixed_decimal")]
    pub cast_time_seconds: Fixed,

    /// Cooldown started when the spell fires.
    #[serde(with = "fixed_decimal")]
    pub cooldown_seconds: Fixed,

    /// Window after release during which weapon attacks are refused.
    #[serde(default, with = "fixed_decimal")]
    pub post_cast_attack_lock_seconds: Fixed,

    /// Target selection policy.
    pub acquire: AcquireMode,

    /// Per-kind resolution.
    pub kind: SpellKind,
}

impl SpellConfig {
    /// Check numeric ranges.
    ///
    /// # Errors
    ///
    /// Returns [`CombatError::InvalidConfig`] naming the first bad field.
    pub fn validate(&self) -> Result<()> {
        let fail = |reason: &str| {
            Err(CombatError::InvalidConfig {
                entry: self.name.clone(),
                reason: reason.to_string(),
            })
        };

        if self.range <= Fixed::ZERO {
            return fail("range must be positive");
        }
        if self.cast_time_seconds < Fixed::ZERO
            || self.cooldown_seconds < Fixed::ZERO
            || self.post_cast_attack_lock_seconds < Fixed::ZERO
        {
            return fail("timings must be non-negative");
        }
        if self.acquire == AcquireMode::DensestEnemyCluster && self.kind.effect_radius().is_none()
        {
            return fail("DensestEnemyCluster needs a kind with an effect radius");
        }

        match &self.kind {
            SpellKind::Summon { prefab, count } => {
                if prefab.is_empty() {
                    return fail("prefab must not be empty");
                }
                if *count == 0 {
                    return fail("count must be at least 1");
                }
            }
            SpellKind::ProjectileLine {
                projectile_speed,
                max_distance,
                ..
            } => {
                if *projectile_speed <= Fixed::ZERO || *max_distance <= Fixed::ZERO {
                    return fail("projectile_speed and max_distance must be positive");
                }
            }
            SpellKind::EffectOverTimeTarget {
                interval_seconds,
                duration_seconds,
                ..
            } => {
                if *interval_seconds <= Fixed::ZERO || *duration_seconds <= Fixed::ZERO {
                    return fail("interval and duration must be positive");
                }
            }
            SpellKind::EffectOverTimeArea {
                radius,
                interval_seconds,
                duration_seconds,
                ..
            } => {
                if *radius <= Fixed::ZERO {
                    return fail("radius must be positive");
                }
                if *interval_seconds <= Fixed::ZERO || *duration_seconds <= Fixed::ZERO {
                    return fail("interval and duration must be positive");
                }
            }
            SpellKind::Chain {
                hops,
                radius,
                hop_delay_seconds,
                projectile_speed,
                ..
            } => {
                if *hops == 0 {
                    return fail("hops must be at least 1");
                }
                if *radius <= Fixed::ZERO || *projectile_speed <= Fixed::ZERO {
                    return fail("radius and projectile_speed must be positive");
                }
                if *hop_delay_seconds < Fixed::ZERO {
                    return fail("hop_delay_seconds must be non-negative");
                }
            }
        }

        Ok(())
    }
}
