//! Weapon definitions for data-driven attack profiles.

use serde::{Deserialize, Serialize};

use crate::error::{CombatError, Result};
use crate::factions::{Faction, FactionMask};
use crate::math::{cone_cos_squared, fixed_decimal, option_fixed_decimal, Fixed, Vec2Fixed};

/// Index of a weapon in [`CombatTables`](super::CombatTables).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct WeaponId(pub u16);

/// Local offset of a projectile's spawn point relative to the wielder.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct MuzzleOffset {
    /// Distance along the facing direction.
    #[serde(default, with = "fixed_decimal")]
    pub forward: Fixed,
    /// Distance along the right-hand perpendicular.
    #[serde(default, with = "fixed_decimal")]
    pub right: Fixed,
    /// Height above the ground plane, forwarded to presentation.
    #[serde(default, with = "fixed_decimal")]
    pub height: Fixed,
}

impl MuzzleOffset {
    /// Spawn point for a wielder at `position` firing along unit `direction`.
    #[must_use]
    pub fn world_origin(&self, position: Vec2Fixed, direction: Vec2Fixed) -> Vec2Fixed {
        position + direction.scale(self.forward) + direction.right().scale(self.right)
    }
}

/// Melee swing geometry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MeleeProfile {
    /// Half-angle of the hit cone, in degrees.
    #[serde(with = "fixed_decimal")]
    pub half_angle_degrees: Fixed,
    /// Maximum number of agents one swing can damage.
    pub max_targets: u32,
    /// Post-swing window during which the wielder is movement-locked.
    #[serde(default, with = "fixed_decimal")]
    pub swing_lock_seconds: Fixed,
    /// Cached `cos²(half_angle)`, filled in by [`MeleeProfile::prepare`].
    #[serde(skip)]
    cos_half_angle_sq: Fixed,
}

impl MeleeProfile {
    /// Create a melee profile with its cone cache prepared.
    #[must_use]
    pub fn new(half_angle_degrees: Fixed, max_targets: u32, swing_lock_seconds: Fixed) -> Self {
        let mut profile = Self {
            half_angle_degrees,
            max_targets,
            swing_lock_seconds,
            cos_half_angle_sq: Fixed::ZERO,
        };
        profile.prepare();
        profile
    }

    /// Recompute the cone cache from the half-angle.
    pub fn prepare(&mut self) {
        self.cos_half_angle_sq = cone_cos_squared(self.half_angle_degrees);
    }

    /// Squared cosine of the cone half-angle.
    #[must_use]
    pub const fn cos_half_angle_sq(&self) -> Fixed {
        self.cos_half_angle_sq
    }
}

/// Ranged attack parameters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RangedProfile {
    /// Delay between an accepted request and the projectile release.
    #[serde(with = "fixed_decimal")]
    pub windup_seconds: Fixed,
    /// Projectile speed in world units per second.
    #[serde(with = "fixed_decimal")]
    pub projectile_speed: Fixed,
    /// Distance after which the projectile expires.
    #[serde(with = "fixed_decimal")]
    pub max_distance: Fixed,
    /// Spawn offset relative to the wielder.
    #[serde(default)]
    pub muzzle: MuzzleOffset,
    /// Whether the projectile continues through its first hit.
    #[serde(default)]
    pub pierce: bool,
}

/// Damage of one weapon hit, before the crit roll.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Strike {
    /// Damage on a normal hit.
    pub damage: u32,
    /// Probability in `[0, 1]` of a crit.
    pub crit_chance: Fixed,
    /// Damage multiplier on a crit.
    pub crit_multiplier: Fixed,
}

impl Strike {
    /// Damage dealt given a uniform roll in `[0, 1)`, and whether it crit.
    #[must_use]
    pub fn damage_for_roll(&self, roll: Fixed) -> (u32, bool) {
        if roll < self.crit_chance {
            let damage = (Fixed::from_num(self.damage) * self.crit_multiplier).to_num::<u32>();
            (damage, true)
        } else {
            (self.damage, false)
        }
    }
}

/// How a weapon delivers its damage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum WeaponStyle {
    /// Immediate cone sweep.
    Melee(MeleeProfile),
    /// Windup followed by a projectile spawn request.
    Ranged(RangedProfile),
}

/// Data-driven weapon definition.
///
/// # Example RON
///
/// ```ron
/// WeaponConfig(
///     name: "longsword",
///     range: 2.0,
///     damage: 12,
///     cooldown_seconds: 1.2,
///     cooldown_jitter_seconds: 0.1,
///     crit_chance: 0.1,
///     crit_multiplier: 2.0,
///     style: Melee(MeleeProfile(
///         half_angle_degrees: 60.0,
///         max_targets: 3,
///         swing_lock_seconds: 0.4,
///     )),
/// )
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WeaponConfig {
    /// Unique name, referenced from scenarios.
    pub name: String,

    /// Effective range. Requests are accepted within `range² × slack`.
    #[serde(with = "fixed_decimal")]
    pub range: Fixed,

    /// Auto-targeting radius (defaults to twice the range).
    #[serde(default, with = "option_fixed_decimal")]
    pub acquire_range: Option<Fixed>,

    /// Damage per hit before crits.
    pub damage: u32,

    /// Base cooldown between attacks.
    #[serde(with = "fixed_decimal")]
    pub cooldown_seconds: Fixed,

    /// Upper bound of the random extra cooldown.
    #[serde(default, with = "fixed_decimal")]
    pub cooldown_jitter_seconds: Fixed,

    /// Probability in `[0, 1]` that a hit crits.
    #[serde(default, with = "fixed_decimal")]
    pub crit_chance: Fixed,

    /// Damage multiplier applied on a crit.
    #[serde(default = "default_crit_multiplier", with = "fixed_decimal")]
    pub crit_multiplier: Fixed,

    /// Factions the weapon hits first (defaults to the wielder's opponents).
    #[serde(default)]
    pub hit_mask: Option<FactionMask>,

    /// Melee or ranged delivery.
    pub style: WeaponStyle,
}

fn default_crit_multiplier() -> Fixed {
    Fixed::ONE
}

impl WeaponConfig {
    /// Radius within which the wielder auto-acquires targets.
    #[must_use]
    pub fn acquire_range(&self) -> Fixed {
        self.acquire_range
            .unwrap_or_else(|| self.range * Fixed::from_num(2))
    }

    /// Primary hit mask for a wielder of `faction`.
    #[must_use]
    pub fn primary_mask(&self, faction: Faction) -> FactionMask {
        self.hit_mask.unwrap_or(faction.opposing().mask())
    }

    /// Whether this is a melee weapon.
    #[must_use]
    pub const fn is_melee(&self) -> bool {
        matches!(self.style, WeaponStyle::Melee(_))
    }

    /// Damage and crit parameters of one hit.
    #[must_use]
    pub const fn strike(&self) -> Strike {
        Strike {
            damage: self.damage,
            crit_chance: self.crit_chance,
            crit_multiplier: self.crit_multiplier,
        }
    }

    /// Fill in derived values (cone cache).
    pub fn prepare(&mut self) {
        if let WeaponStyle::Melee(profile) = &mut self.style {
            profile.prepare();
        }
    }

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
        if self.acquire_range.is_some_and(|r| r < self.range) {
            return fail("acquire_range must be at least range");
        }
        if self.cooldown_seconds < Fixed::ZERO || self.cooldown_jitter_seconds < Fixed::ZERO {
            return fail("cooldown values must be non-negative");
        }
        if self.crit_chance < Fixed::ZERO || self.crit_chance > Fixed::ONE {
            return fail("crit_chance must be within [0, 1]");
        }
        if self.crit_multiplier < Fixed::ONE {
            return fail("crit_multiplier must be at least 1");
        }
        if self.hit_mask.is_some_and(|m| m.is_empty()) {
            return fail("hit_mask must name at least one faction");
        }

        match &self.style {
            WeaponStyle::Melee(melee) => {
                if melee.half_angle_degrees <= Fixed::ZERO
                    || melee.half_angle_degrees > Fixed::from_num(180)
                {
                    return fail("half_angle_degrees must be within (0, 180]");
                }
                if melee.max_targets == 0 {
                    return fail("max_targets must be at least 1");
                }
                if melee.swing_lock_seconds < Fixed::ZERO {
                    return fail("swing_lock_seconds must be non-negative");
                }
            }
            WeaponStyle::Ranged(ranged) => {
                if ranged.windup_seconds < Fixed::ZERO {
                    return fail("windup_seconds must be non-negative");
                }
                if ranged.projectile_speed <= Fixed::ZERO {
                    return fail("projectile_speed must be positive");
                }
                if ranged.max_distance <= Fixed::ZERO {
                    return fail("max_distance must be positive");
                }
            }
        }

        Ok(())
    }
}
