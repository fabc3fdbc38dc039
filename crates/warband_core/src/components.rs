//! Per-agent component definitions.
//!
//! Components are pure data with minimal behavior. An agent is composed of
//! the components in [`Agent`](crate::simulation::Agent); optional ones are
//! `Some` only for agents that have the capability.

use serde::{Deserialize, Serialize};

use crate::data::{SpellId, WeaponId};
use crate::math::{fixed_serde, option_fixed_serde, Fixed, Vec2Fixed};

/// Unique identifier for agents. Assigned monotonically, never reused.
pub type AgentId = u64;

/// Planar position and facing, written by the external locomotion layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Pose {
    /// Position on the ground plane.
    pub position: Vec2Fixed,
    /// Unit facing vector on the ground plane.
    pub facing: Vec2Fixed,
}

impl Pose {
    /// Pose at `position` facing the default forward direction.
    #[must_use]
    pub const fn at(position: Vec2Fixed) -> Self {
        Self {
            position,
            facing: Vec2Fixed::FORWARD,
        }
    }

    /// Builder: set the facing (normalized; zero keeps the default forward).
    #[must_use]
    pub fn with_facing(mut self, facing: Vec2Fixed) -> Self {
        let normalized = facing.normalize();
        self.facing = if normalized.is_zero() {
            Vec2Fixed::FORWARD
        } else {
            normalized
        };
        self
    }
}

/// Health component for damageable agents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Health {
    /// Current health points.
    pub current: u32,
    /// Maximum health points.
    pub max: u32,
}

impl Health {
    /// Create a new health component at full health.
    #[must_use]
    pub const fn new(max: u32) -> Self {
        Self { current: max, max }
    }

    /// Check if health has reached zero.
    #[must_use]
    pub const fn is_depleted(&self) -> bool {
        self.current == 0
    }

    /// Current health as a fraction of max, in `[0, 1]`.
    #[must_use]
    pub fn fraction(&self) -> Fixed {
        if self.max == 0 {
            return Fixed::ZERO;
        }
        Fixed::from_num(self.current) / Fixed::from_num(self.max)
    }

    /// Apply damage, returning the amount actually removed.
    pub fn apply_damage(&mut self, amount: u32) -> u32 {
        let applied = amount.min(self.current);
        self.current -= applied;
        applied
    }

    /// Heal up to max, returning the amount actually restored.
    pub fn heal(&mut self, amount: u32) -> u32 {
        let applied = amount.min(self.max - self.current);
        self.current += applied;
        applied
    }
}

/// Life-cycle of an agent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Vitality {
    /// Active and targetable.
    Alive,
    /// Health reached zero; removed once `despawn_at` passes.
    Dying {
        /// Simulation time at which the agent is removed.
        #[serde(with = "fixed_serde")]
        despawn_at: Fixed,
    },
}

impl Vitality {
    /// Whether the agent is still alive.
    #[must_use]
    pub const fn is_alive(self) -> bool {
        matches!(self, Self::Alive)
    }
}

/// Speed multipliers for attacks and casts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CombatStats {
    /// Divides attack cooldowns and ranged windups.
    #[serde(with = "fixed_serde")]
    pub attack_speed: Fixed,
    /// Divides spell cast times.
    #[serde(with = "fixed_serde")]
    pub cast_speed: Fixed,
}

impl Default for CombatStats {
    fn default() -> Self {
        Self {
            attack_speed: Fixed::ONE,
            cast_speed: Fixed::ONE,
        }
    }
}

impl CombatStats {
    /// Builder: set the attack speed multiplier.
    #[must_use]
    pub const fn with_attack_speed(mut self, attack_speed: Fixed) -> Self {
        self.attack_speed = attack_speed;
        self
    }

    /// Builder: set the cast speed multiplier.
    #[must_use]
    pub const fn with_cast_speed(mut self, cast_speed: Fixed) -> Self {
        self.cast_speed = cast_speed;
        self
    }
}

/// Earliest time an action may repeat. Only ever moves forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct Cooldown {
    /// Simulation time at which the action becomes available.
    #[serde(with = "fixed_serde")]
    pub next_allowed: Fixed,
}

impl Cooldown {
    /// Whether the action is available at `now`.
    #[must_use]
    pub fn is_ready(&self, now: Fixed) -> bool {
        now >= self.next_allowed
    }

    /// Push the cooldown out to `until`; earlier values are ignored.
    pub fn extend_to(&mut self, until: Fixed) {
        self.next_allowed = self.next_allowed.max(until);
    }
}

/// A ranged attack between acceptance and release.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AttackWindup {
    /// Simulation time at which the projectile is released.
    #[serde(with = "fixed_serde")]
    pub release_at: Fixed,
    /// Target at acceptance.
    pub target: AgentId,
    /// Target position at acceptance, used if the target is gone at release.
    pub aim_point: Vec2Fixed,
}

/// Weapon state for agents that can attack.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct WeaponLoadout {
    /// Equipped weapon.
    pub weapon: WeaponId,
    /// Attack cooldown.
    pub cooldown: Cooldown,
    /// In-flight ranged windup.
    pub windup: Option<AttackWindup>,
    /// End of the melee post-swing window.
    #[serde(with = "fixed_serde")]
    pub action_lock_until: Fixed,
    /// End of the post-cast weapon lock.
    #[serde(with = "fixed_serde")]
    pub weapon_lock_until: Fixed,
}

impl WeaponLoadout {
    /// Create a ready-to-fire loadout.
    #[must_use]
    pub const fn new(weapon: WeaponId) -> Self {
        Self {
            weapon,
            cooldown: Cooldown {
                next_allowed: Fixed::ZERO,
            },
            windup: None,
            action_lock_until: Fixed::ZERO,
            weapon_lock_until: Fixed::ZERO,
        }
    }
}

/// What a cast is aimed at.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CastTarget {
    /// A specific agent, with its position at selection time.
    Agent {
        /// Target agent.
        target: AgentId,
        /// Target position at selection time.
        point: Vec2Fixed,
    },
    /// A world point.
    Point(Vec2Fixed),
}

impl CastTarget {
    /// Aim point of the cast.
    #[must_use]
    pub const fn point(&self) -> Vec2Fixed {
        match self {
            Self::Agent { point, .. } | Self::Point(point) => *point,
        }
    }

    /// Target agent, if the cast has one.
    #[must_use]
    pub const fn agent(&self) -> Option<AgentId> {
        match self {
            Self::Agent { target, .. } => Some(*target),
            Self::Point(_) => None,
        }
    }
}

/// A spell between acceptance and release.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SpellWindup {
    /// Simulation time at which the spell fires.
    #[serde(with = "fixed_serde")]
    pub release_at: Fixed,
    /// Spell book slot being cast.
    pub slot: u8,
    /// Aim of the cast.
    pub target: CastTarget,
}

/// One spell in a spell book.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SpellSlot {
    /// Spell in this slot.
    pub spell: SpellId,
    /// Per-slot cooldown.
    pub cooldown: Cooldown,
}

/// Spell state for agents that can cast.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct SpellBook {
    /// Known spells.
    pub slots: Vec<SpellSlot>,
    /// In-flight cast.
    pub windup: Option<SpellWindup>,
}

impl SpellBook {
    /// Create a spell book with every slot ready.
    #[must_use]
    pub fn new(spells: impl IntoIterator<Item = SpellId>) -> Self {
        Self {
            slots: spells
                .into_iter()
                .map(|spell| SpellSlot {
                    spell,
                    cooldown: Cooldown::default(),
                })
                .collect(),
            windup: None,
        }
    }

    /// Look up a slot.
    #[must_use]
    pub fn slot(&self, index: u8) -> Option<&SpellSlot> {
        self.slots.get(usize::from(index))
    }
}

/// Active move-to order, tracked until locomotion reports arrival.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MoveOrder {
    /// Requested destination.
    pub destination: Vec2Fixed,
    /// Last remaining distance reported by locomotion.
    #[serde(default, with = "option_fixed_serde")]
    pub remaining: Option<Fixed>,
    /// A stop was published while locked; the destination must be re-sent.
    #[serde(default)]
    pub halted: bool,
}

impl MoveOrder {
    /// New order towards `destination`.
    #[must_use]
    pub const fn new(destination: Vec2Fixed) -> Self {
        Self {
            destination,
            remaining: None,
            halted: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_health_damage_and_heal_clamp() {
        let mut health = Health::new(100);
        assert_eq!(health.apply_damage(30), 30);
        assert_eq!(health.current, 70);
        assert_eq!(health.heal(50), 30);
        assert_eq!(health.current, 100);
        assert_eq!(health.apply_damage(500), 100);
        assert!(health.is_depleted());
    }

    #[test]
    fn test_health_fraction() {
        let mut health = Health::new(200);
        health.apply_damage(50);
        assert_eq!(health.fraction(), Fixed::from_num(0.75));
        assert_eq!(Health::new(0).fraction(), Fixed::ZERO);
    }

    #[test]
    fn test_cooldown_only_moves_forward() {
        let mut cooldown = Cooldown::default();
        cooldown.extend_to(Fixed::from_num(3));
        cooldown.extend_to(Fixed::from_num(1));
        assert_eq!(cooldown.next_allowed, Fixed::from_num(3));
        assert!(!cooldown.is_ready(Fixed::from_num(2)));
        assert!(cooldown.is_ready(Fixed::from_num(3)));
    }

    #[test]
    fn test_pose_facing_normalized() {
        let pose = Pose::at(Vec2Fixed::ZERO).with_facing(Vec2Fixed::from_num(5, 0));
        assert_eq!(pose.facing, Vec2Fixed::from_num(1, 0));
        let pose = Pose::at(Vec2Fixed::ZERO).with_facing(Vec2Fixed::ZERO);
        assert_eq!(pose.facing, Vec2Fixed::FORWARD);
    }

    #[test]
    fn test_cast_target_point() {
        let point = Vec2Fixed::from_num(3, 4);
        let cast = CastTarget::Agent { target: 9, point };
        assert_eq!(cast.point(), point);
        assert_eq!(cast.agent(), Some(9));
        assert_eq!(CastTarget::Point(point).agent(), None);
    }
}
