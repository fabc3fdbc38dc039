//! Area and over-time effects.
//!
//! An effect pulses every `interval` until its remaining duration reaches
//! zero. The first pulse lands one interval after placement. Area effects
//! hit every agent of the polarity's faction inside the radius; targeted
//! effects hit their bound agent and end early if it becomes invalid.

use serde::{Deserialize, Serialize};

use crate::commands::{CommandBuffer, WorldCommand};
use crate::components::AgentId;
use crate::data::{Payload, Polarity, SpellId};
use crate::factions::Faction;
use crate::math::{fixed_serde, Fixed, Vec2Fixed};
use crate::simulation::PhaseView;

/// What an effect is attached to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EffectAnchor {
    /// Circle centred on a world point.
    Area {
        /// Centre.
        center: Vec2Fixed,
        /// Radius.
        #[serde(with = "fixed_serde")]
        radius: Fixed,
    },
    /// A single agent.
    Agent(AgentId),
}

/// Key under which a re-cast refreshes an existing effect.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RefreshKey {
    /// Caster.
    pub caster: AgentId,
    /// Spell.
    pub spell: SpellId,
    /// Bound agent for targeted effects.
    pub target: Option<AgentId>,
}

/// A live area or over-time effect.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct OverTimeEffect {
    /// Record id, assigned when the effect is placed.
    pub id: u32,
    /// Caster.
    pub caster: AgentId,
    /// Caster's faction, kept in case the caster dies.
    pub faction: Faction,
    /// Spell that placed the effect.
    pub spell: SpellId,
    /// Area or bound agent.
    pub anchor: EffectAnchor,
    /// Amount and polarity per pulse.
    pub payload: Payload,
    /// Seconds between pulses.
    #[serde(with = "fixed_serde")]
    pub interval: Fixed,
    /// Remaining duration.
    #[serde(with = "fixed_serde")]
    pub remaining: Fixed,
    /// Time of the next pulse.
    #[serde(with = "fixed_serde")]
    pub next_tick: Fixed,
}

impl OverTimeEffect {
    /// Refresh key: `(caster, spell)` for areas, plus the target for bound effects.
    #[must_use]
    pub const fn refresh_key(&self) -> RefreshKey {
        RefreshKey {
            caster: self.caster,
            spell: self.spell,
            target: match self.anchor {
                EffectAnchor::Area { .. } => None,
                EffectAnchor::Agent(target) => Some(target),
            },
        }
    }

    /// Reset centre, remaining duration and next pulse from a re-cast.
    pub fn refresh_from(&mut self, recast: &Self) {
        self.anchor = recast.anchor;
        self.payload = recast.payload;
        self.interval = recast.interval;
        self.remaining = recast.remaining;
        self.next_tick = recast.next_tick;
    }

    /// Whether the effect is bound to `agent`.
    #[must_use]
    pub fn is_bound_to(&self, agent: AgentId) -> bool {
        self.anchor == EffectAnchor::Agent(agent)
    }
}

/// Advance one effect to `view.now`, pushing heal/damage commands for every
/// pulse due and an update or removal for the record itself.
pub fn advance(view: &PhaseView<'_>, effect: &OverTimeEffect, out: &mut CommandBuffer) {
    if view.now < effect.next_tick {
        return;
    }

    let mut remaining = effect.remaining;
    let mut next_tick = effect.next_tick;
    while next_tick <= view.now && remaining > Fixed::ZERO {
        if !pulse(view, effect, out) {
            out.push(WorldCommand::RemoveEffect { id: effect.id });
            return;
        }
        remaining -= effect.interval;
        next_tick += effect.interval;
    }

    if remaining <= Fixed::ZERO {
        out.push(WorldCommand::RemoveEffect { id: effect.id });
    } else {
        out.push(WorldCommand::UpdateEffect {
            id: effect.id,
            remaining,
            next_tick,
        });
    }
}

/// Apply one pulse. Returns `false` if a bound target is gone.
fn pulse(view: &PhaseView<'_>, effect: &OverTimeEffect, out: &mut CommandBuffer) -> bool {
    match effect.anchor {
        EffectAnchor::Agent(target) => {
            if view.snapshot.valid_target(target).is_none() {
                return false;
            }
            out.push(apply(effect, target));
        }
        EffectAnchor::Area { center, radius } => {
            let wanted = effect.payload.polarity.target_mask(effect.faction);
            let radius_sq = radius * radius;
            let mut scratch = Vec::with_capacity(view.index.capacity());
            view.index.query_circle(center, radius, &mut scratch);

            for &slot in &scratch {
                let agent = view.snapshot.at(slot);
                if agent.is_valid_target()
                    && wanted.accepts(agent.faction)
                    && center.distance_squared(agent.position) <= radius_sq
                {
                    out.push(apply(effect, agent.id));
                }
            }
        }
    }
    true
}

fn apply(effect: &OverTimeEffect, target: AgentId) -> WorldCommand {
    match effect.payload.polarity {
        Polarity::Harmful => WorldCommand::ApplyDamage {
            source: effect.caster,
            target,
            amount: effect.payload.amount,
            crit: false,
        },
        Polarity::Beneficial => WorldCommand::ApplyHeal {
            source: effect.caster,
            target,
            amount: effect.payload.amount,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn effect(anchor: EffectAnchor) -> OverTimeEffect {
        OverTimeEffect {
            id: 1,
            caster: 7,
            faction: Faction::Ally,
            spell: SpellId(2),
            anchor,
            payload: Payload {
                amount: 3,
                polarity: Polarity::Harmful,
            },
            interval: Fixed::ONE,
            remaining: Fixed::from_num(3),
            next_tick: Fixed::ONE,
        }
    }

    #[test]
    fn test_refresh_key_area_ignores_centre() {
        let a = effect(EffectAnchor::Area {
            center: Vec2Fixed::ZERO,
            radius: Fixed::ONE,
        });
        let b = effect(EffectAnchor::Area {
            center: Vec2Fixed::from_num(5, 5),
            radius: Fixed::ONE,
        });
        assert_eq!(a.refresh_key(), b.refresh_key());
    }

    #[test]
    fn test_refresh_key_targeted_includes_target() {
        let a = effect(EffectAnchor::Agent(3));
        let b = effect(EffectAnchor::Agent(4));
        assert_ne!(a.refresh_key(), b.refresh_key());
        assert!(a.is_bound_to(3));
        assert!(!a.is_bound_to(4));
    }

    #[test]
    fn test_refresh_resets_timing() {
        let mut live = effect(EffectAnchor::Agent(3));
        live.remaining = Fixed::from_num(0.5);
        let mut recast = effect(EffectAnchor::Agent(3));
        recast.next_tick = Fixed::from_num(9);
        live.refresh_from(&recast);
        assert_eq!(live.remaining, Fixed::from_num(3));
        assert_eq!(live.next_tick, Fixed::from_num(9));
        assert_eq!(live.id, 1);
    }
}
