//! Melee cone hit resolution.
//!
//! A swing is queued by the Cast phase and resolved in the Resolve phase:
//! a radius query around the attacker, then an exact range and cone test per
//! candidate. Damage goes to at most `max_targets` agents in query order.

use tracing::trace;

use crate::commands::{CommandBuffer, WorldCommand};
use crate::components::AgentId;
use crate::data::Strike;
use crate::factions::{Faction, FactionMask};
use crate::math::{Fixed, Vec2Fixed};
use crate::rng;
use crate::simulation::PhaseView;

/// A pending melee swing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MeleeHit {
    /// Attacker.
    pub attacker: AgentId,
    /// Attacker's root; same-root agents are never hit.
    pub root: AgentId,
    /// Attacker's faction.
    pub faction: Faction,
    /// Swing origin.
    pub origin: Vec2Fixed,
    /// Unit swing direction.
    pub forward: Vec2Fixed,
    /// Reach.
    pub range: Fixed,
    /// Signed `cos²` of the cone half-angle, see [`cone_cos_squared`](crate::math::cone_cos_squared).
    pub cos_half_angle_sq: Fixed,
    /// Damage and crit parameters.
    pub strike: Strike,
    /// Maximum number of agents damaged.
    pub max_targets: u32,
    /// Factions searched first.
    pub primary_mask: FactionMask,
}

/// Whether `to_target` lies strictly inside the cone around `forward`.
///
/// `forward` must be normalized and `cos_half_angle_sq` is the signed
/// `cos × |cos|` of the half-angle. A target exactly on the cone edge is
/// outside; a target at zero distance is outside.
#[must_use]
pub fn in_cone(forward: Vec2Fixed, to_target: Vec2Fixed, cos_half_angle_sq: Fixed) -> bool {
    let dot = forward.dot(to_target);
    dot * dot.abs() > cos_half_angle_sq * to_target.length_squared()
}

/// Resolve a swing into damage commands.
///
/// Tries the primary mask first; if it yields no hit, searches every faction.
pub fn resolve(view: &PhaseView<'_>, hit: &MeleeHit, out: &mut CommandBuffer) {
    let struck = strike_with_mask(view, hit, hit.primary_mask, out);
    if struck == 0 && hit.primary_mask != FactionMask::all() {
        let widened = strike_with_mask(view, hit, FactionMask::all(), out);
        trace!(attacker = hit.attacker, widened, "Melee widened search mask");
    }
}

fn strike_with_mask(
    view: &PhaseView<'_>,
    hit: &MeleeHit,
    mask: FactionMask,
    out: &mut CommandBuffer,
) -> u32 {
    let range_sq = hit.range * hit.range;
    let opponents = hit.faction.opposing();
    let mut scratch = Vec::with_capacity(view.index.capacity());
    view.index.query_circle(hit.origin, hit.range, &mut scratch);

    let mut struck = 0;
    for &slot in &scratch {
        if struck == hit.max_targets {
            break;
        }

        let candidate = view.snapshot.at(slot);
        if candidate.id == hit.attacker || candidate.root == hit.root {
            continue;
        }
        if !candidate.is_valid_target()
            || !mask.accepts(candidate.faction)
            || candidate.faction != opponents
        {
            continue;
        }

        let to_target = candidate.position - hit.origin;
        if to_target.length_squared() > range_sq {
            continue;
        }
        if !in_cone(hit.forward, to_target, hit.cos_half_angle_sq) {
            continue;
        }

        let roll = rng::crit_roll(view.config.seed, view.tick, hit.attacker, candidate.id);
        let (amount, crit) = hit.strike.damage_for_roll(roll);
        out.push(WorldCommand::ApplyDamage {
            source: hit.attacker,
            target: candidate.id,
            amount,
            crit,
        });
        struck += 1;
    }
    struck
}
