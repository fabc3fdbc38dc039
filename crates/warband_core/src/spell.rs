//! Spell state machine.
//!
//! `Idle -> DecisionRequested -> Targeted -> Windup -> Fire -> Cooldown`.
//!
//! The Plan phase turns a cast decision into a cast request by running the
//! spell's acquire policy. The Cast phase turns a cast request into a windup,
//! and fires it once the windup deadline passes. Firing dispatches on the
//! spell kind, starts the slot cooldown and opens the post-cast weapon lock.

use tracing::{debug, trace};

use crate::bridge::{DesiredFacing, ProjectileSource, ProjectileSpawnRequest, SummonRequest};
use crate::chain::{self, ChainParams};
use crate::commands::{CommandBuffer, WorldCommand};
use crate::components::{AgentId, CastTarget, SpellBook, SpellWindup};
use crate::data::{AcquireMode, Payload, Polarity, SpellConfig, SpellId, SpellKind, TargetShape};
use crate::effects::{EffectAnchor, OverTimeEffect};
use crate::math::{Fixed, Vec2Fixed};
use crate::request::{Capability, CastRequest, Outcome};
use crate::simulation::{Agent, PhaseView};
use crate::spatial::AgentSnapshot;
use crate::targeting;

// ============================================================================
// Plan phase
// ============================================================================

/// Answer a pending cast decision with a cast request or a failure.
pub(crate) fn plan(view: &PhaseView<'_>, agent: &Agent, out: &mut CommandBuffer) {
    let Some(book) = agent.spells.as_ref() else {
        return;
    };
    let Some(decision) = agent.requests.cast_decision.peek().copied() else {
        return;
    };

    let outcome = match decide(view, agent, book, decision.slot) {
        Ok(request) => {
            out.push(WorldCommand::WriteCastRequest {
                agent: agent.id,
                request,
            });
            Outcome::Success
        }
        Err(reason) => {
            trace!(agent = agent.id, slot = decision.slot, reason, "Cast decision rejected");
            Outcome::Failure
        }
    };
    out.push(WorldCommand::resolve(agent.id, Capability::CastDecision, outcome));
}

fn decide(
    view: &PhaseView<'_>,
    agent: &Agent,
    book: &SpellBook,
    slot: u8,
) -> Result<CastRequest, &'static str> {
    let entry = book.slot(slot).ok_or("no such slot")?;
    let spell = view.tables.spell(entry.spell).ok_or("unknown spell")?;

    if !entry.cooldown.is_ready(view.now) {
        return Err("slot cooling down");
    }
    if book.windup.is_some() {
        return Err("spell windup active");
    }
    if agent.weapon.is_some_and(|w| w.windup.is_some()) {
        return Err("attack windup active");
    }

    let caster = view.snapshot.get(agent.id).ok_or("caster not in snapshot")?;
    let target = select_target(view, caster, spell).ok_or("no target")?;
    Ok(CastRequest { slot, target })
}

/// Run the spell's acquire policy from the caster's position.
#[must_use]
pub fn select_target(
    view: &PhaseView<'_>,
    caster: &AgentSnapshot,
    spell: &SpellConfig,
) -> Option<CastTarget> {
    let opponents = caster.faction.opposing().mask();
    let selected: Option<(AgentId, Vec2Fixed)> = match spell.acquire {
        AcquireMode::ClosestEnemy => targeting::closest_of_faction(
            view.snapshot,
            view.index,
            caster.position,
            spell.range,
            opponents,
            &[caster.id],
        )
        .and_then(|c| view.snapshot.get(c.id))
        .map(|a| (a.id, a.position)),
        AcquireMode::DensestEnemyCluster => spell.kind.effect_radius().and_then(|radius| {
            targeting::densest_cluster(
                view.snapshot,
                view.index,
                caster.position,
                spell.range,
                radius,
                opponents,
            )
            .map(|c| (c.anchor, c.point))
        }),
        AcquireMode::LowestHealthAlly => targeting::lowest_health_ally(
            view.snapshot,
            view.index,
            caster.position,
            spell.range,
            caster.faction,
        )
        .and_then(|id| view.snapshot.get(id))
        .map(|a| (a.id, a.position)),
        AcquireMode::None => Some((caster.id, caster.position)),
    };

    match (spell.kind.shape(), selected) {
        (TargetShape::Single, Some((target, point))) => Some(CastTarget::Agent { target, point }),
        (TargetShape::Point, Some((_, point))) => Some(CastTarget::Point(point)),
        (TargetShape::Point, None) if is_beneficial_area(&spell.kind) => {
            Some(CastTarget::Point(targeting::fallback_point(caster)))
        }
        _ => None,
    }
}

fn is_beneficial_area(kind: &SpellKind) -> bool {
    matches!(
        kind,
        SpellKind::EffectOverTimeArea { payload, .. } if payload.polarity == Polarity::Beneficial
    )
}

// ============================================================================
// Cast phase
// ============================================================================

/// Advance one agent's spell book for this tick.
///
/// Returns whether spellcasting occupies the agent this tick: a windup was
/// active at phase start, was started, or fired.
pub(crate) fn run(view: &PhaseView<'_>, agent: &Agent, out: &mut CommandBuffer) -> bool {
    let Some(book) = agent.spells.as_ref() else {
        return false;
    };

    let mut busy = false;
    if let Some(windup) = book.windup {
        busy = true;
        if view.now >= windup.release_at {
            let outcome = fire(view, agent, book, windup.slot, windup.target, out);
            out.push(WorldCommand::FinishSpellWindup { agent: agent.id });
            out.push(WorldCommand::report(agent.id, Capability::Cast, outcome));
        }
    }

    let Some(request) = agent.requests.cast.peek().copied() else {
        return busy;
    };

    let spell = match accept(view, agent, book, &request, busy) {
        Ok(spell) => spell,
        Err(reason) => {
            trace!(agent = agent.id, slot = request.slot, reason, "Cast request rejected");
            out.push(WorldCommand::resolve(agent.id, Capability::Cast, Outcome::Failure));
            return busy;
        }
    };

    let target = refresh_aim(view, request.target);
    let windup = SpellWindup {
        release_at: view.now + spell.cast_time_seconds / agent.stats.cast_speed,
        slot: request.slot,
        target,
    };
    out.push(WorldCommand::EmitFacing(DesiredFacing {
        agent: agent.id,
        point: target.point(),
        valid: true,
    }));

    if windup.release_at <= view.now {
        let outcome = fire(view, agent, book, windup.slot, target, out);
        out.push(WorldCommand::resolve(agent.id, Capability::Cast, outcome));
    } else {
        debug!(agent = agent.id, slot = request.slot, release_at = %windup.release_at, "Spell windup started");
        out.push(WorldCommand::StartSpellWindup {
            agent: agent.id,
            windup,
        });
        out.push(WorldCommand::resolve(agent.id, Capability::Cast, Outcome::Running));
    }
    true
}

fn accept<'t>(
    view: &PhaseView<'t>,
    agent: &Agent,
    book: &SpellBook,
    request: &CastRequest,
    busy: bool,
) -> Result<&'t SpellConfig, &'static str> {
    let entry = book.slot(request.slot).ok_or("no such slot")?;
    let spell = view.tables.spell(entry.spell).ok_or("unknown spell")?;

    if busy {
        return Err("spell windup active");
    }
    if spell.kind.shape() == TargetShape::Single && matches!(request.target, CastTarget::Point(_)) {
        return Err("spell needs an agent target");
    }
    if !entry.cooldown.is_ready(view.now) {
        return Err("slot cooling down");
    }
    if agent.weapon.is_some_and(|w| w.windup.is_some()) {
        return Err("attack windup active");
    }

    let point = match request.target {
        CastTarget::Agent { target, .. } => {
            view.snapshot
                .valid_target(target)
                .ok_or("target invalid")?
                .position
        }
        CastTarget::Point(point) => point,
    };
    let reach_sq = spell.range * spell.range * view.config.range_slack;
    if agent.pose.position.distance_squared(point) > reach_sq {
        return Err("target out of range");
    }
    Ok(spell)
}

/// Re-read an agent target's position at acceptance.
fn refresh_aim(view: &PhaseView<'_>, target: CastTarget) -> CastTarget {
    match target {
        CastTarget::Agent { target, point } => CastTarget::Agent {
            target,
            point: view.snapshot.get(target).map_or(point, |a| a.position),
        },
        CastTarget::Point(_) => target,
    }
}

// ============================================================================
// Firing
// ============================================================================

/// Resolve the spell kind and start the cooldown and weapon lock.
///
/// A single-target kind whose target became invalid fizzles with
/// [`Outcome::Failure`]; the cooldown still starts.
fn fire(
    view: &PhaseView<'_>,
    agent: &Agent,
    book: &SpellBook,
    slot: u8,
    target: CastTarget,
    out: &mut CommandBuffer,
) -> Outcome {
    let Some(entry) = book.slot(slot) else {
        return Outcome::Failure;
    };
    let Some(spell) = view.tables.spell(entry.spell) else {
        return Outcome::Failure;
    };

    out.push(WorldCommand::StartSpellCooldown {
        agent: agent.id,
        slot,
        until: view.now + spell.cooldown_seconds,
    });
    out.push(WorldCommand::SetWeaponLock {
        agent: agent.id,
        until: view.now + spell.post_cast_attack_lock_seconds,
    });

    let point = match (spell.kind.shape(), target) {
        (TargetShape::Single, CastTarget::Agent { target: id, .. }) => {
            match view.snapshot.valid_target(id) {
                Some(t) => t.position,
                None => {
                    debug!(agent = agent.id, spell = %spell.name, target = id, "Spell fizzled");
                    return Outcome::Failure;
                }
            }
        }
        // Refused at acceptance.
        (TargetShape::Single, CastTarget::Point(_)) => return Outcome::Failure,
        (TargetShape::Point, target) => target.point(),
    };

    debug!(agent = agent.id, spell = %spell.name, "Spell fired");
    let caster = agent.pose.position;
    match &spell.kind {
        SpellKind::Summon { prefab, count } => {
            out.push(WorldCommand::EmitSummon(SummonRequest {
                summoner: agent.id,
                prefab: prefab.clone(),
                position: point,
                faction: agent.faction,
                count: *count,
            }));
        }
        SpellKind::ProjectileLine {
            damage,
            projectile_speed,
            max_distance,
            muzzle,
            pierce,
        } => {
            let direction = caster.direction_to(point, agent.pose.facing);
            out.push(WorldCommand::EmitProjectile(ProjectileSpawnRequest {
                shooter: agent.id,
                faction: agent.faction,
                target: None,
                origin: muzzle.world_origin(caster, direction),
                origin_height: muzzle.height,
                direction,
                speed: *projectile_speed,
                amount: *damage,
                polarity: Polarity::Harmful,
                max_distance: *max_distance,
                pierce: *pierce,
                source: ProjectileSource::SpellLine,
            }));
        }
        SpellKind::EffectOverTimeTarget {
            payload,
            interval_seconds,
            duration_seconds,
        } => {
            let anchor = EffectAnchor::Agent(target.agent().unwrap_or(agent.id));
            out.push(place_effect(
                view,
                agent,
                entry.spell,
                anchor,
                *payload,
                *interval_seconds,
                *duration_seconds,
            ));
        }
        SpellKind::EffectOverTimeArea {
            payload,
            radius,
            interval_seconds,
            duration_seconds,
        } => {
            let anchor = EffectAnchor::Area {
                center: point,
                radius: *radius,
            };
            out.push(place_effect(
                view,
                agent,
                entry.spell,
                anchor,
                *payload,
                *interval_seconds,
                *duration_seconds,
            ));
        }
        SpellKind::Chain {
            payload,
            hops,
            radius,
            hop_delay_seconds,
            projectile_speed,
        } => {
            let Some(first) = target.agent() else {
                return Outcome::Failure;
            };
            let params = ChainParams {
                payload: *payload,
                hops: *hops,
                radius: *radius,
                hop_delay: *hop_delay_seconds,
                speed: *projectile_speed,
            };
            chain::start(
                view,
                agent.id,
                agent.faction,
                caster,
                entry.spell,
                params,
                first,
                out,
            );
        }
    }
    Outcome::Success
}

fn place_effect(
    view: &PhaseView<'_>,
    agent: &Agent,
    spell: SpellId,
    anchor: EffectAnchor,
    payload: Payload,
    interval: Fixed,
    duration: Fixed,
) -> WorldCommand {
    WorldCommand::UpsertEffect(OverTimeEffect {
        id: 0,
        caster: agent.id,
        faction: agent.faction,
        spell,
        anchor,
        payload,
        interval,
        remaining: duration,
        next_tick: view.now + interval,
    })
}
