//! Attack state machine.
//!
//! `Idle -> (request, gates) -> Windup (ranged only) -> Release -> Idle`.
//! Runs in the Cast phase. A melee request that passes every gate queues a
//! cone hit for the Resolve phase and starts the cooldown immediately; a
//! ranged request starts a windup and the projectile is released once the
//! windup deadline passes. Every failed gate consumes the request with
//! [`Outcome::Failure`] and no other effect.

use tracing::{debug, trace};

use crate::bridge::{DesiredFacing, ProjectileSource, ProjectileSpawnRequest};
use crate::commands::{CommandBuffer, WorldCommand};
use crate::components::{AgentId, AttackWindup, WeaponLoadout};
use crate::data::{MeleeProfile, Polarity, RangedProfile, WeaponConfig, WeaponStyle};
use crate::math::{Fixed, Vec2Fixed};
use crate::melee::MeleeHit;
use crate::request::{Capability, Outcome};
use crate::rng;
use crate::simulation::{Agent, PhaseView};
use crate::spatial::AgentSnapshot;

/// Advance one agent's weapon for this tick.
///
/// `spell_busy` is true when the agent's spell windup was active, started or
/// released this tick; spellcasting takes priority over the weapon.
pub(crate) fn run(view: &PhaseView<'_>, agent: &Agent, spell_busy: bool, out: &mut CommandBuffer) {
    let Some(loadout) = agent.weapon.as_ref() else {
        return;
    };
    let Some(weapon) = view.tables.weapon(loadout.weapon) else {
        return;
    };

    if let (Some(windup), WeaponStyle::Ranged(profile)) = (loadout.windup, &weapon.style) {
        if view.now >= windup.release_at {
            release(view, agent, weapon, profile, windup, out);
        }
    }

    if !agent.requests.attack.is_pending() {
        return;
    }

    let target = match check_gates(view, agent, loadout, weapon, spell_busy) {
        Ok(target) => target,
        Err(reason) => {
            trace!(agent = agent.id, reason, "Attack request rejected");
            out.push(WorldCommand::resolve(agent.id, Capability::Attack, Outcome::Failure));
            return;
        }
    };

    match &weapon.style {
        WeaponStyle::Melee(profile) => swing(view, agent, weapon, profile, target, out),
        WeaponStyle::Ranged(profile) => begin_windup(view, agent, weapon, profile, target, out),
    }
}

fn check_gates<'v>(
    view: &'v PhaseView<'_>,
    agent: &Agent,
    loadout: &WeaponLoadout,
    weapon: &WeaponConfig,
    spell_busy: bool,
) -> Result<&'v AgentSnapshot, &'static str> {
    if !loadout.cooldown.is_ready(view.now) {
        return Err("cooldown");
    }

    let target = agent
        .target
        .and_then(|id| view.snapshot.valid_target(id))
        .ok_or("no valid target")?;
    let reach_sq = weapon.range * weapon.range * view.config.range_slack;
    if agent.pose.position.distance_squared(target.position) > reach_sq {
        return Err("target out of range");
    }

    if spell_busy {
        return Err("spell windup active");
    }
    if loadout.windup.is_some() {
        return Err("attack windup active");
    }
    if view.now < loadout.weapon_lock_until {
        return Err("post-cast weapon lock");
    }
    Ok(target)
}

fn swing(
    view: &PhaseView<'_>,
    agent: &Agent,
    weapon: &WeaponConfig,
    profile: &MeleeProfile,
    target: &AgentSnapshot,
    out: &mut CommandBuffer,
) {
    let origin = agent.pose.position;
    out.push(WorldCommand::QueueMeleeHit(MeleeHit {
        attacker: agent.id,
        root: agent.root,
        faction: agent.faction,
        origin,
        forward: origin.direction_to(target.position, agent.pose.facing),
        range: weapon.range,
        cos_half_angle_sq: profile.cos_half_angle_sq(),
        strike: weapon.strike(),
        max_targets: profile.max_targets,
        primary_mask: weapon.primary_mask(agent.faction),
    }));
    out.push(WorldCommand::StartAttackCooldown {
        agent: agent.id,
        until: cooldown_end(view, agent, weapon),
    });
    out.push(WorldCommand::SetActionLock {
        agent: agent.id,
        until: view.now + profile.swing_lock_seconds,
    });
    out.push(face(agent, target.position));
    out.push(WorldCommand::resolve(agent.id, Capability::Attack, Outcome::Success));
}

fn begin_windup(
    view: &PhaseView<'_>,
    agent: &Agent,
    weapon: &WeaponConfig,
    profile: &RangedProfile,
    target: &AgentSnapshot,
    out: &mut CommandBuffer,
) {
    let windup = AttackWindup {
        release_at: view.now + profile.windup_seconds / agent.stats.attack_speed,
        target: target.id,
        aim_point: target.position,
    };
    out.push(face(agent, target.position));

    if windup.release_at <= view.now {
        fire(view, agent, weapon, profile, windup.target, target.position, out);
        out.push(WorldCommand::resolve(agent.id, Capability::Attack, Outcome::Success));
        return;
    }

    debug!(agent = agent.id, target = target.id, release_at = %windup.release_at, "Attack windup started");
    out.push(WorldCommand::StartAttackWindup {
        agent: agent.id,
        windup,
    });
    out.push(WorldCommand::resolve(agent.id, Capability::Attack, Outcome::Running));
}

fn release(
    view: &PhaseView<'_>,
    agent: &Agent,
    weapon: &WeaponConfig,
    profile: &RangedProfile,
    windup: AttackWindup,
    out: &mut CommandBuffer,
) {
    // Committed: aim at the target if it still exists, else where it was.
    let aim = view
        .snapshot
        .valid_target(windup.target)
        .map_or(windup.aim_point, |t| t.position);

    debug!(agent = agent.id, target = windup.target, "Attack released");
    fire(view, agent, weapon, profile, windup.target, aim, out);
    out.push(WorldCommand::FinishAttackWindup { agent: agent.id });
    out.push(WorldCommand::report(agent.id, Capability::Attack, Outcome::Success));
}

fn fire(
    view: &PhaseView<'_>,
    agent: &Agent,
    weapon: &WeaponConfig,
    profile: &RangedProfile,
    target: AgentId,
    aim: Vec2Fixed,
    out: &mut CommandBuffer,
) {
    let direction = agent.pose.position.direction_to(aim, agent.pose.facing);
    let roll = rng::crit_roll(view.config.seed, view.tick, agent.id, target);
    let (amount, _crit) = weapon.strike().damage_for_roll(roll);

    out.push(WorldCommand::EmitProjectile(ProjectileSpawnRequest {
        shooter: agent.id,
        faction: agent.faction,
        target: Some(target),
        origin: profile.muzzle.world_origin(agent.pose.position, direction),
        origin_height: profile.muzzle.height,
        direction,
        speed: profile.projectile_speed,
        amount,
        polarity: Polarity::Harmful,
        max_distance: profile.max_distance,
        pierce: profile.pierce,
        source: ProjectileSource::Weapon,
    }));
    out.push(WorldCommand::StartAttackCooldown {
        agent: agent.id,
        until: cooldown_end(view, agent, weapon),
    });
}

/// `now + cooldown / attack_speed + jitter`, jitter in `[0, max_jitter)`.
fn cooldown_end(view: &PhaseView<'_>, agent: &Agent, weapon: &WeaponConfig) -> Fixed {
    view.now
        + weapon.cooldown_seconds / agent.stats.attack_speed
        + rng::jitter(
            view.config.seed,
            view.tick,
            agent.id,
            weapon.cooldown_jitter_seconds,
        )
}

const fn face(agent: &Agent, point: Vec2Fixed) -> WorldCommand {
    WorldCommand::EmitFacing(DesiredFacing {
        agent: agent.id,
        point,
        valid: true,
    })
}
