//! Multi-hop chain propagation.
//!
//! A chain run lives on its own once the spell fires: it no longer depends
//! on the caster. `remaining` counts spawn requests still to emit, the first
//! one included, so a run started with `hops = N` emits at most `N`.
//!
//! Each step waits for the previous hop's travel time plus the inter-hop
//! delay, emits a projectile from the previous target to the current one,
//! then looks for the next target around the current one among agents not
//! yet visited.

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::bridge::{ProjectileSource, ProjectileSpawnRequest};
use crate::commands::{CommandBuffer, WorldCommand};
use crate::components::AgentId;
use crate::data::{Payload, SpellId};
use crate::factions::Faction;
use crate::math::{fixed_serde, Fixed, Vec2Fixed};
use crate::simulation::PhaseView;
use crate::targeting;

/// Chain parameters copied from the spell at cast time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ChainParams {
    /// Amount and polarity per hop.
    pub payload: Payload,
    /// Total spawn requests, including the first.
    pub hops: u32,
    /// Search radius for the next target.
    #[serde(with = "fixed_serde")]
    pub radius: Fixed,
    /// Extra delay between hops.
    #[serde(with = "fixed_serde")]
    pub hop_delay: Fixed,
    /// Hop projectile speed.
    #[serde(with = "fixed_serde")]
    pub speed: Fixed,
}

/// An in-progress chain.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ChainRun {
    /// Record id, assigned when the run is registered.
    pub id: u32,
    /// Caster.
    pub caster: AgentId,
    /// Caster's faction, kept in case the caster dies.
    pub faction: Faction,
    /// Spell that started the run.
    pub spell: SpellId,
    /// Hop parameters.
    pub params: ChainParams,
    /// Spawn requests still to emit.
    pub remaining: u32,
    /// Agent hit by the last emitted hop.
    pub previous: AgentId,
    /// Where the last hop was aimed, used if `previous` is gone.
    pub previous_point: Vec2Fixed,
    /// Agent the next hop flies to.
    pub current: AgentId,
    /// Time the next hop fires.
    #[serde(with = "fixed_serde")]
    pub next_fire: Fixed,
    /// Every agent targeted so far.
    pub visited: Vec<AgentId>,
}

/// Fire the first hop from the caster and register a run if hops remain.
///
/// `caster_point` is the spawn point of the first hop.
pub fn start(
    view: &PhaseView<'_>,
    caster: AgentId,
    faction: Faction,
    caster_point: Vec2Fixed,
    spell: SpellId,
    params: ChainParams,
    first: AgentId,
    out: &mut CommandBuffer,
) {
    let Some(target) = view.snapshot.valid_target(first) else {
        return;
    };

    out.push(WorldCommand::EmitProjectile(hop_request(
        caster,
        faction,
        &params,
        caster_point,
        target.position,
        first,
        None,
    )));

    let remaining = params.hops.saturating_sub(1);
    if remaining == 0 {
        return;
    }

    let visited = vec![first];
    let Some(next) = next_target(view, caster, faction, &params, target.position, &visited) else {
        debug!(caster, "Chain ended after first hop: no next target");
        return;
    };

    out.push(WorldCommand::SpawnChain(ChainRun {
        id: 0,
        caster,
        faction,
        spell,
        params,
        remaining,
        previous: first,
        previous_point: target.position,
        current: next,
        next_fire: view.now + travel_time(&params, caster_point, target.position),
        visited,
    }));
}

/// Advance a run by at most one hop.
pub fn step(view: &PhaseView<'_>, run: &ChainRun, out: &mut CommandBuffer) {
    if view.now < run.next_fire {
        return;
    }

    let Some(current) = view.snapshot.valid_target(run.current) else {
        debug!(run = run.id, target = run.current, "Chain torn down: target invalid");
        out.push(WorldCommand::RemoveChain { id: run.id });
        return;
    };

    let from = view
        .snapshot
        .get(run.previous)
        .map_or(run.previous_point, |a| a.position);

    out.push(WorldCommand::EmitProjectile(hop_request(
        run.caster,
        run.faction,
        &run.params,
        from,
        current.position,
        run.current,
        Some(run.id),
    )));

    let remaining = run.remaining.saturating_sub(1);
    if remaining == 0 {
        debug!(run = run.id, "Chain exhausted");
        out.push(WorldCommand::RemoveChain { id: run.id });
        return;
    }

    let mut visited = run.visited.clone();
    visited.push(run.current);
    let Some(next) = next_target(
        view,
        run.caster,
        run.faction,
        &run.params,
        current.position,
        &visited,
    ) else {
        debug!(run = run.id, "Chain torn down: no next target");
        out.push(WorldCommand::RemoveChain { id: run.id });
        return;
    };

    out.push(WorldCommand::UpdateChain(ChainRun {
        remaining,
        previous: run.current,
        previous_point: current.position,
        current: next,
        next_fire: view.now + travel_time(&run.params, from, current.position),
        visited,
        ..run.clone()
    }));
}

fn next_target(
    view: &PhaseView<'_>,
    caster: AgentId,
    faction: Faction,
    params: &ChainParams,
    around: Vec2Fixed,
    visited: &[AgentId],
) -> Option<AgentId> {
    let mut exclude = Vec::with_capacity(visited.len() + 1);
    exclude.push(caster);
    exclude.extend_from_slice(visited);

    targeting::closest_of_faction(
        view.snapshot,
        view.index,
        around,
        params.radius,
        params.payload.polarity.target_mask(faction),
        &exclude,
    )
    .map(|c| c.id)
}

fn travel_time(params: &ChainParams, from: Vec2Fixed, to: Vec2Fixed) -> Fixed {
    from.distance(to) / params.speed + params.hop_delay
}

fn hop_request(
    caster: AgentId,
    faction: Faction,
    params: &ChainParams,
    from: Vec2Fixed,
    to: Vec2Fixed,
    target: AgentId,
    run: Option<u32>,
) -> ProjectileSpawnRequest {
    let direction = (to - from).normalize();
    ProjectileSpawnRequest {
        shooter: caster,
        faction,
        target: Some(target),
        origin: from,
        origin_height: Fixed::ZERO,
        direction,
        speed: params.speed,
        amount: params.payload.amount,
        polarity: params.payload.polarity,
        max_distance: from.distance(to) + params.radius,
        pierce: false,
        source: ProjectileSource::ChainHop {
            run: run.unwrap_or(0),
        },
    }
}
