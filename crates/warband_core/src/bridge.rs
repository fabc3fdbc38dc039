//! Presentation-bridge contract.
//!
//! The core never drives animation, VFX or locomotion itself. Each tick it
//! publishes a [`BridgeFrame`] of one-shot requests; presentation reads the
//! frame, acts on it and acknowledges it. Frames are rebuilt every tick, so
//! every request is asserted exactly once.
//!
//! [`PresentationRegistry`] is a generational arena the presentation side can
//! use to map agents to its own objects. The simulation stores only the
//! [`PresentationHandle`].

use serde::{Deserialize, Serialize};

use tracing::trace;

use crate::commands::{CommandBuffer, WorldCommand};
use crate::components::{AgentId, MoveOrder};
use crate::data::Polarity;
use crate::factions::Faction;
use crate::math::{fixed_serde, Fixed, Vec2Fixed};
use crate::movement_lock::MovementLock;
use crate::request::{Capability, Outcome};
use crate::simulation::{Agent, PhaseView};

/// Where locomotion should take an agent. `valid == false` means full stop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DesiredDestination {
    /// Agent to move.
    pub agent: AgentId,
    /// Destination.
    pub position: Vec2Fixed,
    /// Whether the destination should be followed.
    pub valid: bool,
}

/// Where an agent should face.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DesiredFacing {
    /// Agent to rotate.
    pub agent: AgentId,
    /// Point to face.
    pub point: Vec2Fixed,
    /// Whether the facing should be applied.
    pub valid: bool,
}

/// What produced a projectile.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ProjectileSource {
    /// Ranged weapon release.
    Weapon,
    /// Projectile-line spell.
    SpellLine,
    /// One hop of a chain run.
    ChainHop {
        /// Chain run the hop belongs to.
        run: u32,
    },
}

/// Ask presentation to spawn and fly a projectile.
///
/// Flight and collision are external; impacts come back through
/// [`Simulation::report_impact`](crate::simulation::Simulation::report_impact).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProjectileSpawnRequest {
    /// Agent that fired.
    pub shooter: AgentId,
    /// Faction of the shooter.
    pub faction: Faction,
    /// Intended victim, when there is one.
    pub target: Option<AgentId>,
    /// Spawn point on the ground plane.
    pub origin: Vec2Fixed,
    /// Spawn height above the ground plane.
    #[serde(with = "fixed_serde")]
    pub origin_height: Fixed,
    /// Unit flight direction on the ground plane.
    pub direction: Vec2Fixed,
    /// World units per second.
    #[serde(with = "fixed_serde")]
    pub speed: Fixed,
    /// Damage or heal amount on impact.
    pub amount: u32,
    /// Damage or heal.
    pub polarity: Polarity,
    /// Distance after which the projectile expires.
    #[serde(with = "fixed_serde")]
    pub max_distance: Fixed,
    /// Whether the projectile continues through hits.
    pub pierce: bool,
    /// What produced the projectile.
    pub source: ProjectileSource,
}

/// Ask presentation to spawn a summoned agent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SummonRequest {
    /// Agent that cast the summon.
    pub summoner: AgentId,
    /// Prefab identifier.
    pub prefab: String,
    /// Spawn point.
    pub position: Vec2Fixed,
    /// Faction of the summoned agents.
    pub faction: Faction,
    /// Number of copies.
    pub count: u32,
}

/// A projectile hit reported back by presentation.
///
/// Queued by [`Simulation::report_impact`](crate::simulation::Simulation::report_impact)
/// and applied in the next tick's Resolve phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Impact {
    /// Agent that fired the projectile.
    pub source: AgentId,
    /// Agent the projectile hit.
    pub target: AgentId,
    /// Damage or heal amount.
    pub amount: u32,
    /// Damage or heal.
    pub polarity: Polarity,
}

/// Everything presentation needs from one tick.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BridgeFrame {
    /// Tick the frame was produced on.
    pub tick: u64,
    /// Locomotion targets and stops.
    pub destinations: Vec<DesiredDestination>,
    /// Facing requests.
    pub facings: Vec<DesiredFacing>,
    /// Projectiles to spawn.
    pub projectiles: Vec<ProjectileSpawnRequest>,
    /// Summons to spawn.
    pub summons: Vec<SummonRequest>,
    /// Agents with a non-empty movement lock, in id order.
    pub locks: Vec<(AgentId, MovementLock)>,
}

impl BridgeFrame {
    /// Empty frame for `tick`.
    #[must_use]
    pub fn new(tick: u64) -> Self {
        Self {
            tick,
            ..Self::default()
        }
    }

    /// Whether the frame carries no requests.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.destinations.is_empty()
            && self.facings.is_empty()
            && self.projectiles.is_empty()
            && self.summons.is_empty()
    }

    /// Lock published for `agent`, empty if none.
    #[must_use]
    pub fn lock_of(&self, agent: AgentId) -> MovementLock {
        self.locks
            .binary_search_by_key(&agent, |(id, _)| *id)
            .map_or(MovementLock::empty(), |i| self.locks[i].1)
    }
}

/// Generational handle into a [`PresentationRegistry`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PresentationHandle {
    /// Slot index.
    pub index: u32,
    /// Slot generation at insertion.
    pub generation: u32,
}

#[derive(Debug, Clone)]
struct Slot<P> {
    generation: u32,
    value: Option<P>,
}

/// Arena of presentation objects keyed by [`PresentationHandle`].
///
/// Removing an object bumps its slot's generation, so stale handles held
/// by the simulation resolve to `None` instead of a reused slot.
#[derive(Debug, Clone)]
pub struct PresentationRegistry<P> {
    slots: Vec<Slot<P>>,
    free: Vec<u32>,
    len: usize,
}

impl<P> Default for PresentationRegistry<P> {
    fn default() -> Self {
        Self::new()
    }
}

impl<P> PresentationRegistry<P> {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self {
            slots: Vec::new(),
            free: Vec::new(),
            len: 0,
        }
    }

    /// Store a presentation object and return its handle.
    pub fn insert(&mut self, value: P) -> PresentationHandle {
        self.len += 1;
        if let Some(index) = self.free.pop() {
            let slot = &mut self.slots[index as usize];
            slot.value = Some(value);
            return PresentationHandle {
                index,
                generation: slot.generation,
            };
        }

        let index = self.slots.len() as u32;
        self.slots.push(Slot {
            generation: 0,
            value: Some(value),
        });
        PresentationHandle {
            index,
            generation: 0,
        }
    }

    /// Look up an object; `None` for stale handles.
    #[must_use]
    pub fn get(&self, handle: PresentationHandle) -> Option<&P> {
        self.slots
            .get(handle.index as usize)
            .filter(|slot| slot.generation == handle.generation)
            .and_then(|slot| slot.value.as_ref())
    }

    /// Look up an object mutably; `None` for stale handles.
    pub fn get_mut(&mut self, handle: PresentationHandle) -> Option<&mut P> {
        self.slots
            .get_mut(handle.index as usize)
            .filter(|slot| slot.generation == handle.generation)
            .and_then(|slot| slot.value.as_mut())
    }

    /// Remove an object, invalidating its handle.
    pub fn remove(&mut self, handle: PresentationHandle) -> Option<P> {
        let slot = self
            .slots
            .get_mut(handle.index as usize)
            .filter(|slot| slot.generation == handle.generation)?;
        let value = slot.value.take()?;
        slot.generation = slot.generation.wrapping_add(1);
        self.free.push(handle.index);
        self.len -= 1;
        Some(value)
    }

    /// Number of live objects.
    #[must_use]
    pub const fn len(&self) -> usize {
        self.len
    }

    /// Check if the registry is empty.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.len == 0
    }
}

// ============================================================================
// Bridge phase
// ============================================================================

/// Hand move-to and rotate-to requests and active move orders to locomotion.
///
/// Rotation is allowed while locked. Movement is not: a move request while
/// locked fails with a stop, and an active order is held with a stop every
/// tick until the lock clears, then its destination is re-sent.
pub(crate) fn run(view: &PhaseView<'_>, agent: &Agent, out: &mut CommandBuffer) {
    if !agent.vitality.is_alive() {
        return;
    }
    let locked = agent.lock.is_locked();

    if let Some(rotate) = agent.requests.rotate.peek() {
        out.push(WorldCommand::EmitFacing(DesiredFacing {
            agent: agent.id,
            point: rotate.point,
            valid: true,
        }));
        out.push(WorldCommand::resolve(agent.id, Capability::Rotate, Outcome::Success));
    }

    if let Some(request) = agent.requests.move_to.peek() {
        if locked {
            trace!(agent = agent.id, lock = ?agent.lock, "Move request rejected while locked");
            out.push(stop(agent));
            out.push(WorldCommand::resolve(agent.id, Capability::MoveTo, Outcome::Failure));
        } else {
            out.push(WorldCommand::EmitDestination(DesiredDestination {
                agent: agent.id,
                position: request.destination,
                valid: true,
            }));
            out.push(WorldCommand::SetMoveOrder {
                agent: agent.id,
                order: Some(MoveOrder::new(request.destination)),
            });
            out.push(WorldCommand::resolve(agent.id, Capability::MoveTo, Outcome::Running));
        }
        return;
    }

    let Some(order) = agent.move_order else {
        return;
    };

    if order
        .remaining
        .is_some_and(|remaining| remaining <= view.config.arrival_tolerance)
    {
        out.push(WorldCommand::SetMoveOrder {
            agent: agent.id,
            order: None,
        });
        out.push(WorldCommand::report(agent.id, Capability::MoveTo, Outcome::Success));
        return;
    }

    if locked {
        out.push(stop(agent));
        if !order.halted {
            out.push(WorldCommand::SetMoveOrder {
                agent: agent.id,
                order: Some(MoveOrder {
                    halted: true,
                    ..order
                }),
            });
        }
    } else if order.halted {
        out.push(WorldCommand::EmitDestination(DesiredDestination {
            agent: agent.id,
            position: order.destination,
            valid: true,
        }));
        out.push(WorldCommand::SetMoveOrder {
            agent: agent.id,
            order: Some(MoveOrder {
                halted: false,
                ..order
            }),
        });
    }
}

const fn stop(agent: &Agent) -> WorldCommand {
    WorldCommand::EmitDestination(DesiredDestination {
        agent: agent.id,
        position: agent.pose.position,
        valid: false,
    })
}
