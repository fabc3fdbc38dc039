//! Core simulation loop.
//!
//! The simulation runs at a fixed tick rate and processes all combat logic
//! deterministically. Each tick runs its phases in strict order, and each
//! phase fully completes and applies its buffered mutations before the next
//! begins:
//!
//! 1. **Index** - Snapshot every agent and rebuild the spatial index
//! 2. **Plan** - Auto-target with hysteresis, answer cast decisions
//! 3. **Cast** - Spell windups and releases, then weapon attacks
//! 4. **Resolve** - Melee hits, chain hops, area/over-time pulses, impacts
//! 5. **Bridge** - Move-to and rotate-to hand-off, lock publication, despawn
//!
//! # Determinism
//!
//! - No floating-point math (uses fixed-point via [`Fixed`])
//! - Rolls are seeded from `(seed, tick, agent)`, never from evaluation order
//! - Read passes see immutable snapshots; mutations are applied in agent-id order
//! - Parallel and sequential read passes produce identical results
//!
//! # Example
//!
//! ```
//! use warband_core::prelude::*;
//!
//! let tables = CombatTables::from_ron_str(
//!     r#"(weapons: [WeaponConfig(name: "sword", range: 2.0, damage: 10, cooldown_seconds: 1.0,
//!         style: Melee(MeleeProfile(half_angle_degrees: 60.0, max_targets: 1)))])"#,
//! )
//! .unwrap();
//! let sword = tables.weapon_id("sword").unwrap();
//! let mut sim = Simulation::new(SimulationConfig::default(), tables).unwrap();
//!
//! let knight = sim
//!     .spawn_agent(
//!         AgentSpawnParams::new(Faction::Ally, Vec2Fixed::ZERO)
//!             .with_health(100)
//!             .with_weapon(sword),
//!     )
//!     .unwrap();
//! sim.spawn_agent(AgentSpawnParams::new(Faction::Enemy, Vec2Fixed::from_num(0, 1)).with_health(30))
//!     .unwrap();
//!
//! sim.tick(); // acquire the target
//! sim.request_attack(knight).unwrap();
//! let events = sim.tick();
//! assert_eq!(events.damage.len(), 1);
//! assert_eq!(sim.request_status(knight, Capability::Attack), Some(Outcome::Success));
//! ```

use std::collections::hash_map::DefaultHasher;
use std::collections::{BTreeMap, HashMap};
use std::hash::{Hash, Hasher};

use serde::{Deserialize, Serialize};
use tracing::{debug, trace};

use crate::attack;
use crate::bridge::{self, BridgeFrame, Impact, PresentationHandle};
use crate::chain::{self, ChainRun};
use crate::commands::{CommandBuffer, WorldCommand};
use crate::components::{
    AgentId, CombatStats, Health, MoveOrder, Pose, SpellBook, Vitality, WeaponLoadout,
};
use crate::config::SimulationConfig;
use crate::data::{CombatTables, Polarity, SpellId, WeaponId};
use crate::effects::{self, OverTimeEffect};
use crate::error::{CombatError, Result};
use crate::factions::{Faction, FactionMask};
use crate::math::{Fixed, Vec2Fixed};
use crate::melee::{self, MeleeHit};
use crate::movement_lock::{self, MovementLock};
use crate::request::{
    AgentRequests, AttackRequest, Capability, CastDecision, CastRequest, MoveRequest, Outcome,
    RotateRequest,
};
use crate::spatial::{segment_distance_squared, AgentSnapshot, Snapshot, SpatialIndex};
use crate::spell;
use crate::targeting;

/// A combat participant with optional capabilities.
///
/// Agents without [`Health`] can act but are never targeted. Agents without
/// a weapon or spell book reject the corresponding requests.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Agent {
    /// Unique identifier for this agent.
    pub id: AgentId,
    /// Faction tag.
    pub faction: Faction,
    /// Self, or the agent that summoned it. Same-root agents never hit each other.
    pub root: AgentId,
    /// Position and facing, written by locomotion.
    pub pose: Pose,
    /// Health for damageable agents.
    pub health: Option<Health>,
    /// Alive or in its death grace period.
    pub vitality: Vitality,
    /// Attack and cast speed multipliers.
    pub stats: CombatStats,
    /// Weapon state for agents that can attack.
    pub weapon: Option<WeaponLoadout>,
    /// Spell state for agents that can cast.
    pub spells: Option<SpellBook>,
    /// Auto-acquired target.
    pub target: Option<AgentId>,
    /// Decision-layer request slots.
    pub requests: AgentRequests,
    /// Active move-to order.
    pub move_order: Option<MoveOrder>,
    /// Movement lock, recomputed every tick after the Cast phase.
    pub lock: MovementLock,
    /// Presentation object, if one was attached.
    pub presentation: Option<PresentationHandle>,
}

impl Agent {
    fn from_params(params: &AgentSpawnParams) -> Self {
        Self {
            id: 0,
            faction: params.faction,
            root: 0,
            pose: Pose::at(params.position).with_facing(params.facing),
            health: params.health.map(Health::new),
            vitality: Vitality::Alive,
            stats: params.stats,
            weapon: params.weapon.map(WeaponLoadout::new),
            spells: (!params.spells.is_empty())
                .then(|| SpellBook::new(params.spells.iter().copied())),
            target: None,
            requests: AgentRequests::default(),
            move_order: None,
            lock: MovementLock::empty(),
            presentation: None,
        }
    }

    /// Whether the agent is alive (not dying).
    #[must_use]
    pub const fn is_alive(&self) -> bool {
        self.vitality.is_alive()
    }

    /// Read-only view used by phase read passes.
    #[must_use]
    pub fn snapshot(&self) -> AgentSnapshot {
        AgentSnapshot {
            id: self.id,
            position: self.pose.position,
            facing: self.pose.facing,
            faction: self.faction,
            root: self.root,
            alive: self.is_alive(),
            targetable: self.health.is_some(),
            health_fraction: self.health.map_or(Fixed::ONE, |h| h.fraction()),
        }
    }

    /// Hash simulation state. The presentation handle is not simulation state.
    fn hash_state<H: Hasher>(&self, hasher: &mut H) {
        self.id.hash(hasher);
        self.faction.hash(hasher);
        self.root.hash(hasher);
        self.pose.hash(hasher);
        self.health.hash(hasher);
        self.vitality.hash(hasher);
        self.stats.hash(hasher);
        self.weapon.hash(hasher);
        self.spells.hash(hasher);
        self.target.hash(hasher);
        self.requests.hash(hasher);
        self.move_order.hash(hasher);
        self.lock.hash(hasher);
    }
}

/// Parameters for spawning a new agent.
///
/// Start from [`AgentSpawnParams::new`] and add capabilities with the
/// `with_*` builders.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AgentSpawnParams {
    /// Faction tag.
    pub faction: Faction,
    /// Initial position.
    pub position: Vec2Fixed,
    /// Initial facing (normalized on spawn).
    pub facing: Vec2Fixed,
    /// Maximum health; `None` makes the agent untargetable.
    pub health: Option<u32>,
    /// Speed multipliers.
    pub stats: CombatStats,
    /// Equipped weapon.
    pub weapon: Option<WeaponId>,
    /// Spell book, one slot per entry.
    pub spells: Vec<SpellId>,
    /// Agent that summoned this one.
    pub summoner: Option<AgentId>,
}

impl AgentSpawnParams {
    /// Agent of `faction` at `position`, facing forward, with no capabilities.
    #[must_use]
    pub const fn new(faction: Faction, position: Vec2Fixed) -> Self {
        Self {
            faction,
            position,
            facing: Vec2Fixed::FORWARD,
            health: None,
            stats: CombatStats {
                attack_speed: Fixed::ONE,
                cast_speed: Fixed::ONE,
            },
            weapon: None,
            spells: Vec::new(),
            summoner: None,
        }
    }

    /// Builder: set the initial facing.
    #[must_use]
    pub const fn with_facing(mut self, facing: Vec2Fixed) -> Self {
        self.facing = facing;
        self
    }

    /// Builder: make the agent damageable with `max` health.
    #[must_use]
    pub const fn with_health(mut self, max: u32) -> Self {
        self.health = Some(max);
        self
    }

    /// Builder: set speed multipliers.
    #[must_use]
    pub const fn with_stats(mut self, stats: CombatStats) -> Self {
        self.stats = stats;
        self
    }

    /// Builder: equip a weapon.
    #[must_use]
    pub const fn with_weapon(mut self, weapon: WeaponId) -> Self {
        self.weapon = Some(weapon);
        self
    }

    /// Builder: give the agent a spell book.
    #[must_use]
    pub fn with_spells(mut self, spells: impl IntoIterator<Item = SpellId>) -> Self {
        self.spells = spells.into_iter().collect();
        self
    }

    /// Builder: record the summoner. The agent inherits its root.
    #[must_use]
    pub const fn with_summoner(mut self, summoner: AgentId) -> Self {
        self.summoner = Some(summoner);
        self
    }
}

/// Storage for all agents in the simulation.
///
/// Uses a `HashMap` for O(1) lookup by id, with deterministic iteration via
/// sorted keys when running phases.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AgentStorage {
    agents: HashMap<AgentId, Agent>,
    next_id: AgentId,
}

impl AgentStorage {
    /// Create empty agent storage.
    #[must_use]
    pub fn new() -> Self {
        Self {
            agents: HashMap::new(),
            next_id: 1,
        }
    }

    /// Insert a new agent and return its id.
    pub fn insert(&mut self, mut agent: Agent) -> AgentId {
        let id = self.next_id;
        self.next_id += 1;
        agent.id = id;
        self.agents.insert(id, agent);
        id
    }

    /// Remove an agent by id.
    pub fn remove(&mut self, id: AgentId) -> Option<Agent> {
        self.agents.remove(&id)
    }

    /// Get an agent by id.
    #[must_use]
    pub fn get(&self, id: AgentId) -> Option<&Agent> {
        self.agents.get(&id)
    }

    /// Get a mutable reference to an agent by id.
    pub fn get_mut(&mut self, id: AgentId) -> Option<&mut Agent> {
        self.agents.get_mut(&id)
    }

    /// Check if an agent exists.
    #[must_use]
    pub fn contains(&self, id: AgentId) -> bool {
        self.agents.contains_key(&id)
    }

    /// Get the number of agents.
    #[must_use]
    pub fn len(&self) -> usize {
        self.agents.len()
    }

    /// Check if storage is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.agents.is_empty()
    }

    /// Get sorted agent ids for deterministic iteration.
    #[must_use]
    pub fn sorted_ids(&self) -> Vec<AgentId> {
        let mut ids: Vec<_> = self.agents.keys().copied().collect();
        ids.sort_unstable();
        ids
    }

    /// Iterate over all agents (not in deterministic order).
    pub fn iter(&self) -> impl Iterator<Item = &Agent> {
        self.agents.values()
    }

    /// Iterate mutably over all agents (not in deterministic order).
    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut Agent> {
        self.agents.values_mut()
    }
}

/// Damage dealt during a tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DamageEvent {
    /// Attacker.
    pub source: AgentId,
    /// Victim.
    pub target: AgentId,
    /// Health actually removed.
    pub amount: u32,
    /// Whether the hit was a crit.
    pub crit: bool,
}

/// Healing done during a tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealEvent {
    /// Healer.
    pub source: AgentId,
    /// Recipient.
    pub target: AgentId,
    /// Health actually restored.
    pub amount: u32,
}

/// Everything a tick produced.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TickEvents {
    /// Tick that produced these events.
    pub tick: u64,
    /// One-shot presentation requests plus the movement-lock snapshot.
    pub bridge: BridgeFrame,
    /// Damage applied, in application order.
    pub damage: Vec<DamageEvent>,
    /// Heals applied, in application order.
    pub heals: Vec<HealEvent>,
    /// Agents whose health reached zero this tick.
    pub deaths: Vec<AgentId>,
    /// Agents removed after their death grace period.
    pub despawned: Vec<AgentId>,
}

/// Read-only world view handed to every read pass.
#[derive(Debug, Clone, Copy)]
pub struct PhaseView<'a> {
    /// Agent snapshots for this tick.
    pub snapshot: &'a Snapshot,
    /// Spatial index over `snapshot`.
    pub index: &'a SpatialIndex,
    /// Weapon and spell tables.
    pub tables: &'a CombatTables,
    /// Tuning values.
    pub config: &'a SimulationConfig,
    /// Simulation time in seconds.
    pub now: Fixed,
    /// Current tick.
    pub tick: u64,
}

/// Per-tick scratch state threaded through command application.
#[derive(Debug, Default)]
struct TickScratch {
    events: TickEvents,
    melee: Vec<MeleeHit>,
}

/// The combat simulation.
///
/// Owns all agent state, in-flight chains and effects, and the tables they
/// reference. See the [module docs](self) for the phase order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Simulation {
    /// Current simulation tick.
    tick: u64,
    config: SimulationConfig,
    tables: CombatTables,
    agents: AgentStorage,
    chains: BTreeMap<u32, ChainRun>,
    effects: BTreeMap<u32, OverTimeEffect>,
    /// Last id handed to a chain run or effect.
    last_record_id: u32,
    /// Impacts reported since the last Resolve phase.
    impacts: Vec<Impact>,
    last_acknowledged_frame: Option<u64>,
    /// Rebuilt every tick, so never serialized.
    #[serde(skip)]
    index: SpatialIndex,
    /// Agents as of the last Index phase; `index` points into it.
    #[serde(skip)]
    snapshot: Snapshot,
}

impl Simulation {
    /// Create an empty simulation at tick 0.
    ///
    /// # Errors
    ///
    /// Returns [`CombatError::InvalidConfig`] if `config` fails validation.
    pub fn new(config: SimulationConfig, tables: CombatTables) -> Result<Self> {
        config.validate()?;
        let index = SpatialIndex::new(config.cell_size, config.query_capacity);
        Ok(Self {
            tick: 0,
            config,
            tables,
            agents: AgentStorage::new(),
            chains: BTreeMap::new(),
            effects: BTreeMap::new(),
            last_record_id: 0,
            impacts: Vec::new(),
            last_acknowledged_frame: None,
            index,
            snapshot: Snapshot::default(),
        })
    }

    /// Get the current tick number.
    #[must_use]
    pub const fn current_tick(&self) -> u64 {
        self.tick
    }

    /// Simulation time in seconds at the current tick.
    #[must_use]
    pub fn now(&self) -> Fixed {
        self.config.time_at(self.tick)
    }

    /// Tuning values.
    #[must_use]
    pub const fn config(&self) -> &SimulationConfig {
        &self.config
    }

    /// Weapon and spell tables.
    #[must_use]
    pub const fn tables(&self) -> &CombatTables {
        &self.tables
    }

    /// Get a reference to the agent storage.
    #[must_use]
    pub const fn agents(&self) -> &AgentStorage {
        &self.agents
    }

    /// Get an agent by id.
    #[must_use]
    pub fn agent(&self, id: AgentId) -> Option<&Agent> {
        self.agents.get(id)
    }

    /// In-flight chain runs, in id order.
    pub fn chains(&self) -> impl Iterator<Item = &ChainRun> {
        self.chains.values()
    }

    /// Live area and over-time effects, in id order.
    pub fn effects(&self) -> impl Iterator<Item = &OverTimeEffect> {
        self.effects.values()
    }

    // ========================================================================
    // Agent lifecycle
    // ========================================================================

    /// Spawn a new agent.
    ///
    /// # Errors
    ///
    /// Returns [`CombatError::UnknownWeapon`] or [`CombatError::UnknownSpell`]
    /// for ids outside the tables, [`CombatError::AgentNotFound`] for an
    /// unknown summoner, or [`CombatError::InvalidConfig`] for non-positive
    /// speed multipliers.
    pub fn spawn_agent(&mut self, params: AgentSpawnParams) -> Result<AgentId> {
        if let Some(weapon) = params.weapon {
            if self.tables.weapon(weapon).is_none() {
                return Err(CombatError::UnknownWeapon(format!("#{}", weapon.0)));
            }
        }
        if let Some(spell) = params.spells.iter().find(|s| self.tables.spell(**s).is_none()) {
            return Err(CombatError::UnknownSpell(format!("#{}", spell.0)));
        }
        if params.spells.len() > usize::from(u8::MAX) {
            return Err(invalid_agent("spell book holds at most 255 slots"));
        }
        if params.stats.attack_speed <= Fixed::ZERO || params.stats.cast_speed <= Fixed::ZERO {
            return Err(invalid_agent("speed multipliers must be positive"));
        }
        let root = match params.summoner {
            Some(summoner) => Some(
                self.agents
                    .get(summoner)
                    .ok_or(CombatError::AgentNotFound(summoner))?
                    .root,
            ),
            None => None,
        };

        let id = self.agents.insert(Agent::from_params(&params));
        if let Some(agent) = self.agents.get_mut(id) {
            agent.root = root.unwrap_or(id);
        }
        debug!(agent = id, faction = %params.faction, "Agent spawned");
        Ok(id)
    }

    /// Remove an agent immediately, clearing every reference to it.
    ///
    /// # Errors
    ///
    /// Returns [`CombatError::AgentNotFound`] if the agent doesn't exist.
    pub fn despawn_agent(&mut self, id: AgentId) -> Result<()> {
        self.agents
            .remove(id)
            .ok_or(CombatError::AgentNotFound(id))?;
        self.forget(id);
        Ok(())
    }

    /// Write a pose reported by locomotion. The facing is normalized.
    ///
    /// # Errors
    ///
    /// Returns [`CombatError::AgentNotFound`] if the agent doesn't exist.
    pub fn update_pose(&mut self, id: AgentId, pose: Pose) -> Result<()> {
        let agent = self
            .agents
            .get_mut(id)
            .ok_or(CombatError::AgentNotFound(id))?;
        agent.pose = Pose::at(pose.position).with_facing(pose.facing);
        Ok(())
    }

    /// Record the remaining distance of an agent's active move order.
    ///
    /// Ignored if the agent has no active order.
    ///
    /// # Errors
    ///
    /// Returns [`CombatError::AgentNotFound`] if the agent doesn't exist.
    pub fn report_locomotion(&mut self, id: AgentId, remaining: Fixed) -> Result<()> {
        let agent = self
            .agents
            .get_mut(id)
            .ok_or(CombatError::AgentNotFound(id))?;
        if let Some(order) = agent.move_order.as_mut() {
            order.remaining = Some(remaining);
        }
        Ok(())
    }

    /// Queue a projectile impact for the next Resolve phase.
    ///
    /// Impacts on agents that are gone or dying by then are dropped.
    pub fn report_impact(&mut self, impact: Impact) {
        self.impacts.push(impact);
    }

    /// Attach a presentation handle to an agent.
    ///
    /// # Errors
    ///
    /// Returns [`CombatError::AgentNotFound`] if the agent doesn't exist.
    pub fn attach_presentation(&mut self, id: AgentId, handle: PresentationHandle) -> Result<()> {
        let agent = self
            .agents
            .get_mut(id)
            .ok_or(CombatError::AgentNotFound(id))?;
        agent.presentation = Some(handle);
        Ok(())
    }

    /// Record that presentation consumed the frame of `tick`.
    pub fn acknowledge_frame(&mut self, tick: u64) {
        self.last_acknowledged_frame = Some(
            self.last_acknowledged_frame
                .map_or(tick, |previous| previous.max(tick)),
        );
    }

    /// Most recent frame presentation acknowledged.
    #[must_use]
    pub const fn last_acknowledged_frame(&self) -> Option<u64> {
        self.last_acknowledged_frame
    }

    /// Valid agents of `wanted` factions within `radius` of the segment
    /// `from..to`, nearest to `from` first. Members of `exclude_root`'s
    /// family are skipped.
    ///
    /// Positions are those of the last Index phase. Agents despawned since
    /// are skipped; agents spawned since are not seen until the next tick.
    #[must_use]
    pub fn query_corridor(
        &self,
        from: Vec2Fixed,
        to: Vec2Fixed,
        radius: Fixed,
        wanted: FactionMask,
        exclude_root: Option<AgentId>,
    ) -> Vec<AgentId> {
        let mut scratch = Vec::with_capacity(self.index.capacity());
        self.index.query_capsule(from, to, radius, &mut scratch);

        let radius_sq = radius * radius;
        let mut hits: Vec<(Fixed, AgentId)> = scratch
            .iter()
            .map(|&slot| self.snapshot.at(slot))
            .filter(|a| a.is_valid_target() && wanted.accepts(a.faction))
            .filter(|a| exclude_root != Some(a.root))
            .filter(|a| segment_distance_squared(a.position, from, to) <= radius_sq)
            .map(|a| (from.distance_squared(a.position), a.id))
            .collect();
        hits.sort_unstable();
        hits.into_iter().map(|(_, id)| id).collect()
    }

    // ========================================================================
    // Decision-layer requests
    // ========================================================================

    /// Ask an agent to attack its current target this tick.
    ///
    /// # Errors
    ///
    /// Returns [`CombatError::AgentNotFound`], [`CombatError::AgentDying`], or
    /// [`CombatError::MissingCapability`] if the agent has no weapon.
    pub fn request_attack(&mut self, id: AgentId) -> Result<()> {
        let agent = self.requestable(id, Capability::Attack, None)?;
        agent.requests.attack.write(AttackRequest);
        Ok(())
    }

    /// Ask an agent to pick a target for a spell slot and queue the cast.
    ///
    /// # Errors
    ///
    /// As [`request_attack`](Self::request_attack), plus
    /// [`CombatError::InvalidSpellSlot`] for a slot outside the spell book.
    pub fn request_cast_decision(&mut self, id: AgentId, slot: u8) -> Result<()> {
        let agent = self.requestable(id, Capability::CastDecision, Some(slot))?;
        agent.requests.cast_decision.write(CastDecision { slot });
        Ok(())
    }

    /// Ask an agent to cast a spell slot at an explicit target.
    ///
    /// # Errors
    ///
    /// Same as [`request_cast_decision`](Self::request_cast_decision).
    pub fn request_cast(&mut self, id: AgentId, request: CastRequest) -> Result<()> {
        let agent = self.requestable(id, Capability::Cast, Some(request.slot))?;
        agent.requests.cast.write(request);
        Ok(())
    }

    /// Ask an agent to face a point.
    ///
    /// # Errors
    ///
    /// Returns [`CombatError::AgentNotFound`] or [`CombatError::AgentDying`].
    pub fn request_rotate(&mut self, id: AgentId, point: Vec2Fixed) -> Result<()> {
        let agent = self.requestable(id, Capability::Rotate, None)?;
        agent.requests.rotate.write(RotateRequest { point });
        Ok(())
    }

    /// Ask an agent to walk to a point.
    ///
    /// # Errors
    ///
    /// Returns [`CombatError::AgentNotFound`] or [`CombatError::AgentDying`].
    pub fn request_move(&mut self, id: AgentId, destination: Vec2Fixed) -> Result<()> {
        let agent = self.requestable(id, Capability::MoveTo, None)?;
        agent.requests.move_to.write(MoveRequest { destination });
        Ok(())
    }

    /// Last outcome recorded for an agent's request slot.
    #[must_use]
    pub fn request_status(&self, id: AgentId, capability: Capability) -> Option<Outcome> {
        self.agents
            .get(id)
            .and_then(|agent| agent.requests.status(capability))
    }

    fn requestable(
        &mut self,
        id: AgentId,
        capability: Capability,
        slot: Option<u8>,
    ) -> Result<&mut Agent> {
        let agent = self
            .agents
            .get_mut(id)
            .ok_or(CombatError::AgentNotFound(id))?;
        if !agent.is_alive() {
            return Err(CombatError::AgentDying(id));
        }

        let capable = match capability {
            Capability::Attack => agent.weapon.is_some(),
            Capability::CastDecision | Capability::Cast => agent.spells.is_some(),
            Capability::Rotate | Capability::MoveTo => true,
        };
        if !capable {
            return Err(CombatError::MissingCapability {
                agent: id,
                capability: capability.name(),
            });
        }

        if let Some(slot) = slot {
            if agent.spells.as_ref().and_then(|b| b.slot(slot)).is_none() {
                return Err(CombatError::InvalidSpellSlot { agent: id, slot });
            }
        }
        Ok(agent)
    }

    // ========================================================================
    // Tick
    // ========================================================================

    /// Advance the simulation by one tick.
    ///
    /// Never fails: missing preconditions surface as request outcomes.
    pub fn tick(&mut self) -> TickEvents {
        let now = self.now();
        let ids = self.agents.sorted_ids();
        let mut scratch = TickScratch {
            events: TickEvents {
                tick: self.tick,
                bridge: BridgeFrame::new(self.tick),
                ..TickEvents::default()
            },
            melee: Vec::new(),
        };

        // Index
        let mut snapshot = Snapshot::from_agents(self.agents.iter().map(Agent::snapshot));
        self.index.rebuild(&snapshot);

        // Plan
        let commands = self.read_agents(&snapshot, &ids, |view, agent, out| {
            if agent.is_alive() {
                retarget(view, agent, out);
                spell::plan(view, agent, out);
            }
        });
        self.apply(commands, &mut scratch);
        self.expire(&ids, &[Capability::CastDecision]);

        // Cast
        let commands = self.read_agents(&snapshot, &ids, |view, agent, out| {
            if agent.is_alive() {
                let spell_busy = spell::run(view, agent, out);
                attack::run(view, agent, spell_busy, out);
            }
        });
        self.apply(commands, &mut scratch);
        self.expire(&ids, &[Capability::Attack, Capability::Cast]);
        self.refresh_locks(now);
        self.refresh_vitals(&mut snapshot);

        // Resolve
        let commands = self.resolve_pass(&snapshot, std::mem::take(&mut scratch.melee));
        self.apply(commands, &mut scratch);
        self.refresh_vitals(&mut snapshot);

        // Bridge
        let commands = self.read_agents(&snapshot, &ids, bridge::run);
        self.apply(commands, &mut scratch);
        self.expire(&ids, &[Capability::Rotate, Capability::MoveTo]);

        scratch.events.bridge.locks = ids
            .iter()
            .filter_map(|&id| self.agents.get(id))
            .filter(|agent| agent.lock.is_locked())
            .map(|agent| (agent.id, agent.lock))
            .collect();
        self.despawn_expired(now, &mut scratch.events);
        self.snapshot = snapshot;

        self.tick += 1;
        scratch.events
    }

    fn view<'a>(&'a self, snapshot: &'a Snapshot) -> PhaseView<'a> {
        PhaseView {
            snapshot,
            index: &self.index,
            tables: &self.tables,
            config: &self.config,
            now: self.now(),
            tick: self.tick,
        }
    }

    /// Run a per-agent read pass over `ids`.
    fn read_agents<F>(&self, snapshot: &Snapshot, ids: &[AgentId], pass: F) -> CommandBuffer
    where
        F: Fn(&PhaseView<'_>, &Agent, &mut CommandBuffer) + Sync,
    {
        let view = self.view(snapshot);
        read_pass(self.config.parallel, ids, |&id, out| {
            if let Some(agent) = self.agents.get(id) {
                pass(&view, agent, out);
            }
        })
    }

    fn resolve_pass(&mut self, snapshot: &Snapshot, hits: Vec<MeleeHit>) -> CommandBuffer {
        let impacts = std::mem::take(&mut self.impacts);
        let view = self.view(snapshot);
        let parallel = self.config.parallel;

        let mut commands = read_pass(parallel, &hits, |hit, out| melee::resolve(&view, hit, out));

        let runs: Vec<&ChainRun> = self.chains.values().collect();
        commands.extend(read_pass(parallel, &runs, |run, out| {
            chain::step(&view, run, out);
        }));

        let live: Vec<&OverTimeEffect> = self.effects.values().collect();
        commands.extend(read_pass(parallel, &live, |effect, out| {
            effects::advance(&view, effect, out);
        }));

        for impact in impacts {
            if view.snapshot.valid_target(impact.target).is_none() {
                trace!(target = impact.target, "Impact on invalid target dropped");
                continue;
            }
            commands.push(match impact.polarity {
                Polarity::Harmful => WorldCommand::ApplyDamage {
                    source: impact.source,
                    target: impact.target,
                    amount: impact.amount,
                    crit: false,
                },
                Polarity::Beneficial => WorldCommand::ApplyHeal {
                    source: impact.source,
                    target: impact.target,
                    amount: impact.amount,
                },
            });
        }
        commands
    }

    /// Drop requests the owning phase left pending.
    fn expire(&mut self, ids: &[AgentId], capabilities: &[Capability]) {
        for &id in ids {
            if let Some(agent) = self.agents.get_mut(id) {
                let dropped = agent.requests.expire(capabilities);
                if dropped > 0 {
                    trace!(agent = id, dropped, "Expired unconsumed requests");
                }
            }
        }
    }

    fn refresh_locks(&mut self, now: Fixed) {
        for agent in self.agents.iter_mut() {
            agent.lock = if agent.is_alive() {
                movement_lock::compute(agent.weapon.as_ref(), agent.spells.as_ref(), now)
            } else {
                MovementLock::empty()
            };
        }
    }

    fn refresh_vitals(&self, snapshot: &mut Snapshot) {
        for agent in self.agents.iter() {
            let fraction = agent.health.map_or(Fixed::ONE, |h| h.fraction());
            snapshot.update_vitals(agent.id, agent.is_alive(), fraction);
        }
    }

    fn despawn_expired(&mut self, now: Fixed, events: &mut TickEvents) {
        let mut expired: Vec<AgentId> = self
            .agents
            .iter()
            .filter(|agent| {
                matches!(agent.vitality, Vitality::Dying { despawn_at } if despawn_at <= now)
            })
            .map(|agent| agent.id)
            .collect();
        expired.sort_unstable();

        for id in expired {
            self.agents.remove(id);
            self.forget(id);
            debug!(agent = id, "Agent despawned");
            events.despawned.push(id);
        }
    }

    // ========================================================================
    // Command application
    // ========================================================================

    fn apply(&mut self, commands: CommandBuffer, scratch: &mut TickScratch) {
        for command in commands {
            self.apply_command(command, scratch);
        }
    }

    fn apply_command(&mut self, command: WorldCommand, scratch: &mut TickScratch) {
        let frame = &mut scratch.events.bridge;
        match command {
            WorldCommand::SetTarget { agent, target } => {
                self.with_agent(agent, |a| a.target = target);
            }
            WorldCommand::ResolveRequest {
                agent,
                capability,
                outcome,
            } => self.with_agent(agent, |a| a.requests.resolve(capability, outcome)),
            WorldCommand::ReportStatus {
                agent,
                capability,
                outcome,
            } => self.with_agent(agent, |a| a.requests.report(capability, outcome)),
            WorldCommand::WriteCastRequest { agent, request } => {
                self.with_agent(agent, |a| a.requests.cast.write(request));
            }
            WorldCommand::StartAttackWindup { agent, windup } => {
                self.with_weapon(agent, |w| w.windup = Some(windup));
            }
            WorldCommand::FinishAttackWindup { agent } => self.with_weapon(agent, |w| w.windup = None),
            WorldCommand::StartAttackCooldown { agent, until } => {
                self.with_weapon(agent, |w| w.cooldown.extend_to(until));
            }
            WorldCommand::SetActionLock { agent, until } => {
                self.with_weapon(agent, |w| w.action_lock_until = w.action_lock_until.max(until));
            }
            WorldCommand::SetWeaponLock { agent, until } => {
                self.with_weapon(agent, |w| w.weapon_lock_until = w.weapon_lock_until.max(until));
            }
            WorldCommand::StartSpellWindup { agent, windup } => {
                self.with_spells(agent, |b| b.windup = Some(windup));
            }
            WorldCommand::FinishSpellWindup { agent } => self.with_spells(agent, |b| b.windup = None),
            WorldCommand::StartSpellCooldown { agent, slot, until } => {
                self.with_spells(agent, |b| {
                    if let Some(entry) = b.slots.get_mut(usize::from(slot)) {
                        entry.cooldown.extend_to(until);
                    }
                });
            }
            WorldCommand::QueueMeleeHit(hit) => scratch.melee.push(hit),
            WorldCommand::EmitProjectile(request) => frame.projectiles.push(request),
            WorldCommand::EmitSummon(request) => frame.summons.push(request),
            WorldCommand::EmitFacing(request) => frame.facings.push(request),
            WorldCommand::EmitDestination(request) => frame.destinations.push(request),
            WorldCommand::SetMoveOrder { agent, order } => {
                self.with_agent(agent, |a| a.move_order = order);
            }
            WorldCommand::SpawnChain(mut run) => {
                run.id = self.next_record_id();
                debug!(run = run.id, caster = run.caster, remaining = run.remaining, "Chain started");
                self.chains.insert(run.id, run);
            }
            WorldCommand::UpdateChain(run) => {
                if let Some(slot) = self.chains.get_mut(&run.id) {
                    *slot = run;
                }
            }
            WorldCommand::RemoveChain { id } => {
                self.chains.remove(&id);
            }
            WorldCommand::UpsertEffect(effect) => self.upsert_effect(effect),
            WorldCommand::UpdateEffect {
                id,
                remaining,
                next_tick,
            } => {
                if let Some(effect) = self.effects.get_mut(&id) {
                    effect.remaining = remaining;
                    effect.next_tick = next_tick;
                }
            }
            WorldCommand::RemoveEffect { id } => {
                if self.effects.remove(&id).is_some() {
                    debug!(effect = id, "Effect expired");
                }
            }
            WorldCommand::ApplyDamage {
                source,
                target,
                amount,
                crit,
            } => self.apply_damage(source, target, amount, crit, &mut scratch.events),
            WorldCommand::ApplyHeal {
                source,
                target,
                amount,
            } => self.apply_heal(source, target, amount, &mut scratch.events),
        }
    }

    fn with_agent(&mut self, id: AgentId, f: impl FnOnce(&mut Agent)) {
        match self.agents.get_mut(id) {
            Some(agent) => f(agent),
            None => trace!(agent = id, "Command for missing agent dropped"),
        }
    }

    fn with_weapon(&mut self, id: AgentId, f: impl FnOnce(&mut WeaponLoadout)) {
        self.with_agent(id, |agent| {
            if let Some(weapon) = agent.weapon.as_mut() {
                f(weapon);
            }
        });
    }

    fn with_spells(&mut self, id: AgentId, f: impl FnOnce(&mut SpellBook)) {
        self.with_agent(id, |agent| {
            if let Some(book) = agent.spells.as_mut() {
                f(book);
            }
        });
    }

    fn next_record_id(&mut self) -> u32 {
        self.last_record_id = self.last_record_id.wrapping_add(1);
        self.last_record_id
    }

    fn upsert_effect(&mut self, mut effect: OverTimeEffect) {
        let key = effect.refresh_key();
        if let Some(live) = self.effects.values_mut().find(|e| e.refresh_key() == key) {
            live.refresh_from(&effect);
            debug!(effect = live.id, "Effect refreshed");
            return;
        }
        effect.id = self.next_record_id();
        debug!(effect = effect.id, caster = effect.caster, "Effect placed");
        self.effects.insert(effect.id, effect);
    }

    fn apply_damage(
        &mut self,
        source: AgentId,
        target: AgentId,
        amount: u32,
        crit: bool,
        events: &mut TickEvents,
    ) {
        let Some(agent) = self.agents.get_mut(target) else {
            return;
        };
        if !agent.is_alive() {
            return;
        }
        let Some(health) = agent.health.as_mut() else {
            return;
        };

        let applied = health.apply_damage(amount);
        events.damage.push(DamageEvent {
            source,
            target,
            amount: applied,
            crit,
        });
        if health.is_depleted() {
            self.kill(target, events);
        }
    }

    fn apply_heal(&mut self, source: AgentId, target: AgentId, amount: u32, events: &mut TickEvents) {
        let Some(agent) = self.agents.get_mut(target) else {
            return;
        };
        if !agent.is_alive() {
            return;
        }
        if let Some(health) = agent.health.as_mut() {
            let applied = health.heal(amount);
            events.heals.push(HealEvent {
                source,
                target,
                amount: applied,
            });
        }
    }

    /// Enter the death grace period and tear down everything bound to `id`.
    fn kill(&mut self, id: AgentId, events: &mut TickEvents) {
        let despawn_at = self.now() + self.config.death_grace_seconds;
        if let Some(agent) = self.agents.get_mut(id) {
            agent.vitality = Vitality::Dying { despawn_at };
            let dropped = agent.requests.expire(&Capability::ALL);
            if let Some(weapon) = agent.weapon.as_mut() {
                weapon.windup = None;
            }
            if let Some(book) = agent.spells.as_mut() {
                book.windup = None;
            }
            agent.move_order = None;
            agent.target = None;
            agent.lock = MovementLock::empty();
            debug!(agent = id, dropped, despawn_at = %despawn_at, "Agent died");
        }
        self.forget(id);
        events.deaths.push(id);
    }

    /// Clear other agents' targets, chain runs and effects referencing `id`.
    fn forget(&mut self, id: AgentId) {
        self.snapshot.mark_gone(id);
        for other in self.agents.iter_mut() {
            if other.target == Some(id) {
                other.target = None;
            }
        }
        self.chains.retain(|_, run| run.current != id);
        self.effects.retain(|_, effect| !effect.is_bound_to(id));
    }

    // ========================================================================
    // State hashing and snapshots
    // ========================================================================

    /// Calculate a hash of the current simulation state.
    ///
    /// Two simulations with identical state produce identical hashes,
    /// regardless of whether their read passes ran in parallel.
    #[must_use]
    pub fn state_hash(&self) -> u64 {
        let mut hasher = DefaultHasher::new();

        self.tick.hash(&mut hasher);
        self.config.seed.hash(&mut hasher);

        let ids = self.agents.sorted_ids();
        ids.len().hash(&mut hasher);
        for id in ids {
            if let Some(agent) = self.agents.get(id) {
                agent.hash_state(&mut hasher);
            }
        }

        self.chains.len().hash(&mut hasher);
        for run in self.chains.values() {
            run.hash(&mut hasher);
        }
        self.effects.len().hash(&mut hasher);
        for effect in self.effects.values() {
            effect.hash(&mut hasher);
        }
        self.impacts.hash(&mut hasher);
        self.last_record_id.hash(&mut hasher);

        hasher.finish()
    }

    /// Serialize the simulation state.
    ///
    /// # Errors
    ///
    /// Returns [`CombatError::Serialization`] if encoding fails.
    pub fn serialize(&self) -> Result<Vec<u8>> {
        Ok(bincode::serialize(self)?)
    }

    /// Deserialize simulation state from bytes.
    ///
    /// # Errors
    ///
    /// Returns [`CombatError::Serialization`] if decoding fails.
    pub fn deserialize(data: &[u8]) -> Result<Self> {
        let mut sim: Self = bincode::deserialize(data)?;
        sim.tables.prepare();
        sim.index = SpatialIndex::new(sim.config.cell_size, sim.config.query_capacity);
        sim.snapshot = Snapshot::default();
        Ok(sim)
    }
}

fn invalid_agent(reason: &str) -> CombatError {
    CombatError::InvalidConfig {
        entry: "agent".to_string(),
        reason: reason.to_string(),
    }
}

/// Plain auto-targeting for armed agents.
fn retarget(view: &PhaseView<'_>, agent: &Agent, out: &mut CommandBuffer) {
    let Some(loadout) = agent.weapon.as_ref() else {
        return;
    };
    let Some(weapon) = view.tables.weapon(loadout.weapon) else {
        return;
    };
    let Some(seeker) = view.snapshot.get(agent.id) else {
        return;
    };

    let target = targeting::acquire_with_hysteresis(
        view.snapshot,
        view.index,
        seeker,
        agent.target,
        weapon.acquire_range(),
        agent.faction.opposing().mask(),
        view.config.min_switch_distance,
    );
    if target != agent.target {
        trace!(agent = agent.id, from = ?agent.target, to = ?target, "Target switched");
        out.push(WorldCommand::SetTarget {
            agent: agent.id,
            target,
        });
    }
}

/// Run `pass` over every item, concatenating command buffers in item order.
///
/// With the `parallel` feature and `parallel == true` items are processed on
/// the rayon pool; the order-preserving collect keeps output identical.
fn read_pass<T, F>(parallel: bool, items: &[T], pass: F) -> CommandBuffer
where
    T: Sync,
    F: Fn(&T, &mut CommandBuffer) + Sync,
{
    #[cfg(feature = "parallel")]
    {
        use rayon::prelude::*;

        if parallel {
            let buffers: Vec<CommandBuffer> = items
                .par_iter()
                .map(|item| {
                    let mut out = CommandBuffer::new();
                    pass(item, &mut out);
                    out
                })
                .collect();
            let mut merged = CommandBuffer::new();
            for buffer in buffers {
                merged.extend(buffer);
            }
            return merged;
        }
    }
    #[cfg(not(feature = "parallel"))]
    let _ = parallel;

    let mut out = CommandBuffer::new();
    for item in items {
        pass(item, &mut out);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::components::CastTarget;
    use crate::data::AcquireMode;
    use crate::effects::EffectAnchor;
    use crate::math::cone_cos_squared;

    const TABLES: &str = r#"
        CombatTables(
            weapons: [
                WeaponConfig(
                    name: "sword",
                    range: 2.0,
                    damage: 10,
                    cooldown_seconds: 1.0,
                    style: Melee(MeleeProfile(half_angle_degrees: 60.0, max_targets: 2, swing_lock_seconds: 0.2)),
                ),
                WeaponConfig(
                    name: "bow",
                    range: 10.0,
                    damage: 6,
                    cooldown_seconds: 1.0,
                    style: Ranged(RangedProfile(windup_seconds: 0.5, projectile_speed: 20.0, max_distance: 30.0)),
                ),
            ],
            spells: [
                SpellConfig(
                    name: "blaze",
                    range: 10.0,
                    cast_time_seconds: 0.0,
                    cooldown_seconds: 10.0,
                    acquire: ClosestEnemy,
                    kind: EffectOverTimeArea(
                        payload: Payload(amount: 2, polarity: Harmful),
                        radius: 3.0,
                        interval_seconds: 0.5,
                        duration_seconds: 1.5,
                    ),
                ),
                SpellConfig(
                    name: "mend",
                    range: 10.0,
                    cast_time_seconds: 0.5,
                    cooldown_seconds: 2.0,
                    post_cast_attack_lock_seconds: 0.25,
                    acquire: LowestHealthAlly,
                    kind: EffectOverTimeTarget(
                        payload: Payload(amount: 5, polarity: Beneficial),
                        interval_seconds: 1.0,
                        duration_seconds: 2.0,
                    ),
                ),
            ],
        )
    "#;

    fn sim() -> Simulation {
        let tables = CombatTables::from_ron_str(TABLES).unwrap();
        Simulation::new(SimulationConfig::default().with_parallel(false), tables).unwrap()
    }

    fn spawn(sim: &mut Simulation, faction: Faction, x: i32, z: i32) -> AgentId {
        sim.spawn_agent(AgentSpawnParams::new(faction, Vec2Fixed::from_num(x, z)).with_health(100))
            .unwrap()
    }

    fn armed(sim: &mut Simulation, faction: Faction, x: i32, z: i32, weapon: &str) -> AgentId {
        let weapon = sim.tables().weapon_id(weapon).unwrap();
        sim.spawn_agent(
            AgentSpawnParams::new(faction, Vec2Fixed::from_num(x, z))
                .with_health(100)
                .with_weapon(weapon),
        )
        .unwrap()
    }

    fn caster(sim: &mut Simulation, faction: Faction, x: i32, z: i32, spell: &str) -> AgentId {
        let spell = sim.tables().spell_id(spell).unwrap();
        sim.spawn_agent(
            AgentSpawnParams::new(faction, Vec2Fixed::from_num(x, z))
                .with_health(100)
                .with_spells([spell]),
        )
        .unwrap()
    }

    fn health(sim: &Simulation, id: AgentId) -> u32 {
        sim.agent(id).and_then(|a| a.health).map_or(0, |h| h.current)
    }

    #[test]
    fn test_simulation_new() {
        let sim = sim();
        assert_eq!(sim.current_tick(), 0);
        assert!(sim.agents().is_empty());
        assert_eq!(sim.now(), Fixed::ZERO);
    }

    #[test]
    fn test_new_rejects_invalid_config() {
        let config = SimulationConfig::default().with_tick_rate(0);
        assert!(Simulation::new(config, CombatTables::default()).is_err());
    }

    #[test]
    fn test_spawn_assigns_ids_and_roots() {
        let mut sim = sim();
        let a = spawn(&mut sim, Faction::Ally, 0, 0);
        let b = sim
            .spawn_agent(AgentSpawnParams::new(Faction::Ally, Vec2Fixed::ZERO).with_summoner(a))
            .unwrap();
        assert_eq!(a, 1);
        assert_eq!(b, 2);
        assert_eq!(sim.agent(b).unwrap().root, a);
        assert_eq!(sim.agent(a).unwrap().root, a);
    }

    #[test]
    fn test_spawn_rejects_unknown_ids() {
        let mut sim = sim();
        let bad_weapon = AgentSpawnParams::new(Faction::Ally, Vec2Fixed::ZERO).with_weapon(WeaponId(9));
        assert!(matches!(
            sim.spawn_agent(bad_weapon),
            Err(CombatError::UnknownWeapon(_))
        ));
        let bad_spell = AgentSpawnParams::new(Faction::Ally, Vec2Fixed::ZERO).with_spells([SpellId(7)]);
        assert!(matches!(
            sim.spawn_agent(bad_spell),
            Err(CombatError::UnknownSpell(_))
        ));
        let orphan = AgentSpawnParams::new(Faction::Ally, Vec2Fixed::ZERO).with_summoner(42);
        assert!(matches!(
            sim.spawn_agent(orphan),
            Err(CombatError::AgentNotFound(42))
        ));
        assert!(sim.agents().is_empty());
    }

    #[test]
    fn test_request_errors() {
        let mut sim = sim();
        let unarmed = spawn(&mut sim, Faction::Ally, 0, 0);
        assert!(matches!(
            sim.request_attack(unarmed),
            Err(CombatError::MissingCapability { .. })
        ));
        assert!(matches!(
            sim.request_cast_decision(unarmed, 0),
            Err(CombatError::MissingCapability { .. })
        ));
        assert!(matches!(
            sim.request_attack(99),
            Err(CombatError::AgentNotFound(99))
        ));

        let mage = caster(&mut sim, Faction::Ally, 1, 0, "blaze");
        assert!(matches!(
            sim.request_cast_decision(mage, 1),
            Err(CombatError::InvalidSpellSlot { slot: 1, .. })
        ));
        assert!(sim.request_cast_decision(mage, 0).is_ok());
        assert!(sim.request_move(unarmed, Vec2Fixed::from_num(5, 5)).is_ok());
    }

    #[test]
    fn test_unconsumed_request_expires_with_failure() {
        let mut sim = sim();
        let knight = armed(&mut sim, Faction::Ally, 0, 0, "sword");
        sim.request_attack(knight).unwrap();
        sim.tick();
        assert_eq!(sim.request_status(knight, Capability::Attack), Some(Outcome::Failure));
        assert!(!sim.agent(knight).unwrap().requests.is_pending(Capability::Attack));
    }

    #[test]
    fn test_melee_hits_two_in_cone_and_spares_behind() {
        let mut sim = sim();
        let knight = armed(&mut sim, Faction::Ally, 0, 0, "sword");
        let front = spawn(&mut sim, Faction::Enemy, 0, 1);
        let flank = spawn(&mut sim, Faction::Enemy, 1, 1);
        let behind = spawn(&mut sim, Faction::Enemy, 0, -1);
        let friend = spawn(&mut sim, Faction::Ally, 0, 2);

        sim.tick();
        assert_eq!(sim.agent(knight).unwrap().target, Some(front));

        sim.request_attack(knight).unwrap();
        let events = sim.tick();
        let mut hit: Vec<_> = events.damage.iter().map(|d| d.target).collect();
        hit.sort_unstable();
        assert_eq!(hit, vec![front, flank]);
        assert_eq!(health(&sim, behind), 100);
        assert_eq!(health(&sim, friend), 100);
        assert_eq!(sim.request_status(knight, Capability::Attack), Some(Outcome::Success));
    }

    #[test]
    fn test_corridor_query_orders_along_segment() {
        let mut sim = sim();
        let archer = spawn(&mut sim, Faction::Ally, 0, 0);
        let pet = sim
            .spawn_agent(
                AgentSpawnParams::new(Faction::Ally, Vec2Fixed::from_num(0, 2))
                    .with_health(10)
                    .with_summoner(archer),
            )
            .unwrap();
        let far = spawn(&mut sim, Faction::Enemy, 0, 6);
        let near = spawn(&mut sim, Faction::Enemy, 0, 3);
        spawn(&mut sim, Faction::Enemy, 2, 4);
        spawn(&mut sim, Faction::Enemy, 0, 12);

        let from = Vec2Fixed::ZERO;
        let to = Vec2Fixed::from_num(0, 10);
        let radius = Fixed::from_num(0.5);
        assert!(sim.query_corridor(from, to, radius, FactionMask::all(), None).is_empty());

        sim.tick();
        assert_eq!(
            sim.query_corridor(from, to, radius, FactionMask::ENEMY, Some(archer)),
            vec![near, far]
        );
        assert_eq!(
            sim.query_corridor(from, to, radius, FactionMask::all(), Some(archer)),
            vec![near, far]
        );
        assert_eq!(
            sim.query_corridor(from, to, radius, FactionMask::ALLY, None),
            vec![archer, pet]
        );

        sim.despawn_agent(near).unwrap();
        assert_eq!(
            sim.query_corridor(from, to, radius, FactionMask::ENEMY, None),
            vec![far]
        );
    }

    #[test]
    fn test_wide_arc_sweeps_the_flanks() {
        let tables = CombatTables::from_ron_str(
            r#"(weapons: [WeaponConfig(name: "scythe", range: 2.0, damage: 10, cooldown_seconds: 1.0,
                style: Melee(MeleeProfile(half_angle_degrees: 180.0, max_targets: 4)))])"#,
        )
        .unwrap();
        let scythe = tables.weapon_id("scythe").unwrap();
        let mut sim =
            Simulation::new(SimulationConfig::default().with_parallel(false), tables).unwrap();
        let reaper = sim
            .spawn_agent(
                AgentSpawnParams::new(Faction::Ally, Vec2Fixed::ZERO)
                    .with_health(100)
                    .with_weapon(scythe),
            )
            .unwrap();
        let front = spawn(&mut sim, Faction::Enemy, 0, 1);
        let left = spawn(&mut sim, Faction::Enemy, -1, 0);
        let back_right = spawn(&mut sim, Faction::Enemy, 1, -1);
        let straight_behind = spawn(&mut sim, Faction::Enemy, 0, -1);

        sim.tick();
        sim.request_attack(reaper).unwrap();
        let events = sim.tick();

        let mut hit: Vec<_> = events.damage.iter().map(|d| d.target).collect();
        hit.sort_unstable();
        assert_eq!(hit, vec![front, left, back_right]);
        assert_eq!(health(&sim, straight_behind), 100);
        assert_eq!(sim.request_status(reaper, Capability::Attack), Some(Outcome::Success));
    }

    #[test]
    fn test_melee_swing_locks_movement() {
        let mut sim = sim();
        let knight = armed(&mut sim, Faction::Ally, 0, 0, "sword");
        spawn(&mut sim, Faction::Enemy, 0, 1);
        sim.tick();
        sim.request_attack(knight).unwrap();
        let events = sim.tick();
        assert_eq!(events.bridge.lock_of(knight), MovementLock::ATTACKING);

        // 0.2s swing lock at 20 Hz: four more ticks.
        for _ in 0..4 {
            sim.tick();
        }
        let events = sim.tick();
        assert!(events.bridge.lock_of(knight).is_empty());
    }

    #[test]
    fn test_cooldown_rejects_second_attack() {
        let mut sim = sim();
        let knight = armed(&mut sim, Faction::Ally, 0, 0, "sword");
        let enemy = spawn(&mut sim, Faction::Enemy, 0, 1);
        sim.tick();
        sim.request_attack(knight).unwrap();
        sim.tick();
        let before = sim.agent(knight).unwrap().weapon.unwrap().cooldown;

        sim.request_attack(knight).unwrap();
        let events = sim.tick();
        assert!(events.damage.is_empty());
        assert_eq!(health(&sim, enemy), 90);
        assert_eq!(sim.request_status(knight, Capability::Attack), Some(Outcome::Failure));
        assert_eq!(sim.agent(knight).unwrap().weapon.unwrap().cooldown, before);
    }

    #[test]
    fn test_death_clears_references() {
        let mut sim = sim();
        let archer = armed(&mut sim, Faction::Ally, 0, 0, "bow");
        let victim = sim
            .spawn_agent(AgentSpawnParams::new(Faction::Enemy, Vec2Fixed::from_num(0, 5)).with_health(5))
            .unwrap();
        sim.tick();
        assert_eq!(sim.agent(archer).unwrap().target, Some(victim));

        sim.report_impact(Impact {
            source: archer,
            target: victim,
            amount: 50,
            polarity: Polarity::Harmful,
        });
        let events = sim.tick();
        assert_eq!(events.deaths, vec![victim]);
        assert_eq!(events.damage[0].amount, 5);
        assert_eq!(sim.agent(archer).unwrap().target, None);
        assert!(!sim.agent(victim).unwrap().is_alive());
        assert!(matches!(
            sim.request_move(victim, Vec2Fixed::ZERO),
            Err(CombatError::AgentDying(_))
        ));

        // 1.5s grace at 20 Hz.
        let mut despawned = Vec::new();
        for _ in 0..40 {
            despawned.extend(sim.tick().despawned);
        }
        assert_eq!(despawned, vec![victim]);
        assert!(sim.agent(victim).is_none());
    }

    #[test]
    fn test_area_effect_pulse_count() {
        let mut sim = sim();
        let mage = caster(&mut sim, Faction::Ally, 0, 0, "blaze");
        let enemy = spawn(&mut sim, Faction::Enemy, 0, 4);
        let ally = spawn(&mut sim, Faction::Ally, 1, 4);

        sim.request_cast_decision(mage, 0).unwrap();
        sim.tick();
        assert_eq!(sim.request_status(mage, Capability::CastDecision), Some(Outcome::Success));
        assert_eq!(sim.request_status(mage, Capability::Cast), Some(Outcome::Success));
        let effect = *sim.effects().next().unwrap();
        assert!(matches!(effect.anchor, EffectAnchor::Area { .. }));

        let mut pulses = 0;
        for _ in 0..60 {
            pulses += sim.tick().damage.iter().filter(|d| d.target == enemy).count();
        }
        // 1.5s duration, 0.5s interval.
        assert_eq!(pulses, 3);
        assert_eq!(health(&sim, enemy), 94);
        assert_eq!(health(&sim, ally), 100);
        assert_eq!(sim.effects().count(), 0);
    }

    #[test]
    fn test_recast_refreshes_instead_of_stacking() {
        let mut sim = sim();
        let mage = caster(&mut sim, Faction::Ally, 0, 0, "blaze");
        spawn(&mut sim, Faction::Enemy, 0, 4);
        sim.request_cast_decision(mage, 0).unwrap();
        sim.tick();
        let first = *sim.effects().next().unwrap();

        if let Some(book) = sim.agents.get_mut(mage).and_then(|a| a.spells.as_mut()) {
            book.slots[0].cooldown = Default::default();
        }
        sim.tick();
        sim.request_cast_decision(mage, 0).unwrap();
        sim.tick();

        let effects: Vec<_> = sim.effects().copied().collect();
        assert_eq!(effects.len(), 1);
        assert_eq!(effects[0].id, first.id);
        assert!(effects[0].next_tick > first.next_tick);
    }

    #[test]
    fn test_targeted_heal_windup_locks_and_heals_lowest() {
        let mut sim = sim();
        let healer = caster(&mut sim, Faction::Ally, 0, 0, "mend");
        let wounded = spawn(&mut sim, Faction::Ally, 3, 0);
        if let Some(h) = sim.agents.get_mut(wounded).and_then(|a| a.health.as_mut()) {
            h.apply_damage(40);
        }

        sim.request_cast_decision(healer, 0).unwrap();
        let events = sim.tick();
        assert_eq!(sim.request_status(healer, Capability::Cast), Some(Outcome::Running));
        assert_eq!(events.bridge.lock_of(healer), MovementLock::CASTING);
        assert_eq!(events.bridge.facings.len(), 1);

        let mut healed = 0;
        for _ in 0..80 {
            healed += sim
                .tick()
                .heals
                .iter()
                .filter(|h| h.target == wounded)
                .map(|h| h.amount)
                .sum::<u32>();
        }
        assert_eq!(healed, 10);
        assert_eq!(sim.request_status(healer, Capability::Cast), Some(Outcome::Success));
    }

    #[test]
    fn test_move_rejected_while_locked_then_accepted() {
        let mut sim = sim();
        let healer = caster(&mut sim, Faction::Ally, 0, 0, "mend");
        spawn(&mut sim, Faction::Ally, 3, 0);
        sim.request_cast_decision(healer, 0).unwrap();
        sim.tick();

        sim.request_move(healer, Vec2Fixed::from_num(10, 0)).unwrap();
        let events = sim.tick();
        assert_eq!(sim.request_status(healer, Capability::MoveTo), Some(Outcome::Failure));
        assert_eq!(events.bridge.destinations.len(), 1);
        assert!(!events.bridge.destinations[0].valid);

        for _ in 0..20 {
            sim.tick();
        }
        sim.request_move(healer, Vec2Fixed::from_num(10, 0)).unwrap();
        let events = sim.tick();
        assert_eq!(sim.request_status(healer, Capability::MoveTo), Some(Outcome::Running));
        assert!(events.bridge.destinations[0].valid);

        sim.report_locomotion(healer, Fixed::from_num(0.1)).unwrap();
        sim.tick();
        assert_eq!(sim.request_status(healer, Capability::MoveTo), Some(Outcome::Success));
        assert!(sim.agent(healer).unwrap().move_order.is_none());
    }

    #[test]
    fn test_rotate_allowed_while_locked() {
        let mut sim = sim();
        let healer = caster(&mut sim, Faction::Ally, 0, 0, "mend");
        spawn(&mut sim, Faction::Ally, 3, 0);
        sim.request_cast_decision(healer, 0).unwrap();
        sim.tick();

        sim.request_rotate(healer, Vec2Fixed::from_num(-5, 0)).unwrap();
        let events = sim.tick();
        assert_eq!(sim.request_status(healer, Capability::Rotate), Some(Outcome::Success));
        assert!(events
            .bridge
            .facings
            .iter()
            .any(|f| f.agent == healer && f.point == Vec2Fixed::from_num(-5, 0)));
    }

    #[test]
    fn test_explicit_cast_out_of_range_fails() {
        let mut sim = sim();
        let mage = caster(&mut sim, Faction::Ally, 0, 0, "blaze");
        sim.request_cast(
            mage,
            CastRequest {
                slot: 0,
                target: CastTarget::Point(Vec2Fixed::from_num(50, 0)),
            },
        )
        .unwrap();
        sim.tick();
        assert_eq!(sim.request_status(mage, Capability::Cast), Some(Outcome::Failure));
        assert_eq!(sim.effects().count(), 0);
    }

    #[test]
    fn test_single_target_spell_at_point_rejected_without_side_effects() {
        let mut sim = sim();
        let healer = caster(&mut sim, Faction::Ally, 0, 0, "mend");
        sim.request_cast(
            healer,
            CastRequest {
                slot: 0,
                target: CastTarget::Point(Vec2Fixed::from_num(2, 0)),
            },
        )
        .unwrap();
        let events = sim.tick();

        assert_eq!(sim.request_status(healer, Capability::Cast), Some(Outcome::Failure));
        assert!(events.bridge.lock_of(healer).is_empty());
        let book = sim.agent(healer).unwrap().spells.as_ref().unwrap();
        assert!(book.windup.is_none());
        assert_eq!(book.slots[0].cooldown.next_allowed, Fixed::ZERO);
        assert!(events.bridge.facings.iter().all(|f| f.agent != healer));
    }

    #[test]
    fn test_melee_widens_mask_when_primary_empty() {
        let mut sim = sim();
        let a = spawn(&mut sim, Faction::Ally, 0, 0);
        let e = spawn(&mut sim, Faction::Enemy, 0, 1);
        let snapshot = Snapshot::from_agents(sim.agents.iter().map(Agent::snapshot));
        sim.index.rebuild(&snapshot);
        let view = sim.view(&snapshot);

        let hit = MeleeHit {
            attacker: a,
            root: a,
            faction: Faction::Ally,
            origin: Vec2Fixed::ZERO,
            forward: Vec2Fixed::FORWARD,
            range: Fixed::from_num(2),
            cos_half_angle_sq: cone_cos_squared(Fixed::from_num(45)),
            strike: crate::data::Strike {
                damage: 3,
                crit_chance: Fixed::ZERO,
                crit_multiplier: Fixed::ONE,
            },
            max_targets: 1,
            primary_mask: FactionMask::ALLY,
        };
        let mut out = CommandBuffer::new();
        melee::resolve(&view, &hit, &mut out);
        let commands: Vec<_> = out.into_iter().collect();
        assert_eq!(
            commands,
            vec![WorldCommand::ApplyDamage {
                source: a,
                target: e,
                amount: 3,
                crit: false
            }]
        );
    }

    #[test]
    fn test_acquire_mode_none_targets_self() {
        let mut sim = sim();
        let mage = caster(&mut sim, Faction::Ally, 0, 0, "mend");
        let snapshot = Snapshot::from_agents(sim.agents.iter().map(Agent::snapshot));
        sim.index.rebuild(&snapshot);
        let view = sim.view(&snapshot);

        let mut mend = sim.tables().spell(SpellId(1)).unwrap().clone();
        mend.acquire = AcquireMode::None;
        let me = snapshot.get(mage).unwrap();
        assert_eq!(
            spell::select_target(&view, me, &mend),
            Some(CastTarget::Agent {
                target: mage,
                point: Vec2Fixed::ZERO
            })
        );
    }

    #[test]
    fn test_state_hash_and_snapshot_roundtrip() {
        let mut sim = sim();
        let knight = armed(&mut sim, Faction::Ally, 0, 0, "sword");
        spawn(&mut sim, Faction::Enemy, 0, 1);
        sim.tick();
        sim.request_attack(knight).unwrap();
        sim.tick();

        let bytes = sim.serialize().unwrap();
        let mut restored = Simulation::deserialize(&bytes).unwrap();
        assert_eq!(restored.state_hash(), sim.state_hash());

        for _ in 0..30 {
            sim.tick();
            restored.tick();
        }
        assert_eq!(restored.state_hash(), sim.state_hash());
    }

    #[test]
    fn test_presentation_handle_not_hashed() {
        let mut sim = sim();
        let a = spawn(&mut sim, Faction::Ally, 0, 0);
        let before = sim.state_hash();
        sim.attach_presentation(a, PresentationHandle { index: 3, generation: 1 })
            .unwrap();
        assert_eq!(sim.state_hash(), before);
        assert!(sim.agent(a).unwrap().presentation.is_some());
    }

    #[test]
    fn test_acknowledge_frame_is_monotonic() {
        let mut sim = sim();
        assert_eq!(sim.last_acknowledged_frame(), None);
        sim.acknowledge_frame(4);
        sim.acknowledge_frame(2);
        assert_eq!(sim.last_acknowledged_frame(), Some(4));
    }
}
