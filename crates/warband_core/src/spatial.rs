//! Uniform-grid spatial index and per-phase agent snapshots.
//!
//! The index is rebuilt from scratch every tick and is the only structure
//! queried for "who is near me". Buckets hold indices into the [`Snapshot`]
//! taken at the start of the tick, so a query never touches live agent
//! state. Queries are broad-phase: callers apply exact distance and faction
//! filtering themselves.

use std::collections::HashMap;

use tracing::trace;

use crate::components::AgentId;
use crate::factions::Faction;
use crate::math::{Fixed, Vec2Fixed};

/// Read-only view of one agent, as seen by a phase's read pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AgentSnapshot {
    /// Agent handle.
    pub id: AgentId,
    /// Position on the ground plane.
    pub position: Vec2Fixed,
    /// Unit facing vector.
    pub facing: Vec2Fixed,
    /// Faction tag.
    pub faction: Faction,
    /// Root agent (self, or the summoner).
    pub root: AgentId,
    /// Not in its death grace period.
    pub alive: bool,
    /// Has health, so it can be damaged and healed.
    pub targetable: bool,
    /// Health as a fraction of max.
    pub health_fraction: Fixed,
}

impl AgentSnapshot {
    /// Whether this agent can currently be hit, healed or targeted.
    #[must_use]
    pub const fn is_valid_target(&self) -> bool {
        self.alive && self.targetable
    }
}

/// Agent snapshots for one tick, in ascending id order.
#[derive(Debug, Clone, Default)]
pub struct Snapshot {
    agents: Vec<AgentSnapshot>,
    slots: HashMap<AgentId, u32>,
}

impl Snapshot {
    /// Build a snapshot. Agents are sorted by id.
    #[must_use]
    pub fn from_agents(agents: impl IntoIterator<Item = AgentSnapshot>) -> Self {
        let mut agents: Vec<AgentSnapshot> = agents.into_iter().collect();
        agents.sort_unstable_by_key(|a| a.id);
        let slots = agents
            .iter()
            .enumerate()
            .map(|(i, a)| (a.id, i as u32))
            .collect();
        Self { agents, slots }
    }

    /// Look up an agent by id.
    #[must_use]
    pub fn get(&self, id: AgentId) -> Option<&AgentSnapshot> {
        self.slots.get(&id).map(|&i| &self.agents[i as usize])
    }

    /// Look up a live, targetable agent by id.
    #[must_use]
    pub fn valid_target(&self, id: AgentId) -> Option<&AgentSnapshot> {
        self.get(id).filter(|a| a.is_valid_target())
    }

    /// Agent at a bucket index. Indices come from [`SpatialIndex`] queries.
    #[must_use]
    pub fn at(&self, index: u32) -> &AgentSnapshot {
        &self.agents[index as usize]
    }

    /// All agents in id order.
    pub fn iter(&self) -> impl Iterator<Item = &AgentSnapshot> {
        self.agents.iter()
    }

    /// Number of agents.
    #[must_use]
    pub fn len(&self) -> usize {
        self.agents.len()
    }

    /// Check if the snapshot is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.agents.is_empty()
    }

    /// Re-read vitals between phases. Positions are constant within a tick.
    pub fn update_vitals(&mut self, id: AgentId, alive: bool, health_fraction: Fixed) {
        if let Some(&i) = self.slots.get(&id) {
            let agent = &mut self.agents[i as usize];
            agent.alive = alive;
            agent.health_fraction = health_fraction;
        }
    }

    /// Mark an agent as gone once it has been despawned.
    pub fn mark_gone(&mut self, id: AgentId) {
        if let Some(&i) = self.slots.get(&id) {
            let agent = &mut self.agents[i as usize];
            agent.alive = false;
            agent.targetable = false;
        }
    }
}

/// Uniform grid over the ground plane.
///
/// Cell size should be around the largest common query radius.
#[derive(Debug, Clone)]
pub struct SpatialIndex {
    cell_size: Fixed,
    capacity: usize,
    /// Cell hash to snapshot indices, in ascending id order per bucket.
    buckets: HashMap<i64, Vec<u32>>,
}

impl Default for SpatialIndex {
    fn default() -> Self {
        Self::new(Fixed::from_num(4), 256)
    }
}

impl SpatialIndex {
    /// Create an empty index.
    ///
    /// `capacity` bounds the number of candidates a single query returns.
    #[must_use]
    pub fn new(cell_size: Fixed, capacity: usize) -> Self {
        Self {
            cell_size,
            capacity,
            buckets: HashMap::new(),
        }
    }

    /// Candidate limit per query.
    #[must_use]
    pub const fn capacity(&self) -> usize {
        self.capacity
    }

    /// Clear and re-bucket every targetable agent in `snapshot`.
    ///
    /// Buckets that were occupied last tick keep their allocation.
    pub fn rebuild(&mut self, snapshot: &Snapshot) {
        self.buckets.retain(|_, bucket| {
            let keep = !bucket.is_empty();
            bucket.clear();
            keep
        });

        for (index, agent) in snapshot.agents.iter().enumerate() {
            if !agent.is_valid_target() {
                continue;
            }
            let (cx, cz) = self.cell_coords(agent.position);
            self.buckets
                .entry(cell_hash(cx, cz))
                .or_default()
                .push(index as u32);
        }
    }

    /// Number of agents in the index.
    #[must_use]
    pub fn len(&self) -> usize {
        self.buckets.values().map(Vec::len).sum()
    }

    /// Check if the index holds no agents.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.buckets.values().all(Vec::is_empty)
    }

    /// Candidates from every cell overlapping the circle.
    ///
    /// Writes into `out` (cleared first). Returns `true` if results were
    /// truncated at the capacity limit.
    pub fn query_circle(&self, center: Vec2Fixed, radius: Fixed, out: &mut Vec<u32>) -> bool {
        let min = Vec2Fixed::new(center.x - radius, center.y - radius);
        let max = Vec2Fixed::new(center.x + radius, center.y + radius);
        self.query_rect(min, max, out)
    }

    /// Candidates from every cell overlapping the capsule from `a` to `b`.
    ///
    /// Covers the bounding box of the segment expanded by `radius`; use
    /// [`segment_distance_squared`] for the exact test.
    pub fn query_capsule(
        &self,
        a: Vec2Fixed,
        b: Vec2Fixed,
        radius: Fixed,
        out: &mut Vec<u32>,
    ) -> bool {
        let min = Vec2Fixed::new(a.x.min(b.x) - radius, a.y.min(b.y) - radius);
        let max = Vec2Fixed::new(a.x.max(b.x) + radius, a.y.max(b.y) + radius);
        self.query_rect(min, max, out)
    }

    fn query_rect(&self, min: Vec2Fixed, max: Vec2Fixed, out: &mut Vec<u32>) -> bool {
        out.clear();
        if self.buckets.is_empty() {
            return false;
        }

        let (min_x, min_z) = self.cell_coords(min);
        let (max_x, max_z) = self.cell_coords(max);

        for cz in min_z..=max_z {
            for cx in min_x..=max_x {
                let Some(bucket) = self.buckets.get(&cell_hash(cx, cz)) else {
                    continue;
                };
                for &index in bucket {
                    if out.len() == self.capacity {
                        trace!(capacity = self.capacity, "Spatial query truncated");
                        return true;
                    }
                    out.push(index);
                }
            }
        }
        false
    }

    fn cell_coords(&self, pos: Vec2Fixed) -> (i32, i32) {
        let cx = (pos.x / self.cell_size).floor().to_num::<i32>();
        let cz = (pos.y / self.cell_size).floor().to_num::<i32>();
        (cx, cz)
    }
}

/// Pack integer cell coordinates into one key. Collision-free for `i32` cells.
#[must_use]
pub const fn cell_hash(cx: i32, cz: i32) -> i64 {
    ((cx as i64) << 32) | (cz as u32 as i64)
}

/// Squared distance from `p` to the segment `a..b`.
#[must_use]
pub fn segment_distance_squared(p: Vec2Fixed, a: Vec2Fixed, b: Vec2Fixed) -> Fixed {
    let ab = b - a;
    let len_sq = ab.length_squared();
    if len_sq == Fixed::ZERO {
        return p.distance_squared(a);
    }
    let t = ((p - a).dot(ab) / len_sq).clamp(Fixed::ZERO, Fixed::ONE);
    p.distance_squared(a + ab.scale(t))
}
