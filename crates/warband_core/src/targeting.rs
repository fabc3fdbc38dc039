//! Target acquisition policies.
//!
//! Every policy runs a broad-phase query on the [`SpatialIndex`] and then
//! filters candidates exactly. Distances are compared squared; ties break to
//! the lowest agent handle so results never depend on bucket order.

use crate::components::AgentId;
use crate::factions::{Faction, FactionMask};
use crate::math::{fixed_sqrt, Fixed, Vec2Fixed};
use crate::spatial::{AgentSnapshot, Snapshot, SpatialIndex};

/// A candidate selected by distance.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Candidate {
    /// Selected agent.
    pub id: AgentId,
    /// Squared distance from the query origin.
    pub distance_squared: Fixed,
}

/// Point chosen by the cluster policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClusterPoint {
    /// Agent the cluster is centred on.
    pub anchor: AgentId,
    /// Anchor position.
    pub point: Vec2Fixed,
    /// Wanted agents within the effect radius of the anchor, anchor included.
    pub covered: usize,
}

/// Nearest valid agent of a wanted faction within `radius`.
#[must_use]
pub fn closest_of_faction(
    snapshot: &Snapshot,
    index: &SpatialIndex,
    origin: Vec2Fixed,
    radius: Fixed,
    wanted: FactionMask,
    exclude: &[AgentId],
) -> Option<Candidate> {
    let radius_sq = radius * radius;
    let mut scratch = Vec::with_capacity(index.capacity());
    index.query_circle(origin, radius, &mut scratch);

    let mut best: Option<Candidate> = None;
    for &slot in &scratch {
        let agent = snapshot.at(slot);
        if !accepts(agent, wanted) || exclude.contains(&agent.id) {
            continue;
        }
        let distance_squared = origin.distance_squared(agent.position);
        if distance_squared > radius_sq {
            continue;
        }
        let better = best.map_or(true, |b| {
            (distance_squared, agent.id) < (b.distance_squared, b.id)
        });
        if better {
            best = Some(Candidate {
                id: agent.id,
                distance_squared,
            });
        }
    }
    best
}

/// Same-faction agent with the lowest health fraction within `radius`.
#[must_use]
pub fn lowest_health_ally(
    snapshot: &Snapshot,
    index: &SpatialIndex,
    origin: Vec2Fixed,
    radius: Fixed,
    faction: Faction,
) -> Option<AgentId> {
    let radius_sq = radius * radius;
    let wanted = faction.mask();
    let mut scratch = Vec::with_capacity(index.capacity());
    index.query_circle(origin, radius, &mut scratch);

    scratch
        .iter()
        .map(|&slot| snapshot.at(slot))
        .filter(|a| accepts(a, wanted) && origin.distance_squared(a.position) <= radius_sq)
        .min_by_key(|a| (a.health_fraction, a.id))
        .map(|a| a.id)
}

/// Wanted agent within `range` whose surroundings hold the most wanted agents.
///
/// Each candidate is scored by the number of wanted agents within
/// `effect_radius` of it, itself included.
#[must_use]
pub fn densest_cluster(
    snapshot: &Snapshot,
    index: &SpatialIndex,
    origin: Vec2Fixed,
    range: Fixed,
    effect_radius: Fixed,
    wanted: FactionMask,
) -> Option<ClusterPoint> {
    let range_sq = range * range;
    let effect_sq = effect_radius * effect_radius;
    let mut candidates = Vec::with_capacity(index.capacity());
    let mut neighbours = Vec::with_capacity(index.capacity());
    index.query_circle(origin, range, &mut candidates);

    let mut best: Option<ClusterPoint> = None;
    for &slot in &candidates {
        let anchor = snapshot.at(slot);
        if !accepts(anchor, wanted) || origin.distance_squared(anchor.position) > range_sq {
            continue;
        }

        index.query_circle(anchor.position, effect_radius, &mut neighbours);
        let covered = neighbours
            .iter()
            .map(|&n| snapshot.at(n))
            .filter(|n| accepts(n, wanted) && anchor.position.distance_squared(n.position) <= effect_sq)
            .count();

        let better = best.map_or(true, |b| {
            covered > b.covered || (covered == b.covered && anchor.id < b.anchor)
        });
        if better {
            best = Some(ClusterPoint {
                anchor: anchor.id,
                point: anchor.position,
                covered,
            });
        }
    }
    best
}

/// Point used when a cast needs a point but no target was selected.
#[must_use]
pub const fn fallback_point(caster: &AgentSnapshot) -> Vec2Fixed {
    caster.position
}

/// Auto-target with hysteresis.
///
/// Keeps `current` unless the nearest candidate is closer by at least
/// `min_switch`. An invalid `current` (gone, dying, wrong faction, or
/// beyond `radius`) is replaced by the nearest candidate unconditionally.
#[must_use]
pub fn acquire_with_hysteresis(
    snapshot: &Snapshot,
    index: &SpatialIndex,
    seeker: &AgentSnapshot,
    current: Option<AgentId>,
    radius: Fixed,
    wanted: FactionMask,
    min_switch: Fixed,
) -> Option<AgentId> {
    let best = closest_of_faction(snapshot, index, seeker.position, radius, wanted, &[seeker.id]);
    let locked = current
        .and_then(|id| snapshot.get(id))
        .filter(|a| a.id != seeker.id && accepts(a, wanted))
        .filter(|a| seeker.position.distance_squared(a.position) <= radius * radius);

    match (locked, best) {
        (None, best) => best.map(|b| b.id),
        (Some(locked), None) => Some(locked.id),
        (Some(locked), Some(best)) => {
            if best.id == locked.id {
                return Some(locked.id);
            }
            let current_distance = seeker.position.distance(locked.position);
            let best_distance = fixed_sqrt(best.distance_squared);
            if current_distance - best_distance >= min_switch {
                Some(best.id)
            } else {
                Some(locked.id)
            }
        }
    }
}

fn accepts(agent: &AgentSnapshot, wanted: FactionMask) -> bool {
    agent.is_valid_target() && wanted.accepts(agent.faction)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn agent(id: AgentId, faction: Faction, x: i32, z: i32) -> AgentSnapshot {
        AgentSnapshot {
            id,
            position: Vec2Fixed::from_num(x, z),
            facing: Vec2Fixed::FORWARD,
            faction,
            root: id,
            alive: true,
            targetable: true,
            health_fraction: Fixed::ONE,
        }
    }

    fn world(agents: Vec<AgentSnapshot>) -> (Snapshot, SpatialIndex) {
        let snapshot = Snapshot::from_agents(agents);
        let mut index = SpatialIndex::default();
        index.rebuild(&snapshot);
        (snapshot, index)
    }

    #[test]
    fn test_closest_of_faction_filters() {
        let (snapshot, index) = world(vec![
            agent(1, Faction::Ally, 0, 0),
            agent(2, Faction::Ally, 1, 0),
            agent(3, Faction::Enemy, 3, 0),
            agent(4, Faction::Enemy, 2, 2),
        ]);
        let found = closest_of_faction(
            &snapshot,
            &index,
            Vec2Fixed::ZERO,
            Fixed::from_num(10),
            FactionMask::ENEMY,
            &[],
        )
        .unwrap();
        assert_eq!(found.id, 4);
        assert_eq!(found.distance_squared, Fixed::from_num(8));
    }

    #[test]
    fn test_closest_ties_break_to_lowest_id() {
        let (snapshot, index) = world(vec![
            agent(7, Faction::Enemy, 0, 3),
            agent(5, Faction::Enemy, 3, 0),
        ]);
        let found = closest_of_faction(
            &snapshot,
            &index,
            Vec2Fixed::ZERO,
            Fixed::from_num(5),
            FactionMask::ENEMY,
            &[],
        );
        assert_eq!(found.map(|c| c.id), Some(5));
    }

    #[test]
    fn test_closest_outside_radius_is_none() {
        let (snapshot, index) = world(vec![agent(1, Faction::Enemy, 3, 3)]);
        let found = closest_of_faction(
            &snapshot,
            &index,
            Vec2Fixed::ZERO,
            Fixed::from_num(4),
            FactionMask::ENEMY,
            &[],
        );
        assert!(found.is_none());
    }

    #[test]
    fn test_lowest_health_ally() {
        let mut wounded = agent(3, Faction::Ally, 2, 0);
        wounded.health_fraction = Fixed::from_num(0.3);
        let mut enemy = agent(4, Faction::Enemy, 1, 0);
        enemy.health_fraction = Fixed::from_num(0.1);
        let (snapshot, index) = world(vec![agent(1, Faction::Ally, 0, 0), wounded, enemy]);

        let found = lowest_health_ally(
            &snapshot,
            &index,
            Vec2Fixed::ZERO,
            Fixed::from_num(5),
            Faction::Ally,
        );
        assert_eq!(found, Some(3));
    }

    #[test]
    fn test_densest_cluster_prefers_group() {
        let (snapshot, index) = world(vec![
            agent(1, Faction::Enemy, 2, 0),
            agent(2, Faction::Enemy, 10, 0),
            agent(3, Faction::Enemy, 11, 0),
            agent(4, Faction::Enemy, 10, 1),
        ]);
        let found = densest_cluster(
            &snapshot,
            &index,
            Vec2Fixed::ZERO,
            Fixed::from_num(12),
            Fixed::from_num(2),
            FactionMask::ENEMY,
        )
        .unwrap();
        assert_eq!(found.covered, 3);
        assert_eq!(found.anchor, 2);
        assert_eq!(found.point, Vec2Fixed::from_num(10, 0));
    }

    #[test]
    fn test_hysteresis_keeps_target_within_margin() {
        let (snapshot, index) = world(vec![
            agent(1, Faction::Ally, 0, 0),
            agent(2, Faction::Enemy, 5, 0),
            agent(3, Faction::Enemy, 0, 4),
        ]);
        let seeker = *snapshot.get(1).unwrap();
        let kept = acquire_with_hysteresis(
            &snapshot,
            &index,
            &seeker,
            Some(2),
            Fixed::from_num(10),
            FactionMask::ENEMY,
            Fixed::from_num(2),
        );
        assert_eq!(kept, Some(2));
    }

    #[test]
    fn test_hysteresis_switches_at_margin() {
        let (snapshot, index) = world(vec![
            agent(1, Faction::Ally, 0, 0),
            agent(2, Faction::Enemy, 5, 0),
            agent(3, Faction::Enemy, 0, 3),
        ]);
        let seeker = *snapshot.get(1).unwrap();
        let switched = acquire_with_hysteresis(
            &snapshot,
            &index,
            &seeker,
            Some(2),
            Fixed::from_num(10),
            FactionMask::ENEMY,
            Fixed::from_num(2),
        );
        assert_eq!(switched, Some(3));
    }

    #[test]
    fn test_hysteresis_bypassed_for_dying_target() {
        let mut dying = agent(2, Faction::Enemy, 1, 0);
        dying.alive = false;
        let (snapshot, index) = world(vec![
            agent(1, Faction::Ally, 0, 0),
            dying,
            agent(3, Faction::Enemy, 0, 6),
        ]);
        let seeker = *snapshot.get(1).unwrap();
        let chosen = acquire_with_hysteresis(
            &snapshot,
            &index,
            &seeker,
            Some(2),
            Fixed::from_num(10),
            FactionMask::ENEMY,
            Fixed::from_num(100),
        );
        assert_eq!(chosen, Some(3));
    }

    #[test]
    fn test_lock_dropped_once_beyond_radius() {
        let (snapshot, index) = world(vec![
            agent(1, Faction::Ally, 0, 0),
            agent(2, Faction::Enemy, 11, 0),
        ]);
        let seeker = *snapshot.get(1).unwrap();
        let chosen = acquire_with_hysteresis(
            &snapshot,
            &index,
            &seeker,
            Some(2),
            Fixed::from_num(10),
            FactionMask::ENEMY,
            Fixed::ONE,
        );
        assert_eq!(chosen, None);
    }

    #[test]
    fn test_lock_beyond_radius_yields_to_any_candidate() {
        let (snapshot, index) = world(vec![
            agent(1, Faction::Ally, 0, 0),
            agent(2, Faction::Enemy, 11, 0),
            agent(3, Faction::Enemy, 0, 9),
        ]);
        let seeker = *snapshot.get(1).unwrap();
        let chosen = acquire_with_hysteresis(
            &snapshot,
            &index,
            &seeker,
            Some(2),
            Fixed::from_num(10),
            FactionMask::ENEMY,
            Fixed::from_num(5),
        );
        assert_eq!(chosen, Some(3));
    }

    #[test]
    fn test_hysteresis_none_when_nothing_near() {
        let (snapshot, index) = world(vec![agent(1, Faction::Ally, 0, 0)]);
        let seeker = *snapshot.get(1).unwrap();
        let chosen = acquire_with_hysteresis(
            &snapshot,
            &index,
            &seeker,
            Some(99),
            Fixed::from_num(10),
            FactionMask::ENEMY,
            Fixed::ONE,
        );
        assert_eq!(chosen, None);
    }
}
