//! Decision-layer stand-ins.
//!
//! [`aggressive`] plays every agent the same way; [`Script`] replays
//! authored requests at fixed ticks. Both only write request mailboxes.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use tracing::{debug, trace};

use warband_core::components::{AgentId, CastTarget};
use warband_core::math::Vec2Fixed;
use warband_core::request::CastRequest;
use warband_core::simulation::Simulation;

use crate::scenario::Point;

/// Attack when in reach, close in otherwise, and cycle through spell slots.
pub fn aggressive(sim: &mut Simulation) {
    let tick = sim.current_tick();
    let mut orders = Vec::new();

    for id in sim.agents().sorted_ids() {
        let Some(agent) = sim.agent(id) else {
            continue;
        };
        if !agent.is_alive() {
            continue;
        }

        if let Some(book) = agent.spells.as_ref().filter(|b| !b.slots.is_empty()) {
            orders.push(Order::Cast(id, (tick % book.slots.len() as u64) as u8));
        }

        let reach = agent
            .weapon
            .and_then(|loadout| sim.tables().weapon(loadout.weapon))
            .map(|weapon| weapon.range);
        let target = agent.target.and_then(|t| sim.agent(t));
        if let (Some(reach), Some(target)) = (reach, target) {
            if agent.pose.position.distance_squared(target.pose.position) <= reach * reach {
                orders.push(Order::Attack(id));
            } else {
                orders.push(Order::Approach(id, target.pose.position));
            }
        }
    }

    for order in orders {
        let result = match order {
            Order::Attack(id) => sim.request_attack(id),
            Order::Cast(id, slot) => sim.request_cast_decision(id, slot),
            Order::Approach(id, point) => sim.request_move(id, point),
        };
        if let Err(error) = result {
            trace!(tick, %error, "Autopilot request refused");
        }
    }
}

enum Order {
    Attack(AgentId),
    Cast(AgentId, u8),
    Approach(AgentId, Vec2Fixed),
}

/// One authored request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScriptEntry {
    /// Tick before which the request is written.
    pub tick: u64,
    /// Group whose living members receive the request.
    pub group: String,
    /// What to request.
    pub action: ScriptAction,
}

/// Request kinds a script can issue.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ScriptAction {
    /// Attack the current target.
    Attack,
    /// Cast a slot, letting the spell's acquire mode pick the target.
    Cast(u8),
    /// Cast a slot at the first living member of another group.
    CastAtGroup {
        /// Spell book slot.
        slot: u8,
        /// Target group label.
        target: String,
    },
    /// Cast a slot at a world point.
    CastAtPoint {
        /// Spell book slot.
        slot: u8,
        /// Aim point.
        point: Point,
    },
    /// Walk to a point.
    MoveTo(Point),
    /// Turn to face a point.
    Rotate(Point),
    /// Remove the agents outright.
    Despawn,
}

/// Script entries in tick order with a replay cursor.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Script {
    entries: Vec<ScriptEntry>,
    cursor: usize,
    rejected: u64,
}

impl Script {
    /// Build a script. Entries sharing a tick keep their authored order.
    #[must_use]
    pub fn new(mut entries: Vec<ScriptEntry>) -> Self {
        entries.sort_by_key(|entry| entry.tick);
        Self {
            entries,
            cursor: 0,
            rejected: 0,
        }
    }

    /// Entries not yet replayed.
    #[must_use]
    pub fn remaining(&self) -> usize {
        self.entries.len() - self.cursor
    }

    /// Requests the simulation refused at write time.
    #[must_use]
    pub fn rejected(&self) -> u64 {
        self.rejected
    }

    /// Write every entry due at or before the simulation's current tick.
    pub fn apply(&mut self, sim: &mut Simulation, groups: &BTreeMap<String, Vec<AgentId>>) {
        let tick = sim.current_tick();
        while let Some(entry) = self.entries.get(self.cursor).filter(|e| e.tick <= tick) {
            let members = groups.get(&entry.group).map_or(&[][..], Vec::as_slice);
            for &id in members {
                if let Err(error) = issue(sim, groups, id, &entry.action) {
                    self.rejected += 1;
                    debug!(tick, agent = id, %error, "Scripted request rejected");
                }
            }
            self.cursor += 1;
        }
    }
}

fn issue(
    sim: &mut Simulation,
    groups: &BTreeMap<String, Vec<AgentId>>,
    id: AgentId,
    action: &ScriptAction,
) -> warband_core::error::Result<()> {
    match action {
        ScriptAction::Attack => sim.request_attack(id),
        ScriptAction::Cast(slot) => sim.request_cast_decision(id, *slot),
        ScriptAction::CastAtGroup { slot, target } => {
            let aim = groups
                .get(target)
                .into_iter()
                .flatten()
                .filter_map(|&t| sim.agent(t))
                .find(|agent| agent.is_alive())
                .map(|agent| CastTarget::Agent {
                    target: agent.id,
                    point: agent.pose.position,
                });
            match aim {
                Some(target) => sim.request_cast(id, CastRequest { slot: *slot, target }),
                None => {
                    trace!(agent = id, group = %target, "No living cast target");
                    Ok(())
                }
            }
        }
        ScriptAction::CastAtPoint { slot, point } => sim.request_cast(
            id,
            CastRequest {
                slot: *slot,
                target: CastTarget::Point((*point).into()),
            },
        ),
        ScriptAction::MoveTo(point) => sim.request_move(id, (*point).into()),
        ScriptAction::Rotate(point) => sim.request_rotate(id, (*point).into()),
        ScriptAction::Despawn => match sim.agent(id) {
            Some(_) => sim.despawn_agent(id),
            None => Ok(()),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use warband_core::request::Capability;
    use warband_core::config::SimulationConfig;
    use warband_core::data::CombatTables;
    use warband_core::factions::Faction;
    use warband_core::simulation::AgentSpawnParams;

    fn entry(tick: u64, group: &str, action: ScriptAction) -> ScriptEntry {
        ScriptEntry {
            tick,
            group: group.to_string(),
            action,
        }
    }

    #[test]
    fn test_script_sorted_and_replayed_once() {
        let mut sim = Simulation::new(SimulationConfig::default(), CombatTables::default()).unwrap();
        let walker = sim
            .spawn_agent(AgentSpawnParams::new(Faction::Ally, Vec2Fixed::ZERO))
            .unwrap();
        let groups = BTreeMap::from([("walkers".to_string(), vec![walker])]);
        let mut script = Script::new(vec![
            entry(2, "walkers", ScriptAction::MoveTo(Point::from_num(0, 5))),
            entry(0, "walkers", ScriptAction::Rotate(Point::from_num(1, 0))),
        ]);

        script.apply(&mut sim, &groups);
        assert_eq!(script.remaining(), 1);
        sim.tick();
        script.apply(&mut sim, &groups);
        assert_eq!(script.remaining(), 1);
        sim.tick();
        script.apply(&mut sim, &groups);
        assert_eq!(script.remaining(), 0);
        assert!(sim.agent(walker).unwrap().requests.is_pending(Capability::MoveTo));
    }

    #[test]
    fn test_rejected_requests_counted() {
        let mut sim = Simulation::new(SimulationConfig::default(), CombatTables::default()).unwrap();
        let unarmed = sim
            .spawn_agent(AgentSpawnParams::new(Faction::Ally, Vec2Fixed::ZERO))
            .unwrap();
        let groups = BTreeMap::from([("militia".to_string(), vec![unarmed])]);
        let mut script = Script::new(vec![entry(0, "militia", ScriptAction::Attack)]);

        script.apply(&mut sim, &groups);
        assert_eq!(script.rejected(), 1);
    }

    #[test]
    fn test_despawn_of_missing_agent_is_quiet() {
        let mut sim = Simulation::new(SimulationConfig::default(), CombatTables::default()).unwrap();
        let groups = BTreeMap::from([("ghosts".to_string(), vec![42])]);
        let mut script = Script::new(vec![entry(0, "ghosts", ScriptAction::Despawn)]);

        script.apply(&mut sim, &groups);
        assert_eq!(script.rejected(), 0);
    }
}
