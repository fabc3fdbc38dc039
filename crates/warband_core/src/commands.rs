//! Deferred mutations produced by read passes.
//!
//! Read passes see the world through shared references only. Everything
//! they want to change is pushed as a [`WorldCommand`] and applied by the
//! simulation after the pass, in agent-id order. This is what lets a pass
//! run on many threads while the result stays identical to a sequential
//! run.

use crate::bridge::{DesiredDestination, DesiredFacing, ProjectileSpawnRequest, SummonRequest};
use crate::chain::ChainRun;
use crate::components::{AgentId, AttackWindup, MoveOrder, SpellWindup};
use crate::effects::OverTimeEffect;
use crate::math::Fixed;
use crate::melee::MeleeHit;
use crate::request::{CastRequest, Capability, Outcome};

/// One deferred mutation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorldCommand {
    /// Replace an agent's auto-target.
    SetTarget {
        /// Agent to update.
        agent: AgentId,
        /// New target.
        target: Option<AgentId>,
    },
    /// Clear a request's pending bit and record its outcome.
    ResolveRequest {
        /// Request owner.
        agent: AgentId,
        /// Request slot.
        capability: Capability,
        /// Outcome to record.
        outcome: Outcome,
    },
    /// Record an outcome without touching the pending bit.
    ReportStatus {
        /// Request owner.
        agent: AgentId,
        /// Request slot.
        capability: Capability,
        /// Outcome to record.
        outcome: Outcome,
    },
    /// Write a cast request produced by a cast decision.
    WriteCastRequest {
        /// Caster.
        agent: AgentId,
        /// Request to write.
        request: CastRequest,
    },
    /// Begin a ranged windup.
    StartAttackWindup {
        /// Attacker.
        agent: AgentId,
        /// Windup state.
        windup: AttackWindup,
    },
    /// Clear a ranged windup after release.
    FinishAttackWindup {
        /// Attacker.
        agent: AgentId,
    },
    /// Push the weapon cooldown out.
    StartAttackCooldown {
        /// Attacker.
        agent: AgentId,
        /// New earliest attack time.
        until: Fixed,
    },
    /// Open the melee post-swing window.
    SetActionLock {
        /// Attacker.
        agent: AgentId,
        /// End of the window.
        until: Fixed,
    },
    /// Refuse weapon attacks until `until`.
    SetWeaponLock {
        /// Caster.
        agent: AgentId,
        /// End of the lock.
        until: Fixed,
    },
    /// Begin a spell windup.
    StartSpellWindup {
        /// Caster.
        agent: AgentId,
        /// Windup state.
        windup: SpellWindup,
    },
    /// Clear a spell windup after release.
    FinishSpellWindup {
        /// Caster.
        agent: AgentId,
    },
    /// Push a spell slot's cooldown out.
    StartSpellCooldown {
        /// Caster.
        agent: AgentId,
        /// Spell book slot.
        slot: u8,
        /// New earliest cast time.
        until: Fixed,
    },
    /// Melee swing to resolve in the Resolve phase.
    QueueMeleeHit(MeleeHit),
    /// Publish a projectile spawn request.
    EmitProjectile(ProjectileSpawnRequest),
    /// Publish a summon request.
    EmitSummon(SummonRequest),
    /// Publish a facing request.
    EmitFacing(DesiredFacing),
    /// Publish a destination or stop.
    EmitDestination(DesiredDestination),
    /// Replace an agent's move order.
    SetMoveOrder {
        /// Mover.
        agent: AgentId,
        /// New order.
        order: Option<MoveOrder>,
    },
    /// Register a new chain run. Its id is assigned on apply.
    SpawnChain(ChainRun),
    /// Replace a chain run with its advanced state.
    UpdateChain(ChainRun),
    /// Tear down a chain run.
    RemoveChain {
        /// Run id.
        id: u32,
    },
    /// Place an effect, or refresh the one with the same refresh key.
    UpsertEffect(OverTimeEffect),
    /// Advance an effect after pulses.
    UpdateEffect {
        /// Effect id.
        id: u32,
        /// Remaining duration.
        remaining: Fixed,
        /// Next pulse time.
        next_tick: Fixed,
    },
    /// Remove an effect.
    RemoveEffect {
        /// Effect id.
        id: u32,
    },
    /// Deal damage.
    ApplyDamage {
        /// Attacker.
        source: AgentId,
        /// Victim.
        target: AgentId,
        /// Damage amount.
        amount: u32,
        /// Whether the hit was a crit.
        crit: bool,
    },
    /// Restore health.
    ApplyHeal {
        /// Healer.
        source: AgentId,
        /// Recipient.
        target: AgentId,
        /// Heal amount.
        amount: u32,
    },
}

impl WorldCommand {
    /// Outcome command shorthand.
    #[must_use]
    pub const fn resolve(agent: AgentId, capability: Capability, outcome: Outcome) -> Self {
        Self::ResolveRequest {
            agent,
            capability,
            outcome,
        }
    }

    /// Status command shorthand.
    #[must_use]
    pub const fn report(agent: AgentId, capability: Capability, outcome: Outcome) -> Self {
        Self::ReportStatus {
            agent,
            capability,
            outcome,
        }
    }
}

/// Commands collected from one read pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandBuffer {
    commands: Vec<WorldCommand>,
}

impl CommandBuffer {
    /// Create an empty buffer.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append one command.
    pub fn push(&mut self, command: WorldCommand) {
        self.commands.push(command);
    }

    /// Number of buffered commands.
    #[must_use]
    pub fn len(&self) -> usize {
        self.commands.len()
    }

    /// Check if the buffer is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }

    /// Buffered commands in push order.
    pub fn iter(&self) -> impl Iterator<Item = &WorldCommand> {
        self.commands.iter()
    }

    /// Take every command out, leaving the buffer empty.
    pub fn drain(&mut self) -> std::vec::Drain<'_, WorldCommand> {
        self.commands.drain(..)
    }
}

impl From<Vec<WorldCommand>> for CommandBuffer {
    fn from(commands: Vec<WorldCommand>) -> Self {
        Self { commands }
    }
}

impl Extend<WorldCommand> for CommandBuffer {
    fn extend<I: IntoIterator<Item = WorldCommand>>(&mut self, iter: I) {
        self.commands.extend(iter);
    }
}

impl IntoIterator for CommandBuffer {
    type Item = WorldCommand;
    type IntoIter = std::vec::IntoIter<WorldCommand>;

    fn into_iter(self) -> Self::IntoIter {
        self.commands.into_iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_buffer_preserves_push_order() {
        let mut buffer = CommandBuffer::new();
        buffer.push(WorldCommand::SetTarget {
            agent: 1,
            target: Some(2),
        });
        buffer.push(WorldCommand::resolve(1, Capability::Attack, Outcome::Success));
        buffer.extend([WorldCommand::RemoveChain { id: 4 }]);

        assert_eq!(buffer.len(), 3);
        let drained: Vec<_> = buffer.drain().collect();
        assert!(matches!(drained[0], WorldCommand::SetTarget { .. }));
        assert!(matches!(drained[2], WorldCommand::RemoveChain { id: 4 }));
        assert!(buffer.is_empty());
    }
}
