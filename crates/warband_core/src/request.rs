//! Single-slot request channel between the decision layer and the core.
//!
//! The decision layer writes at most one request per capability per tick.
//! Writing overwrites the payload and asserts the pending bit; the consuming
//! phase clears the bit and records an [`Outcome`] the decision layer polls.

use serde::{Deserialize, Serialize};

use crate::components::CastTarget;
use crate::math::Vec2Fixed;

/// Result reported back to the decision layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Outcome {
    /// The request took effect.
    Success,
    /// A precondition failed; the request was consumed without effect.
    Failure,
    /// The request was accepted and is still in progress.
    Running,
}

/// Request slots an agent exposes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Capability {
    /// Weapon attack on the current target.
    Attack,
    /// "Pick a target for this spell slot".
    CastDecision,
    /// Cast a spell at an already chosen target.
    Cast,
    /// Face a point.
    Rotate,
    /// Walk to a point.
    MoveTo,
}

impl Capability {
    /// Every capability, in slot order.
    pub const ALL: [Self; 5] = [
        Self::Attack,
        Self::CastDecision,
        Self::Cast,
        Self::Rotate,
        Self::MoveTo,
    ];

    /// Name used in logs and errors.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Attack => "attack",
            Self::CastDecision => "cast decision",
            Self::Cast => "cast",
            Self::Rotate => "rotate",
            Self::MoveTo => "move",
        }
    }
}

/// Attack the current target with the equipped weapon.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct AttackRequest;

/// Choose a target for a spell slot and queue the cast.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CastDecision {
    /// Spell book slot.
    pub slot: u8,
}

/// Cast a spell slot at a chosen target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CastRequest {
    /// Spell book slot.
    pub slot: u8,
    /// Aim of the cast.
    pub target: CastTarget,
}

/// Turn to face a point.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RotateRequest {
    /// Point to face.
    pub point: Vec2Fixed,
}

/// Walk to a point.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MoveRequest {
    /// Destination.
    pub destination: Vec2Fixed,
}

/// One request slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Mailbox<T> {
    payload: Option<T>,
    pending: bool,
    status: Option<Outcome>,
}

impl<T> Default for Mailbox<T> {
    fn default() -> Self {
        Self {
            payload: None,
            pending: false,
            status: None,
        }
    }
}

impl<T: Copy> Mailbox<T> {
    /// Overwrite the payload and assert the pending bit.
    pub fn write(&mut self, payload: T) {
        self.payload = Some(payload);
        self.pending = true;
        self.status = None;
    }

    /// Read the payload once, clearing the pending bit.
    ///
    /// A second call without an intervening [`write`](Self::write) returns
    /// `None`.
    pub fn take(&mut self) -> Option<T> {
        if !self.pending {
            return None;
        }
        self.pending = false;
        self.payload
    }

    /// Read the pending payload without clearing it.
    #[must_use]
    pub fn peek(&self) -> Option<&T> {
        if self.pending {
            self.payload.as_ref()
        } else {
            None
        }
    }

    /// Whether a request is waiting to be consumed.
    #[must_use]
    pub const fn is_pending(&self) -> bool {
        self.pending
    }

    /// Last outcome recorded for this slot.
    #[must_use]
    pub const fn status(&self) -> Option<Outcome> {
        self.status
    }

    /// Clear the pending bit and record `outcome`.
    pub fn resolve(&mut self, outcome: Outcome) {
        self.pending = false;
        self.status = Some(outcome);
    }

    /// Record an outcome without touching the pending bit.
    pub fn report(&mut self, outcome: Outcome) {
        self.status = Some(outcome);
    }
}

/// All request slots of one agent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct AgentRequests {
    /// Weapon attack.
    pub attack: Mailbox<AttackRequest>,
    /// Spell target selection.
    pub cast_decision: Mailbox<CastDecision>,
    /// Spell cast.
    pub cast: Mailbox<CastRequest>,
    /// Rotate-to.
    pub rotate: Mailbox<RotateRequest>,
    /// Move-to.
    pub move_to: Mailbox<MoveRequest>,
}

impl AgentRequests {
    /// Whether the slot for `capability` has a pending request.
    #[must_use]
    pub const fn is_pending(&self, capability: Capability) -> bool {
        match capability {
            Capability::Attack => self.attack.is_pending(),
            Capability::CastDecision => self.cast_decision.is_pending(),
            Capability::Cast => self.cast.is_pending(),
            Capability::Rotate => self.rotate.is_pending(),
            Capability::MoveTo => self.move_to.is_pending(),
        }
    }

    /// Last outcome for `capability`.
    #[must_use]
    pub const fn status(&self, capability: Capability) -> Option<Outcome> {
        match capability {
            Capability::Attack => self.attack.status(),
            Capability::CastDecision => self.cast_decision.status(),
            Capability::Cast => self.cast.status(),
            Capability::Rotate => self.rotate.status(),
            Capability::MoveTo => self.move_to.status(),
        }
    }

    /// Clear the pending bit of `capability` and record `outcome`.
    pub fn resolve(&mut self, capability: Capability, outcome: Outcome) {
        match capability {
            Capability::Attack => self.attack.resolve(outcome),
            Capability::CastDecision => self.cast_decision.resolve(outcome),
            Capability::Cast => self.cast.resolve(outcome),
            Capability::Rotate => self.rotate.resolve(outcome),
            Capability::MoveTo => self.move_to.resolve(outcome),
        }
    }

    /// Record an outcome for `capability` without touching the pending bit.
    pub fn report(&mut self, capability: Capability, outcome: Outcome) {
        match capability {
            Capability::Attack => self.attack.report(outcome),
            Capability::CastDecision => self.cast_decision.report(outcome),
            Capability::Cast => self.cast.report(outcome),
            Capability::Rotate => self.rotate.report(outcome),
            Capability::MoveTo => self.move_to.report(outcome),
        }
    }

    /// Drop every pending request in `capabilities` with [`Outcome::Failure`].
    ///
    /// Returns how many were dropped.
    pub fn expire(&mut self, capabilities: &[Capability]) -> usize {
        let mut dropped = 0;
        for &capability in capabilities {
            if self.is_pending(capability) {
                self.resolve(capability, Outcome::Failure);
                dropped += 1;
            }
        }
        dropped
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_second_take_without_write_is_empty() {
        let mut slot = Mailbox::default();
        slot.write(AttackRequest);
        assert!(slot.is_pending());
        assert_eq!(slot.take(), Some(AttackRequest));
        assert!(!slot.is_pending());
        assert_eq!(slot.take(), None);
    }

    #[test]
    fn test_write_overwrites_payload() {
        let mut slot = Mailbox::default();
        slot.write(CastDecision { slot: 0 });
        slot.write(CastDecision { slot: 2 });
        assert_eq!(slot.peek(), Some(&CastDecision { slot: 2 }));
        assert_eq!(slot.take(), Some(CastDecision { slot: 2 }));
    }

    #[test]
    fn test_peek_does_not_clear() {
        let mut slot = Mailbox::default();
        slot.write(RotateRequest {
            point: Vec2Fixed::ZERO,
        });
        assert!(slot.peek().is_some());
        assert!(slot.peek().is_some());
        assert!(slot.is_pending());
    }

    #[test]
    fn test_resolve_records_status() {
        let mut requests = AgentRequests::default();
        requests.attack.write(AttackRequest);
        assert_eq!(requests.status(Capability::Attack), None);

        requests.resolve(Capability::Attack, Outcome::Success);
        assert!(!requests.is_pending(Capability::Attack));
        assert_eq!(requests.status(Capability::Attack), Some(Outcome::Success));
    }

    #[test]
    fn test_expire_only_touches_listed_slots() {
        let mut requests = AgentRequests::default();
        requests.attack.write(AttackRequest);
        requests.move_to.write(MoveRequest {
            destination: Vec2Fixed::ZERO,
        });

        let dropped = requests.expire(&[Capability::Attack, Capability::Cast]);
        assert_eq!(dropped, 1);
        assert_eq!(requests.status(Capability::Attack), Some(Outcome::Failure));
        assert!(requests.is_pending(Capability::MoveTo));
    }
}
