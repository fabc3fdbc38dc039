//! Movement lock coordination.
//!
//! Aggregates mid-swing and mid-cast state into one mask that external
//! locomotion reads to force a full stop and ignore new destinations.

use bitflags::bitflags;
use serde::{Deserialize, Serialize};

use crate::components::{SpellBook, WeaponLoadout};
use crate::math::Fixed;

bitflags! {
    /// Reasons an agent may not move this tick.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
    pub struct MovementLock: u8 {
        /// Ranged windup in flight, or melee post-swing window open.
        const ATTACKING = 1 << 0;
        /// Spell windup in flight.
        const CASTING = 1 << 1;
    }
}

impl MovementLock {
    /// Whether locomotion must hold still.
    #[must_use]
    pub const fn is_locked(self) -> bool {
        !self.is_empty()
    }
}

/// Lock state at `now` for an agent's weapon and spell state.
#[must_use]
pub fn compute(weapon: Option<&WeaponLoadout>, spells: Option<&SpellBook>, now: Fixed) -> MovementLock {
    let mut lock = MovementLock::empty();

    if let Some(loadout) = weapon {
        if loadout.windup.is_some() || now < loadout.action_lock_until {
            lock |= MovementLock::ATTACKING;
        }
    }

    if spells.is_some_and(|book| book.windup.is_some()) {
        lock |= MovementLock::CASTING;
    }

    lock
}
