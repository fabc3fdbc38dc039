//! Deterministic rolls for crits and cooldown jitter.
//!
//! Each roll seeds a fresh ChaCha stream from `(seed, tick, agent, salt)`, so
//! results depend only on those inputs and never on evaluation order. This
//! keeps parallel read passes bit-identical to sequential ones.

use rand::{RngCore, SeedableRng};
use rand_chacha::ChaCha8Rng;

use crate::components::AgentId;
use crate::math::Fixed;

/// Salt for cooldown jitter.
pub const JITTER_SALT: u64 = 0x6a69_7474_6572;

/// Salt for crit rolls. The victim id is mixed in so each hit rolls separately.
pub const CRIT_SALT: u64 = 0x6372_6974;

/// Uniform value in `[0, 1)` for the given inputs.
#[must_use]
pub fn roll_unit(seed: u64, tick: u64, agent: AgentId, salt: u64) -> Fixed {
    let mut key = [0u8; 32];
    key[0..8].copy_from_slice(&seed.to_le_bytes());
    key[8..16].copy_from_slice(&tick.to_le_bytes());
    key[16..24].copy_from_slice(&agent.to_le_bytes());
    key[24..32].copy_from_slice(&salt.to_le_bytes());

    let mut rng = ChaCha8Rng::from_seed(key);
    // 32 random bits fill exactly the fractional part.
    Fixed::from_bits(i64::from(rng.next_u32()))
}

/// Crit roll for `attacker` hitting `victim`.
#[must_use]
pub fn crit_roll(seed: u64, tick: u64, attacker: AgentId, victim: AgentId) -> Fixed {
    roll_unit(seed, tick, attacker, CRIT_SALT ^ victim.rotate_left(17))
}

/// Jitter in `[0, max)` added to a cooldown.
#[must_use]
pub fn jitter(seed: u64, tick: u64, agent: AgentId, max: Fixed) -> Fixed {
    if max <= Fixed::ZERO {
        return Fixed::ZERO;
    }
    roll_unit(seed, tick, agent, JITTER_SALT) * max
}
