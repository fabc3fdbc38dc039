//! Error types for the combat core.
//!
//! Only API and configuration boundaries return errors. The tick itself
//! never fails: missing preconditions become `Failure` outcomes on the
//! relevant request slot.

use thiserror::Error;

use crate::components::AgentId;

/// Result type alias using [`CombatError`].
pub type Result<T> = std::result::Result<T, CombatError>;

/// Top-level error type for the combat core.
#[derive(Debug, Error)]
pub enum CombatError {
    /// Agent handle does not refer to a live agent.
    #[error("Agent not found: {0}")]
    AgentNotFound(AgentId),

    /// Agent is in its death grace period and accepts no new requests.
    #[error("Agent {0} is dying")]
    AgentDying(AgentId),

    /// Agent lacks the component a request needs.
    #[error("Agent {agent} has no {capability} capability")]
    MissingCapability {
        /// Agent the request was written to.
        agent: AgentId,
        /// Capability that was missing.
        capability: &'static str,
    },

    /// Weapon name is not in the combat tables.
    #[error("Unknown weapon: {0}")]
    UnknownWeapon(String),

    /// Spell name is not in the combat tables.
    #[error("Unknown spell: {0}")]
    UnknownSpell(String),

    /// Spell slot index out of range for the agent's spell book.
    #[error("Agent {agent} has no spell slot {slot}")]
    InvalidSpellSlot {
        /// Agent the request was written to.
        agent: AgentId,
        /// Requested slot.
        slot: u8,
    },

    /// RON configuration failed to parse.
    #[error("Failed to parse configuration: {0}")]
    ConfigParse(String),

    /// Configuration parsed but failed validation.
    #[error("Invalid configuration for '{entry}': {reason}")]
    InvalidConfig {
        /// Table entry that failed validation.
        entry: String,
        /// What was wrong with it.
        reason: String,
    },

    /// State snapshot could not be encoded or decoded.
    #[error("Serialization failed: {0}")]
    Serialization(String),
}

impl From<ron::error::SpannedError> for CombatError {
    fn from(err: ron::error::SpannedError) -> Self {
        Self::ConfigParse(err.to_string())
    }
}

impl From<bincode::Error> for CombatError {
    fn from(err: bincode::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}
