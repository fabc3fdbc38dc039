//! # Warband Core
//!
//! Deterministic combat core for large-population squad simulations.
//!
//! Every tick, autonomous agents acquire targets, turn single-tick requests
//! from an external decision layer into attacks and spells, and have those
//! resolved against world geometry and faction rules. Rendering, locomotion
//! and projectile flight stay outside: the core publishes a
//! [`BridgeFrame`](bridge::BridgeFrame) of one-shot requests and accepts
//! pose, locomotion and impact reports back.
//!
//! This crate contains **only** deterministic logic:
//! - No IO beyond (de)serializing in-memory strings and bytes
//! - No system randomness (rolls are seeded per tick and agent)
//! - No floating-point math in the tick (uses fixed-point)
//!
//! ## Crate Structure
//!
//! - [`simulation`] - World state, tick phases and public API
//! - [`spatial`] / [`targeting`] - Spatial index and acquisition policies
//! - [`attack`] / [`spell`] - Request-driven state machines
//! - [`melee`], [`effects`], [`chain`] - Hit resolution
//! - [`commands`] - Deferred mutations applied between phases
//! - [`bridge`] - Presentation contract
//! - [`data`] / [`config`] - RON-authored tables and tuning

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all, clippy::pedantic)]

pub mod attack;
pub mod bridge;
pub mod chain;
pub mod commands;
pub mod components;
pub mod config;
pub mod data;
pub mod effects;
pub mod error;
pub mod factions;
pub mod math;
pub mod melee;
pub mod movement_lock;
pub mod request;
pub mod rng;
pub mod simulation;
pub mod spatial;
pub mod spell;
pub mod targeting;

/// Re-export commonly used types
pub mod prelude {
    pub use crate::bridge::{
        BridgeFrame, DesiredDestination, DesiredFacing, Impact, PresentationHandle,
        PresentationRegistry, ProjectileSource, ProjectileSpawnRequest, SummonRequest,
    };
    pub use crate::components::*;
    pub use crate::config::SimulationConfig;
    pub use crate::data::{
        AcquireMode, CombatTables, Payload, Polarity, SpellConfig, SpellId, SpellKind,
        WeaponConfig, WeaponId, WeaponStyle,
    };
    pub use crate::error::{CombatError, Result};
    pub use crate::factions::{Faction, FactionMask};
    pub use crate::math::{Fixed, Vec2Fixed};
    pub use crate::movement_lock::MovementLock;
    pub use crate::request::{Capability, Outcome};
    pub use crate::simulation::{AgentSpawnParams, Simulation, TickEvents};
}
