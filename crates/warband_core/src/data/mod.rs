//! Data structures for weapon and spell configuration.
//!
//! All structs deserialize from RON with decimal authoring values; numbers
//! are converted to fixed-point once, at load time.
//!
//! **Note:** This module contains no IO - it only parses strings.
//! File loading is handled by `warband_headless`.

mod spell_data;
mod tables;
mod weapon_data;

pub use spell_data::{AcquireMode, Payload, Polarity, SpellConfig, SpellId, SpellKind, TargetShape};
pub use tables::CombatTables;
pub use weapon_data::{
    MeleeProfile, MuzzleOffset, RangedProfile, Strike, WeaponConfig, WeaponId, WeaponStyle,
};
