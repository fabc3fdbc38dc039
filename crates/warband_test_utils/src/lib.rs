//! # Warband Test Utilities
//!
//! Shared testing utilities for all crates:
//! - Determinism test harness
//! - Combat table fixtures and skirmish setup
//! - An autopilot standing in for the decision layer and presentation
//! - Property-based testing strategies

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod determinism;
pub mod fixtures;

/// Re-export proptest for convenience.
pub use proptest;
