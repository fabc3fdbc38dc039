//! Determinism testing utilities.
//!
//! Provides a harness for verifying that the simulation
//! produces identical results given identical inputs.
//!
//! # Testing Strategy
//!
//! Replays and lockstep peers must reach bit-identical state. Sources of
//! non-determinism include:
//!
//! - **Floating-point math**: Different CPUs can produce different results.
//!   We use fixed-point arithmetic via [`warband_core::math::Fixed`] throughout.
//!
//! - **HashMap iteration order**: Rust's default hasher is randomized.
//!   Phases always iterate in sorted agent id order.
//!
//! - **Thread scheduling**: read passes may run on the rayon pool. Their
//!   buffers are merged in item order, so parallel and sequential runs
//!   must agree; [`verify_parallel_matches_sequential`] checks it.
//!
//! - **System randomness**: crit and jitter rolls are seeded per tick and agent.

use std::thread;

use warband_core::config::SimulationConfig;
use warband_core::simulation::Simulation;

use crate::fixtures::Autopilot;

/// Result of a determinism test.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeterminismResult {
    /// Whether all runs produced identical results.
    pub is_deterministic: bool,
    /// Hashes from each run.
    pub hashes: Vec<u64>,
    /// Number of ticks simulated.
    pub ticks: u64,
}

impl DeterminismResult {
    /// Get all unique hashes (should be 1 for deterministic simulation).
    #[must_use]
    pub fn unique_hashes(&self) -> Vec<u64> {
        let mut unique: Vec<u64> = self.hashes.clone();
        unique.sort_unstable();
        unique.dedup();
        unique
    }

    /// Assert that the simulation was deterministic, with a detailed error message.
    ///
    /// # Panics
    ///
    /// Panics if the simulation produced different hashes across runs.
    pub fn assert_deterministic(&self) {
        if !self.is_deterministic {
            let unique = self.unique_hashes();
            panic!(
                "Simulation is non-deterministic!\n\
                 Runs: {}\n\
                 Ticks: {}\n\
                 Unique hashes: {} (expected 1)\n\
                 All hashes: {:?}",
                self.hashes.len(),
                self.ticks,
                unique.len(),
                self.hashes
            );
        }
    }
}

/// Run a simulation multiple times and verify determinism.
///
/// # Arguments
///
/// * `runs` - Number of times to run the simulation
/// * `ticks` - Number of ticks to simulate per run
/// * `setup` - Function to create initial simulation state
/// * `step` - Function to advance simulation by one tick
/// * `hash` - Function to compute state hash
///
/// # Example
///
/// ```
/// use warband_test_utils::determinism::verify_determinism;
///
/// let result = verify_determinism(3, 10, || 0u64, |n| *n += 2, |n| *n);
/// assert_eq!(result.hashes, vec![20, 20, 20]);
/// result.assert_deterministic();
/// ```
pub fn verify_determinism<S, Setup, Step, HashFn>(
    runs: usize,
    ticks: u64,
    setup: Setup,
    step: Step,
    hash: HashFn,
) -> DeterminismResult
where
    Setup: Fn() -> S,
    Step: Fn(&mut S),
    HashFn: Fn(&S) -> u64,
{
    let mut hashes = Vec::with_capacity(runs);

    for _ in 0..runs {
        let mut state = setup();

        for _ in 0..ticks {
            step(&mut state);
        }

        hashes.push(hash(&state));
    }

    let is_deterministic = hashes.windows(2).all(|w| w[0] == w[1]);

    DeterminismResult {
        is_deterministic,
        hashes,
        ticks,
    }
}

/// Run a simulation twice under the [`Autopilot`] and compare final hashes.
pub fn verify_simulation_determinism<F>(setup_fn: F, num_ticks: u64) -> bool
where
    F: Fn() -> Simulation,
{
    let result = verify_determinism(
        2,
        num_ticks,
        || (setup_fn(), Autopilot::new()),
        |(sim, pilot)| {
            pilot.step(sim);
        },
        |(sim, _)| sim.state_hash(),
    );
    result.is_deterministic
}

/// Run the same scenario with parallel and sequential read passes and
/// compare the state hash after every tick.
///
/// `setup_fn` receives the config to build from, with `parallel` already set.
///
/// # Returns
///
/// `None` if both runs agree throughout, `Some(tick)` at the first mismatch.
pub fn verify_parallel_matches_sequential<F>(
    config: &SimulationConfig,
    setup_fn: F,
    num_ticks: u64,
) -> Option<u64>
where
    F: Fn(SimulationConfig) -> Simulation,
{
    let mut parallel = setup_fn(config.clone().with_parallel(true));
    let mut sequential = setup_fn(config.clone().with_parallel(false));
    let mut pilot_a = Autopilot::new();
    let mut pilot_b = Autopilot::new();

    for tick in 0..num_ticks {
        let a = pilot_a.step(&mut parallel);
        let b = pilot_b.step(&mut sequential);
        if a != b || parallel.state_hash() != sequential.state_hash() {
            return Some(tick);
        }
    }
    None
}

/// Run N simulations on scoped threads and collect final hashes.
///
/// # Panics
///
/// Panics if a simulation thread panics.
pub fn run_parallel_simulations<F>(setup_fn: F, num_sims: usize, num_ticks: u64) -> Vec<u64>
where
    F: Fn() -> Simulation + Sync,
{
    thread::scope(|s| {
        let handles: Vec<_> = (0..num_sims)
            .map(|_| {
                s.spawn(|| {
                    let mut sim = setup_fn();
                    let mut pilot = Autopilot::new();
                    pilot.run(&mut sim, num_ticks);
                    sim.state_hash()
                })
            })
            .collect();

        handles.into_iter().map(|h| h.join().unwrap()).collect()
    })
}

/// Compare two simulation runs tick-by-tick, finding first divergence.
///
/// # Returns
///
/// `None` if simulations are deterministic, `Some(tick)` if they diverge
/// at that tick.
pub fn find_first_divergence<F>(setup_fn: F, num_ticks: u64) -> Option<u64>
where
    F: Fn() -> Simulation,
{
    let mut sim1 = setup_fn();
    let mut sim2 = setup_fn();
    let mut pilot1 = Autopilot::new();
    let mut pilot2 = Autopilot::new();

    if sim1.state_hash() != sim2.state_hash() {
        return Some(0);
    }

    for tick in 1..=num_ticks {
        pilot1.step(&mut sim1);
        pilot2.step(&mut sim2);

        if sim1.state_hash() != sim2.state_hash() {
            return Some(tick);
        }
    }

    None
}

/// Verify that a bincode round-trip mid-run preserves state, and that the
/// restored copy keeps agreeing for `continue_ticks` more ticks.
pub fn verify_serialization_determinism<F>(setup_fn: F, num_ticks: u64, continue_ticks: u64) -> bool
where
    F: Fn() -> Simulation,
{
    let mut sim = setup_fn();
    let mut pilot = Autopilot::new();
    pilot.run(&mut sim, num_ticks);

    let Ok(bytes) = sim.serialize() else {
        return false;
    };
    let Ok(mut restored) = Simulation::deserialize(&bytes) else {
        return false;
    };
    if restored.state_hash() != sim.state_hash() {
        return false;
    }

    let mut restored_pilot = pilot.clone();
    for _ in 0..continue_ticks {
        pilot.step(&mut sim);
        restored_pilot.step(&mut restored);
    }
    restored.state_hash() == sim.state_hash()
}

/// Proptest strategies for combat property tests.
pub mod strategies {
    use proptest::prelude::*;
    use warband_core::factions::Faction;
    use warband_core::math::{Fixed, Vec2Fixed};

    /// Generate a fixed-point coordinate on a small battlefield.
    ///
    /// Range: -40 to 40 in steps of 1/4.
    pub fn arb_coordinate() -> impl Strategy<Value = Fixed> {
        (-160i32..160i32).prop_map(|quarter| Fixed::from_num(quarter) / Fixed::from_num(4))
    }

    /// Generate a position on the battlefield.
    pub fn arb_position() -> impl Strategy<Value = Vec2Fixed> {
        (arb_coordinate(), arb_coordinate()).prop_map(|(x, y)| Vec2Fixed::new(x, y))
    }

    /// Generate a non-zero direction.
    pub fn arb_direction() -> impl Strategy<Value = Vec2Fixed> {
        (-8i32..=8, -8i32..=8)
            .prop_filter("non-zero", |(x, y)| *x != 0 || *y != 0)
            .prop_map(|(x, y)| Vec2Fixed::from_num(x, y).normalize())
    }

    /// Generate a faction.
    pub fn arb_faction() -> impl Strategy<Value = Faction> {
        prop_oneof![Just(Faction::Ally), Just(Faction::Enemy)]
    }

    /// Generate health values (1-500).
    pub fn arb_health() -> impl Strategy<Value = u32> {
        1u32..500u32
    }

    /// Generate a cone half-angle in degrees (5-85).
    pub fn arb_half_angle() -> impl Strategy<Value = Fixed> {
        (5i32..86i32).prop_map(Fixed::from_num)
    }

    /// Parameters for spawning a test agent.
    #[derive(Debug, Clone)]
    pub struct TestAgentParams {
        /// Position.
        pub position: Vec2Fixed,
        /// Faction.
        pub faction: Faction,
        /// Health.
        pub health: u32,
    }

    /// Generate parameters for a test agent.
    pub fn arb_agent_params() -> impl Strategy<Value = TestAgentParams> {
        (arb_position(), arb_faction(), arb_health()).prop_map(|(position, faction, health)| {
            TestAgentParams {
                position,
                faction,
                health,
            }
        })
    }

    /// Generate a list of agent spawn parameters.
    pub fn arb_agent_list(max_agents: usize) -> impl Strategy<Value = Vec<TestAgentParams>> {
        proptest::collection::vec(arb_agent_params(), 1..max_agents)
    }
}
