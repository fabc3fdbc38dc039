//! Simulation-wide tuning values.

use serde::{Deserialize, Serialize};

use crate::error::{CombatError, Result};
use crate::math::{fixed_decimal, Fixed};

/// Tuning values shared by every phase of the tick.
///
/// Every field has a default, so a RON file only lists what it overrides:
///
/// ```
/// use warband_core::config::SimulationConfig;
/// use warband_core::math::Fixed;
///
/// let config = SimulationConfig::from_ron_str("(tick_rate: 30, seed: 7)").unwrap();
/// assert_eq!(config.tick_rate, 30);
/// assert_eq!(config.cell_size, Fixed::from_num(4));
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulationConfig {
    /// Ticks per simulated second.
    pub tick_rate: u32,

    /// Edge length of a spatial index cell.
    #[serde(with = "fixed_decimal")]
    pub cell_size: Fixed,

    /// Upper bound on candidates returned by one spatial query.
    pub query_capacity: usize,

    /// A locked target is replaced only by a candidate at least this much closer.
    #[serde(with = "fixed_decimal")]
    pub min_switch_distance: Fixed,

    /// Multiplier on `range²` when checking attack range.
    #[serde(with = "fixed_decimal")]
    pub range_slack: Fixed,

    /// Delay between health reaching zero and despawn.
    #[serde(with = "fixed_decimal")]
    pub death_grace_seconds: Fixed,

    /// Remaining distance at which a move order counts as arrived.
    #[serde(with = "fixed_decimal")]
    pub arrival_tolerance: Fixed,

    /// Seed for crit and cooldown-jitter rolls.
    pub seed: u64,

    /// Run read passes on the rayon pool. Results are identical either way.
    pub parallel: bool,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            tick_rate: 20,
            cell_size: Fixed::from_num(4),
            query_capacity: 256,
            min_switch_distance: Fixed::ONE,
            range_slack: Fixed::from_num(1.1),
            death_grace_seconds: Fixed::from_num(1.5),
            arrival_tolerance: Fixed::from_num(0.25),
            seed: 0,
            parallel: true,
        }
    }
}

impl SimulationConfig {
    /// Parse and validate a configuration from RON text.
    ///
    /// # Errors
    ///
    /// Returns [`CombatError::ConfigParse`] on malformed RON, or
    /// [`CombatError::InvalidConfig`] if a value is out of range.
    pub fn from_ron_str(source: &str) -> Result<Self> {
        let config: Self = ron::from_str(source)?;
        config.validate()?;
        Ok(config)
    }

    /// Builder: set the RNG seed.
    #[must_use]
    pub const fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    /// Builder: enable or disable parallel read passes.
    #[must_use]
    pub const fn with_parallel(mut self, parallel: bool) -> Self {
        self.parallel = parallel;
        self
    }

    /// Builder: set the tick rate.
    #[must_use]
    pub const fn with_tick_rate(mut self, tick_rate: u32) -> Self {
        self.tick_rate = tick_rate;
        self
    }

    /// Builder: set the hysteresis distance.
    #[must_use]
    pub const fn with_min_switch_distance(mut self, distance: Fixed) -> Self {
        self.min_switch_distance = distance;
        self
    }

    /// Builder: set the spatial query capacity.
    #[must_use]
    pub const fn with_query_capacity(mut self, capacity: usize) -> Self {
        self.query_capacity = capacity;
        self
    }

    /// Check value ranges.
    ///
    /// # Errors
    ///
    /// Returns [`CombatError::InvalidConfig`] naming the first bad field.
    pub fn validate(&self) -> Result<()> {
        let fail = |reason: &str| {
            Err(CombatError::InvalidConfig {
                entry: "simulation".to_string(),
                reason: reason.to_string(),
            })
        };

        if self.tick_rate == 0 {
            return fail("tick_rate must be positive");
        }
        if self.cell_size <= Fixed::ZERO {
            return fail("cell_size must be positive");
        }
        if self.query_capacity == 0 {
            return fail("query_capacity must be positive");
        }
        if self.min_switch_distance < Fixed::ZERO {
            return fail("min_switch_distance must be non-negative");
        }
        if self.range_slack < Fixed::ONE {
            return fail("range_slack must be at least 1");
        }
        if self.death_grace_seconds < Fixed::ZERO || self.arrival_tolerance < Fixed::ZERO {
            return fail("death_grace_seconds and arrival_tolerance must be non-negative");
        }
        Ok(())
    }

    /// Simulation time in seconds at `tick`.
    #[must_use]
    pub fn time_at(&self, tick: u64) -> Fixed {
        Fixed::from_num(tick) / Fixed::from_num(self.tick_rate)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_validate() {
        assert!(SimulationConfig::default().validate().is_ok());
    }

    #[test]
    fn test_empty_ron_gives_defaults() {
        let config = SimulationConfig::from_ron_str("()").unwrap();
        assert_eq!(config, SimulationConfig::default());
    }

    #[test]
    fn test_ron_overrides() {
        let config =
            SimulationConfig::from_ron_str("(min_switch_distance: 2.5, range_slack: 1.0)").unwrap();
        assert_eq!(config.min_switch_distance, Fixed::from_num(2.5));
        assert_eq!(config.range_slack, Fixed::ONE);
    }

    #[test]
    fn test_invalid_tick_rate() {
        let result = SimulationConfig::from_ron_str("(tick_rate: 0)");
        assert!(matches!(result, Err(CombatError::InvalidConfig { .. })));
    }

    #[test]
    fn test_time_at_is_exact_for_half_seconds() {
        let config = SimulationConfig::default();
        assert_eq!(config.time_at(10), Fixed::from_num(0.5));
        assert_eq!(config.time_at(0), Fixed::ZERO);
    }
}
