//! Validated lookup tables for weapons and spells.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};
use tracing::debug;

use super::spell_data::{SpellConfig, SpellId};
use super::weapon_data::{WeaponConfig, WeaponId};
use crate::error::{CombatError, Result};

/// All weapon and spell definitions known to a simulation.
///
/// Tables are read-only once built. Ids are positions in the lists, so the
/// order in the source file is part of the table's identity.
///
/// # Example RON
///
/// ```ron
/// CombatTables(
///     weapons: [
///         WeaponConfig(name: "sword", range: 2.0, damage: 10, cooldown_seconds: 1.0,
///             style: Melee(MeleeProfile(half_angle_degrees: 60.0, max_targets: 2))),
///     ],
///     spells: [],
/// )
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CombatTables {
    #[serde(default)]
    weapons: Vec<WeaponConfig>,
    #[serde(default)]
    spells: Vec<SpellConfig>,
}

impl CombatTables {
    /// Build and validate tables.
    ///
    /// # Errors
    ///
    /// Returns [`CombatError::InvalidConfig`] for a duplicate name or an
    /// entry that fails its own validation.
    pub fn new(weapons: Vec<WeaponConfig>, spells: Vec<SpellConfig>) -> Result<Self> {
        let mut tables = Self { weapons, spells };
        tables.validate()?;
        tables.prepare();
        Ok(tables)
    }

    /// Parse and validate tables from RON text.
    ///
    /// # Errors
    ///
    /// Returns [`CombatError::ConfigParse`] if the text is not valid RON for
    /// this schema, or any error from [`CombatTables::new`].
    pub fn from_ron_str(source: &str) -> Result<Self> {
        let raw: Self = ron::from_str(source)?;
        let tables = Self::new(raw.weapons, raw.spells)?;
        debug!(
            weapons = tables.weapons.len(),
            spells = tables.spells.len(),
            "Loaded combat tables"
        );
        Ok(tables)
    }

    /// Recompute derived caches. Needed after deserializing a state snapshot.
    pub fn prepare(&mut self) {
        for weapon in &mut self.weapons {
            weapon.prepare();
        }
    }

    fn validate(&self) -> Result<()> {
        if self.weapons.len() > usize::from(u16::MAX) || self.spells.len() > usize::from(u16::MAX) {
            return Err(CombatError::InvalidConfig {
                entry: "tables".to_string(),
                reason: "too many entries".to_string(),
            });
        }

        let mut seen = HashSet::new();
        for weapon in &self.weapons {
            if !seen.insert(weapon.name.as_str()) {
                return Err(duplicate(&weapon.name));
            }
            weapon.validate()?;
        }

        seen.clear();
        for spell in &self.spells {
            if !seen.insert(spell.name.as_str()) {
                return Err(duplicate(&spell.name));
            }
            spell.validate()?;
        }

        Ok(())
    }

    /// Look up a weapon by id.
    #[must_use]
    pub fn weapon(&self, id: WeaponId) -> Option<&WeaponConfig> {
        self.weapons.get(usize::from(id.0))
    }

    /// Look up a spell by id.
    #[must_use]
    pub fn spell(&self, id: SpellId) -> Option<&SpellConfig> {
        self.spells.get(usize::from(id.0))
    }

    /// Resolve a weapon name to its id.
    ///
    /// # Errors
    ///
    /// Returns [`CombatError::UnknownWeapon`] if no weapon has that name.
    pub fn weapon_id(&self, name: &str) -> Result<WeaponId> {
        self.weapons
            .iter()
            .position(|w| w.name == name)
            .map(|i| WeaponId(i as u16))
            .ok_or_else(|| CombatError::UnknownWeapon(name.to_string()))
    }

    /// Resolve a spell name to its id.
    ///
    /// # Errors
    ///
    /// Returns [`CombatError::UnknownSpell`] if no spell has that name.
    pub fn spell_id(&self, name: &str) -> Result<SpellId> {
        self.spells
            .iter()
            .position(|s| s.name == name)
            .map(|i| SpellId(i as u16))
            .ok_or_else(|| CombatError::UnknownSpell(name.to_string()))
    }

    /// All weapons in id order.
    #[must_use]
    pub fn weapons(&self) -> &[WeaponConfig] {
        &self.weapons
    }

    /// All spells in id order.
    #[must_use]
    pub fn spells(&self) -> &[SpellConfig] {
        &self.spells
    }
}

fn duplicate(name: &str) -> CombatError {
    CombatError::InvalidConfig {
        entry: name.to_string(),
        reason: "duplicate name".to_string(),
    }
}
