//! Faction tags and faction masks.
//!
//! Faction is the only predicate targeting filters on. Masks are bit flags so
//! a query can ask for "enemies", "allies" or "anyone" in a single test.

use bitflags::bitflags;
use serde::{Deserialize, Serialize};

/// Side an agent fights for. Immutable for the agent's lifetime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Faction {
    /// Player-aligned agents.
    Ally,
    /// Hostile agents.
    Enemy,
}

bitflags! {
    /// Set of factions a query accepts.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
    pub struct FactionMask: u8 {
        /// Accept [`Faction::Ally`].
        const ALLY = 1 << 0;
        /// Accept [`Faction::Enemy`].
        const ENEMY = 1 << 1;
    }
}

impl Faction {
    /// All factions, in declaration order.
    pub const ALL: [Self; 2] = [Self::Ally, Self::Enemy];

    /// Mask containing only this faction.
    #[must_use]
    pub const fn mask(self) -> FactionMask {
        match self {
            Self::Ally => FactionMask::ALLY,
            Self::Enemy => FactionMask::ENEMY,
        }
    }

    /// The faction this one fights.
    #[must_use]
    pub const fn opposing(self) -> Self {
        match self {
            Self::Ally => Self::Enemy,
            Self::Enemy => Self::Ally,
        }
    }

    /// Get the display name for this faction.
    #[must_use]
    pub const fn display_name(self) -> &'static str {
        match self {
            Self::Ally => "Ally",
            Self::Enemy => "Enemy",
        }
    }
}

impl FactionMask {
    /// Whether the mask accepts `faction`.
    #[must_use]
    pub const fn accepts(self, faction: Faction) -> bool {
        self.contains(faction.mask())
    }
}

impl std::fmt::Display for Faction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.display_name())
    }
}
