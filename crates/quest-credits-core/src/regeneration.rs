//! Regeneration state and limits for adventures.
//!
//! Each adventure carries two independent counters, one per regenerable phase.
//! The phase an adventure is in decides which counter a regeneration request
//! draws from. Counters only ever go up.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{AccountId, AdventureId};

// ============================================================================
// Constants
// ============================================================================

/// Default cap on scaffold regenerations per adventure.
pub const DEFAULT_SCAFFOLD_REGENERATION_LIMIT: u32 = 10;

/// Default cap on movement regenerations per adventure.
pub const DEFAULT_MOVEMENT_REGENERATION_LIMIT: u32 = 20;

/// Lifecycle phase of an adventure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AdventurePhase {
    /// The outline is being drafted; scaffold regenerations apply.
    Scaffold,

    /// Individual movements are being written; movement regenerations apply.
    Movements,

    /// The adventure is finished; no regenerations are allowed.
    Finalized,
}

impl AdventurePhase {
    /// The counter regenerations draw from in this phase, if any.
    #[must_use]
    pub const fn counter(self) -> Option<RegenerationCounter> {
        match self {
            Self::Scaffold => Some(RegenerationCounter::Scaffold),
            Self::Movements => Some(RegenerationCounter::Movement),
            Self::Finalized => None,
        }
    }

    /// Stable lowercase name, as stored.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Scaffold => "scaffold",
            Self::Movements => "movements",
            Self::Finalized => "finalized",
        }
    }

    /// Parse the stored name.
    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "scaffold" => Some(Self::Scaffold),
            "movements" => Some(Self::Movements),
            "finalized" => Some(Self::Finalized),
            _ => None,
        }
    }
}

impl fmt::Display for AdventurePhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One of the two per-adventure regeneration counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RegenerationCounter {
    /// Scaffold regenerations (phase A).
    Scaffold,

    /// Movement regenerations (phase B).
    Movement,
}

impl RegenerationCounter {
    /// Human-readable noun used in rejection messages.
    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            Self::Scaffold => "scaffold",
            Self::Movement => "movement",
        }
    }
}

impl fmt::Display for RegenerationCounter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Fixed caps per counter. Configuration, not per-adventure state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegenerationLimits {
    /// Cap on scaffold regenerations.
    pub scaffold: u32,

    /// Cap on movement regenerations.
    pub movements: u32,
}

impl RegenerationLimits {
    /// The cap for a counter.
    #[must_use]
    pub const fn limit_for(&self, counter: RegenerationCounter) -> u32 {
        match counter {
            RegenerationCounter::Scaffold => self.scaffold,
            RegenerationCounter::Movement => self.movements,
        }
    }
}

impl Default for RegenerationLimits {
    fn default() -> Self {
        Self {
            scaffold: DEFAULT_SCAFFOLD_REGENERATION_LIMIT,
            movements: DEFAULT_MOVEMENT_REGENERATION_LIMIT,
        }
    }
}

/// Regeneration fields embedded in an adventure row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegenerationState {
    /// The adventure.
    pub adventure_id: AdventureId,

    /// The account that owns the adventure.
    pub owner: AccountId,

    /// Current lifecycle phase.
    pub phase: AdventurePhase,

    /// Scaffold regenerations used so far.
    pub scaffold_regenerations_used: u32,

    /// Movement regenerations used so far.
    pub movement_regenerations_used: u32,

    /// When the row was last mutated.
    pub updated_at: DateTime<Utc>,
}

impl RegenerationState {
    /// Create the state for a fresh adventure with both counters at zero.
    #[must_use]
    pub fn new(adventure_id: AdventureId, owner: AccountId, phase: AdventurePhase) -> Self {
        Self {
            adventure_id,
            owner,
            phase,
            scaffold_regenerations_used: 0,
            movement_regenerations_used: 0,
            updated_at: Utc::now(),
        }
    }

    /// Read one counter.
    #[must_use]
    pub const fn used(&self, counter: RegenerationCounter) -> u32 {
        match counter {
            RegenerationCounter::Scaffold => self.scaffold_regenerations_used,
            RegenerationCounter::Movement => self.movement_regenerations_used,
        }
    }

    /// Project the counters against the caps.
    #[must_use]
    pub fn counts(&self, limits: &RegenerationLimits) -> RegenerationCounts {
        RegenerationCounts {
            scaffold_used: self.scaffold_regenerations_used,
            scaffold_remaining: limits
                .scaffold
                .saturating_sub(self.scaffold_regenerations_used),
            movements_used: self.movement_regenerations_used,
            movements_remaining: limits
                .movements
                .saturating_sub(self.movement_regenerations_used),
        }
    }
}

/// Read-only usage report for display.
///
/// Never used for authorization; `check_limit` always re-reads live state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegenerationCounts {
    /// Scaffold regenerations used.
    pub scaffold_used: u32,

    /// Scaffold regenerations left before the cap (0 when over).
    pub scaffold_remaining: u32,

    /// Movement regenerations used.
    pub movements_used: u32,

    /// Movement regenerations left before the cap (0 when over).
    pub movements_remaining: u32,
}
