//! Account balance types.
//!
//! The balance row lives on the account's profile. It is only ever mutated
//! through the store's atomic primitives: consume (-1), refund (+1) and
//! add credits (+N).

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::AccountId;

/// Credits charged for one paid generation attempt.
pub const CREDITS_PER_GENERATION: i64 = 1;

/// The credit balance of a single account.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountBalance {
    /// The account this balance belongs to.
    pub account_id: AccountId,

    /// Spendable credits. Never negative.
    pub credits: i64,

    /// Lifetime credits purchased. Monotonically non-decreasing.
    ///
    /// Audit and analytics only, never read for authorization decisions.
    pub total_purchased: i64,

    /// When the balance row was created.
    pub created_at: DateTime<Utc>,

    /// When the balance row was last mutated.
    pub updated_at: DateTime<Utc>,
}

impl AccountBalance {
    /// Create a new balance row with zero credits.
    #[must_use]
    pub fn new(account_id: AccountId) -> Self {
        let now = Utc::now();
        Self {
            account_id,
            credits: 0,
            total_purchased: 0,
            created_at: now,
            updated_at: now,
        }
    }

    /// Check whether the balance covers one paid generation.
    ///
    /// Display only. Authorization goes through the store's conditional decrement.
    #[must_use]
    pub const fn can_afford_generation(&self) -> bool {
        self.credits >= CREDITS_PER_GENERATION
    }
}

/// What a consumed credit was spent on.
///
/// Carried on `InsufficientCredits` so callers can tailor the rejection message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CreditPurpose {
    /// A one-shot adventure generation.
    AdventureGeneration,

    /// Any other paid generation, named by the caller.
    Custom(String),
}

impl fmt::Display for CreditPurpose {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::AdventureGeneration => f.write_str("adventure_generation"),
            Self::Custom(name) => f.write_str(name),
        }
    }
}
