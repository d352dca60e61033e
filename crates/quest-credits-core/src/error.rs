//! Error types for quest-credits.
//!
//! Business-rule rejections (`InsufficientCredits`, `LimitExceeded`, `PhaseClosed`)
//! are ordinary results that callers render to users. Infrastructure failures
//! (`Storage`) are distinct so monitoring can alert on them alone.

use crate::{AccountId, AdventureId, AdventurePhase, CreditPurpose, RegenerationCounter};

/// Errors from credit ledger operations.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CreditError {
    /// The balance cannot cover the charge. No mutation was applied.
    #[error("insufficient credits for {purpose}: balance={balance}")]
    InsufficientCredits {
        /// What the credit would have paid for.
        purpose: CreditPurpose,
        /// Balance observed by the failed guard.
        balance: i64,
    },

    /// No balance row exists for the account.
    #[error("account not found: {account_id}")]
    AccountNotFound {
        /// The account that was not found.
        account_id: AccountId,
    },

    /// A balance row already exists for the account.
    #[error("account already exists: {account_id}")]
    AccountExists {
        /// The account that was opened twice.
        account_id: AccountId,
    },

    /// Credit grants must be positive and fit the balance.
    #[error("invalid amount: {0}")]
    InvalidAmount(i64),

    /// The store failed.
    #[error("storage error: {0}")]
    Storage(String),
}

impl CreditError {
    /// Whether this is an expected, user-facing rejection rather than an incident.
    #[must_use]
    pub const fn is_business_rule(&self) -> bool {
        matches!(self, Self::InsufficientCredits { .. })
    }
}

/// Errors from regeneration limit operations.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RegenerationError {
    /// The counter for the current phase is at or over its cap. No mutation was applied.
    #[error("{used}/{limit} {counter} regenerations used")]
    LimitExceeded {
        /// The counter that is exhausted.
        counter: RegenerationCounter,
        /// Regenerations used.
        used: u32,
        /// The cap.
        limit: u32,
    },

    /// The adventure's phase has no regeneration counter.
    #[error("regenerations are closed in phase {phase}")]
    PhaseClosed {
        /// The adventure's current phase.
        phase: AdventurePhase,
    },

    /// No adventure row exists.
    #[error("adventure not found: {adventure_id}")]
    AdventureNotFound {
        /// The adventure that was not found.
        adventure_id: AdventureId,
    },

    /// The store failed.
    #[error("storage error: {0}")]
    Storage(String),
}

impl RegenerationError {
    /// Whether this is an expected, user-facing rejection rather than an incident.
    #[must_use]
    pub const fn is_business_rule(&self) -> bool {
        matches!(self, Self::LimitExceeded { .. } | Self::PhaseClosed { .. })
    }
}
