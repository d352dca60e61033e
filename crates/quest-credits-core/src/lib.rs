//! Core types for the quest-credits ledger.
//!
//! This crate provides the foundational types shared by the store and the service:
//!
//! - **Identifiers**: `AccountId`, `AdventureId`, `AttemptId`
//! - **Accounts**: `AccountBalance`, `CreditPurpose`
//! - **Regenerations**: `AdventurePhase`, `RegenerationCounter`, `RegenerationState`,
//!   `RegenerationLimits`, `RegenerationCounts`
//! - **Purchases**: `PurchaseRecord`, `PurchaseStatus`
//! - **Errors**: `CreditError`, `RegenerationError`
//!
//! # Credit Unit
//!
//! **1 credit = 1 paid adventure generation attempt.**
//!
//! Credits never expire. Balances are stored as `i64` and are never negative;
//! the store enforces that with a check constraint, not just application logic.

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

pub mod account;
pub mod error;
pub mod ids;
pub mod purchase;
pub mod regeneration;

pub use account::{AccountBalance, CreditPurpose, CREDITS_PER_GENERATION};
pub use error::{CreditError, RegenerationError};
pub use ids::{AccountId, AdventureId, AttemptId, IdError};
pub use purchase::{PurchaseRecord, PurchaseStatus};
pub use regeneration::{
    AdventurePhase, RegenerationCounter, RegenerationCounts, RegenerationLimits,
    RegenerationState, DEFAULT_MOVEMENT_REGENERATION_LIMIT, DEFAULT_SCAFFOLD_REGENERATION_LIMIT,
};
