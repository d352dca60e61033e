//! Storage layer for quest-credits.
//!
//! This crate owns every mutation of account balances, adventure regeneration
//! counters and purchase records. Each mutation is a single atomic store
//! operation; nothing outside this crate reads a balance or counter and then
//! writes it back.
//!
//! # Backends
//!
//! - [`PgStore`]: PostgreSQL via `sqlx`. Conditional `UPDATE ... WHERE credits >= 1`
//!   statements plus `CHECK` constraints enforce non-negativity in the database.
//! - [`RocksStore`] (feature `rocksdb-backend`): embedded `RocksDB`, with mutations
//!   serialized through a write lock and committed as one `WriteBatch`.
//! - [`MemoryStore`]: in-process, for tests and local development.
//!
//! # Example
//!
//! ```no_run
//! use quest_credits_core::AccountId;
//! use quest_credits_store::{ConsumeOutcome, MemoryStore, Store};
//!
//! # async fn demo() -> quest_credits_store::Result<()> {
//! let store = MemoryStore::new();
//! let account_id = AccountId::generate();
//! store.create_account(&account_id).await?;
//! store.add_credits(&account_id, 5).await?;
//!
//! assert_eq!(
//!     store.consume_credit(&account_id).await?,
//!     ConsumeOutcome::Consumed { balance: 4 }
//! );
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

pub mod error;
pub mod keys;
pub mod memory;
pub mod postgres;
#[cfg(feature = "rocksdb-backend")]
pub mod rocks;
pub mod schema;

pub use error::{Result, StoreError};
pub use memory::MemoryStore;
pub use postgres::PgStore;
#[cfg(feature = "rocksdb-backend")]
pub use rocks::RocksStore;

use async_trait::async_trait;

use quest_credits_core::{
    AccountBalance, AccountId, AdventureId, AdventurePhase, PurchaseRecord, PurchaseStatus,
    RegenerationCounter, RegenerationState,
};

/// Add a grant to both the spendable and lifetime totals.
///
/// Nothing is changed if either total would overflow.
pub(crate) fn apply_grant(account: &mut AccountBalance, amount: i64) -> Result<()> {
    if amount < 0 {
        return Err(StoreError::negative_grant(amount));
    }
    let (Some(credits), Some(total_purchased)) = (
        account.credits.checked_add(amount),
        account.total_purchased.checked_add(amount),
    ) else {
        return Err(StoreError::balance_overflow(account.account_id));
    };
    account.credits = credits;
    account.total_purchased = total_purchased;
    Ok(())
}

/// Result of a guarded credit decrement.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConsumeOutcome {
    /// One credit was taken. `balance` is the balance afterwards.
    Consumed {
        /// Balance after the decrement.
        balance: i64,
    },

    /// The guard `credits >= 1` failed and nothing changed.
    Insufficient {
        /// Balance observed by the guard.
        balance: i64,
    },
}

/// Result of settling a purchase.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SettleOutcome {
    /// The purchase moved out of `Pending`. For `Succeeded`, `balance` holds the
    /// account balance after the credits were granted.
    Settled {
        /// The updated purchase record.
        record: PurchaseRecord,
        /// Account balance after the grant, if credits were granted.
        balance: Option<i64>,
    },

    /// The purchase was already settled; nothing changed.
    AlreadySettled {
        /// The existing record.
        record: PurchaseRecord,
    },
}

/// The storage trait defining all ledger operations.
///
/// Implementations must make every method atomic on its own. Concurrent
/// `consume_credit` calls against a balance of K succeed exactly K times.
#[async_trait]
pub trait Store: Send + Sync {
    // =========================================================================
    // Account Balances
    // =========================================================================

    /// Create a zero balance row for an account.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::AlreadyExists` if the account already has a row.
    async fn create_account(&self, account_id: &AccountId) -> Result<AccountBalance>;

    /// Get an account's balance row.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    async fn get_account(&self, account_id: &AccountId) -> Result<Option<AccountBalance>>;

    /// Take one credit if the balance is at least one.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::NotFound` if the account doesn't exist.
    async fn consume_credit(&self, account_id: &AccountId) -> Result<ConsumeOutcome>;

    /// Give one credit back. Not limit-checked and not deduplicated.
    ///
    /// Returns the new balance.
    ///
    /// # Errors
    ///
    /// - `StoreError::NotFound` if the account doesn't exist.
    /// - `StoreError::ConstraintViolation` if the balance would overflow.
    async fn refund_credit(&self, account_id: &AccountId) -> Result<i64>;

    /// Add purchased credits: `credits += amount` and `total_purchased += amount`.
    ///
    /// # Errors
    ///
    /// - `StoreError::NotFound` if the account doesn't exist.
    /// - `StoreError::ConstraintViolation` if `amount` is negative or a total
    ///   would overflow. The balance is unchanged.
    async fn add_credits(&self, account_id: &AccountId, amount: i64) -> Result<AccountBalance>;

    // =========================================================================
    // Adventures
    // =========================================================================

    /// Create the regeneration state for a new adventure.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::AlreadyExists` if the adventure already exists.
    async fn create_adventure(
        &self,
        adventure_id: &AdventureId,
        owner: &AccountId,
        phase: AdventurePhase,
    ) -> Result<RegenerationState>;

    /// Get an adventure's regeneration state.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    async fn get_adventure(&self, adventure_id: &AdventureId) -> Result<Option<RegenerationState>>;

    /// Move an adventure to another lifecycle phase. Counters are untouched.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::NotFound` if the adventure doesn't exist.
    async fn set_phase(&self, adventure_id: &AdventureId, phase: AdventurePhase) -> Result<()>;

    /// Increment one regeneration counter by one and return its new value.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::NotFound` if the adventure doesn't exist.
    async fn increment_regenerations(
        &self,
        adventure_id: &AdventureId,
        counter: RegenerationCounter,
    ) -> Result<u32>;

    // =========================================================================
    // Purchases
    // =========================================================================

    /// Append a pending purchase record.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::DuplicatePurchase` if the payment reference exists.
    async fn record_purchase(&self, record: &PurchaseRecord) -> Result<()>;

    /// Get a purchase by payment reference.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    async fn get_purchase(&self, payment_reference: &str) -> Result<Option<PurchaseRecord>>;

    /// Settle a pending purchase. On `Succeeded`, the purchased credits are
    /// granted in the same atomic operation, so a reference grants at most once.
    ///
    /// # Errors
    ///
    /// - `StoreError::NotFound` if the purchase or its account doesn't exist.
    /// - `StoreError::ConstraintViolation` if `status` is `Pending`.
    async fn settle_purchase(
        &self,
        payment_reference: &str,
        status: PurchaseStatus,
    ) -> Result<SettleOutcome>;
}
