//! Credit ledger.
//!
//! The only code path that changes an account's credit balance. Every
//! operation is one atomic store call; the ledger adds typed outcomes and
//! structured logging on top.

use std::sync::Arc;

use quest_credits_core::{AccountBalance, AccountId, AttemptId, CreditError, CreditPurpose};
use quest_credits_store::{ConsumeOutcome, Store, StoreError};

/// Atomic balance operations for paid generations.
#[derive(Clone)]
pub struct CreditLedger {
    store: Arc<dyn Store>,
}

impl CreditLedger {
    /// Create a ledger over a store.
    #[must_use]
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }

    /// Charge one credit.
    ///
    /// Returns the balance after the charge. N concurrent calls against a
    /// balance of K succeed exactly K times.
    ///
    /// # Errors
    ///
    /// - `CreditError::InsufficientCredits` if the balance is below one; nothing changes.
    /// - `CreditError::AccountNotFound` if the account has no balance row.
    /// - `CreditError::Storage` if the store fails.
    pub async fn consume(
        &self,
        account_id: &AccountId,
        purpose: &CreditPurpose,
        attempt_id: AttemptId,
        metadata: &serde_json::Value,
    ) -> Result<i64, CreditError> {
        let outcome = self
            .store
            .consume_credit(account_id)
            .await
            .map_err(|e| storage_error(e, account_id))?;

        match outcome {
            ConsumeOutcome::Consumed { balance } => {
                tracing::info!(
                    account_id = %account_id,
                    purpose = %purpose,
                    attempt_id = %attempt_id,
                    metadata = %metadata,
                    balance,
                    "Credit consumed"
                );
                Ok(balance)
            }
            ConsumeOutcome::Insufficient { balance } => {
                tracing::debug!(
                    account_id = %account_id,
                    purpose = %purpose,
                    attempt_id = %attempt_id,
                    balance,
                    "Insufficient credits"
                );
                Err(CreditError::InsufficientCredits {
                    purpose: purpose.clone(),
                    balance,
                })
            }
        }
    }

    /// Give one credit back after a failed generation.
    ///
    /// Not limit-checked and not deduplicated: callers must refund at most
    /// once per consumed credit. Returns the new balance.
    ///
    /// # Errors
    ///
    /// - `CreditError::AccountNotFound` if the account has no balance row.
    /// - `CreditError::Storage` if the store fails.
    pub async fn refund(
        &self,
        account_id: &AccountId,
        purpose: &CreditPurpose,
        reason: &str,
        attempt_id: AttemptId,
        metadata: &serde_json::Value,
    ) -> Result<i64, CreditError> {
        let balance = self
            .store
            .refund_credit(account_id)
            .await
            .map_err(|e| storage_error(e, account_id))?;

        tracing::info!(
            account_id = %account_id,
            purpose = %purpose,
            attempt_id = %attempt_id,
            reason = %reason,
            metadata = %metadata,
            balance,
            "Credit refunded"
        );

        Ok(balance)
    }

    /// Grant purchased credits. Increments both balance and lifetime purchases.
    ///
    /// The payment collaborator is responsible for calling this once per
    /// successful purchase; see `PurchaseFulfilment` for the idempotent path.
    ///
    /// # Errors
    ///
    /// - `CreditError::InvalidAmount` if `amount` is not positive or would
    ///   overflow the balance; nothing changes.
    /// - `CreditError::AccountNotFound` if the account has no balance row.
    /// - `CreditError::Storage` if the store fails.
    pub async fn add_credits(
        &self,
        account_id: &AccountId,
        amount: i64,
    ) -> Result<AccountBalance, CreditError> {
        if amount <= 0 {
            return Err(CreditError::InvalidAmount(amount));
        }

        let balance = self
            .store
            .add_credits(account_id, amount)
            .await
            .map_err(|e| match e {
                StoreError::ConstraintViolation(reason) => {
                    tracing::warn!(
                        account_id = %account_id,
                        amount,
                        reason = %reason,
                        "Credit grant rejected"
                    );
                    CreditError::InvalidAmount(amount)
                }
                other => storage_error(other, account_id),
            })?;

        tracing::info!(
            account_id = %account_id,
            amount,
            balance = balance.credits,
            total_purchased = balance.total_purchased,
            "Credits added"
        );

        Ok(balance)
    }

    /// Create the balance row for a new account.
    ///
    /// # Errors
    ///
    /// - `CreditError::AccountExists` if the account already has a balance row.
    /// - `CreditError::Storage` if the store fails.
    pub async fn open_account(&self, account_id: &AccountId) -> Result<AccountBalance, CreditError> {
        let balance = self
            .store
            .create_account(account_id)
            .await
            .map_err(|e| storage_error(e, account_id))?;
        tracing::info!(account_id = %account_id, "Account balance opened");
        Ok(balance)
    }

    /// Read the current balance. Display only.
    ///
    /// # Errors
    ///
    /// - `CreditError::AccountNotFound` if the account has no balance row.
    /// - `CreditError::Storage` if the store fails.
    pub async fn balance(&self, account_id: &AccountId) -> Result<AccountBalance, CreditError> {
        self.store
            .get_account(account_id)
            .await
            .map_err(|e| storage_error(e, account_id))?
            .ok_or(CreditError::AccountNotFound {
                account_id: *account_id,
            })
    }
}

fn storage_error(err: StoreError, account_id: &AccountId) -> CreditError {
    match err {
        StoreError::NotFound {
            entity: "account", ..
        } => CreditError::AccountNotFound {
            account_id: *account_id,
        },
        StoreError::AlreadyExists {
            entity: "account", ..
        } => CreditError::AccountExists {
            account_id: *account_id,
        },
        other => {
            tracing::error!(account_id = %account_id, error = %other, "Credit ledger store failure");
            CreditError::Storage(other.to_string())
        }
    }
}
