//! Purchase fulfilment.
//!
//! The payment-completion path into the ledger. A purchase is recorded as
//! pending when checkout starts and settled once when the payment provider
//! reports the outcome. Settling as succeeded grants the credits in the same
//! atomic store operation, so a payment reference grants at most once no
//! matter how often the provider redelivers its webhook.

use std::sync::Arc;

use quest_credits_core::{AccountId, PurchaseRecord, PurchaseStatus};
use quest_credits_store::{SettleOutcome, Store, StoreError};

/// Errors from purchase fulfilment.
#[derive(Debug, thiserror::Error)]
pub enum PurchaseError {
    /// A purchase must grant at least one credit.
    #[error("invalid credit amount: {0}")]
    InvalidCredits(i64),

    /// The account or purchase doesn't exist.
    #[error(transparent)]
    NotFound(StoreError),

    /// Store failure.
    #[error(transparent)]
    Store(StoreError),
}

impl From<StoreError> for PurchaseError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound { .. } => Self::NotFound(err),
            other => Self::Store(other),
        }
    }
}

/// What a settlement did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Fulfilment {
    /// Credits were granted. `balance` is the account balance afterwards.
    Granted {
        /// The settled record.
        record: PurchaseRecord,
        /// Balance after the grant.
        balance: i64,
    },

    /// The purchase was marked failed; nothing was granted.
    Failed {
        /// The settled record.
        record: PurchaseRecord,
    },

    /// The purchase had already been settled; nothing changed.
    Duplicate {
        /// The existing record.
        record: PurchaseRecord,
    },
}

/// Records purchases and grants their credits exactly once.
#[derive(Clone)]
pub struct PurchaseFulfilment {
    store: Arc<dyn Store>,
}

impl PurchaseFulfilment {
    /// Create a fulfilment service over a store.
    #[must_use]
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }

    /// Record a pending purchase.
    ///
    /// Recording the same reference twice is not an error; the existing record
    /// is returned unchanged.
    ///
    /// # Errors
    ///
    /// - `PurchaseError::InvalidCredits` if `credits` is not positive.
    /// - `PurchaseError::Store` if the store fails.
    pub async fn begin(
        &self,
        payment_reference: &str,
        account_id: AccountId,
        amount_cents: i64,
        credits: i64,
    ) -> Result<PurchaseRecord, PurchaseError> {
        if credits <= 0 {
            return Err(PurchaseError::InvalidCredits(credits));
        }

        let record = PurchaseRecord::pending(payment_reference, account_id, amount_cents, credits);
        match self.store.record_purchase(&record).await {
            Ok(()) => {
                tracing::info!(
                    payment_reference = %payment_reference,
                    account_id = %account_id,
                    amount_cents,
                    credits,
                    "Purchase recorded"
                );
                Ok(record)
            }
            Err(StoreError::DuplicatePurchase { .. }) => {
                tracing::debug!(payment_reference = %payment_reference, "Purchase already recorded");
                self.store
                    .get_purchase(payment_reference)
                    .await?
                    .ok_or_else(|| {
                        PurchaseError::NotFound(StoreError::NotFound {
                            entity: "purchase",
                            id: payment_reference.to_string(),
                        })
                    })
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Settle a pending purchase as succeeded and grant its credits.
    ///
    /// # Errors
    ///
    /// - `PurchaseError::NotFound` if the purchase or its account doesn't exist.
    /// - `PurchaseError::Store` if the store fails.
    pub async fn complete(&self, payment_reference: &str) -> Result<Fulfilment, PurchaseError> {
        self.settle(payment_reference, PurchaseStatus::Succeeded).await
    }

    /// Settle a pending purchase as failed.
    ///
    /// # Errors
    ///
    /// - `PurchaseError::NotFound` if the purchase doesn't exist.
    /// - `PurchaseError::Store` if the store fails.
    pub async fn fail(&self, payment_reference: &str) -> Result<Fulfilment, PurchaseError> {
        self.settle(payment_reference, PurchaseStatus::Failed).await
    }

    async fn settle(
        &self,
        payment_reference: &str,
        status: PurchaseStatus,
    ) -> Result<Fulfilment, PurchaseError> {
        let outcome = self
            .store
            .settle_purchase(payment_reference, status)
            .await
            .map_err(|e| {
                tracing::error!(
                    payment_reference = %payment_reference,
                    status = %status,
                    error = %e,
                    "Purchase settlement failed"
                );
                e
            })?;

        let fulfilment = match outcome {
            SettleOutcome::Settled {
                record,
                balance: Some(balance),
            } => {
                tracing::info!(
                    payment_reference = %payment_reference,
                    account_id = %record.account_id,
                    credits = record.credits,
                    balance,
                    "Purchase fulfilled"
                );
                Fulfilment::Granted { record, balance }
            }
            SettleOutcome::Settled {
                record,
                balance: None,
            } => {
                tracing::info!(
                    payment_reference = %payment_reference,
                    account_id = %record.account_id,
                    "Purchase failed"
                );
                Fulfilment::Failed { record }
            }
            SettleOutcome::AlreadySettled { record } => {
                tracing::info!(
                    payment_reference = %payment_reference,
                    status = %record.status,
                    "Purchase already settled, ignoring"
                );
                Fulfilment::Duplicate { record }
            }
        };

        Ok(fulfilment)
    }
}
