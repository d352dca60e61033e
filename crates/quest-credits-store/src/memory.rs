//! In-memory storage implementation.
//!
//! All state sits behind one async mutex, so every trait method runs as a
//! single critical section. Used by tests and local development.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::Mutex;

use quest_credits_core::{
    AccountBalance, AccountId, AdventureId, AdventurePhase, PurchaseRecord, PurchaseStatus,
    RegenerationCounter, RegenerationState,
};

use crate::error::{Result, StoreError};
use crate::{apply_grant, ConsumeOutcome, SettleOutcome, Store};

#[derive(Default)]
struct Tables {
    accounts: HashMap<AccountId, AccountBalance>,
    adventures: HashMap<AdventureId, RegenerationState>,
    purchases: HashMap<String, PurchaseRecord>,
}

/// Mutex-guarded in-memory storage.
#[derive(Default)]
pub struct MemoryStore {
    tables: Mutex<Tables>,
}

impl MemoryStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn create_account(&self, account_id: &AccountId) -> Result<AccountBalance> {
        let mut tables = self.tables.lock().await;
        if tables.accounts.contains_key(account_id) {
            return Err(StoreError::AlreadyExists {
                entity: "account",
                id: account_id.to_string(),
            });
        }
        let balance = AccountBalance::new(*account_id);
        tables.accounts.insert(*account_id, balance.clone());
        Ok(balance)
    }

    async fn get_account(&self, account_id: &AccountId) -> Result<Option<AccountBalance>> {
        Ok(self.tables.lock().await.accounts.get(account_id).cloned())
    }

    async fn consume_credit(&self, account_id: &AccountId) -> Result<ConsumeOutcome> {
        let mut tables = self.tables.lock().await;
        let account = tables
            .accounts
            .get_mut(account_id)
            .ok_or_else(|| StoreError::account_not_found(account_id))?;

        if account.credits < 1 {
            return Ok(ConsumeOutcome::Insufficient {
                balance: account.credits,
            });
        }

        account.credits -= 1;
        account.updated_at = Utc::now();
        Ok(ConsumeOutcome::Consumed {
            balance: account.credits,
        })
    }

    async fn refund_credit(&self, account_id: &AccountId) -> Result<i64> {
        let mut tables = self.tables.lock().await;
        let account = tables
            .accounts
            .get_mut(account_id)
            .ok_or_else(|| StoreError::account_not_found(account_id))?;

        account.credits = account
            .credits
            .checked_add(1)
            .ok_or_else(|| StoreError::balance_overflow(account_id))?;
        account.updated_at = Utc::now();
        Ok(account.credits)
    }

    async fn add_credits(&self, account_id: &AccountId, amount: i64) -> Result<AccountBalance> {
        if amount < 0 {
            return Err(StoreError::negative_grant(amount));
        }

        let mut tables = self.tables.lock().await;
        let account = tables
            .accounts
            .get_mut(account_id)
            .ok_or_else(|| StoreError::account_not_found(account_id))?;

        apply_grant(account, amount)?;
        account.updated_at = Utc::now();
        Ok(account.clone())
    }

    async fn create_adventure(
        &self,
        adventure_id: &AdventureId,
        owner: &AccountId,
        phase: AdventurePhase,
    ) -> Result<RegenerationState> {
        let mut tables = self.tables.lock().await;
        if !tables.accounts.contains_key(owner) {
            return Err(StoreError::account_not_found(owner));
        }
        if tables.adventures.contains_key(adventure_id) {
            return Err(StoreError::AlreadyExists {
                entity: "adventure",
                id: adventure_id.to_string(),
            });
        }
        let state = RegenerationState::new(*adventure_id, *owner, phase);
        tables.adventures.insert(*adventure_id, state.clone());
        Ok(state)
    }

    async fn get_adventure(&self, adventure_id: &AdventureId) -> Result<Option<RegenerationState>> {
        Ok(self.tables.lock().await.adventures.get(adventure_id).cloned())
    }

    async fn set_phase(&self, adventure_id: &AdventureId, phase: AdventurePhase) -> Result<()> {
        let mut tables = self.tables.lock().await;
        let state = tables
            .adventures
            .get_mut(adventure_id)
            .ok_or_else(|| StoreError::adventure_not_found(adventure_id))?;

        state.phase = phase;
        state.updated_at = Utc::now();
        Ok(())
    }

    async fn increment_regenerations(
        &self,
        adventure_id: &AdventureId,
        counter: RegenerationCounter,
    ) -> Result<u32> {
        let mut tables = self.tables.lock().await;
        let state = tables
            .adventures
            .get_mut(adventure_id)
            .ok_or_else(|| StoreError::adventure_not_found(adventure_id))?;

        let slot = match counter {
            RegenerationCounter::Scaffold => &mut state.scaffold_regenerations_used,
            RegenerationCounter::Movement => &mut state.movement_regenerations_used,
        };
        *slot += 1;
        let used = *slot;
        state.updated_at = Utc::now();
        Ok(used)
    }

    async fn record_purchase(&self, record: &PurchaseRecord) -> Result<()> {
        let mut tables = self.tables.lock().await;
        if tables.purchases.contains_key(&record.payment_reference) {
            return Err(StoreError::DuplicatePurchase {
                reference: record.payment_reference.clone(),
            });
        }
        if !tables.accounts.contains_key(&record.account_id) {
            return Err(StoreError::account_not_found(record.account_id));
        }
        tables
            .purchases
            .insert(record.payment_reference.clone(), record.clone());
        Ok(())
    }

    async fn get_purchase(&self, payment_reference: &str) -> Result<Option<PurchaseRecord>> {
        Ok(self
            .tables
            .lock()
            .await
            .purchases
            .get(payment_reference)
            .cloned())
    }

    async fn settle_purchase(
        &self,
        payment_reference: &str,
        status: PurchaseStatus,
    ) -> Result<SettleOutcome> {
        if !status.is_settled() {
            return Err(StoreError::ConstraintViolation(
                "a purchase can only be settled as succeeded or failed".into(),
            ));
        }

        let mut tables = self.tables.lock().await;
        let Tables {
            accounts,
            purchases,
            ..
        } = &mut *tables;

        let record = purchases
            .get_mut(payment_reference)
            .ok_or_else(|| StoreError::purchase_not_found(payment_reference))?;

        if record.status.is_settled() {
            return Ok(SettleOutcome::AlreadySettled {
                record: record.clone(),
            });
        }

        let now = Utc::now();
        let balance = if status == PurchaseStatus::Succeeded {
            let account = accounts
                .get_mut(&record.account_id)
                .ok_or_else(|| StoreError::account_not_found(record.account_id))?;
            apply_grant(account, record.credits)?;
            account.updated_at = now;
            Some(account.credits)
        } else {
            None
        };

        record.status = status;
        record.updated_at = now;

        Ok(SettleOutcome::Settled {
            record: record.clone(),
            balance,
        })
    }
}
