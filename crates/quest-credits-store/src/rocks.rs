//! `RocksDB` storage implementation.
//!
//! `RocksDB` has no conditional update, so every mutation takes the store's
//! write lock, reads the current record, applies the guard, and commits a
//! single `WriteBatch` before releasing the lock. Reads don't take the lock.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use rocksdb::{BoundColumnFamily, ColumnFamilyDescriptor, DBWithThreadMode, MultiThreaded, Options, WriteBatch};
use tokio::sync::Mutex;

use quest_credits_core::{
    AccountBalance, AccountId, AdventureId, AdventurePhase, PurchaseRecord, PurchaseStatus,
    RegenerationCounter, RegenerationState,
};

use crate::error::{Result, StoreError};
use crate::keys;
use crate::schema::{all_column_families, cf};
use crate::{apply_grant, ConsumeOutcome, SettleOutcome, Store};

/// RocksDB-backed storage implementation.
pub struct RocksStore {
    db: Arc<DBWithThreadMode<MultiThreaded>>,
    write_lock: Mutex<()>,
}

impl RocksStore {
    /// Open or create a `RocksDB` database at the given path.
    ///
    /// # Errors
    ///
    /// Returns an error if the database cannot be opened or created.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let mut opts = Options::default();
        opts.create_if_missing(true);
        opts.create_missing_column_families(true);

        let cf_descriptors: Vec<_> = all_column_families()
            .into_iter()
            .map(|name| ColumnFamilyDescriptor::new(name, Options::default()))
            .collect();

        let db = DBWithThreadMode::open_cf_descriptors(&opts, path, cf_descriptors)
            .map_err(|e| StoreError::Database(e.to_string()))?;

        Ok(Self {
            db: Arc::new(db),
            write_lock: Mutex::new(()),
        })
    }

    fn cf(&self, name: &str) -> Result<Arc<BoundColumnFamily<'_>>> {
        self.db
            .cf_handle(name)
            .ok_or_else(|| StoreError::Database(format!("column family not found: {name}")))
    }

    fn serialize<T: serde::Serialize>(value: &T) -> Result<Vec<u8>> {
        let mut buf = Vec::new();
        ciborium::into_writer(value, &mut buf)
            .map_err(|e| StoreError::Serialization(e.to_string()))?;
        Ok(buf)
    }

    fn deserialize<T: serde::de::DeserializeOwned>(data: &[u8]) -> Result<T> {
        ciborium::from_reader(data).map_err(|e| StoreError::Serialization(e.to_string()))
    }

    fn read<T: serde::de::DeserializeOwned>(&self, family: &str, key: &[u8]) -> Result<Option<T>> {
        let cf = self.cf(family)?;
        self.db
            .get_cf(&cf, key)
            .map_err(|e| StoreError::Database(e.to_string()))?
            .map(|data| Self::deserialize(&data))
            .transpose()
    }

    fn write(&self, batch: WriteBatch) -> Result<()> {
        self.db
            .write(batch)
            .map_err(|e| StoreError::Database(e.to_string()))
    }

    fn put_account(&self, account: &AccountBalance) -> Result<()> {
        let cf = self.cf(cf::ACCOUNTS)?;
        let mut batch = WriteBatch::default();
        batch.put_cf(&cf, keys::account_key(&account.account_id), Self::serialize(account)?);
        self.write(batch)
    }

    fn put_adventure(&self, state: &RegenerationState) -> Result<()> {
        let cf = self.cf(cf::ADVENTURES)?;
        let mut batch = WriteBatch::default();
        batch.put_cf(&cf, keys::adventure_key(&state.adventure_id), Self::serialize(state)?);
        self.write(batch)
    }

    fn load_account(&self, account_id: &AccountId) -> Result<AccountBalance> {
        self.read(cf::ACCOUNTS, &keys::account_key(account_id))?
            .ok_or_else(|| StoreError::account_not_found(account_id))
    }

    fn load_adventure(&self, adventure_id: &AdventureId) -> Result<RegenerationState> {
        self.read(cf::ADVENTURES, &keys::adventure_key(adventure_id))?
            .ok_or_else(|| StoreError::adventure_not_found(adventure_id))
    }
}

#[async_trait]
impl Store for RocksStore {
    async fn create_account(&self, account_id: &AccountId) -> Result<AccountBalance> {
        let _guard = self.write_lock.lock().await;
        if self.get_account(account_id).await?.is_some() {
            return Err(StoreError::AlreadyExists {
                entity: "account",
                id: account_id.to_string(),
            });
        }
        let account = AccountBalance::new(*account_id);
        self.put_account(&account)?;
        Ok(account)
    }

    async fn get_account(&self, account_id: &AccountId) -> Result<Option<AccountBalance>> {
        self.read(cf::ACCOUNTS, &keys::account_key(account_id))
    }

    async fn consume_credit(&self, account_id: &AccountId) -> Result<ConsumeOutcome> {
        let _guard = self.write_lock.lock().await;
        let mut account = self.load_account(account_id)?;

        if account.credits < 1 {
            return Ok(ConsumeOutcome::Insufficient {
                balance: account.credits,
            });
        }

        account.credits -= 1;
        account.updated_at = Utc::now();
        self.put_account(&account)?;

        Ok(ConsumeOutcome::Consumed {
            balance: account.credits,
        })
    }

    async fn refund_credit(&self, account_id: &AccountId) -> Result<i64> {
        let _guard = self.write_lock.lock().await;
        let mut account = self.load_account(account_id)?;

        account.credits = account
            .credits
            .checked_add(1)
            .ok_or_else(|| StoreError::balance_overflow(account_id))?;
        account.updated_at = Utc::now();
        self.put_account(&account)?;

        Ok(account.credits)
    }

    async fn add_credits(&self, account_id: &AccountId, amount: i64) -> Result<AccountBalance> {
        if amount < 0 {
            return Err(StoreError::negative_grant(amount));
        }

        let _guard = self.write_lock.lock().await;
        let mut account = self.load_account(account_id)?;

        apply_grant(&mut account, amount)?;
        account.updated_at = Utc::now();
        self.put_account(&account)?;

        Ok(account)
    }

    async fn create_adventure(
        &self,
        adventure_id: &AdventureId,
        owner: &AccountId,
        phase: AdventurePhase,
    ) -> Result<RegenerationState> {
        let _guard = self.write_lock.lock().await;
        self.load_account(owner)?;
        if self.get_adventure(adventure_id).await?.is_some() {
            return Err(StoreError::AlreadyExists {
                entity: "adventure",
                id: adventure_id.to_string(),
            });
        }

        let state = RegenerationState::new(*adventure_id, *owner, phase);
        self.put_adventure(&state)?;
        Ok(state)
    }

    async fn get_adventure(&self, adventure_id: &AdventureId) -> Result<Option<RegenerationState>> {
        self.read(cf::ADVENTURES, &keys::adventure_key(adventure_id))
    }

    async fn set_phase(&self, adventure_id: &AdventureId, phase: AdventurePhase) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        let mut state = self.load_adventure(adventure_id)?;
        state.phase = phase;
        state.updated_at = Utc::now();
        self.put_adventure(&state)
    }

    async fn increment_regenerations(
        &self,
        adventure_id: &AdventureId,
        counter: RegenerationCounter,
    ) -> Result<u32> {
        let _guard = self.write_lock.lock().await;
        let mut state = self.load_adventure(adventure_id)?;

        let used = match counter {
            RegenerationCounter::Scaffold => {
                state.scaffold_regenerations_used += 1;
                state.scaffold_regenerations_used
            }
            RegenerationCounter::Movement => {
                state.movement_regenerations_used += 1;
                state.movement_regenerations_used
            }
        };
        state.updated_at = Utc::now();
        self.put_adventure(&state)?;

        Ok(used)
    }

    async fn record_purchase(&self, record: &PurchaseRecord) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        let key = keys::purchase_key(&record.payment_reference);

        if self.read::<PurchaseRecord>(cf::PURCHASES, &key)?.is_some() {
            return Err(StoreError::DuplicatePurchase {
                reference: record.payment_reference.clone(),
            });
        }
        self.load_account(&record.account_id)?;

        let cf = self.cf(cf::PURCHASES)?;
        let mut batch = WriteBatch::default();
        batch.put_cf(&cf, key, Self::serialize(record)?);
        self.write(batch)
    }

    async fn get_purchase(&self, payment_reference: &str) -> Result<Option<PurchaseRecord>> {
        self.read(cf::PURCHASES, &keys::purchase_key(payment_reference))
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

        let _guard = self.write_lock.lock().await;
        let purchase_key = keys::purchase_key(payment_reference);
        let mut record: PurchaseRecord = self
            .read(cf::PURCHASES, &purchase_key)?
            .ok_or_else(|| StoreError::purchase_not_found(payment_reference))?;

        if record.status.is_settled() {
            return Ok(SettleOutcome::AlreadySettled { record });
        }

        let now = Utc::now();
        record.status = status;
        record.updated_at = now;

        let cf_purchases = self.cf(cf::PURCHASES)?;
        let mut batch = WriteBatch::default();
        batch.put_cf(&cf_purchases, &purchase_key, Self::serialize(&record)?);

        // Status transition and grant land in one batch.
        let balance = if status == PurchaseStatus::Succeeded {
            let mut account = self.load_account(&record.account_id)?;
            apply_grant(&mut account, record.credits)?;
            account.updated_at = now;

            let cf_accounts = self.cf(cf::ACCOUNTS)?;
            batch.put_cf(
                &cf_accounts,
                keys::account_key(&account.account_id),
                Self::serialize(&account)?,
            );
            Some(account.credits)
        } else {
            None
        };

        self.write(batch)?;

        Ok(SettleOutcome::Settled { record, balance })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn create_test_store() -> (RocksStore, TempDir) {
        let dir = TempDir::new().unwrap();
        let store = RocksStore::open(dir.path()).unwrap();
        (store, dir)
    }

    #[tokio::test]
    async fn balance_lifecycle() {
        let (store, _dir) = create_test_store();
        let account_id = AccountId::generate();

        store.create_account(&account_id).await.unwrap();
        store.add_credits(&account_id, 2).await.unwrap();

        assert_eq!(
            store.consume_credit(&account_id).await.unwrap(),
            ConsumeOutcome::Consumed { balance: 1 }
        );
        assert_eq!(store.refund_credit(&account_id).await.unwrap(), 2);

        let account = store.get_account(&account_id).await.unwrap().unwrap();
        assert_eq!(account.credits, 2);
        assert_eq!(account.total_purchased, 2);
    }

    #[tokio::test]
    async fn insufficient_balance_is_left_untouched() {
        let (store, _dir) = create_test_store();
        let account_id = AccountId::generate();
        store.create_account(&account_id).await.unwrap();

        assert_eq!(
            store.consume_credit(&account_id).await.unwrap(),
            ConsumeOutcome::Insufficient { balance: 0 }
        );
        let account = store.get_account(&account_id).await.unwrap().unwrap();
        assert_eq!(account.credits, 0);
    }

    #[tokio::test]
    async fn overflowing_grant_is_not_written() {
        let (store, _dir) = create_test_store();
        let account_id = AccountId::generate();
        store.create_account(&account_id).await.unwrap();
        store.add_credits(&account_id, 1).await.unwrap();

        let result = store.add_credits(&account_id, i64::MAX).await;
        assert!(matches!(result, Err(StoreError::ConstraintViolation(_))));

        let account = store.get_account(&account_id).await.unwrap().unwrap();
        assert_eq!(account.credits, 1);
    }

    #[tokio::test]
    async fn adventure_counters_persist() {
        let (store, _dir) = create_test_store();
        let owner = AccountId::generate();
        let adventure_id = AdventureId::generate();
        store.create_account(&owner).await.unwrap();
        store
            .create_adventure(&adventure_id, &owner, AdventurePhase::Movements)
            .await
            .unwrap();

        for expected in 1..=3 {
            let used = store
                .increment_regenerations(&adventure_id, RegenerationCounter::Movement)
                .await
                .unwrap();
            assert_eq!(used, expected);
        }

        store
            .set_phase(&adventure_id, AdventurePhase::Finalized)
            .await
            .unwrap();
        let state = store.get_adventure(&adventure_id).await.unwrap().unwrap();
        assert_eq!(state.phase, AdventurePhase::Finalized);
        assert_eq!(state.movement_regenerations_used, 3);
    }

    #[tokio::test]
    async fn purchase_settles_once() {
        let (store, _dir) = create_test_store();
        let account_id = AccountId::generate();
        store.create_account(&account_id).await.unwrap();
        store
            .record_purchase(&PurchaseRecord::pending("cs_rocks", account_id, 999, 10))
            .await
            .unwrap();

        let first = store
            .settle_purchase("cs_rocks", PurchaseStatus::Succeeded)
            .await
            .unwrap();
        assert!(matches!(first, SettleOutcome::Settled { balance: Some(10), .. }));

        let again = store
            .settle_purchase("cs_rocks", PurchaseStatus::Succeeded)
            .await
            .unwrap();
        assert!(matches!(again, SettleOutcome::AlreadySettled { .. }));

        let account = store.get_account(&account_id).await.unwrap().unwrap();
        assert_eq!(account.credits, 10);
    }
}
