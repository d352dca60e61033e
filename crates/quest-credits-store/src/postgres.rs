//! `PostgreSQL` storage implementation.
//!
//! Every mutation is one statement (or one transaction for purchase settlement).
//! The balance guard lives in the `WHERE` clause of the decrement, so concurrent
//! consumers are serialized by the row lock and the `CHECK (credits >= 0)`
//! constraint backs it up.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::Row;

use quest_credits_core::{
    AccountBalance, AccountId, AdventureId, AdventurePhase, PurchaseRecord, PurchaseStatus,
    RegenerationCounter, RegenerationState,
};

use crate::error::{Result, StoreError};
use crate::{ConsumeOutcome, SettleOutcome, Store};

/// Default maximum pool size.
const DEFAULT_MAX_CONNECTIONS: u32 = 10;

const SELECT_ACCOUNT: &str = "SELECT account_id, credits, total_purchased, created_at, updated_at \
     FROM profiles WHERE account_id = $1";

const SELECT_ADVENTURE: &str = "SELECT adventure_id, owner_id, phase, scaffold_regenerations_used, \
     movement_regenerations_used, updated_at FROM adventures WHERE adventure_id = $1";

const SELECT_PURCHASE: &str = "SELECT payment_reference, account_id, amount_cents, credits, status, \
     created_at, updated_at FROM credit_purchases WHERE payment_reference = $1";

/// PostgreSQL-backed storage implementation.
#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    /// Connect to the database and run pending migrations.
    ///
    /// # Errors
    ///
    /// Returns an error if the connection or a migration fails.
    pub async fn connect(database_url: &str) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(DEFAULT_MAX_CONNECTIONS)
            .connect(database_url)
            .await?;

        let store = Self::from_pool(pool);
        store.migrate().await?;
        Ok(store)
    }

    /// Wrap an existing pool. Migrations are not run.
    #[must_use]
    pub const fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Apply the embedded migrations.
    ///
    /// # Errors
    ///
    /// Returns an error if a migration fails.
    pub async fn migrate(&self) -> Result<()> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| StoreError::Database(format!("migration failed: {e}")))?;
        tracing::info!("Ledger migrations applied");
        Ok(())
    }

    async fn balance_of(&self, account_id: &AccountId) -> Result<Option<i64>> {
        let row = sqlx::query("SELECT credits FROM profiles WHERE account_id = $1")
            .bind(account_id.as_uuid())
            .fetch_optional(&self.pool)
            .await?;
        row.map(|r| r.try_get::<i64, _>("credits").map_err(StoreError::from))
            .transpose()
    }
}

fn account_from_row(row: &sqlx::postgres::PgRow) -> Result<AccountBalance> {
    Ok(AccountBalance {
        account_id: AccountId::from_uuid(row.try_get("account_id")?),
        credits: row.try_get("credits")?,
        total_purchased: row.try_get("total_purchased")?,
        created_at: row.try_get::<DateTime<Utc>, _>("created_at")?,
        updated_at: row.try_get::<DateTime<Utc>, _>("updated_at")?,
    })
}

fn adventure_from_row(row: &sqlx::postgres::PgRow) -> Result<RegenerationState> {
    let phase: String = row.try_get("phase")?;
    Ok(RegenerationState {
        adventure_id: AdventureId::from_uuid(row.try_get("adventure_id")?),
        owner: AccountId::from_uuid(row.try_get("owner_id")?),
        phase: AdventurePhase::parse(&phase)
            .ok_or_else(|| StoreError::Serialization(format!("unknown phase: {phase}")))?,
        scaffold_regenerations_used: counter_value(row.try_get("scaffold_regenerations_used")?)?,
        movement_regenerations_used: counter_value(row.try_get("movement_regenerations_used")?)?,
        updated_at: row.try_get("updated_at")?,
    })
}

fn purchase_from_row(row: &sqlx::postgres::PgRow) -> Result<PurchaseRecord> {
    let status: String = row.try_get("status")?;
    Ok(PurchaseRecord {
        payment_reference: row.try_get("payment_reference")?,
        account_id: AccountId::from_uuid(row.try_get("account_id")?),
        amount_cents: row.try_get("amount_cents")?,
        credits: row.try_get("credits")?,
        status: PurchaseStatus::parse(&status)
            .ok_or_else(|| StoreError::Serialization(format!("unknown status: {status}")))?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

fn counter_value(raw: i32) -> Result<u32> {
    u32::try_from(raw).map_err(|_| StoreError::ConstraintViolation(format!("negative counter: {raw}")))
}

const fn counter_column(counter: RegenerationCounter) -> &'static str {
    match counter {
        RegenerationCounter::Scaffold => "scaffold_regenerations_used",
        RegenerationCounter::Movement => "movement_regenerations_used",
    }
}

fn is_unique_violation(err: &sqlx::Error) -> bool {
    matches!(err, sqlx::Error::Database(db) if db.is_unique_violation())
}

fn is_foreign_key_violation(err: &sqlx::Error) -> bool {
    matches!(err, sqlx::Error::Database(db) if db.is_foreign_key_violation())
}

#[async_trait]
impl Store for PgStore {
    async fn create_account(&self, account_id: &AccountId) -> Result<AccountBalance> {
        let row = sqlx::query(
            "INSERT INTO profiles (account_id) VALUES ($1) \
             RETURNING account_id, credits, total_purchased, created_at, updated_at",
        )
        .bind(account_id.as_uuid())
        .fetch_one(&self.pool)
        .await
        .map_err(|e| {
            if is_unique_violation(&e) {
                StoreError::AlreadyExists {
                    entity: "account",
                    id: account_id.to_string(),
                }
            } else {
                e.into()
            }
        })?;

        account_from_row(&row)
    }

    async fn get_account(&self, account_id: &AccountId) -> Result<Option<AccountBalance>> {
        sqlx::query(SELECT_ACCOUNT)
            .bind(account_id.as_uuid())
            .fetch_optional(&self.pool)
            .await?
            .as_ref()
            .map(account_from_row)
            .transpose()
    }

    async fn consume_credit(&self, account_id: &AccountId) -> Result<ConsumeOutcome> {
        let updated = sqlx::query(
            "UPDATE profiles SET credits = credits - 1, updated_at = now() \
             WHERE account_id = $1 AND credits >= 1 RETURNING credits",
        )
        .bind(account_id.as_uuid())
        .fetch_optional(&self.pool)
        .await?;

        if let Some(row) = updated {
            return Ok(ConsumeOutcome::Consumed {
                balance: row.try_get("credits")?,
            });
        }

        // Zero rows: either the guard failed or the account doesn't exist.
        let balance = self
            .balance_of(account_id)
            .await?
            .ok_or_else(|| StoreError::account_not_found(account_id))?;
        Ok(ConsumeOutcome::Insufficient { balance })
    }

    async fn refund_credit(&self, account_id: &AccountId) -> Result<i64> {
        let row = sqlx::query(
            "UPDATE profiles SET credits = credits + 1, updated_at = now() \
             WHERE account_id = $1 RETURNING credits",
        )
        .bind(account_id.as_uuid())
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| StoreError::account_not_found(account_id))?;

        Ok(row.try_get("credits")?)
    }

    async fn add_credits(&self, account_id: &AccountId, amount: i64) -> Result<AccountBalance> {
        if amount < 0 {
            return Err(StoreError::negative_grant(amount));
        }

        let row = sqlx::query(
            "UPDATE profiles SET credits = credits + $2, \
             total_purchased = total_purchased + $2, updated_at = now() \
             WHERE account_id = $1 \
             RETURNING account_id, credits, total_purchased, created_at, updated_at",
        )
        .bind(account_id.as_uuid())
        .bind(amount)
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| StoreError::account_not_found(account_id))?;

        account_from_row(&row)
    }

    async fn create_adventure(
        &self,
        adventure_id: &AdventureId,
        owner: &AccountId,
        phase: AdventurePhase,
    ) -> Result<RegenerationState> {
        let row = sqlx::query(
            "INSERT INTO adventures (adventure_id, owner_id, phase) VALUES ($1, $2, $3) \
             RETURNING adventure_id, owner_id, phase, scaffold_regenerations_used, \
             movement_regenerations_used, updated_at",
        )
        .bind(adventure_id.as_uuid())
        .bind(owner.as_uuid())
        .bind(phase.as_str())
        .fetch_one(&self.pool)
        .await
        .map_err(|e| {
            if is_unique_violation(&e) {
                StoreError::AlreadyExists {
                    entity: "adventure",
                    id: adventure_id.to_string(),
                }
            } else if is_foreign_key_violation(&e) {
                StoreError::account_not_found(owner)
            } else {
                e.into()
            }
        })?;

        adventure_from_row(&row)
    }

    async fn get_adventure(&self, adventure_id: &AdventureId) -> Result<Option<RegenerationState>> {
        sqlx::query(SELECT_ADVENTURE)
            .bind(adventure_id.as_uuid())
            .fetch_optional(&self.pool)
            .await?
            .as_ref()
            .map(adventure_from_row)
            .transpose()
    }

    async fn set_phase(&self, adventure_id: &AdventureId, phase: AdventurePhase) -> Result<()> {
        let result = sqlx::query(
            "UPDATE adventures SET phase = $2, updated_at = now() WHERE adventure_id = $1",
        )
        .bind(adventure_id.as_uuid())
        .bind(phase.as_str())
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::adventure_not_found(adventure_id));
        }
        Ok(())
    }

    async fn increment_regenerations(
        &self,
        adventure_id: &AdventureId,
        counter: RegenerationCounter,
    ) -> Result<u32> {
        let column = counter_column(counter);
        let sql = format!(
            "UPDATE adventures SET {column} = {column} + 1, updated_at = now() \
             WHERE adventure_id = $1 RETURNING {column} AS used"
        );

        let row = sqlx::query(&sql)
            .bind(adventure_id.as_uuid())
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| StoreError::adventure_not_found(adventure_id))?;

        counter_value(row.try_get("used")?)
    }

    async fn record_purchase(&self, record: &PurchaseRecord) -> Result<()> {
        sqlx::query(
            "INSERT INTO credit_purchases \
             (payment_reference, account_id, amount_cents, credits, status, created_at, updated_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7)",
        )
        .bind(&record.payment_reference)
        .bind(record.account_id.as_uuid())
        .bind(record.amount_cents)
        .bind(record.credits)
        .bind(record.status.as_str())
        .bind(record.created_at)
        .bind(record.updated_at)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            if is_unique_violation(&e) {
                StoreError::DuplicatePurchase {
                    reference: record.payment_reference.clone(),
                }
            } else if is_foreign_key_violation(&e) {
                StoreError::account_not_found(record.account_id)
            } else {
                e.into()
            }
        })?;

        Ok(())
    }

    async fn get_purchase(&self, payment_reference: &str) -> Result<Option<PurchaseRecord>> {
        sqlx::query(SELECT_PURCHASE)
            .bind(payment_reference)
            .fetch_optional(&self.pool)
            .await?
            .as_ref()
            .map(purchase_from_row)
            .transpose()
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

        let mut tx = self.pool.begin().await?;

        let transitioned = sqlx::query(
            "UPDATE credit_purchases SET status = $2, updated_at = now() \
             WHERE payment_reference = $1 AND status = 'pending' \
             RETURNING payment_reference, account_id, amount_cents, credits, status, \
             created_at, updated_at",
        )
        .bind(payment_reference)
        .bind(status.as_str())
        .fetch_optional(&mut *tx)
        .await?;

        let Some(row) = transitioned else {
            let existing = sqlx::query(SELECT_PURCHASE)
                .bind(payment_reference)
                .fetch_optional(&mut *tx)
                .await?
                .ok_or_else(|| StoreError::purchase_not_found(payment_reference))?;
            tx.rollback().await?;
            return Ok(SettleOutcome::AlreadySettled {
                record: purchase_from_row(&existing)?,
            });
        };

        let record = purchase_from_row(&row)?;
        let balance = if status == PurchaseStatus::Succeeded {
            let granted = sqlx::query(
                "UPDATE profiles SET credits = credits + $2, \
                 total_purchased = total_purchased + $2, updated_at = now() \
                 WHERE account_id = $1 RETURNING credits",
            )
            .bind(record.account_id.as_uuid())
            .bind(record.credits)
            .fetch_optional(&mut *tx)
            .await?
            .ok_or_else(|| StoreError::account_not_found(record.account_id))?;
            Some(granted.try_get::<i64, _>("credits")?)
        } else {
            None
        };

        tx.commit().await?;

        Ok(SettleOutcome::Settled { record, balance })
    }
}
