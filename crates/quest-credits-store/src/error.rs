//! Error types for quest-credits storage.

/// Result type for storage operations.
pub type Result<T> = std::result::Result<T, StoreError>;

/// Errors that can occur in storage operations.
///
/// All of these are infrastructure failures from the ledger's point of view.
/// Business outcomes such as an insufficient balance are returned as values
/// (`ConsumeOutcome`, `SettleOutcome`), not errors.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// Database operation failed.
    #[error("database error: {0}")]
    Database(String),

    /// Serialization/deserialization failed.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Record not found.
    #[error("{entity} not found: {id}")]
    NotFound {
        /// The kind of record.
        entity: &'static str,
        /// The key that was looked up.
        id: String,
    },

    /// Record already exists.
    #[error("{entity} already exists: {id}")]
    AlreadyExists {
        /// The kind of record.
        entity: &'static str,
        /// The conflicting key.
        id: String,
    },

    /// A purchase with this payment reference was already recorded.
    #[error("duplicate purchase: {reference}")]
    DuplicatePurchase {
        /// The payment reference.
        reference: String,
    },

    /// A store-level invariant would have been violated.
    #[error("constraint violation: {0}")]
    ConstraintViolation(String),
}

impl StoreError {
    pub(crate) fn account_not_found(id: impl ToString) -> Self {
        Self::NotFound {
            entity: "account",
            id: id.to_string(),
        }
    }

    pub(crate) fn adventure_not_found(id: impl ToString) -> Self {
        Self::NotFound {
            entity: "adventure",
            id: id.to_string(),
        }
    }

    pub(crate) fn purchase_not_found(id: impl ToString) -> Self {
        Self::NotFound {
            entity: "purchase",
            id: id.to_string(),
        }
    }

    pub(crate) fn negative_grant(amount: i64) -> Self {
        Self::ConstraintViolation(format!("credit grant must not be negative: {amount}"))
    }

    pub(crate) fn balance_overflow(id: impl ToString) -> Self {
        Self::ConstraintViolation(format!("balance overflow for account {}", id.to_string()))
    }
}

/// SQLSTATE `numeric_value_out_of_range`, raised when a `BIGINT` sum overflows.
const NUMERIC_VALUE_OUT_OF_RANGE: &str = "22003";

impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        match &err {
            sqlx::Error::Database(db)
                if db.is_check_violation()
                    || db.code().as_deref() == Some(NUMERIC_VALUE_OUT_OF_RANGE) =>
            {
                Self::ConstraintViolation(db.message().to_string())
            }
            sqlx::Error::ColumnDecode { .. } | sqlx::Error::Decode(_) => {
                Self::Serialization(err.to_string())
            }
            _ => Self::Database(err.to_string()),
        }
    }
}
