//! Purchase records.
//!
//! One append-only row per payment, keyed by the payment provider's reference.
//! Used for reconciliation and to make payment-completion idempotent; never
//! consulted for authorization.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::AccountId;

/// A credit purchase.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PurchaseRecord {
    /// External payment reference (e.g. a Stripe checkout session ID). Unique.
    pub payment_reference: String,

    /// The account receiving the credits.
    pub account_id: AccountId,

    /// Amount paid, in cents.
    pub amount_cents: i64,

    /// Credits granted once the payment succeeds.
    pub credits: i64,

    /// Settlement status.
    pub status: PurchaseStatus,

    /// When the record was written.
    pub created_at: DateTime<Utc>,

    /// When the status last changed.
    pub updated_at: DateTime<Utc>,
}

impl PurchaseRecord {
    /// Create a pending purchase.
    #[must_use]
    pub fn pending(
        payment_reference: impl Into<String>,
        account_id: AccountId,
        amount_cents: i64,
        credits: i64,
    ) -> Self {
        let now = Utc::now();
        Self {
            payment_reference: payment_reference.into(),
            account_id,
            amount_cents,
            credits,
            status: PurchaseStatus::Pending,
            created_at: now,
            updated_at: now,
        }
    }
}

/// Settlement status of a purchase.
///
/// The only transitions are `Pending -> Succeeded` and `Pending -> Failed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PurchaseStatus {
    /// Payment started, not yet settled.
    Pending,

    /// Payment captured; credits were granted.
    Succeeded,

    /// Payment failed or expired; no credits granted.
    Failed,
}

impl PurchaseStatus {
    /// Stable lowercase name, as stored.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Succeeded => "succeeded",
            Self::Failed => "failed",
        }
    }

    /// Parse the stored name.
    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "pending" => Some(Self::Pending),
            "succeeded" => Some(Self::Succeeded),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }

    /// Whether this status is terminal.
    #[must_use]
    pub const fn is_settled(self) -> bool {
        !matches!(self, Self::Pending)
    }
}

impl fmt::Display for PurchaseStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
