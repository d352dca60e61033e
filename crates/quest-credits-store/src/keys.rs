//! Key encoding utilities for `RocksDB`.
//!
//! IDs are stored as their raw 16 bytes; purchase references as UTF-8.

use quest_credits_core::{AccountId, AdventureId};

/// Create an account key from an account ID.
#[must_use]
pub fn account_key(account_id: &AccountId) -> Vec<u8> {
    account_id.as_bytes().to_vec()
}

/// Create an adventure key from an adventure ID.
#[must_use]
pub fn adventure_key(adventure_id: &AdventureId) -> Vec<u8> {
    adventure_id.as_bytes().to_vec()
}

/// Create a purchase key from an external payment reference.
#[must_use]
pub fn purchase_key(payment_reference: &str) -> Vec<u8> {
    payment_reference.as_bytes().to_vec()
}
