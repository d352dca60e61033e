//! Database schema definitions.
//!
//! Column families for the `RocksDB` backend. The `PostgreSQL` tables live in
//! `migrations/`.

/// Column family names for the `RocksDB` database.
pub mod cf {
    /// Account balance rows, keyed by `account_id`.
    pub const ACCOUNTS: &str = "accounts";

    /// Adventure regeneration state, keyed by `adventure_id`.
    pub const ADVENTURES: &str = "adventures";

    /// Purchase records, keyed by payment reference.
    pub const PURCHASES: &str = "purchases";
}

/// Returns all column family names for database initialization.
#[must_use]
pub fn all_column_families() -> Vec<&'static str> {
    vec![cf::ACCOUNTS, cf::ADVENTURES, cf::PURCHASES]
}
