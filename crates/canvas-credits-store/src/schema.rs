//! Database schema definitions and column families.
//!
//! This module defines the column families used in `RocksDB` storage.

/// Column family names for the `RocksDB` database.
pub mod cf {
    /// Purchased credit balances, keyed by `user_id`.
    pub const USER_CREDITS: &str = "user_credits";

    /// Subscriptions, keyed by `user_id` (one per user).
    pub const SUBSCRIPTIONS: &str = "subscriptions";

    /// Index: subscription ID to owning `user_id`.
    pub const SUBSCRIPTIONS_BY_ID: &str = "subscriptions_by_id";

    /// Credit purchases, keyed by `purchase_id` (ULID).
    pub const PURCHASES: &str = "purchases";

    /// Index: purchases by user, keyed by `user_id || purchase_id`.
    /// Value is empty (index only).
    pub const PURCHASES_BY_USER: &str = "purchases_by_user";

    /// Ledger entries, keyed by `entry_id` (ULID).
    pub const LEDGER: &str = "ledger";

    /// Index: ledger entries by user, keyed by `user_id || entry_id`.
    /// Value is empty (index only).
    pub const LEDGER_BY_USER: &str = "ledger_by_user";

    /// Index: ledger entries by subscription, keyed by `subscription_id || entry_id`.
    /// Value is empty (index only).
    pub const LEDGER_BY_SUBSCRIPTION: &str = "ledger_by_subscription";

    /// Index: idempotency key to `entry_id`. Enforces key uniqueness.
    pub const LEDGER_BY_IDEMPOTENCY_KEY: &str = "ledger_by_idempotency_key";
}

/// Returns all column family names for database initialization.
#[must_use]
pub fn all_column_families() -> Vec<&'static str> {
    vec![
        cf::USER_CREDITS,
        cf::SUBSCRIPTIONS,
        cf::SUBSCRIPTIONS_BY_ID,
        cf::PURCHASES,
        cf::PURCHASES_BY_USER,
        cf::LEDGER,
        cf::LEDGER_BY_USER,
        cf::LEDGER_BY_SUBSCRIPTION,
        cf::LEDGER_BY_IDEMPOTENCY_KEY,
    ]
}
