//! `RocksDB` storage layer for the canvas credits ledger.
//!
//! This crate provides persistent, transactional storage for purchased
//! balances, subscriptions, purchases and the append-only credit ledger.
//!
//! # Architecture
//!
//! The storage uses the following column families:
//!
//! - `user_credits`: purchased balances, keyed by `user_id`
//! - `subscriptions` / `subscriptions_by_id`: subscription records and ID index
//! - `purchases` / `purchases_by_user`: purchase records and per-user index
//! - `ledger` / `ledger_by_user` / `ledger_by_subscription`: ledger entries and indexes
//! - `ledger_by_idempotency_key`: unique idempotency keys
//!
//! Every balance-changing operation runs in a single pessimistic `RocksDB`
//! transaction that locks the rows it reads (idempotency key, user credits,
//! subscription) before writing. Concurrent operations on the same user
//! serialize on those locks; a lock timeout surfaces as
//! [`StoreError::Conflict`], which callers may retry.
//!
//! # Example
//!
//! ```no_run
//! use canvas_credits_core::{ConsumeRequest, CreditPurchase, UserId};
//! use canvas_credits_store::{RocksStore, Store};
//!
//! let store = RocksStore::open("/tmp/canvas-credits-db").unwrap();
//! let user_id = UserId::new("user_42").unwrap();
//!
//! let purchase = CreditPurchase::completed(user_id.clone(), 500, 4.99, None).unwrap();
//! store.purchase_credits(&purchase, false).unwrap();
//!
//! let outcome = store.consume_credits(&ConsumeRequest::new(user_id, 20)).unwrap();
//! assert!(outcome.is_ok());
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

pub mod error;
pub mod keys;
pub mod rocks;
pub mod schema;

pub use error::{Result, StoreError};
pub use rocks::RocksStore;

use canvas_credits_core::{
    AdjustOutcome, BalanceSnapshot, ConsumeOutcome, ConsumeRequest, CreditLedgerEntry,
    CreditPurchase, GrantOutcome, LedgerEntryId, PurchaseId, PurchaseReceipt, Subscription,
    SubscriptionId, UserCredits, UserId,
};

/// The storage trait defining all credits operations.
///
/// Reads are plain lookups; the compound operations each run as one atomic
/// transaction and are the only code paths that change balances.
pub trait Store: Send + Sync {
    // =========================================================================
    // Balances
    // =========================================================================

    /// Get a user's purchased balance record, without creating it.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn get_user_credits(&self, user_id: &UserId) -> Result<Option<UserCredits>>;

    /// Get a user's purchased balance record, creating an empty one if absent.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn get_or_create_user_credits(&self, user_id: &UserId) -> Result<UserCredits>;

    /// Get both balances of a user. Creates nothing.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn get_balance(&self, user_id: &UserId) -> Result<BalanceSnapshot> {
        let purchased = self.get_user_credits(user_id)?.map_or(0, |c| c.balance);
        let subscription = self
            .get_subscription(user_id)?
            .map_or(0, |s| s.credits_balance);
        Ok(BalanceSnapshot {
            subscription,
            purchased,
        })
    }

    // =========================================================================
    // Subscriptions
    // =========================================================================

    /// Get a user's subscription.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn get_subscription(&self, user_id: &UserId) -> Result<Option<Subscription>>;

    /// Get a subscription by its ID.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn get_subscription_by_id(&self, subscription_id: &SubscriptionId)
        -> Result<Option<Subscription>>;

    /// Insert or update a user's subscription, returning the stored record.
    ///
    /// When a record with the same ID exists, its `credits_balance`,
    /// `last_grant_cursor` and `created_at` are kept; credits only move
    /// through grants and consumption. A different ID replaces the record.
    ///
    /// # Errors
    ///
    /// - `StoreError::Credits` if a credit field is negative.
    /// - Database errors.
    fn put_subscription(&self, subscription: &Subscription) -> Result<Subscription>;

    // =========================================================================
    // History
    // =========================================================================

    /// Get a ledger entry by ID.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn get_ledger_entry(&self, entry_id: &LedgerEntryId) -> Result<Option<CreditLedgerEntry>>;

    /// Find the ledger entry holding an idempotency key.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn find_ledger_entry_by_key(&self, key: &str) -> Result<Option<CreditLedgerEntry>>;

    /// List a user's ledger entries, newest first.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn list_ledger_by_user(
        &self,
        user_id: &UserId,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<CreditLedgerEntry>>;

    /// List a subscription's ledger entries, newest first.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn list_ledger_by_subscription(
        &self,
        subscription_id: &SubscriptionId,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<CreditLedgerEntry>>;

    /// Get a purchase by ID.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn get_purchase(&self, purchase_id: &PurchaseId) -> Result<Option<CreditPurchase>>;

    /// List a user's purchases, newest first.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn list_purchases_by_user(
        &self,
        user_id: &UserId,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<CreditPurchase>>;

    // =========================================================================
    // Compound Operations
    // =========================================================================

    /// Record a completed purchase and credit the purchased balance atomically.
    ///
    /// With `dedupe` set, a purchase whose external reference is already in
    /// the ledger returns the earlier purchase unchanged. Without it, the
    /// purchase is credited again; its ledger entry then keeps the reference
    /// in `meta.external_ref` only, so ledger idempotency keys stay unique.
    ///
    /// # Errors
    ///
    /// - `StoreError::Credits` on invalid amount/price or balance overflow.
    /// - `StoreError::Conflict` if locks could not be acquired.
    fn purchase_credits(&self, purchase: &CreditPurchase, dedupe: bool)
        -> Result<PurchaseReceipt>;

    /// Consume credits, subscription first, atomically.
    ///
    /// Insufficient balance, repeated idempotency keys and non-positive
    /// amounts are reported as outcomes, not errors.
    ///
    /// # Errors
    ///
    /// - `StoreError::Conflict` if locks could not be acquired.
    /// - Database and serialization errors.
    fn consume_credits(&self, request: &ConsumeRequest) -> Result<ConsumeOutcome>;

    /// Grant a subscription its periodic credits for `period_cursor`, once.
    ///
    /// # Errors
    ///
    /// - `StoreError::NotFound` if the user has no subscription.
    /// - `StoreError::Conflict` if locks could not be acquired.
    fn grant_subscription_credits(
        &self,
        user_id: &UserId,
        period_cursor: &str,
    ) -> Result<GrantOutcome>;

    /// Apply a manual signed adjustment to a user's purchased credits.
    ///
    /// # Errors
    ///
    /// - `StoreError::Credits` if `delta` is zero or the balance would go negative.
    /// - `StoreError::Conflict` if locks could not be acquired.
    fn adjust_credits(&self, user_id: &UserId, delta: i64, reason: &str) -> Result<AdjustOutcome>;
}
