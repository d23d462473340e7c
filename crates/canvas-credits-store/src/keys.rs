//! Key encoding utilities for `RocksDB`.
//!
//! Owner identifiers (users, subscriptions) are variable-length, so index
//! keys are length-prefixed:
//!
//! `len (1 byte) || owner bytes || record ULID (16 bytes)`
//!
//! The length byte keeps `user_1` from prefix-matching `user_10`, and the
//! big-endian ULID suffix sorts each owner's records by creation time.

use canvas_credits_core::{LedgerEntryId, PurchaseId, SubscriptionId, UserId};

const ULID_LEN: usize = 16;

/// Create a user-scoped record key (user credits, subscription).
#[must_use]
pub fn user_key(user_id: &UserId) -> Vec<u8> {
    user_id.as_str().as_bytes().to_vec()
}

/// Create a subscription ID index key.
#[must_use]
pub fn subscription_id_key(subscription_id: &SubscriptionId) -> Vec<u8> {
    subscription_id.as_str().as_bytes().to_vec()
}

/// Create a purchase key from a purchase ID.
#[must_use]
pub fn purchase_key(purchase_id: &PurchaseId) -> Vec<u8> {
    purchase_id.to_bytes().to_vec()
}

/// Create a ledger entry key from an entry ID.
#[must_use]
pub fn ledger_key(entry_id: &LedgerEntryId) -> Vec<u8> {
    entry_id.to_bytes().to_vec()
}

/// Create an idempotency index key.
#[must_use]
pub fn idempotency_key(key: &str) -> Vec<u8> {
    key.as_bytes().to_vec()
}

/// Create the prefix shared by all index keys of one owner.
#[must_use]
pub fn owner_prefix(owner: &[u8]) -> Vec<u8> {
    let mut prefix = Vec::with_capacity(1 + owner.len());
    // Owner IDs are validated to at most 128 bytes.
    prefix.push(u8::try_from(owner.len()).unwrap_or(u8::MAX));
    prefix.extend_from_slice(owner);
    prefix
}

/// Create an owner index key: `owner_prefix || record_id`.
#[must_use]
pub fn owner_index_key(owner: &[u8], record_id: [u8; ULID_LEN]) -> Vec<u8> {
    let mut key = owner_prefix(owner);
    key.extend_from_slice(&record_id);
    key
}

/// Extract the record ULID bytes from an owner index key.
///
/// Returns `None` if the key is too short to hold a ULID.
#[must_use]
pub fn record_id_from_index_key(key: &[u8]) -> Option<[u8; ULID_LEN]> {
    let start = key.len().checked_sub(ULID_LEN)?;
    key[start..].try_into().ok()
}
