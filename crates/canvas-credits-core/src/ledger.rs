//! Ledger entries recording every balance change.
//!
//! The ledger is append-only: each balance-affecting event writes exactly one
//! entry per balance source it touches, and entries are never modified or
//! deleted. A non-null idempotency key appears on at most one entry.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::consumption::Deduction;
use crate::{
    CreditPurchase, LedgerEntryId, PurchaseId, Subscription, SubscriptionId, UserId, GRANT_REASON,
    PURCHASE_REASON, ROLLOVER_EXPIRY_REASON, SUBSCRIPTION_REPLACED_REASON,
    SUBSCRIPTION_SEED_REASON,
};

/// An immutable audit record of one balance change.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CreditLedgerEntry {
    /// Unique entry ID (ULID for time-ordering).
    pub id: LedgerEntryId,

    /// The user whose balance changed.
    pub user_id: UserId,

    /// Set only when the subscription balance changed.
    pub subscription_id: Option<SubscriptionId>,

    /// Signed change. Positive = grant/purchase, negative = consumption.
    pub amount: i64,

    /// Kind of change.
    pub entry_type: EntryType,

    /// Free-form reason tag (e.g. "usage", "credit-purchase").
    pub reason: String,

    /// Caller-supplied idempotency key, unique across the ledger.
    pub idempotency_key: Option<String>,

    /// Balance snapshot around the change.
    pub meta: LedgerMeta,

    /// When the entry was written.
    pub created_at: DateTime<Utc>,
}

impl CreditLedgerEntry {
    fn new(
        user_id: UserId,
        entry_type: EntryType,
        amount: i64,
        reason: impl Into<String>,
        meta: LedgerMeta,
    ) -> Self {
        Self {
            id: LedgerEntryId::generate(),
            user_id,
            subscription_id: None,
            amount,
            entry_type,
            reason: reason.into(),
            idempotency_key: None,
            meta,
            created_at: Utc::now(),
        }
    }

    /// Entry for a completed purchase moving the purchased balance `prev -> next`.
    #[must_use]
    pub fn purchase(purchase: &CreditPurchase, prev: i64, next: i64) -> Self {
        let meta = LedgerMeta {
            price_usd: Some(purchase.price_usd),
            purchase_id: Some(purchase.id),
            external_ref: purchase.external_ref.clone(),
            ..LedgerMeta::snapshot(prev, next, BalanceSource::Purchase)
        };
        Self::new(
            purchase.user_id.clone(),
            EntryType::Purchase,
            purchase.amount,
            PURCHASE_REASON,
            meta,
        )
    }

    /// Entry for one source's share of a consumption.
    #[must_use]
    pub fn consume(user_id: UserId, deduction: &Deduction, reason: impl Into<String>) -> Self {
        Self::new(
            user_id,
            EntryType::Consume,
            -deduction.amount(),
            reason,
            LedgerMeta::snapshot(deduction.prev, deduction.next, deduction.source),
        )
    }

    /// Entry for a periodic subscription grant.
    #[must_use]
    pub fn grant(subscription: &Subscription, amount: i64, prev: i64, next: i64) -> Self {
        Self::new(
            subscription.user_id.clone(),
            EntryType::Grant,
            amount,
            GRANT_REASON,
            LedgerMeta::snapshot(prev, next, BalanceSource::Subscription),
        )
        .with_subscription(subscription.id.clone())
    }

    /// Entry removing subscription credits above the rollover limit.
    #[must_use]
    pub fn rollover_expiry(subscription: &Subscription, expired: i64, prev: i64) -> Self {
        Self::new(
            subscription.user_id.clone(),
            EntryType::Adjust,
            -expired,
            ROLLOVER_EXPIRY_REASON,
            LedgerMeta::snapshot(prev, prev - expired, BalanceSource::Subscription),
        )
        .with_subscription(subscription.id.clone())
    }

    /// Entry for the opening balance of a new subscription.
    #[must_use]
    pub fn subscription_seed(subscription: &Subscription) -> Self {
        Self::new(
            subscription.user_id.clone(),
            EntryType::Adjust,
            subscription.credits_balance,
            SUBSCRIPTION_SEED_REASON,
            LedgerMeta::snapshot(0, subscription.credits_balance, BalanceSource::Subscription),
        )
        .with_subscription(subscription.id.clone())
    }

    /// Entry zeroing the balance of a subscription replaced by another.
    #[must_use]
    pub fn subscription_forfeit(replaced: &Subscription) -> Self {
        Self::new(
            replaced.user_id.clone(),
            EntryType::Adjust,
            -replaced.credits_balance,
            SUBSCRIPTION_REPLACED_REASON,
            LedgerMeta::snapshot(replaced.credits_balance, 0, BalanceSource::Subscription),
        )
        .with_subscription(replaced.id.clone())
    }

    /// Entry for a manual adjustment of purchased credits.
    #[must_use]
    pub fn adjust(user_id: UserId, prev: i64, next: i64, reason: impl Into<String>) -> Self {
        Self::new(
            user_id,
            EntryType::Adjust,
            next - prev,
            reason,
            LedgerMeta::snapshot(prev, next, BalanceSource::Purchase),
        )
    }

    /// Attach the subscription whose balance changed.
    #[must_use]
    pub fn with_subscription(mut self, subscription_id: SubscriptionId) -> Self {
        self.subscription_id = Some(subscription_id);
        self
    }

    /// Attach an idempotency key.
    #[must_use]
    pub fn with_idempotency_key(mut self, key: Option<String>) -> Self {
        self.idempotency_key = key;
        self
    }

    /// Record the key of the entry this one was written alongside.
    #[must_use]
    pub fn with_related_key(mut self, key: Option<String>) -> Self {
        self.meta.related_key = key;
        self
    }
}

/// Kind of ledger entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryType {
    /// Credits bought.
    Purchase,

    /// Credits spent.
    Consume,

    /// Periodic subscription grant.
    Grant,

    /// Manual or policy correction (either sign).
    Adjust,
}

/// Which balance an entry moved.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BalanceSource {
    /// `Subscription::credits_balance`.
    Subscription,

    /// `UserCredits::balance`.
    Purchase,
}

/// Snapshot stored with every ledger entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LedgerMeta {
    /// Balance of the source before the change.
    pub prev: i64,

    /// Balance of the source after the change.
    pub next: i64,

    /// The balance source that changed.
    pub source: BalanceSource,

    /// Price paid, for purchases.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub price_usd: Option<f64>,

    /// Purchase record, for purchases.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub purchase_id: Option<PurchaseId>,

    /// Payment provider reference, for purchases.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub external_ref: Option<String>,

    /// Idempotency key held by a sibling entry of the same operation.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub related_key: Option<String>,
}

impl LedgerMeta {
    /// A bare `prev -> next` snapshot for a source.
    #[must_use]
    pub fn snapshot(prev: i64, next: i64, source: BalanceSource) -> Self {
        Self {
            prev,
            next,
            source,
            price_usd: None,
            purchase_id: None,
            external_ref: None,
            related_key: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn user() -> UserId {
        UserId::new("user_1").unwrap()
    }

    #[test]
    fn purchase_entry_snapshots_price_and_reference() {
        let purchase = CreditPurchase::completed(user(), 500, 4.99, Some("ord_9".into())).unwrap();
        let entry = CreditLedgerEntry::purchase(&purchase, 100, 600);

        assert_eq!(entry.amount, 500);
        assert_eq!(entry.entry_type, EntryType::Purchase);
        assert_eq!(entry.reason, "credit-purchase");
        assert_eq!(entry.subscription_id, None);
        assert_eq!(entry.meta.prev, 100);
        assert_eq!(entry.meta.next, 600);
        assert_eq!(entry.meta.price_usd, Some(4.99));
        assert_eq!(entry.meta.purchase_id, Some(purchase.id));
        assert_eq!(entry.meta.external_ref.as_deref(), Some("ord_9"));
    }

    #[test]
    fn consume_entry_is_negative() {
        let deduction = Deduction {
            source: BalanceSource::Subscription,
            prev: 5,
            next: 0,
        };
        let entry = CreditLedgerEntry::consume(user(), &deduction, "usage")
            .with_subscription(SubscriptionId::new("sub_1").unwrap())
            .with_idempotency_key(Some("k".into()));

        assert_eq!(entry.amount, -5);
        assert_eq!(entry.entry_type, EntryType::Consume);
        assert_eq!(entry.meta.source, BalanceSource::Subscription);
        assert_eq!(entry.idempotency_key.as_deref(), Some("k"));
        assert!(entry.subscription_id.is_some());
    }

    #[test]
    fn adjust_entry_carries_signed_delta() {
        let entry = CreditLedgerEntry::adjust(user(), 50, 20, "support refund reversal");
        assert_eq!(entry.amount, -30);
        assert_eq!(entry.entry_type, EntryType::Adjust);
    }

    #[test]
    fn meta_omits_empty_fields_in_json() {
        let meta = LedgerMeta::snapshot(1, 2, BalanceSource::Purchase);
        let json = serde_json::to_value(&meta).unwrap();
        assert_eq!(
            json,
            serde_json::json!({ "prev": 1, "next": 2, "source": "purchase" })
        );
    }
}
