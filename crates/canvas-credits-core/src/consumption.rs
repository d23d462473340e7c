//! Consumption policy and operation outcomes.
//!
//! [`ConsumptionPlan::compute`] is the pure core of credit consumption: given
//! the subscription balance `S`, the purchased balance `P` and a requested
//! amount, it decides how much to take from each source. Subscription credits
//! are always drained first. The plan is all-or-nothing: either the full
//! amount is covered or no deduction is planned.

use serde::{Deserialize, Serialize};

use crate::error::{CreditsError, Result};
use crate::ledger::BalanceSource;
use crate::{CreditPurchase, UserId, DEFAULT_CONSUME_REASON};

/// A request to consume credits.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConsumeRequest {
    /// The user being charged.
    pub user_id: UserId,
    /// Credits to consume.
    pub amount: i64,
    /// Reason recorded in the ledger (defaults to "usage").
    #[serde(default)]
    pub reason: Option<String>,
    /// Key suppressing repeated effects of the same request.
    #[serde(default)]
    pub idempotency_key: Option<String>,
}

impl ConsumeRequest {
    /// Create a request without reason or idempotency key.
    #[must_use]
    pub fn new(user_id: UserId, amount: i64) -> Self {
        Self {
            user_id,
            amount,
            reason: None,
            idempotency_key: None,
        }
    }

    /// Set the ledger reason.
    #[must_use]
    pub fn with_reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = Some(reason.into());
        self
    }

    /// Set the idempotency key.
    #[must_use]
    pub fn with_idempotency_key(mut self, key: impl Into<String>) -> Self {
        self.idempotency_key = Some(key.into());
        self
    }

    /// The reason to record, falling back to the default when absent or blank.
    #[must_use]
    pub fn reason_or_default(&self) -> &str {
        self.reason
            .as_deref()
            .filter(|r| !r.trim().is_empty())
            .unwrap_or(DEFAULT_CONSUME_REASON)
    }
}

/// One source's share of a consumption.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Deduction {
    /// The source being drawn down.
    pub source: BalanceSource,
    /// Balance before.
    pub prev: i64,
    /// Balance after.
    pub next: i64,
}

impl Deduction {
    /// Credits taken from this source.
    #[must_use]
    pub const fn amount(&self) -> i64 {
        self.prev - self.next
    }
}

/// The deductions that satisfy one consumption request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConsumptionPlan {
    /// Requested amount.
    pub amount: i64,
    /// Subscription balance before the consumption.
    pub subscription_before: i64,
    /// Purchased balance before the consumption.
    pub purchased_before: i64,
    /// Deduction from the subscription, if any was needed.
    pub subscription: Option<Deduction>,
    /// Deduction from purchased credits, if any was needed.
    pub purchased: Option<Deduction>,
}

impl ConsumptionPlan {
    /// Plan the consumption of `amount` credits, subscription first.
    ///
    /// # Errors
    ///
    /// - `CreditsError::InvalidAmount` if `amount` is not positive.
    /// - `CreditsError::CorruptBalance` if either balance is negative.
    /// - `CreditsError::InsufficientCredits` if `S + P < amount`.
    pub fn compute(subscription_balance: i64, purchased_balance: i64, amount: i64) -> Result<Self> {
        if amount <= 0 {
            return Err(CreditsError::InvalidAmount(amount));
        }
        for balance in [subscription_balance, purchased_balance] {
            if balance < 0 {
                return Err(CreditsError::CorruptBalance(balance));
            }
        }

        let total = subscription_balance.saturating_add(purchased_balance);
        if total < amount {
            return Err(CreditsError::InsufficientCredits {
                balance: total,
                required: amount,
            });
        }

        let from_subscription = subscription_balance.min(amount);
        let subscription = (from_subscription > 0).then_some(Deduction {
            source: BalanceSource::Subscription,
            prev: subscription_balance,
            next: subscription_balance - from_subscription,
        });

        let remaining = amount - from_subscription;
        let purchased = (remaining > 0 && purchased_balance > 0).then(|| Deduction {
            source: BalanceSource::Purchase,
            prev: purchased_balance,
            next: purchased_balance - purchased_balance.min(remaining),
        });

        Ok(Self {
            amount,
            subscription_before: subscription_balance,
            purchased_before: purchased_balance,
            subscription,
            purchased,
        })
    }

    /// Subscription balance once the plan is applied.
    #[must_use]
    pub fn subscription_after(&self) -> i64 {
        self.subscription.map_or(self.subscription_before, |d| d.next)
    }

    /// Purchased balance once the plan is applied.
    #[must_use]
    pub fn purchased_after(&self) -> i64 {
        self.purchased.map_or(self.purchased_before, |d| d.next)
    }

    /// Total balance once the plan is applied.
    #[must_use]
    pub fn balance_after(&self) -> i64 {
        self.subscription_after() + self.purchased_after()
    }

    /// Credits taken from the subscription.
    #[must_use]
    pub fn from_subscription(&self) -> i64 {
        self.subscription.map_or(0, |d| d.amount())
    }

    /// Credits taken from purchased credits.
    #[must_use]
    pub fn from_purchased(&self) -> i64 {
        self.purchased.map_or(0, |d| d.amount())
    }
}

/// Both balances of a user at one point in time.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BalanceSnapshot {
    /// Subscription credits (0 without a subscription).
    pub subscription: i64,
    /// Purchased credits (0 without a record).
    pub purchased: i64,
}

impl BalanceSnapshot {
    /// Total spendable credits.
    #[must_use]
    pub const fn total(&self) -> i64 {
        self.subscription.saturating_add(self.purchased)
    }
}

/// Result of a consumption request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum ConsumeOutcome {
    /// Credits were deducted.
    Consumed {
        /// Total balance after the deduction, as written.
        balance: i64,
        /// Credits taken from the subscription.
        from_subscription: i64,
        /// Credits taken from purchased credits.
        from_purchased: i64,
    },

    /// The idempotency key was already used; nothing changed.
    Duplicate,

    /// The total balance did not cover the amount; nothing changed.
    Insufficient {
        /// Total balance available.
        balance: i64,
    },

    /// The amount was not positive; storage was not touched.
    InvalidAmount,
}

impl ConsumeOutcome {
    /// Whether the caller may treat the request as done.
    #[must_use]
    pub const fn is_ok(&self) -> bool {
        matches!(self, Self::Consumed { .. } | Self::Duplicate)
    }
}

impl From<&ConsumptionPlan> for ConsumeOutcome {
    fn from(plan: &ConsumptionPlan) -> Self {
        Self::Consumed {
            balance: plan.balance_after(),
            from_subscription: plan.from_subscription(),
            from_purchased: plan.from_purchased(),
        }
    }
}

/// Result of recording a purchase.
#[derive(Debug, Clone, PartialEq)]
pub struct PurchaseReceipt {
    /// The stored purchase record.
    pub purchase: CreditPurchase,
    /// Purchased balance after the purchase.
    pub balance: i64,
    /// `true` when an earlier purchase with the same external reference was returned.
    pub duplicate: bool,
}

/// Result of a periodic subscription grant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum GrantOutcome {
    /// Credits were granted for the period.
    Granted {
        /// Subscription balance after the grant.
        balance: i64,
        /// Credits added.
        granted: i64,
        /// Unused credits removed by the rollover limit.
        expired: i64,
    },

    /// The period had already been granted; nothing changed.
    AlreadyGranted {
        /// Current subscription balance.
        balance: i64,
    },
}

/// Result of a manual adjustment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdjustOutcome {
    /// Purchased balance before.
    pub prev: i64,
    /// Purchased balance after.
    pub next: i64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn subscription_is_drained_first() {
        let plan = ConsumptionPlan::compute(5, 10, 8).unwrap();

        assert_eq!(plan.subscription_after(), 0);
        assert_eq!(plan.purchased_after(), 7);
        assert_eq!(plan.from_subscription(), 5);
        assert_eq!(plan.from_purchased(), 3);
        assert_eq!(plan.balance_after(), 7);
    }

    #[test]
    fn subscription_alone_covers_amount() {
        let plan = ConsumptionPlan::compute(20, 10, 8).unwrap();

        assert_eq!(plan.subscription_after(), 12);
        assert!(plan.purchased.is_none());
        assert_eq!(plan.purchased_after(), 10);
        assert_eq!(plan.balance_after(), 22);
    }

    #[test]
    fn purchased_only_when_no_subscription_credit() {
        let plan = ConsumptionPlan::compute(0, 10, 4).unwrap();

        assert!(plan.subscription.is_none());
        assert_eq!(plan.purchased_after(), 6);
    }

    #[test]
    fn exact_total_empties_both() {
        let plan = ConsumptionPlan::compute(3, 4, 7).unwrap();
        assert_eq!(plan.balance_after(), 0);
    }

    #[test]
    fn insufficient_reports_total() {
        let err = ConsumptionPlan::compute(2, 3, 6).unwrap_err();
        assert_eq!(
            err,
            CreditsError::InsufficientCredits {
                balance: 5,
                required: 6
            }
        );
    }

    #[test]
    fn rejects_non_positive_amount() {
        assert_eq!(
            ConsumptionPlan::compute(10, 10, 0).unwrap_err(),
            CreditsError::InvalidAmount(0)
        );
        assert_eq!(
            ConsumptionPlan::compute(10, 10, -3).unwrap_err(),
            CreditsError::InvalidAmount(-3)
        );
    }

    #[test]
    fn rejects_negative_balances() {
        assert_eq!(
            ConsumptionPlan::compute(-1, 10, 1).unwrap_err(),
            CreditsError::CorruptBalance(-1)
        );
    }

    #[test]
    fn conservation_holds_across_splits() {
        for s in 0..6 {
            for p in 0..6 {
                for amount in 1..=(s + p) {
                    let plan = ConsumptionPlan::compute(s, p, amount).unwrap();
                    assert_eq!(plan.from_subscription() + plan.from_purchased(), amount);
                    assert_eq!(plan.balance_after(), s + p - amount);
                    assert!(plan.subscription_after() >= 0);
                    assert!(plan.purchased_after() >= 0);
                }
            }
        }
    }

    #[test]
    fn outcome_from_plan() {
        let plan = ConsumptionPlan::compute(5, 10, 8).unwrap();
        assert_eq!(
            ConsumeOutcome::from(&plan),
            ConsumeOutcome::Consumed {
                balance: 7,
                from_subscription: 5,
                from_purchased: 3
            }
        );
        assert!(ConsumeOutcome::Duplicate.is_ok());
        assert!(!ConsumeOutcome::Insufficient { balance: 1 }.is_ok());
    }

    #[test]
    fn blank_reason_falls_back_to_default() {
        let user_id = UserId::new("user_1").unwrap();
        let mut request = ConsumeRequest::new(user_id, 1);
        assert_eq!(request.reason_or_default(), DEFAULT_CONSUME_REASON);

        request.reason = Some("  ".to_string());
        assert_eq!(request.reason_or_default(), DEFAULT_CONSUME_REASON);

        request.reason = Some("image".to_string());
        assert_eq!(request.reason_or_default(), "image");
    }
}
