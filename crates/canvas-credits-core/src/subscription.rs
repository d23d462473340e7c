//! Subscription records and their granted credit balance.
//!
//! Subscriptions are owned by the subscription subsystem. The credits ledger
//! reads them and moves `credits_balance` only through grants and
//! consumption.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{SubscriptionId, UserId};

/// A user's subscription, carrying the periodic credit grant balance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Subscription {
    /// Subscription ID from the subscription subsystem.
    pub id: SubscriptionId,

    /// The subscribed user. At most one subscription per user.
    pub user_id: UserId,

    /// Plan code (e.g. "standard").
    pub plan_code: Option<String>,

    /// Lifecycle status.
    pub status: SubscriptionStatus,

    /// End of the current billing period.
    pub current_period_end: Option<DateTime<Utc>>,

    /// Granted credits still available. Never negative.
    pub credits_balance: i64,

    /// Credits granted at the start of each period.
    pub credits_grant_per_period: i64,

    /// Maximum unused credits carried into the next period.
    pub credits_rollover_limit: i64,

    /// Cursor of the last period that received a grant.
    pub last_grant_cursor: Option<String>,

    /// When the record was first stored.
    pub created_at: DateTime<Utc>,

    /// When the record was last written.
    pub updated_at: DateTime<Utc>,
}

impl Subscription {
    /// Create an active subscription with an empty credit balance.
    #[must_use]
    pub fn new(id: SubscriptionId, user_id: UserId) -> Self {
        let now = Utc::now();
        Self {
            id,
            user_id,
            plan_code: None,
            status: SubscriptionStatus::Active,
            current_period_end: None,
            credits_balance: 0,
            credits_grant_per_period: 0,
            credits_rollover_limit: 0,
            last_grant_cursor: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Idempotency key of the grant for a billing period.
    #[must_use]
    pub fn grant_key(&self, period_cursor: &str) -> String {
        format!("grant:{}:{period_cursor}", self.id)
    }

    /// Split the current balance into `(carried, expired)` for a new period.
    #[must_use]
    pub fn rollover(&self) -> (i64, i64) {
        let limit = self.credits_rollover_limit.max(0);
        let carried = self.credits_balance.min(limit);
        (carried, self.credits_balance - carried)
    }

    /// Whether the subscription has already been granted credits for a period.
    #[must_use]
    pub fn was_granted(&self, period_cursor: &str) -> bool {
        self.last_grant_cursor.as_deref() == Some(period_cursor)
    }
}

/// Lifecycle status of a subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubscriptionStatus {
    /// Paid and current.
    Active,

    /// In a trial period.
    Trialing,

    /// Renewal payment failed.
    PastDue,

    /// Cancelled; remains readable for history.
    Canceled,
}
