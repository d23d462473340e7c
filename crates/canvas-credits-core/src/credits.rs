//! Purchased credit balance.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{CreditsError, Result};
use crate::UserId;

/// A user's purchased (non-expiring) credit balance.
///
/// One record exists per user. It is created lazily on the first purchase or
/// consumption attempt and never deleted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserCredits {
    /// The owning user.
    pub user_id: UserId,

    /// Purchased credits available. Never negative.
    pub balance: i64,

    /// When the record was first created.
    pub created_at: DateTime<Utc>,

    /// When the balance last changed.
    pub last_updated: DateTime<Utc>,
}

impl UserCredits {
    /// Create an empty record for a user.
    #[must_use]
    pub fn new(user_id: UserId) -> Self {
        let now = Utc::now();
        Self {
            user_id,
            balance: 0,
            created_at: now,
            last_updated: now,
        }
    }

    /// Apply a signed change to the balance, returning `(prev, next)`.
    ///
    /// # Errors
    ///
    /// - `CreditsError::InsufficientCredits` if the result would be negative.
    /// - `CreditsError::Overflow` if the result does not fit in an `i64`.
    pub fn apply_delta(&mut self, delta: i64) -> Result<(i64, i64)> {
        let prev = self.balance;
        let next = prev.checked_add(delta).ok_or(CreditsError::Overflow)?;
        if next < 0 {
            return Err(CreditsError::InsufficientCredits {
                balance: prev,
                required: delta.saturating_neg(),
            });
        }
        self.balance = next;
        self.last_updated = Utc::now();
        Ok((prev, next))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn user() -> UserId {
        UserId::new("user_1").unwrap()
    }

    #[test]
    fn new_record_is_empty() {
        let credits = UserCredits::new(user());
        assert_eq!(credits.balance, 0);
        assert_eq!(credits.created_at, credits.last_updated);
    }

    #[test]
    fn apply_delta_reports_snapshot() {
        let mut credits = UserCredits::new(user());
        assert_eq!(credits.apply_delta(100).unwrap(), (0, 100));
        assert_eq!(credits.apply_delta(-40).unwrap(), (100, 60));
        assert_eq!(credits.balance, 60);
    }

    #[test]
    fn apply_delta_refuses_negative_result() {
        let mut credits = UserCredits::new(user());
        credits.apply_delta(10).unwrap();

        let err = credits.apply_delta(-11).unwrap_err();
        assert_eq!(
            err,
            CreditsError::InsufficientCredits {
                balance: 10,
                required: 11
            }
        );
        assert_eq!(credits.balance, 10);
    }

    #[test]
    fn apply_delta_detects_overflow() {
        let mut credits = UserCredits::new(user());
        credits.apply_delta(i64::MAX).unwrap();
        assert_eq!(credits.apply_delta(1), Err(CreditsError::Overflow));
    }
}
