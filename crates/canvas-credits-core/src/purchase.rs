//! Credit purchase records.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{CreditsError, Result};
use crate::{PurchaseId, UserId};

/// One completed (or failed) purchase of credits.
///
/// Records are immutable once written and never deleted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CreditPurchase {
    /// Unique purchase ID (ULID for time-ordering).
    pub id: PurchaseId,

    /// The purchasing user.
    pub user_id: UserId,

    /// Credits granted by this purchase.
    pub amount: i64,

    /// Price paid in US dollars.
    pub price_usd: f64,

    /// Payment provider reference (order ID) for reconciliation.
    pub external_ref: Option<String>,

    /// Purchase status.
    pub status: PurchaseStatus,

    /// When the purchase was recorded.
    pub created_at: DateTime<Utc>,

    /// When the purchase completed.
    pub completed_at: Option<DateTime<Utc>>,
}

impl CreditPurchase {
    /// Create a purchase that is already completed.
    ///
    /// # Errors
    ///
    /// - `CreditsError::InvalidAmount` if `amount` is not positive.
    /// - `CreditsError::InvalidPrice` if `price_usd` is negative or not finite.
    pub fn completed(
        user_id: UserId,
        amount: i64,
        price_usd: f64,
        external_ref: Option<String>,
    ) -> Result<Self> {
        validate_purchase(amount, price_usd)?;

        let now = Utc::now();
        Ok(Self {
            id: PurchaseId::generate(),
            user_id,
            amount,
            price_usd,
            external_ref,
            status: PurchaseStatus::Completed,
            created_at: now,
            completed_at: Some(now),
        })
    }
}

/// Validate the amount and price of a purchase.
///
/// # Errors
///
/// - `CreditsError::InvalidAmount` if `amount` is not positive.
/// - `CreditsError::InvalidPrice` if `price_usd` is negative or not finite.
pub fn validate_purchase(amount: i64, price_usd: f64) -> Result<()> {
    if amount <= 0 {
        return Err(CreditsError::InvalidAmount(amount));
    }
    if !price_usd.is_finite() || price_usd < 0.0 {
        return Err(CreditsError::InvalidPrice(price_usd));
    }
    Ok(())
}

/// Status of a credit purchase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PurchaseStatus {
    /// Awaiting payment confirmation.
    Pending,

    /// Paid and credited.
    Completed,

    /// Payment failed; no credits granted.
    Failed,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn user() -> UserId {
        UserId::new("user_1").unwrap()
    }

    #[test]
    fn completed_purchase_is_stamped() {
        let purchase = CreditPurchase::completed(user(), 500, 9.99, Some("ord_1".into())).unwrap();
        assert_eq!(purchase.status, PurchaseStatus::Completed);
        assert_eq!(purchase.completed_at, Some(purchase.created_at));
        assert_eq!(purchase.external_ref.as_deref(), Some("ord_1"));
    }

    #[test]
    fn free_purchase_is_allowed() {
        assert!(CreditPurchase::completed(user(), 10, 0.0, None).is_ok());
    }

    #[test]
    fn rejects_non_positive_amount() {
        assert_eq!(
            CreditPurchase::completed(user(), 0, 1.0, None).unwrap_err(),
            CreditsError::InvalidAmount(0)
        );
        assert_eq!(
            CreditPurchase::completed(user(), -5, 1.0, None).unwrap_err(),
            CreditsError::InvalidAmount(-5)
        );
    }

    #[test]
    fn rejects_bad_price() {
        assert!(matches!(
            validate_purchase(10, -0.01),
            Err(CreditsError::InvalidPrice(_))
        ));
        assert!(matches!(
            validate_purchase(10, f64::NAN),
            Err(CreditsError::InvalidPrice(_))
        ));
    }
}
