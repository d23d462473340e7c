//! Request and response types for the credits client.

use serde::{Deserialize, Serialize};

pub use canvas_credits_core::GrantOutcome;

/// Credit consumption request.
#[derive(Debug, Clone, Serialize)]
pub struct ConsumeRequest {
    /// User being charged.
    pub user_id: String,
    /// Credits to consume (positive).
    pub amount: i64,
    /// Ledger reason (server default: "usage").
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    /// Key making retries of the same request safe.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub idempotency_key: Option<String>,
}

/// Credit consumption response.
#[derive(Debug, Clone, Deserialize)]
pub struct ConsumeResponse {
    /// Whether the consumption is satisfied.
    pub ok: bool,
    /// Total balance after the consumption. Absent for idempotent replays.
    #[serde(default)]
    pub balance: Option<i64>,
    /// `Some(true)` when the idempotency key had already been used.
    #[serde(default)]
    pub idempotent: Option<bool>,
    /// Failure reason (`insufficient-credits`, `invalid-amount`).
    #[serde(default)]
    pub error: Option<String>,
}

impl ConsumeResponse {
    /// Whether this response replays an earlier consumption.
    #[must_use]
    pub fn is_replay(&self) -> bool {
        self.idempotent == Some(true)
    }
}

/// Purchase recording request.
#[derive(Debug, Clone, Serialize)]
pub struct PurchaseRequest {
    /// Buyer.
    pub user_id: String,
    /// Credits bought.
    pub amount: i64,
    /// Price paid in USD.
    pub price_usd: f64,
    /// Payment provider reference.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub external_ref: Option<String>,
}

/// Purchase recording response.
#[derive(Debug, Clone, Deserialize)]
pub struct PurchaseResponse {
    /// Purchase ID.
    pub purchase_id: String,
    /// Purchased balance after the purchase.
    pub balance: i64,
    /// `true` when an earlier purchase with the same reference was returned.
    #[serde(default)]
    pub duplicate: bool,
}

/// Balance response.
#[derive(Debug, Clone, Deserialize)]
pub struct BalanceResponse {
    /// Total spendable credits.
    pub balance: i64,
    /// Subscription credits.
    pub subscription: i64,
    /// Purchased credits.
    pub purchased: i64,
}

/// Periodic grant request.
#[derive(Debug, Clone, Serialize)]
pub(crate) struct GrantRequest<'a> {
    pub user_id: &'a str,
    pub period_cursor: &'a str,
}

/// API error response body.
#[derive(Debug, Clone, Deserialize)]
pub(crate) struct ApiErrorResponse {
    pub error: ApiErrorBody,
}

#[derive(Debug, Clone, Deserialize)]
pub(crate) struct ApiErrorBody {
    pub code: String,
    pub message: String,
    #[serde(default)]
    pub details: Option<serde_json::Value>,
}
