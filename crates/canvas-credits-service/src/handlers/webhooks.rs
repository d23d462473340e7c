//! Payment provider webhook handler.
//!
//! A paid order credits the buyer's purchased balance. The order ID becomes
//! the purchase's external reference, so provider redeliveries are flagged
//! (or skipped with purchase dedupe enabled).

use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::State;
use axum::http::HeaderMap;
use axum::Json;
use serde::{Deserialize, Serialize};

use canvas_credits_core::UserId;

use super::parse_user_id;
use crate::crypto::verify_signature;
use crate::error::ApiError;
use crate::state::AppState;

/// Header carrying the hex HMAC-SHA256 of the raw body.
pub const SIGNATURE_HEADER: &str = "x-webhook-signature";

/// Webhook envelope.
#[derive(Debug, Deserialize)]
pub struct PaymentEvent {
    /// Event type.
    #[serde(rename = "type")]
    pub event_type: String,
    /// Event payload.
    #[serde(default)]
    pub data: serde_json::Value,
}

/// Payload of an `order.paid` event.
#[derive(Debug, Deserialize)]
pub struct PaidOrder {
    /// Provider order ID.
    pub id: String,
    /// Amount charged, in USD cents.
    pub total_amount: i64,
    /// Checkout metadata.
    pub metadata: OrderMetadata,
}

/// Metadata attached to the checkout.
#[derive(Debug, Deserialize)]
pub struct OrderMetadata {
    /// The buyer.
    #[serde(alias = "userId")]
    pub user_id: String,
    /// Credits bought; providers may stringify metadata values.
    pub credits: serde_json::Value,
}

/// Webhook response.
#[derive(Debug, Serialize)]
pub struct WebhookResponse {
    /// Whether the webhook was accepted.
    pub received: bool,
    /// Purchase ID, when credits were recorded.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub purchase_id: Option<String>,
}

/// Handle payment provider webhooks.
pub async fn payment_webhook(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<WebhookResponse>, ApiError> {
    if let Some(secret) = &state.config.payment_webhook_secret {
        let signature = headers
            .get(SIGNATURE_HEADER)
            .and_then(|v| v.to_str().ok())
            .ok_or_else(|| ApiError::BadRequest("Missing webhook signature".into()))?;

        if !verify_signature(secret, &body, signature) {
            tracing::warn!("Invalid payment webhook signature");
            return Err(ApiError::Unauthorized);
        }
    } else {
        tracing::warn!("Payment webhook secret not configured - skipping signature verification");
    }

    let event: PaymentEvent =
        serde_json::from_slice(&body).map_err(|e| ApiError::BadRequest(e.to_string()))?;

    tracing::info!(event_type = %event.event_type, "Received payment webhook");

    if event.event_type != "order.paid" {
        tracing::debug!(event_type = %event.event_type, "Ignoring payment event");
        return Ok(Json(WebhookResponse::acknowledged()));
    }

    // The provider redelivers anything but a 2xx, so orders that can never
    // apply are logged and acknowledged.
    let (order_id, user_id, credits, price_usd) = match parse_order(event.data) {
        Ok(order) => order,
        Err(reason) => {
            tracing::warn!(reason = %reason, "Unusable paid order acknowledged without credit");
            return Ok(Json(WebhookResponse::acknowledged()));
        }
    };

    let receipt = match state
        .engine
        .purchase(user_id, credits, price_usd, Some(order_id.clone()))
        .await
    {
        Ok(receipt) => receipt,
        Err(ApiError::BadRequest(reason)) => {
            tracing::warn!(
                order_id = %order_id,
                reason = %reason,
                "Paid order rejected, acknowledged without credit"
            );
            return Ok(Json(WebhookResponse::acknowledged()));
        }
        Err(err) => return Err(err),
    };

    Ok(Json(WebhookResponse {
        received: true,
        purchase_id: Some(receipt.purchase.id.to_string()),
    }))
}

impl WebhookResponse {
    fn acknowledged() -> Self {
        Self {
            received: true,
            purchase_id: None,
        }
    }
}

/// Extract order ID, buyer, credits and USD price from an `order.paid` payload.
fn parse_order(data: serde_json::Value) -> Result<(String, UserId, i64, f64), ApiError> {
    let order: PaidOrder = serde_json::from_value(data)
        .map_err(|e| ApiError::BadRequest(format!("invalid order payload: {e}")))?;
    let user_id = parse_user_id(&order.metadata.user_id)?;
    let credits = parse_credits(&order.metadata.credits)?;
    let price_usd = cents_to_usd(order.total_amount)?;
    Ok((order.id, user_id, credits, price_usd))
}

fn parse_credits(value: &serde_json::Value) -> Result<i64, ApiError> {
    let credits = match value {
        serde_json::Value::Number(n) => n.as_i64(),
        serde_json::Value::String(s) => s.trim().parse().ok(),
        _ => None,
    };
    credits.ok_or_else(|| ApiError::BadRequest(format!("invalid credits metadata: {value}")))
}

#[allow(clippy::cast_precision_loss)] // order totals are far below 2^52 cents
fn cents_to_usd(cents: i64) -> Result<f64, ApiError> {
    if cents < 0 {
        return Err(ApiError::BadRequest("total_amount must not be negative".into()));
    }
    Ok(cents as f64 / 100.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn credits_accept_numbers_and_strings() {
        assert_eq!(parse_credits(&serde_json::json!(500)).unwrap(), 500);
        assert_eq!(parse_credits(&serde_json::json!(" 250 ")).unwrap(), 250);
        assert!(parse_credits(&serde_json::json!(1.5)).is_err());
        assert!(parse_credits(&serde_json::json!(null)).is_err());
    }

    #[test]
    fn cents_convert_to_dollars() {
        assert!((cents_to_usd(999).unwrap() - 9.99).abs() < f64::EPSILON);
        assert!(cents_to_usd(-1).is_err());
    }

    #[test]
    fn metadata_accepts_camel_case_user_id() {
        let order: PaidOrder = serde_json::from_value(serde_json::json!({
            "id": "ord_1",
            "total_amount": 500,
            "metadata": { "userId": "user_1", "credits": "100" }
        }))
        .unwrap();
        assert_eq!(order.metadata.user_id, "user_1");
    }
}
