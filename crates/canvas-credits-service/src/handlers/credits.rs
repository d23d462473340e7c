//! Credit balance, consumption, purchase and history handlers.

use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::Json;
use serde::{Deserialize, Serialize};

use canvas_credits_core::{
    BalanceSnapshot, ConsumeOutcome, ConsumeRequest, CreditLedgerEntry, CreditPurchase,
    PurchaseReceipt,
};

use super::{paginate, parse_user_id, PageQuery};
use crate::auth::{AdminAuth, AuthUser, ServiceAuth};
use crate::error::ApiError;
use crate::state::AppState;

// ============================================================================
// Balance
// ============================================================================

/// Balance response.
#[derive(Debug, Serialize)]
pub struct BalanceResponse {
    /// Total spendable credits.
    pub balance: i64,
    /// Subscription credits.
    pub subscription: i64,
    /// Purchased credits.
    pub purchased: i64,
}

impl From<BalanceSnapshot> for BalanceResponse {
    fn from(snapshot: BalanceSnapshot) -> Self {
        Self {
            balance: snapshot.total(),
            subscription: snapshot.subscription,
            purchased: snapshot.purchased,
        }
    }
}

/// Get the current user's balance.
pub async fn get_balance(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
) -> Result<Json<BalanceResponse>, ApiError> {
    let snapshot = state.engine.balance(&auth.user_id).await?;
    Ok(Json(snapshot.into()))
}

/// Get any user's balance (service callers).
pub async fn get_user_balance(
    State(state): State<Arc<AppState>>,
    _service: ServiceAuth,
    Path(user_id): Path<String>,
) -> Result<Json<BalanceResponse>, ApiError> {
    let user_id = parse_user_id(&user_id)?;
    let snapshot = state.engine.balance(&user_id).await?;
    Ok(Json(snapshot.into()))
}

// ============================================================================
// Consumption
// ============================================================================

/// Consume credits request.
#[derive(Debug, Deserialize)]
pub struct ConsumeCreditsRequest {
    /// User to charge.
    pub user_id: String,
    /// Credits to consume.
    pub amount: i64,
    /// Ledger reason (default: "usage").
    #[serde(default)]
    pub reason: Option<String>,
    /// Key suppressing repeated effects of a retried request.
    #[serde(default)]
    pub idempotency_key: Option<String>,
}

/// Consume credits response.
#[derive(Debug, Default, Serialize)]
pub struct ConsumeResponse {
    /// Whether the request is satisfied.
    pub ok: bool,
    /// Total balance after the request (or the available balance when insufficient).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub balance: Option<i64>,
    /// Set when the idempotency key had already been used.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub idempotent: Option<bool>,
    /// Machine-readable failure reason.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<&'static str>,
}

impl ConsumeResponse {
    /// Map an outcome onto its HTTP status and body.
    #[must_use]
    pub fn from_outcome(outcome: ConsumeOutcome) -> (StatusCode, Self) {
        match outcome {
            ConsumeOutcome::Consumed { balance, .. } => (
                StatusCode::OK,
                Self {
                    ok: true,
                    balance: Some(balance),
                    ..Self::default()
                },
            ),
            ConsumeOutcome::Duplicate => (
                StatusCode::OK,
                Self {
                    ok: true,
                    idempotent: Some(true),
                    ..Self::default()
                },
            ),
            ConsumeOutcome::Insufficient { balance } => (
                StatusCode::PAYMENT_REQUIRED,
                Self {
                    ok: false,
                    balance: Some(balance),
                    error: Some("insufficient-credits"),
                    ..Self::default()
                },
            ),
            ConsumeOutcome::InvalidAmount => (
                StatusCode::BAD_REQUEST,
                Self {
                    ok: false,
                    error: Some("invalid-amount"),
                    ..Self::default()
                },
            ),
        }
    }
}

/// Consume credits on behalf of a user.
pub async fn consume_credits(
    State(state): State<Arc<AppState>>,
    service: ServiceAuth,
    Json(body): Json<ConsumeCreditsRequest>,
) -> Result<(StatusCode, Json<ConsumeResponse>), ApiError> {
    let user_id = parse_user_id(&body.user_id)?;

    tracing::debug!(
        service = %service.service_name,
        user_id = %user_id,
        amount = body.amount,
        "Consume requested"
    );

    let request = ConsumeRequest {
        user_id,
        amount: body.amount,
        reason: body.reason.filter(|r| !r.trim().is_empty()),
        idempotency_key: body.idempotency_key.filter(|k| !k.is_empty()),
    };
    let outcome = state.engine.consume(request).await?;

    let (status, response) = ConsumeResponse::from_outcome(outcome);
    Ok((status, Json(response)))
}

// ============================================================================
// Purchases
// ============================================================================

/// Record purchase request.
#[derive(Debug, Deserialize)]
pub struct PurchaseCreditsRequest {
    /// Buyer.
    pub user_id: String,
    /// Credits bought.
    pub amount: i64,
    /// Price paid in USD.
    pub price_usd: f64,
    /// Payment provider reference (order ID).
    #[serde(default)]
    pub external_ref: Option<String>,
}

/// Record purchase response.
#[derive(Debug, Serialize)]
pub struct PurchaseCreditsResponse {
    /// The purchase ID.
    pub purchase_id: String,
    /// Purchased balance after the purchase.
    pub balance: i64,
    /// `true` when an earlier purchase with the same reference was returned.
    pub duplicate: bool,
}

impl From<PurchaseReceipt> for PurchaseCreditsResponse {
    fn from(receipt: PurchaseReceipt) -> Self {
        Self {
            purchase_id: receipt.purchase.id.to_string(),
            balance: receipt.balance,
            duplicate: receipt.duplicate,
        }
    }
}

/// Record a completed credit purchase.
pub async fn purchase_credits(
    State(state): State<Arc<AppState>>,
    service: ServiceAuth,
    Json(body): Json<PurchaseCreditsRequest>,
) -> Result<Json<PurchaseCreditsResponse>, ApiError> {
    let user_id = parse_user_id(&body.user_id)?;

    tracing::debug!(
        service = %service.service_name,
        user_id = %user_id,
        amount = body.amount,
        "Purchase recorded by service"
    );

    let receipt = state
        .engine
        .purchase(user_id, body.amount, body.price_usd, body.external_ref)
        .await?;

    Ok(Json(receipt.into()))
}

/// Purchase history response.
#[derive(Debug, Serialize)]
pub struct ListPurchasesResponse {
    /// Purchases (newest first).
    pub purchases: Vec<CreditPurchase>,
    /// Whether there are more purchases.
    pub has_more: bool,
}

/// List the current user's purchases.
pub async fn list_purchases(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
    Query(query): Query<PageQuery>,
) -> Result<Json<ListPurchasesResponse>, ApiError> {
    let limit = query.capped_limit();
    let purchases = state
        .engine
        .purchase_history(&auth.user_id, limit + 1, query.offset)
        .await?;

    let (purchases, has_more) = paginate(purchases, limit);
    Ok(Json(ListPurchasesResponse {
        purchases,
        has_more,
    }))
}

// ============================================================================
// Ledger
// ============================================================================

/// Ledger history response.
#[derive(Debug, Serialize)]
pub struct ListLedgerResponse {
    /// Ledger entries (newest first).
    pub entries: Vec<CreditLedgerEntry>,
    /// Whether there are more entries.
    pub has_more: bool,
}

/// List the current user's ledger entries.
pub async fn list_ledger(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
    Query(query): Query<PageQuery>,
) -> Result<Json<ListLedgerResponse>, ApiError> {
    let limit = query.capped_limit();
    let entries = state
        .engine
        .ledger_history(&auth.user_id, limit + 1, query.offset)
        .await?;

    let (entries, has_more) = paginate(entries, limit);
    Ok(Json(ListLedgerResponse { entries, has_more }))
}

// ============================================================================
// Admin
// ============================================================================

/// Manual adjustment request.
#[derive(Debug, Deserialize)]
pub struct AdjustCreditsRequest {
    /// User whose purchased credits change.
    pub user_id: String,
    /// Signed change, non-zero.
    pub delta: i64,
    /// Reason recorded in the ledger.
    pub reason: String,
}

/// Manual adjustment response.
#[derive(Debug, Serialize)]
pub struct AdjustCreditsResponse {
    /// Purchased balance before.
    pub prev: i64,
    /// Purchased balance after.
    pub next: i64,
}

/// Apply a manual adjustment to a user's purchased credits.
pub async fn adjust_credits(
    State(state): State<Arc<AppState>>,
    admin: AdminAuth,
    Json(body): Json<AdjustCreditsRequest>,
) -> Result<Json<AdjustCreditsResponse>, ApiError> {
    let user_id = parse_user_id(&body.user_id)?;
    let outcome = state
        .engine
        .adjust(&user_id, body.delta, &body.reason, &admin.admin_id)
        .await?;

    Ok(Json(AdjustCreditsResponse {
        prev: outcome.prev,
        next: outcome.next,
    }))
}
