//! Subscription upsert, periodic grant and subscription ledger handlers.

use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::Json;
use chrono::{DateTime, Utc};
use serde::Deserialize;

use canvas_credits_core::{GrantOutcome, Subscription, SubscriptionId, SubscriptionStatus};

use super::credits::ListLedgerResponse;
use super::{paginate, parse_user_id, PageQuery};
use crate::auth::ServiceAuth;
use crate::error::ApiError;
use crate::state::AppState;

/// Subscription upsert request.
///
/// `credits_balance` only seeds new records; an existing subscription with
/// the same ID keeps its balance and last granted period.
#[derive(Debug, Deserialize)]
pub struct PutSubscriptionRequest {
    /// Subscription ID.
    pub id: String,
    /// Owning user.
    pub user_id: String,
    /// Plan code.
    #[serde(default)]
    pub plan_code: Option<String>,
    /// Lifecycle status.
    pub status: SubscriptionStatus,
    /// End of the current billing period.
    #[serde(default)]
    pub current_period_end: Option<DateTime<Utc>>,
    /// Initial subscription credits.
    #[serde(default)]
    pub credits_balance: i64,
    /// Credits granted each period.
    #[serde(default)]
    pub credits_grant_per_period: i64,
    /// Unused credits carried into the next period.
    #[serde(default)]
    pub credits_rollover_limit: i64,
}

/// Insert or update a user's subscription.
pub async fn put_subscription(
    State(state): State<Arc<AppState>>,
    _service: ServiceAuth,
    Json(body): Json<PutSubscriptionRequest>,
) -> Result<Json<Subscription>, ApiError> {
    let id = parse_subscription_id(&body.id)?;
    let user_id = parse_user_id(&body.user_id)?;

    let mut subscription = Subscription::new(id, user_id);
    subscription.plan_code = body.plan_code;
    subscription.status = body.status;
    subscription.current_period_end = body.current_period_end;
    subscription.credits_balance = body.credits_balance;
    subscription.credits_grant_per_period = body.credits_grant_per_period;
    subscription.credits_rollover_limit = body.credits_rollover_limit;

    let stored = state.engine.put_subscription(subscription).await?;
    Ok(Json(stored))
}

/// Periodic grant request.
#[derive(Debug, Deserialize)]
pub struct GrantCreditsRequest {
    /// Subscriber.
    pub user_id: String,
    /// Billing period identifier (e.g. "2026-10").
    pub period_cursor: String,
}

/// Grant the subscription credits for a billing period.
pub async fn grant_credits(
    State(state): State<Arc<AppState>>,
    _service: ServiceAuth,
    Json(body): Json<GrantCreditsRequest>,
) -> Result<Json<GrantOutcome>, ApiError> {
    let user_id = parse_user_id(&body.user_id)?;
    let outcome = state.engine.grant(&user_id, &body.period_cursor).await?;
    Ok(Json(outcome))
}

/// List a subscription's ledger entries.
pub async fn list_subscription_ledger(
    State(state): State<Arc<AppState>>,
    _service: ServiceAuth,
    Path(subscription_id): Path<String>,
    Query(query): Query<PageQuery>,
) -> Result<Json<ListLedgerResponse>, ApiError> {
    let subscription_id = parse_subscription_id(&subscription_id)?;
    let limit = query.capped_limit();
    let entries = state
        .engine
        .subscription_ledger(&subscription_id, limit + 1, query.offset)
        .await?;

    let (entries, has_more) = paginate(entries, limit);
    Ok(Json(ListLedgerResponse { entries, has_more }))
}

fn parse_subscription_id(value: &str) -> Result<SubscriptionId, ApiError> {
    value
        .parse()
        .map_err(|e| ApiError::BadRequest(format!("invalid subscription id: {e}")))
}
