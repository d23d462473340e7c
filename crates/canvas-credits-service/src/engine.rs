//! Credits engine.
//!
//! Wraps the blocking [`Store`] for use from async handlers: every call runs
//! on the blocking thread pool, transactions that lose a lock race are
//! retried with exponential backoff, and every balance change is logged.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};

use canvas_credits_core::{
    validate_purchase, AdjustOutcome, BalanceSnapshot, ConsumeOutcome, ConsumeRequest,
    CreditLedgerEntry, CreditPurchase, GrantOutcome, PurchaseReceipt, Subscription,
    SubscriptionId, UserId,
};
use canvas_credits_store::{Store, StoreError};

use crate::config::ServiceConfig;
use crate::error::ApiError;

// =============================================================================
// Constants
// =============================================================================

/// Base delay for exponential backoff on retry (milliseconds).
const RETRY_BASE_DELAY_MS: u64 = 25;

/// Upper bound for a single backoff delay (milliseconds).
const RETRY_MAX_DELAY_MS: u64 = 1_000;

/// Longest accepted ledger reason.
const MAX_REASON_LEN: usize = 256;

// =============================================================================
// Credits Engine
// =============================================================================

/// Entry point for every credits operation the HTTP layer performs.
#[derive(Clone)]
pub struct CreditsEngine {
    store: Arc<dyn Store>,
    dedupe_purchases: bool,
    max_retries: u32,
}

impl CreditsEngine {
    /// Create an engine over `store` using the retry and dedupe settings of `config`.
    #[must_use]
    pub fn new(store: Arc<dyn Store>, config: &ServiceConfig) -> Self {
        Self {
            store,
            dedupe_purchases: config.dedupe_purchases,
            max_retries: config.consume_max_retries,
        }
    }

    /// Both balances of a user. Creates nothing.
    pub async fn balance(&self, user_id: &UserId) -> Result<BalanceSnapshot, ApiError> {
        let user_id = user_id.clone();
        self.run("balance", move |store| store.get_balance(&user_id))
            .await
    }

    /// Consume credits, subscription first.
    ///
    /// Insufficient balance and non-positive amounts come back as outcomes;
    /// only storage failures are errors.
    pub async fn consume(&self, mut request: ConsumeRequest) -> Result<ConsumeOutcome, ApiError> {
        if request.amount <= 0 {
            debug!(user_id = %request.user_id, amount = request.amount, "Rejected non-positive consumption");
            return Ok(ConsumeOutcome::InvalidAmount);
        }
        // A blank reason means the default one.
        request.reason = request.reason.filter(|r| !r.trim().is_empty());
        if let Some(reason) = &request.reason {
            validate_reason(reason)?;
        }

        let user_id = request.user_id.clone();
        let amount = request.amount;
        let request = Arc::new(request);
        let outcome = self
            .run("consume", move |store| store.consume_credits(&request))
            .await?;

        match outcome {
            ConsumeOutcome::Consumed {
                balance,
                from_subscription,
                from_purchased,
            } => info!(
                user_id = %user_id,
                amount,
                from_subscription,
                from_purchased,
                balance,
                "Credits consumed"
            ),
            ConsumeOutcome::Duplicate => {
                debug!(user_id = %user_id, amount, "Duplicate consumption ignored");
            }
            ConsumeOutcome::Insufficient { balance } => {
                info!(user_id = %user_id, amount, balance, "Insufficient credits");
            }
            ConsumeOutcome::InvalidAmount => {}
        }

        Ok(outcome)
    }

    /// Record a completed purchase and credit the purchased balance.
    pub async fn purchase(
        &self,
        user_id: UserId,
        amount: i64,
        price_usd: f64,
        external_ref: Option<String>,
    ) -> Result<PurchaseReceipt, ApiError> {
        validate_purchase(amount, price_usd)?;
        if let Some(external_ref) = &external_ref {
            if external_ref.trim().is_empty() {
                return Err(ApiError::BadRequest("external_ref must not be blank".into()));
            }
        }

        let purchase = Arc::new(CreditPurchase::completed(
            user_id,
            amount,
            price_usd,
            external_ref,
        )?);
        let dedupe = self.dedupe_purchases;
        let receipt = self
            .run("purchase", move |store| {
                store.purchase_credits(&purchase, dedupe)
            })
            .await?;

        if receipt.duplicate {
            info!(
                user_id = %receipt.purchase.user_id,
                purchase_id = %receipt.purchase.id,
                external_ref = ?receipt.purchase.external_ref,
                "Duplicate purchase returned unchanged"
            );
        } else {
            info!(
                user_id = %receipt.purchase.user_id,
                purchase_id = %receipt.purchase.id,
                amount = receipt.purchase.amount,
                price_usd = receipt.purchase.price_usd,
                balance = receipt.balance,
                "Credits purchased"
            );
        }

        Ok(receipt)
    }

    /// A user's purchases, newest first.
    pub async fn purchase_history(
        &self,
        user_id: &UserId,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<CreditPurchase>, ApiError> {
        let user_id = user_id.clone();
        self.run("purchase_history", move |store| {
            store.list_purchases_by_user(&user_id, limit, offset)
        })
        .await
    }

    /// A user's ledger entries, newest first.
    pub async fn ledger_history(
        &self,
        user_id: &UserId,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<CreditLedgerEntry>, ApiError> {
        let user_id = user_id.clone();
        self.run("ledger_history", move |store| {
            store.list_ledger_by_user(&user_id, limit, offset)
        })
        .await
    }

    /// A subscription's ledger entries, newest first.
    pub async fn subscription_ledger(
        &self,
        subscription_id: &SubscriptionId,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<CreditLedgerEntry>, ApiError> {
        let subscription_id = subscription_id.clone();
        self.run("subscription_ledger", move |store| {
            store.list_ledger_by_subscription(&subscription_id, limit, offset)
        })
        .await
    }

    /// Insert or update a subscription record.
    pub async fn put_subscription(
        &self,
        subscription: Subscription,
    ) -> Result<Subscription, ApiError> {
        let subscription = Arc::new(subscription);
        let stored = self
            .run("put_subscription", move |store| {
                store.put_subscription(&subscription)
            })
            .await?;

        info!(
            user_id = %stored.user_id,
            subscription_id = %stored.id,
            status = ?stored.status,
            "Subscription stored"
        );

        Ok(stored)
    }

    /// Grant the user's subscription its credits for `period_cursor`, once.
    pub async fn grant(
        &self,
        user_id: &UserId,
        period_cursor: &str,
    ) -> Result<GrantOutcome, ApiError> {
        let cursor = period_cursor.trim().to_string();
        if cursor.is_empty() {
            return Err(ApiError::BadRequest("period_cursor must not be blank".into()));
        }

        let owner = user_id.clone();
        let outcome = self
            .run("grant", move |store| {
                store.grant_subscription_credits(&owner, &cursor)
            })
            .await?;

        match outcome {
            GrantOutcome::Granted {
                balance,
                granted,
                expired,
            } => info!(
                user_id = %user_id,
                period_cursor,
                granted,
                expired,
                balance,
                "Subscription credits granted"
            ),
            GrantOutcome::AlreadyGranted { balance } => debug!(
                user_id = %user_id,
                period_cursor,
                balance,
                "Subscription period already granted"
            ),
        }

        Ok(outcome)
    }

    /// Apply a manual signed adjustment to purchased credits.
    pub async fn adjust(
        &self,
        user_id: &UserId,
        delta: i64,
        reason: &str,
        actor: &str,
    ) -> Result<AdjustOutcome, ApiError> {
        if delta == 0 {
            return Err(ApiError::BadRequest("delta must not be zero".into()));
        }
        validate_reason(reason)?;

        let owner = user_id.clone();
        let ledger_reason = reason.to_string();
        let outcome = self
            .run("adjust", move |store| {
                store.adjust_credits(&owner, delta, &ledger_reason)
            })
            .await?;

        info!(
            user_id = %user_id,
            actor,
            delta,
            reason,
            prev = outcome.prev,
            next = outcome.next,
            "Credits adjusted"
        );

        Ok(outcome)
    }

    /// Run a store call on the blocking pool, retrying lock conflicts.
    async fn run<T, F>(&self, operation: &'static str, f: F) -> Result<T, ApiError>
    where
        T: Send + 'static,
        F: Fn(&dyn Store) -> canvas_credits_store::Result<T> + Send + Sync + 'static,
    {
        let f = Arc::new(f);
        let mut attempt: u32 = 0;

        loop {
            let store = Arc::clone(&self.store);
            let call = Arc::clone(&f);
            let result = tokio::task::spawn_blocking(move || call(store.as_ref()))
                .await
                .map_err(|e| ApiError::Internal(format!("{operation} task failed: {e}")))?;

            match result {
                Ok(value) => return Ok(value),
                Err(err @ StoreError::Conflict(_)) if attempt < self.max_retries => {
                    let delay = backoff_delay(attempt);
                    attempt += 1;
                    debug!(
                        operation,
                        attempt,
                        delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                        error = %err,
                        "Transaction conflict, retrying"
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(StoreError::Conflict(msg)) => {
                    warn!(
                        operation,
                        retries = self.max_retries,
                        error = %msg,
                        "Transaction conflict persisted after retries"
                    );
                    return Err(ApiError::Unavailable(
                        "Too many concurrent updates. Please try again.".into(),
                    ));
                }
                Err(err) => return Err(err.into()),
            }
        }
    }
}

fn backoff_delay(attempt: u32) -> Duration {
    let factor = 1_u64.checked_shl(attempt).unwrap_or(u64::MAX);
    Duration::from_millis(
        RETRY_BASE_DELAY_MS
            .saturating_mul(factor)
            .min(RETRY_MAX_DELAY_MS),
    )
}

fn validate_reason(reason: &str) -> Result<(), ApiError> {
    if reason.trim().is_empty() {
        return Err(ApiError::BadRequest("reason must not be blank".into()));
    }
    if reason.len() > MAX_REASON_LEN {
        return Err(ApiError::BadRequest(format!(
            "reason must be at most {MAX_REASON_LEN} bytes"
        )));
    }
    Ok(())
}
