//! Router configuration.
//!
//! This module sets up the Axum router with all routes and middleware.

use std::sync::Arc;
use std::time::Duration;

use axum::routing::{get, post, put};
use axum::Router;
use tower::limit::ConcurrencyLimitLayer;
use tower_http::cors::{Any, CorsLayer};
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;

use crate::handlers::{credits, health, subscriptions, webhooks};
use crate::state::AppState;

/// Maximum concurrent requests for consumption.
/// Generation workers report at high volume; requests for one user serialize in storage.
const CONSUME_MAX_CONCURRENT_REQUESTS: usize = 100;

/// Maximum concurrent requests for general API endpoints.
const API_MAX_CONCURRENT_REQUESTS: usize = 50;

/// Create the service router with all routes and middleware.
///
/// # Routes
///
/// ## Public
/// - `GET /health` - Health check
///
/// ## Credits (JWT auth)
/// - `GET /v1/credits/balance` - Current balance (total and split)
/// - `GET /v1/credits/purchases` - Purchase history
/// - `GET /v1/credits/ledger` - Ledger history
///
/// ## Service API key
/// - `POST /v1/credits/consume` - Consume credits
/// - `POST /v1/credits/purchase` - Record a completed purchase
/// - `GET /v1/users/:user_id/balance` - Balance of any user
/// - `PUT /v1/subscriptions` - Subscription upsert
/// - `POST /v1/subscriptions/grant` - Periodic grant
/// - `GET /v1/subscriptions/:subscription_id/ledger` - Subscription ledger
///
/// ## Admin API key
/// - `POST /v1/credits/adjust` - Manual adjustment
///
/// ## Webhooks (signature verification)
/// - `POST /webhooks/payments` - Paid orders
pub fn create_router(state: AppState) -> Router {
    let cors = build_cors_layer(&state.config.cors_origins);
    let max_body_bytes = state.config.max_body_bytes;
    let request_timeout_seconds = state.config.request_timeout_seconds;

    let state = Arc::new(state);

    let consume_routes = Router::new()
        .route("/", post(credits::consume_credits))
        .layer(ConcurrencyLimitLayer::new(CONSUME_MAX_CONCURRENT_REQUESTS));

    let api_routes = Router::new()
        // Credits
        .route("/credits/balance", get(credits::get_balance))
        .route("/credits/purchases", get(credits::list_purchases))
        .route("/credits/ledger", get(credits::list_ledger))
        .route("/credits/purchase", post(credits::purchase_credits))
        .route("/credits/adjust", post(credits::adjust_credits))
        .route("/users/:user_id/balance", get(credits::get_user_balance))
        // Subscriptions
        .route("/subscriptions", put(subscriptions::put_subscription))
        .route("/subscriptions/grant", post(subscriptions::grant_credits))
        .route(
            "/subscriptions/:subscription_id/ledger",
            get(subscriptions::list_subscription_ledger),
        )
        .layer(ConcurrencyLimitLayer::new(API_MAX_CONCURRENT_REQUESTS))
        // Consumption (with its own concurrency limit)
        .nest("/credits/consume", consume_routes);

    Router::new()
        .route("/health", get(health::health))
        .nest("/v1", api_routes)
        // Webhooks (no rate limit - controlled by the payment provider)
        .route("/webhooks/payments", post(webhooks::payment_webhook))
        // Global middleware
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .layer(RequestBodyLimitLayer::new(max_body_bytes))
        .layer(TimeoutLayer::new(Duration::from_secs(
            request_timeout_seconds,
        )))
        .with_state(state)
}

/// Build the CORS layer from configured origins.
fn build_cors_layer(origins: &[String]) -> CorsLayer {
    if origins.iter().any(|o| o == "*") {
        CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any)
    } else {
        let origins: Vec<_> = origins.iter().filter_map(|o| o.parse().ok()).collect();

        CorsLayer::new()
            .allow_origin(origins)
            .allow_methods(Any)
            .allow_headers(Any)
    }
}
