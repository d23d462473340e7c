//! Application state.

use std::sync::Arc;

use tokio::sync::RwLock;

use canvas_credits_store::Store;

use crate::auth::JwksCache;
use crate::config::ServiceConfig;
use crate::engine::CreditsEngine;

/// Application state shared across handlers.
pub struct AppState {
    /// The credits engine (storage plus retry policy).
    pub engine: CreditsEngine,

    /// Service configuration.
    pub config: ServiceConfig,

    /// Cached signing keys for user JWT validation.
    pub(crate) jwks: RwLock<JwksCache>,
}

impl AppState {
    /// Create a new application state.
    #[must_use]
    pub fn new(store: Arc<dyn Store>, config: ServiceConfig) -> Self {
        if config.service_api_key.is_none() {
            tracing::warn!("SERVICE_API_KEY not configured - service endpoints will reject all requests");
        }
        if config.admin_api_key.is_none() {
            tracing::warn!("ADMIN_API_KEY not configured - adjustments are disabled");
        }
        if config.payment_webhook_secret.is_none() {
            tracing::warn!("Payment webhook secret not configured - signatures will not be verified");
        }

        Self {
            engine: CreditsEngine::new(store, &config),
            config,
            jwks: RwLock::new(JwksCache::new()),
        }
    }
}
