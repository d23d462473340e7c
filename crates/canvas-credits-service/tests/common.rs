//! Common test utilities for canvas-credits integration tests.

#![allow(dead_code)] // Some utilities are used by different test files

use std::sync::Arc;

use axum::Router;
use axum_test::TestServer;
use serde_json::json;
use tempfile::TempDir;

use canvas_credits_core::UserId;
use canvas_credits_service::crypto::hmac_sha256_hex;
use canvas_credits_service::{create_router, AppState, ServiceConfig};
use canvas_credits_store::RocksStore;

pub const SERVICE_API_KEY: &str = "test-service-key";
pub const ADMIN_API_KEY: &str = "test-admin-key";
pub const WEBHOOK_SECRET: &str = "test-webhook-secret";

/// Test harness containing everything needed for integration tests.
pub struct TestHarness {
    /// The test server for making HTTP requests.
    pub server: TestServer,
    /// Temporary directory for the database (kept alive for test duration).
    pub _temp_dir: TempDir,
    /// A test user ID for authenticated requests.
    pub test_user_id: UserId,
}

impl TestHarness {
    /// Create a new test harness with a fresh database.
    pub fn new() -> Self {
        Self::with_config(|_| {})
    }

    /// Create a harness after adjusting the default test configuration.
    pub fn with_config(configure: impl FnOnce(&mut ServiceConfig)) -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let store = RocksStore::open(temp_dir.path()).expect("Failed to open store");

        let mut config = ServiceConfig {
            listen_addr: "127.0.0.1:0".into(),
            data_dir: temp_dir.path().to_string_lossy().to_string(),
            auth_base_url: "http://localhost".into(),
            service_api_key: Some(SERVICE_API_KEY.into()),
            admin_api_key: Some(ADMIN_API_KEY.into()),
            payment_webhook_secret: Some(WEBHOOK_SECRET.into()),
            cors_origins: vec!["*".into()],
            ..ServiceConfig::default()
        };
        configure(&mut config);

        let state = AppState::new(Arc::new(store), config);
        let router: Router = create_router(state);

        let server = TestServer::new(router).expect("Failed to create test server");

        Self {
            server,
            _temp_dir: temp_dir,
            test_user_id: UserId::new("user_test").expect("valid user id"),
        }
    }

    /// Get the authorization header for user authentication.
    pub fn user_auth_header(&self) -> String {
        format!("Bearer test-token:{}", self.test_user_id)
    }

    /// Record a purchase for the test user through the service API.
    pub async fn purchase(&self, amount: i64) -> serde_json::Value {
        let response = self
            .server
            .post("/v1/credits/purchase")
            .add_header("x-api-key", SERVICE_API_KEY)
            .json(&json!({
                "user_id": self.test_user_id.to_string(),
                "amount": amount,
                "price_usd": 5.0,
            }))
            .await;
        response.assert_status_ok();
        response.json()
    }

    /// Upsert a subscription for the test user.
    pub async fn subscribe(&self, balance: i64, grant: i64, rollover_limit: i64) {
        self.server
            .put("/v1/subscriptions")
            .add_header("x-api-key", SERVICE_API_KEY)
            .json(&json!({
                "id": "sub_test",
                "user_id": self.test_user_id.to_string(),
                "plan_code": "standard",
                "status": "active",
                "credits_balance": balance,
                "credits_grant_per_period": grant,
                "credits_rollover_limit": rollover_limit,
            }))
            .await
            .assert_status_ok();
    }

    /// Fetch the test user's balance.
    pub async fn balance(&self) -> serde_json::Value {
        let response = self
            .server
            .get("/v1/credits/balance")
            .add_header("authorization", self.user_auth_header())
            .await;
        response.assert_status_ok();
        response.json()
    }
}

impl Default for TestHarness {
    fn default() -> Self {
        Self::new()
    }
}

/// Signature header value for a webhook body.
pub fn sign(body: &[u8]) -> String {
    hmac_sha256_hex(WEBHOOK_SECRET.as_bytes(), body).expect("HMAC accepts any key length")
}
