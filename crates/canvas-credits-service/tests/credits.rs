//! Credit balance, consumption, purchase and history integration tests.

mod common;

use common::{TestHarness, ADMIN_API_KEY, SERVICE_API_KEY};
use futures::future::join_all;
use serde_json::json;

// ============================================================================
// Balance
// ============================================================================

#[tokio::test]
async fn balance_of_new_user_is_zero() {
    let harness = TestHarness::new();

    let body = harness.balance().await;

    assert_eq!(body["balance"], 0);
    assert_eq!(body["subscription"], 0);
    assert_eq!(body["purchased"], 0);
}

#[tokio::test]
async fn balance_without_auth_fails() {
    let harness = TestHarness::new();

    harness
        .server
        .get("/v1/credits/balance")
        .await
        .assert_status_unauthorized();
}

#[tokio::test]
async fn balance_splits_subscription_and_purchased() {
    let harness = TestHarness::new();
    harness.subscribe(5, 0, 0).await;
    harness.purchase(10).await;

    let body = harness.balance().await;

    assert_eq!(body["balance"], 15);
    assert_eq!(body["subscription"], 5);
    assert_eq!(body["purchased"], 10);
}

#[tokio::test]
async fn service_reads_any_user_balance() {
    let harness = TestHarness::new();
    harness.purchase(40).await;

    let response = harness
        .server
        .get(&format!("/v1/users/{}/balance", harness.test_user_id))
        .add_header("x-api-key", SERVICE_API_KEY)
        .await;

    response.assert_status_ok();
    let body: serde_json::Value = response.json();
    assert_eq!(body["balance"], 40);
}

#[tokio::test]
async fn user_balance_requires_service_key() {
    let harness = TestHarness::new();

    harness
        .server
        .get(&format!("/v1/users/{}/balance", harness.test_user_id))
        .add_header("x-api-key", "wrong-key")
        .await
        .assert_status_unauthorized();
}

// ============================================================================
// Consumption
// ============================================================================

#[tokio::test]
async fn consume_drains_subscription_first() {
    let harness = TestHarness::new();
    harness.subscribe(5, 0, 0).await;
    harness.purchase(10).await;

    let response = harness
        .server
        .post("/v1/credits/consume")
        .add_header("x-api-key", SERVICE_API_KEY)
        .add_header("x-service-name", "generation-worker")
        .json(&json!({ "user_id": "user_test", "amount": 8 }))
        .await;

    response.assert_status_ok();
    let body: serde_json::Value = response.json();
    assert_eq!(body["ok"], true);
    assert_eq!(body["balance"], 7);

    let balance = harness.balance().await;
    assert_eq!(balance["subscription"], 0);
    assert_eq!(balance["purchased"], 7);
}

#[tokio::test]
async fn consume_insufficient_returns_payment_required() {
    let harness = TestHarness::new();
    harness.subscribe(2, 0, 0).await;
    harness.purchase(3).await;

    let response = harness
        .server
        .post("/v1/credits/consume")
        .add_header("x-api-key", SERVICE_API_KEY)
        .json(&json!({ "user_id": "user_test", "amount": 6 }))
        .await;

    response.assert_status(axum::http::StatusCode::PAYMENT_REQUIRED);
    let body: serde_json::Value = response.json();
    assert_eq!(body["ok"], false);
    assert_eq!(body["error"], "insufficient-credits");
    assert_eq!(body["balance"], 5);

    // Nothing was deducted.
    assert_eq!(harness.balance().await["balance"], 5);
}

#[tokio::test]
async fn consume_rejects_non_positive_amount() {
    let harness = TestHarness::new();

    for amount in [0, -3] {
        let response = harness
            .server
            .post("/v1/credits/consume")
            .add_header("x-api-key", SERVICE_API_KEY)
            .json(&json!({ "user_id": "user_test", "amount": amount }))
            .await;

        response.assert_status_bad_request();
        let body: serde_json::Value = response.json();
        assert_eq!(body["error"], "invalid-amount");
    }
}

#[tokio::test]
async fn consume_with_repeated_key_is_idempotent() {
    let harness = TestHarness::new();
    harness.purchase(10).await;

    let request = json!({ "user_id": "user_test", "amount": 4, "idempotency_key": "job-1" });

    let first = harness
        .server
        .post("/v1/credits/consume")
        .add_header("x-api-key", SERVICE_API_KEY)
        .json(&request)
        .await;
    first.assert_status_ok();
    assert_eq!(first.json::<serde_json::Value>()["balance"], 6);

    let second = harness
        .server
        .post("/v1/credits/consume")
        .add_header("x-api-key", SERVICE_API_KEY)
        .json(&request)
        .await;
    second.assert_status_ok();
    let body: serde_json::Value = second.json();
    assert_eq!(body["ok"], true);
    assert_eq!(body["idempotent"], true);

    assert_eq!(harness.balance().await["balance"], 6);
}

#[tokio::test]
async fn consume_with_empty_reason_records_usage() {
    let harness = TestHarness::new();
    harness.purchase(10).await;

    let response = harness
        .server
        .post("/v1/credits/consume")
        .add_header("x-api-key", SERVICE_API_KEY)
        .json(&json!({ "user_id": "user_test", "amount": 2, "reason": "" }))
        .await;

    response.assert_status_ok();
    assert_eq!(response.json::<serde_json::Value>()["balance"], 8);

    let ledger: serde_json::Value = harness
        .server
        .get("/v1/credits/ledger?limit=1")
        .add_header("authorization", harness.user_auth_header())
        .await
        .json();
    assert_eq!(ledger["entries"][0]["entry_type"], "consume");
    assert_eq!(ledger["entries"][0]["reason"], "usage");
}

#[tokio::test]
async fn consume_rejects_oversized_reason() {
    let harness = TestHarness::new();
    harness.purchase(10).await;

    harness
        .server
        .post("/v1/credits/consume")
        .add_header("x-api-key", SERVICE_API_KEY)
        .json(&json!({ "user_id": "user_test", "amount": 1, "reason": "x".repeat(300) }))
        .await
        .assert_status_bad_request();

    assert_eq!(harness.balance().await["balance"], 10);
}

#[tokio::test]
async fn consume_requires_service_key() {
    let harness = TestHarness::new();

    harness
        .server
        .post("/v1/credits/consume")
        .json(&json!({ "user_id": "user_test", "amount": 1 }))
        .await
        .assert_status_unauthorized();
}

#[tokio::test]
async fn concurrent_consumes_never_overdraw() {
    let harness = TestHarness::new();
    harness.purchase(10).await;

    let responses = join_all((0..20).map(|_| async {
        harness
            .server
            .post("/v1/credits/consume")
            .add_header("x-api-key", SERVICE_API_KEY)
            .json(&json!({ "user_id": "user_test", "amount": 1 }))
            .await
    }))
    .await;

    let succeeded = responses
        .iter()
        .filter(|r| r.status_code().is_success())
        .count();
    assert_eq!(succeeded, 10);
    assert_eq!(harness.balance().await["balance"], 0);
}

#[tokio::test]
async fn concurrent_retries_with_one_key_consume_once() {
    let harness = TestHarness::new();
    harness.purchase(10).await;

    let responses = join_all((0..8).map(|_| async {
        harness
            .server
            .post("/v1/credits/consume")
            .add_header("x-api-key", SERVICE_API_KEY)
            .json(&json!({ "user_id": "user_test", "amount": 3, "idempotency_key": "job-9" }))
            .await
    }))
    .await;

    let bodies: Vec<serde_json::Value> = responses
        .iter()
        .map(|r| {
            r.assert_status_ok();
            r.json()
        })
        .collect();
    let replays = bodies.iter().filter(|b| b["idempotent"] == true).count();
    assert_eq!(replays, 7);
    assert_eq!(harness.balance().await["balance"], 7);
}

// ============================================================================
// Purchases
// ============================================================================

#[tokio::test]
async fn purchase_credits_and_list_history() {
    let harness = TestHarness::new();

    let receipt = harness.purchase(100).await;
    assert_eq!(receipt["balance"], 100);
    assert_eq!(receipt["duplicate"], false);
    harness.purchase(50).await;

    let response = harness
        .server
        .get("/v1/credits/purchases")
        .add_header("authorization", harness.user_auth_header())
        .await;

    response.assert_status_ok();
    let body: serde_json::Value = response.json();
    let purchases = body["purchases"].as_array().unwrap();
    assert_eq!(purchases.len(), 2);
    // Newest first.
    assert_eq!(purchases[0]["amount"], 50);
    assert_eq!(purchases[1]["amount"], 100);
    assert_eq!(body["has_more"], false);
}

#[tokio::test]
async fn purchase_rejects_invalid_amount() {
    let harness = TestHarness::new();

    harness
        .server
        .post("/v1/credits/purchase")
        .add_header("x-api-key", SERVICE_API_KEY)
        .json(&json!({ "user_id": "user_test", "amount": 0, "price_usd": 1.0 }))
        .await
        .assert_status_bad_request();
}

#[tokio::test]
async fn repeated_external_ref_is_deduplicated_when_enabled() {
    let harness = TestHarness::with_config(|config| config.dedupe_purchases = true);
    let request = json!({
        "user_id": "user_test",
        "amount": 100,
        "price_usd": 5.0,
        "external_ref": "ord_1",
    });

    let first: serde_json::Value = harness
        .server
        .post("/v1/credits/purchase")
        .add_header("x-api-key", SERVICE_API_KEY)
        .json(&request)
        .await
        .json();
    let second: serde_json::Value = harness
        .server
        .post("/v1/credits/purchase")
        .add_header("x-api-key", SERVICE_API_KEY)
        .json(&request)
        .await
        .json();

    assert_eq!(second["duplicate"], true);
    assert_eq!(second["purchase_id"], first["purchase_id"]);
    assert_eq!(harness.balance().await["purchased"], 100);
}

// ============================================================================
// Ledger
// ============================================================================

#[tokio::test]
async fn ledger_lists_entries_newest_first_with_pagination() {
    let harness = TestHarness::new();
    harness.purchase(10).await;
    for _ in 0..3 {
        harness
            .server
            .post("/v1/credits/consume")
            .add_header("x-api-key", SERVICE_API_KEY)
            .json(&json!({ "user_id": "user_test", "amount": 1, "reason": "image" }))
            .await
            .assert_status_ok();
    }

    let response = harness
        .server
        .get("/v1/credits/ledger?limit=2")
        .add_header("authorization", harness.user_auth_header())
        .await;

    response.assert_status_ok();
    let body: serde_json::Value = response.json();
    let entries = body["entries"].as_array().unwrap();
    assert_eq!(entries.len(), 2);
    assert_eq!(body["has_more"], true);
    assert_eq!(entries[0]["entry_type"], "consume");
    assert_eq!(entries[0]["reason"], "image");
    assert_eq!(entries[0]["meta"]["next"], 7);

    let rest: serde_json::Value = harness
        .server
        .get("/v1/credits/ledger?limit=2&offset=2")
        .add_header("authorization", harness.user_auth_header())
        .await
        .json();
    let rest = rest["entries"].as_array().unwrap();
    assert_eq!(rest.len(), 2);
    assert_eq!(rest[1]["entry_type"], "purchase");
}

// ============================================================================
// Admin adjustments
// ============================================================================

#[tokio::test]
async fn admin_adjusts_purchased_credits() {
    let harness = TestHarness::new();
    harness.purchase(10).await;

    let response = harness
        .server
        .post("/v1/credits/adjust")
        .add_header("x-admin-key", ADMIN_API_KEY)
        .add_header("x-admin-id", "support-1")
        .json(&json!({ "user_id": "user_test", "delta": -4, "reason": "refund" }))
        .await;

    response.assert_status_ok();
    let body: serde_json::Value = response.json();
    assert_eq!(body["prev"], 10);
    assert_eq!(body["next"], 6);
}

#[tokio::test]
async fn adjust_below_zero_is_rejected() {
    let harness = TestHarness::new();
    harness.purchase(3).await;

    harness
        .server
        .post("/v1/credits/adjust")
        .add_header("x-admin-key", ADMIN_API_KEY)
        .json(&json!({ "user_id": "user_test", "delta": -4, "reason": "refund" }))
        .await
        .assert_status(axum::http::StatusCode::PAYMENT_REQUIRED);
}

#[tokio::test]
async fn adjust_requires_admin_key() {
    let harness = TestHarness::new();

    harness
        .server
        .post("/v1/credits/adjust")
        .add_header("x-api-key", SERVICE_API_KEY)
        .json(&json!({ "user_id": "user_test", "delta": 5, "reason": "gift" }))
        .await
        .assert_status_unauthorized();
}
