//! Payment webhook integration tests.

mod common;

use common::{sign, TestHarness};
use serde_json::json;

fn paid_order(order_id: &str, credits: serde_json::Value) -> Vec<u8> {
    serde_json::to_vec(&json!({
        "type": "order.paid",
        "data": {
            "id": order_id,
            "total_amount": 999,
            "metadata": { "userId": "user_test", "credits": credits },
        },
    }))
    .unwrap()
}

#[tokio::test]
async fn signed_paid_order_credits_the_buyer() {
    let harness = TestHarness::new();
    let body = paid_order("ord_1", json!("500"));

    let response = harness
        .server
        .post("/webhooks/payments")
        .add_header("x-webhook-signature", format!("sha256={}", sign(&body)))
        .add_header("content-type", "application/json")
        .bytes(body.into())
        .await;

    response.assert_status_ok();
    let ack: serde_json::Value = response.json();
    assert_eq!(ack["received"], true);
    assert!(ack["purchase_id"].is_string());

    let balance = harness.balance().await;
    assert_eq!(balance["purchased"], 500);

    let purchases: serde_json::Value = harness
        .server
        .get("/v1/credits/purchases")
        .add_header("authorization", harness.user_auth_header())
        .await
        .json();
    assert_eq!(purchases["purchases"][0]["external_ref"], "ord_1");
    assert_eq!(purchases["purchases"][0]["price_usd"], 9.99);
}

#[tokio::test]
async fn bad_signature_is_rejected() {
    let harness = TestHarness::new();
    let body = paid_order("ord_1", json!(500));

    harness
        .server
        .post("/webhooks/payments")
        .add_header("x-webhook-signature", "deadbeef")
        .bytes(body.into())
        .await
        .assert_status_unauthorized();

    assert_eq!(harness.balance().await["purchased"], 0);
}

#[tokio::test]
async fn missing_signature_is_rejected() {
    let harness = TestHarness::new();

    harness
        .server
        .post("/webhooks/payments")
        .bytes(paid_order("ord_1", json!(500)).into())
        .await
        .assert_status_bad_request();
}

#[tokio::test]
async fn unsigned_webhooks_accepted_without_secret() {
    let harness = TestHarness::with_config(|config| config.payment_webhook_secret = None);

    harness
        .server
        .post("/webhooks/payments")
        .bytes(paid_order("ord_1", json!(25)).into())
        .await
        .assert_status_ok();

    assert_eq!(harness.balance().await["purchased"], 25);
}

#[tokio::test]
async fn other_event_types_are_acknowledged() {
    let harness = TestHarness::new();
    let body = serde_json::to_vec(&json!({ "type": "checkout.created", "data": {} })).unwrap();

    let response = harness
        .server
        .post("/webhooks/payments")
        .add_header("x-webhook-signature", sign(&body))
        .bytes(body.into())
        .await;

    response.assert_status_ok();
    let ack: serde_json::Value = response.json();
    assert_eq!(ack["received"], true);
    assert!(ack.get("purchase_id").is_none());
}

#[tokio::test]
async fn redelivered_order_is_not_credited_twice_with_dedupe() {
    let harness = TestHarness::with_config(|config| config.dedupe_purchases = true);
    let body = paid_order("ord_7", json!(100));

    for _ in 0..2 {
        harness
            .server
            .post("/webhooks/payments")
            .add_header("x-webhook-signature", sign(&body))
            .bytes(body.clone().into())
            .await
            .assert_status_ok();
    }

    assert_eq!(harness.balance().await["purchased"], 100);
}

#[tokio::test]
async fn zero_credit_order_is_acknowledged_without_credit() {
    let harness = TestHarness::new();
    let body = paid_order("ord_zero", json!(0));

    let response = harness
        .server
        .post("/webhooks/payments")
        .add_header("x-webhook-signature", sign(&body))
        .bytes(body.into())
        .await;

    response.assert_status_ok();
    let ack: serde_json::Value = response.json();
    assert_eq!(ack["received"], true);
    assert!(ack.get("purchase_id").is_none());
    assert_eq!(harness.balance().await["purchased"], 0);
}

#[tokio::test]
async fn order_without_metadata_is_acknowledged() {
    let harness = TestHarness::new();
    let body = serde_json::to_vec(&json!({
        "type": "order.paid",
        "data": { "id": "ord_2", "total_amount": 500 },
    }))
    .unwrap();

    let response = harness
        .server
        .post("/webhooks/payments")
        .add_header("x-webhook-signature", sign(&body))
        .bytes(body.into())
        .await;

    response.assert_status_ok();
    assert_eq!(response.json::<serde_json::Value>()["received"], true);
    assert_eq!(harness.balance().await["purchased"], 0);
}
