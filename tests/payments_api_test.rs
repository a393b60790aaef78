mod common;

use axum::{
    body::Body,
    http::{Request, StatusCode},
};
use common::{seed_cart_line, seed_course, TestApp};
use hmac::{Hmac, Mac};
use rust_decimal_macros::dec;
use serde_json::{json, Value};
use sha2::Sha256;
use tower::ServiceExt;
use uuid::Uuid;

use learnhub_api::entities::cart_line::ApprovalStatus;

async fn body_json(response: axum::response::Response) -> Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

fn post_json(uri: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

/// Full flow over HTTP: checkout, then the PAID webhook, then the redundant
/// browser return.
#[tokio::test]
async fn checkout_and_webhook_roundtrip() {
    let app = TestApp::new().await;
    let buyer = Uuid::new_v4();
    let learner = Uuid::new_v4();
    let course = seed_course(&app, Uuid::new_v4(), "Drawing", dec!(18)).await;
    let line = seed_cart_line(&app, buyer, learner, course.id, ApprovalStatus::ParentApproved).await;

    let response = app
        .router()
        .oneshot(post_json(
            "/api/v1/checkout",
            json!({
                "buyer_id": buyer,
                "cart_line_ids": [line.id],
                "description": "Drawing course"
            }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CREATED);
    let checkout = body_json(response).await;
    let tracking_code = checkout["tracking_code"].as_i64().unwrap();
    assert!(checkout["checkout_url"].as_str().unwrap().contains("gateway.test"));

    let response = app
        .router()
        .oneshot(post_json(
            "/api/v1/payments/webhook",
            json!({ "tracking_code": tracking_code, "status": "PAID" }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let settled = body_json(response).await;
    assert_eq!(settled["status"], "completed");
    assert_eq!(settled["tracking_code"].as_i64().unwrap(), tracking_code);

    // Browser return after the webhook already settled: same outcome, no error.
    let response = app
        .router()
        .oneshot(
            Request::builder()
                .uri(format!("/api/v1/payments/return/{}", tracking_code))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let returned = body_json(response).await;
    assert_eq!(returned["status"], "completed");
}

#[tokio::test]
async fn webhook_accepts_string_tracking_code() {
    let app = TestApp::new().await;
    let buyer = Uuid::new_v4();
    let course = seed_course(&app, Uuid::new_v4(), "Piano", dec!(40)).await;
    let line =
        seed_cart_line(&app, buyer, Uuid::new_v4(), course.id, ApprovalStatus::AddedByPayer).await;

    let response = app
        .router()
        .oneshot(post_json(
            "/api/v1/checkout",
            json!({ "buyer_id": buyer, "cart_line_ids": [line.id] }),
        ))
        .await
        .unwrap();
    let tracking_code = body_json(response).await["tracking_code"].as_i64().unwrap();

    let response = app
        .router()
        .oneshot(post_json(
            "/api/v1/payments/webhook",
            json!({ "tracking_code": tracking_code.to_string(), "status": "cancelled" }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_json(response).await["status"], "cancelled");
}

#[tokio::test]
async fn webhook_with_unknown_status_is_bad_request() {
    let app = TestApp::new().await;
    let response = app
        .router()
        .oneshot(post_json(
            "/api/v1/payments/webhook",
            json!({ "tracking_code": 12345, "status": "REFUNDED" }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn webhook_for_unknown_payment_is_not_found() {
    let app = TestApp::new().await;
    let response = app
        .router()
        .oneshot(post_json(
            "/api/v1/payments/webhook",
            json!({ "tracking_code": 424242, "status": "PAID" }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn checkout_requires_cart_lines() {
    let app = TestApp::new().await;
    let response = app
        .router()
        .oneshot(post_json(
            "/api/v1/checkout",
            json!({ "buyer_id": Uuid::new_v4(), "cart_line_ids": [] }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn foreign_cart_line_is_forbidden_over_http() {
    let app = TestApp::new().await;
    let owner = Uuid::new_v4();
    let course = seed_course(&app, Uuid::new_v4(), "Chess", dec!(8)).await;
    let line =
        seed_cart_line(&app, owner, Uuid::new_v4(), course.id, ApprovalStatus::ParentApproved).await;

    let response = app
        .router()
        .oneshot(post_json(
            "/api/v1/checkout",
            json!({ "buyer_id": Uuid::new_v4(), "cart_line_ids": [line.id] }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
}

/// With a configured webhook secret, unsigned deliveries are rejected before
/// touching any state and signed ones settle normally.
#[tokio::test]
async fn webhook_signature_is_enforced_when_configured() {
    let secret = "webhook-test-secret";
    let app = TestApp::with_webhook_secret(secret).await;
    let buyer = Uuid::new_v4();
    let course = seed_course(&app, Uuid::new_v4(), "Pottery", dec!(22)).await;
    let line =
        seed_cart_line(&app, buyer, Uuid::new_v4(), course.id, ApprovalStatus::ParentApproved).await;

    let response = app
        .router()
        .oneshot(post_json(
            "/api/v1/checkout",
            json!({ "buyer_id": buyer, "cart_line_ids": [line.id] }),
        ))
        .await
        .unwrap();
    let tracking_code = body_json(response).await["tracking_code"].as_i64().unwrap();
    let payload = json!({ "tracking_code": tracking_code, "status": "PAID" }).to_string();

    // Unsigned: rejected.
    let response = app
        .router()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/api/v1/payments/webhook")
                .header("content-type", "application/json")
                .body(Body::from(payload.clone()))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    // Signed: accepted.
    let ts = chrono::Utc::now().timestamp().to_string();
    let mut mac = Hmac::<Sha256>::new_from_slice(secret.as_bytes()).unwrap();
    mac.update(format!("{}.{}", ts, payload).as_bytes());
    let signature = hex::encode(mac.finalize().into_bytes());

    let response = app
        .router()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/api/v1/payments/webhook")
                .header("content-type", "application/json")
                .header("x-timestamp", ts)
                .header("x-signature", signature)
                .body(Body::from(payload))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_json(response).await["status"], "completed");
}

#[tokio::test]
async fn cancel_redirect_closes_the_payment() {
    let app = TestApp::new().await;
    let buyer = Uuid::new_v4();
    let course = seed_course(&app, Uuid::new_v4(), "Sailing", dec!(60)).await;
    let line =
        seed_cart_line(&app, buyer, Uuid::new_v4(), course.id, ApprovalStatus::AddedByPayer).await;

    let response = app
        .router()
        .oneshot(post_json(
            "/api/v1/checkout",
            json!({ "buyer_id": buyer, "cart_line_ids": [line.id] }),
        ))
        .await
        .unwrap();
    let tracking_code = body_json(response).await["tracking_code"].as_i64().unwrap();

    let response = app
        .router()
        .oneshot(
            Request::builder()
                .uri(format!("/api/v1/payments/cancel/{}", tracking_code))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_json(response).await["status"], "cancelled");
}

#[tokio::test]
async fn health_endpoint_reports_ok() {
    let app = TestApp::new().await;
    let response = app
        .router()
        .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}
