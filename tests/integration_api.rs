//! API Integration Tests

use axum::{
    body::Body,
    http::{Request, StatusCode},
    Router,
};
use http_body_util::BodyExt;
use serde_json::{json, Value};
use tower::util::ServiceExt;
use uuid::Uuid;

use creator_ledger::api::{build_router, AppState};

mod common;
use common::*;

fn app(env: &TestEnv) -> Router {
    build_router(AppState::new(env.service.clone()))
}

async fn body_json(response: axum::response::Response) -> Value {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap()
}

#[tokio::test]
async fn test_health() {
    let env = TestEnv::new();

    let response = app(&env)
        .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_aggregate_month_endpoint() {
    let env = TestEnv::new();
    env.store
        .insert_transactions(vec![
            chat_earning("t1", "creator-1", 100, at(2026, 3, 2)),
            call_earning("t2", "creator-1", 50, at(2026, 3, 3)),
        ])
        .await;
    let correlation_id = Uuid::new_v4();

    let req = Request::builder()
        .method("POST")
        .uri("/api/v1/earnings/creator-1/2026/3?force=true")
        .header("X-Correlation-Id", correlation_id.to_string())
        .body(Body::empty())
        .unwrap();
    let response = app(&env).oneshot(req).await.unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.headers()["x-correlation-id"].to_str().unwrap(),
        correlation_id.to_string()
    );

    let body = body_json(response).await;
    assert_eq!(body["userId"], "creator-1");
    assert_eq!(body["netEarned"], 150);
    assert_eq!(body["creatorShare"], 105);
    assert_eq!(body["platformShare"], 45);

    // Audit entry carries the request's correlation id
    let runs = env.service.audit().recent(10).await.unwrap();
    assert_eq!(runs[0].correlation_id, Some(correlation_id));
    assert_eq!(runs[0].trigger.as_str(), "api");
}

#[tokio::test]
async fn test_invalid_month_is_bad_request() {
    let env = TestEnv::new();

    let req = Request::builder()
        .method("POST")
        .uri("/api/v1/earnings/creator-1/2026/13")
        .body(Body::empty())
        .unwrap();
    let response = app(&env).oneshot(req).await.unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body = body_json(response).await;
    assert_eq!(body["error_code"], "invalid_request");
    assert!(body["correlation_id"].is_string());
}

#[tokio::test]
async fn test_platform_endpoint() {
    let env = TestEnv::new();
    env.store
        .insert_transaction(event_earning("t1", "creator-1", 200, at(2026, 3, 4)))
        .await;

    let req = Request::builder()
        .method("POST")
        .uri("/api/v1/platform/2026/3")
        .body(Body::empty())
        .unwrap();
    let response = app(&env).oneshot(req).await.unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["gmvTokens"], 200);
    assert_eq!(body["netRevenueTokens"], 40);
}

#[tokio::test]
async fn test_detect_endpoint() {
    let env = TestEnv::new();
    env.store
        .insert_transaction(purchase("t1", "user-1", 100, at(2026, 1, 5)))
        .await;
    env.store.put_wallet(wallet("user-1", 150)).await;

    let req = Request::builder()
        .method("POST")
        .uri("/api/v1/anomalies/detect")
        .header("content-type", "application/json")
        .body(Body::from(json!({ "user_id": "user-1" }).to_string()))
        .unwrap();
    let response = app(&env).oneshot(req).await.unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["anomalies"].as_array().unwrap().len(), 1);
    assert_eq!(body["anomalies"][0]["type"], "balance-mismatch");
    assert_eq!(body["usersChecked"], 1);
}

#[tokio::test]
async fn test_detect_rejects_half_period() {
    let env = TestEnv::new();

    let req = Request::builder()
        .method("POST")
        .uri("/api/v1/anomalies/detect")
        .header("content-type", "application/json")
        .body(Body::from(json!({ "month": 3 }).to_string()))
        .unwrap();
    let response = app(&env).oneshot(req).await.unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_detect_rejects_empty_user_id() {
    let env = TestEnv::new();
    env.store.put_wallet(wallet("user-1", 150)).await;

    let req = Request::builder()
        .method("POST")
        .uri("/api/v1/anomalies/detect")
        .header("content-type", "application/json")
        .body(Body::from(json!({ "user_id": "" }).to_string()))
        .unwrap();
    let response = app(&env).oneshot(req).await.unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body = body_json(response).await;
    assert_eq!(body["error_code"], "invalid_request");
}

#[tokio::test]
async fn test_summary_endpoint() {
    let env = TestEnv::new();
    env.store
        .insert_transaction(chat_earning("t1", "creator-1", 100, at(2026, 3, 2)))
        .await;
    env.store.put_wallet(wallet("creator-1", 100)).await;

    let req = Request::builder()
        .uri("/api/v1/users/creator-1/summary")
        .body(Body::empty())
        .unwrap();
    let response = app(&env).oneshot(req).await.unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["tokensBalance"], 100);
    assert_eq!(body["currentMonth"]["creatorShare"], 65);
    assert_eq!(body["lifetimeCreatorShare"], 65);
}

#[tokio::test]
async fn test_unavailable_store_hides_cause() {
    let env = TestEnv::new();
    env.store.set_unavailable(true).await;

    let req = Request::builder()
        .method("POST")
        .uri("/api/v1/platform/2026/3?force=true")
        .body(Body::empty())
        .unwrap();
    let response = app(&env).oneshot(req).await.unwrap();

    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    let body = body_json(response).await;
    assert_eq!(body["error_code"], "store_unavailable");
    assert!(!body["error"].as_str().unwrap().contains("in-memory"));
}
