//! API integration tests for the keyward-server operational endpoints.

use axum::{
    body::Body,
    http::{Request, StatusCode},
    Router,
};
use keyward_server::{create_router, AppState, Config, ErrorCategory};
use serde_json::Value;
use tower::ServiceExt;

/// Build the test router on in-memory storage
fn create_test_app() -> Router {
    create_router(AppState::in_memory(Config::default()).unwrap())
}

async fn get_json(app: Router, uri: &str) -> (StatusCode, Value) {
    let response = app
        .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
        .await
        .unwrap();
    let status = response.status();
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    (status, serde_json::from_slice(&body).unwrap())
}

#[tokio::test]
async fn test_health_endpoint_returns_ok() {
    let (status, json) = get_json(create_test_app(), "/health").await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["status"], "healthy");
    assert_eq!(json["storage"], "memory");
    assert_eq!(json["service"], "keyward-server");
    assert!(json["version"].is_string());
}

#[tokio::test]
async fn test_ready_endpoint_returns_ok() {
    let (status, json) = get_json(create_test_app(), "/ready").await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["ready"], true);
    assert!(json.get("message").is_none());
}

#[tokio::test]
async fn test_unknown_route_is_not_found() {
    let response = create_test_app()
        .oneshot(Request::builder().uri("/verify").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_invalid_proximity_length_is_rejected_at_build() {
    let config = Config {
        proximity_otp_length: 4,
        ..Config::default()
    };
    let Err(err) = AppState::in_memory(config) else {
        panic!("proximity length 4 should be rejected");
    };
    assert_eq!(err.category(), ErrorCategory::Configuration);
}

#[tokio::test]
async fn test_out_of_range_durations_are_configuration_errors() {
    let config = Config {
        request_expiration: std::time::Duration::MAX,
        ..Config::default()
    };
    let Err(err) = AppState::in_memory(config) else {
        panic!("unbounded request expiration should be rejected");
    };
    assert_eq!(err.category(), ErrorCategory::Configuration);
    assert_eq!(err.error_code(), "INVALID_CONFIGURATION");

    let config = Config {
        activation_validity: std::time::Duration::MAX,
        ..Config::default()
    };
    let Err(err) = AppState::in_memory(config) else {
        panic!("unbounded activation validity should be rejected");
    };
    assert_eq!(err.category(), ErrorCategory::Configuration);
}
