//! Integration tests for `/ping` through controller, service and repository.

mod common;

use axum::{
    body::Body,
    http::{Request, StatusCode},
};
use basekit_api::{create_app, App, AppState, ErrorResponse};
use common::{wired_container, StubRepository, HTTP_CONFIG};
use std::time::Duration;
use tower::ServiceExt;

async fn app_for(repository: StubRepository) -> App {
    let container = wired_container(HTTP_CONFIG, repository);
    let state = AppState::from_container(&container).await.unwrap();
    create_app(state, Duration::from_secs(5))
}

async fn ping(app: App) -> (StatusCode, String) {
    let response = app
        .oneshot(Request::builder().uri("/ping").body(Body::empty()).unwrap())
        .await
        .unwrap();
    let status = response.status();
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    (status, String::from_utf8(body.to_vec()).unwrap())
}

#[tokio::test]
async fn test_healthy_database_returns_ok() {
    let repository = StubRepository::default();

    let (status, body) = ping(app_for(repository.clone()).await).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, r#"{"status":"ok"}"#);
    assert_eq!(repository.pings(), 1);
}

#[tokio::test]
async fn test_database_failure_returns_structured_error() {
    let repository = StubRepository::default();
    repository.fail_with("connection reset by peer");

    let (status, body) = ping(app_for(repository).await).await;

    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    let payload: ErrorResponse = serde_json::from_str(&body).unwrap();
    assert_eq!(payload.status, "error");
    assert!(payload.error.contains("connection reset by peer"));
}

#[tokio::test]
async fn test_recovered_database_is_reported_healthy_again() {
    let repository = StubRepository::default();
    let app = app_for(repository.clone()).await;

    repository.fail_with("timeout");
    let (status, _) = ping(app.clone()).await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);

    repository.recover();
    let (status, _) = ping(app).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(repository.pings(), 2);
}
