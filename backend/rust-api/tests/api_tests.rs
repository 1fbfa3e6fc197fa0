use axum::{
    body::Body,
    http::{header, Request, StatusCode},
};
use base64::{engine::general_purpose, Engine as _};
use mongodb::bson::oid::ObjectId;
use schooldesk_api::models::user::UserRole;
use serde_json::json;

mod common;

#[tokio::test]
async fn test_missing_token_is_unauthorized() {
    let app = common::create_test_app().await;

    let (status, body) = app
        .send(
            Request::builder()
                .uri("/api/class")
                .body(Body::empty())
                .unwrap(),
        )
        .await;

    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["error"], "unauthorized");
}

#[tokio::test]
async fn test_invalid_token_is_unauthorized() {
    let app = common::create_test_app().await;

    let (status, _) = app.get("/api/users/me", "not-a-jwt").await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_token_signed_with_other_secret_is_rejected() {
    let app = common::create_test_app().await;
    let foreign = schooldesk_api::middlewares::auth::JwtService::new("another-secret", 3600)
        .issue(&ObjectId::new(), UserRole::Admin)
        .unwrap();

    let (status, _) = app.get("/api/admin/stats", &foreign).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_login_validates_email() {
    let app = common::create_test_app().await;

    let (status, _) = app
        .send(
            Request::builder()
                .method("POST")
                .uri("/api/users/login")
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(
                    json!({ "email": "not-an-email", "password": "x" }).to_string(),
                ))
                .unwrap(),
        )
        .await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_metrics_requires_basic_auth() {
    let app = common::create_test_app().await;

    let (status, _) = app
        .send(Request::builder().uri("/metrics").body(Body::empty()).unwrap())
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let wrong = general_purpose::STANDARD.encode("metrics:wrong");
    let (status, _) = app
        .send(
            Request::builder()
                .uri("/metrics")
                .header(header::AUTHORIZATION, format!("Basic {}", wrong))
                .body(Body::empty())
                .unwrap(),
        )
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let right = general_purpose::STANDARD.encode("metrics:secret");
    let (status, body) = app
        .send(
            Request::builder()
                .uri("/metrics")
                .header(header::AUTHORIZATION, format!("Basic {}", right))
                .body(Body::empty())
                .unwrap(),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert!(body.as_str().unwrap().contains("http_requests_total"));
}

#[tokio::test]
async fn test_responses_carry_trace_id() {
    let app = common::create_test_app().await;

    let response = tower::ServiceExt::oneshot(
        app.router.clone(),
        Request::builder()
            .uri("/api/class")
            .header("x-trace-id", "trace-abc")
            .body(Body::empty())
            .unwrap(),
    )
    .await
    .unwrap();

    assert_eq!(response.headers()["x-trace-id"], "trace-abc");
}

#[tokio::test]
async fn test_unknown_route_is_not_found() {
    let app = common::create_test_app().await;
    let token = app.token(&ObjectId::new(), UserRole::Admin);

    let (status, _) = app.get("/api/nothing-here", &token).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}
