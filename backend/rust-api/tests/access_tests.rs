use axum::{
    body::Body,
    http::{header, StatusCode},
};
use mongodb::bson::oid::ObjectId;
use schooldesk_api::models::user::UserRole;
use serde_json::json;
use serial_test::serial;

mod common;

#[tokio::test]
#[serial]
#[ignore = "requires a running MongoDB"]
async fn test_student_cannot_create_class() {
    let app = common::create_test_app().await;
    let (_, token) = app.seed_user("Sam Student", UserRole::Student).await;

    let (status, body) = app
        .json("POST", "/api/class", &token, json!({ "className": "8-A Science" }))
        .await;

    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["error"], "forbidden");

    app.drop_database().await;
}

#[tokio::test]
#[serial]
#[ignore = "requires a running MongoDB"]
async fn test_teacher_cannot_use_admin_routes() {
    let app = common::create_test_app().await;
    let (_, token) = app.seed_user("Tina Teacher", UserRole::Teacher).await;

    let (status, _) = app.get("/api/admin/stats", &token).await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, _) = app.get("/api/users", &token).await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    app.drop_database().await;
}

#[tokio::test]
#[serial]
#[ignore = "requires a running MongoDB"]
async fn test_student_cannot_delete_users() {
    let app = common::create_test_app().await;
    let (_, token) = app.seed_user("Sam Student", UserRole::Student).await;

    let (status, _) = app
        .delete(&format!("/api/users/{}", ObjectId::new().to_hex()), &token)
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    app.drop_database().await;
}

#[tokio::test]
#[serial]
#[ignore = "requires a running MongoDB"]
async fn test_request_validation_errors_are_bad_request() {
    let app = common::create_test_app().await;
    let (_, token) = app.seed_user("Tina Teacher", UserRole::Teacher).await;

    let (status, body) = app
        .json("POST", "/api/class", &token, json!({ "className": "" }))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "bad_request");

    let (status, _) = app
        .json(
            "POST",
            "/api/class",
            &token,
            json!({ "className": "Math", "time": "25:00" }),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = app
        .json("POST", "/api/attendance/mark", &token, json!([]))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, body) = app
        .send(
            common::authed("POST", "/api/tasks", &token)
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from("{not json"))
                .unwrap(),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["message"]
        .as_str()
        .unwrap()
        .contains("Failed to parse JSON"));

    app.drop_database().await;
}

#[tokio::test]
#[serial]
#[ignore = "requires a running MongoDB"]
async fn test_token_of_deleted_account_is_rejected() {
    let app = common::create_test_app().await;
    let forged = app.token(&ObjectId::new(), UserRole::Admin);

    let (status, body) = app.get("/api/users/me", &forged).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["error"], "unauthorized");

    app.drop_database().await;
}

#[tokio::test]
#[serial]
#[ignore = "requires a running MongoDB"]
async fn test_deactivated_user_is_locked_out_immediately() {
    let app = common::create_test_app().await;
    let (_, admin) = app.seed_user("Ada Admin", UserRole::Admin).await;
    let (teacher_id, teacher) = app.seed_user("Tina Teacher", UserRole::Teacher).await;

    let (status, _) = app.get("/api/users/me", &teacher).await;
    assert_eq!(status, StatusCode::OK);

    let (status, _) = app
        .json(
            "PATCH",
            &format!("/api/users/{}", teacher_id.to_hex()),
            &admin,
            json!({ "active": false }),
        )
        .await;
    assert_eq!(status, StatusCode::OK);

    // Same, still unexpired token
    let (status, body) = app.get("/api/users/me", &teacher).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["message"], "Account is deactivated");

    app.drop_database().await;
}

#[tokio::test]
#[serial]
#[ignore = "requires a running MongoDB"]
async fn test_demoted_admin_loses_admin_routes() {
    let app = common::create_test_app().await;
    let (_, admin) = app.seed_user("Ada Admin", UserRole::Admin).await;
    let (other_id, other_admin) = app.seed_user("Otto Admin", UserRole::Admin).await;

    let (status, _) = app.get("/api/admin/stats", &other_admin).await;
    assert_eq!(status, StatusCode::OK);

    let (status, _) = app
        .json(
            "PATCH",
            &format!("/api/users/{}", other_id.to_hex()),
            &admin,
            json!({ "role": "teacher" }),
        )
        .await;
    assert_eq!(status, StatusCode::OK);

    // The token still claims admin; the stored role decides
    let (status, _) = app.get("/api/admin/stats", &other_admin).await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    app.drop_database().await;
}
