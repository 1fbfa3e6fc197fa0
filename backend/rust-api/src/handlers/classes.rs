use axum::{
    extract::{Extension, Path, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use std::sync::Arc;

use crate::{
    error::AppResult,
    extractors::ValidJson,
    middlewares::auth::AuthUser,
    models::class::{AddStudentsRequest, CreateClassRequest, UpdateClassRequest},
    services::{class_service::ClassService, AppState},
};

/// POST /api/class - Create a class (teacher or admin)
pub async fn create_class(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthUser>,
    ValidJson(req): ValidJson<CreateClassRequest>,
) -> AppResult<impl IntoResponse> {
    let service = ClassService::new(state.mongo.clone());
    let class = service.create_class(&user, req).await?;
    Ok((StatusCode::CREATED, Json(class)))
}

/// GET /api/class - Classes visible to the caller
pub async fn list_classes(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthUser>,
) -> AppResult<impl IntoResponse> {
    let service = ClassService::new(state.mongo.clone());
    Ok(Json(service.list_classes(&user).await?))
}

/// GET /api/class/{id}
pub async fn get_class(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthUser>,
    Path(id): Path<String>,
) -> AppResult<impl IntoResponse> {
    let service = ClassService::new(state.mongo.clone());
    Ok(Json(service.get_class(&user, &id).await?))
}

/// PUT /api/class/{id}
pub async fn update_class(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthUser>,
    Path(id): Path<String>,
    ValidJson(req): ValidJson<UpdateClassRequest>,
) -> AppResult<impl IntoResponse> {
    let service = ClassService::new(state.mongo.clone());
    Ok(Json(service.update_class(&user, &id, req).await?))
}

/// DELETE /api/class/{id} - Cascades to everything attached to the class
pub async fn delete_class(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthUser>,
    Path(id): Path<String>,
) -> AppResult<impl IntoResponse> {
    let service = ClassService::new(state.mongo.clone());
    service.delete_class(&user, &id, state.files.as_ref()).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// GET /api/class/{id}/students
pub async fn list_students(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthUser>,
    Path(id): Path<String>,
) -> AppResult<impl IntoResponse> {
    let service = ClassService::new(state.mongo.clone());
    Ok(Json(service.list_students(&user, &id).await?))
}

/// PUT /api/class/{id}/students - Enrol students, returns the roster
pub async fn add_students(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthUser>,
    Path(id): Path<String>,
    ValidJson(req): ValidJson<AddStudentsRequest>,
) -> AppResult<impl IntoResponse> {
    let service = ClassService::new(state.mongo.clone());
    Ok(Json(service.add_students(&user, &id, req).await?))
}

/// DELETE /api/class/{id}/students/{studentId}
pub async fn remove_student(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthUser>,
    Path((id, student_id)): Path<(String, String)>,
) -> AppResult<impl IntoResponse> {
    let service = ClassService::new(state.mongo.clone());
    Ok(Json(service.remove_student(&user, &id, &student_id).await?))
}
