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
    models::task::{CreateTaskRequest, UpdateTaskRequest},
    services::{task_service::TaskService, AppState},
};

/// GET /api/tasks
pub async fn list_tasks(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthUser>,
) -> AppResult<impl IntoResponse> {
    let service = TaskService::new(state.mongo.clone());
    Ok(Json(service.list_tasks(&user).await?))
}

/// POST /api/tasks
pub async fn create_task(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthUser>,
    ValidJson(req): ValidJson<CreateTaskRequest>,
) -> AppResult<impl IntoResponse> {
    let service = TaskService::new(state.mongo.clone());
    let task = service.create_task(&user, req).await?;
    Ok((StatusCode::CREATED, Json(task)))
}

/// PUT /api/tasks/{id}
pub async fn update_task(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthUser>,
    Path(id): Path<String>,
    ValidJson(req): ValidJson<UpdateTaskRequest>,
) -> AppResult<impl IntoResponse> {
    let service = TaskService::new(state.mongo.clone());
    Ok(Json(service.update_task(&user, &id, req).await?))
}

/// DELETE /api/tasks/{id}
pub async fn delete_task(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthUser>,
    Path(id): Path<String>,
) -> AppResult<impl IntoResponse> {
    let service = TaskService::new(state.mongo.clone());
    service.delete_task(&user, &id).await?;
    Ok(StatusCode::NO_CONTENT)
}
