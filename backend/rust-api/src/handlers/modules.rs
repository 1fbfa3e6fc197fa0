use axum::{
    extract::{Extension, Multipart, Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use std::sync::Arc;

use super::read_multipart;
use crate::{
    error::AppResult,
    middlewares::auth::AuthUser,
    models::module::ListModulesQuery,
    services::{
        file_storage::resolve_urls,
        module_service::{ModuleService, ModuleUpload},
        AppState,
    },
};

/// POST /api/modules (multipart: `title`, `description`, `classId`, `file`)
pub async fn upload_module(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthUser>,
    multipart: Multipart,
) -> AppResult<impl IntoResponse> {
    let mut form = read_multipart(multipart).await?;
    let upload = form.require_file()?;
    let fields = ModuleUpload {
        title: form.take_field("title"),
        description: form.take_field("description"),
        class_id: form.take_field("classId"),
    };

    let service = ModuleService::new(state.mongo.clone());
    let module = service
        .upload_module(&user, fields, upload, state.files.as_ref())
        .await?;
    Ok((
        StatusCode::CREATED,
        Json(resolve_urls(state.files.as_ref(), module)),
    ))
}

/// GET /api/modules?classId=
pub async fn list_modules(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthUser>,
    Query(query): Query<ListModulesQuery>,
) -> AppResult<impl IntoResponse> {
    let service = ModuleService::new(state.mongo.clone());
    Ok(Json(resolve_urls(
        state.files.as_ref(),
        service.list_modules(&user, query).await?,
    )))
}

/// GET /api/modules/{id}
pub async fn get_module(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthUser>,
    Path(id): Path<String>,
) -> AppResult<impl IntoResponse> {
    let service = ModuleService::new(state.mongo.clone());
    Ok(Json(resolve_urls(
        state.files.as_ref(),
        service.get_module(&user, &id).await?,
    )))
}

/// DELETE /api/modules/{id}
pub async fn delete_module(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthUser>,
    Path(id): Path<String>,
) -> AppResult<impl IntoResponse> {
    let service = ModuleService::new(state.mongo.clone());
    service.delete_module(&user, &id, state.files.as_ref()).await?;
    Ok(StatusCode::NO_CONTENT)
}
