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
    extractors::{AppJson, ValidJson},
    middlewares::auth::AuthUser,
    models::{
        announcement::{
            CreateAnnouncementRequest, CreateCommentRequest, ListAnnouncementsQuery, ReactRequest,
            UpdateAnnouncementRequest,
        },
        Paging,
    },
    services::{announcement_service::AnnouncementService, file_storage::resolve_urls, AppState},
};

/// POST /api/announcements - Post to a class, or school-wide (Admin)
pub async fn create_announcement(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthUser>,
    ValidJson(req): ValidJson<CreateAnnouncementRequest>,
) -> AppResult<impl IntoResponse> {
    let service = AnnouncementService::new(state.mongo.clone());
    let created = service.create(&user, req).await?;
    Ok((StatusCode::CREATED, Json(created)))
}

/// GET /api/announcements
pub async fn list_announcements(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthUser>,
    Query(query): Query<ListAnnouncementsQuery>,
) -> AppResult<impl IntoResponse> {
    let service = AnnouncementService::new(state.mongo.clone());
    Ok(Json(resolve_urls(
        state.files.as_ref(),
        service.list(&user, query).await?,
    )))
}

/// GET /api/announcements/{id} - Also records the caller as a viewer
pub async fn get_announcement(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthUser>,
    Path(id): Path<String>,
) -> AppResult<impl IntoResponse> {
    let service = AnnouncementService::new(state.mongo.clone());
    Ok(Json(resolve_urls(
        state.files.as_ref(),
        service.get(&user, &id).await?,
    )))
}

/// PUT /api/announcements/{id}
pub async fn update_announcement(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthUser>,
    Path(id): Path<String>,
    ValidJson(req): ValidJson<UpdateAnnouncementRequest>,
) -> AppResult<impl IntoResponse> {
    let service = AnnouncementService::new(state.mongo.clone());
    Ok(Json(resolve_urls(
        state.files.as_ref(),
        service.update(&user, &id, req).await?,
    )))
}

/// DELETE /api/announcements/{id}
pub async fn delete_announcement(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthUser>,
    Path(id): Path<String>,
) -> AppResult<impl IntoResponse> {
    let service = AnnouncementService::new(state.mongo.clone());
    service.delete(&user, &id, state.files.as_ref()).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// GET /api/announcements/{id}/comments?limit=&offset=
pub async fn list_comments(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthUser>,
    Path(id): Path<String>,
    Query(paging): Query<Paging>,
) -> AppResult<impl IntoResponse> {
    let service = AnnouncementService::new(state.mongo.clone());
    Ok(Json(service.list_comments(&user, &id, paging).await?))
}

/// POST /api/announcements/{id}/comments
pub async fn add_comment(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthUser>,
    Path(id): Path<String>,
    ValidJson(req): ValidJson<CreateCommentRequest>,
) -> AppResult<impl IntoResponse> {
    let service = AnnouncementService::new(state.mongo.clone());
    let comment = service.add_comment(&user, &id, req).await?;
    Ok((StatusCode::CREATED, Json(comment)))
}

/// DELETE /api/announcements/{id}/comments/{commentId}
pub async fn delete_comment(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthUser>,
    Path((id, comment_id)): Path<(String, String)>,
) -> AppResult<impl IntoResponse> {
    let service = AnnouncementService::new(state.mongo.clone());
    service.delete_comment(&user, &id, &comment_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// POST /api/announcements/{id}/reactions - Toggle the caller's reaction
pub async fn react(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthUser>,
    Path(id): Path<String>,
    AppJson(req): AppJson<ReactRequest>,
) -> AppResult<impl IntoResponse> {
    let service = AnnouncementService::new(state.mongo.clone());
    Ok(Json(service.react(&user, &id, req.kind).await?))
}

/// POST /api/announcements/{id}/attachments (multipart, field `file`)
pub async fn add_attachment(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthUser>,
    Path(id): Path<String>,
    multipart: Multipart,
) -> AppResult<impl IntoResponse> {
    let mut form = read_multipart(multipart).await?;
    let upload = form.require_file()?;

    let service = AnnouncementService::new(state.mongo.clone());
    let updated = service
        .add_attachment(&user, &id, upload, state.files.as_ref())
        .await?;
    Ok((
        StatusCode::CREATED,
        Json(resolve_urls(state.files.as_ref(), updated)),
    ))
}
