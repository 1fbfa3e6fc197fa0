use axum::{
    extract::{Extension, FromRequest, Multipart, Path, Query, Request, State},
    http::{header, StatusCode},
    response::IntoResponse,
    Json,
};
use std::sync::Arc;
use validator::Validate;

use super::read_multipart;
use crate::{
    error::{AppError, AppResult},
    extractors::{AppJson, ValidJson},
    middlewares::auth::AuthUser,
    models::activity::{
        CreateActivityRequest, GradeSubmissionRequest, ListActivitiesQuery,
        SubmitActivityRequest, UpdateActivityRequest,
    },
    services::{
        activity_service::ActivityService,
        file_storage::{resolve_urls, UploadedFile},
        AppState,
    },
};

/// POST /api/activities
pub async fn create_activity(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthUser>,
    ValidJson(req): ValidJson<CreateActivityRequest>,
) -> AppResult<impl IntoResponse> {
    let service = ActivityService::new(state.mongo.clone());
    let activity = service.create_activity(&user, req).await?;
    Ok((StatusCode::CREATED, Json(activity)))
}

/// GET /api/activities?classId=
pub async fn list_activities(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthUser>,
    Query(query): Query<ListActivitiesQuery>,
) -> AppResult<impl IntoResponse> {
    let service = ActivityService::new(state.mongo.clone());
    Ok(Json(resolve_urls(
        state.files.as_ref(),
        service.list_activities(&user, query).await?,
    )))
}

/// GET /api/activities/{id}
pub async fn get_activity(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthUser>,
    Path(id): Path<String>,
) -> AppResult<impl IntoResponse> {
    let service = ActivityService::new(state.mongo.clone());
    Ok(Json(resolve_urls(
        state.files.as_ref(),
        service.get_activity(&user, &id).await?,
    )))
}

/// PUT /api/activities/{id}
pub async fn update_activity(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthUser>,
    Path(id): Path<String>,
    ValidJson(req): ValidJson<UpdateActivityRequest>,
) -> AppResult<impl IntoResponse> {
    let service = ActivityService::new(state.mongo.clone());
    Ok(Json(resolve_urls(
        state.files.as_ref(),
        service.update_activity(&user, &id, req).await?,
    )))
}

/// DELETE /api/activities/{id}
pub async fn delete_activity(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthUser>,
    Path(id): Path<String>,
) -> AppResult<impl IntoResponse> {
    let service = ActivityService::new(state.mongo.clone());
    service.delete_activity(&user, &id, state.files.as_ref()).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// POST /api/activities/{id}/attachment (multipart, field `file`)
pub async fn attach_file(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthUser>,
    Path(id): Path<String>,
    multipart: Multipart,
) -> AppResult<impl IntoResponse> {
    let mut form = read_multipart(multipart).await?;
    let upload = form.require_file()?;

    let service = ActivityService::new(state.mongo.clone());
    let activity = service
        .attach_file(&user, &id, upload, state.files.as_ref())
        .await?;
    Ok(Json(resolve_urls(state.files.as_ref(), activity)))
}

fn is_multipart(request: &Request) -> bool {
    request
        .headers()
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v.starts_with("multipart/form-data"))
}

/// POST /api/activities/submit - multipart (`activityId`, `text`, `file`) or JSON (`activityId`, `text`)
pub async fn submit_activity(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthUser>,
    request: Request,
) -> AppResult<impl IntoResponse> {
    let (activity_id, text, upload): (String, Option<String>, Option<UploadedFile>) =
        if is_multipart(&request) {
            let multipart = Multipart::from_request(request, &state)
                .await
                .map_err(|e| AppError::bad_request(format!("Invalid multipart body: {}", e)))?;
            let mut form = read_multipart(multipart).await?;
            let activity_id = form.take_field("activityId");
            let text = form.field("text").map(str::to_string);
            (activity_id, text, form.file.take())
        } else {
            let AppJson(req) = AppJson::<SubmitActivityRequest>::from_request(request, &state).await?;
            req.validate()?;
            (req.activity_id, req.text, None)
        };

    if activity_id.trim().is_empty() {
        return Err(AppError::bad_request("activityId is required"));
    }

    let service = ActivityService::new(state.mongo.clone());
    let submission = service
        .submit(&user, activity_id.trim(), text, upload, state.files.as_ref())
        .await?;
    Ok((
        StatusCode::CREATED,
        Json(resolve_urls(state.files.as_ref(), submission)),
    ))
}

/// GET /api/activities/{id}/submissions - Roster view with `missing` rows
pub async fn list_submissions(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthUser>,
    Path(id): Path<String>,
) -> AppResult<impl IntoResponse> {
    let service = ActivityService::new(state.mongo.clone());
    Ok(Json(resolve_urls(
        state.files.as_ref(),
        service.list_submissions(&user, &id).await?,
    )))
}

/// GET /api/activities/submissions/mine
pub async fn my_submissions(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthUser>,
) -> AppResult<impl IntoResponse> {
    let service = ActivityService::new(state.mongo.clone());
    Ok(Json(resolve_urls(
        state.files.as_ref(),
        service.my_submissions(&user).await?,
    )))
}

/// PUT /api/activities/submissions/{id}/grade
pub async fn grade_submission(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthUser>,
    Path(id): Path<String>,
    ValidJson(req): ValidJson<GradeSubmissionRequest>,
) -> AppResult<impl IntoResponse> {
    let service = ActivityService::new(state.mongo.clone());
    Ok(Json(resolve_urls(
        state.files.as_ref(),
        service.grade_submission(&user, &id, req).await?,
    )))
}
