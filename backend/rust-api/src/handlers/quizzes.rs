use axum::{
    extract::{Extension, Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use std::sync::Arc;

use crate::{
    error::AppResult,
    extractors::ValidJson,
    middlewares::auth::AuthUser,
    models::quiz::{CreateQuizRequest, GenerateQuizRequest, ListQuizzesQuery, SubmitQuizRequest},
    services::{quiz_service::QuizService, AppState},
};

/// POST /api/quizzes - Create a quiz from manual questions
pub async fn create_quiz(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthUser>,
    ValidJson(req): ValidJson<CreateQuizRequest>,
) -> AppResult<impl IntoResponse> {
    let service = QuizService::new(state.mongo.clone());
    let quiz = service.create_quiz(&user, req).await?;
    Ok((StatusCode::CREATED, Json(quiz)))
}

/// POST /api/quizzes/generate - Create a quiz from the external generator
pub async fn generate_quiz(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthUser>,
    ValidJson(req): ValidJson<GenerateQuizRequest>,
) -> AppResult<impl IntoResponse> {
    let service = QuizService::new(state.mongo.clone());
    let quiz = service
        .generate_quiz(&user, req, state.quiz_generator.as_deref())
        .await?;
    Ok((StatusCode::CREATED, Json(quiz)))
}

/// GET /api/quizzes?classId=
pub async fn list_quizzes(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthUser>,
    Query(query): Query<ListQuizzesQuery>,
) -> AppResult<impl IntoResponse> {
    let service = QuizService::new(state.mongo.clone());
    Ok(Json(service.list_quizzes(&user, query).await?))
}

/// GET /api/quizzes/{id}
pub async fn get_quiz(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthUser>,
    Path(id): Path<String>,
) -> AppResult<impl IntoResponse> {
    let service = QuizService::new(state.mongo.clone());
    Ok(Json(service.get_quiz(&user, &id).await?))
}

/// DELETE /api/quizzes/{id}
pub async fn delete_quiz(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthUser>,
    Path(id): Path<String>,
) -> AppResult<impl IntoResponse> {
    let service = QuizService::new(state.mongo.clone());
    service.delete_quiz(&user, &id).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// POST /api/quizzes/{id}/start
pub async fn start_quiz(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthUser>,
    Path(id): Path<String>,
) -> AppResult<impl IntoResponse> {
    let service = QuizService::new(state.mongo.clone());
    Ok(Json(service.start_quiz(&user, &id).await?))
}

/// POST /api/quizzes/{id}/submit - 409 on a second submission
pub async fn submit_quiz(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthUser>,
    Path(id): Path<String>,
    ValidJson(req): ValidJson<SubmitQuizRequest>,
) -> AppResult<impl IntoResponse> {
    let service = QuizService::new(state.mongo.clone());
    let submission = service.submit_quiz(&user, &id, req).await?;
    Ok((StatusCode::CREATED, Json(submission)))
}

/// GET /api/quizzes/{id}/submissions
pub async fn list_submissions(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthUser>,
    Path(id): Path<String>,
) -> AppResult<impl IntoResponse> {
    let service = QuizService::new(state.mongo.clone());
    Ok(Json(service.list_quiz_submissions(&user, &id).await?))
}
