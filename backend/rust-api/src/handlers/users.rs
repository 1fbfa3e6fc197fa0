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
    models::{
        profile::UpdateProfileRequest,
        user::{ChangePasswordRequest, CreateUserRequest, ListUsersQuery, LoginRequest, UpdateUserRequest},
    },
    services::{
        auth_service::AuthService, profile_service::ProfileService, user_service::UserService,
        AppState,
    },
};

fn auth_service(state: &AppState) -> AuthService {
    AuthService::new(state.mongo.clone(), state.config.bcrypt_cost)
}

/// POST /api/users/login - Exchange email and password for a bearer token
pub async fn login(
    State(state): State<Arc<AppState>>,
    ValidJson(req): ValidJson<LoginRequest>,
) -> AppResult<impl IntoResponse> {
    let response = auth_service(&state).login(req, &state.jwt).await?;
    Ok(Json(response))
}

/// GET /api/users/me
pub async fn me(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthUser>,
) -> AppResult<impl IntoResponse> {
    Ok(Json(auth_service(&state).current_user(&user).await?))
}

/// POST /api/users/change-password
pub async fn change_password(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthUser>,
    ValidJson(req): ValidJson<ChangePasswordRequest>,
) -> AppResult<impl IntoResponse> {
    auth_service(&state).change_password(&user, req).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// GET /api/users/me/profile
pub async fn get_profile(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthUser>,
) -> AppResult<impl IntoResponse> {
    let service = ProfileService::new(state.mongo.clone());
    Ok(Json(service.get_profile(&user.id).await?))
}

/// PUT /api/users/me/profile - Create or update the caller's profile
pub async fn update_profile(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthUser>,
    ValidJson(req): ValidJson<UpdateProfileRequest>,
) -> AppResult<impl IntoResponse> {
    let service = ProfileService::new(state.mongo.clone());
    Ok(Json(service.upsert_profile(&user.id, req).await?))
}

/// POST /api/users - Create an account (Admin)
pub async fn create_user(
    State(state): State<Arc<AppState>>,
    ValidJson(req): ValidJson<CreateUserRequest>,
) -> AppResult<impl IntoResponse> {
    let service = UserService::new(state.mongo.clone());
    let created = service.create_user(req, &auth_service(&state)).await?;
    Ok((StatusCode::CREATED, Json(created)))
}

/// GET /api/users - List accounts with filters (Admin)
pub async fn list_users(
    State(state): State<Arc<AppState>>,
    Query(query): Query<ListUsersQuery>,
) -> AppResult<impl IntoResponse> {
    let service = UserService::new(state.mongo.clone());
    Ok(Json(service.list_users(query).await?))
}

/// GET /api/users/{id}
pub async fn get_user(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthUser>,
    Path(id): Path<String>,
) -> AppResult<impl IntoResponse> {
    let service = UserService::new(state.mongo.clone());
    Ok(Json(service.get_user(&user, &id).await?))
}

/// PATCH /api/users/{id} (Admin)
pub async fn update_user(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthUser>,
    Path(id): Path<String>,
    ValidJson(req): ValidJson<UpdateUserRequest>,
) -> AppResult<impl IntoResponse> {
    user.require_admin()?;
    let service = UserService::new(state.mongo.clone());
    Ok(Json(service.update_user(&user, &id, req).await?))
}

/// DELETE /api/users/{id} (Admin)
pub async fn delete_user(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthUser>,
    Path(id): Path<String>,
) -> AppResult<impl IntoResponse> {
    user.require_admin()?;
    let service = UserService::new(state.mongo.clone());
    service.delete_user(&user, &id).await?;
    Ok(StatusCode::NO_CONTENT)
}
