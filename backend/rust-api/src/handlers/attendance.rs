use axum::{
    extract::{Extension, Path, Query, State},
    http::header,
    response::IntoResponse,
    Json,
};
use std::sync::Arc;

use crate::{
    error::AppResult,
    extractors::ValidJson,
    middlewares::auth::AuthUser,
    models::attendance::{
        AttendanceRangeQuery, ExportFormat, ExportQuery, MarkAttendanceRequest,
        StudentAttendanceQuery,
    },
    services::{attendance_service::AttendanceService, AppState},
};

/// POST /api/attendance/mark - Upsert one row per (student, class, date)
pub async fn mark_attendance(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthUser>,
    ValidJson(req): ValidJson<MarkAttendanceRequest>,
) -> AppResult<impl IntoResponse> {
    let service = AttendanceService::new(state.mongo.clone());
    Ok(Json(service.mark_attendance(&user, req).await?))
}

/// GET /api/attendance/class/{id} - Records grouped by date
pub async fn class_attendance(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthUser>,
    Path(id): Path<String>,
    Query(range): Query<AttendanceRangeQuery>,
) -> AppResult<impl IntoResponse> {
    let service = AttendanceService::new(state.mongo.clone());
    Ok(Json(service.class_attendance(&user, &id, range).await?))
}

/// GET /api/attendance/class/{id}/summary
pub async fn class_summary(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthUser>,
    Path(id): Path<String>,
    Query(range): Query<AttendanceRangeQuery>,
) -> AppResult<impl IntoResponse> {
    let service = AttendanceService::new(state.mongo.clone());
    Ok(Json(service.class_summary(&user, &id, range).await?))
}

/// GET /api/attendance/class/{id}/export?format=csv|xlsx
pub async fn export_attendance(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthUser>,
    Path(id): Path<String>,
    Query(query): Query<ExportQuery>,
) -> AppResult<impl IntoResponse> {
    let service = AttendanceService::new(state.mongo.clone());
    let (bytes, file_name) = service.export_attendance(&user, &id, query.format).await?;

    let content_type = match query.format {
        ExportFormat::Csv => "text/csv; charset=utf-8",
        ExportFormat::Xlsx => "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet",
    };

    Ok((
        [
            (header::CONTENT_TYPE, content_type.to_string()),
            (
                header::CONTENT_DISPOSITION,
                format!("attachment; filename=\"{}\"", file_name),
            ),
        ],
        bytes,
    ))
}

/// GET /api/attendance/student/{id}
pub async fn student_attendance(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthUser>,
    Path(id): Path<String>,
    Query(query): Query<StudentAttendanceQuery>,
) -> AppResult<impl IntoResponse> {
    let service = AttendanceService::new(state.mongo.clone());
    let records = service
        .student_attendance(&user, &id, query.class_id.as_deref())
        .await?;
    Ok(Json(records))
}
