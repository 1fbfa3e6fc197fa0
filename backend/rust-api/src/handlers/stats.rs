use axum::{extract::State, response::IntoResponse, Json};
use std::sync::Arc;

use crate::{
    error::AppResult,
    services::{stats_service::StatsService, AppState},
};

/// GET /api/admin/stats - Dashboard counters (Admin)
pub async fn admin_stats(State(state): State<Arc<AppState>>) -> AppResult<impl IntoResponse> {
    let service = StatsService::new(state.mongo.clone());
    Ok(Json(service.admin_stats().await?))
}
