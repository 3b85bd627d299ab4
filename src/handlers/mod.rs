pub mod association;
pub mod content;

use axum::{extract::State, Json};
use serde::Serialize;
use uuid::Uuid;

use crate::config::RepositoryBackend;
use crate::error::{ApiResponse, AppError, Result};
use crate::AppState;

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub storage: &'static str,
    pub repository: RepositoryBackend,
}

/// Liveness check
/// GET /api/v1/health
pub async fn health(State(state): State<AppState>) -> Json<ApiResponse<HealthResponse>> {
    Json(ApiResponse::success(HealthResponse {
        status: "ok",
        storage: state.service.storage_type(),
        repository: state.config.repository.backend,
    }))
}

pub(crate) fn parse_id(raw: &str) -> Result<Uuid> {
    Uuid::parse_str(raw).map_err(|_| AppError::BadRequest(format!("Invalid content id: {}", raw)))
}
