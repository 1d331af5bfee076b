use axum::extract::State;
use axum::Json;
use serde::Serialize;
use utoipa::ToSchema;

use crate::app::AppState;
use crate::errors::AppResult;

#[derive(Debug, Serialize, ToSchema)]
pub struct HealthResponse {
    pub status: &'static str,
    pub cache_warm: bool,
    pub cache_error: Option<String>,
}

#[utoipa::path(
    get,
    path = "/api/health",
    tag = "Health",
    responses((status = 200, description = "Health check", body = HealthResponse))
)]
pub async fn health(State(state): State<AppState>) -> AppResult<Json<HealthResponse>> {
    // Peek at the cache only; never triggers an upstream fetch.
    let cache_check = state.permissions.cached().await;

    match cache_check {
        Ok(cached) => Ok(Json(HealthResponse { status: "ok", cache_warm: cached.is_some(), cache_error: None })),
        Err(e) => Ok(Json(HealthResponse { status: "ok", cache_warm: false, cache_error: Some(e.to_string()) })),
    }
}
