use axum::{Json, extract::State, response::IntoResponse};
use serde::Serialize;
use serde_json::json;
use crate::AppState;
use utoipa::ToSchema;

#[derive(Serialize, ToSchema)]
pub struct HealthResponse {
    pub status: String,
    pub storage: String,
    pub channels: usize,
    pub version: String,
}

#[utoipa::path(
    get,
    path = "/health",
    responses(
        (status = 200, description = "System health status", body = HealthResponse)
    ),
    tag = "system"
)]
pub async fn health_check(State(state): State<AppState>) -> impl IntoResponse {
    let storage_status = match tokio::fs::metadata(state.storage.root()).await {
        Ok(meta) if meta.is_dir() => "available",
        _ => "unavailable",
    };

    Json(HealthResponse {
        status: "ok".to_string(),
        storage: storage_status.to_string(),
        channels: state.storage.channels().len(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

/// Liveness probe, answers with an empty object.
pub async fn ping() -> impl IntoResponse {
    Json(json!({}))
}
