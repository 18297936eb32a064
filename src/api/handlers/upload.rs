use crate::AppState;
use crate::api::error::ApiError;
use crate::error::UploadError;
use crate::models::{ErrorBody, UploadResponse};
use crate::utils::auth::Claims;
use axum::{
    Extension, Json,
    extract::{Multipart, Path, State, multipart::MultipartRejection},
};

/// Receives artifacts and their checksum claims for a channel.
///
/// Parts are processed in order: each `file` part is stored under its declared
/// name and each `checksum` part (`"<name>:<sha256>"`) is checked against a file
/// received earlier in the same request. Processing stops at the first failure;
/// files committed before it are kept.
#[utoipa::path(
    put,
    path = "/api/v1/upload/{channel}",
    params(
        ("channel" = String, Path, description = "Channel receiving the files")
    ),
    request_body(
        content = String,
        content_type = "multipart/form-data",
        description = "`file` parts followed by their `checksum` parts"
    ),
    responses(
        (status = 200, description = "All parts stored and verified", body = UploadResponse),
        (status = 400, description = "Malformed body or invalid file name", body = ErrorBody),
        (status = 401, description = "Unauthorized", body = ErrorBody),
        (status = 404, description = "Unknown channel", body = ErrorBody),
        (status = 409, description = "File already exists", body = ErrorBody),
        (status = 422, description = "Checksum missing, malformed or wrong", body = ErrorBody),
        (status = 500, description = "Storage failure", body = ErrorBody)
    ),
    security(
        ("jwt" = [])
    ),
    tag = "upload"
)]
pub async fn upload_artifacts(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(channel): Path<String>,
    multipart: Result<Multipart, MultipartRejection>,
) -> Result<Json<UploadResponse>, ApiError> {
    let multipart = multipart.map_err(|e| {
        tracing::error!("Rejected upload body: {}", e);
        UploadError::MalformedRequest(e.body_text())
    })?;

    tracing::info!("📦 Upload to \"{}\" by token \"{}\"", channel, claims.sub);

    let response = state.upload_service.receive(&channel, multipart).await?;
    Ok(Json(response))
}
