use crate::error::{ErrorKind, UploadError};
use crate::models::ErrorBody;
use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ApiError {
    #[error("{0}")]
    Upload(#[from] UploadError),

    #[error("Unauthorized: {0}")]
    Unauthorized(String),
}

/// HTTP status reported for each failure kind.
pub fn status_for(kind: ErrorKind) -> StatusCode {
    match kind {
        ErrorKind::ChannelNotFound => StatusCode::NOT_FOUND,
        ErrorKind::AlreadyExists => StatusCode::CONFLICT,
        ErrorKind::BadChecksumFormat
        | ErrorKind::ChecksumMismatch
        | ErrorKind::UnsupportedField => StatusCode::UNPROCESSABLE_ENTITY,
        ErrorKind::InvalidFileName | ErrorKind::MalformedRequest => StatusCode::BAD_REQUEST,
        ErrorKind::Unauthorized => StatusCode::UNAUTHORIZED,
        ErrorKind::WriteFailed
        | ErrorKind::CommitFailed
        | ErrorKind::SourceUnreadable
        | ErrorKind::TransportFailed
        | ErrorKind::Unknown => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (kind, message) = match self {
            ApiError::Upload(e) => {
                let kind = e.kind();
                if status_for(kind).is_server_error() {
                    tracing::error!("Upload failed: {:?}", e);
                }
                (kind, e.to_string())
            }
            ApiError::Unauthorized(msg) => (ErrorKind::Unauthorized, msg),
        };

        let body = Json(ErrorBody {
            error: message,
            kind: Some(kind),
        });

        (status_for(kind), body).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use http_body_util::BodyExt;

    #[tokio::test]
    async fn test_error_body() {
        let response =
            ApiError::from(UploadError::AlreadyExists("disk.iso".to_string())).into_response();
        assert_eq!(response.status(), StatusCode::CONFLICT);

        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        let body: ErrorBody = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(body.kind, Some(ErrorKind::AlreadyExists));
        assert!(body.error.contains("disk.iso"));
    }

    #[test]
    fn test_status_mapping() {
        assert_eq!(status_for(ErrorKind::ChannelNotFound), StatusCode::NOT_FOUND);
        assert_eq!(
            status_for(ErrorKind::ChecksumMismatch),
            StatusCode::UNPROCESSABLE_ENTITY
        );
        assert_eq!(
            status_for(ErrorKind::CommitFailed),
            StatusCode::INTERNAL_SERVER_ERROR
        );
        assert_eq!(status_for(ErrorKind::Unauthorized), StatusCode::UNAUTHORIZED);
    }
}
