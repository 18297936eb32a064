use crate::AppState;
use crate::api::error::ApiError;
use crate::utils::auth::{bearer_token, validate_jwt};
use axum::{
    extract::{Request, State},
    http::header,
    middleware::Next,
    response::Response,
};

/// Accepts requests carrying a valid token whose id is still listed in the
/// configuration. The verified claims are added to the request extensions.
pub async fn auth_middleware(
    State(state): State<AppState>,
    mut req: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let token = req
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|h| h.to_str().ok())
        .and_then(bearer_token)
        .map(|s| s.to_string())
        .ok_or_else(|| {
            tracing::warn!("Missing authorization token");
            ApiError::Unauthorized("missing authorization token".to_string())
        })?;

    let claims = validate_jwt(&token, &state.config.secret_key).map_err(|e| {
        tracing::warn!("Invalid token: {}", e);
        ApiError::Unauthorized("invalid token".to_string())
    })?;

    if !state.config.has_token(&claims.jti) {
        tracing::warn!("Token \"{}\" ({}) has been revoked", claims.sub, claims.jti);
        return Err(ApiError::Unauthorized("token has been revoked".to_string()));
    }

    req.extensions_mut().insert(claims);
    Ok(next.run(req).await)
}
