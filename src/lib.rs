pub mod api;
pub mod client;
pub mod config;
pub mod error;
pub mod models;
pub mod services;
pub mod utils;

use crate::config::Config;
use crate::services::storage::StorageLayout;
use crate::services::upload_service::UploadService;
use crate::utils::hash::Sha256Checksum;
use axum::{
    Json, Router,
    extract::DefaultBodyLimit,
    middleware::from_fn_with_state,
    routing::{get, put},
};
use std::convert::Infallible;
use std::sync::Arc;
use tower_http::timeout::TimeoutLayer;
use utoipa::openapi::security::{HttpAuthScheme, HttpBuilder, SecurityScheme};
use utoipa::{Modify, OpenApi};

#[derive(OpenApi)]
#[openapi(
    paths(
        api::handlers::upload::upload_artifacts,
        api::handlers::health::health_check,
    ),
    components(
        schemas(
            models::UploadResponse,
            models::StoredArtifact,
            models::ErrorBody,
            api::handlers::health::HealthResponse,
        )
    ),
    modifiers(&SecurityAddon),
    tags(
        (name = "upload", description = "Artifact upload endpoints"),
        (name = "system", description = "Service status")
    )
)]
pub struct ApiDoc;

struct SecurityAddon;

impl Modify for SecurityAddon {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        if let Some(components) = openapi.components.as_mut() {
            components.add_security_scheme(
                "jwt",
                SecurityScheme::Http(
                    HttpBuilder::new()
                        .scheme(HttpAuthScheme::Bearer)
                        .bearer_format("JWT")
                        .build(),
                ),
            );
        }
    }
}

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub storage: Arc<StorageLayout>,
    pub upload_service: Arc<UploadService>,
}

impl AppState {
    pub fn new(config: Config) -> Self {
        let storage = Arc::new(StorageLayout::new(
            config.storage.clone(),
            config.channels.clone(),
        ));
        let upload_service = Arc::new(UploadService::new(
            storage.clone(),
            Arc::new(Sha256Checksum),
        ));

        Self {
            config: Arc::new(config),
            storage,
            upload_service,
        }
    }
}

pub fn create_app(state: AppState) -> Router {
    let upload = put(api::handlers::upload::upload_artifacts)
        .post(api::handlers::upload::upload_artifacts)
        .layer::<_, Infallible>(DefaultBodyLimit::max(state.config.server.max_upload_bytes))
        .layer::<_, Infallible>(TimeoutLayer::new(state.config.server.request_timeout()))
        .layer::<_, Infallible>(from_fn_with_state(
            state.clone(),
            api::middleware::auth::auth_middleware,
        ));

    Router::new()
        .route("/ping", get(api::handlers::health::ping))
        .route("/health", get(api::handlers::health::health_check))
        .route("/api-docs/openapi.json", get(|| async { Json(ApiDoc::openapi()) }))
        .route("/api/v1/upload/:channel", upload)
        .with_state(state)
}
