#![allow(dead_code)]

use axum::{
    Router,
    body::Body,
    http::{Request, StatusCode},
};
use chrono::{Duration, Utc};
use http_body_util::BodyExt;
use image_manager::config::Config;
use image_manager::models::ApiToken;
use image_manager::utils::auth::create_jwt;
use image_manager::{AppState, create_app};
use serde_json::Value;
use std::path::PathBuf;
use tempfile::TempDir;
use tower::ServiceExt;

pub const SECRET: &str = "integration-test-secret";
pub const BOUNDARY: &str = "---------------------------123456789012345678901234567";

pub struct TestServer {
    pub dir: TempDir,
    pub state: AppState,
    pub token: String,
}

impl TestServer {
    pub fn storage(&self) -> PathBuf {
        self.dir.path().join("storage")
    }

    pub fn app(&self) -> Router {
        create_app(self.state.clone())
    }
}

/// Server state with a `stable` channel (cleanup on) and a `nightly` channel
/// stored under `images/nightly`. Channel directories are not created upfront.
pub fn setup() -> TestServer {
    let dir = tempfile::tempdir().unwrap();
    let storage = dir.path().join("storage");

    let mut config = Config::from_toml(&format!(
        r#"
storage = "{}"
secret_key = "{}"

[[channels]]
name = "stable"
cleanup = true

[[channels]]
name = "nightly"
path = "images/nightly"
"#,
        storage.display(),
        SECRET
    ))
    .unwrap();

    let (token, claims) = create_jwt("ci", SECRET, Duration::days(1)).unwrap();
    config.tokens.push(ApiToken {
        id: claims.jti,
        name: "ci".to_string(),
        created_at: Utc::now(),
    });

    TestServer {
        dir,
        state: AppState::new(config),
        token,
    }
}

pub enum Part<'a> {
    File(&'a str, &'a [u8]),
    Field(&'a str, &'a str),
    Raw(&'a str, &'a [u8]),
}

pub fn multipart_body(parts: &[Part<'_>]) -> Vec<u8> {
    let mut body = Vec::new();
    for part in parts {
        match part {
            Part::File(name, content) => {
                body.extend_from_slice(
                    format!(
                        "--{BOUNDARY}\r\n\
                        Content-Disposition: form-data; name=\"file\"; filename=\"{name}\"\r\n\
                        Content-Type: application/octet-stream\r\n\r\n"
                    )
                    .as_bytes(),
                );
                body.extend_from_slice(content);
                body.extend_from_slice(b"\r\n");
            }
            Part::Field(name, value) => {
                body.extend_from_slice(
                    format!(
                        "--{BOUNDARY}\r\n\
                        Content-Disposition: form-data; name=\"{name}\"\r\n\r\n\
                        {value}\r\n"
                    )
                    .as_bytes(),
                );
            }
            Part::Raw(name, value) => {
                body.extend_from_slice(
                    format!(
                        "--{BOUNDARY}\r\n\
                        Content-Disposition: form-data; name=\"{name}\"\r\n\r\n"
                    )
                    .as_bytes(),
                );
                body.extend_from_slice(value);
                body.extend_from_slice(b"\r\n");
            }
        }
    }
    body.extend_from_slice(format!("--{BOUNDARY}--\r\n").as_bytes());
    body
}

pub fn upload_request(token: &str, channel: &str, parts: &[Part<'_>]) -> Request<Body> {
    Request::builder()
        .method("PUT")
        .uri(format!("/api/v1/upload/{}", channel))
        .header("Authorization", format!("Bearer {}", token))
        .header(
            "Content-Type",
            format!("multipart/form-data; boundary={}", BOUNDARY),
        )
        .body(Body::from(multipart_body(parts)))
        .unwrap()
}

pub async fn send(app: Router, request: Request<Body>) -> (StatusCode, Value) {
    let response = app.oneshot(request).await.unwrap();
    let status = response.status();
    let body = response.into_body().collect().await.unwrap().to_bytes();
    let json = if body.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&body)
            .unwrap_or_else(|_| panic!("non-JSON body: {}", String::from_utf8_lossy(&body)))
    };
    (status, json)
}

pub fn sha256(data: &[u8]) -> String {
    image_manager::utils::hash::calculate_hash(data)
}
