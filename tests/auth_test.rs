mod common;

use axum::http::StatusCode;
use chrono::Duration;
use common::{Part, SECRET, send, setup, upload_request};
use image_manager::utils::auth::create_jwt;

#[tokio::test]
async fn test_missing_token() {
    let server = setup();
    let mut request = upload_request("", "stable", &[Part::File("disk.iso", b"data")]);
    request.headers_mut().remove("Authorization");

    let (status, json) = send(server.app(), request).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(json["kind"], "unauthorized");
    assert!(!server.storage().join("stable/disk.iso").exists());
}

#[tokio::test]
async fn test_legacy_uppercase_scheme() {
    let server = setup();
    let claim = format!("disk.iso:{}", common::sha256(b"data"));
    let mut request = upload_request(
        &server.token,
        "stable",
        &[Part::File("disk.iso", b"data"), Part::Field("checksum", &claim)],
    );
    request.headers_mut().insert(
        "Authorization",
        format!("BEARER {}", server.token).parse().unwrap(),
    );

    let (status, _) = send(server.app(), request).await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn test_token_signed_with_other_secret() {
    let server = setup();
    let (token, _) = create_jwt("ci", "not-the-secret", Duration::days(1)).unwrap();

    let (status, _) = send(
        server.app(),
        upload_request(&token, "stable", &[Part::File("disk.iso", b"data")]),
    )
    .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_unlisted_token_is_revoked() {
    let server = setup();
    // valid signature, but its id was never recorded in the configuration
    let (token, _) = create_jwt("ci", SECRET, Duration::days(1)).unwrap();

    let (status, json) = send(
        server.app(),
        upload_request(&token, "stable", &[Part::File("disk.iso", b"data")]),
    )
    .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert!(json["error"].as_str().unwrap().contains("revoked"));
}

#[tokio::test]
async fn test_public_endpoints_need_no_token() {
    let server = setup();
    let request = axum::http::Request::builder()
        .uri("/ping")
        .body(axum::body::Body::empty())
        .unwrap();

    let (status, _) = send(server.app(), request).await;
    assert_eq!(status, StatusCode::OK);
}
