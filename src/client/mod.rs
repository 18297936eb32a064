//! Upload client.
//!
//! The request body is produced while it is being sent: a background task
//! checksums each source file, streams it as a `file` part and follows it with
//! its `checksum` part, writing into a bounded pipe that reqwest drains.

pub mod multipart;

use crate::error::{ErrorKind, UploadError};
use crate::models::{ChecksumClaim, ErrorBody, UploadResponse};
use crate::utils::hash::{ChecksumProvider, Sha256Checksum};
use crate::utils::validation::validate_file_name;
use multipart::{MultipartWriter, PIPE_DEPTH, WriteError};
use reqwest::header::{ACCEPT, CONTENT_TYPE};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;
use url::Url;

const USER_AGENT: &str = concat!("image-manager/", env!("CARGO_PKG_VERSION"));

const REQUEST_TIMEOUT: Duration = Duration::from_secs(60 * 60);

/// How the producing task ended.
#[derive(Debug)]
enum ProduceError {
    /// The transport stopped reading the body
    PipeClosed,
    Source(UploadError),
}

/// A file to upload and the name it is stored under.
#[derive(Debug, Clone)]
struct SourceFile {
    path: PathBuf,
    name: String,
}

impl SourceFile {
    fn new(path: &Path) -> Result<Self, UploadError> {
        let name = path
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| UploadError::InvalidFileName(path.display().to_string()))?
            .to_string();
        validate_file_name(&name).map_err(|_| UploadError::InvalidFileName(name.clone()))?;
        Ok(Self {
            path: path.to_path_buf(),
            name,
        })
    }
}

pub struct Client {
    endpoint: Url,
    token: String,
    http: reqwest::Client,
    checksums: Arc<dyn ChecksumProvider>,
}

impl Client {
    /// `endpoint` is the server base URL, e.g. `http://localhost:8080`.
    pub fn new(endpoint: &str, token: impl Into<String>) -> Result<Self, UploadError> {
        let endpoint = Url::parse(endpoint)
            .map_err(|e| UploadError::TransportFailed(format!("invalid address {}: {}", endpoint, e)))?;

        let http = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .user_agent(USER_AGENT)
            .build()
            .map_err(|e| UploadError::TransportFailed(e.to_string()))?;

        Ok(Self {
            endpoint,
            token: token.into(),
            http,
            checksums: Arc::new(Sha256Checksum),
        })
    }

    pub fn with_checksum_provider(mut self, checksums: Arc<dyn ChecksumProvider>) -> Self {
        self.checksums = checksums;
        self
    }

    pub fn upload_url(&self, channel: &str) -> Result<Url, UploadError> {
        let mut url = self.endpoint.clone();
        url.path_segments_mut()
            .map_err(|_| {
                UploadError::TransportFailed(format!("{} cannot be a base URL", self.endpoint))
            })?
            .pop_if_empty()
            .extend(["api", "v1", "upload", channel]);
        Ok(url)
    }

    /// Uploads `paths` to `channel` in a single request, in the given order.
    ///
    /// A file that cannot be read is reported as [`UploadError::SourceUnreadable`]
    /// even if the server also failed, since the aborted body is what made it
    /// fail. Files the server committed before a failure stay on the server.
    pub async fn upload(
        &self,
        channel: &str,
        paths: &[PathBuf],
    ) -> Result<UploadResponse, UploadError> {
        let url = self.upload_url(channel)?;
        let files = paths
            .iter()
            .map(|p| SourceFile::new(p))
            .collect::<Result<Vec<_>, _>>()?;

        let (pipe, body) = multipart::pipe(PIPE_DEPTH);
        let writer = MultipartWriter::new(pipe);
        let content_type = writer.content_type();

        let (done_tx, done_rx) = oneshot::channel();
        let checksums = self.checksums.clone();
        tokio::spawn(async move {
            let _ = done_tx.send(write_parts(writer, files, checksums).await);
        });

        tracing::debug!("Uploading {} file(s) to {}", paths.len(), url);
        let response = self
            .http
            .put(url)
            .bearer_auth(&self.token)
            .header(CONTENT_TYPE, content_type)
            .header(ACCEPT, "application/json")
            .body(reqwest::Body::wrap_stream(body))
            .send()
            .await;

        let produced = done_rx.await.unwrap_or(Err(ProduceError::PipeClosed));
        if let Err(ProduceError::Source(e)) = produced {
            return Err(e);
        }

        let response = response.map_err(|e| UploadError::TransportFailed(e.to_string()))?;
        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(rejection(status, &text));
        }

        if produced.is_err() {
            return Err(UploadError::TransportFailed(
                "request body was not fully sent".to_string(),
            ));
        }

        response
            .json::<UploadResponse>()
            .await
            .map_err(|e| UploadError::TransportFailed(format!("invalid response: {}", e)))
    }
}

async fn write_parts(
    mut writer: MultipartWriter,
    files: Vec<SourceFile>,
    checksums: Arc<dyn ChecksumProvider>,
) -> Result<(), ProduceError> {
    for source in files {
        let opened = async {
            let digest = checksums.checksum(&source.path).await?;
            let file = tokio::fs::File::open(&source.path).await?;
            Ok::<_, io::Error>((digest, file))
        }
        .await;

        let (digest, file) = match opened {
            Ok(opened) => opened,
            Err(e) => return Err(abort(writer, &source, e).await),
        };

        match writer.write_file("file", &source.name, file).await {
            Ok(size) => tracing::debug!("Sent \"{}\" ({} bytes)", source.name, size),
            Err(WriteError::Closed(_)) => return Err(ProduceError::PipeClosed),
            Err(WriteError::Source(e)) => return Err(abort(writer, &source, e).await),
        }

        let claim = ChecksumClaim::new(&source.name, digest);
        writer
            .write_field("checksum", &claim.to_string())
            .await
            .map_err(|_| ProduceError::PipeClosed)?;
    }

    writer.finish().await.map_err(|_| ProduceError::PipeClosed)
}

async fn abort(writer: MultipartWriter, source: &SourceFile, error: io::Error) -> ProduceError {
    tracing::error!("Cannot read {}: {}", source.path.display(), error);
    writer
        .abort(io::Error::new(error.kind(), error.to_string()))
        .await;
    ProduceError::Source(UploadError::SourceUnreadable {
        path: source.path.clone(),
        source: error,
    })
}

fn rejection(status: reqwest::StatusCode, text: &str) -> UploadError {
    let (kind, message) = match serde_json::from_str::<ErrorBody>(text) {
        Ok(body) => (body.kind.unwrap_or(ErrorKind::Unknown), body.error),
        Err(_) if status == reqwest::StatusCode::UNAUTHORIZED => {
            (ErrorKind::Unauthorized, text.to_string())
        }
        Err(_) => (ErrorKind::Unknown, text.to_string()),
    };

    let message = if message.is_empty() {
        status.to_string()
    } else {
        message
    };

    UploadError::Rejected {
        status: status.as_u16(),
        kind,
        message,
    }
}
