use crate::error::UploadError;
use crate::models::{Channel, ChecksumClaim, StoredArtifact, UploadResponse};
use crate::services::storage::{CommitError, StagedFile, StorageLayout};
use crate::utils::hash::ChecksumProvider;
use crate::utils::validation::validate_file_name;
use axum::extract::Multipart;
use axum::extract::multipart::Field;
use futures::TryStreamExt;
use std::collections::HashMap;
use std::io;
use std::sync::Arc;
use tokio::io::AsyncWriteExt;
use tokio_util::io::StreamReader;

/// Digests computed server-side for the files of one request.
#[derive(Debug, Default)]
pub struct UploadSession {
    digests: HashMap<String, String>,
}

impl UploadSession {
    pub fn record(&mut self, file_name: &str, digest: &str) {
        self.digests.insert(file_name.to_string(), digest.to_string());
    }

    pub fn digest(&self, file_name: &str) -> Option<&str> {
        self.digests.get(file_name).map(String::as_str)
    }

    /// A claim for a file that was never received counts as a mismatch.
    pub fn verify(&self, claim: &ChecksumClaim) -> Result<(), UploadError> {
        match self.digest(&claim.file_name) {
            Some(digest) if digest.eq_ignore_ascii_case(&claim.declared_digest) => Ok(()),
            computed => {
                tracing::error!(
                    "Object \"{}\" has a bad checksum ({} vs {})",
                    claim.file_name,
                    computed.unwrap_or("<not received>"),
                    claim.declared_digest
                );
                Err(UploadError::ChecksumMismatch(claim.file_name.clone()))
            }
        }
    }
}

/// Receives multipart uploads into channel directories.
pub struct UploadService {
    storage: Arc<StorageLayout>,
    checksums: Arc<dyn ChecksumProvider>,
}

impl UploadService {
    pub fn new(storage: Arc<StorageLayout>, checksums: Arc<dyn ChecksumProvider>) -> Self {
        Self { storage, checksums }
    }

    pub fn storage(&self) -> &StorageLayout {
        &self.storage
    }

    /// Processes every part of `multipart` in arrival order.
    ///
    /// The first failure ends the request. Files committed before that point stay
    /// committed and the file in flight is rolled back. The rest of the body is
    /// read and thrown away so the client gets to see the error response.
    pub async fn receive(
        &self,
        channel_name: &str,
        mut multipart: Multipart,
    ) -> Result<UploadResponse, UploadError> {
        let result = self.process(channel_name, &mut multipart).await;
        if result.is_err() {
            drain(&mut multipart).await;
        }
        result
    }

    async fn process(
        &self,
        channel_name: &str,
        multipart: &mut Multipart,
    ) -> Result<UploadResponse, UploadError> {
        let channel = self
            .storage
            .resolve(channel_name)
            .ok_or_else(|| {
                tracing::error!("Cannot find \"{}\" channel", channel_name);
                UploadError::ChannelNotFound(channel_name.to_string())
            })?
            .clone();

        let mut session = UploadSession::default();
        let mut response = UploadResponse {
            channel: channel.name.clone(),
            files: Vec::new(),
        };
        let mut channel_dir_ready = false;

        while let Some(field) = multipart.next_field().await.map_err(|e| {
            tracing::error!("Error reading part: {}", e);
            UploadError::MalformedRequest(e.body_text())
        })? {
            let field_name = field.name().unwrap_or_default().to_string();

            match field_name.as_str() {
                "file" => {
                    let file_name = field.file_name().unwrap_or_default().to_string();
                    self.check_new_artifact(&channel, &file_name).await?;

                    if !channel_dir_ready {
                        self.storage
                            .ensure_channel_dir(&channel)
                            .await
                            .map_err(|source| UploadError::WriteFailed {
                                name: file_name.clone(),
                                source,
                            })?;
                        channel_dir_ready = true;
                    }

                    let artifact = self
                        .receive_file(&channel, &file_name, field, &mut session)
                        .await?;
                    response.files.push(artifact);
                }
                "checksum" => {
                    let value = field.bytes().await.map_err(|e| {
                        tracing::error!("Failed to read checksum: {}", e);
                        UploadError::MalformedRequest(e.body_text())
                    })?;
                    let claim = std::str::from_utf8(&value)
                        .map_err(|_| UploadError::BadChecksumFormat)
                        .and_then(ChecksumClaim::parse)
                        .inspect_err(|_| {
                            tracing::error!("Failed to receive checksum: bad format");
                        })?;
                    session.verify(&claim)?;
                    tracing::debug!("Checksum of \"{}\" verified", claim.file_name);
                }
                other => {
                    tracing::error!("Received unsupported form field {}", other);
                    return Err(UploadError::UnsupportedField(other.to_string()));
                }
            }
        }

        tracing::info!(
            "Received {} file(s) for channel \"{}\"",
            response.files.len(),
            channel.name
        );
        Ok(response)
    }

    /// Rejects names that are unusable or already taken in the channel.
    async fn check_new_artifact(&self, channel: &Channel, file_name: &str) -> Result<(), UploadError> {
        validate_file_name(file_name).map_err(|e| {
            tracing::error!("Rejected file name {:?}: {}", file_name, e);
            UploadError::InvalidFileName(file_name.to_string())
        })?;

        let exists = self
            .storage
            .artifact_exists(channel, file_name)
            .await
            .map_err(|source| UploadError::WriteFailed {
                name: file_name.to_string(),
                source,
            })?;
        if exists {
            tracing::error!("Cannot upload: file \"{}\" already exists", file_name);
            return Err(UploadError::AlreadyExists(file_name.to_string()));
        }
        Ok(())
    }

    async fn receive_file(
        &self,
        channel: &Channel,
        file_name: &str,
        field: Field<'_>,
        session: &mut UploadSession,
    ) -> Result<StoredArtifact, UploadError> {
        tracing::debug!("Receiving \"{}\"...", file_name);

        let (staged, mut file) = match self.storage.stage(channel, file_name).await {
            Ok(staged) => staged,
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
                tracing::error!("Cannot upload: \"{}\" is already being uploaded", file_name);
                return Err(UploadError::AlreadyExists(file_name.to_string()));
            }
            Err(source) => {
                tracing::error!("Unable to create {}: {}", file_name, source);
                return Err(UploadError::WriteFailed {
                    name: file_name.to_string(),
                    source,
                });
            }
        };

        let body = field.map_err(io::Error::other);
        let mut reader = StreamReader::new(body);
        let copied = async {
            let size = tokio::io::copy(&mut reader, &mut file).await?;
            file.flush().await?;
            file.sync_all().await?;
            Ok::<_, io::Error>(size)
        }
        .await;
        drop(file);

        let size = match copied {
            Ok(size) => size,
            Err(source) => {
                tracing::error!("Failed to copy part to \"{}\": {}", file_name, source);
                return Err(discard(staged, UploadError::WriteFailed {
                    name: file_name.to_string(),
                    source,
                })
                .await);
            }
        };

        let checksum = match self.checksums.checksum(staged.temp_path()).await {
            Ok(checksum) => checksum,
            Err(source) => {
                tracing::error!("Failed to calculate checksum of \"{}\": {}", file_name, source);
                return Err(discard(staged, UploadError::WriteFailed {
                    name: file_name.to_string(),
                    source,
                })
                .await);
            }
        };
        session.record(file_name, &checksum);

        match staged.commit().await {
            Ok(path) => {
                tracing::info!(
                    channel = %channel.name,
                    size,
                    checksum = %checksum,
                    "Stored {}",
                    path.display()
                );
                Ok(StoredArtifact {
                    name: file_name.to_string(),
                    checksum,
                    size,
                })
            }
            Err(CommitError::Exists) => {
                tracing::error!("Cannot upload: file \"{}\" was committed concurrently", file_name);
                Err(UploadError::AlreadyExists(file_name.to_string()))
            }
            Err(CommitError::Io(source)) => {
                tracing::error!("Failed to move \"{}\" into place: {}", file_name, source);
                Err(UploadError::CommitFailed {
                    name: file_name.to_string(),
                    source,
                })
            }
        }
    }
}

async fn discard(staged: StagedFile, error: UploadError) -> UploadError {
    staged.discard().await;
    error
}

/// Reads what is left of a rejected request without storing any of it.
/// Stops quietly at the first transport or framing error.
async fn drain(multipart: &mut Multipart) {
    let mut skipped = 0u64;
    while let Ok(Some(mut field)) = multipart.next_field().await {
        while let Ok(Some(chunk)) = field.chunk().await {
            skipped += chunk.len() as u64;
        }
    }
    tracing::debug!("Discarded {} byte(s) of rejected request", skipped);
}
