use crate::error::{ErrorKind, UploadError};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// A named bucket of artifacts mapped to a directory below the storage root.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Channel {
    pub name: String,

    /// Directory relative to the storage root, defaults to `name`
    #[serde(rename = "path", default)]
    pub relative_path: String,

    /// Opt-in for the retention sweep
    #[serde(rename = "cleanup", default)]
    pub cleanup_enabled: bool,
}

impl Channel {
    pub fn new(name: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            relative_path: name.clone(),
            name,
            cleanup_enabled: false,
        }
    }

    pub fn with_path(mut self, relative_path: impl Into<String>) -> Self {
        self.relative_path = relative_path.into();
        self
    }

    pub fn with_cleanup(mut self, cleanup_enabled: bool) -> Self {
        self.cleanup_enabled = cleanup_enabled;
        self
    }
}

/// An issued API token. Only tokens listed in the configuration are accepted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApiToken {
    /// The `jti` claim of the signed token
    pub id: String,
    pub name: String,
    pub created_at: DateTime<Utc>,
}

/// Digest declared by the client for a file of the same request.
///
/// The wire form is the literal string `"<fileName>:<digest>"`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChecksumClaim {
    pub file_name: String,
    pub declared_digest: String,
}

impl ChecksumClaim {
    pub fn new(file_name: impl Into<String>, declared_digest: impl Into<String>) -> Self {
        Self {
            file_name: file_name.into(),
            declared_digest: declared_digest.into(),
        }
    }

    pub fn parse(value: &str) -> Result<Self, UploadError> {
        let mut fields = value.split(':');
        match (fields.next(), fields.next(), fields.next()) {
            (Some(file_name), Some(digest), None) if !file_name.is_empty() && !digest.is_empty() => {
                Ok(Self::new(file_name, digest))
            }
            _ => Err(UploadError::BadChecksumFormat),
        }
    }
}

impl std::fmt::Display for ChecksumClaim {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.file_name, self.declared_digest)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct StoredArtifact {
    pub name: String,
    pub checksum: String,
    pub size: u64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, ToSchema)]
pub struct UploadResponse {
    pub channel: String,
    /// Files committed by this request, in arrival order
    pub files: Vec<StoredArtifact>,
}

/// JSON body of every error response.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ErrorBody {
    pub error: String,
    #[serde(default)]
    #[schema(value_type = Option<String>, example = "already_exists")]
    pub kind: Option<ErrorKind>,
}
