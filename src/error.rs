use serde::{Deserialize, Serialize};
use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Machine-readable classification of an upload failure.
///
/// The server sends it next to the human readable message so that a client can
/// tell a name collision apart from a digest mismatch without parsing text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    ChannelNotFound,
    AlreadyExists,
    WriteFailed,
    CommitFailed,
    BadChecksumFormat,
    ChecksumMismatch,
    UnsupportedField,
    InvalidFileName,
    MalformedRequest,
    SourceUnreadable,
    TransportFailed,
    Unauthorized,
    #[serde(other)]
    Unknown,
}

#[derive(Error, Debug)]
pub enum UploadError {
    #[error("channel \"{0}\" not found")]
    ChannelNotFound(String),

    #[error("file \"{0}\" already exists")]
    AlreadyExists(String),

    #[error("failed to write \"{name}\": {source}")]
    WriteFailed {
        name: String,
        #[source]
        source: io::Error,
    },

    #[error("failed to commit \"{name}\": {source}")]
    CommitFailed {
        name: String,
        #[source]
        source: io::Error,
    },

    #[error("bad checksum format")]
    BadChecksumFormat,

    #[error("bad checksum for {0}")]
    ChecksumMismatch(String),

    #[error("unsupported form field {0}")]
    UnsupportedField(String),

    #[error("invalid file name \"{0}\"")]
    InvalidFileName(String),

    #[error("malformed multipart body: {0}")]
    MalformedRequest(String),

    #[error("cannot read \"{}\": {source}", path.display())]
    SourceUnreadable {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("transport failed: {0}")]
    TransportFailed(String),

    #[error("server rejected upload ({status}): {message}")]
    Rejected {
        status: u16,
        kind: ErrorKind,
        message: String,
    },
}

impl UploadError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            UploadError::ChannelNotFound(_) => ErrorKind::ChannelNotFound,
            UploadError::AlreadyExists(_) => ErrorKind::AlreadyExists,
            UploadError::WriteFailed { .. } => ErrorKind::WriteFailed,
            UploadError::CommitFailed { .. } => ErrorKind::CommitFailed,
            UploadError::BadChecksumFormat => ErrorKind::BadChecksumFormat,
            UploadError::ChecksumMismatch(_) => ErrorKind::ChecksumMismatch,
            UploadError::UnsupportedField(_) => ErrorKind::UnsupportedField,
            UploadError::InvalidFileName(_) => ErrorKind::InvalidFileName,
            UploadError::MalformedRequest(_) => ErrorKind::MalformedRequest,
            UploadError::SourceUnreadable { .. } => ErrorKind::SourceUnreadable,
            UploadError::TransportFailed(_) => ErrorKind::TransportFailed,
            UploadError::Rejected { kind, .. } => *kind,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rejected_reports_remote_kind() {
        let err = UploadError::Rejected {
            status: 409,
            kind: ErrorKind::AlreadyExists,
            message: "file \"disk.iso\" already exists".to_string(),
        };
        assert_eq!(err.kind(), ErrorKind::AlreadyExists);
    }

    #[test]
    fn test_unknown_kind_deserializes() {
        let kind: ErrorKind = serde_json::from_str("\"quota_exceeded\"").unwrap();
        assert_eq!(kind, ErrorKind::Unknown);

        let kind: ErrorKind = serde_json::from_str("\"checksum_mismatch\"").unwrap();
        assert_eq!(kind, ErrorKind::ChecksumMismatch);
    }
}
