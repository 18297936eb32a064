use std::path::{Component, Path};

/// Suffix of the staging name a file is written to before it is committed
pub const STAGING_SUFFIX: &str = ".part";

/// Maximum length of an artifact name in bytes
pub const MAX_FILE_NAME_LEN: usize = 255;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    pub code: &'static str,
    pub message: String,
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.code, self.message)
    }
}

impl std::error::Error for ValidationError {}

/// Checks that an artifact name is a single, plain path component.
///
/// Names are never rewritten: a stored artifact must keep exactly the name the
/// producer declared, otherwise its checksum claim could not be matched.
pub fn validate_file_name(name: &str) -> Result<(), ValidationError> {
    if name.is_empty() {
        return Err(ValidationError {
            code: "EMPTY_FILENAME",
            message: "file name cannot be empty".to_string(),
        });
    }

    if name.len() > MAX_FILE_NAME_LEN {
        return Err(ValidationError {
            code: "FILENAME_TOO_LONG",
            message: format!("file name exceeds {} bytes", MAX_FILE_NAME_LEN),
        });
    }

    if name == "." || name == ".." {
        tracing::warn!("Path traversal attempt detected: {}", name);
        return Err(ValidationError {
            code: "PATH_TRAVERSAL",
            message: format!("'{}' is not a file name", name),
        });
    }

    // ':' separates the name from the digest in checksum claims
    if let Some(c) = name
        .chars()
        .find(|c| c.is_control() || matches!(c, '/' | '\\' | '"' | ':'))
    {
        if c == '/' || c == '\\' {
            tracing::warn!("Path traversal attempt detected: {}", name);
        }
        return Err(ValidationError {
            code: "INVALID_CHARACTER",
            message: format!("file name contains forbidden character {:?}", c),
        });
    }

    if name.ends_with(STAGING_SUFFIX) {
        return Err(ValidationError {
            code: "RESERVED_SUFFIX",
            message: format!("'{}' names are reserved for staging", STAGING_SUFFIX),
        });
    }

    Ok(())
}

/// Validates that a channel directory does not escape the storage root.
pub fn validate_relative_path(path: &str) -> Result<(), ValidationError> {
    if path.is_empty() {
        return Err(ValidationError {
            code: "EMPTY_PATH",
            message: "path cannot be empty".to_string(),
        });
    }

    for component in Path::new(path).components() {
        match component {
            Component::Normal(_) | Component::CurDir => {}
            Component::ParentDir => {
                return Err(ValidationError {
                    code: "PATH_TRAVERSAL",
                    message: format!("parent directory traversal not allowed: {}", path),
                });
            }
            Component::RootDir | Component::Prefix(_) => {
                return Err(ValidationError {
                    code: "ABSOLUTE_PATH",
                    message: format!("absolute path not allowed: {}", path),
                });
            }
        }
    }

    Ok(())
}
