//! Server configuration.
//!
//! Stored as TOML, `image-manager.toml` by default:
//!
//! ```toml
//! storage = "/srv/images"
//! secret_key = "..."
//!
//! [retention]
//! max_age_days = 7
//!
//! [[channels]]
//! name = "stable"
//! cleanup = true
//! ```
//!
//! A few settings can be overridden from the environment (a `.env` file is
//! honoured): `IMAGE_MANAGER_STORAGE` and `JWT_SECRET`.

use crate::models::{ApiToken, Channel};
use crate::utils::validation::validate_relative_path;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::env;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

pub const DEFAULT_CONFIG_PATH: &str = "image-manager.toml";

/// Artifacts older than this are reclaimed in channels with cleanup enabled
pub const DEFAULT_MAX_AGE_DAYS: u64 = 7;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("cannot access {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("cannot parse {}: {source}", path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("cannot serialize configuration: {0}")]
    Serialize(#[from] toml::ser::Error),

    #[error("invalid channel \"{name}\": {reason}")]
    InvalidChannel { name: String, reason: String },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerSettings {
    /// Upper bound for one upload request, including body streaming (default: 1 hour)
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,

    /// Maximum accepted request body in bytes (default: 16 GiB)
    #[serde(default = "default_max_upload_bytes")]
    pub max_upload_bytes: usize,
}

fn default_request_timeout_secs() -> u64 {
    3600
}

fn default_max_upload_bytes() -> usize {
    16 * 1024 * 1024 * 1024
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            request_timeout_secs: default_request_timeout_secs(),
            max_upload_bytes: default_max_upload_bytes(),
        }
    }
}

impl ServerSettings {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetentionSettings {
    #[serde(default = "default_max_age_days")]
    pub max_age_days: u64,

    /// Time between two sweeps (default: 1 hour)
    #[serde(default = "default_interval_secs")]
    pub interval_secs: u64,
}

fn default_max_age_days() -> u64 {
    DEFAULT_MAX_AGE_DAYS
}

fn default_interval_secs() -> u64 {
    3600
}

impl Default for RetentionSettings {
    fn default() -> Self {
        Self {
            max_age_days: default_max_age_days(),
            interval_secs: default_interval_secs(),
        }
    }
}

impl RetentionSettings {
    pub fn max_age(&self) -> Duration {
        Duration::from_secs(self.max_age_days * 24 * 60 * 60)
    }

    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }
}

/// Top level configuration. Scalars come first so the TOML output stays valid.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(skip)]
    path: PathBuf,

    /// Root directory that holds one subdirectory per channel
    #[serde(default)]
    pub storage: PathBuf,

    /// HMAC secret used to sign and verify API tokens
    #[serde(default)]
    pub secret_key: String,

    #[serde(default)]
    pub server: ServerSettings,

    #[serde(default)]
    pub retention: RetentionSettings,

    #[serde(default)]
    pub channels: Vec<Channel>,

    #[serde(default)]
    pub tokens: Vec<ApiToken>,
}

impl Config {
    /// Opens `path`, creating an empty configuration file first if needed.
    pub fn create(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        if !path.exists() {
            std::fs::write(path, b"").map_err(|source| ConfigError::Io {
                path: path.to_path_buf(),
                source,
            })?;
            restrict_permissions(path)?;
        }
        Self::open(path)
    }

    pub fn open(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let mut config = Self::from_toml(&content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        config.path = path.to_path_buf();
        config.validate()?;
        Ok(config)
    }

    /// Parses a configuration document and fills in defaults.
    pub fn from_toml(content: &str) -> Result<Self, toml::de::Error> {
        let mut config: Config = toml::from_str(content)?;
        for channel in &mut config.channels {
            if channel.relative_path.is_empty() {
                channel.relative_path = channel.name.clone();
            }
        }
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut seen = HashSet::new();
        for channel in &self.channels {
            if channel.name.trim().is_empty() {
                return Err(ConfigError::InvalidChannel {
                    name: channel.name.clone(),
                    reason: "name cannot be empty".to_string(),
                });
            }
            if !seen.insert(channel.name.as_str()) {
                return Err(ConfigError::InvalidChannel {
                    name: channel.name.clone(),
                    reason: "duplicate name".to_string(),
                });
            }
            validate_relative_path(&channel.relative_path).map_err(|e| {
                ConfigError::InvalidChannel {
                    name: channel.name.clone(),
                    reason: e.message,
                }
            })?;
        }
        Ok(())
    }

    /// Applies overrides from the process environment.
    pub fn apply_env(&mut self) {
        if let Ok(storage) = env::var("IMAGE_MANAGER_STORAGE") {
            if !storage.is_empty() {
                self.storage = PathBuf::from(storage);
            }
        }
        if let Ok(secret) = env::var("JWT_SECRET") {
            if !secret.is_empty() {
                self.secret_key = secret;
            }
        }
    }

    pub fn save(&self) -> Result<(), ConfigError> {
        let content = toml::to_string_pretty(self)?;
        std::fs::write(&self.path, content).map_err(|source| ConfigError::Io {
            path: self.path.clone(),
            source,
        })?;
        restrict_permissions(&self.path)?;

        tracing::debug!(path = %self.path.display(), "configuration saved");
        Ok(())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn channel(&self, name: &str) -> Option<&Channel> {
        self.channels.iter().find(|c| c.name == name)
    }

    /// Whether a token id (the `jti` claim) was issued and not revoked
    pub fn has_token(&self, id: &str) -> bool {
        self.tokens.iter().any(|t| t.id == id)
    }
}

fn restrict_permissions(path: &Path) -> Result<(), ConfigError> {
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600)).map_err(
            |source| ConfigError::Io {
                path: path.to_path_buf(),
                source,
            },
        )?;
    }
    #[cfg(not(unix))]
    let _ = path;
    Ok(())
}
