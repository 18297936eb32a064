use crate::models::Channel;
use crate::utils::validation::STAGING_SUFFIX;
use std::io;
use std::path::{Path, PathBuf};
use tokio::fs::{File, OpenOptions};

/// Maps channels to directories below the storage root.
///
/// Layout: `<root>/<channel.relative_path>/<file name>`, with the staging copy of
/// an in-flight upload at `<file name>.part` in the same directory so the final
/// move never crosses a filesystem boundary.
#[derive(Debug, Clone)]
pub struct StorageLayout {
    root: PathBuf,
    channels: Vec<Channel>,
}

/// Why a staged file could not be committed
#[derive(Debug)]
pub enum CommitError {
    /// The final name is taken, possibly by a concurrent upload
    Exists,
    Io(io::Error),
}

impl StorageLayout {
    pub fn new(root: impl Into<PathBuf>, channels: Vec<Channel>) -> Self {
        Self {
            root: root.into(),
            channels,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn channels(&self) -> &[Channel] {
        &self.channels
    }

    pub fn resolve(&self, name: &str) -> Option<&Channel> {
        self.channels.iter().find(|c| c.name == name)
    }

    pub fn channel_dir(&self, channel: &Channel) -> PathBuf {
        self.root.join(&channel.relative_path)
    }

    pub fn artifact_path(&self, channel: &Channel, file_name: &str) -> PathBuf {
        self.channel_dir(channel).join(file_name)
    }

    /// Creates the channel directory. Idempotent.
    pub async fn ensure_channel_dir(&self, channel: &Channel) -> io::Result<PathBuf> {
        let dir = self.channel_dir(channel);
        tokio::fs::create_dir_all(&dir).await?;
        Ok(dir)
    }

    /// Creates every channel directory, used once at startup.
    pub async fn prepare(&self) -> io::Result<()> {
        for channel in &self.channels {
            let dir = self.ensure_channel_dir(channel).await?;
            tracing::debug!(channel = %channel.name, path = %dir.display(), "channel directory ready");
        }
        Ok(())
    }

    pub async fn artifact_exists(&self, channel: &Channel, file_name: &str) -> io::Result<bool> {
        tokio::fs::try_exists(self.artifact_path(channel, file_name)).await
    }

    /// Opens a fresh staging file for `file_name`.
    ///
    /// Fails with [`io::ErrorKind::AlreadyExists`] when a staging file with that
    /// name is already present; it belongs to someone else and is left alone.
    pub async fn stage(&self, channel: &Channel, file_name: &str) -> io::Result<(StagedFile, File)> {
        let final_path = self.artifact_path(channel, file_name);
        let temp_path = staging_path(&final_path);

        let file = OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&temp_path)
            .await?;

        let staged = StagedFile {
            file_name: file_name.to_string(),
            temp_path,
            final_path,
            armed: true,
        };
        Ok((staged, file))
    }
}

pub fn staging_path(final_path: &Path) -> PathBuf {
    let mut name = final_path.as_os_str().to_os_string();
    name.push(STAGING_SUFFIX);
    PathBuf::from(name)
}

/// A file being received, owned by one upload until it is committed.
///
/// Dropping an uncommitted staged file removes its temporary copy, which covers
/// requests abandoned halfway (client gone, timeout).
#[derive(Debug)]
pub struct StagedFile {
    file_name: String,
    temp_path: PathBuf,
    final_path: PathBuf,
    armed: bool,
}

impl StagedFile {
    pub fn file_name(&self) -> &str {
        &self.file_name
    }

    pub fn temp_path(&self) -> &Path {
        &self.temp_path
    }

    pub fn final_path(&self) -> &Path {
        &self.final_path
    }

    /// Removes the temporary copy.
    pub async fn discard(mut self) {
        self.armed = false;
        if let Err(e) = tokio::fs::remove_file(&self.temp_path).await {
            if e.kind() != io::ErrorKind::NotFound {
                tracing::warn!("Failed to remove {}: {}", self.temp_path.display(), e);
            }
        }
    }

    /// Publishes the temporary copy under its final name without ever replacing
    /// an existing artifact.
    ///
    /// The move runs on the blocking pool: once started it completes even if the
    /// calling future is dropped. The temporary copy is gone afterwards on every
    /// outcome.
    pub async fn commit(mut self) -> Result<PathBuf, CommitError> {
        self.armed = false;
        let temp_path = self.temp_path.clone();
        let final_path = self.final_path.clone();

        let outcome = tokio::task::spawn_blocking(move || {
            let outcome = commit_no_clobber(&temp_path, &final_path);
            if let Err(e) = std::fs::remove_file(&temp_path) {
                if e.kind() != io::ErrorKind::NotFound {
                    tracing::warn!("Failed to remove {}: {}", temp_path.display(), e);
                }
            }
            outcome
        })
        .await
        .map_err(|e| CommitError::Io(io::Error::other(e)))?;

        outcome.map(|_| self.final_path.clone())
    }
}

impl Drop for StagedFile {
    fn drop(&mut self) {
        if self.armed {
            tracing::debug!("Dropping uncommitted {}", self.temp_path.display());
            let _ = std::fs::remove_file(&self.temp_path);
        }
    }
}

/// Links `temp` to `target`, failing atomically if `target` exists.
///
/// Filesystems without hard links fall back to a checked rename, which leaves a
/// small window where a concurrent commit of the same name could be replaced.
fn commit_no_clobber(temp: &Path, target: &Path) -> Result<(), CommitError> {
    match std::fs::hard_link(temp, target) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::AlreadyExists => Err(CommitError::Exists),
        Err(e)
            if matches!(
                e.kind(),
                io::ErrorKind::Unsupported | io::ErrorKind::PermissionDenied
            ) =>
        {
            tracing::debug!("Hard links unavailable ({}), renaming instead", e);
            if target.exists() {
                return Err(CommitError::Exists);
            }
            std::fs::rename(temp, target).map_err(CommitError::Io)
        }
        Err(e) => Err(CommitError::Io(e)),
    }
}
