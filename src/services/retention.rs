use crate::services::storage::StorageLayout;
use crate::utils::validation::STAGING_SUFFIX;
use async_recursion::async_recursion;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;

/// Outcome of one sweep over all channels.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct SweepReport {
    pub deleted: Vec<PathBuf>,
    /// Channels whose sweep stopped early because of an error
    pub failed_channels: Vec<String>,
}

/// Deletes artifacts older than `max_age` from channels that opted in.
pub struct RetentionSweeper {
    storage: Arc<StorageLayout>,
    max_age: Duration,
}

impl RetentionSweeper {
    pub fn new(storage: Arc<StorageLayout>, max_age: Duration) -> Self {
        Self { storage, max_age }
    }

    pub fn max_age(&self) -> Duration {
        self.max_age
    }

    pub async fn sweep(&self) -> SweepReport {
        self.sweep_at(SystemTime::now()).await
    }

    /// Sweeps as if the current time were `now`.
    ///
    /// A failure inside one channel is logged and ends that channel's sweep; the
    /// other channels are still processed.
    pub async fn sweep_at(&self, now: SystemTime) -> SweepReport {
        let mut report = SweepReport::default();

        for channel in self.storage.channels() {
            if !channel.cleanup_enabled {
                continue;
            }

            let dir = self.storage.channel_dir(channel);
            tracing::debug!(channel = %channel.name, "Sweeping {}", dir.display());

            if let Err(e) = self.sweep_dir(&dir, now, &mut report.deleted).await {
                tracing::error!(
                    "Archive cleanup for channel \"{}\" has failed: {}",
                    channel.name,
                    e
                );
                report.failed_channels.push(channel.name.clone());
            }
        }

        report
    }

    #[async_recursion]
    async fn sweep_dir(
        &self,
        dir: &Path,
        now: SystemTime,
        deleted: &mut Vec<PathBuf>,
    ) -> io::Result<()> {
        let mut entries = match tokio::fs::read_dir(dir).await {
            Ok(entries) => entries,
            // nothing uploaded yet
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(()),
            Err(e) => return Err(e),
        };

        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            let metadata = match entry.metadata().await {
                Ok(metadata) => metadata,
                // removed since it was listed
                Err(e) if e.kind() == io::ErrorKind::NotFound => continue,
                Err(e) => return Err(e),
            };

            if metadata.is_dir() {
                self.sweep_dir(&path, now, deleted).await?;
                continue;
            }

            // in-flight uploads belong to the receiver
            if path
                .file_name()
                .and_then(|n| n.to_str())
                .is_some_and(|n| n.ends_with(STAGING_SUFFIX))
            {
                continue;
            }

            let modified = metadata.modified()?;
            let Ok(age) = now.duration_since(modified) else {
                continue;
            };

            if age > self.max_age {
                tracing::info!(
                    "Deleting {} which is {} hours old",
                    path.display(),
                    age.as_secs() / 3600
                );
                if remove_expired(&path).await? {
                    deleted.push(path);
                }
            }
        }

        Ok(())
    }
}

/// Returns `false` when someone else already removed the file.
async fn remove_expired(path: &Path) -> io::Result<bool> {
    match tokio::fs::remove_file(path).await {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            tracing::debug!("{} is already gone", path.display());
            Ok(false)
        }
        Err(e) => Err(e),
    }
}

/// Runs a [`RetentionSweeper`] periodically until shutdown is signalled.
pub struct RetentionWorker {
    sweeper: RetentionSweeper,
    interval: Duration,
    shutdown: watch::Receiver<bool>,
}

impl RetentionWorker {
    pub fn new(
        sweeper: RetentionSweeper,
        interval: Duration,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        Self {
            sweeper,
            interval: interval.max(Duration::from_secs(1)),
            shutdown,
        }
    }

    /// The first sweep happens immediately.
    pub async fn run(mut self) {
        tracing::info!(
            "🧹 Retention worker started (every {}s, max age {} days)",
            self.interval.as_secs(),
            self.sweeper.max_age().as_secs() / 86400
        );

        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = self.shutdown.changed() => {
                    tracing::info!("🛑 Retention worker shutting down");
                    break;
                }
                _ = ticker.tick() => {
                    let report = self.sweeper.sweep().await;
                    tracing::info!(
                        deleted = report.deleted.len(),
                        failed_channels = report.failed_channels.len(),
                        "✅ Retention sweep completed"
                    );
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Channel;

    const DAY: Duration = Duration::from_secs(24 * 60 * 60);

    fn write_with_age(path: &Path, now: SystemTime, age: Duration) {
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        let file = std::fs::File::create(path).unwrap();
        file.set_modified(now - age).unwrap();
    }

    #[tokio::test]
    async fn test_sweep_deletes_only_expired_files() {
        let dir = tempfile::tempdir().unwrap();
        let now = SystemTime::now();
        let stable = dir.path().join("stable");

        write_with_age(&stable.join("old.iso"), now, 8 * DAY);
        write_with_age(&stable.join("fresh.iso"), now, DAY);
        write_with_age(&stable.join("2024/old-nested.iso"), now, 30 * DAY);
        write_with_age(&stable.join("upload.iso.part"), now, 30 * DAY);

        let layout = StorageLayout::new(dir.path(), vec![Channel::new("stable").with_cleanup(true)]);
        let sweeper = RetentionSweeper::new(Arc::new(layout), 7 * DAY);
        let report = sweeper.sweep_at(now).await;

        assert_eq!(report.deleted.len(), 2);
        assert!(report.failed_channels.is_empty());
        assert!(!stable.join("old.iso").exists());
        assert!(!stable.join("2024/old-nested.iso").exists());
        assert!(stable.join("2024").is_dir());
        assert!(stable.join("fresh.iso").exists());
        assert!(stable.join("upload.iso.part").exists());
    }

    #[tokio::test]
    async fn test_sweep_respects_cleanup_flag() {
        let dir = tempfile::tempdir().unwrap();
        let now = SystemTime::now();
        write_with_age(&dir.path().join("nightly/old.iso"), now, 8 * DAY);

        let layout = StorageLayout::new(dir.path(), vec![Channel::new("nightly")]);
        let sweeper = RetentionSweeper::new(Arc::new(layout), 7 * DAY);
        let report = sweeper.sweep_at(now).await;

        assert!(report.deleted.is_empty());
        assert!(dir.path().join("nightly/old.iso").exists());
    }

    #[tokio::test]
    async fn test_sweep_keeps_files_just_under_max_age() {
        let dir = tempfile::tempdir().unwrap();
        let now = SystemTime::now();
        write_with_age(
            &dir.path().join("stable/edge.iso"),
            now,
            7 * DAY - Duration::from_secs(60),
        );

        let layout = StorageLayout::new(dir.path(), vec![Channel::new("stable").with_cleanup(true)]);
        let sweeper = RetentionSweeper::new(Arc::new(layout), 7 * DAY);

        assert!(sweeper.sweep_at(now).await.deleted.is_empty());
        assert!(dir.path().join("stable/edge.iso").exists());
    }

    #[tokio::test]
    async fn test_missing_channel_dir_is_not_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let layout = StorageLayout::new(dir.path(), vec![Channel::new("stable").with_cleanup(true)]);
        let sweeper = RetentionSweeper::new(Arc::new(layout), 7 * DAY);

        let report = sweeper.sweep().await;
        assert_eq!(report, SweepReport::default());
    }

    #[tokio::test]
    async fn test_file_removed_by_someone_else() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("old.iso");
        std::fs::write(&path, b"image").unwrap();

        assert!(remove_expired(&path).await.unwrap());
        assert!(!path.exists());
        // second removal finds nothing and is not an error
        assert!(!remove_expired(&path).await.unwrap());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_failing_channel_does_not_stop_others() {
        let dir = tempfile::tempdir().unwrap();
        let now = SystemTime::now();
        // a regular file where a directory is expected makes read_dir fail
        std::fs::write(dir.path().join("broken"), b"not a directory").unwrap();
        write_with_age(&dir.path().join("stable/old.iso"), now, 8 * DAY);

        let layout = StorageLayout::new(
            dir.path(),
            vec![
                Channel::new("broken").with_cleanup(true),
                Channel::new("stable").with_cleanup(true),
            ],
        );
        let sweeper = RetentionSweeper::new(Arc::new(layout), 7 * DAY);
        let report = sweeper.sweep_at(now).await;

        assert_eq!(report.failed_channels, vec!["broken".to_string()]);
        assert!(!dir.path().join("stable/old.iso").exists());
    }

    #[tokio::test]
    async fn test_worker_sweeps_and_stops() {
        let dir = tempfile::tempdir().unwrap();
        let now = SystemTime::now();
        let old = dir.path().join("stable/old.iso");
        write_with_age(&old, now, 8 * DAY);

        let layout = StorageLayout::new(dir.path(), vec![Channel::new("stable").with_cleanup(true)]);
        let sweeper = RetentionSweeper::new(Arc::new(layout), 7 * DAY);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let handle = tokio::spawn(RetentionWorker::new(sweeper, DAY, shutdown_rx).run());

        for _ in 0..100 {
            if !old.exists() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        assert!(!old.exists());

        shutdown_tx.send(true).unwrap();
        tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .unwrap()
            .unwrap();
    }
}
