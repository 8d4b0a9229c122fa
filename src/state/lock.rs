//! Installation-level file lock.
//!
//! Only one update cycle may run against an installation at a time. The lock is an OS-level
//! exclusive lock on `<root>/.launchpatch/.locks/<name>.lock`, released (and the file
//! removed) when the guard is dropped.
//!
//! # Async Safety
//!
//! Opening and locking the file happen inside `spawn_blocking`.

use crate::constants::{
    MAX_BACKOFF_DELAY_MS, STARTING_BACKOFF_DELAY_MS, STATE_DIR, default_lock_timeout,
};
use anyhow::{Context, Result};
use fs4::fs_std::FileExt;
use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio_retry::strategy::ExponentialBackoff;
use tracing::debug;

/// Guard holding the installation lock.
///
/// ```rust,no_run
/// use launchpatch::state::InstallLock;
/// use std::path::Path;
///
/// # async fn example() -> anyhow::Result<()> {
/// let _lock = InstallLock::acquire(Path::new("/games/install"), "update").await?;
/// // ... run the cycle; the lock is released when `_lock` goes out of scope
/// # Ok(())
/// # }
/// ```
#[derive(Debug)]
pub struct InstallLock {
    _file: Arc<File>,
    lock_name: String,
    lock_path: PathBuf,
}

impl Drop for InstallLock {
    fn drop(&mut self) {
        debug!(lock_name = %self.lock_name, "Installation lock released");
        if let Err(e) = std::fs::remove_file(&self.lock_path)
            && e.kind() != std::io::ErrorKind::NotFound
        {
            debug!(lock_name = %self.lock_name, error = %e, "Failed to remove lock file");
        }
    }
}

impl InstallLock {
    /// Acquire the named lock with the default timeout.
    pub async fn acquire(root: &Path, lock_name: &str) -> Result<Self> {
        Self::acquire_with_timeout(root, lock_name, default_lock_timeout()).await
    }

    /// Acquire the named lock, giving up after `timeout`.
    pub async fn acquire_with_timeout(
        root: &Path,
        lock_name: &str,
        timeout: Duration,
    ) -> Result<Self> {
        let display_name = format!("install:{lock_name}");
        debug!(lock_name = %display_name, "Waiting for installation lock");

        let locks_dir = root.join(STATE_DIR).join(".locks");
        tokio::fs::create_dir_all(&locks_dir).await.with_context(|| {
            format!("Failed to create locks directory: {}", locks_dir.display())
        })?;

        let lock_path = locks_dir.join(format!("{lock_name}.lock"));

        let open_path = lock_path.clone();
        let file = tokio::task::spawn_blocking(move || {
            OpenOptions::new().create(true).write(true).truncate(false).open(&open_path)
        })
        .await
        .context("spawn_blocking panicked")?
        .with_context(|| format!("Failed to open lock file: {}", lock_path.display()))?;
        let file = Arc::new(file);

        let start = std::time::Instant::now();
        let backoff = ExponentialBackoff::from_millis(STARTING_BACKOFF_DELAY_MS)
            .max_delay(Duration::from_millis(MAX_BACKOFF_DELAY_MS));

        for delay in backoff {
            let file_clone = Arc::clone(&file);
            let locked = tokio::task::spawn_blocking(move || file_clone.try_lock_exclusive())
                .await
                .context("spawn_blocking panicked")?;

            if let Ok(true) = locked {
                debug!(
                    lock_name = %display_name,
                    wait_ms = start.elapsed().as_millis(),
                    "Installation lock acquired"
                );
                return Ok(Self {
                    _file: file,
                    lock_name: display_name,
                    lock_path,
                });
            }

            let remaining = timeout.saturating_sub(start.elapsed());
            if remaining.is_zero() {
                break;
            }
            tokio::time::sleep(delay.min(remaining)).await;
        }

        Err(anyhow::anyhow!(
            "Another update is already running for {} (waited {:?})",
            root.display(),
            timeout
        ))
    }
}
