//! File system helpers.
//!
//! State files (uninstall log, cache, trust record) are always written with
//! [`atomic_write`] so an interrupted write never leaves a truncated record behind.

use anyhow::{Context, Result};
use std::fs;
use std::io::Write;
use std::path::Path;
use tracing::debug;

/// Create `path` and all parents if missing.
pub fn ensure_dir(path: &Path) -> Result<()> {
    if !path.exists() {
        fs::create_dir_all(path)
            .with_context(|| format!("Failed to create directory: {}", path.display()))?;
    }
    Ok(())
}

/// Write `content` to `path` through a temp file and rename.
pub fn atomic_write(path: &Path, content: &[u8]) -> Result<()> {
    if let Some(parent) = path.parent() {
        ensure_dir(parent)?;
    }

    let temp_path = path.with_extension("tmp");

    {
        let mut file = fs::File::create(&temp_path)
            .with_context(|| format!("Failed to create temp file: {}", temp_path.display()))?;

        file.write_all(content)
            .with_context(|| format!("Failed to write to temp file: {}", temp_path.display()))?;

        file.sync_all().with_context(|| "Failed to sync file to disk")?;
    }

    fs::rename(&temp_path, path)
        .with_context(|| format!("Failed to rename temp file to: {}", path.display()))?;

    Ok(())
}

/// Remove a file, treating "not found" as success.
pub fn remove_file_if_exists(path: &Path) -> std::io::Result<bool> {
    match fs::remove_file(path) {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(e),
    }
}

/// Remove empty directories from `start` upwards, stopping at `root`.
///
/// Failures are ignored; a directory that cannot be removed simply stays.
pub fn prune_empty_parents(root: &Path, start: &Path) {
    let mut current = start.to_path_buf();
    while current != root && current.starts_with(root) {
        if fs::remove_dir(&current).is_err() {
            break;
        }
        debug!(path = %current.display(), "Removed empty directory");
        if !current.pop() {
            break;
        }
    }
}
