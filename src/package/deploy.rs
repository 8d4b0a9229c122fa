//! Writing decoded content into the installation.

use super::{PackageInfo, decoded_file};
use crate::core::PatchError;
use crate::filters::FilterRegistry;
use crate::security::jar;
use crate::state::UninstallLog;
use crate::utils::path_validation::{is_state_path, relative_slash_path, resolve_within};
use anyhow::{Context, Result};
use std::fs;
use std::io;
use std::path::Path;
use tempfile::NamedTempFile;
use tracing::{debug, trace};

/// Copy `reader` to `target` through a sibling temp file, replacing any existing file.
fn write_replacing(reader: &mut impl io::Read, target: &Path) -> Result<u64> {
    let parent = target.parent().unwrap_or_else(|| Path::new("."));
    fs::create_dir_all(parent)
        .with_context(|| format!("Failed to create directory: {}", parent.display()))?;

    let mut staged = NamedTempFile::new_in(parent)
        .with_context(|| format!("Failed to stage file in: {}", parent.display()))?;
    let written = io::copy(reader, &mut staged)
        .with_context(|| format!("Failed to write: {}", target.display()))?;
    staged.as_file().sync_all()?;
    staged
        .persist(target)
        .map_err(|e| e.error)
        .with_context(|| format!("Failed to replace: {}", target.display()))?;
    Ok(written)
}

/// Install a single file.
pub(super) fn single(
    info: &PackageInfo,
    filters: &FilterRegistry,
    new_log: &mut UninstallLog,
) -> Result<()> {
    let mut reader = filters.open(&info.temp_path, &info.published_name)?;
    let bytes = write_replacing(&mut reader, &info.destination)?;
    new_log.add(&info.group, &info.group);
    debug!(path = %info.destination.display(), bytes, "Installed file");
    Ok(())
}

/// Expand a zip archive into the destination directory.
///
/// Signing metadata is skipped. Each member is checked to stay inside the destination
/// directory and outside the state directory, and logged before any byte of it is written.
pub(super) fn archive(
    info: &PackageInfo,
    root: &Path,
    filters: &FilterRegistry,
    new_log: &mut UninstallLog,
) -> Result<()> {
    let base = info.destination_dir();
    let file = decoded_file(info, filters)?;
    let mut archive = zip::ZipArchive::new(file)
        .with_context(|| format!("Failed to open archive: {}", info.destination.display()))?;

    let mut extracted = 0usize;
    for index in 0..archive.len() {
        let mut entry = archive.by_index(index)?;
        let name = entry.name().to_string();

        if jar::is_metadata(&name) {
            trace!(entry = %name, "Skipping signing metadata");
            continue;
        }

        let target = resolve_within(base, &name)?;
        if is_state_path(root, &target) {
            return Err(PatchError::Signature {
                path: info.destination.display().to_string(),
                reason: format!("archive entry targets the launcher state directory: {name}"),
            }
            .into());
        }

        if entry.is_dir() {
            fs::create_dir_all(&target)
                .with_context(|| format!("Failed to create directory: {}", target.display()))?;
            continue;
        }

        let relative = relative_slash_path(root, &target).ok_or_else(|| PatchError::InvalidPath {
            path: target.display().to_string(),
        })?;
        new_log.add(&info.group, &relative);

        write_replacing(&mut entry, &target)?;
        extracted += 1;
    }

    debug!(
        archive = %info.destination.display(),
        entries = extracted,
        "Expanded archive"
    );
    Ok(())
}
