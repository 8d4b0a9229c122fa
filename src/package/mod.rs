//! Package files: one downloadable manifest entry plus how it is installed.
//!
//! The set of kinds is closed, so [`PackageFile`] is an enum with a `deploy`/`verify` pair
//! per variant:
//!
//! - [`PackageFile::Single`] decodes the downloaded bytes and writes them to one destination
//! - [`PackageFile::Archive`] decodes a zip and expands it into the group's directory
//!
//! Both variants share a [`PackageInfo`] with the fields the updater mutates (the `ignored`
//! flag) and reads (URL, temp path, weight for progress).
//!
//! Deployment is synchronous file I/O. The updater runs it on the blocking pool.

mod deploy;


use crate::core::PatchError;
use crate::download::DigestAlgorithm;
use crate::filters::FilterRegistry;
use crate::manifest::{EntryKind, FileEntry, FileGroup};
use crate::security::SignatureVerifier;
use crate::state::UninstallLog;
use crate::utils::path_validation::{check_subchild, is_state_path, relative_slash_path};
use anyhow::Result;
use reqwest::Url;
use std::fs::File;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Extensions whose containers carry JAR-style signing metadata.
pub const SIGNED_CONTAINER_EXTENSIONS: [&str; 2] = ["jar", "zip"];

/// Fields shared by every package file kind.
#[derive(Debug, Clone, PartialEq)]
pub struct PackageInfo {
    /// Download URL
    pub url: Url,
    /// Where the download is written; exists only between download and cleanup
    pub temp_path: PathBuf,
    /// Final path of a single file; for archives, the path the group is labelled by
    pub destination: PathBuf,
    /// Declared size, used to weight progress
    pub size: u64,
    /// Name as published, including compression suffixes
    pub published_name: String,
    /// Name with every filter suffix removed
    pub original_filename: String,
    /// Uninstall-log and cache key: `destination` relative to the root, `/`-separated
    pub group: String,
    /// Set when the cache shows the installed content is current
    pub ignored: bool,
    /// Whether a signature must be verified before deploying
    pub verify_signature: bool,
    /// Digest algorithm the download is checked with
    pub digest: Option<DigestAlgorithm>,
}

impl PackageInfo {
    /// Extension of the original file name, lowercase, without the dot.
    #[must_use]
    pub fn original_extension(&self) -> String {
        Path::new(&self.original_filename)
            .extension()
            .map(|e| e.to_string_lossy().to_ascii_lowercase())
            .unwrap_or_default()
    }

    /// Directory the file (or the archive's members) is written into.
    #[must_use]
    pub fn destination_dir(&self) -> &Path {
        self.destination.parent().unwrap_or(&self.destination)
    }
}

/// A downloadable unit of the installation.
#[derive(Debug, Clone, PartialEq)]
pub enum PackageFile {
    /// Installed as one file
    Single(PackageInfo),
    /// Expanded into the destination directory
    Archive(PackageInfo),
}

impl PackageFile {
    /// Build the package file for a manifest entry.
    ///
    /// `index` keeps temp names unique within the cycle workspace `temp_dir`.
    /// `verify_signature_default` applies when neither the entry nor its group set a flag.
    pub fn from_entry(
        root: &Path,
        group: &FileGroup,
        entry: &FileEntry,
        temp_dir: &Path,
        index: usize,
        filters: &FilterRegistry,
        verify_signature_default: bool,
    ) -> Result<Self, PatchError> {
        let published_name = entry
            .target
            .file_name()
            .map_or_else(|| entry.filename.clone(), |name| name.to_string_lossy().into_owned());
        let original_filename = filters.original_name(&published_name);
        let destination = entry
            .target
            .parent()
            .map_or_else(|| root.join(&original_filename), |dir| dir.join(&original_filename));
        check_subchild(root, &destination)?;
        // Checked after stripping: the deployed name, not the published one, must stay out.
        if is_state_path(root, &destination) {
            return Err(PatchError::InvalidPath {
                path: destination.display().to_string(),
            });
        }
        let group_label =
            relative_slash_path(root, &destination).ok_or_else(|| PatchError::InvalidPath {
                path: destination.display().to_string(),
            })?;

        let info = PackageInfo {
            url: entry.url.clone(),
            temp_path: temp_dir.join(format!("{index:04}.part")),
            destination,
            size: entry.size,
            published_name,
            original_filename,
            group: group_label,
            ignored: false,
            verify_signature: entry.verify_signature.unwrap_or(verify_signature_default),
            digest: group.verify,
        };

        Ok(match entry.kind {
            EntryKind::File => Self::Single(info),
            EntryKind::Archive => Self::Archive(info),
        })
    }

    /// Shared fields.
    #[must_use]
    pub const fn info(&self) -> &PackageInfo {
        match self {
            Self::Single(info) | Self::Archive(info) => info,
        }
    }

    /// Shared fields, mutably.
    pub fn info_mut(&mut self) -> &mut PackageInfo {
        match self {
            Self::Single(info) | Self::Archive(info) => info,
        }
    }

    /// Whether this is an archive.
    #[must_use]
    pub const fn is_archive(&self) -> bool {
        matches!(self, Self::Archive(_))
    }

    /// Whether the previous generation left this file installed.
    ///
    /// A single file must still exist on disk; an archive group must be in the old log.
    #[must_use]
    pub fn previously_installed(&self, old_log: &UninstallLog) -> bool {
        match self {
            Self::Single(info) => info.destination.is_file(),
            Self::Archive(info) => old_log.has_group(&info.group),
        }
    }

    /// Install the downloaded content under `root`, recording every placed path in `new_log`.
    ///
    /// # Errors
    ///
    /// [`PatchError::Signature`] when an archive member escapes the destination directory and
    /// [`PatchError::Deploy`] for any I/O failure, both naming the absolute destination.
    pub fn deploy(
        &self,
        root: &Path,
        filters: &FilterRegistry,
        new_log: &mut UninstallLog,
    ) -> Result<(), PatchError> {
        let info = self.info();
        debug!(path = %info.destination.display(), archive = self.is_archive(), "Deploying");
        let result = match self {
            Self::Single(info) => deploy::single(info, filters, new_log),
            Self::Archive(info) => deploy::archive(info, root, filters, new_log),
        };
        result.map_err(|e| classify_deploy_error(&info.destination, e))
    }

    /// Verify the downloaded content's signature.
    ///
    /// Only zip-style containers can be verified. Any other extension is rejected with
    /// [`PatchError::UnsupportedVerification`] unless the user accepted it in the trust record.
    pub fn verify(
        &self,
        filters: &FilterRegistry,
        verifier: &SignatureVerifier,
    ) -> Result<(), PatchError> {
        let info = self.info();
        let extension = info.original_extension();
        let path = info.destination.display().to_string();

        if !SIGNED_CONTAINER_EXTENSIONS.contains(&extension.as_str()) {
            if verifier.trust().accepts_extension(&extension) {
                debug!(path = %path, extension = %extension, "Extension accepted without signature");
                return Ok(());
            }
            return Err(PatchError::UnsupportedVerification {
                path,
                extension,
            });
        }

        let archive = decoded_file(info, filters).map_err(|e| PatchError::Signature {
            path: path.clone(),
            reason: format!("{e:#}"),
        })?;
        verifier.verify_archive(archive).map_err(|e| PatchError::Signature {
            path,
            reason: e.to_string(),
        })?;
        debug!(path = %info.destination.display(), "Signature verified");
        Ok(())
    }

    /// Delete the temp file, if any.
    pub fn cleanup(&self) {
        let path = &self.info().temp_path;
        if let Err(e) = crate::utils::fs::remove_file_if_exists(path) {
            debug!(path = %path.display(), error = %e, "Failed to remove temp file");
        }
    }
}

/// The downloaded content with every filter undone, as a seekable file.
///
/// Without filters the temp file itself is returned; otherwise the decoded bytes are spooled
/// to an anonymous file next to it.
pub(crate) fn decoded_file(info: &PackageInfo, filters: &FilterRegistry) -> Result<File> {
    let (_, chain) = filters.strip(&info.published_name);
    if chain.is_empty() {
        return Ok(File::open(&info.temp_path)?);
    }

    let mut reader = filters.open(&info.temp_path, &info.published_name)?;
    let workspace = info.temp_path.parent().unwrap_or_else(|| Path::new("."));
    let mut spool = tempfile::tempfile_in(workspace)?;
    std::io::copy(&mut reader, &mut spool)?;
    std::io::Seek::rewind(&mut spool)?;
    Ok(spool)
}

fn classify_deploy_error(destination: &Path, error: anyhow::Error) -> PatchError {
    let path = destination.display().to_string();
    match error.downcast::<PatchError>() {
        Ok(PatchError::InvalidPath {
            path: offending,
        }) => PatchError::Signature {
            path,
            reason: format!("archive entry escapes the destination directory: {offending}"),
        },
        Ok(other @ (PatchError::Signature { .. } | PatchError::Deploy { .. })) => other,
        Ok(other) => PatchError::Deploy {
            path,
            reason: other.to_string(),
        },
        Err(error) => PatchError::Deploy {
            path,
            reason: format!("{error:#}"),
        },
    }
}
