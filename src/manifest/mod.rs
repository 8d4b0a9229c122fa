//! Package manifest model and parser.
//!
//! A manifest describes every file that belongs in an installation and where to fetch it:
//!
//! ```xml
//! <package version="1.0">
//!   <filegroup source="https://cdn.example.com/game/" dest="bin" verify="SHA1">
//!     <file size="2000">fileA.jar</file>
//!     <file platform="windows" filename="natives.dll">win/natives.dll.gz</file>
//!   </filegroup>
//!   <filegroup source="https://cdn.example.com/game/" dest="lib" component="hd-textures">
//!     <archive size="4096">fileB.zip.gz</archive>
//!   </filegroup>
//! </package>
//! ```
//!
//! Parsing is pure: nothing touches the network or the filesystem. The parser enforces three
//! rules on the untrusted document:
//!
//! - the `version` attribute must equal [`SUPPORTED_FORMAT_VERSION`]
//! - every resolved target must stay lexically inside the installation root
//! - nothing may target the engine's own state directory, trust record included; such entries
//!   are skipped (see [`is_state_path`])
//!
//! Entries tagged for another platform are dropped without error.


use crate::constants::SUPPORTED_FORMAT_VERSION;
use crate::core::PatchError;
use crate::download::DigestAlgorithm;
use crate::utils::path_validation::{check_subchild, is_state_path, normalize_lexically};
use anyhow::Result;
use quick_xml::Reader;
use quick_xml::events::{BytesStart, Event};
use reqwest::Url;
use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use tracing::debug;

/// Operating systems a manifest entry can be restricted to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Platform {
    /// Microsoft Windows
    Windows,
    /// Linux and other Unix-likes
    Linux,
    /// macOS
    MacOs,
}

impl Platform {
    /// The platform this process runs on.
    #[must_use]
    pub fn current() -> Self {
        if cfg!(target_os = "windows") {
            Self::Windows
        } else if cfg!(target_os = "macos") {
            Self::MacOs
        } else {
            Self::Linux
        }
    }
}

impl FromStr for Platform {
    type Err = PatchError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "windows" | "win" => Ok(Self::Windows),
            "linux" => Ok(Self::Linux),
            "macos" | "osx" | "mac" => Ok(Self::MacOs),
            other => Err(PatchError::ManifestParse {
                reason: format!("unknown platform '{other}'"),
            }),
        }
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Windows => "windows",
            Self::Linux => "linux",
            Self::MacOs => "macos",
        })
    }
}

/// Whether an entry is installed as-is or expanded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryKind {
    /// `<file>`: copied to its target
    File,
    /// `<archive>`: expanded into the group's destination directory
    Archive,
}

/// One `<file>` or `<archive>` element.
#[derive(Debug, Clone, PartialEq)]
pub struct FileEntry {
    /// File or archive
    pub kind: EntryKind,
    /// Fully resolved download URL
    pub url: Url,
    /// Name as published, including any compression suffixes
    pub filename: String,
    /// `root/dest/filename`, checked to be inside the root
    pub target: PathBuf,
    /// Declared size in bytes, 0 when absent
    pub size: u64,
    /// Platform restriction, if any
    pub platform: Option<Platform>,
    /// Explicit signature requirement; `None` defers to the group and then to configuration
    pub verify_signature: Option<bool>,
}

/// One `<filegroup>` element with its applicable entries.
#[derive(Debug, Clone, PartialEq)]
pub struct FileGroup {
    /// Base URL entries are resolved against
    pub source: Url,
    /// Destination directory relative to the installation root, `/`-separated
    pub dest: String,
    /// Digest algorithm downloads are checked with
    pub verify: Option<DigestAlgorithm>,
    /// Optional component this group belongs to
    pub component: Option<String>,
    /// Whether the component is selected when no choice was remembered
    pub selected_by_default: bool,
    /// Signature requirement inherited by entries without their own
    pub verify_signature: Option<bool>,
    /// Applicable entries in document order
    pub entries: Vec<FileEntry>,
}

/// A parsed, validated package manifest.
#[derive(Debug, Clone, PartialEq)]
pub struct Manifest {
    /// Installation root every target was checked against
    pub root: PathBuf,
    /// Format version declared by the document
    pub version: String,
    /// File groups in document order
    pub groups: Vec<FileGroup>,
    /// Sum of declared sizes of applicable entries
    pub total_estimated_size: u64,
    /// Number of applicable entries
    pub applicable_count: usize,
}

impl Manifest {
    /// Iterate over every applicable entry with its group.
    pub fn entries(&self) -> impl Iterator<Item = (&FileGroup, &FileEntry)> {
        self.groups.iter().flat_map(|g| g.entries.iter().map(move |e| (g, e)))
    }
}

/// Parse a manifest document for the platform this process runs on.
pub fn parse(root: &Path, document: &str) -> Result<Manifest> {
    parse_for_platform(root, document, Platform::current())
}

/// Parse a manifest document, keeping only entries applicable to `platform`.
///
/// # Errors
///
/// - [`PatchError::UnsupportedFormat`] when the version tag is missing or unsupported
/// - [`PatchError::ManifestParse`] for malformed XML or attribute values
/// - [`PatchError::InvalidPath`] when an entry resolves outside `root`
pub fn parse_for_platform(root: &Path, document: &str, platform: Platform) -> Result<Manifest> {
    let root = normalize_lexically(root).ok_or_else(|| PatchError::InvalidPath {
        path: root.display().to_string(),
    })?;

    let mut reader = Reader::from_str(document);
    reader.trim_text(true);

    let mut version: Option<String> = None;
    let mut groups: Vec<FileGroup> = Vec::new();
    let mut current_group: Option<FileGroup> = None;
    let mut current_entry: Option<PendingEntry> = None;

    loop {
        let event = reader.read_event().map_err(|e| PatchError::ManifestParse {
            reason: format!("XML error at byte {}: {e}", reader.buffer_position()),
        })?;

        match event {
            Event::Start(ref e) | Event::Empty(ref e) => {
                let is_empty = matches!(event, Event::Empty(_));
                let attrs = attributes(e)?;
                match e.name().as_ref() {
                    b"package" => {
                        let found = attrs.get("version").cloned().unwrap_or_default();
                        if found != SUPPORTED_FORMAT_VERSION {
                            return Err(PatchError::UnsupportedFormat {
                                found,
                                expected: SUPPORTED_FORMAT_VERSION.to_string(),
                            }
                            .into());
                        }
                        version = Some(found);
                    }
                    b"filegroup" => {
                        require_package(version.as_deref())?;
                        let group = start_group(&attrs)?;
                        if is_empty {
                            groups.push(group);
                        } else {
                            current_group = Some(group);
                        }
                    }
                    name @ (b"file" | b"archive") => {
                        require_package(version.as_deref())?;
                        if current_group.is_none() {
                            return Err(PatchError::ManifestParse {
                                reason: "file entry outside of a filegroup".to_string(),
                            }
                            .into());
                        }
                        let kind =
                            if name == b"archive" { EntryKind::Archive } else { EntryKind::File };
                        let pending = PendingEntry {
                            kind,
                            attrs,
                            text: String::new(),
                        };
                        if is_empty {
                            return Err(PatchError::ManifestParse {
                                reason: "file entry without a path".to_string(),
                            }
                            .into());
                        }
                        current_entry = Some(pending);
                    }
                    _ => {}
                }
            }
            Event::Text(t) => {
                if let Some(entry) = current_entry.as_mut() {
                    let text = t.unescape().map_err(|e| PatchError::ManifestParse {
                        reason: e.to_string(),
                    })?;
                    entry.text.push_str(&text);
                }
            }
            Event::CData(t) => {
                if let Some(entry) = current_entry.as_mut() {
                    entry.text.push_str(&String::from_utf8_lossy(&t.into_inner()));
                }
            }
            Event::End(ref e) => match e.name().as_ref() {
                b"file" | b"archive" => {
                    if let (Some(pending), Some(group)) =
                        (current_entry.take(), current_group.as_mut())
                    {
                        if let Some(entry) = finish_entry(&root, group, pending, platform)? {
                            group.entries.push(entry);
                        }
                    }
                }
                b"filegroup" => {
                    if let Some(group) = current_group.take() {
                        groups.push(group);
                    }
                }
                _ => {}
            },
            Event::Eof => break,
            _ => {}
        }
    }

    let version = version.ok_or_else(|| PatchError::UnsupportedFormat {
        found: String::new(),
        expected: SUPPORTED_FORMAT_VERSION.to_string(),
    })?;

    let total_estimated_size =
        groups.iter().flat_map(|g| &g.entries).map(|e| e.size).fold(0u64, u64::saturating_add);
    let applicable_count = groups.iter().map(|g| g.entries.len()).sum();

    debug!(
        groups = groups.len(),
        applicable = applicable_count,
        total_size = total_estimated_size,
        "Parsed package manifest"
    );

    Ok(Manifest {
        root,
        version,
        groups,
        total_estimated_size,
        applicable_count,
    })
}

struct PendingEntry {
    kind: EntryKind,
    attrs: HashMap<String, String>,
    text: String,
}

fn require_package(version: Option<&str>) -> Result<(), PatchError> {
    if version.is_none() {
        return Err(PatchError::UnsupportedFormat {
            found: String::new(),
            expected: SUPPORTED_FORMAT_VERSION.to_string(),
        });
    }
    Ok(())
}

fn attributes(e: &BytesStart<'_>) -> Result<HashMap<String, String>, PatchError> {
    let mut attrs = HashMap::new();
    for attr in e.attributes() {
        let attr = attr.map_err(|e| PatchError::ManifestParse {
            reason: e.to_string(),
        })?;
        let key = String::from_utf8_lossy(attr.key.as_ref()).into_owned();
        let value = attr.unescape_value().map_err(|e| PatchError::ManifestParse {
            reason: e.to_string(),
        })?;
        attrs.insert(key, value.into_owned());
    }
    Ok(attrs)
}

fn parse_bool(value: &str, name: &str) -> Result<bool, PatchError> {
    match value.trim().to_ascii_lowercase().as_str() {
        "true" | "yes" | "1" => Ok(true),
        "false" | "no" | "0" => Ok(false),
        other => Err(PatchError::ManifestParse {
            reason: format!("invalid boolean '{other}' for attribute '{name}'"),
        }),
    }
}

fn start_group(attrs: &HashMap<String, String>) -> Result<FileGroup, PatchError> {
    let source = attrs.get("source").ok_or_else(|| PatchError::ManifestParse {
        reason: "filegroup without a source attribute".to_string(),
    })?;
    // Url::join replaces the last segment unless the base ends with a slash
    let source = if source.ends_with('/') { source.clone() } else { format!("{source}/") };
    let source = Url::parse(&source).map_err(|e| PatchError::ManifestParse {
        reason: format!("invalid source URL '{source}': {e}"),
    })?;

    let dest = attrs.get("dest").map(|d| d.trim_matches('/').to_string()).unwrap_or_default();
    let verify = attrs.get("verify").map(|v| v.parse::<DigestAlgorithm>()).transpose()?;
    let component = attrs.get("component").filter(|c| !c.is_empty()).cloned();
    let selected_by_default =
        attrs.get("selected").map(|v| parse_bool(v, "selected")).transpose()?.unwrap_or(true);
    let verify_signature = attrs
        .get("verify-signature")
        .map(|v| parse_bool(v, "verify-signature"))
        .transpose()?;

    Ok(FileGroup {
        source,
        dest,
        verify,
        component,
        selected_by_default,
        verify_signature,
        entries: Vec::new(),
    })
}

fn finish_entry(
    root: &Path,
    group: &FileGroup,
    pending: PendingEntry,
    platform: Platform,
) -> Result<Option<FileEntry>, PatchError> {
    let path = pending.text.trim();
    if path.is_empty() {
        return Err(PatchError::ManifestParse {
            reason: "file entry without a path".to_string(),
        });
    }

    let entry_platform = pending.attrs.get("platform").map(|p| p.parse::<Platform>()).transpose()?;
    if let Some(wanted) = entry_platform
        && wanted != platform
    {
        debug!(entry = %path, platform = %wanted, "Skipping entry for another platform");
        return Ok(None);
    }

    let url = group.source.join(path).map_err(|e| PatchError::ManifestParse {
        reason: format!("invalid entry URL '{path}': {e}"),
    })?;

    let filename = match pending.attrs.get("filename") {
        Some(name) if !name.trim().is_empty() => name.trim().to_string(),
        _ => path.rsplit('/').next().unwrap_or(path).to_string(),
    };

    let mut target = root.to_path_buf();
    if !group.dest.is_empty() {
        target.push(&group.dest);
    }
    target.push(&filename);
    check_subchild(root, &target)?;
    let target = normalize_lexically(&target).ok_or_else(|| PatchError::InvalidPath {
        path: target.display().to_string(),
    })?;
    if target == root {
        return Err(PatchError::InvalidPath {
            path: target.display().to_string(),
        });
    }

    if is_state_path(root, &target) {
        debug!(entry = %path, "Skipping entry targeting the protected state directory");
        return Ok(None);
    }

    let size = match pending.attrs.get("size") {
        Some(size) => size.trim().parse::<u64>().map_err(|_| PatchError::ManifestParse {
            reason: format!("invalid size '{size}' for entry '{path}'"),
        })?,
        None => 0,
    };

    let verify_signature = match pending.attrs.get("verify-signature") {
        Some(v) => Some(parse_bool(v, "verify-signature")?),
        None => group.verify_signature,
    };

    Ok(Some(FileEntry {
        kind: pending.kind,
        url,
        filename,
        target,
        size,
        platform: entry_platform,
        verify_signature,
    }))
}
