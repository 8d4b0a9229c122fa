//! Payload and manifest fixtures.

use crate::constants::STATE_DIR;
use flate2::Compression;
use flate2::write::GzEncoder;
use std::io::{Cursor, Write};
use std::path::Path;
use walkdir::WalkDir;
use zip::write::SimpleFileOptions;

/// Build a zip archive in memory. Names ending in `/` become directory entries.
pub fn zip_bytes(members: &[(&str, &[u8])]) -> Vec<u8> {
    let mut writer = zip::ZipWriter::new(Cursor::new(Vec::new()));
    for (name, data) in members {
        if name.ends_with('/') {
            writer.add_directory(*name, SimpleFileOptions::default()).expect("add zip directory");
        } else {
            writer.start_file(*name, SimpleFileOptions::default()).expect("start zip entry");
            writer.write_all(data).expect("write zip entry");
        }
    }
    writer.finish().expect("finish zip").into_inner()
}

/// Gzip-compress `data`.
pub fn gzip(data: &[u8]) -> Vec<u8> {
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(data).expect("gzip write");
    encoder.finish().expect("gzip finish")
}

/// Every file under `root` as a sorted `/`-separated relative path, excluding the state
/// directory.
pub fn list_files(root: &Path) -> Vec<String> {
    let mut files: Vec<String> = WalkDir::new(root)
        .into_iter()
        .filter_entry(|e| e.file_name() != STATE_DIR)
        .filter_map(Result::ok)
        .filter(|e| e.file_type().is_file())
        .filter_map(|e| {
            let relative = e.path().strip_prefix(root).ok()?;
            Some(
                relative
                    .components()
                    .map(|c| c.as_os_str().to_string_lossy().into_owned())
                    .collect::<Vec<_>>()
                    .join("/"),
            )
        })
        .collect();
    files.sort();
    files
}

/// Builder for manifest documents.
///
/// ```rust,no_run
/// use launchpatch::test_utils::ManifestFixture;
///
/// let document = ManifestFixture::new()
///     .group("https://cdn.test/", "bin", Some("SHA1"))
///     .file("fileA.jar", 2000)
///     .archive("fileB.zip.gz", 4096)
///     .build();
/// ```
#[derive(Debug, Clone, Default)]
pub struct ManifestFixture {
    groups: Vec<String>,
    current: Option<(String, Vec<String>)>,
}

impl ManifestFixture {
    /// Empty manifest.
    pub fn new() -> Self {
        Self::default()
    }

    /// Start a new file group.
    pub fn group(self, source: &str, dest: &str, verify: Option<&str>) -> Self {
        let verify = verify.map(|v| format!(r#" verify="{v}""#)).unwrap_or_default();
        self.group_with_attributes(&format!(r#"source="{source}" dest="{dest}"{verify}"#))
    }

    /// Start a new file group with raw attributes.
    pub fn group_with_attributes(mut self, attributes: &str) -> Self {
        self.close_group();
        self.current = Some((format!("<filegroup {attributes}>"), Vec::new()));
        self
    }

    /// Add a `<file>` to the current group.
    pub fn file(self, name: &str, size: u64) -> Self {
        self.element(&format!(r#"<file size="{size}">{name}</file>"#))
    }

    /// Add an `<archive>` to the current group.
    pub fn archive(self, name: &str, size: u64) -> Self {
        self.element(&format!(r#"<archive size="{size}">{name}</archive>"#))
    }

    /// Add a raw element to the current group.
    pub fn element(mut self, element: &str) -> Self {
        if let Some((_, elements)) = self.current.as_mut() {
            elements.push(element.to_string());
        }
        self
    }

    fn close_group(&mut self) {
        if let Some((open, elements)) = self.current.take() {
            self.groups.push(format!("{open}{}</filegroup>", elements.concat()));
        }
    }

    /// Render the document.
    pub fn build(mut self) -> String {
        self.close_group();
        format!(r#"<?xml version="1.0"?><package version="1.0">{}</package>"#, self.groups.concat())
    }
}
