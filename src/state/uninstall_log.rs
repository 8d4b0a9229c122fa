//! Generation-keyed record of installed paths.
//!
//! Each successful cycle writes the set of `(group, relative path)` pairs it installed. The
//! next cycle compares that *old* generation with the *new* one it builds while deploying;
//! paths in the old log that are missing from the new one are orphans and get deleted.
//!
//! On disk the log is UTF-8 text with one `group:relativePath` pair per line. Lines are split
//! at the first `:`; lines without one are skipped.

use crate::utils::fs::atomic_write;
use anyhow::{Context, Result};
use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;
use tracing::{debug, warn};

/// One generation of installed paths, keyed by group.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UninstallLog {
    groups: BTreeMap<String, BTreeSet<String>>,
    paths: BTreeSet<String>,
}

impl UninstallLog {
    /// An empty generation.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Record that `path` was installed on behalf of `group`.
    pub fn add(&mut self, group: &str, path: &str) {
        self.groups.entry(group.to_string()).or_default().insert(path.to_string());
        self.paths.insert(path.to_string());
    }

    /// Whether any group installed `path`.
    #[must_use]
    pub fn has(&self, path: &str) -> bool {
        self.paths.contains(path)
    }

    /// Whether `group` has any recorded paths.
    #[must_use]
    pub fn has_group(&self, group: &str) -> bool {
        self.groups.get(group).is_some_and(|paths| !paths.is_empty())
    }

    /// Copy every path `other` recorded for `group` into this generation.
    ///
    /// Returns the number of paths carried forward.
    pub fn copy_group_from(&mut self, other: &Self, group: &str) -> usize {
        let Some(paths) = other.groups.get(group) else {
            return 0;
        };
        for path in paths {
            self.add(group, path);
        }
        paths.len()
    }

    /// All `(group, path)` pairs in a stable order.
    pub fn entries(&self) -> impl Iterator<Item = (&str, &str)> {
        self.groups
            .iter()
            .flat_map(|(group, paths)| paths.iter().map(move |p| (group.as_str(), p.as_str())))
    }

    /// Number of distinct paths.
    #[must_use]
    pub fn len(&self) -> usize {
        self.paths.len()
    }

    /// Whether nothing is recorded.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.paths.is_empty()
    }

    /// Parse the line-oriented format, skipping malformed lines.
    #[must_use]
    pub fn parse(content: &str) -> Self {
        let mut log = Self::new();
        for (number, line) in content.lines().enumerate() {
            let line = line.trim_end_matches('\r');
            if line.trim().is_empty() {
                continue;
            }
            match line.split_once(':') {
                Some((group, path)) if !group.is_empty() && !path.is_empty() => {
                    log.add(group, path);
                }
                _ => debug!(line = number + 1, "Skipping malformed uninstall log line"),
            }
        }
        log
    }

    /// Render in the on-disk format.
    #[must_use]
    pub fn render(&self) -> String {
        let mut out = String::new();
        for (group, path) in self.entries() {
            out.push_str(group);
            out.push(':');
            out.push_str(path);
            out.push('\n');
        }
        out
    }

    /// Read a log from disk. A missing file is an empty generation.
    pub async fn read(path: &Path) -> Result<Self> {
        match tokio::fs::read(path).await {
            Ok(bytes) => {
                let content = String::from_utf8_lossy(&bytes);
                let log = Self::parse(&content);
                debug!(path = %path.display(), entries = log.len(), "Loaded uninstall log");
                Ok(log)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %path.display(), "No uninstall log found");
                Ok(Self::new())
            }
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Failed to read uninstall log");
                Err(e).with_context(|| format!("Failed to read uninstall log: {}", path.display()))
            }
        }
    }

    /// Replace the log on disk atomically.
    pub async fn write(&self, path: &Path) -> Result<()> {
        let content = self.render();
        let path_buf = path.to_path_buf();
        tokio::task::spawn_blocking(move || atomic_write(&path_buf, content.as_bytes()))
            .await
            .context("spawn_blocking panicked")?
            .with_context(|| format!("Failed to write uninstall log: {}", path.display()))?;
        debug!(path = %path.display(), entries = self.len(), "Saved uninstall log");
        Ok(())
    }
}
