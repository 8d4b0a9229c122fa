//! Digest/version cache.
//!
//! Persists, per installation:
//! - the last applied version id, compared by the update check
//! - a per-file check value (server ETag or computed digest) sent as `If-None-Match`
//! - remembered component selections
//!
//! The cache is only an optimisation. A corrupt file is logged and replaced by an empty
//! cache, which at worst causes everything to be downloaded again.

use crate::utils::fs::atomic_write;
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use tracing::{debug, warn};

/// Cache document stored as `cache.json`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct UpdateCache {
    /// Version id applied by the last successful cycle
    #[serde(rename = "current-version-id", default, skip_serializing_if = "Option::is_none")]
    pub current_version: Option<String>,

    /// Group → check value
    #[serde(default)]
    pub hashes: BTreeMap<String, String>,

    /// Component id → selected
    #[serde(default)]
    pub components: BTreeMap<String, bool>,

    /// When the last successful cycle finished
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
}

impl UpdateCache {
    /// Load the cache, falling back to an empty one when missing or unreadable.
    pub async fn load(path: &Path) -> Result<Self> {
        let content = match tokio::fs::read_to_string(path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %path.display(), "No update cache found");
                return Ok(Self::default());
            }
            Err(e) => {
                return Err(e)
                    .with_context(|| format!("Failed to read update cache: {}", path.display()));
            }
        };

        match serde_json::from_str(&content) {
            Ok(cache) => Ok(cache),
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Ignoring corrupt update cache");
                Ok(Self::default())
            }
        }
    }

    /// Save the cache atomically.
    pub async fn save(&self, path: &Path) -> Result<()> {
        let content =
            serde_json::to_string_pretty(self).context("Failed to serialize update cache")?;
        let path_buf = path.to_path_buf();
        tokio::task::spawn_blocking(move || atomic_write(&path_buf, content.as_bytes()))
            .await
            .context("spawn_blocking panicked")?
            .with_context(|| format!("Failed to write update cache: {}", path.display()))?;
        debug!(path = %path.display(), "Saved update cache");
        Ok(())
    }

    /// Cached check value for a group.
    #[must_use]
    pub fn hash(&self, group: &str) -> Option<&str> {
        self.hashes.get(group).map(String::as_str)
    }

    /// Remember the check value for a group.
    pub fn set_hash(&mut self, group: &str, value: impl Into<String>) {
        self.hashes.insert(group.to_string(), value.into());
    }

    /// Forget the check value for a group.
    pub fn remove_hash(&mut self, group: &str) {
        self.hashes.remove(group);
    }

    /// Whether `component` is selected, using `default` when no choice was remembered.
    #[must_use]
    pub fn is_selected(&self, component: &str, default: bool) -> bool {
        self.components.get(component).copied().unwrap_or(default)
    }

    /// Remember a component selection.
    pub fn set_selected(&mut self, component: &str, selected: bool) {
        self.components.insert(component.to_string(), selected);
    }
}
