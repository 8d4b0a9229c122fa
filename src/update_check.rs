//! Deciding whether an installation needs an update, and preparing the updater.
//!
//! The latest version identifier and the manifest come from a [`VersionSource`]. In the
//! launcher that is the session collaborator; [`HttpVersionSource`] reads both from plain URLs.

use crate::core::PatchError;
use crate::download::Downloader;
use crate::manifest;
use crate::state::{StatePaths, UpdateCache};
use crate::updater::Updater;
use anyhow::Result;
use reqwest::{Client, Url};
use std::future::Future;
use std::path::PathBuf;
use tracing::{debug, info, warn};

/// Supplies the latest version identifier and the package manifest.
pub trait VersionSource: Send + Sync {
    /// Latest published version identifier.
    fn latest_version(&self) -> impl Future<Output = Result<String>> + Send;

    /// The package manifest document for that version.
    fn fetch_manifest(&self) -> impl Future<Output = Result<String>> + Send;
}

/// Reads the version identifier and manifest over HTTP.
#[derive(Debug, Clone)]
pub struct HttpVersionSource {
    client: Client,
    version_url: Url,
    manifest_url: Url,
}

impl HttpVersionSource {
    /// Source reading `version_url` (plain text) and `manifest_url` with `client`.
    #[must_use]
    pub const fn new(client: Client, version_url: Url, manifest_url: Url) -> Self {
        Self {
            client,
            version_url,
            manifest_url,
        }
    }

    async fn get_text(&self, url: &Url) -> Result<String> {
        let response = self.client.get(url.clone()).send().await.map_err(|e| {
            PatchError::Network {
                url: url.to_string(),
                reason: e.to_string(),
            }
        })?;
        let status = response.status();
        if !status.is_success() {
            return Err(PatchError::HttpStatus {
                url: url.to_string(),
                status: status.as_u16(),
            }
            .into());
        }
        Ok(response.text().await.map_err(|e| PatchError::Network {
            url: url.to_string(),
            reason: e.to_string(),
        })?)
    }
}

impl VersionSource for HttpVersionSource {
    async fn latest_version(&self) -> Result<String> {
        let version = self.get_text(&self.version_url).await?.trim().to_string();
        if version.is_empty() {
            return Err(PatchError::Other {
                message: format!("Empty version identifier from {}", self.version_url),
            }
            .into());
        }
        Ok(version)
    }

    async fn fetch_manifest(&self) -> Result<String> {
        self.get_text(&self.manifest_url).await
    }
}

/// Update check for one installation.
#[derive(Debug)]
pub struct UpdateCheck<S: VersionSource> {
    root: PathBuf,
    source: S,
    latest: Option<String>,
}

impl<S: VersionSource> UpdateCheck<S> {
    /// Check for the installation at `root`.
    pub const fn new(root: PathBuf, source: S) -> Self {
        Self {
            root,
            source,
            latest: None,
        }
    }

    /// Latest version seen by [`Self::needs_update`], if it ran.
    #[must_use]
    pub fn latest_version(&self) -> Option<&str> {
        self.latest.as_deref()
    }

    /// Version recorded by the last successful cycle.
    pub async fn installed_version(&self) -> Result<Option<String>> {
        let cache = UpdateCache::load(&StatePaths::new(&self.root).cache).await?;
        Ok(cache.current_version)
    }

    /// Whether the latest version differs from the one last applied.
    ///
    /// A failure to reach the source is returned to the caller, which may choose to carry on
    /// without checking.
    pub async fn needs_update(&mut self) -> Result<bool> {
        let installed = self.installed_version().await?;
        let latest = self.source.latest_version().await?;
        let needed = installed.as_deref() != Some(latest.as_str());
        info!(
            installed = installed.as_deref().unwrap_or("none"),
            latest = %latest,
            needed,
            "Checked for updates"
        );
        self.latest = Some(latest);
        Ok(needed)
    }

    /// Fetch and validate the manifest, returning an updater that records the latest version.
    ///
    /// When the latest version cannot be determined the updater still runs, but leaves the
    /// recorded version unchanged, so the next check reports an update again.
    pub async fn create_updater<D: Downloader>(&mut self, downloader: D) -> Result<Updater<D>> {
        if self.latest.is_none() {
            match self.source.latest_version().await {
                Ok(version) => self.latest = Some(version),
                Err(e) => warn!("Latest version unknown, it will not be recorded: {e:#}"),
            }
        }

        let document = self.source.fetch_manifest().await?;
        let manifest = manifest::parse(&self.root, &document)?;
        debug!(
            version = self.latest.as_deref().unwrap_or("unknown"),
            files = manifest.applicable_count,
            bytes = manifest.total_estimated_size,
            "Prepared updater"
        );

        let updater = Updater::new(self.root.clone(), document, downloader);
        Ok(match self.latest.clone() {
            Some(version) => updater.with_version(version),
            None => updater,
        })
    }
}
