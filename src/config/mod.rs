//! Launcher configuration.
//!
//! The configuration is a TOML file supplying the installation root, the URLs the update
//! engine talks to, and the download policy:
//!
//! ```toml
//! install_root = "/games/example"
//! manifest_url = "https://cdn.example.com/game/package.xml"
//! version_url = "https://cdn.example.com/game/version.txt"
//! trust_roots = "/etc/launchpatch/roots.pem"
//! verify_signatures = true
//!
//! [download]
//! retry_attempts = 5
//! retry_delay_secs = 5
//! read_timeout_secs = 600
//! connect_timeout_secs = 30
//! ```
//!
//! # Location
//!
//! - Unix/macOS: `~/.launchpatch/config.toml`
//! - Windows: `%LOCALAPPDATA%\launchpatch\config.toml`
//! - Override: `LAUNCHPATCH_CONFIG_PATH`, or `--config` on the command line
//!
//! A missing file yields the defaults.

use crate::constants::{
    DEFAULT_CONNECT_TIMEOUT, DEFAULT_READ_TIMEOUT, DEFAULT_RETRY_ATTEMPTS, DEFAULT_RETRY_DELAY,
};
use crate::core::PatchError;
use crate::updater::UpdateOptions;
use anyhow::{Context, Result};
use reqwest::Url;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::fs;

/// Environment variable overriding the configuration path.
pub const CONFIG_PATH_ENV: &str = "LAUNCHPATCH_CONFIG_PATH";

/// Download policy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DownloadConfig {
    /// Attempts per file before a cycle fails
    pub retry_attempts: u32,
    /// Fixed delay between attempts
    pub retry_delay_secs: u64,
    /// Longest wait for data on an open connection
    pub read_timeout_secs: u64,
    /// Longest wait for a connection
    pub connect_timeout_secs: u64,
}

impl Default for DownloadConfig {
    fn default() -> Self {
        Self {
            retry_attempts: DEFAULT_RETRY_ATTEMPTS,
            retry_delay_secs: DEFAULT_RETRY_DELAY.as_secs(),
            read_timeout_secs: DEFAULT_READ_TIMEOUT.as_secs(),
            connect_timeout_secs: DEFAULT_CONNECT_TIMEOUT.as_secs(),
        }
    }
}

impl DownloadConfig {
    /// Read timeout as a duration.
    #[must_use]
    pub const fn read_timeout(&self) -> Duration {
        Duration::from_secs(self.read_timeout_secs)
    }

    /// Connect timeout as a duration.
    #[must_use]
    pub const fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }
}

fn is_default_download(config: &DownloadConfig) -> bool {
    *config == DownloadConfig::default()
}

/// The launcher's configuration file.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LauncherConfig {
    /// Installation directory the engine manages
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub install_root: Option<PathBuf>,

    /// Package manifest location
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub manifest_url: Option<String>,

    /// Plain-text latest-version location
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version_url: Option<String>,

    /// PEM bundle of built-in trusted roots
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trust_roots: Option<PathBuf>,

    /// Require signatures on entries whose manifest does not say
    #[serde(default)]
    pub verify_signatures: bool,

    /// Download policy
    #[serde(default, skip_serializing_if = "is_default_download")]
    pub download: DownloadConfig,
}

impl LauncherConfig {
    /// Load from the default location, or return defaults when the file does not exist.
    pub async fn load() -> Result<Self> {
        Self::load_with_optional(None).await
    }

    /// Load from `path` when given, otherwise from the default location.
    pub async fn load_with_optional(path: Option<PathBuf>) -> Result<Self> {
        let path = match path {
            Some(path) => path,
            None => Self::default_path()?,
        };
        if path.exists() {
            Self::load_from(&path).await
        } else {
            Ok(Self::default())
        }
    }

    /// Load from a specific file.
    pub async fn load_from(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read config from {}", path.display()))?;

        toml::from_str(&content)
            .with_context(|| format!("Failed to parse config from {}", path.display()))
    }

    /// Save to a specific file, creating parent directories.
    pub async fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await.with_context(|| {
                format!("Failed to create config directory: {}", parent.display())
            })?;
        }

        let content = toml::to_string_pretty(self).context("Failed to serialize config")?;
        fs::write(path, content)
            .await
            .with_context(|| format!("Failed to write config to {}", path.display()))
    }

    /// Default configuration path, honouring [`CONFIG_PATH_ENV`].
    pub fn default_path() -> Result<PathBuf> {
        if let Ok(path) = std::env::var(CONFIG_PATH_ENV)
            && !path.is_empty()
        {
            return Ok(PathBuf::from(path));
        }

        let config_dir = if cfg!(target_os = "windows") {
            dirs::data_local_dir()
                .ok_or_else(|| anyhow::anyhow!("Unable to determine local data directory"))?
                .join("launchpatch")
        } else {
            dirs::home_dir()
                .ok_or_else(|| anyhow::anyhow!("Unable to determine home directory"))?
                .join(".launchpatch")
        };

        Ok(config_dir.join("config.toml"))
    }

    /// The installation root, which must be configured.
    pub fn install_root(&self) -> Result<PathBuf, PatchError> {
        self.install_root.clone().ok_or_else(|| PatchError::Config {
            message: "install_root is not set".to_string(),
        })
    }

    /// The manifest URL, which must be configured and valid.
    pub fn manifest_url(&self) -> Result<Url, PatchError> {
        required_url("manifest_url", self.manifest_url.as_deref())
    }

    /// The version URL, which must be configured and valid.
    pub fn version_url(&self) -> Result<Url, PatchError> {
        required_url("version_url", self.version_url.as_deref())
    }

    /// Cycle policy derived from this configuration.
    #[must_use]
    pub fn update_options(&self, force_reinstall: bool) -> UpdateOptions {
        UpdateOptions {
            force_reinstall,
            retry_attempts: self.download.retry_attempts,
            retry_delay: Duration::from_secs(self.download.retry_delay_secs),
            verify_signatures_default: self.verify_signatures,
        }
    }
}

fn required_url(field: &str, value: Option<&str>) -> Result<Url, PatchError> {
    let value = value.ok_or_else(|| PatchError::Config {
        message: format!("{field} is not set"),
    })?;
    Url::parse(value).map_err(|e| PatchError::Config {
        message: format!("{field} '{value}' is not a valid URL: {e}"),
    })
}
