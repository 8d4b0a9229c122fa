//! `launchpatch check`: report whether an update is needed.

use super::CliConfig;
use crate::download::HttpDownloader;
use crate::update_check::{HttpVersionSource, UpdateCheck};
use anyhow::Result;
use clap::Args;
use colored::Colorize;

/// Compare the installed version with the latest published one.
#[derive(Debug, Args)]
pub struct CheckCommand {}

impl CheckCommand {
    /// Run the check and print the result.
    pub async fn execute(self, config: &CliConfig) -> Result<()> {
        let launcher = config.load_launcher_config().await?;
        let root = launcher.install_root()?;
        let downloader = HttpDownloader::with_timeouts(
            launcher.download.connect_timeout(),
            launcher.download.read_timeout(),
        )?;
        let source = HttpVersionSource::new(
            downloader.client().clone(),
            launcher.version_url()?,
            launcher.manifest_url()?,
        );

        let mut check = UpdateCheck::new(root, source);
        let installed = check.installed_version().await?;
        let needed = check.needs_update().await?;
        let latest = check.latest_version().unwrap_or_default();

        if needed {
            println!(
                "{} {} → {}",
                "Update available:".yellow().bold(),
                installed.as_deref().unwrap_or("not installed"),
                latest.green()
            );
        } else {
            println!("{} {}", "Up to date:".green().bold(), latest);
        }
        Ok(())
    }
}
