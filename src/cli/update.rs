//! `launchpatch update`: run one update cycle against the configured manifest.
//!
//! Ctrl-C cancels the cycle cooperatively: the current transfer stops at its next poll point,
//! the cycle workspace is removed and the installation keeps its previous generation.

use super::CliConfig;
use crate::download::HttpDownloader;
use crate::security::TrustStore;
use crate::state::StatePaths;
use crate::update_check::{HttpVersionSource, UpdateCheck};
use crate::updater::{UpdateOutcome, UpdateReport};
use crate::utils::TerminalProgress;
use anyhow::Result;
use clap::Args;
use colored::Colorize;
use std::sync::Arc;
use tracing::{debug, warn};

/// Download and deploy everything the manifest lists.
#[derive(Debug, Args)]
pub struct UpdateCommand {
    /// Re-download every file, ignoring the digest cache
    #[arg(long)]
    pub force: bool,
}

impl UpdateCommand {
    /// Run the cycle and print a summary.
    pub async fn execute(self, config: &CliConfig) -> Result<()> {
        let launcher = config.load_launcher_config().await?;
        let root = launcher.install_root()?;
        let paths = StatePaths::new(&root);

        let downloader = HttpDownloader::with_timeouts(
            launcher.download.connect_timeout(),
            launcher.download.read_timeout(),
        )?;
        let source = HttpVersionSource::new(
            downloader.client().clone(),
            launcher.version_url()?,
            launcher.manifest_url()?,
        );
        let trust =
            TrustStore::load(launcher.trust_roots.as_deref(), &paths.trust_record).await?;

        let mut check = UpdateCheck::new(root, source);
        match check.needs_update().await {
            Ok(false) if !self.force => debug!("Installed version is current; verifying files"),
            Ok(_) => {}
            Err(e) => warn!("Could not check the latest version, updating anyway: {e:#}"),
        }

        let mut updater = check
            .create_updater(downloader)
            .await?
            .with_trust(Arc::new(trust))
            .with_listener(Arc::new(TerminalProgress::new(config.no_progress)))
            .with_options(launcher.update_options(self.force));

        let cancel = updater.cancellation_token();
        let interrupt = tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                cancel.cancel();
            }
        });
        let outcome = updater.perform().await;
        interrupt.abort();

        match outcome? {
            UpdateOutcome::Completed(report) => print_report(&report),
            UpdateOutcome::Cancelled => println!("{}", "Update cancelled".yellow().bold()),
        }
        Ok(())
    }
}

fn print_report(report: &UpdateReport) {
    println!(
        "{} {}",
        "Update complete".green().bold(),
        report.version.as_deref().map(|v| format!("({v})")).unwrap_or_default()
    );
    println!("  Downloaded: {}", report.downloaded.to_string().cyan());
    println!("  Up to date: {}", report.skipped);
    println!("  Installed:  {}", report.deployed);
    if report.deleted > 0 {
        println!("  Removed:    {}", report.deleted.to_string().yellow());
    }
}
