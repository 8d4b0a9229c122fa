//! `launchpatch trust`: the only writer of the installation's trust record.
//!
//! Accepted certificates validate signing chains from custom update sources; accepted
//! extensions let files that cannot carry a signature be deployed when verification is required.

use super::CliConfig;
use crate::security::{TrustRecord, describe, fingerprint};
use crate::state::StatePaths;
use anyhow::{Context, Result, bail};
use clap::{Args, Subcommand};
use colored::Colorize;
use std::path::{Path, PathBuf};
use tracing::info;
use x509_certificate::CapturedX509Certificate;

/// Inspect or extend the accepted trust exceptions.
#[derive(Debug, Args)]
pub struct TrustCommand {
    /// Action to perform
    #[command(subcommand)]
    pub action: TrustAction,
}

/// Trust record actions.
#[derive(Debug, Subcommand)]
pub enum TrustAction {
    /// List accepted certificates and extensions.
    List,

    /// Accept every certificate in a PEM file.
    AddCert {
        /// PEM file containing one or more certificates
        #[arg(value_name = "PEM")]
        pem: PathBuf,
    },

    /// Accept files of this type without a signature.
    AddExtension {
        /// File extension, with or without the leading dot
        #[arg(value_name = "EXT")]
        extension: String,
    },
}

impl TrustCommand {
    /// Run the action against the configured installation.
    pub async fn execute(self, config: &CliConfig) -> Result<()> {
        let launcher = config.load_launcher_config().await?;
        let record_path = StatePaths::new(&launcher.install_root()?).trust_record;

        match self.action {
            TrustAction::List => list(&record_path).await,
            TrustAction::AddCert {
                pem,
            } => add_certificates(&record_path, &pem).await,
            TrustAction::AddExtension {
                extension,
            } => add_extension(&record_path, &extension).await,
        }
    }
}

async fn list(record_path: &Path) -> Result<()> {
    let record = TrustRecord::load(record_path).await?;
    if record.accepted_certificates.is_empty() && record.accepted_extensions.is_empty() {
        println!("No trust exceptions accepted");
        return Ok(());
    }

    if !record.accepted_certificates.is_empty() {
        println!("{}", "Accepted certificates (SHA-256):".bold());
        for fingerprint in &record.accepted_certificates {
            println!("  {fingerprint}");
        }
    }
    if !record.accepted_extensions.is_empty() {
        println!("{}", "Accepted extensions:".bold());
        for extension in &record.accepted_extensions {
            println!("  .{extension}");
        }
    }
    Ok(())
}

async fn add_certificates(record_path: &Path, pem: &Path) -> Result<()> {
    let data = tokio::fs::read(pem)
        .await
        .with_context(|| format!("Failed to read certificate file: {}", pem.display()))?;
    let certs = CapturedX509Certificate::from_pem_multiple(&data)
        .with_context(|| format!("Failed to parse certificates from {}", pem.display()))?;
    if certs.is_empty() {
        bail!("No certificates found in {}", pem.display());
    }

    let mut record = TrustRecord::load(record_path).await?;
    for cert in &certs {
        let fingerprint = fingerprint(cert);
        if record.accept_certificate(&fingerprint) {
            info!(fingerprint = %fingerprint, "Accepted certificate");
            println!("{} {} ({})", "Accepted".green(), describe(cert), fingerprint);
        } else {
            println!("Already accepted: {}", describe(cert));
        }
    }
    record.save(record_path).await
}

async fn add_extension(record_path: &Path, extension: &str) -> Result<()> {
    let normalized = extension.trim().trim_start_matches('.');
    if normalized.is_empty() || normalized.contains(['/', '\\']) {
        bail!("Invalid file extension '{extension}'");
    }

    let mut record = TrustRecord::load(record_path).await?;
    if record.accept_extension(normalized) {
        info!(extension = normalized, "Accepted extension");
        println!("{} .{}", "Accepted".green(), normalized.to_ascii_lowercase());
    } else {
        println!("Already accepted: .{}", normalized.to_ascii_lowercase());
    }
    record.save(record_path).await
}
