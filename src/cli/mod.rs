//! Command-line interface.
//!
//! The binary drives the update engine from a terminal:
//!
//! ```bash
//! launchpatch check                      # is an update needed?
//! launchpatch update                     # run one update cycle
//! launchpatch update --force             # ignore the digest cache
//! launchpatch trust list                 # show accepted exceptions
//! launchpatch trust add-cert signer.pem  # accept a certificate by fingerprint
//! launchpatch trust add-extension dll    # accept unverifiable files of a type
//! ```
//!
//! Every command reads [`LauncherConfig`] first; `--config` overrides its location.
//!
//! # Logging
//!
//! `--verbose` enables `debug` output for the crate, the default is `info`, and `--quiet`
//! installs no subscriber at all. `RUST_LOG`, when set, always wins.

mod check;
mod trust;
mod update;

pub use check::CheckCommand;
pub use trust::{TrustAction, TrustCommand};
pub use update::UpdateCommand;

use crate::config::LauncherConfig;
use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

/// Runtime settings derived from the global flags.
///
/// Built by [`Cli::build_config`], or directly by callers that drive a [`Cli`] without parsing
/// global flags.
#[derive(Debug, Clone, Default)]
pub struct CliConfig {
    /// Log level for the crate, `None` for no logging
    pub log_level: Option<String>,
    /// Hide progress bars
    pub no_progress: bool,
    /// Explicit configuration file
    pub config_path: Option<PathBuf>,
}

impl CliConfig {
    /// Defaults: no logging, progress shown, default config location.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Install the tracing subscriber for this configuration.
    ///
    /// Does nothing when a subscriber is already installed.
    pub fn init_logging(&self) {
        let filter = match (EnvFilter::try_from_default_env(), &self.log_level) {
            (Ok(filter), _) => filter,
            (Err(_), Some(level)) => EnvFilter::new(format!("launchpatch={level}")),
            (Err(_), None) => return,
        };

        let _ = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(false)
            .with_writer(std::io::stderr)
            .try_init();
    }

    /// Load the launcher configuration this run uses.
    pub async fn load_launcher_config(&self) -> Result<LauncherConfig> {
        LauncherConfig::load_with_optional(self.config_path.clone()).await
    }
}

/// Manifest-driven updater for game launcher installations.
#[derive(Parser)]
#[command(
    name = "launchpatch",
    about = "Keep a game installation in sync with its published package manifest",
    version,
    long_about = "launchpatch downloads, verifies and deploys the files listed in a package \
                  manifest, removing files the previous version installed that are no longer listed."
)]
pub struct Cli {
    /// The subcommand to execute.
    #[command(subcommand)]
    command: Commands,

    /// Enable debug output.
    ///
    /// Equivalent to `RUST_LOG=launchpatch=debug`. Mutually exclusive with `--quiet`.
    #[arg(short, long, global = true, conflicts_with = "quiet")]
    verbose: bool,

    /// Suppress log output; errors are still printed.
    #[arg(short, long, global = true)]
    quiet: bool,

    /// Path to the configuration file.
    ///
    /// Overrides `~/.launchpatch/config.toml` and `LAUNCHPATCH_CONFIG_PATH`.
    #[arg(short, long, global = true, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Disable progress bars.
    ///
    /// Also honoured through `LAUNCHPATCH_NO_PROGRESS`.
    #[arg(long, global = true)]
    no_progress: bool,
}

/// Available subcommands.
#[derive(Subcommand)]
enum Commands {
    /// Check whether the installation is behind the latest published version.
    Check(CheckCommand),

    /// Bring the installation up to date with the package manifest.
    Update(UpdateCommand),

    /// Manage accepted certificates and file types for this installation.
    Trust(TrustCommand),
}

impl Cli {
    /// Execute the parsed command.
    pub async fn execute(self) -> Result<()> {
        let config = self.build_config();
        self.execute_with_config(config).await
    }

    /// Translate global flags into a [`CliConfig`].
    #[must_use]
    pub fn build_config(&self) -> CliConfig {
        let log_level = if self.verbose {
            Some("debug".to_string())
        } else if self.quiet {
            None
        } else {
            Some("info".to_string())
        };

        CliConfig {
            log_level,
            no_progress: self.no_progress,
            config_path: self.config.clone(),
        }
    }

    /// Execute the command with an explicit configuration.
    pub async fn execute_with_config(self, config: CliConfig) -> Result<()> {
        config.init_logging();

        match self.command {
            Commands::Check(cmd) => cmd.execute(&config).await,
            Commands::Update(cmd) => cmd.execute(&config).await,
            Commands::Trust(cmd) => cmd.execute(&config).await,
        }
    }
}
