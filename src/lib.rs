//! launchpatch: manifest-driven update engine for game launcher installations.
//!
//! An installation is a directory tree described by a remote XML package manifest. One update
//! cycle brings the tree in line with the manifest:
//!
//! 1. parse the manifest, dropping entries for other platforms and deselected components
//! 2. download each file, asking the server whether the cached digest is still current
//! 3. verify signed archives against the trust store
//! 4. deploy: write single files, expand archives, record every path in the uninstall log
//! 5. delete files the previous generation installed that are no longer listed
//! 6. commit the new uninstall log, digest cache and version identifier
//!
//! Nothing is committed unless every step succeeds, and a cancelled cycle leaves the previous
//! generation's state untouched.
//!
//! # Modules
//!
//! - [`manifest`] - manifest model and parser
//! - [`download`] - [`download::Downloader`] trait and the HTTP implementation
//! - [`filters`] - suffix-keyed stream decoders (`.gz`, `.lzma`, `.xz`)
//! - [`package`] - deployable units: single files and archives
//! - [`security`] - signed-archive verification and the trust store
//! - [`state`] - uninstall log, digest/version cache, installation lock
//! - [`updater`] - the cycle orchestrator and progress reporting
//! - [`update_check`] - deciding whether an update is needed
//! - [`config`] - launcher configuration file
//! - [`cli`] - the `launchpatch` command
//!
//! # Example
//!
//! ```rust,no_run
//! use launchpatch::download::HttpDownloader;
//! use launchpatch::updater::{UpdateOutcome, Updater};
//! use std::path::PathBuf;
//!
//! # async fn example(document: String) -> anyhow::Result<()> {
//! let mut updater = Updater::new(PathBuf::from("/games/example"), document, HttpDownloader::new()?)
//!     .with_version("v2");
//! match updater.perform().await? {
//!     UpdateOutcome::Completed(report) => println!("{} files deployed", report.deployed),
//!     UpdateOutcome::Cancelled => println!("cancelled"),
//! }
//! # Ok(())
//! # }
//! ```

pub mod cli;
pub mod config;
pub mod constants;
pub mod core;
pub mod download;
pub mod filters;
pub mod manifest;
pub mod package;
pub mod security;
pub mod state;
pub mod update_check;
pub mod updater;
pub mod utils;

#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;
