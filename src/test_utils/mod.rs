//! Test utilities for launchpatch
//!
//! Shared by unit tests and, through the `test-utils` feature, by the integration suite:
//!
//! - [`init_test_logging`] wires `tracing` output into the test harness
//! - [`fixtures`] builds zip/gzip payloads and manifest documents
//! - [`FakeDownloader`] serves content from memory and records every request
//! - [`RecordingListener`] captures progress events
//! - [`certs`] mints throwaway certificates and detached signatures
//!
//! # Example
//!
//! ```rust,no_run
//! use launchpatch::test_utils::{FakeDownloader, zip_bytes};
//!
//! let downloader = FakeDownloader::new();
//! downloader.serve("https://cdn.test/pack.zip", zip_bytes(&[("a.txt", b"hello".as_slice())]));
//! ```

pub mod certs;
pub mod fake_downloader;
pub mod fixtures;
pub mod listener;

pub use certs::{expired_certificate, self_signed_certificate, sign_detached};
pub use fake_downloader::{FakeDownloader, FakeRequest};
pub use fixtures::{ManifestFixture, gzip, list_files, zip_bytes};
pub use listener::{ListenerEvent, RecordingListener};

use std::sync::Once;
use tracing::Level;
use tracing_subscriber::EnvFilter;

/// Global flag to ensure logging is only initialized once in tests
static INIT_LOGGING: Once = Once::new();

/// Initialize logging for tests.
///
/// Only the first call has an effect. With `level` set, that level is used; otherwise
/// `RUST_LOG` decides, and without it nothing is logged.
///
/// ```bash
/// RUST_LOG=launchpatch=debug cargo test
/// ```
pub fn init_test_logging(level: Option<Level>) {
    INIT_LOGGING.call_once(|| {
        let filter = if let Some(level) = level {
            EnvFilter::new(level.to_string())
        } else if std::env::var("RUST_LOG").is_ok() {
            EnvFilter::from_default_env()
        } else {
            return;
        };

        let _ = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_test_writer()
            .with_target(true)
            .with_thread_ids(false)
            .with_ansi(true)
            .try_init();
    });
}
