//! Constants used throughout the update engine.
//!
//! This module contains the on-disk layout of an installation's state directory, retry and
//! timeout defaults, and the manifest format version this engine understands.

use std::time::Duration;

/// Name of the per-installation state directory, relative to the installation root.
pub const STATE_DIR: &str = ".launchpatch";

/// Uninstall log file name inside [`STATE_DIR`].
pub const UNINSTALL_LOG_FILE: &str = "uninstall.log";

/// Digest/version cache file name inside [`STATE_DIR`].
pub const CACHE_FILE: &str = "cache.json";

/// Temp workspace directory name inside [`STATE_DIR`].
pub const TEMP_DIR: &str = "temp";

/// Relative path of the local trust record.
///
/// Manifest entries targeting this path are always skipped, whatever the manifest says.
pub const TRUST_RECORD_PATH: &str = ".launchpatch/trust.json";

/// The only manifest format version accepted by [`crate::manifest::parse`].
pub const SUPPORTED_FORMAT_VERSION: &str = "1.0";

/// Default number of download attempts per file.
pub const DEFAULT_RETRY_ATTEMPTS: u32 = 5;

/// Default delay between download attempts (5 seconds).
pub const DEFAULT_RETRY_DELAY: Duration = Duration::from_secs(5);

/// Default read timeout for a single HTTP transfer (10 minutes).
///
/// Bounds how long a stalled connection can delay a cancellation request.
pub const DEFAULT_READ_TIMEOUT: Duration = Duration::from_secs(600);

/// Default connect timeout for HTTP requests (30 seconds).
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

/// Default timeout for acquiring the installation lock (30 seconds).
pub fn default_lock_timeout() -> Duration {
    Duration::from_secs(30)
}

/// Maximum backoff delay while waiting for the installation lock (500ms).
pub const MAX_BACKOFF_DELAY_MS: u64 = 500;

/// Starting backoff delay while waiting for the installation lock (10ms).
pub const STARTING_BACKOFF_DELAY_MS: u64 = 10;

/// Upper bound of overall progress reported during the download phase.
pub const DOWNLOAD_PROGRESS_SHARE: f64 = 0.8;

/// User agent sent with every HTTP request.
pub const USER_AGENT: &str = concat!("launchpatch/", env!("CARGO_PKG_VERSION"));
