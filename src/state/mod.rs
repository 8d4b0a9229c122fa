//! Persistent per-installation state.
//!
//! Everything lives under `<root>/.launchpatch/`:
//!
//! | File | Type |
//! |---|---|
//! | `uninstall.log` | [`UninstallLog`] |
//! | `cache.json` | [`UpdateCache`] |
//! | `.locks/update.lock` | [`InstallLock`] |

pub mod cache;
pub mod lock;
pub mod uninstall_log;

pub use cache::UpdateCache;
pub use lock::InstallLock;
pub use uninstall_log::UninstallLog;

use crate::constants::{CACHE_FILE, STATE_DIR, TEMP_DIR, TRUST_RECORD_PATH, UNINSTALL_LOG_FILE};
use std::path::{Path, PathBuf};

/// Resolved locations of the state files for one installation root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatePaths {
    /// Installation root
    pub root: PathBuf,
    /// Uninstall log
    pub uninstall_log: PathBuf,
    /// Digest/version cache
    pub cache: PathBuf,
    /// Parent of per-cycle temp workspaces
    pub temp: PathBuf,
    /// Local trust record
    pub trust_record: PathBuf,
}

impl StatePaths {
    /// State paths for `root`.
    #[must_use]
    pub fn new(root: &Path) -> Self {
        let state = root.join(STATE_DIR);
        Self {
            root: root.to_path_buf(),
            uninstall_log: state.join(UNINSTALL_LOG_FILE),
            cache: state.join(CACHE_FILE),
            temp: state.join(TEMP_DIR),
            trust_record: root.join(TRUST_RECORD_PATH),
        }
    }
}
