//! Update cycle orchestration.
//!
//! An [`Updater`] drives one cycle through its phases:
//!
//! ```text
//! Idle -> ParsingManifest -> Downloading -> Deploying -> DeletingOrphans -> Done
//!                 \               \              \
//!                  +---------------+--------------+--> Cancelled | Failed
//! ```
//!
//! The previous generation's uninstall log and the digest cache decide which files can be
//! skipped. Only a fully successful cycle commits the new log and cache; the cycle workspace
//! holding temp files is removed however the cycle ends.
//!
//! # Examples
//!
//! ```rust,no_run
//! use launchpatch::download::HttpDownloader;
//! use launchpatch::updater::{UpdateOutcome, Updater};
//! use std::path::PathBuf;
//!
//! # async fn example(document: String) -> anyhow::Result<()> {
//! let mut updater = Updater::new(PathBuf::from("/games/install"), document, HttpDownloader::new()?)
//!     .with_version("v2");
//! match updater.perform().await? {
//!     UpdateOutcome::Completed(report) => println!("{} files deployed", report.deployed),
//!     UpdateOutcome::Cancelled => println!("cancelled"),
//! }
//! # Ok(())
//! # }
//! ```

mod progress;

#[cfg(test)]
mod tests;

pub use progress::{NoopListener, ProgressListener, UpdateState};

use crate::constants::{
    DEFAULT_RETRY_ATTEMPTS, DEFAULT_RETRY_DELAY, DOWNLOAD_PROGRESS_SHARE,
};
use crate::core::{CancellationToken, PatchError, is_cancelled};
use crate::download::{
    DownloadOutcome, DownloadProgress, DownloadRequest, Downloaded, Downloader, etag_as_digest,
};
use crate::filters::FilterRegistry;
use crate::manifest::{self, Manifest};
use crate::package::PackageFile;
use crate::security::{SignatureVerifier, TrustStore};
use crate::state::{InstallLock, StatePaths, UninstallLog, UpdateCache};
use crate::utils::fs::{prune_empty_parents, remove_file_if_exists};
use crate::utils::path_validation::resolve_within;
use anyhow::{Context, Result};
use progress::PhaseProgress;
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio_retry::strategy::FixedInterval;
use tracing::{debug, info, warn};

/// Name of the installation lock held for the whole cycle.
const UPDATE_LOCK_NAME: &str = "update";

/// Policy knobs for one cycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpdateOptions {
    /// Download everything, ignoring the cache
    pub force_reinstall: bool,
    /// Attempts per file before the cycle fails
    pub retry_attempts: u32,
    /// Fixed delay between attempts
    pub retry_delay: Duration,
    /// Signature requirement for entries whose manifest sets none
    pub verify_signatures_default: bool,
}

impl Default for UpdateOptions {
    fn default() -> Self {
        Self {
            force_reinstall: false,
            retry_attempts: DEFAULT_RETRY_ATTEMPTS,
            retry_delay: DEFAULT_RETRY_DELAY,
            verify_signatures_default: false,
        }
    }
}

/// Counts for a successful cycle.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UpdateReport {
    /// Files transferred
    pub downloaded: usize,
    /// Files the server confirmed current
    pub skipped: usize,
    /// Files (or archives) written into the installation
    pub deployed: usize,
    /// Orphaned paths removed
    pub deleted: usize,
    /// Version recorded in the cache
    pub version: Option<String>,
}

/// How a cycle ended without error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpdateOutcome {
    /// Everything was applied and committed
    Completed(UpdateReport),
    /// Stopped at a poll point; nothing was committed
    Cancelled,
}

/// Runs update cycles for one installation.
pub struct Updater<D: Downloader> {
    root: PathBuf,
    document: String,
    version: Option<String>,
    downloader: D,
    filters: FilterRegistry,
    verifier: SignatureVerifier,
    listener: Arc<dyn ProgressListener>,
    cancel: CancellationToken,
    options: UpdateOptions,
    state: UpdateState,
}

impl<D: Downloader> std::fmt::Debug for Updater<D> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Updater")
            .field("root", &self.root)
            .field("version", &self.version)
            .field("options", &self.options)
            .field("state", &self.state)
            .finish_non_exhaustive()
    }
}

/// State carried from one phase to the next.
struct Cycle {
    paths: StatePaths,
    old_log: UninstallLog,
    cache: UpdateCache,
    files: Vec<PackageFile>,
    /// New cache values for files downloaded this cycle; `None` clears the entry
    fresh_hashes: BTreeMap<String, Option<String>>,
    report: UpdateReport,
}

impl<D: Downloader> Updater<D> {
    /// Updater for the manifest `document` and installation `root`.
    pub fn new(root: PathBuf, document: String, downloader: D) -> Self {
        Self {
            root,
            document,
            version: None,
            downloader,
            filters: FilterRegistry::with_defaults(),
            verifier: SignatureVerifier::new(Arc::new(TrustStore::default())),
            listener: Arc::new(NoopListener),
            cancel: CancellationToken::new(),
            options: UpdateOptions::default(),
            state: UpdateState::Idle,
        }
    }

    /// Version identifier recorded in the cache after success.
    #[must_use]
    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.version = Some(version.into());
        self
    }

    /// Replace the filter registry.
    #[must_use]
    pub fn with_filters(mut self, filters: FilterRegistry) -> Self {
        self.filters = filters;
        self
    }

    /// Verify signatures against `trust`.
    #[must_use]
    pub fn with_trust(mut self, trust: Arc<TrustStore>) -> Self {
        self.verifier = SignatureVerifier::new(trust);
        self
    }

    /// Receive progress events.
    #[must_use]
    pub fn with_listener(mut self, listener: Arc<dyn ProgressListener>) -> Self {
        self.listener = listener;
        self
    }

    /// Cycle policy.
    #[must_use]
    pub fn with_options(mut self, options: UpdateOptions) -> Self {
        self.options = options;
        self
    }

    /// Use an existing cancellation token.
    #[must_use]
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Token that cancels this updater's cycles.
    #[must_use]
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Current phase.
    #[must_use]
    pub const fn state(&self) -> UpdateState {
        self.state
    }

    /// Installation root.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn transition(&mut self, state: UpdateState) {
        debug!(from = ?self.state, to = ?state, "Update state changed");
        self.state = state;
        self.listener.title_changed(&state.to_string());
    }

    /// Run one cycle.
    ///
    /// Returns [`UpdateOutcome::Cancelled`] rather than an error when the token was cancelled.
    /// Any other failure leaves the previous generation's log and cache untouched.
    pub async fn perform(&mut self) -> Result<UpdateOutcome> {
        let _lock = InstallLock::acquire(&self.root, UPDATE_LOCK_NAME).await?;

        let paths = StatePaths::new(&self.root);
        let workspace = paths.temp.join(uuid::Uuid::new_v4().to_string());
        let result = self.run(paths, &workspace).await;

        match tokio::fs::remove_dir_all(&workspace).await {
            Ok(()) => debug!(path = %workspace.display(), "Removed cycle workspace"),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => warn!(path = %workspace.display(), error = %e, "Failed to remove cycle workspace"),
        }

        let outcome = match result {
            Ok(report) => {
                self.transition(UpdateState::Done);
                self.listener.value_changed(1.0);
                info!(
                    downloaded = report.downloaded,
                    skipped = report.skipped,
                    deployed = report.deployed,
                    deleted = report.deleted,
                    "Update complete"
                );
                Ok(UpdateOutcome::Completed(report))
            }
            Err(e) if is_cancelled(&e) => {
                self.transition(UpdateState::Cancelled);
                info!("Update cancelled");
                Ok(UpdateOutcome::Cancelled)
            }
            Err(e) => {
                self.transition(UpdateState::Failed);
                warn!(error = %format!("{e:#}"), "Update failed");
                Err(e)
            }
        };
        self.listener.completed();
        outcome
    }

    async fn run(&mut self, paths: StatePaths, workspace: &Path) -> Result<UpdateReport> {
        let mut cycle = self.parse_manifest(paths, workspace).await?;
        self.download_all(&mut cycle).await?;
        let new_log = self.deploy_all(&mut cycle).await?;
        let new_log = self.delete_orphans(&mut cycle, new_log).await?;
        self.commit(cycle, new_log).await
    }

    async fn parse_manifest(&mut self, paths: StatePaths, workspace: &Path) -> Result<Cycle> {
        self.cancel.check()?;
        self.transition(UpdateState::ParsingManifest);
        self.listener.value_changed(-1.0);

        let manifest: Manifest = manifest::parse(&self.root, &self.document)?;
        let old_log = UninstallLog::read(&paths.uninstall_log).await?;
        let cache = UpdateCache::load(&paths.cache).await?;

        let mut files = Vec::with_capacity(manifest.applicable_count);
        for (index, (group, entry)) in manifest.entries().enumerate() {
            if let Some(component) = &group.component
                && !cache.is_selected(component, group.selected_by_default)
            {
                debug!(component = %component, entry = %entry.filename, "Component not selected");
                continue;
            }
            files.push(PackageFile::from_entry(
                &manifest.root,
                group,
                entry,
                workspace,
                index,
                &self.filters,
                self.options.verify_signatures_default,
            )?);
        }

        tokio::fs::create_dir_all(workspace).await.with_context(|| {
            format!("Failed to create cycle workspace: {}", workspace.display())
        })?;

        debug!(
            files = files.len(),
            previous = old_log.len(),
            version = ?manifest.version,
            "Manifest accepted"
        );

        Ok(Cycle {
            paths,
            old_log,
            cache,
            files,
            fresh_hashes: BTreeMap::new(),
            report: UpdateReport::default(),
        })
    }

    async fn download_all(&mut self, cycle: &mut Cycle) -> Result<()> {
        self.transition(UpdateState::Downloading);
        let sizes: Vec<u64> = cycle.files.iter().map(|f| f.info().size).collect();
        let mut progress = PhaseProgress::new(0.0, DOWNLOAD_PROGRESS_SHARE, &sizes);
        self.listener.value_changed(0.0);

        for index in 0..cycle.files.len() {
            self.cancel.check()?;

            let file = &cycle.files[index];
            let etag_check = if self.options.force_reinstall
                || !file.previously_installed(&cycle.old_log)
            {
                None
            } else {
                cycle.cache.hash(&file.info().group).map(str::to_string)
            };

            self.listener.status_changed(&format!("Downloading {}", file.info().published_name));
            let outcome = self.download_with_retry(file, etag_check.as_deref(), &progress, index).await;
            let outcome = match outcome {
                Ok(outcome) => outcome,
                Err(e) => {
                    file.cleanup();
                    return Err(e);
                }
            };

            let info = cycle.files[index].info_mut();
            match outcome {
                DownloadOutcome::NotModified => {
                    debug!(url = %info.url, "Up to date, skipping");
                    info.ignored = true;
                    cycle.report.skipped += 1;
                }
                DownloadOutcome::Downloaded(downloaded) => {
                    let value = cache_value(&info.url, info.digest, &downloaded)?;
                    cycle.fresh_hashes.insert(info.group.clone(), value);
                    cycle.report.downloaded += 1;
                }
            }
            self.listener.value_changed(progress.finish(index));
        }
        Ok(())
    }

    async fn download_with_retry(
        &self,
        file: &PackageFile,
        etag_check: Option<&str>,
        progress: &PhaseProgress,
        index: usize,
    ) -> Result<DownloadOutcome> {
        let info = file.info();
        let listener = Arc::clone(&self.listener);
        let expected_size = info.size;
        let report = move |p: DownloadProgress| {
            let total = p.total.or((expected_size > 0).then_some(expected_size));
            let fraction = total.map_or(0.0, |t| if t == 0 { 1.0 } else { p.downloaded as f64 / t as f64 });
            listener.value_changed(progress.value(index, fraction));
        };
        let request = DownloadRequest {
            url: &info.url,
            out: &info.temp_path,
            etag_check,
            digest: info.digest,
            cancel: &self.cancel,
            progress: &report,
        };

        let attempts = self.options.retry_attempts.max(1);
        let mut delays = FixedInterval::new(self.options.retry_delay).take(attempts as usize - 1);
        let mut attempt = 0u32;

        loop {
            attempt += 1;
            let error = match self.downloader.download(&request).await {
                Ok(outcome) => return Ok(outcome),
                Err(error) => error,
            };

            let retryable = error.downcast_ref::<PatchError>().is_none_or(PatchError::is_retryable);
            if !retryable {
                return Err(error);
            }

            let Some(delay) = delays.next() else {
                return Err(PatchError::DownloadFailed {
                    url: info.url.to_string(),
                    attempts: attempt,
                    reason: format!("{error:#}"),
                }
                .into());
            };

            warn!(
                url = %info.url,
                attempt,
                max_attempts = attempts,
                error = %format!("{error:#}"),
                "Download failed, retrying in {:?}",
                delay
            );
            file.cleanup();
            tokio::select! {
                () = tokio::time::sleep(delay) => {}
                () = self.cancel.cancelled() => return Err(PatchError::Cancelled.into()),
            }
        }
    }

    async fn deploy_all(&mut self, cycle: &mut Cycle) -> Result<UninstallLog> {
        self.transition(UpdateState::Deploying);
        let pending: Vec<usize> =
            (0..cycle.files.len()).filter(|&i| !cycle.files[i].info().ignored).collect();
        let sizes: Vec<u64> = pending.iter().map(|&i| cycle.files[i].info().size).collect();
        let mut progress = PhaseProgress::new(DOWNLOAD_PROGRESS_SHARE, 1.0, &sizes);
        let mut new_log = UninstallLog::new();

        for (step, &index) in pending.iter().enumerate() {
            self.cancel.check()?;

            let file = cycle.files[index].clone();
            self.listener.status_changed(&format!("Installing {}", file.info().original_filename));

            let root = self.root.clone();
            let filters = self.filters.clone();
            let verifier = self.verifier.clone();
            let (result, log) = tokio::task::spawn_blocking(move || {
                let mut log = new_log;
                let result = if file.info().verify_signature {
                    file.verify(&filters, &verifier)
                } else {
                    Ok(())
                }
                .and_then(|()| file.deploy(&root, &filters, &mut log));
                file.cleanup();
                (result, log)
            })
            .await
            .context("spawn_blocking panicked")?;

            new_log = log;
            result?;
            cycle.report.deployed += 1;
            self.listener.value_changed(progress.finish(step));
        }
        Ok(new_log)
    }

    async fn delete_orphans(
        &mut self,
        cycle: &mut Cycle,
        mut new_log: UninstallLog,
    ) -> Result<UninstallLog> {
        self.cancel.check()?;
        self.transition(UpdateState::DeletingOrphans);

        for file in cycle.files.iter().filter(|f| f.info().ignored) {
            let group = &file.info().group;
            let carried = new_log.copy_group_from(&cycle.old_log, group);
            if carried == 0 && !file.is_archive() {
                new_log.add(group, group);
            }
            debug!(group = %group, paths = carried, "Carried forward unchanged group");
        }

        let orphans: Vec<String> = cycle
            .old_log
            .entries()
            .filter(|(_, path)| !new_log.has(path))
            .map(|(_, path)| path.to_string())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();

        let root = self.root.clone();
        let deleted = tokio::task::spawn_blocking(move || delete_paths(&root, &orphans))
            .await
            .context("spawn_blocking panicked")?;
        cycle.report.deleted = deleted;
        Ok(new_log)
    }

    async fn commit(&mut self, cycle: Cycle, new_log: UninstallLog) -> Result<UpdateReport> {
        let Cycle {
            paths,
            old_log: _,
            mut cache,
            files,
            fresh_hashes,
            mut report,
        } = cycle;

        new_log.write(&paths.uninstall_log).await?;

        let current: BTreeSet<&str> = files.iter().map(|f| f.info().group.as_str()).collect();
        cache.hashes.retain(|group, _| current.contains(group.as_str()));
        for (group, value) in fresh_hashes {
            match value {
                Some(value) => cache.set_hash(&group, value),
                None => cache.remove_hash(&group),
            }
        }
        if let Some(version) = &self.version {
            cache.current_version = Some(version.clone());
        }
        cache.updated_at = Some(chrono::Utc::now());
        cache.save(&paths.cache).await?;

        report.version = cache.current_version.clone();
        Ok(report)
    }
}

/// Value remembered for the next conditional request, after checking the ETag against the
/// computed digest.
fn cache_value(
    url: &reqwest::Url,
    algorithm: Option<crate::download::DigestAlgorithm>,
    downloaded: &Downloaded,
) -> Result<Option<String>, PatchError> {
    if let (Some(algorithm), Some(etag), Some(actual)) =
        (algorithm, downloaded.etag.as_deref(), downloaded.digest.as_deref())
        && let Some(expected) = etag_as_digest(etag, algorithm)
        && expected != actual
    {
        return Err(PatchError::DigestMismatch {
            url: url.to_string(),
            expected,
            actual: actual.to_string(),
        });
    }

    Ok(downloaded
        .etag
        .clone()
        .or_else(|| downloaded.digest.as_ref().map(|digest| format!("\"{digest}\""))))
}

/// Best-effort removal of logged paths; returns how many files were removed.
fn delete_paths(root: &Path, paths: &[String]) -> usize {
    let mut deleted = 0;
    for relative in paths {
        let target = match resolve_within(root, relative) {
            Ok(target) => target,
            Err(e) => {
                warn!(path = %relative, error = %e, "Refusing to delete path outside the installation");
                continue;
            }
        };
        match remove_file_if_exists(&target) {
            Ok(true) => {
                debug!(path = %target.display(), "Deleted orphaned file");
                deleted += 1;
                if let Some(parent) = target.parent() {
                    prune_empty_parents(root, parent);
                }
            }
            Ok(false) => debug!(path = %target.display(), "Orphaned file already gone"),
            Err(e) => warn!(path = %target.display(), error = %e, "Failed to delete orphaned file"),
        }
    }
    deleted
}
