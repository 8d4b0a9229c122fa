//! Progress events emitted by an update cycle.

use std::fmt;

/// Receives progress events from the updater.
///
/// Events are fire-and-forget and may arrive on any thread; implementations marshal them to
/// their own presentation context.
pub trait ProgressListener: Send + Sync {
    /// The cycle entered a new phase.
    fn title_changed(&self, _title: &str) {}

    /// Per-file status line.
    fn status_changed(&self, _status: &str) {}

    /// Overall progress in `[0, 1]`, or `-1.0` when indeterminate.
    fn value_changed(&self, _value: f64) {}

    /// The cycle reached a terminal state.
    fn completed(&self) {}
}

/// Listener that ignores every event.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopListener;

impl ProgressListener for NoopListener {}

/// Phases of an update cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateState {
    /// Not started
    Idle,
    /// Reading and validating the manifest
    ParsingManifest,
    /// Fetching changed files
    Downloading,
    /// Writing files into the installation
    Deploying,
    /// Removing files the new generation no longer installs
    DeletingOrphans,
    /// Finished successfully
    Done,
    /// Stopped at a cancellation poll point
    Cancelled,
    /// Stopped by an unrecoverable error
    Failed,
}

impl UpdateState {
    /// Whether no further transition can happen.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Done | Self::Cancelled | Self::Failed)
    }
}

impl fmt::Display for UpdateState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Idle => "Idle",
            Self::ParsingManifest => "Checking package manifest",
            Self::Downloading => "Downloading updates",
            Self::Deploying => "Installing updates",
            Self::DeletingOrphans => "Removing old files",
            Self::Done => "Update complete",
            Self::Cancelled => "Update cancelled",
            Self::Failed => "Update failed",
        })
    }
}

/// Maps per-file fractions onto the overall `[start, end]` range of a phase.
///
/// Each file weighs its declared size relative to the total; when nothing declares a size,
/// files weigh equally.
#[derive(Debug, Clone)]
pub(crate) struct PhaseProgress {
    start: f64,
    end: f64,
    weights: Vec<f64>,
    completed: f64,
}

impl PhaseProgress {
    pub(crate) fn new(start: f64, end: f64, sizes: &[u64]) -> Self {
        // Summed in f64: declared sizes are untrusted and may overflow u64 together.
        let total: f64 = sizes.iter().map(|&s| s as f64).sum();
        let weights = if total > 0.0 {
            sizes.iter().map(|&s| s as f64 / total).collect()
        } else if sizes.is_empty() {
            Vec::new()
        } else {
            vec![1.0 / sizes.len() as f64; sizes.len()]
        };
        Self {
            start,
            end,
            weights,
            completed: 0.0,
        }
    }

    /// Overall value with file `index` at `fraction` of its own work.
    pub(crate) fn value(&self, index: usize, fraction: f64) -> f64 {
        let weight = self.weights.get(index).copied().unwrap_or(0.0);
        let phase = (self.completed + weight * fraction.clamp(0.0, 1.0)).min(1.0);
        self.start + (self.end - self.start) * phase
    }

    /// Mark file `index` complete and return the overall value.
    pub(crate) fn finish(&mut self, index: usize) -> f64 {
        self.completed += self.weights.get(index).copied().unwrap_or(0.0);
        self.value(usize::MAX, 0.0)
    }
}
