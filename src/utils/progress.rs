//! Terminal progress display for update cycles.
//!
//! [`TerminalProgress`] renders [`ProgressListener`] events as an `indicatif` bar: the title
//! becomes the prefix, the status line the message, and the fractional value the position on
//! a 0..1000 scale. Indeterminate phases switch the bar to a spinner.
//!
//! Progress is hidden when `--no-progress` is passed or `LAUNCHPATCH_NO_PROGRESS` is set, so
//! scripted runs get clean output.

use crate::updater::ProgressListener;
use indicatif::{ProgressBar, ProgressStyle};
use std::time::Duration;

/// Environment variable that disables progress output.
pub const NO_PROGRESS_ENV: &str = "LAUNCHPATCH_NO_PROGRESS";

/// Resolution of the bar.
const SCALE: u64 = 1000;

/// Whether progress output is disabled through the environment.
#[must_use]
pub fn is_progress_disabled() -> bool {
    std::env::var_os(NO_PROGRESS_ENV).is_some()
}

fn bar_style() -> ProgressStyle {
    ProgressStyle::default_bar()
        .template("{prefix:.bold.cyan} [{bar:40.cyan/blue}] {percent:>3}% {msg}")
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("━╸━")
}

fn spinner_style() -> ProgressStyle {
    ProgressStyle::default_spinner()
        .template("{prefix:.bold.cyan} {spinner:.cyan} {msg}")
        .unwrap_or_else(|_| ProgressStyle::default_spinner())
        .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏", "✓"])
}

/// [`ProgressListener`] drawing to the terminal.
#[derive(Debug, Clone)]
pub struct TerminalProgress {
    bar: ProgressBar,
}

impl TerminalProgress {
    /// Visible progress unless `hidden` or the environment disables it.
    #[must_use]
    pub fn new(hidden: bool) -> Self {
        let bar = if hidden || is_progress_disabled() {
            ProgressBar::hidden()
        } else {
            let bar = ProgressBar::new(SCALE);
            bar.set_style(bar_style());
            bar
        };
        Self {
            bar,
        }
    }

    /// Whether anything is drawn.
    #[must_use]
    pub fn is_hidden(&self) -> bool {
        self.bar.is_hidden()
    }

    /// Print a line above the bar.
    pub fn println(&self, message: impl AsRef<str>) {
        if self.bar.is_hidden() {
            return;
        }
        self.bar.println(message);
    }
}

impl ProgressListener for TerminalProgress {
    fn title_changed(&self, title: &str) {
        self.bar.set_prefix(title.to_string());
    }

    fn status_changed(&self, status: &str) {
        self.bar.set_message(status.to_string());
    }

    fn value_changed(&self, value: f64) {
        if value < 0.0 {
            self.bar.set_style(spinner_style());
            self.bar.enable_steady_tick(Duration::from_millis(100));
            return;
        }
        self.bar.disable_steady_tick();
        self.bar.set_style(bar_style());
        self.bar.set_position((value.clamp(0.0, 1.0) * SCALE as f64).round() as u64);
    }

    fn completed(&self) {
        self.bar.finish_and_clear();
    }
}
