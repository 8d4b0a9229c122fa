//! Cross-cutting helpers.
//!
//! - [`fs`]: atomic writes and best-effort removal
//! - [`path_validation`]: lexical containment checks for untrusted paths
//! - [`progress`]: terminal rendering of update progress

pub mod fs;
pub mod path_validation;
pub mod progress;

pub use fs::{atomic_write, ensure_dir};
pub use path_validation::{check_subchild, is_state_path, resolve_within};
pub use progress::TerminalProgress;
