//! Core types shared by every part of the update engine.
//!
//! - [`error`] - [`PatchError`] taxonomy and user-facing [`ErrorContext`]
//! - [`cancel`] - [`CancellationToken`] passed through each layer of a cycle

pub mod cancel;
pub mod error;

pub use cancel::CancellationToken;
pub use error::{ErrorContext, PatchError, is_cancelled, user_friendly_error};
