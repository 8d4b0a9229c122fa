//! Cooperative cancellation shared by every layer of an update cycle.
//!
//! The token is checked at well-defined poll points: before each file in every phase and
//! inside each download read loop. Nothing is preempted; a cancelled cycle stops at the
//! next poll point it reaches.

use crate::core::PatchError;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::Notify;

/// A cloneable cancellation flag.
///
/// Clones share state, so the CLI (or any other front end) keeps one clone and hands another
/// to the updater.
///
/// # Examples
///
/// ```rust
/// use launchpatch::core::CancellationToken;
///
/// let token = CancellationToken::new();
/// let observer = token.clone();
/// token.cancel();
/// assert!(observer.is_cancelled());
/// ```
#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    inner: Arc<Inner>,
}

#[derive(Debug, Default)]
struct Inner {
    cancelled: AtomicBool,
    notify: Notify,
}

impl CancellationToken {
    /// Create a token in the running state.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation. Idempotent.
    pub fn cancel(&self) {
        if !self.inner.cancelled.swap(true, Ordering::SeqCst) {
            tracing::debug!("Cancellation requested");
        }
        self.inner.notify.notify_waiters();
    }

    /// Whether cancellation has been requested.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.inner.cancelled.load(Ordering::SeqCst)
    }

    /// Poll point: fail with [`PatchError::Cancelled`] once cancellation was requested.
    pub fn check(&self) -> Result<(), PatchError> {
        if self.is_cancelled() {
            Err(PatchError::Cancelled)
        } else {
            Ok(())
        }
    }

    /// Resolve once the token is cancelled.
    pub async fn cancelled(&self) {
        loop {
            let notified = self.inner.notify.notified();
            if self.is_cancelled() {
                return;
            }
            notified.await;
        }
    }
}
