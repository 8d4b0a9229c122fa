//! Error handling for launchpatch
//!
//! Errors follow the same two-layer approach used throughout the crate:
//! 1. **Strongly-typed errors** ([`PatchError`]) raised by the engine so callers can
//!    distinguish cancellation, integrity failures and transient network failures
//! 2. **User-friendly messages** ([`ErrorContext`]) built by [`user_friendly_error`] for
//!    display by the CLI
//!
//! Engine functions return [`anyhow::Result`]. Typed failures are created as [`PatchError`]
//! values and converted with `?`/`.into()`, so they can be recovered with
//! [`anyhow::Error::downcast_ref`] at the orchestrator boundary.
//!
//! # Error Categories
//!
//! - **Format**: [`PatchError::UnsupportedFormat`], [`PatchError::ManifestParse`]
//! - **Path safety**: [`PatchError::InvalidPath`]
//! - **Network**: [`PatchError::HttpStatus`], [`PatchError::Network`],
//!   [`PatchError::NotModifiedWithoutCheck`], [`PatchError::DownloadFailed`]
//! - **Integrity**: [`PatchError::DigestMismatch`], [`PatchError::Signature`],
//!   [`PatchError::UnsupportedVerification`]
//! - **Deployment**: [`PatchError::Deploy`]
//! - **Cancellation**: [`PatchError::Cancelled`]
//!
//! # Examples
//!
//! ```rust,no_run
//! use launchpatch::core::{PatchError, user_friendly_error};
//!
//! let err = anyhow::Error::from(PatchError::InvalidPath {
//!     path: "../../etc/passwd".to_string(),
//! });
//! user_friendly_error(err).display();
//! ```

use colored::Colorize;
use std::fmt;
use thiserror::Error;

/// The main error type for update engine operations.
///
/// Variants carry the URL or absolute path involved so that a failure can be
/// diagnosed from the message alone.
#[derive(Error, Debug)]
pub enum PatchError {
    /// The manifest declares a format version this engine does not understand
    #[error("Unsupported manifest format version '{found}' (expected '{expected}')")]
    UnsupportedFormat {
        /// Version found in the document, empty when missing
        found: String,
        /// The single supported version
        expected: String,
    },

    /// The manifest document is malformed
    #[error("Invalid manifest: {reason}")]
    ManifestParse {
        /// Description of the problem
        reason: String,
    },

    /// A manifest entry or archive member resolves outside its permitted root
    #[error("Path escapes the installation directory: {path}")]
    InvalidPath {
        /// The offending path
        path: String,
    },

    /// The server answered with an unexpected status code
    #[error("HTTP {status} while fetching {url}")]
    HttpStatus {
        /// Requested URL
        url: String,
        /// Numeric status code
        status: u16,
    },

    /// Connection or transfer failure
    #[error("Network error while fetching {url}: {reason}")]
    Network {
        /// Requested URL
        url: String,
        /// Underlying cause
        reason: String,
    },

    /// The server replied "not modified" to a request that carried no check value
    #[error("Server reported 'not modified' for {url} but no check value was sent")]
    NotModifiedWithoutCheck {
        /// Requested URL
        url: String,
    },

    /// All download attempts were exhausted
    #[error("Failed to download {url} after {attempts} attempt(s): {reason}")]
    DownloadFailed {
        /// Requested URL
        url: String,
        /// Number of attempts made
        attempts: u32,
        /// Cause of the final failure
        reason: String,
    },

    /// Computed digest does not match the value reported for the content
    #[error("Digest mismatch for {url}: expected {expected}, got {actual}")]
    DigestMismatch {
        /// Source URL of the content
        url: String,
        /// Expected digest (hex)
        expected: String,
        /// Computed digest (hex)
        actual: String,
    },

    /// Signature or trust verification failed
    #[error("Security check failed for {path}: {reason}")]
    Signature {
        /// Absolute destination path of the file being verified
        path: String,
        /// Why verification failed
        reason: String,
    },

    /// Signature verification was requested for a file type that cannot carry one
    #[error("Unsupported verification type '{extension}' for {path}")]
    UnsupportedVerification {
        /// Absolute destination path
        path: String,
        /// Extension of the original (un-suffixed) file name
        extension: String,
    },

    /// Writing a file into the installation failed
    #[error("Failed to deploy {path}: {reason}")]
    Deploy {
        /// Absolute destination path
        path: String,
        /// Underlying cause
        reason: String,
    },

    /// The cycle was cancelled cooperatively
    #[error("Operation cancelled")]
    Cancelled,

    /// Configuration file problems
    #[error("Configuration error: {message}")]
    Config {
        /// Description of the problem
        message: String,
    },

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Anything else
    #[error("{message}")]
    Other {
        /// Error message
        message: String,
    },
}

impl PatchError {
    /// Whether a download that failed with this error may be attempted again.
    ///
    /// Cancellation, protocol violations and integrity failures are final; everything
    /// network- or IO-related is retried by the orchestrator.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::HttpStatus { .. } | Self::Network { .. } | Self::Io(_))
    }
}

/// Whether an error chain represents a cooperative cancellation.
#[must_use]
pub fn is_cancelled(error: &anyhow::Error) -> bool {
    matches!(error.downcast_ref::<PatchError>(), Some(PatchError::Cancelled))
}

/// Error with a suggestion and details for display to a user
#[derive(Debug)]
pub struct ErrorContext {
    /// The underlying error
    pub error: PatchError,
    /// Optional suggestion for resolving the error
    pub suggestion: Option<String>,
    /// Optional additional details about the error
    pub details: Option<String>,
}

impl ErrorContext {
    /// Wrap an error without any extra context.
    #[must_use]
    pub const fn new(error: PatchError) -> Self {
        Self {
            error,
            suggestion: None,
            details: None,
        }
    }

    /// Add a suggestion for resolving the error.
    pub fn with_suggestion(mut self, suggestion: impl Into<String>) -> Self {
        self.suggestion = Some(suggestion.into());
        self
    }

    /// Add details explaining the error.
    pub fn with_details(mut self, details: impl Into<String>) -> Self {
        self.details = Some(details.into());
        self
    }

    /// Print the error to stderr with colors.
    pub fn display(&self) {
        eprintln!("{}: {}", "error".red().bold(), self.error);

        if let Some(details) = &self.details {
            eprintln!("{}: {}", "details".yellow(), details);
        }

        if let Some(suggestion) = &self.suggestion {
            eprintln!("{}: {}", "suggestion".green(), suggestion);
        }
    }
}

impl fmt::Display for ErrorContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.error)?;

        if let Some(details) = &self.details {
            write!(f, "\nDetails: {details}")?;
        }

        if let Some(suggestion) = &self.suggestion {
            write!(f, "\nSuggestion: {suggestion}")?;
        }

        Ok(())
    }
}

impl std::error::Error for ErrorContext {}

/// Convert any error into an [`ErrorContext`] with suggestions.
///
/// Typed [`PatchError`]s anywhere in the chain get tailored advice. IO and TOML errors are
/// recognised as well; everything else is reported with its full cause chain.
pub fn user_friendly_error(error: anyhow::Error) -> ErrorContext {
    let chain: Vec<String> = error.chain().skip(1).map(ToString::to_string).collect();

    match error.downcast::<PatchError>() {
        Ok(patch_error) => create_error_context(patch_error, &chain),
        Err(error) => {
            let permission_denied = error
                .downcast_ref::<std::io::Error>()
                .is_some_and(|e| e.kind() == std::io::ErrorKind::PermissionDenied);
            if permission_denied {
                return ErrorContext::new(PatchError::Other {
                    message: error.to_string(),
                })
                .with_suggestion("Check that you own the installation directory or run with elevated permissions")
                .with_details("The update engine needs write access to the whole installation tree");
            }

            if let Some(toml_error) = error.downcast_ref::<toml::de::Error>() {
                return ErrorContext::new(PatchError::Config {
                    message: toml_error.to_string(),
                })
                .with_suggestion("Check the TOML syntax in your launchpatch config file");
            }

            let mut message = error.to_string();
            if !chain.is_empty() {
                message.push_str("\n\nCaused by:");
                for (i, cause) in chain.iter().enumerate() {
                    message.push_str(&format!("\n  {}: {}", i + 1, cause));
                }
            }
            ErrorContext::new(PatchError::Other {
                message,
            })
        }
    }
}

fn create_error_context(error: PatchError, chain: &[String]) -> ErrorContext {
    let suggestion = match &error {
        PatchError::UnsupportedFormat { .. } => Some(
            "The update server publishes a newer manifest format. Upgrade the launcher before updating",
        ),
        PatchError::ManifestParse { .. } => {
            Some("The package manifest is corrupt. Try again later or contact the server operator")
        }
        PatchError::InvalidPath { .. } => Some(
            "The manifest or an archive tried to write outside the installation. Do not trust this update source",
        ),
        PatchError::HttpStatus { .. }
        | PatchError::Network { .. }
        | PatchError::DownloadFailed { .. } => {
            Some("Check your internet connection and retry the update")
        }
        PatchError::DigestMismatch { .. } => {
            Some("The downloaded content was corrupted in transit. Retry the update")
        }
        PatchError::Signature { .. } | PatchError::UnsupportedVerification { .. } => Some(
            "The update is not signed by a trusted publisher. Use 'launchpatch trust' only if you trust this source",
        ),
        PatchError::Deploy { .. } => Some(
            "Make sure the game is not running and that the installation directory is writable",
        ),
        PatchError::Config { .. } => Some("Check your launchpatch config.toml"),
        _ => None,
    };

    let mut ctx = ErrorContext::new(error);
    if let Some(suggestion) = suggestion {
        ctx = ctx.with_suggestion(suggestion);
    }
    if !chain.is_empty() {
        ctx = ctx.with_details(chain.join(": "));
    }
    ctx
}
