//! Single-file HTTP downloads.
//!
//! A [`Downloader`] performs one GET into a temp file, optionally sending a conditional
//! `If-None-Match` check and computing a streaming digest. It does not retry: the updater owns
//! the retry policy and calls the downloader again after a retryable failure.
//!
//! Contract shared by every implementation:
//!
//! - a "not modified" reply returns [`DownloadOutcome::NotModified`] only when a check value
//!   was sent; without one it is [`PatchError::NotModifiedWithoutCheck`]
//! - the cancellation token is polled inside the read loop; once cancelled no further bytes
//!   are written and [`PatchError::Cancelled`] is returned
//! - the caller deletes the output file after any failure

pub mod digest;
pub mod http;

pub use digest::{DigestAlgorithm, etag_as_digest};
pub use http::HttpDownloader;

use crate::core::{CancellationToken, PatchError};
use anyhow::{Context, Result};
use reqwest::Url;
use std::future::Future;
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;

/// Bytes received so far for one transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DownloadProgress {
    /// Bytes written to the output file
    pub downloaded: u64,
    /// Total length, once the server has reported it
    pub total: Option<u64>,
}

/// Callback receiving [`DownloadProgress`] events.
pub type ProgressFn<'a> = &'a (dyn Fn(DownloadProgress) + Send + Sync);

/// Parameters of a single transfer.
pub struct DownloadRequest<'a> {
    /// Source URL
    pub url: &'a Url,
    /// Output file, created or truncated
    pub out: &'a Path,
    /// Value for `If-None-Match`, if the content may already be current
    pub etag_check: Option<&'a str>,
    /// Digest to compute over the body
    pub digest: Option<DigestAlgorithm>,
    /// Cancellation polled in the read loop
    pub cancel: &'a CancellationToken,
    /// Progress callback
    pub progress: ProgressFn<'a>,
}

/// Result of a completed transfer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Downloaded {
    /// Content identifier reported by the server
    pub etag: Option<String>,
    /// Lowercase hex digest of the body, when requested
    pub digest: Option<String>,
    /// Body length in bytes
    pub bytes: u64,
}

/// What a transfer produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DownloadOutcome {
    /// The body was written to the output file
    Downloaded(Downloaded),
    /// The server confirmed the check value is current; nothing was written
    NotModified,
}

/// Performs single transfers. Implemented over HTTP and, in tests, in memory.
pub trait Downloader: Send + Sync {
    /// Perform one transfer attempt.
    fn download(
        &self,
        request: &DownloadRequest<'_>,
    ) -> impl Future<Output = Result<DownloadOutcome>> + Send;
}

/// Output file plus running digest, shared by downloader implementations.
pub struct StreamSink {
    path: PathBuf,
    file: tokio::fs::File,
    hasher: Option<Box<dyn ::digest::DynDigest + Send>>,
    written: u64,
}

impl StreamSink {
    /// Create (or truncate) `path`, creating parent directories.
    pub async fn create(path: &Path, digest: Option<DigestAlgorithm>) -> Result<Self> {
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await.with_context(|| {
                format!("Failed to create download directory: {}", parent.display())
            })?;
        }
        let file = tokio::fs::File::create(path)
            .await
            .with_context(|| format!("Failed to create download file: {}", path.display()))?;
        Ok(Self {
            path: path.to_path_buf(),
            file,
            hasher: digest.map(DigestAlgorithm::hasher),
            written: 0,
        })
    }

    /// Append a chunk and feed it to the digest.
    pub async fn write(&mut self, chunk: &[u8]) -> Result<()> {
        self.file.write_all(chunk).await.map_err(PatchError::Io).with_context(|| {
            format!("Failed to write download file: {}", self.path.display())
        })?;
        if let Some(hasher) = self.hasher.as_mut() {
            hasher.update(chunk);
        }
        self.written += chunk.len() as u64;
        Ok(())
    }

    /// Bytes written so far.
    #[must_use]
    pub const fn written(&self) -> u64 {
        self.written
    }

    /// Flush the file and return `(bytes, hex digest)`.
    pub async fn finish(mut self) -> Result<(u64, Option<String>)> {
        self.file
            .flush()
            .await
            .with_context(|| format!("Failed to flush download file: {}", self.path.display()))?;
        self.file
            .sync_all()
            .await
            .with_context(|| format!("Failed to sync download file: {}", self.path.display()))?;
        let digest = self.hasher.map(|h| hex::encode(h.finalize()));
        Ok((self.written, digest))
    }
}
