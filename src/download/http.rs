//! reqwest-backed [`Downloader`].

use super::{DownloadOutcome, DownloadProgress, DownloadRequest, Downloaded, Downloader, StreamSink};
use crate::constants::{DEFAULT_CONNECT_TIMEOUT, DEFAULT_READ_TIMEOUT, USER_AGENT};
use crate::core::PatchError;
use anyhow::{Context, Result};
use reqwest::header::{ETAG, IF_NONE_MATCH};
use reqwest::{Client, StatusCode};
use std::time::Duration;
use tracing::debug;

/// Downloads over HTTP(S).
///
/// Every transfer is bounded by a connect timeout and a read timeout, so a stalled
/// connection cannot delay cancellation indefinitely.
#[derive(Debug, Clone)]
pub struct HttpDownloader {
    client: Client,
}

impl HttpDownloader {
    /// Downloader with the default timeouts.
    pub fn new() -> Result<Self> {
        Self::with_timeouts(DEFAULT_CONNECT_TIMEOUT, DEFAULT_READ_TIMEOUT)
    }

    /// Downloader with explicit timeouts.
    pub fn with_timeouts(connect_timeout: Duration, read_timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .user_agent(USER_AGENT)
            .connect_timeout(connect_timeout)
            .read_timeout(read_timeout)
            .build()
            .context("Failed to build HTTP client")?;
        Ok(Self {
            client,
        })
    }

    /// Underlying client, shared with other HTTP collaborators.
    #[must_use]
    pub const fn client(&self) -> &Client {
        &self.client
    }
}

fn network_error(url: &reqwest::Url, error: &reqwest::Error) -> PatchError {
    PatchError::Network {
        url: url.to_string(),
        reason: error.to_string(),
    }
}

impl Downloader for HttpDownloader {
    async fn download(&self, request: &DownloadRequest<'_>) -> Result<DownloadOutcome> {
        let url = request.url;
        request.cancel.check()?;

        let mut builder = self.client.get(url.clone());
        if let Some(check) = request.etag_check {
            builder = builder.header(IF_NONE_MATCH, check);
        }

        debug!(url = %url, conditional = request.etag_check.is_some(), "Starting download");

        let mut response = tokio::select! {
            response = builder.send() => response.map_err(|e| network_error(url, &e))?,
            () = request.cancel.cancelled() => return Err(PatchError::Cancelled.into()),
        };

        let status = response.status();
        if status == StatusCode::NOT_MODIFIED {
            if request.etag_check.is_some() {
                debug!(url = %url, "Server reports content not modified");
                return Ok(DownloadOutcome::NotModified);
            }
            return Err(PatchError::NotModifiedWithoutCheck {
                url: url.to_string(),
            }
            .into());
        }
        if !status.is_success() {
            return Err(PatchError::HttpStatus {
                url: url.to_string(),
                status: status.as_u16(),
            }
            .into());
        }

        let total = response.content_length();
        let etag = response
            .headers()
            .get(ETAG)
            .and_then(|value| value.to_str().ok())
            .map(str::to_string);

        let mut sink = StreamSink::create(request.out, request.digest).await?;
        (request.progress)(DownloadProgress {
            downloaded: 0,
            total,
        });

        loop {
            request.cancel.check()?;
            let chunk = tokio::select! {
                chunk = response.chunk() => chunk.map_err(|e| network_error(url, &e))?,
                () = request.cancel.cancelled() => return Err(PatchError::Cancelled.into()),
            };
            let Some(chunk) = chunk else {
                break;
            };
            sink.write(&chunk).await?;
            (request.progress)(DownloadProgress {
                downloaded: sink.written(),
                total,
            });
        }

        let (bytes, digest) = sink.finish().await?;
        if let Some(expected) = total
            && expected != bytes
        {
            return Err(PatchError::Network {
                url: url.to_string(),
                reason: format!("connection closed after {bytes} of {expected} bytes"),
            }
            .into());
        }

        debug!(url = %url, bytes, "Download finished");
        Ok(DownloadOutcome::Downloaded(Downloaded {
            etag,
            digest,
            bytes,
        }))
    }
}
