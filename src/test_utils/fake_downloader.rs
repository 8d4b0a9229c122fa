//! In-memory [`Downloader`] for tests.

use crate::core::{CancellationToken, PatchError};
use crate::download::{
    DownloadOutcome, DownloadProgress, DownloadRequest, Downloaded, Downloader, StreamSink,
};
use anyhow::Result;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

/// Bytes per simulated network read.
const CHUNK_SIZE: usize = 512;

/// One request the fake received.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FakeRequest {
    /// Requested URL
    pub url: String,
    /// `If-None-Match` value sent
    pub etag_check: Option<String>,
    /// Whether a body was written
    pub served: bool,
}

#[derive(Debug, Clone)]
struct FakeFile {
    body: Vec<u8>,
    etag: Option<String>,
}

#[derive(Debug, Default)]
struct FakeState {
    files: HashMap<String, FakeFile>,
    failures: HashMap<String, u32>,
    cancel_during: HashMap<String, CancellationToken>,
    requests: Vec<FakeRequest>,
}

/// Serves registered URLs from memory.
///
/// A request whose check value equals the file's ETag is answered "not modified". Unknown
/// URLs answer HTTP 404. Clones share state.
#[derive(Debug, Clone, Default)]
pub struct FakeDownloader {
    state: Arc<Mutex<FakeState>>,
}

impl FakeDownloader {
    /// Downloader serving nothing.
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, FakeState> {
        self.state.lock().expect("fake downloader poisoned")
    }

    /// Serve `body` at `url` without an ETag.
    pub fn serve(&self, url: &str, body: impl Into<Vec<u8>>) {
        self.lock().files.insert(url.to_string(), FakeFile {
            body: body.into(),
            etag: None,
        });
    }

    /// Serve `body` at `url` with an ETag.
    pub fn serve_with_etag(&self, url: &str, body: impl Into<Vec<u8>>, etag: &str) {
        self.lock().files.insert(url.to_string(), FakeFile {
            body: body.into(),
            etag: Some(etag.to_string()),
        });
    }

    /// Stop serving `url`.
    pub fn remove(&self, url: &str) {
        self.lock().files.remove(url);
    }

    /// Fail the next `times` requests for `url` with a network error.
    pub fn fail_times(&self, url: &str, times: u32) {
        self.lock().failures.insert(url.to_string(), times);
    }

    /// Cancel `token` after the first chunk of `url` has been written.
    pub fn cancel_during(&self, url: &str, token: CancellationToken) {
        self.lock().cancel_during.insert(url.to_string(), token);
    }

    /// Every request received, in order.
    pub fn requests(&self) -> Vec<FakeRequest> {
        self.lock().requests.clone()
    }

    /// Number of requests that wrote a body.
    pub fn bodies_served(&self) -> usize {
        self.lock().requests.iter().filter(|r| r.served).count()
    }

    /// Forget recorded requests.
    pub fn clear_requests(&self) {
        self.lock().requests.clear();
    }

    fn record(&self, url: &str, etag_check: Option<&str>, served: bool) {
        self.lock().requests.push(FakeRequest {
            url: url.to_string(),
            etag_check: etag_check.map(str::to_string),
            served,
        });
    }
}

impl Downloader for FakeDownloader {
    async fn download(&self, request: &DownloadRequest<'_>) -> Result<DownloadOutcome> {
        request.cancel.check()?;
        let url = request.url.to_string();

        let (file, fail, cancel_token) = {
            let mut state = self.lock();
            let fail = match state.failures.get_mut(&url) {
                Some(remaining) if *remaining > 0 => {
                    *remaining -= 1;
                    true
                }
                _ => false,
            };
            (state.files.get(&url).cloned(), fail, state.cancel_during.get(&url).cloned())
        };

        if fail {
            self.record(&url, request.etag_check, false);
            return Err(PatchError::Network {
                url,
                reason: "injected failure".to_string(),
            }
            .into());
        }
        let Some(file) = file else {
            self.record(&url, request.etag_check, false);
            return Err(PatchError::HttpStatus {
                url,
                status: 404,
            }
            .into());
        };

        if let Some(check) = request.etag_check
            && file.etag.as_deref() == Some(check)
        {
            self.record(&url, request.etag_check, false);
            return Ok(DownloadOutcome::NotModified);
        }

        self.record(&url, request.etag_check, true);
        let total = file.body.len() as u64;
        let mut sink = StreamSink::create(request.out, request.digest).await?;
        for chunk in file.body.chunks(CHUNK_SIZE) {
            request.cancel.check()?;
            sink.write(chunk).await?;
            (request.progress)(DownloadProgress {
                downloaded: sink.written(),
                total: Some(total),
            });
            if let Some(token) = &cancel_token {
                token.cancel();
            }
        }
        request.cancel.check()?;

        let (bytes, digest) = sink.finish().await?;
        Ok(DownloadOutcome::Downloaded(Downloaded {
            etag: file.etag,
            digest,
            bytes,
        }))
    }
}
