use crate::common::FixtureServer;
use launchpatch::core::{CancellationToken, PatchError};
use launchpatch::download::{
    DigestAlgorithm, DownloadOutcome, DownloadProgress, DownloadRequest, Downloader, HttpDownloader,
};
use reqwest::Url;
use std::path::Path;
use std::sync::Mutex;
use std::time::Duration;
use tempfile::TempDir;

async fn fetch(
    url: &str,
    out: &Path,
    etag_check: Option<&str>,
    cancel: &CancellationToken,
) -> anyhow::Result<DownloadOutcome> {
    let url = Url::parse(url).unwrap();
    let progress = |_: DownloadProgress| {};
    let request = DownloadRequest {
        url: &url,
        out,
        etag_check,
        digest: Some(DigestAlgorithm::Sha256),
        cancel,
        progress: &progress,
    };
    HttpDownloader::new()?.download(&request).await
}

#[tokio::test]
async fn test_download_writes_body_and_reports_etag() {
    launchpatch::test_utils::init_test_logging(None);
    let server = FixtureServer::start().await;
    server.serve("data.bin", b"payload".to_vec(), Some("\"v1\""));
    let temp = TempDir::new().unwrap();
    let out = temp.path().join("data.part");

    let outcome = fetch(&server.url("data.bin"), &out, None, &CancellationToken::new()).await.unwrap();

    let DownloadOutcome::Downloaded(downloaded) = outcome else {
        panic!("expected a body");
    };
    assert_eq!(downloaded.etag.as_deref(), Some("\"v1\""));
    assert_eq!(downloaded.bytes, 7);
    assert_eq!(downloaded.digest, Some(DigestAlgorithm::Sha256.hex_digest(b"payload")));
    assert_eq!(std::fs::read(&out).unwrap(), b"payload");
}

#[tokio::test]
async fn test_matching_check_value_is_not_modified() {
    let server = FixtureServer::start().await;
    server.serve("data.bin", b"payload".to_vec(), Some("\"v1\""));
    let temp = TempDir::new().unwrap();
    let out = temp.path().join("data.part");
    let cancel = CancellationToken::new();

    let outcome = fetch(&server.url("data.bin"), &out, Some("\"v1\""), &cancel).await.unwrap();
    assert_eq!(outcome, DownloadOutcome::NotModified);
    assert!(!out.exists());

    let outcome = fetch(&server.url("data.bin"), &out, Some("\"v0\""), &cancel).await.unwrap();
    assert!(matches!(outcome, DownloadOutcome::Downloaded(_)));

    let requests = server.requests();
    assert_eq!(requests[0].if_none_match.as_deref(), Some("\"v1\""));
    assert_eq!(requests[0].status, 304);
    assert_eq!(requests[1].status, 200);
}

#[tokio::test]
async fn test_not_modified_without_check_is_a_protocol_error() {
    let server = FixtureServer::start().await;
    server.respond_with("data.bin", 304);
    let temp = TempDir::new().unwrap();

    let err = fetch(&server.url("data.bin"), &temp.path().join("x"), None, &CancellationToken::new())
        .await
        .unwrap_err();
    let patch_error = err.downcast_ref::<PatchError>();
    assert!(matches!(patch_error, Some(PatchError::NotModifiedWithoutCheck { .. })));
    assert!(!patch_error.unwrap().is_retryable());
}

#[tokio::test]
async fn test_error_status_is_reported_with_url() {
    let server = FixtureServer::start().await;
    server.respond_with("broken.bin", 503);
    let temp = TempDir::new().unwrap();
    let cancel = CancellationToken::new();

    let err = fetch(&server.url("missing.bin"), &temp.path().join("x"), None, &cancel)
        .await
        .unwrap_err();
    match err.downcast_ref::<PatchError>() {
        Some(PatchError::HttpStatus {
            url,
            status,
        }) => {
            assert_eq!(*status, 404);
            assert!(url.ends_with("/missing.bin"));
        }
        other => panic!("unexpected error: {other:?}"),
    }

    let err =
        fetch(&server.url("broken.bin"), &temp.path().join("x"), None, &cancel).await.unwrap_err();
    let patch_error = err.downcast_ref::<PatchError>().unwrap();
    assert!(matches!(patch_error, PatchError::HttpStatus { status: 503, .. }));
    assert!(patch_error.is_retryable());
}

#[tokio::test]
async fn test_cancellation_interrupts_stalled_transfer() {
    let server = FixtureServer::start().await;
    server.stall("slow.bin", vec![7u8; 64 * 1024], 1024);
    let temp = TempDir::new().unwrap();
    let out = temp.path().join("slow.part");
    let url = Url::parse(&server.url("slow.bin")).unwrap();
    let cancel = CancellationToken::new();

    let received = Mutex::new(0u64);
    let progress = |p: DownloadProgress| {
        *received.lock().unwrap() = p.downloaded;
        if p.downloaded > 0 {
            cancel.cancel();
        }
    };
    let request = DownloadRequest {
        url: &url,
        out: &out,
        etag_check: None,
        digest: None,
        cancel: &cancel,
        progress: &progress,
    };

    let downloader = HttpDownloader::new().unwrap();
    let result = tokio::time::timeout(Duration::from_secs(10), downloader.download(&request))
        .await
        .expect("cancellation should end the transfer promptly");
    let err = result.unwrap_err();
    assert!(launchpatch::core::is_cancelled(&err));
    assert!(*received.lock().unwrap() > 0);
}

#[tokio::test]
async fn test_connection_failure_is_a_network_error() {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);
    let temp = TempDir::new().unwrap();

    let err = fetch(
        &format!("http://{addr}/data.bin"),
        &temp.path().join("x"),
        None,
        &CancellationToken::new(),
    )
    .await
    .unwrap_err();
    assert!(matches!(err.downcast_ref::<PatchError>(), Some(PatchError::Network { .. })));
}
