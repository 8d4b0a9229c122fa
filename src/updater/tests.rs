use super::*;
use crate::download::DigestAlgorithm;
use crate::test_utils::{
    FakeDownloader, ManifestFixture, RecordingListener, gzip, init_test_logging, list_files,
    zip_bytes,
};
use tempfile::TempDir;

const CDN: &str = "https://cdn.test/game/";
const FILE_A: &str = "https://cdn.test/game/fileA.jar";
const FILE_B: &str = "https://cdn.test/game/fileB.zip.gz";

struct Harness {
    _temp: TempDir,
    root: PathBuf,
    downloader: FakeDownloader,
}

impl Harness {
    fn new() -> Self {
        init_test_logging(None);
        let temp = TempDir::new().unwrap();
        let root = temp.path().join("install");
        std::fs::create_dir_all(&root).unwrap();
        Self {
            _temp: temp,
            root,
            downloader: FakeDownloader::new(),
        }
    }

    fn updater(&self, document: &str) -> Updater<FakeDownloader> {
        Updater::new(self.root.clone(), document.to_string(), self.downloader.clone())
            .with_options(UpdateOptions {
                retry_delay: Duration::ZERO,
                ..UpdateOptions::default()
            })
    }

    async fn run(&self, document: &str, version: &str) -> Result<UpdateOutcome> {
        self.updater(document).with_version(version).perform().await
    }

    async fn report(&self, document: &str, version: &str) -> UpdateReport {
        match self.run(document, version).await.unwrap() {
            UpdateOutcome::Completed(report) => report,
            UpdateOutcome::Cancelled => panic!("unexpected cancellation"),
        }
    }

    async fn log(&self) -> UninstallLog {
        UninstallLog::read(&StatePaths::new(&self.root).uninstall_log).await.unwrap()
    }

    async fn cache(&self) -> UpdateCache {
        UpdateCache::load(&StatePaths::new(&self.root).cache).await.unwrap()
    }

    fn workspace_is_empty(&self) -> bool {
        let temp = StatePaths::new(&self.root).temp;
        !temp.exists() || std::fs::read_dir(temp).unwrap().next().is_none()
    }
}

fn quoted_sha1(data: &[u8]) -> String {
    format!("\"{}\"", DigestAlgorithm::Sha1.hex_digest(data))
}

fn file_a_body() -> Vec<u8> {
    (0..2000u32).map(|i| (i % 251) as u8).collect()
}

fn file_b_archive() -> Vec<u8> {
    zip_bytes(&[("data/readme.txt", b"hello".as_slice()), ("data/level1.dat", b"1111".as_slice())])
}

/// `fileA.jar` (SHA1-verified) in `bin/` and gzip-filtered archive `fileB.zip.gz` in `lib/`.
fn scenario_manifest() -> String {
    ManifestFixture::new()
        .group(CDN, "bin", Some("SHA1"))
        .file("fileA.jar", 2000)
        .group(CDN, "lib", None)
        .archive("fileB.zip.gz", 4096)
        .build()
}

fn serve_scenario(downloader: &FakeDownloader) {
    let body = file_a_body();
    downloader.serve_with_etag(FILE_A, body.clone(), &quoted_sha1(&body));
    downloader.serve_with_etag(FILE_B, gzip(&file_b_archive()), "\"b-v1\"");
}

#[tokio::test]
async fn test_first_run_installs_everything() {
    let h = Harness::new();
    serve_scenario(&h.downloader);

    let report = h.report(&scenario_manifest(), "v1").await;
    assert_eq!(report.downloaded, 2);
    assert_eq!(report.skipped, 0);
    assert_eq!(report.deployed, 2);
    assert_eq!(report.deleted, 0);
    assert_eq!(report.version.as_deref(), Some("v1"));

    assert_eq!(
        list_files(&h.root),
        vec!["bin/fileA.jar", "lib/data/level1.dat", "lib/data/readme.txt"]
    );
    assert_eq!(std::fs::read(h.root.join("bin/fileA.jar")).unwrap(), file_a_body());
    assert_eq!(std::fs::read(h.root.join("lib/data/readme.txt")).unwrap(), b"hello");

    let log = h.log().await;
    let entries: Vec<(&str, &str)> = log.entries().collect();
    assert_eq!(
        entries,
        vec![
            ("bin/fileA.jar", "bin/fileA.jar"),
            ("lib/fileB.zip", "lib/data/level1.dat"),
            ("lib/fileB.zip", "lib/data/readme.txt"),
        ]
    );

    let cache = h.cache().await;
    assert_eq!(cache.current_version.as_deref(), Some("v1"));
    assert_eq!(cache.hash("bin/fileA.jar"), Some(quoted_sha1(&file_a_body()).as_str()));
    assert_eq!(cache.hash("lib/fileB.zip"), Some("\"b-v1\""));
    assert!(h.workspace_is_empty());
}

#[tokio::test]
async fn test_second_run_is_idempotent() {
    let h = Harness::new();
    serve_scenario(&h.downloader);
    let document = scenario_manifest();

    h.report(&document, "v1").await;
    let first_log = h.log().await;
    h.downloader.clear_requests();

    let report = h.report(&document, "v1").await;
    assert_eq!(report.downloaded, 0);
    assert_eq!(report.skipped, 2);
    assert_eq!(report.deployed, 0);
    assert_eq!(report.deleted, 0);
    assert_eq!(h.downloader.bodies_served(), 0);

    let requests = h.downloader.requests();
    assert_eq!(requests.len(), 2);
    assert!(requests.iter().all(|r| r.etag_check.is_some()));

    assert_eq!(h.log().await, first_log);
    assert_eq!(list_files(&h.root).len(), 3);
}

#[tokio::test]
async fn test_orphans_are_deleted() {
    let h = Harness::new();
    for name in ["a.txt", "b.txt", "c.txt"] {
        h.downloader.serve(&format!("{CDN}{name}"), name.as_bytes().to_vec());
    }
    let all = ManifestFixture::new()
        .group(CDN, "", None)
        .file("a.txt", 1)
        .file("b.txt", 1)
        .file("sub/c.txt", 1)
        .build();
    h.downloader.serve(&format!("{CDN}sub/c.txt"), b"c".to_vec());
    h.report(&all, "v1").await;
    assert_eq!(list_files(&h.root), vec!["a.txt", "b.txt", "c.txt"]);

    let without_b =
        ManifestFixture::new().group(CDN, "", None).file("a.txt", 1).file("sub/c.txt", 1).build();
    let report = h.report(&without_b, "v2").await;

    assert_eq!(report.deleted, 1);
    assert_eq!(list_files(&h.root), vec!["a.txt", "c.txt"]);
    let log = h.log().await;
    let paths: Vec<&str> = log.entries().map(|(_, p)| p).collect();
    assert_eq!(paths, vec!["a.txt", "c.txt"]);
}

#[tokio::test]
async fn test_orphaned_archive_members_are_deleted_and_dirs_pruned() {
    let h = Harness::new();
    serve_scenario(&h.downloader);
    h.report(&scenario_manifest(), "v1").await;

    let only_a = ManifestFixture::new().group(CDN, "bin", Some("SHA1")).file("fileA.jar", 2000).build();
    let report = h.report(&only_a, "v2").await;

    assert_eq!(report.deleted, 2);
    assert_eq!(list_files(&h.root), vec!["bin/fileA.jar"]);
    assert!(!h.root.join("lib").exists());
    assert!(h.cache().await.hash("lib/fileB.zip").is_none());
}

#[tokio::test]
async fn test_skipped_files_are_carried_forward() {
    let h = Harness::new();
    serve_scenario(&h.downloader);
    let document = scenario_manifest();
    h.report(&document, "v1").await;

    // Only fileA changes upstream
    let new_body = b"new jar".to_vec();
    h.downloader.serve_with_etag(FILE_A, new_body.clone(), &quoted_sha1(&new_body));

    let report = h.report(&document, "v2").await;
    assert_eq!(report.downloaded, 1);
    assert_eq!(report.skipped, 1);
    assert_eq!(report.deleted, 0);

    let log = h.log().await;
    assert!(log.has("lib/data/readme.txt"));
    assert!(log.has("lib/data/level1.dat"));
    assert!(log.has("bin/fileA.jar"));
    assert_eq!(std::fs::read(h.root.join("bin/fileA.jar")).unwrap(), new_body);

    // A third run must not treat the carried-forward archive as orphaned
    let report = h.report(&document, "v2").await;
    assert_eq!(report.deleted, 0);
    assert!(h.root.join("lib/data/readme.txt").exists());
}

#[tokio::test]
async fn test_cancellation_mid_download_commits_nothing() {
    let h = Harness::new();
    serve_scenario(&h.downloader);
    let updater = h.updater(&scenario_manifest()).with_version("v1");
    h.downloader.cancel_during(FILE_A, updater.cancellation_token());
    let listener = Arc::new(RecordingListener::new());
    let mut updater = updater.with_listener(listener.clone());

    let outcome = updater.perform().await.unwrap();
    assert_eq!(outcome, UpdateOutcome::Cancelled);
    assert_eq!(updater.state(), UpdateState::Cancelled);

    assert!(h.log().await.is_empty());
    assert!(h.cache().await.current_version.is_none());
    assert!(list_files(&h.root).is_empty());
    assert!(h.workspace_is_empty());
    assert_eq!(listener.titles().last().map(String::as_str), Some("Update cancelled"));
    assert_eq!(listener.events().last(), Some(&crate::test_utils::ListenerEvent::Completed));
}

#[tokio::test]
async fn test_cancelled_before_start() {
    let h = Harness::new();
    serve_scenario(&h.downloader);
    let mut updater = h.updater(&scenario_manifest());
    updater.cancellation_token().cancel();

    assert_eq!(updater.perform().await.unwrap(), UpdateOutcome::Cancelled);
    assert!(h.downloader.requests().is_empty());
}

#[tokio::test]
async fn test_transient_failures_are_retried() {
    let h = Harness::new();
    serve_scenario(&h.downloader);
    h.downloader.fail_times(FILE_A, 2);

    let report = h.report(&scenario_manifest(), "v1").await;
    assert_eq!(report.downloaded, 2);
    let attempts = h.downloader.requests().iter().filter(|r| r.url == FILE_A).count();
    assert_eq!(attempts, 3);
}

#[tokio::test]
async fn test_retries_exhausted_fail_the_cycle() {
    let h = Harness::new();
    serve_scenario(&h.downloader);
    h.downloader.fail_times(FILE_B, 10);

    let mut updater = h.updater(&scenario_manifest()).with_options(UpdateOptions {
        retry_attempts: 3,
        retry_delay: Duration::ZERO,
        ..UpdateOptions::default()
    });
    let err = updater.perform().await.unwrap_err();
    match err.downcast_ref::<PatchError>() {
        Some(PatchError::DownloadFailed {
            url,
            attempts,
            ..
        }) => {
            assert_eq!(url, FILE_B);
            assert_eq!(*attempts, 3);
        }
        other => panic!("expected DownloadFailed, got {other:?}"),
    }
    assert_eq!(updater.state(), UpdateState::Failed);
    assert!(h.log().await.is_empty());
    assert!(h.workspace_is_empty());
}

#[tokio::test]
async fn test_digest_mismatch_fails_without_deploying() {
    let h = Harness::new();
    let body = file_a_body();
    h.downloader.serve_with_etag(FILE_A, body, &quoted_sha1(b"something else"));
    let document = ManifestFixture::new().group(CDN, "bin", Some("SHA1")).file("fileA.jar", 2000).build();

    let err = h.run(&document, "v1").await.unwrap_err();
    assert!(matches!(err.downcast_ref::<PatchError>(), Some(PatchError::DigestMismatch { .. })));
    assert!(list_files(&h.root).is_empty());
    assert_eq!(h.downloader.requests().len(), 1);
}

#[tokio::test]
async fn test_bad_manifest_attempts_no_downloads() {
    let h = Harness::new();
    serve_scenario(&h.downloader);
    let document = r#"<package version="9.9"><filegroup source="https://cdn.test/game/" dest="bin"><file>fileA.jar</file></filegroup></package>"#;

    let err = h.run(document, "v1").await.unwrap_err();
    assert!(matches!(err.downcast_ref::<PatchError>(), Some(PatchError::UnsupportedFormat { .. })));
    assert!(h.downloader.requests().is_empty());
}

#[tokio::test]
async fn test_deploy_failure_keeps_previous_generation() {
    let h = Harness::new();
    serve_scenario(&h.downloader);
    h.report(&scenario_manifest(), "v1").await;
    let previous = h.log().await;

    let evil = zip_bytes(&[("../../escape.txt", b"x".as_slice())]);
    h.downloader.serve_with_etag(FILE_B, gzip(&evil), "\"b-v2\"");

    let err = h.run(&scenario_manifest(), "v2").await.unwrap_err();
    assert!(matches!(err.downcast_ref::<PatchError>(), Some(PatchError::Signature { .. })));
    assert_eq!(h.log().await, previous);
    assert_eq!(h.cache().await.current_version.as_deref(), Some("v1"));
    assert!(!h.root.parent().unwrap().join("escape.txt").exists());
}

#[tokio::test]
async fn test_archive_cannot_rewrite_trust_record() {
    let h = Harness::new();
    let paths = StatePaths::new(&h.root);
    std::fs::create_dir_all(h.root.join(".launchpatch")).unwrap();
    std::fs::write(&paths.trust_record, b"{}").unwrap();

    let planted = br#"{"accepted_extensions":["exe"]}"#;
    let archive = zip_bytes(&[(".launchpatch/trust.json", planted.as_slice())]);
    h.downloader.serve(FILE_B, gzip(&archive));
    let document = ManifestFixture::new().group(CDN, "", None).archive("fileB.zip.gz", 100).build();

    let err = h.run(&document, "v1").await.unwrap_err();
    assert!(matches!(err.downcast_ref::<PatchError>(), Some(PatchError::Signature { .. })));
    assert_eq!(std::fs::read(&paths.trust_record).unwrap(), b"{}");
    assert!(h.log().await.is_empty());
    assert!(h.workspace_is_empty());
}

#[tokio::test]
async fn test_unsigned_archive_is_rejected_when_verification_required() {
    let h = Harness::new();
    h.downloader.serve(FILE_B, gzip(&file_b_archive()));
    let document = ManifestFixture::new()
        .group_with_attributes(&format!(r#"source="{CDN}" dest="lib" verify-signature="true""#))
        .archive("fileB.zip.gz", 4096)
        .build();

    let err = h.run(&document, "v1").await.unwrap_err();
    match err.downcast_ref::<PatchError>() {
        Some(PatchError::Signature {
            reason,
            ..
        }) => assert!(reason.contains("not digitally signed")),
        other => panic!("expected Signature, got {other:?}"),
    }
    assert!(list_files(&h.root).is_empty());
}

#[tokio::test]
async fn test_deselected_component_is_skipped_and_removed() {
    let h = Harness::new();
    serve_scenario(&h.downloader);
    let document = ManifestFixture::new()
        .group(CDN, "bin", Some("SHA1"))
        .file("fileA.jar", 2000)
        .group_with_attributes(&format!(r#"source="{CDN}" dest="lib" component="extras""#))
        .archive("fileB.zip.gz", 4096)
        .build();

    h.report(&document, "v1").await;
    assert!(h.root.join("lib/data/readme.txt").exists());

    let paths = StatePaths::new(&h.root);
    let mut cache = h.cache().await;
    cache.set_selected("extras", false);
    cache.save(&paths.cache).await.unwrap();
    h.downloader.clear_requests();

    let report = h.report(&document, "v1").await;
    assert_eq!(report.deleted, 2);
    assert!(h.downloader.requests().iter().all(|r| r.url != FILE_B));
    assert_eq!(list_files(&h.root), vec!["bin/fileA.jar"]);
}

#[tokio::test]
async fn test_component_not_selected_by_default() {
    let h = Harness::new();
    serve_scenario(&h.downloader);
    let document = ManifestFixture::new()
        .group_with_attributes(&format!(r#"source="{CDN}" dest="lib" component="hd" selected="false""#))
        .archive("fileB.zip.gz", 4096)
        .build();

    let report = h.report(&document, "v1").await;
    assert_eq!(report.downloaded, 0);
    assert!(h.downloader.requests().is_empty());
}

#[tokio::test]
async fn test_force_reinstall_ignores_cache() {
    let h = Harness::new();
    serve_scenario(&h.downloader);
    let document = scenario_manifest();
    h.report(&document, "v1").await;
    h.downloader.clear_requests();

    let mut updater = h.updater(&document).with_options(UpdateOptions {
        force_reinstall: true,
        retry_delay: Duration::ZERO,
        ..UpdateOptions::default()
    });
    let UpdateOutcome::Completed(report) = updater.perform().await.unwrap() else {
        panic!("unexpected cancellation");
    };
    assert_eq!(report.downloaded, 2);
    assert!(h.downloader.requests().iter().all(|r| r.etag_check.is_none()));
}

#[tokio::test]
async fn test_missing_file_is_downloaded_unconditionally() {
    let h = Harness::new();
    serve_scenario(&h.downloader);
    let document = scenario_manifest();
    h.report(&document, "v1").await;

    std::fs::remove_file(h.root.join("bin/fileA.jar")).unwrap();
    h.downloader.clear_requests();

    let report = h.report(&document, "v1").await;
    assert_eq!(report.downloaded, 1);
    assert_eq!(report.skipped, 1);
    let request_a = h.downloader.requests().into_iter().find(|r| r.url == FILE_A).unwrap();
    assert!(request_a.etag_check.is_none());
    assert!(h.root.join("bin/fileA.jar").exists());
}

#[tokio::test]
async fn test_digest_is_cached_when_server_sends_no_etag() {
    let h = Harness::new();
    let body = file_a_body();
    h.downloader.serve(FILE_A, body.clone());
    let document = ManifestFixture::new().group(CDN, "bin", Some("SHA1")).file("fileA.jar", 2000).build();

    h.report(&document, "v1").await;
    assert_eq!(h.cache().await.hash("bin/fileA.jar"), Some(quoted_sha1(&body).as_str()));

    h.downloader.clear_requests();
    h.report(&document, "v1").await;
    assert_eq!(h.downloader.requests()[0].etag_check, Some(quoted_sha1(&body)));
}

#[tokio::test]
async fn test_progress_events() {
    let h = Harness::new();
    serve_scenario(&h.downloader);
    let listener = Arc::new(RecordingListener::new());
    let mut updater = h.updater(&scenario_manifest()).with_listener(listener.clone());

    updater.perform().await.unwrap();

    assert_eq!(
        listener.titles(),
        vec![
            "Checking package manifest",
            "Downloading updates",
            "Installing updates",
            "Removing old files",
            "Update complete",
        ]
    );
    let values = listener.values();
    assert!(values.windows(2).all(|w| w[0] <= w[1] + 1e-9), "progress went backwards: {values:?}");
    assert!(values.iter().all(|v| (0.0..=1.0).contains(v)));
    assert!(values.iter().any(|v| (*v - DOWNLOAD_PROGRESS_SHARE).abs() < 1e-9));
    assert_eq!(values.last().copied(), Some(1.0));
    assert_eq!(listener.events().last(), Some(&crate::test_utils::ListenerEvent::Completed));
}

#[tokio::test]
async fn test_concurrent_cycle_is_refused() {
    let h = Harness::new();
    let _held = InstallLock::acquire(&h.root, UPDATE_LOCK_NAME).await.unwrap();
    let lock = InstallLock::acquire_with_timeout(&h.root, UPDATE_LOCK_NAME, Duration::from_millis(50)).await;
    assert!(lock.is_err());
}
