use crate::common::FixtureServer;
use launchpatch::core::PatchError;
use launchpatch::download::{DigestAlgorithm, HttpDownloader};
use launchpatch::state::{StatePaths, UninstallLog, UpdateCache};
use launchpatch::test_utils::{ManifestFixture, gzip, init_test_logging, list_files, zip_bytes};
use launchpatch::update_check::{HttpVersionSource, UpdateCheck};
use launchpatch::updater::{UpdateOptions, UpdateOutcome, UpdateReport, Updater};
use reqwest::Url;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tempfile::TempDir;

struct Install {
    _temp: TempDir,
    root: PathBuf,
    server: FixtureServer,
}

impl Install {
    async fn new() -> Self {
        init_test_logging(None);
        let temp = TempDir::new().unwrap();
        let root = temp.path().join("game");
        std::fs::create_dir_all(&root).unwrap();
        Self {
            _temp: temp,
            root,
            server: FixtureServer::start().await,
        }
    }

    async fn update(&self, document: &str, version: &str) -> anyhow::Result<UpdateOutcome> {
        Updater::new(self.root.clone(), document.to_string(), HttpDownloader::new()?)
            .with_version(version)
            .with_options(UpdateOptions {
                retry_attempts: 2,
                retry_delay: Duration::ZERO,
                ..UpdateOptions::default()
            })
            .perform()
            .await
    }

    async fn report(&self, document: &str, version: &str) -> UpdateReport {
        match self.update(document, version).await.unwrap() {
            UpdateOutcome::Completed(report) => report,
            UpdateOutcome::Cancelled => panic!("unexpected cancellation"),
        }
    }

    async fn log(&self) -> UninstallLog {
        UninstallLog::read(&StatePaths::new(&self.root).uninstall_log).await.unwrap()
    }
}

fn jar_body() -> Vec<u8> {
    (0..2000u32).map(|i| (i * 7 % 256) as u8).collect()
}

fn archive_v1() -> Vec<u8> {
    zip_bytes(&[
        ("textures/", b"".as_slice()),
        ("textures/grass.png", b"green".as_slice()),
        ("config/defaults.cfg", b"volume=5".as_slice()),
    ])
}

fn scenario(server: &FixtureServer) -> String {
    ManifestFixture::new()
        .group(&server.base_url(), "bin", Some("SHA1"))
        .file("fileA.jar", 2000)
        .group(&server.base_url(), "data", None)
        .archive("fileB.zip.gz", 4096)
        .build()
}

fn serve_scenario(server: &FixtureServer) {
    server.serve("fileA.jar", jar_body(), None);
    server.serve("fileB.zip.gz", gzip(&archive_v1()), Some("\"b1\""));
}

fn read(root: &Path, path: &str) -> Vec<u8> {
    std::fs::read(root.join(path)).unwrap()
}

#[tokio::test]
async fn test_fresh_install_then_idempotent_rerun() {
    let install = Install::new().await;
    serve_scenario(&install.server);
    let document = scenario(&install.server);

    let report = install.report(&document, "1.0.0").await;
    assert_eq!(report.downloaded, 2);
    assert_eq!(report.deployed, 2);
    assert_eq!(
        list_files(&install.root),
        vec!["bin/fileA.jar", "data/config/defaults.cfg", "data/textures/grass.png"]
    );
    assert_eq!(read(&install.root, "bin/fileA.jar"), jar_body());
    assert_eq!(read(&install.root, "data/config/defaults.cfg"), b"volume=5");

    let log = install.log().await;
    assert!(log.has_group("bin/fileA.jar"));
    assert!(log.has_group("data/fileB.zip"));
    assert!(log.has("data/textures/grass.png"));

    let cache = UpdateCache::load(&StatePaths::new(&install.root).cache).await.unwrap();
    let jar_digest = format!("\"{}\"", DigestAlgorithm::Sha1.hex_digest(&jar_body()));
    assert_eq!(cache.hash("bin/fileA.jar"), Some(jar_digest.as_str()));
    assert_eq!(cache.hash("data/fileB.zip"), Some("\"b1\""));
    assert_eq!(cache.current_version.as_deref(), Some("1.0.0"));

    install.server.clear_requests();
    let report = install.report(&document, "1.0.0").await;
    // No ETag from the server for the jar, so its cached digest never matches a 304.
    assert_eq!(report.downloaded, 1);
    assert_eq!(report.skipped, 1);
    assert_eq!(read(&install.root, "bin/fileA.jar"), jar_body());
    assert_eq!(install.log().await, log);

    let requests = install.server.requests();
    assert_eq!(requests.len(), 2);
    let jar_request = requests.iter().find(|r| r.path == "/fileA.jar").unwrap();
    assert_eq!(jar_request.if_none_match.as_deref(), Some(jar_digest.as_str()));
    let archive_request = requests.iter().find(|r| r.path == "/fileB.zip.gz").unwrap();
    assert_eq!(archive_request.status, 304);
}

#[tokio::test]
async fn test_new_version_replaces_archive_contents() {
    let install = Install::new().await;
    serve_scenario(&install.server);
    let document = scenario(&install.server);
    install.report(&document, "1.0.0").await;

    let archive_v2 = zip_bytes(&[
        ("textures/grass.png", b"greener".as_slice()),
        ("textures/sand.png", b"yellow".as_slice()),
    ]);
    install.server.serve("fileB.zip.gz", gzip(&archive_v2), Some("\"b2\""));

    let report = install.report(&document, "1.1.0").await;
    assert_eq!(report.downloaded, 2);
    assert_eq!(report.deleted, 1);
    assert_eq!(
        list_files(&install.root),
        vec!["bin/fileA.jar", "data/textures/grass.png", "data/textures/sand.png"]
    );
    assert_eq!(read(&install.root, "data/textures/grass.png"), b"greener");
    assert!(!install.root.join("data/config").exists());
    assert!(!install.log().await.has("data/config/defaults.cfg"));
}

#[tokio::test]
async fn test_removed_entry_is_uninstalled() {
    let install = Install::new().await;
    serve_scenario(&install.server);
    install.report(&scenario(&install.server), "1.0.0").await;

    let reduced = ManifestFixture::new()
        .group(&install.server.base_url(), "bin", Some("SHA1"))
        .file("fileA.jar", 2000)
        .build();
    let report = install.report(&reduced, "2.0.0").await;

    assert_eq!(report.deleted, 2);
    assert_eq!(list_files(&install.root), vec!["bin/fileA.jar"]);
    assert!(!install.root.join("data").exists());
    let cache = UpdateCache::load(&StatePaths::new(&install.root).cache).await.unwrap();
    assert!(cache.hash("data/fileB.zip").is_none());
}

#[tokio::test]
async fn test_server_failure_keeps_previous_generation() {
    let install = Install::new().await;
    serve_scenario(&install.server);
    let document = scenario(&install.server);
    install.report(&document, "1.0.0").await;
    let previous = install.log().await;

    install.server.respond_with("fileB.zip.gz", 500);
    install.server.clear_requests();
    let err = install.update(&document, "1.1.0").await.unwrap_err();

    match err.downcast_ref::<PatchError>() {
        Some(PatchError::DownloadFailed {
            attempts,
            ..
        }) => assert_eq!(*attempts, 2),
        other => panic!("unexpected error: {other:?}"),
    }
    let archive_attempts =
        install.server.requests().iter().filter(|r| r.path == "/fileB.zip.gz").count();
    assert_eq!(archive_attempts, 2);
    assert_eq!(install.log().await, previous);
    assert_eq!(read(&install.root, "data/config/defaults.cfg"), b"volume=5");
    let cache = UpdateCache::load(&StatePaths::new(&install.root).cache).await.unwrap();
    assert_eq!(cache.current_version.as_deref(), Some("1.0.0"));
}

#[tokio::test]
async fn test_update_check_over_http() {
    let install = Install::new().await;
    serve_scenario(&install.server);
    install.server.serve("version.txt", b"1.0.0\n".to_vec(), None);
    install.server.serve("package.xml", scenario(&install.server).into_bytes(), None);

    let source = || {
        HttpVersionSource::new(
            reqwest::Client::new(),
            Url::parse(&install.server.url("version.txt")).unwrap(),
            Url::parse(&install.server.url("package.xml")).unwrap(),
        )
    };

    let mut check = UpdateCheck::new(install.root.clone(), source());
    assert!(check.needs_update().await.unwrap());
    assert_eq!(check.latest_version(), Some("1.0.0"));

    let mut updater = check.create_updater(HttpDownloader::new().unwrap()).await.unwrap();
    assert!(matches!(updater.perform().await.unwrap(), UpdateOutcome::Completed(_)));

    let mut check = UpdateCheck::new(install.root.clone(), source());
    assert!(!check.needs_update().await.unwrap());
}

#[tokio::test]
async fn test_manifest_cannot_replace_state_files() {
    let install = Install::new().await;
    let paths = StatePaths::new(&install.root);
    std::fs::create_dir_all(paths.trust_record.parent().unwrap()).unwrap();
    std::fs::write(&paths.trust_record, br#"{"accepted_extensions":[]}"#).unwrap();

    let planted = br#"{"accepted_certificates":["evil"],"accepted_extensions":["exe"]}"#;
    install.server.serve("trust.json.gz", gzip(planted), None);
    install.server.serve("TRUST.JSON", planted.to_vec(), None);
    install.server.serve("readme.txt", b"hello".to_vec(), None);
    let document = ManifestFixture::new()
        .group(&install.server.base_url(), ".launchpatch", None)
        .file("trust.json.gz", planted.len() as u64)
        .group(&install.server.base_url(), ".LaunchPatch", None)
        .file("TRUST.JSON", planted.len() as u64)
        .group(&install.server.base_url(), "docs", None)
        .file("readme.txt", 5)
        .build();

    let report = install.report(&document, "1.0.0").await;
    assert_eq!(report.downloaded, 1);
    assert_eq!(list_files(&install.root), vec!["docs/readme.txt"]);
    assert_eq!(std::fs::read(&paths.trust_record).unwrap(), br#"{"accepted_extensions":[]}"#);
    assert!(
        !install.server.requests().iter().any(|r| r.path.to_ascii_lowercase().starts_with("/trust"))
    );
}
