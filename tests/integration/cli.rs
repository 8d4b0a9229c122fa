use crate::common::{FixtureServer, write_config};
use assert_cmd::Command;
use launchpatch::test_utils::{ManifestFixture, list_files};
use predicates::prelude::*;
use std::path::PathBuf;
use tempfile::TempDir;

fn launchpatch() -> Command {
    let mut cmd = Command::cargo_bin("launchpatch").unwrap();
    cmd.env_remove("RUST_LOG").env_remove("LAUNCHPATCH_CONFIG_PATH").env("NO_COLOR", "1");
    cmd
}

/// Run a command off the async runtime so the fixture server keeps serving.
async fn run(mut cmd: Command) -> assert_cmd::assert::Assert {
    tokio::task::spawn_blocking(move || cmd.assert()).await.unwrap()
}

#[test]
fn test_help_lists_commands() {
    launchpatch()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("check"))
        .stdout(predicate::str::contains("update"))
        .stdout(predicate::str::contains("trust"));
}

#[test]
fn test_check_without_install_root_fails() {
    let temp = TempDir::new().unwrap();
    let config = temp.path().join("config.toml");
    std::fs::write(&config, "manifest_url = \"http://127.0.0.1:9/package.xml\"\n").unwrap();

    launchpatch()
        .arg("--config")
        .arg(&config)
        .arg("check")
        .assert()
        .failure()
        .code(1)
        .stderr(predicate::str::contains("install_root is not set"));
}

#[test]
fn test_trust_add_extension_and_list() {
    let temp = TempDir::new().unwrap();
    let root = temp.path().join("game");
    let config = temp.path().join("config.toml");
    std::fs::write(&config, format!("install_root = {:?}\n", root.display().to_string())).unwrap();

    launchpatch()
        .env("LAUNCHPATCH_CONFIG_PATH", &config)
        .args(["--quiet", "trust", "add-extension", ".DLL"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Accepted .dll"));

    launchpatch()
        .env("LAUNCHPATCH_CONFIG_PATH", &config)
        .args(["trust", "list"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Accepted extensions"))
        .stdout(predicate::str::contains(".dll"));

    assert!(root.join(".launchpatch/trust.json").exists());
}

#[test]
fn test_trust_add_cert_rejects_missing_file() {
    let temp = TempDir::new().unwrap();
    let config = temp.path().join("config.toml");
    std::fs::write(&config, format!("install_root = {:?}\n", temp.path().display().to_string()))
        .unwrap();

    launchpatch()
        .arg("--config")
        .arg(&config)
        .args(["trust", "add-cert"])
        .arg(temp.path().join("absent.pem"))
        .assert()
        .failure()
        .stderr(predicate::str::contains("absent.pem"));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_update_then_check_reports_up_to_date() {
    let server = FixtureServer::start().await;
    let temp = TempDir::new().unwrap();
    let root: PathBuf = temp.path().join("game");
    let config = write_config(temp.path(), &root, &server);

    let document = ManifestFixture::new()
        .group(&server.base_url(), "bin", None)
        .file("launcher.cfg", 5)
        .build();
    server.serve("package.xml", document.into_bytes(), None);
    server.serve("version.txt", b"3.1.4\n".to_vec(), None);
    server.serve("launcher.cfg", b"lang=".to_vec(), Some("\"cfg1\""));

    let mut check = launchpatch();
    check.arg("--config").arg(&config).arg("check");
    run(check).await.success().stdout(predicate::str::contains("Update available"));

    let mut update = launchpatch();
    update.arg("--config").arg(&config).args(["--no-progress", "update"]);
    run(update)
        .await
        .success()
        .stdout(predicate::str::contains("Update complete"))
        .stdout(predicate::str::contains("3.1.4"));

    assert_eq!(list_files(&root), vec!["bin/launcher.cfg"]);
    assert_eq!(std::fs::read(root.join("bin/launcher.cfg")).unwrap(), b"lang=");

    let mut check = launchpatch();
    check.arg("--config").arg(&config).arg("check");
    run(check).await.success().stdout(predicate::str::contains("Up to date"));
}
