//! End-to-end CLI tests for the linkfetch binary.

use assert_cmd::Command;
use predicates::prelude::*;
use tempfile::TempDir;

/// Runs the binary with config discovery pointed at an empty directory.
fn linkfetch(dir: &TempDir) -> Command {
    let mut cmd = Command::cargo_bin("linkfetch").unwrap();
    cmd.current_dir(dir.path())
        .env("XDG_CONFIG_HOME", dir.path().join("config-home"))
        .env_remove("RUST_LOG");
    cmd
}

/// Test that --help displays usage information and exits with code 0.
#[test]
fn test_binary_help_displays_usage() {
    let dir = TempDir::new().unwrap();
    linkfetch(&dir)
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("--retry-delay"));
}

/// Test that --version displays version and exits with code 0.
#[test]
fn test_binary_version_displays_version() {
    let dir = TempDir::new().unwrap();
    linkfetch(&dir)
        .arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains("linkfetch"));
}

/// An unreadable work list is the one fatal startup error.
#[test]
fn test_binary_missing_input_fails() {
    let dir = TempDir::new().unwrap();
    linkfetch(&dir)
        .args(["-i", "does-not-exist.txt"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("does-not-exist.txt"));
}

#[test]
fn test_binary_empty_work_list_succeeds() {
    let dir = TempDir::new().unwrap();
    std::fs::write(dir.path().join("urls.txt"), "\n\nnot a url\n").unwrap();
    linkfetch(&dir).arg("-q").assert().success();
    // Normalized snapshot drops the invalid line.
    assert_eq!(
        std::fs::read_to_string(dir.path().join("urls.txt")).unwrap(),
        ""
    );
}

#[test]
fn test_binary_invalid_concurrency_rejected() {
    let dir = TempDir::new().unwrap();
    linkfetch(&dir)
        .args(["-c", "0"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("error"));
}

#[test]
fn test_binary_invalid_config_fails() {
    let dir = TempDir::new().unwrap();
    let config = dir.path().join("bad.toml");
    std::fs::write(&config, "concurrency = 500\n").unwrap();
    std::fs::write(dir.path().join("urls.txt"), "").unwrap();
    linkfetch(&dir)
        .arg("--config")
        .arg(&config)
        .assert()
        .failure()
        .stderr(predicate::str::contains("bad.toml"));
}

#[test]
fn test_binary_invalid_flag_returns_error() {
    let dir = TempDir::new().unwrap();
    linkfetch(&dir)
        .arg("--invalid-flag")
        .assert()
        .failure()
        .stderr(predicate::str::contains("error"));
}
