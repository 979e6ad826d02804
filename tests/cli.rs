use assert_cmd::prelude::*;
use predicates::str::contains;
use std::process::Command;
use tempfile::TempDir;

// `shelf-server` with no store path configured should exit non-zero without creating files
#[test]
fn server_cli_requires_a_store_path() {
    let temp_dir = TempDir::new().expect("unable to create temporary working directory");
    Command::cargo_bin("shelf-server")
        .unwrap()
        .env_remove("SHELF_FILENAME")
        .current_dir(&temp_dir)
        .assert()
        .failure()
        .stderr(contains("store path"));
    assert_eq!(std::fs::read_dir(temp_dir.path()).unwrap().count(), 0);
}

// `shelf-server -V` should print the version
#[test]
fn server_cli_version() {
    let temp_dir = TempDir::new().expect("unable to create temporary working directory");
    Command::cargo_bin("shelf-server")
        .unwrap()
        .args(&["-V"])
        .current_dir(&temp_dir)
        .assert()
        .stdout(contains(env!("CARGO_PKG_VERSION")));
}

#[test]
fn server_cli_invalid_protocol() {
    let temp_dir = TempDir::new().expect("unable to create temporary working directory");
    Command::cargo_bin("shelf-server")
        .unwrap()
        .args(&["--store", "data.db", "--protocol", "pickle"])
        .current_dir(&temp_dir)
        .assert()
        .failure();
}

#[test]
fn server_cli_invalid_addr() {
    let temp_dir = TempDir::new().expect("unable to create temporary working directory");
    Command::cargo_bin("shelf-server")
        .unwrap()
        .args(&["--store", "data.db", "--addr", "not-an-address"])
        .current_dir(&temp_dir)
        .assert()
        .failure()
        .stderr(contains("IP address"));
}
