//! The `gcs-zip` binary: exit status, error output and the default output file.

use std::net::TcpListener;
use std::path::Path;
use std::process::{Command, Output};
use tempfile::tempdir;

/// An endpoint nothing listens on, so every storage call is refused.
fn closed_endpoint() -> String {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let port = listener.local_addr().unwrap().port();
    drop(listener);
    format!("http://127.0.0.1:{port}")
}

fn run_cli(dir: &Path, args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_gcs-zip"))
        .args(args)
        .current_dir(dir)
        .env_remove("STORAGE_EMULATOR_HOST")
        .env_remove("GCS_ZIP_STRICT")
        .env("RUST_LOG", "off")
        .output()
        .expect("failed to run gcs-zip")
}

#[test]
fn test_unreachable_storage_exits_with_1() {
    let dir = tempdir().unwrap();
    let endpoint = closed_endpoint();

    let output = run_cli(dir.path(), &["--endpoint", &endpoint, "gs://b/p/"]);

    assert_eq!(output.status.code(), Some(1));
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(!stdout.trim().is_empty(), "no error message on stdout");
    // The archive is created in the working directory before listing starts.
    assert!(dir.path().join("output.zip").exists());
}

#[test]
fn test_output_flag_names_the_archive() {
    let dir = tempdir().unwrap();
    let endpoint = closed_endpoint();

    let output = run_cli(
        dir.path(),
        &["--endpoint", &endpoint, "-o", "reports.zip", "gs://b/p/"],
    );

    assert_eq!(output.status.code(), Some(1));
    assert!(dir.path().join("reports.zip").exists());
    assert!(!dir.path().join("output.zip").exists());
}

#[test]
fn test_strict_rejects_malformed_target() {
    let dir = tempdir().unwrap();
    let endpoint = closed_endpoint();

    let output = run_cli(dir.path(), &["--strict", "--endpoint", &endpoint, "bucket/p"]);

    assert_eq!(output.status.code(), Some(1));
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("invalid target"), "stdout: {stdout}");
    assert!(!dir.path().join("output.zip").exists());
}
