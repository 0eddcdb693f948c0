//! End-to-end checks of the `fob-html` binary.

use assert_cmd::Command;
use predicates::prelude::*;
use tempfile::TempDir;

fn fob_html(dir: &TempDir) -> Command {
    let mut cmd = Command::cargo_bin("fob-html").unwrap();
    cmd.current_dir(dir.path())
        .env_remove("RUST_LOG")
        .env("NO_COLOR", "1");
    cmd
}

#[test]
fn test_help_lists_build() {
    let temp = TempDir::new().unwrap();
    fob_html(&temp)
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("build"));
}

#[test]
fn test_build_without_entries_fails() {
    let temp = TempDir::new().unwrap();
    fob_html(&temp)
        .args(["build", "--out-dir", "dist"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("no HTML entry points"));
}

#[test]
fn test_build_without_out_dir_fails() {
    let temp = TempDir::new().unwrap();
    std::fs::write(temp.path().join("index.html"), "<html></html>").unwrap();

    fob_html(&temp)
        .args(["build", "index.html"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("out_dir"));
}

#[test]
fn test_missing_reference_fails_build() {
    let temp = TempDir::new().unwrap();
    std::fs::write(
        temp.path().join("index.html"),
        r#"<html><head><script src="./missing.js"></script></head><body></body></html>"#,
    )
    .unwrap();

    fob_html(&temp)
        .args(["build", "index.html", "--out-dir", "dist"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Could not resolve \"./missing.js\""));

    assert!(!temp.path().join("dist/index.html").exists());
}
