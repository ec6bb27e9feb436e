//! Integration tests for the `vantage` CLI binary.
//!
//! These exercise argument parsing, completions, configuration and the
//! profile commands against temporary files. None of them needs a
//! running engine.
#![allow(clippy::unwrap_used)]

use std::path::{Path, PathBuf};

use assert_cmd::cargo::cargo_bin_cmd;
use predicates::prelude::*;
use tempfile::TempDir;

// ── Helpers ─────────────────────────────────────────────────────────

const INDEX: &str = "\
current: p1
items:
  - uid: p1
    type: local
    name: Home
    file: p1.yaml
  - uid: p2
    type: remote
    name: Office
    file: p2.yaml
    url: https://example.com/office.yaml
";

/// Build a [`Command`] for the `vantage` binary with env isolation.
///
/// Clears all `VANTAGE_*` env vars and points config directories at a
/// nonexistent path so tests never touch the user's real configuration.
fn vantage_cmd() -> assert_cmd::Command {
    let mut cmd = cargo_bin_cmd!("vantage");
    cmd.env("HOME", "/tmp/vantage-cli-test-nonexistent")
        .env("XDG_CONFIG_HOME", "/tmp/vantage-cli-test-nonexistent")
        .env("XDG_DATA_HOME", "/tmp/vantage-cli-test-nonexistent")
        .env("NO_COLOR", "1")
        .env_remove("RUST_LOG")
        .env_remove("VANTAGE_CONFIG")
        .env_remove("VANTAGE_ENGINE_URL")
        .env_remove("VANTAGE_OUTPUT")
        .env_remove("VANTAGE_TIMEOUT")
        .env_remove("VANTAGE_ENGINE__URL")
        .env_remove("VANTAGE_ENGINE__SECRET")
        .env_remove("VANTAGE_PROFILES__PATH");
    cmd
}

/// A temp dir holding `config.toml` that points at `profiles.yaml`.
fn workspace(index: Option<&str>) -> (TempDir, PathBuf) {
    let dir = tempfile::tempdir().unwrap();
    let profiles = dir.path().join("profiles.yaml");
    if let Some(index) = index {
        std::fs::write(&profiles, index).unwrap();
    }
    let config = dir.path().join("config.toml");
    std::fs::write(
        &config,
        format!(
            "[engine]\nurl = \"http://127.0.0.1:9\"\ntimeout = 1\n\n[profiles]\npath = {:?}\n",
            profiles.display().to_string()
        ),
    )
    .unwrap();
    (dir, config)
}

fn config_arg(path: &Path) -> String {
    format!("--config={}", path.display())
}

/// Concatenate stdout + stderr from a command output for flexible matching.
fn combined_output(output: &std::process::Output) -> String {
    let stdout = String::from_utf8_lossy(&output.stdout);
    let stderr = String::from_utf8_lossy(&output.stderr);
    format!("{stdout}{stderr}")
}

// ── Basic invocation ────────────────────────────────────────────────

#[test]
fn test_no_args_shows_help() {
    let output = vantage_cmd().output().unwrap();
    assert_eq!(output.status.code(), Some(2), "Expected exit code 2");
    let text = combined_output(&output);
    assert!(text.contains("Usage"), "Expected 'Usage' in output:\n{text}");
}

#[test]
fn test_help_flag() {
    vantage_cmd().arg("--help").assert().success().stdout(
        predicate::str::contains("watch")
            .and(predicate::str::contains("profiles"))
            .and(predicate::str::contains("switch"))
            .and(predicate::str::contains("config")),
    );
}

#[test]
fn test_version_flag() {
    vantage_cmd()
        .arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains("vantage"));
}

#[test]
fn test_watch_rejects_unknown_stream() {
    vantage_cmd()
        .args(["watch", "weather"])
        .assert()
        .code(2)
        .stderr(predicate::str::contains("traffic"));
}

// ── Shell completions ───────────────────────────────────────────────

#[test]
fn test_completions_bash() {
    vantage_cmd()
        .args(["completions", "bash"])
        .assert()
        .success()
        .stdout(predicate::str::contains("vantage"));
}

#[test]
fn test_completions_zsh() {
    vantage_cmd()
        .args(["completions", "zsh"])
        .assert()
        .success()
        .stdout(predicate::str::is_empty().not());
}

// ── Config ──────────────────────────────────────────────────────────

#[test]
fn test_config_path_honors_flag() {
    let (_dir, config) = workspace(None);
    vantage_cmd()
        .args([&config_arg(&config), "config", "path"])
        .assert()
        .success()
        .stdout(predicate::str::contains("config.toml"));
}

#[test]
fn test_config_show_masks_secret() {
    let dir = tempfile::tempdir().unwrap();
    let config = dir.path().join("config.toml");
    std::fs::write(
        &config,
        "[engine]\nurl = \"http://10.0.0.2:9090\"\nsecret = \"hunter2\"\n",
    )
    .unwrap();

    vantage_cmd()
        .args([&config_arg(&config), "config", "show", "--output", "json"])
        .assert()
        .success()
        .stdout(
            predicate::str::contains("http://10.0.0.2:9090")
                .and(predicate::str::contains("hunter2").not()),
        );
}

#[test]
fn test_env_overrides_config_file() {
    let (_dir, config) = workspace(None);
    vantage_cmd()
        .args([&config_arg(&config), "config", "show", "-o", "json-compact"])
        .env("VANTAGE_ENGINE__URL", "http://192.168.1.5:9097")
        .assert()
        .success()
        .stdout(predicate::str::contains("http://192.168.1.5:9097"));
}

#[test]
fn test_invalid_engine_url_is_usage_error() {
    let (_dir, config) = workspace(Some(INDEX));
    vantage_cmd()
        .args([&config_arg(&config), "--engine", "ftp://127.0.0.1", "profiles"])
        .assert()
        .code(2)
        .stderr(predicate::str::contains("engine.url"));
}

// ── Profiles ────────────────────────────────────────────────────────

#[test]
fn test_profiles_plain_lists_uids() {
    let (_dir, config) = workspace(Some(INDEX));
    vantage_cmd()
        .args([&config_arg(&config), "profiles", "-o", "plain"])
        .assert()
        .success()
        .stdout("p1\np2\n");
}

#[test]
fn test_profiles_table_marks_current() {
    let (_dir, config) = workspace(Some(INDEX));
    vantage_cmd()
        .args([&config_arg(&config), "profiles"])
        .assert()
        .success()
        .stdout(
            predicate::str::contains("Home")
                .and(predicate::str::contains("Office"))
                .and(predicate::str::contains("*")),
        )
        .stderr(predicate::str::contains("current: Home"));
}

#[test]
fn test_profiles_json_keeps_unknown_fields() {
    let (_dir, config) = workspace(Some(INDEX));
    let output = vantage_cmd()
        .args([&config_arg(&config), "profiles", "-o", "json"])
        .output()
        .unwrap();
    assert!(output.status.success(), "{}", combined_output(&output));

    let items: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(items[1]["uid"], "p2");
    assert_eq!(items[1]["type"], "remote");
    assert_eq!(items[1]["url"], "https://example.com/office.yaml");
}

#[test]
fn test_profiles_path_from_env() {
    let (dir, _config) = workspace(None);
    let profiles = dir.path().join("elsewhere.yaml");
    std::fs::write(&profiles, INDEX).unwrap();

    vantage_cmd()
        .args(["profiles", "-o", "plain"])
        .env("VANTAGE_PROFILES__PATH", &profiles)
        .assert()
        .success()
        .stdout(predicate::str::contains("p2"));
}

#[test]
fn test_profiles_missing_index_fails() {
    let (_dir, config) = workspace(None);
    vantage_cmd()
        .args([&config_arg(&config), "profiles"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Could not read profiles"));
}

// ── Switch ──────────────────────────────────────────────────────────

#[test]
fn test_switch_unknown_profile_exits_not_found() {
    let (_dir, config) = workspace(Some(INDEX));
    vantage_cmd()
        .args([&config_arg(&config), "switch", "p9"])
        .assert()
        .code(4)
        .stderr(predicate::str::contains("p9"));
}

#[test]
fn test_switch_with_unreachable_engine_reports_error_event() {
    let (dir, config) = workspace(Some(INDEX));
    let output = vantage_cmd()
        .args([&config_arg(&config), "switch", "p2"])
        .output()
        .unwrap();

    assert_eq!(output.status.code(), Some(6), "{}", combined_output(&output));
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("queue: start p2"), "{stderr}");
    assert!(stderr.contains("queue: error p2"), "{stderr}");
    assert!(stderr.contains("queue: idle"), "{stderr}");

    // The failed switch must not have touched the index.
    let index = std::fs::read_to_string(dir.path().join("profiles.yaml")).unwrap();
    assert!(index.contains("current: p1"));
}
