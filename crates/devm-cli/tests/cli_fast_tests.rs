//! Fast CLI tests using assert_cmd.
//! These test the binary directly without needing a container engine.

#![allow(deprecated)] // assert_cmd::Command::cargo_bin is deprecated but works fine

use assert_cmd::Command;
use predicates::prelude::*;

fn devm(config_dir: &std::path::Path) -> Command {
    let mut cmd = Command::cargo_bin("devm").unwrap();
    cmd.env("DEVM_CONFIG_DIR", config_dir);
    cmd
}

#[test]
fn test_help_flag() {
    let tmp = tempfile::tempdir().unwrap();
    devm(tmp.path())
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("Development Machine Runtime"));
}

#[test]
fn test_version_flag() {
    let tmp = tempfile::tempdir().unwrap();
    devm(tmp.path()).arg("--version").assert().success();
}

#[test]
fn test_subcommand_help() {
    let tmp = tempfile::tempdir().unwrap();
    for subcmd in &["servers", "snapshot", "exec", "config"] {
        devm(tmp.path())
            .args([subcmd, "--help"])
            .assert()
            .success()
            .stdout(predicate::str::is_empty().not());
    }
}

#[test]
fn test_snapshot_help_mentions_push() {
    let tmp = tempfile::tempdir().unwrap();
    devm(tmp.path())
        .args(["snapshot", "--help"])
        .assert()
        .success()
        .stdout(predicate::str::contains("--push"));
}

#[test]
fn test_unknown_subcommand_fails() {
    let tmp = tempfile::tempdir().unwrap();
    devm(tmp.path())
        .arg("nonexistent-subcommand")
        .assert()
        .failure();
}

#[test]
fn test_exec_requires_command() {
    let tmp = tempfile::tempdir().unwrap();
    devm(tmp.path()).args(["exec", "c0ffee"]).assert().failure();
}

#[test]
fn test_config_shows_defaults() {
    let tmp = tempfile::tempdir().unwrap();
    devm(tmp.path())
        .arg("config")
        .assert()
        .success()
        .stdout(predicate::str::contains("not created yet"))
        .stdout(predicate::str::contains("push_grace_period_ms = 2000"))
        .stdout(predicate::str::contains("internal_host = \"devm-host\""));
}

#[test]
fn test_config_reads_config_dir() {
    let tmp = tempfile::tempdir().unwrap();
    std::fs::write(
        tmp.path().join("config.toml"),
        "[servers]\nstrategy = \"local-network\"\n",
    )
    .unwrap();

    devm(tmp.path())
        .arg("config")
        .assert()
        .success()
        .stdout(predicate::str::contains("strategy = \"local-network\""));
}

#[test]
fn test_explicit_config_flag() {
    let tmp = tempfile::tempdir().unwrap();
    let path = tmp.path().join("custom.toml");
    std::fs::write(&path, "[snapshot]\nuse_registry = true\n").unwrap();

    devm(tmp.path())
        .args(["--config", path.to_str().unwrap(), "config"])
        .assert()
        .success()
        .stdout(predicate::str::contains("use_registry = true"));
}

#[test]
fn test_invalid_config_fails() {
    let tmp = tempfile::tempdir().unwrap();
    std::fs::write(tmp.path().join("config.toml"), "[servers\n").unwrap();

    devm(tmp.path())
        .arg("config")
        .assert()
        .failure()
        .stderr(predicate::str::contains("Failed to parse TOML"));
}

#[test]
fn test_missing_machine_definition_fails() {
    let tmp = tempfile::tempdir().unwrap();
    let missing = tmp.path().join("machine.json");

    devm(tmp.path())
        .args(["servers", "c0ffee", "--machine", missing.to_str().unwrap()])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Config file not found"));
}
