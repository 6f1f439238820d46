//! Integration tests for the hogql binary.

use std::io::Write;

use assert_cmd::{Command, cargo::cargo_bin_cmd};
use predicates::prelude::*;
use tempfile::{NamedTempFile, TempDir};

fn cmd() -> Command {
    let mut cmd = cargo_bin_cmd!("hogql");
    cmd.env_remove("HOGQL_TEAM_ID")
        .env_remove("HOGQL_DIALECT")
        .env_remove("HOGQL_TIMEZONE");
    cmd
}

/// Command running in an empty directory with an empty home, so no config
/// file is picked up.
fn isolated() -> (Command, TempDir) {
    let dir = TempDir::new().unwrap();
    let mut cmd = cmd();
    cmd.current_dir(dir.path()).env("HOME", dir.path());
    (cmd, dir)
}

#[test]
fn test_print_constant() {
    let (mut cmd, _dir) = isolated();
    cmd.args(["print", "-q", "SELECT 1", "--no-color"])
        .assert()
        .success()
        .stdout("SELECT 1 LIMIT 100\n");
}

#[test]
fn test_print_events_query() {
    let (mut cmd, _dir) = isolated();
    cmd.args(["print", "-q", "SELECT event FROM events", "--no-color", "-t", "7"])
        .assert()
        .success()
        .stdout(predicate::str::contains("equals(events.team_id, 7)"));
}

#[test]
fn test_postgres_dialect() {
    let (mut cmd, _dir) = isolated();
    cmd.args(["print", "-q", "SELECT event FROM events", "-d", "postgres", "--no-color"])
        .assert()
        .success()
        .stdout("SELECT events.event AS event FROM events\n");
}

#[test]
fn test_failed_query_exits_with_two() {
    let (mut cmd, _dir) = isolated();
    cmd.args(["print", "-q", "SELECT nope()", "--no-color"])
        .assert()
        .code(2)
        .stdout(predicate::str::contains("Error: Unsupported function call"));
}

#[test]
fn test_queries_from_file() {
    let mut file = NamedTempFile::new().unwrap();
    writeln!(file, "SELECT 1;\nSELECT 2;").unwrap();
    let (mut cmd, _dir) = isolated();
    cmd.args(["print", "--file", file.path().to_str().unwrap(), "--no-color"])
        .assert()
        .success()
        .stdout(predicate::str::contains("-- Query #1"))
        .stdout(predicate::str::contains("-- Query #2"));
}

#[test]
fn test_queries_from_stdin() {
    let (mut cmd, _dir) = isolated();
    cmd.args(["print", "--file", "-", "--no-color"])
        .write_stdin("SELECT 3")
        .assert()
        .success()
        .stdout("SELECT 3 LIMIT 100\n");
}

#[test]
fn test_missing_file_fails() {
    let (mut cmd, _dir) = isolated();
    cmd.args(["print", "--file", "/nonexistent/queries.hogql"])
        .assert()
        .failure()
        .code(1);
}

#[test]
fn test_json_output() {
    let (mut cmd, _dir) = isolated();
    cmd.args(["print", "-q", "SELECT 'x'", "-f", "json"])
        .assert()
        .success()
        .stdout(predicate::str::contains("\"sql\": \"SELECT %(hogql_val_0)s LIMIT 100\""));
}

#[test]
fn test_local_config_is_used() {
    let (mut cmd, dir) = isolated();
    std::fs::write(dir.path().join(".hogql.toml"), "[compiler]\ndialect = \"hogql\"\n").unwrap();
    cmd.args(["print", "-q", "SELECT event FROM events", "--no-color"])
        .assert()
        .success()
        .stdout("SELECT event FROM events\n");
}

#[test]
fn test_env_team_id() {
    let (mut cmd, _dir) = isolated();
    cmd.env("HOGQL_TEAM_ID", "12")
        .args(["print", "-q", "SELECT event FROM events", "--no-color"])
        .assert()
        .success()
        .stdout(predicate::str::contains("equals(events.team_id, 12)"));
}

#[test]
fn test_help() {
    cmd().arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("print"));
}
