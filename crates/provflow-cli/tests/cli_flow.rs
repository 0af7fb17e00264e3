//! Integration tests for the provflow CLI.
//!
//! Each test creates a fresh temporary project and drives the real binary
//! with `assert_cmd`. Steps are plain POSIX commands (`cp`, `wc`).

mod common;

use std::fs;

use predicates::prelude::*;
use tempfile::TempDir;

use common::{init_with_copy, provflow_cmd, write};

#[test]
fn test_init_creates_project_structure() {
    let temp = TempDir::new().expect("create temp dir");
    let project = temp.path();

    provflow_cmd(project)
        .arg("init")
        .assert()
        .success()
        .stdout(predicate::str::contains("Initialized provflow project"));

    assert!(project.join(".provflow/HEAD").exists());
    assert!(project.join(".provflow/history.jsonl").exists());
    assert!(project.join(".provflow/metadata/activities.jsonl").exists());
    assert!(project.join(".provflow/metadata/plans.jsonl").exists());
}

#[test]
fn test_init_twice_is_informational() {
    let temp = TempDir::new().expect("create temp dir");
    provflow_cmd(temp.path()).arg("init").assert().success();
    provflow_cmd(temp.path())
        .arg("init")
        .assert()
        .success()
        .stdout(predicate::str::contains("already initialized"));
}

#[test]
fn test_commands_require_init() {
    let temp = TempDir::new().expect("create temp dir");
    provflow_cmd(temp.path())
        .arg("status")
        .assert()
        .code(1)
        .stderr(predicate::str::contains("provflow init"));
}

#[test]
fn test_run_records_and_status_is_clean() {
    let temp = TempDir::new().expect("create temp dir");
    let project = temp.path();
    init_with_copy(project);

    assert_eq!(fs::read_to_string(project.join("b.txt")).unwrap(), "one\n");
    provflow_cmd(project)
        .arg("status")
        .assert()
        .success()
        .stdout(predicate::str::contains("Everything is up to date"));
    provflow_cmd(project)
        .args(["log"])
        .assert()
        .success()
        .stdout(predicate::str::contains("r1"));
}

#[test]
fn test_modified_input_makes_status_fail_and_update_fixes_it() {
    let temp = TempDir::new().expect("create temp dir");
    let project = temp.path();
    init_with_copy(project);
    write(project, "a.txt", "two\n");

    provflow_cmd(project)
        .arg("status")
        .assert()
        .code(1)
        .stdout(predicate::str::contains("b.txt"))
        .stdout(predicate::str::contains("Modified inputs"));

    provflow_cmd(project)
        .args(["update", "--all", "--dry-run"])
        .assert()
        .success()
        .stdout(predicate::str::contains("1 step would run"));
    assert_eq!(fs::read_to_string(project.join("b.txt")).unwrap(), "one\n");

    provflow_cmd(project)
        .args(["update", "--all"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Executed 1 step"));
    assert_eq!(fs::read_to_string(project.join("b.txt")).unwrap(), "two\n");

    provflow_cmd(project)
        .args(["update", "--all"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Everything is up to date"));
}

#[test]
fn test_update_requires_targets() {
    let temp = TempDir::new().expect("create temp dir");
    let project = temp.path();
    init_with_copy(project);

    provflow_cmd(project)
        .arg("update")
        .assert()
        .code(1)
        .stderr(predicate::str::contains("--all"));
}

#[test]
fn test_update_unknown_target() {
    let temp = TempDir::new().expect("create temp dir");
    let project = temp.path();
    init_with_copy(project);

    provflow_cmd(project)
        .args(["update", "a.txt"])
        .assert()
        .code(1)
        .stderr(predicate::str::contains("not generated by any workflows"));
}

#[test]
fn test_dry_run_json() {
    let temp = TempDir::new().expect("create temp dir");
    let project = temp.path();
    init_with_copy(project);
    write(project, "a.txt", "two\n");

    let output = provflow_cmd(project)
        .args(["update", "b.txt", "--dry-run", "--json"])
        .output()
        .expect("run provflow");
    assert!(output.status.success());

    let report: serde_json::Value = serde_json::from_slice(&output.stdout).expect("valid JSON");
    assert_eq!(report["steps"][0]["planName"], "r1");
    assert_eq!(report["steps"][0]["reasons"][0]["type"], "inputModified");
    assert_eq!(report["modified"][0], "a.txt");
}

#[test]
fn test_rerun_and_workflow_listing() {
    let temp = TempDir::new().expect("create temp dir");
    let project = temp.path();
    init_with_copy(project);

    provflow_cmd(project)
        .args(["rerun", "b.txt"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Executed 1 step"));

    provflow_cmd(project)
        .args(["workflow", "edit", "r1", "--new-name", "copy-a"])
        .assert()
        .success()
        .stdout(predicate::str::contains("copy-a"));

    let output = provflow_cmd(project)
        .args(["workflow", "ls", "--json"])
        .output()
        .expect("run provflow");
    let plans: serde_json::Value = serde_json::from_slice(&output.stdout).expect("valid JSON");
    assert_eq!(plans.as_array().map(Vec::len), Some(1));
    assert_eq!(plans[0]["name"], "copy-a");
}

#[test]
fn test_stream_redirection() {
    let temp = TempDir::new().expect("create temp dir");
    let project = temp.path();
    init_with_copy(project);

    provflow_cmd(project)
        .args(["run", "--name", "count", "--stdin", "a.txt", "--stdout", "count.txt", "--", "wc", "-l"])
        .assert()
        .success();
    let count = fs::read_to_string(project.join("count.txt")).unwrap();
    assert_eq!(count.trim(), "1");
}

#[test]
fn test_doctor_on_healthy_project() {
    let temp = TempDir::new().expect("create temp dir");
    let project = temp.path();
    init_with_copy(project);

    provflow_cmd(project)
        .arg("doctor")
        .assert()
        .success()
        .stdout(predicate::str::contains("No problems found"));
}

#[test]
fn test_locked_project_exits_with_tempfail() {
    use fs2::FileExt;

    let temp = TempDir::new().expect("create temp dir");
    let project = temp.path();
    init_with_copy(project);
    write(project, "a.txt", "two\n");

    let lock = fs::OpenOptions::new()
        .create(true)
        .truncate(false)
        .write(true)
        .open(project.join(".provflow/project.lock"))
        .unwrap();
    lock.lock_exclusive().unwrap();

    provflow_cmd(project)
        .args(["update", "--all"])
        .assert()
        .code(75)
        .stderr(predicate::str::contains("Could not acquire lock"));

    FileExt::unlock(&lock).unwrap();
}
