//! Shared test utilities for provflow-cli integration tests.

use std::fs;
use std::path::Path;

use assert_cmd::Command;

/// Get a Command for the provflow binary, isolated from the user's global
/// configuration and with colors off.
#[allow(deprecated)]
pub fn provflow_cmd(project: &Path) -> Command {
    let mut cmd = Command::cargo_bin("provflow").expect("provflow binary should exist");
    cmd.current_dir(project)
        .env("PROVFLOW_CONFIG", project.join("no-global-config.yaml"))
        .env("NO_COLOR", "1")
        .env_remove("PROVFLOW_VERBOSE")
        .env_remove("RUST_LOG");
    cmd
}

/// Write `content` to `relative` inside the project.
pub fn write(project: &Path, relative: &str, content: &str) {
    fs::write(project.join(relative), content).expect("write project file");
}

/// Initialize a project and record `cp a.txt b.txt` as `r1`.
pub fn init_with_copy(project: &Path) {
    write(project, "a.txt", "one\n");
    provflow_cmd(project).arg("init").assert().success();
    provflow_cmd(project)
        .args(["run", "--name", "r1", "-i", "a.txt", "-o", "b.txt", "--", "cp", "a.txt", "b.txt"])
        .assert()
        .success();
}
