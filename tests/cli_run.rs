//! Behavioural tests for the `skiff run` CLI that fail before any runtime is
//! contacted.

use assert_cmd::Command;
use assert_cmd::cargo::cargo_bin_cmd;
use predicates::str::contains;
use tempfile::TempDir;

/// Runs the binary in an empty directory with no configuration in scope.
fn isolated(workdir: &TempDir) -> Command {
    let mut cmd = cargo_bin_cmd!("skiff");
    cmd.current_dir(workdir.path())
        .env("HOME", workdir.path())
        .env("XDG_CONFIG_HOME", workdir.path())
        .env_remove("SKIFF_CONFIG_PATH")
        .env_remove("SKIFF_DOCKER_HOST")
        .env_remove("SKIFF_DOCKER_CERT_PATH");
    cmd
}

fn workdir() -> TempDir {
    TempDir::new().unwrap_or_else(|err| panic!("tempdir: {err}"))
}

#[test]
fn cli_run_requires_an_image() {
    let dir = workdir();
    let mut cmd = isolated(&dir);
    cmd.args(["run", "--", "echo", "ok"]);

    cmd.assert().code(2).stderr(contains("--image"));
}

#[test]
fn cli_run_rejects_unknown_hosts() {
    let dir = workdir();
    let mut cmd = isolated(&dir);
    cmd.args(["run", "--image", "app", "--host", "ec2"]);

    cmd.assert()
        .code(2)
        .stderr(contains("unknown host 'ec2'"));
}

#[test]
fn cli_run_rejects_conflicting_stdin_sources() {
    let dir = workdir();
    let mut cmd = isolated(&dir);
    cmd.args(["run", "--image", "app", "--stdin", "a", "--stdin-file", "b"]);

    cmd.assert().code(2).stderr(contains("cannot be used with"));
}

#[test]
fn cli_run_reports_malformed_tcp_hosts() {
    let dir = workdir();
    let mut cmd = isolated(&dir);
    cmd.args(["run", "--image", "app", "--host", "tcp://:2375"]);

    cmd.assert()
        .code(1)
        .stderr(contains("skiff: backend error: invalid tcp host url 'tcp://:2375'"));
}

#[test]
fn cli_run_reports_unreadable_stdin_files() {
    let dir = workdir();
    let mut cmd = isolated(&dir);
    cmd.args(["run", "--image", "app", "--stdin-file", "missing.txt"]);

    cmd.assert()
        .code(1)
        .stderr(contains("failed to read"))
        .stderr(contains("missing.txt"));
}

#[test]
fn cli_run_rejects_malformed_environment_entries() {
    let dir = workdir();
    let mut cmd = isolated(&dir);
    cmd.args(["run", "--image", "app", "-e", "NOEQUALS"]);

    cmd.assert()
        .code(1)
        .stderr(contains("invalid request: environment entry 'NOEQUALS' must be KEY=VALUE"));
}
