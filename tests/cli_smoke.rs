//! Behavioural smoke test for the CLI entrypoint.

use assert_cmd::cargo::cargo_bin_cmd;
use predicates::str::contains;

#[test]
fn cli_without_arguments_prints_usage() {
    let mut cmd = cargo_bin_cmd!("skiff");
    cmd.assert().code(2).stderr(contains("Usage: skiff"));
}

#[test]
fn cli_help_lists_the_run_subcommand() {
    let mut cmd = cargo_bin_cmd!("skiff");
    cmd.arg("--help");
    cmd.assert()
        .success()
        .stdout(contains("run"))
        .stdout(contains("ephemeral cloud host"));
}
