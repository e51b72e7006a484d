//! BDD scenarios for the run workflow.

use rstest_bdd_macros::scenario;

use super::test_helpers::{RunContext, run_context};

#[scenario(
    path = "tests/features/run.feature",
    name = "Return captured output from a local run"
)]
fn scenario_local_output(run_context: RunContext) {
    let _ = run_context;
}

#[scenario(
    path = "tests/features/run.feature",
    name = "Propagate a non-zero workload exit code"
)]
fn scenario_propagate_exit_code(run_context: RunContext) {
    let _ = run_context;
}

#[scenario(
    path = "tests/features/run.feature",
    name = "Delete a provisioned host after the run"
)]
fn scenario_delete_host(run_context: RunContext) {
    let _ = run_context;
}

#[scenario(
    path = "tests/features/run.feature",
    name = "Surface teardown failure after success"
)]
fn scenario_surface_teardown_failure(run_context: RunContext) {
    let _ = run_context;
}

#[scenario(path = "tests/features/run.feature", name = "Cancel a running workload")]
fn scenario_cancel_running(run_context: RunContext) {
    let _ = run_context;
}
