//! BDD step definitions for the run workflow.

use std::future;
use std::time::Duration;

use rstest_bdd_macros::{given, then, when};
use skiff::runtime::ContainerStatus;
use skiff::test_support::{FakeRuntime, ScriptedProvisioner};
use tokio::runtime::Runtime;
use tokio::time::sleep;

use super::test_helpers::{RunContext, RunOutcome, open_runtime_port, orchestrator, request};

#[derive(Debug, thiserror::Error)]
pub enum StepError {
    #[error("failed to start async runtime: {0}")]
    Runtime(String),
    #[error("assertion failed: {0}")]
    Assertion(String),
}

#[given("the workload exits with code \"{code}\" and prints \"{stdout}\"")]
fn workload_exits(mut run_context: RunContext, code: i64, stdout: String) -> RunContext {
    run_context.runtime = run_context.runtime.with_exit(code, &stdout, "");
    run_context
}

#[given("the workload runs until it is killed")]
fn workload_holds(mut run_context: RunContext) -> RunContext {
    run_context.runtime = run_context.runtime.hold_until_killed();
    run_context
}

#[given("a provisioned host whose runtime port is open")]
fn provisioned_host(mut run_context: RunContext) -> RunContext {
    let (listener, port) = open_runtime_port();
    run_context.listener = Some(listener);
    run_context.provisioner = Some(ScriptedProvisioner::remote(port));
    run_context
}

#[given("the host refuses to be deleted")]
fn host_refuses_delete(mut run_context: RunContext) -> Result<RunContext, StepError> {
    let backend = run_context
        .provisioner
        .take()
        .ok_or_else(|| StepError::Assertion(String::from("no provisioned host configured")))?;
    run_context.provisioner = Some(backend.failing_delete());
    Ok(run_context)
}

async fn until_running(runtime: FakeRuntime) {
    let id = runtime.wait_for_container().await;
    while runtime.status(&id) != Some(ContainerStatus::Running) {
        sleep(Duration::from_millis(5)).await;
    }
}

fn execute(
    mut run_context: RunContext,
    cancel_when_running: bool,
) -> Result<RunContext, StepError> {
    let runtime = Runtime::new().map_err(|err| StepError::Runtime(err.to_string()))?;
    let built = request(run_context.provisioner.clone());
    let orchestrator = orchestrator(&run_context.runtime);
    let fake = run_context.runtime.clone();

    let result = runtime.block_on(async move {
        if cancel_when_running {
            orchestrator.run(built, until_running(fake)).await
        } else {
            orchestrator.run(built, future::pending()).await
        }
    });

    run_context.outcome = Some(RunOutcome::from(result));
    Ok(run_context)
}

#[when("I run the workload locally")]
fn run_locally(run_context: RunContext) -> Result<RunContext, StepError> {
    execute(run_context, false)
}

#[when("I run the workload on the provisioned host")]
fn run_on_host(run_context: RunContext) -> Result<RunContext, StepError> {
    if run_context.provisioner.is_none() {
        return Err(StepError::Assertion(String::from("no provisioned host configured")));
    }
    execute(run_context, false)
}

#[when("I run the workload locally and cancel once it starts")]
fn run_and_cancel(run_context: RunContext) -> Result<RunContext, StepError> {
    execute(run_context, true)
}

fn outcome(run_context: &RunContext) -> Result<&RunOutcome, StepError> {
    run_context
        .outcome
        .as_ref()
        .ok_or_else(|| StepError::Assertion(String::from("missing outcome")))
}

#[then("the run succeeds")]
fn run_succeeds(run_context: &RunContext) -> Result<(), StepError> {
    match &outcome(run_context)?.error {
        None => Ok(()),
        Some(err) => Err(StepError::Assertion(format!("run failed unexpectedly: {err}"))),
    }
}

#[then("the run fails with exit code \"{code}\"")]
fn run_exit_code(run_context: &RunContext, code: i64) -> Result<(), StepError> {
    let result = outcome(run_context)?;
    if result.exit_code == Some(code) {
        Ok(())
    } else {
        Err(StepError::Assertion(format!(
            "expected exit code {code}, got {:?} ({:?})",
            result.exit_code, result.error
        )))
    }
}

#[then("the run error mentions \"{text}\"")]
fn run_error_mentions(run_context: &RunContext, text: String) -> Result<(), StepError> {
    match &outcome(run_context)?.error {
        Some(message) if message.contains(&text) => Ok(()),
        other => Err(StepError::Assertion(format!(
            "expected an error mentioning '{text}', got {other:?}"
        ))),
    }
}

#[then("the captured stdout is \"{stdout}\"")]
fn captured_stdout(run_context: &RunContext, stdout: String) -> Result<(), StepError> {
    let actual = &outcome(run_context)?.stdout;
    if *actual == stdout {
        Ok(())
    } else {
        Err(StepError::Assertion(format!(
            "expected stdout '{stdout}', got '{actual}'"
        )))
    }
}

#[then("no containers remain")]
fn no_containers_remain(run_context: &RunContext) -> Result<(), StepError> {
    let remaining = run_context.runtime.containers();
    if remaining.is_empty() {
        Ok(())
    } else {
        Err(StepError::Assertion(format!(
            "containers left behind: {remaining:?}"
        )))
    }
}

#[then("the host is deleted")]
fn host_deleted(run_context: &RunContext) -> Result<(), StepError> {
    let deleted = run_context
        .provisioner
        .as_ref()
        .map(ScriptedProvisioner::deleted)
        .unwrap_or_default();
    if deleted.len() == 1 {
        Ok(())
    } else {
        Err(StepError::Assertion(format!(
            "expected exactly one host delete, got {deleted:?}"
        )))
    }
}
