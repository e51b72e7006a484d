//! Shared fixtures for run BDD scenarios.

use std::net::TcpListener;
use std::sync::Arc;
use std::time::Duration;

use rstest::fixture;
use skiff::readiness::ReadinessProbe;
use skiff::run::{ExecutionRequest, ExecutionResult, Orchestrator};
use skiff::teardown::TeardownController;
use skiff::test_support::{FakeRuntime, ScriptedProvisioner, ScriptedProvisionerError};

/// Image tag the scenarios run, already present in the fake runtime.
pub const IMAGE_TAG: &str = "skiff/app";

#[derive(Clone, Debug)]
pub struct RunContext {
    pub runtime: FakeRuntime,
    pub provisioner: Option<ScriptedProvisioner>,
    pub outcome: Option<RunOutcome>,
    pub(crate) listener: Option<Arc<TcpListener>>,
}

/// Owned summary of an [`ExecutionResult`], kept for the `then` steps.
#[derive(Clone, Debug)]
pub struct RunOutcome {
    pub stdout: String,
    pub exit_code: Option<i64>,
    pub error: Option<String>,
}

impl From<ExecutionResult<ScriptedProvisionerError>> for RunOutcome {
    fn from(result: ExecutionResult<ScriptedProvisionerError>) -> Self {
        Self {
            exit_code: result.error.as_ref().and_then(|err| err.exit_code()),
            error: result.error.map(|err| err.to_string()),
            stdout: result.stdout,
        }
    }
}

#[fixture]
pub fn run_context() -> RunContext {
    RunContext {
        runtime: FakeRuntime::new().with_image(IMAGE_TAG),
        provisioner: None,
        outcome: None,
        listener: None,
    }
}

/// Binds a loopback listener standing in for a host's runtime port.
pub fn open_runtime_port() -> (Arc<TcpListener>, u16) {
    let listener = TcpListener::bind("127.0.0.1:0")
        .unwrap_or_else(|err| panic!("bind runtime port stand-in: {err}"));
    let port = listener
        .local_addr()
        .unwrap_or_else(|err| panic!("runtime port address: {err}"))
        .port();
    (Arc::new(listener), port)
}

pub fn request(provisioner: Option<ScriptedProvisioner>) -> ExecutionRequest<ScriptedProvisioner> {
    let builder = ExecutionRequest::builder()
        .image_name("app")
        .command(vec![String::from("run-job")]);
    let with_host = match provisioner {
        Some(backend) => builder.host(backend),
        None => builder,
    };
    with_host
        .build()
        .unwrap_or_else(|err| panic!("request fixture should be valid: {err}"))
}

pub fn orchestrator(runtime: &FakeRuntime) -> Orchestrator<FakeRuntime> {
    Orchestrator::new(runtime.clone())
        .with_probe(
            ReadinessProbe::new()
                .with_connect_timeout(Duration::from_millis(200))
                .with_interval(Duration::from_millis(5)),
        )
        .with_readiness_attempts(5)
        .with_teardown(TeardownController::new().with_pause(Duration::from_millis(1)))
}
