//! Orchestrator tests against the in-memory runtime and scripted backend.

use super::*;
use crate::runtime::ContainerStatus;
use crate::teardown::ContainerNotRemoved;
use crate::test_support::{FakeRuntime, RuntimeCall, ScriptedProvisioner, ScriptedProvisionerError};
use std::future;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::time::sleep;

type Outcome = ExecutionResult<ScriptedProvisionerError>;

fn request() -> ExecutionRequestBuilder<ScriptedProvisioner> {
    ExecutionRequest::builder()
        .image_name("app")
        .command(vec![String::from("cat")])
        .stdin("payload")
}

fn orchestrator(runtime: &FakeRuntime) -> Orchestrator<FakeRuntime> {
    Orchestrator::new(runtime.clone())
        .with_probe(
            ReadinessProbe::new()
                .with_connect_timeout(Duration::from_millis(100))
                .with_interval(Duration::from_millis(5)),
        )
        .with_readiness_attempts(3)
        .with_teardown(TeardownController::new().with_pause(Duration::from_millis(1)))
}

async fn listener() -> (TcpListener, u16) {
    let listener = TcpListener::bind("127.0.0.1:0")
        .await
        .unwrap_or_else(|err| panic!("bind listener: {err}"));
    let port = listener
        .local_addr()
        .unwrap_or_else(|err| panic!("listener address: {err}"))
        .port();
    (listener, port)
}

async fn closed_port() -> u16 {
    let (socket, port) = listener().await;
    drop(socket);
    port
}

async fn wait_until_running(runtime: &FakeRuntime) {
    let id = runtime.wait_for_container().await;
    while runtime.status(&id) != Some(ContainerStatus::Running) {
        sleep(Duration::from_millis(5)).await;
    }
}

async fn run_local(runtime: &FakeRuntime) -> Outcome {
    let built = request().build().expect("valid request");
    orchestrator(runtime).run(built, future::pending()).await
}

#[tokio::test]
async fn local_run_returns_output_and_removes_container() {
    let runtime = FakeRuntime::new()
        .with_image("skiff/app")
        .with_exit(0, "hello\n", "");

    let result = run_local(&runtime).await;

    assert!(result.is_success(), "unexpected error: {:?}", result.error);
    assert_eq!(result.stdout, "hello\n");
    assert!(result.teardown_error.is_none());
    assert!(runtime.containers().is_empty());
    assert_eq!(
        runtime.calls().first(),
        Some(&RuntimeCall::Connect(RuntimeEndpoint::LocalDefault))
    );
}

#[tokio::test]
async fn local_endpoint_override_is_used() {
    let runtime = FakeRuntime::new().with_image("skiff/app");
    let endpoint = RuntimeEndpoint::Tcp {
        address: String::from("10.0.0.5:2375"),
    };
    let built = request().build().expect("valid request");

    let result = orchestrator(&runtime)
        .with_local_endpoint(endpoint.clone())
        .run(built, future::pending())
        .await;

    assert!(result.is_success());
    assert_eq!(runtime.calls().first(), Some(&RuntimeCall::Connect(endpoint)));
}

#[tokio::test]
async fn non_zero_exit_keeps_output_and_cleans_up() {
    let runtime = FakeRuntime::new()
        .with_image("skiff/app")
        .with_exit(3, "partial\n", "boom\n");

    let result = run_local(&runtime).await;

    assert!(matches!(result.error, Some(RunError::ExecutionFailed { exit_code: 3 })));
    assert_eq!(
        result.error.as_ref().and_then(RunError::exit_code),
        Some(3)
    );
    assert_eq!(result.stdout, "partial\n");
    assert_eq!(result.stderr, "boom\n");
    assert!(result.teardown_error.is_none());
    assert!(runtime.containers().is_empty());
}

#[tokio::test]
async fn build_failure_before_container_reports_only_the_build_error() {
    let runtime = FakeRuntime::new();
    let built = request()
        .context_dir("/does/not/exist")
        .build()
        .expect("valid request");

    let result = orchestrator(&runtime).run(built, future::pending()).await;

    assert!(matches!(result.error, Some(RunError::ImageBuild { .. })));
    assert!(result.teardown_error.is_none(), "nothing to clean up is not reported");
}

#[tokio::test]
async fn connect_failure_is_a_runtime_error() {
    let runtime = FakeRuntime::new().failing_connect("permission denied");

    let result = run_local(&runtime).await;

    assert!(matches!(
        result.error,
        Some(RunError::Runtime {
            stage: "runtime connect",
            ..
        })
    ));
}

#[tokio::test]
async fn remote_host_is_probed_used_and_deleted() {
    let (_socket, port) = listener().await;
    let runtime = FakeRuntime::new()
        .with_image("skiff/app")
        .with_exit(0, "remote\n", "");
    let provisioner = ScriptedProvisioner::remote(port);
    let built = request()
        .host(provisioner.clone())
        .build()
        .expect("valid request");

    let result = orchestrator(&runtime).run(built, future::pending()).await;

    assert!(result.is_success(), "unexpected error: {:?}", result.error);
    assert_eq!(result.stdout, "remote\n");
    assert_eq!(provisioner.deleted(), vec![String::from("droplet-1")]);
    assert_eq!(
        runtime.calls().first(),
        Some(&RuntimeCall::Connect(RuntimeEndpoint::Tcp {
            address: format!("127.0.0.1:{port}"),
        }))
    );
    assert_eq!(
        runtime.count_calls(|call| matches!(call, RuntimeCall::Remove(_))),
        0,
        "host delete disposes of the container"
    );
}

#[tokio::test]
async fn passthrough_host_container_is_removed_before_host_delete() {
    let (_socket, port) = listener().await;
    let runtime = FakeRuntime::new().with_image("skiff/app");
    let provisioner = ScriptedProvisioner::remote(port).keeping_containers();
    let built = request()
        .host(provisioner.clone())
        .build()
        .expect("valid request");

    let result = orchestrator(&runtime).run(built, future::pending()).await;

    assert!(result.is_success(), "unexpected error: {:?}", result.error);
    assert!(runtime.containers().is_empty());
    assert_eq!(provisioner.deleted().len(), 1);
}

#[tokio::test]
async fn unreachable_runtime_port_still_deletes_the_host() {
    let runtime = FakeRuntime::new().with_image("skiff/app");
    let provisioner = ScriptedProvisioner::remote(closed_port().await);
    let built = request()
        .host(provisioner.clone())
        .build()
        .expect("valid request");

    let result = orchestrator(&runtime).run(built, future::pending()).await;

    assert!(matches!(
        result.error,
        Some(RunError::Connectivity(ProbeError::Unreachable { attempts: 3, .. }))
    ));
    assert_eq!(provisioner.deleted().len(), 1);
    assert!(runtime.calls().is_empty(), "no runtime client was requested");
}

#[tokio::test]
async fn provision_failure_has_nothing_to_clean_up() {
    let runtime = FakeRuntime::new();
    let provisioner = ScriptedProvisioner::remote(2375).failing_create();
    let built = request()
        .host(provisioner.clone())
        .build()
        .expect("valid request");

    let result = orchestrator(&runtime).run(built, future::pending()).await;

    assert!(matches!(
        result.error,
        Some(RunError::Provision(ScriptedProvisionerError::Create))
    ));
    assert!(result.teardown_error.is_none());
    assert!(provisioner.deleted().is_empty());
}

#[tokio::test]
async fn host_delete_failure_after_success_keeps_output() {
    let (_socket, port) = listener().await;
    let runtime = FakeRuntime::new()
        .with_image("skiff/app")
        .with_exit(0, "done\n", "");
    let provisioner = ScriptedProvisioner::remote(port).failing_delete();
    let built = request()
        .host(provisioner.clone())
        .build()
        .expect("valid request");

    let result = orchestrator(&runtime).run(built, future::pending()).await;

    assert_eq!(result.stdout, "done\n");
    assert!(matches!(
        result.error,
        Some(RunError::Teardown(TeardownError::Host { .. }))
    ));
    assert!(result.teardown_error.is_none());
}

#[tokio::test]
async fn host_delete_failure_after_execution_failure_is_reported_alongside() {
    let (_socket, port) = listener().await;
    let runtime = FakeRuntime::new()
        .with_image("skiff/app")
        .with_exit(1, "", "bad input\n");
    let provisioner = ScriptedProvisioner::remote(port).failing_delete();
    let built = request()
        .host(provisioner.clone())
        .build()
        .expect("valid request");

    let result = orchestrator(&runtime).run(built, future::pending()).await;

    assert!(matches!(result.error, Some(RunError::ExecutionFailed { exit_code: 1 })));
    assert!(matches!(result.teardown_error, Some(TeardownError::Host { .. })));
    assert_eq!(result.stderr, "bad input\n");
}

#[tokio::test]
async fn container_removal_exhaustion_is_a_teardown_error() {
    let runtime = FakeRuntime::new()
        .with_image("skiff/app")
        .with_exit(0, "ok\n", "")
        .failing_removals(10);

    let result = run_local(&runtime).await;

    assert_eq!(result.stdout, "ok\n");
    let Some(RunError::Teardown(TeardownError::Container(ContainerNotRemoved { attempts, .. }))) =
        result.error
    else {
        panic!("expected a container teardown error, got {:?}", result.error);
    };
    assert_eq!(attempts, 3);
}

#[tokio::test]
async fn cancellation_before_provisioning_creates_nothing() {
    let runtime = FakeRuntime::new().with_image("skiff/app");
    let provisioner = ScriptedProvisioner::remote(2375);
    let built = request()
        .host(provisioner.clone())
        .build()
        .expect("valid request");

    let result = orchestrator(&runtime).run(built, future::ready(())).await;
    sleep(Duration::from_millis(50)).await;

    assert!(matches!(result.error, Some(RunError::Cancelled)));
    assert!(result.teardown_error.is_none());
    assert_eq!(provisioner.created(), 0);
    assert!(provisioner.deleted().is_empty());
}

#[tokio::test]
async fn cancellation_while_running_kills_and_removes_the_container() {
    let runtime = FakeRuntime::new()
        .with_image("skiff/app")
        .hold_until_killed();
    let built = request().build().expect("valid request");

    let result = orchestrator(&runtime)
        .run(built, wait_until_running(&runtime))
        .await;

    assert!(matches!(result.error, Some(RunError::Cancelled)));
    assert!(result.teardown_error.is_none());
    assert!(result.stdout.is_empty());
    assert!(runtime.containers().is_empty());
    assert_eq!(
        runtime.count_calls(|call| matches!(call, RuntimeCall::Kill(_))),
        1
    );
}

#[tokio::test]
async fn cancellation_during_build_deletes_the_host() {
    let (_socket, port) = listener().await;
    let runtime = FakeRuntime::new().slow_build(Duration::from_millis(500));
    let provisioner = ScriptedProvisioner::remote(port);
    let built = request()
        .remote_uri(Some(String::from("https://github.com/example/app.git")))
        .host(provisioner.clone())
        .build()
        .expect("valid request");
    let probe_runtime = runtime.clone();
    let cancel = async move {
        while probe_runtime.count_calls(|call| matches!(call, RuntimeCall::BuildImage(_))) == 0 {
            sleep(Duration::from_millis(5)).await;
        }
    };

    let result = orchestrator(&runtime).run(built, cancel).await;

    assert!(matches!(result.error, Some(RunError::Cancelled)));
    assert_eq!(provisioner.deleted().len(), 1);

    sleep(Duration::from_millis(700)).await;
    assert_eq!(
        runtime.count_calls(|call| matches!(call, RuntimeCall::CreateContainer(_))),
        0,
        "abandoned task stops before creating a container"
    );
}

#[tokio::test(start_paused = true)]
async fn host_created_after_cancellation_is_deleted_before_run_returns() {
    let runtime = FakeRuntime::new().with_image("skiff/app");
    let provisioner = ScriptedProvisioner::remote(2375).slow_create(Duration::from_secs(30));
    let built = request()
        .host(provisioner.clone())
        .build()
        .expect("valid request");

    let result = orchestrator(&runtime)
        .run(built, sleep(Duration::from_secs(1)))
        .await;

    assert!(matches!(result.error, Some(RunError::Cancelled)));
    assert!(result.teardown_error.is_none());
    assert_eq!(provisioner.created(), 1);
    assert_eq!(provisioner.deleted(), vec![String::from("droplet-1")]);
    assert!(runtime.calls().is_empty());
}

#[test]
fn dropping_the_runtime_after_a_cancelled_run_leaks_no_host() {
    let async_runtime = tokio::runtime::Runtime::new().expect("tokio runtime");
    let fake = FakeRuntime::new().with_image("skiff/app");
    let provisioner = ScriptedProvisioner::remote(2375).slow_create(Duration::from_millis(300));
    let built = request()
        .host(provisioner.clone())
        .build()
        .expect("valid request");

    let result = async_runtime.block_on(async {
        orchestrator(&fake)
            .run(built, sleep(Duration::from_millis(20)))
            .await
    });
    drop(async_runtime);

    assert!(matches!(result.error, Some(RunError::Cancelled)));
    assert_eq!(provisioner.created(), 1);
    assert_eq!(provisioner.deleted(), vec![String::from("droplet-1")]);
}

#[tokio::test(start_paused = true)]
async fn drain_gives_up_after_its_timeout() {
    let runtime = FakeRuntime::new().with_image("skiff/app");
    let provisioner = ScriptedProvisioner::remote(2375).slow_create(Duration::from_secs(600));
    let built = request()
        .host(provisioner.clone())
        .build()
        .expect("valid request");

    let result = orchestrator(&runtime)
        .with_drain_timeout(Duration::from_secs(5))
        .run(built, sleep(Duration::from_secs(1)))
        .await;

    assert!(matches!(result.error, Some(RunError::Cancelled)));
    sleep(Duration::from_secs(1200)).await;
    assert_eq!(provisioner.created(), 0, "the abandoned task was aborted");
    assert!(provisioner.deleted().is_empty());
}

#[tokio::test]
async fn cancellation_after_completion_has_no_effect() {
    let runtime = FakeRuntime::new()
        .with_image("skiff/app")
        .with_exit(0, "finished\n", "");
    let built = request().build().expect("valid request");
    let done = runtime.clone();
    let cancel = async move {
        while done.count_calls(|call| matches!(call, RuntimeCall::Logs(_))) == 0 {
            sleep(Duration::from_millis(5)).await;
        }
        sleep(Duration::from_millis(50)).await;
    };

    let result = orchestrator(&runtime).run(built, cancel).await;

    assert!(result.is_success(), "unexpected error: {:?}", result.error);
    assert_eq!(result.stdout, "finished\n");
}
