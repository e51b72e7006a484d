use super::*;
use crate::runtime::ContainerSpec;
use crate::test_support::{FakeRuntime, RuntimeCall, ScriptedProvisioner, ScriptedProvisionerError};
use std::time::Duration;

fn controller() -> TeardownController {
    TeardownController::new().with_pause(Duration::from_millis(1))
}

async fn container_in(runtime: &FakeRuntime, running: bool) -> String {
    let spec = ContainerSpec {
        name: String::from("skiff-test"),
        image: String::from("skiff/app"),
        ..ContainerSpec::default()
    };
    let id = runtime
        .create_container(&spec)
        .await
        .expect("create should succeed");
    if running {
        runtime
            .start_container(&id)
            .await
            .expect("start should succeed");
    }
    id
}

fn count(runtime: &FakeRuntime, wanted: fn(&RuntimeCall) -> bool) -> usize {
    runtime.count_calls(wanted)
}

#[tokio::test]
async fn running_container_is_killed_then_removed() {
    let runtime = FakeRuntime::new();
    let id = container_in(&runtime, true).await;

    controller()
        .remove_container(&runtime, &id)
        .await
        .expect("removal should succeed");

    assert!(runtime.containers().is_empty());
    assert_eq!(count(&runtime, |c| matches!(c, RuntimeCall::Kill(_))), 1);
    assert_eq!(count(&runtime, |c| matches!(c, RuntimeCall::Remove(_))), 1);
}

#[tokio::test]
async fn stopped_container_is_removed_without_kill() {
    let runtime = FakeRuntime::new();
    let id = container_in(&runtime, false).await;

    controller()
        .remove_container(&runtime, &id)
        .await
        .expect("removal should succeed");

    assert_eq!(count(&runtime, |c| matches!(c, RuntimeCall::Kill(_))), 0);
}

#[tokio::test]
async fn second_removal_is_a_no_op() {
    let runtime = FakeRuntime::new();
    let id = container_in(&runtime, true).await;
    let teardown = controller();

    teardown
        .remove_container(&runtime, &id)
        .await
        .expect("first removal should succeed");
    teardown
        .remove_container(&runtime, &id)
        .await
        .expect("second removal should succeed");

    assert_eq!(count(&runtime, |c| matches!(c, RuntimeCall::Remove(_))), 1);
}

#[tokio::test]
async fn transient_removal_failures_are_retried() {
    let runtime = FakeRuntime::new().failing_removals(2);
    let id = container_in(&runtime, false).await;

    controller()
        .remove_container(&runtime, &id)
        .await
        .expect("third attempt should succeed");

    assert_eq!(count(&runtime, |c| matches!(c, RuntimeCall::Remove(_))), 3);
    assert!(runtime.containers().is_empty());
}

#[tokio::test(start_paused = true)]
async fn gives_up_after_three_attempts() {
    let runtime = FakeRuntime::new().failing_removals(10);
    let id = container_in(&runtime, false).await;
    let started = tokio::time::Instant::now();

    let err = TeardownController::new()
        .remove_container(&runtime, &id)
        .await
        .expect_err("removal should fail");

    assert_eq!(
        err,
        ContainerNotRemoved {
            id: id.clone(),
            attempts: TEARDOWN_ATTEMPTS,
        }
    );
    assert_eq!(count(&runtime, |c| matches!(c, RuntimeCall::Remove(_))), 3);
    assert_eq!(started.elapsed(), TEARDOWN_PAUSE * 2, "no pause after the last attempt");
    assert_eq!(runtime.containers(), vec![id]);
}

#[tokio::test]
async fn host_delete_consumes_the_host() {
    let provisioner = ScriptedProvisioner::remote(2375);
    let host = provisioner
        .create_machine()
        .await
        .expect("create should succeed");

    controller()
        .delete_host(&provisioner, host)
        .await
        .expect("delete should succeed");

    assert_eq!(provisioner.deleted(), vec![String::from("droplet-1")]);
}

#[tokio::test]
async fn host_delete_failure_names_the_host() {
    let provisioner = ScriptedProvisioner::remote(2375).failing_delete();
    let host = provisioner
        .create_machine()
        .await
        .expect("create should succeed");

    let err = controller()
        .delete_host(&provisioner, host)
        .await
        .expect_err("delete should fail");

    assert!(matches!(
        &err,
        TeardownError::Host {
            host,
            source: ScriptedProvisionerError::Delete { .. },
        } if host == "droplet-1"
    ));
    assert!(err.to_string().starts_with("failed to delete host droplet-1"));
}
