//! Unit tests for Scaleway lifecycle helpers.

use std::collections::HashMap;
use std::net::IpAddr;
use std::time::Duration;

use rstest::rstest;
use scaleway_rs::{ScalewayApi, ScalewayImage};

use super::{InstanceSnapshot, gone_status, stopped_status};
use crate::config::ScalewayConfig;
use crate::operation::{OperationStatus, PollError, Poller};
use crate::scaleway::types::{Action, InstanceId, InstanceState};
use crate::scaleway::{ScalewayBackend, ScalewayBackendError};

fn snapshot(
    id: impl Into<InstanceId>,
    state: impl Into<InstanceState>,
    allowed: impl IntoIterator<Item = impl Into<Action>>,
    public_ip: Option<&str>,
) -> InstanceSnapshot {
    InstanceSnapshot {
        id: id.into(),
        state: state.into(),
        allowed_actions: allowed.into_iter().map(Into::into).collect(),
        public_ip: public_ip.map(str::to_owned),
    }
}

#[derive(Copy, Clone)]
struct ImageSpec {
    id: &'static str,
    arch: &'static str,
    state: &'static str,
    creation_date: &'static str,
}

fn image(spec: ImageSpec) -> ScalewayImage {
    ScalewayImage {
        id: spec.id.to_owned(),
        name: String::new(),
        arch: spec.arch.to_owned(),
        creation_date: spec.creation_date.to_owned(),
        modification_date: String::new(),
        from_server: None,
        organization: String::new(),
        public: true,
        state: spec.state.to_owned(),
        project: String::new(),
        tags: vec![],
        zone: String::new(),
        root_volume: scaleway_rs::ScalewayImageRootVolume {
            id: String::new(),
            name: String::new(),
            size: 0,
            volume_type: String::new(),
        },
        default_bootscript: None,
        extra_volumes: scaleway_rs::ScalewayImageExtraVolumes {
            volumes: HashMap::new(),
        },
    }
}

fn dummy_config() -> ScalewayConfig {
    ScalewayConfig {
        secret_key: String::from("dummy"),
        default_organization_id: None,
        default_project_id: String::from("proj"),
        default_zone: String::from("fr-par-1"),
        default_instance_type: String::from("DEV1-S"),
        default_image: String::from("Ubuntu 24.04 Noble Numbat"),
        default_architecture: String::from("x86_64"),
    }
}

fn backend_fixture() -> ScalewayBackend {
    ScalewayBackend {
        api: ScalewayApi::new("dummy"),
        config: dummy_config(),
        runtime_port: 2375,
        poller: Poller::new(Duration::from_millis(50)).with_interval(Duration::from_millis(5)),
        runtime_poller: Poller::new(Duration::from_secs(600)).with_interval(Duration::from_secs(5)),
    }
}

#[test]
fn new_rejects_missing_secret_key() {
    let config = ScalewayConfig {
        secret_key: String::from("  "),
        ..dummy_config()
    };
    let result = ScalewayBackend::new(config);
    assert!(
        matches!(
            &result,
            Err(ScalewayBackendError::Config(message)) if message.contains("SCW_SECRET_KEY")
        ),
        "unexpected construction outcome: {:?}",
        result.err()
    );
}

#[tokio::test]
async fn power_on_if_needed_returns_ok_for_running() {
    let snap = snapshot("id", "running", [Action::from("poweron")], Some("1.1.1.1"));
    let result = backend_fixture().power_on_if_needed(&snap).await;
    assert!(result.is_ok());
}

#[tokio::test]
async fn power_on_if_needed_errors_when_not_allowed() {
    let snap = snapshot("id", "stopped", Vec::<Action>::new(), None);
    let result = backend_fixture().power_on_if_needed(&snap).await;
    assert!(matches!(
        result,
        Err(ScalewayBackendError::PowerOnNotAllowed { instance_id, state })
            if instance_id == "id" && state == "stopped"
    ));
}

#[rstest]
#[case("running", Some("203.0.113.7"), Some("203.0.113.7"))]
#[case("running", None, None)]
#[case("running", Some("not-an-ip"), None)]
#[case("starting", Some("203.0.113.7"), None)]
fn running_address_requires_running_state(
    #[case] state: &str,
    #[case] public_ip: Option<&str>,
    #[case] expected: Option<&str>,
) {
    let snap = snapshot("id", state, Vec::<Action>::new(), public_ip);
    let wanted = expected.map(|ip| ip.parse::<IpAddr>().expect("test ip parses"));
    assert_eq!(snap.running_address(), wanted);
}

#[rstest]
#[case(Some("running"), OperationStatus::InProgress)]
#[case(Some("stopping"), OperationStatus::InProgress)]
#[case(Some("stopped"), OperationStatus::Completed)]
#[case(Some("stopped in place"), OperationStatus::Completed)]
#[case(None, OperationStatus::Completed)]
fn stopped_status_tracks_power_state(
    #[case] state: Option<&str>,
    #[case] expected: OperationStatus,
) {
    let snap = state.map(|value| snapshot("id", value, Vec::<Action>::new(), None));
    assert_eq!(stopped_status(snap.as_ref()), expected);
}

#[test]
fn gone_status_completes_only_when_missing() {
    let snap = snapshot("id", "stopped", Vec::<Action>::new(), None);
    assert_eq!(gone_status(Some(&snap)), OperationStatus::InProgress);
    assert_eq!(gone_status(None), OperationStatus::Completed);
}

#[test]
fn poll_errors_name_the_instance() {
    let timeout = ScalewayBackendError::from_poll(
        PollError::Timeout {
            operation: String::from("poweroff"),
            timeout: Duration::from_secs(120),
        },
        "srv-1",
    );
    assert_eq!(
        timeout,
        ScalewayBackendError::Timeout {
            action: String::from("poweroff"),
            instance_id: String::from("srv-1"),
        }
    );

    let failed = ScalewayBackendError::from_poll(
        PollError::Failed {
            operation: String::from("delete"),
        },
        "srv-1",
    );
    assert_eq!(failed.to_string(), "provider error: delete failed for instance srv-1");

    let source = ScalewayBackendError::Provider {
        message: String::from("boom"),
    };
    let check = ScalewayBackendError::from_poll(
        PollError::Check {
            operation: String::from("delete"),
            source: source.clone(),
        },
        "srv-1",
    );
    assert_eq!(check, source);
}

mod image;
