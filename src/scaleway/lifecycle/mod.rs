//! Instance lifecycle helpers for the Scaleway backend.

use std::net::IpAddr;
use std::str::FromStr;
use std::sync::LazyLock;
use std::time::Duration;

mod create;
mod image;
mod wait;

use crate::operation::OperationStatus;
use crate::scaleway::types::{Action, InstanceId, InstanceState};

const HTTP_TIMEOUT: Duration = Duration::from_secs(30);
const SCALEWAY_INSTANCE_API_BASE: &str = "https://api.scaleway.com/instance/v1";

static HTTP_CLIENT: LazyLock<reqwest::Client> = LazyLock::new(|| {
    reqwest::Client::builder()
        .timeout(HTTP_TIMEOUT)
        .build()
        .unwrap_or_else(|_| reqwest::Client::new())
});

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct InstanceSnapshot {
    pub(crate) id: InstanceId,
    pub(crate) state: InstanceState,
    pub(crate) allowed_actions: Vec<Action>,
    pub(crate) public_ip: Option<String>,
}

impl InstanceSnapshot {
    pub(crate) fn from_instance(server: scaleway_rs::ScalewayInstance) -> Self {
        Self {
            id: server.id.into(),
            state: server.state.into(),
            allowed_actions: server
                .allowed_actions
                .into_iter()
                .map(Action::from)
                .collect(),
            public_ip: server.public_ip.map(|ip| ip.address),
        }
    }

    pub(crate) fn allows(&self, action: &str) -> bool {
        self.allowed_actions
            .iter()
            .any(|allowed| allowed.as_str() == action)
    }

    /// Public address of a running instance, if one is attached.
    pub(crate) fn running_address(&self) -> Option<IpAddr> {
        if !self.state.is_running() {
            return None;
        }
        self.public_ip
            .as_deref()
            .and_then(|ip| IpAddr::from_str(ip).ok())
    }
}

/// Progress of a power-off, where a missing instance also counts as stopped.
pub(crate) fn stopped_status(snapshot: Option<&InstanceSnapshot>) -> OperationStatus {
    match snapshot {
        Some(server) if !server.state.is_stopped() => OperationStatus::InProgress,
        _ => OperationStatus::Completed,
    }
}

/// Progress of a deletion.
pub(crate) const fn gone_status(snapshot: Option<&InstanceSnapshot>) -> OperationStatus {
    match snapshot {
        Some(_) => OperationStatus::InProgress,
        None => OperationStatus::Completed,
    }
}

#[cfg(test)]
mod tests;
