//! Readiness and teardown waits for the Scaleway backend.
//!
//! Every wait runs through the backend's [`crate::operation::Poller`]; the
//! `_with` variants take the instance fetch as a closure so the state
//! machine can be driven without the API.

use std::future::Future;
use std::net::{IpAddr, SocketAddr};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use tokio::net::TcpStream;
use tokio::time::timeout;
use tracing::{debug, info};

use crate::operation::{OperationStatus, PollError};
use crate::scaleway::types::InstanceId;

use super::super::{ScalewayBackend, ScalewayBackendError};
use super::{InstanceSnapshot, gone_status, stopped_status};

impl ScalewayBackend {
    pub(in crate::scaleway) async fn fetch_instance(
        &self,
        id: &InstanceId,
    ) -> Result<Option<InstanceSnapshot>, ScalewayBackendError> {
        let mut servers = self
            .api
            .list_instances(self.zone())
            .servers(id.as_str())
            .per_page(1)
            .run_async()
            .await?;

        Ok(servers
            .pop()
            .filter(|server| server.id == id.as_str())
            .map(InstanceSnapshot::from_instance))
    }

    pub(in crate::scaleway) async fn wait_for_public_ip(
        &self,
        id: &InstanceId,
    ) -> Result<IpAddr, ScalewayBackendError> {
        self.wait_for_public_ip_with(id, move || self.fetch_instance(id))
            .await
    }

    /// Polls until the instance runs with a public address attached.
    ///
    /// A timeout after the instance was seen running reports
    /// [`ScalewayBackendError::MissingPublicIp`] rather than a plain timeout.
    pub(in crate::scaleway) async fn wait_for_public_ip_with<F, Fut>(
        &self,
        id: &InstanceId,
        mut fetch: F,
    ) -> Result<IpAddr, ScalewayBackendError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<Option<InstanceSnapshot>, ScalewayBackendError>>,
    {
        let found = Mutex::new(None);
        let saw_running = AtomicBool::new(false);
        let (found_slot, running_flag) = (&found, &saw_running);

        let outcome = self
            .poller
            .poll("public ip", || {
                let pending = fetch();
                async move {
                    let Some(server) = pending.await? else {
                        return Ok(OperationStatus::InProgress);
                    };
                    if server.state.is_running() {
                        running_flag.store(true, Ordering::Relaxed);
                    }
                    let Some(address) = server.running_address() else {
                        return Ok(OperationStatus::InProgress);
                    };
                    *found_slot.lock().unwrap_or_else(PoisonError::into_inner) = Some(address);
                    Ok(OperationStatus::Completed)
                }
            })
            .await;

        match outcome {
            Ok(()) => found
                .into_inner()
                .unwrap_or_else(PoisonError::into_inner)
                .ok_or_else(|| ScalewayBackendError::MissingPublicIp {
                    instance_id: id.to_string(),
                }),
            Err(PollError::Timeout { .. }) if saw_running.load(Ordering::Relaxed) => {
                Err(ScalewayBackendError::MissingPublicIp {
                    instance_id: id.to_string(),
                })
            }
            Err(err) => Err(ScalewayBackendError::from_poll(err, id)),
        }
    }

    pub(in crate::scaleway) async fn wait_for_runtime_port(
        &self,
        id: &InstanceId,
        address: IpAddr,
    ) -> Result<(), ScalewayBackendError> {
        let endpoint = SocketAddr::new(address, self.runtime_port);
        info!(instance = %id, %endpoint, "waiting for cloud-init to expose the runtime");
        self.wait_for_runtime_port_with(id, move || accepts_connections(endpoint))
            .await
    }

    /// Polls `connect` on the runtime poller until the runtime port accepts
    /// a connection.
    pub(in crate::scaleway) async fn wait_for_runtime_port_with<F, Fut>(
        &self,
        id: &InstanceId,
        mut connect: F,
    ) -> Result<(), ScalewayBackendError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = bool>,
    {
        let operation = format!("runtime port {}", self.runtime_port);
        self.runtime_poller
            .poll(&operation, || {
                let pending = connect();
                async move {
                    Ok::<_, ScalewayBackendError>(if pending.await {
                        OperationStatus::Completed
                    } else {
                        OperationStatus::InProgress
                    })
                }
            })
            .await
            .map_err(|err| ScalewayBackendError::from_poll(err, id))
    }

    /// Powers the instance off, deletes it, and waits until the API forgets
    /// it. An instance that is already gone counts as deleted.
    pub(in crate::scaleway) async fn decommission(
        &self,
        id: &InstanceId,
    ) -> Result<(), ScalewayBackendError> {
        let Some(server) = self.fetch_instance(id).await? else {
            debug!(instance = %id, "instance already gone");
            return Ok(());
        };

        if !server.state.is_stopped() && server.allows("poweroff") {
            self.api
                .perform_instance_action_async(self.zone(), id.as_str(), "poweroff")
                .await?;
        }
        self.await_instance("poweroff", id, move || self.fetch_instance(id), stopped_status)
            .await?;

        self.api.delete_instance_async(self.zone(), id.as_str()).await?;
        self.await_instance("delete", id, move || self.fetch_instance(id), gone_status)
            .await
    }

    /// Polls `fetch` until `status` reports completion.
    pub(in crate::scaleway) async fn await_instance<F, Fut>(
        &self,
        operation: &str,
        id: &InstanceId,
        mut fetch: F,
        status: fn(Option<&InstanceSnapshot>) -> OperationStatus,
    ) -> Result<(), ScalewayBackendError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<Option<InstanceSnapshot>, ScalewayBackendError>>,
    {
        self.poller
            .poll(operation, || {
                let pending = fetch();
                async move { Ok(status(pending.await?.as_ref())) }
            })
            .await
            .map_err(|err| ScalewayBackendError::from_poll(err, id))
    }
}

const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

async fn accepts_connections(endpoint: SocketAddr) -> bool {
    match timeout(CONNECT_TIMEOUT, TcpStream::connect(endpoint)).await {
        Ok(Ok(_stream)) => true,
        Ok(Err(err)) => {
            debug!(%endpoint, error = %err, "runtime port not open yet");
            false
        }
        Err(_) => {
            debug!(%endpoint, "runtime port connection attempt timed out");
            false
        }
    }
}
