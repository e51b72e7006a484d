//! Scaleway backend for ephemeral container hosts.
//!
//! Instances boot from the newest image matching the configured label and run
//! cloud-init that installs the daemon and exposes it on the runtime port.

mod error;
mod lifecycle;
mod types;

use std::net::IpAddr;
use std::time::Duration;

use scaleway_rs::ScalewayApi;
use tracing::{info, warn};
use uuid::Uuid;

use crate::config::ScalewayConfig;
use crate::host::{Host, HostKind, ProvisionFuture, Provisioner};
use crate::operation::Poller;
use crate::runtime::DEFAULT_RUNTIME_PORT;
use lifecycle::InstanceSnapshot;
use types::InstanceId;

pub use error::ScalewayBackendError;

/// Pause between connection attempts while cloud-init installs the runtime.
const RUNTIME_PORT_INTERVAL: Duration = Duration::from_secs(5);

/// Provisioner that runs workloads on Scaleway instances.
#[derive(Clone)]
pub struct ScalewayBackend {
    api: ScalewayApi,
    config: ScalewayConfig,
    runtime_port: u16,
    poller: Poller,
    runtime_poller: Poller,
}

impl ScalewayBackend {
    /// Constructs a new backend from configuration.
    ///
    /// # Errors
    ///
    /// Returns [`ScalewayBackendError::Config`] when the provided configuration
    /// fails validation.
    pub fn new(config: ScalewayConfig) -> Result<Self, ScalewayBackendError> {
        config.validate()?;
        Ok(Self {
            api: ScalewayApi::new(&config.secret_key),
            config,
            runtime_port: DEFAULT_RUNTIME_PORT,
            poller: Poller::short(),
            runtime_poller: Poller::long().with_interval(RUNTIME_PORT_INTERVAL),
        })
    }

    /// Overrides the poller used for power, network, and deletion waits.
    #[must_use]
    pub const fn with_poller(mut self, poller: Poller) -> Self {
        self.poller = poller;
        self
    }

    /// Overrides the poller used while cloud-init brings the runtime up.
    #[must_use]
    pub const fn with_runtime_poller(mut self, poller: Poller) -> Self {
        self.runtime_poller = poller;
        self
    }

    fn zone(&self) -> &str {
        &self.config.default_zone
    }

    async fn provision(&self) -> Result<Host, ScalewayBackendError> {
        let image_id = self.resolve_image_id().await?;
        let name = format!("skiff-{}", Uuid::new_v4().simple());
        let snapshot = self.create_instance_stopped(&name, &image_id).await?;
        info!(instance = %snapshot.id, %name, "created scaleway instance");

        let address = match self.boot(&snapshot).await {
            Ok(address) => address,
            Err(err) => {
                if let Err(cleanup) = self.decommission(&snapshot.id).await {
                    warn!(
                        instance = %snapshot.id,
                        error = %cleanup,
                        "failed to release partially created instance"
                    );
                }
                return Err(err);
            }
        };

        Ok(Host {
            id: snapshot.id.to_string(),
            address: address.to_string(),
            runtime_port: self.runtime_port,
            image: image_id,
            name,
            kind: HostKind::Scaleway,
            ssh_key_ids: Vec::new(),
            certs_dir: None,
        })
    }

    async fn boot(&self, snapshot: &InstanceSnapshot) -> Result<IpAddr, ScalewayBackendError> {
        self.power_on_if_needed(snapshot).await?;
        let address = self.wait_for_public_ip(&snapshot.id).await?;
        self.wait_for_runtime_port(&snapshot.id, address).await?;
        Ok(address)
    }
}

impl Provisioner for ScalewayBackend {
    type Error = ScalewayBackendError;

    fn create_machine(&self) -> ProvisionFuture<'_, Host, Self::Error> {
        Box::pin(self.provision())
    }

    fn delete_machine(&self, host: Host) -> ProvisionFuture<'_, (), Self::Error> {
        Box::pin(async move {
            let id = InstanceId::from(host.id);
            self.decommission(&id).await?;
            info!(instance = %id, "deleted scaleway instance");
            Ok(())
        })
    }
}
