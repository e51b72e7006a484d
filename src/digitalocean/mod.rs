//! DigitalOcean backend for ephemeral container hosts.
//!
//! The first run on an account boots the distribution image, installs the
//! daemon over SSH, and saves the result as a named snapshot. Later runs boot
//! from that snapshot and only refresh the daemon override.

mod api;

use std::sync::{LazyLock, Mutex, PoisonError};
use std::time::Duration;

use reqwest::RequestBuilder;
use serde::Serialize;
use serde::de::DeserializeOwned;
use thiserror::Error;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::bootstrap;
use crate::config::{ConfigError, DigitalOceanConfig, read_file};
use crate::host::{Host, HostKind, ProvisionFuture, Provisioner};
use crate::operation::{OperationStatus, PollError, Poller};
use crate::readiness::{MEDIUM_RETRY, ProbeError, ReadinessProbe};
use crate::runtime::DEFAULT_RUNTIME_PORT;
use crate::ssh::{
    CommandRunner, DEFAULT_SSH_PORT, ProcessCommandRunner, RemoteShell, SshConfig, SshError,
    SshTarget,
};
use api::{
    Action, ActionEnvelope, ActionRequest, CreateDropletRequest, CreateKeyRequest, DropletEnvelope,
    ImageRef, Snapshot, SnapshotList, SshKey, SshKeyEnvelope, SshKeyList,
};

const HTTP_TIMEOUT: Duration = Duration::from_secs(30);
const PAGE_SIZE: u32 = 200;
const DROPLET_TAG: &str = "skiff";

static HTTP_CLIENT: LazyLock<reqwest::Client> = LazyLock::new(|| {
    reqwest::Client::builder()
        .timeout(HTTP_TIMEOUT)
        .build()
        .unwrap_or_else(|_| reqwest::Client::new())
});

/// Errors raised by the DigitalOcean backend.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum DigitalOceanError {
    /// Raised when the configuration is incomplete or a key file is unreadable.
    #[error("configuration error: {0}")]
    Config(String),
    /// Raised when the SSH settings are invalid.
    #[error(transparent)]
    Shell(#[from] SshError),
    /// Raised when the API cannot be reached.
    #[error("request to {path} failed: {message}")]
    Http {
        /// API path.
        path: String,
        /// Transport error.
        message: String,
    },
    /// Raised when the API answers with a non-success status.
    #[error("{path} returned {status}: {message}")]
    Api {
        /// API path.
        path: String,
        /// HTTP status code.
        status: u16,
        /// Message from the error body.
        message: String,
    },
    /// Raised when a response body does not match the expected shape.
    #[error("unexpected response from {path}: {message}")]
    Decode {
        /// API path.
        path: String,
        /// Deserialisation error.
        message: String,
    },
    /// Raised when the saved snapshot has an identifier droplets cannot boot.
    #[error("snapshot {name} has non-numeric id {id}")]
    InvalidSnapshotId {
        /// Snapshot name.
        name: String,
        /// Identifier reported by the API.
        id: String,
    },
    /// Raised when an asynchronous operation exceeds its timeout.
    #[error("timeout waiting for {operation} on droplet {droplet_id}")]
    Timeout {
        /// Operation being waited on.
        operation: String,
        /// Droplet identifier.
        droplet_id: u64,
    },
    /// Raised when the API reports an action as errored.
    #[error("{operation} failed on droplet {droplet_id}")]
    ActionFailed {
        /// Operation being waited on.
        operation: String,
        /// Droplet identifier.
        droplet_id: u64,
    },
    /// Raised when the droplet's SSH port never accepts connections.
    #[error(transparent)]
    Unreachable(#[from] ProbeError),
    /// Raised when the bootstrap script fails.
    #[error("bootstrap of droplet {droplet_id} failed: {source}")]
    Bootstrap {
        /// Droplet identifier.
        droplet_id: u64,
        /// Remote shell failure.
        #[source]
        source: SshError,
    },
}

impl DigitalOceanError {
    fn from_poll(err: PollError<Self>, droplet_id: u64) -> Self {
        match err {
            PollError::Timeout { operation, .. } => Self::Timeout {
                operation,
                droplet_id,
            },
            PollError::Failed { operation } => Self::ActionFailed {
                operation,
                droplet_id,
            },
            PollError::Check { source, .. } => source,
        }
    }
}

impl From<ConfigError> for DigitalOceanError {
    fn from(value: ConfigError) -> Self {
        Self::Config(value.to_string())
    }
}

#[derive(serde::Deserialize)]
struct ApiErrorBody {
    message: String,
}

/// Provisioner that runs workloads on DigitalOcean droplets.
#[derive(Clone, Debug)]
pub struct DigitalOceanBackend<R: CommandRunner + Clone + 'static = ProcessCommandRunner> {
    config: DigitalOceanConfig,
    shell: RemoteShell<R>,
    runtime_port: u16,
    ssh_port: u16,
    probe: ReadinessProbe,
    probe_attempts: u32,
    short: Poller,
    long: Poller,
}

impl DigitalOceanBackend<ProcessCommandRunner> {
    /// Builds a backend that bootstraps droplets with the system `ssh`.
    ///
    /// # Errors
    ///
    /// Returns [`DigitalOceanError::Config`] or [`DigitalOceanError::Shell`]
    /// when either configuration fails validation.
    pub fn new(
        config: DigitalOceanConfig,
        ssh: SshConfig,
    ) -> Result<Self, DigitalOceanError> {
        Self::with_shell(config, RemoteShell::with_process_runner(ssh)?)
    }
}

impl<R: CommandRunner + Clone + 'static> DigitalOceanBackend<R> {
    /// Builds a backend around an existing remote shell.
    ///
    /// # Errors
    ///
    /// Returns [`DigitalOceanError::Config`] when the configuration is invalid.
    pub fn with_shell(
        config: DigitalOceanConfig,
        shell: RemoteShell<R>,
    ) -> Result<Self, DigitalOceanError> {
        config.validate()?;
        Ok(Self {
            config,
            shell,
            runtime_port: DEFAULT_RUNTIME_PORT,
            ssh_port: DEFAULT_SSH_PORT,
            probe: ReadinessProbe::new(),
            probe_attempts: MEDIUM_RETRY,
            short: Poller::short(),
            long: Poller::long(),
        })
    }

    /// Overrides the pollers for short (power, network) and long (snapshot)
    /// operations.
    #[must_use]
    pub const fn with_pollers(mut self, short: Poller, long: Poller) -> Self {
        self.short = short;
        self.long = long;
        self
    }

    /// Overrides the SSH readiness probe and its attempt budget.
    #[must_use]
    pub const fn with_probe(mut self, probe: ReadinessProbe, attempts: u32) -> Self {
        self.probe = probe;
        self.probe_attempts = attempts;
        self
    }

    /// Overrides the SSH port probed and used for the bootstrap.
    #[must_use]
    pub const fn with_ssh_port(mut self, port: u16) -> Self {
        self.ssh_port = port;
        self
    }

    async fn provision(&self) -> Result<Host, DigitalOceanError> {
        let snapshot = self.find_snapshot().await?;
        let image = match &snapshot {
            Some(saved) => ImageRef::Snapshot(saved.id.parse().map_err(|_| {
                DigitalOceanError::InvalidSnapshotId {
                    name: saved.name.clone(),
                    id: saved.id.clone(),
                }
            })?),
            None => ImageRef::Slug(self.config.image.clone()),
        };
        let key = self.resolve_ssh_key().await?;

        let name = format!("skiff-{}", Uuid::new_v4());
        let request = CreateDropletRequest {
            name: &name,
            region: &self.config.region,
            size: &self.config.size,
            image: image.clone(),
            ssh_keys: vec![key.id],
            tags: vec![DROPLET_TAG],
        };
        let created: DropletEnvelope = self.post("/v2/droplets", &request).await?;
        let droplet_id = created.droplet.id;
        info!(droplet = droplet_id, name = %created.droplet.name, ?image, "created droplet");

        let fresh = snapshot.is_none();
        let address = match self.prepare(droplet_id, fresh).await {
            Ok(address) => address,
            Err(err) => {
                if let Err(cleanup) = self.destroy(droplet_id).await {
                    warn!(
                        droplet = droplet_id,
                        error = %cleanup,
                        "failed to release partially created droplet"
                    );
                }
                return Err(err);
            }
        };

        Ok(Host {
            id: droplet_id.to_string(),
            address,
            runtime_port: self.runtime_port,
            image: match image {
                ImageRef::Snapshot(id) => id.to_string(),
                ImageRef::Slug(slug) => slug,
            },
            name: created.droplet.name,
            kind: HostKind::DigitalOcean,
            ssh_key_ids: vec![key.id.to_string()],
            certs_dir: None,
        })
    }

    async fn prepare(&self, droplet_id: u64, fresh: bool) -> Result<String, DigitalOceanError> {
        let address = self.wait_for_network(droplet_id).await?;
        let target = SshTarget {
            host: address.clone(),
            port: self.ssh_port,
        };
        self.probe
            .probe(&target.socket_address(), self.probe_attempts)
            .await?;
        self.bootstrap(droplet_id, &target, fresh).await?;
        if fresh {
            self.save_snapshot(droplet_id).await?;
        }
        Ok(address)
    }

    async fn find_snapshot(&self) -> Result<Option<Snapshot>, DigitalOceanError> {
        let listing: SnapshotList = self
            .get(&format!("/v2/snapshots?resource_type=droplet&per_page={PAGE_SIZE}"))
            .await?;
        let found = listing
            .snapshots
            .into_iter()
            .find(|snapshot| snapshot.name == self.config.snapshot_name);
        debug!(snapshot = ?found, "looked up saved snapshot");
        Ok(found)
    }

    async fn resolve_ssh_key(&self) -> Result<SshKey, DigitalOceanError> {
        if let Some(key_id) = self.config.key_id {
            let envelope: SshKeyEnvelope = self.get(&format!("/v2/account/keys/{key_id}")).await?;
            return Ok(envelope.ssh_key);
        }

        let path = self.config.ssh_public_key_path.as_deref().unwrap_or_default();
        let public_key = read_file(path)?;
        let wanted = key_material(&public_key);

        let listing: SshKeyList = self
            .get(&format!("/v2/account/keys?per_page={PAGE_SIZE}"))
            .await?;
        if let Some(existing) = listing
            .ssh_keys
            .into_iter()
            .find(|key| key_material(&key.public_key) == wanted)
        {
            debug!(
                key = existing.id,
                fingerprint = %existing.fingerprint,
                "reusing registered ssh key"
            );
            return Ok(existing);
        }

        let request = CreateKeyRequest {
            name: &self.config.snapshot_name,
            public_key: public_key.trim(),
        };
        let created: SshKeyEnvelope = self.post("/v2/account/keys", &request).await?;
        info!(key = created.ssh_key.id, "registered ssh key");
        Ok(created.ssh_key)
    }

    async fn wait_for_network(&self, droplet_id: u64) -> Result<String, DigitalOceanError> {
        let path = format!("/v2/droplets/{droplet_id}");
        let found = Mutex::new(None);
        let (path_ref, found_slot) = (&path, &found);

        self.short
            .poll("droplet network", move || async move {
                let envelope: DropletEnvelope = self.get(path_ref).await?;
                let Some(address) = envelope.droplet.ready_address() else {
                    return Ok(OperationStatus::InProgress);
                };
                let mut slot = found_slot.lock().unwrap_or_else(PoisonError::into_inner);
                *slot = Some(address.to_owned());
                Ok(OperationStatus::Completed)
            })
            .await
            .map_err(|err| DigitalOceanError::from_poll(err, droplet_id))?;

        found
            .into_inner()
            .unwrap_or_else(PoisonError::into_inner)
            .ok_or_else(|| DigitalOceanError::Timeout {
                operation: String::from("droplet network"),
                droplet_id,
            })
    }

    async fn bootstrap(
        &self,
        droplet_id: u64,
        target: &SshTarget,
        fresh: bool,
    ) -> Result<(), DigitalOceanError> {
        let script = bootstrap::shell_script(self.runtime_port, fresh);
        info!(droplet = droplet_id, install = fresh, "bootstrapping droplet");
        self.shell
            .run(target, &script)
            .await
            .map_err(|source| DigitalOceanError::Bootstrap { droplet_id, source })?;
        Ok(())
    }

    async fn save_snapshot(&self, droplet_id: u64) -> Result<(), DigitalOceanError> {
        let action = self
            .droplet_action(droplet_id, "snapshot", Some(&self.config.snapshot_name))
            .await?;
        self.await_action("snapshot", droplet_id, &action, self.long).await?;
        info!(droplet = droplet_id, snapshot = %self.config.snapshot_name, "saved snapshot");
        Ok(())
    }

    async fn destroy(&self, droplet_id: u64) -> Result<(), DigitalOceanError> {
        let action = match self.droplet_action(droplet_id, "shutdown", None).await {
            Ok(action) => action,
            Err(err) => {
                debug!(droplet = droplet_id, error = %err, "shutdown refused; powering off");
                self.droplet_action(droplet_id, "power_off", None).await?
            }
        };
        self.await_action("shutdown", droplet_id, &action, self.short).await?;
        self.delete(&format!("/v2/droplets/{droplet_id}")).await
    }

    async fn droplet_action(
        &self,
        droplet_id: u64,
        kind: &str,
        name: Option<&str>,
    ) -> Result<Action, DigitalOceanError> {
        let envelope: ActionEnvelope = self
            .post(
                &format!("/v2/droplets/{droplet_id}/actions"),
                &ActionRequest { kind, name },
            )
            .await?;
        Ok(envelope.action)
    }

    async fn await_action(
        &self,
        operation: &str,
        droplet_id: u64,
        action: &Action,
        poller: Poller,
    ) -> Result<(), DigitalOceanError> {
        let path = format!("/v2/droplets/{droplet_id}/actions/{}", action.id);
        let path_ref = &path;
        poller
            .poll(operation, move || async move {
                let envelope: ActionEnvelope = self.get(path_ref).await?;
                Ok(OperationStatus::from_provider(&envelope.action.status))
            })
            .await
            .map_err(|err| DigitalOceanError::from_poll(err, droplet_id))
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.config.api_url.trim_end_matches('/'))
    }

    async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T, DigitalOceanError> {
        let body = self.send(HTTP_CLIENT.get(self.url(path)), path).await?;
        decode(path, &body)
    }

    async fn post<B: Serialize + Sync, T: DeserializeOwned>(
        &self,
        path: &str,
        payload: &B,
    ) -> Result<T, DigitalOceanError> {
        let body = self
            .send(HTTP_CLIENT.post(self.url(path)).json(payload), path)
            .await?;
        decode(path, &body)
    }

    async fn delete(&self, path: &str) -> Result<(), DigitalOceanError> {
        self.send(HTTP_CLIENT.delete(self.url(path)), path).await?;
        Ok(())
    }

    async fn send(
        &self,
        request: RequestBuilder,
        path: &str,
    ) -> Result<Vec<u8>, DigitalOceanError> {
        let http_error = |err: reqwest::Error| DigitalOceanError::Http {
            path: path.to_owned(),
            message: err.to_string(),
        };
        let response = request
            .bearer_auth(&self.config.api_key)
            .send()
            .await
            .map_err(http_error)?;
        let status = response.status();
        let body = response.bytes().await.map_err(http_error)?;
        if status.is_success() {
            return Ok(body.to_vec());
        }

        let message = serde_json::from_slice::<ApiErrorBody>(&body).map_or_else(
            |_| String::from_utf8_lossy(&body).into_owned(),
            |parsed| parsed.message,
        );
        Err(DigitalOceanError::Api {
            path: path.to_owned(),
            status: status.as_u16(),
            message,
        })
    }
}

impl<R: CommandRunner + Clone + 'static> Provisioner for DigitalOceanBackend<R> {
    type Error = DigitalOceanError;

    fn create_machine(&self) -> ProvisionFuture<'_, Host, Self::Error> {
        Box::pin(self.provision())
    }

    fn delete_machine(&self, host: Host) -> ProvisionFuture<'_, (), Self::Error> {
        Box::pin(async move {
            let droplet_id = host.id.parse::<u64>().map_err(|_| {
                DigitalOceanError::Config(format!("host id {} is not a droplet id", host.id))
            })?;
            self.destroy(droplet_id).await?;
            info!(droplet = droplet_id, "deleted droplet");
            Ok(())
        })
    }
}

fn decode<T: DeserializeOwned>(path: &str, body: &[u8]) -> Result<T, DigitalOceanError> {
    serde_json::from_slice(body).map_err(|err| DigitalOceanError::Decode {
        path: path.to_owned(),
        message: err.to_string(),
    })
}

/// Key type and base64 body, ignoring the trailing comment.
fn key_material(public_key: &str) -> Vec<&str> {
    public_key.split_whitespace().take(2).collect()
}
