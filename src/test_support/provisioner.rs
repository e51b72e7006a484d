//! Scripted host backend.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use thiserror::Error;
use tokio::time::sleep;

use crate::host::{Host, HostKind, ProvisionFuture, Provisioner};

/// Failures injected by [`ScriptedProvisioner`].
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum ScriptedProvisionerError {
    /// Injected create failure.
    #[error("scripted create failure")]
    Create,
    /// Injected delete failure.
    #[error("scripted delete failure for {host}")]
    Delete {
        /// Host whose delete was refused.
        host: String,
    },
}

#[derive(Debug)]
struct Script {
    template: Host,
    disposes_containers: bool,
    fail_create: bool,
    fail_delete: bool,
    create_delay: Option<Duration>,
    created: u32,
    deleted: Vec<String>,
}

/// Host backend returning a fixed host and recording deletes.
///
/// Clones share state, so a test keeps one handle while another is moved
/// into the request.
#[derive(Clone, Debug)]
pub struct ScriptedProvisioner {
    script: Arc<Mutex<Script>>,
}

impl ScriptedProvisioner {
    /// Creates a backend that hands out `template`.
    #[must_use]
    pub fn new(template: Host) -> Self {
        Self {
            script: Arc::new(Mutex::new(Script {
                template,
                disposes_containers: true,
                fail_create: false,
                fail_delete: false,
                create_delay: None,
                created: 0,
                deleted: Vec::new(),
            })),
        }
    }

    /// Creates a cloud-like backend whose host runtime listens on
    /// `127.0.0.1:port`.
    #[must_use]
    pub fn remote(port: u16) -> Self {
        Self::new(Host {
            id: String::from("droplet-1"),
            address: String::from("127.0.0.1"),
            runtime_port: port,
            image: String::from("debian-12-x64"),
            name: String::from("skiff-test"),
            kind: HostKind::DigitalOcean,
            ssh_key_ids: vec![String::from("42")],
            certs_dir: None,
        })
    }

    fn script(&self) -> MutexGuard<'_, Script> {
        self.script.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Makes deleting the host leave its containers behind.
    #[must_use]
    pub fn keeping_containers(self) -> Self {
        self.script().disposes_containers = false;
        self
    }

    /// Makes `create_machine` fail.
    #[must_use]
    pub fn failing_create(self) -> Self {
        self.script().fail_create = true;
        self
    }

    /// Makes `delete_machine` fail.
    #[must_use]
    pub fn failing_delete(self) -> Self {
        self.script().fail_delete = true;
        self
    }

    /// Delays `create_machine`.
    #[must_use]
    pub fn slow_create(self, delay: Duration) -> Self {
        self.script().create_delay = Some(delay);
        self
    }

    /// Returns how many hosts were created.
    #[must_use]
    pub fn created(&self) -> u32 {
        self.script().created
    }

    /// Returns the identifiers passed to `delete_machine`, including refused
    /// deletes.
    #[must_use]
    pub fn deleted(&self) -> Vec<String> {
        self.script().deleted.clone()
    }
}

impl Provisioner for ScriptedProvisioner {
    type Error = ScriptedProvisionerError;

    fn create_machine(&self) -> ProvisionFuture<'_, Host, Self::Error> {
        Box::pin(async move {
            let delay = self.script().create_delay;
            if let Some(pause) = delay {
                sleep(pause).await;
            }
            let mut script = self.script();
            if script.fail_create {
                return Err(ScriptedProvisionerError::Create);
            }
            script.created += 1;
            Ok(script.template.clone())
        })
    }

    fn delete_machine(&self, host: Host) -> ProvisionFuture<'_, (), Self::Error> {
        Box::pin(async move {
            let mut script = self.script();
            script.deleted.push(host.id.clone());
            if script.fail_delete {
                return Err(ScriptedProvisionerError::Delete { host: host.id });
            }
            Ok(())
        })
    }

    fn disposes_containers(&self) -> bool {
        self.script().disposes_containers
    }
}
