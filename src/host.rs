//! Host provisioning abstraction for disposable container hosts.

use std::fmt;
use std::future::Future;
use std::pin::Pin;

use camino::Utf8PathBuf;

use crate::runtime::{DEFAULT_RUNTIME_PORT, RuntimeEndpoint};

/// Backend that produced a [`Host`].
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum HostKind {
    /// The local runtime daemon.
    Local,
    /// A pre-existing daemon reached over TCP.
    Tcp,
    /// A Scaleway instance.
    Scaleway,
    /// A DigitalOcean droplet.
    DigitalOcean,
}

impl fmt::Display for HostKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Local => "local",
            Self::Tcp => "tcp",
            Self::Scaleway => "scaleway",
            Self::DigitalOcean => "digitalocean",
        })
    }
}

/// A machine able to run the request's container.
///
/// A host exists between a successful
/// [`Provisioner::create_machine`] and the matching
/// [`Provisioner::delete_machine`], which consumes it.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Host {
    /// Provider specific identifier.
    pub id: String,
    /// Host name or IP address.
    pub address: String,
    /// Port of the runtime API.
    pub runtime_port: u16,
    /// Boot image or snapshot identifier.
    pub image: String,
    /// Human readable name.
    pub name: String,
    /// Backend that created the host.
    pub kind: HostKind,
    /// SSH key identifiers registered on the host.
    pub ssh_key_ids: Vec<String>,
    /// Directory holding `cert.pem`, `key.pem`, and `ca.pem` for mutual TLS.
    pub certs_dir: Option<Utf8PathBuf>,
}

impl Host {
    /// Describes the local runtime daemon.
    #[must_use]
    pub fn local() -> Self {
        Self {
            id: String::from("local"),
            address: String::from("localhost"),
            runtime_port: DEFAULT_RUNTIME_PORT,
            image: String::new(),
            name: String::from("local"),
            kind: HostKind::Local,
            ssh_key_ids: Vec::new(),
            certs_dir: None,
        }
    }

    /// Returns `true` for hosts whose runtime is not the local socket.
    #[must_use]
    pub const fn is_remote(&self) -> bool {
        !matches!(self.kind, HostKind::Local)
    }

    /// Returns `host:port` of the runtime API, bracketing IPv6 literals.
    #[must_use]
    pub fn runtime_address(&self) -> String {
        if self.address.contains(':') && !self.address.starts_with('[') {
            format!("[{}]:{}", self.address, self.runtime_port)
        } else {
            format!("{}:{}", self.address, self.runtime_port)
        }
    }

    /// Returns the endpoint a runtime client should bind to.
    #[must_use]
    pub fn runtime_endpoint(&self) -> RuntimeEndpoint {
        if self.is_remote() {
            RuntimeEndpoint::remote(self.runtime_address(), self.certs_dir.clone())
        } else {
            RuntimeEndpoint::LocalDefault
        }
    }
}

/// Future returned by provisioning operations.
pub type ProvisionFuture<'a, T, E> = Pin<Box<dyn Future<Output = Result<T, E>> + Send + 'a>>;

/// Interface implemented by host backends.
pub trait Provisioner: Send + Sync {
    /// Provider specific error type returned by the backend.
    type Error: std::error::Error + Send + Sync + 'static;

    /// Creates a host and returns once its runtime endpoint is known.
    ///
    /// Backends release partially created resources themselves before
    /// returning an error.
    fn create_machine(&self) -> ProvisionFuture<'_, Host, Self::Error>;

    /// Deletes the host and everything running on it.
    fn delete_machine(&self, host: Host) -> ProvisionFuture<'_, (), Self::Error>;

    /// Returns `true` when deleting the host also disposes of its containers.
    ///
    /// Long-lived daemons (local, tcp) return `false`, so the orchestrator
    /// removes the container before the host delete.
    fn disposes_containers(&self) -> bool {
        true
    }
}
