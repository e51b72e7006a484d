//! Runtime selection between the host backends.

use thiserror::Error;

use crate::digitalocean::{DigitalOceanBackend, DigitalOceanError};
use crate::host::{Host, ProvisionFuture, Provisioner};
use crate::local::{LocalHostError, LocalSocket};
use crate::scaleway::{ScalewayBackend, ScalewayBackendError};
use crate::tcp::{TcpHostError, TcpPassthrough};

/// Errors from whichever backend [`AnyProvisioner`] dispatched to.
#[derive(Debug, Error)]
pub enum AnyProvisionerError {
    /// Local socket backend failure.
    #[error(transparent)]
    Local(#[from] LocalHostError),
    /// TCP passthrough failure.
    #[error(transparent)]
    Tcp(#[from] TcpHostError),
    /// Scaleway failure.
    #[error(transparent)]
    Scaleway(#[from] ScalewayBackendError),
    /// DigitalOcean failure.
    #[error(transparent)]
    DigitalOcean(#[from] DigitalOceanError),
}

/// A host backend chosen at runtime, usually from the `--host` flag.
#[derive(Clone)]
pub enum AnyProvisioner {
    /// Local daemon.
    Local(LocalSocket),
    /// Existing daemon reached over TCP.
    Tcp(TcpPassthrough),
    /// Ephemeral Scaleway instance.
    Scaleway(Box<ScalewayBackend>),
    /// Ephemeral DigitalOcean droplet.
    DigitalOcean(Box<DigitalOceanBackend>),
}

impl AnyProvisioner {
    /// Short backend name used in logs.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Local(_) => "local",
            Self::Tcp(_) => "tcp",
            Self::Scaleway(_) => "scaleway",
            Self::DigitalOcean(_) => "digitalocean",
        }
    }
}

impl Provisioner for AnyProvisioner {
    type Error = AnyProvisionerError;

    fn create_machine(&self) -> ProvisionFuture<'_, Host, Self::Error> {
        Box::pin(async move {
            Ok(match self {
                Self::Local(backend) => backend.create_machine().await?,
                Self::Tcp(backend) => backend.create_machine().await?,
                Self::Scaleway(backend) => backend.create_machine().await?,
                Self::DigitalOcean(backend) => backend.create_machine().await?,
            })
        })
    }

    fn delete_machine(&self, host: Host) -> ProvisionFuture<'_, (), Self::Error> {
        Box::pin(async move {
            match self {
                Self::Local(backend) => backend.delete_machine(host).await?,
                Self::Tcp(backend) => backend.delete_machine(host).await?,
                Self::Scaleway(backend) => backend.delete_machine(host).await?,
                Self::DigitalOcean(backend) => backend.delete_machine(host).await?,
            }
            Ok(())
        })
    }

    fn disposes_containers(&self) -> bool {
        match self {
            Self::Local(backend) => backend.disposes_containers(),
            Self::Tcp(backend) => backend.disposes_containers(),
            Self::Scaleway(backend) => backend.disposes_containers(),
            Self::DigitalOcean(backend) => backend.disposes_containers(),
        }
    }
}
