//! Core library for the skiff container runner.
//!
//! [`run::Orchestrator`] builds or reuses an image, runs one container with
//! captured output, and releases everything it created, even when the caller
//! cancels mid-flight. Hosts come from a [`host::Provisioner`]: the local
//! daemon, an existing TCP daemon, or an ephemeral Scaleway or DigitalOcean
//! machine. Containers run through a [`runtime::ContainerRuntime`], backed by
//! Docker via `bollard`.

pub mod bootstrap;
pub mod config;
pub mod digitalocean;
pub mod engine;
pub mod host;
pub mod local;
pub mod operation;
pub mod provisioners;
pub mod readiness;
pub mod run;
pub mod runtime;
pub mod scaleway;
pub mod ssh;
pub mod tcp;
pub mod teardown;
pub mod test_support;

pub use config::{ConfigError, DigitalOceanConfig, RuntimeConfig, ScalewayConfig};
pub use digitalocean::{DigitalOceanBackend, DigitalOceanError};
pub use host::{Host, HostKind, Provisioner};
pub use provisioners::{AnyProvisioner, AnyProvisionerError};
pub use run::{ExecutionRequest, ExecutionResult, Orchestrator, RunError};
pub use runtime::{
    ContainerRuntime, DockerConnector, RuntimeConnector, RuntimeEndpoint, RuntimeError,
};
pub use scaleway::{ScalewayBackend, ScalewayBackendError};
