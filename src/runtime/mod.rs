//! Container runtime capability used by the execution engine.
//!
//! The engine talks to a Docker-compatible daemon exclusively through
//! [`ContainerRuntime`], so tests can substitute an in-memory fake. The
//! production implementation lives in [`docker`] and is obtained from a
//! [`RuntimeConnector`] once the target endpoint is known.

use std::fmt;
use std::future::Future;
use std::pin::Pin;

use camino::Utf8PathBuf;
use thiserror::Error;

pub mod docker;

pub use docker::{DockerConnector, DockerRuntime};

/// Port on which remote hosts expose the runtime API.
pub const DEFAULT_RUNTIME_PORT: u16 = 2375;

/// Future returned by runtime operations.
pub type RuntimeFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, RuntimeError>> + Send + 'a>>;

/// Errors raised by container runtime clients.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum RuntimeError {
    /// Raised when a client cannot be created for an endpoint.
    #[error("failed to connect to container runtime at {endpoint}: {message}")]
    Connect {
        /// Endpoint that was requested.
        endpoint: String,
        /// Error reported by the client library.
        message: String,
    },
    /// Raised when an image lookup finds nothing. The engine treats this as a
    /// signal to build.
    #[error("image {image} not found")]
    ImageNotFound {
        /// Image reference that was looked up.
        image: String,
    },
    /// Raised when a container no longer exists.
    #[error("container {id} not found")]
    ContainerNotFound {
        /// Container identifier.
        id: String,
    },
    /// Raised when an image build reports an error.
    #[error("failed to build image {tag}: {message}")]
    Build {
        /// Tag the build would have produced.
        tag: String,
        /// Error reported by the build.
        message: String,
    },
    /// Raised when any other runtime request fails.
    #[error("{operation} failed: {message}")]
    Request {
        /// Runtime operation that failed.
        operation: &'static str,
        /// Error reported by the client library.
        message: String,
    },
}

/// Where the runtime daemon can be reached.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum RuntimeEndpoint {
    /// Platform default: `unix:///var/run/docker.sock`, or
    /// `npipe:////./pipe/docker_engine` on Windows.
    LocalDefault,
    /// Plain TCP, for example `10.0.0.5:2375`.
    Tcp {
        /// `host:port` of the daemon.
        address: String,
    },
    /// Mutually authenticated TLS using `cert.pem`, `key.pem`, and `ca.pem`
    /// from a certificates directory.
    Tls {
        /// `host:port` of the daemon.
        address: String,
        /// Directory holding the client credentials bundle.
        certs_dir: Utf8PathBuf,
    },
}

impl RuntimeEndpoint {
    /// Builds a TCP or TLS endpoint depending on whether a bundle is present.
    #[must_use]
    pub fn remote(host_port: impl Into<String>, certs_dir: Option<Utf8PathBuf>) -> Self {
        let address = host_port.into();
        match certs_dir {
            Some(dir) => Self::Tls {
                address,
                certs_dir: dir,
            },
            None => Self::Tcp { address },
        }
    }
}

impl fmt::Display for RuntimeEndpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::LocalDefault => f.write_str("local default socket"),
            Self::Tcp { address } => write!(f, "tcp://{address}"),
            Self::Tls { address, .. } => write!(f, "tcp://{address} (tls)"),
        }
    }
}

/// Image metadata returned by a lookup.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct ImageSummary {
    /// Runtime image identifier.
    pub id: String,
    /// Repository tags attached to the image.
    pub tags: Vec<String>,
}

/// Where an image build gets its Dockerfile and context from.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum BuildSource {
    /// A local directory sent to the daemon as a tar archive.
    Context {
        /// Build context directory.
        directory: Utf8PathBuf,
        /// Dockerfile path relative to the context.
        dockerfile: String,
    },
    /// A remote URI (git repository or tarball) fetched by the daemon.
    Remote {
        /// URI handed to the daemon.
        uri: String,
        /// Dockerfile path inside the remote context.
        dockerfile: String,
    },
}

/// Parameters for an image build.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct BuildSpec {
    /// Tag applied to the built image.
    pub tag: String,
    /// Build input.
    pub source: BuildSource,
}

/// Parameters for container creation.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct ContainerSpec {
    /// Container name.
    pub name: String,
    /// Image reference.
    pub image: String,
    /// Command override; empty keeps the image default.
    pub command: Vec<String>,
    /// `KEY=VALUE` environment entries.
    pub env: Vec<String>,
    /// `source:destination[:mode]` bind mounts.
    pub binds: Vec<String>,
}

/// Container status as reported by inspection.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum ContainerStatus {
    /// Created but never started.
    Created,
    /// Currently running.
    Running,
    /// Paused.
    Paused,
    /// Restarting.
    Restarting,
    /// Being removed.
    Removing,
    /// Exited.
    Exited,
    /// Dead.
    Dead,
    /// Any status this crate does not model.
    Unknown(String),
}

impl ContainerStatus {
    /// Parses a runtime status string.
    #[must_use]
    pub fn parse(status: &str) -> Self {
        match status {
            "created" => Self::Created,
            "running" => Self::Running,
            "paused" => Self::Paused,
            "restarting" => Self::Restarting,
            "removing" => Self::Removing,
            "exited" => Self::Exited,
            "dead" => Self::Dead,
            other => Self::Unknown(other.to_owned()),
        }
    }

    /// Returns `true` when the container must be killed before removal.
    #[must_use]
    pub const fn is_running(&self) -> bool {
        matches!(self, Self::Running | Self::Restarting | Self::Paused)
    }
}

/// Captured container output.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct CapturedOutput {
    /// Standard output.
    pub stdout: String,
    /// Standard error.
    pub stderr: String,
}

/// Operations the engine and teardown controller need from a runtime daemon.
pub trait ContainerRuntime: Send + Sync {
    /// Looks up an image by reference.
    ///
    /// Returns [`RuntimeError::ImageNotFound`] when nothing matches.
    fn find_image<'a>(&'a self, reference: &'a str) -> RuntimeFuture<'a, ImageSummary>;

    /// Builds an image and returns the applied tag.
    fn build_image<'a>(&'a self, spec: &'a BuildSpec) -> RuntimeFuture<'a, String>;

    /// Creates a container with stdin kept open for a single attach and
    /// returns its identifier.
    fn create_container<'a>(&'a self, spec: &'a ContainerSpec) -> RuntimeFuture<'a, String>;

    /// Starts a created container.
    fn start_container<'a>(&'a self, id: &'a str) -> RuntimeFuture<'a, ()>;

    /// Attaches to the container's stdin, writes `payload`, and closes the
    /// stream.
    fn attach_stdin<'a>(&'a self, id: &'a str, payload: &'a [u8]) -> RuntimeFuture<'a, ()>;

    /// Waits for the container to stop and returns its exit code.
    fn wait_container<'a>(&'a self, id: &'a str) -> RuntimeFuture<'a, i64>;

    /// Fetches stdout and stderr as separate buffers.
    fn logs<'a>(&'a self, id: &'a str) -> RuntimeFuture<'a, CapturedOutput>;

    /// Reports the container status.
    ///
    /// Returns [`RuntimeError::ContainerNotFound`] when it no longer exists.
    fn inspect_container<'a>(&'a self, id: &'a str) -> RuntimeFuture<'a, ContainerStatus>;

    /// Sends SIGKILL to the container.
    fn kill_container<'a>(&'a self, id: &'a str) -> RuntimeFuture<'a, ()>;

    /// Force-removes the container.
    fn remove_container<'a>(&'a self, id: &'a str) -> RuntimeFuture<'a, ()>;
}

/// Produces runtime clients bound to an endpoint.
pub trait RuntimeConnector: Send + Sync {
    /// Client type produced by the connector.
    type Runtime: ContainerRuntime + Clone + 'static;

    /// Creates a client for `endpoint`. No request is sent yet.
    ///
    /// # Errors
    ///
    /// Returns [`RuntimeError::Connect`] when the client cannot be configured,
    /// for example because the TLS bundle is unreadable.
    fn connect(&self, endpoint: &RuntimeEndpoint) -> Result<Self::Runtime, RuntimeError>;
}
