//! Container execution engine: image resolution, container lifecycle, and
//! output capture.
//!
//! The engine resolves the namespaced image tag (reusing an existing image or
//! building one), creates a single container for the request, runs it to
//! completion with the stdin payload attached, and collects its output. It
//! never removes containers; that belongs to the teardown controller.

use std::fmt;

use camino::Utf8PathBuf;
use thiserror::Error;
use tracing::{debug, info};
use uuid::Uuid;

use crate::runtime::{
    BuildSource, BuildSpec, CapturedOutput, ContainerRuntime, ContainerSpec, RuntimeError,
};

/// Namespace prefixed to image names unless disabled.
pub const DEFAULT_IMAGE_PREFIX: &str = "skiff";

/// Dockerfile name used when none is given.
pub const DEFAULT_DOCKERFILE: &str = "Dockerfile";

/// Prefix of generated container names.
pub const CONTAINER_NAME_PREFIX: &str = "skiff";

/// How the workload image is located or built.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct BuildOptions {
    /// Image name without the namespace prefix.
    pub image_name: String,
    /// Local build context directory.
    pub context_dir: Utf8PathBuf,
    /// Dockerfile path relative to the context.
    pub dockerfile: String,
    /// Remote build source; takes precedence over the local context.
    pub remote_uri: Option<String>,
    /// Namespace prefix, or `None` to use the image name verbatim.
    pub image_prefix: Option<String>,
}

impl BuildOptions {
    /// Creates options for `image_name` built from the current directory.
    #[must_use]
    pub fn new(image_name: impl Into<String>) -> Self {
        Self {
            image_name: image_name.into(),
            context_dir: Utf8PathBuf::from("."),
            dockerfile: DEFAULT_DOCKERFILE.to_owned(),
            remote_uri: None,
            image_prefix: Some(DEFAULT_IMAGE_PREFIX.to_owned()),
        }
    }

    /// Sets the build context directory.
    #[must_use]
    pub fn context_dir(mut self, dir: impl Into<Utf8PathBuf>) -> Self {
        self.context_dir = dir.into();
        self
    }

    /// Sets the Dockerfile path.
    #[must_use]
    pub fn dockerfile(mut self, path: impl Into<String>) -> Self {
        self.dockerfile = path.into();
        self
    }

    /// Builds from a remote URI instead of the local context.
    #[must_use]
    pub fn remote_uri(mut self, uri: impl Into<String>) -> Self {
        self.remote_uri = Some(uri.into());
        self
    }

    /// Replaces the namespace prefix.
    #[must_use]
    pub fn image_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.image_prefix = Some(prefix.into());
        self
    }

    /// Uses the image name without any namespace prefix.
    #[must_use]
    pub fn without_prefix(mut self) -> Self {
        self.image_prefix = None;
        self
    }

    /// Returns the tag the image is looked up and built under.
    #[must_use]
    pub fn image_tag(&self) -> String {
        match self.image_prefix.as_deref() {
            Some(prefix) if !prefix.is_empty() => format!("{prefix}/{}", self.image_name),
            _ => self.image_name.clone(),
        }
    }

    fn build_spec(&self, tag: String) -> BuildSpec {
        let source = match &self.remote_uri {
            Some(uri) => BuildSource::Remote {
                uri: uri.clone(),
                dockerfile: self.dockerfile.clone(),
            },
            None => BuildSource::Context {
                directory: self.context_dir.clone(),
                dockerfile: self.dockerfile.clone(),
            },
        };
        BuildSpec { tag, source }
    }
}

/// Per-request container parameters.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct ContainerOptions {
    /// Command override; empty keeps the image default.
    pub command: Vec<String>,
    /// `KEY=VALUE` environment entries.
    pub env: Vec<String>,
    /// `source:destination[:mode]` bind mounts.
    pub volumes: Vec<String>,
}

/// Lifecycle state of the request's container.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ContainerState {
    /// Created, not started.
    Created,
    /// Start acknowledged by the runtime.
    Started,
    /// Stdin delivered; the workload is running.
    Running,
    /// Stopped with the given exit code.
    Exited(i64),
}

impl fmt::Display for ContainerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Created => f.write_str("created"),
            Self::Started => f.write_str("started"),
            Self::Running => f.write_str("running"),
            Self::Exited(code) => write!(f, "exited({code})"),
        }
    }
}

/// The single container created for a request.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Container {
    /// Runtime identifier.
    pub id: String,
    /// Generated name (`skiff-<uuid>`).
    pub name: String,
    /// Image tag the container runs.
    pub image: String,
    state: ContainerState,
}

impl Container {
    /// Returns the lifecycle state.
    #[must_use]
    pub const fn state(&self) -> ContainerState {
        self.state
    }
}

/// Errors raised by the engine.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum EngineError {
    /// Raised when the image lookup fails for a reason other than absence.
    #[error("failed to look up image {image}: {source}")]
    ImageLookup {
        /// Namespaced tag.
        image: String,
        /// Runtime error.
        #[source]
        source: RuntimeError,
    },
    /// Raised when the image cannot be built.
    #[error("failed to build image {image}: {source}")]
    ImageBuild {
        /// Namespaced tag.
        image: String,
        /// Runtime error.
        #[source]
        source: RuntimeError,
    },
    /// Raised when the container cannot be created.
    #[error("failed to create container from {image}: {source}")]
    ContainerCreate {
        /// Image tag.
        image: String,
        /// Runtime error.
        #[source]
        source: RuntimeError,
    },
    /// Raised when a lifecycle call on an existing container fails.
    #[error("{stage} failed for container {container}: {source}")]
    Runtime {
        /// Lifecycle stage.
        stage: &'static str,
        /// Container identifier.
        container: String,
        /// Runtime error.
        #[source]
        source: RuntimeError,
    },
    /// Raised when the workload exits non-zero. Output is still captured.
    #[error("container exited with status {exit_code}")]
    ExecutionFailed {
        /// Exit code reported by the runtime.
        exit_code: i64,
        /// Output collected after exit.
        output: CapturedOutput,
    },
}

/// Drives one request's container against a runtime client.
#[derive(Debug)]
pub struct Engine<'r, R: ?Sized> {
    runtime: &'r R,
}

impl<'r, R> Engine<'r, R>
where
    R: ContainerRuntime + ?Sized,
{
    /// Creates an engine bound to `runtime`.
    #[must_use]
    pub const fn new(runtime: &'r R) -> Self {
        Self { runtime }
    }

    /// Returns the image tag to run, building the image when it is absent.
    ///
    /// An existing image is reused as-is; its contents are not compared with
    /// the build context.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::ImageBuild`] when the local context is missing
    /// or the build fails, and [`EngineError::ImageLookup`] when the lookup
    /// itself fails.
    pub async fn resolve_image(&self, build: &BuildOptions) -> Result<String, EngineError> {
        let tag = build.image_tag();
        match self.runtime.find_image(&tag).await {
            Ok(summary) => {
                info!(image = %tag, id = %summary.id, "reusing existing image");
                return Ok(tag);
            }
            Err(RuntimeError::ImageNotFound { .. }) => {
                debug!(image = %tag, "image not found locally; building");
            }
            Err(source) => return Err(EngineError::ImageLookup { image: tag, source }),
        }

        if build.remote_uri.is_none() && !build.context_dir.is_dir() {
            return Err(EngineError::ImageBuild {
                source: RuntimeError::Build {
                    tag: tag.clone(),
                    message: format!("build context {} does not exist", build.context_dir),
                },
                image: tag,
            });
        }

        let spec = build.build_spec(tag.clone());
        let built = self
            .runtime
            .build_image(&spec)
            .await
            .map_err(|source| EngineError::ImageBuild {
                image: tag.clone(),
                source,
            })?;
        info!(image = %built, "image built");
        Ok(built)
    }

    /// Creates the request's container from `image`.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::ContainerCreate`] when the runtime refuses.
    pub async fn create_container(
        &self,
        image: &str,
        options: &ContainerOptions,
    ) -> Result<Container, EngineError> {
        let spec = ContainerSpec {
            name: format!("{CONTAINER_NAME_PREFIX}-{}", Uuid::new_v4()),
            image: image.to_owned(),
            command: options.command.clone(),
            env: options.env.clone(),
            binds: options.volumes.clone(),
        };
        let id = self
            .runtime
            .create_container(&spec)
            .await
            .map_err(|source| EngineError::ContainerCreate {
                image: image.to_owned(),
                source,
            })?;
        info!(container = %id, name = %spec.name, image, "container created");
        Ok(Container {
            id,
            name: spec.name,
            image: image.to_owned(),
            state: ContainerState::Created,
        })
    }

    /// Starts `container`, delivers `stdin`, waits for exit, and collects
    /// output.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Runtime`] when a lifecycle call fails and
    /// [`EngineError::ExecutionFailed`] when the workload exits non-zero.
    pub async fn run(
        &self,
        container: &mut Container,
        stdin: &[u8],
    ) -> Result<CapturedOutput, EngineError> {
        let id = container.id.clone();
        let runtime_error = |stage: &'static str| {
            let failed = id.clone();
            move |source: RuntimeError| EngineError::Runtime {
                stage,
                container: failed,
                source,
            }
        };

        self.runtime
            .start_container(&id)
            .await
            .map_err(runtime_error("container start"))?;
        container.state = ContainerState::Started;

        if let Err(err) = self.runtime.attach_stdin(&id, stdin).await {
            self.tolerate_attach_failure(&id, err)
                .await
                .map_err(runtime_error("stdin attach"))?;
        }
        container.state = ContainerState::Running;
        debug!(container = %id, bytes = stdin.len(), "stdin delivered");

        let exit_code = self
            .runtime
            .wait_container(&id)
            .await
            .map_err(runtime_error("container wait"))?;
        container.state = ContainerState::Exited(exit_code);
        info!(container = %id, exit_code, "container exited");

        let logs = self.runtime.logs(&id).await;
        if exit_code != 0 {
            let output = logs.unwrap_or_else(|err| {
                debug!(container = %id, error = %err, "log fetch failed after non-zero exit");
                CapturedOutput::default()
            });
            return Err(EngineError::ExecutionFailed { exit_code, output });
        }
        logs.map_err(runtime_error("log fetch"))
    }

    /// An attach can race a workload that exits before reading stdin. That is
    /// fine as long as the container is no longer running.
    async fn tolerate_attach_failure(
        &self,
        id: &str,
        err: RuntimeError,
    ) -> Result<(), RuntimeError> {
        match self.runtime.inspect_container(id).await {
            Ok(status) if !status.is_running() => {
                debug!(container = %id, error = %err, "container finished before stdin attach");
                Ok(())
            }
            _ => Err(err),
        }
    }
}
