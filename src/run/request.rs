//! Execution request and its builder.

use camino::Utf8PathBuf;
use thiserror::Error;

use crate::engine::{BuildOptions, ContainerOptions, DEFAULT_DOCKERFILE, DEFAULT_IMAGE_PREFIX};

/// Everything one execution needs. Moved into [`super::Orchestrator::run`].
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ExecutionRequest<P> {
    /// Image resolution and build parameters.
    pub build: BuildOptions,
    /// Container parameters.
    pub container: ContainerOptions,
    /// Bytes written to the container's stdin before it is closed.
    pub stdin: Vec<u8>,
    /// Host backend; `None` runs on the local runtime daemon.
    pub host: Option<P>,
}

impl<P> ExecutionRequest<P> {
    /// Starts a builder for an [`ExecutionRequest`].
    #[must_use]
    pub fn builder() -> ExecutionRequestBuilder<P> {
        ExecutionRequestBuilder::new()
    }
}

/// Raised when a request is missing a required field or holds a malformed
/// entry.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum RequestError {
    /// A required field is empty.
    #[error("missing or empty field: {0}")]
    Missing(&'static str),
    /// An environment entry lacks `=`.
    #[error("environment entry '{0}' must be KEY=VALUE")]
    Env(String),
    /// A volume entry lacks a destination.
    #[error("volume '{0}' must be SOURCE:DESTINATION[:MODE]")]
    Volume(String),
}

/// Builder for [`ExecutionRequest`] that trims and validates on build.
#[derive(Clone, Debug)]
pub struct ExecutionRequestBuilder<P> {
    image_name: String,
    context_dir: Option<Utf8PathBuf>,
    dockerfile: Option<String>,
    remote_uri: Option<String>,
    image_prefix: Option<String>,
    use_prefix: bool,
    command: Vec<String>,
    env: Vec<String>,
    volumes: Vec<String>,
    stdin: Vec<u8>,
    host: Option<P>,
}

impl<P> Default for ExecutionRequestBuilder<P> {
    fn default() -> Self {
        Self {
            image_name: String::new(),
            context_dir: None,
            dockerfile: None,
            remote_uri: None,
            image_prefix: None,
            use_prefix: true,
            command: Vec::new(),
            env: Vec::new(),
            volumes: Vec::new(),
            stdin: Vec::new(),
            host: None,
        }
    }
}

impl<P> ExecutionRequestBuilder<P> {
    /// Creates an empty builder; the image name must be set before build.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the image name.
    #[must_use]
    pub fn image_name(mut self, value: impl Into<String>) -> Self {
        self.image_name = value.into();
        self
    }

    /// Sets the local build context directory (defaults to `.`).
    #[must_use]
    pub fn context_dir(mut self, value: impl Into<Utf8PathBuf>) -> Self {
        self.context_dir = Some(value.into());
        self
    }

    /// Sets the Dockerfile path (defaults to `Dockerfile`).
    #[must_use]
    pub fn dockerfile(mut self, value: impl Into<String>) -> Self {
        self.dockerfile = Some(value.into());
        self
    }

    /// Builds from a remote URI instead of the local context.
    #[must_use]
    pub fn remote_uri(mut self, value: Option<String>) -> Self {
        self.remote_uri = value;
        self
    }

    /// Replaces the image namespace prefix (defaults to `skiff`).
    #[must_use]
    pub fn image_prefix(mut self, value: impl Into<String>) -> Self {
        self.image_prefix = Some(value.into());
        self
    }

    /// Disables the namespace prefix when `disabled` is `true`.
    #[must_use]
    pub const fn without_prefix(mut self, disabled: bool) -> Self {
        self.use_prefix = !disabled;
        self
    }

    /// Overrides the container command.
    #[must_use]
    pub fn command(mut self, value: Vec<String>) -> Self {
        self.command = value;
        self
    }

    /// Appends a `KEY=VALUE` environment entry.
    #[must_use]
    pub fn env(mut self, value: impl Into<String>) -> Self {
        self.env.push(value.into());
        self
    }

    /// Appends a `source:destination[:mode]` bind mount.
    #[must_use]
    pub fn volume(mut self, value: impl Into<String>) -> Self {
        self.volumes.push(value.into());
        self
    }

    /// Sets the stdin payload.
    #[must_use]
    pub fn stdin(mut self, value: impl Into<Vec<u8>>) -> Self {
        self.stdin = value.into();
        self
    }

    /// Runs on a host from `provisioner` instead of the local daemon.
    #[must_use]
    pub fn host(mut self, provisioner: P) -> Self {
        self.host = Some(provisioner);
        self
    }

    /// Builds and validates the [`ExecutionRequest`], trimming string inputs.
    ///
    /// # Errors
    ///
    /// Returns [`RequestError`] when the image name or dockerfile is empty, or
    /// an environment or volume entry is malformed.
    pub fn build(self) -> Result<ExecutionRequest<P>, RequestError> {
        let image_name = self.image_name.trim().to_owned();
        if image_name.is_empty() {
            return Err(RequestError::Missing("image_name"));
        }

        let mut build = BuildOptions::new(image_name);
        if let Some(dir) = self.context_dir {
            build = build.context_dir(dir);
        }
        let dockerfile = self
            .dockerfile
            .map_or_else(|| DEFAULT_DOCKERFILE.to_owned(), |path| path.trim().to_owned());
        if dockerfile.is_empty() {
            return Err(RequestError::Missing("dockerfile"));
        }
        build = build.dockerfile(dockerfile);
        if let Some(uri) = self
            .remote_uri
            .map(|value| value.trim().to_owned())
            .filter(|value| !value.is_empty())
        {
            build = build.remote_uri(uri);
        }
        build = if self.use_prefix {
            build.image_prefix(
                self.image_prefix
                    .unwrap_or_else(|| DEFAULT_IMAGE_PREFIX.to_owned()),
            )
        } else {
            build.without_prefix()
        };

        for entry in &self.env {
            if !entry.split_once('=').is_some_and(|(key, _)| !key.is_empty()) {
                return Err(RequestError::Env(entry.clone()));
            }
        }
        for entry in &self.volumes {
            if !entry
                .split_once(':')
                .is_some_and(|(source, rest)| !source.is_empty() && !rest.is_empty())
            {
                return Err(RequestError::Volume(entry.clone()));
            }
        }

        Ok(ExecutionRequest {
            build,
            container: ContainerOptions {
                command: self.command,
                env: self.env,
                volumes: self.volumes,
            },
            stdin: self.stdin,
            host: self.host,
        })
    }
}
