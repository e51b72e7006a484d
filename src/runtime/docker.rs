//! Docker Engine API client built on `bollard`.

use std::collections::HashMap;

use bollard::container::{
    AttachContainerOptions, AttachContainerResults, Config, CreateContainerOptions,
    InspectContainerOptions, KillContainerOptions, LogOutput, LogsOptions, RemoveContainerOptions,
    StartContainerOptions, WaitContainerOptions,
};
use bollard::errors::Error as DockerError;
use bollard::image::{BuildImageOptions, ListImagesOptions};
use bollard::models::HostConfig;
use bollard::{API_DEFAULT_VERSION, Docker};
use camino::Utf8Path;
use futures::StreamExt;
use tokio::io::AsyncWriteExt;
use tracing::debug;

use super::{
    BuildSource, BuildSpec, CapturedOutput, ContainerRuntime, ContainerSpec, ContainerStatus,
    ImageSummary, RuntimeConnector, RuntimeEndpoint, RuntimeError, RuntimeFuture,
};

/// Default client timeout, in seconds, for runtime API requests.
pub const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 120;

const NOT_FOUND: u16 = 404;

/// Creates [`DockerRuntime`] clients for local, TCP, and TLS endpoints.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct DockerConnector {
    timeout_secs: u64,
}

impl Default for DockerConnector {
    fn default() -> Self {
        Self::new(DEFAULT_CONNECT_TIMEOUT_SECS)
    }
}

impl DockerConnector {
    /// Creates a connector whose clients time out requests after
    /// `timeout_secs`.
    #[must_use]
    pub const fn new(timeout_secs: u64) -> Self {
        Self { timeout_secs }
    }
}

impl RuntimeConnector for DockerConnector {
    type Runtime = DockerRuntime;

    fn connect(&self, endpoint: &RuntimeEndpoint) -> Result<DockerRuntime, RuntimeError> {
        let connected = match endpoint {
            RuntimeEndpoint::LocalDefault => Docker::connect_with_local_defaults(),
            RuntimeEndpoint::Tcp { address } => Docker::connect_with_http(
                &format!("tcp://{address}"),
                self.timeout_secs,
                API_DEFAULT_VERSION,
            ),
            RuntimeEndpoint::Tls { address, certs_dir } => Docker::connect_with_ssl(
                &format!("tcp://{address}"),
                certs_dir.join("key.pem").as_std_path(),
                certs_dir.join("cert.pem").as_std_path(),
                certs_dir.join("ca.pem").as_std_path(),
                self.timeout_secs,
                API_DEFAULT_VERSION,
            ),
        };

        let docker = connected.map_err(|err| RuntimeError::Connect {
            endpoint: endpoint.to_string(),
            message: err.to_string(),
        })?;
        debug!(%endpoint, "runtime client configured");
        Ok(DockerRuntime { docker })
    }
}

/// [`ContainerRuntime`] backed by a Docker Engine daemon.
#[derive(Clone, Debug)]
pub struct DockerRuntime {
    docker: Docker,
}

impl DockerRuntime {
    /// Wraps an existing `bollard` client.
    #[must_use]
    pub const fn from_client(docker: Docker) -> Self {
        Self { docker }
    }
}

fn request_error(operation: &'static str, err: &DockerError) -> RuntimeError {
    RuntimeError::Request {
        operation,
        message: err.to_string(),
    }
}

fn container_error(operation: &'static str, id: &str, err: &DockerError) -> RuntimeError {
    if matches!(
        err,
        DockerError::DockerResponseServerError {
            status_code: NOT_FOUND,
            ..
        }
    ) {
        return RuntimeError::ContainerNotFound { id: id.to_owned() };
    }
    request_error(operation, err)
}

fn archive_context(directory: &Utf8Path, tag: &str) -> Result<Vec<u8>, RuntimeError> {
    let archive_error = |err: std::io::Error| RuntimeError::Build {
        tag: tag.to_owned(),
        message: format!("failed to archive build context {directory}: {err}"),
    };
    let mut builder = tar::Builder::new(Vec::new());
    builder.append_dir_all(".", directory).map_err(archive_error)?;
    builder.into_inner().map_err(archive_error)
}

fn non_empty(values: &[String]) -> Option<Vec<String>> {
    if values.is_empty() {
        None
    } else {
        Some(values.to_vec())
    }
}

impl ContainerRuntime for DockerRuntime {
    fn find_image<'a>(&'a self, reference: &'a str) -> RuntimeFuture<'a, ImageSummary> {
        Box::pin(async move {
            let mut filters = HashMap::new();
            filters.insert(String::from("reference"), vec![reference.to_owned()]);
            let images = self
                .docker
                .list_images(Some(ListImagesOptions::<String> {
                    filters,
                    ..Default::default()
                }))
                .await
                .map_err(|err| request_error("image lookup", &err))?;

            images
                .into_iter()
                .next()
                .map(|image| ImageSummary {
                    id: image.id,
                    tags: image.repo_tags,
                })
                .ok_or_else(|| RuntimeError::ImageNotFound {
                    image: reference.to_owned(),
                })
        })
    }

    fn build_image<'a>(&'a self, spec: &'a BuildSpec) -> RuntimeFuture<'a, String> {
        Box::pin(async move {
            let (options, body) = match &spec.source {
                BuildSource::Context {
                    directory,
                    dockerfile,
                } => (
                    BuildImageOptions {
                        dockerfile: dockerfile.clone(),
                        t: spec.tag.clone(),
                        rm: true,
                        ..Default::default()
                    },
                    Some(archive_context(directory, &spec.tag)?),
                ),
                BuildSource::Remote { uri, dockerfile } => (
                    BuildImageOptions {
                        dockerfile: dockerfile.clone(),
                        t: spec.tag.clone(),
                        remote: uri.clone(),
                        rm: true,
                        ..Default::default()
                    },
                    None,
                ),
            };

            let mut stream = self
                .docker
                .build_image(options, None, body.map(Into::into));
            while let Some(item) = stream.next().await {
                let info = item.map_err(|err| RuntimeError::Build {
                    tag: spec.tag.clone(),
                    message: err.to_string(),
                })?;
                if let Some(message) = info.error {
                    return Err(RuntimeError::Build {
                        tag: spec.tag.clone(),
                        message,
                    });
                }
                if let Some(line) = info.stream.as_deref().map(str::trim)
                    && !line.is_empty()
                {
                    debug!(tag = %spec.tag, "{line}");
                }
            }
            Ok(spec.tag.clone())
        })
    }

    fn create_container<'a>(&'a self, spec: &'a ContainerSpec) -> RuntimeFuture<'a, String> {
        Box::pin(async move {
            let options = CreateContainerOptions {
                name: spec.name.clone(),
                platform: None,
            };
            let config = Config {
                image: Some(spec.image.clone()),
                cmd: non_empty(&spec.command),
                env: non_empty(&spec.env),
                attach_stdin: Some(true),
                attach_stdout: Some(true),
                attach_stderr: Some(true),
                open_stdin: Some(true),
                stdin_once: Some(true),
                host_config: Some(HostConfig {
                    binds: non_empty(&spec.binds),
                    ..Default::default()
                }),
                ..Default::default()
            };

            let response = self
                .docker
                .create_container(Some(options), config)
                .await
                .map_err(|err| request_error("container create", &err))?;
            for warning in &response.warnings {
                debug!(container = %spec.name, %warning, "runtime warning on create");
            }
            Ok(response.id)
        })
    }

    fn start_container<'a>(&'a self, id: &'a str) -> RuntimeFuture<'a, ()> {
        Box::pin(async move {
            self.docker
                .start_container(id, None::<StartContainerOptions<String>>)
                .await
                .map_err(|err| container_error("container start", id, &err))
        })
    }

    fn attach_stdin<'a>(&'a self, id: &'a str, payload: &'a [u8]) -> RuntimeFuture<'a, ()> {
        Box::pin(async move {
            let options = AttachContainerOptions::<String> {
                stdin: Some(true),
                stream: Some(true),
                ..Default::default()
            };
            let AttachContainerResults { mut input, .. } = self
                .docker
                .attach_container(id, Some(options))
                .await
                .map_err(|err| container_error("stdin attach", id, &err))?;

            let write_error = |err: std::io::Error| RuntimeError::Request {
                operation: "stdin write",
                message: err.to_string(),
            };
            input.write_all(payload).await.map_err(write_error)?;
            input.shutdown().await.map_err(write_error)
        })
    }

    fn wait_container<'a>(&'a self, id: &'a str) -> RuntimeFuture<'a, i64> {
        Box::pin(async move {
            let mut stream = self.docker.wait_container(
                id,
                Some(WaitContainerOptions {
                    condition: "not-running",
                }),
            );
            match stream.next().await {
                Some(Ok(response)) => Ok(response.status_code),
                // bollard surfaces a non-zero exit as an error carrying the code.
                Some(Err(DockerError::DockerContainerWaitError { code, .. })) => Ok(code),
                Some(Err(err)) => Err(container_error("container wait", id, &err)),
                None => Err(RuntimeError::Request {
                    operation: "container wait",
                    message: String::from("wait stream ended without an exit status"),
                }),
            }
        })
    }

    fn logs<'a>(&'a self, id: &'a str) -> RuntimeFuture<'a, CapturedOutput> {
        Box::pin(async move {
            let options = LogsOptions::<String> {
                stdout: true,
                stderr: true,
                follow: false,
                ..Default::default()
            };
            let mut stream = self.docker.logs(id, Some(options));
            let mut output = CapturedOutput::default();
            while let Some(chunk) = stream.next().await {
                match chunk.map_err(|err| container_error("log fetch", id, &err))? {
                    LogOutput::StdErr { message } => {
                        output.stderr.push_str(&String::from_utf8_lossy(&message));
                    }
                    LogOutput::StdOut { message } | LogOutput::Console { message } => {
                        output.stdout.push_str(&String::from_utf8_lossy(&message));
                    }
                    LogOutput::StdIn { .. } => {}
                }
            }
            Ok(output)
        })
    }

    fn inspect_container<'a>(&'a self, id: &'a str) -> RuntimeFuture<'a, ContainerStatus> {
        Box::pin(async move {
            let info = self
                .docker
                .inspect_container(id, None::<InspectContainerOptions>)
                .await
                .map_err(|err| container_error("container inspect", id, &err))?;
            let status = info
                .state
                .and_then(|state| state.status)
                .map_or_else(String::new, |status| status.to_string());
            Ok(ContainerStatus::parse(&status))
        })
    }

    fn kill_container<'a>(&'a self, id: &'a str) -> RuntimeFuture<'a, ()> {
        Box::pin(async move {
            self.docker
                .kill_container(id, None::<KillContainerOptions<String>>)
                .await
                .map_err(|err| container_error("container kill", id, &err))
        })
    }

    fn remove_container<'a>(&'a self, id: &'a str) -> RuntimeFuture<'a, ()> {
        Box::pin(async move {
            self.docker
                .remove_container(
                    id,
                    Some(RemoveContainerOptions {
                        force: true,
                        ..Default::default()
                    }),
                )
                .await
                .map_err(|err| container_error("container remove", id, &err))
        })
    }
}
