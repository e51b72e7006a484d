//! Orchestrates one cancellable, cleanup-guaranteed container execution.
//!
//! [`Orchestrator::run`] spawns a task that optionally provisions a host,
//! checks its runtime port is reachable, resolves the image, and runs the
//! container. The task's completion races a caller-supplied cancellation
//! future. Whichever wins, the orchestrator then tears down exactly what the
//! task had created, as recorded in a shared ledger. Output captured before
//! a teardown failure is always returned.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::sync::watch;
use tokio::time::timeout;
use tracing::{debug, error, info, warn};

use crate::engine::{BuildOptions, ContainerOptions, Engine, EngineError};
use crate::host::{Host, Provisioner};
use crate::readiness::{MEDIUM_RETRY, ProbeError, ReadinessProbe};
use crate::runtime::{CapturedOutput, RuntimeConnector, RuntimeEndpoint, RuntimeError};
use crate::teardown::{TeardownController, TeardownError};

mod ledger;
mod request;

/// How long a cancelled run waits for the abandoned task to release what it
/// was still creating. Covers the slowest provider create plus its delete.
pub const DRAIN_TIMEOUT: Duration = Duration::from_secs(900);

use ledger::{Created, Ledger};
pub use request::{ExecutionRequest, ExecutionRequestBuilder, RequestError};

/// Errors surfaced by an execution.
#[derive(Debug, Error)]
pub enum RunError<E>
where
    E: std::error::Error + 'static,
{
    /// Raised when the host backend cannot provision a host.
    #[error("failed to provision host: {0}")]
    Provision(#[source] E),
    /// Raised when the host's runtime port never accepts connections.
    #[error("host runtime endpoint did not become reachable: {0}")]
    Connectivity(#[source] ProbeError),
    /// Raised when the image cannot be built.
    #[error("failed to build image {image}: {source}")]
    ImageBuild {
        /// Namespaced image tag.
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
    /// Raised when the workload exits non-zero.
    #[error("container exited with status {exit_code}")]
    ExecutionFailed {
        /// Exit code reported by the runtime.
        exit_code: i64,
    },
    /// Raised when any other runtime call fails.
    #[error("{stage} failed: {source}")]
    Runtime {
        /// Stage that failed.
        stage: &'static str,
        /// Runtime error.
        #[source]
        source: RuntimeError,
    },
    /// Raised when cancellation won the race with completion.
    #[error("execution cancelled")]
    Cancelled,
    /// Raised when the execution task panicked.
    #[error("execution task aborted: {0}")]
    Aborted(String),
    /// Raised when teardown fails and nothing else went wrong.
    #[error("teardown failed: {0}")]
    Teardown(#[source] TeardownError<E>),
}

impl<E> RunError<E>
where
    E: std::error::Error + 'static,
{
    /// Returns the workload exit code for [`RunError::ExecutionFailed`].
    #[must_use]
    pub const fn exit_code(&self) -> Option<i64> {
        match self {
            Self::ExecutionFailed { exit_code } => Some(*exit_code),
            _ => None,
        }
    }
}

/// Outcome of [`Orchestrator::run`].
#[derive(Debug)]
pub struct ExecutionResult<E>
where
    E: std::error::Error + 'static,
{
    /// Captured standard output, possibly empty.
    pub stdout: String,
    /// Captured standard error, possibly empty.
    pub stderr: String,
    /// First substantive error, if any.
    pub error: Option<RunError<E>>,
    /// Teardown failure that occurred alongside an earlier error.
    pub teardown_error: Option<TeardownError<E>>,
}

impl<E> ExecutionResult<E>
where
    E: std::error::Error + 'static,
{
    /// Returns `true` when the workload ran and everything was released.
    #[must_use]
    pub const fn is_success(&self) -> bool {
        self.error.is_none()
    }
}

/// Error plus whatever output was captured before it.
struct Failure<E>
where
    E: std::error::Error + 'static,
{
    error: RunError<E>,
    output: CapturedOutput,
}

impl<E> From<RunError<E>> for Failure<E>
where
    E: std::error::Error + 'static,
{
    fn from(error: RunError<E>) -> Self {
        Self {
            error,
            output: CapturedOutput::default(),
        }
    }
}

impl<E> From<EngineError> for Failure<E>
where
    E: std::error::Error + 'static,
{
    fn from(value: EngineError) -> Self {
        match value {
            EngineError::ExecutionFailed { exit_code, output } => Self {
                error: RunError::ExecutionFailed { exit_code },
                output,
            },
            EngineError::ImageLookup { source, .. } => RunError::Runtime {
                stage: "image lookup",
                source,
            }
            .into(),
            EngineError::ImageBuild { image, source } => {
                RunError::ImageBuild { image, source }.into()
            }
            EngineError::ContainerCreate { image, source } => {
                RunError::ContainerCreate { image, source }.into()
            }
            EngineError::Runtime { stage, source, .. } => {
                RunError::Runtime { stage, source }.into()
            }
        }
    }
}

/// Runs execution requests against runtimes produced by a connector.
#[derive(Debug)]
pub struct Orchestrator<C> {
    connector: Arc<C>,
    local_endpoint: RuntimeEndpoint,
    probe: ReadinessProbe,
    readiness_attempts: u32,
    teardown: TeardownController,
    drain_timeout: Duration,
}

impl<C> Orchestrator<C>
where
    C: RuntimeConnector + 'static,
{
    /// Creates an orchestrator that reaches the local daemon through the
    /// platform default socket.
    #[must_use]
    pub fn new(connector: C) -> Self {
        Self {
            connector: Arc::new(connector),
            local_endpoint: RuntimeEndpoint::LocalDefault,
            probe: ReadinessProbe::new(),
            readiness_attempts: MEDIUM_RETRY,
            teardown: TeardownController::new(),
            drain_timeout: DRAIN_TIMEOUT,
        }
    }

    /// Overrides the endpoint used when no host is provisioned.
    #[must_use]
    pub fn with_local_endpoint(mut self, endpoint: RuntimeEndpoint) -> Self {
        self.local_endpoint = endpoint;
        self
    }

    /// Overrides the readiness probe timings.
    #[must_use]
    pub const fn with_probe(mut self, probe: ReadinessProbe) -> Self {
        self.probe = probe;
        self
    }

    /// Overrides the readiness attempt budget.
    #[must_use]
    pub const fn with_readiness_attempts(mut self, attempts: u32) -> Self {
        self.readiness_attempts = attempts;
        self
    }

    /// Overrides container teardown retries.
    ///
    /// This is primarily used by tests to keep retry scenarios fast.
    #[must_use]
    pub const fn with_teardown(mut self, teardown: TeardownController) -> Self {
        self.teardown = teardown;
        self
    }

    /// Overrides how long a cancelled run waits for the abandoned task.
    #[must_use]
    pub const fn with_drain_timeout(mut self, drain_timeout: Duration) -> Self {
        self.drain_timeout = drain_timeout;
        self
    }

    /// Executes `request`, abandoning it when `cancel` resolves first.
    ///
    /// Teardown always runs after the race. A cancelled execution reports
    /// [`RunError::Cancelled`]; an in-flight provider or runtime call is left
    /// to finish on its own, and anything it creates afterwards is released
    /// by the abandoned task. `run` does not return until that task has
    /// finished or the drain timeout has passed, so dropping the async
    /// runtime afterwards cannot interrupt its cleanup.
    pub async fn run<P, F>(
        &self,
        request: ExecutionRequest<P>,
        cancel: F,
    ) -> ExecutionResult<P::Error>
    where
        P: Provisioner + 'static,
        F: Future<Output = ()>,
    {
        let ExecutionRequest {
            build,
            container,
            stdin,
            host,
        } = request;
        let provisioner = host.map(Arc::new);
        let ledger = Arc::new(Ledger::new());
        let (stop_tx, stop_rx) = watch::channel(false);

        let task = ExecutionTask {
            connector: Arc::clone(&self.connector),
            provisioner: provisioner.clone(),
            ledger: Arc::clone(&ledger),
            stop: stop_rx,
            local_endpoint: self.local_endpoint.clone(),
            probe: self.probe,
            readiness_attempts: self.readiness_attempts,
            teardown: self.teardown,
            build,
            container,
            stdin,
        };
        let mut handle = tokio::spawn(task.execute());
        let mut abandoned = false;

        let (output, primary) = tokio::select! {
            biased;
            joined = &mut handle => match joined {
                Ok(outcome) => outcome,
                Err(err) => (
                    CapturedOutput::default(),
                    Some(RunError::Aborted(err.to_string())),
                ),
            },
            () = cancel => {
                info!("cancellation requested; abandoning execution");
                if stop_tx.send(true).is_err() {
                    debug!("execution task already finished");
                }
                abandoned = true;
                (CapturedOutput::default(), Some(RunError::Cancelled))
            }
        };

        let created = ledger.seal();
        let teardown = self.tear_down(provisioner.as_deref(), created).await;
        if abandoned {
            self.drain(handle).await;
        }
        assemble(output, primary, teardown)
    }

    async fn drain<T>(&self, mut handle: tokio::task::JoinHandle<T>) {
        if handle.is_finished() {
            return;
        }
        info!(
            timeout_secs = self.drain_timeout.as_secs(),
            "waiting for the abandoned execution to release what it created"
        );
        match timeout(self.drain_timeout, &mut handle).await {
            Ok(Ok(_)) => debug!("abandoned execution finished"),
            Ok(Err(err)) => warn!(error = %err, "abandoned execution aborted"),
            Err(_) => {
                handle.abort();
                warn!(
                    timeout_secs = self.drain_timeout.as_secs(),
                    "abandoned execution did not finish; a host it was creating may remain"
                );
            }
        }
    }

    async fn tear_down<P>(
        &self,
        provisioner: Option<&P>,
        created: Created<C::Runtime>,
    ) -> Result<(), TeardownError<P::Error>>
    where
        P: Provisioner,
    {
        let Created {
            runtime,
            host,
            container,
        } = created;

        if let (Some(recorded), Some(backend)) = (host, provisioner) {
            let container_result = match (&runtime, &container) {
                (Some(client), Some(id)) if !backend.disposes_containers() => {
                    self.teardown.remove_container(client, id).await
                }
                _ => Ok(()),
            };
            let host_result = self.teardown.delete_host(backend, recorded).await;
            return host_result.and(container_result.map_err(TeardownError::from));
        }

        match (runtime, container) {
            (Some(client), Some(id)) => self
                .teardown
                .remove_container(&client, &id)
                .await
                .map_err(TeardownError::from),
            _ => Err(TeardownError::NothingToCleanUp),
        }
    }
}

fn assemble<E>(
    output: CapturedOutput,
    primary: Option<RunError<E>>,
    teardown: Result<(), TeardownError<E>>,
) -> ExecutionResult<E>
where
    E: std::error::Error + 'static,
{
    let (run_error, teardown_error) = match (primary, teardown) {
        (primary_error, Ok(())) => (primary_error, None),
        (None, Err(err)) => {
            error!(error = %err, "teardown failed");
            (Some(RunError::Teardown(err)), None)
        }
        (Some(primary_error), Err(TeardownError::NothingToCleanUp)) => {
            debug!(error = %primary_error, "nothing was created before the failure");
            (Some(primary_error), None)
        }
        (Some(primary_error), Err(err)) => {
            error!(
                error = %err,
                primary = %primary_error,
                "teardown failed after an earlier error"
            );
            (Some(primary_error), Some(err))
        }
    };

    ExecutionResult {
        stdout: output.stdout,
        stderr: output.stderr,
        error: run_error,
        teardown_error,
    }
}

/// Provisioning-through-execution sequence run on its own task.
struct ExecutionTask<C, P>
where
    C: RuntimeConnector,
{
    connector: Arc<C>,
    provisioner: Option<Arc<P>>,
    ledger: Arc<Ledger<C::Runtime>>,
    stop: watch::Receiver<bool>,
    local_endpoint: RuntimeEndpoint,
    probe: ReadinessProbe,
    readiness_attempts: u32,
    teardown: TeardownController,
    build: BuildOptions,
    container: ContainerOptions,
    stdin: Vec<u8>,
}

impl<C, P> ExecutionTask<C, P>
where
    C: RuntimeConnector + 'static,
    P: Provisioner + 'static,
{
    async fn execute(self) -> (CapturedOutput, Option<RunError<P::Error>>) {
        match self.drive().await {
            Ok(output) => (output, None),
            Err(Failure { error, output }) => (output, Some(error)),
        }
    }

    fn ensure_not_stopped(&self) -> Result<(), RunError<P::Error>> {
        if *self.stop.borrow() {
            return Err(RunError::Cancelled);
        }
        Ok(())
    }

    async fn drive(&self) -> Result<CapturedOutput, Failure<P::Error>> {
        let runtime = match &self.provisioner {
            Some(provisioner) => self.provision(provisioner).await?,
            None => self.connect(&self.local_endpoint)?,
        };

        self.ensure_not_stopped()?;
        let engine = Engine::new(&runtime);
        let image = engine.resolve_image(&self.build).await?;

        self.ensure_not_stopped()?;
        let mut container = engine.create_container(&image, &self.container).await?;
        if !self.ledger.record_container(&container.id) {
            if let Err(err) = self.teardown.remove_container(&runtime, &container.id).await {
                warn!(container = %container.id, error = %err, "late container not removed");
            }
            return Err(RunError::Cancelled.into());
        }

        self.ensure_not_stopped()?;
        Ok(engine.run(&mut container, &self.stdin).await?)
    }

    async fn provision(&self, provisioner: &P) -> Result<C::Runtime, RunError<P::Error>> {
        self.ensure_not_stopped()?;
        let host = provisioner
            .create_machine()
            .await
            .map_err(RunError::Provision)?;
        info!(host = %host.address, kind = %host.kind, "host provisioned");

        let remote = host.is_remote();
        let address = host.runtime_address();
        let endpoint = if remote {
            host.runtime_endpoint()
        } else {
            self.local_endpoint.clone()
        };
        if let Some(refused) = self.ledger.record_host(host) {
            self.discard_host(provisioner, refused).await;
            return Err(RunError::Cancelled);
        }

        self.ensure_not_stopped()?;
        if remote {
            self.probe
                .probe(&address, self.readiness_attempts)
                .await
                .map_err(RunError::Connectivity)?;
        }

        self.ensure_not_stopped()?;
        self.connect(&endpoint)
    }

    async fn discard_host(&self, provisioner: &P, host: Host) {
        let host_id = host.id.clone();
        if let Err(err) = self.teardown.delete_host(provisioner, host).await {
            warn!(host = %host_id, error = %err, "late host not deleted");
        }
    }

    fn connect(&self, endpoint: &RuntimeEndpoint) -> Result<C::Runtime, RunError<P::Error>> {
        let runtime = self
            .connector
            .connect(endpoint)
            .map_err(|source| RunError::Runtime {
                stage: "runtime connect",
                source,
            })?;
        self.ledger.record_runtime(runtime.clone());
        Ok(runtime)
    }
}

#[cfg(test)]
mod tests;
