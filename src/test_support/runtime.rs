//! In-memory container runtime.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::time::sleep;

use crate::runtime::{
    BuildSpec, CapturedOutput, ContainerRuntime, ContainerSpec, ContainerStatus, ImageSummary,
    RuntimeConnector, RuntimeEndpoint, RuntimeError, RuntimeFuture,
};

/// Exit code reported for containers stopped by a kill.
const KILLED_EXIT_CODE: i64 = 137;

/// How often a held container checks whether it has been killed.
const HOLD_POLL: Duration = Duration::from_millis(10);

/// One call observed by [`FakeRuntime`].
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum RuntimeCall {
    /// A client was requested for the endpoint.
    Connect(RuntimeEndpoint),
    /// Image lookup by reference.
    FindImage(String),
    /// Image build.
    BuildImage(BuildSpec),
    /// Container creation.
    CreateContainer(ContainerSpec),
    /// Container start.
    Start(String),
    /// Stdin attach with the delivered payload.
    AttachStdin(String, Vec<u8>),
    /// Wait for exit.
    Wait(String),
    /// Log fetch.
    Logs(String),
    /// Status inspection.
    Inspect(String),
    /// Kill.
    Kill(String),
    /// Forced removal.
    Remove(String),
}

#[derive(Debug, Default)]
struct FakeState {
    images: BTreeSet<String>,
    containers: BTreeMap<String, ContainerStatus>,
    killed: BTreeSet<String>,
    next_id: u32,
    calls: Vec<RuntimeCall>,
    connect_failure: Option<String>,
    lookup_failure: Option<String>,
    build_failure: Option<String>,
    build_delay: Option<Duration>,
    create_failure: Option<String>,
    attach_failure: Option<String>,
    logs_failure: Option<String>,
    remove_failures: u32,
    hold_until_killed: bool,
    exit_code: i64,
    output: CapturedOutput,
}

/// Runtime double that keeps images and containers in memory.
///
/// Clones share state, so a test can keep one handle for assertions while
/// another is moved into the orchestrator. The fake also acts as its own
/// [`RuntimeConnector`].
#[derive(Clone, Debug, Default)]
pub struct FakeRuntime {
    state: Arc<Mutex<FakeState>>,
}

fn request_error(operation: &'static str, message: &str) -> RuntimeError {
    RuntimeError::Request {
        operation,
        message: message.to_owned(),
    }
}

impl FakeRuntime {
    /// Creates a runtime with no images whose containers exit 0 silently.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, FakeState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn record(&self, call: RuntimeCall) -> MutexGuard<'_, FakeState> {
        let mut state = self.state();
        state.calls.push(call);
        state
    }

    /// Seeds an existing image.
    #[must_use]
    pub fn with_image(self, tag: &str) -> Self {
        self.state().images.insert(tag.to_owned());
        self
    }

    /// Sets the exit code and output of every container.
    #[must_use]
    pub fn with_exit(self, exit_code: i64, stdout: &str, stderr: &str) -> Self {
        {
            let mut state = self.state();
            state.exit_code = exit_code;
            state.output = CapturedOutput {
                stdout: stdout.to_owned(),
                stderr: stderr.to_owned(),
            };
        }
        self
    }

    /// Makes every connect call fail.
    #[must_use]
    pub fn failing_connect(self, message: &str) -> Self {
        self.state().connect_failure = Some(message.to_owned());
        self
    }

    /// Makes image lookups fail with a non-absence error.
    #[must_use]
    pub fn failing_lookup(self, message: &str) -> Self {
        self.state().lookup_failure = Some(message.to_owned());
        self
    }

    /// Makes image builds fail.
    #[must_use]
    pub fn failing_build(self, message: &str) -> Self {
        self.state().build_failure = Some(message.to_owned());
        self
    }

    /// Delays image builds.
    #[must_use]
    pub fn slow_build(self, delay: Duration) -> Self {
        self.state().build_delay = Some(delay);
        self
    }

    /// Makes container creation fail.
    #[must_use]
    pub fn failing_create(self, message: &str) -> Self {
        self.state().create_failure = Some(message.to_owned());
        self
    }

    /// Makes stdin attach fail.
    #[must_use]
    pub fn failing_attach(self, message: &str) -> Self {
        self.state().attach_failure = Some(message.to_owned());
        self
    }

    /// Makes log fetches fail.
    #[must_use]
    pub fn failing_logs(self, message: &str) -> Self {
        self.state().logs_failure = Some(message.to_owned());
        self
    }

    /// Makes the next `count` removals fail.
    #[must_use]
    pub fn failing_removals(self, count: u32) -> Self {
        self.state().remove_failures = count;
        self
    }

    /// Keeps containers running until they are killed.
    #[must_use]
    pub fn hold_until_killed(self) -> Self {
        self.state().hold_until_killed = true;
        self
    }

    /// Returns every call observed so far.
    #[must_use]
    pub fn calls(&self) -> Vec<RuntimeCall> {
        self.state().calls.clone()
    }

    /// Returns how many calls matched `predicate`.
    pub fn count_calls(&self, predicate: impl Fn(&RuntimeCall) -> bool) -> usize {
        self.state().calls.iter().filter(|call| predicate(call)).count()
    }

    /// Returns the identifiers of containers that still exist.
    #[must_use]
    pub fn containers(&self) -> Vec<String> {
        self.state().containers.keys().cloned().collect()
    }

    /// Returns `true` when `tag` is present.
    #[must_use]
    pub fn has_image(&self, tag: &str) -> bool {
        self.state().images.contains(tag)
    }

    /// Returns the status of container `id`, if it exists.
    #[must_use]
    pub fn status(&self, id: &str) -> Option<ContainerStatus> {
        self.state().containers.get(id).cloned()
    }

    /// Waits until a container has been created and returns its identifier.
    pub async fn wait_for_container(&self) -> String {
        loop {
            if let Some(id) = self.state().containers.keys().next().cloned() {
                return id;
            }
            sleep(HOLD_POLL).await;
        }
    }

    fn exit_status(&self, id: &str) -> Option<i64> {
        let mut state = self.state();
        if state.killed.contains(id) {
            return Some(KILLED_EXIT_CODE);
        }
        if state.hold_until_killed && state.containers.contains_key(id) {
            return None;
        }
        let exit_code = state.exit_code;
        if let Some(status) = state.containers.get_mut(id) {
            *status = ContainerStatus::Exited;
        }
        Some(exit_code)
    }
}

impl RuntimeConnector for FakeRuntime {
    type Runtime = Self;

    fn connect(&self, endpoint: &RuntimeEndpoint) -> Result<Self::Runtime, RuntimeError> {
        let state = self.record(RuntimeCall::Connect(endpoint.clone()));
        match &state.connect_failure {
            Some(message) => Err(RuntimeError::Connect {
                endpoint: endpoint.to_string(),
                message: message.clone(),
            }),
            None => Ok(self.clone()),
        }
    }
}

impl ContainerRuntime for FakeRuntime {
    fn find_image<'a>(&'a self, reference: &'a str) -> RuntimeFuture<'a, ImageSummary> {
        Box::pin(async move {
            let state = self.record(RuntimeCall::FindImage(reference.to_owned()));
            if let Some(message) = &state.lookup_failure {
                return Err(request_error("image lookup", message));
            }
            if state.images.contains(reference) {
                Ok(ImageSummary {
                    id: format!("sha256:{reference}"),
                    tags: vec![reference.to_owned()],
                })
            } else {
                Err(RuntimeError::ImageNotFound {
                    image: reference.to_owned(),
                })
            }
        })
    }

    fn build_image<'a>(&'a self, spec: &'a BuildSpec) -> RuntimeFuture<'a, String> {
        Box::pin(async move {
            let delay = self.record(RuntimeCall::BuildImage(spec.clone())).build_delay;
            if let Some(pause) = delay {
                sleep(pause).await;
            }
            let mut state = self.state();
            if let Some(message) = &state.build_failure {
                return Err(RuntimeError::Build {
                    tag: spec.tag.clone(),
                    message: message.clone(),
                });
            }
            state.images.insert(spec.tag.clone());
            Ok(spec.tag.clone())
        })
    }

    fn create_container<'a>(&'a self, spec: &'a ContainerSpec) -> RuntimeFuture<'a, String> {
        Box::pin(async move {
            let mut state = self.record(RuntimeCall::CreateContainer(spec.clone()));
            if let Some(message) = &state.create_failure {
                return Err(request_error("container create", message));
            }
            state.next_id += 1;
            let id = format!("fake-{}", state.next_id);
            state.containers.insert(id.clone(), ContainerStatus::Created);
            Ok(id)
        })
    }

    fn start_container<'a>(&'a self, id: &'a str) -> RuntimeFuture<'a, ()> {
        Box::pin(async move {
            let mut state = self.record(RuntimeCall::Start(id.to_owned()));
            match state.containers.get_mut(id) {
                Some(status) => {
                    *status = ContainerStatus::Running;
                    Ok(())
                }
                None => Err(RuntimeError::ContainerNotFound { id: id.to_owned() }),
            }
        })
    }

    fn attach_stdin<'a>(&'a self, id: &'a str, payload: &'a [u8]) -> RuntimeFuture<'a, ()> {
        Box::pin(async move {
            let state = self.record(RuntimeCall::AttachStdin(id.to_owned(), payload.to_vec()));
            match &state.attach_failure {
                Some(message) => Err(request_error("stdin attach", message)),
                None => Ok(()),
            }
        })
    }

    fn wait_container<'a>(&'a self, id: &'a str) -> RuntimeFuture<'a, i64> {
        Box::pin(async move {
            drop(self.record(RuntimeCall::Wait(id.to_owned())));
            loop {
                if let Some(code) = self.exit_status(id) {
                    return Ok(code);
                }
                sleep(HOLD_POLL).await;
            }
        })
    }

    fn logs<'a>(&'a self, id: &'a str) -> RuntimeFuture<'a, CapturedOutput> {
        Box::pin(async move {
            let state = self.record(RuntimeCall::Logs(id.to_owned()));
            match &state.logs_failure {
                Some(message) => Err(request_error("log fetch", message)),
                None => Ok(state.output.clone()),
            }
        })
    }

    fn inspect_container<'a>(&'a self, id: &'a str) -> RuntimeFuture<'a, ContainerStatus> {
        Box::pin(async move {
            let state = self.record(RuntimeCall::Inspect(id.to_owned()));
            state
                .containers
                .get(id)
                .cloned()
                .ok_or_else(|| RuntimeError::ContainerNotFound { id: id.to_owned() })
        })
    }

    fn kill_container<'a>(&'a self, id: &'a str) -> RuntimeFuture<'a, ()> {
        Box::pin(async move {
            let mut guard = self.record(RuntimeCall::Kill(id.to_owned()));
            let state = &mut *guard;
            match state.containers.get_mut(id) {
                Some(status) if status.is_running() => {
                    *status = ContainerStatus::Exited;
                    state.killed.insert(id.to_owned());
                    Ok(())
                }
                Some(_) => Err(request_error("container kill", "container is not running")),
                None => Err(RuntimeError::ContainerNotFound { id: id.to_owned() }),
            }
        })
    }

    fn remove_container<'a>(&'a self, id: &'a str) -> RuntimeFuture<'a, ()> {
        Box::pin(async move {
            let mut state = self.record(RuntimeCall::Remove(id.to_owned()));
            if state.remove_failures > 0 {
                state.remove_failures -= 1;
                return Err(request_error("container remove", "daemon busy"));
            }
            if state.containers.remove(id).is_none() {
                return Err(RuntimeError::ContainerNotFound { id: id.to_owned() });
            }
            if state.hold_until_killed {
                state.killed.insert(id.to_owned());
            }
            Ok(())
        })
    }
}
