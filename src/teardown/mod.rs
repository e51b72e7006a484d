//! Teardown of per-request containers and hosts.
//!
//! Containers are removed with a bounded retry loop because a daemon under
//! load may refuse a kill or removal transiently. Hosts are deleted with a
//! single provider call; backends poll their own asynchronous operations.

use std::time::Duration;

use thiserror::Error;
use tokio::time::sleep;
use tracing::{info, warn};

use crate::host::{Host, Provisioner};
use crate::runtime::{ContainerRuntime, RuntimeError};

/// Container removal attempts before giving up.
pub const TEARDOWN_ATTEMPTS: u32 = 3;

/// Pause between container removal attempts.
pub const TEARDOWN_PAUSE: Duration = Duration::from_secs(3);

/// Raised when a container survives every removal attempt.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
#[error("container {id} still present after {attempts} removal attempts")]
pub struct ContainerNotRemoved {
    /// Container identifier.
    pub id: String,
    /// Attempts made.
    pub attempts: u32,
}

/// Errors raised while releasing a request's resources.
#[derive(Debug, Error)]
pub enum TeardownError<E>
where
    E: std::error::Error + 'static,
{
    /// Raised when the provider refuses to delete the host.
    #[error("failed to delete host {host}: {source}")]
    Host {
        /// Host identifier.
        host: String,
        /// Provider error.
        #[source]
        source: E,
    },
    /// Raised when the container could not be removed.
    #[error(transparent)]
    Container(#[from] ContainerNotRemoved),
    /// Raised when the request created nothing to release.
    #[error("nothing to clean up: no host or container was created")]
    NothingToCleanUp,
}

/// Releases containers and hosts.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct TeardownController {
    attempts: u32,
    pause: Duration,
}

impl Default for TeardownController {
    fn default() -> Self {
        Self::new()
    }
}

impl TeardownController {
    /// Creates a controller with the default attempt budget and pause.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            attempts: TEARDOWN_ATTEMPTS,
            pause: TEARDOWN_PAUSE,
        }
    }

    /// Overrides the number of container removal attempts.
    #[must_use]
    pub const fn with_attempts(mut self, attempts: u32) -> Self {
        self.attempts = attempts;
        self
    }

    /// Overrides the pause between container removal attempts.
    ///
    /// This is primarily used by tests to keep retry scenarios fast.
    #[must_use]
    pub const fn with_pause(mut self, pause: Duration) -> Self {
        self.pause = pause;
        self
    }

    /// Removes container `id`, killing it first when it is still running.
    ///
    /// Each attempt inspects the container. An absent container counts as
    /// removed, so calling this twice is harmless. Kill and removal failures
    /// are logged and retried after the pause.
    ///
    /// # Errors
    ///
    /// Returns [`ContainerNotRemoved`] once every attempt has failed.
    pub async fn remove_container<R>(
        &self,
        runtime: &R,
        id: &str,
    ) -> Result<(), ContainerNotRemoved>
    where
        R: ContainerRuntime + ?Sized,
    {
        for attempt in 1..=self.attempts {
            match runtime.inspect_container(id).await {
                Err(RuntimeError::ContainerNotFound { .. }) => {
                    info!(container = %id, attempt, "container already gone");
                    return Ok(());
                }
                Err(err) => {
                    warn!(container = %id, attempt, error = %err, "container inspect failed");
                }
                Ok(status) => {
                    if status.is_running()
                        && let Err(err) = runtime.kill_container(id).await
                    {
                        warn!(container = %id, attempt, error = %err, "container kill failed");
                    }
                    match runtime.remove_container(id).await {
                        Ok(()) | Err(RuntimeError::ContainerNotFound { .. }) => {
                            info!(container = %id, attempt, "container removed");
                            return Ok(());
                        }
                        Err(err) => {
                            warn!(
                                container = %id,
                                attempt,
                                error = %err,
                                "container removal failed"
                            );
                        }
                    }
                }
            }

            if attempt < self.attempts {
                sleep(self.pause).await;
            }
        }

        Err(ContainerNotRemoved {
            id: id.to_owned(),
            attempts: self.attempts,
        })
    }

    /// Deletes `host` through its provisioner with a single call.
    ///
    /// # Errors
    ///
    /// Returns [`TeardownError::Host`] when the provider call fails.
    pub async fn delete_host<P>(
        &self,
        provisioner: &P,
        host: Host,
    ) -> Result<(), TeardownError<P::Error>>
    where
        P: Provisioner + ?Sized,
    {
        let host_id = host.id.clone();
        let kind = host.kind;
        provisioner
            .delete_machine(host)
            .await
            .map_err(|source| TeardownError::Host {
                host: host_id.clone(),
                source,
            })?;
        info!(host = %host_id, %kind, "host deleted");
        Ok(())
    }
}

#[cfg(test)]
mod tests;
