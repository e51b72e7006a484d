//! Polling for provider operations that complete out-of-band.
//!
//! Cloud APIs acknowledge shutdowns, snapshots, and network attachment
//! immediately and finish the work later. [`Poller`] re-checks such an
//! operation until it reports completion, reports failure, or the deadline
//! passes. The check loop and the deadline race inside one `tokio::select!`;
//! whichever resolves first wins and the other future is dropped, so no check
//! runs after the poll returns.

use std::future::Future;
use std::time::Duration;

use thiserror::Error;
use tokio::time::{Instant, sleep, sleep_until};
use tracing::debug;

/// Timeout for short operations such as power actions and network attachment.
pub const SHORT_TIMEOUT: Duration = Duration::from_secs(120);

/// Timeout for long operations such as snapshot creation.
pub const LONG_TIMEOUT: Duration = Duration::from_secs(600);

/// Delay between consecutive status checks.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(2);

/// Status reported by a single check of an asynchronous operation.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum OperationStatus {
    /// The provider is still working on the operation.
    InProgress,
    /// The operation finished successfully.
    Completed,
    /// The provider gave up on the operation.
    Failed,
}

impl OperationStatus {
    /// Maps a provider action status string onto an [`OperationStatus`].
    ///
    /// `completed` maps to [`Self::Completed`], `errored` and `failed` map to
    /// [`Self::Failed`], and anything else is treated as still in progress.
    #[must_use]
    pub fn from_provider(status: &str) -> Self {
        match status.trim().to_ascii_lowercase().as_str() {
            "completed" => Self::Completed,
            "errored" | "failed" => Self::Failed,
            _ => Self::InProgress,
        }
    }
}

/// Errors returned by [`Poller::poll`].
#[derive(Debug, Error)]
pub enum PollError<E>
where
    E: std::error::Error + 'static,
{
    /// Raised when the deadline elapses before the operation completes.
    #[error("timed out after {}s waiting for {operation}", timeout.as_secs())]
    Timeout {
        /// Operation being waited on.
        operation: String,
        /// Deadline that elapsed.
        timeout: Duration,
    },
    /// Raised when the provider reports the operation as failed.
    #[error("{operation} failed on the provider side")]
    Failed {
        /// Operation being waited on.
        operation: String,
    },
    /// Raised when a status check itself fails. Checks are not retried.
    #[error("status check for {operation} failed: {source}")]
    Check {
        /// Operation being waited on.
        operation: String,
        /// Error returned by the status check.
        #[source]
        source: E,
    },
}

/// Re-checks an asynchronous operation at a fixed interval until a deadline.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct Poller {
    interval: Duration,
    timeout: Duration,
}

impl Poller {
    /// Creates a poller with the given deadline and the default interval.
    #[must_use]
    pub const fn new(timeout: Duration) -> Self {
        Self {
            interval: DEFAULT_POLL_INTERVAL,
            timeout,
        }
    }

    /// Poller for [`SHORT_TIMEOUT`] operations.
    #[must_use]
    pub const fn short() -> Self {
        Self::new(SHORT_TIMEOUT)
    }

    /// Poller for [`LONG_TIMEOUT`] operations.
    #[must_use]
    pub const fn long() -> Self {
        Self::new(LONG_TIMEOUT)
    }

    /// Overrides the interval between checks.
    #[must_use]
    pub const fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    /// Returns the configured deadline.
    #[must_use]
    pub const fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Invokes `check` until it reports [`OperationStatus::Completed`].
    ///
    /// # Errors
    ///
    /// Returns [`PollError::Check`] as soon as a check fails,
    /// [`PollError::Failed`] as soon as the provider reports failure, and
    /// [`PollError::Timeout`] when the deadline passes first.
    pub async fn poll<F, Fut, E>(&self, operation: &str, mut check: F) -> Result<(), PollError<E>>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<OperationStatus, E>>,
        E: std::error::Error + 'static,
    {
        let deadline = Instant::now() + self.timeout;
        let interval = self.interval;
        let checks = async {
            let mut attempt: u32 = 0;
            loop {
                attempt = attempt.saturating_add(1);
                match check().await {
                    Ok(OperationStatus::Completed) => return Ok(()),
                    Ok(OperationStatus::Failed) => {
                        return Err(PollError::Failed {
                            operation: operation.to_owned(),
                        });
                    }
                    Ok(OperationStatus::InProgress) => {
                        debug!(operation, attempt, "operation still in progress");
                        sleep(interval).await;
                    }
                    Err(source) => {
                        return Err(PollError::Check {
                            operation: operation.to_owned(),
                            source,
                        });
                    }
                }
            }
        };

        tokio::select! {
            outcome = checks => outcome,
            () = sleep_until(deadline) => Err(PollError::Timeout {
                operation: operation.to_owned(),
                timeout: self.timeout,
            }),
        }
    }
}
