//! Bounded TCP reachability checks for freshly provisioned hosts.
//!
//! A host reported as "running" by its provider often refuses connections for
//! a while longer. [`ReadinessProbe::probe`] retries a short connection
//! attempt until one succeeds or the attempt budget runs out.

use std::time::Duration;

use thiserror::Error;
use tokio::net::TcpStream;
use tokio::time::{sleep, timeout};
use tracing::debug;

/// Upper bound on a single connection attempt.
pub const CONNECT_TIMEOUT: Duration = Duration::from_millis(500);

/// Pause between failed attempts.
pub const RETRY_INTERVAL: Duration = Duration::from_millis(250);

/// Attempt budget used while a remote runtime daemon comes up.
pub const MEDIUM_RETRY: u32 = 240;

/// Errors raised by [`ReadinessProbe::probe`].
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum ProbeError {
    /// Raised when every attempt failed.
    #[error("{address} unreachable after {attempts} attempts: {last_error}")]
    Unreachable {
        /// Address that was probed.
        address: String,
        /// Number of attempts made.
        attempts: u32,
        /// Error observed on the final attempt.
        last_error: String,
    },
}

/// Connection-level readiness probe.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct ReadinessProbe {
    connect_timeout: Duration,
    interval: Duration,
}

impl Default for ReadinessProbe {
    fn default() -> Self {
        Self::new()
    }
}

impl ReadinessProbe {
    /// Creates a probe with the default timeout and interval.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            connect_timeout: CONNECT_TIMEOUT,
            interval: RETRY_INTERVAL,
        }
    }

    /// Overrides the per-attempt connection timeout.
    #[must_use]
    pub const fn with_connect_timeout(mut self, connect_timeout: Duration) -> Self {
        self.connect_timeout = connect_timeout;
        self
    }

    /// Overrides the pause between attempts.
    #[must_use]
    pub const fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    /// Attempts to open a TCP connection to `address` up to `max_attempts`
    /// times. The connection is closed as soon as it is established.
    ///
    /// # Errors
    ///
    /// Returns [`ProbeError::Unreachable`] when no attempt succeeds, including
    /// immediately when `max_attempts` is zero.
    pub async fn probe(&self, address: &str, max_attempts: u32) -> Result<(), ProbeError> {
        let mut last_error = String::from("no connection attempts permitted");

        for attempt in 1..=max_attempts {
            match timeout(self.connect_timeout, TcpStream::connect(address)).await {
                Ok(Ok(_stream)) => {
                    debug!(address, attempt, "endpoint reachable");
                    return Ok(());
                }
                Ok(Err(err)) => last_error = err.to_string(),
                Err(_) => {
                    last_error = format!(
                        "connection attempt exceeded {}ms",
                        self.connect_timeout.as_millis()
                    );
                }
            }

            debug!(address, attempt, error = %last_error, "endpoint not reachable yet");
            if attempt < max_attempts {
                sleep(self.interval).await;
            }
        }

        Err(ProbeError::Unreachable {
            address: address.to_owned(),
            attempts: max_attempts,
            last_error,
        })
    }
}
