//! Key-based remote command execution through the system `ssh` client.
//!
//! Used to bootstrap hosts that boot without a reachable runtime daemon. The
//! command is passed verbatim to `ssh`; callers quote any untrusted input.

use std::ffi::OsString;
use std::time::Duration;

use camino::Utf8PathBuf;
use tokio::time::timeout;
use tracing::{debug, warn};

mod config;
mod types;

pub use config::{SshConfig, SshConfigLoadError, SshError};
pub use types::{
    CommandFuture, CommandOutput, CommandRunner, ProcessCommandRunner, RemoteCommandOutput,
};

/// Port `sshd` listens on for freshly provisioned hosts.
pub const DEFAULT_SSH_PORT: u16 = 22;

/// Expands a leading `~/` to `$HOME`, returning the path unchanged otherwise.
///
/// # Examples
///
/// ```
/// # use skiff::ssh::expand_tilde;
/// assert_eq!(expand_tilde("/etc/skiff/id_ed25519"), "/etc/skiff/id_ed25519");
/// ```
#[must_use]
pub fn expand_tilde(path: &str) -> String {
    match (path.strip_prefix("~/"), std::env::var_os("HOME")) {
        (Some(rest), Some(home)) => Utf8PathBuf::from(home.to_string_lossy().as_ref())
            .join(rest)
            .into_string(),
        _ => path.to_owned(),
    }
}

/// Host and port an [`RemoteShell`] connects to.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct SshTarget {
    /// Host name or IP address.
    pub host: String,
    /// TCP port of `sshd`.
    pub port: u16,
}

impl SshTarget {
    /// Targets `host` on the default SSH port.
    #[must_use]
    pub fn new(host: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            port: DEFAULT_SSH_PORT,
        }
    }

    /// Returns `host:port`, bracketing IPv6 literals.
    #[must_use]
    pub fn socket_address(&self) -> String {
        if self.host.contains(':') {
            format!("[{}]:{}", self.host, self.port)
        } else {
            format!("{}:{}", self.host, self.port)
        }
    }
}

/// Runs commands on remote hosts over SSH.
#[derive(Clone, Debug)]
pub struct RemoteShell<R: CommandRunner> {
    config: SshConfig,
    runner: R,
}

impl RemoteShell<ProcessCommandRunner> {
    /// Convenience constructor that wires the real process runner.
    ///
    /// # Errors
    ///
    /// Returns [`SshError::InvalidConfig`] when validation fails.
    pub fn with_process_runner(config: SshConfig) -> Result<Self, SshError> {
        Self::new(config, ProcessCommandRunner)
    }
}

impl<R: CommandRunner> RemoteShell<R> {
    /// Creates a shell using the provided runner and configuration.
    ///
    /// # Errors
    ///
    /// Returns [`SshError::InvalidConfig`] when configuration validation
    /// fails.
    pub fn new(config: SshConfig, runner: R) -> Result<Self, SshError> {
        config.validate()?;
        Ok(Self { config, runner })
    }

    /// Returns a reference to the underlying configuration.
    #[must_use]
    pub const fn config(&self) -> &SshConfig {
        &self.config
    }

    /// Executes `command` on `target` and returns its output.
    ///
    /// The whole session is bounded by `ssh_command_timeout_secs`; on expiry
    /// the local `ssh` process is killed.
    ///
    /// # Errors
    ///
    /// Returns [`SshError::Spawn`] when `ssh` cannot be started,
    /// [`SshError::Timeout`] when the deadline passes, and
    /// [`SshError::CommandFailure`] when the remote command exits non-zero,
    /// carrying the combined output.
    pub async fn run(
        &self,
        target: &SshTarget,
        command: &str,
    ) -> Result<RemoteCommandOutput, SshError> {
        let args = self.build_ssh_args(target, command);
        let deadline = Duration::from_secs(self.config.ssh_command_timeout_secs);
        debug!(host = %target.host, port = target.port, "running remote command");
        let output = timeout(deadline, self.runner.run(&self.config.ssh_bin, &args))
            .await
            .map_err(|_| {
                warn!(
                    host = %target.host,
                    timeout_secs = deadline.as_secs(),
                    "remote command timed out"
                );
                SshError::Timeout {
                    host: target.host.clone(),
                    timeout_secs: self.config.ssh_command_timeout_secs,
                }
            })??;
        let remote = RemoteCommandOutput {
            exit_code: output.code,
            stdout: output.stdout,
            stderr: output.stderr,
        };
        if matches!(remote.exit_code, Some(0)) {
            return Ok(remote);
        }

        let status_text = remote
            .exit_code
            .map_or_else(|| String::from("unknown"), |code| code.to_string());
        Err(SshError::CommandFailure {
            host: target.host.clone(),
            status: remote.exit_code,
            status_text,
            output: remote.combined(),
        })
    }

    fn build_ssh_args(&self, target: &SshTarget, command: &str) -> Vec<OsString> {
        let mut args = self.common_ssh_options(target.port);
        args.push(OsString::from(format!(
            "{}@{}",
            self.config.ssh_user, target.host
        )));
        args.push(OsString::from(command));
        args
    }

    fn common_ssh_options(&self, port: u16) -> Vec<OsString> {
        let mut args = vec![OsString::from("-p"), OsString::from(port.to_string())];

        if let Some(identity_file) = &self.config.ssh_identity_file {
            args.push(OsString::from("-i"));
            args.push(OsString::from(expand_tilde(identity_file)));
        }

        let mut option = |value: String| {
            args.push(OsString::from("-o"));
            args.push(OsString::from(value));
        };
        if self.config.ssh_batch_mode {
            option(String::from("BatchMode=yes"));
        }
        if !self.config.ssh_strict_host_key_checking {
            option(String::from("StrictHostKeyChecking=no"));
        }
        if !self.config.ssh_known_hosts_file.trim().is_empty() {
            option(format!(
                "UserKnownHostsFile={}",
                self.config.ssh_known_hosts_file
            ));
        }
        option(format!(
            "ConnectTimeout={}",
            self.config.ssh_connect_timeout_secs
        ));
        option(format!(
            "ServerAliveInterval={}",
            self.config.ssh_server_alive_interval_secs
        ));
        option(format!(
            "ServerAliveCountMax={}",
            self.config.ssh_server_alive_count_max
        ));

        args
    }
}
