//! SSH client settings and errors.
//!
//! [`SshConfig`] is loaded via `ortho-config`, merging defaults, configuration
//! files, and environment variables (`SKIFF_SSH_BIN`, `SKIFF_SSH_USER`, ...).

use ortho_config::OrthoConfig;
use serde::Deserialize;
use thiserror::Error;

/// SSH settings used to bootstrap freshly provisioned hosts.
#[derive(Clone, Debug, Deserialize, OrthoConfig, PartialEq, Eq)]
#[ortho_config(
    prefix = "SKIFF",
    discovery(
        app_name = "skiff",
        env_var = "SKIFF_CONFIG_PATH",
        config_file_name = "skiff.toml",
        dotfile_name = ".skiff.toml",
        project_file_name = "skiff.toml"
    )
)]
pub struct SshConfig {
    /// Path to the `ssh` executable.
    #[ortho_config(default = "ssh".to_owned())]
    pub ssh_bin: String,
    /// Remote user to connect as.
    #[ortho_config(default = "root".to_owned())]
    pub ssh_user: String,
    /// Whether to force batch mode for SSH to avoid password prompts.
    #[ortho_config(default = true)]
    pub ssh_batch_mode: bool,
    /// Whether to enforce host key checking; disabled by default because
    /// every host is new.
    #[ortho_config(default = false)]
    pub ssh_strict_host_key_checking: bool,
    /// Known hosts file override; defaults to `/dev/null` for ephemeral hosts.
    #[ortho_config(default = "/dev/null".to_owned())]
    pub ssh_known_hosts_file: String,
    /// Path to the SSH private key. Supports tilde expansion. When unset, SSH
    /// falls back to its default key locations.
    pub ssh_identity_file: Option<String>,
    /// Seconds `ssh` waits for the TCP handshake.
    #[ortho_config(default = 10)]
    pub ssh_connect_timeout_secs: u64,
    /// Seconds between keepalive probes on an open session.
    #[ortho_config(default = 15)]
    pub ssh_server_alive_interval_secs: u64,
    /// Unanswered keepalive probes before `ssh` drops the session.
    #[ortho_config(default = 4)]
    pub ssh_server_alive_count_max: u32,
    /// Upper bound on a whole remote command, including package installs.
    #[ortho_config(default = 1200)]
    pub ssh_command_timeout_secs: u64,
}

impl Default for SshConfig {
    fn default() -> Self {
        Self {
            ssh_bin: String::from("ssh"),
            ssh_user: String::from("root"),
            ssh_batch_mode: true,
            ssh_strict_host_key_checking: false,
            ssh_known_hosts_file: String::from("/dev/null"),
            ssh_identity_file: None,
            ssh_connect_timeout_secs: 10,
            ssh_server_alive_interval_secs: 15,
            ssh_server_alive_count_max: 4,
            ssh_command_timeout_secs: 1200,
        }
    }
}

/// Errors raised when loading the SSH configuration from layered sources.
#[derive(Debug, Error, Eq, PartialEq)]
pub enum SshConfigLoadError {
    /// Indicates that parsing or merging configuration layers failed.
    #[error("ssh configuration parsing failed: {0}")]
    Parse(String),
}

impl SshConfig {
    /// Ensures configuration values are present after trimming whitespace.
    ///
    /// # Errors
    ///
    /// Returns [`SshError::InvalidConfig`] when any required field is empty.
    pub fn validate(&self) -> Result<(), SshError> {
        Self::require_value(&self.ssh_bin, "ssh_bin")?;
        Self::require_value(&self.ssh_user, "ssh_user")?;
        Self::require_optional_value(self.ssh_identity_file.as_deref(), "ssh_identity_file")?;
        for (value, field) in [
            (self.ssh_connect_timeout_secs, "ssh_connect_timeout_secs"),
            (self.ssh_server_alive_interval_secs, "ssh_server_alive_interval_secs"),
            (u64::from(self.ssh_server_alive_count_max), "ssh_server_alive_count_max"),
            (self.ssh_command_timeout_secs, "ssh_command_timeout_secs"),
        ] {
            if value == 0 {
                return Err(SshError::InvalidConfig {
                    field: field.to_owned(),
                });
            }
        }
        Ok(())
    }

    /// Loads configuration from defaults, configuration files, and
    /// environment variables without parsing process arguments.
    ///
    /// # Errors
    ///
    /// Returns [`SshConfigLoadError::Parse`] when merging sources fails.
    pub fn load_without_cli_args() -> Result<Self, SshConfigLoadError> {
        Self::load_from_iter([std::ffi::OsString::from("skiff")])
            .map_err(|err| SshConfigLoadError::Parse(err.to_string()))
    }

    fn require_optional_value(value: Option<&str>, field: &str) -> Result<(), SshError> {
        match value {
            None => Ok(()),
            Some(v) if !v.trim().is_empty() => Ok(()),
            Some(_) => Err(SshError::InvalidConfig {
                field: field.to_owned(),
            }),
        }
    }

    fn require_value(value: &str, field: &str) -> Result<(), SshError> {
        Self::require_optional_value(Some(value), field)
    }
}

/// Errors surfaced while running remote commands.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum SshError {
    /// Raised when configuration is missing required values.
    #[error(
        "missing {field}: set SKIFF_{env_suffix} or add {field} to skiff.toml",
        env_suffix = field.to_uppercase()
    )]
    InvalidConfig {
        /// Configuration field that failed validation.
        field: String,
    },
    /// Raised when the `ssh` process cannot be spawned.
    #[error("failed to spawn {program}: {message}")]
    Spawn {
        /// Command that failed to start.
        program: String,
        /// Operating system error string.
        message: String,
    },
    /// Raised when the remote command outlives `ssh_command_timeout_secs`.
    #[error("remote command on {host} did not finish within {timeout_secs}s")]
    Timeout {
        /// Target host.
        host: String,
        /// Deadline that passed.
        timeout_secs: u64,
    },
    /// Raised when the remote command exits non-zero.
    #[error("remote command on {host} exited with status {status_text}: {output}")]
    CommandFailure {
        /// Target host.
        host: String,
        /// Exit status as reported by the OS.
        status: Option<i32>,
        /// Human readable representation of the exit status.
        status_text: String,
        /// Combined stdout and stderr.
        output: String,
    },
}
