//! Configuration loading via `ortho-config`.
//!
//! Every section merges defaults, `skiff.toml`, and environment variables.
//! Validation errors name both the environment variable and the TOML key so
//! users can fix them without reading the source.

use camino::{Utf8Path, Utf8PathBuf};
use cap_std::{ambient_authority, fs_utf8::Dir};
use ortho_config::OrthoConfig;
use serde::Deserialize;
use thiserror::Error;

use crate::runtime::RuntimeEndpoint;
use crate::ssh::expand_tilde;

/// Container runtime settings.
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
pub struct RuntimeConfig {
    /// Daemon used when no host is provisioned, as `tcp://host:port`. When
    /// unset the platform default socket is used.
    pub docker_host: Option<String>,
    /// Directory holding `cert.pem`, `key.pem`, and `ca.pem`. Enables mutual
    /// TLS for `docker_host` and for provisioned hosts.
    pub docker_cert_path: Option<String>,
    /// Namespace prefixed to image names.
    #[ortho_config(default = "skiff".to_owned())]
    pub image_prefix: String,
    /// Seconds the runtime client waits for a single API response.
    #[ortho_config(default = 120)]
    pub connect_timeout_secs: u64,
    /// Connection attempts made against a provisioned host's runtime port.
    #[ortho_config(default = 240)]
    pub readiness_attempts: u32,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            docker_host: None,
            docker_cert_path: None,
            image_prefix: String::from("skiff"),
            connect_timeout_secs: 120,
            readiness_attempts: 240,
        }
    }
}

impl RuntimeConfig {
    /// Loads configuration without attempting to parse CLI arguments.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Parse`] when the merge fails.
    pub fn load_without_cli_args() -> Result<Self, ConfigError> {
        Ok(Self::load_from_iter([std::ffi::OsString::from("skiff")])?)
    }

    /// Returns the certificates directory with `~/` expanded.
    #[must_use]
    pub fn certs_dir(&self) -> Option<Utf8PathBuf> {
        self.docker_cert_path
            .as_deref()
            .map(str::trim)
            .filter(|path| !path.is_empty())
            .map(|path| Utf8PathBuf::from(expand_tilde(path)))
    }

    /// Returns the endpoint used for local execution.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] when `docker_host` is not a
    /// `tcp://host:port` URL.
    pub fn local_endpoint(&self) -> Result<RuntimeEndpoint, ConfigError> {
        let Some(raw) = self
            .docker_host
            .as_deref()
            .map(str::trim)
            .filter(|value| !value.is_empty())
        else {
            return Ok(RuntimeEndpoint::LocalDefault);
        };
        let address = raw
            .strip_prefix("tcp://")
            .map(|rest| rest.trim_end_matches('/'))
            .filter(|rest| rest.contains(':'))
            .ok_or_else(|| {
                ConfigError::Invalid(format!(
                    "docker_host must look like tcp://host:port (got {raw}): set SKIFF_DOCKER_HOST \
                     or docker_host in skiff.toml"
                ))
            })?;
        Ok(RuntimeEndpoint::remote(address, self.certs_dir()))
    }
}

/// Scaleway specific configuration derived from environment variables and
/// configuration files.
#[derive(Clone, Debug, Deserialize, OrthoConfig, PartialEq, Eq)]
#[ortho_config(prefix = "SCW")]
pub struct ScalewayConfig {
    /// Secret key used for authentication. This value is required.
    pub secret_key: String,
    /// Organisation identifier attached to created servers.
    pub default_organization_id: Option<String>,
    /// Project that owns the servers.
    pub default_project_id: String,
    /// Availability zone. Defaults to `fr-par-1`.
    #[ortho_config(default = "fr-par-1".to_owned())]
    pub default_zone: String,
    /// Commercial type for new instances. Defaults to `DEV1-S`.
    #[ortho_config(default = "DEV1-S".to_owned())]
    pub default_instance_type: String,
    /// Image label resolved to the newest matching image.
    #[ortho_config(default = "Ubuntu 24.04 Noble Numbat".to_owned())]
    pub default_image: String,
    /// CPU architecture used to select the image variant.
    #[ortho_config(default = "x86_64".to_owned())]
    pub default_architecture: String,
}

impl ScalewayConfig {
    /// Loads configuration without attempting to parse CLI arguments.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Parse`] when the merge fails.
    pub fn load_without_cli_args() -> Result<Self, ConfigError> {
        Ok(Self::load_from_iter([std::ffi::OsString::from("skiff")])?)
    }

    /// Checks that required fields are present.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::MissingField`] naming the first empty field.
    pub fn validate(&self) -> Result<(), ConfigError> {
        const SECTION: &str = "scaleway";
        require_field(
            &self.secret_key,
            &FieldMetadata::new("Scaleway API secret key", "SCW_SECRET_KEY", "secret_key", SECTION),
        )?;
        require_field(
            &self.default_project_id,
            &FieldMetadata::new(
                "Scaleway project ID",
                "SCW_DEFAULT_PROJECT_ID",
                "default_project_id",
                SECTION,
            ),
        )?;
        require_field(
            &self.default_zone,
            &FieldMetadata::new("availability zone", "SCW_DEFAULT_ZONE", "default_zone", SECTION),
        )?;
        require_field(
            &self.default_instance_type,
            &FieldMetadata::new(
                "instance type",
                "SCW_DEFAULT_INSTANCE_TYPE",
                "default_instance_type",
                SECTION,
            ),
        )?;
        require_field(
            &self.default_image,
            &FieldMetadata::new("VM image", "SCW_DEFAULT_IMAGE", "default_image", SECTION),
        )?;
        require_field(
            &self.default_architecture,
            &FieldMetadata::new(
                "CPU architecture",
                "SCW_DEFAULT_ARCHITECTURE",
                "default_architecture",
                SECTION,
            ),
        )
    }
}

/// DigitalOcean specific configuration.
#[derive(Clone, Debug, Deserialize, OrthoConfig, PartialEq, Eq)]
#[ortho_config(prefix = "DIGITALOCEAN")]
pub struct DigitalOceanConfig {
    /// Personal access token. This value is required.
    pub api_key: String,
    /// API base URL, overridable for proxies and tests.
    #[ortho_config(default = "https://api.digitalocean.com".to_owned())]
    pub api_url: String,
    /// Region slug.
    #[ortho_config(default = "nyc3".to_owned())]
    pub region: String,
    /// Droplet size slug.
    #[ortho_config(default = "s-1vcpu-1gb".to_owned())]
    pub size: String,
    /// Base image slug used when no snapshot exists.
    #[ortho_config(default = "debian-12-x64".to_owned())]
    pub image: String,
    /// Name of the snapshot reused across runs.
    #[ortho_config(default = "SKIFF".to_owned())]
    pub snapshot_name: String,
    /// Identifier of an SSH key already registered with the account.
    pub key_id: Option<u64>,
    /// Public key registered when `key_id` is unset. Supports `~/`.
    pub ssh_public_key_path: Option<String>,
}

impl DigitalOceanConfig {
    /// Loads configuration without attempting to parse CLI arguments.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Parse`] when the merge fails.
    pub fn load_without_cli_args() -> Result<Self, ConfigError> {
        Ok(Self::load_from_iter([std::ffi::OsString::from("skiff")])?)
    }

    /// Checks that required fields are present and that an SSH key source is
    /// configured.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::MissingField`] naming the first empty field.
    pub fn validate(&self) -> Result<(), ConfigError> {
        const SECTION: &str = "digitalocean";
        require_field(
            &self.api_key,
            &FieldMetadata::new(
                "DigitalOcean API token",
                "DIGITALOCEAN_API_KEY",
                "api_key",
                SECTION,
            ),
        )?;
        require_field(
            &self.api_url,
            &FieldMetadata::new("API base URL", "DIGITALOCEAN_API_URL", "api_url", SECTION),
        )?;
        require_field(
            &self.region,
            &FieldMetadata::new("region", "DIGITALOCEAN_REGION", "region", SECTION),
        )?;
        require_field(
            &self.size,
            &FieldMetadata::new("droplet size", "DIGITALOCEAN_SIZE", "size", SECTION),
        )?;
        require_field(
            &self.image,
            &FieldMetadata::new("image slug", "DIGITALOCEAN_IMAGE", "image", SECTION),
        )?;
        require_field(
            &self.snapshot_name,
            &FieldMetadata::new(
                "snapshot name",
                "DIGITALOCEAN_SNAPSHOT_NAME",
                "snapshot_name",
                SECTION,
            ),
        )?;
        if self.key_id.is_none() {
            require_field(
                self.ssh_public_key_path.as_deref().unwrap_or_default(),
                &FieldMetadata::new(
                    "SSH key (key_id or public key path)",
                    "DIGITALOCEAN_SSH_PUBLIC_KEY_PATH",
                    "ssh_public_key_path",
                    SECTION,
                ),
            )?;
        }
        Ok(())
    }
}

/// Metadata for a configuration field, used to generate actionable error messages.
struct FieldMetadata {
    description: &'static str,
    env_var: &'static str,
    toml_key: &'static str,
    section: &'static str,
}

impl FieldMetadata {
    const fn new(
        description: &'static str,
        env_var: &'static str,
        toml_key: &'static str,
        section: &'static str,
    ) -> Self {
        Self {
            description,
            env_var,
            toml_key,
            section,
        }
    }
}

fn require_field(value: &str, metadata: &FieldMetadata) -> Result<(), ConfigError> {
    if value.trim().is_empty() {
        return Err(ConfigError::MissingField(format!(
            "missing {}: set {} or add {} to [{}] in skiff.toml",
            metadata.description, metadata.env_var, metadata.toml_key, metadata.section
        )));
    }
    Ok(())
}

/// Reads a UTF-8 file named by configuration or a CLI flag. Relative paths
/// resolve against the working directory and `~/` is expanded.
///
/// # Errors
///
/// Returns [`ConfigError::FileRead`] when the file cannot be opened or read.
pub fn read_file(path: &str) -> Result<String, ConfigError> {
    let expanded = Utf8PathBuf::from(expand_tilde(path));
    let read_error = |message: String| ConfigError::FileRead {
        path: expanded.to_string(),
        message,
    };
    let file_name = expanded
        .file_name()
        .ok_or_else(|| read_error(String::from("path has no file name")))?;
    let parent = expanded
        .parent()
        .filter(|dir| !dir.as_str().is_empty())
        .unwrap_or_else(|| Utf8Path::new("."));

    let dir = Dir::open_ambient_dir(parent, ambient_authority())
        .map_err(|err| read_error(err.to_string()))?;
    dir.read_to_string(file_name)
        .map_err(|err| read_error(err.to_string()))
}

/// Errors raised during configuration loading and validation.
#[derive(Debug, Error, Eq, PartialEq)]
pub enum ConfigError {
    /// Indicates a required configuration field is empty or missing.
    #[error("missing configuration field: {0}")]
    MissingField(String),
    /// Indicates a field holds a value that cannot be used.
    #[error("invalid configuration: {0}")]
    Invalid(String),
    /// Raised when a file named by configuration cannot be read.
    #[error("failed to read {path}: {message}")]
    FileRead {
        /// Path after tilde expansion.
        path: String,
        /// Underlying I/O error.
        message: String,
    },
    /// Surfaces errors from the `ortho-config` loader.
    #[error("configuration parsing failed: {0}")]
    Parse(String),
}

impl From<ortho_config::OrthoError> for ConfigError {
    fn from(value: ortho_config::OrthoError) -> Self {
        Self::Parse(value.to_string())
    }
}

impl From<std::sync::Arc<ortho_config::OrthoError>> for ConfigError {
    fn from(value: std::sync::Arc<ortho_config::OrthoError>) -> Self {
        Self::Parse(value.to_string())
    }
}
