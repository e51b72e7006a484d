//! Command-line interface definitions for the `skiff` binary.
//!
//! This module centralises the clap parser structures so both the main binary
//! and the build script can reuse them when generating the manual page.

use clap::Parser;

/// Top-level CLI for the `skiff` binary.
#[derive(Debug, Parser)]
#[command(
    name = "skiff",
    about = "Build a Dockerfile and run it once on a local or ephemeral cloud host",
    arg_required_else_help = true
)]
pub(crate) enum Cli {
    /// Build or reuse an image, run one container, and clean up.
    #[command(name = "run", about = "Build or reuse an image, run one container, and clean up")]
    Run(RunCommand),
}

/// Where the container runs.
#[derive(Clone, Debug, Eq, PartialEq)]
pub(crate) enum HostChoice {
    /// Local daemon, or `SKIFF_DOCKER_HOST` when set.
    Local,
    /// Existing daemon at `tcp://host:port`.
    Tcp(String),
    /// Fresh Scaleway instance.
    Scaleway,
    /// Fresh DigitalOcean droplet.
    DigitalOcean,
}

/// Parses the `--host` flag.
pub(crate) fn parse_host(value: &str) -> Result<HostChoice, String> {
    let trimmed = value.trim();
    match trimmed.to_ascii_lowercase().as_str() {
        "local" => Ok(HostChoice::Local),
        "scaleway" => Ok(HostChoice::Scaleway),
        "digitalocean" => Ok(HostChoice::DigitalOcean),
        lowered if lowered.starts_with("tcp://") => Ok(HostChoice::Tcp(trimmed.to_owned())),
        _ => Err(format!(
            "unknown host '{trimmed}': expected local, tcp://HOST:PORT, scaleway, or digitalocean"
        )),
    }
}

/// Arguments for the `skiff run` subcommand.
#[derive(Debug, Parser)]
pub(crate) struct RunCommand {
    /// Build context directory.
    #[arg(long, value_name = "DIR", default_value = ".")]
    pub(crate) context: String,
    /// Dockerfile path relative to the context.
    #[arg(long, value_name = "PATH", default_value = "Dockerfile")]
    pub(crate) dockerfile: String,
    /// Image name, namespaced under the configured prefix unless
    /// `--no-prefix` is given.
    #[arg(long, value_name = "NAME")]
    pub(crate) image: String,
    /// Use the image name exactly as given.
    #[arg(long)]
    pub(crate) no_prefix: bool,
    /// Build from a remote context (git URL or tarball) instead of `--context`.
    #[arg(long, value_name = "URI")]
    pub(crate) remote_uri: Option<String>,
    /// Text written to the container's standard input.
    #[arg(long, value_name = "TEXT", conflicts_with = "stdin_file")]
    pub(crate) stdin: Option<String>,
    /// File whose contents are written to the container's standard input.
    #[arg(long, value_name = "PATH", conflicts_with = "stdin")]
    pub(crate) stdin_file: Option<String>,
    /// Environment variable for the container. Repeatable.
    #[arg(long = "env", short = 'e', value_name = "KEY=VALUE")]
    pub(crate) env: Vec<String>,
    /// Bind mount for the container. Repeatable.
    #[arg(long = "volume", short = 'v', value_name = "SRC:DST")]
    pub(crate) volumes: Vec<String>,
    /// Where to run: local, tcp://HOST:PORT, scaleway, or digitalocean.
    #[arg(long, value_name = "HOST", default_value = "local", value_parser = parse_host)]
    pub(crate) host: HostChoice,
    /// Command overriding the image's default (use -- to separate flags).
    #[arg(trailing_var_arg = true)]
    pub(crate) command: Vec<String>,
}
