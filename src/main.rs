//! Binary entry point for the skiff CLI.

mod cli;

use std::future;
use std::io::{self, Write};
use std::process;

use clap::Parser;
use thiserror::Error;
use tracing_subscriber::EnvFilter;

use skiff::config::{ConfigError, DigitalOceanConfig, RuntimeConfig, ScalewayConfig, read_file};
use skiff::digitalocean::DigitalOceanBackend;
use skiff::provisioners::{AnyProvisioner, AnyProvisionerError};
use skiff::run::{ExecutionRequest, ExecutionResult, Orchestrator, RequestError, RunError};
use skiff::runtime::DockerConnector;
use skiff::scaleway::ScalewayBackend;
use skiff::ssh::{SshConfig, SshConfigLoadError};
use skiff::tcp::TcpPassthrough;

use cli::{Cli, HostChoice, RunCommand};

#[derive(Debug, Error)]
enum CliError {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),
    #[error("ssh configuration error: {0}")]
    Ssh(#[from] SshConfigLoadError),
    #[error("backend error: {0}")]
    Backend(#[from] AnyProvisionerError),
    #[error("invalid request: {0}")]
    Request(#[from] RequestError),
}

#[tokio::main]
async fn main() {
    init_tracing();
    let Cli::Run(command) = Cli::parse();
    let exit_code = match run_command(command).await {
        Ok(code) => code,
        Err(err) => {
            write_error(io::stderr(), &err);
            1
        }
    };

    process::exit(exit_code);
}

fn init_tracing() {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("skiff=info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .with_target(false)
        .init();
}

async fn run_command(args: RunCommand) -> Result<i32, CliError> {
    let runtime = RuntimeConfig::load_without_cli_args()?;
    let provisioner = select_provisioner(&args.host, &runtime)?;
    let stdin = match (args.stdin, args.stdin_file) {
        (Some(text), _) => text.into_bytes(),
        (None, Some(path)) => read_file(&path)?.into_bytes(),
        (None, None) => Vec::new(),
    };

    let mut builder = ExecutionRequest::builder()
        .image_name(args.image)
        .context_dir(args.context)
        .dockerfile(args.dockerfile)
        .remote_uri(args.remote_uri)
        .image_prefix(runtime.image_prefix.clone())
        .without_prefix(args.no_prefix)
        .command(args.command)
        .stdin(stdin);
    for entry in args.env {
        builder = builder.env(entry);
    }
    for entry in args.volumes {
        builder = builder.volume(entry);
    }
    if let Some(backend) = provisioner {
        builder = builder.host(backend);
    }
    let request = builder.build()?;

    let orchestrator = Orchestrator::new(DockerConnector::new(runtime.connect_timeout_secs))
        .with_local_endpoint(runtime.local_endpoint()?)
        .with_readiness_attempts(runtime.readiness_attempts);
    let outcome = orchestrator.run(request, interrupted()).await;
    Ok(report_outcome(&outcome))
}

/// Resolves when the user presses Ctrl-C. Never resolves if the signal
/// handler cannot be installed.
async fn interrupted() {
    if tokio::signal::ctrl_c().await.is_err() {
        future::pending::<()>().await;
    }
}

fn select_provisioner(
    choice: &HostChoice,
    runtime: &RuntimeConfig,
) -> Result<Option<AnyProvisioner>, CliError> {
    let backend = match choice {
        HostChoice::Local => return Ok(None),
        HostChoice::Tcp(url) => AnyProvisioner::Tcp(
            TcpPassthrough::parse(url)
                .map_err(AnyProvisionerError::from)?
                .with_certs_dir(runtime.certs_dir()),
        ),
        HostChoice::Scaleway => {
            let config = ScalewayConfig::load_without_cli_args()?;
            AnyProvisioner::Scaleway(Box::new(
                ScalewayBackend::new(config).map_err(AnyProvisionerError::from)?,
            ))
        }
        HostChoice::DigitalOcean => {
            let config = DigitalOceanConfig::load_without_cli_args()?;
            let ssh = SshConfig::load_without_cli_args()?;
            AnyProvisioner::DigitalOcean(Box::new(
                DigitalOceanBackend::new(config, ssh).map_err(AnyProvisionerError::from)?,
            ))
        }
    };
    Ok(Some(backend))
}

fn report_outcome(outcome: &ExecutionResult<AnyProvisionerError>) -> i32 {
    let mut stdout = io::stdout();
    write!(stdout, "{}", outcome.stdout).ok();
    stdout.flush().ok();

    let mut stderr = io::stderr();
    write!(stderr, "{}", outcome.stderr).ok();
    if let Some(teardown) = &outcome.teardown_error {
        writeln!(stderr, "skiff: {teardown}").ok();
    }
    if let Some(err) = &outcome.error {
        writeln!(stderr, "skiff: {err}").ok();
    }
    exit_status(outcome.error.as_ref())
}

/// The workload's own exit code when it failed with one, otherwise 1 for
/// any failure and 0 for success.
fn exit_status(error: Option<&RunError<AnyProvisionerError>>) -> i32 {
    match error {
        None => 0,
        Some(err) => err
            .exit_code()
            .and_then(|code| i32::try_from(code).ok())
            .filter(|code| *code != 0)
            .unwrap_or(1),
    }
}

fn write_error(mut target: impl Write, err: &CliError) {
    writeln!(target, "skiff: {err}").ok();
}
