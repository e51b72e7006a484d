//! Host backend for a pre-existing daemon reached over TCP.

use camino::Utf8PathBuf;
use thiserror::Error;
use tracing::debug;

use crate::host::{Host, HostKind, ProvisionFuture, Provisioner};
use crate::runtime::DEFAULT_RUNTIME_PORT;

/// Errors raised by [`TcpPassthrough`].
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum TcpHostError {
    /// Raised when the URL is not `tcp://host[:port]`.
    #[error("invalid tcp host url '{url}': {reason}")]
    InvalidUrl {
        /// URL as given.
        url: String,
        /// What is wrong with it.
        reason: &'static str,
    },
}

/// Hands out an existing daemon as the host. Deleting the host leaves the
/// daemon running, so the container is removed explicitly during teardown.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct TcpPassthrough {
    address: String,
    port: u16,
    certs_dir: Option<Utf8PathBuf>,
}

impl TcpPassthrough {
    /// Parses `tcp://host[:port]`. The port defaults to 2375 and IPv6
    /// literals must be bracketed.
    ///
    /// # Errors
    ///
    /// Returns [`TcpHostError::InvalidUrl`] when the scheme, host, or port is
    /// invalid.
    pub fn parse(url: &str) -> Result<Self, TcpHostError> {
        let invalid = |reason| TcpHostError::InvalidUrl {
            url: url.to_owned(),
            reason,
        };
        let authority = url
            .trim()
            .strip_prefix("tcp://")
            .ok_or_else(|| invalid("scheme must be tcp://"))?
            .trim_end_matches('/');

        let (host, port) = if let Some(rest) = authority.strip_prefix('[') {
            let (inner, tail) = rest
                .split_once(']')
                .ok_or_else(|| invalid("unterminated IPv6 literal"))?;
            (inner, tail.strip_prefix(':'))
        } else {
            match authority.rsplit_once(':') {
                Some((name, port)) => (name, Some(port)),
                None => (authority, None),
            }
        };

        if host.is_empty() || host.contains('/') {
            return Err(invalid("missing host"));
        }
        let parsed_port = match port {
            Some(raw) => raw.parse::<u16>().map_err(|_| invalid("port must be 1-65535"))?,
            None => DEFAULT_RUNTIME_PORT,
        };
        if parsed_port == 0 {
            return Err(invalid("port must be 1-65535"));
        }

        Ok(Self {
            address: host.to_owned(),
            port: parsed_port,
            certs_dir: None,
        })
    }

    /// Uses mutual TLS with the bundle in `dir`.
    #[must_use]
    pub fn with_certs_dir(mut self, dir: Option<Utf8PathBuf>) -> Self {
        self.certs_dir = dir;
        self
    }

    fn host(&self) -> Host {
        Host {
            id: format!("tcp://{}", self.authority()),
            address: self.address.clone(),
            runtime_port: self.port,
            image: String::new(),
            name: self.address.clone(),
            kind: HostKind::Tcp,
            ssh_key_ids: Vec::new(),
            certs_dir: self.certs_dir.clone(),
        }
    }

    fn authority(&self) -> String {
        if self.address.contains(':') {
            format!("[{}]:{}", self.address, self.port)
        } else {
            format!("{}:{}", self.address, self.port)
        }
    }
}

impl Provisioner for TcpPassthrough {
    type Error = TcpHostError;

    fn create_machine(&self) -> ProvisionFuture<'_, Host, Self::Error> {
        Box::pin(async move { Ok(self.host()) })
    }

    fn delete_machine(&self, host: Host) -> ProvisionFuture<'_, (), Self::Error> {
        Box::pin(async move {
            debug!(host = %host.id, "tcp host is not owned; leaving daemon running");
            Ok(())
        })
    }

    fn disposes_containers(&self) -> bool {
        false
    }
}
