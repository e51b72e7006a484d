//! Host backend for the local runtime daemon.

use thiserror::Error;
use tracing::debug;

use crate::host::{Host, ProvisionFuture, Provisioner};

/// The local backend cannot fail; the type exists to satisfy
/// [`Provisioner::Error`].
#[derive(Clone, Copy, Debug, Error, Eq, PartialEq)]
#[error("local host backend error")]
pub struct LocalHostError;

/// Runs workloads on the local daemon. Creating and deleting the host are
/// no-ops, so the container is removed explicitly during teardown.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct LocalSocket;

impl Provisioner for LocalSocket {
    type Error = LocalHostError;

    fn create_machine(&self) -> ProvisionFuture<'_, Host, Self::Error> {
        Box::pin(async { Ok(Host::local()) })
    }

    fn delete_machine(&self, host: Host) -> ProvisionFuture<'_, (), Self::Error> {
        Box::pin(async move {
            debug!(host = %host.id, "local host needs no deletion");
            Ok(())
        })
    }

    fn disposes_containers(&self) -> bool {
        false
    }
}

#[cfg(test)]
mod tests {
    use super::LocalSocket;
    use crate::host::{HostKind, Provisioner};

    #[tokio::test]
    async fn creates_a_local_host_and_deletes_nothing() {
        let backend = LocalSocket;
        let host = backend.create_machine().await.expect("local create");

        assert_eq!(host.kind, HostKind::Local);
        assert!(!host.is_remote());
        assert!(!backend.disposes_containers());
        backend.delete_machine(host).await.expect("local delete");
    }
}
