//! Shared record of the resources an execution task has created.
//!
//! The task records each resource as soon as the create call returns. When
//! the orchestrator stops waiting it seals the ledger and takes the contents;
//! from then on a record call is refused and the task must release the
//! resource itself.

use std::sync::{Mutex, PoisonError};

use crate::host::Host;

/// Resources handed to teardown once the ledger is sealed.
#[derive(Debug)]
pub(crate) struct Created<R> {
    pub(crate) runtime: Option<R>,
    pub(crate) host: Option<Host>,
    pub(crate) container: Option<String>,
}

#[derive(Debug)]
struct State<R> {
    sealed: bool,
    runtime: Option<R>,
    host: Option<Host>,
    container: Option<String>,
}

#[derive(Debug)]
pub(crate) struct Ledger<R> {
    state: Mutex<State<R>>,
}

impl<R> Ledger<R> {
    pub(crate) const fn new() -> Self {
        Self {
            state: Mutex::new(State {
                sealed: false,
                runtime: None,
                host: None,
                container: None,
            }),
        }
    }

    fn with_state<T>(&self, f: impl FnOnce(&mut State<R>) -> T) -> T {
        let mut guard = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        f(&mut guard)
    }

    /// Records the client bound to the current endpoint, replacing any
    /// earlier one. Ignored once sealed.
    pub(crate) fn record_runtime(&self, runtime: R) {
        self.with_state(|state| {
            if !state.sealed {
                state.runtime = Some(runtime);
            }
        });
    }

    /// Records a provisioned host, handing it back when sealed.
    pub(crate) fn record_host(&self, host: Host) -> Option<Host> {
        self.with_state(|state| {
            if state.sealed {
                Some(host)
            } else {
                state.host = Some(host);
                None
            }
        })
    }

    /// Records a created container. Returns `false` when sealed.
    pub(crate) fn record_container(&self, id: &str) -> bool {
        self.with_state(|state| {
            if state.sealed {
                false
            } else {
                state.container = Some(id.to_owned());
                true
            }
        })
    }

    /// Seals the ledger and takes everything recorded so far.
    pub(crate) fn seal(&self) -> Created<R> {
        self.with_state(|state| {
            state.sealed = true;
            Created {
                runtime: state.runtime.take(),
                host: state.host.take(),
                container: state.container.take(),
            }
        })
    }
}
