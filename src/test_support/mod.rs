//! Test support utilities shared across unit and integration tests.
//!
//! The doubles here are deterministic and record every call so tests can
//! assert on what the orchestrator asked for, not only on what it returned.

mod env;
mod provisioner;
mod runner;
mod runtime;

pub use env::{ENV_LOCK, EnvGuard};
pub use provisioner::{ScriptedProvisioner, ScriptedProvisionerError};
pub use runner::{CommandInvocation, ScriptedRunner};
pub use runtime::{FakeRuntime, RuntimeCall};
