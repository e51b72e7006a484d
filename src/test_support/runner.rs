//! Scripted command runner.

use std::collections::VecDeque;
use std::ffi::OsString;
use std::future;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::ssh::{CommandFuture, CommandOutput, CommandRunner, SshError};

/// Records a single invocation made through [`ScriptedRunner`].
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct CommandInvocation {
    /// Program name as passed to the runner.
    pub program: String,
    /// Arguments passed to the program.
    pub args: Vec<OsString>,
}

impl CommandInvocation {
    /// Returns a shell-like command string for assertions.
    #[must_use]
    pub fn command_string(&self) -> String {
        std::iter::once(self.program.clone())
            .chain(
                self.args
                    .iter()
                    .map(|arg| arg.to_string_lossy().into_owned()),
            )
            .collect::<Vec<_>>()
            .join(" ")
    }
}

#[derive(Debug)]
enum Response {
    Output(CommandOutput),
    Hang,
}

#[derive(Debug, Default)]
struct Script {
    responses: VecDeque<Response>,
    invocations: Vec<CommandInvocation>,
}

/// Command runner that returns pre-seeded outputs in FIFO order without
/// spawning processes.
#[derive(Clone, Debug, Default)]
pub struct ScriptedRunner {
    script: Arc<Mutex<Script>>,
}

impl ScriptedRunner {
    /// Creates a new runner with no queued responses.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn script(&self) -> MutexGuard<'_, Script> {
        self.script.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Returns a snapshot of all invocations recorded so far.
    #[must_use]
    pub fn invocations(&self) -> Vec<CommandInvocation> {
        self.script().invocations.clone()
    }

    /// Pushes a successful exit status.
    pub fn push_success(&self) {
        self.push_output(Some(0), "", "");
    }

    /// Pushes a failing exit code with stderr text.
    pub fn push_failure(&self, code: i32) {
        self.push_output(Some(code), "", "simulated failure");
    }

    /// Pushes an explicit command output response.
    pub fn push_output(
        &self,
        code: Option<i32>,
        stdout: impl Into<String>,
        stderr: impl Into<String>,
    ) {
        self.script().responses.push_back(Response::Output(CommandOutput {
            code,
            stdout: stdout.into(),
            stderr: stderr.into(),
        }));
    }

    /// Pushes a command that never finishes, like a session stuck on a dead
    /// mirror.
    pub fn push_hang(&self) {
        self.script().responses.push_back(Response::Hang);
    }
}

impl CommandRunner for ScriptedRunner {
    fn run<'a>(&'a self, program: &'a str, args: &'a [OsString]) -> CommandFuture<'a> {
        let response = {
            let mut script = self.script();
            script.invocations.push(CommandInvocation {
                program: program.to_owned(),
                args: args.to_vec(),
            });
            script.responses.pop_front()
        };
        Box::pin(async move {
            match response {
                Some(Response::Output(output)) => Ok(output),
                Some(Response::Hang) => future::pending().await,
                None => Err(SshError::Spawn {
                    program: program.to_owned(),
                    message: String::from("no scripted response available"),
                }),
            }
        })
    }
}
