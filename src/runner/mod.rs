//! Process runner for pipeline stages.
//!
//! Every stage delegates to one external command. The runner spawns it with
//! a fully resolved argv (never through a shell), streams its output while it
//! runs, enforces the stage timeout and turns the outcome into an
//! [`ExecutionResult`].
//!
//! # Architecture
//!
//! ```text
//! StageCommand → StageExecutor → child process group → ExecutionResult → RunLedger
//! ```
//!
//! The [`StageExecutor`] trait is the seam the orchestrator drives; the
//! production implementation is [`ProcessRunner`].

pub mod process;
pub mod result;
#[cfg(unix)]
mod terminal;

pub use process::ProcessRunner;
pub use result::{format_duration, ExecutionResult, CANCELLED_EXIT_CODE, TIMEOUT_EXIT_CODE};

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::error::RunnerError;

/// One fully resolved stage invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StageCommand {
    /// Stage being executed.
    pub stage: String,
    /// Resolved argv, program first.
    pub argv: Vec<String>,
    /// Time limit; `None` lets the command run until it exits.
    pub timeout: Option<Duration>,
    /// File receiving a copy of the streamed output.
    pub log_path: Option<PathBuf>,
    /// Complete child environment; `None` inherits the orchestrator's.
    pub env: Option<BTreeMap<String, String>>,
    /// Whether the command reads operator input from the terminal.
    pub interactive: bool,
}

impl StageCommand {
    /// Creates an invocation with no timeout and no log file.
    pub fn new(stage: impl Into<String>, argv: Vec<String>) -> Self {
        Self {
            stage: stage.into(),
            argv,
            timeout: None,
            log_path: None,
            env: None,
            interactive: false,
        }
    }

    /// Sets the timeout.
    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    /// Sets the log file.
    pub fn with_log_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.log_path = Some(path.into());
        self
    }

    /// Replaces the child environment.
    pub fn with_env(mut self, env: BTreeMap<String, String>) -> Self {
        self.env = Some(env);
        self
    }

    /// Connects the command to the operator's terminal.
    pub fn with_interactive(mut self, interactive: bool) -> Self {
        self.interactive = interactive;
        self
    }
}

/// Executes stage commands.
///
/// A command that starts and exits non-zero yields `Ok` with a failing
/// [`ExecutionResult`]; `Err` is reserved for commands that could not be
/// launched at all or whose process was lost track of.
#[async_trait]
pub trait StageExecutor: Send + Sync {
    /// Runs one command to completion, timeout or cancellation.
    async fn run(
        &self,
        command: &StageCommand,
        cancel: &CancellationToken,
    ) -> Result<ExecutionResult, RunnerError>;
}
