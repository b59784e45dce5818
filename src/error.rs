//! Error types for rigforge operations.
//!
//! Defines the error taxonomy shared by every subsystem:
//! - Stage registry construction (configuration errors)
//! - Run ledger persistence and corruption
//! - External process launch
//! - Workflow execution (precondition, execution, cancellation)

use std::path::PathBuf;

use thiserror::Error;

/// Errors raised while building or querying the stage registry.
///
/// Every variant except [`RegistryError::UnknownStage`] is a configuration
/// error: it is detected at process start and is never recoverable at runtime.
#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("Stage '{0}' not found in registry")]
    UnknownStage(String),

    #[error("Stage '{0}' is declared more than once")]
    DuplicateStage(String),

    #[error("Ordinal {ordinal} is used by both '{first}' and '{second}'")]
    DuplicateOrdinal {
        ordinal: u32,
        first: String,
        second: String,
    },

    #[error("Artifact '{artifact}' is produced by both '{first}' and '{second}'")]
    DuplicateArtifact {
        artifact: String,
        first: String,
        second: String,
    },

    #[error("Stage '{stage}' depends on artifact '{artifact}' produced by later stage '{producer}'")]
    ForwardReference {
        stage: String,
        artifact: String,
        producer: String,
    },

    #[error("Stage '{stage}' depends on artifact '{artifact}' which no stage produces")]
    UnknownArtifact { stage: String, artifact: String },

    #[error("Stage '{stage}' references unknown parameter '{{{placeholder}}}'")]
    UnknownPlaceholder { stage: String, placeholder: String },

    #[error("Stage '{0}' has an empty command")]
    EmptyCommand(String),

    #[error("Registry must declare at least one stage")]
    Empty,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("YAML parsing error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

impl RegistryError {
    /// Returns true for errors caused by a malformed stage declaration.
    pub fn is_configuration_error(&self) -> bool {
        !matches!(self, RegistryError::UnknownStage(_))
    }
}

/// Errors that can occur while loading or saving the run ledger.
#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("No ledger recorded for '{0}'")]
    NotFound(String),

    #[error(
        "Ledger at {path} is corrupted ({message}); start a fresh run with `rigforge run --restart`"
    )]
    Corrupted { path: PathBuf, message: String },

    #[error(
        "Ledger for '{dataset}' records a different pipeline ({}); start a fresh run with `rigforge run --restart`",
        .recorded.join(", ")
    )]
    PipelineMismatch {
        dataset: String,
        recorded: Vec<String>,
    },

    #[error("Stage order violated: '{stage}' is {status} while earlier stage '{blocking}' is {blocking_status}")]
    InvariantViolation {
        stage: String,
        status: String,
        blocking: String,
        blocking_status: String,
    },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Errors raised when an external command cannot be launched at all.
///
/// A command that starts and then exits non-zero is not an error: it yields
/// an `ExecutionResult` with a failing exit code.
#[derive(Debug, Error)]
pub enum RunnerError {
    #[error("Stage '{0}' resolved to an empty command")]
    EmptyCommand(String),

    #[error("Failed to spawn '{program}' for stage '{stage}': {source}")]
    Spawn {
        stage: String,
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Lost track of the process for stage '{stage}': {source}")]
    Wait {
        stage: String,
        #[source]
        source: std::io::Error,
    },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl RunnerError {
    /// Returns true when the command was launched before the error, so it
    /// may have left partial output behind.
    pub fn process_started(&self) -> bool {
        matches!(self, RunnerError::Wait { .. })
    }
}

/// Errors that end a workflow invocation.
///
/// All of them are terminal for the current `execute` call: nothing is
/// retried automatically.
#[derive(Debug, Error)]
pub enum WorkflowError {
    #[error("Configuration error: {0}")]
    Configuration(#[from] RegistryError),

    #[error("Stage '{stage}' is not ready: {}", .failed.join(", "))]
    Precondition { stage: String, failed: Vec<String> },

    #[error("Stage '{stage}' {}", describe_failure(.exit_code, .timed_out))]
    Execution {
        stage: String,
        exit_code: i32,
        timed_out: bool,
    },

    #[error("Stage '{stage}' was cancelled")]
    Cancelled { stage: String },

    #[error("Stage '{stage}' is blocked by earlier stage '{blocking}' ({status})")]
    Blocked {
        stage: String,
        blocking: String,
        status: String,
    },

    #[error("Stage '{0}' is not skippable")]
    NotSkippable(String),

    #[error("Stage '{stage}' cannot be skipped while {status}")]
    InvalidSkip { stage: String, status: String },

    #[error("Stage '{0}' already succeeded; pass --force to run it again")]
    RetryRequiresForce(String),

    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),

    #[error("Ledger error: {0}")]
    Ledger(#[from] LedgerError),

    #[error("Runner error: {0}")]
    Runner(#[from] RunnerError),
}

impl WorkflowError {
    /// Name of the stage this error is attributed to, if any.
    pub fn stage(&self) -> Option<&str> {
        match self {
            WorkflowError::Precondition { stage, .. }
            | WorkflowError::Execution { stage, .. }
            | WorkflowError::Cancelled { stage }
            | WorkflowError::Blocked { stage, .. }
            | WorkflowError::InvalidSkip { stage, .. } => Some(stage),
            WorkflowError::NotSkippable(stage) | WorkflowError::RetryRequiresForce(stage) => {
                Some(stage)
            }
            _ => None,
        }
    }

    /// Process exit code the CLI reports for this error.
    pub fn exit_code(&self) -> i32 {
        match self {
            WorkflowError::Cancelled { .. } => 130,
            WorkflowError::Configuration(_)
            | WorkflowError::Ledger(_)
            | WorkflowError::InvalidParameter(_) => 2,
            _ => 1,
        }
    }
}

fn describe_failure(exit_code: &i32, timed_out: &bool) -> String {
    if *timed_out {
        format!("timed out (exit code {})", exit_code)
    } else {
        format!("exited with code {}", exit_code)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_precondition_message_lists_every_check() {
        let err = WorkflowError::Precondition {
            stage: "upload".to_string(),
            failed: vec!["env:HF_USER".to_string(), "artifact:dataset".to_string()],
        };
        assert_eq!(
            err.to_string(),
            "Stage 'upload' is not ready: env:HF_USER, artifact:dataset"
        );
        assert_eq!(err.stage(), Some("upload"));
        assert_eq!(err.exit_code(), 1);
    }

    #[test]
    fn test_execution_message() {
        let failed = WorkflowError::Execution {
            stage: "record".to_string(),
            exit_code: 1,
            timed_out: false,
        };
        assert_eq!(failed.to_string(), "Stage 'record' exited with code 1");

        let timed_out = WorkflowError::Execution {
            stage: "record".to_string(),
            exit_code: 124,
            timed_out: true,
        };
        assert_eq!(
            timed_out.to_string(),
            "Stage 'record' timed out (exit code 124)"
        );
    }

    #[test]
    fn test_exit_codes() {
        let cancelled = WorkflowError::Cancelled {
            stage: "teleoperate".to_string(),
        };
        assert_eq!(cancelled.exit_code(), 130);
        assert_eq!(WorkflowError::from(RegistryError::Empty).exit_code(), 2);
    }

    #[test]
    fn test_only_wait_errors_follow_a_launch() {
        let lost = RunnerError::Wait {
            stage: "record".to_string(),
            source: std::io::Error::other("wait failed"),
        };
        assert!(lost.process_started());
        assert!(!RunnerError::EmptyCommand("record".into()).process_started());
    }

    #[test]
    fn test_configuration_classification() {
        assert!(!RegistryError::UnknownStage("x".into()).is_configuration_error());
        assert!(RegistryError::EmptyCommand("x".into()).is_configuration_error());
    }
}
