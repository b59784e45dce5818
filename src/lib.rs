//! rigforge: resumable orchestrator for robot teleoperation workflows.
//!
//! This library sequences the external tools of a two-arm teleoperation
//! pipeline (discovery, calibration, teleoperation, recording, upload and
//! optional diagnostics, replay, training and evaluation), validates each stage's preconditions, and
//! records every outcome in a crash-safe ledger so failed runs resume.

// Core modules
pub mod cli;
pub mod config;
pub mod error;
pub mod ledger;
pub mod orchestrator;
pub mod precondition;
pub mod registry;
pub mod runner;
pub mod workflow;

// Re-export commonly used types
pub use config::{ConfigError, OrchestratorConfig};
pub use error::{LedgerError, RegistryError, RunnerError, WorkflowError};
pub use ledger::{RunLedger, StageStatus, WorkflowRun};
pub use orchestrator::WorkflowOrchestrator;
pub use registry::{StageRegistry, StageSpec};
pub use runner::{ExecutionResult, ProcessRunner, StageExecutor};
pub use workflow::{EnvironmentSnapshot, WorkflowParameters};
