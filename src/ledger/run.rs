//! Workflow run records.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::LedgerError;
use crate::registry::StageRegistry;
use crate::runner::ExecutionResult;
use crate::workflow::WorkflowParameters;

/// Note recorded for optional stages that were not requested.
pub const NOTE_NOT_REQUESTED: &str = "not requested";
/// Note recorded for stages found `running` when a ledger is loaded.
pub const NOTE_INTERRUPTED: &str = "interrupted";

/// Status of one stage within a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StageStatus {
    Pending,
    Running,
    Succeeded,
    Failed,
    Skipped,
}

impl StageStatus {
    /// Succeeded or skipped: later stages may proceed.
    pub fn is_complete(&self) -> bool {
        matches!(self, StageStatus::Succeeded | StageStatus::Skipped)
    }
}

impl std::fmt::Display for StageStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StageStatus::Pending => write!(f, "pending"),
            StageStatus::Running => write!(f, "running"),
            StageStatus::Succeeded => write!(f, "succeeded"),
            StageStatus::Failed => write!(f, "failed"),
            StageStatus::Skipped => write!(f, "skipped"),
        }
    }
}

/// Recorded state of one stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageRecord {
    pub name: String,
    pub status: StageStatus,
    /// Number of times the command was launched.
    #[serde(default)]
    pub attempts: u32,
    #[serde(default)]
    pub last_result: Option<ExecutionResult>,
    /// Set when a failed or interrupted attempt may have left partial output.
    #[serde(default)]
    pub artifacts_unreliable: bool,
    #[serde(default)]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub finished_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub note: Option<String>,
}

impl StageRecord {
    /// A fresh pending record.
    pub fn pending(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            status: StageStatus::Pending,
            attempts: 0,
            last_result: None,
            artifacts_unreliable: false,
            started_at: None,
            finished_at: None,
            note: None,
        }
    }

    /// Returns the record to `pending`, keeping attempt history.
    pub fn reset(&mut self) {
        self.status = StageStatus::Pending;
        self.started_at = None;
        self.finished_at = None;
        self.note = None;
    }
}

/// One end-to-end attempt to execute the pipeline for a dataset.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowRun {
    /// `<dataset>-<UTC timestamp>`.
    pub run_id: String,
    pub dataset: String,
    /// Stage records in pipeline order.
    pub stages: Vec<StageRecord>,
    /// Index of the first stage that is neither succeeded nor skipped.
    pub current_index: usize,
    pub started_at: DateTime<Utc>,
    #[serde(default)]
    pub finished_at: Option<DateTime<Utc>>,
    /// Parameters of the invocation that created the run.
    #[serde(default)]
    pub parameters: Option<WorkflowParameters>,
}

impl WorkflowRun {
    /// Creates a run with every stage pending.
    pub fn new<I, S>(dataset: impl Into<String>, stages: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let dataset = dataset.into();
        let started_at = Utc::now();
        Self {
            run_id: format!("{}-{}", dataset, started_at.format("%Y%m%dT%H%M%S")),
            dataset,
            stages: stages.into_iter().map(StageRecord::pending).collect(),
            current_index: 0,
            started_at,
            finished_at: None,
            parameters: None,
        }
    }

    /// Creates a run for `registry`; optional stages that were not requested
    /// start out skipped.
    pub fn for_registry(registry: &StageRegistry, params: &WorkflowParameters) -> Self {
        let mut run = Self::new(params.dataset.clone(), registry.names());
        for (record, spec) in run.stages.iter_mut().zip(registry.list_stages()) {
            if spec.optional && !params.include.contains(&spec.name) {
                record.status = StageStatus::Skipped;
                record.note = Some(NOTE_NOT_REQUESTED.to_string());
            }
        }
        run.parameters = Some(params.clone());
        run.refresh();
        run
    }

    /// Position of a stage.
    pub fn position(&self, name: &str) -> Option<usize> {
        self.stages.iter().position(|s| s.name == name)
    }

    /// Record of a stage.
    pub fn record(&self, name: &str) -> Option<&StageRecord> {
        self.stages.iter().find(|s| s.name == name)
    }

    /// Mutable record of a stage.
    pub fn record_mut(&mut self, name: &str) -> Option<&mut StageRecord> {
        self.stages.iter_mut().find(|s| s.name == name)
    }

    /// Status of a stage.
    pub fn status_of(&self, name: &str) -> Option<StageStatus> {
        self.record(name).map(|r| r.status)
    }

    /// Recorded stage names in order.
    pub fn stage_names(&self) -> Vec<&str> {
        self.stages.iter().map(|s| s.name.as_str()).collect()
    }

    /// Index of the first stage that is neither succeeded nor skipped.
    pub fn first_incomplete(&self) -> Option<usize> {
        self.stages.iter().position(|s| !s.status.is_complete())
    }

    /// Whether every stage succeeded or was skipped.
    pub fn is_complete(&self) -> bool {
        self.first_incomplete().is_none()
    }

    /// Recomputes `current_index` and `finished_at` from the stage statuses.
    pub fn refresh(&mut self) {
        match self.first_incomplete() {
            Some(idx) => {
                self.current_index = idx;
                self.finished_at = None;
            }
            None => {
                self.current_index = self.stages.len();
                if self.finished_at.is_none() {
                    self.finished_at = Some(Utc::now());
                }
            }
        }
    }

    /// Records that a stage's command is about to be launched.
    pub fn mark_running(&mut self, name: &str) {
        if let Some(record) = self.record_mut(name) {
            record.status = StageStatus::Running;
            record.attempts += 1;
            record.started_at = Some(Utc::now());
            record.finished_at = None;
            record.note = None;
        }
        self.refresh();
    }

    /// Applies the outcome of a stage attempt.
    pub fn apply_result(&mut self, name: &str, result: &ExecutionResult) {
        if let Some(record) = self.record_mut(name) {
            if result.is_success() {
                record.status = StageStatus::Succeeded;
                record.artifacts_unreliable = false;
                record.note = None;
            } else {
                record.status = StageStatus::Failed;
                record.artifacts_unreliable = true;
                record.note = Some(result.summary());
            }
            if record.started_at.is_none() {
                record.started_at = Some(result.started_at);
            }
            record.finished_at = Some(result.finished_at);
            record.last_result = Some(result.clone());
        }
        self.refresh();
    }

    /// Records a failure that has no exit status, e.g. the program could not
    /// be launched or was lost track of while running. `process_ran` flags
    /// the stage's artifacts as unreliable.
    pub fn mark_failed(&mut self, name: &str, note: impl Into<String>, process_ran: bool) {
        if let Some(record) = self.record_mut(name) {
            record.status = StageStatus::Failed;
            record.artifacts_unreliable |= process_ran;
            record.finished_at = Some(Utc::now());
            record.note = Some(note.into());
        }
        self.refresh();
    }

    /// Attaches a note without changing the stage status.
    pub fn set_note(&mut self, name: &str, note: impl Into<String>) {
        if let Some(record) = self.record_mut(name) {
            record.note = Some(note.into());
        }
    }

    /// Marks a stage skipped by the operator.
    pub fn mark_skipped(&mut self, name: &str, note: impl Into<String>) {
        if let Some(record) = self.record_mut(name) {
            record.status = StageStatus::Skipped;
            record.finished_at = Some(Utc::now());
            record.note = Some(note.into());
        }
        self.refresh();
    }

    /// Returns the stage at `index` and every later stage to `pending`.
    ///
    /// Optional stages that were never requested stay skipped.
    pub fn reset_from(&mut self, index: usize) {
        for record in self.stages.iter_mut().skip(index) {
            let not_requested = record.status == StageStatus::Skipped
                && record.note.as_deref() == Some(NOTE_NOT_REQUESTED);
            if !not_requested {
                record.reset();
            }
        }
        self.refresh();
    }

    /// Moves optional stages that were not requested before back to
    /// `pending` when they are now requested.
    ///
    /// A stage is only re-enabled while nothing after it has succeeded.
    /// Returns the names of the re-enabled stages.
    pub fn include_optional(&mut self, requested: &[String]) -> Vec<String> {
        let mut included = Vec::new();
        for idx in 0..self.stages.len() {
            let record = &self.stages[idx];
            let not_requested = record.status == StageStatus::Skipped
                && record.note.as_deref() == Some(NOTE_NOT_REQUESTED);
            if !not_requested || !requested.contains(&record.name) {
                continue;
            }
            let later_succeeded = self.stages[idx + 1..]
                .iter()
                .any(|s| s.status == StageStatus::Succeeded);
            if later_succeeded {
                continue;
            }
            self.stages[idx].reset();
            included.push(self.stages[idx].name.clone());
        }
        self.refresh();
        included
    }

    /// Converts stages left `running` by a crash into failures.
    ///
    /// Returns the names of the converted stages.
    pub fn recover_interrupted(&mut self) -> Vec<String> {
        let mut recovered = Vec::new();
        for record in &mut self.stages {
            if record.status == StageStatus::Running {
                record.status = StageStatus::Failed;
                record.artifacts_unreliable = true;
                record.note = Some(NOTE_INTERRUPTED.to_string());
                recovered.push(record.name.clone());
            }
        }
        if !recovered.is_empty() {
            self.refresh();
        }
        recovered
    }

    /// Checks that no stage has progressed past an incomplete earlier stage.
    ///
    /// A stage may only be `succeeded` or `running` when every earlier stage
    /// is `succeeded` or `skipped`.
    pub fn check_monotonic(&self) -> Result<(), LedgerError> {
        let mut blocking: Option<&StageRecord> = None;
        for record in &self.stages {
            if matches!(record.status, StageStatus::Succeeded | StageStatus::Running) {
                if let Some(blocking) = blocking {
                    return Err(LedgerError::InvariantViolation {
                        stage: record.name.clone(),
                        status: record.status.to_string(),
                        blocking: blocking.name.clone(),
                        blocking_status: blocking.status.to_string(),
                    });
                }
            }
            if blocking.is_none() && !record.status.is_complete() {
                blocking = Some(record);
            }
        }
        Ok(())
    }
}
