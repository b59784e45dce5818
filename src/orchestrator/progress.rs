//! Human-readable progress lines.
//!
//! Presentation only: nothing here feeds back into control flow.

use std::time::Duration;

use crate::ledger::{StageStatus, WorkflowRun};
use crate::runner::format_duration;

/// Receives per-stage progress events from the orchestrator.
pub trait ProgressReporter: Send + Sync {
    /// A run was created or loaded for execution.
    fn run_started(&self, _run: &WorkflowRun, _resumed: bool) {}

    /// A stage is about to launch its command.
    fn stage_started(&self, position: usize, total: usize, stage: &str, argv: &[String]);

    /// A stage reached a status, with the attempt duration if it ran.
    fn stage_finished(
        &self,
        position: usize,
        total: usize,
        stage: &str,
        status: StageStatus,
        duration: Option<Duration>,
        detail: Option<&str>,
    );

    /// Every stage succeeded or was skipped.
    fn run_finished(&self, _run: &WorkflowRun) {}
}

/// Prints progress lines to stdout.
#[derive(Debug, Default, Clone, Copy)]
pub struct ConsoleReporter;

impl ProgressReporter for ConsoleReporter {
    fn run_started(&self, run: &WorkflowRun, resumed: bool) {
        if resumed {
            match run.stages.get(run.current_index) {
                Some(record) => println!("Resuming run {} at stage '{}'", run.run_id, record.name),
                None => println!("Run {} is already complete", run.run_id),
            }
        } else {
            println!("Starting run {}", run.run_id);
        }
    }

    fn stage_started(&self, position: usize, total: usize, stage: &str, argv: &[String]) {
        println!("[{}/{}] {:<20} running: {}", position, total, stage, argv.join(" "));
    }

    fn stage_finished(
        &self,
        position: usize,
        total: usize,
        stage: &str,
        status: StageStatus,
        duration: Option<Duration>,
        detail: Option<&str>,
    ) {
        let mut line = format!("[{}/{}] {:<20} {}", position, total, stage, status);
        if let Some(duration) = duration {
            line.push_str(&format!(" ({})", format_duration(duration)));
        }
        if let Some(detail) = detail {
            line.push_str(&format!(": {}", detail));
        }
        println!("{}", line);
    }

    fn run_finished(&self, run: &WorkflowRun) {
        println!("Run {} complete", run.run_id);
    }
}

/// Discards progress events.
#[derive(Debug, Default, Clone, Copy)]
pub struct SilentReporter;

impl ProgressReporter for SilentReporter {
    fn stage_started(&self, _position: usize, _total: usize, _stage: &str, _argv: &[String]) {}

    fn stage_finished(
        &self,
        _position: usize,
        _total: usize,
        _stage: &str,
        _status: StageStatus,
        _duration: Option<Duration>,
        _detail: Option<&str>,
    ) {
    }
}
