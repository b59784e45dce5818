//! Run ledger: durable, crash-safe record of stage outcomes.
//!
//! One JSON snapshot per dataset lives at `<state_dir>/runs/<dataset>.json`.
//! Every write serializes the whole [`WorkflowRun`] into a temporary file in
//! the same directory, syncs it, and renames it over the previous snapshot,
//! so a crash mid-write leaves the last committed state intact.

pub mod run;

pub use run::{StageRecord, StageStatus, WorkflowRun, NOTE_INTERRUPTED, NOTE_NOT_REQUESTED};

use std::fs;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

use chrono::Utc;
use tempfile::NamedTempFile;
use tracing::{debug, info, warn};

use crate::config::OrchestratorConfig;
use crate::error::LedgerError;
use crate::runner::ExecutionResult;

/// File-backed store of workflow runs, keyed by dataset.
#[derive(Debug, Clone)]
pub struct RunLedger {
    runs_dir: PathBuf,
}

impl RunLedger {
    /// Creates a ledger storing snapshots in `runs_dir`.
    pub fn new(runs_dir: impl Into<PathBuf>) -> Self {
        Self {
            runs_dir: runs_dir.into(),
        }
    }

    /// Creates a ledger under the configured state directory.
    pub fn from_config(config: &OrchestratorConfig) -> Self {
        Self::new(config.runs_dir())
    }

    /// Path of the snapshot for `dataset`.
    pub fn snapshot_path(&self, dataset: &str) -> PathBuf {
        self.runs_dir.join(format!("{}.json", dataset))
    }

    /// Directory receiving archived snapshots.
    pub fn archive_dir(&self) -> PathBuf {
        self.runs_dir.join("archive")
    }

    /// Whether a snapshot exists for `dataset`.
    pub fn exists(&self, dataset: &str) -> bool {
        self.snapshot_path(dataset).is_file()
    }

    /// Loads the run recorded for `dataset`.
    ///
    /// Stages found `running` were interrupted by a crash or kill; they are
    /// returned as `failed` with unreliable artifacts. The conversion is not
    /// written back until the caller saves.
    ///
    /// # Errors
    ///
    /// - [`LedgerError::NotFound`] when no snapshot exists.
    /// - [`LedgerError::Corrupted`] when the snapshot cannot be parsed or
    ///   violates stage ordering. Corrupted snapshots are never repaired.
    pub fn load(&self, dataset: &str) -> Result<WorkflowRun, LedgerError> {
        let path = self.snapshot_path(dataset);
        let content = match fs::read_to_string(&path) {
            Ok(content) => content,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                return Err(LedgerError::NotFound(dataset.to_string()))
            }
            Err(e) => return Err(e.into()),
        };

        let mut run: WorkflowRun =
            serde_json::from_str(&content).map_err(|e| LedgerError::Corrupted {
                path: path.clone(),
                message: e.to_string(),
            })?;

        if run.dataset != dataset {
            return Err(LedgerError::Corrupted {
                path,
                message: format!("snapshot belongs to dataset '{}'", run.dataset),
            });
        }
        if let Err(e) = run.check_monotonic() {
            return Err(LedgerError::Corrupted {
                path,
                message: e.to_string(),
            });
        }

        for stage in run.recover_interrupted() {
            warn!(
                run_id = %run.run_id,
                stage = %stage,
                "Stage was left running by a previous invocation; marking it failed"
            );
        }

        debug!(run_id = %run.run_id, "Loaded ledger from {}", path.display());
        Ok(run)
    }

    /// Atomically replaces the snapshot for `run.dataset`.
    ///
    /// # Errors
    ///
    /// Refuses to write a run whose statuses are not monotonic.
    pub fn save(&self, run: &WorkflowRun) -> Result<(), LedgerError> {
        run.check_monotonic()?;

        fs::create_dir_all(&self.runs_dir)?;
        let path = self.snapshot_path(&run.dataset);

        let mut temp = NamedTempFile::new_in(&self.runs_dir)?;
        serde_json::to_writer_pretty(&mut temp, run)?;
        temp.write_all(b"\n")?;
        temp.flush()?;
        temp.as_file().sync_all()?;
        temp.persist(&path).map_err(|e| LedgerError::Io(e.error))?;
        sync_dir(&self.runs_dir);

        debug!(run_id = %run.run_id, "Saved ledger to {}", path.display());
        Ok(())
    }

    /// Applies a stage outcome to `run` and commits it.
    pub fn mark_stage_result(
        &self,
        run: &mut WorkflowRun,
        stage: &str,
        result: &ExecutionResult,
    ) -> Result<(), LedgerError> {
        run.apply_result(stage, result);
        self.save(run)
    }

    /// Moves the snapshot for `dataset` into the archive.
    ///
    /// Readable snapshots are archived as `<run_id>.json`; unreadable ones as
    /// `<dataset>-<timestamp>.corrupted.json`. Returns the archive path, or
    /// `None` when there was nothing to archive.
    pub fn archive(&self, dataset: &str) -> Result<Option<PathBuf>, LedgerError> {
        if !self.exists(dataset) {
            return Ok(None);
        }
        let path = self.snapshot_path(dataset);

        let name = match self.load(dataset) {
            Ok(run) => format!("{}.json", run.run_id),
            Err(LedgerError::Corrupted { .. }) => format!(
                "{}-{}.corrupted.json",
                dataset,
                Utc::now().format("%Y%m%dT%H%M%S")
            ),
            Err(e) => return Err(e),
        };

        let archive_dir = self.archive_dir();
        fs::create_dir_all(&archive_dir)?;
        let target = unique_path(&archive_dir, &name);
        fs::rename(&path, &target)?;

        info!("Archived ledger for '{}' to {}", dataset, target.display());
        Ok(Some(target))
    }
}

/// Avoids clobbering an earlier archive with the same name.
fn unique_path(dir: &Path, name: &str) -> PathBuf {
    let candidate = dir.join(name);
    if !candidate.exists() {
        return candidate;
    }
    let stem = name.trim_end_matches(".json");
    (1..)
        .map(|n| dir.join(format!("{}.{}.json", stem, n)))
        .find(|p| !p.exists())
        .unwrap_or(candidate)
}

#[cfg(unix)]
fn sync_dir(dir: &Path) {
    if let Err(e) = fs::File::open(dir).and_then(|d| d.sync_all()) {
        debug!("Could not sync {}: {}", dir.display(), e);
    }
}

#[cfg(not(unix))]
fn sync_dir(_dir: &Path) {}
