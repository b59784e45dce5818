//! Stage readiness checks.
//!
//! A [`Precondition`] is a named boolean check evaluated immediately before
//! its stage runs. [`PreconditionChecker::check`] evaluates every check of a
//! stage and returns the names of all that failed, so an operator sees every
//! setup problem at once.
//!
//! Failure names have the form `<kind>:<subject>`, e.g. `env:HF_USER`,
//! `device:FOLLOWER_PORT`, `artifact:dataset`, `camera:front`.

use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::ledger::{StageStatus, WorkflowRun};
use crate::registry::{StageRegistry, StageSpec};
use crate::workflow::EnvironmentSnapshot;

/// One readiness check declared by a stage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "check", rename_all = "snake_case")]
pub enum Precondition {
    /// Environment variable is set to a non-blank value.
    EnvSet { var: String },
    /// Environment variable names a device node that exists.
    DevicePresent { var: String },
    /// Path template resolves to an existing file or directory.
    PathExists { path: String },
    /// Path template resolves to a non-empty directory.
    DirNonEmpty { path: String },
    /// Artifact produced by an earlier stage is available and reliable.
    Artifact { name: String },
    /// Every configured camera device exists.
    CamerasPresent,
    /// Program is found on `PATH`.
    CommandAvailable { program: String },
}

impl Precondition {
    /// Path template checked by this precondition, if any.
    pub fn path_template(&self) -> Option<&str> {
        match self {
            Precondition::PathExists { path } | Precondition::DirNonEmpty { path } => Some(path),
            _ => None,
        }
    }

    /// Short description for `stages` output.
    pub fn describe(&self) -> String {
        match self {
            Precondition::EnvSet { var } => format!("env:{}", var),
            Precondition::DevicePresent { var } => format!("device:{}", var),
            Precondition::PathExists { path } => format!("path:{}", path),
            Precondition::DirNonEmpty { path } => format!("dir:{}", path),
            Precondition::Artifact { name } => format!("artifact:{}", name),
            Precondition::CamerasPresent => "cameras".to_string(),
            Precondition::CommandAvailable { program } => format!("command:{}", program),
        }
    }
}

/// Evaluates stage preconditions against an environment snapshot.
///
/// Holds no state besides the registry, which it needs to locate the
/// producers of artifacts.
#[derive(Debug, Clone, Copy)]
pub struct PreconditionChecker<'a> {
    registry: &'a StageRegistry,
}

impl<'a> PreconditionChecker<'a> {
    pub fn new(registry: &'a StageRegistry) -> Self {
        Self { registry }
    }

    /// Returns the names of every failed precondition; empty means ready.
    ///
    /// Nothing is cached: device nodes and files are inspected on each call.
    pub fn check(
        &self,
        stage: &StageSpec,
        env: &EnvironmentSnapshot,
        run: &WorkflowRun,
    ) -> Vec<String> {
        let mut failed = Vec::new();
        for precondition in &stage.preconditions {
            match precondition {
                Precondition::EnvSet { var } => {
                    if env.var(var).is_none() {
                        failed.push(format!("env:{}", var));
                    }
                }
                Precondition::DevicePresent { var } => {
                    let present = env.var(var).map(|p| Path::new(p).exists()).unwrap_or(false);
                    if !present {
                        failed.push(format!("device:{}", var));
                    }
                }
                Precondition::PathExists { path } => {
                    let resolved = env.render_path(path);
                    if !resolved.exists() {
                        failed.push(format!("path:{}", resolved.display()));
                    }
                }
                Precondition::DirNonEmpty { path } => {
                    let resolved = env.render_path(path);
                    if !is_non_empty_dir(&resolved) {
                        failed.push(format!("dir:{}", resolved.display()));
                    }
                }
                Precondition::Artifact { name } => {
                    if !self.artifact_available(name, env, run) {
                        failed.push(format!("artifact:{}", name));
                    }
                }
                Precondition::CamerasPresent => {
                    for camera in &env.params().cameras {
                        if !camera.device_path().exists() {
                            failed.push(format!("camera:{}", camera.name));
                        }
                    }
                }
                Precondition::CommandAvailable { program } => {
                    if !command_available(program, env.var("PATH")) {
                        failed.push(format!("command:{}", program));
                    }
                }
            }
        }

        debug!(
            stage = %stage.name,
            checked = stage.preconditions.len(),
            failed = failed.len(),
            "Evaluated preconditions"
        );
        failed
    }

    /// Artifacts with a path must exist on disk (directories non-empty);
    /// logical artifacts require their producer to have succeeded. Output of
    /// a failed or interrupted attempt is never trusted.
    fn artifact_available(&self, name: &str, env: &EnvironmentSnapshot, run: &WorkflowRun) -> bool {
        let Some(producer) = self.registry.producer_of(name) else {
            return false;
        };
        let record = run.record(&producer.name);
        if record.map(|r| r.artifacts_unreliable).unwrap_or(false) {
            return false;
        }

        match self.registry.artifact(name).and_then(|a| a.path.as_deref()) {
            Some(template) => {
                let path = env.render_path(template);
                if path.is_dir() {
                    is_non_empty_dir(&path)
                } else {
                    path.exists()
                }
            }
            None => record.map(|r| r.status) == Some(StageStatus::Succeeded),
        }
    }
}

fn is_non_empty_dir(path: &Path) -> bool {
    std::fs::read_dir(path)
        .map(|mut entries| entries.next().is_some())
        .unwrap_or(false)
}

/// Looks `program` up the way `execvp` would.
fn command_available(program: &str, path_var: Option<&str>) -> bool {
    if program.contains('/') {
        return is_executable(Path::new(program));
    }
    path_var
        .map(|paths| {
            std::env::split_paths(paths).any(|dir| is_executable(&dir.join(program)))
        })
        .unwrap_or(false)
}

#[cfg(unix)]
fn is_executable(path: &Path) -> bool {
    use std::os::unix::fs::PermissionsExt;
    path.metadata()
        .map(|m| m.is_file() && m.permissions().mode() & 0o111 != 0)
        .unwrap_or(false)
}

#[cfg(not(unix))]
fn is_executable(path: &Path) -> bool {
    path.is_file()
}
