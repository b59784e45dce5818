//! Workflow parameters and the resolved environment snapshot.
//!
//! The CLI turns user flags into [`WorkflowParameters`]; at the start of
//! every invocation those are frozen together with the process environment
//! into an [`EnvironmentSnapshot`] that every later component reads.

pub mod camera;
pub mod environment;

pub use camera::CameraSpec;
pub use environment::EnvironmentSnapshot;

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::error::WorkflowError;

/// Placeholders a stage template may reference.
pub const PARAMETER_KEYS: &[&str] = &[
    "dataset",
    "repo_id",
    "hf_user",
    "episodes",
    "episode_seconds",
    "reset_seconds",
    "teleop_seconds",
    "task",
    "cameras",
    "follower_port",
    "leader_port",
    "follower_id",
    "leader_id",
    "policy",
    "policy_repo_id",
    "device",
    "steps",
    "batch_size",
    "eval_env",
    "dataset_dir",
    "calibration_dir",
    "train_output_dir",
];

/// User-supplied parameters for one workflow run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkflowParameters {
    /// Dataset name; also keys the run ledger.
    pub dataset: String,
    /// Number of episodes to record.
    pub episodes: u32,
    /// Length of each recorded episode.
    pub episode_seconds: u64,
    /// Time to reset the scene between episodes.
    pub reset_seconds: u64,
    /// Length of the teleoperation check.
    pub teleop_seconds: u64,
    /// Natural-language task stored with every episode.
    pub task: String,
    /// Cameras attached to the follower.
    pub cameras: Vec<CameraSpec>,
    /// Follower serial device; overrides `FOLLOWER_PORT`.
    pub follower_port: Option<String>,
    /// Leader serial device; overrides `LEADER_PORT`.
    pub leader_port: Option<String>,
    /// Hub account; overrides `HF_USER`.
    pub hf_user: Option<String>,
    /// Calibration id of the follower arm.
    pub follower_id: String,
    /// Calibration id of the leader arm.
    pub leader_id: String,
    /// Policy architecture handed to training.
    pub policy: String,
    /// Training device.
    pub device: String,
    /// Training steps.
    #[serde(default = "default_steps")]
    pub steps: u64,
    /// Training batch size.
    #[serde(default = "default_batch_size")]
    pub batch_size: u32,
    /// Simulation environment the trained policy is evaluated in.
    #[serde(default = "default_eval_env")]
    pub eval_env: String,
    /// Local dataset root; defaults to `<state_dir>/datasets/<dataset>`.
    pub dataset_root: Option<PathBuf>,
    /// Optional stages to include in this run.
    pub include: Vec<String>,
}

impl WorkflowParameters {
    /// Creates parameters with defaults for everything but the dataset.
    pub fn new(dataset: impl Into<String>) -> Self {
        Self {
            dataset: dataset.into(),
            episodes: 5,
            episode_seconds: 30,
            reset_seconds: 10,
            teleop_seconds: 60,
            task: "Pick and place".to_string(),
            cameras: vec![CameraSpec::default()],
            follower_port: None,
            leader_port: None,
            hf_user: None,
            follower_id: "follower_arm".to_string(),
            leader_id: "leader_arm".to_string(),
            policy: "act".to_string(),
            device: "cuda".to_string(),
            steps: default_steps(),
            batch_size: default_batch_size(),
            eval_env: default_eval_env(),
            dataset_root: None,
            include: Vec::new(),
        }
    }

    /// Sets the episode plan.
    pub fn with_episodes(mut self, episodes: u32, episode_seconds: u64) -> Self {
        self.episodes = episodes;
        self.episode_seconds = episode_seconds;
        self
    }

    /// Sets the camera list.
    pub fn with_cameras(mut self, cameras: Vec<CameraSpec>) -> Self {
        self.cameras = cameras;
        self
    }

    /// Drops the port and account values so the next snapshot reads them
    /// from the environment again.
    pub fn clear_environment_overrides(&mut self) {
        self.follower_port = None;
        self.leader_port = None;
        self.hf_user = None;
    }

    /// Includes an optional stage.
    pub fn including(mut self, stage: impl Into<String>) -> Self {
        self.include.push(stage.into());
        self
    }

    /// Validates the parameters before anything runs.
    pub fn validate(&self) -> Result<(), WorkflowError> {
        if !is_valid_dataset_name(&self.dataset) {
            return Err(WorkflowError::InvalidParameter(format!(
                "dataset '{}' must start with a letter or digit and contain only letters, digits, '.', '_' or '-'",
                self.dataset
            )));
        }
        if self.episodes == 0 {
            return Err(WorkflowError::InvalidParameter(
                "episodes must be at least 1".to_string(),
            ));
        }
        if self.episode_seconds == 0 {
            return Err(WorkflowError::InvalidParameter(
                "episode-seconds must be at least 1".to_string(),
            ));
        }
        if self.teleop_seconds == 0 {
            return Err(WorkflowError::InvalidParameter(
                "teleop-seconds must be at least 1".to_string(),
            ));
        }
        if self.steps == 0 || self.batch_size == 0 {
            return Err(WorkflowError::InvalidParameter(
                "steps and batch-size must be at least 1".to_string(),
            ));
        }
        if self.task.trim().is_empty() {
            return Err(WorkflowError::InvalidParameter(
                "task description must not be empty".to_string(),
            ));
        }
        for (idx, camera) in self.cameras.iter().enumerate() {
            if self.cameras[..idx].iter().any(|c| c.name == camera.name) {
                return Err(WorkflowError::InvalidParameter(format!(
                    "camera '{}' is declared twice",
                    camera.name
                )));
            }
        }
        Ok(())
    }
}

fn default_steps() -> u64 {
    10_000
}

fn default_batch_size() -> u32 {
    8
}

fn default_eval_env() -> String {
    "simxarm".to_string()
}

fn is_valid_dataset_name(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(first) if first.is_ascii_alphanumeric() => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-'))
}
