//! Immutable environment snapshot captured once per invocation.

use std::collections::BTreeMap;
use std::path::PathBuf;

use chrono::{DateTime, Utc};

use super::camera::toolkit_cameras;
use super::WorkflowParameters;
use crate::config::OrchestratorConfig;
use crate::registry::builtin::{FOLLOWER_PORT_VAR, HF_USER_VAR, LEADER_PORT_VAR};
use crate::registry::{template, StageSpec};

/// Frozen view of parameters, environment variables and derived values.
///
/// Built at the start of an invocation and shared read-only by the
/// precondition checker, argument resolution and the runner.
#[derive(Debug, Clone)]
pub struct EnvironmentSnapshot {
    params: WorkflowParameters,
    vars: BTreeMap<String, String>,
    values: BTreeMap<String, String>,
    captured_at: DateTime<Utc>,
}

impl EnvironmentSnapshot {
    /// Captures the current process environment.
    pub fn capture(params: WorkflowParameters, config: &OrchestratorConfig) -> Self {
        Self::from_vars(params, config, std::env::vars())
    }

    /// Builds a snapshot from an explicit variable set.
    ///
    /// Explicit port and account parameters override the matching variables.
    pub fn from_vars<I>(params: WorkflowParameters, config: &OrchestratorConfig, vars: I) -> Self
    where
        I: IntoIterator<Item = (String, String)>,
    {
        let mut vars: BTreeMap<String, String> = vars.into_iter().collect();
        for (var, value) in [
            (FOLLOWER_PORT_VAR, &params.follower_port),
            (LEADER_PORT_VAR, &params.leader_port),
            (HF_USER_VAR, &params.hf_user),
        ] {
            if let Some(value) = value {
                vars.insert(var.to_string(), value.clone());
            }
        }

        let values = derive_values(&params, config, &vars);
        Self {
            params,
            vars,
            values,
            captured_at: Utc::now(),
        }
    }

    /// Parameters this snapshot was built from.
    pub fn params(&self) -> &WorkflowParameters {
        &self.params
    }

    /// Value of an environment variable, treating blank values as unset.
    pub fn var(&self, name: &str) -> Option<&str> {
        self.vars
            .get(name)
            .map(String::as_str)
            .filter(|v| !v.trim().is_empty())
    }

    /// Every captured environment variable.
    pub fn vars(&self) -> &BTreeMap<String, String> {
        &self.vars
    }

    /// Placeholder values available to templates.
    pub fn values(&self) -> &BTreeMap<String, String> {
        &self.values
    }

    /// When the snapshot was captured.
    pub fn captured_at(&self) -> DateTime<Utc> {
        self.captured_at
    }

    /// Renders a path or argument template.
    pub fn render(&self, template: &str) -> String {
        template::render(template, &self.values)
    }

    /// Renders a path template into a path.
    pub fn render_path(&self, template: &str) -> PathBuf {
        PathBuf::from(self.render(template))
    }

    /// Fully resolved argv for a stage, program first.
    pub fn resolve_command(&self, stage: &StageSpec) -> Vec<String> {
        stage.command.render(&self.values)
    }

    /// Local dataset directory.
    pub fn dataset_dir(&self) -> PathBuf {
        PathBuf::from(self.values.get("dataset_dir").cloned().unwrap_or_default())
    }
}

fn derive_values(
    params: &WorkflowParameters,
    config: &OrchestratorConfig,
    vars: &BTreeMap<String, String>,
) -> BTreeMap<String, String> {
    let var = |name: &str| {
        vars.get(name)
            .map(|v| v.trim().to_string())
            .unwrap_or_default()
    };

    let hf_user = var(HF_USER_VAR);
    let repo_id = if hf_user.is_empty() {
        params.dataset.clone()
    } else {
        format!("{}/{}", hf_user, params.dataset)
    };
    let dataset_dir = params
        .dataset_root
        .clone()
        .unwrap_or_else(|| config.state_dir.join("datasets").join(&params.dataset));
    let policy_repo_id = if hf_user.is_empty() {
        format!("{}-{}", params.dataset, params.policy)
    } else {
        format!("{}/{}-{}", hf_user, params.dataset, params.policy)
    };
    let train_output_dir = config
        .state_dir
        .join("outputs")
        .join("train")
        .join(format!("{}-{}", params.dataset, params.policy));

    let mut values = BTreeMap::new();
    let mut set = |key: &str, value: String| {
        values.insert(key.to_string(), value);
    };
    set("dataset", params.dataset.clone());
    set("repo_id", repo_id);
    set("hf_user", hf_user);
    set("episodes", params.episodes.to_string());
    set("episode_seconds", params.episode_seconds.to_string());
    set("reset_seconds", params.reset_seconds.to_string());
    set("teleop_seconds", params.teleop_seconds.to_string());
    set("task", params.task.clone());
    set("cameras", toolkit_cameras(&params.cameras));
    set("follower_port", var(FOLLOWER_PORT_VAR));
    set("leader_port", var(LEADER_PORT_VAR));
    set("follower_id", params.follower_id.clone());
    set("leader_id", params.leader_id.clone());
    set("policy", params.policy.clone());
    set("policy_repo_id", policy_repo_id);
    set("device", params.device.clone());
    set("steps", params.steps.to_string());
    set("batch_size", params.batch_size.to_string());
    set("eval_env", params.eval_env.clone());
    set("dataset_dir", dataset_dir.display().to_string());
    set(
        "calibration_dir",
        config.calibration_dir.display().to_string(),
    );
    set("train_output_dir", train_output_dir.display().to_string());
    values
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::StageRegistry;
    use crate::workflow::PARAMETER_KEYS;

    fn config() -> OrchestratorConfig {
        OrchestratorConfig::new()
            .with_state_dir("/var/rig")
            .with_calibration_dir("/var/calib")
    }

    fn vars() -> Vec<(String, String)> {
        vec![
            ("FOLLOWER_PORT".to_string(), "/dev/ttyACM0".to_string()),
            ("LEADER_PORT".to_string(), "/dev/ttyACM1".to_string()),
            ("HF_USER".to_string(), "alice".to_string()),
        ]
    }

    #[test]
    fn test_every_parameter_key_has_a_value() {
        let snapshot =
            EnvironmentSnapshot::from_vars(WorkflowParameters::new("demo"), &config(), vars());
        for key in PARAMETER_KEYS {
            assert!(snapshot.values().contains_key(*key), "missing {key}");
        }
        assert_eq!(snapshot.values()["repo_id"], "alice/demo");
        assert_eq!(snapshot.values()["policy_repo_id"], "alice/demo-act");
        assert_eq!(snapshot.dataset_dir(), PathBuf::from("/var/rig/datasets/demo"));
    }

    #[test]
    fn test_explicit_parameters_override_environment() {
        let mut params = WorkflowParameters::new("demo");
        params.follower_port = Some("/dev/ttyUSB9".to_string());
        let snapshot = EnvironmentSnapshot::from_vars(params, &config(), vars());
        assert_eq!(snapshot.var("FOLLOWER_PORT"), Some("/dev/ttyUSB9"));
        assert_eq!(snapshot.values()["follower_port"], "/dev/ttyUSB9");
    }

    #[test]
    fn test_blank_variable_is_unset() {
        let snapshot = EnvironmentSnapshot::from_vars(
            WorkflowParameters::new("demo"),
            &config(),
            vec![("HF_USER".to_string(), "  ".to_string())],
        );
        assert_eq!(snapshot.var("HF_USER"), None);
        assert_eq!(snapshot.values()["repo_id"], "demo");
    }

    #[test]
    fn test_resolve_record_command() {
        let registry = StageRegistry::builtin().unwrap();
        let params = WorkflowParameters::new("demo").with_episodes(5, 30);
        let snapshot = EnvironmentSnapshot::from_vars(params, &config(), vars());

        let argv = snapshot.resolve_command(registry.get_stage("record").unwrap());
        assert_eq!(argv[0], "lerobot-record");
        assert!(argv.contains(&"--robot.port=/dev/ttyACM0".to_string()));
        assert!(argv.contains(&"--teleop.port=/dev/ttyACM1".to_string()));
        assert!(argv.contains(&"--dataset.repo_id=alice/demo".to_string()));
        assert!(argv.contains(&"--dataset.num_episodes=5".to_string()));
        assert!(argv.contains(&"--dataset.episode_time_s=30".to_string()));
        assert!(argv.iter().all(|a| !a.contains('{') || a.starts_with("--robot.cameras=")));
    }
}
