//! YAML workflow declarations.
//!
//! A workflow file replaces the built-in pipeline:
//!
//! ```yaml
//! stages:
//!   - name: calibrate
//!     ordinal: 1
//!     command: { program: lerobot-calibrate, args: ["--robot.port={follower_port}"] }
//!     skippable: true
//!   - name: record
//!     ordinal: 2
//!     command: { program: lerobot-record, args: ["--dataset.num_episodes={episodes}"] }
//!     produces: [{ name: dataset, path: "{dataset_dir}" }]
//! ```

use std::fs;
use std::path::Path;

use serde::Deserialize;
use tracing::info;

use super::stage::StageSpec;
use crate::error::RegistryError;

#[derive(Debug, Deserialize)]
struct WorkflowFile {
    stages: Vec<StageSpec>,
}

/// Parses stage declarations from YAML text.
pub fn parse_stages(content: &str) -> Result<Vec<StageSpec>, RegistryError> {
    let file: WorkflowFile = serde_yaml::from_str(content)?;
    Ok(file.stages)
}

/// Reads stage declarations from a YAML workflow file.
pub fn load_stages(path: &Path) -> Result<Vec<StageSpec>, RegistryError> {
    let content = fs::read_to_string(path)?;
    let stages = parse_stages(&content)?;
    info!(
        "Loaded {} stage declarations from {}",
        stages.len(),
        path.display()
    );
    Ok(stages)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::StageRegistry;
    use tempfile::TempDir;

    const WORKFLOW: &str = r#"
stages:
  - name: record
    ordinal: 2
    command:
      program: lerobot-record
      args: ["--dataset.num_episodes={episodes}"]
    produces:
      - name: dataset
        path: "{dataset_dir}"
  - name: upload
    ordinal: 3
    command:
      program: huggingface-cli
      args: ["upload", "{repo_id}", "{dataset_dir}"]
    preconditions:
      - check: env_set
        var: HF_USER
      - check: artifact
        name: dataset
  - name: calibrate
    ordinal: 1
    skippable: true
    command:
      program: lerobot-calibrate
"#;

    #[test]
    fn test_load_workflow_file() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("workflow.yaml");
        fs::write(&path, WORKFLOW).unwrap();

        let registry = StageRegistry::from_yaml_file(&path).unwrap();
        assert_eq!(registry.names(), vec!["calibrate", "record", "upload"]);
        assert!(registry.get_stage("calibrate").unwrap().skippable);
    }

    #[test]
    fn test_forward_reference_in_file_rejected() {
        let reordered = WORKFLOW.replace("ordinal: 3", "ordinal: 0");
        let stages = parse_stages(&reordered).unwrap();
        assert!(matches!(
            StageRegistry::new(stages),
            Err(RegistryError::ForwardReference { .. })
        ));
    }

    #[test]
    fn test_malformed_yaml() {
        assert!(matches!(
            parse_stages("stages: [ { name: 1 "),
            Err(RegistryError::Yaml(_))
        ));
    }

    #[test]
    fn test_missing_file() {
        let temp = TempDir::new().unwrap();
        assert!(matches!(
            load_stages(&temp.path().join("absent.yaml")),
            Err(RegistryError::Io(_))
        ));
    }
}
