//! Stage registry: the canonical, validated order of pipeline stages.
//!
//! This module provides:
//! - Static stage declarations ([`StageSpec`], [`ArtifactSpec`], [`CommandTemplate`])
//! - The built-in SO-101 two-arm pipeline
//! - Loading a replacement pipeline from a YAML workflow file
//!
//! A registry is built once at process start. Construction rejects any
//! declaration whose artifact dependencies do not point strictly backwards,
//! so the stage order can always be executed front to back.

pub mod builtin;
pub mod loader;
pub mod stage;
pub mod template;

pub use stage::{ArtifactSpec, StageSpec, StageTimeout};
pub use template::CommandTemplate;

use std::collections::HashMap;
use std::path::Path;

use tracing::debug;

use crate::error::RegistryError;
use crate::workflow::PARAMETER_KEYS;

/// Ordered, immutable collection of stage declarations.
#[derive(Debug, Clone)]
pub struct StageRegistry {
    stages: Vec<StageSpec>,
    /// Artifact name -> index of the producing stage.
    producers: HashMap<String, usize>,
}

impl StageRegistry {
    /// Builds a registry, validating the declaration.
    ///
    /// Stages may be supplied in any order; they are sorted by ordinal.
    ///
    /// # Errors
    ///
    /// Returns a configuration error if the declaration is empty, names or
    /// ordinals repeat, two stages produce the same artifact, a dependency
    /// refers to an unknown or later artifact, a command is empty, or a
    /// template uses an unknown placeholder.
    pub fn new(mut stages: Vec<StageSpec>) -> Result<Self, RegistryError> {
        if stages.is_empty() {
            return Err(RegistryError::Empty);
        }

        stages.sort_by_key(|s| s.ordinal);

        let mut seen_names: HashMap<&str, usize> = HashMap::new();
        for (idx, stage) in stages.iter().enumerate() {
            if seen_names.insert(stage.name.as_str(), idx).is_some() {
                return Err(RegistryError::DuplicateStage(stage.name.clone()));
            }
            if idx > 0 && stages[idx - 1].ordinal == stage.ordinal {
                return Err(RegistryError::DuplicateOrdinal {
                    ordinal: stage.ordinal,
                    first: stages[idx - 1].name.clone(),
                    second: stage.name.clone(),
                });
            }
            if stage.command.program.trim().is_empty() {
                return Err(RegistryError::EmptyCommand(stage.name.clone()));
            }
            if let Some(unknown) = stage
                .placeholders()
                .into_iter()
                .find(|p| !PARAMETER_KEYS.contains(&p.as_str()))
            {
                return Err(RegistryError::UnknownPlaceholder {
                    stage: stage.name.clone(),
                    placeholder: unknown,
                });
            }
        }

        let mut producers: HashMap<String, usize> = HashMap::new();
        for (idx, stage) in stages.iter().enumerate() {
            for artifact in &stage.produces {
                if let Some(&first) = producers.get(&artifact.name) {
                    return Err(RegistryError::DuplicateArtifact {
                        artifact: artifact.name.clone(),
                        first: stages[first].name.clone(),
                        second: stage.name.clone(),
                    });
                }
                producers.insert(artifact.name.clone(), idx);
            }
        }

        for (idx, stage) in stages.iter().enumerate() {
            for dependency in stage.dependencies() {
                match producers.get(dependency) {
                    None => {
                        return Err(RegistryError::UnknownArtifact {
                            stage: stage.name.clone(),
                            artifact: dependency.to_string(),
                        })
                    }
                    Some(&producer) if producer >= idx => {
                        return Err(RegistryError::ForwardReference {
                            stage: stage.name.clone(),
                            artifact: dependency.to_string(),
                            producer: stages[producer].name.clone(),
                        })
                    }
                    Some(_) => {}
                }
            }
        }

        debug!("Stage registry built with {} stages", stages.len());
        Ok(Self { stages, producers })
    }

    /// The built-in SO-101 leader/follower pipeline.
    pub fn builtin() -> Result<Self, RegistryError> {
        Self::new(builtin::so101_pipeline())
    }

    /// Loads and validates a pipeline from a YAML workflow file.
    pub fn from_yaml_file(path: &Path) -> Result<Self, RegistryError> {
        Self::new(loader::load_stages(path)?)
    }

    /// Stages in pipeline order.
    pub fn list_stages(&self) -> &[StageSpec] {
        &self.stages
    }

    /// Looks up a stage by name.
    pub fn get_stage(&self, name: &str) -> Result<&StageSpec, RegistryError> {
        self.stages
            .iter()
            .find(|s| s.name == name)
            .ok_or_else(|| RegistryError::UnknownStage(name.to_string()))
    }

    /// Zero-based pipeline position of a stage.
    pub fn position(&self, name: &str) -> Option<usize> {
        self.stages.iter().position(|s| s.name == name)
    }

    /// Stage that produces `artifact`.
    pub fn producer_of(&self, artifact: &str) -> Option<&StageSpec> {
        self.producers.get(artifact).map(|&idx| &self.stages[idx])
    }

    /// Declaration of `artifact`.
    pub fn artifact(&self, artifact: &str) -> Option<&ArtifactSpec> {
        self.producer_of(artifact)
            .and_then(|stage| stage.produces.iter().find(|a| a.name == artifact))
    }

    /// Stage names in pipeline order.
    pub fn names(&self) -> Vec<String> {
        self.stages.iter().map(|s| s.name.clone()).collect()
    }

    /// Number of stages.
    pub fn len(&self) -> usize {
        self.stages.len()
    }

    /// Whether the registry is empty (never true for a built registry).
    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }
}
