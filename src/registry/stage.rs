//! Static declaration of one pipeline stage.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::template::{placeholders, CommandTemplate};
use crate::precondition::Precondition;
use crate::workflow::WorkflowParameters;

/// Something a stage leaves behind for later stages to consume.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactSpec {
    /// Name later stages use in `artifact` preconditions.
    pub name: String,
    /// Path template on disk. Artifacts without a path are logical: they
    /// exist once the producing stage has succeeded (e.g. an upload).
    #[serde(default)]
    pub path: Option<String>,
}

impl ArtifactSpec {
    /// Declares an artifact stored at `path`.
    pub fn at(name: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            path: Some(path.into()),
        }
    }

    /// Declares a logical artifact with no local footprint.
    pub fn logical(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            path: None,
        }
    }
}

/// How long a stage may run before it is terminated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StageTimeout {
    /// A fixed wall-clock limit.
    Fixed { seconds: u64 },
    /// Scales with the recording plan: every episode plus its reset period,
    /// plus a margin for start-up and encoding.
    Recording { margin_seconds: u64 },
    /// The requested teleoperation window plus a margin.
    Teleoperation { margin_seconds: u64 },
}

impl StageTimeout {
    /// Resolves the limit for a concrete set of parameters.
    pub fn resolve(&self, params: &WorkflowParameters) -> Duration {
        match *self {
            StageTimeout::Fixed { seconds } => Duration::from_secs(seconds),
            StageTimeout::Recording { margin_seconds } => {
                let per_episode = params.episode_seconds.saturating_add(params.reset_seconds);
                let planned = per_episode.saturating_mul(u64::from(params.episodes));
                Duration::from_secs(planned.saturating_add(margin_seconds))
            }
            StageTimeout::Teleoperation { margin_seconds } => {
                Duration::from_secs(params.teleop_seconds.saturating_add(margin_seconds))
            }
        }
    }
}

/// Static declaration of one pipeline step.
///
/// Immutable once the owning [`StageRegistry`](super::StageRegistry) is built.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageSpec {
    /// Unique stage name.
    pub name: String,
    /// Position in the pipeline; lower runs first.
    pub ordinal: u32,
    /// One-line description for `stages` output.
    #[serde(default)]
    pub description: String,
    /// Checks evaluated right before the stage runs.
    #[serde(default)]
    pub preconditions: Vec<Precondition>,
    /// External command the stage delegates to.
    pub command: CommandTemplate,
    /// Artifacts the stage produces on success.
    #[serde(default)]
    pub produces: Vec<ArtifactSpec>,
    /// Whether an operator may mark the stage skipped.
    #[serde(default)]
    pub skippable: bool,
    /// Whether the stage only runs when explicitly requested.
    #[serde(default)]
    pub optional: bool,
    /// Whether the command talks to the operator on the terminal.
    #[serde(default)]
    pub interactive: bool,
    /// Time limit; falls back to the orchestrator default.
    #[serde(default)]
    pub timeout: Option<StageTimeout>,
}

impl StageSpec {
    /// Creates a fatal, always-on stage with no preconditions.
    pub fn new(name: impl Into<String>, ordinal: u32, command: CommandTemplate) -> Self {
        Self {
            name: name.into(),
            ordinal,
            description: String::new(),
            preconditions: Vec::new(),
            command,
            produces: Vec::new(),
            skippable: false,
            optional: false,
            interactive: false,
            timeout: None,
        }
    }

    /// Sets the description.
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    /// Adds a precondition.
    pub fn requires(mut self, precondition: Precondition) -> Self {
        self.preconditions.push(precondition);
        self
    }

    /// Adds a produced artifact.
    pub fn produces(mut self, artifact: ArtifactSpec) -> Self {
        self.produces.push(artifact);
        self
    }

    /// Marks the stage skippable.
    pub fn skippable(mut self) -> Self {
        self.skippable = true;
        self
    }

    /// Marks the stage optional (and therefore skippable).
    pub fn optional(mut self) -> Self {
        self.optional = true;
        self.skippable = true;
        self
    }

    /// Gives the stage the operator's terminal while it runs.
    pub fn interactive(mut self) -> Self {
        self.interactive = true;
        self
    }

    /// Sets the timeout.
    pub fn with_timeout(mut self, timeout: StageTimeout) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Names of the artifacts this stage depends on.
    pub fn dependencies(&self) -> impl Iterator<Item = &str> {
        self.preconditions.iter().filter_map(|p| match p {
            Precondition::Artifact { name } => Some(name.as_str()),
            _ => None,
        })
    }

    /// Every placeholder used by the command, path checks and artifact paths.
    pub fn placeholders(&self) -> Vec<String> {
        let mut names = self.command.placeholders();
        for precondition in &self.preconditions {
            if let Some(template) = precondition.path_template() {
                names.extend(placeholders(template));
            }
        }
        for artifact in &self.produces {
            if let Some(path) = &artifact.path {
                names.extend(placeholders(path));
            }
        }
        names
    }
}
