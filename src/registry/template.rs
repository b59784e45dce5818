//! `{placeholder}` substitution for command and path templates.
//!
//! Templates are rendered one argv element at a time, so a substituted value
//! can never split into extra arguments or reach a shell.

use std::collections::BTreeMap;
use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

static PLACEHOLDER: OnceLock<Regex> = OnceLock::new();

fn placeholder_regex() -> &'static Regex {
    PLACEHOLDER
        .get_or_init(|| Regex::new(r"\{([a-z][a-z0-9_]*)\}").expect("placeholder regex is valid"))
}

/// Returns every placeholder name referenced by `template`, in order.
pub fn placeholders(template: &str) -> Vec<String> {
    placeholder_regex()
        .captures_iter(template)
        .map(|caps| caps[1].to_string())
        .collect()
}

/// Substitutes known placeholders; unknown ones are left verbatim.
pub fn render(template: &str, values: &BTreeMap<String, String>) -> String {
    placeholder_regex()
        .replace_all(template, |caps: &regex::Captures<'_>| {
            values
                .get(&caps[1])
                .cloned()
                .unwrap_or_else(|| caps[0].to_string())
        })
        .into_owned()
}

/// External command declared by a stage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandTemplate {
    /// Program to execute, looked up on `PATH`.
    pub program: String,
    /// Argument templates, one per argv element.
    #[serde(default)]
    pub args: Vec<String>,
}

impl CommandTemplate {
    /// Creates a command with no arguments.
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
        }
    }

    /// Appends one argument template.
    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    /// Appends several argument templates.
    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// All placeholders referenced by the program and its arguments.
    pub fn placeholders(&self) -> Vec<String> {
        std::iter::once(&self.program)
            .chain(self.args.iter())
            .flat_map(|part| placeholders(part))
            .collect()
    }

    /// Renders the full argv, program first.
    pub fn render(&self, values: &BTreeMap<String, String>) -> Vec<String> {
        std::iter::once(&self.program)
            .chain(self.args.iter())
            .map(|part| render(part, values))
            .collect()
    }
}

impl std::fmt::Display for CommandTemplate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.program)?;
        for arg in &self.args {
            write!(f, " {}", arg)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn values() -> BTreeMap<String, String> {
        let mut values = BTreeMap::new();
        values.insert("dataset".to_string(), "demo; rm -rf /".to_string());
        values.insert("episodes".to_string(), "5".to_string());
        values
    }

    #[test]
    fn test_placeholders() {
        assert_eq!(
            placeholders("--dataset.repo_id={hf_user}/{dataset}"),
            vec!["hf_user".to_string(), "dataset".to_string()]
        );
        assert!(placeholders("--robot.cameras={ }").is_empty());
    }

    #[test]
    fn test_render_keeps_value_in_single_argument() {
        let command = CommandTemplate::new("lerobot-record")
            .arg("--dataset.repo_id={dataset}")
            .arg("--dataset.num_episodes={episodes}");

        let argv = command.render(&values());
        assert_eq!(
            argv,
            vec![
                "lerobot-record".to_string(),
                "--dataset.repo_id=demo; rm -rf /".to_string(),
                "--dataset.num_episodes=5".to_string(),
            ]
        );
    }

    #[test]
    fn test_render_leaves_unknown_placeholder() {
        assert_eq!(render("{missing}-{episodes}", &values()), "{missing}-5");
    }

    #[test]
    fn test_display() {
        let command = CommandTemplate::new("huggingface-cli").args(["upload", "{dataset}"]);
        assert_eq!(command.to_string(), "huggingface-cli upload {dataset}");
    }
}
