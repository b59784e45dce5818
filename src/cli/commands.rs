//! CLI command definitions for rigforge.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use serde::Serialize;
use tracing::info;

use super::signal::cancel_on_signal;
use crate::config::{ConfigError, OrchestratorConfig};
use crate::error::{RegistryError, WorkflowError};
use crate::ledger::{StageStatus, WorkflowRun};
use crate::orchestrator::WorkflowOrchestrator;
use crate::registry::{StageRegistry, StageSpec};
use crate::runner::{format_duration, ProcessRunner};
use crate::workflow::{CameraSpec, WorkflowParameters};

/// Resumable orchestrator for two-arm teleoperation and recording workflows.
#[derive(Parser)]
#[command(name = "rigforge")]
#[command(about = "Sequence calibration, teleoperation, recording and upload for an SO-101 arm pair")]
#[command(version)]
#[command(
    long_about = "rigforge runs the hardware workflow for a leader/follower arm pair one stage at a time: discovery, calibration, teleoperation, recording, upload and optional diagnostics, replay, training and evaluation.\n\nEvery stage outcome is recorded in a ledger, so a failed run resumes from the failed stage instead of starting over.\n\nExample usage:\n  rigforge run --dataset demo --episodes 5 --episode-seconds 30 --camera front:/dev/video6\n  rigforge status --dataset demo\n  rigforge retry --dataset demo --stage record"
)]
pub struct Cli {
    /// The subcommand to execute.
    #[command(subcommand)]
    pub command: Commands,

    /// Log level (trace, debug, info, warn, error).
    #[arg(short, long, default_value = "info", global = true)]
    pub log_level: String,

    /// Directory holding run ledgers and stage logs.
    #[arg(long, global = true)]
    pub state_dir: Option<PathBuf>,

    /// YAML workflow declaration replacing the built-in pipeline.
    #[arg(long, global = true)]
    pub workflow: Option<PathBuf>,

    /// Timeout in seconds for stages that declare none.
    #[arg(long, global = true)]
    pub stage_timeout: Option<u64>,

    /// File fed to interactive stages instead of the terminal.
    #[arg(long, global = true)]
    pub operator_input: Option<PathBuf>,
}

/// Available CLI subcommands.
#[derive(clap::Subcommand)]
pub enum Commands {
    /// Execute or resume the workflow for a dataset.
    Run(Box<RunArgs>),

    /// Print the recorded per-stage statuses without executing anything.
    Status(StatusArgs),

    /// Re-execute one stage and every stage after it.
    Retry(RetryArgs),

    /// Mark a failed or pending skippable stage as skipped.
    Skip(SkipArgs),

    /// List the pipeline stages.
    Stages(StagesArgs),
}

/// Arguments for the run command.
#[derive(Parser, Debug)]
pub struct RunArgs {
    /// Dataset name; also identifies the workflow run.
    #[arg(short, long)]
    pub dataset: String,

    /// Number of episodes to record.
    #[arg(short = 'n', long, default_value = "5")]
    pub episodes: u32,

    /// Length of each episode in seconds.
    #[arg(long, default_value = "30")]
    pub episode_seconds: u64,

    /// Time to reset the scene between episodes, in seconds.
    #[arg(long, default_value = "10")]
    pub reset_seconds: u64,

    /// Length of the teleoperation check in seconds.
    #[arg(long, default_value = "60")]
    pub teleop_seconds: u64,

    /// Task description stored with every episode.
    #[arg(long, default_value = "Pick and place")]
    pub task: String,

    /// Camera as name:source[:WxH[@fps]]; repeatable.
    #[arg(long = "camera")]
    pub cameras: Vec<CameraSpec>,

    /// Follower arm serial device.
    #[arg(long, env = "FOLLOWER_PORT")]
    pub follower_port: Option<String>,

    /// Leader arm serial device.
    #[arg(long, env = "LEADER_PORT")]
    pub leader_port: Option<String>,

    /// Hugging Face account receiving the dataset.
    #[arg(long, env = "HF_USER")]
    pub hf_user: Option<String>,

    /// Calibration id of the follower arm.
    #[arg(long, default_value = "follower_arm")]
    pub follower_id: String,

    /// Calibration id of the leader arm.
    #[arg(long, default_value = "leader_arm")]
    pub leader_id: String,

    /// Policy architecture handed to training.
    #[arg(long, default_value = "act")]
    pub policy: String,

    /// Training device.
    #[arg(long, default_value = "cuda")]
    pub device: String,

    /// Training steps.
    #[arg(long, default_value = "10000")]
    pub steps: u64,

    /// Training batch size.
    #[arg(long, default_value = "8")]
    pub batch_size: u32,

    /// Simulation environment used to evaluate the trained policy.
    #[arg(long, default_value = "simxarm")]
    pub eval_env: String,

    /// Local dataset directory (default: <state-dir>/datasets/<dataset>).
    #[arg(long)]
    pub dataset_root: Option<PathBuf>,

    /// Optional stage to include (diagnose, replay, train, evaluate); repeatable.
    #[arg(long = "with")]
    pub include: Vec<String>,

    /// Archive the existing ledger and start a fresh run.
    #[arg(long)]
    pub restart: bool,
}

impl RunArgs {
    fn into_parameters(self) -> WorkflowParameters {
        let mut params = WorkflowParameters::new(self.dataset);
        params.episodes = self.episodes;
        params.episode_seconds = self.episode_seconds;
        params.reset_seconds = self.reset_seconds;
        params.teleop_seconds = self.teleop_seconds;
        params.task = self.task;
        if !self.cameras.is_empty() {
            params.cameras = self.cameras;
        }
        params.follower_port = self.follower_port;
        params.leader_port = self.leader_port;
        params.hf_user = self.hf_user;
        params.follower_id = self.follower_id;
        params.leader_id = self.leader_id;
        params.policy = self.policy;
        params.device = self.device;
        params.steps = self.steps;
        params.batch_size = self.batch_size;
        params.eval_env = self.eval_env;
        params.dataset_root = self.dataset_root;
        params.include = self.include;
        params
    }
}

/// Arguments for the status command.
#[derive(Parser, Debug)]
pub struct StatusArgs {
    /// Dataset whose run to show.
    #[arg(short, long)]
    pub dataset: String,

    /// Output the ledger record as JSON.
    #[arg(long)]
    pub json: bool,
}

/// Arguments for the retry command.
#[derive(Parser, Debug)]
pub struct RetryArgs {
    /// Dataset whose run to retry.
    #[arg(short, long)]
    pub dataset: String,

    /// Stage to re-execute.
    #[arg(short, long)]
    pub stage: String,

    /// Allow re-executing a stage that already succeeded or was skipped.
    #[arg(long)]
    pub force: bool,

    /// Follower arm serial device (default: $FOLLOWER_PORT).
    #[arg(long)]
    pub follower_port: Option<String>,

    /// Leader arm serial device (default: $LEADER_PORT).
    #[arg(long)]
    pub leader_port: Option<String>,

    /// Hugging Face account (default: $HF_USER).
    #[arg(long)]
    pub hf_user: Option<String>,
}

impl RetryArgs {
    /// Applies the port and account flags to the parameters of the run.
    fn apply_overrides(&self, params: &mut WorkflowParameters) {
        for (flag, value) in [
            (&self.follower_port, &mut params.follower_port),
            (&self.leader_port, &mut params.leader_port),
            (&self.hf_user, &mut params.hf_user),
        ] {
            if flag.is_some() {
                value.clone_from(flag);
            }
        }
    }
}

/// Arguments for the skip command.
#[derive(Parser, Debug)]
pub struct SkipArgs {
    /// Dataset whose run to modify.
    #[arg(short, long)]
    pub dataset: String,

    /// Stage to skip.
    #[arg(short, long)]
    pub stage: String,
}

/// Arguments for the stages command.
#[derive(Parser, Debug)]
pub struct StagesArgs {
    /// Output the stage declarations as JSON.
    #[arg(long)]
    pub json: bool,
}

/// Parse CLI arguments.
pub fn parse_cli() -> Cli {
    Cli::parse()
}

/// Run the CLI with pre-parsed arguments.
pub async fn run_with_cli(cli: Cli) -> anyhow::Result<()> {
    let config = build_config(&cli)?;
    let registry = build_registry(&config)?;
    let orchestrator = orchestrator(registry, config, cli.operator_input);

    match cli.command {
        Commands::Run(args) => run_run_command(*args, &orchestrator).await,
        Commands::Status(args) => run_status_command(args, &orchestrator),
        Commands::Retry(args) => run_retry_command(args, &orchestrator).await,
        Commands::Skip(args) => run_skip_command(args, &orchestrator),
        Commands::Stages(args) => run_stages_command(args, orchestrator.registry()),
    }
}

/// Process exit code for an error returned by [`run_with_cli`].
///
/// 1 for stage failures, 2 for configuration and ledger errors, 130 when
/// the run was interrupted.
pub fn exit_code(err: &anyhow::Error) -> i32 {
    if let Some(err) = err.downcast_ref::<WorkflowError>() {
        return err.exit_code();
    }
    if err.downcast_ref::<ConfigError>().is_some() || err.downcast_ref::<RegistryError>().is_some()
    {
        return 2;
    }
    1
}

fn build_config(cli: &Cli) -> anyhow::Result<OrchestratorConfig> {
    let mut config = OrchestratorConfig::from_env()?;
    if let Some(dir) = &cli.state_dir {
        config = config.with_state_dir(dir);
    }
    if let Some(path) = &cli.workflow {
        config = config.with_workflow_file(path);
    }
    if let Some(secs) = cli.stage_timeout {
        config = config.with_default_timeout(Duration::from_secs(secs));
    }
    config.validate()?;
    Ok(config)
}

fn build_registry(config: &OrchestratorConfig) -> anyhow::Result<StageRegistry> {
    let registry = match &config.workflow_file {
        Some(path) => StageRegistry::from_yaml_file(path)
            .with_context(|| format!("Failed to load workflow from {}", path.display()))?,
        None => StageRegistry::builtin()?,
    };
    Ok(registry)
}

type Orchestrator = WorkflowOrchestrator<ProcessRunner>;

fn orchestrator(
    registry: StageRegistry,
    config: OrchestratorConfig,
    operator_input: Option<PathBuf>,
) -> Orchestrator {
    let mut runner = ProcessRunner::new(config.kill_grace);
    if let Some(path) = operator_input {
        runner = runner.with_operator_input(path);
    }
    WorkflowOrchestrator::new(registry, config, runner)
}

// ============================================================================
// Command Implementations
// ============================================================================

async fn run_run_command(args: RunArgs, orchestrator: &Orchestrator) -> anyhow::Result<()> {
    let restart = args.restart;
    let params = args.into_parameters();
    params.validate()?;

    if restart {
        if let Some(archived) = orchestrator.restart(&params.dataset)? {
            println!("Archived previous run to {}", archived.display());
        }
    }

    info!(dataset = %params.dataset, episodes = params.episodes, "Starting workflow");
    let cancel = cancel_on_signal();
    orchestrator.execute(params, &cancel).await?;
    Ok(())
}

async fn run_retry_command(args: RetryArgs, orchestrator: &Orchestrator) -> anyhow::Result<()> {
    let mut params = orchestrator.retry_parameters(&args.dataset)?;
    args.apply_overrides(&mut params);
    let env = orchestrator.snapshot(params);

    info!(dataset = %args.dataset, stage = %args.stage, "Retrying workflow");
    let cancel = cancel_on_signal();
    orchestrator
        .retry_with(&env, &args.stage, args.force, &cancel)
        .await?;
    Ok(())
}

fn run_skip_command(args: SkipArgs, orchestrator: &Orchestrator) -> anyhow::Result<()> {
    let run = orchestrator.skip(&args.dataset, &args.stage)?;
    println!("Stage '{}' marked skipped", args.stage);
    print_run(&run);
    Ok(())
}

fn run_status_command(args: StatusArgs, orchestrator: &Orchestrator) -> anyhow::Result<()> {
    let run = orchestrator.status(&args.dataset)?;

    if args.json {
        let json = serde_json::to_string_pretty(&run)?;
        println!("{json}");
    } else {
        print_run(&run);
    }
    Ok(())
}

#[derive(Debug, Serialize)]
struct StagesOutput<'a> {
    stages: &'a [StageSpec],
}

fn run_stages_command(args: StagesArgs, registry: &StageRegistry) -> anyhow::Result<()> {
    if args.json {
        let output = StagesOutput {
            stages: registry.list_stages(),
        };
        println!("{}", serde_json::to_string_pretty(&output)?);
        return Ok(());
    }

    for stage in registry.list_stages() {
        let mut flags = Vec::new();
        if stage.optional {
            flags.push("optional");
        } else if stage.skippable {
            flags.push("skippable");
        }
        if stage.interactive {
            flags.push("interactive");
        }
        let flags = if flags.is_empty() {
            String::new()
        } else {
            format!(" [{}]", flags.join(", "))
        };

        println!("{:>2}. {}{}", stage.ordinal, stage.name, flags);
        if !stage.description.is_empty() {
            println!("    {}", stage.description);
        }
        println!("    command: {}", stage.command);
        if !stage.preconditions.is_empty() {
            let checks: Vec<String> = stage.preconditions.iter().map(|p| p.describe()).collect();
            println!("    requires: {}", checks.join(", "));
        }
        if !stage.produces.is_empty() {
            let artifacts: Vec<&str> = stage.produces.iter().map(|a| a.name.as_str()).collect();
            println!("    produces: {}", artifacts.join(", "));
        }
    }
    Ok(())
}

fn print_run(run: &WorkflowRun) {
    println!("Run {} (dataset {})", run.run_id, run.dataset);
    println!("Started: {}", run.started_at.format("%Y-%m-%d %H:%M:%S UTC"));
    if let Some(finished) = run.finished_at {
        println!("Finished: {}", finished.format("%Y-%m-%d %H:%M:%S UTC"));
    }
    println!();

    for (idx, record) in run.stages.iter().enumerate() {
        let marker = if idx == run.current_index && !run.is_complete() {
            ">"
        } else {
            " "
        };
        let duration = record
            .last_result
            .as_ref()
            .map(|r| format_duration(r.duration))
            .unwrap_or_else(|| "-".to_string());
        let mut line = format!(
            "{} {:>2}. {:<20} {:<10} attempts={:<2} {:>9}",
            marker,
            idx + 1,
            record.name,
            record.status,
            record.attempts,
            duration
        );
        if let Some(note) = &record.note {
            line.push_str(&format!("  {}", note));
        }
        if record.artifacts_unreliable && record.status != StageStatus::Succeeded {
            line.push_str("  (partial output)");
        }
        println!("{}", line);
        if record.status == StageStatus::Failed {
            if let Some(log) = record.last_result.as_ref().and_then(|r| r.log_path.as_ref()) {
                println!("       log: {}", log.display());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_run_arguments() {
        let cli = Cli::try_parse_from([
            "rigforge",
            "run",
            "--dataset",
            "demo",
            "--episodes",
            "3",
            "--camera",
            "front:/dev/video6",
            "--camera",
            "wrist:2:1280x720@15",
            "--with",
            "replay",
            "--follower-port",
            "/dev/ttyACM0",
            "--stage-timeout",
            "600",
        ])
        .unwrap();

        assert_eq!(cli.stage_timeout, Some(600));
        let Commands::Run(args) = cli.command else {
            panic!("expected run command");
        };
        let params = (*args).into_parameters();
        assert_eq!(params.dataset, "demo");
        assert_eq!(params.episodes, 3);
        assert_eq!(params.cameras.len(), 2);
        assert_eq!(params.cameras[1].fps, 15);
        assert_eq!(params.include, vec!["replay"]);
        assert_eq!(params.follower_port.as_deref(), Some("/dev/ttyACM0"));
    }

    #[test]
    fn test_parse_training_arguments() {
        let cli = Cli::try_parse_from([
            "rigforge", "run", "--dataset", "demo", "--with", "train", "--with", "evaluate",
            "--steps", "2000", "--batch-size", "16",
        ])
        .unwrap();
        let Commands::Run(args) = cli.command else {
            panic!("expected run command");
        };
        let params = (*args).into_parameters();
        assert_eq!(params.steps, 2000);
        assert_eq!(params.batch_size, 16);
        assert_eq!(params.eval_env, "simxarm");
        assert_eq!(params.include, vec!["train", "evaluate"]);
    }

    #[test]
    fn test_retry_port_flags_override_recorded_parameters() {
        let cli = Cli::try_parse_from([
            "rigforge",
            "retry",
            "--dataset",
            "demo",
            "--stage",
            "calibrate-follower",
            "--follower-port",
            "/dev/ttyACM1",
            "--operator-input",
            "/tmp/enter",
        ])
        .unwrap();
        assert_eq!(cli.operator_input, Some(PathBuf::from("/tmp/enter")));
        let Commands::Retry(args) = cli.command else {
            panic!("expected retry command");
        };

        let mut params = WorkflowParameters::new("demo");
        params.leader_port = Some("/dev/ttyACM0".to_string());
        args.apply_overrides(&mut params);
        assert_eq!(params.follower_port.as_deref(), Some("/dev/ttyACM1"));
        assert_eq!(params.leader_port.as_deref(), Some("/dev/ttyACM0"));
        assert_eq!(params.hf_user, None);
    }

    #[test]
    fn test_default_camera_kept_when_none_given() {
        let cli = Cli::try_parse_from(["rigforge", "run", "--dataset", "demo"]).unwrap();
        let Commands::Run(args) = cli.command else {
            panic!("expected run command");
        };
        assert_eq!((*args).into_parameters().cameras, vec![CameraSpec::default()]);
    }

    #[test]
    fn test_invalid_camera_rejected() {
        assert!(Cli::try_parse_from(["rigforge", "run", "--dataset", "demo", "--camera", "front"])
            .is_err());
    }

    #[test]
    fn test_exit_codes() {
        let failed = anyhow::Error::new(WorkflowError::Execution {
            stage: "record".to_string(),
            exit_code: 1,
            timed_out: false,
        });
        assert_eq!(exit_code(&failed), 1);

        let cancelled = anyhow::Error::new(WorkflowError::Cancelled {
            stage: "record".to_string(),
        });
        assert_eq!(exit_code(&cancelled), 130);

        let config = anyhow::Error::new(RegistryError::Empty).context("Failed to load workflow");
        assert_eq!(exit_code(&config), 2);
    }
}
