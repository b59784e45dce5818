//! Workflow orchestrator.
//!
//! Drives the Registry → Checker → Runner → Ledger sequence for one
//! [`WorkflowRun`]:
//!
//! ```text
//! for each stage from the first incomplete one:
//!     check preconditions   (fresh, against the snapshot and ledger)
//!     mark running + save   (a crash now shows up as "interrupted")
//!     run the command       (streamed, timed, cancellable)
//!     record result + save  (happens-before the next precondition check)
//!     stop on the first failure
//! ```
//!
//! Stages run strictly one at a time; each typically owns a serial port or
//! camera exclusively. Nothing is retried automatically.

pub mod progress;

pub use progress::{ConsoleReporter, ProgressReporter, SilentReporter};

use std::path::PathBuf;

use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::config::OrchestratorConfig;
use crate::error::{LedgerError, WorkflowError};
use crate::ledger::{RunLedger, StageStatus, WorkflowRun};
use crate::precondition::PreconditionChecker;
use crate::registry::StageRegistry;
use crate::runner::{StageCommand, StageExecutor};
use crate::workflow::{EnvironmentSnapshot, WorkflowParameters};

/// Note recorded when an operator skips a stage.
pub const NOTE_SKIPPED_BY_OPERATOR: &str = "skipped by operator";

/// Sequences pipeline stages for workflow runs.
pub struct WorkflowOrchestrator<E> {
    registry: StageRegistry,
    config: OrchestratorConfig,
    ledger: RunLedger,
    executor: E,
    reporter: Box<dyn ProgressReporter>,
}

impl<E: StageExecutor> WorkflowOrchestrator<E> {
    /// Creates an orchestrator printing progress to the console.
    pub fn new(registry: StageRegistry, config: OrchestratorConfig, executor: E) -> Self {
        let ledger = RunLedger::from_config(&config);
        Self {
            registry,
            config,
            ledger,
            executor,
            reporter: Box::new(ConsoleReporter),
        }
    }

    /// Replaces the progress reporter.
    pub fn with_reporter(mut self, reporter: impl ProgressReporter + 'static) -> Self {
        self.reporter = Box::new(reporter);
        self
    }

    pub fn registry(&self) -> &StageRegistry {
        &self.registry
    }

    pub fn ledger(&self) -> &RunLedger {
        &self.ledger
    }

    pub fn executor(&self) -> &E {
        &self.executor
    }

    /// Executes or resumes the run for `params.dataset`.
    ///
    /// Captures the environment once, then runs every incomplete stage in
    /// order until the pipeline completes or a stage fails.
    pub async fn execute(
        &self,
        params: WorkflowParameters,
        cancel: &CancellationToken,
    ) -> Result<WorkflowRun, WorkflowError> {
        params.validate()?;
        let env = EnvironmentSnapshot::capture(params, &self.config);
        self.execute_with(&env, cancel).await
    }

    /// Like [`execute`](Self::execute) with an already captured snapshot.
    pub async fn execute_with(
        &self,
        env: &EnvironmentSnapshot,
        cancel: &CancellationToken,
    ) -> Result<WorkflowRun, WorkflowError> {
        let params = env.params();
        params.validate()?;

        let (mut run, resumed) = self.open_run(params)?;
        info!(
            run_id = %run.run_id,
            captured_at = %env.captured_at().to_rfc3339(),
            "Using environment snapshot"
        );
        self.reporter.run_started(&run, resumed);
        self.drive(&mut run, env, cancel).await?;
        Ok(run)
    }

    /// Re-executes `stage` and every stage after it.
    ///
    /// A succeeded or skipped stage requires `force`. Parameters recorded by
    /// the last `run` are reused; ports and account are read again from the
    /// current environment.
    pub async fn retry(
        &self,
        dataset: &str,
        stage: &str,
        force: bool,
        cancel: &CancellationToken,
    ) -> Result<WorkflowRun, WorkflowError> {
        let params = self.retry_parameters(dataset)?;
        let env = self.snapshot(params);
        self.retry_with(&env, stage, force, cancel).await
    }

    /// Parameters a retry of `dataset` starts from.
    ///
    /// Device ports and the hub account are cleared: they move between
    /// sessions, so the snapshot taken for the retry supplies them.
    pub fn retry_parameters(&self, dataset: &str) -> Result<WorkflowParameters, WorkflowError> {
        let run = self.load(dataset)?;
        let mut params = run
            .parameters
            .unwrap_or_else(|| WorkflowParameters::new(dataset));
        params.clear_environment_overrides();
        Ok(params)
    }

    /// Captures the process environment for `params`.
    pub fn snapshot(&self, params: WorkflowParameters) -> EnvironmentSnapshot {
        EnvironmentSnapshot::capture(params, &self.config)
    }

    /// Like [`retry`](Self::retry) with an already captured snapshot.
    pub async fn retry_with(
        &self,
        env: &EnvironmentSnapshot,
        stage: &str,
        force: bool,
        cancel: &CancellationToken,
    ) -> Result<WorkflowRun, WorkflowError> {
        let mut run = self.load(&env.params().dataset)?;
        self.registry.get_stage(stage)?;
        let idx = run
            .position(stage)
            .ok_or_else(|| LedgerError::PipelineMismatch {
                dataset: run.dataset.clone(),
                recorded: run.stage_names().iter().map(|s| s.to_string()).collect(),
            })?;

        let status = run.stages[idx].status;
        if status.is_complete() && !force {
            return Err(WorkflowError::RetryRequiresForce(stage.to_string()));
        }
        if let Some(blocking) = run.stages[..idx].iter().find(|r| !r.status.is_complete()) {
            return Err(WorkflowError::Blocked {
                stage: stage.to_string(),
                blocking: blocking.name.clone(),
                status: blocking.status.to_string(),
            });
        }

        info!(run_id = %run.run_id, stage = %stage, previous = %status, "Retrying stage");
        run.stages[idx].reset();
        run.reset_from(idx);
        run.parameters = Some(env.params().clone());
        self.ledger.save(&run)?;

        self.reporter.run_started(&run, true);
        self.drive(&mut run, env, cancel).await?;
        Ok(run)
    }

    /// Marks a failed or pending skippable stage `skipped`.
    ///
    /// Creates the run first when none is recorded for `dataset`.
    pub fn skip(&self, dataset: &str, stage: &str) -> Result<WorkflowRun, WorkflowError> {
        let spec = self.registry.get_stage(stage)?;
        if !spec.skippable {
            return Err(WorkflowError::NotSkippable(stage.to_string()));
        }

        let mut run = match self.load(dataset) {
            Ok(run) => run,
            Err(WorkflowError::Ledger(LedgerError::NotFound(_))) => {
                let params = WorkflowParameters::new(dataset);
                params.validate()?;
                WorkflowRun::for_registry(&self.registry, &params)
            }
            Err(e) => return Err(e),
        };

        match run.status_of(stage) {
            Some(StageStatus::Failed) | Some(StageStatus::Pending) => {}
            Some(status) => {
                return Err(WorkflowError::InvalidSkip {
                    stage: stage.to_string(),
                    status: status.to_string(),
                })
            }
            None => return Err(self.mismatch(&run).into()),
        }

        run.mark_skipped(stage, NOTE_SKIPPED_BY_OPERATOR);
        self.ledger.save(&run)?;
        info!(run_id = %run.run_id, stage = %stage, "Stage skipped by operator");
        Ok(run)
    }

    /// Recorded run for `dataset`; executes nothing.
    pub fn status(&self, dataset: &str) -> Result<WorkflowRun, WorkflowError> {
        self.load(dataset)
    }

    /// Archives the recorded run so the next `run` starts fresh.
    pub fn restart(&self, dataset: &str) -> Result<Option<PathBuf>, WorkflowError> {
        Ok(self.ledger.archive(dataset)?)
    }

    fn load(&self, dataset: &str) -> Result<WorkflowRun, WorkflowError> {
        let run = self.ledger.load(dataset)?;
        if run.stage_names() != self.registry.names() {
            return Err(self.mismatch(&run).into());
        }
        Ok(run)
    }

    fn mismatch(&self, run: &WorkflowRun) -> LedgerError {
        LedgerError::PipelineMismatch {
            dataset: run.dataset.clone(),
            recorded: run.stage_names().iter().map(|s| s.to_string()).collect(),
        }
    }

    fn open_run(&self, params: &WorkflowParameters) -> Result<(WorkflowRun, bool), WorkflowError> {
        match self.load(&params.dataset) {
            Ok(mut run) => {
                for stage in run.include_optional(&params.include) {
                    info!(run_id = %run.run_id, stage = %stage, "Optional stage requested");
                }
                run.parameters = Some(params.clone());
                // Persists interrupted stages recovered on load.
                self.ledger.save(&run)?;
                Ok((run, true))
            }
            Err(WorkflowError::Ledger(LedgerError::NotFound(_))) => {
                let run = WorkflowRun::for_registry(&self.registry, params);
                self.ledger.save(&run)?;
                info!(run_id = %run.run_id, "Created workflow run");
                Ok((run, false))
            }
            Err(e) => Err(e),
        }
    }

    async fn drive(
        &self,
        run: &mut WorkflowRun,
        env: &EnvironmentSnapshot,
        cancel: &CancellationToken,
    ) -> Result<(), WorkflowError> {
        let checker = PreconditionChecker::new(&self.registry);
        let total = self.registry.len();

        while let Some(idx) = run.first_incomplete() {
            let spec = &self.registry.list_stages()[idx];
            let stage = spec.name.as_str();
            let position = idx + 1;

            if cancel.is_cancelled() {
                return Err(WorkflowError::Cancelled {
                    stage: stage.to_string(),
                });
            }

            let failed = checker.check(spec, env, run);
            if !failed.is_empty() {
                let detail = format!("not ready: {}", failed.join(", "));
                run.set_note(stage, detail.clone());
                self.ledger.save(run)?;
                warn!(run_id = %run.run_id, stage = %stage, failed = ?failed, "Preconditions not met");
                self.reporter.stage_finished(
                    position,
                    total,
                    stage,
                    run.status_of(stage).unwrap_or(StageStatus::Pending),
                    None,
                    Some(&detail),
                );
                return Err(WorkflowError::Precondition {
                    stage: stage.to_string(),
                    failed,
                });
            }

            let attempt = run.stages[idx].attempts + 1;
            let timeout = spec
                .timeout
                .map(|t| t.resolve(env.params()))
                .or(self.config.default_timeout);
            let log_path = self
                .config
                .logs_dir()
                .join(&run.run_id)
                .join(format!("{}-{}.log", stage, attempt));
            let command = StageCommand::new(stage, env.resolve_command(spec))
                .with_timeout(timeout)
                .with_log_path(log_path)
                .with_env(env.vars().clone())
                .with_interactive(spec.interactive);

            run.mark_running(stage);
            self.ledger.save(run)?;
            self.reporter
                .stage_started(position, total, stage, &command.argv);

            let result = match self.executor.run(&command, cancel).await {
                Ok(result) => result,
                Err(e) => {
                    let detail = e.to_string();
                    run.mark_failed(stage, detail.clone(), e.process_started());
                    self.ledger.save(run)?;
                    self.reporter.stage_finished(
                        position,
                        total,
                        stage,
                        StageStatus::Failed,
                        None,
                        Some(&detail),
                    );
                    return Err(e.into());
                }
            };

            self.ledger.mark_stage_result(run, stage, &result)?;
            let detail = (!result.is_success()).then(|| result.summary());
            self.reporter.stage_finished(
                position,
                total,
                stage,
                run.status_of(stage).unwrap_or(StageStatus::Failed),
                Some(result.duration),
                detail.as_deref(),
            );

            if result.cancelled {
                return Err(WorkflowError::Cancelled {
                    stage: stage.to_string(),
                });
            }
            if !result.is_success() {
                return Err(WorkflowError::Execution {
                    stage: stage.to_string(),
                    exit_code: result.exit_code,
                    timed_out: result.timed_out,
                });
            }
            info!(
                run_id = %run.run_id,
                stage = %stage,
                attempt,
                duration_ms = result.duration.as_millis() as u64,
                "Stage succeeded"
            );
        }

        self.reporter.run_finished(run);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::RunnerError;
    use crate::registry::{ArtifactSpec, CommandTemplate, StageSpec};
    use crate::precondition::Precondition;
    use crate::runner::ExecutionResult;
    use async_trait::async_trait;
    use std::collections::HashMap;
    use std::sync::Mutex;
    use std::time::Duration;
    use tempfile::TempDir;

    /// Executor returning scripted exit codes; unscripted stages exit 0.
    #[derive(Default)]
    struct ScriptedExecutor {
        exit_codes: Mutex<HashMap<String, i32>>,
        calls: Mutex<Vec<StageCommand>>,
        /// Stage that runs until cancelled.
        blocking: Option<String>,
        /// Stage whose process is lost track of after launch.
        lost: Option<String>,
    }

    impl ScriptedExecutor {
        fn failing(stage: &str, code: i32) -> Self {
            let executor = Self::default();
            executor.set(stage, code);
            executor
        }

        fn blocking(stage: &str) -> Self {
            Self {
                blocking: Some(stage.to_string()),
                ..Self::default()
            }
        }

        fn losing(stage: &str) -> Self {
            Self {
                lost: Some(stage.to_string()),
                ..Self::default()
            }
        }

        fn set(&self, stage: &str, code: i32) {
            self.exit_codes.lock().unwrap().insert(stage.to_string(), code);
        }

        fn calls(&self) -> Vec<String> {
            self.calls.lock().unwrap().iter().map(|c| c.stage.clone()).collect()
        }
    }

    #[async_trait]
    impl StageExecutor for ScriptedExecutor {
        async fn run(
            &self,
            command: &StageCommand,
            cancel: &CancellationToken,
        ) -> Result<ExecutionResult, RunnerError> {
            self.calls.lock().unwrap().push(command.clone());
            if self.blocking.as_deref() == Some(command.stage.as_str()) {
                cancel.cancelled().await;
                return Ok(ExecutionResult::cancelled(
                    &command.stage,
                    Duration::from_millis(5),
                ));
            }
            if self.lost.as_deref() == Some(command.stage.as_str()) {
                return Err(RunnerError::Wait {
                    stage: command.stage.clone(),
                    source: std::io::Error::other("wait failed"),
                });
            }
            let code = self
                .exit_codes
                .lock()
                .unwrap()
                .get(&command.stage)
                .copied()
                .unwrap_or(0);
            Ok(ExecutionResult::exited(&command.stage, code, Duration::from_millis(5)))
        }
    }

    fn registry() -> StageRegistry {
        StageRegistry::new(vec![
            StageSpec::new(
                "calibrate",
                1,
                CommandTemplate::new("calibrate").arg("--robot.port={follower_port}"),
            )
            .skippable()
            .interactive(),
            StageSpec::new(
                "record",
                2,
                CommandTemplate::new("record").arg("--episodes={episodes}"),
            ),
            StageSpec::new("upload", 3, CommandTemplate::new("upload").arg("{repo_id}")),
        ])
        .unwrap()
    }

    fn orchestrator(
        temp: &TempDir,
        executor: ScriptedExecutor,
    ) -> WorkflowOrchestrator<ScriptedExecutor> {
        let config = OrchestratorConfig::new().with_state_dir(temp.path());
        WorkflowOrchestrator::new(registry(), config, executor).with_reporter(SilentReporter)
    }

    fn statuses(run: &WorkflowRun) -> Vec<StageStatus> {
        run.stages.iter().map(|s| s.status).collect()
    }

    #[tokio::test]
    async fn test_execute_all_succeed() {
        let temp = TempDir::new().unwrap();
        let orch = orchestrator(&temp, ScriptedExecutor::default());

        let run = orch
            .execute(WorkflowParameters::new("demo"), &CancellationToken::new())
            .await
            .unwrap();
        assert!(run.is_complete());
        assert_eq!(orch.executor().calls(), vec!["calibrate", "record", "upload"]);

        let call = orch.executor().calls.lock().unwrap()[1].clone();
        assert_eq!(call.argv, vec!["record", "--episodes=5"]);
        assert!(call
            .log_path
            .unwrap()
            .ends_with(format!("logs/{}/record-1.log", run.run_id)));
    }

    #[tokio::test]
    async fn test_failure_stops_pipeline() {
        let temp = TempDir::new().unwrap();
        let orch = orchestrator(&temp, ScriptedExecutor::failing("record", 1));

        let err = orch
            .execute(WorkflowParameters::new("demo"), &CancellationToken::new())
            .await
            .unwrap_err();
        assert_eq!(err.stage(), Some("record"));
        assert_eq!(err.exit_code(), 1);

        let run = orch.status("demo").unwrap();
        assert_eq!(
            statuses(&run),
            vec![StageStatus::Succeeded, StageStatus::Failed, StageStatus::Pending]
        );
        assert_eq!(orch.executor().calls(), vec!["calibrate", "record"]);
    }

    #[tokio::test]
    async fn test_precondition_failure_spawns_nothing() {
        let temp = TempDir::new().unwrap();
        let registry = StageRegistry::new(vec![StageSpec::new(
            "upload",
            1,
            CommandTemplate::new("upload"),
        )
        .requires(Precondition::EnvSet {
            var: "RIGFORGE_TEST_UNSET_VARIABLE".to_string(),
        })])
        .unwrap();
        let config = OrchestratorConfig::new().with_state_dir(temp.path());
        let orch = WorkflowOrchestrator::new(registry, config, ScriptedExecutor::default())
            .with_reporter(SilentReporter);

        let err = orch
            .execute(WorkflowParameters::new("demo"), &CancellationToken::new())
            .await
            .unwrap_err();
        match err {
            WorkflowError::Precondition { stage, failed } => {
                assert_eq!(stage, "upload");
                assert_eq!(failed, vec!["env:RIGFORGE_TEST_UNSET_VARIABLE"]);
            }
            other => panic!("expected precondition error, got {:?}", other),
        }
        assert!(orch.executor().calls().is_empty());

        let record = orch.status("demo").unwrap().stages[0].clone();
        assert_eq!(record.status, StageStatus::Pending);
        assert!(record.note.unwrap().contains("env:RIGFORGE_TEST_UNSET_VARIABLE"));
    }

    #[tokio::test]
    async fn test_retry_requires_force_for_succeeded_stage() {
        let temp = TempDir::new().unwrap();
        let orch = orchestrator(&temp, ScriptedExecutor::default());
        let cancel = CancellationToken::new();
        orch.execute(WorkflowParameters::new("demo"), &cancel)
            .await
            .unwrap();

        let err = orch.retry("demo", "record", false, &cancel).await.unwrap_err();
        assert!(matches!(err, WorkflowError::RetryRequiresForce(_)));

        let run = orch.retry("demo", "record", true, &cancel).await.unwrap();
        assert!(run.is_complete());
        assert_eq!(
            orch.executor().calls(),
            vec!["calibrate", "record", "upload", "record", "upload"]
        );
        assert_eq!(run.record("record").unwrap().attempts, 2);
    }

    #[tokio::test]
    async fn test_retry_blocked_by_earlier_failure() {
        let temp = TempDir::new().unwrap();
        let orch = orchestrator(&temp, ScriptedExecutor::failing("calibrate", 2));
        let cancel = CancellationToken::new();
        let _ = orch.execute(WorkflowParameters::new("demo"), &cancel).await;

        let err = orch.retry("demo", "upload", false, &cancel).await.unwrap_err();
        match err {
            WorkflowError::Blocked {
                stage, blocking, ..
            } => {
                assert_eq!(stage, "upload");
                assert_eq!(blocking, "calibrate");
            }
            other => panic!("expected blocked, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_skip_failed_stage_then_resume() {
        let temp = TempDir::new().unwrap();
        let orch = orchestrator(&temp, ScriptedExecutor::failing("calibrate", 1));
        let cancel = CancellationToken::new();
        let _ = orch.execute(WorkflowParameters::new("demo"), &cancel).await;

        let run = orch.skip("demo", "calibrate").unwrap();
        assert_eq!(run.status_of("calibrate"), Some(StageStatus::Skipped));

        let run = orch
            .execute(WorkflowParameters::new("demo"), &cancel)
            .await
            .unwrap();
        assert!(run.is_complete());
        assert_eq!(orch.executor().calls(), vec!["calibrate", "record", "upload"]);
    }

    #[tokio::test]
    async fn test_skip_rules() {
        let temp = TempDir::new().unwrap();
        let orch = orchestrator(&temp, ScriptedExecutor::default());

        assert!(matches!(
            orch.skip("demo", "record"),
            Err(WorkflowError::NotSkippable(_))
        ));
        assert!(matches!(
            orch.skip("demo", "missing"),
            Err(WorkflowError::Configuration(_))
        ));

        // Skipping before the first run creates the run.
        let run = orch.skip("demo", "calibrate").unwrap();
        assert_eq!(run.first_incomplete(), Some(1));
        assert!(matches!(
            orch.skip("demo", "calibrate"),
            Err(WorkflowError::InvalidSkip { .. })
        ));
    }

    #[tokio::test]
    async fn test_cancelled_before_start() {
        let temp = TempDir::new().unwrap();
        let orch = orchestrator(&temp, ScriptedExecutor::default());
        let cancel = CancellationToken::new();
        cancel.cancel();

        let err = orch
            .execute(WorkflowParameters::new("demo"), &cancel)
            .await
            .unwrap_err();
        assert_eq!(err.exit_code(), 130);
        assert!(orch.executor().calls().is_empty());
    }

    #[tokio::test]
    async fn test_pipeline_mismatch_requires_restart() {
        let temp = TempDir::new().unwrap();
        let orch = orchestrator(&temp, ScriptedExecutor::default());
        let ledger = orch.ledger().clone();
        ledger
            .save(&WorkflowRun::new("demo", ["calibrate", "record"]))
            .unwrap();

        let err = orch
            .execute(WorkflowParameters::new("demo"), &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            WorkflowError::Ledger(LedgerError::PipelineMismatch { .. })
        ));
        assert_eq!(err.exit_code(), 2);

        assert!(orch.restart("demo").unwrap().is_some());
        assert!(orch
            .execute(WorkflowParameters::new("demo"), &CancellationToken::new())
            .await
            .is_ok());
    }

    #[tokio::test]
    async fn test_artifact_produced_then_consumed() {
        let temp = TempDir::new().unwrap();
        let registry = StageRegistry::new(vec![
            StageSpec::new("upload", 1, CommandTemplate::new("upload"))
                .produces(ArtifactSpec::logical("hub-dataset")),
            StageSpec::new("train", 2, CommandTemplate::new("train"))
                .requires(Precondition::Artifact {
                    name: "hub-dataset".to_string(),
                })
                .optional(),
        ])
        .unwrap();
        let config = OrchestratorConfig::new().with_state_dir(temp.path());
        let orch = WorkflowOrchestrator::new(registry, config, ScriptedExecutor::default())
            .with_reporter(SilentReporter);
        let cancel = CancellationToken::new();

        let run = orch
            .execute(WorkflowParameters::new("demo"), &cancel)
            .await
            .unwrap();
        assert_eq!(run.status_of("train"), Some(StageStatus::Skipped));

        let run = orch
            .execute(WorkflowParameters::new("demo").including("train"), &cancel)
            .await
            .unwrap();
        assert_eq!(run.status_of("train"), Some(StageStatus::Succeeded));
        assert_eq!(orch.executor().calls(), vec!["upload", "train"]);
    }

    #[tokio::test]
    async fn test_retry_reads_ports_from_current_environment() {
        let temp = TempDir::new().unwrap();
        let config = OrchestratorConfig::new().with_state_dir(temp.path());
        let orch = orchestrator(&temp, ScriptedExecutor::failing("calibrate", 1));
        let cancel = CancellationToken::new();

        let mut params = WorkflowParameters::new("demo");
        params.follower_port = Some("/dev/ttyACM0".to_string());
        let first = EnvironmentSnapshot::from_vars(params, &config, Vec::<(String, String)>::new());
        assert!(orch.execute_with(&first, &cancel).await.is_err());

        // The arm came back on another port.
        orch.executor().set("calibrate", 0);
        let params = orch.retry_parameters("demo").unwrap();
        assert_eq!(params.follower_port, None);
        let second = EnvironmentSnapshot::from_vars(
            params,
            &config,
            [("FOLLOWER_PORT".to_string(), "/dev/ttyACM1".to_string())],
        );
        let run = orch.retry_with(&second, "calibrate", false, &cancel).await.unwrap();
        assert!(run.is_complete());

        let calls = orch.executor().calls.lock().unwrap().clone();
        assert_eq!(calls[0].argv, vec!["calibrate", "--robot.port=/dev/ttyACM0"]);
        assert_eq!(calls[1].argv, vec!["calibrate", "--robot.port=/dev/ttyACM1"]);
    }

    #[tokio::test]
    async fn test_interactive_flag_reaches_executor() {
        let temp = TempDir::new().unwrap();
        let orch = orchestrator(&temp, ScriptedExecutor::default());
        orch.execute(WorkflowParameters::new("demo"), &CancellationToken::new())
            .await
            .unwrap();

        let calls = orch.executor().calls.lock().unwrap().clone();
        let interactive: Vec<bool> = calls.iter().map(|c| c.interactive).collect();
        assert_eq!(interactive, vec![true, false, false]);
    }

    #[tokio::test]
    async fn test_cancel_while_stage_runs() {
        let temp = TempDir::new().unwrap();
        let orch = orchestrator(&temp, ScriptedExecutor::blocking("record"));
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            trigger.cancel();
        });

        let err = orch
            .execute(WorkflowParameters::new("demo"), &cancel)
            .await
            .unwrap_err();
        assert!(matches!(err, WorkflowError::Cancelled { ref stage } if stage == "record"));
        assert_eq!(err.exit_code(), 130);
        assert_eq!(orch.executor().calls(), vec!["calibrate", "record"]);

        let run = orch.status("demo").unwrap();
        assert_eq!(
            statuses(&run),
            vec![StageStatus::Succeeded, StageStatus::Failed, StageStatus::Pending]
        );
        let record = run.record("record").unwrap();
        assert_eq!(record.note.as_deref(), Some("cancelled"));
        assert!(record.artifacts_unreliable);
        assert!(record.last_result.as_ref().unwrap().cancelled);
    }

    #[tokio::test]
    async fn test_lost_process_marks_artifacts_unreliable() {
        let temp = TempDir::new().unwrap();
        let orch = orchestrator(&temp, ScriptedExecutor::losing("record"));

        let err = orch
            .execute(WorkflowParameters::new("demo"), &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            WorkflowError::Runner(RunnerError::Wait { .. })
        ));

        let record = orch.status("demo").unwrap().record("record").unwrap().clone();
        assert_eq!(record.status, StageStatus::Failed);
        assert!(record.artifacts_unreliable);
    }
}
