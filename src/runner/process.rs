//! Runs stage commands as child processes.
//!
//! Each command gets its own process group so that terminating a stage also
//! reaches anything the toolkit spawned. Termination is two-step: SIGINT to
//! the group (the toolkit releases motor torque on interrupt), then SIGKILL
//! once the grace period runs out.
//!
//! Interactive stages (calibration) are wired to the operator's terminal
//! instead of the log pipes, and their group becomes the terminal's
//! foreground group while they run.

use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::Utc;
use tokio::fs::{self, File};
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWriteExt, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

#[cfg(unix)]
use super::terminal::ForegroundGuard;
use super::{ExecutionResult, StageCommand, StageExecutor};
use crate::config::DEFAULT_KILL_GRACE_SECS;
use crate::error::RunnerError;

/// How long to wait for output pipes to close after the child is gone.
const OUTPUT_DRAIN_TIMEOUT: Duration = Duration::from_secs(2);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Stream {
    Stdout,
    Stderr,
}

enum Outcome {
    Exited(ExitStatus),
    TimedOut,
    Cancelled,
}

/// [`StageExecutor`] backed by real child processes.
#[derive(Debug, Clone)]
pub struct ProcessRunner {
    kill_grace: Duration,
    echo: bool,
    operator_input: Option<PathBuf>,
}

impl Default for ProcessRunner {
    fn default() -> Self {
        Self::new(Duration::from_secs(DEFAULT_KILL_GRACE_SECS))
    }
}

impl ProcessRunner {
    /// Creates a runner that echoes child output to the terminal.
    pub fn new(kill_grace: Duration) -> Self {
        Self {
            kill_grace,
            echo: true,
            operator_input: None,
        }
    }

    /// Disables terminal echo; output still reaches the log file.
    pub fn quiet(mut self) -> Self {
        self.echo = false;
        self
    }

    /// Feeds interactive stages from `path` instead of the terminal.
    pub fn with_operator_input(mut self, path: impl Into<PathBuf>) -> Self {
        self.operator_input = Some(path.into());
        self
    }
}

#[async_trait]
impl StageExecutor for ProcessRunner {
    async fn run(
        &self,
        command: &StageCommand,
        cancel: &CancellationToken,
    ) -> Result<ExecutionResult, RunnerError> {
        let stage = command.stage.as_str();
        let (program, args) = command
            .argv
            .split_first()
            .ok_or_else(|| RunnerError::EmptyCommand(stage.to_string()))?;

        let log = match &command.log_path {
            Some(path) => Some(open_log(path, command).await?),
            None => None,
        };

        let mut cmd = Command::new(program);
        cmd.args(args).kill_on_drop(true);
        if command.interactive {
            match &self.operator_input {
                Some(path) => cmd.stdin(std::fs::File::open(path)?),
                None => cmd.stdin(Stdio::inherit()),
            };
            // Operator prompts are not newline-terminated.
            cmd.stdout(Stdio::inherit()).stderr(Stdio::inherit());
        } else {
            cmd.stdin(Stdio::null())
                .stdout(Stdio::piped())
                .stderr(Stdio::piped());
        }
        if let Some(env) = &command.env {
            // PATH from this map is also used to locate the program.
            cmd.env_clear().envs(env);
        }
        #[cfg(unix)]
        cmd.process_group(0);

        info!(
            stage = %stage,
            program = %program,
            interactive = command.interactive,
            "Starting stage command"
        );
        debug!(stage = %stage, argv = ?command.argv, timeout = ?command.timeout);

        let started_at = Utc::now();
        let start = Instant::now();
        let mut child = cmd.spawn().map_err(|source| RunnerError::Spawn {
            stage: stage.to_string(),
            program: program.clone(),
            source,
        })?;

        // Ctrl+C reaches a foreground stage directly.
        #[cfg(unix)]
        let _terminal = match (command.interactive, &self.operator_input) {
            (true, None) => child.id().and_then(ForegroundGuard::acquire),
            _ => None,
        };

        let (tx, rx) = mpsc::unbounded_channel();
        if let Some(stdout) = child.stdout.take() {
            tokio::spawn(pump(stdout, Stream::Stdout, tx.clone()));
        }
        if let Some(stderr) = child.stderr.take() {
            tokio::spawn(pump(stderr, Stream::Stderr, tx.clone()));
        }
        drop(tx);
        let writer = tokio::spawn(write_output(rx, stage.to_string(), log, self.echo));

        let deadline = async {
            match command.timeout {
                Some(timeout) => tokio::time::sleep(timeout).await,
                None => std::future::pending::<()>().await,
            }
        };
        tokio::pin!(deadline);

        let outcome = tokio::select! {
            status = child.wait() => status.map(Outcome::Exited),
            _ = &mut deadline => Ok(Outcome::TimedOut),
            _ = cancel.cancelled() => Ok(Outcome::Cancelled),
        };
        let outcome = match outcome {
            Ok(outcome) => outcome,
            Err(source) => return Err(abandon(&mut child, stage, source)),
        };

        match outcome {
            Outcome::TimedOut => warn!(stage = %stage, "Stage exceeded its timeout; terminating"),
            Outcome::Cancelled => warn!(stage = %stage, "Interrupt received; terminating stage"),
            Outcome::Exited(_) => {}
        }
        if !matches!(outcome, Outcome::Exited(_)) {
            if let Err(source) = terminate(&mut child, self.kill_grace).await {
                return Err(abandon(&mut child, stage, source));
            }
        }
        let duration = start.elapsed();

        match tokio::time::timeout(OUTPUT_DRAIN_TIMEOUT, writer).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => warn!(stage = %stage, "Output writer failed: {}", e),
            Err(_) => debug!(stage = %stage, "Output pipes still open after exit; detaching"),
        }

        let mut result = match outcome {
            Outcome::Exited(status) => ExecutionResult::exited(stage, exit_code(status), duration),
            Outcome::TimedOut => ExecutionResult::timed_out(stage, duration),
            Outcome::Cancelled => ExecutionResult::cancelled(stage, duration),
        };
        result.started_at = started_at;
        result.finished_at = Utc::now();
        if let Some(path) = &command.log_path {
            result = result.with_log_path(path);
        }

        info!(
            stage = %stage,
            exit_code = result.exit_code,
            timed_out = result.timed_out,
            duration_ms = duration.as_millis() as u64,
            "Stage command finished"
        );
        Ok(result)
    }
}

async fn open_log(path: &Path, command: &StageCommand) -> Result<File, RunnerError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).await?;
    }
    let mut file = File::create(path).await?;
    let mut header = format!(
        "# stage: {}\n# argv: {:?}\n# started: {}\n",
        command.stage,
        command.argv,
        Utc::now().to_rfc3339()
    );
    if command.interactive {
        header.push_str("# output: terminal\n");
    }
    file.write_all(header.as_bytes()).await?;
    Ok(file)
}

async fn pump<R>(reader: R, stream: Stream, tx: mpsc::UnboundedSender<(Stream, String)>)
where
    R: AsyncRead + Unpin,
{
    let mut segments = BufReader::new(reader).split(b'\n');
    loop {
        match segments.next_segment().await {
            Ok(Some(bytes)) => {
                let line = String::from_utf8_lossy(&bytes)
                    .trim_end_matches('\r')
                    .to_string();
                if tx.send((stream, line)).is_err() {
                    break;
                }
            }
            Ok(None) => break,
            Err(e) => {
                debug!("Stopped reading child output: {}", e);
                break;
            }
        }
    }
}

async fn write_output(
    mut rx: mpsc::UnboundedReceiver<(Stream, String)>,
    stage: String,
    mut log: Option<File>,
    echo: bool,
) {
    while let Some((stream, line)) = rx.recv().await {
        if echo {
            match stream {
                Stream::Stdout => println!("[{}] {}", stage, line),
                Stream::Stderr => eprintln!("[{}] {}", stage, line),
            }
        }
        if let Some(file) = log.as_mut() {
            let written = match file.write_all(line.as_bytes()).await {
                Ok(()) => file.write_all(b"\n").await,
                Err(e) => Err(e),
            };
            // Keep draining the pipes even when the log is gone.
            if let Err(e) = written {
                warn!(stage = %stage, "Failed to write stage log: {}", e);
                log = None;
            }
        }
    }
    if let Some(file) = log.as_mut() {
        if let Err(e) = file.flush().await {
            warn!(stage = %stage, "Failed to flush stage log: {}", e);
        }
    }
}

/// Kills whatever is left of a child whose status could not be read.
fn abandon(child: &mut Child, stage: &str, source: std::io::Error) -> RunnerError {
    warn!(stage = %stage, "Lost track of stage process: {}", source);
    #[cfg(unix)]
    {
        if let Some(pid) = child.id() {
            signal_group(pid, libc::SIGKILL);
        }
    }
    if let Err(e) = child.start_kill() {
        debug!(stage = %stage, "Kill after lost process failed: {}", e);
    }
    RunnerError::Wait {
        stage: stage.to_string(),
        source,
    }
}

/// Stops the child and everything in its process group.
async fn terminate(child: &mut Child, grace: Duration) -> std::io::Result<()> {
    #[cfg(unix)]
    {
        if let Some(pid) = child.id() {
            signal_group(pid, libc::SIGINT);
            match tokio::time::timeout(grace, child.wait()).await {
                Ok(status) => {
                    status?;
                }
                Err(_) => {
                    warn!(pid, "Stage ignored SIGINT for {:?}; sending SIGKILL", grace);
                }
            }
            // Sweep any sub-processes left in the group.
            signal_group(pid, libc::SIGKILL);
            child.wait().await?;
            return Ok(());
        }
    }
    child.kill().await
}

#[cfg(unix)]
fn signal_group(pid: u32, signal: libc::c_int) {
    let Ok(pgid) = libc::pid_t::try_from(pid) else {
        return;
    };
    // SAFETY: killpg only delivers a signal; the group was created for this child.
    let ret = unsafe { libc::killpg(pgid, signal) };
    if ret != 0 {
        let err = std::io::Error::last_os_error();
        if err.raw_os_error() != Some(libc::ESRCH) {
            warn!(pgid, signal, "Failed to signal process group: {}", err);
        }
    }
}

fn exit_code(status: ExitStatus) -> i32 {
    if let Some(code) = status.code() {
        return code;
    }
    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        if let Some(signal) = status.signal() {
            return 128 + signal;
        }
    }
    -1
}
