//! Outcome of one external command invocation.

use std::path::PathBuf;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Exit code reported for a stage terminated by its timeout.
pub const TIMEOUT_EXIT_CODE: i32 = 124;

/// Exit code reported for a stage terminated by a user interrupt.
pub const CANCELLED_EXIT_CODE: i32 = 130;

/// Immutable record of one stage attempt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionResult {
    /// Stage that ran; anything left on disk belongs to it.
    pub stage: String,
    /// Exit code, or a synthetic code for timeouts and cancellation.
    pub exit_code: i32,
    /// Whether the command was terminated by its timeout.
    pub timed_out: bool,
    /// Whether the command was terminated by a user interrupt.
    #[serde(default)]
    pub cancelled: bool,
    /// Wall-clock duration.
    pub duration: Duration,
    /// Log file holding the streamed output.
    #[serde(default)]
    pub log_path: Option<PathBuf>,
    /// Timestamp when the command was spawned.
    pub started_at: DateTime<Utc>,
    /// Timestamp when the command exited or was terminated.
    pub finished_at: DateTime<Utc>,
}

impl ExecutionResult {
    /// Result of a command that exited on its own.
    pub fn exited(stage: impl Into<String>, exit_code: i32, duration: Duration) -> Self {
        let now = Utc::now();
        Self {
            stage: stage.into(),
            exit_code,
            timed_out: false,
            cancelled: false,
            duration,
            log_path: None,
            started_at: now - chrono::Duration::from_std(duration).unwrap_or_else(|_| chrono::Duration::zero()),
            finished_at: now,
        }
    }

    /// Result of a command terminated by its timeout.
    pub fn timed_out(stage: impl Into<String>, duration: Duration) -> Self {
        Self {
            timed_out: true,
            ..Self::exited(stage, TIMEOUT_EXIT_CODE, duration)
        }
    }

    /// Result of a command terminated by a user interrupt.
    pub fn cancelled(stage: impl Into<String>, duration: Duration) -> Self {
        Self {
            cancelled: true,
            ..Self::exited(stage, CANCELLED_EXIT_CODE, duration)
        }
    }

    /// Sets the log path.
    pub fn with_log_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.log_path = Some(path.into());
        self
    }

    /// Exit status 0 is the only success signal.
    pub fn is_success(&self) -> bool {
        self.exit_code == 0 && !self.timed_out && !self.cancelled
    }

    /// Short description of the outcome for progress lines and ledger notes.
    pub fn summary(&self) -> String {
        if self.cancelled {
            "cancelled".to_string()
        } else if self.timed_out {
            format!("timed out after {}", format_duration(self.duration))
        } else if self.exit_code == 0 {
            "exit 0".to_string()
        } else {
            format!("exit {}", self.exit_code)
        }
    }
}

/// Formats a duration as `1h02m03s`, `2m05s` or `4.2s`.
pub fn format_duration(duration: Duration) -> String {
    let secs = duration.as_secs();
    if secs >= 3600 {
        format!("{}h{:02}m{:02}s", secs / 3600, (secs % 3600) / 60, secs % 60)
    } else if secs >= 60 {
        format!("{}m{:02}s", secs / 60, secs % 60)
    } else {
        format!("{:.1}s", duration.as_secs_f64())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_success_requires_exit_zero() {
        assert!(ExecutionResult::exited("record", 0, Duration::from_secs(1)).is_success());
        assert!(!ExecutionResult::exited("record", 1, Duration::from_secs(1)).is_success());
    }

    #[test]
    fn test_timeout_is_failure() {
        let result = ExecutionResult::timed_out("record", Duration::from_secs(90));
        assert!(result.timed_out);
        assert_eq!(result.exit_code, TIMEOUT_EXIT_CODE);
        assert!(!result.is_success());
        assert_eq!(result.summary(), "timed out after 1m30s");
    }

    #[test]
    fn test_cancelled() {
        let result = ExecutionResult::cancelled("teleoperate", Duration::from_millis(300));
        assert!(result.cancelled);
        assert_eq!(result.exit_code, CANCELLED_EXIT_CODE);
        assert_eq!(result.summary(), "cancelled");
    }

    #[test]
    fn test_format_duration() {
        assert_eq!(format_duration(Duration::from_millis(4200)), "4.2s");
        assert_eq!(format_duration(Duration::from_secs(125)), "2m05s");
        assert_eq!(format_duration(Duration::from_secs(3723)), "1h02m03s");
    }

    #[test]
    fn test_serde_roundtrip_keeps_timestamps() {
        let result = ExecutionResult::exited("upload", 0, Duration::from_secs(3))
            .with_log_path("/tmp/upload-1.log");
        let json = serde_json::to_string(&result).unwrap();
        let parsed: ExecutionResult = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, result);
    }
}
