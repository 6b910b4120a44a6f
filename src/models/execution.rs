//! Execution result model.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Final record of one command execution.
///
/// Timeouts are reported here (`timed_out = true`, `exit_code = None`) rather
/// than as errors, so partial stdout/stderr stay inspectable by the caller.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct ExecutionResult {
    /// The dispatched command line.
    pub command: String,
    /// Process exit code; `None` when the process was terminated by signal,
    /// timeout, or cancellation.
    pub exit_code: Option<i32>,
    /// Trimmed standard output captured so far.
    pub stdout: String,
    /// Trimmed standard error captured so far.
    pub stderr: String,
    /// Wall-clock execution duration in milliseconds.
    pub duration_ms: u64,
    /// Whether the execution hit its timeout bound.
    pub timed_out: bool,
    /// `exit_code == Some(0)` and not timed out.
    pub success: bool,
    /// When the result was finalized.
    pub timestamp: DateTime<Utc>,
}

impl ExecutionResult {
    /// Build a result for a process that exited on its own.
    #[must_use]
    pub fn completed(
        command: String,
        exit_code: Option<i32>,
        stdout: String,
        stderr: String,
        duration: Duration,
    ) -> Self {
        Self::finalize(command, exit_code, stdout, stderr, duration, false)
    }

    /// Build a result for a process terminated by the timeout bound or an
    /// external cancellation. `timed_out` distinguishes the two.
    #[must_use]
    pub fn terminated(
        command: String,
        stdout: String,
        stderr: String,
        duration: Duration,
        timed_out: bool,
    ) -> Self {
        Self::finalize(command, None, stdout, stderr, duration, timed_out)
    }

    fn finalize(
        command: String,
        exit_code: Option<i32>,
        stdout: String,
        stderr: String,
        duration: Duration,
        timed_out: bool,
    ) -> Self {
        let success = exit_code == Some(0) && !timed_out;
        Self {
            command,
            exit_code,
            stdout: stdout.trim().to_owned(),
            stderr: stderr.trim().to_owned(),
            duration_ms: u64::try_from(duration.as_millis()).unwrap_or(u64::MAX),
            timed_out,
            success,
            timestamp: Utc::now(),
        }
    }
}
