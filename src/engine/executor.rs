//! Single-command process executor.
//!
//! Spawns the target executable directly — never through a shell
//! interpreter — with an argument vector produced by shell-word
//! tokenization, so quoted arguments survive without reintroducing
//! metacharacter injection. Output is streamed incrementally as it arrives
//! and aggregated for the final [`ExecutionResult`]. A timeout or external
//! cancellation sends SIGTERM and finalizes the result immediately; a
//! detached reaper force-kills stragglers after a short grace window.

use std::collections::HashMap;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::io::{AsyncRead, AsyncReadExt, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::GlobalConfig;
use crate::models::execution::ExecutionResult;
use crate::models::session::OutputChannel;
use crate::policy::classifier::{self, Classification};
use crate::policy::rules::CommandRules;
use crate::{AppError, Result};

/// Bytes per incremental pipe read.
const READ_CHUNK_SIZE: usize = 8192;

/// Grace window between SIGTERM and force-kill.
const KILL_GRACE: Duration = Duration::from_secs(2);

/// One streamed chunk of child process output.
#[derive(Debug, Clone)]
pub struct OutputChunk {
    /// Pipe the chunk arrived on.
    pub channel: OutputChannel,
    /// Chunk text (lossy UTF-8).
    pub content: String,
}

/// Parameters for one supervised execution.
#[derive(Debug)]
pub struct ExecRequest {
    /// Command line to tokenize and spawn.
    pub command: String,
    /// Working directory for the child process.
    pub working_dir: PathBuf,
    /// Extra environment variables for the child process.
    pub env: HashMap<String, String>,
    /// Effective timeout bound (already clamped by the caller).
    pub timeout: Duration,
    /// Whether the caller confirmed a dangerous command.
    pub safety_confirmed: bool,
    /// External cancellation (session destroy / engine shutdown).
    pub cancel: CancellationToken,
}

/// Effective timeout: `min(requested, configured max)`, defaulting to the
/// configured default bound when the caller requests none.
#[must_use]
pub fn effective_timeout(requested_ms: Option<u64>, config: &GlobalConfig) -> Duration {
    let requested = requested_ms.unwrap_or(config.command_timeout_ms);
    Duration::from_millis(requested.min(config.max_command_timeout_ms))
}

/// Admission-control pre-flight: classify and map denials to typed errors.
///
/// # Errors
///
/// Returns the policy error corresponding to the classification when the
/// command is not `Allowed`. No process is spawned on any error path.
pub fn admit(command: &str, safety_confirmed: bool, rules: &CommandRules) -> Result<()> {
    match classifier::classify(command, safety_confirmed, rules) {
        Classification::Allowed => Ok(()),
        Classification::RequiresConfirmation { .. } => {
            let base = classifier::base_token(command).unwrap_or("command");
            Err(AppError::PolicyRequiresConfirmation(format!(
                "`{base}` can cause data loss"
            )))
        }
        Classification::Blocked { reason } => Err(AppError::PolicyBlocked(reason)),
        Classification::NotAllowlisted { reason } => Err(AppError::PolicyNotAllowlisted(reason)),
        Classification::InvalidFormat { reason } => Err(AppError::InvalidCommand(reason)),
    }
}

/// Execute one admitted command to completion, timeout, or cancellation.
///
/// Chunks are forwarded on `chunk_tx` as they arrive — not buffered until
/// completion. Timeout and cancellation are reported inside the returned
/// [`ExecutionResult`]; only pre-flight and spawn failures are errors.
///
/// # Errors
///
/// Returns a policy error from the pre-flight check (zero spawns), or
/// `AppError::Spawn` when the OS cannot start or await the process.
pub async fn execute(
    req: ExecRequest,
    rules: &CommandRules,
    chunk_tx: mpsc::Sender<OutputChunk>,
) -> Result<ExecutionResult> {
    // Pre-flight admission control: nothing is spawned on a denial.
    admit(&req.command, req.safety_confirmed, rules)?;

    let argv = shlex::split(&req.command)
        .ok_or_else(|| AppError::InvalidCommand("unbalanced quoting in command".into()))?;
    let Some((program, args)) = argv.split_first() else {
        return Err(AppError::InvalidCommand("command has no executable".into()));
    };

    let mut cmd = Command::new(program);
    cmd.args(args)
        .current_dir(&req.working_dir)
        .envs(&req.env)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    let started = Instant::now();
    let mut child = cmd
        .spawn()
        .map_err(|err| AppError::Spawn(format!("failed to spawn `{program}`: {err}")))?;

    info!(
        command = %req.command,
        pid = child.id().unwrap_or(0),
        timeout_ms = u64::try_from(req.timeout.as_millis()).unwrap_or(u64::MAX),
        "process spawned"
    );

    let stdout_reader = child
        .stdout
        .take()
        .ok_or_else(|| AppError::Spawn("stdout pipe unavailable".into()))?;
    let stderr_reader = child
        .stderr
        .take()
        .ok_or_else(|| AppError::Spawn("stderr pipe unavailable".into()))?;

    let stdout_agg = Arc::new(Mutex::new(String::new()));
    let stderr_agg = Arc::new(Mutex::new(String::new()));

    let stdout_pump = spawn_output_pump(
        stdout_reader,
        OutputChannel::Stdout,
        chunk_tx.clone(),
        Arc::clone(&stdout_agg),
    );
    let stderr_pump = spawn_output_pump(
        stderr_reader,
        OutputChannel::Stderr,
        chunk_tx,
        Arc::clone(&stderr_agg),
    );

    let outcome = tokio::select! {
        res = tokio::time::timeout(req.timeout, child.wait()) => match res {
            Ok(Ok(status)) => WaitOutcome::Exited(status),
            Ok(Err(err)) => {
                return Err(AppError::Spawn(format!("failed to await process: {err}")));
            }
            Err(_) => WaitOutcome::TimedOut,
        },
        () = req.cancel.cancelled() => WaitOutcome::Cancelled,
    };

    let result = match outcome {
        WaitOutcome::Exited(status) => {
            // Pipes close on exit; the pumps finish promptly.
            let _ = stdout_pump.await;
            let _ = stderr_pump.await;
            let stdout = stdout_agg.lock().await.clone();
            let stderr = stderr_agg.lock().await.clone();
            ExecutionResult::completed(req.command, status.code(), stdout, stderr, started.elapsed())
        }
        WaitOutcome::TimedOut | WaitOutcome::Cancelled => {
            let timed_out = matches!(outcome, WaitOutcome::TimedOut);
            if timed_out {
                warn!(command = %req.command, "execution hit timeout bound, terminating");
            } else {
                debug!(command = %req.command, "execution cancelled, terminating");
            }
            request_termination(child);
            // Finalize immediately with the output captured so far; the
            // reaper deals with the process out of band.
            let stdout = stdout_agg.lock().await.clone();
            let stderr = stderr_agg.lock().await.clone();
            ExecutionResult::terminated(req.command, stdout, stderr, started.elapsed(), timed_out)
        }
    };

    Ok(result)
}

enum WaitOutcome {
    Exited(std::process::ExitStatus),
    TimedOut,
    Cancelled,
}

/// Forward one pipe to the chunk channel while aggregating for the final
/// result. Keeps draining even after the receiver is gone so the child never
/// blocks on a full pipe.
fn spawn_output_pump<R>(
    reader: R,
    channel: OutputChannel,
    chunk_tx: mpsc::Sender<OutputChunk>,
    aggregate: Arc<Mutex<String>>,
) -> JoinHandle<()>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut reader = BufReader::new(reader);
        let mut buf = [0u8; READ_CHUNK_SIZE];
        loop {
            match reader.read(&mut buf).await {
                Ok(0) | Err(_) => break,
                Ok(n) => {
                    let text = String::from_utf8_lossy(&buf[..n]).into_owned();
                    aggregate.lock().await.push_str(&text);
                    let _ = chunk_tx.send(OutputChunk { channel, content: text }).await;
                }
            }
        }
    })
}

/// Signal the child to terminate and hand it to a detached reaper that
/// force-kills after [`KILL_GRACE`].
fn request_termination(mut child: Child) {
    #[cfg(unix)]
    send_sigterm(&child);
    #[cfg(not(unix))]
    {
        let _ = child.start_kill();
    }

    tokio::spawn(async move {
        tokio::select! {
            _ = child.wait() => {}
            () = tokio::time::sleep(KILL_GRACE) => {
                if let Err(err) = child.kill().await {
                    warn!(%err, "failed to force-kill child after grace window");
                }
            }
        }
    });
}

#[cfg(unix)]
fn send_sigterm(child: &Child) {
    use nix::sys::signal::{kill, Signal};
    use nix::unistd::Pid;

    let Some(pid) = child.id() else {
        return;
    };
    let Ok(raw) = i32::try_from(pid) else {
        return;
    };
    if let Err(err) = kill(Pid::from_raw(raw), Signal::SIGTERM) {
        debug!(%err, pid, "SIGTERM delivery failed");
    }
}
