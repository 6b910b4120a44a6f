//! Session registry: ownership of all sessions and orchestration of
//! classification, execution, idle eviction, and event publication.
//!
//! The registry is the only writer of the session map and the
//! active-execution map; both live behind a `tokio::sync::Mutex` inside one
//! shared inner struct, so the engine is safe on a multi-threaded runtime.
//! Every mutation resets the owning session's idle timer.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use chrono::Utc;
use serde::Serialize;
use tokio::sync::{broadcast, mpsc, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::GlobalConfig;
use crate::engine::executor::{self, ExecRequest, OutputChunk};
use crate::engine::idle_timer::{IdleEvent, IdleTimer, IdleTimerHandle};
use crate::events::{EventBroadcaster, SessionEvent, SessionEventKind};
use crate::models::execution::ExecutionResult;
use crate::models::session::{OutputChannel, OutputEntry, Session, SessionStatus, SessionSummary};
use crate::policy::rules::CommandRules;
use crate::{AppError, Result};

/// Capacity of the idle-event channel between timers and the consumer task.
const IDLE_EVENT_CAPACITY: usize = 32;

/// Capacity of the per-execution output chunk channel.
const CHUNK_CHANNEL_CAPACITY: usize = 64;

/// Caller options for session creation.
#[derive(Debug, Clone, Default)]
pub struct SessionOptions {
    /// Working directory override; engine default when absent.
    pub working_directory: Option<PathBuf>,
    /// Extra environment variables applied to every spawn in the session.
    pub environment: HashMap<String, String>,
}

/// Caller options for command execution.
#[derive(Debug, Clone, Copy, Default)]
pub struct ExecuteOptions {
    /// Requested timeout; clamped to the configured maximum, defaulted when
    /// absent.
    pub timeout_ms: Option<u64>,
    /// Confirmation flag for dangerous commands.
    pub safety_confirmed: bool,
}

/// Aggregate engine status for read-only introspection.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct EngineStatus {
    /// Currently live sessions.
    pub active_sessions: usize,
    /// Configured session cap.
    pub max_sessions: u32,
    /// Default command timeout in milliseconds.
    pub command_timeout_ms: u64,
    /// Hard maximum command timeout in milliseconds.
    pub max_command_timeout_ms: u64,
    /// Idle eviction window in seconds.
    pub idle_timeout_seconds: u64,
    /// Output buffer entry cap per session.
    pub output_buffer_cap: usize,
}

struct SessionEntry {
    session: Session,
    idle: IdleTimerHandle,
    /// Cancellation token of the in-flight execution, if any. Presence is
    /// the single-flight guard.
    active: Option<CancellationToken>,
}

struct RegistryInner {
    config: GlobalConfig,
    rules: CommandRules,
    sessions: Mutex<HashMap<String, SessionEntry>>,
    broadcaster: EventBroadcaster,
    idle_tx: mpsc::Sender<IdleEvent>,
    shutdown: CancellationToken,
}

/// Shared handle to the sandbox engine.
#[derive(Clone)]
pub struct SessionRegistry {
    inner: Arc<RegistryInner>,
}

impl SessionRegistry {
    /// Build the engine and start its idle-event consumer task.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if the policy rule sets fail to compile.
    pub fn new(config: GlobalConfig) -> Result<Self> {
        let rules = CommandRules::from_config(&config.policy)?;
        let (idle_tx, idle_rx) = mpsc::channel(IDLE_EVENT_CAPACITY);
        let broadcaster = EventBroadcaster::new(config.event_capacity);

        let inner = Arc::new(RegistryInner {
            config,
            rules,
            sessions: Mutex::new(HashMap::new()),
            broadcaster,
            idle_tx,
            shutdown: CancellationToken::new(),
        });

        tokio::spawn(consume_idle_events(Arc::clone(&inner), idle_rx));

        Ok(Self { inner })
    }

    /// Create a new session.
    ///
    /// A `None` id gets a generated UUID. The idle timer is armed
    /// immediately and a `SessionCreated` event is published.
    ///
    /// # Errors
    ///
    /// Returns `AppError::CapacityExceeded` at the session cap, or
    /// `AppError::DuplicateSession` when the id already exists.
    pub async fn create_session(
        &self,
        id: Option<String>,
        owner_id: &str,
        name: &str,
        options: SessionOptions,
    ) -> Result<SessionSummary> {
        let max = usize::try_from(self.inner.config.max_sessions).unwrap_or(usize::MAX);

        let summary = {
            let mut sessions = self.inner.sessions.lock().await;

            if sessions.len() >= max {
                return Err(AppError::CapacityExceeded(format!(
                    "session limit reached ({}/{})",
                    sessions.len(),
                    self.inner.config.max_sessions
                )));
            }

            if let Some(ref requested) = id {
                if sessions.contains_key(requested) {
                    return Err(AppError::DuplicateSession(format!(
                        "session {requested} already exists"
                    )));
                }
            }

            let working_directory = options
                .working_directory
                .unwrap_or_else(|| self.inner.config.default_working_dir.clone());

            let session = Session::new(
                id,
                owner_id.to_owned(),
                name.to_owned(),
                working_directory,
                options.environment,
            );

            let idle = IdleTimer::new(
                session.id.clone(),
                self.inner.config.idle_timeout(),
                self.inner.idle_tx.clone(),
                self.inner.shutdown.child_token(),
            )
            .spawn();

            let summary = session.summary();
            sessions.insert(
                session.id.clone(),
                SessionEntry {
                    session,
                    idle,
                    active: None,
                },
            );
            summary
        };

        self.inner
            .broadcaster
            .publish(SessionEvent::lifecycle(&summary.id, SessionEventKind::SessionCreated));
        info!(session_id = %summary.id, owner = owner_id, "session created");

        Ok(summary)
    }

    /// Summary of one session.
    ///
    /// # Errors
    ///
    /// Returns `AppError::SessionNotFound` for unknown ids.
    pub async fn get_session(&self, id: &str) -> Result<SessionSummary> {
        let sessions = self.inner.sessions.lock().await;
        sessions
            .get(id)
            .map(|entry| entry.session.summary())
            .ok_or_else(|| AppError::SessionNotFound(format!("session {id} not found")))
    }

    /// Full session state including command history and the output backlog.
    /// Late event subscribers read missed output here.
    ///
    /// # Errors
    ///
    /// Returns `AppError::SessionNotFound` for unknown ids.
    pub async fn session_snapshot(&self, id: &str) -> Result<Session> {
        let sessions = self.inner.sessions.lock().await;
        sessions
            .get(id)
            .map(|entry| entry.session.clone())
            .ok_or_else(|| AppError::SessionNotFound(format!("session {id} not found")))
    }

    /// Summaries of all sessions owned by `owner_id`, oldest first.
    pub async fn list_sessions(&self, owner_id: &str) -> Vec<SessionSummary> {
        let sessions = self.inner.sessions.lock().await;
        let mut summaries: Vec<SessionSummary> = sessions
            .values()
            .filter(|entry| entry.session.owner_id == owner_id)
            .map(|entry| entry.session.summary())
            .collect();
        summaries.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        summaries
    }

    /// Destroy a session: cancel any in-flight execution (terminating its
    /// process), stop the idle timer, remove the session, and publish
    /// `SessionDestroyed`.
    ///
    /// Idempotent — returns `false` without error when the session is
    /// already absent.
    pub async fn destroy_session(&self, id: &str) -> bool {
        destroy_entry(&self.inner, id).await
    }

    /// Append a timestamped entry to the session's bounded output buffer,
    /// publish a `SessionOutput` event, and rearm the idle timer.
    ///
    /// # Errors
    ///
    /// Returns `AppError::SessionNotFound` for unknown ids.
    pub async fn record_output(
        &self,
        id: &str,
        channel: OutputChannel,
        content: &str,
    ) -> Result<()> {
        {
            let mut sessions = self.inner.sessions.lock().await;
            let entry = sessions
                .get_mut(id)
                .ok_or_else(|| AppError::SessionNotFound(format!("session {id} not found")))?;
            entry.session.push_output(
                OutputEntry::new(channel, content),
                self.inner.config.output_buffer_cap,
            );
            entry.idle.reset();
        }

        self.inner
            .broadcaster
            .publish(SessionEvent::output(id, channel, content));
        Ok(())
    }

    /// Execute a command inside a session.
    ///
    /// Admission control runs first and leaves the session untouched on a
    /// denial (zero processes spawned). An admitted command is echoed into
    /// the history, the session transitions to `Running`, output streams
    /// into the buffer and the broadcast channel as it arrives, and the
    /// session returns to `Idle` when the result is finalized — or to
    /// `Error` on a spawn failure.
    ///
    /// # Errors
    ///
    /// Returns `AppError::SessionNotFound`, `AppError::SessionBusy`, a
    /// policy denial, or `AppError::Spawn`. Timeouts are reported in the
    /// returned [`ExecutionResult`], not as errors.
    pub async fn execute_command(
        &self,
        id: &str,
        command: &str,
        options: ExecuteOptions,
    ) -> Result<ExecutionResult> {
        let request = {
            let mut sessions = self.inner.sessions.lock().await;
            let entry = sessions
                .get_mut(id)
                .ok_or_else(|| AppError::SessionNotFound(format!("session {id} not found")))?;

            if entry.active.is_some() || entry.session.status == SessionStatus::Running {
                return Err(AppError::SessionBusy(
                    "a command is already running in this session".into(),
                ));
            }

            // Admission control before any mutation: a denial must leave the
            // session exactly as it was.
            executor::admit(command, options.safety_confirmed, &self.inner.rules)?;

            entry
                .session
                .record_command(command, self.inner.config.output_buffer_cap);
            entry.session.status = SessionStatus::Running;
            entry.idle.reset();

            let cancel = self.inner.shutdown.child_token();
            entry.active = Some(cancel.clone());

            ExecRequest {
                command: command.to_owned(),
                working_dir: entry.session.working_directory.clone(),
                env: entry.session.environment.clone(),
                timeout: executor::effective_timeout(options.timeout_ms, &self.inner.config),
                safety_confirmed: options.safety_confirmed,
                cancel,
            }
        };

        self.inner
            .broadcaster
            .publish(SessionEvent::output(id, OutputChannel::Command, command));
        self.inner
            .broadcaster
            .publish(SessionEvent::with_data(id, SessionEventKind::CommandStart, command));

        // Stream chunks into the session buffer and broadcast channel as
        // they arrive. The task ends once the executor's pumps hang up.
        let (chunk_tx, mut chunk_rx) = mpsc::channel::<OutputChunk>(CHUNK_CHANNEL_CAPACITY);
        let stream_registry = self.clone();
        let stream_id = id.to_owned();
        let stream_task = tokio::spawn(async move {
            while let Some(chunk) = chunk_rx.recv().await {
                if let Err(err) = stream_registry
                    .record_output(&stream_id, chunk.channel, &chunk.content)
                    .await
                {
                    // Session destroyed mid-flight; keep draining.
                    debug!(%err, session_id = %stream_id, "dropping output chunk");
                }
            }
        });

        let exec_result = executor::execute(request, &self.inner.rules, chunk_tx).await;

        // For a process that exited on its own the pumps have hung up, so
        // the stream task finishes promptly; draining it here guarantees the
        // output buffer is complete before the caller sees the result.
        // Terminated executions (timeout/cancel) finalize immediately — any
        // buffered tail lands asynchronously.
        let drain_stream = match &exec_result {
            Ok(result) => result.exit_code.is_some(),
            Err(_) => true,
        };
        if drain_stream {
            let _ = stream_task.await;
        }

        {
            let mut sessions = self.inner.sessions.lock().await;
            if let Some(entry) = sessions.get_mut(id) {
                entry.active = None;
                entry.session.status = match exec_result {
                    Ok(_) => SessionStatus::Idle,
                    Err(_) => SessionStatus::Error,
                };
                entry.session.touch();
                entry.idle.reset();
            }
        }

        match exec_result {
            Ok(result) => {
                self.inner.broadcaster.publish(SessionEvent {
                    session_id: id.to_owned(),
                    kind: SessionEventKind::CommandComplete,
                    output_channel: None,
                    data: serde_json::to_string(&result).ok(),
                    timestamp: Utc::now(),
                });
                info!(
                    session_id = id,
                    success = result.success,
                    timed_out = result.timed_out,
                    duration_ms = result.duration_ms,
                    "command complete"
                );
                Ok(result)
            }
            Err(err) => {
                let _ = self
                    .record_output(id, OutputChannel::Error, &err.to_string())
                    .await;
                self.inner.broadcaster.publish(SessionEvent::with_data(
                    id,
                    SessionEventKind::CommandError,
                    err.to_string(),
                ));
                warn!(session_id = id, %err, "command dispatch failed");
                Err(err)
            }
        }
    }

    /// Register a new event subscriber.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.inner.broadcaster.subscribe()
    }

    /// Sorted allowlist (read-only introspection).
    #[must_use]
    pub fn allowed_commands(&self) -> Vec<String> {
        self.inner.rules.allowed_commands()
    }

    /// Sorted dangerous-list (read-only introspection).
    #[must_use]
    pub fn dangerous_commands(&self) -> Vec<String> {
        self.inner.rules.dangerous_commands()
    }

    /// Sorted blocklist (read-only introspection).
    #[must_use]
    pub fn blocked_commands(&self) -> Vec<String> {
        self.inner.rules.blocked_commands()
    }

    /// Aggregate engine status (read-only introspection).
    pub async fn status(&self) -> EngineStatus {
        let active_sessions = self.inner.sessions.lock().await.len();
        EngineStatus {
            active_sessions,
            max_sessions: self.inner.config.max_sessions,
            command_timeout_ms: self.inner.config.command_timeout_ms,
            max_command_timeout_ms: self.inner.config.max_command_timeout_ms,
            idle_timeout_seconds: self.inner.config.idle_timeout_seconds,
            output_buffer_cap: self.inner.config.output_buffer_cap,
        }
    }

    /// Tear the engine down: cancel every in-flight execution and idle
    /// timer, then destroy all sessions (publishing `SessionDestroyed` for
    /// each). Used by the host on SIGINT/SIGTERM.
    pub async fn shutdown(&self) {
        self.inner.shutdown.cancel();

        let ids: Vec<String> = {
            let sessions = self.inner.sessions.lock().await;
            sessions.keys().cloned().collect()
        };
        for id in ids {
            destroy_entry(&self.inner, &id).await;
        }
        info!("sandbox engine shut down");
    }
}

/// Remove one session, cancelling its execution and idle timer. Shared by
/// explicit destroy, idle eviction, and engine shutdown.
async fn destroy_entry(inner: &RegistryInner, id: &str) -> bool {
    let entry = {
        let mut sessions = inner.sessions.lock().await;
        sessions.remove(id)
    };

    let Some(entry) = entry else {
        return false;
    };

    if let Some(cancel) = entry.active {
        // Terminates the in-flight process via the executor's cancel path.
        cancel.cancel();
    }
    entry.idle.await_completion().await;

    inner
        .broadcaster
        .publish(SessionEvent::lifecycle(id, SessionEventKind::SessionDestroyed));
    info!(session_id = id, "session destroyed");
    true
}

/// Consume idle-timer expiries: publish the timeout lifecycle event, then
/// destroy the session. Runs until engine shutdown.
async fn consume_idle_events(inner: Arc<RegistryInner>, mut rx: mpsc::Receiver<IdleEvent>) {
    loop {
        let event = tokio::select! {
            () = inner.shutdown.cancelled() => {
                debug!("idle event consumer shutting down");
                break;
            }
            maybe_event = rx.recv() => {
                if let Some(event) = maybe_event {
                    event
                } else {
                    debug!("idle event channel closed");
                    break;
                }
            }
        };

        let IdleEvent::Expired {
            session_id,
            idle_seconds,
        } = event;

        info!(session_id, idle_seconds, "evicting idle session");
        inner.broadcaster.publish(SessionEvent::with_data(
            &session_id,
            SessionEventKind::SessionTimeout,
            format!("idle for {idle_seconds}s"),
        ));
        destroy_entry(&inner, &session_id).await;
    }
}
