//! Per-session idle eviction timer.
//!
//! Each live session gets an [`IdleTimer`] armed at creation and rearmed via
//! [`reset`](IdleTimerHandle::reset) on every recorded activity. On expiry a
//! single [`IdleEvent::Expired`] is delivered over a `tokio::sync::mpsc`
//! channel so the registry can publish the timeout lifecycle event and then
//! destroy the session. Explicit destruction cancels the timer through the
//! handle; no timer task survives its session.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, Notify};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, info_span, Instrument};

/// Events emitted by an idle timer for registry handling.
#[derive(Debug, Clone)]
pub enum IdleEvent {
    /// Session passed its idle window with no recorded activity.
    Expired {
        /// Session whose window elapsed.
        session_id: String,
        /// Configured idle window, in seconds.
        idle_seconds: u64,
    },
}

/// Builder for a per-session idle timer.
///
/// Call [`spawn`](Self::spawn) to start the background timer task.
pub struct IdleTimer {
    session_id: String,
    window: Duration,
    event_tx: mpsc::Sender<IdleEvent>,
    cancel: CancellationToken,
}

impl IdleTimer {
    /// Construct a new timer (does not start the task yet).
    #[must_use]
    pub fn new(
        session_id: String,
        window: Duration,
        event_tx: mpsc::Sender<IdleEvent>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            session_id,
            window,
            event_tx,
            cancel,
        }
    }

    /// Spawn the background timer task and return its controlling handle.
    #[must_use]
    pub fn spawn(self) -> IdleTimerHandle {
        let reset_notify = Arc::new(Notify::new());
        let cancel_for_handle = self.cancel.clone();

        let task_handle = tokio::spawn(
            Self::run(
                self.session_id.clone(),
                self.window,
                self.event_tx,
                self.cancel,
                Arc::clone(&reset_notify),
            )
            .instrument(info_span!("idle_timer")),
        );

        IdleTimerHandle {
            reset_notify,
            session_id: self.session_id,
            join_handle: Some(task_handle),
            cancel: cancel_for_handle,
        }
    }

    /// Core timer loop: sleep for the idle window, restart on reset, emit a
    /// single expiry event when the window elapses uninterrupted.
    async fn run(
        session_id: String,
        window: Duration,
        event_tx: mpsc::Sender<IdleEvent>,
        cancel: CancellationToken,
        reset_notify: Arc<Notify>,
    ) {
        loop {
            let fired = tokio::select! {
                () = cancel.cancelled() => {
                    debug!(session_id, "idle timer cancelled");
                    return;
                }
                () = tokio::time::sleep(window) => true,
                () = reset_notify.notified() => false,
            };

            if !fired {
                continue;
            }

            info!(session_id, idle_secs = window.as_secs(), "session idle window elapsed");
            // Race the send against cancellation so a destroy that joins
            // this task never waits on a blocked channel.
            tokio::select! {
                () = cancel.cancelled() => {}
                _ = event_tx.send(IdleEvent::Expired {
                    session_id: session_id.clone(),
                    idle_seconds: window.as_secs(),
                }) => {}
            }
            // The registry destroys the session in response; nothing more to
            // time here.
            return;
        }
    }
}

/// Handle returned from [`IdleTimer::spawn`] for controlling the timer.
pub struct IdleTimerHandle {
    reset_notify: Arc<Notify>,
    session_id: String,
    /// Task handle for the background timer loop.
    join_handle: Option<JoinHandle<()>>,
    /// Per-session cancellation token — cancelled when the handle is dropped.
    cancel: CancellationToken,
}

impl Drop for IdleTimerHandle {
    /// Cancel the background timer task when the handle is dropped.
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

impl IdleTimerHandle {
    /// Rearm the idle window (call on every session activity).
    pub fn reset(&self) {
        self.reset_notify.notify_one();
    }

    /// The session ID this handle controls.
    #[must_use]
    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    /// Signal the timer task to stop and wait for it to exit.
    pub async fn await_completion(mut self) {
        self.cancel.cancel();
        if let Some(handle) = self.join_handle.take() {
            let _ = handle.await;
        }
    }
}
