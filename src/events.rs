//! Session lifecycle and output event broadcasting.
//!
//! One broadcast channel per engine instance. Every event carries the
//! originating session ID so subscribers filter as needed. Delivery is
//! at-most-once per live subscriber with no replay buffer — a late
//! subscriber reads the session's own output backlog for history. A lagged
//! receiver loses the oldest events; the publisher never blocks.

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::broadcast;

use crate::models::session::OutputChannel;

/// Kind discriminator for [`SessionEvent`].
#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SessionEventKind {
    /// A session was created.
    SessionCreated,
    /// A session was destroyed (explicitly or during teardown).
    SessionDestroyed,
    /// A session hit its idle window; destruction follows.
    SessionTimeout,
    /// A command passed admission control and is being dispatched.
    CommandStart,
    /// A command execution finalized (including timeouts).
    CommandComplete,
    /// A command dispatch failed (spawn failure).
    CommandError,
    /// A chunk of session output was recorded.
    SessionOutput,
}

/// One event on the engine's broadcast channel.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "snake_case")]
pub struct SessionEvent {
    /// Originating session.
    pub session_id: String,
    /// Event kind.
    #[serde(rename = "type")]
    pub kind: SessionEventKind,
    /// Output channel, present on `SessionOutput` events.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output_channel: Option<OutputChannel>,
    /// Event payload (output chunk, command line, error text).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<String>,
    /// When the event was published.
    pub timestamp: DateTime<Utc>,
}

impl SessionEvent {
    /// Build a lifecycle event with no payload.
    #[must_use]
    pub fn lifecycle(session_id: impl Into<String>, kind: SessionEventKind) -> Self {
        Self {
            session_id: session_id.into(),
            kind,
            output_channel: None,
            data: None,
            timestamp: Utc::now(),
        }
    }

    /// Build an event carrying a data payload.
    #[must_use]
    pub fn with_data(
        session_id: impl Into<String>,
        kind: SessionEventKind,
        data: impl Into<String>,
    ) -> Self {
        Self {
            session_id: session_id.into(),
            kind,
            output_channel: None,
            data: Some(data.into()),
            timestamp: Utc::now(),
        }
    }

    /// Build a `SessionOutput` event for one recorded chunk.
    #[must_use]
    pub fn output(
        session_id: impl Into<String>,
        channel: OutputChannel,
        data: impl Into<String>,
    ) -> Self {
        Self {
            session_id: session_id.into(),
            kind: SessionEventKind::SessionOutput,
            output_channel: Some(channel),
            data: Some(data.into()),
            timestamp: Utc::now(),
        }
    }
}

/// Publish/subscribe fan-out for [`SessionEvent`]s.
#[derive(Debug)]
pub struct EventBroadcaster {
    tx: broadcast::Sender<SessionEvent>,
}

impl EventBroadcaster {
    /// Create a broadcaster whose channel retains `capacity` undelivered
    /// events per subscriber before lagging.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    /// Register a new subscriber. Events published before this call are not
    /// delivered.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.tx.subscribe()
    }

    /// Publish an event to all live subscribers. A send with no subscribers
    /// is not an error.
    pub fn publish(&self, event: SessionEvent) {
        let _ = self.tx.send(event);
    }
}
