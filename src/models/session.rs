//! Session model and lifecycle helpers.

use std::collections::{HashMap, VecDeque};
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Lifecycle status for a sandbox session.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    /// No process active; ready to accept a command.
    Idle,
    /// A command's process is currently active.
    Running,
    /// The last dispatch failed to spawn.
    Error,
}

/// Source channel of one output buffer entry.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum OutputChannel {
    /// Child process standard output.
    Stdout,
    /// Child process standard error.
    Stderr,
    /// Echo of a dispatched command line.
    Command,
    /// Engine-side failure surfaced to observers.
    Error,
}

/// One timestamped entry in a session's bounded output buffer.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct OutputEntry {
    /// Channel the content arrived on.
    pub channel: OutputChannel,
    /// Raw text content of the chunk.
    pub content: String,
    /// When the chunk was recorded.
    pub timestamp: DateTime<Utc>,
}

impl OutputEntry {
    /// Construct an entry timestamped now.
    #[must_use]
    pub fn new(channel: OutputChannel, content: impl Into<String>) -> Self {
        Self {
            channel,
            content: content.into(),
            timestamp: Utc::now(),
        }
    }
}

/// Sandbox session domain entity, owned by the registry.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct Session {
    /// Unique session identifier.
    pub id: String,
    /// Owning caller ID; immutable after creation.
    pub owner_id: String,
    /// Operator-facing display name.
    pub name: String,
    /// Directory child processes are spawned in.
    pub working_directory: PathBuf,
    /// Extra environment variables applied to every spawn.
    pub environment: HashMap<String, String>,
    /// Dispatched command lines, oldest first.
    pub command_history: Vec<String>,
    /// Current lifecycle status.
    pub status: SessionStatus,
    /// Bounded output transcript (oldest entries evicted first).
    pub output: VecDeque<OutputEntry>,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
    /// Timestamp of the most recent recorded activity.
    pub last_activity_at: DateTime<Utc>,
}

impl Session {
    /// Construct a new idle session. A `None` id gets a generated UUID.
    #[must_use]
    pub fn new(
        id: Option<String>,
        owner_id: String,
        name: String,
        working_directory: PathBuf,
        environment: HashMap<String, String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: id.unwrap_or_else(|| Uuid::new_v4().to_string()),
            owner_id,
            name,
            working_directory,
            environment,
            command_history: Vec::new(),
            status: SessionStatus::Idle,
            output: VecDeque::new(),
            created_at: now,
            last_activity_at: now,
        }
    }

    /// Record activity now.
    pub fn touch(&mut self) {
        self.last_activity_at = Utc::now();
    }

    /// Append an output entry, evicting the oldest once `cap` is reached.
    pub fn push_output(&mut self, entry: OutputEntry, cap: usize) {
        while self.output.len() >= cap {
            self.output.pop_front();
        }
        self.output.push_back(entry);
        self.touch();
    }

    /// Append a dispatched command to the history and echo it into the
    /// output buffer.
    pub fn record_command(&mut self, command: &str, cap: usize) {
        self.command_history.push(command.to_owned());
        self.push_output(OutputEntry::new(OutputChannel::Command, command), cap);
    }

    /// Ownership projection returned by create/list/get.
    #[must_use]
    pub fn summary(&self) -> SessionSummary {
        SessionSummary {
            id: self.id.clone(),
            owner_id: self.owner_id.clone(),
            name: self.name.clone(),
            status: self.status,
            working_directory: self.working_directory.clone(),
            created_at: self.created_at,
            last_activity_at: self.last_activity_at,
        }
    }
}

/// Caller-facing projection of a [`Session`] without history or output.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct SessionSummary {
    /// Unique session identifier.
    pub id: String,
    /// Owning caller ID.
    pub owner_id: String,
    /// Operator-facing display name.
    pub name: String,
    /// Current lifecycle status.
    pub status: SessionStatus,
    /// Directory child processes are spawned in.
    pub working_directory: PathBuf,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
    /// Timestamp of the most recent recorded activity.
    pub last_activity_at: DateTime<Utc>,
}
