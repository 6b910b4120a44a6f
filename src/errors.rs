//! Error types shared across the engine.

use std::fmt::{Display, Formatter};

/// Shared engine result type.
pub type Result<T> = std::result::Result<T, AppError>;

/// Engine error enumeration covering all domain failure modes.
///
/// Admission-control denials (`PolicyBlocked`, `PolicyRequiresConfirmation`,
/// `PolicyNotAllowlisted`, `InvalidCommand`) are raised before any process is
/// spawned. Timeouts are never errors — they are reported inside
/// [`ExecutionResult`](crate::models::execution::ExecutionResult) so partial
/// output stays inspectable.
#[derive(Debug)]
pub enum AppError {
    /// Configuration parsing or validation failure.
    Config(String),
    /// Command text is malformed (empty, or not shell-word splittable).
    InvalidCommand(String),
    /// Base command is blocklisted or the line matches a hard-blocked pattern.
    PolicyBlocked(String),
    /// Dangerous command issued without the safety confirmation flag.
    PolicyRequiresConfirmation(String),
    /// Base command is not on the allowlist (default-deny).
    PolicyNotAllowlisted(String),
    /// Session limit reached; a session must be destroyed before retrying.
    CapacityExceeded(String),
    /// A session with the requested ID already exists.
    DuplicateSession(String),
    /// Referenced session is unknown or already destroyed.
    SessionNotFound(String),
    /// The session already has an active process (single-flight violation).
    SessionBusy(String),
    /// The OS could not start the requested process.
    Spawn(String),
    /// File-system or I/O operation failure.
    Io(String),
}

impl AppError {
    /// Whether re-issuing the same command with `safety_confirmed = true`
    /// would let it past admission control.
    #[must_use]
    pub fn confirmation_would_unblock(&self) -> bool {
        matches!(self, Self::PolicyRequiresConfirmation(_))
    }

    /// Whether this error is an admission-control denial (no process was
    /// spawned, and retrying unchanged will fail the same way).
    #[must_use]
    pub fn is_policy_denial(&self) -> bool {
        matches!(
            self,
            Self::InvalidCommand(_)
                | Self::PolicyBlocked(_)
                | Self::PolicyRequiresConfirmation(_)
                | Self::PolicyNotAllowlisted(_)
        )
    }
}

impl Display for AppError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Config(msg) => write!(f, "config: {msg}"),
            Self::InvalidCommand(msg) => write!(f, "invalid command: {msg}"),
            Self::PolicyBlocked(msg) => write!(f, "blocked by policy: {msg}"),
            Self::PolicyRequiresConfirmation(msg) => {
                write!(f, "requires confirmation: {msg} (re-issue with safety_confirmed)")
            }
            Self::PolicyNotAllowlisted(msg) => write!(f, "not allowlisted: {msg}"),
            Self::CapacityExceeded(msg) => write!(f, "capacity exceeded: {msg}"),
            Self::DuplicateSession(msg) => write!(f, "duplicate session: {msg}"),
            Self::SessionNotFound(msg) => write!(f, "session not found: {msg}"),
            Self::SessionBusy(msg) => write!(f, "session busy: {msg}"),
            Self::Spawn(msg) => write!(f, "spawn failure: {msg}"),
            Self::Io(msg) => write!(f, "io: {msg}"),
        }
    }
}

impl std::error::Error for AppError {}

impl From<toml::de::Error> for AppError {
    fn from(err: toml::de::Error) -> Self {
        Self::Config(format!("invalid config: {err}"))
    }
}

impl From<std::io::Error> for AppError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err.to_string())
    }
}
