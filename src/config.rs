//! Global configuration parsing and validation.

use std::fs;
use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::policy::rules::{self, CommandRules};
use crate::{AppError, Result};

/// Command admission-control lists.
///
/// Every list ships with a built-in default (see [`rules`]) so a deployment
/// only overrides the sets it needs to change. Base tokens are matched
/// exactly; `blocked_patterns` are regexes matched against the full command
/// line regardless of base token.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct PolicyConfig {
    /// Base commands admitted for execution (default-deny closed world).
    #[serde(default = "rules::default_allowed")]
    pub allowed: Vec<String>,
    /// Base commands capable of data loss; require explicit confirmation.
    #[serde(default = "rules::default_dangerous")]
    pub dangerous: Vec<String>,
    /// Base commands always denied.
    #[serde(default = "rules::default_blocked")]
    pub blocked: Vec<String>,
    /// Full-line regex patterns denied unconditionally.
    #[serde(default = "rules::default_blocked_patterns")]
    pub blocked_patterns: Vec<String>,
}

impl Default for PolicyConfig {
    fn default() -> Self {
        Self {
            allowed: rules::default_allowed(),
            dangerous: rules::default_dangerous(),
            blocked: rules::default_blocked(),
            blocked_patterns: rules::default_blocked_patterns(),
        }
    }
}

fn default_max_sessions() -> u32 {
    10
}

fn default_output_buffer_cap() -> usize {
    1000
}

fn default_command_timeout_ms() -> u64 {
    30_000
}

fn default_max_command_timeout_ms() -> u64 {
    300_000
}

fn default_idle_timeout_seconds() -> u64 {
    1800
}

fn default_event_capacity() -> usize {
    256
}

fn default_working_dir() -> PathBuf {
    std::env::temp_dir()
}

/// Global configuration parsed from `config.toml`.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct GlobalConfig {
    /// Working directory for sessions that do not specify one.
    #[serde(default = "default_working_dir")]
    pub default_working_dir: PathBuf,
    /// Maximum concurrently live sessions.
    #[serde(default = "default_max_sessions")]
    pub max_sessions: u32,
    /// Maximum entries retained in a session's output buffer (FIFO eviction).
    #[serde(default = "default_output_buffer_cap")]
    pub output_buffer_cap: usize,
    /// Command timeout applied when the caller does not request one.
    #[serde(default = "default_command_timeout_ms")]
    pub command_timeout_ms: u64,
    /// Hard upper bound on any requested command timeout.
    #[serde(default = "default_max_command_timeout_ms")]
    pub max_command_timeout_ms: u64,
    /// Idle window after which a session is evicted.
    #[serde(default = "default_idle_timeout_seconds")]
    pub idle_timeout_seconds: u64,
    /// Capacity of the broadcast event channel (lagged subscribers lose
    /// oldest events).
    #[serde(default = "default_event_capacity")]
    pub event_capacity: usize,
    /// Command admission-control lists.
    #[serde(default)]
    pub policy: PolicyConfig,
}

impl Default for GlobalConfig {
    fn default() -> Self {
        Self {
            default_working_dir: default_working_dir(),
            max_sessions: default_max_sessions(),
            output_buffer_cap: default_output_buffer_cap(),
            command_timeout_ms: default_command_timeout_ms(),
            max_command_timeout_ms: default_max_command_timeout_ms(),
            idle_timeout_seconds: default_idle_timeout_seconds(),
            event_capacity: default_event_capacity(),
            policy: PolicyConfig::default(),
        }
    }
}

impl GlobalConfig {
    /// Load and validate configuration from a TOML file path.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if the file cannot be read or contains
    /// invalid TOML, or if validation fails.
    pub fn load_from_path(path: impl AsRef<Path>) -> Result<Self> {
        let raw = fs::read_to_string(path)
            .map_err(|err| AppError::Config(format!("failed to read config: {err}")))?;
        Self::from_toml_str(&raw)
    }

    /// Parse configuration from a TOML string and normalize paths.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if parsing or validation fails.
    pub fn from_toml_str(raw: &str) -> Result<Self> {
        let mut config: Self = toml::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Default command timeout as a [`std::time::Duration`].
    #[must_use]
    pub fn command_timeout(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.command_timeout_ms)
    }

    /// Idle eviction window as a [`std::time::Duration`].
    #[must_use]
    pub fn idle_timeout(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.idle_timeout_seconds)
    }

    fn validate(&mut self) -> Result<()> {
        if self.max_sessions == 0 {
            return Err(AppError::Config("max_sessions must be greater than zero".into()));
        }

        if self.output_buffer_cap == 0 {
            return Err(AppError::Config(
                "output_buffer_cap must be greater than zero".into(),
            ));
        }

        if self.command_timeout_ms == 0 || self.max_command_timeout_ms == 0 {
            return Err(AppError::Config("command timeouts must be greater than zero".into()));
        }

        if self.max_command_timeout_ms < self.command_timeout_ms {
            return Err(AppError::Config(
                "max_command_timeout_ms must not be below command_timeout_ms".into(),
            ));
        }

        if self.idle_timeout_seconds == 0 {
            return Err(AppError::Config(
                "idle_timeout_seconds must be greater than zero".into(),
            ));
        }

        let canonical = self
            .default_working_dir
            .canonicalize()
            .map_err(|err| AppError::Config(format!("default_working_dir invalid: {err}")))?;
        self.default_working_dir = canonical;

        // Fail fast on malformed policy regexes rather than at first dispatch.
        CommandRules::from_config(&self.policy)?;

        Ok(())
    }
}
