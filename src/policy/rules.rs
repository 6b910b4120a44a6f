//! Command admission-control rule sets.
//!
//! Three base-token sets with strict precedence (blocked > dangerous >
//! allowed) plus a handful of full-line patterns that are denied regardless
//! of base token. Defaults cover a typical automation-agent workload; each
//! set can be overridden from `config.toml`.

use std::collections::HashSet;

use regex::Regex;

use crate::config::PolicyConfig;
use crate::{AppError, Result};

/// Base commands admitted by default. Dangerous commands that may run after
/// confirmation must also appear here — admission always ends at the
/// allowlist check.
const DEFAULT_ALLOWED: &[&str] = &[
    "echo", "ls", "cat", "head", "tail", "wc", "grep", "find", "pwd", "which", "env",
    "printenv", "date", "whoami", "uname", "du", "df", "stat", "file", "sort", "uniq",
    "cut", "tr", "basename", "dirname", "sleep", "true", "false", "mkdir", "touch",
    "sed", "awk", "diff", "tar", "gzip", "gunzip", "git", "cargo", "make", "rm",
    "rmdir", "mv", "cp", "truncate", "ln",
];

/// Base commands capable of data loss; admitted only with explicit
/// confirmation, and even then still subject to the allowlist.
const DEFAULT_DANGEROUS: &[&str] =
    &["rm", "rmdir", "mv", "cp", "truncate", "shred", "ln", "git"];

/// Base commands always denied: privilege escalation, destructive system
/// tools, raw network tools.
const DEFAULT_BLOCKED: &[&str] = &[
    "sudo", "su", "doas", "shutdown", "reboot", "halt", "poweroff", "init", "mkfs",
    "fdisk", "dd", "kill", "killall", "pkill", "nc", "ncat", "telnet", "nmap", "curl",
    "wget", "ssh", "scp", "iptables", "mount", "umount", "passwd", "useradd", "userdel",
    "chown", "insmod", "rmmod", "crontab",
];

/// Full-line patterns denied unconditionally. Remote package execution pulls
/// and runs unpinned code; pipe-to-shell would be inert without a shell but
/// is denied outright anyway.
const DEFAULT_BLOCKED_PATTERNS: &[&str] = &[
    r"^npx\s",
    r"^npm\s+exec(\s|$)",
    r"^pnpm\s+dlx\s",
    r"^yarn\s+dlx\s",
    r"\|\s*(sh|bash|zsh|dash)\b",
];

/// Default allowlist as owned strings (serde default hook).
#[must_use]
pub fn default_allowed() -> Vec<String> {
    DEFAULT_ALLOWED.iter().map(ToString::to_string).collect()
}

/// Default dangerous-list as owned strings (serde default hook).
#[must_use]
pub fn default_dangerous() -> Vec<String> {
    DEFAULT_DANGEROUS.iter().map(ToString::to_string).collect()
}

/// Default blocklist as owned strings (serde default hook).
#[must_use]
pub fn default_blocked() -> Vec<String> {
    DEFAULT_BLOCKED.iter().map(ToString::to_string).collect()
}

/// Default hard-blocked pattern list as owned strings (serde default hook).
#[must_use]
pub fn default_blocked_patterns() -> Vec<String> {
    DEFAULT_BLOCKED_PATTERNS.iter().map(ToString::to_string).collect()
}

/// Compiled admission-control rule sets.
///
/// Built once from [`PolicyConfig`] and shared read-only across the engine;
/// evaluation never mutates.
#[derive(Debug)]
pub struct CommandRules {
    allowed: HashSet<String>,
    dangerous: HashSet<String>,
    blocked: HashSet<String>,
    blocked_patterns: Vec<Regex>,
}

impl CommandRules {
    /// Compile rule sets from configuration.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if a blocked pattern is not a valid regex.
    pub fn from_config(policy: &PolicyConfig) -> Result<Self> {
        let blocked_patterns = policy
            .blocked_patterns
            .iter()
            .map(|pattern| {
                Regex::new(pattern).map_err(|err| {
                    AppError::Config(format!("invalid blocked pattern `{pattern}`: {err}"))
                })
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            allowed: policy.allowed.iter().cloned().collect(),
            dangerous: policy.dangerous.iter().cloned().collect(),
            blocked: policy.blocked.iter().cloned().collect(),
            blocked_patterns,
        })
    }

    /// Whether `base` is on the allowlist.
    #[must_use]
    pub fn is_allowed(&self, base: &str) -> bool {
        self.allowed.contains(base)
    }

    /// Whether `base` is on the dangerous-list.
    #[must_use]
    pub fn is_dangerous(&self, base: &str) -> bool {
        self.dangerous.contains(base)
    }

    /// Whether `base` is on the blocklist.
    #[must_use]
    pub fn is_blocked(&self, base: &str) -> bool {
        self.blocked.contains(base)
    }

    /// First hard-blocked pattern matching the full command line, if any.
    #[must_use]
    pub fn matched_blocked_pattern(&self, command: &str) -> Option<&str> {
        self.blocked_patterns
            .iter()
            .find(|re| re.is_match(command))
            .map(Regex::as_str)
    }

    /// Sorted allowlist for introspection endpoints.
    #[must_use]
    pub fn allowed_commands(&self) -> Vec<String> {
        Self::sorted(&self.allowed)
    }

    /// Sorted dangerous-list for introspection endpoints.
    #[must_use]
    pub fn dangerous_commands(&self) -> Vec<String> {
        Self::sorted(&self.dangerous)
    }

    /// Sorted blocklist for introspection endpoints.
    #[must_use]
    pub fn blocked_commands(&self) -> Vec<String> {
        Self::sorted(&self.blocked)
    }

    fn sorted(set: &HashSet<String>) -> Vec<String> {
        let mut list: Vec<String> = set.iter().cloned().collect();
        list.sort();
        list
    }
}
