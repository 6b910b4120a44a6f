//! Command classifier: the admission-control decision function.
//!
//! Pure and side-effect free — callable before any process is spawned.
//! Precedence is strict and load-bearing: **Blocked > RequiresConfirmation >
//! Allowed**. Confirmation of a dangerous command never short-circuits to
//! admission; the allowlist check still applies afterwards, so confirmation
//! cannot widen the effective allowlist.

use serde::Serialize;

use super::rules::CommandRules;

/// Risk attributed to a command that needs explicit operator confirmation.
#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RiskLevel {
    /// Reversible or read-mostly operations.
    Low,
    /// Operations capable of data loss (delete/move/overwrite).
    High,
    /// Never auto-admitted regardless of confirmation.
    Critical,
}

/// Outcome of classifying one command line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Classification {
    /// Command may be executed.
    Allowed,
    /// Dangerous command lacking the safety flag; caller must re-issue with
    /// confirmation.
    RequiresConfirmation {
        /// Risk attributed to the command.
        risk: RiskLevel,
    },
    /// Command is denied outright.
    Blocked {
        /// Short, caller-safe denial reason.
        reason: String,
    },
    /// Base token absent from the allowlist. Caller-visible semantics are
    /// identical to [`Blocked`](Self::Blocked); kept distinct so denials can
    /// name the default-deny cause.
    NotAllowlisted {
        /// Short, caller-safe denial reason.
        reason: String,
    },
    /// Input is not a classifiable command string.
    InvalidFormat {
        /// Short description of the malformation.
        reason: String,
    },
}

/// First whitespace-delimited word of the command line — the token
/// admission control keys on.
#[must_use]
pub fn base_token(command: &str) -> Option<&str> {
    command.split_whitespace().next()
}

/// Classify `command` against the rule sets.
///
/// Evaluation order:
/// 1. Empty or blank input → `InvalidFormat`.
/// 2. Hard-blocked full-line patterns → `Blocked`, independent of base token.
/// 3. Base token on the blocklist → `Blocked`; no further checks.
/// 4. Base token on the dangerous-list without `safety_confirmed` →
///    `RequiresConfirmation`. With the flag the check *continues* — it does
///    not admit.
/// 5. Base token must be allowlisted; absence → `Blocked` with a distinct
///    "not allowlisted" reason (default-deny).
#[must_use]
pub fn classify(command: &str, safety_confirmed: bool, rules: &CommandRules) -> Classification {
    if command.trim().is_empty() {
        return Classification::InvalidFormat {
            reason: "command is empty".into(),
        };
    }

    let trimmed = command.trim();

    // ── 1. Hard-blocked full-line patterns ───────────────
    if let Some(pattern) = rules.matched_blocked_pattern(trimmed) {
        return Classification::Blocked {
            reason: format!("command matches blocked pattern `{pattern}`"),
        };
    }

    let Some(base) = base_token(trimmed) else {
        return Classification::InvalidFormat {
            reason: "command has no base token".into(),
        };
    };

    // ── 2. Blocklist (always wins) ───────────────────────
    if rules.is_blocked(base) {
        return Classification::Blocked {
            reason: format!("`{base}` is blocked"),
        };
    }

    // ── 3. Dangerous-list confirmation gate ──────────────
    if rules.is_dangerous(base) && !safety_confirmed {
        return Classification::RequiresConfirmation {
            risk: RiskLevel::High,
        };
    }

    // ── 4. Allowlist (default-deny) ──────────────────────
    if rules.is_allowed(base) {
        Classification::Allowed
    } else {
        Classification::NotAllowlisted {
            reason: format!("`{base}` is not allowlisted"),
        }
    }
}
