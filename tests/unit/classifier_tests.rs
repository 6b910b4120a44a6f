//! Unit tests for the command classifier.
//!
//! Validates that:
//! - Precedence is strictly Blocked > RequiresConfirmation > Allowed.
//! - Confirmation of a dangerous command continues to the allowlist check
//!   rather than short-circuiting to admission.
//! - Absence from the allowlist is a default-deny rejection.
//! - Hard-blocked full-line patterns fire regardless of base token.

use agent_sandbox::config::PolicyConfig;
use agent_sandbox::policy::classifier::{base_token, classify, Classification, RiskLevel};
use agent_sandbox::policy::rules::CommandRules;

fn default_rules() -> CommandRules {
    CommandRules::from_config(&PolicyConfig::default()).expect("default rules must compile")
}

// ─── Base token extraction ─────────────────────────────────────────────

#[test]
fn base_token_is_first_whitespace_word() {
    assert_eq!(base_token("echo hello world"), Some("echo"));
    assert_eq!(base_token("  ls   -la"), Some("ls"));
    assert_eq!(base_token(""), None);
}

// ─── Invalid input ─────────────────────────────────────────────────────

#[test]
fn empty_command_is_invalid_format() {
    let rules = default_rules();
    assert!(matches!(
        classify("", false, &rules),
        Classification::InvalidFormat { .. }
    ));
    assert!(matches!(
        classify("   \t  ", false, &rules),
        Classification::InvalidFormat { .. }
    ));
}

// ─── Blocklist precedence ──────────────────────────────────────────────

#[test]
fn blocked_base_token_is_rejected() {
    let rules = default_rules();
    let result = classify("sudo ls", false, &rules);
    assert!(
        matches!(result, Classification::Blocked { .. }),
        "sudo must be blocked; got {result:?}"
    );
}

#[test]
fn blocklist_wins_over_allowlist() {
    // A token deliberately present on both lists must still be blocked.
    let mut policy = PolicyConfig::default();
    policy.allowed.push("sudo".into());
    let rules = CommandRules::from_config(&policy).expect("rules must compile");

    assert!(matches!(
        classify("sudo echo hi", true, &rules),
        Classification::Blocked { .. }
    ));
}

#[test]
fn blocklist_wins_over_confirmation() {
    // Confirmation never unblocks a blocklisted command.
    let rules = default_rules();
    assert!(matches!(
        classify("sudo rm -rf /", true, &rules),
        Classification::Blocked { .. }
    ));
}

// ─── Hard-blocked full-line patterns ───────────────────────────────────

#[test]
fn remote_package_execution_is_hard_blocked() {
    let rules = default_rules();
    for command in ["npx cowsay hi", "npm exec something", "pnpm dlx tool", "yarn dlx tool"] {
        let result = classify(command, true, &rules);
        assert!(
            matches!(result, Classification::Blocked { .. }),
            "`{command}` must be hard-blocked; got {result:?}"
        );
    }
}

#[test]
fn pipe_to_shell_is_hard_blocked_even_for_allowlisted_base() {
    let rules = default_rules();
    // `cat` alone is allowlisted; the pattern match still denies the line.
    let result = classify("cat script.txt | sh", false, &rules);
    assert!(
        matches!(result, Classification::Blocked { .. }),
        "pipe-to-shell must be blocked; got {result:?}"
    );
}

// ─── Dangerous-list confirmation gate ──────────────────────────────────

#[test]
fn dangerous_without_confirmation_requires_confirmation() {
    let rules = default_rules();
    let result = classify("rm -rf /tmp/x", false, &rules);
    assert!(
        matches!(
            result,
            Classification::RequiresConfirmation {
                risk: RiskLevel::High
            }
        ),
        "unconfirmed rm must require confirmation; got {result:?}"
    );
}

#[test]
fn dangerous_with_confirmation_proceeds_to_allowlist() {
    let rules = default_rules();
    // rm is both dangerous and allowlisted: confirmed → admitted.
    assert_eq!(classify("rm -rf /tmp/x", true, &rules), Classification::Allowed);
}

#[test]
fn confirmation_does_not_widen_the_allowlist() {
    // shred is dangerous but not allowlisted by default; even confirmed it
    // must be rejected with the not-allowlisted reason.
    let rules = default_rules();
    let result = classify("shred -u secrets.txt", true, &rules);
    assert!(
        matches!(result, Classification::NotAllowlisted { .. }),
        "confirmed shred must still fail the allowlist check; got {result:?}"
    );
}

// ─── Allowlist (default-deny) ──────────────────────────────────────────

#[test]
fn allowlisted_command_is_admitted() {
    let rules = default_rules();
    assert_eq!(classify("echo hello", false, &rules), Classification::Allowed);
    assert_eq!(classify("ls -la /tmp", false, &rules), Classification::Allowed);
}

#[test]
fn unknown_command_is_not_allowlisted() {
    let rules = default_rules();
    let result = classify("frobnicate --all", false, &rules);
    assert!(
        matches!(result, Classification::NotAllowlisted { .. }),
        "unknown base token must be default-denied; got {result:?}"
    );
}

#[test]
fn classify_is_pure_and_repeatable() {
    let rules = default_rules();
    let first = classify("rm -rf /tmp/x", false, &rules);
    let second = classify("rm -rf /tmp/x", false, &rules);
    assert_eq!(first, second);
}
