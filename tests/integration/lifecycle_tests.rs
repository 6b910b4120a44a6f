//! Session lifecycle integration tests: create, list, destroy, and the
//! admission-control scenarios observed end to end through the registry.

use std::collections::HashMap;

use agent_sandbox::engine::registry::{ExecuteOptions, SessionOptions};
use agent_sandbox::models::session::{OutputChannel, SessionStatus};
use agent_sandbox::AppError;

use super::test_helpers::{registry, registry_with};

// ─── Creation ──────────────────────────────────────────────────────────

#[tokio::test]
async fn create_returns_an_idle_summary() {
    let engine = registry();
    let summary = engine
        .create_session(Some("s1".into()), "owner-1", "build box", SessionOptions::default())
        .await
        .expect("create must succeed");

    assert_eq!(summary.id, "s1");
    assert_eq!(summary.owner_id, "owner-1");
    assert_eq!(summary.name, "build box");
    assert_eq!(summary.status, SessionStatus::Idle);
}

#[tokio::test]
async fn missing_id_is_generated() {
    let engine = registry();
    let summary = engine
        .create_session(None, "owner-1", "anon", SessionOptions::default())
        .await
        .expect("create must succeed");
    assert!(!summary.id.is_empty());
}

#[tokio::test]
async fn duplicate_id_is_rejected() {
    let engine = registry();
    engine
        .create_session(Some("dup".into()), "owner-1", "first", SessionOptions::default())
        .await
        .expect("first create must succeed");

    let err = engine
        .create_session(Some("dup".into()), "owner-1", "second", SessionOptions::default())
        .await
        .expect_err("second create must fail");
    assert!(matches!(err, AppError::DuplicateSession(_)));
}

// ─── Lookup and listing ────────────────────────────────────────────────

#[tokio::test]
async fn unknown_session_is_not_found() {
    let engine = registry();
    let err = engine.get_session("ghost").await.expect_err("must fail");
    assert!(matches!(err, AppError::SessionNotFound(_)));
}

#[tokio::test]
async fn list_filters_by_owner() {
    let engine = registry();
    for (id, owner) in [("a1", "alice"), ("a2", "alice"), ("b1", "bob")] {
        engine
            .create_session(Some(id.into()), owner, id, SessionOptions::default())
            .await
            .expect("create must succeed");
    }

    let alice = engine.list_sessions("alice").await;
    assert_eq!(alice.len(), 2);
    assert!(alice.iter().all(|s| s.owner_id == "alice"));

    let carol = engine.list_sessions("carol").await;
    assert!(carol.is_empty());
}

// ─── Idempotent destroy ────────────────────────────────────────────────

#[tokio::test]
async fn destroy_is_idempotent() {
    let engine = registry();
    engine
        .create_session(Some("gone".into()), "owner-1", "gone", SessionOptions::default())
        .await
        .expect("create must succeed");

    assert!(engine.destroy_session("gone").await);
    assert!(!engine.destroy_session("gone").await);
    assert!(!engine.destroy_session("never-existed").await);
}

// ─── Scenario A: echo hello ────────────────────────────────────────────

#[tokio::test]
async fn echo_hello_round_trip() {
    let engine = registry();
    engine
        .create_session(Some("sa".into()), "owner-u", "scenario-a", SessionOptions::default())
        .await
        .expect("create must succeed");

    let result = engine
        .execute_command("sa", "echo hello", ExecuteOptions::default())
        .await
        .expect("echo must run");

    assert!(result.stdout.contains("hello"));
    assert_eq!(result.exit_code, Some(0));
    assert!(result.success);

    let snapshot = engine.session_snapshot("sa").await.expect("snapshot");
    assert_eq!(snapshot.status, SessionStatus::Idle);
    assert_eq!(snapshot.command_history, vec!["echo hello".to_owned()]);
    assert!(snapshot
        .output
        .iter()
        .any(|e| e.channel == OutputChannel::Command && e.content == "echo hello"));
    assert!(snapshot
        .output
        .iter()
        .any(|e| e.channel == OutputChannel::Stdout && e.content.contains("hello")));
}

// ─── Scenario B: dangerous command without confirmation ────────────────

#[tokio::test]
async fn unconfirmed_dangerous_command_leaves_the_session_untouched() {
    let engine = registry();
    engine
        .create_session(Some("sb".into()), "owner-u", "scenario-b", SessionOptions::default())
        .await
        .expect("create must succeed");

    let err = engine
        .execute_command("sb", "rm -rf /tmp/x", ExecuteOptions::default())
        .await
        .expect_err("unconfirmed rm must be rejected");

    assert!(matches!(err, AppError::PolicyRequiresConfirmation(_)));
    assert!(err.confirmation_would_unblock());

    // Zero spawns: no history, no output, still idle.
    let snapshot = engine.session_snapshot("sb").await.expect("snapshot");
    assert_eq!(snapshot.status, SessionStatus::Idle);
    assert!(snapshot.command_history.is_empty());
    assert!(snapshot.output.is_empty());
}

#[tokio::test]
async fn confirmed_dangerous_command_is_admitted() {
    let workdir = tempfile::tempdir().expect("tempdir");
    let victim = workdir.path().join("scratch.txt");
    std::fs::write(&victim, "bytes").expect("write scratch file");

    let engine = registry();
    engine
        .create_session(
            Some("sb2".into()),
            "owner-u",
            "confirmed",
            SessionOptions {
                working_directory: Some(workdir.path().to_path_buf()),
                environment: HashMap::new(),
            },
        )
        .await
        .expect("create must succeed");

    let result = engine
        .execute_command(
            "sb2",
            "rm scratch.txt",
            ExecuteOptions {
                timeout_ms: Some(5000),
                safety_confirmed: true,
            },
        )
        .await
        .expect("confirmed rm must run");

    assert!(result.success);
    assert!(!victim.exists(), "rm must actually remove the file");
}

// ─── Scenario C: blocked command ───────────────────────────────────────

#[tokio::test]
async fn blocked_command_is_rejected_immediately() {
    let engine = registry();
    engine
        .create_session(Some("sc".into()), "owner-u", "scenario-c", SessionOptions::default())
        .await
        .expect("create must succeed");

    let err = engine
        .execute_command("sc", "sudo ls", ExecuteOptions::default())
        .await
        .expect_err("sudo must be rejected");
    assert!(matches!(err, AppError::PolicyBlocked(_)));

    let snapshot = engine.session_snapshot("sc").await.expect("snapshot");
    assert!(snapshot.command_history.is_empty(), "zero spawns recorded");
    assert!(snapshot.output.is_empty());
}

// ─── Single-flight per session ─────────────────────────────────────────

#[tokio::test]
async fn concurrent_dispatch_to_one_session_is_rejected() {
    let engine = registry();
    engine
        .create_session(Some("busy".into()), "owner-u", "busy", SessionOptions::default())
        .await
        .expect("create must succeed");

    let background = {
        let engine = engine.clone();
        tokio::spawn(async move {
            engine
                .execute_command("busy", "sleep 2", ExecuteOptions::default())
                .await
        })
    };

    // Let the first dispatch take the slot.
    tokio::time::sleep(std::time::Duration::from_millis(300)).await;

    let err = engine
        .execute_command("busy", "echo nope", ExecuteOptions::default())
        .await
        .expect_err("second dispatch must be rejected");
    assert!(matches!(err, AppError::SessionBusy(_)));

    // Tear down the in-flight command.
    assert!(engine.destroy_session("busy").await);
    let result = background.await.expect("task must join");
    assert!(result.is_ok(), "cancelled execution finalizes as a result");
}

// ─── record_output and the bounded buffer ──────────────────────────────

#[tokio::test]
async fn recorded_output_lands_in_the_bounded_buffer() {
    let engine = registry_with(|config| config.output_buffer_cap = 3);
    engine
        .create_session(Some("buf".into()), "owner-u", "buffered", SessionOptions::default())
        .await
        .expect("create must succeed");

    for i in 0..5 {
        engine
            .record_output("buf", OutputChannel::Stdout, &format!("line {i}"))
            .await
            .expect("record must succeed");
    }

    let snapshot = engine.session_snapshot("buf").await.expect("snapshot");
    assert_eq!(snapshot.output.len(), 3);
    let contents: Vec<&str> = snapshot.output.iter().map(|e| e.content.as_str()).collect();
    // FIFO eviction: the earliest entries are the ones missing.
    assert_eq!(contents, vec!["line 2", "line 3", "line 4"]);
}

#[tokio::test]
async fn record_output_for_unknown_session_fails() {
    let engine = registry();
    let err = engine
        .record_output("ghost", OutputChannel::Stdout, "x")
        .await
        .expect_err("must fail");
    assert!(matches!(err, AppError::SessionNotFound(_)));
}

// ─── Spawn failure transitions the session to error ────────────────────

#[tokio::test]
async fn spawn_failure_marks_the_session_errored() {
    let engine = registry_with(|config| {
        config.policy.allowed.push("no-such-binary-q".into());
    });
    engine
        .create_session(Some("se".into()), "owner-u", "spawn-fail", SessionOptions::default())
        .await
        .expect("create must succeed");

    let err = engine
        .execute_command("se", "no-such-binary-q --now", ExecuteOptions::default())
        .await
        .expect_err("missing binary must fail");
    assert!(matches!(err, AppError::Spawn(_)));

    let snapshot = engine.session_snapshot("se").await.expect("snapshot");
    assert_eq!(snapshot.status, SessionStatus::Error);
    assert!(snapshot
        .output
        .iter()
        .any(|e| e.channel == OutputChannel::Error), "spawn failure must be surfaced to observers");
}

// ─── Introspection ─────────────────────────────────────────────────────

#[tokio::test]
async fn status_reports_counts_and_configured_bounds() {
    let engine = registry_with(|config| config.max_sessions = 7);
    engine
        .create_session(Some("i1".into()), "owner-u", "one", SessionOptions::default())
        .await
        .expect("create must succeed");

    let status = engine.status().await;
    assert_eq!(status.active_sessions, 1);
    assert_eq!(status.max_sessions, 7);
    assert!(status.command_timeout_ms > 0);
    assert!(status.max_command_timeout_ms >= status.command_timeout_ms);

    assert!(engine.allowed_commands().contains(&"echo".to_owned()));
    assert!(engine.dangerous_commands().contains(&"rm".to_owned()));
    assert!(engine.blocked_commands().contains(&"sudo".to_owned()));
}
