//! Integration tests for the interactive scan session.
//!
//! These drive [`ScanSession`] against stub workers (inline `sh` scripts)
//! and verify the resolution rules for a submitted selection:
//! - a completion-marker line resolves with the accumulated output
//! - an error-marker line fails with that line
//! - a nonzero exit fails with the exit code
//! - a clean exit with no output fails as empty
//! - no output within the inactivity window times out
//! - a second concurrent selection is rejected as busy

use std::time::Duration;

use mediahubd::config::DaemonConfig;
use mediahubd::session::{ScanSession, SessionError};

/// A session whose worker is an inline shell script reading selections from
/// stdin. Warm-up is zeroed and the inactivity window shortened so tests
/// stay fast.
async fn stub_session(script: &str, idle_timeout_ms: u64) -> ScanSession {
    let config = DaemonConfig {
        worker_program: "sh".to_string(),
        worker_args: vec!["-c".to_string(), script.to_string(), "stub".to_string()],
        resolver_program: "echo".to_string(),
        warmup_ms: 0,
        idle_timeout_ms,
        ..DaemonConfig::default()
    };
    let session = ScanSession::new(config);
    session
        .resolve_path("/media/inbound")
        .await
        .expect("stub resolver should succeed");
    session
}

#[tokio::test]
async fn completion_marker_resolves_selection() {
    let session = stub_session(
        "read sel && echo \"Processing selection $sel\" && echo 'Created symlink: /library/movie.mkv'",
        5000,
    )
    .await;

    let output = session.submit_selection("1").await.unwrap();
    assert!(output.contains("Processing selection 1"));
    assert!(output.contains("Created symlink: /library/movie.mkv"));
}

#[tokio::test]
async fn error_marker_fails_with_that_line() {
    let session = stub_session(
        "read sel && echo '[ERROR] no match found for title'",
        5000,
    )
    .await;

    let err = session.submit_selection("2").await.unwrap_err();
    match err {
        SessionError::WorkerFailed(line) => {
            assert_eq!(line, "[ERROR] no match found for title")
        }
        other => panic!("expected WorkerFailed, got {other:?}"),
    }
}

#[tokio::test]
async fn nonzero_exit_fails_with_code() {
    let session = stub_session("read sel; exit 7", 5000).await;
    let err = session.submit_selection("1").await.unwrap_err();
    assert!(matches!(err, SessionError::WorkerExit(7)));
}

#[tokio::test]
async fn clean_exit_without_output_is_empty() {
    let session = stub_session("read sel; exit 0", 5000).await;
    let err = session.submit_selection("1").await.unwrap_err();
    assert!(matches!(err, SessionError::EmptyOutput));
}

#[tokio::test]
async fn clean_exit_with_output_resolves() {
    // No marker, but a clean exit with output counts as success.
    let session = stub_session("read sel && echo 'done with everything'", 5000).await;
    let output = session.submit_selection("1").await.unwrap();
    assert!(output.contains("done with everything"));
}

#[tokio::test]
async fn silence_times_out() {
    let session = stub_session("read sel; sleep 600", 200).await;
    let err = session.submit_selection("1").await.unwrap_err();
    assert!(matches!(err, SessionError::Timeout));
    session.shutdown();
}

#[tokio::test]
async fn output_resets_the_inactivity_window() {
    // Each line lands within the window but the total runtime exceeds it;
    // the selection must still resolve because every line re-arms the timer.
    let session = stub_session(
        "read sel; for i in 1 2 3 4; do echo \"step $i\"; sleep 0.2; done; \
         echo 'Processed file: movie.mkv'",
        500,
    )
    .await;

    let output = session.submit_selection("1").await.unwrap();
    assert!(output.contains("step 4"));
    assert!(output.contains("Processed file"));
}

#[tokio::test]
async fn concurrent_selection_is_rejected_as_busy() {
    let session = stub_session(
        "read sel; sleep 1; echo 'Created symlink: done'",
        10_000,
    )
    .await;

    let first = {
        let session = session.clone();
        tokio::spawn(async move { session.submit_selection("1").await })
    };
    // Let the first submission claim the slot before racing it.
    tokio::time::sleep(Duration::from_millis(200)).await;

    let err = session.submit_selection("2").await.unwrap_err();
    assert!(matches!(err, SessionError::Busy));

    // The in-flight selection is unaffected by the rejected one.
    let output = first.await.unwrap().unwrap();
    assert!(output.contains("Created symlink"));
}

#[tokio::test]
async fn worker_is_reused_across_selections() {
    // A prompt loop answering two selections; if a second process were
    // spawned, it would block reading stdin and the second call would
    // time out instead of resolving.
    let session = stub_session(
        "while read sel; do echo \"Created symlink: choice-$sel\"; done",
        2000,
    )
    .await;

    let first = session.submit_selection("1").await.unwrap();
    assert!(first.contains("choice-1"));
    let second = session.submit_selection("2").await.unwrap();
    assert!(second.contains("choice-2"));

    session.shutdown();
}

#[tokio::test]
async fn selection_after_exit_spawns_a_fresh_worker() {
    // First worker answers once and exits; the next selection must get a
    // newly spawned process rather than the dead one's closed stdin.
    let session = stub_session(
        "read sel && echo \"Created symlink: run-$sel\"",
        5000,
    )
    .await;

    let first = session.submit_selection("1").await.unwrap();
    assert!(first.contains("run-1"));

    // Wait for the first worker to be reaped.
    tokio::time::timeout(Duration::from_secs(5), async {
        while session.worker_alive() {
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    })
    .await
    .expect("first worker should exit");

    let second = session.submit_selection("2").await.unwrap();
    assert!(second.contains("run-2"));
}

#[tokio::test]
async fn settled_selections_leave_no_listeners_behind() {
    // Resolving selections must not accumulate broker subscribers: each
    // call owns its receiver and drops it on return, success or not.
    let session = stub_session(
        "while read sel; do echo \"Created symlink: choice-$sel\"; done",
        2000,
    )
    .await;

    session.submit_selection("0").await.unwrap();
    let baseline = session.output_listener_count().expect("worker is live");

    for i in 1..=5 {
        session.submit_selection(&i.to_string()).await.unwrap();
        assert_eq!(session.output_listener_count(), Some(baseline));
    }

    session.shutdown();
}

#[tokio::test]
async fn failed_selections_leave_no_listeners_behind() {
    let session = stub_session(
        "while read sel; do echo '[ERROR] no match found'; done",
        2000,
    )
    .await;

    for _ in 0..3 {
        let err = session.submit_selection("1").await.unwrap_err();
        assert!(matches!(err, SessionError::WorkerFailed(_)));
        assert_eq!(session.output_listener_count(), Some(0));
    }

    session.shutdown();
}

#[tokio::test]
async fn timed_out_selections_leave_no_listeners_behind() {
    // The worker swallows every selection silently, so each submit ends in
    // a timeout; the listener must still be torn down on that path.
    let session = stub_session("while read sel; do :; done; sleep 600", 200).await;

    for _ in 0..3 {
        let err = session.submit_selection("1").await.unwrap_err();
        assert!(matches!(err, SessionError::Timeout));
        assert_eq!(session.output_listener_count(), Some(0));
    }

    session.shutdown();
}

#[tokio::test]
async fn output_channels_absent_without_worker() {
    let session = stub_session("read sel", 5000).await;
    assert!(session.output_channels().is_none());
}

#[tokio::test]
async fn output_channels_present_while_worker_runs() {
    let session = stub_session(
        "while read sel; do echo \"Created symlink: $sel\"; done",
        5000,
    )
    .await;

    session.submit_selection("1").await.unwrap();
    assert!(session.worker_alive());
    let (_lines, exit_rx) = session.output_channels().expect("worker is live");
    assert!(exit_rx.borrow().is_none());

    session.shutdown();
}

#[tokio::test]
async fn shutdown_kills_the_worker() {
    let session = stub_session("sleep 600", 5000).await;
    // Spawn without waiting for a selection outcome.
    let submit = {
        let session = session.clone();
        tokio::spawn(async move { session.submit_selection("1").await })
    };
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert!(session.worker_alive());

    session.shutdown();
    let result = tokio::time::timeout(Duration::from_secs(5), submit)
        .await
        .expect("selection should settle after shutdown")
        .unwrap();
    assert!(result.is_err());
    assert!(!session.worker_alive());
}
