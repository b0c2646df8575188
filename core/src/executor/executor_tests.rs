// Tests for the wipe executor
//
// Tests drive real child processes through sh so the process-group handling,
// raw log capture and cancellation paths are exercised end to end.

use super::*;
use std::fs;
use std::time::Instant;
use tempfile::TempDir;
use tokio::sync::mpsc;

fn sh(script: &str) -> CommandStep {
    CommandStep {
        program: "sh".to_string(),
        args: vec!["-c".to_string(), script.to_string()],
    }
}

fn command(steps: Vec<CommandStep>) -> WipeCommand {
    WipeCommand { steps }
}

fn fast_executor() -> WipeExecutor {
    WipeExecutor::new(Duration::from_millis(20), Duration::from_millis(500))
}

async fn run(
    executor: &WipeExecutor,
    cmd: &WipeCommand,
    cancel: &CancelToken,
) -> (TerminalOutcome, Vec<ProgressEvent>, String) {
    let dir = TempDir::new().unwrap();
    let log = dir.path().join("raw.log");
    let (tx, mut rx) = mpsc::unbounded_channel();
    let mut reporter = ProgressReporter::new(Some(tx));

    let outcome = timeout(
        Duration::from_secs(20),
        executor.execute(cmd, &log, cancel, &mut reporter),
    )
    .await
    .expect("executor must always reach a terminal state");
    drop(reporter);

    let mut events = Vec::new();
    while let Some(event) = rx.recv().await {
        events.push(event);
    }
    let raw = fs::read_to_string(&log).unwrap_or_default();
    (outcome, events, raw)
}

fn assert_well_formed(events: &[ProgressEvent]) {
    assert!(!events.is_empty());
    assert_eq!(events[0].percent, 0, "First event starts at 0%");
    for pair in events.windows(2) {
        assert!(pair[0].percent <= pair[1].percent, "Progress went backwards");
    }
    assert_eq!(
        events.iter().filter(|e| e.kind.is_terminal()).count(),
        1,
        "Exactly one terminal event"
    );
    assert!(events.last().unwrap().kind.is_terminal());
}

// ==================== SUCCESS PATH TESTS ====================

#[tokio::test]
async fn test_successful_command_completes_at_100() {
    let cmd = command(vec![sh("echo '1048576 bytes copied'; echo 'pass 1/1'; echo done")]);
    let (outcome, events, raw) = run(&fast_executor(), &cmd, &CancelToken::new()).await;

    assert_eq!(outcome.state, WipeState::Completed);
    assert_eq!(outcome.exit_code, Some(0));
    assert_eq!(outcome.progress_percent, 100);

    assert_well_formed(&events);
    let last = events.last().unwrap();
    assert_eq!(last.kind, ProgressKind::Completed);
    assert_eq!(last.percent, 100);
    assert!(events.iter().any(|e| e.percent == 2), "Two progress lines seen");

    assert!(raw.contains("1048576 bytes copied"));
    assert!(raw.contains("done"), "Non-progress output is still logged");
}

#[tokio::test]
async fn test_stderr_is_captured_verbatim() {
    let cmd = command(vec![sh("printf '10 bytes\\r20 bytes\\r30 bytes\\n' 1>&2")]);
    let (outcome, events, raw) = run(&fast_executor(), &cmd, &CancelToken::new()).await;

    assert_eq!(outcome.state, WipeState::Completed);
    assert_eq!(raw, "10 bytes\r20 bytes\r30 bytes\n", "Carriage returns kept in raw log");
    assert!(events.iter().any(|e| e.percent == 3));
}

#[tokio::test]
async fn test_multi_step_plan_runs_in_order() {
    let dir = TempDir::new().unwrap();
    let marker = dir.path().join("order");
    let m = marker.display();
    let cmd = command(vec![
        sh(&format!("echo first >> {m}; echo 'pass 1/2'")),
        sh(&format!("echo second >> {m}; echo 'pass 2/2'")),
    ]);

    let (outcome, _, raw) = run(&fast_executor(), &cmd, &CancelToken::new()).await;

    assert_eq!(outcome.state, WipeState::Completed);
    assert_eq!(fs::read_to_string(&marker).unwrap(), "first\nsecond\n");
    assert!(raw.contains("pass 1/2") && raw.contains("pass 2/2"));
}

// ==================== FAILURE PATH TESTS ====================

#[tokio::test]
async fn test_nonzero_exit_is_failed_with_exit_code() {
    let cmd = command(vec![sh("echo '512 bytes copied'; echo 'dd: error writing' >&2; exit 1")]);
    let (outcome, events, raw) = run(&fast_executor(), &cmd, &CancelToken::new()).await;

    assert_eq!(outcome.state, WipeState::Failed);
    assert_eq!(outcome.exit_code, Some(1));
    assert!(outcome.message.contains("status 1"));
    assert!(outcome.progress_percent < 100);

    assert_well_formed(&events);
    let last = events.last().unwrap();
    assert_eq!(last.kind, ProgressKind::Failed);
    assert!(events.iter().all(|e| e.percent < 100));
    assert!(raw.contains("dd: error writing"));
}

#[tokio::test]
async fn test_failed_step_stops_the_plan() {
    let dir = TempDir::new().unwrap();
    let marker = dir.path().join("never");
    let cmd = command(vec![
        sh("exit 3"),
        sh(&format!("touch {}", marker.display())),
    ]);

    let (outcome, _, _) = run(&fast_executor(), &cmd, &CancelToken::new()).await;

    assert_eq!(outcome.state, WipeState::Failed);
    assert_eq!(outcome.exit_code, Some(3));
    assert!(!marker.exists(), "Later steps must not run after a failure");
}

#[tokio::test]
async fn test_missing_program_is_launch_failure() {
    let cmd = command(vec![CommandStep {
        program: "/nonexistent/nullbytes-tool".to_string(),
        args: vec![],
    }]);
    let (outcome, events, _) = run(&fast_executor(), &cmd, &CancelToken::new()).await;

    assert_eq!(outcome.state, WipeState::Failed);
    assert_eq!(outcome.exit_code, None);
    assert!(outcome.message.contains("Failed to launch"));
    assert_well_formed(&events);
}

#[tokio::test]
async fn test_unwritable_raw_log_fails_without_running() {
    let dir = TempDir::new().unwrap();
    let marker = dir.path().join("ran");
    let cmd = command(vec![sh(&format!("touch {}", marker.display()))]);
    let mut reporter = ProgressReporter::silent();

    let outcome = fast_executor()
        .execute(
            &cmd,
            Path::new("/nonexistent/dir/raw.log"),
            &CancelToken::new(),
            &mut reporter,
        )
        .await;

    assert_eq!(outcome.state, WipeState::Failed);
    assert!(!marker.exists());
}

// ==================== CANCELLATION TESTS ====================

#[tokio::test]
async fn test_cancel_running_process() {
    let cancel = CancelToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(300)).await;
        trigger.cancel();
    });

    let started = Instant::now();
    let cmd = command(vec![sh("echo '1 bytes'; sleep 30")]);
    let (outcome, events, raw) = run(&fast_executor(), &cmd, &cancel).await;

    assert_eq!(outcome.state, WipeState::Cancelled);
    assert!(started.elapsed() < Duration::from_secs(10), "Cancel must not wait for the child");
    assert_well_formed(&events);
    assert_eq!(events.last().unwrap().kind, ProgressKind::Cancelled);
    assert!(raw.contains("1 bytes"), "Output before cancel is preserved");
}

#[tokio::test]
async fn test_cancel_escalates_to_sigkill() {
    let cancel = CancelToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(200)).await;
        trigger.cancel();
    });

    let executor = WipeExecutor::new(Duration::from_millis(20), Duration::from_millis(300));
    let cmd = command(vec![sh("trap '' TERM; sleep 30")]);
    let (outcome, _, _) = run(&executor, &cmd, &cancel).await;

    assert_eq!(outcome.state, WipeState::Cancelled);
}

#[tokio::test]
async fn test_cancel_before_start_never_launches() {
    let dir = TempDir::new().unwrap();
    let marker = dir.path().join("ran");
    let cancel = CancelToken::new();
    cancel.cancel();

    let cmd = command(vec![sh(&format!("touch {}", marker.display()))]);
    let (outcome, events, _) = run(&fast_executor(), &cmd, &cancel).await;

    assert_eq!(outcome.state, WipeState::Cancelled);
    assert!(!marker.exists());
    assert_eq!(events.last().unwrap().kind, ProgressKind::Cancelled);
}

#[tokio::test]
async fn test_cancel_skips_remaining_steps() {
    let dir = TempDir::new().unwrap();
    let marker = dir.path().join("second");
    let cancel = CancelToken::new();
    let flag = dir.path().join("first-done");

    // Cancel lands while the first step is still sleeping
    let cmd = command(vec![
        sh(&format!("touch {}; sleep 0.5", flag.display())),
        sh(&format!("touch {}", marker.display())),
    ]);
    let trigger = cancel.clone();
    let flag_watch = flag.clone();
    tokio::spawn(async move {
        while !flag_watch.exists() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        trigger.cancel();
    });

    let (outcome, _, _) = run(&fast_executor(), &cmd, &cancel).await;

    assert_eq!(outcome.state, WipeState::Cancelled);
    assert!(!marker.exists());
}

#[tokio::test]
async fn test_cancel_racing_process_exit_is_terminal() {
    for _ in 0..10 {
        let dir = TempDir::new().unwrap();
        let log = dir.path().join("raw.log");
        let cancel = CancelToken::new();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut reporter = ProgressReporter::new(Some(tx));

        // Cancel as soon as the child reports progress, i.e. while it is exiting
        let trigger = cancel.clone();
        let watcher = tokio::spawn(async move {
            let mut events = Vec::new();
            while let Some(event) = rx.recv().await {
                if event.percent > 0 && !event.kind.is_terminal() {
                    trigger.cancel();
                }
                events.push(event);
            }
            events
        });

        let cmd = command(vec![sh("echo '1 bytes'")]);
        let outcome = timeout(
            Duration::from_secs(20),
            fast_executor().execute(&cmd, &log, &cancel, &mut reporter),
        )
        .await
        .expect("executor must always reach a terminal state");
        drop(reporter);
        let events = watcher.await.unwrap();

        assert!(
            matches!(outcome.state, WipeState::Cancelled | WipeState::Completed),
            "Unexpected state {:?}",
            outcome.state
        );
        assert_well_formed(&events);
        let terminal = events.last().unwrap();
        match outcome.state {
            WipeState::Completed => assert_eq!(terminal.kind, ProgressKind::Completed),
            _ => assert_eq!(terminal.kind, ProgressKind::Cancelled),
        }
    }
}

#[tokio::test]
async fn test_cancel_after_step_exits_successfully_is_cancelled() {
    let cancel = CancelToken::new();
    let trigger = cancel.clone();
    let dir = TempDir::new().unwrap();
    let done = dir.path().join("done");

    // The first step exits cleanly and the cancel lands before the plan does
    let cmd = command(vec![
        sh(&format!("echo '1 bytes'; touch {}", done.display())),
        sh("sleep 0.3; echo '2 bytes'"),
    ]);
    let done_watch = done.clone();
    tokio::spawn(async move {
        while !done_watch.exists() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        trigger.cancel();
    });

    let (outcome, events, _) = run(&fast_executor(), &cmd, &cancel).await;

    assert_eq!(outcome.state, WipeState::Cancelled);
    assert_well_formed(&events);
    assert_eq!(events.last().unwrap().kind, ProgressKind::Cancelled);
}

// ==================== RAW LOG LOCATION TESTS ====================

#[test]
fn test_prepare_raw_log_primary() {
    let dir = TempDir::new().unwrap();
    let primary = dir.path().join("raw");
    let fallback = dir.path().join("fallback");

    let path = prepare_raw_log(&primary, &fallback, "session.log").unwrap();
    assert_eq!(path, primary.join("session.log"));
    assert!(path.exists());
}

#[test]
fn test_prepare_raw_log_falls_back() {
    let dir = TempDir::new().unwrap();
    let blocker = dir.path().join("not-a-dir");
    fs::write(&blocker, "file in the way").unwrap();
    let fallback = dir.path().join("fallback");

    let path = prepare_raw_log(&blocker.join("raw"), &fallback, "session.log").unwrap();
    assert_eq!(path, fallback.join("session.log"));
    assert!(path.exists());
}
