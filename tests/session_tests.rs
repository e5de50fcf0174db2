//! End-to-end session tests: a worker and a monitor running concurrently
//! against the reference service, with millisecond ticks instead of seconds.

use std::time::Duration;

use hot_patch::{
    CallOutcome, DetectionMode, MonitorOutcome, PatchAction, Session, SessionConfig, SessionReport,
    PROCESS,
};

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Reference scenario (modulus 5, threshold 3) scaled to a 20 ms time unit.
fn scaled_config(detection: DetectionMode) -> SessionConfig {
    SessionConfig {
        failure_threshold: 3,
        failure_modulus: 5,
        poll_interval_ms: 20,
        work_interval_ms: 20,
        session_duration_ms: 1_500,
        detection,
        ..SessionConfig::default()
    }
}

async fn run(config: SessionConfig) -> SessionReport {
    Session::new(config).expect("valid config").run().await
}

/// Every record before the first "Fixed Process" output must be pre-patch
/// behavior, and every record after it must be fixed behavior.
fn assert_clean_switch(report: &SessionReport) {
    let worker = report.worker.as_ref().expect("worker report");
    let switch = worker
        .records
        .iter()
        .position(|r| matches!(&r.outcome, CallOutcome::Ok { output } if output.starts_with("Fixed Process: ")))
        .expect("patched output observed");

    for record in worker.records.iter().take(switch) {
        match &record.outcome {
            CallOutcome::Ok { output } => assert!(output.starts_with("Processed: "), "{output}"),
            CallOutcome::Failed { .. } => assert_eq!(record.iteration % 5, 0),
        }
    }
    for record in worker.records.iter().skip(switch) {
        assert_eq!(
            record.outcome,
            CallOutcome::Ok { output: format!("Fixed Process: {}", record.input) }
        );
    }
}

// ---------------------------------------------------------------------------
// Reference scenario
// ---------------------------------------------------------------------------

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_counter_probe_session_patches_once() {
    let report = run(scaled_config(DetectionMode::CounterProbe)).await;

    let monitor = report.monitor.as_ref().expect("monitor report");
    assert_eq!(monitor.outcome, MonitorOutcome::Patched);
    assert!(monitor.tally >= 3);
    assert_eq!(report.patches_applied(), 1);
    assert!(report.patched_at_exit);
    assert_clean_switch(&report);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_failure_events_session_patches_after_three_failures() {
    let report = run(scaled_config(DetectionMode::FailureEvents)).await;

    let worker = report.worker.as_ref().expect("worker report");
    assert!(worker.failures >= 3);
    assert_eq!(worker.first_failure(), Some(5));
    assert_eq!(report.monitor.as_ref().map(|m| m.outcome), Some(MonitorOutcome::Patched));
    assert_eq!(report.patches_applied(), 1);
    assert_clean_switch(&report);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_worker_keeps_going_after_failures() {
    let report = run(scaled_config(DetectionMode::FailureEvents)).await;
    let worker = report.worker.as_ref().expect("worker report");

    let first = worker.first_failure().expect("at least one failure");
    assert!(worker.iterations - first >= first, "loop stalled after first failure");
    assert_eq!(worker.iterations, worker.successes + worker.failures);
    assert_eq!(report.service_calls, worker.iterations);
}

// ---------------------------------------------------------------------------
// Shutdown before the threshold
// ---------------------------------------------------------------------------

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_short_session_ends_without_patch() {
    let config = SessionConfig {
        session_duration_ms: 100,
        failure_threshold: 50,
        ..scaled_config(DetectionMode::FailureEvents)
    };
    let report = run(config).await;

    assert_eq!(report.monitor.as_ref().map(|m| m.outcome), Some(MonitorOutcome::ShutDown));
    assert_eq!(report.patches_applied(), 0);
    assert!(!report.patched_at_exit);
    assert!(report.elapsed_ms >= 100);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_revert_on_exit_restores_original() {
    let config = SessionConfig {
        revert_on_exit: true,
        ..scaled_config(DetectionMode::FailureEvents)
    };
    let session = Session::new(config).expect("valid config");
    let service = session.service();
    let report = session.run().await;

    assert_eq!(report.reverted_on_exit, 1);
    assert!(!report.patched_at_exit);
    assert_eq!(report.patch_history.last().map(|e| e.action), Some(PatchAction::Reverted));

    // Original behavior is back: the next multiple of five fails again.
    let until_fault = 5 - service.counter() % 5;
    let results: Vec<bool> = (0..until_fault).map(|_| service.process("d").is_ok()).collect();
    assert_eq!(results.last(), Some(&false));
    assert_eq!(report.patch_history[0].operation, PROCESS);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_report_serializes_to_json() {
    let config = SessionConfig {
        session_duration_ms: 60,
        ..scaled_config(DetectionMode::CounterProbe)
    };
    let report = run(config).await;
    let json = serde_json::to_string(&report).expect("serialize");
    assert!(json.contains("\"monitor\""));
    assert!(json.contains("\"detection\":\"counter-probe\""));

    let back: SessionReport = serde_json::from_str(&json).expect("deserialize");
    assert_eq!(back.service_calls, report.service_calls);
}

#[test]
fn test_session_respects_wall_clock_bound() {
    let runtime = tokio::runtime::Runtime::new().expect("runtime");
    let started = std::time::Instant::now();
    let report = runtime.block_on(run(SessionConfig {
        session_duration_ms: 200,
        ..scaled_config(DetectionMode::CounterProbe)
    }));
    // Deadline plus at most one sleep interval per loop to notice shutdown.
    assert!(started.elapsed() < Duration::from_millis(200 + 500));
    assert!(report.worker.is_some());
}
