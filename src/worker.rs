//! # Stage: Worker Loop
//!
//! ## Responsibility
//! Repeatedly invokes one named operation on a patchable target, treating
//! every call as independent. A failed call is logged with its diagnostic
//! detail, counted on the shared failure signal, and the loop moves on.
//!
//! ## Guarantees
//! - Resilient: no call outcome ever ends the loop; only the shutdown flag does.
//! - Fresh dispatch: each iteration resolves the operation anew, so a patch
//!   applied between iterations is picked up by the next call.
//! - Bounded: at most `history_cap` call records are retained.
//!
//! ## NOT Responsible For
//! - Deciding when to patch (see [`crate::monitor`]).
//! - Interrupting a call in progress: shutdown is checked between iterations.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{error, info};

use crate::patch::Patchable;
use crate::service::{FaultyService, PROCESS};
use crate::session::SessionContext;

// ---------------------------------------------------------------------------
// Call records
// ---------------------------------------------------------------------------

/// Result of one worker iteration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum CallOutcome {
    Ok { output: String },
    Failed { error: String },
}

impl CallOutcome {
    pub fn is_ok(&self) -> bool {
        matches!(self, CallOutcome::Ok { .. })
    }
}

/// One invocation made by the worker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallRecord {
    /// 1-based iteration number.
    pub iteration: u64,
    pub input: String,
    pub outcome: CallOutcome,
}

/// What the worker did over its lifetime.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkerReport {
    pub iterations: u64,
    pub successes: u64,
    pub failures: u64,
    /// Most recent call records, oldest first.
    pub records: VecDeque<CallRecord>,
}

impl WorkerReport {
    /// Iteration number of the first failed call, if any.
    pub fn first_failure(&self) -> Option<u64> {
        self.records
            .iter()
            .find(|r| !r.outcome.is_ok())
            .map(|r| r.iteration)
    }

    /// Iteration number of the last failed call, if any.
    pub fn last_failure(&self) -> Option<u64> {
        self.records
            .iter()
            .rev()
            .find(|r| !r.outcome.is_ok())
            .map(|r| r.iteration)
    }
}

// ---------------------------------------------------------------------------
// WorkerLoop
// ---------------------------------------------------------------------------

/// Call records kept when no cap is set with [`WorkerLoop::with_history_cap`].
pub const DEFAULT_RECORD_CAP: usize = 1_024;

type InputFn<T> = Box<dyn Fn(&T) -> String + Send>;

/// Drives calls into `operation` on `target` until shutdown is requested.
pub struct WorkerLoop<T: Patchable> {
    target: Arc<T>,
    operation: String,
    input: InputFn<T>,
    ctx: SessionContext,
    interval: Duration,
    history_cap: usize,
}

impl<T: Patchable> WorkerLoop<T> {
    /// Create a worker calling `operation` with inputs built by `input`.
    pub fn new(
        target: Arc<T>,
        operation: impl Into<String>,
        input: impl Fn(&T) -> String + Send + 'static,
        ctx: SessionContext,
        interval: Duration,
    ) -> Self {
        Self {
            target,
            operation: operation.into(),
            input: Box::new(input),
            ctx,
            interval,
            history_cap: DEFAULT_RECORD_CAP,
        }
    }

    /// Keep at most `cap` call records in the report.
    pub fn with_history_cap(mut self, cap: usize) -> Self {
        self.history_cap = cap;
        self
    }

    /// Run one iteration: build input, invoke, record the outcome.
    ///
    /// # Panics
    /// This function never panics on an operation failure.
    pub fn step(&self, report: &mut WorkerReport) {
        report.iterations += 1;
        let iteration = report.iterations;
        let input = (self.input)(self.target.as_ref());

        let outcome = match self.target.invoke(&self.operation, &input) {
            Ok(output) => {
                report.successes += 1;
                info!(target: "hot_patch::worker", iteration, "{output}");
                CallOutcome::Ok { output }
            }
            Err(err) => {
                report.failures += 1;
                let total = self.ctx.record_failure();
                error!(
                    target: "hot_patch::worker",
                    iteration,
                    input = %input,
                    operation = %self.operation,
                    failures = total,
                    detail = ?err,
                    "Error: {err}"
                );
                CallOutcome::Failed { error: err.to_string() }
            }
        };

        if self.history_cap == 0 {
            return;
        }
        if report.records.len() >= self.history_cap {
            report.records.pop_front();
        }
        report.records.push_back(CallRecord { iteration, input, outcome });
    }

    /// Loop until the shutdown flag is observed at an iteration boundary.
    pub fn run(self) -> WorkerReport {
        let mut report = WorkerReport::default();
        info!(
            target: "hot_patch::worker",
            target_name = %self.target.target_name(),
            operation = %self.operation,
            "worker started"
        );
        while !self.ctx.is_shutdown() {
            self.step(&mut report);
            std::thread::sleep(self.interval);
        }
        info!(
            target: "hot_patch::worker",
            iterations = report.iterations,
            failures = report.failures,
            "worker stopped"
        );
        report
    }
}

impl WorkerLoop<FaultyService> {
    /// Worker calling [`PROCESS`] on the reference service with `data_<counter>` inputs.
    pub fn for_service(service: Arc<FaultyService>, ctx: SessionContext, interval: Duration) -> Self {
        Self::new(service, PROCESS, FaultyService::next_input, ctx, interval)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::service::fixed_operation;

    fn worker(modulus: u64) -> (WorkerLoop<FaultyService>, Arc<FaultyService>, SessionContext) {
        let service = Arc::new(FaultyService::new("svc", modulus));
        let ctx = SessionContext::new();
        let w = WorkerLoop::for_service(Arc::clone(&service), ctx.clone(), Duration::from_millis(1));
        (w, service, ctx)
    }

    #[test]
    fn test_step_records_success() {
        let (w, _svc, ctx) = worker(5);
        let mut report = WorkerReport::default();
        w.step(&mut report);
        assert_eq!(report.iterations, 1);
        assert_eq!(report.successes, 1);
        assert_eq!(report.records[0].input, "data_0");
        assert_eq!(
            report.records[0].outcome,
            CallOutcome::Ok { output: "Processed: data_0".into() }
        );
        assert_eq!(ctx.failures(), 0);
    }

    #[test]
    fn test_failures_do_not_stop_stepping() {
        let (w, _svc, ctx) = worker(5);
        let mut report = WorkerReport::default();
        for _ in 0..12 {
            w.step(&mut report);
        }
        assert_eq!(report.iterations, 12);
        assert_eq!(report.failures, 2);
        assert_eq!(report.successes, 10);
        assert_eq!(ctx.failures(), 2);
        assert_eq!(report.first_failure(), Some(5));
        assert_eq!(report.last_failure(), Some(10));
        // More iterations completed after the first failure than before it.
        assert!(report.iterations - 5 >= 4);
    }

    #[test]
    fn test_next_step_observes_patch() {
        let (w, svc, _ctx) = worker(5);
        let mut report = WorkerReport::default();
        w.step(&mut report);
        svc.dispatch().bind(PROCESS, fixed_operation());
        w.step(&mut report);
        assert_eq!(
            report.records[1].outcome,
            CallOutcome::Ok { output: "Fixed Process: data_1".into() }
        );
    }

    #[test]
    fn test_history_cap_evicts_oldest() {
        let (w, _svc, _ctx) = worker(5);
        let w = w.with_history_cap(3);
        let mut report = WorkerReport::default();
        for _ in 0..7 {
            w.step(&mut report);
        }
        let kept: Vec<u64> = report.records.iter().map(|r| r.iteration).collect();
        assert_eq!(kept, vec![5, 6, 7]);
        assert_eq!(report.iterations, 7);
    }

    #[test]
    fn test_records_bounded_by_default() {
        let (w, _svc, _ctx) = worker(5);
        let mut report = WorkerReport::default();
        let total = DEFAULT_RECORD_CAP as u64 + 10;
        for _ in 0..total {
            w.step(&mut report);
        }
        assert_eq!(report.records.len(), DEFAULT_RECORD_CAP);
        assert_eq!(report.iterations, total);
        assert_eq!(report.records.front().map(|r| r.iteration), Some(11));
    }

    #[test]
    fn test_run_exits_immediately_when_already_shut_down() {
        let (w, _svc, ctx) = worker(5);
        ctx.request_shutdown();
        let report = w.run();
        assert_eq!(report.iterations, 0);
    }

    #[test]
    fn test_run_stops_on_shutdown_flag() {
        let (w, svc, ctx) = worker(5);
        let handle = std::thread::spawn(move || w.run());
        while svc.counter() < 3 {
            std::thread::sleep(Duration::from_millis(1));
        }
        ctx.request_shutdown();
        let report = handle.join().expect("worker thread");
        assert!(report.iterations >= 3);
        assert_eq!(report.iterations, report.successes + report.failures);
    }

    #[test]
    fn test_unbound_operation_is_recorded_as_failure() {
        let service = Arc::new(FaultyService::new("svc", 5));
        let ctx = SessionContext::new();
        let w = WorkerLoop::new(service, "missing", |_: &FaultyService| "x".to_string(), ctx, Duration::ZERO);
        let mut report = WorkerReport::default();
        w.step(&mut report);
        assert_eq!(report.failures, 1);
        assert!(matches!(report.records[0].outcome, CallOutcome::Failed { .. }));
    }

    #[test]
    fn test_call_outcome_serializes_with_status_tag() {
        let json = serde_json::to_string(&CallOutcome::Failed { error: "boom".into() }).unwrap();
        assert_eq!(json, r#"{"status":"failed","error":"boom"}"#);
    }
}
