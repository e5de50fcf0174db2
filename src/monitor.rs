//! # Stage: Monitor Loop
//!
//! ## Responsibility
//! Polls a failure signal at a fixed interval, keeps a tally of failure
//! evidence, and once the tally reaches the threshold applies exactly one
//! patch through the [`PatchRegistry`]. Then it stops: this is one-shot
//! remediation, not a supervisor.
//!
//! ## Failure evidence
//! Two derivations are available (see [`DetectionMode`]):
//!
//! - **counter-probe** reads the target's call counter and counts how many
//!   multiples of the failure modulus it crossed since the previous poll.
//!   This is independent of the worker's error handling and purely a
//!   heuristic: a patched operation still advances the counter.
//! - **failure-events** reads the shared failure counter the worker bumps
//!   once per failed call, so every real failure is counted exactly once.
//!
//! ## NOT Responsible For
//! - Reverting or re-applying patches.
//! - Verifying that the replacement actually fixes anything.

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::config::SessionConfig;
use crate::patch::{Operation, PatchRegistry, Patchable};
use crate::service::{fixed_operation, FaultyService, PROCESS};
use crate::session::SessionContext;

// ---------------------------------------------------------------------------
// DetectionMode + FailureDetector
// ---------------------------------------------------------------------------

/// How the monitor turns observations into failure evidence.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum,
)]
#[serde(rename_all = "kebab-case")]
pub enum DetectionMode {
    /// Edge-trigger on the target counter crossing a multiple of the modulus.
    #[default]
    CounterProbe,
    /// Count failures reported by the worker on the shared failure signal.
    FailureEvents,
}

impl std::fmt::Display for DetectionMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DetectionMode::CounterProbe => write!(f, "counter-probe"),
            DetectionMode::FailureEvents => write!(f, "failure-events"),
        }
    }
}

/// Stateful edge detector over successive observations.
#[derive(Debug, Clone)]
pub struct FailureDetector {
    mode: DetectionMode,
    modulus: u64,
    last_counter: u64,
    last_failures: u64,
}

impl FailureDetector {
    pub fn new(mode: DetectionMode, modulus: u64) -> Self {
        Self { mode, modulus: modulus.max(1), last_counter: 0, last_failures: 0 }
    }

    /// Feed one observation; returns how many new failure events it implies.
    ///
    /// A counter that moved backwards (e.g. a target was reset) yields zero
    /// and becomes the new baseline.
    pub fn observe(&mut self, counter: u64, failures: u64) -> u64 {
        let new_events = match self.mode {
            DetectionMode::CounterProbe => {
                (counter / self.modulus).saturating_sub(self.last_counter / self.modulus)
            }
            DetectionMode::FailureEvents => failures.saturating_sub(self.last_failures),
        };
        self.last_counter = counter;
        self.last_failures = failures;
        new_events
    }

    pub fn mode(&self) -> DetectionMode {
        self.mode
    }
}

// ---------------------------------------------------------------------------
// Report
// ---------------------------------------------------------------------------

/// Why the monitor stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MonitorOutcome {
    /// Threshold reached; the patch was applied.
    Patched,
    /// Shutdown was requested before the threshold was reached.
    ShutDown,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MonitorReport {
    pub outcome: MonitorOutcome,
    pub polls: u64,
    pub tally: u64,
    pub detection: DetectionMode,
}

// ---------------------------------------------------------------------------
// MonitorLoop
// ---------------------------------------------------------------------------

/// Watches a target and hot-patches one operation once failures pile up.
pub struct MonitorLoop<T: Patchable> {
    target: Arc<T>,
    registry: Arc<PatchRegistry<T>>,
    ctx: SessionContext,
    operation: String,
    replacement: Operation<T>,
    probe: fn(&T) -> u64,
    detector: FailureDetector,
    threshold: u64,
    poll_interval: Duration,
    tally: u64,
    polls: u64,
}

impl<T: Patchable> MonitorLoop<T> {
    /// Create a monitor that will bind `replacement` under `operation`.
    ///
    /// `probe` reads the target counter used by [`DetectionMode::CounterProbe`].
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        target: Arc<T>,
        registry: Arc<PatchRegistry<T>>,
        ctx: SessionContext,
        operation: impl Into<String>,
        replacement: Operation<T>,
        probe: fn(&T) -> u64,
        detector: FailureDetector,
        threshold: u64,
        poll_interval: Duration,
    ) -> Self {
        Self {
            target,
            registry,
            ctx,
            operation: operation.into(),
            replacement,
            probe,
            detector,
            threshold,
            poll_interval,
            tally: 0,
            polls: 0,
        }
    }

    /// Current failure tally.
    pub fn tally(&self) -> u64 {
        self.tally
    }

    /// Take one observation and fold it into the tally. Returns the new events.
    pub fn poll(&mut self) -> u64 {
        self.polls += 1;
        let counter = (self.probe)(self.target.as_ref());
        let new_events = self.detector.observe(counter, self.ctx.failures());
        if new_events > 0 {
            self.tally += new_events;
            warn!(
                target: "hot_patch::monitor",
                new_events,
                tally = self.tally,
                threshold = self.threshold,
                counter,
                "failure evidence observed"
            );
        } else {
            debug!(target: "hot_patch::monitor", counter, tally = self.tally, "poll");
        }
        new_events
    }

    /// Whether the tally justifies patching.
    pub fn should_patch(&self) -> bool {
        self.tally >= self.threshold
    }

    /// Poll until the threshold is reached (then patch once) or shutdown.
    pub fn run(mut self) -> MonitorReport {
        info!(
            target: "hot_patch::monitor",
            target_name = %self.target.target_name(),
            operation = %self.operation,
            threshold = self.threshold,
            detection = %self.detector.mode(),
            "monitor started"
        );
        loop {
            if self.ctx.is_shutdown() {
                info!(target: "hot_patch::monitor", tally = self.tally, "monitor stopped before patching");
                return self.report(MonitorOutcome::ShutDown);
            }
            if self.should_patch() {
                info!(
                    target: "hot_patch::monitor",
                    tally = self.tally,
                    "Detected multiple errors. Applying hot patch..."
                );
                self.registry
                    .apply(&self.target, &self.operation, Arc::clone(&self.replacement));
                return self.report(MonitorOutcome::Patched);
            }
            std::thread::sleep(self.poll_interval);
            self.poll();
        }
    }

    fn report(&self, outcome: MonitorOutcome) -> MonitorReport {
        MonitorReport {
            outcome,
            polls: self.polls,
            tally: self.tally,
            detection: self.detector.mode(),
        }
    }
}

impl MonitorLoop<FaultyService> {
    /// Monitor that patches the reference service's [`PROCESS`] with the fixed
    /// implementation, configured from `config`.
    pub fn for_service(
        service: Arc<FaultyService>,
        registry: Arc<PatchRegistry<FaultyService>>,
        ctx: SessionContext,
        config: &SessionConfig,
    ) -> Self {
        let modulus = service.modulus();
        Self::new(
            service,
            registry,
            ctx,
            PROCESS,
            fixed_operation(),
            FaultyService::counter,
            FailureDetector::new(config.detection, modulus),
            config.failure_threshold,
            config.poll_interval(),
        )
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
