//! # Hot-Patch Session
//!
//! Wires the reference service, the patch registry, the worker loop and the
//! monitor loop together and bounds the whole thing in time:
//!
//! ```text
//!   WorkerLoop ──invoke──► FaultyService ◄──rebind── PatchRegistry
//!       │                        ▲                        ▲
//!       └─failures─► SessionContext ◄─observe─ MonitorLoop ┘ (apply once)
//! ```
//!
//! Both loops are blocking and run on their own threads from tokio's blocking
//! pool. The session sleeps until its deadline (or an external stop signal),
//! raises the shutdown flag, and waits for both loops to notice it.
//!
//! ## Usage
//!
//! ```rust,ignore
//! let session = Session::new(SessionConfig::default())?;
//! let report = session.run_until(async { let _ = tokio::signal::ctrl_c().await; }).await;
//! println!("{}", serde_json::to_string_pretty(&report)?);
//! ```

use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use serde::{Deserialize, Serialize};
use tracing::{error, info};

use crate::config::SessionConfig;
use crate::error::ConfigError;
use crate::monitor::{MonitorLoop, MonitorReport};
use crate::patch::{PatchEvent, PatchRegistry, Patchable};
use crate::service::{FaultyService, PROCESS};
use crate::worker::{WorkerLoop, WorkerReport};

// ---------------------------------------------------------------------------
// SessionContext
// ---------------------------------------------------------------------------

/// Shared handles passed explicitly into both loops.
///
/// The shutdown flag has a single writer (the session). The failure counter is
/// bumped by the worker and only read by the monitor.
#[derive(Debug, Clone, Default)]
pub struct SessionContext {
    shutdown: Arc<AtomicBool>,
    failures: Arc<AtomicU64>,
}

impl SessionContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn request_shutdown(&self) {
        self.shutdown.store(true, Ordering::Release);
    }

    pub fn is_shutdown(&self) -> bool {
        self.shutdown.load(Ordering::Acquire)
    }

    /// Count one failed call; returns the running total.
    pub fn record_failure(&self) -> u64 {
        self.failures.fetch_add(1, Ordering::AcqRel) + 1
    }

    pub fn failures(&self) -> u64 {
        self.failures.load(Ordering::Acquire)
    }
}

// ---------------------------------------------------------------------------
// SessionReport
// ---------------------------------------------------------------------------

/// Everything observable about a finished session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionReport {
    /// `None` if the worker thread panicked.
    pub worker: Option<WorkerReport>,
    /// `None` if the monitor thread panicked.
    pub monitor: Option<MonitorReport>,
    pub patch_history: Vec<PatchEvent>,
    /// Whether the service's operation was still patched when the session ended.
    pub patched_at_exit: bool,
    /// Patches reverted by `revert_on_exit`.
    pub reverted_on_exit: usize,
    /// Total calls the service handled.
    pub service_calls: u64,
    pub elapsed_ms: u64,
}

impl SessionReport {
    /// Number of patch applications recorded during the session.
    pub fn patches_applied(&self) -> usize {
        self.patch_history
            .iter()
            .filter(|e| matches!(e.action, crate::patch::PatchAction::Applied { .. }))
            .count()
    }
}

// ---------------------------------------------------------------------------
// Session
// ---------------------------------------------------------------------------

/// One bounded run of worker + monitor over a fresh [`FaultyService`].
pub struct Session {
    config: SessionConfig,
    service: Arc<FaultyService>,
    registry: Arc<PatchRegistry<FaultyService>>,
    ctx: SessionContext,
}

impl Session {
    /// Validate `config` and create the service and registry.
    ///
    /// # Errors
    /// `ConfigError::Invalid` when `config` fails validation.
    pub fn new(config: SessionConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self {
            service: Arc::new(FaultyService::new("FaultyService", config.failure_modulus)),
            registry: Arc::new(PatchRegistry::new()),
            ctx: SessionContext::new(),
            config,
        })
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn service(&self) -> Arc<FaultyService> {
        Arc::clone(&self.service)
    }

    pub fn registry(&self) -> Arc<PatchRegistry<FaultyService>> {
        Arc::clone(&self.registry)
    }

    pub fn context(&self) -> SessionContext {
        self.ctx.clone()
    }

    /// Run until the configured session duration elapses.
    pub async fn run(self) -> SessionReport {
        self.run_until(std::future::pending::<()>()).await
    }

    /// Run until the deadline or until `stop` completes, whichever is first.
    pub async fn run_until<F>(self, stop: F) -> SessionReport
    where
        F: Future<Output = ()>,
    {
        let started = Instant::now();
        info!(
            target: "hot_patch::session",
            duration_ms = self.config.session_duration_ms,
            threshold = self.config.failure_threshold,
            modulus = self.config.failure_modulus,
            detection = %self.config.detection,
            "session started"
        );

        let worker = WorkerLoop::for_service(
            Arc::clone(&self.service),
            self.ctx.clone(),
            self.config.work_interval(),
        )
        .with_history_cap(self.config.history_cap);
        let monitor = MonitorLoop::for_service(
            Arc::clone(&self.service),
            Arc::clone(&self.registry),
            self.ctx.clone(),
            &self.config,
        );

        let worker_handle = tokio::task::spawn_blocking(move || worker.run());
        let monitor_handle = tokio::task::spawn_blocking(move || monitor.run());

        tokio::select! {
            _ = tokio::time::sleep(self.config.session_duration()) => {
                info!(target: "hot_patch::session", "session deadline reached");
            }
            _ = stop => {
                info!(target: "hot_patch::session", "stop requested");
            }
        }
        self.ctx.request_shutdown();

        let worker = match worker_handle.await {
            Ok(report) => Some(report),
            Err(e) => {
                error!(target: "hot_patch::session", error = %e, "worker loop terminated abnormally");
                None
            }
        };
        let monitor = match monitor_handle.await {
            Ok(report) => Some(report),
            Err(e) => {
                error!(target: "hot_patch::session", error = %e, "monitor loop terminated abnormally");
                None
            }
        };

        let reverted_on_exit = if self.config.revert_on_exit {
            self.registry.revert_all(&self.service)
        } else {
            0
        };

        let report = SessionReport {
            worker,
            monitor,
            patch_history: self.registry.history(),
            patched_at_exit: self.registry.is_patched(&self.service, PROCESS),
            reverted_on_exit,
            service_calls: self.service.counter(),
            elapsed_ms: started.elapsed().as_millis() as u64,
        };
        info!(
            target: "hot_patch::session",
            target_name = %self.service.target_name(),
            calls = report.service_calls,
            patches = report.patches_applied(),
            elapsed_ms = report.elapsed_ms,
            "session finished"
        );
        report
    }
}
