//! # hot_patch
//!
//! Live replacement of a running service's operations without restarting the
//! process. A worker thread keeps calling a faulty operation; a monitor thread
//! watches for failures and, once enough evidence piles up, swaps in a
//! corrected implementation through a thread-safe [`PatchRegistry`] that can
//! later restore the original.
//!
//! ## Modules
//! - [`patch`]: dispatch tables, the [`Patchable`] trait and the registry
//! - [`service`]: the reference [`FaultyService`] and its fix
//! - [`worker`]: the resilient calling loop
//! - [`monitor`]: failure detection and one-shot patching
//! - [`session`]: time-bounded orchestration of both loops
//! - [`config`]: TOML + CLI configuration
//! - [`error`]: error enums

pub mod cli;
pub mod config;
pub mod error;
pub mod monitor;
pub mod patch;
pub mod service;
pub mod session;
pub mod worker;

use colored::*;

pub use config::SessionConfig;
pub use error::{ConfigError, HotPatchError, OperationError};
pub use monitor::{DetectionMode, MonitorLoop, MonitorOutcome, MonitorReport};
pub use patch::{operation, DispatchTable, Operation, PatchAction, PatchEvent, PatchRegistry, Patchable, TargetId};
pub use service::{FaultyService, PROCESS};
pub use session::{Session, SessionContext, SessionReport};
pub use worker::{CallOutcome, CallRecord, WorkerLoop, WorkerReport};

/// Render a human-readable, colored summary of a finished session.
pub fn render_summary(report: &SessionReport) -> String {
    let mut out = String::new();
    out.push_str(&format!("{}\n", "Hot-patch session summary".bold()));
    out.push_str(&format!("  elapsed:        {} ms\n", report.elapsed_ms));
    out.push_str(&format!("  service calls:  {}\n", report.service_calls));

    match &report.worker {
        Some(w) => out.push_str(&format!(
            "  worker:         {} iterations, {} ok, {}\n",
            w.iterations,
            w.successes.to_string().green(),
            format!("{} failed", w.failures).red()
        )),
        None => out.push_str(&format!("  worker:         {}\n", "terminated abnormally".red())),
    }

    match &report.monitor {
        Some(m) => {
            let outcome = match m.outcome {
                MonitorOutcome::Patched => "patched".green(),
                MonitorOutcome::ShutDown => "stopped without patching".yellow(),
            };
            out.push_str(&format!(
                "  monitor:        {} (tally {}, {} polls, {})\n",
                outcome, m.tally, m.polls, m.detection
            ));
        }
        None => out.push_str(&format!("  monitor:        {}\n", "terminated abnormally".red())),
    }

    for event in &report.patch_history {
        out.push_str(&format!(
            "  patch:          {} {}.{}\n",
            event.action.to_string().cyan(),
            event.target_name,
            event.operation
        ));
    }
    if report.reverted_on_exit > 0 {
        out.push_str(&format!("  reverted on exit: {}\n", report.reverted_on_exit));
    }
    out
}
