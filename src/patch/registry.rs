//! # Stage: Patch Registry
//!
//! ## Responsibility
//! Rebinds a target's operations at runtime and remembers what was bound
//! before the first patch, so [`PatchRegistry::revert`] always restores the
//! pre-patch behavior rather than an intermediate patch.
//!
//! ## Guarantees
//! - Atomic: apply and revert run under one registry-wide lock; the saved
//!   original and the rebind are observed together by any concurrent caller.
//! - First original wins: re-applying never overwrites a saved original.
//! - Bounded: the audit history keeps at most `history_cap` events.
//! - Non-panicking: a poisoned lock is recovered, reverting an unpatched
//!   operation is a no-op.
//!
//! ## NOT Responsible For
//! - Checking that a replacement is compatible with the original. A bad
//!   replacement surfaces as an [`crate::error::OperationError`] at call time.
//! - Persisting patches across process restarts.

use std::collections::{HashMap, VecDeque};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use super::{Operation, Patchable, TargetId};

/// Default number of events kept in the patch history.
pub const DEFAULT_HISTORY_CAP: usize = 256;

// ---------------------------------------------------------------------------
// PatchEvent
// ---------------------------------------------------------------------------

/// What happened to an operation binding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum PatchAction {
    /// A replacement was bound. `replaced_original` is true when this apply
    /// saved a baseline implementation (first patch for a bound pair).
    Applied { replaced_original: bool },
    /// The saved original was bound again, or the operation was unbound if
    /// it had no binding before the first patch.
    Reverted,
}

impl std::fmt::Display for PatchAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PatchAction::Applied { .. } => write!(f, "applied"),
            PatchAction::Reverted => write!(f, "reverted"),
        }
    }
}

/// One entry of the registry's audit trail.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PatchEvent {
    pub target: TargetId,
    pub target_name: String,
    pub operation: String,
    pub action: PatchAction,
    /// Wall-clock time of the event, milliseconds since the Unix epoch.
    pub at_ms: u64,
}

// ---------------------------------------------------------------------------
// PatchRegistry
// ---------------------------------------------------------------------------

struct RegistryState<T> {
    /// target → operation name → implementation bound before the first patch.
    /// `None` means the operation was unbound when first patched.
    originals: HashMap<TargetId, HashMap<String, Option<Operation<T>>>>,
    history: VecDeque<PatchEvent>,
}

/// Thread-safe store of saved originals with the apply/revert protocol.
///
/// Share it between threads behind an `Arc`.
///
/// # Example
/// ```rust,ignore
/// let registry = PatchRegistry::new();
/// registry.apply(&service, "process", operation(fixed_process));
/// assert!(registry.is_patched(&service, "process"));
/// registry.revert(&service, "process");
/// ```
pub struct PatchRegistry<T: Patchable> {
    state: Mutex<RegistryState<T>>,
    history_cap: usize,
}

impl<T: Patchable> PatchRegistry<T> {
    /// Create an empty registry with the default history capacity.
    pub fn new() -> Self {
        Self::with_history_cap(DEFAULT_HISTORY_CAP)
    }

    /// Create an empty registry keeping at most `history_cap` events.
    pub fn with_history_cap(history_cap: usize) -> Self {
        Self {
            state: Mutex::new(RegistryState {
                originals: HashMap::new(),
                history: VecDeque::new(),
            }),
            history_cap,
        }
    }

    fn lock(&self) -> MutexGuard<'_, RegistryState<T>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Bind `replacement` as `target`'s implementation of `operation`.
    ///
    /// On the first apply for the pair, the implementation bound at that
    /// moment is saved as the original. Later applies still rebind (last
    /// writer wins) but leave the saved original untouched.
    ///
    /// If nothing was bound under `operation`, the pair is recorded as
    /// originally unbound; a later revert removes the binding again.
    pub fn apply(&self, target: &T, operation: &str, replacement: Operation<T>) {
        let id = target.target_id();
        let mut state = self.lock();

        let already_saved = state
            .originals
            .get(&id)
            .is_some_and(|ops| ops.contains_key(operation));
        let previous = target.dispatch().bind(operation, replacement);

        let replaced_original = if already_saved {
            false
        } else {
            let had_binding = previous.is_some();
            if !had_binding {
                warn!(
                    target: "hot_patch::registry",
                    target_name = %target.target_name(),
                    operation,
                    "patched an operation with no prior binding; revert will unbind it"
                );
            }
            state
                .originals
                .entry(id)
                .or_default()
                .insert(operation.to_string(), previous);
            had_binding
        };

        self.record(&mut state, target, operation, PatchAction::Applied { replaced_original });
        info!(
            target: "hot_patch::registry",
            target_name = %target.target_name(),
            operation,
            replaced_original,
            "Applied patch: {}.{}",
            target.target_name(),
            operation
        );
    }

    /// Restore the original implementation of `operation` on `target`.
    ///
    /// Returns `false` without changing anything when the pair was never
    /// patched. A pair that was unbound before its first patch is unbound again. After a revert the pair is forgotten; the next apply
    /// treats the restored implementation as the new baseline.
    pub fn revert(&self, target: &T, operation: &str) -> bool {
        let id = target.target_id();
        let mut state = self.lock();

        let Some(saved) = state.originals.get_mut(&id) else {
            debug!(
                target: "hot_patch::registry",
                target_name = %target.target_name(),
                operation,
                "revert ignored: target was never patched"
            );
            return false;
        };
        let Some(original) = saved.remove(operation) else {
            debug!(
                target: "hot_patch::registry",
                target_name = %target.target_name(),
                operation,
                "revert ignored: operation was never patched"
            );
            return false;
        };
        if saved.is_empty() {
            state.originals.remove(&id);
        }

        Self::restore(target, operation, original);
        self.record(&mut state, target, operation, PatchAction::Reverted);
        info!(
            target: "hot_patch::registry",
            target_name = %target.target_name(),
            operation,
            "Reverted patch: {}.{}",
            target.target_name(),
            operation
        );
        true
    }

    /// Revert every patched operation of `target`. Returns how many were restored.
    pub fn revert_all(&self, target: &T) -> usize {
        let mut state = self.lock();
        let Some(saved) = state.originals.remove(&target.target_id()) else {
            return 0;
        };

        let mut restored: Vec<(String, Option<Operation<T>>)> = saved.into_iter().collect();
        restored.sort_by(|a, b| a.0.cmp(&b.0));
        let count = restored.len();
        for (operation, original) in restored {
            Self::restore(target, &operation, original);
            self.record(&mut state, target, &operation, PatchAction::Reverted);
            info!(
                target: "hot_patch::registry",
                target_name = %target.target_name(),
                operation = %operation,
                "Reverted patch: {}.{}",
                target.target_name(),
                operation
            );
        }
        count
    }

    /// Whether an original is currently saved for (`target`, `operation`).
    pub fn is_patched(&self, target: &T, operation: &str) -> bool {
        self.lock()
            .originals
            .get(&target.target_id())
            .is_some_and(|ops| ops.contains_key(operation))
    }

    /// Names of `target`'s operations that currently have a saved original, sorted.
    pub fn patched_operations(&self, target: &T) -> Vec<String> {
        let mut names: Vec<String> = self
            .lock()
            .originals
            .get(&target.target_id())
            .map(|ops| ops.keys().cloned().collect())
            .unwrap_or_default();
        names.sort();
        names
    }

    /// Snapshot of the audit trail, oldest first.
    pub fn history(&self) -> Vec<PatchEvent> {
        self.lock().history.iter().cloned().collect()
    }

    fn restore(target: &T, operation: &str, original: Option<Operation<T>>) {
        match original {
            Some(op) => {
                target.dispatch().bind(operation, op);
            }
            None => {
                target.dispatch().unbind(operation);
            }
        }
    }

    fn record(
        &self,
        state: &mut RegistryState<T>,
        target: &T,
        operation: &str,
        action: PatchAction,
    ) {
        if self.history_cap == 0 {
            return;
        }
        if state.history.len() >= self.history_cap {
            state.history.pop_front();
        }
        state.history.push_back(PatchEvent {
            target: target.target_id(),
            target_name: target.target_name().to_string(),
            operation: operation.to_string(),
            action,
            at_ms: now_ms(),
        });
    }
}

impl<T: Patchable> Default for PatchRegistry<T> {
    fn default() -> Self {
        Self::new()
    }
}

fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
