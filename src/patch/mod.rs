//! # Module: patch
//!
//! Live replacement of a running target's operations.
//!
//! Every patchable target routes its named operations through a
//! [`DispatchTable`]. Callers resolve the active implementation immediately
//! before each call, so a rebind is observed by the very next dispatch while a
//! call that already resolved the old binding finishes under it.
//!
//! ## Sub-modules
//! - [`dispatch`]: the per-target table of swappable [`Operation`]s
//! - [`registry`]: [`PatchRegistry`]: apply/revert with original preservation

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::OperationError;

pub mod dispatch;
pub mod registry;

pub use dispatch::{operation, DispatchTable, Operation};
pub use registry::{PatchAction, PatchEvent, PatchRegistry, DEFAULT_HISTORY_CAP};

// ---------------------------------------------------------------------------
// TargetId
// ---------------------------------------------------------------------------

/// Stable identity of one patchable target instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TargetId(Uuid);

impl TargetId {
    /// Allocate a fresh, unique identity.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for TargetId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for TargetId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ---------------------------------------------------------------------------
// Patchable
// ---------------------------------------------------------------------------

/// An entity whose named operations can be rebound while it is in use.
///
/// Implementors only expose their identity and their dispatch table; calling
/// through [`Patchable::invoke`] guarantees the binding is looked up fresh on
/// every call.
pub trait Patchable: Send + Sync + Sized {
    /// Identity used by the registry to key saved originals.
    fn target_id(&self) -> TargetId;

    /// Human-readable name used in logs and patch history.
    fn target_name(&self) -> &str;

    /// The table holding this target's currently bound operations.
    fn dispatch(&self) -> &DispatchTable<Self>;

    /// Resolve `operation` and call it with `self` as the receiver.
    ///
    /// # Errors
    /// - `OperationError::Unbound` when nothing is bound under `operation`.
    /// - Whatever the bound implementation returns.
    fn invoke(&self, operation: &str, input: &str) -> Result<String, OperationError> {
        let bound = self
            .dispatch()
            .resolve(operation)
            .ok_or_else(|| OperationError::Unbound { operation: operation.to_string() })?;
        bound(self, input)
    }
}
