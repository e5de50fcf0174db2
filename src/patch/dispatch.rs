//! Per-target dispatch table.
//!
//! One slot per operation name, each holding the currently bound
//! [`Operation`]. The table lock is held only for the lookup or the swap,
//! never while an operation runs.

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

use crate::error::OperationError;

/// A swappable implementation of a named operation.
///
/// Takes the receiver plus the call input, matching the calling convention
/// of the implementation it replaces.
pub type Operation<T> = Arc<dyn Fn(&T, &str) -> Result<String, OperationError> + Send + Sync>;

/// Wrap a closure or fn item as an [`Operation`].
pub fn operation<T, F>(f: F) -> Operation<T>
where
    F: Fn(&T, &str) -> Result<String, OperationError> + Send + Sync + 'static,
{
    Arc::new(f)
}

/// Mapping from operation name to the implementation bound right now.
pub struct DispatchTable<T> {
    slots: RwLock<HashMap<String, Operation<T>>>,
}

impl<T> DispatchTable<T> {
    /// Create an empty table.
    pub fn new() -> Self {
        Self { slots: RwLock::new(HashMap::new()) }
    }

    /// Bind `op` under `name`, returning whatever was bound before.
    pub fn bind(&self, name: &str, op: Operation<T>) -> Option<Operation<T>> {
        self.slots
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(name.to_string(), op)
    }

    /// Return the implementation bound under `name` at this instant.
    ///
    /// The returned handle keeps that implementation alive even if the slot
    /// is rebound before the caller invokes it.
    pub fn resolve(&self, name: &str) -> Option<Operation<T>> {
        self.slots
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(name)
            .cloned()
    }

    /// Remove the binding under `name`, returning it.
    pub fn unbind(&self, name: &str) -> Option<Operation<T>> {
        self.slots.write().unwrap_or_else(PoisonError::into_inner).remove(name)
    }

    /// Names of all bound operations, sorted.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .slots
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect();
        names.sort();
        names
    }

    pub fn len(&self) -> usize {
        self.slots.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<T> Default for DispatchTable<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> std::fmt::Debug for DispatchTable<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DispatchTable").field("operations", &self.names()).finish()
    }
}
