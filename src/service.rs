//! # Reference service
//!
//! A patchable service with a deliberate fault: its `process` operation fails
//! on every call whose sequence number is a multiple of the failure modulus.
//! [`fixed_process`] is the corrected implementation a monitor hot-patches in.

use std::sync::atomic::{AtomicU64, Ordering};

use crate::error::OperationError;
use crate::patch::{operation, DispatchTable, Operation, Patchable, TargetId};

/// Name under which [`FaultyService`] binds its processing operation.
pub const PROCESS: &str = "process";

/// Service whose `process` operation can be replaced while it runs.
#[derive(Debug)]
pub struct FaultyService {
    id: TargetId,
    name: String,
    /// Number of `process` calls so far. Written only by the operations
    /// themselves, so only the worker thread advances it.
    counter: AtomicU64,
    modulus: u64,
    table: DispatchTable<FaultyService>,
}

impl FaultyService {
    /// Create a service failing every `modulus`-th call, with
    /// [`faulty_process`] bound under [`PROCESS`].
    pub fn new(name: impl Into<String>, modulus: u64) -> Self {
        let service = Self {
            id: TargetId::new(),
            name: name.into(),
            counter: AtomicU64::new(0),
            modulus: modulus.max(1),
            table: DispatchTable::new(),
        };
        service.table.bind(PROCESS, operation(faulty_process));
        service
    }

    /// Current call counter. Racy by nature when read from another thread.
    pub fn counter(&self) -> u64 {
        self.counter.load(Ordering::Acquire)
    }

    pub fn modulus(&self) -> u64 {
        self.modulus
    }

    /// Advance the call counter and return the new value.
    pub fn next_call(&self) -> u64 {
        self.counter.fetch_add(1, Ordering::AcqRel) + 1
    }

    /// Input for the next call, derived from the counter before the call.
    pub fn next_input(&self) -> String {
        format!("data_{}", self.counter())
    }

    /// Invoke whatever is currently bound under [`PROCESS`].
    pub fn process(&self, data: &str) -> Result<String, OperationError> {
        self.invoke(PROCESS, data)
    }
}

impl Patchable for FaultyService {
    fn target_id(&self) -> TargetId {
        self.id
    }

    fn target_name(&self) -> &str {
        &self.name
    }

    fn dispatch(&self) -> &DispatchTable<Self> {
        &self.table
    }
}

fn check_input(data: &str) -> Result<(), OperationError> {
    if data.trim().is_empty() {
        return Err(OperationError::Rejected("empty input".to_string()));
    }
    Ok(())
}

/// Original implementation: fails whenever the call number divides by the modulus.
///
/// Blank input is rejected before the call is counted.
pub fn faulty_process(service: &FaultyService, data: &str) -> Result<String, OperationError> {
    check_input(data)?;
    let call = service.next_call();
    if call % service.modulus == 0 {
        return Err(OperationError::Fault {
            call,
            reason: format!("can't process data divisible by {}", service.modulus),
        });
    }
    Ok(format!("Processed: {data}"))
}

/// Corrected implementation: same bookkeeping, never fails.
pub fn fixed_process(service: &FaultyService, data: &str) -> Result<String, OperationError> {
    check_input(data)?;
    service.next_call();
    Ok(format!("Fixed Process: {data}"))
}

/// [`fixed_process`] as a bindable [`Operation`].
pub fn fixed_operation() -> Operation<FaultyService> {
    operation(fixed_process)
}
