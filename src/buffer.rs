//! Operation buffer
//!
//! Pending operations accumulate here until a flush drains them. Producers
//! only ever hold the lock for a `Vec::push`, and a drain swaps the whole
//! vector out, so an enqueue racing a drain lands either in the drained
//! snapshot or in the next one, never both.

use std::sync::{Mutex, MutexGuard};

use crate::operation::PendingOperation;

/// Concurrent, append-only queue of pending operations.
#[derive(Debug, Default)]
pub struct OperationBuffer {
    pending: Mutex<Vec<PendingOperation>>,
}

impl OperationBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue an operation. Never fails and never waits on store I/O.
    pub fn enqueue(&self, op: PendingOperation) {
        self.lock().push(op);
    }

    /// Number of operations waiting for the next drain.
    pub fn outstanding(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.outstanding() == 0
    }

    /// Remove and return everything queued, in enqueue order.
    pub fn drain_all(&self) -> Vec<PendingOperation> {
        std::mem::take(&mut *self.lock())
    }

    // A producer panicking mid-push cannot leave the Vec half-written, so a
    // poisoned lock is still safe to use.
    fn lock(&self) -> MutexGuard<'_, Vec<PendingOperation>> {
        self.pending
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
