//! Per-worker handle: a private run queue plus a parking signal.

use crate::pool::task::Task;
use crate::stdx::RunQueue;

use std::sync::Condvar;

/// Slots per private run queue. Power of two; deep enough that only
/// pathological fanout spills to the shared overflow.
pub(crate) const QUEUE_CAPACITY: usize = 1024;

pub(crate) type WorkQueue = RunQueue<Task, QUEUE_CAPACITY>;

/// One worker's shared-side state.
///
/// Held behind `Arc` in the pool's worker table so the address stays stable
/// across table republication; thieves and submitters refer to workers by
/// index, never by raw pointer.
///
/// The condvar is always waited on with the pool mutex, so a signal sent
/// while the pool mutex is held cannot be lost by a worker that is mid-park.
pub(crate) struct Worker {
    /// Stable index into the worker table; also the RNG seed base.
    pub(crate) index: usize,
    /// Private deque: this worker owns the front, everyone else the back.
    pub(crate) queue: WorkQueue,
    /// Signalled to wake this worker out of its park.
    pub(crate) wake: Condvar,
}

impl Worker {
    pub(crate) fn new(index: usize) -> Self {
        Self {
            index,
            queue: WorkQueue::new(),
            wake: Condvar::new(),
        }
    }
}
