//! Privatized work-stealing thread pool.
//!
//! Each worker thread owns a private bounded run queue. The owner side of a
//! queue (push/pop at the front) is lock-free; idle peers steal from the back
//! under a per-queue mutex. Work that does not fit anywhere spills into a
//! shared overflow lane guarded by the pool mutex.
//!
//! Submission routing (single task):
//! 1) A worker submitting from inside a task pushes onto its own queue front
//!    (LIFO, depth-first like a call stack).
//! 2) The owner or an external thread pushes onto a round-robin peer's back
//!    queue (FIFO from the submitter's point of view) and signals that peer.
//! 3) A full queue never rejects work: the task falls back to the overflow.
//!
//! Worker search order: own front, steal sweep over all peers with a
//! coprime stride, shared overflow, then park on the worker's condvar.
//! `wait_for_all` raises a quiescence flag; the last worker to go idle sweeps
//! every queue and wakes the owner only when the whole pool is drained.
//!
//! The pool is constructed on an owner thread; only that thread may call
//! `spawn`, `wait_for_all`, and `shutdown`. Any thread may submit.

pub mod pool;
pub mod stdx;
#[cfg(test)]
pub mod test_utils;

pub use pool::{Pool, PoolError, PoolMetrics, TaskError, TaskHandle};
