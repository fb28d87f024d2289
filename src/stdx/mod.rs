//! Small, self-contained data structures backing the pool.
//!
//! # Scope
//! `stdx` hosts narrow utilities tuned for predictable memory use and fast
//! paths rather than general-purpose ergonomics.
//!
//! # Module map
//! - `run_queue`: bounded per-worker deque with lock-free owner operations
//!   and mutex-serialized thief operations.
//!
//! # Safety
//! `run_queue` uses `unsafe` internally and relies on invariants called out
//! in its module docs. Read those before extending or reusing the internals.

pub mod run_queue;

pub use run_queue::RunQueue;
