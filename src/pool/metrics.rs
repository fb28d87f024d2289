//! Cheap per-worker counters, merged after workers join.
//!
//! Hot-path updates are plain integer ops on a struct the worker owns
//! exclusively; there is no cross-thread contention during execution.
//! `WorkerMetrics` is cache-line aligned so adjacent workers' counters never
//! share a line. Aggregation happens once, on the owner thread, after the
//! worker threads are joined.

/// Counters owned by one worker for its whole lifetime.
///
/// # Thread Safety
///
/// Not thread-safe; each worker updates its own instance and returns it
/// from the thread closure at join time.
#[derive(Clone, Debug, Default)]
#[repr(align(64))]
pub(crate) struct WorkerMetrics {
    /// Tasks this worker invoked (including panicking ones).
    pub(crate) tasks_executed: u64,
    /// Pops from the worker's own queue front.
    pub(crate) local_pops: u64,
    /// Tasks taken from the shared overflow.
    pub(crate) overflow_pops: u64,
    /// Individual victim probes during steal sweeps.
    pub(crate) steal_attempts: u64,
    /// Probes that came back with a task.
    pub(crate) steal_successes: u64,
    /// Times this worker blocked on its park condvar.
    pub(crate) park_count: u64,
    /// Fire-and-forget task panics swallowed at the worker boundary.
    pub(crate) panics_caught: u64,
}

// Compile-time verification of alignment.
const _: () = assert!(std::mem::align_of::<WorkerMetrics>() >= 64);

/// Aggregate view over all workers of one pool generation.
///
/// Returned by [`Pool::shutdown`](crate::Pool::shutdown); counters cover
/// everything since the matching `spawn`.
#[derive(Clone, Debug, Default)]
pub struct PoolMetrics {
    pub tasks_executed: u64,
    pub local_pops: u64,
    pub overflow_pops: u64,
    pub steal_attempts: u64,
    pub steal_successes: u64,
    pub park_count: u64,
    pub panics_caught: u64,
    /// Number of workers merged into this snapshot.
    pub worker_count: u32,
}

impl PoolMetrics {
    pub(crate) fn merge_worker(&mut self, w: &WorkerMetrics) {
        self.tasks_executed = self.tasks_executed.wrapping_add(w.tasks_executed);
        self.local_pops = self.local_pops.wrapping_add(w.local_pops);
        self.overflow_pops = self.overflow_pops.wrapping_add(w.overflow_pops);
        self.steal_attempts = self.steal_attempts.wrapping_add(w.steal_attempts);
        self.steal_successes = self.steal_successes.wrapping_add(w.steal_successes);
        self.park_count = self.park_count.wrapping_add(w.park_count);
        self.panics_caught = self.panics_caught.wrapping_add(w.panics_caught);
        self.worker_count = self.worker_count.wrapping_add(1);
    }

    /// Share of executed tasks that came from the worker's own queue.
    ///
    /// High values mean good locality (self-submission being consumed
    /// depth-first); low values mean heavy stealing or overflow traffic.
    pub fn local_hit_rate(&self) -> f64 {
        let total = self
            .local_pops
            .wrapping_add(self.overflow_pops)
            .wrapping_add(self.steal_successes);
        if total == 0 {
            0.0
        } else {
            self.local_pops as f64 / total as f64
        }
    }

    /// `steal_successes / steal_attempts`; 0.0 with no attempts.
    pub fn steal_rate(&self) -> f64 {
        if self.steal_attempts == 0 {
            0.0
        } else {
            self.steal_successes as f64 / self.steal_attempts as f64
        }
    }
}
