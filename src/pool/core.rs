//! The pool: submission routing, the worker loop, quiescence, lifecycle.
//!
//! # Ownership model
//!
//! ```text
//!   Pool (owner thread)                      Worker threads
//!      │                                          │
//!      │  Arc<Shared> ────────────────────────────┤  (one Arc<Worker> each,
//!      │                                          │   captured at spawn)
//!      ▼                                          ▼
//!   ┌────────────────────────────────────────────────────────────┐
//!   │                        Shared                              │
//!   │                                                            │
//!   │  table: RwLock<Arc<WorkerTable>>  ◄── republished snapshot │
//!   │  sync:  Mutex<PoolSync>           ◄── overflow, idle count,│
//!   │  quiesced_cv: Condvar                 quiescence flags     │
//!   │  exiting: AtomicBool              ◄── shutdown latch       │
//!   │  next_rr: AtomicUsize             ◄── external round-robin │
//!   └────────────────────────────────────────────────────────────┘
//! ```
//!
//! The worker table is an immutable snapshot behind a short-lived `RwLock`
//! read: every path clones the `Arc` and drops the lock before touching any
//! other lock, so table publication (spawn/shutdown, which happens only
//! while all workers are parked) can never deadlock against the pool mutex.
//!
//! # Locks and what they may nest
//!
//! - `sync` (pool mutex) guards the overflow, the idle counter, and the
//!   quiescence flags. Tasks never run while it is held.
//! - A worker holding `sync` may push to / pop from run queues (their thief
//!   mutex never nests the other way around) and may take a table snapshot.
//! - Park condvars and `quiesced_cv` always wait on `sync`.
//!
//! # Quiescence
//!
//! `wait_for_all` raises `want_quiesce` and wakes everyone. Workers that
//! find nothing to do increment the idle counter under `sync`; the worker
//! whose increment reaches the worker count sweeps every queue in index
//! order. All empty: set `quiesced`, wake the owner. Own queue non-empty:
//! back out and keep working. Someone else's: hand the wakeup to them and
//! park. Only this lock-ordered sweep can tell "globally empty" from
//! "unbalanced".

use crate::pool::error::{PoolError, TaskError};
use crate::pool::metrics::{PoolMetrics, WorkerMetrics};
use crate::pool::rng::XorShift32;
use crate::pool::steal::{coprimes, VictimWalk};
use crate::pool::task::Task;
use crate::pool::worker::Worker;

use ahash::AHashMap;
use crossbeam_channel::{bounded, Receiver, TryRecvError};

use std::any::Any;
use std::collections::VecDeque;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, RwLock};
use std::thread::{self, JoinHandle, ThreadId};

const SYNC_POISONED: &str = "pool mutex poisoned";
const TABLE_POISONED: &str = "worker table lock poisoned";
const THREADS_POISONED: &str = "thread list mutex poisoned";

// ============================================================================
// Shared state
// ============================================================================

/// Immutable snapshot of the worker membership.
///
/// Republished wholesale on spawn/shutdown; readers clone the `Arc` and work
/// against a consistent view of workers, coprime table, and thread-id map.
#[derive(Default)]
struct WorkerTable {
    /// Stable-address worker handles, indexed by worker index.
    workers: Vec<Arc<Worker>>,
    /// Strides coprime to `workers.len()`; regenerated with the count.
    coprimes: Vec<usize>,
    /// Worker thread id -> index, for the self-submission fast path.
    ids: AHashMap<ThreadId, usize>,
}

/// State guarded by the pool mutex.
#[derive(Default)]
struct PoolSync {
    /// Shared FIFO for tasks refused by a full private queue (and for
    /// anything a worker must not keep to itself).
    overflow: VecDeque<Task>,
    /// Workers currently blocked on their park condvar.
    idle_workers: usize,
    /// Owner is waiting in `wait_for_all`/`shutdown` for the pool to drain.
    want_quiesce: bool,
    /// Raised by the last-to-idle worker once everything is empty.
    quiesced: bool,
}

struct Shared {
    table: RwLock<Arc<WorkerTable>>,
    sync: Mutex<PoolSync>,
    /// Owner-side wakeup for the quiescence edge.
    quiesced_cv: Condvar,
    /// One-way latch per pool generation; cleared only after joining.
    exiting: AtomicBool,
    /// Round-robin cursor for owner/external submission.
    next_rr: AtomicUsize,
}

impl Shared {
    #[inline]
    fn snapshot(&self) -> Arc<WorkerTable> {
        Arc::clone(&self.table.read().expect(TABLE_POISONED))
    }
}

// ============================================================================
// Result channel
// ============================================================================

/// One-shot receiver for a result-returning submission.
///
/// The only place a task's failure is observable to its submitter: a panic
/// in the task body arrives here as [`TaskError::Panicked`], and a task the
/// pool discarded before running (shutdown) arrives as
/// [`TaskError::Cancelled`].
pub struct TaskHandle<R> {
    rx: Receiver<thread::Result<R>>,
}

impl<R> TaskHandle<R> {
    /// Block until the task finishes (or is discarded).
    pub fn wait(self) -> Result<R, TaskError> {
        match self.rx.recv() {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(payload)) => Err(TaskError::Panicked(payload)),
            Err(_) => Err(TaskError::Cancelled),
        }
    }

    /// Non-blocking poll; `None` while the task is still pending.
    pub fn try_wait(&self) -> Option<Result<R, TaskError>> {
        match self.rx.try_recv() {
            Ok(Ok(value)) => Some(Ok(value)),
            Ok(Err(payload)) => Some(Err(TaskError::Panicked(payload))),
            Err(TryRecvError::Empty) => None,
            Err(TryRecvError::Disconnected) => Some(Err(TaskError::Cancelled)),
        }
    }
}

// ============================================================================
// Pool
// ============================================================================

/// Work-stealing thread pool with privatized run queues.
///
/// The constructing thread becomes the pool's *owner*: the only thread
/// allowed to call [`spawn`](Pool::spawn), [`wait_for_all`](Pool::wait_for_all),
/// and [`shutdown`](Pool::shutdown). Any thread may submit.
///
/// # Example
///
/// ```
/// use std::sync::atomic::{AtomicUsize, Ordering};
/// use std::sync::Arc;
///
/// let pool = stealpool::Pool::new(4).unwrap();
/// let hits = Arc::new(AtomicUsize::new(0));
/// for _ in 0..100 {
///     let hits = Arc::clone(&hits);
///     pool.submit(move || {
///         hits.fetch_add(1, Ordering::Relaxed);
///     });
/// }
/// pool.wait_for_all().unwrap();
/// assert_eq!(hits.load(Ordering::Relaxed), 100);
/// ```
pub struct Pool {
    shared: Arc<Shared>,
    threads: Mutex<Vec<JoinHandle<WorkerMetrics>>>,
    owner: ThreadId,
}

impl Pool {
    /// Create a pool with `workers` worker threads.
    ///
    /// With zero workers every submission executes inline on the submitting
    /// thread and the lifecycle operations are no-ops.
    pub fn new(workers: usize) -> Result<Self, PoolError> {
        let pool = Self {
            shared: Arc::new(Shared {
                table: RwLock::new(Arc::new(WorkerTable::default())),
                sync: Mutex::new(PoolSync::default()),
                quiesced_cv: Condvar::new(),
                exiting: AtomicBool::new(false),
                next_rr: AtomicUsize::new(0),
            }),
            threads: Mutex::new(Vec::new()),
            owner: thread::current().id(),
        };
        pool.spawn(workers)?;
        Ok(pool)
    }

    /// True iff the calling thread constructed this pool.
    pub fn is_owner(&self) -> bool {
        thread::current().id() == self.owner
    }

    /// Current worker count.
    pub fn num_workers(&self) -> usize {
        self.shared.snapshot().workers.len()
    }

    /// Depth of the shared overflow. Advisory only: tasks in private queues
    /// or mid-execution are not counted.
    pub fn num_tasks(&self) -> usize {
        self.shared.sync.lock().expect(SYNC_POISONED).overflow.len()
    }

    /// Submit a fire-and-forget task.
    ///
    /// With zero workers the task runs inline before `submit` returns (a
    /// panic then propagates to the caller). Otherwise the task is enqueued;
    /// a panic inside it is caught at the worker boundary, counted, and
    /// reported with a `WARN` diagnostic.
    pub fn submit<F>(&self, f: F)
    where
        F: FnOnce() + Send + 'static,
    {
        self.submit_task(Task::new(f));
    }

    /// Submit a task and receive its return value through a one-shot channel.
    ///
    /// A panic in `f` is captured and surfaces from the handle as
    /// [`TaskError::Panicked`] rather than unwinding a worker.
    pub fn submit_with_result<F, R>(&self, f: F) -> TaskHandle<R>
    where
        F: FnOnce() -> R + Send + 'static,
        R: Send + 'static,
    {
        let (tx, rx) = bounded(1);
        if self.num_workers() == 0 {
            let result = panic::catch_unwind(AssertUnwindSafe(f));
            let _ = tx.send(result);
            return TaskHandle { rx };
        }
        self.submit_task(Task::new(move || {
            let result = panic::catch_unwind(AssertUnwindSafe(f));
            let _ = tx.send(result);
        }));
        TaskHandle { rx }
    }

    /// Routing: inline without workers; own-queue front for a worker;
    /// round-robin peer back queue for the owner and external threads, with
    /// the shared overflow as the full-queue fallback.
    fn submit_task(&self, task: Task) {
        let table = self.shared.snapshot();

        if table.workers.is_empty() {
            task.run();
            return;
        }

        // Worker self-submission: LIFO onto its own queue. The submitting
        // worker sees the task on its next loop iteration, so no signal.
        let caller = thread::current().id();
        if caller != self.owner {
            if let Some(&index) = table.ids.get(&caller) {
                if let Err(task) = table.workers[index].queue.push_front(task) {
                    let mut sync = self.shared.sync.lock().expect(SYNC_POISONED);
                    sync.overflow.push_back(task);
                }
                return;
            }
        }

        // Owner or external thread: balance across peers, oldest-first from
        // the submitter's point of view.
        let index =
            self.shared.next_rr.fetch_add(1, Ordering::Relaxed) % table.workers.len();
        let target = &table.workers[index];
        let refused = target.queue.push_back(task).err();

        // Signal under the pool mutex: a worker between its empty-check and
        // its park re-checks the queue with the mutex held, so the push
        // above cannot slip past a parking worker unnoticed.
        let mut sync = self.shared.sync.lock().expect(SYNC_POISONED);
        if let Some(task) = refused {
            sync.overflow.push_back(task);
        }
        target.wake.notify_one();
    }

    /// Block until every admitted task has completed. Owner only.
    ///
    /// Tasks submitted concurrently while the pool is draining are admitted
    /// and extend the wait.
    pub fn wait_for_all(&self) -> Result<(), PoolError> {
        if !self.is_owner() {
            return Err(PoolError::NotOwner { op: "wait_for_all" });
        }
        let table = self.shared.snapshot();
        if table.workers.is_empty() {
            return Ok(());
        }

        let mut sync = self.shared.sync.lock().expect(SYNC_POISONED);
        sync.want_quiesce = true;
        // Wake everyone: a parked worker may own a non-empty queue that only
        // it (or a thief) can drain.
        for worker in &table.workers {
            worker.wake.notify_one();
        }
        while !sync.quiesced {
            sync = self.shared.quiesced_cv.wait(sync).expect(SYNC_POISONED);
        }
        sync.quiesced = false;
        sync.want_quiesce = false;
        Ok(())
    }

    /// Start `n` additional workers. Owner only.
    ///
    /// If workers already exist the pool is quiesced first, so membership
    /// never changes under an active steal sweep. Either all `n` workers
    /// start or none remain registered.
    pub fn spawn(&self, n: usize) -> Result<(), PoolError> {
        if !self.is_owner() {
            return Err(PoolError::NotOwner { op: "spawn" });
        }
        if n == 0 {
            return Ok(());
        }
        if self.num_workers() > 0 {
            self.wait_for_all()?;
        }

        let current = self.shared.snapshot();
        let base = current.workers.len();

        // New threads hold at the gate until the whole batch is registered;
        // on a partial failure the gate aborts and the batch unwinds.
        let gate = Arc::new(StartGate::new());
        let new_workers: Vec<Arc<Worker>> =
            (0..n).map(|k| Arc::new(Worker::new(base + k))).collect();

        let mut handles = Vec::with_capacity(n);
        for worker in &new_workers {
            let shared = Arc::clone(&self.shared);
            let worker = Arc::clone(worker);
            let worker_gate = Arc::clone(&gate);
            let spawned = thread::Builder::new()
                .name(format!("stealpool-worker-{}", worker.index))
                .spawn(move || {
                    if !worker_gate.wait() {
                        return WorkerMetrics::default();
                    }
                    worker_loop(&shared, &worker)
                });
            match spawned {
                Ok(handle) => handles.push(handle),
                Err(err) => {
                    gate.abort();
                    for handle in handles {
                        let _ = handle.join();
                    }
                    return Err(PoolError::ThreadSpawn(err));
                }
            }
        }

        {
            // Register under the pool mutex; existing workers are parked
            // post-quiescence, so nothing races the republication.
            let _sync = self.shared.sync.lock().expect(SYNC_POISONED);
            let mut workers = current.workers.clone();
            let mut ids = current.ids.clone();
            for (worker, handle) in new_workers.iter().zip(&handles) {
                ids.insert(handle.thread().id(), worker.index);
                workers.push(Arc::clone(worker));
            }
            let table = WorkerTable {
                coprimes: coprimes(workers.len()),
                workers,
                ids,
            };
            *self.shared.table.write().expect(TABLE_POISONED) = Arc::new(table);
        }

        self.threads.lock().expect(THREADS_POISONED).extend(handles);
        gate.open();
        Ok(())
    }

    /// Quiesce, terminate, and join all workers. Owner only.
    ///
    /// Returns the merged per-worker metrics for this pool generation. The
    /// pool stays usable: a later `spawn` starts a fresh generation. Tasks
    /// that raced into the overflow after quiescence are dropped.
    pub fn shutdown(&self) -> Result<PoolMetrics, PoolError> {
        if !self.is_owner() {
            return Err(PoolError::NotOwner { op: "shutdown" });
        }
        let mut threads = self.threads.lock().expect(THREADS_POISONED);
        if threads.is_empty() {
            return Ok(PoolMetrics::default());
        }

        let table = self.shared.snapshot();
        {
            let mut sync = self.shared.sync.lock().expect(SYNC_POISONED);
            sync.want_quiesce = true;
            for worker in &table.workers {
                worker.wake.notify_one();
            }
            while !sync.quiesced {
                sync = self.shared.quiesced_cv.wait(sync).expect(SYNC_POISONED);
            }
            sync.quiesced = false;
            sync.want_quiesce = false;

            self.shared.exiting.store(true, Ordering::Release);
            for worker in &table.workers {
                // Cannot fail on a quiesced queue; a worker that exits on
                // the latch alone leaves its terminator to the queue's Drop.
                let _ = worker.queue.push_back(Task::noop());
                worker.wake.notify_one();
            }
            // Late external submissions are left undispatched: drop them so
            // a respawned generation starts clean.
            sync.overflow.clear();
        }

        let mut metrics = PoolMetrics::default();
        for handle in threads.drain(..) {
            if let Ok(worker_metrics) = handle.join() {
                metrics.merge_worker(&worker_metrics);
            }
        }

        *self.shared.table.write().expect(TABLE_POISONED) =
            Arc::new(WorkerTable::default());
        self.shared.exiting.store(false, Ordering::Release);
        Ok(metrics)
    }
}

impl Drop for Pool {
    /// Best-effort shutdown. Only the owner thread can join the workers; a
    /// pool dropped elsewhere leaves its threads running until process exit.
    fn drop(&mut self) {
        if self.is_owner() {
            let _ = self.shutdown();
        }
    }
}

// ============================================================================
// Spawn gate
// ============================================================================

/// Go/abort decision for a batch of freshly spawned worker threads.
struct StartGate {
    decision: Mutex<Option<bool>>,
    cv: Condvar,
}

impl StartGate {
    fn new() -> Self {
        Self {
            decision: Mutex::new(None),
            cv: Condvar::new(),
        }
    }

    /// Block until the batch outcome is known; `true` means run.
    fn wait(&self) -> bool {
        let mut decision = self.decision.lock().expect("start gate poisoned");
        while decision.is_none() {
            decision = self.cv.wait(decision).expect("start gate poisoned");
        }
        decision.unwrap_or(false)
    }

    fn open(&self) {
        self.set(true);
    }

    fn abort(&self) {
        self.set(false);
    }

    fn set(&self, go: bool) {
        *self.decision.lock().expect("start gate poisoned") = Some(go);
        self.cv.notify_all();
    }
}

// ============================================================================
// Worker loop
// ============================================================================

/// Priority-ordered search: own front, steal, overflow, park.
///
/// Tasks always run with no pool lock held; the park path below is the only
/// section that touches the pool mutex, and it returns (dropping the guard)
/// before invoking anything it popped.
fn worker_loop(shared: &Shared, worker: &Worker) -> WorkerMetrics {
    let mut rng = XorShift32::new(worker.index as u32 + 1);
    let mut metrics = WorkerMetrics::default();

    while !shared.exiting.load(Ordering::Acquire) {
        // 1. Own queue, newest first: self-submitted work runs depth-first.
        if let Some(task) = worker.queue.pop_front() {
            metrics.local_pops += 1;
            run_task(task, &mut metrics);
            continue;
        }

        // 2. One randomized, exhaustive sweep over all peers.
        if let Some(task) = steal(shared, &mut rng, &mut metrics) {
            run_task(task, &mut metrics);
            continue;
        }

        // 3 + 4. Overflow, then park, under the pool mutex.
        if let Some(task) = idle_or_park(shared, worker, &mut metrics) {
            run_task(task, &mut metrics);
        }
    }

    metrics
}

fn steal(shared: &Shared, rng: &mut XorShift32, metrics: &mut WorkerMetrics) -> Option<Task> {
    let table = shared.snapshot();
    if table.workers.is_empty() {
        return None;
    }
    let dice = rng.next_u32();
    for victim in VictimWalk::new(dice, table.workers.len(), &table.coprimes) {
        metrics.steal_attempts += 1;
        if let Some(task) = table.workers[victim].queue.pop_back() {
            metrics.steal_successes += 1;
            return Some(task);
        }
    }
    None
}

/// Steps 3 and 4 of the search, holding the pool mutex.
///
/// The loop re-polls the worker's own queue before every wait: submitters
/// push to a private queue without the pool mutex and only then signal under
/// it, so this re-check (ordered by the mutex) is what makes their wakeup
/// reliable. Parking therefore always implies "own queue and overflow were
/// both observed empty under the lock".
fn idle_or_park(shared: &Shared, worker: &Worker, metrics: &mut WorkerMetrics) -> Option<Task> {
    let mut sync: MutexGuard<'_, PoolSync> = shared.sync.lock().expect(SYNC_POISONED);
    loop {
        if let Some(task) = worker.queue.pop_front() {
            metrics.local_pops += 1;
            return Some(task);
        }
        if let Some(task) = sync.overflow.pop_front() {
            metrics.overflow_pops += 1;
            return Some(task);
        }

        sync.idle_workers += 1;
        let table = shared.snapshot();
        if sync.idle_workers == table.workers.len() && sync.want_quiesce {
            match first_nonempty_queue(table.as_ref()) {
                // True quiescence: everything drained, wake the owner.
                None => {
                    sync.quiesced = true;
                    shared.quiesced_cv.notify_one();
                }
                // The only work left is ours: back out and go get it.
                Some(index) if index == worker.index => {
                    sync.idle_workers -= 1;
                    continue;
                }
                // Hand the wakeup to the worker that still has work.
                Some(index) => {
                    table.workers[index].wake.notify_one();
                }
            }
        }

        metrics.park_count += 1;
        sync = worker.wake.wait(sync).expect(SYNC_POISONED);
        sync.idle_workers -= 1;
    }
}

/// Index-ordered sweep; `is_empty` is approximate, which at worst wakes a
/// worker that finds nothing and re-parks.
fn first_nonempty_queue(table: &WorkerTable) -> Option<usize> {
    table.workers.iter().position(|w| !w.queue.is_empty())
}

fn run_task(task: Task, metrics: &mut WorkerMetrics) {
    metrics.tasks_executed += 1;
    if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(|| task.run())) {
        metrics.panics_caught += 1;
        eprintln!(
            "WARN: stealpool worker swallowed a task panic: {}",
            panic_message(payload.as_ref())
        );
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(msg) = payload.downcast_ref::<&'static str>() {
        msg
    } else if let Some(msg) = payload.downcast_ref::<String>() {
        msg
    } else {
        "<non-string panic payload>"
    }
}

// ============================================================================
// Tests
// ============================================================================
