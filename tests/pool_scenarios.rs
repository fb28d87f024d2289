//! End-to-end scenarios for the work-stealing pool.
//!
//! These exercise the full submission/steal/quiesce machinery with real
//! threads: inline execution, bulk fan-out, recursive forking, the overflow
//! path under a gated worker, respawn after quiescence, and owner-only
//! enforcement from inside a task.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{mpsc, Arc, Mutex};
use std::thread;
use std::time::Duration;

use stealpool::{Pool, PoolError};

/// S1: a pool with no workers executes inline, synchronously.
#[test]
fn inline_pool_runs_on_the_caller() {
    let pool = Pool::new(0).unwrap();
    let counter = Arc::new(AtomicUsize::new(0));

    for i in 0..100 {
        let c = Arc::clone(&counter);
        pool.submit(move || {
            c.fetch_add(1, Ordering::Relaxed);
        });
        // Inline execution: each increment is visible before submit returns.
        assert_eq!(counter.load(Ordering::Relaxed), i + 1);
    }

    pool.wait_for_all().unwrap();
    assert_eq!(counter.load(Ordering::Relaxed), 100);
}

/// S2: 10k external submissions all run exactly once.
#[test]
fn bulk_external_submissions_complete_exactly_once() {
    let pool = Pool::new(4).unwrap();
    let bag = Arc::new(Mutex::new(Vec::new()));

    for i in 0..10_000u32 {
        let bag = Arc::clone(&bag);
        pool.submit(move || {
            bag.lock().unwrap().push(i);
        });
    }
    pool.wait_for_all().unwrap();

    let mut seen = bag.lock().unwrap().clone();
    seen.sort_unstable();
    let expected: Vec<u32> = (0..10_000).collect();
    assert_eq!(seen, expected);
}

/// S3: a root task forks two subtasks recursively to depth 12; all 4095
/// nodes of the binary tree run.
#[test]
fn recursive_fork_counts_every_node() {
    const DEPTH: u32 = 12;

    fn fork(pool: &Arc<Pool>, depth: u32, counter: &Arc<AtomicUsize>) {
        counter.fetch_add(1, Ordering::Relaxed);
        if depth < DEPTH {
            for _ in 0..2 {
                let child_pool = Arc::clone(pool);
                let counter = Arc::clone(counter);
                pool.submit(move || fork(&child_pool, depth + 1, &counter));
            }
        }
    }

    let pool = Arc::new(Pool::new(4).unwrap());
    let counter = Arc::new(AtomicUsize::new(0));

    {
        let root_pool = Arc::clone(&pool);
        let counter = Arc::clone(&counter);
        pool.submit(move || fork(&root_pool, 1, &counter));
    }
    pool.wait_for_all().unwrap();

    assert_eq!(counter.load(Ordering::Relaxed), (1 << DEPTH) - 1);
}

/// S4: with a single worker pinned inside a gated task, external
/// submissions overrun the 1024-slot private queue and spill into the
/// shared overflow; everything still runs exactly once.
#[test]
fn overflow_absorbs_submissions_past_a_full_queue() {
    let pool = Arc::new(Pool::new(1).unwrap());
    let counter = Arc::new(AtomicUsize::new(0));

    let (entered_tx, entered_rx) = mpsc::channel();
    let (release_tx, release_rx) = mpsc::channel::<()>();

    {
        let counter = Arc::clone(&counter);
        pool.submit(move || {
            entered_tx.send(()).unwrap();
            release_rx.recv().unwrap();
            counter.fetch_add(1, Ordering::Relaxed);
        });
    }
    // The worker is now parked inside the gate; nothing else can drain.
    entered_rx.recv().unwrap();

    let submitter = {
        let pool = Arc::clone(&pool);
        let counter = Arc::clone(&counter);
        thread::spawn(move || {
            for _ in 0..9_999 {
                let c = Arc::clone(&counter);
                pool.submit(move || {
                    c.fetch_add(1, Ordering::Relaxed);
                });
            }
        })
    };
    submitter.join().unwrap();

    // 9,999 tasks against a 1,024-slot queue: the overflow must be holding
    // the difference while the worker is gated.
    assert!(
        pool.num_tasks() > 0,
        "expected spillover into the shared overflow"
    );

    release_tx.send(()).unwrap();
    pool.wait_for_all().unwrap();

    assert_eq!(counter.load(Ordering::Relaxed), 10_000);
    assert_eq!(pool.num_tasks(), 0);
}

/// S5: quiesce, grow the pool, run a second wave; stealing spans the new
/// worker set.
#[test]
fn respawn_grows_the_worker_set() {
    let pool = Pool::new(2).unwrap();
    let counter = Arc::new(AtomicUsize::new(0));

    for _ in 0..1_000 {
        let c = Arc::clone(&counter);
        pool.submit(move || {
            c.fetch_add(1, Ordering::Relaxed);
        });
    }
    pool.wait_for_all().unwrap();
    assert_eq!(counter.load(Ordering::Relaxed), 1_000);

    pool.spawn(2).unwrap();
    assert_eq!(pool.num_workers(), 4);

    for _ in 0..1_000 {
        let c = Arc::clone(&counter);
        pool.submit(move || {
            c.fetch_add(1, Ordering::Relaxed);
        });
    }
    pool.wait_for_all().unwrap();
    assert_eq!(counter.load(Ordering::Relaxed), 2_000);

    // Workers searched beyond their own queues across both generations.
    let metrics = pool.shutdown().unwrap();
    assert_eq!(metrics.worker_count, 4);
    assert!(metrics.steal_attempts > 0);
}

/// S6: a worker task may not shut the pool down; the error is observable
/// inside the task and the pool keeps working.
#[test]
fn shutdown_from_a_worker_is_rejected() {
    let pool = Arc::new(Pool::new(2).unwrap());
    let saw_not_owner = Arc::new(AtomicUsize::new(0));

    {
        let pool_ref = Arc::clone(&pool);
        let saw = Arc::clone(&saw_not_owner);
        pool.submit(move || {
            if let Err(PoolError::NotOwner { op: "shutdown" }) = pool_ref.shutdown() {
                saw.fetch_add(1, Ordering::Relaxed);
            }
        });
    }
    pool.wait_for_all().unwrap();
    assert_eq!(saw_not_owner.load(Ordering::Relaxed), 1);

    // Still usable afterwards.
    let counter = Arc::new(AtomicUsize::new(0));
    let c = Arc::clone(&counter);
    pool.submit(move || {
        c.fetch_add(1, Ordering::Relaxed);
    });
    pool.wait_for_all().unwrap();
    assert_eq!(counter.load(Ordering::Relaxed), 1);
}

/// Law 4: quiescence is immediate and observable — after `wait_for_all`
/// the overflow reads empty.
#[test]
fn wait_for_all_leaves_no_pending_work() {
    let pool = Pool::new(3).unwrap();
    for _ in 0..5_000 {
        pool.submit(|| {
            std::hint::black_box(0u64);
        });
    }
    pool.wait_for_all().unwrap();
    assert_eq!(pool.num_tasks(), 0);
}

/// Law 5: self-submitted subtasks on a single worker run LIFO, depth-first,
/// with no thieves to reorder them.
#[test]
fn self_submission_is_depth_first_without_stealing() {
    let pool = Arc::new(Pool::new(1).unwrap());
    let order = Arc::new(Mutex::new(Vec::new()));

    {
        let pool_ref = Arc::clone(&pool);
        let order = Arc::clone(&order);
        pool.submit(move || {
            order.lock().unwrap().push("root");
            for label in ["a", "b", "c"] {
                let order = Arc::clone(&order);
                pool_ref.submit(move || {
                    order.lock().unwrap().push(label);
                });
            }
        });
    }
    pool.wait_for_all().unwrap();

    // Front pushes pop newest-first: c, b, a.
    assert_eq!(*order.lock().unwrap(), vec!["root", "c", "b", "a"]);
}

/// Law 6: an unbalanced workload gets rebalanced by stealing — idle peers
/// take work generated on one worker.
#[test]
fn idle_peers_steal_from_a_single_producer() {
    let pool = Arc::new(Pool::new(4).unwrap());
    let counter = Arc::new(AtomicUsize::new(0));
    const CHILDREN: usize = 400;

    // Four roots, one per worker via round-robin; the first becomes the
    // producer, the rest just wake their workers.
    {
        let pool_ref = Arc::clone(&pool);
        let counter_ref = Arc::clone(&counter);
        pool.submit(move || {
            counter_ref.fetch_add(1, Ordering::Relaxed);
            for _ in 0..CHILDREN {
                let c = Arc::clone(&counter_ref);
                pool_ref.submit(move || {
                    thread::sleep(Duration::from_micros(200));
                    c.fetch_add(1, Ordering::Relaxed);
                });
            }
        });
    }
    for _ in 0..3 {
        let c = Arc::clone(&counter);
        pool.submit(move || {
            c.fetch_add(1, Ordering::Relaxed);
        });
    }

    pool.wait_for_all().unwrap();
    assert_eq!(counter.load(Ordering::Relaxed), 4 + CHILDREN);

    let metrics = pool.shutdown().unwrap();
    assert!(
        metrics.steal_successes > 0,
        "peers should have stolen from the producer's queue"
    );
}

/// Owner-only enforcement also holds for foreign (non-worker) threads.
#[test]
fn foreign_threads_cannot_run_lifecycle_operations() {
    let pool = Arc::new(Pool::new(2).unwrap());

    let p = Arc::clone(&pool);
    thread::spawn(move || {
        assert!(matches!(p.wait_for_all(), Err(PoolError::NotOwner { .. })));
        assert!(matches!(p.spawn(1), Err(PoolError::NotOwner { .. })));
        assert!(matches!(p.shutdown(), Err(PoolError::NotOwner { .. })));
    })
    .join()
    .unwrap();

    assert_eq!(pool.num_workers(), 2);
    pool.wait_for_all().unwrap();
}

/// Result-returning submissions keep working across a quiesce boundary.
#[test]
fn result_handles_survive_wait_for_all() {
    let pool = Pool::new(2).unwrap();

    let handles: Vec<_> = (0..64u64)
        .map(|i| pool.submit_with_result(move || i * i))
        .collect();
    pool.wait_for_all().unwrap();

    for (i, handle) in handles.into_iter().enumerate() {
        let i = i as u64;
        assert_eq!(handle.wait().unwrap(), i * i);
    }
}
