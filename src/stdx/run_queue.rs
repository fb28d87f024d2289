//! Bounded per-worker run queue with asymmetric concurrency.
//!
//! # Design
//!
//! A fixed-capacity ring of `(state, value)` slots with two cursors. The
//! *owner* thread operates the front (`push_front`/`pop_front`) without any
//! lock; *thieves* operate the back (`push_back`/`pop_back`) serialized
//! against each other by a per-queue mutex. The asymmetry is the point:
//! dynamic task generation by the owning worker never contends a mutex.
//!
//! # Key properties
//!
//! - **One CAS per operation**: every transfer of a slot claims it with a
//!   single `compare_exchange` on the slot state; cursors are plain relaxed
//!   stores. Correctness comes from the slot state, not the cursors.
//! - **Cursors run modulo `2N`**: positions live in `[0, 2N)` so "full" and
//!   "empty" are distinguishable without an occupancy counter, while the
//!   slot index is still a single `& (N - 1)`.
//! - **Spurious refusal is allowed**: `push_front`/`push_back` may report
//!   full and `pop_back` may report empty while a concurrent thief holds a
//!   slot in `BUSY`. Callers treat refusal as backpressure, not as an error.
//! - **Cache-line padded cursors**: the owner-written `front` and the
//!   thief-written `back` live on separate cache lines.
//!
//! # Slot state machine
//!
//! ```text
//!           push (CAS, Acquire)            pop (CAS, Acquire)
//!   EMPTY ───────────────────► BUSY ◄─────────────────── READY
//!     ▲                          │  store READY (Release)   ▲
//!     │                          └──────────────────────────┘
//!     └── store EMPTY (Release) after the value is moved out
//! ```
//!
//! `BUSY` is a transient lock held by exactly one thread mid-transition: the
//! CAS winner has exclusive access to the slot value until its release
//! store. A slot is initialized iff its state is `READY` (or `BUSY` on the
//! pop side, owned by the popping thread).
//!
//! # Ordering rationale
//!
//! ```text
//! Pusher writes slot, then Release-stores READY  →  popper CAS-Acquires READY, then reads slot
//! Popper reads slot, then Release-stores EMPTY   →  pusher CAS-Acquires EMPTY, then writes slot
//! ```
//!
//! This establishes happens-before between slot write and slot read in both
//! directions. Cursor loads and stores are Relaxed throughout; a stale
//! cursor at worst makes an operation fail spuriously, never misread a slot.
//!
//! # Safety
//!
//! Uses `unsafe` for `MaybeUninit` slot access. The single invariant backing
//! every access: only the thread that won the state CAS touches the slot
//! value, and it does so before the matching release store. This holds even
//! if the owner-only contract on the front operations is violated, so misuse
//! degrades to logical corruption (lost capacity, surprising order), never
//! to a data race. Run under Miri / loom to validate.

#[cfg(not(loom))]
use std::sync::atomic::{AtomicU32, AtomicU8, Ordering};

#[cfg(loom)]
use loom::sync::atomic::{AtomicU32, AtomicU8, Ordering};

#[cfg(not(loom))]
use std::sync::Mutex;

#[cfg(loom)]
use loom::sync::Mutex;

use std::cell::UnsafeCell;
use std::mem::MaybeUninit;

use crossbeam_utils::CachePadded;

// Compile-time proof that u32 -> usize is safe on this platform.
const _: () = assert!(
    std::mem::size_of::<usize>() >= std::mem::size_of::<u32>(),
    "Platform must have at least 32-bit addressing"
);

/// Slot states. Only the `* -> BUSY` edges use a CAS; the CAS winner leaves
/// `BUSY` with a plain release store.
const EMPTY: u8 = 0;
const BUSY: u8 = 1;
const READY: u8 = 2;

struct Slot<T> {
    state: AtomicU8,
    /// Initialized iff `state == READY`, or `state == BUSY` while the CAS
    /// winner of a pop still holds the slot.
    value: UnsafeCell<MaybeUninit<T>>,
}

impl<T> Slot<T> {
    fn new() -> Self {
        Self {
            state: AtomicU8::new(EMPTY),
            value: UnsafeCell::new(MaybeUninit::uninit()),
        }
    }
}

/// Fixed-capacity double-ended run queue.
///
/// The owner pushes and pops at the front; thieves (and external submitters
/// targeting this worker) operate the back. `N` must be a power of two and
/// at least 4.
///
/// # Invariants
///
/// - `front` and `back` are positions in `[0, 2N)`; the queue is empty iff
///   `front == back`. Occupied positions are `[back, front)` modulo `2N`.
/// - Slot `i` holds a live value iff its state is `READY`.
/// - The internal mutex serializes back-side operations among themselves;
///   it is never required for front-side operations.
pub struct RunQueue<T, const N: usize> {
    /// Owner cursor. Only the owner advances it; thieves never read it
    /// except through `is_empty`.
    front: CachePadded<AtomicU32>,

    /// Thief cursor. Mutated only under `thieves`.
    back: CachePadded<AtomicU32>,

    /// Serializes back-side callers among themselves. `pop_back` only ever
    /// `try_lock`s it so the steal sweep stays non-blocking.
    thieves: Mutex<()>,

    slots: [Slot<T>; N],
}

impl<T, const N: usize> RunQueue<T, N> {
    const CAPACITY: u32 = {
        assert!(N >= 4, "RunQueue capacity must be at least 4");
        assert!(
            N & (N - 1) == 0,
            "RunQueue capacity must be a power of two"
        );
        assert!(
            N <= u32::MAX as usize / 4,
            "RunQueue capacity must leave headroom in u32 position space"
        );
        N as u32
    };

    /// Bitmask mapping a position to a slot index: `pos & IDX_MASK`.
    const IDX_MASK: u32 = Self::CAPACITY - 1;

    /// Bitmask keeping positions in `[0, 2N)`.
    const POS_MASK: u32 = (Self::CAPACITY << 1) - 1;

    pub fn new() -> Self {
        // Force compile-time validation of CAPACITY.
        let _ = Self::CAPACITY;

        Self {
            front: CachePadded::new(AtomicU32::new(0)),
            back: CachePadded::new(AtomicU32::new(0)),
            thieves: Mutex::new(()),
            slots: std::array::from_fn(|_| Slot::new()),
        }
    }

    /// Approximate emptiness test, callable from any thread.
    ///
    /// May transiently report empty while a push is mid-flight (the pusher
    /// advances its cursor before the value is published). Safe for control
    /// decisions: a false "empty" only sends a worker through a re-check it
    /// performs anyway before parking.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.front.load(Ordering::Relaxed) == self.back.load(Ordering::Relaxed)
    }

    /// Insert `value` at the front. Owner thread only.
    ///
    /// Returns `Err(value)` when the queue is full, or spuriously while a
    /// thief holds the target slot mid-transition.
    #[inline]
    pub fn push_front(&self, value: T) -> Result<(), T> {
        let front = self.front.load(Ordering::Relaxed);
        let slot = &self.slots[(front & Self::IDX_MASK) as usize];

        if slot
            .state
            .compare_exchange(EMPTY, BUSY, Ordering::Acquire, Ordering::Relaxed)
            .is_err()
        {
            return Err(value);
        }

        self.front
            .store(front.wrapping_add(1) & Self::POS_MASK, Ordering::Relaxed);
        // SAFETY: We won the EMPTY -> BUSY CAS, so the slot is uninitialized
        // and no other thread will touch it until the release store below.
        unsafe {
            (*slot.value.get()).write(value);
        }
        slot.state.store(READY, Ordering::Release);

        Ok(())
    }

    /// Remove the newest front value. Owner thread only.
    ///
    /// Returns `None` when the queue is empty, or spuriously when a thief
    /// holds the front slot mid-steal (the value is already on its way out).
    #[inline]
    pub fn pop_front(&self) -> Option<T> {
        if self.is_empty() {
            return None;
        }

        let front = self.front.load(Ordering::Relaxed);
        let slot = &self.slots[(front.wrapping_sub(1) & Self::IDX_MASK) as usize];

        if slot
            .state
            .compare_exchange(READY, BUSY, Ordering::Acquire, Ordering::Relaxed)
            .is_err()
        {
            return None;
        }

        self.front
            .store(front.wrapping_sub(1) & Self::POS_MASK, Ordering::Relaxed);
        // SAFETY: We won the READY -> BUSY CAS, so the slot is initialized
        // and exclusively ours until the release store below.
        let value = unsafe { (*slot.value.get()).as_ptr().read() };
        slot.state.store(EMPTY, Ordering::Release);

        Some(value)
    }

    /// Insert `value` at the back. Any thread; serialized with other
    /// back-side callers.
    ///
    /// Returns `Err(value)` when the queue is full, or spuriously while the
    /// owner is mid-pop on the target slot.
    pub fn push_back(&self, value: T) -> Result<(), T> {
        let _guard = self.thieves.lock().expect("run queue thief mutex poisoned");

        let back = self.back.load(Ordering::Relaxed);
        let slot = &self.slots[(back.wrapping_sub(1) & Self::IDX_MASK) as usize];

        if slot
            .state
            .compare_exchange(EMPTY, BUSY, Ordering::Acquire, Ordering::Relaxed)
            .is_err()
        {
            return Err(value);
        }

        self.back
            .store(back.wrapping_sub(1) & Self::POS_MASK, Ordering::Relaxed);
        // SAFETY: We won the EMPTY -> BUSY CAS; see `push_front`.
        unsafe {
            (*slot.value.get()).write(value);
        }
        slot.state.store(READY, Ordering::Release);

        Ok(())
    }

    /// Remove the oldest back value (steal). Any thread.
    ///
    /// Non-blocking: uses `try_lock` on the thief mutex and may return
    /// `None` spuriously even when the queue is non-empty (contended lock,
    /// or the owner mid-operation on the target slot). Stealers treat a miss
    /// as "move on to the next victim".
    pub fn pop_back(&self) -> Option<T> {
        if self.is_empty() {
            return None;
        }

        let Ok(_guard) = self.thieves.try_lock() else {
            return None;
        };

        let back = self.back.load(Ordering::Relaxed);
        let slot = &self.slots[(back & Self::IDX_MASK) as usize];

        if slot
            .state
            .compare_exchange(READY, BUSY, Ordering::Acquire, Ordering::Relaxed)
            .is_err()
        {
            return None;
        }

        // SAFETY: We won the READY -> BUSY CAS; see `pop_front`.
        let value = unsafe { (*slot.value.get()).as_ptr().read() };
        self.back
            .store(back.wrapping_add(1) & Self::POS_MASK, Ordering::Relaxed);
        slot.state.store(EMPTY, Ordering::Release);

        Some(value)
    }
}

impl<T, const N: usize> Default for RunQueue<T, N> {
    fn default() -> Self {
        Self::new()
    }
}

// SAFETY: Every access to a slot's value happens between winning that slot's
// state CAS and the matching release store, so slot values are never touched
// by two threads at once. Sending the queue moves the values with it.
unsafe impl<T: Send, const N: usize> Send for RunQueue<T, N> {}
unsafe impl<T: Send, const N: usize> Sync for RunQueue<T, N> {}

impl<T, const N: usize> Drop for RunQueue<T, N> {
    fn drop(&mut self) {
        // Drop any values still queued. `&mut self` excludes concurrent
        // operations, so no slot can be BUSY here.
        for slot in &mut self.slots {
            if slot.state.load(Ordering::Relaxed) == READY {
                // SAFETY: READY slots are initialized and we have exclusive
                // access.
                unsafe {
                    slot.value.get_mut().assume_init_drop();
                }
            }
        }
    }
}

// ============================================================================
// Tests
// ============================================================================


// ============================================================================
// Property Tests
// ============================================================================


// ============================================================================
// Loom Tests
// ============================================================================
