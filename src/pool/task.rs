//! Type-erased one-shot task.
//!
//! A task is a movable, nullary, void-returning callable that runs exactly
//! once (or is dropped undispatched during shutdown). The representation is
//! a boxed `FnOnce`; "no task held" is expressed as `Option<Task>` at the
//! call sites rather than a sentinel inside the task itself.

use std::fmt;

/// A queued unit of work.
///
/// Move-only and one-shot by construction: `run` consumes the task, and the
/// captured closure state is dropped either by running or by dropping the
/// task itself.
pub(crate) struct Task {
    f: Box<dyn FnOnce() + Send + 'static>,
}

impl Task {
    pub(crate) fn new<F>(f: F) -> Self
    where
        F: FnOnce() + Send + 'static,
    {
        Self { f: Box::new(f) }
    }

    /// Terminator used during shutdown: wakes a worker's pop path without
    /// doing any work.
    pub(crate) fn noop() -> Self {
        Self::new(|| {})
    }

    pub(crate) fn run(self) {
        (self.f)();
    }
}

impl fmt::Debug for Task {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Task")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[test]
    fn runs_exactly_once() {
        let hits = Arc::new(AtomicUsize::new(0));
        let h = Arc::clone(&hits);
        let task = Task::new(move || {
            h.fetch_add(1, Ordering::Relaxed);
        });
        task.run();
        assert_eq!(hits.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn dropped_undispatched_releases_captures() {
        let hits = Arc::new(AtomicUsize::new(0));
        let h = Arc::clone(&hits);
        let task = Task::new(move || {
            h.fetch_add(1, Ordering::Relaxed);
        });
        drop(task);
        assert_eq!(hits.load(Ordering::Relaxed), 0);
        // The closure's captured Arc is gone with the task.
        assert_eq!(Arc::strong_count(&hits), 1);
    }

    #[test]
    fn noop_is_inert() {
        Task::noop().run();
    }
}
