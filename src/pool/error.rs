//! Error types for pool lifecycle operations and result channels.
//!
//! Two families:
//! - [`PoolError`]: control-flow errors, reported synchronously to the
//!   caller of a lifecycle operation. The pool's state is untouched.
//! - [`TaskError`]: data-flow outcomes of a result-returning submission,
//!   delivered through the task's one-shot channel.

use std::any::Any;
use std::error::Error;
use std::fmt;
use std::io;

/// Failure of a lifecycle operation. The pool remains usable.
#[derive(Debug)]
pub enum PoolError {
    /// `spawn`, `shutdown`, or `wait_for_all` was called from a thread other
    /// than the one that constructed the pool.
    NotOwner {
        /// The operation that was refused.
        op: &'static str,
    },
    /// The OS refused to start a worker thread. The spawn was rolled back:
    /// no worker from the failed batch remains registered.
    ThreadSpawn(io::Error),
}

impl fmt::Display for PoolError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PoolError::NotOwner { op } => {
                write!(f, "pool `{op}` called from a non-owner thread")
            }
            PoolError::ThreadSpawn(err) => {
                write!(f, "failed to spawn worker thread: {err}")
            }
        }
    }
}

impl Error for PoolError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            PoolError::NotOwner { .. } => None,
            PoolError::ThreadSpawn(err) => Some(err),
        }
    }
}

/// Why a result-returning submission produced no value.
pub enum TaskError {
    /// The task body panicked; the payload is the panic value.
    Panicked(Box<dyn Any + Send + 'static>),
    /// The task was discarded before it ran (pool shut down underneath it).
    Cancelled,
}

impl TaskError {
    /// The panic message, when the payload is a string (the common case for
    /// `panic!` with a literal or formatted message).
    pub fn panic_message(&self) -> Option<&str> {
        match self {
            TaskError::Panicked(payload) => payload
                .downcast_ref::<&'static str>()
                .copied()
                .or_else(|| payload.downcast_ref::<String>().map(String::as_str)),
            TaskError::Cancelled => None,
        }
    }
}

impl fmt::Debug for TaskError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TaskError::Panicked(_) => match self.panic_message() {
                Some(msg) => write!(f, "Panicked({msg:?})"),
                None => f.write_str("Panicked(..)"),
            },
            TaskError::Cancelled => f.write_str("Cancelled"),
        }
    }
}

impl fmt::Display for TaskError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TaskError::Panicked(_) => match self.panic_message() {
                Some(msg) => write!(f, "task panicked: {msg}"),
                None => f.write_str("task panicked"),
            },
            TaskError::Cancelled => f.write_str("task was discarded before running"),
        }
    }
}

impl Error for TaskError {}
