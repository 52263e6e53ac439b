//! The runtime's unified error taxonomy.
//!
//! `greenloop-core` and `greenloop` share one error type so that a task
//! awaiting any primitive in this workspace — a timer, a socket, a
//! semaphore — sees the same `Result<T, GreenError>` shape. Would-block is
//! never a variant here: it is classified and retried entirely inside the
//! reactor/socket layers (spec: "would-block ... never surfaced").

use std::fmt;
use std::io;

/// Errors that can be observed by a task awaiting a runtime primitive.
#[derive(Debug, thiserror::Error)]
pub enum GreenError {
    /// A scoped deadline elapsed before the awaited operation completed.
    #[error("operation timed out")]
    Timeout,

    /// The task was killed via `Task::kill`/`cancel`, or a pool/semaphore
    /// waiter was dropped out of its waiter list by a cancellation.
    #[error("task was cancelled")]
    Cancelled,

    /// The peer closed the connection (`ECONNRESET`/`ESHUTDOWN`/`EPIPE` on
    /// write), or the reactor lost track of an fd via `notify_opened`.
    #[error("connection closed")]
    Closed,

    /// `Reactor::add` was called for an (fd, direction) pair that already
    /// has a live watcher. Programmer error, not recoverable at runtime.
    #[error("duplicate watcher for this (fd, direction)")]
    DuplicateWatcher,

    /// A blocking-shaped primitive (`trampoline`, `Semaphore::acquire`,
    /// `Queue::get`, ...) was called from the hub's own execution context.
    #[error("blocking call made from the hub itself")]
    HubReentry,

    /// `Event::send`/`send_exception` called twice on the same event
    /// without an intervening `reset`.
    #[error("event was sent to more than once")]
    DoubleSend,

    /// A `BoundedSemaphore::release` would exceed the semaphore's original
    /// capacity.
    #[error("semaphore release exceeds capacity")]
    Overflow,

    /// Raised from the accept loop to cleanly exit `serve`.
    #[error("server loop stopped")]
    StopServe,

    /// Any other OS-level failure, including fatal reactor poll errors.
    #[error(transparent)]
    Io(#[from] io::Error),
}

impl GreenError {
    /// True for the handful of variants that represent a programmer/usage
    /// error rather than a runtime condition a caller should expect to
    /// handle (spec §7: "Protocol/usage errors ... not recoverable at
    /// runtime").
    pub fn is_usage_error(&self) -> bool {
        matches!(
            self,
            GreenError::DuplicateWatcher | GreenError::HubReentry | GreenError::DoubleSend
        )
    }
}

impl Clone for GreenError {
    fn clone(&self) -> Self {
        match self {
            GreenError::Timeout => GreenError::Timeout,
            GreenError::Cancelled => GreenError::Cancelled,
            GreenError::Closed => GreenError::Closed,
            GreenError::DuplicateWatcher => GreenError::DuplicateWatcher,
            GreenError::HubReentry => GreenError::HubReentry,
            GreenError::DoubleSend => GreenError::DoubleSend,
            GreenError::Overflow => GreenError::Overflow,
            GreenError::StopServe => GreenError::StopServe,
            GreenError::Io(e) => GreenError::Io(io::Error::new(e.kind(), e.to_string())),
        }
    }
}

/// Helper so call sites can build an `io::Error` without importing
/// `std::io` themselves (mirrors the teacher's preference for small
/// free functions over trait-bound generics at error-construction sites).
pub(crate) fn other_io<M: fmt::Display>(msg: M) -> io::Error {
    io::Error::other(msg.to_string())
}
