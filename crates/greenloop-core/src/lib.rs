//! greenloop-core: the reactor, executor, task, and trampoline layer
//! underpinning the `greenloop` cooperative concurrency runtime.
//!
//! Everything here is confined to a single thread's `thread_local!`
//! storage (see `reactor` module docs) — there is no process-global
//! state and no public ABI. `greenloop` is the crate meant for outside
//! use; this one exists to keep the scheduling machinery separate from
//! the sync primitives and sockets built on top of it.

pub mod error;
pub mod executor;
pub mod reactor;
pub mod task;
pub mod trampoline;

pub use error::GreenError;
pub use executor::{block_on, stop};
pub use reactor::{Direction, IoKey, TimerKey};
pub use task::{current_task_id, is_current_killed, spawn, spawn_after, spawn_detached, Task};
