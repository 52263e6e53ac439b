//! Synchronization primitives built on the reactor's immediate-callback
//! queue: [`Event`], [`TEvent`], [`Semaphore`]/[`BoundedSemaphore`], and
//! [`Queue`].

pub mod event;
pub mod queue;
pub mod semaphore;
pub mod tevent;

pub use event::Event;
pub use queue::Queue;
pub use semaphore::{BoundedSemaphore, Semaphore};
pub use tevent::TEvent;
