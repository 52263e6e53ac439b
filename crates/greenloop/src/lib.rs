//! greenloop: a cooperative, single-threaded concurrency runtime in the
//! shape of Python's `eventlet`/`guv` — tasks instead of green threads,
//! `async`/`await` instead of implicit greenlet switches.
//!
//! # Quick Start
//!
//! ```ignore
//! use greenloop::{spawn, sleep, block_on, TcpStream};
//! use std::time::Duration;
//!
//! block_on(async {
//!     spawn(async {
//!         sleep(Duration::from_millis(100)).await;
//!         println!("timer fired!");
//!     });
//!
//!     let stream = TcpStream::connect("127.0.0.1:8080".parse().unwrap()).await.unwrap();
//!     stream.write(b"hello").await.unwrap();
//! });
//! ```

pub mod compat;
pub mod error;
pub mod pool;
pub mod server;
pub mod socket;
pub mod sync;
pub mod timer;

pub use error::{Domain, GreenError, Type};
pub use pool::{GreenMap, GreenPile, GreenPool};
pub use server::{listen_and_serve, serve};
pub use socket::{Connector, Socket, SocketFile, TcpListener, TcpStream, UdpSocket};
pub use timer::{with_timeout, Timer};

use std::future::Future;
use std::time::Duration;

/// Spawn `future` onto this thread's executor, returning a handle to it.
/// The task starts running the next time the executor drains its queue,
/// not inline.
pub fn spawn<F, T>(future: F) -> greenloop_core::Task<T>
where
    F: Future<Output = T> + 'static,
    T: 'static,
{
    greenloop_core::spawn(future)
}

/// Suspend the calling task for `duration` without blocking the thread.
pub async fn sleep(duration: Duration) -> Result<(), GreenError> {
    greenloop_core::trampoline::sleep(duration).await
}

/// Yield control to the executor. If `switch_back` is true (the common
/// case), this task reschedules itself for the very next tick; if false,
/// it suspends without self-rescheduling and relies on something else
/// (another task, a primitive like `Event`) to wake it.
pub async fn yield_now(switch_back: bool) {
    greenloop_core::trampoline::yield_now(switch_back).await
}

/// The id of the task currently executing on this thread, if any.
pub fn current_task_id() -> Option<u64> {
    greenloop_core::current_task_id()
}

/// Block the current thread until `future` completes, driving both the
/// reactor (IO + timers) and executor (spawned tasks) internally.
pub fn block_on<F, T>(future: F) -> T
where
    F: Future<Output = T> + 'static,
    T: 'static,
{
    greenloop_core::block_on(future)
}

/// Request the executor to stop after the current iteration, mirroring
/// `hub.abort()`.
pub fn stop() {
    greenloop_core::stop()
}
