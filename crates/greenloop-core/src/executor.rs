//! The single-threaded task scheduler.
//!
//! Every `greenloop` task is a stackless Rust future driven by this
//! executor; the executor and the reactor it wakes from are confined to
//! the same thread (see the `reactor` module docs), so scheduling is a
//! plain thread-local push with no cross-thread synchronization.

use std::cell::Cell;
use std::future::Future;
use std::rc::Rc;
use std::time::Duration;

use async_task::Runnable;
use concurrent_queue::ConcurrentQueue;

use crate::reactor;

pub(crate) struct Executor {
    queue: Rc<ConcurrentQueue<Runnable>>,
    stopped: Cell<bool>,
}

thread_local! {
    static EXECUTOR: Executor = Executor {
        queue: Rc::new(ConcurrentQueue::unbounded()),
        stopped: Cell::new(false),
    };
}

pub(crate) fn with_executor<R>(f: impl FnOnce(&Executor) -> R) -> R {
    EXECUTOR.with(f)
}

impl Executor {
    /// Spawn a future onto this thread's executor.
    ///
    /// Uses `spawn_unchecked` rather than `async_task::spawn` because
    /// `greenloop` tasks are not required to be `Send`: the queue a
    /// `Runnable` is pushed onto and the reactor that wakes it both live in
    /// thread-local storage, so a `Runnable` produced here is only ever run
    /// back on the thread that created it. That single-thread confinement
    /// is exactly the invariant `spawn_unchecked` asks its caller to
    /// uphold.
    pub(crate) fn spawn<F, T>(&self, future: F) -> async_task::Task<T>
    where
        F: Future<Output = T> + 'static,
        T: 'static,
    {
        let queue = self.queue.clone();
        let schedule = move |runnable: Runnable| {
            let _ = queue.push(runnable);
        };
        let (runnable, task) = unsafe { async_task::spawn_unchecked(future, schedule) };
        runnable.schedule();
        task
    }

    pub(crate) fn try_tick(&self) -> bool {
        match self.queue.pop() {
            Ok(runnable) => {
                runnable.run();
                true
            }
            Err(_) => false,
        }
    }

    pub(crate) fn has_ready(&self) -> bool {
        !self.queue.is_empty()
    }

    pub(crate) fn stop(&self) {
        self.stopped.set(true);
    }

    pub(crate) fn is_stopped(&self) -> bool {
        self.stopped.get()
    }

    pub(crate) fn clear_stop(&self) {
        self.stopped.set(false);
    }
}

/// Stop the loop driving this thread after the current iteration (spec
/// §4.A: an explicit `stop()` call).
pub fn stop() {
    with_executor(|ex| ex.stop());
}

/// Run one iteration of the reactor loop.
///
/// Order matters here: timers fire, then the immediate-callback queue
/// drains, then every task that became ready as a result of either runs to
/// its next suspension point — *before* I/O is polled at all. Only after
/// that first drain is exhausted do we poll the OS, bounded by the nearer
/// of `deadline` and the next timer deadline, and drain again.
///
/// This is what gives a task resumed by I/O readiness the guarantee that
/// it runs after every task already resumed by a timer or an immediate
/// callback scheduled earlier in the same iteration.
pub(crate) fn run_once(deadline: Option<Duration>) -> std::io::Result<()> {
    reactor::with_reactor(|r| r.fire_timers());
    reactor::with_reactor(|r| r.drain_immediate());

    with_executor(|ex| while ex.try_tick() {});

    let timeout = reactor::with_reactor(|r| {
        let next_timer = r.next_timer_delay();
        match (deadline, next_timer) {
            (Some(d), Some(t)) => Some(d.min(t)),
            (Some(d), None) => Some(d),
            (None, Some(t)) => Some(t),
            (None, None) => None,
        }
    });

    reactor::with_reactor(|r| r.poll_io(timeout))?;

    with_executor(|ex| while ex.try_tick() {});

    Ok(())
}

/// Drive the executor and reactor until `is_done` reports true or
/// `stop()` has been called on this thread.
pub(crate) fn run_until(mut is_done: impl FnMut() -> bool) {
    loop {
        if is_done() {
            return;
        }
        if with_executor(|ex| ex.is_stopped()) {
            with_executor(|ex| ex.clear_stop());
            return;
        }

        let has_pending_io_or_timers = reactor::with_reactor(|r| r.has_watchers() || r.has_timers());
        let has_ready_tasks = with_executor(|ex| ex.has_ready());
        let has_immediate = reactor::with_reactor(|r| r.has_immediate());

        if !has_pending_io_or_timers && !has_ready_tasks && !has_immediate {
            // Nothing left that could ever make `is_done` true.
            return;
        }

        let _ = run_once(Some(Duration::from_millis(50)));
    }
}

/// Block the current thread, driving the executor and reactor, until
/// `future` completes, then return its output.
pub fn block_on<F, T>(future: F) -> T
where
    F: Future<Output = T> + 'static,
    T: 'static,
{
    let task = with_executor(|ex| ex.spawn(future));
    futures_lite_block_on(task)
}

/// Poll `task` to completion by hand, driving the reactor loop between
/// polls. `async_task::Task<T>` only implements `Future`, and we have no
/// outer runtime to hand it to, so we drive it ourselves exactly the way
/// `run_until` drives any other completion condition.
fn futures_lite_block_on<T>(mut task: async_task::Task<T>) -> T {
    use std::pin::Pin;
    use std::task::{Context, Poll, RawWaker, RawWakerVTable, Waker};

    fn noop_clone(_: *const ()) -> RawWaker {
        noop_raw()
    }
    fn noop(_: *const ()) {}
    fn noop_raw() -> RawWaker {
        static VTABLE: RawWakerVTable = RawWakerVTable::new(noop_clone, noop, noop, noop);
        RawWaker::new(std::ptr::null(), &VTABLE)
    }
    let waker = unsafe { Waker::from_raw(noop_raw()) };
    let mut cx = Context::from_waker(&waker);

    loop {
        if let Poll::Ready(out) = Pin::new(&mut task).poll(&mut cx) {
            return out;
        }
        // Drive executor and reactor until something could plausibly make
        // the task ready again, then re-poll it above.
        run_until(|| false);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU64, Ordering};
    use std::sync::Arc;

    #[test]
    fn spawn_and_tick_runs_future() {
        let counter = Arc::new(AtomicU64::new(0));
        let counter2 = counter.clone();
        with_executor(|ex| {
            let task = ex.spawn(async move {
                counter2.fetch_add(1, Ordering::SeqCst);
            });
            task.detach();
        });
        assert!(with_executor(|ex| ex.try_tick()));
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn try_tick_empty_queue_returns_false() {
        with_executor(|ex| while ex.try_tick() {});
        assert!(!with_executor(|ex| ex.try_tick()));
    }

    #[test]
    fn block_on_returns_output() {
        let out = block_on(async { 1 + 1 });
        assert_eq!(out, 2);
    }
}
