//! Tasks: the runtime's unit of concurrency.
//!
//! A `Task<T>` is a spawned future plus the bookkeeping `greenthread.py`
//! hangs off a green thread: a monotonic id, a set of completion links,
//! and a cooperative kill switch. Unlike a stackful greenlet, a `Task`
//! cannot be killed mid-instruction — cancellation is observed the next
//! time the task's body calls [`crate::trampoline::yield_now`] or
//! [`crate::trampoline::trampoline`], exactly like `GreenThread.kill`
//! raising at the next scheduler switch.

use std::cell::{Cell, RefCell};
use std::future::Future;
use std::pin::Pin;
use std::rc::Rc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::task::{Context, Poll, Waker};
use std::time::Duration;

use crate::executor;

static NEXT_TASK_ID: AtomicU64 = AtomicU64::new(1);

/// Per-task control block shared between the public [`Task`] handle, the
/// running future, and the thread-local "currently executing task" stack.
pub(crate) struct Control {
    id: u64,
    killed: Cell<bool>,
    last_waker: RefCell<Option<Waker>>,
}

impl Control {
    fn new(id: u64) -> Self {
        Control {
            id,
            killed: Cell::new(false),
            last_waker: RefCell::new(None),
        }
    }
}

thread_local! {
    static CURRENT: RefCell<Vec<Rc<Control>>> = RefCell::new(Vec::new());
}

/// The id of the task currently executing on this thread, if any.
pub fn current_task_id() -> Option<u64> {
    CURRENT.with(|c| c.borrow().last().map(|ctl| ctl.id))
}

/// True if the innermost currently-executing task has been killed.
/// Consulted by `trampoline`/`yield_now` at every suspension point, and by
/// any other future-based primitive (e.g. `Semaphore::acquire`) that needs
/// to observe cancellation directly rather than through `trampoline`.
pub fn is_current_killed() -> bool {
    CURRENT.with(|c| c.borrow().last().map(|ctl| ctl.killed.get()).unwrap_or(false))
}

/// Wraps a task's body so every poll is bracketed by pushing/popping this
/// task's `Control` onto the thread-local execution stack, and so the
/// waker of the most recent poll is always available to `kill()`.
struct Tracked<F> {
    inner: F,
    control: Rc<Control>,
}

impl<F: Future> Future for Tracked<F> {
    type Output = F::Output;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<F::Output> {
        // SAFETY: we only ever access `inner` through its own Pin, and
        // `Tracked` is never moved out from behind a `Pin` elsewhere.
        let this = unsafe { self.get_unchecked_mut() };
        *this.control.last_waker.borrow_mut() = Some(cx.waker().clone());
        CURRENT.with(|c| c.borrow_mut().push(this.control.clone()));
        let inner = unsafe { Pin::new_unchecked(&mut this.inner) };
        let result = inner.poll(cx);
        CURRENT.with(|c| {
            c.borrow_mut().pop();
        });
        result
    }
}

enum TaskState<T> {
    Pending,
    Done(Rc<T>),
}

/// Completion state shared by every `wait()`er and `link()` callback of a
/// task, independent of whichever raw `async_task::Task` the scheduler
/// holds. This indirection is what lets a task be waited on from more
/// than one place and linked after the fact — a single `async_task::Task`
/// can only ever be awaited once.
struct Shared<T> {
    state: RefCell<TaskState<T>>,
    waiters: RefCell<Vec<Waker>>,
    links: RefCell<Vec<Box<dyn FnOnce(&T)>>>,
    /// Guards against a link callback spawning or registering another link
    /// from within itself and causing links to run twice (mirrors
    /// `greenthread.py`'s `_resolving_links` guard).
    resolving_links: Cell<bool>,
}

impl<T> Shared<T> {
    fn new() -> Self {
        Shared {
            state: RefCell::new(TaskState::Pending),
            waiters: RefCell::new(Vec::new()),
            links: RefCell::new(Vec::new()),
            resolving_links: Cell::new(false),
        }
    }

    fn complete(&self, value: T) {
        let value = Rc::new(value);
        *self.state.borrow_mut() = TaskState::Done(value.clone());
        for w in self.waiters.borrow_mut().drain(..) {
            w.wake();
        }
        self.run_links(&value);
    }

    fn run_links(&self, value: &T) {
        if self.resolving_links.get() {
            return;
        }
        self.resolving_links.set(true);
        let callbacks: Vec<Box<dyn FnOnce(&T)>> = self.links.borrow_mut().drain(..).collect();
        for cb in callbacks {
            cb(value);
        }
        self.resolving_links.set(false);
    }

    fn add_link(self: &Rc<Self>, f: impl FnOnce(&T) + 'static) {
        match &*self.state.borrow() {
            TaskState::Done(v) => f(v),
            TaskState::Pending => self.links.borrow_mut().push(Box::new(f)),
        }
    }
}

/// A future that resolves once `shared` reaches `TaskState::Done`.
struct Wait<T> {
    shared: Rc<Shared<T>>,
}

impl<T> Future for Wait<T> {
    type Output = Rc<T>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Rc<T>> {
        match &*self.shared.state.borrow() {
            TaskState::Done(v) => Poll::Ready(v.clone()),
            TaskState::Pending => {
                self.shared.waiters.borrow_mut().push(cx.waker().clone());
                Poll::Pending
            }
        }
    }
}

/// A handle to a spawned task.
///
/// Dropping a `Task` does not cancel it — spawned tasks run to completion
/// in the background unless explicitly [`kill`](Task::kill)ed, matching
/// `spawn_n`'s fire-and-forget semantics in the source runtime this one is
/// modeled on.
pub struct Task<T> {
    id: u64,
    shared: Rc<Shared<T>>,
    control: Rc<Control>,
}

impl<T> Clone for Task<T> {
    fn clone(&self) -> Self {
        Task {
            id: self.id,
            shared: self.shared.clone(),
            control: self.control.clone(),
        }
    }
}

impl<T: 'static> Task<T> {
    /// This task's monotonic id, stable for the life of the process.
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Suspend the current task until this one completes, returning its
    /// output. Multiple tasks may `wait()` on the same `Task` concurrently.
    pub async fn wait(&self) -> Rc<T> {
        Wait { shared: self.shared.clone() }.await
    }

    /// True once the task's body has returned (killed or not).
    pub fn is_done(&self) -> bool {
        matches!(&*self.shared.state.borrow(), TaskState::Done(_))
    }

    /// Register a callback to run as soon as the task completes — or
    /// immediately, inline, if it already has. Mirrors
    /// `GreenThread.link`.
    pub fn link(&self, f: impl FnOnce(&T) + 'static) {
        self.shared.add_link(f);
    }

    /// Request cooperative cancellation. The task keeps running until its
    /// body next calls `trampoline`/`yield_now`/a primitive built on them,
    /// at which point it observes `GreenError::Cancelled`.
    pub fn kill(&self) {
        self.control.killed.set(true);
        if let Some(w) = self.control.last_waker.borrow_mut().take() {
            w.wake();
        }
    }

    /// Alias for [`kill`](Task::kill) — the name `greenthread.py` uses at
    /// most of its call sites.
    pub fn cancel(&self) {
        self.kill();
    }
}

/// Spawn `future` onto this thread's executor. The task starts running
/// the next time the executor drains its ready queue, not inline.
pub fn spawn<F, T>(future: F) -> Task<T>
where
    F: Future<Output = T> + 'static,
    T: 'static,
{
    let id = NEXT_TASK_ID.fetch_add(1, Ordering::Relaxed);
    let control = Rc::new(Control::new(id));
    let shared = Rc::new(Shared::new());

    log::trace!("task {id} spawned");

    let tracked = Tracked { inner: future, control: control.clone() };
    let shared_for_driver = shared.clone();
    let driver = async move {
        let output = tracked.await;
        log::trace!("task {id} completed");
        shared_for_driver.complete(output);
    };

    let raw = executor::with_executor(|ex| ex.spawn(driver));
    raw.detach();

    Task { id, shared, control }
}

/// Spawn `future` to begin running only after `delay` has elapsed,
/// mirroring `GreenThread.spawn_after`. Cancelling the returned task
/// before the delay expires prevents it from ever running its body.
pub fn spawn_after<F, T>(delay: Duration, future: F) -> Task<T>
where
    F: Future<Output = T> + 'static,
    T: 'static,
{
    spawn(async move {
        crate::trampoline::sleep(delay).await;
        future.await
    })
}

/// Spawn `future` and discard its handle immediately — fire-and-forget,
/// mirroring `GreenThread.spawn_n`.
pub fn spawn_detached<F>(future: F)
where
    F: Future<Output = ()> + 'static,
{
    let _ = spawn(future);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::block_on;
    use std::sync::atomic::{AtomicBool, AtomicU32, Ordering as AtOrdering};
    use std::sync::Arc;

    #[test]
    fn spawn_and_wait_returns_value() {
        let value = block_on(async {
            let t = spawn(async { 41 + 1 });
            *t.wait().await
        });
        assert_eq!(value, 42);
    }

    #[test]
    fn link_runs_after_completion() {
        let ran = Arc::new(AtomicBool::new(false));
        let ran2 = ran.clone();
        block_on(async move {
            let t = spawn(async { 7 });
            t.link(move |v: &i32| {
                assert_eq!(*v, 7);
                ran2.store(true, AtOrdering::SeqCst);
            });
            let _ = t.wait().await;
        });
        assert!(ran.load(AtOrdering::SeqCst));
    }

    #[test]
    fn link_after_completion_runs_inline() {
        let ran = Arc::new(AtomicBool::new(false));
        let ran2 = ran.clone();
        block_on(async move {
            let t = spawn(async { 1 });
            let _ = t.wait().await;
            t.link(move |_| ran2.store(true, AtOrdering::SeqCst));
        });
        assert!(ran.load(AtOrdering::SeqCst));
    }

    #[test]
    fn multiple_waiters_all_observe_completion() {
        let count = block_on(async {
            let t = spawn(async { 5 });
            let (a, b) = (t.wait(), t.wait());
            let (ra, rb) = futures_join(a, b).await;
            *ra + *rb
        });
        assert_eq!(count, 10);
    }

    // Minimal join helper so this test doesn't need a `futures` dependency
    // just to poll two child futures concurrently.
    async fn futures_join<A, B>(a: A, b: B) -> (A::Output, B::Output)
    where
        A: Future,
        B: Future,
    {
        use std::pin::pin;
        let mut a = pin!(a);
        let mut b = pin!(b);
        let mut a_out = None;
        let mut b_out = None;
        std::future::poll_fn(|cx| {
            if a_out.is_none() {
                if let Poll::Ready(v) = a.as_mut().poll(cx) {
                    a_out = Some(v);
                }
            }
            if b_out.is_none() {
                if let Poll::Ready(v) = b.as_mut().poll(cx) {
                    b_out = Some(v);
                }
            }
            if a_out.is_some() && b_out.is_some() {
                Poll::Ready(())
            } else {
                Poll::Pending
            }
        })
        .await;
        (a_out.unwrap(), b_out.unwrap())
    }

    #[test]
    fn kill_sets_flag_observed_by_current_killed() {
        let observed = Arc::new(AtomicU32::new(0));
        let observed2 = observed.clone();
        block_on(async move {
            let t = spawn(async move {
                crate::trampoline::yield_now(true).await;
                if is_current_killed() {
                    observed2.store(1, AtOrdering::SeqCst);
                }
            });
            t.kill();
            let _ = t.wait().await;
        });
        assert_eq!(observed.load(AtOrdering::SeqCst), 1);
    }
}
