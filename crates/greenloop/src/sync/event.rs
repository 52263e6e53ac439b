//! `Event<T>`: a one-shot broadcast, modeled on `guv.event.Event`.
//!
//! Differs from a queue holding one item in the same two ways the
//! original does: `send` never suspends the sender, and `send` may only
//! be called once per `reset`.

use std::cell::RefCell;
use std::future::Future;
use std::pin::Pin;
use std::rc::Rc;
use std::task::{Context, Poll, Waker};

use greenloop_core::reactor;
use greenloop_core::GreenError;

enum Slot<T> {
    Empty,
    Value(Rc<T>),
    Error(GreenError),
}

struct Inner<T> {
    slot: RefCell<Slot<T>>,
    waiters: RefCell<Vec<Waker>>,
}

/// An arbitrary number of tasks can wait for one value from another.
pub struct Event<T> {
    inner: Rc<Inner<T>>,
}

impl<T> Clone for Event<T> {
    fn clone(&self) -> Self {
        Event { inner: self.inner.clone() }
    }
}

impl<T> Default for Event<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Event<T> {
    pub fn new() -> Self {
        Event {
            inner: Rc::new(Inner { slot: RefCell::new(Slot::Empty), waiters: RefCell::new(Vec::new()) }),
        }
    }

    /// True if `wait()` would return immediately.
    pub fn ready(&self) -> bool {
        !matches!(&*self.inner.slot.borrow(), Slot::Empty)
    }

    pub fn has_exception(&self) -> bool {
        matches!(&*self.inner.slot.borrow(), Slot::Error(_))
    }

    /// Reset to `Empty` so the event can be sent on again. Panics if the
    /// event has never been sent, same as the source implementation's
    /// assertion against "re-reset()ing a fresh event".
    pub fn reset(&self) {
        let mut slot = self.inner.slot.borrow_mut();
        assert!(!matches!(&*slot, Slot::Empty), "Trying to reset a fresh event");
        *slot = Slot::Empty;
    }

    /// Deliver `value` to every current and future waiter. Scheduled as
    /// an immediate callback rather than waking synchronously, so `send`
    /// never suspends or even directly runs the sender out of its own
    /// stack frame (spec: "`send` never unschedules the current task").
    pub fn send(&self, value: T) -> Result<(), GreenError> {
        {
            let mut slot = self.inner.slot.borrow_mut();
            if !matches!(&*slot, Slot::Empty) {
                return Err(GreenError::DoubleSend);
            }
            *slot = Slot::Value(Rc::new(value));
        }
        self.wake_all();
        Ok(())
    }

    pub fn send_exception(&self, err: GreenError) -> Result<(), GreenError> {
        {
            let mut slot = self.inner.slot.borrow_mut();
            if !matches!(&*slot, Slot::Empty) {
                return Err(GreenError::DoubleSend);
            }
            *slot = Slot::Error(err);
        }
        self.wake_all();
        Ok(())
    }

    fn wake_all(&self) {
        let waiters: Vec<Waker> = self.inner.waiters.borrow_mut().drain(..).collect();
        reactor::with_reactor(|r| {
            for w in waiters {
                r.schedule_now(move || w.wake());
            }
        });
    }

    /// Suspend until `send`/`send_exception` is called, or return
    /// immediately if it already has been.
    pub async fn wait(&self) -> Result<Rc<T>, GreenError> {
        WaitFor { inner: self.inner.clone() }.await
    }
}

struct WaitFor<T> {
    inner: Rc<Inner<T>>,
}

impl<T> Future for WaitFor<T> {
    type Output = Result<Rc<T>, GreenError>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Result<Rc<T>, GreenError>> {
        match &*self.inner.slot.borrow() {
            Slot::Value(v) => Poll::Ready(Ok(v.clone())),
            Slot::Error(e) => Poll::Ready(Err(e.clone())),
            Slot::Empty => {
                self.inner.waiters.borrow_mut().push(cx.waker().clone());
                Poll::Pending
            }
        }
    }
}
