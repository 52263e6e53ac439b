//! `TEvent`: the `threading.Event`-shaped flag, modeled on `guv.event.TEvent`.
//!
//! Unlike [`super::event::Event`], a `TEvent` carries no payload and can be
//! `set`/`clear`ed repeatedly; `wait()` just blocks until the flag reads
//! true.

use std::cell::{Cell, RefCell};
use std::future::Future;
use std::pin::Pin;
use std::rc::Rc;
use std::task::{Context, Poll, Waker};
use std::time::Duration;

use greenloop_core::reactor;
use greenloop_core::GreenError;

struct Inner {
    flag: Cell<bool>,
    waiters: RefCell<Vec<Waker>>,
}

#[derive(Clone)]
pub struct TEvent {
    inner: Rc<Inner>,
}

impl Default for TEvent {
    fn default() -> Self {
        Self::new()
    }
}

impl TEvent {
    pub fn new() -> Self {
        TEvent { inner: Rc::new(Inner { flag: Cell::new(false), waiters: RefCell::new(Vec::new()) }) }
    }

    pub fn is_set(&self) -> bool {
        self.inner.flag.get()
    }

    /// Set the flag and wake every current waiter. Tasks that call
    /// `wait()` after this point simply see the flag already true.
    pub fn set(&self) {
        self.inner.flag.set(true);
        let waiters: Vec<Waker> = self.inner.waiters.borrow_mut().drain(..).collect();
        reactor::with_reactor(|r| {
            for w in waiters {
                r.schedule_now(move || w.wake());
            }
        });
    }

    pub fn clear(&self) {
        self.inner.flag.set(false);
    }

    /// Suspend until `set()`, or until `timeout` elapses, whichever
    /// comes first. Returns the flag's value at that point, same as
    /// `threading.Event.wait`.
    pub async fn wait(&self, timeout: Option<Duration>) -> Result<bool, GreenError> {
        if self.inner.flag.get() {
            return Ok(true);
        }
        match timeout {
            None => {
                WaitSet { inner: self.inner.clone() }.await;
                Ok(true)
            }
            Some(d) => match crate::timer::with_timeout(d, WaitSet { inner: self.inner.clone() }).await {
                Ok(()) => Ok(true),
                Err(GreenError::Timeout) => Ok(self.inner.flag.get()),
                Err(e) => Err(e),
            },
        }
    }
}

struct WaitSet {
    inner: Rc<Inner>,
}

impl Future for WaitSet {
    type Output = ();

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<()> {
        if self.inner.flag.get() {
            Poll::Ready(())
        } else {
            self.inner.waiters.borrow_mut().push(cx.waker().clone());
            Poll::Pending
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wait_returns_immediately_once_set() {
        greenloop_core::block_on(async {
            let e = TEvent::new();
            e.set();
            assert!(e.wait(None).await.unwrap());
        });
    }

    #[test]
    fn waiter_wakes_on_set() {
        greenloop_core::block_on(async {
            let e = TEvent::new();
            let e2 = e.clone();
            let t = greenloop_core::spawn(async move { e2.wait(None).await.unwrap() });
            greenloop_core::trampoline::yield_now(true).await;
            e.set();
            assert!(*t.wait().await);
        });
    }

    #[test]
    fn wait_with_timeout_returns_false_if_unset() {
        greenloop_core::block_on(async {
            let e = TEvent::new();
            let result = e.wait(Some(Duration::from_millis(5))).await.unwrap();
            assert!(!result);
        });
    }

    #[test]
    fn clear_resets_flag() {
        let e = TEvent::new();
        e.set();
        e.clear();
        assert!(!e.is_set());
    }
}
