//! `Semaphore` and `BoundedSemaphore`, modeled on `guv.semaphore`.
//!
//! Waiters are served FIFO: `acquire` parks at the back of a wait queue
//! and `release` wakes exactly the head of that queue, so no waiter can
//! be starved by a stream of later arrivals acquiring the freed slot
//! first.

use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::future::Future;
use std::pin::Pin;
use std::rc::Rc;
use std::task::{Context, Poll, Waker};

use greenloop_core::reactor;
use greenloop_core::{is_current_killed, GreenError};

struct Inner {
    counter: Cell<i64>,
    waiters: RefCell<VecDeque<(u64, Waker)>>,
    next_waiter_id: Cell<u64>,
}

impl Inner {
    /// Hand a unit already reserved for a since-cancelled waiter on to the
    /// next one in line, same as a normal `release()`.
    fn release_unit(&self) {
        self.counter.set(self.counter.get() + 1);
        if let Some((_, w)) = self.waiters.borrow_mut().pop_front() {
            reactor::with_reactor(|r| r.schedule_now(move || w.wake()));
        }
    }
}

/// A counting semaphore. `counter` may go negative — that count is the
/// number of tasks currently parked in `acquire()`, mirroring
/// `guv.semaphore.Semaphore.balance`.
#[derive(Clone)]
pub struct Semaphore {
    inner: Rc<Inner>,
}

impl Semaphore {
    pub fn new(value: i64) -> Self {
        Semaphore {
            inner: Rc::new(Inner {
                counter: Cell::new(value),
                waiters: RefCell::new(VecDeque::new()),
                next_waiter_id: Cell::new(0),
            }),
        }
    }

    /// Current count. Zero or negative means the next `acquire()` call
    /// will block.
    pub fn value(&self) -> i64 {
        self.inner.counter.get()
    }

    pub fn locked(&self) -> bool {
        self.inner.counter.get() <= 0
    }

    /// Take one unit, suspending until one is available. Returns
    /// `Err(GreenError::Cancelled)` if the calling task is killed before or
    /// while parked, in which case no unit is held — either the reservation
    /// is given back, or if a real `release()` already granted it, it is
    /// re-released to the next waiter.
    pub async fn acquire(&self) -> Result<(), GreenError> {
        if is_current_killed() {
            return Err(GreenError::Cancelled);
        }
        self.inner.counter.set(self.inner.counter.get() - 1);
        if self.inner.counter.get() < 0 {
            Acquire { inner: self.inner.clone(), parked: false, id: None }.await
        } else {
            Ok(())
        }
    }

    /// Adjust the available count by `delta`, waking up to `delta` queued
    /// waiters if `delta` is positive. Used by [`crate::pool::GreenPool::resize`]
    /// to grow or shrink a pool's capacity without going through
    /// individual `acquire`/`release` calls.
    pub fn adjust(&self, delta: i64) {
        if delta == 0 {
            return;
        }
        self.inner.counter.set(self.inner.counter.get() + delta);
        if delta > 0 {
            for _ in 0..delta {
                match self.inner.waiters.borrow_mut().pop_front() {
                    Some(w) => reactor::with_reactor(|r| r.schedule_now(move || w.wake())),
                    None => break,
                }
            }
        }
    }

    /// Release one unit, waking the longest-waiting `acquire()` if any.
    /// The unit being released is handed directly to that waiter — the
    /// counter only records how many units are uncommitted, not which
    /// waiter owns which release, so the wake itself (not a re-check of
    /// the counter) is what tells a waiter its turn has come.
    pub fn release(&self) {
        self.inner.counter.set(self.inner.counter.get() + 1);
        if let Some((_, w)) = self.inner.waiters.borrow_mut().pop_front() {
            reactor::with_reactor(|r| r.schedule_now(move || w.wake()));
        }
    }
}

struct Acquire {
    inner: Rc<Inner>,
    /// Set once this future has registered itself in the wait queue, so a
    /// spurious re-poll before any wake doesn't enqueue it twice and a
    /// poll after the real wake is unconditionally `Ready`.
    parked: bool,
    /// This waiter's id in `inner.waiters`, assigned on first park. Lets a
    /// cancelled `Acquire` find and remove exactly its own entry rather
    /// than guessing from a bare `Waker`.
    id: Option<u64>,
}

impl Future for Acquire {
    type Output = Result<(), GreenError>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Result<(), GreenError>> {
        if is_current_killed() {
            if let Some(id) = self.id {
                let mut waiters = self.inner.waiters.borrow_mut();
                if let Some(pos) = waiters.iter().position(|(w_id, _)| *w_id == id) {
                    waiters.remove(pos);
                    drop(waiters);
                    self.inner.counter.set(self.inner.counter.get() + 1);
                } else {
                    drop(waiters);
                    self.inner.release_unit();
                }
            }
            return Poll::Ready(Err(GreenError::Cancelled));
        }
        if self.parked {
            return Poll::Ready(Ok(()));
        }
        self.parked = true;
        let id = self.inner.next_waiter_id.get();
        self.inner.next_waiter_id.set(id + 1);
        self.id = Some(id);
        self.inner.waiters.borrow_mut().push_back((id, cx.waker().clone()));
        Poll::Pending
    }
}

/// A semaphore that additionally enforces an upper bound: `release()`
/// beyond the original capacity is an error rather than silently growing
/// the count (`guv.semaphore.BoundedSemaphore`).
#[derive(Clone)]
pub struct BoundedSemaphore {
    sem: Semaphore,
    capacity: i64,
}

impl BoundedSemaphore {
    pub fn new(capacity: i64) -> Self {
        BoundedSemaphore { sem: Semaphore::new(capacity), capacity }
    }

    pub async fn acquire(&self) -> Result<(), GreenError> {
        self.sem.acquire().await
    }

    pub fn release(&self) -> Result<(), GreenError> {
        if self.sem.value() >= self.capacity {
            return Err(GreenError::Overflow);
        }
        self.sem.release();
        Ok(())
    }

    pub fn value(&self) -> i64 {
        self.sem.value()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::rc::Rc as StdRc;
    use std::sync::Mutex;

    #[test]
    fn acquire_release_roundtrip() {
        greenloop_core::block_on(async {
            let sem = Semaphore::new(1);
            sem.acquire().await.unwrap();
            assert_eq!(sem.value(), 0);
            sem.release();
            assert_eq!(sem.value(), 1);
        });
    }

    #[test]
    fn second_acquire_blocks_until_release() {
        greenloop_core::block_on(async {
            let sem = Semaphore::new(1);
            sem.acquire().await.unwrap();

            let sem2 = sem.clone();
            let t = greenloop_core::spawn(async move {
                sem2.acquire().await.unwrap();
                1
            });
            greenloop_core::trampoline::yield_now(true).await;
            assert_eq!(sem.value(), -1);
            sem.release();
            assert_eq!(*t.wait().await, 1);
        });
    }

    #[test]
    fn fifo_order_among_waiters() {
        greenloop_core::block_on(async {
            let sem = Semaphore::new(0);
            let order: StdRc<Mutex<Vec<u32>>> = StdRc::new(Mutex::new(Vec::new()));

            let mut tasks = Vec::new();
            for id in 0..3u32 {
                let sem2 = sem.clone();
                let order2 = order.clone();
                tasks.push(greenloop_core::spawn(async move {
                    sem2.acquire().await.unwrap();
                    order2.lock().unwrap().push(id);
                }));
                greenloop_core::trampoline::yield_now(true).await;
            }

            sem.release();
            sem.release();
            sem.release();
            for t in tasks {
                let _ = t.wait().await;
            }
            assert_eq!(*order.lock().unwrap(), vec![0, 1, 2]);
        });
    }

    #[test]
    fn bounded_semaphore_rejects_overrelease() {
        let sem = BoundedSemaphore::new(2);
        assert!(matches!(sem.release(), Err(GreenError::Overflow)));
    }

    #[test]
    fn killed_while_parked_leaves_no_stale_waiter() {
        greenloop_core::block_on(async {
            let sem = Semaphore::new(0);
            let sem2 = sem.clone();
            let t = greenloop_core::spawn(async move { sem2.acquire().await });
            greenloop_core::trampoline::yield_now(true).await;
            assert_eq!(sem.inner.waiters.borrow().len(), 1);

            t.kill();
            let result = t.wait().await;
            assert!(matches!(*result, Err(GreenError::Cancelled)));
            assert_eq!(sem.inner.waiters.borrow().len(), 0);
            assert_eq!(sem.value(), 0);

            // The unit a real release() sends afterwards must reach a
            // fresh waiter rather than being silently swallowed by the
            // already-cancelled one.
            sem.release();
            assert_eq!(sem.value(), 1);
            sem.acquire().await.unwrap();
        });
    }
}
