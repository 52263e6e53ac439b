//! `Queue<T>`: a FIFO channel between tasks, modeled on `guv.queue.LightQueue`.
//!
//! `put` suspends the caller only when the queue is both bounded and
//! full; `get` suspends only when it's empty. Pending `get`s are served
//! FIFO, same ordering guarantee as [`super::semaphore::Semaphore`].

use std::cell::RefCell;
use std::collections::VecDeque;
use std::future::Future;
use std::pin::Pin;
use std::rc::Rc;
use std::task::{Context, Poll, Waker};

use greenloop_core::reactor;
use greenloop_core::GreenError;

struct Inner<T> {
    items: RefCell<VecDeque<T>>,
    capacity: Option<usize>,
    getters: RefCell<VecDeque<Waker>>,
    putters: RefCell<VecDeque<Waker>>,
}

pub struct Queue<T> {
    inner: Rc<Inner<T>>,
}

impl<T> Clone for Queue<T> {
    fn clone(&self) -> Self {
        Queue { inner: self.inner.clone() }
    }
}

impl<T> Queue<T> {
    pub fn unbounded() -> Self {
        Queue {
            inner: Rc::new(Inner {
                items: RefCell::new(VecDeque::new()),
                capacity: None,
                getters: RefCell::new(VecDeque::new()),
                putters: RefCell::new(VecDeque::new()),
            }),
        }
    }

    pub fn bounded(capacity: usize) -> Self {
        Queue {
            inner: Rc::new(Inner {
                items: RefCell::new(VecDeque::new()),
                capacity: Some(capacity),
                getters: RefCell::new(VecDeque::new()),
                putters: RefCell::new(VecDeque::new()),
            }),
        }
    }

    pub fn len(&self) -> usize {
        self.inner.items.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn is_full(&self) -> bool {
        matches!(self.inner.capacity, Some(cap) if self.len() >= cap)
    }

    /// Enqueue `item`, suspending the caller only if the queue is bounded
    /// and already at capacity.
    pub async fn put(&self, item: T) {
        if self.is_full() {
            PutWait { inner: self.inner.clone(), parked: false }.await;
        }
        self.inner.items.borrow_mut().push_back(item);
        if let Some(w) = self.inner.getters.borrow_mut().pop_front() {
            reactor::with_reactor(|r| r.schedule_now(move || w.wake()));
        }
    }

    /// Try to enqueue without suspending; fails if bounded and full.
    pub fn put_nowait(&self, item: T) -> Result<(), GreenError> {
        if self.is_full() {
            return Err(GreenError::Overflow);
        }
        self.inner.items.borrow_mut().push_back(item);
        if let Some(w) = self.inner.getters.borrow_mut().pop_front() {
            reactor::with_reactor(|r| r.schedule_now(move || w.wake()));
        }
        Ok(())
    }

    /// Dequeue the oldest item, suspending the caller if the queue is
    /// currently empty.
    pub async fn get(&self) -> T {
        loop {
            if let Some(item) = self.inner.items.borrow_mut().pop_front() {
                if let Some(w) = self.inner.putters.borrow_mut().pop_front() {
                    reactor::with_reactor(|r| r.schedule_now(move || w.wake()));
                }
                return item;
            }
            GetWait { inner: self.inner.clone(), parked: false }.await;
        }
    }
}

struct GetWait<T> {
    inner: Rc<Inner<T>>,
    parked: bool,
}

impl<T> Future for GetWait<T> {
    type Output = ();

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<()> {
        if self.parked {
            return Poll::Ready(());
        }
        self.parked = true;
        self.inner.getters.borrow_mut().push_back(cx.waker().clone());
        Poll::Pending
    }
}

struct PutWait<T> {
    inner: Rc<Inner<T>>,
    parked: bool,
}

impl<T> Future for PutWait<T> {
    type Output = ();

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<()> {
        if self.parked {
            return Poll::Ready(());
        }
        self.parked = true;
        self.inner.putters.borrow_mut().push_back(cx.waker().clone());
        Poll::Pending
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn put_then_get_fifo_order() {
        greenloop_core::block_on(async {
            let q = Queue::unbounded();
            q.put(1).await;
            q.put(2).await;
            q.put(3).await;
            assert_eq!(q.get().await, 1);
            assert_eq!(q.get().await, 2);
            assert_eq!(q.get().await, 3);
        });
    }

    #[test]
    fn get_blocks_until_put() {
        greenloop_core::block_on(async {
            let q: Queue<u32> = Queue::unbounded();
            let q2 = q.clone();
            let t = greenloop_core::spawn(async move { q2.get().await });
            greenloop_core::trampoline::yield_now(true).await;
            q.put(99).await;
            assert_eq!(*t.wait().await, 99);
        });
    }

    #[test]
    fn bounded_put_nowait_rejects_when_full() {
        let q = Queue::bounded(1);
        q.put_nowait(1).unwrap();
        assert!(matches!(q.put_nowait(2), Err(GreenError::Overflow)));
    }

    #[test]
    fn bounded_put_blocks_until_space_frees() {
        greenloop_core::block_on(async {
            let q = Queue::bounded(1);
            q.put(1).await;

            let q2 = q.clone();
            let t = greenloop_core::spawn(async move {
                q2.put(2).await;
            });
            greenloop_core::trampoline::yield_now(true).await;
            assert_eq!(q.len(), 1);

            let _ = q.get().await;
            let _ = t.wait().await;
            assert_eq!(q.len(), 1);
        });
    }
}
