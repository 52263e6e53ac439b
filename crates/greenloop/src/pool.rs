//! `GreenPool`, `GreenPile`, and `GreenMap`: bounded-concurrency task
//! pools, modeled on `guv.greenpool`.

use std::cell::{Cell, RefCell};
use std::future::Future;
use std::rc::Rc;

use futures_core::Stream;
use std::pin::Pin;
use std::task::{Context, Poll};

use greenloop_core::task::current_task_id;
use greenloop_core::Task;

use crate::sync::{Queue, Semaphore};

struct Inner {
    size: Cell<usize>,
    sem: Semaphore,
    running: RefCell<std::collections::HashSet<u64>>,
    idle: crate::sync::TEvent,
}

/// A pool of tasks capped at `size` concurrently running.
///
/// `spawn` is reentrant: a task already tracked by this pool can call
/// `spawn` on it again without deadlocking even if the pool is at
/// capacity — `greenpool.py`'s `GreenPool.spawn` runs the nested call
/// inline on the calling task instead of waiting for a free slot, since
/// waiting would mean waiting on itself.
#[derive(Clone)]
pub struct GreenPool {
    inner: Rc<Inner>,
}

impl GreenPool {
    pub fn new(size: usize) -> Self {
        GreenPool {
            inner: Rc::new(Inner {
                size: Cell::new(size),
                sem: Semaphore::new(size as i64),
                running: RefCell::new(std::collections::HashSet::new()),
                idle: crate::sync::TEvent::new(),
            }),
        }
    }

    pub fn resize(&self, new_size: usize) {
        let delta = new_size as i64 - self.inner.size.get() as i64;
        self.inner.sem.adjust(delta);
        self.inner.size.set(new_size);
    }

    pub fn running(&self) -> usize {
        self.inner.running.borrow().len()
    }

    /// Slots currently available; zero or negative means the next
    /// `spawn()` will suspend the caller until one frees up.
    pub fn free(&self) -> i64 {
        self.inner.sem.value()
    }

    /// Run `future` in its own task, limited by this pool's concurrency.
    /// Fails with `GreenError::Cancelled` if the calling task is killed
    /// while waiting for a free slot.
    pub async fn spawn<F, T>(&self, future: F) -> Result<Task<T>, greenloop_core::GreenError>
    where
        F: Future<Output = T> + 'static,
        T: 'static,
    {
        let reentrant = self.inner.sem.locked()
            && current_task_id().is_some_and(|id| self.inner.running.borrow().contains(&id));

        if reentrant {
            // Run inline rather than deadlock waiting on a slot this very
            // task already occupies.
            return Ok(greenloop_core::spawn(future));
        }

        self.inner.sem.acquire().await?;
        let inner = self.inner.clone();
        let task = greenloop_core::spawn(async move { future.await });
        let task_id = task.id();
        inner.running.borrow_mut().insert(task_id);
        inner.idle.clear();

        let inner_for_link = inner.clone();
        task.link(move |_| {
            inner_for_link.sem.release();
            inner_for_link.running.borrow_mut().remove(&task_id);
            if inner_for_link.running.borrow().is_empty() {
                inner_for_link.idle.set();
            }
        });

        Ok(task)
    }

    /// Fire-and-forget version of [`spawn`](Self::spawn).
    pub async fn spawn_n<F>(&self, future: F)
    where
        F: Future<Output = ()> + 'static,
    {
        let _ = self.spawn(future).await;
    }

    /// Suspend until every task currently tracked by this pool has
    /// completed.
    ///
    /// Panics if called from a task this pool is itself tracking — such a
    /// task is waiting for itself to finish and would never wake, same as
    /// `greenpool.py`'s `waitall()` asserting
    /// `greenlet.getcurrent() not in self.coroutines_running`.
    pub async fn wait_all(&self) {
        if let Some(id) = current_task_id() {
            assert!(
                !self.inner.running.borrow().contains(&id),
                "wait_all() called from a task this pool is running: would never terminate"
            );
        }
        if self.running() > 0 {
            self.inner.idle.wait(None).await.ok();
        }
    }

    /// Apply `f` to every item of `iterable`, running up to this pool's
    /// concurrency limit at once, yielding each result in submission order
    /// as it completes. A driver task feeds items into the returned
    /// `GreenMap` one at a time, so the pool's semaphore naturally
    /// throttles how far ahead of the consumer it runs.
    pub fn starmap<F, Fut, T, I>(&self, f: F, iterable: I) -> GreenMap<T>
    where
        F: Fn(I::Item) -> Fut + 'static,
        Fut: Future<Output = T> + 'static,
        T: 'static,
        I: IntoIterator + 'static,
        I::Item: 'static,
    {
        let map = GreenMap::new(self.clone());
        let driver_map = map.clone();
        greenloop_core::spawn_detached(async move {
            for item in iterable {
                if driver_map.spawn(f(item)).await.is_err() {
                    // Calling task was killed while parked on a free slot;
                    // nobody is left to feed the map, so stop.
                    break;
                }
            }
        });
        map
    }
}

struct PileInner<T> {
    pool: GreenPool,
    waiters: Queue<Task<T>>,
    used: Cell<bool>,
    counter: Cell<usize>,
}

/// A set of related tasks processed with this pool's concurrency,
/// yielding each result in submission order as it becomes available
/// (modeled on `guv.greenpool.GreenPile`).
///
/// Cheap to clone — clones share the same underlying queue and counters,
/// which is what lets [`GreenPool::starmap`] hand one clone to a
/// background driver task while returning another as the consumer-facing
/// stream.
pub struct GreenPile<T> {
    inner: Rc<PileInner<T>>,
}

impl<T> Clone for GreenPile<T> {
    fn clone(&self) -> Self {
        GreenPile { inner: self.inner.clone() }
    }
}

impl<T: 'static> GreenPile<T> {
    pub fn new(pool: GreenPool) -> Self {
        GreenPile {
            inner: Rc::new(PileInner {
                pool,
                waiters: Queue::unbounded(),
                used: Cell::new(false),
                counter: Cell::new(0),
            }),
        }
    }

    pub async fn spawn<F>(&self, future: F) -> Result<(), greenloop_core::GreenError>
    where
        F: Future<Output = T> + 'static,
    {
        self.inner.used.set(true);
        self.inner.counter.set(self.inner.counter.get() + 1);
        let task = match self.inner.pool.spawn(future).await {
            Ok(task) => task,
            Err(e) => {
                self.inner.counter.set(self.inner.counter.get() - 1);
                return Err(e);
            }
        };
        self.inner.waiters.put(task).await;
        Ok(())
    }

    /// The next completed result in submission order, or `None` once
    /// every spawned task has been consumed.
    pub async fn next(&self) -> Option<std::rc::Rc<T>> {
        if self.inner.counter.get() == 0 && self.inner.used.get() {
            return None;
        }
        let task = self.inner.waiters.get().await;
        self.inner.counter.set(self.inner.counter.get() - 1);
        Some(task.wait().await)
    }
}

/// Like [`GreenPile`], but exposed as a `Stream` instead of a manual
/// `next()` loop — Rust has no blocking-generator equivalent to iterate
/// a `GreenPile` with a `for` loop, so the `Stream` impl is the idiomatic
/// substitute.
pub struct GreenMap<T> {
    pile: GreenPile<T>,
}

impl<T> Clone for GreenMap<T> {
    fn clone(&self) -> Self {
        GreenMap { pile: self.pile.clone() }
    }
}

impl<T: 'static> GreenMap<T> {
    pub fn new(pool: GreenPool) -> Self {
        GreenMap { pile: GreenPile::new(pool) }
    }

    pub async fn spawn<F>(&self, future: F) -> Result<(), greenloop_core::GreenError>
    where
        F: Future<Output = T> + 'static,
    {
        self.pile.spawn(future).await
    }
}

impl<T: 'static> Stream for GreenMap<T> {
    type Item = std::rc::Rc<T>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let fut = self.pile.next();
        futures_poll_once(fut, cx)
    }
}

/// Poll a freshly-constructed future exactly once. Safe here because
/// `GreenMap::poll_next` builds a new `next()` future on every call — it
/// never has state straddling two `poll_next` invocations — so there is
/// nothing to keep pinned across calls.
fn futures_poll_once<F: Future>(future: F, cx: &mut Context<'_>) -> Poll<F::Output> {
    let mut future = std::pin::pin!(future);
    future.as_mut().poll(cx)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pool_limits_concurrency() {
        greenloop_core::block_on(async {
            let pool = GreenPool::new(2);
            let order = Rc::new(RefCell::new(Vec::new()));

            let mut tasks = Vec::new();
            for i in 0..4u32 {
                let order2 = order.clone();
                let t = pool
                    .spawn(async move {
                        order2.borrow_mut().push(i);
                    })
                    .await
                    .unwrap();
                tasks.push(t);
            }
            for t in tasks {
                let _ = t.wait().await;
            }
            assert_eq!(order.borrow().len(), 4);
        });
    }

    #[test]
    fn wait_all_returns_once_pool_drains() {
        greenloop_core::block_on(async {
            let pool = GreenPool::new(4);
            for _ in 0..3 {
                pool.spawn_n(async {}).await;
            }
            pool.wait_all().await;
            assert_eq!(pool.running(), 0);
        });
    }

    #[test]
    #[should_panic(expected = "would never terminate")]
    fn wait_all_from_pool_member_panics() {
        greenloop_core::block_on(async {
            let pool = GreenPool::new(2);
            let pool2 = pool.clone();
            let t = pool
                .spawn(async move {
                    pool2.wait_all().await;
                })
                .await
                .unwrap();
            let _ = t.wait().await;
        });
    }

    #[test]
    fn starmap_applies_fn_to_each_item_in_order() {
        greenloop_core::block_on(async {
            let pool = GreenPool::new(2);
            let mut stream = pool.starmap(|i: u32| async move { i * 10 }, 0..4u32);

            let mut results = Vec::new();
            while let Some(v) = drain_next(&mut stream).await {
                results.push(*v);
            }
            assert_eq!(results, vec![0, 10, 20, 30]);
        });
    }

    /// Poll a `Stream` to its next item without pulling in a `StreamExt`
    /// dependency just for tests.
    async fn drain_next<S: Stream + Unpin>(stream: &mut S) -> Option<S::Item> {
        std::future::poll_fn(|cx| Pin::new(&mut *stream).poll_next(cx)).await
    }

    #[test]
    fn pile_yields_results_as_submitted() {
        greenloop_core::block_on(async {
            let pool = GreenPool::new(10);
            let pile = GreenPile::new(pool);
            for i in 0..3 {
                pile.spawn(async move { i }).await.unwrap();
            }
            let mut results = Vec::new();
            while let Some(r) = pile.next().await {
                results.push(*r);
            }
            assert_eq!(results, vec![0, 1, 2]);
        });
    }
}
