//! The hub: readiness watchers, timers, and the immediate-callback queue.
//!
//! One `Reactor` per thread, created lazily and confined to a
//! `thread_local!` (spec §9 Design Notes: "Module-global thread-local hub
//! singleton ... replace with an explicit per-thread handle obtained by
//! `current_hub()`"). Cross-thread use is impossible by construction: the
//! value simply doesn't exist on any other thread's storage.

use std::cell::{Cell, RefCell};
use std::collections::BTreeMap;
use std::io;
use std::os::unix::io::RawFd;
use std::sync::atomic::{AtomicU64, Ordering};
use std::task::{Poll, Waker};
use std::time::{Duration, Instant};

use polling::{Event, Events, Poller};
use slab::Slab;

use crate::error::GreenError;

/// Which half of a full-duplex fd a watcher cares about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    Read,
    Write,
}

/// Opaque handle returned by [`Reactor::register_io`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IoKey(usize);

/// Opaque handle returned by [`Reactor::schedule_timer`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimerKey(u64);

/// Per-fd bookkeeping: OS poller registration state plus one watcher slot
/// per direction. At most one watcher may be active per (fd, direction) —
/// spec invariant, enforced in `add_watcher`.
struct Source {
    raw_fd: RawFd,
    registered: bool,
    read_active: bool,
    write_active: bool,
    read_waker: Option<Waker>,
    write_waker: Option<Waker>,
    read_ready: bool,
    write_ready: bool,
    /// Set by `notify_opened` when this fd's identity is stale; any
    /// waiting watcher is woken and sees `GreenError::Closed` instead of
    /// readiness.
    closed: bool,
}

struct TimerState {
    /// Ordered by (deadline, id) so expiry scanning is a prefix walk.
    heap: BTreeMap<(Instant, u64), Waker>,
    deadlines: std::collections::HashMap<u64, Instant>,
}

type ImmediateCallback = Box<dyn FnOnce() + 'static>;

pub struct Reactor {
    poller: Poller,
    sources: RefCell<Slab<Source>>,
    timers: RefCell<TimerState>,
    timer_id: AtomicU64,
    events: RefCell<Events>,
    immediate: RefCell<std::collections::VecDeque<ImmediateCallback>>,
    /// Set while the hub is inside `fire_timers`/`poll_io`/`drain_immediate`,
    /// used to reject re-entrant blocking calls (spec: "the hub never runs
    /// from within a task (detected and rejected)").
    in_hub: Cell<bool>,
}

thread_local! {
    static REACTOR: Reactor = Reactor::new().expect("failed to create OS poller for this thread");
}

/// Run `f` with this thread's reactor. This is the only way to reach the
/// reactor — there is no process-global singleton (see module docs).
pub fn with_reactor<R>(f: impl FnOnce(&Reactor) -> R) -> R {
    REACTOR.with(f)
}

impl Reactor {
    fn new() -> io::Result<Self> {
        Ok(Reactor {
            poller: Poller::new()?,
            sources: RefCell::new(Slab::new()),
            timers: RefCell::new(TimerState {
                heap: BTreeMap::new(),
                deadlines: std::collections::HashMap::new(),
            }),
            timer_id: AtomicU64::new(0),
            events: RefCell::new(Events::new()),
            immediate: RefCell::new(std::collections::VecDeque::new()),
            in_hub: Cell::new(false),
        })
    }

    /// True while a reactor-driven callback (timer fire, IO wake, immediate
    /// drain) is on the stack. Blocking primitives assert against this.
    pub fn is_in_hub(&self) -> bool {
        self.in_hub.get()
    }

    // ── IO registration ────────────────────────────────────────────

    pub fn register_io(&self, fd: RawFd) -> IoKey {
        let mut sources = self.sources.borrow_mut();
        let key = sources.insert(Source {
            raw_fd: fd,
            registered: false,
            read_active: false,
            write_active: false,
            read_waker: None,
            write_waker: None,
            read_ready: false,
            write_ready: false,
            closed: false,
        });
        IoKey(key)
    }

    pub fn deregister_io(&self, key: IoKey) {
        let mut sources = self.sources.borrow_mut();
        if sources.contains(key.0) {
            let source = sources.remove(key.0);
            if source.registered {
                let borrowed = unsafe { std::os::fd::BorrowedFd::borrow_raw(source.raw_fd) };
                let _ = self.poller.delete(&borrowed);
            }
        }
    }

    /// A new fd just came back from the OS under an identity we may have
    /// tracked before (spec §4.A `notify_opened`, §9 best-effort caveat:
    /// we can only catch this when the *caller* tells us, never on our
    /// own). Wakes any parked watcher on this raw fd with `Closed`.
    pub fn notify_opened(&self, fd: RawFd) {
        let mut sources = self.sources.borrow_mut();
        let mut wakers = Vec::new();
        for (_, source) in sources.iter_mut() {
            if source.raw_fd == fd {
                source.closed = true;
                if let Some(w) = source.read_waker.take() {
                    wakers.push(w);
                }
                if let Some(w) = source.write_waker.take() {
                    wakers.push(w);
                }
            }
        }
        drop(sources);
        for w in wakers {
            w.wake();
        }
    }

    fn poller_sync(&self, sources: &mut Slab<Source>, key: IoKey) {
        if let Some(source) = sources.get_mut(key.0) {
            // event key encodes the slab index so poll_io can route back.
            let interest = Event::new(key.0, source.read_active, source.write_active);
            if source.registered {
                let borrowed = unsafe { std::os::fd::BorrowedFd::borrow_raw(source.raw_fd) };
                let _ = self.poller.modify(&borrowed, interest);
            } else if source.read_active || source.write_active {
                unsafe {
                    let _ = self.poller.add(source.raw_fd, interest);
                }
                source.registered = true;
            }
        }
    }

    /// Register a watcher for `dir` on `key`. Fails with
    /// `DuplicateWatcher` if one is already active (spec §4.A).
    pub fn add_watcher(&self, key: IoKey, dir: Direction) -> Result<(), GreenError> {
        let mut sources = self.sources.borrow_mut();
        let source = sources
            .get_mut(key.0)
            .ok_or_else(|| GreenError::Io(io::Error::from(io::ErrorKind::NotFound)))?;
        match dir {
            Direction::Read => {
                if source.read_active {
                    return Err(GreenError::DuplicateWatcher);
                }
                source.read_active = true;
            }
            Direction::Write => {
                if source.write_active {
                    return Err(GreenError::DuplicateWatcher);
                }
                source.write_active = true;
            }
        }
        self.poller_sync(&mut sources, key);
        log::trace!("watcher added: fd={:?} key={:?} dir={:?}", sources[key.0].raw_fd, key, dir);
        Ok(())
    }

    /// Remove a watcher. Safe to call exactly once per successful
    /// `add_watcher`; idempotent beyond that (spec: "must be called
    /// exactly once per successful add", but removal itself tolerates
    /// being invoked while the loop is mid-iteration over a snapshot).
    pub fn remove_watcher(&self, key: IoKey, dir: Direction) {
        log::trace!("watcher removed: key={:?} dir={:?}", key, dir);
        let mut sources = self.sources.borrow_mut();
        if let Some(source) = sources.get_mut(key.0) {
            match dir {
                Direction::Read => {
                    source.read_active = false;
                    source.read_waker = None;
                }
                Direction::Write => {
                    source.write_active = false;
                    source.write_waker = None;
                }
            }
            if source.registered && !source.read_active && !source.write_active {
                let borrowed = unsafe { std::os::fd::BorrowedFd::borrow_raw(source.raw_fd) };
                let _ = self.poller.delete(&borrowed);
                source.registered = false;
            } else {
                self.poller_sync(&mut sources, key);
            }
        }
    }

    /// Poll readiness for a watcher registered with `add_watcher`. Stores
    /// `waker` for the next wake-up if not yet ready.
    pub fn poll_watcher(
        &self,
        key: IoKey,
        dir: Direction,
        waker: Waker,
    ) -> Poll<Result<(), GreenError>> {
        let mut sources = self.sources.borrow_mut();
        let source = match sources.get_mut(key.0) {
            Some(s) => s,
            None => return Poll::Ready(Err(GreenError::Closed)),
        };
        if source.closed {
            return Poll::Ready(Err(GreenError::Closed));
        }
        match dir {
            Direction::Read => {
                if source.read_ready {
                    source.read_ready = false;
                    return Poll::Ready(Ok(()));
                }
                source.read_waker = Some(waker);
            }
            Direction::Write => {
                if source.write_ready {
                    source.write_ready = false;
                    return Poll::Ready(Ok(()));
                }
                source.write_waker = Some(waker);
            }
        }
        Poll::Pending
    }

    // ── Timers ──────────────────────────────────────────────────────

    pub fn schedule_timer(&self, delay: Duration) -> TimerKey {
        let id = self.timer_id.fetch_add(1, Ordering::Relaxed);
        let deadline = Instant::now() + delay;
        self.timers.borrow_mut().deadlines.insert(id, deadline);
        TimerKey(id)
    }

    /// Cancellation is idempotent: a timer already fired (and thus already
    /// removed from both maps) is simply not found, which is a no-op.
    pub fn cancel_timer(&self, key: TimerKey) {
        let mut state = self.timers.borrow_mut();
        if let Some(deadline) = state.deadlines.remove(&key.0) {
            state.heap.remove(&(deadline, key.0));
        }
    }

    pub fn poll_timer(&self, key: TimerKey, waker: Waker) -> Poll<()> {
        let mut state = self.timers.borrow_mut();
        let deadline = match state.deadlines.get(&key.0) {
            Some(&d) => d,
            None => return Poll::Ready(()),
        };
        if Instant::now() >= deadline {
            state.deadlines.remove(&key.0);
            state.heap.remove(&(deadline, key.0));
            return Poll::Ready(());
        }
        state.heap.insert((deadline, key.0), waker);
        Poll::Pending
    }

    /// Time until the earliest pending timer, if any. Used to cap the
    /// reactor's poll timeout (spec step 3).
    pub fn next_timer_delay(&self) -> Option<Duration> {
        let state = self.timers.borrow();
        let now = Instant::now();
        state
            .heap
            .keys()
            .next()
            .map(|(deadline, _)| deadline.saturating_duration_since(now))
    }

    /// Fire every timer whose deadline has passed (spec loop step 1).
    /// A timer scheduled for "now" only enters the heap on its first
    /// `poll_timer` call, so it is never fired in the same iteration it
    /// was created in — matching "timers scheduled for now or in the
    /// past fire on the next iteration, never the current one".
    pub fn fire_timers(&self) {
        self.in_hub.set(true);
        let now = Instant::now();
        let mut wakers = Vec::new();
        {
            let mut state = self.timers.borrow_mut();
            loop {
                match state.heap.keys().next().copied() {
                    Some((deadline, id)) if deadline <= now => {
                        let waker = state.heap.remove(&(deadline, id)).unwrap();
                        state.deadlines.remove(&id);
                        wakers.push(waker);
                    }
                    _ => break,
                }
            }
        }
        self.in_hub.set(false);
        if !wakers.is_empty() {
            log::debug!("{} timer(s) fired", wakers.len());
        }
        for w in wakers {
            w.wake();
        }
    }

    // ── Immediate callbacks ─────────────────────────────────────────

    /// Append to the immediate-callback FIFO. Fires on the *next* loop
    /// iteration's `drain_immediate` call, before I/O polling (spec
    /// §4.A `schedule_now`).
    pub fn schedule_now(&self, f: impl FnOnce() + 'static) {
        self.immediate.borrow_mut().push_back(Box::new(f));
    }

    /// Run every callback queued *before* this call. Callbacks that
    /// `schedule_now` themselves during the drain run next iteration,
    /// not this one (spec: "does not starve I/O").
    pub fn drain_immediate(&self) {
        let due: Vec<ImmediateCallback> = {
            let mut q = self.immediate.borrow_mut();
            let n = q.len();
            q.drain(..n).collect()
        };
        self.in_hub.set(true);
        for cb in due {
            cb();
        }
        self.in_hub.set(false);
    }

    pub fn has_immediate(&self) -> bool {
        !self.immediate.borrow().is_empty()
    }

    pub fn has_watchers(&self) -> bool {
        self.sources
            .borrow()
            .iter()
            .any(|(_, s)| s.read_active || s.write_active)
    }

    pub fn has_timers(&self) -> bool {
        !self.timers.borrow().deadlines.is_empty()
    }

    // ── OS poll ─────────────────────────────────────────────────────

    /// Poll the OS for readiness, waking any watcher whose interest was
    /// satisfied (spec loop steps 4-5). Retries transparently on `EINTR`
    /// (spec §4.A failure semantics); any other poll failure is fatal and
    /// propagates to the caller.
    pub fn poll_io(&self, timeout: Option<Duration>) -> io::Result<()> {
        log::trace!("loop iteration: polling OS for readiness, timeout={:?}", timeout);
        let event_list: Vec<(usize, bool, bool)> = loop {
            let mut events = self.events.borrow_mut();
            events.clear();
            match self.poller.wait(&mut events, timeout) {
                Ok(_) => {
                    break events.iter().map(|e| (e.key, e.readable, e.writable)).collect();
                }
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            }
        };

        self.in_hub.set(true);
        let mut wakers = Vec::new();
        {
            let mut sources = self.sources.borrow_mut();
            for (key, readable, writable) in event_list {
                if let Some(source) = sources.get_mut(key) {
                    if readable {
                        source.read_ready = true;
                        if let Some(w) = source.read_waker.take() {
                            wakers.push(w);
                        }
                    }
                    if writable {
                        source.write_ready = true;
                        if let Some(w) = source.write_waker.take() {
                            wakers.push(w);
                        }
                    }
                }
            }
        }
        self.in_hub.set(false);
        if !wakers.is_empty() {
            log::trace!("loop iteration: {} fd(s) woken", wakers.len());
        }
        for w in wakers {
            w.wake();
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicBool;
    use std::sync::Arc;

    fn noop_waker() -> Waker {
        use std::task::{RawWaker, RawWakerVTable};
        fn clone(_: *const ()) -> RawWaker {
            raw()
        }
        fn noop(_: *const ()) {}
        fn raw() -> RawWaker {
            static VTABLE: RawWakerVTable = RawWakerVTable::new(clone, noop, noop, noop);
            RawWaker::new(std::ptr::null(), &VTABLE)
        }
        unsafe { Waker::from_raw(raw()) }
    }

    #[test]
    fn timer_fires_after_deadline() {
        with_reactor(|r| {
            let key = r.schedule_timer(Duration::from_millis(0));
            std::thread::sleep(Duration::from_millis(2));
            assert_eq!(r.poll_timer(key, noop_waker()), Poll::Ready(()));
        });
    }

    #[test]
    fn timer_pending_before_deadline() {
        with_reactor(|r| {
            let key = r.schedule_timer(Duration::from_secs(5));
            assert_eq!(r.poll_timer(key, noop_waker()), Poll::Pending);
            r.cancel_timer(key);
        });
    }

    #[test]
    fn cancel_is_idempotent() {
        with_reactor(|r| {
            let key = r.schedule_timer(Duration::from_secs(5));
            r.cancel_timer(key);
            r.cancel_timer(key); // must not panic
            assert_eq!(r.poll_timer(key, noop_waker()), Poll::Ready(()));
        });
    }

    #[test]
    fn duplicate_watcher_rejected() {
        with_reactor(|r| {
            // fd 0 (stdin) always exists, good enough to exercise poller.add
            let key = r.register_io(0);
            r.add_watcher(key, Direction::Read).unwrap();
            let err = r.add_watcher(key, Direction::Read).unwrap_err();
            assert!(matches!(err, GreenError::DuplicateWatcher));
            r.remove_watcher(key, Direction::Read);
            r.deregister_io(key);
        });
    }

    #[test]
    fn immediate_callback_runs_on_drain() {
        with_reactor(|r| {
            let flag = Arc::new(AtomicBool::new(false));
            let flag2 = flag.clone();
            r.schedule_now(move || flag2.store(true, Ordering::SeqCst));
            r.drain_immediate();
            assert!(flag.load(Ordering::SeqCst));
        });
    }

    #[test]
    fn self_rescheduling_immediate_callback_does_not_starve() {
        with_reactor(|r| {
            let count = Arc::new(std::sync::atomic::AtomicU32::new(0));

            fn reschedule(count: Arc<std::sync::atomic::AtomicU32>) {
                count.fetch_add(1, Ordering::SeqCst);
                if count.load(Ordering::SeqCst) < 100 {
                    with_reactor(|r| {
                        let c = count.clone();
                        r.schedule_now(move || reschedule(c));
                    });
                }
            }

            r.schedule_now({
                let c = count.clone();
                move || reschedule(c)
            });
            // one drain only ever runs callbacks queued *before* the call
            r.drain_immediate();
            assert_eq!(count.load(Ordering::SeqCst), 1);
        });
    }
}
