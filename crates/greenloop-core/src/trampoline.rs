//! The suspension primitive every blocking-shaped operation is built on.
//!
//! `trampoline` registers a watcher (and optionally a deadline) and
//! suspends the calling task until the watcher fires, the deadline
//! elapses, or the task is killed — directly modeled on
//! `guv/hubs/switch.py`'s `trampoline`/`gyield` pair. `yield_now` is the
//! degenerate case with nothing to wait on: give the executor one chance
//! to run something else.

use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;

use crate::error::GreenError;
use crate::reactor::{self, Direction, IoKey, TimerKey};
use crate::task::is_current_killed;

/// Suspend the calling task until `key`'s `dir` readiness fires, `timeout`
/// elapses (if given), or the task is killed.
///
/// Returns `Err(GreenError::HubReentry)` immediately, without registering
/// anything, if called while the hub itself is running a callback — the
/// hub never suspends into a task (spec: "detected and rejected").
pub async fn trampoline(
    key: IoKey,
    dir: Direction,
    timeout: Option<Duration>,
) -> Result<(), GreenError> {
    if reactor::with_reactor(|r| r.is_in_hub()) {
        return Err(GreenError::HubReentry);
    }

    reactor::with_reactor(|r| r.add_watcher(key, dir))?;
    let timer_key = timeout.map(|d| reactor::with_reactor(|r| r.schedule_timer(d)));

    struct Trampoline {
        key: IoKey,
        dir: Direction,
        timer_key: Option<TimerKey>,
    }

    impl Future for Trampoline {
        type Output = Result<(), GreenError>;

        fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Result<(), GreenError>> {
            if is_current_killed() {
                return Poll::Ready(Err(GreenError::Cancelled));
            }
            let io_result =
                reactor::with_reactor(|r| r.poll_watcher(self.key, self.dir, cx.waker().clone()));
            if let Poll::Ready(res) = io_result {
                return Poll::Ready(res);
            }
            if let Some(timer_key) = self.timer_key {
                let timer_result = reactor::with_reactor(|r| r.poll_timer(timer_key, cx.waker().clone()));
                if timer_result.is_ready() {
                    return Poll::Ready(Err(GreenError::Timeout));
                }
            }
            Poll::Pending
        }
    }

    let result = Trampoline { key, dir, timer_key }.await;

    reactor::with_reactor(|r| r.remove_watcher(key, dir));
    if let Some(timer_key) = timer_key {
        reactor::with_reactor(|r| r.cancel_timer(timer_key));
    }

    result
}

/// Give the executor one chance to run a different ready task before
/// resuming, directly modeled on `guv/hubs/switch.py`'s `gyield`.
///
/// - `switch_back = true` (the common case): the caller reschedules
///   itself for the very next tick, same as `gyield()`'s default.
/// - `switch_back = false`: the caller suspends and is *not*
///   automatically rescheduled — something else (another task, a
///   `kill()`) must wake it. Used by primitives like `Event` where a
///   waiter is woken explicitly by whoever calls `send`, not by the
///   scheduler.
pub async fn yield_now(switch_back: bool) {
    struct YieldNow {
        yielded: bool,
        switch_back: bool,
    }

    impl Future for YieldNow {
        type Output = ();

        fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<()> {
            if self.yielded {
                Poll::Ready(())
            } else {
                self.yielded = true;
                if self.switch_back {
                    cx.waker().wake_by_ref();
                }
                Poll::Pending
            }
        }
    }

    YieldNow { yielded: false, switch_back }.await
}

/// Suspend the calling task for `dur`, or until it is killed.
pub async fn sleep(dur: Duration) -> Result<(), GreenError> {
    if is_current_killed() {
        return Err(GreenError::Cancelled);
    }
    let timer_key = reactor::with_reactor(|r| r.schedule_timer(dur));

    struct Sleep {
        timer_key: TimerKey,
    }

    impl Future for Sleep {
        type Output = ();

        fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<()> {
            reactor::with_reactor(|r| r.poll_timer(self.timer_key, cx.waker().clone()))
        }
    }

    Sleep { timer_key }.await;

    if is_current_killed() {
        return Err(GreenError::Cancelled);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::block_on;
    use crate::reactor;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    #[test]
    fn yield_now_lets_other_task_run_first() {
        let order = Arc::new(std::sync::Mutex::new(Vec::new()));
        let o1 = order.clone();
        let o2 = order.clone();
        block_on(async move {
            let t1 = crate::task::spawn(async move {
                o1.lock().unwrap().push(1);
            });
            yield_now(true).await;
            o2.lock().unwrap().push(2);
            let _ = t1.wait().await;
        });
        assert_eq!(*order.lock().unwrap(), vec![1, 2]);
    }

    #[test]
    fn sleep_waits_for_at_least_the_duration() {
        let start = std::time::Instant::now();
        block_on(async {
            sleep(Duration::from_millis(10)).await.unwrap();
        });
        assert!(start.elapsed() >= Duration::from_millis(10));
    }

    #[test]
    fn hub_flag_is_set_only_while_draining_callbacks() {
        let observed_in_hub = Arc::new(AtomicU32::new(0));
        let observed2 = observed_in_hub.clone();
        reactor::with_reactor(|r| {
            r.schedule_now(move || {
                let in_hub = reactor::with_reactor(|r| r.is_in_hub());
                observed2.store(in_hub as u32, Ordering::SeqCst);
            });
            assert!(!r.is_in_hub());
            r.drain_immediate();
            assert!(!r.is_in_hub());
        });
        assert_eq!(observed_in_hub.load(Ordering::SeqCst), 1);
    }
}
