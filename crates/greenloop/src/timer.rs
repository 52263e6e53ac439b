//! A one-shot timer future, and the `Timeout` scope built on it.

use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;

use greenloop_core::reactor::{self, TimerKey};
use greenloop_core::GreenError;

/// A one-shot timer that resolves after a given duration.
///
/// Implements `Future`, so `Timer::after(d).await` suspends the calling
/// task. Cancels itself on drop if it hasn't fired yet — the reactor's
/// timer cancellation is idempotent, so dropping an already-fired
/// `Timer` is harmless (spec §8: "cancel twice is equivalent to once").
pub struct Timer {
    key: TimerKey,
    fired: bool,
}

impl Timer {
    pub fn after(duration: Duration) -> Self {
        let key = reactor::with_reactor(|r| r.schedule_timer(duration));
        Timer { key, fired: false }
    }
}

impl Future for Timer {
    type Output = ();

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<()> {
        if self.fired {
            return Poll::Ready(());
        }
        let result = reactor::with_reactor(|r| r.poll_timer(self.key, cx.waker().clone()));
        if result.is_ready() {
            self.fired = true;
        }
        result
    }
}

impl Drop for Timer {
    fn drop(&mut self) {
        if !self.fired {
            reactor::with_reactor(|r| r.cancel_timer(self.key));
        }
    }
}

/// Runs `future` to completion, or fails with `GreenError::Timeout` if
/// `duration` elapses first (spec §4.D `Timeout`). Unlike `guv`'s
/// `Timeout`, which can be used as either a context manager or a raw
/// timer, this is scoped to a single awaited future — callers needing the
/// context-manager form wrap their critical section in an `async` block.
pub async fn with_timeout<F, T>(duration: Duration, future: F) -> Result<T, GreenError>
where
    F: Future<Output = T>,
{
    use std::pin::pin;

    let mut future = pin!(future);
    let mut timer = pin!(Timer::after(duration));

    std::future::poll_fn(move |cx| {
        if let Poll::Ready(v) = future.as_mut().poll(cx) {
            return Poll::Ready(Ok(v));
        }
        if timer.as_mut().poll(cx).is_ready() {
            return Poll::Ready(Err(GreenError::Timeout));
        }
        Poll::Pending
    })
    .await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timer_resolves_after_duration() {
        greenloop_core::block_on(async {
            let start = std::time::Instant::now();
            Timer::after(Duration::from_millis(10)).await;
            assert!(start.elapsed() >= Duration::from_millis(10));
        });
    }

    #[test]
    fn with_timeout_returns_ok_when_future_wins() {
        let result = greenloop_core::block_on(async { with_timeout(Duration::from_secs(1), async { 42 }).await });
        assert_eq!(result.unwrap(), 42);
    }

    #[test]
    fn with_timeout_returns_timeout_when_deadline_wins() {
        let result = greenloop_core::block_on(async {
            with_timeout(Duration::from_millis(5), async {
                Timer::after(Duration::from_secs(5)).await;
            })
            .await
        });
        assert!(matches!(result, Err(GreenError::Timeout)));
    }
}
