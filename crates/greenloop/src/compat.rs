//! Drop-in shims for two blocking stdlib-shaped calls: `time.sleep` and
//! `select.select`, modeled on `guv.green.time`/`guv.green.select`. These
//! are the only two compatibility shims in scope — file I/O and thread
//! creation shims are an external collaborator's concern, not this
//! runtime's.

use std::collections::HashMap;
use std::future::Future;
use std::os::unix::io::RawFd;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;

use greenloop_core::reactor::{self, Direction, IoKey, TimerKey};
use greenloop_core::GreenError;

/// Suspend the calling task for `duration`, same call shape as
/// `time.sleep` patched by `guv.green.time`.
pub async fn sleep(duration: Duration) -> Result<(), GreenError> {
    greenloop_core::trampoline::sleep(duration).await
}

struct Watcher {
    key: IoKey,
    dir: Direction,
    fd: RawFd,
}

enum SelectOutcome {
    Ready(RawFd, Direction, Result<(), GreenError>),
    TimedOut,
}

struct Select<'a> {
    watchers: &'a [Watcher],
    timer_key: Option<TimerKey>,
}

impl<'a> Future for Select<'a> {
    type Output = SelectOutcome;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<SelectOutcome> {
        for w in self.watchers {
            if let Poll::Ready(res) = reactor::with_reactor(|r| r.poll_watcher(w.key, w.dir, cx.waker().clone())) {
                return Poll::Ready(SelectOutcome::Ready(w.fd, w.dir, res));
            }
        }
        if let Some(key) = self.timer_key {
            if reactor::with_reactor(|r| r.poll_timer(key, cx.waker().clone())).is_ready() {
                return Poll::Ready(SelectOutcome::TimedOut);
            }
        }
        Poll::Pending
    }
}

/// Suspend until any fd in `read_fds` becomes readable, any fd in
/// `write_fds` becomes writable, or `timeout` elapses — same shape as
/// `select.select(rlist, wlist, xlist, timeout)`, minus the exception-fd
/// list: this reactor has no separate notion of "exceptional condition"
/// readiness, only read/write, so `xlist` has no equivalent here.
///
/// Unlike the stdlib call, this only ever reports the *first* fd to
/// become ready, not every ready fd at once — matching `guv.green.select`,
/// which switches back to the caller as soon as any one watcher fires and
/// tears the rest down, rather than draining every ready fd in one pass.
pub async fn select(
    read_fds: &[RawFd],
    write_fds: &[RawFd],
    timeout: Option<Duration>,
) -> Result<(Vec<RawFd>, Vec<RawFd>), GreenError> {
    let mut keys_by_fd: HashMap<RawFd, IoKey> = HashMap::new();
    for &fd in read_fds.iter().chain(write_fds.iter()) {
        keys_by_fd.entry(fd).or_insert_with(|| reactor::with_reactor(|r| r.register_io(fd)));
    }

    let mut watchers = Vec::new();
    let mut setup_err = None;
    for &fd in read_fds {
        let key = keys_by_fd[&fd];
        match reactor::with_reactor(|r| r.add_watcher(key, Direction::Read)) {
            Ok(()) => watchers.push(Watcher { key, dir: Direction::Read, fd }),
            Err(e) => {
                setup_err = Some(e);
                break;
            }
        }
    }
    if setup_err.is_none() {
        for &fd in write_fds {
            let key = keys_by_fd[&fd];
            match reactor::with_reactor(|r| r.add_watcher(key, Direction::Write)) {
                Ok(()) => watchers.push(Watcher { key, dir: Direction::Write, fd }),
                Err(e) => {
                    setup_err = Some(e);
                    break;
                }
            }
        }
    }

    let timer_key = timeout.map(|d| reactor::with_reactor(|r| r.schedule_timer(d)));

    let outcome = if let Some(e) = setup_err {
        SelectOutcome::Ready(-1, Direction::Read, Err(e))
    } else {
        Select { watchers: &watchers, timer_key }.await
    };

    for w in &watchers {
        reactor::with_reactor(|r| r.remove_watcher(w.key, w.dir));
    }
    for key in keys_by_fd.values() {
        reactor::with_reactor(|r| r.deregister_io(*key));
    }
    if let Some(key) = timer_key {
        reactor::with_reactor(|r| r.cancel_timer(key));
    }

    match outcome {
        SelectOutcome::Ready(fd, Direction::Read, Ok(())) => Ok((vec![fd], Vec::new())),
        SelectOutcome::Ready(fd, Direction::Write, Ok(())) => Ok((Vec::new(), vec![fd])),
        SelectOutcome::Ready(_, _, Err(e)) => Err(e),
        SelectOutcome::TimedOut => Ok((Vec::new(), Vec::new())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sleep_waits_at_least_duration() {
        greenloop_core::block_on(async {
            let start = std::time::Instant::now();
            sleep(Duration::from_millis(5)).await.unwrap();
            assert!(start.elapsed() >= Duration::from_millis(5));
        });
    }

    #[test]
    fn select_reports_readable_pipe() {
        greenloop_core::block_on(async {
            let (r, w) = pipe();
            unsafe {
                libc::write(w, b"x".as_ptr() as *const libc::c_void, 1);
            }
            let (readable, writable) = select(&[r], &[], Some(Duration::from_secs(1))).await.unwrap();
            assert_eq!(readable, vec![r]);
            assert!(writable.is_empty());
            unsafe {
                libc::close(r);
                libc::close(w);
            }
        });
    }

    #[test]
    fn select_times_out_when_nothing_ready() {
        greenloop_core::block_on(async {
            let (r, w) = pipe();
            let (readable, writable) = select(&[r], &[], Some(Duration::from_millis(5))).await.unwrap();
            assert!(readable.is_empty());
            assert!(writable.is_empty());
            unsafe {
                libc::close(r);
                libc::close(w);
            }
        });
    }

    fn pipe() -> (RawFd, RawFd) {
        let mut fds = [0i32; 2];
        unsafe {
            libc::pipe(fds.as_mut_ptr());
            let flags = libc::fcntl(fds[0], libc::F_GETFL);
            libc::fcntl(fds[0], libc::F_SETFL, flags | libc::O_NONBLOCK);
        }
        (fds[0], fds[1])
    }
}
