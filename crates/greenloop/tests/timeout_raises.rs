//! `with_timeout` must fail with `GreenError::Timeout` when the wrapped
//! future doesn't resolve before the deadline, and must not fire at all
//! when it resolves first.

use greenloop::{sleep, with_timeout, GreenError};
use std::time::Duration;

#[test]
fn timeout_raises_when_future_is_too_slow() {
    let result = greenloop::block_on(async {
        with_timeout(Duration::from_millis(5), async {
            sleep(Duration::from_secs(5)).await.unwrap();
            "never"
        })
        .await
    });
    assert!(matches!(result, Err(GreenError::Timeout)));
}

#[test]
fn timeout_does_not_raise_when_future_wins() {
    let result = greenloop::block_on(async {
        with_timeout(Duration::from_secs(5), async {
            sleep(Duration::from_millis(5)).await.unwrap();
            "done"
        })
        .await
    });
    assert_eq!(result.unwrap(), "done");
}
