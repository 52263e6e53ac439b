//! `Semaphore::acquire` serves parked waiters strictly in arrival order —
//! a later arrival can never jump ahead of one already queued, even
//! though both are racing the same `release()`.

use greenloop::sync::Semaphore;
use greenloop::{spawn, yield_now};
use std::cell::RefCell;
use std::rc::Rc;

#[test]
fn acquire_serves_waiters_in_fifo_order() {
    greenloop::block_on(async {
        let sem = Semaphore::new(0);
        let order = Rc::new(RefCell::new(Vec::new()));

        let mut tasks = Vec::new();
        for id in 0..4u32 {
            let sem2 = sem.clone();
            let order2 = order.clone();
            tasks.push(spawn(async move {
                sem2.acquire().await.unwrap();
                order2.borrow_mut().push(id);
            }));
            // Give each task a chance to park before the next is spawned,
            // so arrival order is deterministic.
            yield_now(true).await;
        }

        for _ in 0..4 {
            sem.release();
        }
        for t in tasks {
            let _ = t.wait().await;
        }

        assert_eq!(*order.borrow(), vec![0, 1, 2, 3]);
    });
}
