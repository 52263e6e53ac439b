//! Timers with nearly-simultaneous deadlines must fire in the order they
//! were scheduled, and the reactor's timer heap must be fully drained
//! (nothing left pending) once every scheduled timer has fired.

use greenloop::{sleep, spawn};
use std::cell::RefCell;
use std::rc::Rc;
use std::time::Duration;

#[test]
fn near_simultaneous_timers_fire_in_schedule_order() {
    greenloop::block_on(async {
        let order = Rc::new(RefCell::new(Vec::new()));

        let mut tasks = Vec::new();
        for id in 0..5u32 {
            let order2 = order.clone();
            tasks.push(spawn(async move {
                sleep(Duration::from_millis(1)).await.unwrap();
                order2.borrow_mut().push(id);
            }));
        }

        for t in tasks {
            let _ = t.wait().await;
        }

        assert_eq!(*order.borrow(), vec![0, 1, 2, 3, 4]);
    });
}

#[test]
fn timer_heap_drains_once_all_timers_fire() {
    greenloop::block_on(async {
        let mut tasks = Vec::new();
        for _ in 0..8u32 {
            tasks.push(spawn(async { sleep(Duration::from_millis(1)).await.unwrap() }));
        }
        for t in tasks {
            let _ = t.wait().await;
        }
        assert!(!greenloop_core::reactor::with_reactor(|r| r.has_timers()));
    });
}
