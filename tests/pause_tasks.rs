//! Cooperative suspension: a paused callback must not stall the loop, and
//! control must interleave in deadline order across logical tasks.

mod common;

use common::*;
use coreactor::Time;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

#[test]
fn pausing_a_callback_lets_other_timers_run() {
    let reactor = test_reactor("control");
    let order: Arc<Mutex<Vec<&'static str>>> = Arc::new(Mutex::new(Vec::new()));

    let trace = order.clone();
    reactor.register_timer(Time::NOW, move |r, eventtime| {
        trace.lock().push("pause-start");
        r.pause(eventtime + Duration::from_millis(40));
        trace.lock().push("pause-end");
        Ok(Time::NEVER)
    });
    let trace = order.clone();
    reactor.register_timer(
        reactor.monotonic() + Duration::from_millis(10),
        move |_, _| {
            trace.lock().push("middle");
            Ok(Time::NEVER)
        },
    );

    let handle = start_loop(&reactor);
    assert!(wait_until(|| order.lock().len() == 3));
    assert_eq!(
        order.lock().as_slice(),
        &["pause-start", "middle", "pause-end"]
    );
    stop_loop(&reactor, handle).unwrap();
    reactor.finalize();
}

#[test]
fn pause_returns_a_time_at_or_after_the_deadline() {
    let reactor = test_reactor("control");
    let done = Arc::new(AtomicBool::new(false));

    let flag = done.clone();
    reactor.register_timer(Time::NOW, move |r, eventtime| {
        let deadline = eventtime + Duration::from_millis(20);
        let resumed = r.pause(deadline);
        assert!(resumed >= deadline);
        flag.store(true, Ordering::SeqCst);
        Ok(Time::NEVER)
    });

    let handle = start_loop(&reactor);
    assert!(wait_until(|| done.load(Ordering::SeqCst)));
    stop_loop(&reactor, handle).unwrap();
    reactor.finalize();
}

#[test]
fn two_paused_tasks_interleave_by_deadline() {
    let reactor = test_reactor("control");
    let order: Arc<Mutex<Vec<&'static str>>> = Arc::new(Mutex::new(Vec::new()));

    let trace = order.clone();
    reactor.register_timer(Time::NOW, move |r, eventtime| {
        trace.lock().push("slow-in");
        r.pause(eventtime + Duration::from_millis(60));
        trace.lock().push("slow-out");
        Ok(Time::NEVER)
    });
    let trace = order.clone();
    reactor.register_timer(Time::NOW, move |r, eventtime| {
        trace.lock().push("fast-in");
        r.pause(eventtime + Duration::from_millis(15));
        trace.lock().push("fast-out");
        Ok(Time::NEVER)
    });

    let handle = start_loop(&reactor);
    assert!(wait_until(|| order.lock().len() == 4));
    assert_eq!(
        order.lock().as_slice(),
        &["slow-in", "fast-in", "fast-out", "slow-out"]
    );
    stop_loop(&reactor, handle).unwrap();
    reactor.finalize();
}

#[test]
fn a_task_can_pause_repeatedly() {
    let reactor = test_reactor("control");
    let done = Arc::new(AtomicBool::new(false));

    let flag = done.clone();
    reactor.register_timer(Time::NOW, move |r, eventtime| {
        let mut at = eventtime;
        for _ in 0..4 {
            at = r.pause(at + Duration::from_millis(5));
        }
        flag.store(true, Ordering::SeqCst);
        Ok(Time::NEVER)
    });

    let handle = start_loop(&reactor);
    assert!(wait_until(|| done.load(Ordering::SeqCst)));
    stop_loop(&reactor, handle).unwrap();
    reactor.finalize();
}

#[test]
fn pause_before_the_loop_runs_is_an_os_sleep() {
    let reactor = test_reactor("control");
    let before = reactor.monotonic();
    let resumed = reactor.pause(before + Duration::from_millis(10));
    assert!(resumed >= before + Duration::from_millis(10));
}
