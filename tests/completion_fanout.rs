//! Completion semantics: multi-waiter fan-out, timeout fallbacks, and
//! late-resolution behavior.

mod common;

use common::*;
use coreactor::Time;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;

#[test]
fn every_waiter_observes_the_same_resolved_value() {
    let reactor = test_reactor("control");
    let completion = reactor.completion::<i64>();
    let seen: Arc<Mutex<Vec<i64>>> = Arc::new(Mutex::new(Vec::new()));

    for _ in 0..3 {
        let waiter = completion.clone();
        let values = seen.clone();
        reactor.register_timer(Time::NOW, move |_, _| {
            values.lock().push(waiter.wait(Time::NEVER, -1));
            Ok(Time::NEVER)
        });
    }
    let resolver = completion.clone();
    reactor.register_timer(
        reactor.monotonic() + Duration::from_millis(20),
        move |_, _| {
            resolver.complete(99);
            Ok(Time::NEVER)
        },
    );

    let handle = start_loop(&reactor);
    assert!(wait_until(|| seen.lock().len() == 3));
    assert_eq!(seen.lock().as_slice(), &[99, 99, 99]);
    stop_loop(&reactor, handle).unwrap();
    reactor.finalize();
}

#[test]
fn timed_out_waiter_keeps_its_fallback_despite_late_resolution() {
    let reactor = test_reactor("control");
    let completion = reactor.completion::<i64>();
    let outcomes: Arc<Mutex<Vec<i64>>> = Arc::new(Mutex::new(Vec::new()));

    let waiter = completion.clone();
    let trace = outcomes.clone();
    reactor.register_timer(Time::NOW, move |_, eventtime| {
        let value = waiter.wait(eventtime + Duration::from_millis(10), -1);
        trace.lock().push(value);
        Ok(Time::NEVER)
    });
    // Resolves well after the waiter's deadline.
    let resolver = completion.clone();
    reactor.register_timer(
        reactor.monotonic() + Duration::from_millis(60),
        move |_, _| {
            resolver.complete(7);
            Ok(Time::NEVER)
        },
    );

    let handle = start_loop(&reactor);
    assert!(wait_until(|| outcomes.lock().len() == 1));
    assert_eq!(outcomes.lock().as_slice(), &[-1]);
    // The slot still resolves; the timed-out waiter's result is unchanged.
    assert!(wait_until(|| completion.test()));
    assert_eq!(outcomes.lock().as_slice(), &[-1]);
    stop_loop(&reactor, handle).unwrap();
    reactor.finalize();
}

#[test]
fn waiting_on_an_already_resolved_completion_does_not_suspend() {
    let reactor = test_reactor("control");
    let outcomes: Arc<Mutex<Vec<i64>>> = Arc::new(Mutex::new(Vec::new()));

    let trace = outcomes.clone();
    reactor.register_timer(Time::NOW, move |r, _| {
        let completion = r.completion::<i64>();
        completion.complete(5);
        // NEVER deadline, but the value is already there.
        trace.lock().push(completion.wait(Time::NEVER, -1));
        Ok(Time::NEVER)
    });

    let handle = start_loop(&reactor);
    assert!(wait_until(|| outcomes.lock().len() == 1));
    assert_eq!(outcomes.lock().as_slice(), &[5]);
    stop_loop(&reactor, handle).unwrap();
    reactor.finalize();
}

#[test]
fn async_complete_resolves_from_a_foreign_thread() {
    let reactor = test_reactor("control");
    let completion = reactor.completion::<String>();
    let outcomes: Arc<Mutex<Vec<String>>> = Arc::new(Mutex::new(Vec::new()));

    let waiter = completion.clone();
    let trace = outcomes.clone();
    reactor.register_timer(Time::NOW, move |_, _| {
        trace.lock().push(waiter.wait(Time::NEVER, String::new()));
        Ok(Time::NEVER)
    });

    let handle = start_loop(&reactor);
    let foreign = {
        let reactor = reactor.clone();
        let completion = completion.clone();
        std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(15));
            reactor.async_complete(&completion, "from-afar".to_string());
        })
    };
    assert!(wait_until(|| outcomes.lock().len() == 1));
    assert_eq!(outcomes.lock().as_slice(), &["from-afar".to_string()]);
    foreign.join().unwrap();
    stop_loop(&reactor, handle).unwrap();
    reactor.finalize();
}
