#![allow(dead_code)]
//! Shared integration test utilities.
//!
//! Import with:
//! ```ignore
//! mod common;
//! use common::*;
//! ```

use coreactor::{Reactor, ReactorBuilder};
use std::sync::Once;
use std::thread::JoinHandle;
use std::time::Duration;

static INIT_LOGGING: Once = Once::new();

/// Initializes test logging once per process. Controlled by `RUST_LOG`.
pub fn init_logging() {
    INIT_LOGGING.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    });
}

/// Builds a reactor named `process` with test-friendly settings.
pub fn test_reactor(process: &str) -> Reactor {
    init_logging();
    ReactorBuilder::new()
        .process_name(process)
        .poll_timeout_cap(Duration::from_millis(50))
        .build()
        .expect("reactor construction")
}

/// Runs the reactor's loop on a background thread.
pub fn start_loop(reactor: &Reactor) -> JoinHandle<coreactor::Result<()>> {
    let reactor = reactor.clone();
    std::thread::spawn(move || reactor.run())
}

/// Stops the loop and joins the runner, returning the loop result.
pub fn stop_loop(
    reactor: &Reactor,
    handle: JoinHandle<coreactor::Result<()>>,
) -> coreactor::Result<()> {
    reactor.end();
    handle.join().expect("loop thread join")
}

/// Generous deadline for cross-thread assertions.
pub const SETTLE: Duration = Duration::from_secs(5);

/// Polls `predicate` until it holds or `SETTLE` elapses.
pub fn wait_until(predicate: impl Fn() -> bool) -> bool {
    let start = std::time::Instant::now();
    while start.elapsed() < SETTLE {
        if predicate() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(2));
    }
    predicate()
}
