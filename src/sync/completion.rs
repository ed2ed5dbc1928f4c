//! Single-assignment, multi-waiter result slot.
//!
//! A completion is resolved at most once; every waiter observes the same
//! value. That fan-out distinguishes it from a single-consumer channel: a
//! handshake result, for instance, is awaited by several tasks at once.
//!
//! A waiter whose deadline passes before resolution receives the fallback it
//! supplied. The slot stays resolvable afterwards; a late resolution is
//! simply not observed by waiters that already timed out.

use crate::context;
use crate::reactor::{Inner, Reactor};
use crate::types::{ContextId, Time};
use parking_lot::Mutex;
use std::sync::{Arc, Weak};

struct CompletionState<T> {
    result: Option<T>,
    waiters: Vec<ContextId>,
}

/// Handle to a completion. Clones share the same slot.
pub struct Completion<T> {
    reactor: Weak<Inner>,
    state: Arc<Mutex<CompletionState<T>>>,
}

impl<T> Clone for Completion<T> {
    fn clone(&self) -> Self {
        Self {
            reactor: Weak::clone(&self.reactor),
            state: Arc::clone(&self.state),
        }
    }
}

impl<T: Clone + Send + 'static> Completion<T> {
    pub(crate) fn new(reactor: &Reactor) -> Self {
        Self {
            reactor: Arc::downgrade(&reactor.inner),
            state: Arc::new(Mutex::new(CompletionState {
                result: None,
                waiters: Vec::new(),
            })),
        }
    }

    /// True once the completion has been resolved.
    #[must_use]
    pub fn test(&self) -> bool {
        self.state.lock().result.is_some()
    }

    /// Resolves the completion and makes every waiter due immediately.
    ///
    /// The first resolution wins; later calls are ignored, keeping the result
    /// immutable once set.
    pub fn complete(&self, value: T) {
        let waiters = {
            let mut state = self.state.lock();
            if state.result.is_some() {
                return;
            }
            state.result = Some(value);
            state.waiters.clone()
        };
        let Some(inner) = self.reactor.upgrade() else {
            return;
        };
        let reactor = Reactor { inner };
        for waiter in waiters {
            reactor.poke_context(waiter);
        }
    }

    /// Waits for resolution until `timeout`, returning the resolved value or
    /// `fallback` if the deadline passed first.
    ///
    /// Returns immediately without suspending if already resolved. From
    /// outside a reactor task this degrades to an OS sleep for the full
    /// timeout before re-checking.
    pub fn wait(&self, timeout: Time, fallback: T) -> T {
        {
            let state = self.state.lock();
            if let Some(value) = &state.result {
                return value.clone();
            }
        }
        let Some(inner) = self.reactor.upgrade() else {
            return fallback;
        };
        let reactor = Reactor { inner };
        let Some(me) = context::current() else {
            reactor.pause(timeout);
            let state = self.state.lock();
            return state.result.clone().unwrap_or(fallback);
        };
        self.state.lock().waiters.push(me);
        reactor.pause(timeout);
        let mut state = self.state.lock();
        if let Some(position) = state.waiters.iter().position(|&w| w == me) {
            state.waiters.remove(position);
        }
        state.result.clone().unwrap_or(fallback)
    }
}

impl<T> std::fmt::Debug for Completion<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.lock();
        f.debug_struct("Completion")
            .field("resolved", &state.result.is_some())
            .field("waiters", &state.waiters.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use crate::reactor::Reactor;
    use crate::types::Time;

    #[test]
    fn new_completion_is_unresolved() {
        let reactor = Reactor::new().unwrap();
        let completion = reactor.completion::<i32>();
        assert!(!completion.test());
    }

    #[test]
    fn resolved_value_is_returned_without_suspending() {
        let reactor = Reactor::new().unwrap();
        let completion = reactor.completion::<i32>();
        completion.complete(7);
        assert!(completion.test());
        assert_eq!(completion.wait(Time::NEVER, 0), 7);
    }

    #[test]
    fn first_resolution_wins() {
        let reactor = Reactor::new().unwrap();
        let completion = reactor.completion::<&'static str>();
        completion.complete("first");
        completion.complete("second");
        assert_eq!(completion.wait(Time::NEVER, ""), "first");
    }

    #[test]
    fn clones_share_the_slot() {
        let reactor = Reactor::new().unwrap();
        let completion = reactor.completion::<u8>();
        let other = completion.clone();
        other.complete(3);
        assert_eq!(completion.wait(Time::NEVER, 0), 3);
    }

    #[test]
    fn timed_out_wait_outside_the_loop_returns_fallback() {
        let reactor = Reactor::new().unwrap();
        let completion = reactor.completion::<i32>();
        let deadline = reactor.monotonic() + std::time::Duration::from_millis(5);
        assert_eq!(completion.wait(deadline, -1), -1);
    }
}
