//! Cooperative FIFO mutex.
//!
//! Serializes logical sections of cooperative code (a command sequence that
//! spans several pauses, for instance) across the tasks sharing one loop.
//! It protects control flow, not memory: by construction there is no
//! concurrent memory access between logical tasks.
//!
//! # Fairness
//!
//! Strictly FIFO. Release hands the lock to the head of the wait queue by
//! making its resume timer due, and `locked` stays true across the handoff,
//! so a late arrival cannot barge in between release and the head waking.
//! Admission goes through the queue, never through a retry race.

use crate::context;
use crate::error::{Error, Result};
use crate::reactor::Reactor;
use crate::types::{ContextId, Time};
use parking_lot::Mutex;
use std::collections::VecDeque;

struct MutexState {
    locked: bool,
    /// Set by release when a queued waiter has been admitted but has not yet
    /// resumed and claimed the lock.
    next_pending: bool,
    queue: VecDeque<ContextId>,
}

/// Cooperative FIFO mutex bound to a reactor.
///
/// Created with [`Reactor::mutex`]. Acquisition suspends the calling logical
/// task; it never blocks the loop itself.
pub struct ReactorMutex {
    reactor: Reactor,
    state: Mutex<MutexState>,
}

impl ReactorMutex {
    pub(crate) fn new(reactor: Reactor, locked: bool) -> Self {
        Self {
            reactor,
            state: Mutex::new(MutexState {
                locked,
                next_pending: false,
                queue: VecDeque::new(),
            }),
        }
    }

    /// Non-blocking locked check, for callers that want to avoid contending.
    #[must_use]
    pub fn test(&self) -> bool {
        self.state.lock().locked
    }

    /// Acquires the mutex, suspending the current logical task while it is
    /// held elsewhere. The returned guard releases on drop.
    ///
    /// # Errors
    ///
    /// Returns [`Error::OutsideTask`] if the mutex is contended and the
    /// caller is not running on a reactor task (there is no context to park).
    pub fn acquire(&self) -> Result<MutexGuard<'_>> {
        let me = {
            let mut state = self.state.lock();
            if !state.locked {
                state.locked = true;
                return Ok(MutexGuard { mutex: self });
            }
            let Some(me) = context::current() else {
                return Err(Error::OutsideTask);
            };
            state.queue.push_back(me);
            me
        };
        loop {
            self.reactor.pause(Time::NEVER);
            let mut state = self.state.lock();
            if state.next_pending && state.queue.front() == Some(&me) {
                state.next_pending = false;
                state.queue.pop_front();
                return Ok(MutexGuard { mutex: self });
            }
        }
    }

    /// Number of tasks queued for the lock.
    #[must_use]
    pub fn waiters(&self) -> usize {
        self.state.lock().queue.len()
    }

    fn release(&self) {
        let head = {
            let mut state = self.state.lock();
            if state.queue.is_empty() {
                state.locked = false;
                return;
            }
            // Hand off: admit the head but keep `locked` true throughout.
            state.next_pending = true;
            *state.queue.front().unwrap_or(&0)
        };
        self.reactor.poke_context(head);
    }
}

impl std::fmt::Debug for ReactorMutex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.lock();
        f.debug_struct("ReactorMutex")
            .field("locked", &state.locked)
            .field("waiters", &state.queue.len())
            .finish()
    }
}

/// RAII guard for [`ReactorMutex`]; releases on drop.
#[must_use = "the lock is released when the guard is dropped"]
pub struct MutexGuard<'a> {
    mutex: &'a ReactorMutex,
}

impl Drop for MutexGuard<'_> {
    fn drop(&mut self) {
        self.mutex.release();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn uncontended_acquire_takes_the_lock() {
        let reactor = Reactor::new().unwrap();
        let mutex = reactor.mutex(false);
        assert!(!mutex.test());
        let guard = mutex.acquire().expect("uncontended acquire");
        assert!(mutex.test());
        drop(guard);
        assert!(!mutex.test());
    }

    #[test]
    fn mutex_can_start_locked() {
        let reactor = Reactor::new().unwrap();
        let mutex = reactor.mutex(true);
        assert!(mutex.test());
    }

    #[test]
    fn contended_acquire_outside_a_task_is_rejected() {
        let reactor = Reactor::new().unwrap();
        let mutex = reactor.mutex(false);
        let _guard = mutex.acquire().expect("first acquire");
        assert!(matches!(mutex.acquire(), Err(Error::OutsideTask)));
    }
}
