//! Named event dispatch.
//!
//! Events are strings of the form `"<subsystem>:<event>"` (lifecycle names
//! like `"core:connect"`, `"core:ready"`, `"core:shutdown"`,
//! `"core:critical_error"`). Handlers run synchronously in registration
//! order; ordering is a correctness requirement for lifecycle sequences,
//! where a handler must observe configuration before a later handler acts on
//! it. Unknown event names simply have no handlers and are ignored.
//!
//! [`Reactor::send_event`] additionally forwards the event to every linked
//! peer process; [`Reactor::send_event_and_wait`] is the barrier variant that
//! suspends the caller until every peer has finished its own handlers.

use crate::error::Result;
use crate::ipc::wire::Envelope;
use crate::reactor::Reactor;
use crate::types::{ProcessId, Time};
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;

/// Handler for a named event.
pub(crate) type EventHandler = Arc<dyn Fn(&Reactor, &[Value]) -> Result<Value> + Send + Sync>;

/// Event registry plus barrier bookkeeping.
pub(crate) struct EventState {
    handlers: Mutex<HashMap<String, Vec<EventHandler>>>,
    /// Per-peer "has not yet acknowledged the in-flight barrier" flags.
    pending: Mutex<HashMap<ProcessId, bool>>,
}

impl EventState {
    pub(crate) fn new() -> Self {
        Self {
            handlers: Mutex::new(HashMap::new()),
            pending: Mutex::new(HashMap::new()),
        }
    }

    fn register(&self, name: String, handler: EventHandler) {
        self.handlers.lock().entry(name).or_default().push(handler);
    }

    /// Snapshot of a name's handlers in registration order, so handlers can
    /// register further handlers without deadlocking the registry.
    fn snapshot(&self, name: &str) -> Vec<EventHandler> {
        self.handlers.lock().get(name).cloned().unwrap_or_default()
    }

    fn set_pending(&self, process: ProcessId) {
        self.pending.lock().insert(process, true);
    }

    pub(crate) fn barrier_done(&self, process: &ProcessId) {
        self.pending.lock().insert(process.clone(), false);
    }

    fn any_pending(&self) -> bool {
        self.pending.lock().values().any(|&pending| pending)
    }
}

impl Reactor {
    /// Appends a handler for `name`. Handlers run in registration order and
    /// are never removed.
    pub fn register_event_handler<F>(&self, name: impl Into<String>, handler: F)
    where
        F: Fn(&Reactor, &[Value]) -> Result<Value> + Send + Sync + 'static,
    {
        self.inner.events.register(name.into(), Arc::new(handler));
    }

    /// Runs the local handlers for `name` in registration order, returning
    /// their results. The first handler error aborts the sequence.
    pub fn run_event_handlers(&self, name: &str, args: &[Value]) -> Result<Vec<Value>> {
        let handlers = self.inner.events.snapshot(name);
        tracing::debug!(event = name, handlers = handlers.len(), "running event handlers");
        let mut results = Vec::with_capacity(handlers.len());
        for handler in handlers {
            results.push(handler(self, args)?);
        }
        Ok(results)
    }

    /// Forwards `name` to every linked peer process, then runs the local
    /// handlers and returns their results.
    ///
    /// Remote delivery is asynchronous: peers run their handlers on their own
    /// next cycle, and their results are not collected.
    pub fn send_event(&self, name: &str, args: &[Value]) -> Result<Vec<Value>> {
        for process in self.linked_processes() {
            tracing::debug!(event = name, peer = %process, "forwarding event");
            self.send_envelope(
                &process,
                Envelope::Event {
                    name: name.to_string(),
                    args: args.to_vec(),
                },
            )?;
        }
        self.run_event_handlers(name, args)
    }

    /// Barrier variant of [`Reactor::send_event`]: suspends the calling
    /// logical task until every linked peer acknowledges that its handlers
    /// finished. Used for lifecycle events where the caller must not proceed
    /// until the whole system has reacted (e.g. a connect handshake before
    /// declaring ready).
    ///
    /// One barrier may be in flight at a time per reactor. `deadline` bounds
    /// the wait; pass `Time::NEVER` to wait indefinitely.
    ///
    /// # Errors
    ///
    /// [`crate::Error::DeadlineExceeded`] if a peer has not acknowledged by
    /// `deadline`.
    pub fn send_event_and_wait(
        &self,
        name: &str,
        args: &[Value],
        deadline: Time,
    ) -> Result<Vec<Value>> {
        let me = self.process_name().clone();
        for process in self.linked_processes() {
            self.inner.events.set_pending(process.clone());
            self.send_envelope(
                &process,
                Envelope::EventBarrier {
                    name: name.to_string(),
                    args: args.to_vec(),
                    reply_to: me.clone(),
                },
            )?;
        }
        let results = self.run_event_handlers(name, args)?;
        let interval = self.inner.config.barrier_poll_interval;
        while self.inner.events.any_pending() {
            let now = self.monotonic();
            if now >= deadline {
                tracing::warn!(event = name, "barrier deadline exceeded");
                return Err(crate::error::Error::DeadlineExceeded);
            }
            self.pause((now + interval).min(deadline));
        }
        tracing::debug!(event = name, "barrier complete");
        Ok(results)
    }
}
