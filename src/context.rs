//! Execution contexts: suspendable logical tasks multiplexed onto one loop.
//!
//! A logical task is an OS thread that holds the *baton*, the right to
//! execute. Exactly one context runs at any instant; every other context is
//! parked on a blocking channel receive. Switching is a synchronous handoff:
//! the running context sends a [`Baton`] to the target's channel and
//! immediately blocks on its own. There is no preemption; a context runs
//! until it explicitly pauses or returns.
//!
//! Contexts are recycled through a pool once their work completes, bounding
//! thread creation to the peak number of simultaneously-parked tasks.
//!
//! # Baton protocol
//!
//! ```text
//!   dispatcher D                          parked context C
//!        │                                      │
//!        │── Resume(eventtime) ────────────────►│  (resume timer fired)
//!        │                                      │ runs until pause/return
//!        │◄─────────────── Reschedule(wake) ────│  pause(wake): park again
//!        │◄─────────────── Reschedule(NEVER) ───│  done: C rejoins the pool
//!        │                                      │
//!   pause() on D:                               │
//!        │── Dispatch ─────────────────────────►│  (C popped from pool)
//!        │ parks awaiting Resume                │ C is now the dispatcher
//! ```
//!
//! `Exit` is sent only by finalize; a parked context unwinds its stack via a
//! marker panic that every invocation guard re-raises.

use crate::types::{ContextId, Time, TimerHandle};
use std::cell::RefCell;
use std::sync::mpsc::{Receiver, Sender};
use std::thread::JoinHandle;

/// Control message handed between contexts. See the module docs for the
/// protocol.
pub(crate) enum Baton {
    /// Take over the dispatch loop.
    Dispatch,
    /// The context's resume timer fired at the carried event time.
    Resume(Time),
    /// Sent to the dispatcher by a context it resumed: the new wake time for
    /// the context's resume timer (`Time::NEVER` when the context finished).
    Reschedule(Time),
    /// Unwind and exit the thread.
    Exit,
}

pub(crate) struct ContextRecord {
    pub(crate) sender: Sender<Baton>,
    /// Timer that will resume this context while it is parked in `pause`.
    pub(crate) resume_timer: Option<TimerHandle>,
    pub(crate) join: Option<JoinHandle<()>>,
}

/// Bookkeeping for every context of one reactor.
pub(crate) struct ContextTable {
    records: Vec<Option<ContextRecord>>,
    /// Idle contexts awaiting `Baton::Dispatch`.
    pub(crate) pool: Vec<ContextId>,
    /// The context currently running the dispatch loop, if any.
    pub(crate) dispatch: Option<ContextId>,
}

impl ContextTable {
    pub(crate) fn new() -> Self {
        Self {
            records: Vec::new(),
            pool: Vec::new(),
            dispatch: None,
        }
    }

    pub(crate) fn insert(&mut self, record: ContextRecord) -> ContextId {
        self.records.push(Some(record));
        self.records.len() - 1
    }

    pub(crate) fn record(&self, id: ContextId) -> Option<&ContextRecord> {
        self.records.get(id).and_then(Option::as_ref)
    }

    pub(crate) fn record_mut(&mut self, id: ContextId) -> Option<&mut ContextRecord> {
        self.records.get_mut(id).and_then(Option::as_mut)
    }

    pub(crate) fn sender_of(&self, id: ContextId) -> Option<Sender<Baton>> {
        self.record(id).map(|r| r.sender.clone())
    }

    /// Takes every record out, leaving the table empty. Used by finalize.
    pub(crate) fn drain(&mut self) -> Vec<(ContextId, ContextRecord)> {
        self.pool.clear();
        self.dispatch = None;
        self.records
            .iter_mut()
            .enumerate()
            .filter_map(|(id, slot)| slot.take().map(|r| (id, r)))
            .collect()
    }

    pub(crate) fn live_count(&self) -> usize {
        self.records.iter().filter(|r| r.is_some()).count()
    }
}

struct ActiveContext {
    id: ContextId,
    rx: Receiver<Baton>,
}

thread_local! {
    static ACTIVE: RefCell<Option<ActiveContext>> = const { RefCell::new(None) };
}

/// Binds the calling thread to a context identity. Called once at the top of
/// each context thread.
pub(crate) fn install(id: ContextId, rx: Receiver<Baton>) {
    ACTIVE.with(|slot| {
        *slot.borrow_mut() = Some(ActiveContext { id, rx });
    });
}

/// The context bound to the calling thread, or `None` on foreign threads
/// (including the thread that called `run`).
pub(crate) fn current() -> Option<ContextId> {
    ACTIVE.with(|slot| slot.borrow().as_ref().map(|a| a.id))
}

/// Blocks until a baton arrives for the calling context.
///
/// A disconnected channel (records already dropped by finalize) reads as
/// `Exit`. Must only be called from a context thread.
pub(crate) fn recv() -> Baton {
    ACTIVE.with(|slot| {
        let guard = slot.borrow();
        let active = guard
            .as_ref()
            .unwrap_or_else(|| unreachable!("baton receive outside a context thread"));
        active.rx.recv().unwrap_or(Baton::Exit)
    })
}

/// Marker payload for the unwind triggered by finalize.
pub(crate) struct FinalizeUnwind;

/// Unwinds the calling context's stack so finalize can join the thread.
pub(crate) fn unwind_for_finalize() -> ! {
    std::panic::panic_any(FinalizeUnwind)
}

/// True if a caught panic payload is the finalize marker (which must be
/// re-raised, not converted to a handler error).
pub(crate) fn is_finalize_payload(payload: &(dyn std::any::Any + Send)) -> bool {
    payload.is::<FinalizeUnwind>()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc;

    #[test]
    fn current_is_none_on_unbound_threads() {
        assert!(current().is_none());
    }

    #[test]
    fn install_binds_identity_and_receives_batons() {
        let (tx, rx) = mpsc::channel();
        let handle = std::thread::spawn(move || {
            install(7, rx);
            assert_eq!(current(), Some(7));
            match recv() {
                Baton::Resume(t) => t,
                _ => panic!("expected resume"),
            }
        });
        tx.send(Baton::Resume(Time::from_millis(3))).unwrap();
        assert_eq!(handle.join().unwrap(), Time::from_millis(3));
    }

    #[test]
    fn disconnected_channel_reads_as_exit() {
        let (tx, rx) = mpsc::channel::<Baton>();
        drop(tx);
        let handle = std::thread::spawn(move || {
            install(1, rx);
            matches!(recv(), Baton::Exit)
        });
        assert!(handle.join().unwrap());
    }

    #[test]
    fn drained_table_keeps_no_records() {
        let (tx, _rx) = mpsc::channel();
        let mut table = ContextTable::new();
        let id = table.insert(ContextRecord {
            sender: tx,
            resume_timer: None,
            join: None,
        });
        table.pool.push(id);
        table.dispatch = Some(id);
        let drained = table.drain();
        assert_eq!(drained.len(), 1);
        assert_eq!(table.live_count(), 0);
        assert!(table.dispatch.is_none());
    }
}
