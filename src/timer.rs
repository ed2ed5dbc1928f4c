//! Timer store: deadline heap with lazy deletion.
//!
//! Timers live in a generation-tagged slot arena; a min-heap keyed by wake
//! time answers "what is the next deadline" in O(log n). Heap entries are
//! never removed eagerly: rescheduling pushes a fresh entry and stale ones
//! are discarded when they surface, so cancellation and rescheduling are safe
//! while a dispatch scan is in flight.
//!
//! # Same-cycle ordering contract
//!
//! All timers due within one dispatch cycle fire in *registration* order
//! (slot sequence number), not deadline order. Two timers with close but
//! distinct deadlines that become due in the same cycle therefore run in the
//! order they were registered. Lifecycle sequences rely on this; changing it
//! is a behavior change, not a cleanup.
//!
//! # Invocation protocol
//!
//! The dispatch loop drives a three-step protocol so a callback can touch the
//! store (register, reschedule, unregister, even itself) while it runs:
//!
//! 1. [`TimerStore::take_due`] pops the due heap entries and returns live
//!    handles in registration order;
//! 2. [`TimerStore::begin_invoke`] re-checks dueness, resets the wake time to
//!    [`Time::NEVER`] and moves the callback out of the slot;
//! 3. [`TimerStore::restore`] (or [`TimerStore::release`] for one-shots) puts
//!    the callback back and applies the rescheduled wake time returned by the
//!    callback; the return value wins over any update made mid-invocation.

use crate::error::Result;
use crate::reactor::Reactor;
use crate::types::{ContextId, SlotRef, Time, TimerHandle};
use smallvec::SmallVec;
use std::cmp::Ordering;
use std::collections::BinaryHeap;

/// Repeating timer callback: receives the event time, returns the next wake
/// time (`Time::NEVER` to stop).
pub(crate) type TimerCallback = Box<dyn FnMut(&Reactor, Time) -> Result<Time> + Send>;

/// One-shot callback: the slot is released after it runs.
pub(crate) type OneShotCallback = Box<dyn FnOnce(&Reactor, Time) -> Result<()> + Send>;

/// What a timer does when it fires.
pub(crate) enum TimerKind {
    /// Ordinary callback; its return value reschedules the timer.
    Callback(TimerCallback),
    /// Runs once, then the slot is released.
    OneShot(OneShotCallback),
    /// Resumes a parked execution context; the context's eventual yield value
    /// reschedules the timer.
    Resume(ContextId),
}

enum SlotState {
    Vacant,
    Armed(TimerKind),
    /// Callback moved out by `begin_invoke`; restored or released later.
    Taken,
}

struct TimerSlot {
    generation: u32,
    /// Registration sequence; fixes same-cycle firing order.
    seq: u64,
    wake: Time,
    state: SlotState,
}

#[derive(PartialEq, Eq)]
struct HeapEntry {
    wake: Time,
    slot: SlotRef,
}

impl Ord for HeapEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        // Reversed for a min-heap on wake time.
        other
            .wake
            .cmp(&self.wake)
            .then_with(|| other.slot.index.cmp(&self.slot.index))
            .then_with(|| other.slot.generation.cmp(&self.slot.generation))
    }
}

impl PartialOrd for HeapEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Slot arena plus deadline heap.
pub(crate) struct TimerStore {
    slots: Vec<TimerSlot>,
    free: Vec<u32>,
    heap: BinaryHeap<HeapEntry>,
    next_seq: u64,
}

impl TimerStore {
    pub(crate) fn new() -> Self {
        Self {
            slots: Vec::new(),
            free: Vec::new(),
            heap: BinaryHeap::new(),
            next_seq: 0,
        }
    }

    /// Registers a timer, returning its handle.
    pub(crate) fn register(&mut self, kind: TimerKind, wake: Time) -> TimerHandle {
        let seq = self.next_seq;
        self.next_seq += 1;
        let index = if let Some(index) = self.free.pop() {
            let slot = &mut self.slots[index as usize];
            slot.seq = seq;
            slot.wake = wake;
            slot.state = SlotState::Armed(kind);
            index
        } else {
            self.slots.push(TimerSlot {
                generation: 0,
                seq,
                wake,
                state: SlotState::Armed(kind),
            });
            u32::try_from(self.slots.len() - 1).unwrap_or(u32::MAX)
        };
        let slot = SlotRef {
            index,
            generation: self.slots[index as usize].generation,
        };
        if !wake.is_never() {
            self.heap.push(HeapEntry { wake, slot });
        }
        TimerHandle(slot)
    }

    /// Moves a timer's wake time. No-op on a dead handle.
    ///
    /// If the timer is currently being invoked, the callback's return value
    /// will overwrite this update when the invocation finishes.
    pub(crate) fn update(&mut self, handle: TimerHandle, wake: Time) {
        let Some(slot) = self.live_mut(handle) else {
            return;
        };
        slot.wake = wake;
        if !wake.is_never() {
            self.heap.push(HeapEntry {
                wake,
                slot: handle.0,
            });
        }
    }

    /// Cancels a timer and releases its slot. No-op on a dead handle.
    ///
    /// Heap entries for the timer go stale and are discarded lazily; a
    /// callback currently moved out by `begin_invoke` is dropped when the
    /// invocation tries to restore it.
    pub(crate) fn unregister(&mut self, handle: TimerHandle) {
        if self.live_mut(handle).is_none() {
            return;
        }
        let slot = &mut self.slots[handle.0.index as usize];
        slot.generation = slot.generation.wrapping_add(1);
        slot.wake = Time::NEVER;
        slot.state = SlotState::Vacant;
        self.free.push(handle.0.index);
    }

    /// Next concrete deadline, or `Time::NEVER` if nothing is scheduled.
    pub(crate) fn next_deadline(&mut self) -> Time {
        while let Some(top) = self.heap.peek() {
            if self.entry_is_live(top) {
                return top.wake;
            }
            self.heap.pop();
        }
        Time::NEVER
    }

    /// Pops every entry due at `now` and returns the live handles in
    /// registration order, deduplicated.
    pub(crate) fn take_due(&mut self, now: Time) -> SmallVec<[TimerHandle; 8]> {
        let mut due: SmallVec<[(u64, TimerHandle); 8]> = SmallVec::new();
        loop {
            match self.heap.peek() {
                Some(top) if top.wake <= now => {}
                _ => break,
            }
            let Some(entry) = self.heap.pop() else {
                break;
            };
            if self.entry_is_live(&entry) {
                let seq = self.slots[entry.slot.index as usize].seq;
                due.push((seq, TimerHandle(entry.slot)));
            }
        }
        due.sort_unstable_by_key(|&(seq, _)| seq);
        due.dedup_by_key(|&mut (seq, _)| seq);
        due.into_iter().map(|(_, h)| h).collect()
    }

    /// Re-inserts a heap entry for a handle whose due entry was popped but
    /// never invoked (a dispatch scan aborted by a context switch).
    pub(crate) fn requeue(&mut self, handle: TimerHandle) {
        let Some(slot) = self.live_mut(handle) else {
            return;
        };
        let wake = slot.wake;
        if !wake.is_never() {
            self.heap.push(HeapEntry {
                wake,
                slot: handle.0,
            });
        }
    }

    /// Starts an invocation: re-checks dueness against `now`, resets the wake
    /// time to `Time::NEVER` and moves the callback out.
    ///
    /// Returns `None` if the timer died or was pushed past `now` since the
    /// due scan collected it.
    pub(crate) fn begin_invoke(&mut self, handle: TimerHandle, now: Time) -> Option<TimerKind> {
        let slot = self.live_mut(handle)?;
        if slot.wake > now {
            return None;
        }
        slot.wake = Time::NEVER;
        match std::mem::replace(&mut slot.state, SlotState::Taken) {
            SlotState::Armed(kind) => Some(kind),
            other => {
                slot.state = other;
                None
            }
        }
    }

    /// Finishes an invocation: restores the callback and applies the
    /// rescheduled wake time. Drops the callback if the timer was
    /// unregistered mid-invocation.
    pub(crate) fn restore(&mut self, handle: TimerHandle, kind: TimerKind, wake: Time) {
        let Some(slot) = self.live_mut(handle) else {
            return;
        };
        if !matches!(slot.state, SlotState::Taken) {
            return;
        }
        slot.state = SlotState::Armed(kind);
        slot.wake = wake;
        if !wake.is_never() {
            self.heap.push(HeapEntry {
                wake,
                slot: handle.0,
            });
        }
    }

    /// Finishes a one-shot invocation by releasing the slot.
    pub(crate) fn release(&mut self, handle: TimerHandle) {
        let Some(slot) = self.live_mut(handle) else {
            return;
        };
        if matches!(slot.state, SlotState::Taken) {
            slot.generation = slot.generation.wrapping_add(1);
            slot.wake = Time::NEVER;
            slot.state = SlotState::Vacant;
            self.free.push(handle.0.index);
        }
    }

    /// Drops every slot and heap entry. Used by reactor finalize.
    pub(crate) fn clear(&mut self) {
        self.slots.clear();
        self.free.clear();
        self.heap.clear();
    }

    pub(crate) fn len(&self) -> usize {
        self.slots
            .iter()
            .filter(|s| !matches!(s.state, SlotState::Vacant))
            .count()
    }

    fn entry_is_live(&self, entry: &HeapEntry) -> bool {
        self.slots
            .get(entry.slot.index as usize)
            .is_some_and(|slot| slot.generation == entry.slot.generation && slot.wake == entry.wake)
    }

    fn live_mut(&mut self, handle: TimerHandle) -> Option<&mut TimerSlot> {
        let slot = self.slots.get_mut(handle.0.index as usize)?;
        (slot.generation == handle.0.generation && !matches!(slot.state, SlotState::Vacant))
            .then_some(slot)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn noop() -> TimerKind {
        TimerKind::Callback(Box::new(|_, _| Ok(Time::NEVER)))
    }

    #[test]
    fn next_deadline_tracks_earliest_timer() {
        let mut store = TimerStore::new();
        store.register(noop(), Time::from_millis(50));
        store.register(noop(), Time::from_millis(20));
        store.register(noop(), Time::NEVER);
        assert_eq!(store.next_deadline(), Time::from_millis(20));
    }

    #[test]
    fn due_timers_fire_in_registration_order_not_deadline_order() {
        let mut store = TimerStore::new();
        // Registered first, due later within the same cycle.
        let a = store.register(noop(), Time::from_millis(30));
        let b = store.register(noop(), Time::from_millis(10));
        let due = store.take_due(Time::from_millis(40));
        assert_eq!(due.as_slice(), &[a, b]);
    }

    #[test]
    fn advancing_the_clock_fires_each_timer_exactly_once() {
        let mut store = TimerStore::new();
        let a = store.register(noop(), Time::NOW);
        let b = store.register(noop(), Time::from_millis(5));

        let due = store.take_due(Time::NOW);
        assert_eq!(due.as_slice(), &[a]);
        let kind = store.begin_invoke(a, Time::NOW).expect("a is due");
        store.restore(a, kind, Time::NEVER);

        // Nothing further due until the second deadline passes.
        assert!(store.take_due(Time::from_millis(4)).is_empty());
        let due = store.take_due(Time::from_millis(5));
        assert_eq!(due.as_slice(), &[b]);
    }

    #[test]
    fn unregistered_timer_never_fires() {
        let mut store = TimerStore::new();
        let b = store.register(noop(), Time::from_millis(5));
        store.unregister(b);
        assert!(store.take_due(Time::from_millis(10)).is_empty());
        assert_eq!(store.next_deadline(), Time::NEVER);
    }

    #[test]
    fn update_reschedules_and_stale_heap_entries_are_discarded() {
        let mut store = TimerStore::new();
        let t = store.register(noop(), Time::from_millis(5));
        store.update(t, Time::from_millis(50));
        assert_eq!(store.next_deadline(), Time::from_millis(50));
        assert!(store.take_due(Time::from_millis(10)).is_empty());
        let due = store.take_due(Time::from_millis(50));
        assert_eq!(due.as_slice(), &[t]);
    }

    #[test]
    fn duplicate_entries_for_one_timer_dedupe() {
        let mut store = TimerStore::new();
        let t = store.register(noop(), Time::from_millis(5));
        // Same wake value pushed twice: both heap entries validate.
        store.update(t, Time::from_millis(5));
        let due = store.take_due(Time::from_millis(5));
        assert_eq!(due.as_slice(), &[t]);
    }

    #[test]
    fn begin_invoke_skips_timers_pushed_to_the_future_mid_scan() {
        let mut store = TimerStore::new();
        let t = store.register(noop(), Time::from_millis(5));
        let due = store.take_due(Time::from_millis(5));
        assert_eq!(due.as_slice(), &[t]);
        // An earlier callback in the same scan rescheduled it.
        store.update(t, Time::from_millis(100));
        assert!(store.begin_invoke(t, Time::from_millis(5)).is_none());
        // Still armed for the new deadline.
        assert_eq!(store.next_deadline(), Time::from_millis(100));
    }

    #[test]
    fn callback_return_value_wins_over_mid_invocation_update() {
        let mut store = TimerStore::new();
        let t = store.register(noop(), Time::NOW);
        let kind = store.begin_invoke(t, Time::NOW).expect("due");
        store.update(t, Time::from_millis(10));
        store.restore(t, kind, Time::from_millis(99));
        assert_eq!(store.next_deadline(), Time::from_millis(99));
    }

    #[test]
    fn unregister_during_invocation_drops_the_callback() {
        let mut store = TimerStore::new();
        let t = store.register(noop(), Time::NOW);
        let kind = store.begin_invoke(t, Time::NOW).expect("due");
        store.unregister(t);
        store.restore(t, kind, Time::from_millis(10));
        assert_eq!(store.next_deadline(), Time::NEVER);
        assert_eq!(store.len(), 0);
    }

    #[test]
    fn one_shot_release_recycles_the_slot_with_a_new_generation() {
        let mut store = TimerStore::new();
        let t = store.register(TimerKind::OneShot(Box::new(|_, _| Ok(()))), Time::NOW);
        let _kind = store.begin_invoke(t, Time::NOW).expect("due");
        store.release(t);
        assert_eq!(store.len(), 0);
        let t2 = store.register(noop(), Time::from_millis(1));
        // Recycled index, fresh generation: the old handle is dead.
        store.update(t, Time::from_millis(500));
        assert_eq!(store.next_deadline(), Time::from_millis(1));
        let due = store.take_due(Time::from_millis(1));
        assert_eq!(due.as_slice(), &[t2]);
    }

    #[test]
    fn requeue_restores_an_aborted_scan_entry() {
        let mut store = TimerStore::new();
        let t = store.register(noop(), Time::from_millis(5));
        let due = store.take_due(Time::from_millis(5));
        assert_eq!(due.as_slice(), &[t]);
        // Scan aborted before invoking; the entry must come back.
        store.requeue(t);
        assert_eq!(store.next_deadline(), Time::from_millis(5));
    }
}
