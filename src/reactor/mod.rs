//! The reactor: fd readiness, timer dispatch, and cooperative task switching.
//!
//! One reactor runs per process. Its dispatch loop alternates between an OS
//! readiness poll (`polling`, epoll-backed where available) and a timer scan:
//! every ready file descriptor is serviced first, then every timer due at the
//! current event time fires, in registration order. A callback that needs to
//! block calls [`Reactor::pause`], which parks its execution context and
//! hands the loop to a pooled successor; the parked context is resumed by its
//! own timer and the loop notices the switch and restarts its scan.
//!
//! The loop is deliberately thin about failures: the first error or panic
//! escaping a handler stops the loop and is returned from [`Reactor::run`].
//! A supervising layer owns the decision to restart, degrade, or exit.

mod maintenance;

pub use maintenance::MaintenanceTier;
pub(crate) use maintenance::MaintenanceState;

use crate::clock::Clock;
use crate::config::ReactorConfig;
use crate::context::{self, Baton, ContextRecord, ContextTable};
use crate::error::{Error, Result};
use crate::events::EventState;
use crate::ipc::IpcState;
use crate::sync::completion::Completion;
use crate::sync::mutex::ReactorMutex;
use crate::timer::{TimerKind, TimerStore};
use crate::types::{ContextId, FdHandle, ProcessId, Time, TimerHandle};
use parking_lot::Mutex;
use polling::{Event as PollEvent, Poller};
use std::collections::HashMap;
use std::io;
use std::os::unix::io::RawFd;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{mpsc, Arc};
use std::thread;
use std::time::Duration;

/// Callback invoked when a registered file descriptor is readable.
pub(crate) type FdCallback = Box<dyn FnMut(&Reactor, Time) -> Result<()> + Send>;

struct FdSlot {
    fd: RawFd,
    handler: Option<FdCallback>,
}

struct FdRegistry {
    slots: HashMap<usize, FdSlot>,
    next_key: usize,
}

impl FdRegistry {
    fn new() -> Self {
        Self {
            slots: HashMap::new(),
            next_key: 0,
        }
    }

    fn insert(&mut self, fd: RawFd, handler: FdCallback) -> usize {
        let key = self.next_key;
        self.next_key += 1;
        self.slots.insert(
            key,
            FdSlot {
                fd,
                handler: Some(handler),
            },
        );
        key
    }
}

pub(crate) struct Inner {
    pub(crate) config: ReactorConfig,
    clock: Clock,
    running: AtomicBool,
    fault: Mutex<Option<Error>>,
    run_exit: Mutex<Option<mpsc::Sender<Result<()>>>>,
    pub(crate) timers: Mutex<TimerStore>,
    pub(crate) contexts: Mutex<ContextTable>,
    fds: Mutex<FdRegistry>,
    poller: Poller,
    maintenance: Mutex<MaintenanceState>,
    mailbox_registered: AtomicBool,
    pub(crate) ipc: IpcState,
    pub(crate) events: EventState,
}

/// Handle to a process's reactor. Cheap to clone; all clones refer to the
/// same loop.
///
/// Every callback receives a `&Reactor` argument rather than reaching for an
/// ambient global, so components are constructed with an explicit context and
/// remain testable in isolation.
#[derive(Clone)]
pub struct Reactor {
    pub(crate) inner: Arc<Inner>,
}

impl Reactor {
    /// Creates a reactor with default configuration.
    pub fn new() -> Result<Self> {
        Self::with_config(ReactorConfig::default())
    }

    /// Creates a reactor from an explicit configuration. Prefer
    /// [`ReactorBuilder`](crate::ReactorBuilder).
    pub fn with_config(config: ReactorConfig) -> Result<Self> {
        Ok(Self {
            inner: Arc::new(Inner {
                config,
                clock: Clock::new(),
                running: AtomicBool::new(false),
                fault: Mutex::new(None),
                run_exit: Mutex::new(None),
                timers: Mutex::new(TimerStore::new()),
                contexts: Mutex::new(ContextTable::new()),
                fds: Mutex::new(FdRegistry::new()),
                poller: Poller::new()?,
                maintenance: Mutex::new(MaintenanceState::new()),
                mailbox_registered: AtomicBool::new(false),
                ipc: IpcState::new()?,
                events: EventState::new(),
            }),
        })
    }

    /// This process's routing name.
    #[must_use]
    pub fn process_name(&self) -> &ProcessId {
        &self.inner.config.process_name
    }

    /// Current monotonic time.
    #[must_use]
    pub fn monotonic(&self) -> Time {
        self.inner.clock.monotonic()
    }

    /// True while the dispatch loop is running.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.inner.running.load(Ordering::Acquire)
    }

    // ----------------------------------------------------------------
    // Timers
    // ----------------------------------------------------------------

    /// Registers a timer. The callback runs once `wake` passes; its return
    /// value is the next wake time, so a timer is one-shot unless the
    /// callback opts into repetition by returning a new deadline.
    pub fn register_timer<F>(&self, wake: Time, callback: F) -> TimerHandle
    where
        F: FnMut(&Reactor, Time) -> Result<Time> + Send + 'static,
    {
        self.inner
            .timers
            .lock()
            .register(TimerKind::Callback(Box::new(callback)), wake)
    }

    /// Moves a timer's wake time. `Time::NOW` makes it due immediately,
    /// `Time::NEVER` parks it. No-op on a dead handle.
    pub fn update_timer(&self, handle: TimerHandle, wake: Time) {
        self.inner.timers.lock().update(handle, wake);
    }

    /// Cancels a timer. Soft: a callback currently in flight finishes, but
    /// the timer never fires again. No-op on a dead handle.
    pub fn unregister_timer(&self, handle: TimerHandle) {
        self.inner.timers.lock().unregister(handle);
    }

    /// Registers a one-shot callback and returns the completion that will
    /// carry its result. The timer slot is released after the callback runs.
    pub fn register_callback<T, F>(&self, wake: Time, callback: F) -> Completion<T>
    where
        T: Clone + Send + 'static,
        F: FnOnce(&Reactor, Time) -> Result<T> + Send + 'static,
    {
        let completion = self.completion::<T>();
        let done = completion.clone();
        self.inner.timers.lock().register(
            TimerKind::OneShot(Box::new(move |reactor, eventtime| {
                let value = callback(reactor, eventtime)?;
                done.complete(value);
                Ok(())
            })),
            wake,
        );
        completion
    }

    /// Creates an unresolved completion bound to this reactor.
    #[must_use]
    pub fn completion<T: Clone + Send + 'static>(&self) -> Completion<T> {
        Completion::new(self)
    }

    /// Creates a cooperative FIFO mutex bound to this reactor.
    #[must_use]
    pub fn mutex(&self, locked: bool) -> ReactorMutex {
        ReactorMutex::new(self.clone(), locked)
    }

    /// Registers a resume timer for a parked context.
    pub(crate) fn register_resume_timer(&self, ctx: ContextId, wake: Time) -> TimerHandle {
        self.inner.timers.lock().register(TimerKind::Resume(ctx), wake)
    }

    /// Makes a parked context's resume timer due now. No-op if the context is
    /// not parked.
    pub(crate) fn poke_context(&self, ctx: ContextId) {
        let timer = self
            .inner
            .contexts
            .lock()
            .record(ctx)
            .and_then(|r| r.resume_timer);
        if let Some(timer) = timer {
            self.inner.timers.lock().update(timer, Time::NOW);
        }
    }

    // ----------------------------------------------------------------
    // File descriptors
    // ----------------------------------------------------------------

    /// Registers a file descriptor for readability. The callback runs with
    /// the current event time each time the fd reports ready.
    ///
    /// The caller keeps ownership of the descriptor and must keep it open
    /// until [`Reactor::unregister_fd`].
    pub fn register_fd<F>(&self, fd: RawFd, callback: F) -> Result<FdHandle>
    where
        F: FnMut(&Reactor, Time) -> Result<()> + Send + 'static,
    {
        let key = self.inner.fds.lock().insert(fd, Box::new(callback));
        if let Err(err) = self.inner.poller.add(fd, PollEvent::readable(key)) {
            self.inner.fds.lock().slots.remove(&key);
            return Err(err.into());
        }
        Ok(FdHandle(key))
    }

    /// Removes a file descriptor from the poll set.
    pub fn unregister_fd(&self, handle: FdHandle) -> Result<()> {
        let slot = self.inner.fds.lock().slots.remove(&handle.0);
        if let Some(slot) = slot {
            self.inner.poller.delete(slot.fd)?;
        }
        Ok(())
    }

    // ----------------------------------------------------------------
    // Maintenance
    // ----------------------------------------------------------------

    /// Registers an idle-point maintenance hook.
    pub fn register_maintenance<F>(&self, tier: MaintenanceTier, hook: F)
    where
        F: FnMut(&Reactor, Time) + Send + 'static,
    {
        self.inner
            .maintenance
            .lock()
            .add_hook(tier, Box::new(hook));
    }

    /// Last run time of each maintenance tier (cheap, standard, deep).
    #[must_use]
    pub fn maintenance_stats(&self) -> [Time; 3] {
        self.inner.maintenance.lock().stats()
    }

    fn run_idle_maintenance(&self, eventtime: Time) -> bool {
        if !self.inner.config.maintenance.enabled {
            return false;
        }
        let intervals = self.inner.config.maintenance.intervals;
        let Some(tier) = self
            .inner
            .maintenance
            .lock()
            .due_tier(eventtime, &intervals)
        else {
            return false;
        };
        for level in 0..=tier {
            let mut hooks = self.inner.maintenance.lock().take_tier(level);
            for hook in &mut hooks {
                hook(self, eventtime);
            }
            self.inner.maintenance.lock().put_back_tier(level, hooks);
        }
        self.inner.maintenance.lock().stamp(tier, eventtime);
        tracing::trace!(tier, "idle maintenance pass");
        true
    }

    // ----------------------------------------------------------------
    // Pause / resume
    // ----------------------------------------------------------------

    /// Parks the current logical task until `wake` (or an explicit poke) and
    /// returns the event time at which it resumed.
    ///
    /// This is the only suspension point. Called from within the loop, it
    /// keeps the loop alive on a pooled context while the caller sleeps;
    /// called before the loop is running (or from a foreign thread), it falls
    /// back to an OS sleep.
    ///
    /// A task that neither pauses nor returns starves the whole process;
    /// that obligation sits with every handler.
    pub fn pause(&self, wake: Time) -> Time {
        let me = context::current();
        let dispatch = self.dispatch_context();
        match (me, dispatch) {
            (Some(me), Some(d)) if me == d => self.pause_dispatching(me, wake),
            (Some(_), Some(d)) => self.pause_yield(d, wake),
            _ => self.sys_pause(wake),
        }
    }

    /// OS sleep, used when the loop is not running.
    fn sys_pause(&self, wake: Time) -> Time {
        let now = self.monotonic();
        if wake > now {
            thread::sleep(wake.duration_since(now));
        }
        self.monotonic()
    }

    /// Pause called while this context runs the dispatch loop: line up a
    /// successor, arrange our resume timer, hand over the baton, park.
    fn pause_dispatching(&self, me: ContextId, wake: Time) -> Time {
        let next = match self.take_context() {
            Ok(next) => next,
            Err(err) => {
                // Could not line up a successor; the loop cannot continue.
                self.record_fault(err);
                return self.monotonic();
            }
        };
        let timer = self.register_resume_timer(me, wake);
        let sender = {
            let mut contexts = self.inner.contexts.lock();
            if let Some(record) = contexts.record_mut(me) {
                record.resume_timer = Some(timer);
            }
            contexts.dispatch = Some(next);
            contexts.sender_of(next)
        };
        if let Some(sender) = sender {
            let _ = sender.send(Baton::Dispatch);
        }
        self.park_for_resume()
    }

    /// Pause called from a resumed (non-dispatching) context: yield back to
    /// the dispatcher with our new wake time.
    fn pause_yield(&self, dispatcher: ContextId, wake: Time) -> Time {
        let sender = self.inner.contexts.lock().sender_of(dispatcher);
        if let Some(sender) = sender {
            let _ = sender.send(Baton::Reschedule(wake));
        }
        self.park_for_resume()
    }

    fn park_for_resume(&self) -> Time {
        loop {
            match context::recv() {
                Baton::Resume(eventtime) => return eventtime,
                Baton::Exit => context::unwind_for_finalize(),
                Baton::Dispatch | Baton::Reschedule(_) => {
                    debug_assert!(false, "unexpected baton while parked in pause");
                }
            }
        }
    }

    /// Transfers control into a parked context and returns the wake time it
    /// eventually yields back for its resume timer.
    fn switch_resume(&self, target: ContextId, eventtime: Time) -> Time {
        let Some(sender) = self.inner.contexts.lock().sender_of(target) else {
            return Time::NEVER;
        };
        if sender.send(Baton::Resume(eventtime)).is_err() {
            return Time::NEVER;
        }
        loop {
            match context::recv() {
                Baton::Reschedule(wake) => return wake,
                Baton::Exit => context::unwind_for_finalize(),
                Baton::Dispatch | Baton::Resume(_) => {
                    debug_assert!(false, "unexpected baton while resuming a context");
                }
            }
        }
    }

    /// Returns a finished context to the pool and hands the baton back to the
    /// dispatcher. Returns once this context is reused as a dispatcher.
    fn retire_context(&self, me: ContextId) {
        let (timer, sender) = {
            let mut contexts = self.inner.contexts.lock();
            let timer = contexts
                .record_mut(me)
                .and_then(|record| record.resume_timer.take());
            contexts.pool.push(me);
            let sender = contexts.dispatch.and_then(|d| contexts.sender_of(d));
            (timer, sender)
        };
        if let Some(timer) = timer {
            self.inner.timers.lock().unregister(timer);
        }
        if let Some(sender) = sender {
            let _ = sender.send(Baton::Reschedule(Time::NEVER));
        }
        loop {
            match context::recv() {
                Baton::Dispatch => return,
                Baton::Exit => context::unwind_for_finalize(),
                Baton::Resume(_) | Baton::Reschedule(_) => {
                    debug_assert!(false, "unexpected baton while pooled");
                }
            }
        }
    }

    pub(crate) fn dispatch_context(&self) -> Option<ContextId> {
        self.inner.contexts.lock().dispatch
    }

    fn take_context(&self) -> Result<ContextId> {
        {
            let mut contexts = self.inner.contexts.lock();
            while let Some(id) = contexts.pool.pop() {
                if contexts.record(id).is_some() {
                    return Ok(id);
                }
            }
        }
        self.spawn_context()
    }

    fn spawn_context(&self) -> Result<ContextId> {
        let (tx, rx) = mpsc::channel();
        let id = self.inner.contexts.lock().insert(ContextRecord {
            sender: tx,
            resume_timer: None,
            join: None,
        });
        let handle = thread::Builder::new()
            .name(format!("{}-{id}", self.inner.config.thread_name_prefix))
            .stack_size(self.inner.config.thread_stack_size)
            .spawn({
                let reactor = self.clone();
                move || serve(&reactor, id, rx)
            })?;
        if let Some(record) = self.inner.contexts.lock().record_mut(id) {
            record.join = Some(handle);
        }
        Ok(id)
    }

    // ----------------------------------------------------------------
    // Lifecycle
    // ----------------------------------------------------------------

    /// Enters the dispatch loop. Does not return until [`Reactor::end`] is
    /// called (or a handler fails, in which case the error is returned).
    pub fn run(&self) -> Result<()> {
        if self.inner.running.swap(true, Ordering::AcqRel) {
            return Err(Error::AlreadyRunning);
        }
        if let Err(err) = self.ensure_mailbox_registered() {
            self.inner.running.store(false, Ordering::Release);
            return Err(err);
        }
        self.inner.fault.lock().take();
        let (tx, rx) = mpsc::channel();
        *self.inner.run_exit.lock() = Some(tx);
        let first = match self.take_context() {
            Ok(first) => first,
            Err(err) => {
                self.inner.running.store(false, Ordering::Release);
                self.inner.run_exit.lock().take();
                return Err(err);
            }
        };
        let sender = {
            let mut contexts = self.inner.contexts.lock();
            contexts.dispatch = Some(first);
            contexts.sender_of(first)
        };
        if let Some(sender) = sender {
            let _ = sender.send(Baton::Dispatch);
        }
        rx.recv().unwrap_or(Ok(()))
    }

    /// Requests loop exit. Safe to call from any thread or handler; the poll
    /// is woken immediately.
    pub fn end(&self) {
        self.inner.running.store(false, Ordering::Release);
        let _ = self.inner.poller.notify();
    }

    /// Stops and joins every context thread, unwinding parked ones, then
    /// drops all registered timers, fds and peer links. The reactor cannot be
    /// run again afterwards.
    ///
    /// Must not be called from inside a handler.
    pub fn finalize(&self) {
        if context::current().is_some() {
            tracing::error!("finalize called from inside a reactor context; ignored");
            return;
        }
        self.end();
        let records = self.inner.contexts.lock().drain();
        for (_, record) in &records {
            let _ = record.sender.send(Baton::Exit);
        }
        for (id, mut record) in records {
            if let Some(handle) = record.join.take() {
                if handle.join().is_err() {
                    tracing::error!(context = id, "context thread terminated abnormally");
                }
            }
        }
        self.inner.timers.lock().clear();
        let slots: Vec<FdSlot> = {
            let mut fds = self.inner.fds.lock();
            fds.slots.drain().map(|(_, slot)| slot).collect()
        };
        for slot in slots {
            let _ = self.inner.poller.delete(slot.fd);
        }
        self.inner.mailbox_registered.store(false, Ordering::Release);
        self.inner.ipc.clear();
    }

    /// Records the first handler fault and stops the loop.
    pub(crate) fn record_fault(&self, err: Error) {
        tracing::error!(error = %err, "handler fault; stopping dispatch loop");
        {
            let mut fault = self.inner.fault.lock();
            if fault.is_none() {
                *fault = Some(err);
            }
        }
        self.inner.running.store(false, Ordering::Release);
        let _ = self.inner.poller.notify();
    }

    fn notify_run_exit(&self) {
        if let Some(sender) = self.inner.run_exit.lock().take() {
            let fault = self.inner.fault.lock().take();
            let _ = sender.send(match fault {
                Some(err) => Err(err),
                None => Ok(()),
            });
        }
    }

    fn ensure_mailbox_registered(&self) -> Result<()> {
        if self.inner.mailbox_registered.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        let wake_fd = self.inner.ipc.wake_read_fd();
        match self.register_fd(wake_fd, |reactor, eventtime| reactor.drain_mailbox(eventtime)) {
            Ok(_) => Ok(()),
            Err(err) => {
                self.inner.mailbox_registered.store(false, Ordering::Release);
                Err(err)
            }
        }
    }

    // ----------------------------------------------------------------
    // Dispatch loop
    // ----------------------------------------------------------------

    fn dispatch_loop(&self, me: ContextId) {
        let mut busy = true;
        let mut eventtime = self.monotonic();
        let mut ready: Vec<PollEvent> = Vec::new();
        while self.inner.running.load(Ordering::Acquire) {
            let timeout = self.check_timers(me, eventtime, busy);
            busy = false;
            ready.clear();
            match self.inner.poller.wait(&mut ready, Some(timeout)) {
                Ok(_) => {}
                Err(err) if err.kind() == io::ErrorKind::Interrupted => {}
                Err(err) => {
                    self.record_fault(err.into());
                    break;
                }
            }
            eventtime = self.monotonic();
            for event in &ready {
                busy = true;
                self.invoke_fd(event.key, eventtime);
                if self.dispatch_context() != Some(me) {
                    // The handler paused and the loop moved on without us; by
                    // the time control returns here another context is
                    // dispatching. Rejoin the pool and wait for reuse.
                    self.retire_context(me);
                    eventtime = self.monotonic();
                    break;
                }
                if !self.inner.running.load(Ordering::Acquire) {
                    break;
                }
            }
        }
        let mut contexts = self.inner.contexts.lock();
        if contexts.dispatch == Some(me) {
            contexts.dispatch = None;
        }
    }

    /// One timer pass. Returns the poll timeout for this cycle: zero if
    /// anything fired (or the loop is busy), otherwise the clamped distance
    /// to the next deadline.
    fn check_timers(&self, me: ContextId, eventtime: Time, busy: bool) -> Duration {
        let cap = self.inner.config.poll_timeout_cap;
        let floor = self.inner.config.poll_timeout_floor;
        let next = self.inner.timers.lock().next_deadline();
        if eventtime < next {
            if busy {
                return Duration::ZERO;
            }
            if self.run_idle_maintenance(eventtime) {
                return Duration::ZERO;
            }
            if next.is_never() {
                return cap;
            }
            return next.duration_since(eventtime).clamp(floor, cap);
        }
        let due = self.inner.timers.lock().take_due(eventtime);
        for (position, &handle) in due.iter().enumerate() {
            if !self.inner.running.load(Ordering::Acquire) {
                // A fault aborted the cycle; put the rest back for whoever
                // re-enters the loop.
                let mut timers = self.inner.timers.lock();
                for &rest in &due[position..] {
                    timers.requeue(rest);
                }
                return Duration::ZERO;
            }
            let Some(kind) = self.inner.timers.lock().begin_invoke(handle, eventtime) else {
                continue;
            };
            let mut failed = false;
            match kind {
                TimerKind::Callback(mut callback) => {
                    let result = guard_call(|| callback(self, eventtime));
                    let wake = match result {
                        Ok(wake) => wake,
                        Err(err) => {
                            self.record_fault(err);
                            failed = true;
                            Time::NEVER
                        }
                    };
                    self.inner
                        .timers
                        .lock()
                        .restore(handle, TimerKind::Callback(callback), wake);
                }
                TimerKind::OneShot(callback) => {
                    let result = guard_call(|| callback(self, eventtime));
                    self.inner.timers.lock().release(handle);
                    if let Err(err) = result {
                        self.record_fault(err);
                        failed = true;
                    }
                }
                TimerKind::Resume(target) => {
                    let wake = self.switch_resume(target, eventtime);
                    self.inner
                        .timers
                        .lock()
                        .restore(handle, TimerKind::Resume(target), wake);
                }
            }
            if self.dispatch_context() != Some(me) {
                // The callback paused; this scan is stale. Restore the
                // unprocessed remainder and rejoin the pool until reused.
                {
                    let mut timers = self.inner.timers.lock();
                    for &rest in &due[position + 1..] {
                        timers.requeue(rest);
                    }
                }
                self.retire_context(me);
                return Duration::ZERO;
            }
            if failed {
                // Abort the rest of the cycle; the unprocessed remainder
                // stays schedulable for a re-entered loop.
                let mut timers = self.inner.timers.lock();
                for &rest in &due[position + 1..] {
                    timers.requeue(rest);
                }
                return Duration::ZERO;
            }
        }
        Duration::ZERO
    }

    fn invoke_fd(&self, key: usize, eventtime: Time) {
        let Some(mut handler) = ({
            let mut fds = self.inner.fds.lock();
            fds.slots.get_mut(&key).and_then(|slot| slot.handler.take())
        }) else {
            return;
        };
        let result = guard_call(|| handler(self, eventtime));
        let rearm_fd = {
            let mut fds = self.inner.fds.lock();
            match fds.slots.get_mut(&key) {
                Some(slot) => {
                    slot.handler = Some(handler);
                    Some(slot.fd)
                }
                // Unregistered during its own invocation.
                None => None,
            }
        };
        if let Some(fd) = rearm_fd {
            if let Err(err) = self.inner.poller.modify(fd, PollEvent::readable(key)) {
                tracing::warn!(fd, error = %err, "failed to re-arm fd");
            }
        }
        if let Err(err) = result {
            self.record_fault(err);
        }
    }
}

impl std::fmt::Debug for Reactor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Reactor")
            .field("process", self.process_name())
            .field("running", &self.is_running())
            .field("timers", &self.inner.timers.lock().len())
            .finish_non_exhaustive()
    }
}

/// Invokes a handler, converting panics into errors. The finalize unwind
/// marker is re-raised untouched.
pub(crate) fn guard_call<T>(f: impl FnOnce() -> Result<T>) -> Result<T> {
    match std::panic::catch_unwind(AssertUnwindSafe(f)) {
        Ok(result) => result,
        Err(payload) => {
            if context::is_finalize_payload(payload.as_ref()) {
                std::panic::resume_unwind(payload);
            }
            Err(Error::from_panic(payload.as_ref()))
        }
    }
}

/// Context thread main: waits for batons, runs the dispatch loop when told
/// to, and reports loop exit to whoever called `run`.
fn serve(reactor: &Reactor, id: ContextId, rx: mpsc::Receiver<Baton>) {
    context::install(id, rx);
    let outcome = std::panic::catch_unwind(AssertUnwindSafe(|| loop {
        match context::recv() {
            Baton::Dispatch => {
                reactor.dispatch_loop(id);
                reactor.inner.contexts.lock().pool.push(id);
                reactor.notify_run_exit();
            }
            Baton::Exit => break,
            Baton::Resume(_) | Baton::Reschedule(_) => {
                debug_assert!(false, "unexpected baton on an idle context");
            }
        }
    }));
    if let Err(payload) = outcome {
        if context::is_finalize_payload(payload.as_ref()) {
            tracing::debug!(context = id, "context unwound for finalize");
            return;
        }
        let err = Error::from_panic(payload.as_ref());
        tracing::error!(context = id, error = %err, "context thread died");
        reactor.record_fault(err);
        // Unblock a dispatcher that might be waiting on this context, then
        // unblock run().
        if let Some(dispatcher) = reactor.dispatch_context() {
            if dispatcher != id {
                if let Some(sender) = reactor.inner.contexts.lock().sender_of(dispatcher) {
                    let _ = sender.send(Baton::Reschedule(Time::NEVER));
                }
            }
        }
        reactor.notify_run_exit();
    }
}
