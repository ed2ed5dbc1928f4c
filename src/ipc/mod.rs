//! Cross-thread and cross-process callback delivery.
//!
//! # Same-process handoff
//!
//! Foreign threads enqueue callbacks onto a lock-free queue and write one
//! `b'.'` byte to the reactor's wake pipe. The loop's wake handler drains the
//! pipe (the byte count is meaningless; signals coalesce) and then drains
//! the whole queue, scheduling each callback as a one-shot timer.
//!
//! # Cross-process handoff
//!
//! Each peer holds duplicates of this reactor's inbound *data* pipe (framed
//! [`Envelope`](wire::Envelope) messages) and *wake* pipe write ends; sending
//! is one frame write plus one `b'-'` wake byte. Because the two pipes are
//! independent, a wake byte can be observed before its frame is readable;
//! that race is benign and the drain retries with bounded backoff instead of
//! treating it as an error.
//!
//! Messages carry data only. An invoke names a command that the destination
//! resolves through its own registered command table; a reply is correlated
//! back to the origin's [`Completion`] by the `(command, wake_time)` key.

pub(crate) mod pipe;
pub mod wire;

use crate::error::{Error, Result};
use crate::reactor::Reactor;
use crate::sync::completion::Completion;
use crate::timer::{OneShotCallback, TimerKind};
use crate::types::{ProcessId, Time};
use crossbeam_queue::SegQueue;
use parking_lot::Mutex;
use pipe::PipeFd;
use serde_json::Value;
use std::collections::HashMap;
use std::io;
use std::os::unix::io::RawFd;
use std::sync::Arc;
use wire::{Envelope, FrameBuffer, ReplyKey};

/// Wake byte written for local (same-process) deliveries.
const WAKE_LOCAL: u8 = b'.';
/// Wake byte written by peer processes.
const WAKE_REMOTE: u8 = b'-';

/// Handler for a named command arriving from a peer process.
pub(crate) type CommandHandler = Arc<dyn Fn(&Reactor, Time, &Value) -> Result<Value> + Send + Sync>;

struct AsyncCall {
    wake: Time,
    callback: OneShotCallback,
}

/// Everything the reactor owns for message delivery.
pub(crate) struct IpcState {
    wake_read: PipeFd,
    wake_write: PipeFd,
    inbound_read: PipeFd,
    inbound_write: PipeFd,
    inbound_buf: Mutex<FrameBuffer>,
    local_queue: SegQueue<AsyncCall>,
    peers: Mutex<HashMap<ProcessId, PeerSender>>,
    replies: Mutex<HashMap<ReplyKey, Completion<Value>>>,
    commands: Mutex<HashMap<String, CommandHandler>>,
}

impl IpcState {
    pub(crate) fn new() -> io::Result<Self> {
        let (wake_read, wake_write) = pipe::wake_pipe()?;
        let (inbound_read, inbound_write) = pipe::data_pipe()?;
        Ok(Self {
            wake_read,
            wake_write,
            inbound_read,
            inbound_write,
            inbound_buf: Mutex::new(FrameBuffer::new()),
            local_queue: SegQueue::new(),
            peers: Mutex::new(HashMap::new()),
            replies: Mutex::new(HashMap::new()),
            commands: Mutex::new(HashMap::new()),
        })
    }

    pub(crate) fn wake_read_fd(&self) -> RawFd {
        self.wake_read.raw()
    }

    /// Drains the wake pipe, reporting which kinds of wake bytes arrived.
    fn drain_wake(&self) -> io::Result<(bool, bool)> {
        let mut local = false;
        let mut remote = false;
        let mut buf = [0u8; 4096];
        loop {
            let n = pipe::try_read(self.wake_read.raw(), &mut buf)?;
            if n == 0 {
                return Ok((local, remote));
            }
            for &byte in &buf[..n] {
                match byte {
                    WAKE_REMOTE => remote = true,
                    _ => local = true,
                }
            }
        }
    }

    pub(crate) fn clear(&self) {
        self.peers.lock().clear();
        self.replies.lock().clear();
        while self.local_queue.pop().is_some() {}
    }
}

/// Sending half of a link to one peer process: duplicates of that peer's
/// inbound data and wake pipe write ends.
struct PeerSender {
    data: PipeFd,
    wake: PipeFd,
}

/// Capability to send messages to one process.
///
/// Created by the *receiving* reactor with [`Reactor::make_link`] and
/// installed into the *sending* reactor with [`Reactor::link_process`]; a
/// bidirectional pairing does one exchange in each direction. The link holds
/// duplicated descriptors, so it stays valid across `fork`-style process
/// spawning.
pub struct PeerLink {
    process: ProcessId,
    data: PipeFd,
    wake: PipeFd,
}

impl PeerLink {
    /// The process this link delivers to.
    #[must_use]
    pub fn process(&self) -> &ProcessId {
        &self.process
    }
}

impl std::fmt::Debug for PeerLink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PeerLink")
            .field("process", &self.process)
            .finish_non_exhaustive()
    }
}

impl Reactor {
    // ----------------------------------------------------------------
    // Same-process (cross-thread) delivery
    // ----------------------------------------------------------------

    /// Schedules a callback onto the loop from any thread, due immediately.
    pub fn register_async_callback<F>(&self, callback: F)
    where
        F: FnOnce(&Reactor, Time) -> Result<()> + Send + 'static,
    {
        self.register_async_callback_at(Time::NOW, callback);
    }

    /// Schedules a callback onto the loop from any thread, due at `wake`.
    pub fn register_async_callback_at<F>(&self, wake: Time, callback: F)
    where
        F: FnOnce(&Reactor, Time) -> Result<()> + Send + 'static,
    {
        self.inner.ipc.local_queue.push(AsyncCall {
            wake,
            callback: Box::new(callback),
        });
        pipe::write_wake_byte(self.inner.ipc.wake_write.raw(), WAKE_LOCAL);
    }

    /// Resolves a completion from a foreign thread by routing the resolution
    /// through the loop.
    pub fn async_complete<T>(&self, completion: &Completion<T>, value: T)
    where
        T: Clone + Send + 'static,
    {
        let completion = completion.clone();
        self.register_async_callback(move |_, _| {
            completion.complete(value);
            Ok(())
        });
    }

    // ----------------------------------------------------------------
    // Peer links
    // ----------------------------------------------------------------

    /// Creates the sending half of a link *to this reactor*, to be installed
    /// in a peer with [`Reactor::link_process`].
    pub fn make_link(&self) -> Result<PeerLink> {
        Ok(PeerLink {
            process: self.process_name().clone(),
            data: self.inner.ipc.inbound_write.dup()?,
            wake: self.inner.ipc.wake_write.dup()?,
        })
    }

    /// Installs a link so this reactor can send to `link.process()`.
    pub fn link_process(&self, link: PeerLink) {
        tracing::info!(peer = %link.process, process = %self.process_name(), "linked peer process");
        self.inner.ipc.peers.lock().insert(
            link.process,
            PeerSender {
                data: link.data,
                wake: link.wake,
            },
        );
    }

    /// Names of every linked peer process.
    #[must_use]
    pub fn linked_processes(&self) -> Vec<ProcessId> {
        self.inner.ipc.peers.lock().keys().cloned().collect()
    }

    /// Registers a handler for a named command arriving from peers.
    pub fn register_command<F>(&self, name: impl Into<String>, handler: F)
    where
        F: Fn(&Reactor, Time, &Value) -> Result<Value> + Send + Sync + 'static,
    {
        self.inner
            .ipc
            .commands
            .lock()
            .insert(name.into(), Arc::new(handler));
    }

    // ----------------------------------------------------------------
    // Cross-process submission
    // ----------------------------------------------------------------

    /// Sends a fire-and-forget command to a peer, to run at `wake`
    /// (`Time::NOW` for the peer's next cycle).
    pub fn submit(&self, process: &ProcessId, command: wire::Command, wake: Time) -> Result<()> {
        self.send_envelope(
            process,
            Envelope::Invoke {
                command,
                wake_time: wake,
                reply_to: None,
            },
        )
    }

    /// Sends a command expecting a reply; the returned completion resolves
    /// with the destination handler's result.
    pub fn submit_with_reply(
        &self,
        process: &ProcessId,
        command: wire::Command,
        wake: Time,
    ) -> Result<Completion<Value>> {
        let completion = self.completion::<Value>();
        self.inner
            .ipc
            .replies
            .lock()
            .insert((command.name.clone(), wake), completion.clone());
        self.send_envelope(
            process,
            Envelope::Invoke {
                command,
                wake_time: wake,
                reply_to: Some(self.process_name().clone()),
            },
        )?;
        Ok(completion)
    }

    /// Sends a command and suspends the current logical task until the reply
    /// arrives (or `timeout` passes, yielding `fallback`).
    pub fn call_and_wait(
        &self,
        process: &ProcessId,
        command: wire::Command,
        wake: Time,
        timeout: Time,
        fallback: Value,
    ) -> Result<Value> {
        let completion = self.submit_with_reply(process, command, wake)?;
        Ok(completion.wait(timeout, fallback))
    }

    /// Frames and sends an envelope to a peer, then wakes it.
    pub(crate) fn send_envelope(&self, process: &ProcessId, envelope: Envelope) -> Result<()> {
        let frame = wire::encode_frame(&envelope)?;
        let peers = self.inner.ipc.peers.lock();
        let Some(sender) = peers.get(process) else {
            return Err(Error::UnknownPeer(process.clone()));
        };
        pipe::write_all(sender.data.raw(), &frame)?;
        pipe::write_wake_byte(sender.wake.raw(), WAKE_REMOTE);
        tracing::trace!(peer = %process, "sent envelope");
        Ok(())
    }

    // ----------------------------------------------------------------
    // Inbound
    // ----------------------------------------------------------------

    /// Wake-pipe handler: drains the wake bytes, then whichever delivery
    /// queues they announced.
    pub(crate) fn drain_mailbox(&self, eventtime: Time) -> Result<()> {
        let (local, remote) = self.inner.ipc.drain_wake()?;
        tracing::trace!(local, remote, "mailbox wake");
        if remote {
            self.drain_inbound(eventtime)?;
        }
        if local {
            while let Some(call) = self.inner.ipc.local_queue.pop() {
                self.inner
                    .timers
                    .lock()
                    .register(TimerKind::OneShot(call.callback), call.wake);
            }
        }
        Ok(())
    }

    /// Drains framed messages from peers. A wake byte can outrun its frame
    /// across the process boundary; that queue-empty race is retried with
    /// bounded backoff, never surfaced.
    fn drain_inbound(&self, eventtime: Time) -> Result<()> {
        let limit = self.inner.config.inbound_retry_limit;
        let delay = self.inner.config.inbound_retry_delay;
        let mut handled: u32 = 0;
        let mut tries: u32 = 0;
        loop {
            self.fill_inbound()?;
            let frame = self.inner.ipc.inbound_buf.lock().next_frame()?;
            match frame {
                Some(envelope) => {
                    handled += 1;
                    self.dispatch_envelope(envelope, eventtime)?;
                }
                None => {
                    tries += 1;
                    if handled > 0 || tries > limit {
                        break;
                    }
                    std::thread::sleep(delay);
                }
            }
        }
        if handled == 0 {
            tracing::debug!(tries, "remote wake with no readable frame");
        }
        Ok(())
    }

    fn fill_inbound(&self) -> Result<()> {
        let fd = self.inner.ipc.inbound_read.raw();
        let mut chunk = [0u8; 4096];
        loop {
            let n = pipe::try_read(fd, &mut chunk)?;
            if n == 0 {
                return Ok(());
            }
            self.inner.ipc.inbound_buf.lock().extend(&chunk[..n]);
        }
    }

    fn dispatch_envelope(&self, envelope: Envelope, _eventtime: Time) -> Result<()> {
        match envelope {
            Envelope::Invoke {
                command,
                wake_time,
                reply_to,
            } => {
                let handler = self.inner.ipc.commands.lock().get(&command.name).cloned();
                let Some(handler) = handler else {
                    tracing::warn!(command = %command.name, "unknown command; ignored");
                    return Ok(());
                };
                let name = command.name;
                let params = command.params;
                self.inner.timers.lock().register(
                    TimerKind::OneShot(Box::new(move |reactor, eventtime| {
                        let result = handler(reactor, eventtime, &params)?;
                        if let Some(origin) = reply_to {
                            reactor.send_envelope(
                                &origin,
                                Envelope::Reply {
                                    command: name,
                                    wake_time,
                                    result,
                                },
                            )?;
                        }
                        Ok(())
                    })),
                    wake_time,
                );
                Ok(())
            }
            Envelope::Reply {
                command,
                wake_time,
                result,
            } => {
                let completion = self.inner.ipc.replies.lock().remove(&(command, wake_time));
                match completion {
                    Some(completion) => completion.complete(result),
                    None => tracing::debug!("reply with no matching waiter; dropped"),
                }
                Ok(())
            }
            Envelope::Event { name, args } => self.run_event_handlers(&name, &args).map(|_| ()),
            Envelope::EventBarrier {
                name,
                args,
                reply_to,
            } => {
                self.run_event_handlers(&name, &args)?;
                self.send_envelope(
                    &reply_to,
                    Envelope::BarrierDone {
                        name,
                        process: self.process_name().clone(),
                    },
                )
            }
            Envelope::BarrierDone { name, process } => {
                tracing::debug!(event = %name, peer = %process, "barrier acknowledged");
                self.inner.events.barrier_done(&process);
                Ok(())
            }
        }
    }
}
