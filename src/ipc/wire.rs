//! Wire format for cross-process messages.
//!
//! Messages are a tagged [`Envelope`] enum carrying only serializable data,
//! never a function reference. The destination dispatches on the tag: invoke
//! requests go through its registered command table, replies through its
//! correlation table, events through its event registry.
//!
//! Frames on the data pipe are a 4-byte little-endian length prefix followed
//! by the JSON-encoded envelope. The wake pipe is a separate channel; the
//! reader must tolerate a wake byte arriving before its frame is readable.

use crate::error::{Error, Result};
use crate::types::{ProcessId, Time};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::io;

/// An application command: a dispatch tag plus JSON parameters.
///
/// The name must resolve to a handler registered with
/// [`Reactor::register_command`](crate::Reactor::register_command) in the
/// destination process.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Command {
    /// Dispatch tag.
    pub name: String,
    /// Parameters, interpreted by the destination handler.
    pub params: Value,
}

impl Command {
    /// Creates a command with parameters.
    #[must_use]
    pub fn new(name: impl Into<String>, params: Value) -> Self {
        Self {
            name: name.into(),
            params,
        }
    }

    /// Creates a parameterless command.
    #[must_use]
    pub fn bare(name: impl Into<String>) -> Self {
        Self::new(name, Value::Null)
    }
}

/// Correlation key for replies: the command tag plus the wake time it was
/// submitted with. Purely logical: no clock comparison crosses processes.
pub(crate) type ReplyKey = (String, Time);

/// A message between processes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Envelope {
    /// Run a command at `wake_time`; if `reply_to` is set, send the result
    /// back as a [`Envelope::Reply`] keyed by `(command.name, wake_time)`.
    Invoke {
        /// The command to dispatch.
        command: Command,
        /// When the destination should run it.
        wake_time: Time,
        /// Origin process expecting a reply, if any.
        reply_to: Option<ProcessId>,
    },
    /// Result of an invoke that requested a reply.
    Reply {
        /// Echoed command tag (first half of the correlation key).
        command: String,
        /// Echoed wake time (second half of the correlation key).
        wake_time: Time,
        /// The destination handler's return value.
        result: Value,
    },
    /// Fire-and-forget event broadcast; handlers run in registration order.
    Event {
        /// Event name (`"<subsystem>:<event>"`).
        name: String,
        /// Event arguments.
        args: Vec<Value>,
    },
    /// Event delivery that must be acknowledged with
    /// [`Envelope::BarrierDone`] once local handlers have run.
    EventBarrier {
        /// Event name.
        name: String,
        /// Event arguments.
        args: Vec<Value>,
        /// Process waiting on the barrier.
        reply_to: ProcessId,
    },
    /// Barrier acknowledgment.
    BarrierDone {
        /// Event name, for logging.
        name: String,
        /// The process that finished its handlers.
        process: ProcessId,
    },
}

/// Largest accepted frame. Control messages are tiny; anything bigger is a
/// corrupt length prefix.
const MAX_FRAME_LEN: usize = 1 << 24;

/// Encodes an envelope as a length-prefixed frame.
pub(crate) fn encode_frame(envelope: &Envelope) -> Result<Vec<u8>> {
    let body = serde_json::to_vec(envelope)?;
    let len = u32::try_from(body.len()).map_err(|_| {
        Error::Io(io::Error::new(
            io::ErrorKind::InvalidData,
            "oversized message frame",
        ))
    })?;
    let mut frame = Vec::with_capacity(4 + body.len());
    frame.extend_from_slice(&len.to_le_bytes());
    frame.extend_from_slice(&body);
    Ok(frame)
}

/// Reassembles frames from arbitrarily-split pipe reads.
pub(crate) struct FrameBuffer {
    buf: Vec<u8>,
}

impl FrameBuffer {
    pub(crate) fn new() -> Self {
        Self { buf: Vec::new() }
    }

    pub(crate) fn extend(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    /// Extracts the next complete envelope, or `None` if the buffer holds
    /// only a partial frame.
    pub(crate) fn next_frame(&mut self) -> Result<Option<Envelope>> {
        if self.buf.len() < 4 {
            return Ok(None);
        }
        let len = u32::from_le_bytes([self.buf[0], self.buf[1], self.buf[2], self.buf[3]]) as usize;
        if len > MAX_FRAME_LEN {
            return Err(Error::Io(io::Error::new(
                io::ErrorKind::InvalidData,
                "corrupt frame length",
            )));
        }
        if self.buf.len() < 4 + len {
            return Ok(None);
        }
        let envelope = serde_json::from_slice(&self.buf[4..4 + len])?;
        self.buf.drain(..4 + len);
        Ok(Some(envelope))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Envelope {
        Envelope::Invoke {
            command: Command::new("set_target", serde_json::json!({"value": 205.0})),
            wake_time: Time::NOW,
            reply_to: Some(ProcessId::new("display")),
        }
    }

    #[test]
    fn envelope_survives_framing() {
        let frame = encode_frame(&sample()).unwrap();
        let mut buffer = FrameBuffer::new();
        buffer.extend(&frame);
        assert_eq!(buffer.next_frame().unwrap(), Some(sample()));
        assert_eq!(buffer.next_frame().unwrap(), None);
    }

    #[test]
    fn partial_frames_wait_for_the_rest() {
        let frame = encode_frame(&sample()).unwrap();
        let (head, tail) = frame.split_at(frame.len() / 2);
        let mut buffer = FrameBuffer::new();
        buffer.extend(head);
        assert_eq!(buffer.next_frame().unwrap(), None);
        buffer.extend(tail);
        assert_eq!(buffer.next_frame().unwrap(), Some(sample()));
    }

    #[test]
    fn back_to_back_frames_come_out_in_order() {
        let first = encode_frame(&sample()).unwrap();
        let second = encode_frame(&Envelope::BarrierDone {
            name: "core:ready".to_string(),
            process: ProcessId::new("display"),
        })
        .unwrap();
        let mut buffer = FrameBuffer::new();
        buffer.extend(&first);
        buffer.extend(&second);
        assert!(matches!(
            buffer.next_frame().unwrap(),
            Some(Envelope::Invoke { .. })
        ));
        assert!(matches!(
            buffer.next_frame().unwrap(),
            Some(Envelope::BarrierDone { .. })
        ));
    }

    #[test]
    fn corrupt_length_prefix_is_rejected() {
        let mut buffer = FrameBuffer::new();
        buffer.extend(&u32::MAX.to_le_bytes());
        buffer.extend(&[0u8; 8]);
        assert!(buffer.next_frame().is_err());
    }
}
