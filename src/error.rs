//! Error types and propagation policy.
//!
//! The dispatch loop is thin: it does not catch handler errors. The first
//! error escaping a timer, fd, or event callback stops the loop and is
//! returned from [`Reactor::run`](crate::Reactor::run); a supervising layer
//! outside the reactor decides whether to transition to a fault state or
//! re-enter the loop. Panics inside handlers are captured at the invocation
//! site and reported as [`Error::HandlerPanic`] through the same path.
//!
//! The one deliberately-swallowed failure is the inbound queue-empty race
//! (wake byte observed before the message frame is readable), which is benign
//! and retried with bounded backoff.

use crate::types::ProcessId;
use std::io;

/// Convenience alias for reactor results.
pub type Result<T> = std::result::Result<T, Error>;

/// Error type for the reactor and everything built on it.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// A timer, fd, or event handler returned an error.
    #[error("handler failed: {0}")]
    Handler(#[source] Box<dyn std::error::Error + Send + Sync>),

    /// A handler panicked; the payload is stringified best-effort.
    #[error("handler panicked: {0}")]
    HandlerPanic(String),

    /// An operating-system level failure (pipes, poller).
    #[error("i/o error: {0}")]
    Io(#[from] io::Error),

    /// A message failed to serialize or deserialize.
    #[error("wire format error: {0}")]
    Wire(#[from] serde_json::Error),

    /// A message was addressed to a process this reactor has no link to.
    #[error("unknown peer process '{0}'")]
    UnknownPeer(ProcessId),

    /// A blocking wait ran past its deadline.
    #[error("deadline exceeded")]
    DeadlineExceeded,

    /// An operation that needs a parked execution context was called from
    /// outside the dispatch loop.
    #[error("operation requires a running reactor task")]
    OutsideTask,

    /// `run()` was called while the loop is already running.
    #[error("reactor is already running")]
    AlreadyRunning,
}

impl Error {
    /// Wraps an application error escaping a handler.
    pub fn handler<E>(err: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Self::Handler(Box::new(err))
    }

    /// Stringifies a captured panic payload.
    ///
    /// Recognizes the `&str` and `String` payloads produced by `panic!`;
    /// anything else is reported opaquely.
    #[must_use]
    pub(crate) fn from_panic(payload: &(dyn std::any::Any + Send)) -> Self {
        let msg = payload
            .downcast_ref::<&str>()
            .map(ToString::to_string)
            .or_else(|| payload.downcast_ref::<String>().cloned())
            .unwrap_or_else(|| "non-string panic payload".to_string());
        Self::HandlerPanic(msg)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn panic_payload_strings_are_preserved() {
        let err = Error::from_panic(&"boom");
        assert!(matches!(err, Error::HandlerPanic(ref m) if m == "boom"));
        let err = Error::from_panic(&String::from("bang"));
        assert!(matches!(err, Error::HandlerPanic(ref m) if m == "bang"));
    }

    #[test]
    fn handler_errors_keep_their_source() {
        let inner = io::Error::new(io::ErrorKind::Other, "device gone");
        let err = Error::handler(inner);
        assert!(err.to_string().starts_with("handler failed"));
        assert!(std::error::Error::source(&err).is_some());
    }
}
