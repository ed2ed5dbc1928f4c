//! Core identifier and time types.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::{Add, Sub};
use std::time::Duration;

/// A monotonic timestamp, in nanoseconds since the process clock anchor.
///
/// Two sentinel values carry scheduling meaning:
///
/// - [`Time::NOW`] (zero) schedules work for the next dispatch cycle.
/// - [`Time::NEVER`] (the maximum value) parks a timer indefinitely. A timer
///   whose wake time is `NEVER` stays registered but is never due.
///
/// Timestamps from different processes are never compared; cross-process
/// correlation uses logical keys only.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
pub struct Time(u64);

impl Time {
    /// Schedule immediately (next dispatch cycle).
    pub const NOW: Self = Self(0);

    /// Park indefinitely.
    pub const NEVER: Self = Self(u64::MAX);

    /// Creates a time from nanoseconds since the clock anchor.
    #[must_use]
    pub const fn from_nanos(nanos: u64) -> Self {
        Self(nanos)
    }

    /// Creates a time from milliseconds since the clock anchor.
    #[must_use]
    pub const fn from_millis(millis: u64) -> Self {
        Self(millis.saturating_mul(1_000_000))
    }

    /// Creates a time from seconds since the clock anchor.
    #[must_use]
    pub const fn from_secs(secs: u64) -> Self {
        Self(secs.saturating_mul(1_000_000_000))
    }

    /// Returns the time as nanoseconds since the clock anchor.
    #[must_use]
    pub const fn as_nanos(self) -> u64 {
        self.0
    }

    /// True if this is the [`Time::NEVER`] sentinel.
    #[must_use]
    pub const fn is_never(self) -> bool {
        self.0 == u64::MAX
    }

    /// Duration from `earlier` to `self`, saturating at zero.
    #[must_use]
    pub const fn duration_since(self, earlier: Self) -> Duration {
        Duration::from_nanos(self.0.saturating_sub(earlier.0))
    }

    /// Adds a duration, saturating at [`Time::NEVER`].
    ///
    /// `NEVER` is absorbing: adding to it yields `NEVER`.
    #[must_use]
    pub fn saturating_add(self, dur: Duration) -> Self {
        if self.is_never() {
            return Self::NEVER;
        }
        let nanos = u64::try_from(dur.as_nanos()).unwrap_or(u64::MAX);
        Self(self.0.saturating_add(nanos))
    }
}

impl Add<Duration> for Time {
    type Output = Self;

    fn add(self, dur: Duration) -> Self {
        self.saturating_add(dur)
    }
}

impl Sub<Time> for Time {
    type Output = Duration;

    fn sub(self, earlier: Time) -> Duration {
        self.duration_since(earlier)
    }
}

impl fmt::Debug for Time {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_never() {
            write!(f, "Time(NEVER)")
        } else {
            write!(f, "Time({}ns)", self.0)
        }
    }
}

impl fmt::Display for Time {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_never() {
            write!(f, "never")
        } else {
            write!(f, "{}.{:03}s", self.0 / 1_000_000_000, (self.0 / 1_000_000) % 1000)
        }
    }
}

/// Short string naming a cooperating process, used as a messaging routing key.
///
/// Examples: `"control"`, `"display"`. Identifiers are exchanged on the wire
/// and must match between processes.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ProcessId(String);

impl ProcessId {
    /// Creates a process identifier.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    /// The identifier as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for ProcessId {
    fn from(name: &str) -> Self {
        Self::new(name)
    }
}

impl fmt::Debug for ProcessId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ProcessId({})", self.0)
    }
}

impl fmt::Display for ProcessId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Generation-tagged slot reference.
///
/// The generation distinguishes a live slot from a recycled one, so stale
/// handles (and stale heap entries) are detected instead of aliasing.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) struct SlotRef {
    pub(crate) index: u32,
    pub(crate) generation: u32,
}

/// Handle to a registered timer.
///
/// Returned by [`Reactor::register_timer`](crate::Reactor::register_timer);
/// passed to `update_timer` / `unregister_timer`. Operations on a handle
/// whose timer has been unregistered are no-ops.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct TimerHandle(pub(crate) SlotRef);

impl fmt::Debug for TimerHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TimerHandle({}:{})", self.0.index, self.0.generation)
    }
}

/// Handle to a registered file descriptor.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct FdHandle(pub(crate) usize);

impl fmt::Debug for FdHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "FdHandle({})", self.0)
    }
}

/// Identity of an execution context within one process.
pub(crate) type ContextId = usize;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn never_is_greater_than_any_deadline() {
        assert!(Time::NEVER > Time::from_secs(1_000_000));
        assert!(Time::NOW < Time::from_millis(1));
    }

    #[test]
    fn never_is_absorbing_under_addition() {
        assert_eq!(Time::NEVER + Duration::from_secs(5), Time::NEVER);
    }

    #[test]
    fn duration_since_saturates() {
        let early = Time::from_millis(10);
        let late = Time::from_millis(25);
        assert_eq!(late.duration_since(early), Duration::from_millis(15));
        assert_eq!(early.duration_since(late), Duration::ZERO);
    }

    #[test]
    fn time_survives_wire_roundtrip() {
        let t = Time::from_millis(1234);
        let json = serde_json::to_string(&t).unwrap();
        assert_eq!(serde_json::from_str::<Time>(&json).unwrap(), t);
    }

    #[test]
    fn process_id_displays_bare_name() {
        assert_eq!(ProcessId::new("display").to_string(), "display");
    }
}
