//! Per-process monotonic clock.
//!
//! Every reactor owns exactly one [`Clock`], anchored at construction. All
//! wake times and event times in a process are read from it; timestamps are
//! never exchanged across processes.

use crate::types::Time;
use std::time::Instant;

/// Monotonic clock anchored at reactor construction.
///
/// [`Clock::monotonic`] is safe to call from any thread; the anchor never
/// changes after construction.
#[derive(Debug, Clone)]
pub struct Clock {
    anchor: Instant,
}

impl Clock {
    /// Creates a clock anchored at the current instant.
    #[must_use]
    pub fn new() -> Self {
        Self {
            anchor: Instant::now(),
        }
    }

    /// Current monotonic time.
    #[must_use]
    pub fn monotonic(&self) -> Time {
        let nanos = u64::try_from(self.anchor.elapsed().as_nanos()).unwrap_or(u64::MAX - 1);
        Time::from_nanos(nanos)
    }
}

impl Default for Clock {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn monotonic_never_decreases() {
        let clock = Clock::new();
        let a = clock.monotonic();
        let b = clock.monotonic();
        assert!(b >= a);
    }

    #[test]
    fn monotonic_is_never_the_sentinel() {
        let clock = Clock::new();
        assert!(!clock.monotonic().is_never());
    }
}
