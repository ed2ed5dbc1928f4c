//! Idle-point maintenance.
//!
//! Deferred housekeeping (cache pruning, arena compaction, log rotation)
//! belongs at the loop's idle point, not on the dispatch hot path. Hooks are
//! registered into one of three tiers; when the loop finds itself idle it
//! runs the deepest tier whose interval has elapsed, together with the tiers
//! below it, and stamps their last-run times.

use crate::reactor::Reactor;
use crate::types::Time;

/// Cost tier of a maintenance hook.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MaintenanceTier {
    /// Cheap, frequent housekeeping.
    Cheap,
    /// Periodic medium-cost passes.
    Standard,
    /// Expensive, rare passes.
    Deep,
}

impl MaintenanceTier {
    pub(crate) const fn index(self) -> usize {
        match self {
            Self::Cheap => 0,
            Self::Standard => 1,
            Self::Deep => 2,
        }
    }
}

pub(crate) type MaintenanceHook = Box<dyn FnMut(&Reactor, Time) + Send>;

pub(crate) struct MaintenanceState {
    hooks: [Vec<MaintenanceHook>; 3],
    last_run: [Time; 3],
}

impl MaintenanceState {
    pub(crate) fn new() -> Self {
        Self {
            hooks: [Vec::new(), Vec::new(), Vec::new()],
            last_run: [Time::NOW; 3],
        }
    }

    pub(crate) fn add_hook(&mut self, tier: MaintenanceTier, hook: MaintenanceHook) {
        self.hooks[tier.index()].push(hook);
    }

    /// Deepest tier whose interval has elapsed, if any.
    pub(crate) fn due_tier(
        &self,
        eventtime: Time,
        intervals: &[std::time::Duration; 3],
    ) -> Option<usize> {
        (0..3)
            .rev()
            .find(|&tier| eventtime >= self.last_run[tier] + intervals[tier])
    }

    /// Moves one tier's hooks out for invocation.
    pub(crate) fn take_tier(&mut self, tier: usize) -> Vec<MaintenanceHook> {
        std::mem::take(&mut self.hooks[tier])
    }

    /// Returns a tier's hooks after invocation, ahead of any hooks registered
    /// while the pass ran.
    pub(crate) fn put_back_tier(&mut self, tier: usize, mut hooks: Vec<MaintenanceHook>) {
        hooks.append(&mut self.hooks[tier]);
        self.hooks[tier] = hooks;
    }

    /// Stamps tiers `0..=tier` as having run at `eventtime`.
    pub(crate) fn stamp(&mut self, tier: usize, eventtime: Time) {
        for level in 0..=tier {
            self.last_run[level] = eventtime;
        }
    }

    pub(crate) fn stats(&self) -> [Time; 3] {
        self.last_run
    }
}
