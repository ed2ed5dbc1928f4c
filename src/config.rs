//! Reactor configuration.
//!
//! These types hold the concrete values that drive loop behavior. Use
//! [`ReactorBuilder`] to construct a reactor rather than assembling a
//! [`ReactorConfig`] by hand.
//!
//! # Defaults
//!
//! | Field | Default |
//! |-------|---------|
//! | `process_name` | `"control"` |
//! | `poll_timeout_cap` | 1 s |
//! | `poll_timeout_floor` | 1 ms |
//! | `barrier_poll_interval` | 10 ms |
//! | `inbound_retry_limit` | 1000 |
//! | `inbound_retry_delay` | 1 ms |
//! | `thread_name_prefix` | `"coreactor-ctx"` |
//! | `thread_stack_size` | 1 MiB |
//! | `maintenance.enabled` | true |
//! | `maintenance.intervals` | 1 s / 10 s / 60 s |

use crate::error::Result;
use crate::reactor::Reactor;
use crate::types::ProcessId;
use std::time::Duration;

/// Idle maintenance settings.
///
/// Maintenance hooks run only when the loop is idle (no fd activity and no
/// due timer), tiered cheap/standard/deep. A tier runs when its interval has
/// elapsed since it last ran.
#[derive(Debug, Clone)]
pub struct MaintenanceConfig {
    /// Master switch for idle maintenance.
    pub enabled: bool,
    /// Minimum interval between runs, per tier (cheap, standard, deep).
    pub intervals: [Duration; 3],
}

impl Default for MaintenanceConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            intervals: [
                Duration::from_secs(1),
                Duration::from_secs(10),
                Duration::from_secs(60),
            ],
        }
    }
}

/// Reactor configuration.
#[derive(Debug, Clone)]
pub struct ReactorConfig {
    /// This process's routing name.
    pub process_name: ProcessId,
    /// Longest single poll sleep. Capped so a late-registered earlier timer
    /// is picked up within one cap instead of oversleeping.
    pub poll_timeout_cap: Duration,
    /// Shortest non-zero poll sleep.
    pub poll_timeout_floor: Duration,
    /// How often a barrier wait re-checks its pending flags.
    pub barrier_poll_interval: Duration,
    /// Bounded retries when a wake byte arrives before its message frame.
    pub inbound_retry_limit: u32,
    /// Delay between inbound retries.
    pub inbound_retry_delay: Duration,
    /// Name prefix for context threads.
    pub thread_name_prefix: String,
    /// Stack size for context threads.
    pub thread_stack_size: usize,
    /// Idle maintenance settings.
    pub maintenance: MaintenanceConfig,
}

impl Default for ReactorConfig {
    fn default() -> Self {
        Self {
            process_name: ProcessId::new("control"),
            poll_timeout_cap: Duration::from_secs(1),
            poll_timeout_floor: Duration::from_millis(1),
            barrier_poll_interval: Duration::from_millis(10),
            inbound_retry_limit: 1000,
            inbound_retry_delay: Duration::from_millis(1),
            thread_name_prefix: "coreactor-ctx".to_string(),
            thread_stack_size: 1 << 20,
            maintenance: MaintenanceConfig::default(),
        }
    }
}

impl ReactorConfig {
    /// Normalizes configuration values to safe ones.
    pub fn normalize(&mut self) {
        if self.poll_timeout_floor > self.poll_timeout_cap {
            self.poll_timeout_floor = self.poll_timeout_cap;
        }
        if self.poll_timeout_floor.is_zero() {
            self.poll_timeout_floor = Duration::from_micros(100);
        }
        if self.barrier_poll_interval.is_zero() {
            self.barrier_poll_interval = Duration::from_millis(1);
        }
        self.inbound_retry_limit = self.inbound_retry_limit.max(1);
        let [a, b, c] = self.maintenance.intervals;
        self.maintenance.intervals = [a, b.max(a), c.max(b.max(a))];
    }
}

/// Builder for constructing a reactor with custom configuration.
#[derive(Debug, Clone, Default)]
pub struct ReactorBuilder {
    config: ReactorConfig,
}

impl ReactorBuilder {
    /// Creates a builder with default configuration.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets this process's routing name.
    #[must_use]
    pub fn process_name(mut self, name: impl Into<String>) -> Self {
        self.config.process_name = ProcessId::new(name);
        self
    }

    /// Sets the longest single poll sleep.
    #[must_use]
    pub fn poll_timeout_cap(mut self, cap: Duration) -> Self {
        self.config.poll_timeout_cap = cap;
        self
    }

    /// Sets the barrier re-check interval.
    #[must_use]
    pub fn barrier_poll_interval(mut self, interval: Duration) -> Self {
        self.config.barrier_poll_interval = interval;
        self
    }

    /// Sets the inbound wake-before-frame retry bound.
    #[must_use]
    pub fn inbound_retry(mut self, limit: u32, delay: Duration) -> Self {
        self.config.inbound_retry_limit = limit;
        self.config.inbound_retry_delay = delay;
        self
    }

    /// Sets the context thread name prefix.
    #[must_use]
    pub fn thread_name_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.config.thread_name_prefix = prefix.into();
        self
    }

    /// Sets the context thread stack size.
    #[must_use]
    pub fn thread_stack_size(mut self, size: usize) -> Self {
        self.config.thread_stack_size = size;
        self
    }

    /// Enables or disables idle maintenance.
    #[must_use]
    pub fn maintenance(mut self, config: MaintenanceConfig) -> Self {
        self.config.maintenance = config;
        self
    }

    /// Builds the reactor. Fails if the poller or the mailbox pipes cannot be
    /// created.
    pub fn build(mut self) -> Result<Reactor> {
        self.config.normalize();
        Reactor::with_config(self.config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_orders_maintenance_intervals() {
        let mut config = ReactorConfig {
            maintenance: MaintenanceConfig {
                enabled: true,
                intervals: [
                    Duration::from_secs(10),
                    Duration::from_secs(1),
                    Duration::from_secs(5),
                ],
            },
            ..ReactorConfig::default()
        };
        config.normalize();
        let [a, b, c] = config.maintenance.intervals;
        assert!(a <= b && b <= c);
    }

    #[test]
    fn normalize_keeps_floor_below_cap() {
        let mut config = ReactorConfig {
            poll_timeout_floor: Duration::from_secs(5),
            ..ReactorConfig::default()
        };
        config.normalize();
        assert!(config.poll_timeout_floor <= config.poll_timeout_cap);
    }

    #[test]
    fn builder_sets_process_name() {
        let builder = ReactorBuilder::new().process_name("display");
        assert_eq!(builder.config.process_name.as_str(), "display");
    }
}
