//! Election timing knobs and their defaults.

use std::time::Duration;

/// Tuning for one elector.
#[derive(Debug, Clone)]
pub struct ElectorConfig {
    /// How long a candidacy stays open before the candidate takes the
    /// seat on silence.
    pub apply_window: Duration,

    /// How long `wait_for_leadership` sleeps between candidacies.
    pub retry_interval: Duration,

    /// Treat this instance as the only participant and never touch the
    /// bus. Leadership is granted instantly.
    pub single_instance: bool,
}

impl Default for ElectorConfig {
    fn default() -> Self {
        Self {
            apply_window: DEFAULT_APPLY_WINDOW,
            retry_interval: DEFAULT_RETRY_INTERVAL,
            single_instance: false,
        }
    }
}

/// Default length of a candidacy window.
///
/// Long enough for a broadcast round trip on an in-process or local
/// database bus; raise it when peers talk across a slow network.
pub const DEFAULT_APPLY_WINDOW: Duration = Duration::from_millis(250);

/// Default pause between failed candidacies while waiting for leadership.
///
/// A departure broadcast wakes waiters early, so this only bounds how
/// stale a waiter can be after an abrupt peer death.
pub const DEFAULT_RETRY_INTERVAL: Duration = Duration::from_secs(2);

/// Builder for customizing an [`ElectorConfig`].
#[derive(Debug, Default)]
pub struct ConfigBuilder {
    config: ElectorConfig,
}

impl ConfigBuilder {
    /// Create a new configuration builder with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the candidacy window length.
    pub fn apply_window(mut self, window: Duration) -> Self {
        self.config.apply_window = window;
        self
    }

    /// Set the pause between failed candidacies.
    pub fn retry_interval(mut self, interval: Duration) -> Self {
        self.config.retry_interval = interval;
        self
    }

    /// Skip the bus and elect this instance unconditionally.
    pub fn single_instance(mut self, single_instance: bool) -> Self {
        self.config.single_instance = single_instance;
        self
    }

    /// Build the final configuration.
    pub fn build(self) -> ElectorConfig {
        self.config
    }
}
