//! # Controller configuration.
//!
//! Provides [`ControllerConfig`], the settings of one controller instance.
//!
//! ## Sentinel values
//! - `hot_straggler_wait = 0s` → no wait for late hot tasks
//! - `suspend_update_idle = 0s` → the debug-context updater is not registered
//! - `kill_attempts = 0` → `kill` marks the controller terminated right away

use std::borrow::Cow;
use std::time::Duration;

/// Configuration of one controller.
///
/// ## Field semantics
/// - `name`: label of the tool in log lines and reports
/// - `bus_capacity`: event bus ring buffer size (min 1; clamped by Bus)
/// - `hot_straggler_wait`: how long a loop-triggered hot mode waits for one more hot task
/// - `suspend_update_idle`: idle timeout of the debug-context updater at the outermost suspend level
/// - `kill_attempts` / `kill_poll`: how often and how long `kill` waits for the loop to notice
#[derive(Clone, Debug)]
pub struct ControllerConfig {
    pub name: Cow<'static, str>,
    pub bus_capacity: usize,
    pub hot_straggler_wait: Duration,
    pub suspend_update_idle: Duration,
    pub kill_attempts: u32,
    pub kill_poll: Duration,
}

impl ControllerConfig {
    /// Returns a bus capacity clamped to a minimum of 1.
    #[inline]
    pub fn bus_capacity_clamped(&self) -> usize {
        self.bus_capacity.max(1)
    }

    /// Straggler wait as an `Option` (`None` → do not wait).
    #[inline]
    pub fn straggler_wait(&self) -> Option<Duration> {
        if self.hot_straggler_wait == Duration::ZERO {
            None
        } else {
            Some(self.hot_straggler_wait)
        }
    }

    /// Updater idle timeout as an `Option` (`None` → no updater).
    #[inline]
    pub fn suspend_update_timeout(&self) -> Option<Duration> {
        if self.suspend_update_idle == Duration::ZERO {
            None
        } else {
            Some(self.suspend_update_idle)
        }
    }
}

impl Default for ControllerConfig {
    /// Default configuration:
    ///
    /// - `name = "tool"`
    /// - `bus_capacity = 1024`
    /// - `hot_straggler_wait = 100ms`
    /// - `suspend_update_idle = 6s`
    /// - `kill_attempts = 3`, `kill_poll = 10ms`
    fn default() -> Self {
        Self {
            name: Cow::Borrowed("tool"),
            bus_capacity: 1024,
            hot_straggler_wait: Duration::from_millis(100),
            suspend_update_idle: Duration::from_millis(6000),
            kill_attempts: 3,
            kill_poll: Duration::from_millis(10),
        }
    }
}
