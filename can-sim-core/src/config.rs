//! Simulator configuration
//!
//! Every runtime switch the simulator core and the codec consult lives here
//! and is handed to the core at construction.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Configuration for the simulator core
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulatorConfig {
    /// Accept values in the signal's own unit instead of native units
    pub native_units: bool,

    /// Use UTC instead of local time for the time-of-day signals
    pub use_utc: bool,

    /// Inject time-of-day signals from the sender thread
    #[serde(default = "default_true")]
    pub send_time: bool,

    /// Reset to defaults without marking values as set
    pub suppress_defaults: bool,

    /// Treat every mapped message as both send and receive
    pub ignore_directions: bool,

    /// Replay tick in milliseconds
    #[serde(default = "default_interval_ms")]
    pub interval_ms: u64,

    /// Replay run time in seconds, negative means unbounded
    #[serde(default = "default_run_time")]
    pub run_time_s: i64,

    /// Period of the time-of-day injection in milliseconds
    #[serde(default = "default_time_update_interval")]
    pub time_update_interval_ms: u64,

    /// Reader thread receive timeout in milliseconds
    #[serde(default = "default_reader_poll")]
    pub reader_poll_ms: u64,

    /// Sender thread tick in milliseconds
    #[serde(default = "default_sender_tick")]
    pub sender_tick_ms: u64,
}

fn default_true() -> bool {
    true
}

fn default_interval_ms() -> u64 {
    10
}

fn default_run_time() -> i64 {
    -1
}

fn default_time_update_interval() -> u64 {
    100
}

fn default_reader_poll() -> u64 {
    10
}

fn default_sender_tick() -> u64 {
    10
}

impl Default for SimulatorConfig {
    fn default() -> Self {
        Self {
            native_units: false,
            use_utc: false,
            send_time: default_true(),
            suppress_defaults: false,
            ignore_directions: false,
            interval_ms: default_interval_ms(),
            run_time_s: default_run_time(),
            time_update_interval_ms: default_time_update_interval(),
            reader_poll_ms: default_reader_poll(),
            sender_tick_ms: default_sender_tick(),
        }
    }
}

impl SimulatorConfig {
    /// Create a new configuration with default settings
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder method: accept values in signal units
    pub fn with_native_units(mut self, enabled: bool) -> Self {
        self.native_units = enabled;
        self
    }

    /// Builder method: use UTC for time-of-day signals
    pub fn with_utc(mut self, enabled: bool) -> Self {
        self.use_utc = enabled;
        self
    }

    /// Builder method: enable or disable time-of-day injection
    pub fn with_send_time(mut self, enabled: bool) -> Self {
        self.send_time = enabled;
        self
    }

    pub fn with_suppress_defaults(mut self, enabled: bool) -> Self {
        self.suppress_defaults = enabled;
        self
    }

    pub fn with_ignore_directions(mut self, enabled: bool) -> Self {
        self.ignore_directions = enabled;
        self
    }

    /// Builder method: replay tick in milliseconds
    pub fn with_interval_ms(mut self, interval_ms: u64) -> Self {
        self.interval_ms = interval_ms;
        self
    }

    /// Builder method: replay run time in seconds (negative = unbounded)
    pub fn with_run_time(mut self, seconds: i64) -> Self {
        self.run_time_s = seconds;
        self
    }

    pub fn with_sender_tick_ms(mut self, tick_ms: u64) -> Self {
        self.sender_tick_ms = tick_ms;
        self
    }

    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms.max(1))
    }

    pub fn sender_tick(&self) -> Duration {
        Duration::from_millis(self.sender_tick_ms.max(1))
    }

    pub fn reader_poll(&self) -> Duration {
        Duration::from_millis(self.reader_poll_ms.max(1))
    }

    pub fn time_update_interval(&self) -> Duration {
        Duration::from_millis(self.time_update_interval_ms)
    }
}
