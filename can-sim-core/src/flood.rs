//! Flood mode
//!
//! Sends random values of randomly chosen variables as fast as the pacing
//! allows. Pacing is either a fixed delay per message or derived from a
//! congestion rate and the bus bitrate, optionally split into bursts of
//! sending and silence.
//!
//! All times are microseconds. Deadlines are accumulated from the engine's
//! start time so pacing does not drift over long runs.

use crate::metrics::MetricsCollector;
use crate::simulator::SimulatorCore;
use crate::types::{Result, SimulatorError};
use crate::value::{Value, ValueKind};
use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

/// Default delay between flood messages in microseconds
pub const DEFAULT_FLOOD_DELAY: u64 = 100;

pub struct FloodEngine<'a> {
    core: &'a SimulatorCore,
    variables: Vec<String>,
    bitrate: u32,
    delay: u64,
    rate: i64,
    rate_factor: f64,
    use_interval: u64,
    use_rate: bool,
    wait_time: u64,
    burst_enabled: bool,
    burst_len: u64,
    burst_delay: u64,
    burst_wait_time: u64,
    start: Instant,
    rng: StdRng,
    metrics: Option<Arc<Mutex<MetricsCollector>>>,
}

fn parse_number<T: std::str::FromStr>(name: &str, text: &str) -> Result<T> {
    text.trim().parse().map_err(|_| {
        SimulatorError::FloodError(format!("Flood mode {} value '{}' is invalid", name, text))
    })
}

impl<'a> FloodEngine<'a> {
    /// Create a flood engine for `core`.
    ///
    /// `params` is a list of `key=value` tokens (`delay`, `rate`, `burst-len`,
    /// `burst-delay`, `include`, `exclude`). Without `include`/`exclude`
    /// every unfiltered variable is flooded. Fails on invalid numbers or when
    /// no variable is left to send.
    pub fn new<S: AsRef<str>>(core: &'a SimulatorCore, params: &[S]) -> Result<Self> {
        let mut engine = Self {
            core,
            variables: Vec::new(),
            bitrate: core.bitrate(),
            delay: DEFAULT_FLOOD_DELAY,
            rate: 0,
            rate_factor: 0.0,
            use_interval: DEFAULT_FLOOD_DELAY,
            use_rate: false,
            wait_time: 0,
            burst_enabled: false,
            burst_len: 0,
            burst_delay: 0,
            burst_wait_time: 0,
            start: Instant::now(),
            rng: StdRng::from_entropy(),
            metrics: None,
        };

        engine.process_params(params)?;

        if engine.variables.is_empty() {
            return Err(SimulatorError::FloodError("No valid messages found".to_string()));
        }
        log::info!("Flooding {} variables", engine.variables.len());
        Ok(engine)
    }

    /// Use a fixed random seed
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.rng = StdRng::seed_from_u64(seed);
        self
    }

    /// Apply parameters; returns false if any parameter was unknown or
    /// deprecated
    fn process_params<S: AsRef<str>>(&mut self, params: &[S]) -> Result<bool> {
        let mut ok = true;
        let mut selected = false;
        let source = self.core.variables();

        for param in params {
            let param = param.as_ref();
            if param.is_empty() {
                continue;
            }
            let parts: Vec<&str> = param.split('=').collect();
            match parts.as_slice() {
                ["delay", value] => self.set_delay(parse_number("delay", value)?),
                ["rate", value] => self.set_rate(parse_number("rate", value)?),
                ["burst-len", value] => self.set_burst_len(parse_number("burst-len", value)?),
                ["burst-delay", value] => self.set_burst_delay(parse_number("burst-delay", value)?),
                ["include", value] => selected = self.include(&split_list(value), &source),
                ["exclude", value] => selected = self.exclude(&split_list(value), &source),
                [key, _] => {
                    log::warn!("Unknown flood parameter '{}'", key);
                    ok = false;
                }
                _ => {
                    self.set_delay(parse_number("delay", param)?);
                    log::warn!("Unknown or deprecated flood parameter '{}', using as flood delay", param);
                    ok = false;
                }
            }
        }

        if !selected {
            self.filter_signals(&source);
        }
        Ok(ok)
    }

    fn is_signal_filtered(&self, key: &str) -> bool {
        match self.core.variable_message_id(key) {
            Some(id) => self.core.is_message_filtered(id),
            None => {
                log::error!("Signal '{}' not found in any messages", key);
                true
            }
        }
    }

    fn add_variable(&mut self, key: &str) {
        if self.is_signal_filtered(key) {
            log::warn!("Message of '{}' signal is blocked globally", key);
        } else if !self.core.is_sendable(key) {
            log::debug!("Variable '{}' is not outgoing, not flooded", key);
        } else if !self.variables.iter().any(|v| v == key) {
            self.variables.push(key.to_string());
        }
    }

    fn include(&mut self, names: &[&str], source: &[String]) -> bool {
        for name in names {
            if source.iter().any(|s| s == name) {
                self.add_variable(name);
            } else {
                log::warn!("'{}' is not a valid signal", name);
            }
        }
        if self.variables.is_empty() {
            log::warn!("No eligible signals found");
            return false;
        }
        true
    }

    fn exclude(&mut self, names: &[&str], source: &[String]) -> bool {
        for name in names {
            if !source.iter().any(|s| s == name) {
                log::warn!("Signal '{}' not found", name);
            }
        }
        for key in source {
            if !names.contains(&key.as_str()) {
                self.add_variable(key);
            }
        }
        if self.variables.is_empty() {
            log::warn!("No signals have been included");
            return false;
        }
        true
    }

    fn filter_signals(&mut self, source: &[String]) {
        for key in source {
            if !self.is_signal_filtered(key) && self.core.is_sendable(key) {
                self.variables.push(key.clone());
            }
        }
    }

    /// Attach a metrics collector and hand it the pacing settings
    pub fn init_metrics(&mut self, metrics: Arc<Mutex<MetricsCollector>>) {
        {
            let mut collector = metrics.lock();
            collector.init_burst_settings(self.burst_len, self.burst_delay);
            if self.rate_factor > 0.0 {
                collector.init_rate_send(self.rate_factor);
            } else {
                collector.init_delay_send(self.delay);
            }
        }
        self.metrics = Some(metrics);
    }

    /// Send one random value and sleep until the next send is due
    pub fn flood_signal(&mut self) -> bool {
        if self.burst_enabled {
            self.check_burst_sleep();
        }

        let index = self.rng.gen_range(0..self.variables.len());
        let key = self.variables[index].clone();
        if let Some(value) = self.random_value(&key) {
            self.core.set_value(&key, value);
        }
        // Forced: the random value may equal the previous one
        let sent = self.core.send_variable(&key, true);

        if let Some(metrics) = &self.metrics {
            metrics.lock().update_burst_data(false);
        }

        self.wait_time += if self.use_rate {
            self.calculate_delay(&key)
        } else {
            self.use_interval
        };
        self.wait_until(self.wait_time);
        sent
    }

    fn random_value(&mut self, key: &str) -> Option<Value> {
        let signal = self.core.signal(key)?;
        let (min, max) = (signal.minimum(), signal.maximum());
        let value = match signal.value_kind() {
            ValueKind::Integer => {
                let (low, high) = (min.ceil() as i64, max.floor() as i64);
                Value::Integer(if low < high { self.rng.gen_range(low..=high) } else { low })
            }
            ValueKind::Unsigned => {
                let (low, high) = (min.max(0.0).ceil() as u64, max.max(0.0).floor() as u64);
                Value::Unsigned(if low < high { self.rng.gen_range(low..=high) } else { low })
            }
            ValueKind::Double => {
                Value::Double(if min < max { self.rng.gen_range(min..=max) } else { min })
            }
        };
        Some(value)
    }

    fn elapsed_us(&self) -> u64 {
        self.start.elapsed().as_micros() as u64
    }

    fn wait_until(&self, deadline: u64) {
        let elapsed = self.elapsed_us();
        if elapsed < deadline {
            thread::sleep(Duration::from_micros(deadline - elapsed));
        }
    }

    fn check_burst_sleep(&mut self) {
        if self.burst_wait_time == 0 {
            self.burst_wait_time = self.burst_len;
            return;
        }
        let elapsed = self.elapsed_us();
        if elapsed >= self.burst_wait_time {
            if let Some(metrics) = &self.metrics {
                metrics.lock().update_burst_data(true);
            }
            self.burst_wait_time += self.burst_delay;
            self.wait_time += self.burst_delay;
            self.wait_until(self.burst_wait_time);
            self.burst_wait_time += self.burst_len;
        }
    }

    /// Congestion delay for the frame carrying `key`; also becomes the
    /// current send interval. 0 without bitrate or for unknown variables.
    pub fn calculate_delay(&mut self, key: &str) -> u64 {
        if self.bitrate == 0 {
            return 0;
        }
        match self.core.message_bits(key) {
            Some(bits) => {
                self.use_interval = (bits as f64 * self.rate_factor) as u64;
                self.use_interval
            }
            None => 0,
        }
    }

    fn calculate_rate_factor(&mut self) {
        self.rate = self.rate.clamp(1, 100);
        if self.bitrate > 0 {
            let usec_per_bit = 1_000_000.0 / self.bitrate as f64;
            self.rate_factor = usec_per_bit * (100.0 / self.rate as f64);
        } else {
            log::warn!(
                "No CAN bitrate set, using delay ({} usec) instead of congestion",
                self.delay
            );
            self.rate_factor = 0.0;
            self.use_rate = false;
        }
    }

    /// Pace by congestion percentage (clamped to 1..=100)
    pub fn set_rate(&mut self, rate: i64) {
        self.rate = rate;
        self.use_rate = true;
        self.calculate_rate_factor();
    }

    /// Pace by a fixed delay in microseconds
    pub fn set_delay(&mut self, delay: u64) {
        self.delay = delay;
        self.use_interval = delay;
        self.use_rate = false;
    }

    /// Sending window; also the silent window if that is unset
    pub fn set_burst_len(&mut self, len: u64) {
        self.burst_len = len;
        if self.burst_delay == 0 {
            self.burst_delay = len;
        }
        self.burst_enabled = true;
    }

    /// Silent window; also the sending window if that is unset
    pub fn set_burst_delay(&mut self, delay: u64) {
        self.burst_delay = delay;
        if self.burst_len == 0 {
            self.burst_len = delay;
        }
        self.burst_enabled = true;
    }

    /// Override the bus bitrate used for congestion pacing
    pub fn set_bitrate(&mut self, bitrate: u32) {
        self.bitrate = bitrate;
        // A rate that fell back to the delay for lack of a bitrate is picked up again
        if self.use_rate || (self.rate > 0 && self.rate_factor == 0.0) {
            self.use_rate = true;
            self.calculate_rate_factor();
        }
    }

    pub fn delay(&self) -> u64 {
        self.delay
    }

    pub fn rate(&self) -> i64 {
        self.rate
    }

    /// Microseconds per bit
    pub fn rate_factor(&self) -> f64 {
        self.rate_factor
    }

    pub fn use_interval(&self) -> u64 {
        self.use_interval
    }

    pub fn use_rate(&self) -> bool {
        self.use_rate
    }

    pub fn wait_time(&self) -> u64 {
        self.wait_time
    }

    pub fn burst_enabled(&self) -> bool {
        self.burst_enabled
    }

    pub fn burst_len(&self) -> u64 {
        self.burst_len
    }

    pub fn burst_delay(&self) -> u64 {
        self.burst_delay
    }

    pub fn variables(&self) -> &[String] {
        &self.variables
    }

    pub fn contains_variable(&self, name: &str) -> bool {
        self.variables.iter().any(|v| v == name)
    }
}

fn split_list(value: &str) -> Vec<&str> {
    value.split(',').map(str::trim).filter(|s| !s.is_empty()).collect()
}
