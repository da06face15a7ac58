//! Transfer metrics
//!
//! Collects per-message transfer counters, bus time estimates, error frame
//! counters and flood burst statistics, and writes them as separated-value
//! text.

use crate::message::CanMessage;
use crate::types::{frame_bits, Direction, ErrorMetrics, Result, CAN_EFF_FLAG};
use std::collections::BTreeMap;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::time::Instant;

/// Metrics of one message
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MessageMetrics {
    pub direction: Direction,
    pub standard: bool,
    pub successful: u64,
    pub failed: u64,
    pub false_direction: u64,
    /// Frame size on the bus in bits
    pub message_size: u64,
    /// Estimated bus time of one frame in microseconds
    pub message_time: u64,
    /// Bus time of every transfer in microseconds
    pub time_total: u64,
    /// Pacing overhead per send in microseconds
    pub idle_time: u64,
    pub idle_total: u64,
    pub description: String,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct TotalMetrics {
    pub sent: u64,
    pub tx_failed: u64,
    pub received: u64,
    pub total_time: u64,
    pub receive_time: u64,
    pub send_time: u64,
    pub total_runtime: u64,
    pub ext_count: u64,
    pub std_count: u64,
    pub total_messages: u64,
    pub total_false_direction: u64,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct BurstMetrics {
    /// Total time spent in sending windows (microseconds)
    pub send_time: u64,
    /// Total time spent in silent windows (microseconds)
    pub delay_time: u64,
    /// Messages sent in completed bursts
    pub total_count: u64,
    pub idle_time: u64,
    pub len: u64,
    pub delay: u64,
    /// Fewest messages in one burst, `None` before the first burst completed
    pub min: Option<u64>,
    pub max: u64,
    /// Messages sent in the running burst
    pub count: u64,
}

#[derive(Debug)]
pub struct MetricsCollector {
    bitrate: u32,
    rate_factor: f64,
    delay_time: u64,
    separator: char,
    messages: BTreeMap<u32, MessageMetrics>,
    total: TotalMetrics,
    burst: BurstMetrics,
    errors: ErrorMetrics,
    start: Instant,
}

/// `<base>_<YYYY.MM.DD-HH.MM>.txt`
pub fn metrics_file_name(base: &str) -> PathBuf {
    let stamp = chrono::Local::now().format("%Y.%m.%d-%H.%M");
    PathBuf::from(format!("{}_{}.txt", base, stamp))
}

impl MetricsCollector {
    pub fn new(bitrate: u32) -> Self {
        Self {
            bitrate,
            rate_factor: 0.0,
            delay_time: 0,
            separator: ';',
            messages: BTreeMap::new(),
            total: TotalMetrics::default(),
            burst: BurstMetrics::default(),
            errors: ErrorMetrics::default(),
            start: Instant::now(),
        }
    }

    /// Microseconds per bit, 1 when the bitrate is unknown
    fn usec_per_bit(&self) -> f64 {
        if self.bitrate > 0 {
            1_000_000.0 / self.bitrate as f64
        } else {
            1.0
        }
    }

    pub fn set_bitrate(&mut self, bitrate: u32) {
        self.bitrate = bitrate;
    }

    pub fn set_value_separator(&mut self, separator: char) {
        self.separator = separator;
    }

    /// Fixed flood delay in microseconds
    pub fn init_delay_send(&mut self, delay: u64) {
        self.delay_time = delay;
    }

    /// Congestion factor in microseconds per bit
    pub fn init_rate_send(&mut self, factor: f64) {
        self.rate_factor = factor;
    }

    pub fn init_burst_settings(&mut self, len: u64, delay: u64) {
        self.burst.len = len;
        self.burst.delay = delay;
    }

    /// Count one burst send, or close the running burst when `sleep` is set
    pub fn update_burst_data(&mut self, sleep: bool) {
        if self.burst.len == 0 || self.burst.delay == 0 {
            return;
        }
        if !sleep {
            self.burst.count += 1;
            return;
        }
        if self.burst.count > 0 {
            let count = self.burst.count;
            self.burst.min = Some(self.burst.min.map_or(count, |min| min.min(count)));
            self.burst.max = self.burst.max.max(count);
            self.burst.total_count += count;
            self.burst.count = 0;
        }
        self.burst.send_time += self.burst.len;
        self.burst.delay_time += self.burst.delay;
    }

    pub fn update_errors(&mut self, errors: ErrorMetrics) {
        self.errors = errors;
    }

    /// Refresh the metrics of one message from its counters
    pub fn update_message(&mut self, message: &CanMessage) {
        let id = message.id();
        let pacing = self.rate_factor > 0.0 || self.delay_time > 0;

        if !self.messages.contains_key(&id) {
            let message_size = frame_bits(id, message.dlc()) as u64;
            let message_time = (message_size as f64 * self.usec_per_bit()) as u64;
            let idle_time = if pacing && message.direction() == Direction::Send {
                let budget = if self.rate_factor > 0.0 {
                    (message_size as f64 * self.rate_factor) as u64
                } else {
                    self.delay_time
                };
                budget.saturating_sub(message_time)
            } else {
                0
            };
            self.messages.insert(
                id,
                MessageMetrics {
                    direction: message.direction(),
                    standard: id & CAN_EFF_FLAG == 0,
                    message_size,
                    message_time,
                    idle_time,
                    description: message.description().unwrap_or_default().to_string(),
                    ..Default::default()
                },
            );
        }

        if let Some(metrics) = self.messages.get_mut(&id) {
            metrics.successful = message.successful();
            metrics.failed = message.failed();
            metrics.false_direction = message.false_direction();
            metrics.time_total =
                (metrics.successful + metrics.failed + metrics.false_direction) * metrics.message_time;
            if pacing {
                metrics.idle_total = (metrics.successful + metrics.failed) * metrics.idle_time;
            }
        }
    }

    pub fn update_messages<'a>(&mut self, messages: impl IntoIterator<Item = &'a CanMessage>) {
        for message in messages {
            self.update_message(message);
        }
    }

    pub fn message_metrics(&self, id: u32) -> Option<&MessageMetrics> {
        self.messages.get(&id)
    }

    pub fn messages(&self) -> &BTreeMap<u32, MessageMetrics> {
        &self.messages
    }

    fn update_total(&mut self) {
        let mut total = TotalMetrics::default();
        for metrics in self.messages.values() {
            let transfers = metrics.successful + metrics.failed + metrics.false_direction;
            match metrics.direction {
                Direction::Receive => {
                    total.received += metrics.successful;
                    total.receive_time += metrics.time_total;
                }
                Direction::Send => {
                    total.sent += metrics.successful;
                    total.tx_failed += metrics.failed;
                    total.send_time += metrics.time_total;
                }
            }
            if metrics.standard {
                total.std_count += transfers;
            } else {
                total.ext_count += transfers;
            }
            total.total_time += metrics.time_total + metrics.idle_total;
            total.total_messages += transfers;
            total.total_false_direction += metrics.false_direction;
        }
        total.total_runtime = self.start.elapsed().as_micros() as u64;
        self.total = total;
    }

    fn update_burst_idle_time(&mut self) {
        self.burst.idle_time = self.messages.values().map(|m| m.idle_total).sum();
    }

    pub fn total_metrics(&mut self) -> &TotalMetrics {
        self.update_total();
        &self.total
    }

    pub fn burst_metrics(&mut self) -> &BurstMetrics {
        self.update_burst_idle_time();
        &self.burst
    }

    /// Write every section to `path`; the burst section only after a burst
    /// has completed
    pub fn write_to_file(&mut self, path: &Path) -> Result<()> {
        let file = File::create(path).map_err(|e| {
            log::error!("Couldn't create metrics output file {:?}: {}", path, e);
            e
        })?;
        let mut out = BufWriter::new(file);

        self.update_total();
        self.write_message_data(&mut out)?;
        self.write_total_data(&mut out)?;
        self.write_error_data(&mut out)?;
        if self.burst.total_count > 0 {
            self.update_burst_idle_time();
            self.write_burst_data(&mut out)?;
        }
        out.flush()?;

        log::info!("Metrics written to {:?}", path);
        Ok(())
    }

    fn header(&self, columns: &[&str]) -> String {
        columns.join(&self.separator.to_string())
    }

    fn write_message_data(&self, out: &mut impl Write) -> Result<()> {
        let s = self.separator;
        writeln!(out, "INDIVIDUAL MESSAGES")?;
        writeln!(
            out,
            "{}",
            self.header(&[
                "ID",
                "Direction",
                "Successful",
                "Failed",
                "False direction",
                "Time (usec)",
                "Idle time (usec)",
                "Description",
            ])
        )?;
        for (id, m) in &self.messages {
            writeln!(
                out,
                "{id}{s}{}{s}{}{s}{}{s}{}{s}{}{s}{}{s}{}",
                m.direction, m.successful, m.failed, m.false_direction, m.time_total, m.idle_total, m.description
            )?;
        }
        Ok(())
    }

    fn write_total_data(&self, out: &mut impl Write) -> Result<()> {
        let s = self.separator;
        let t = &self.total;
        let average = if t.total_messages > 0 {
            t.total_time as f64 / t.total_messages as f64
        } else {
            0.0
        };
        writeln!(
            out,
            "\nTOTAL DATA ({})",
            chrono::Local::now().format("%Y.%m.%d-%H.%M")
        )?;
        writeln!(
            out,
            "{}",
            self.header(&[
                "Total sent",
                "Total Tx failed",
                "Total received",
                "Total false direction",
                "Runtime (usec)",
                "Total time (usec)",
                "Total Tx time (usec)",
                "Total Rx time (usec)",
                "Message Average (usec)",
                "Ext count",
                "Std count",
            ])
        )?;
        writeln!(
            out,
            "{}{s}{}{s}{}{s}{}{s}{}{s}{}{s}{}{s}{}{s}{}{s}{}{s}{}",
            t.sent,
            t.tx_failed,
            t.received,
            t.total_false_direction,
            t.total_runtime,
            t.total_time,
            t.send_time,
            t.receive_time,
            average,
            t.ext_count,
            t.std_count
        )?;
        Ok(())
    }

    fn write_error_data(&self, out: &mut impl Write) -> Result<()> {
        let s = self.separator;
        let factor = self.usec_per_bit();
        writeln!(out, "\nERROR DATA")?;
        writeln!(
            out,
            "{}",
            self.header(&["Total errors", "Error time (usec)", "Total unknown", "Unknown time (usec)"])
        )?;
        writeln!(
            out,
            "{}{s}{}{s}{}{s}{}",
            self.errors.error_messages,
            self.errors.error_size as f64 * factor,
            self.errors.unknown_messages,
            self.errors.unknown_size as f64 * factor
        )?;
        Ok(())
    }

    fn write_burst_data(&self, out: &mut impl Write) -> Result<()> {
        let s = self.separator;
        let b = &self.burst;
        writeln!(out, "\nBURST DATA")?;
        writeln!(
            out,
            "{}",
            self.header(&[
                "Total burst time (usec)",
                "Burst idle time (usec)",
                "Total delay time (usec)",
                "Burst min messages",
                "Burst max messages",
                "Total burst count",
                "Burst length",
                "Burst delay",
            ])
        )?;
        writeln!(
            out,
            "{}{s}{}{s}{}{s}{}{s}{}{s}{}{s}{}{s}{}",
            b.send_time,
            b.idle_time,
            b.delay_time,
            b.min.map_or(-1, |min| min as i64),
            b.max,
            b.total_count + b.count,
            b.len,
            b.delay
        )?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::signals::{MessageDefinition, SignalDefinition};
    use std::fs;

    fn message(id: u32, dlc: usize, direction: Direction) -> CanMessage {
        let mut message = CanMessage::new(
            MessageDefinition::new(id, format!("Msg{}", id), dlc)
                .with_signal(SignalDefinition::new("Sig", 0, 8)),
        );
        message.set_direction(direction);
        message
    }

    #[test]
    fn test_message_times_with_rate() {
        let mut metrics = MetricsCollector::new(500_000);
        metrics.init_rate_send(5.0);

        let mut tx = message(1, 8, Direction::Send);
        tx.update_transfer(true, Direction::Send);
        tx.update_transfer(true, Direction::Send);
        tx.update_transfer(false, Direction::Send);
        let mut rx = message(2, 8, Direction::Receive);
        rx.update_transfer(true, Direction::Receive);

        metrics.update_messages([&tx, &rx]);

        let m = metrics.message_metrics(1).unwrap();
        assert_eq!(m.message_size, 108);
        assert_eq!(m.message_time, 216);
        assert_eq!(m.idle_time, 540 - 216);
        assert_eq!(m.time_total, 3 * 216);
        assert_eq!(m.idle_total, 3 * (540 - 216));

        let r = metrics.message_metrics(2).unwrap();
        assert_eq!(r.idle_time, 0);

        let total = metrics.total_metrics().clone();
        assert_eq!(total.sent, 2);
        assert_eq!(total.tx_failed, 1);
        assert_eq!(total.received, 1);
        assert_eq!(total.std_count, 4);
        assert_eq!(total.total_messages, 4);
    }

    #[test]
    fn test_delay_without_bitrate() {
        let mut metrics = MetricsCollector::new(0);
        metrics.init_delay_send(100);
        let mut tx = message(0x8000_0001, 2, Direction::Send);
        tx.update_transfer(true, Direction::Send);
        metrics.update_message(&tx);

        let m = metrics.message_metrics(0x8000_0001).unwrap();
        assert!(!m.standard);
        assert_eq!(m.message_size, 33 + 16 + 29);
        assert_eq!(m.message_time, 78);
        assert_eq!(m.idle_time, 22);
    }

    #[test]
    fn test_burst_accounting() {
        let mut metrics = MetricsCollector::new(0);
        metrics.update_burst_data(false);
        assert_eq!(metrics.burst_metrics().count, 0);

        metrics.init_burst_settings(350, 350);
        for _ in 0..3 {
            metrics.update_burst_data(false);
        }
        metrics.update_burst_data(true);
        metrics.update_burst_data(false);
        metrics.update_burst_data(true);

        let burst = metrics.burst_metrics();
        assert_eq!(burst.min, Some(1));
        assert_eq!(burst.max, 3);
        assert_eq!(burst.total_count, 4);
        assert_eq!(burst.send_time, 700);
        assert_eq!(burst.delay_time, 700);
    }

    #[test]
    fn test_write_to_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("metrics.txt");

        let mut metrics = MetricsCollector::new(250_000);
        metrics.set_value_separator(',');
        let mut tx = message(5, 8, Direction::Send);
        tx.update_transfer(true, Direction::Send);
        metrics.update_message(&tx);
        metrics.update_errors(ErrorMetrics {
            error_messages: 1,
            error_size: 44,
            ..Default::default()
        });
        metrics.write_to_file(&path).unwrap();

        let content = fs::read_to_string(&path).unwrap();
        assert!(content.starts_with("INDIVIDUAL MESSAGES\nID,Direction,Successful"));
        assert!(content.contains("\n5,Tx,1,0,0,432,0,\n"));
        assert!(content.contains("\nERROR DATA\nTotal errors,Error time (usec),Total unknown,Unknown time (usec)\n1,176,0,0\n"));
        assert!(!content.contains("BURST DATA"));

        metrics.init_burst_settings(10, 10);
        metrics.update_burst_data(false);
        metrics.update_burst_data(true);
        metrics.write_to_file(&path).unwrap();
        assert!(fs::read_to_string(&path).unwrap().contains("\nBURST DATA\n"));
    }

    #[test]
    fn test_metrics_file_name() {
        let name = metrics_file_name("run").to_string_lossy().to_string();
        assert!(name.starts_with("run_"));
        assert!(name.ends_with(".txt"));
        assert_eq!(name.len(), "run_2024.01.02-10.30.txt".len());
    }
}
