//! Simulator core
//!
//! Owns the message table and runs the reader and sender threads. Two modes:
//!
//! - **Live**: messages come from a DBC file and a variable mapping. The
//!   reader thread parses incoming frames and queues copies of changed
//!   messages; the sender thread sends due messages every tick and injects
//!   time-of-day signals.
//! - **Replay**: frames come from an ASC recording and are sent by the
//!   sender thread against a simulated clock.
//!
//! Lock order is input mutex, then message mutex. The filter list and error
//! counters are only held briefly and never while taking another lock.

use crate::can_error::analyze_error_frame;
use crate::config::SimulatorConfig;
use crate::filter::FilterList;
use crate::formats::{AscItem, AscReader};
use crate::mapping::{Configuration, VariableTable};
use crate::message::CanMessage;
use crate::queue::MessageQueue;
use crate::signal::CanSignal;
use crate::transport::{CanTransport, SocketCanTransport};
use crate::types::{CanFrame, Direction, ErrorMetrics, Result, SimulatorError};
use crate::value::Value;
use chrono::{Datelike, Timelike};
use parking_lot::Mutex;
use std::collections::{BTreeMap, BTreeSet};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Instant;

/// Input files of a simulator
#[derive(Debug, Clone, Default)]
pub struct SimulatorSources {
    pub dbc: Option<PathBuf>,
    pub mapping: Option<PathBuf>,
    /// Replay recording; when set, `dbc` and `mapping` are ignored
    pub asc: Option<PathBuf>,
}

impl SimulatorSources {
    pub fn live(dbc: impl Into<PathBuf>, mapping: impl Into<PathBuf>) -> Self {
        Self {
            dbc: Some(dbc.into()),
            mapping: Some(mapping.into()),
            asc: None,
        }
    }

    pub fn replay(asc: impl Into<PathBuf>) -> Self {
        Self {
            asc: Some(asc.into()),
            ..Default::default()
        }
    }
}

const TIME_VARIABLES: [&str; 5] = ["year", "month", "day", "hour", "min"];

struct Shared {
    config: SimulatorConfig,
    table: VariableTable,
    messages: BTreeMap<u32, Mutex<CanMessage>>,
    replay: Vec<AscItem>,
    transport: Option<Arc<dyn CanTransport>>,
    filters: Mutex<FilterList>,
    errors: Mutex<ErrorMetrics>,
    input: Mutex<()>,
    queue: MessageQueue<CanMessage>,
    send_time: bool,
    threads_running: AtomicBool,
    simulation_running: AtomicBool,
    simulation_time: AtomicU64,
    run_time: AtomicI64,
}

/// The simulated ECU
pub struct SimulatorCore {
    shared: Arc<Shared>,
    reader: Option<JoinHandle<()>>,
    sender: Option<JoinHandle<()>>,
}

impl SimulatorCore {
    /// Load the sources and attach an optional transport
    pub fn new(
        sources: &SimulatorSources,
        transport: Option<Arc<dyn CanTransport>>,
        config: SimulatorConfig,
    ) -> Result<Self> {
        let (table, messages, replay) = match &sources.asc {
            Some(asc) => {
                let reader = AscReader::parse(asc)?;
                (VariableTable::default(), BTreeMap::new(), reader.into_items())
            }
            None => {
                let (Some(dbc), Some(mapping)) = (&sources.dbc, &sources.mapping) else {
                    return Err(SimulatorError::ConfigError(
                        "A DBC file and a mapping file are required".to_string(),
                    ));
                };
                let (table, messages) = Configuration::load(dbc, mapping, &config)?.into_parts();
                (table, messages, Vec::new())
            }
        };

        let send_time = config.send_time
            && TIME_VARIABLES
                .iter()
                .all(|name| table.variable(name).is_some());

        let shared = Shared {
            run_time: AtomicI64::new(config.run_time_s),
            config,
            table,
            messages: messages
                .into_iter()
                .map(|(id, message)| (id, Mutex::new(message)))
                .collect(),
            replay,
            transport,
            filters: Mutex::new(FilterList::new()),
            errors: Mutex::new(ErrorMetrics::default()),
            input: Mutex::new(()),
            queue: MessageQueue::new(),
            send_time,
            threads_running: AtomicBool::new(true),
            simulation_running: AtomicBool::new(false),
            simulation_time: AtomicU64::new(0),
        };

        Ok(Self {
            shared: Arc::new(shared),
            reader: None,
            sender: None,
        })
    }

    /// Load the sources and open a SocketCAN interface, configured with the
    /// DBC `Baudrate` when one is declared
    pub fn open(sources: &SimulatorSources, interface: &str, config: SimulatorConfig) -> Result<Self> {
        let mut core = Self::new(sources, None, config)?;
        let transport = SocketCanTransport::open(interface, core.shared.table.bitrate())?;
        match Arc::get_mut(&mut core.shared) {
            Some(shared) => shared.transport = Some(Arc::new(transport)),
            None => {
                return Err(SimulatorError::TransportError(
                    "Simulator is already running".to_string(),
                ))
            }
        }
        Ok(core)
    }

    pub fn config(&self) -> &SimulatorConfig {
        &self.shared.config
    }

    pub fn is_replay(&self) -> bool {
        self.shared.messages.is_empty() && !self.shared.replay.is_empty()
    }

    pub fn cfg_version(&self) -> &str {
        self.shared.table.cfg_version()
    }

    pub fn dbc_version(&self) -> &str {
        self.shared.table.dbc_version()
    }

    /// Configured variable names, sorted
    pub fn variables(&self) -> Vec<String> {
        self.shared.table.names().map(str::to_string).collect()
    }

    pub fn send_ids(&self) -> &BTreeSet<u32> {
        self.shared.table.send_ids()
    }

    pub fn receive_ids(&self) -> &BTreeSet<u32> {
        self.shared.table.receive_ids()
    }

    /// Copy of the signal behind a variable
    pub fn signal(&self, key: &str) -> Option<CanSignal> {
        let variable = self.shared.table.variable(key)?;
        let message = self.shared.messages.get(&variable.message_id)?.lock();
        message.signal(&variable.signal).cloned()
    }

    /// Copy of the message carrying a variable
    pub fn message(&self, key: &str) -> Option<CanMessage> {
        let variable = self.shared.table.variable(key)?;
        self.message_by_id(variable.message_id)
    }

    /// Id of the message carrying a variable
    pub fn variable_message_id(&self, key: &str) -> Option<u32> {
        self.shared.table.variable(key).map(|v| v.message_id)
    }

    /// Bus size in bits of the frame carrying a variable
    pub fn message_bits(&self, key: &str) -> Option<u32> {
        let id = self.variable_message_id(key)?;
        self.shared.messages.get(&id).map(|m| m.lock().bit_size())
    }

    /// True if the variable's message is a send message
    pub fn is_sendable(&self, key: &str) -> bool {
        self.variable_message_id(key)
            .is_some_and(|id| self.shared.table.is_sendable(id))
    }

    pub fn message_by_id(&self, id: u32) -> Option<CanMessage> {
        self.shared.messages.get(&id).map(|m| m.lock().clone())
    }

    /// Copies of all messages, ordered by id
    pub fn messages(&self) -> Vec<CanMessage> {
        self.shared.messages.values().map(|m| m.lock().clone()).collect()
    }

    /// Frames of the replay recording
    pub fn frame_queue(&self) -> &[AscItem] {
        &self.shared.replay
    }

    /// Queue of changed incoming messages filled by the reader thread
    pub fn message_queue(&self) -> &MessageQueue<CanMessage> {
        &self.shared.queue
    }

    pub fn error_metrics(&self) -> ErrorMetrics {
        *self.shared.errors.lock()
    }

    /// Bus bitrate reported by the transport, 0 if unknown
    pub fn bitrate(&self) -> u32 {
        self.shared.transport.as_ref().map_or(0, |t| t.bitrate())
    }

    /// True when time-of-day signals are injected
    pub fn send_time(&self) -> bool {
        self.shared.send_time
    }

    pub fn run_time(&self) -> i64 {
        self.shared.run_time.load(Ordering::SeqCst)
    }

    pub fn set_run_time(&self, seconds: i64) {
        self.shared.run_time.store(seconds, Ordering::SeqCst);
    }

    /// Remaining replay time in seconds, -1 when unbounded
    pub fn run_time_remaining(&self) -> i64 {
        let run_time = self.run_time();
        if run_time > 0 {
            run_time - (self.shared.simulation_time.load(Ordering::SeqCst) / 1000) as i64
        } else {
            -1
        }
    }

    /// Set a variable; only variables of send messages can be set
    pub fn set_value(&self, key: &str, value: Value) -> bool {
        let _guard = self.shared.input.lock();
        self.shared.apply_value(key, |message, signal| message.set_value(signal, value))
    }

    /// Set a variable from text, converting units unless native units are used
    pub fn set_value_str(&self, key: &str, text: &str) -> bool {
        let _guard = self.shared.input.lock();
        self.shared.set_value_str(key, text)
    }

    /// Apply `VAR=VAL` items as one batch.
    ///
    /// Every item is attempted; the result is false if any item was malformed
    /// or rejected.
    pub fn set_values<S: AsRef<str>>(&self, items: &[S]) -> bool {
        let _guard = self.shared.input.lock();
        let mut ok = true;
        for item in items {
            let item = item.as_ref();
            if item.is_empty() {
                continue;
            }
            let parts: Vec<&str> = item.split('=').collect();
            match parts.as_slice() {
                [key, value] => ok &= self.shared.set_value_str(key, value),
                _ => {
                    log::warn!("Unknown input '{}'", item);
                    ok = false;
                }
            }
        }
        ok
    }

    /// Reset every signal to its default, optionally sending all messages
    pub fn set_default_values(&self, send: bool) {
        {
            let _guard = self.shared.input.lock();
            for message in self.shared.messages.values() {
                message.lock().reset_values(self.shared.config.suppress_defaults);
            }
        }
        if send {
            self.send_messages(true);
        }
    }

    /// Send the message carrying a variable
    pub fn send_variable(&self, key: &str, force: bool) -> bool {
        match self.shared.table.variable(key) {
            Some(variable) => self.send_message(variable.message_id, force),
            None => false,
        }
    }

    /// Send a message if it is forced or modified and not filtered
    pub fn send_message(&self, id: u32, force: bool) -> bool {
        self.shared.send_message(id, force)
    }

    /// Send every send message; false if any send failed or was skipped
    pub fn send_messages(&self, all: bool) -> bool {
        let mut ok = true;
        for id in self.shared.table.send_ids() {
            ok &= self.shared.send_message(*id, all);
        }
        ok
    }

    /// Read and process one frame from the transport.
    ///
    /// Returns the id of a receive message whose content changed.
    pub fn read_message(&self) -> Option<u32> {
        match self.shared.read_frame() {
            Ok(Some(frame)) => self.shared.process_frame(&frame),
            Ok(None) => None,
            Err(e) => {
                log::warn!("{}", e);
                None
            }
        }
    }

    /// Build the filter list on first use (or when `reset`) from the known
    /// ids and apply `ids`; see [`FilterList::apply`]
    pub fn initialize_message_filter_list(&self, ids: &[String], exclude: bool, reset: bool) -> bool {
        let mut filters = self.shared.filters.lock();
        if reset {
            filters.clear();
        }
        if filters.is_empty() {
            let known: BTreeSet<u32> = if self.shared.replay.is_empty() {
                self.shared.messages.keys().copied().collect()
            } else {
                self.shared.replay.iter().map(|item| item.frame.id).collect()
            };
            if known.is_empty() {
                log::error!("No messages found to be filtered");
                return false;
            }
            *filters = FilterList::from_ids(known);
        }
        filters.apply(ids, exclude)
    }

    pub fn set_message_filter_state(&self, id: u32, filtered: bool) -> bool {
        self.shared.filters.lock().set_state(id, filtered)
    }

    pub fn is_message_filtered(&self, id: u32) -> bool {
        self.shared.is_filtered(id)
    }

    /// Start the reader thread
    pub fn start_reader_thread(&mut self) {
        if self.reader.is_some() {
            return;
        }
        if self.shared.transport.is_none() {
            log::warn!("No CAN interface, reader thread not started");
            return;
        }
        let shared = Arc::clone(&self.shared);
        self.reader = Some(thread::spawn(move || shared.reader_loop()));
    }

    /// Start the sender thread
    pub fn start_sender_thread(&mut self) {
        if self.sender.is_some() {
            return;
        }
        let shared = Arc::clone(&self.shared);
        self.sender = Some(thread::spawn(move || shared.sender_loop()));
    }

    /// Ask both threads to stop
    pub fn stop_threads(&self) {
        self.shared.threads_running.store(false, Ordering::SeqCst);
    }

    /// Start replaying the recording; only available with an ASC source.
    ///
    /// Replay runs on the sender thread and stops the live threads.
    pub fn start_data_simulator(&mut self) -> bool {
        if self.shared.replay.is_empty() || self.is_data_simulator_running() {
            return false;
        }
        self.shared.simulation_running.store(true, Ordering::SeqCst);
        self.shared.threads_running.store(false, Ordering::SeqCst);
        self.join_threads();
        self.start_sender_thread();
        true
    }

    pub fn stop_data_simulator(&self) {
        self.shared.simulation_running.store(false, Ordering::SeqCst);
    }

    pub fn is_data_simulator_running(&self) -> bool {
        self.shared.simulation_running.load(Ordering::SeqCst)
    }

    /// Block until the replay has finished
    pub fn wait_data_simulator(&mut self) {
        if let Some(handle) = self.sender.take() {
            if handle.join().is_err() {
                log::error!("Sender thread panicked");
            }
        }
    }

    fn join_threads(&mut self) {
        for handle in [self.reader.take(), self.sender.take()].into_iter().flatten() {
            if handle.join().is_err() {
                log::error!("Simulator thread panicked");
            }
        }
    }
}

impl Drop for SimulatorCore {
    fn drop(&mut self) {
        self.shared.threads_running.store(false, Ordering::SeqCst);
        self.shared.simulation_running.store(false, Ordering::SeqCst);
        self.join_threads();
        self.shared.queue.close();
    }
}

impl Shared {
    fn is_filtered(&self, id: u32) -> bool {
        self.filters.lock().is_filtered(id)
    }

    /// Resolve a variable and apply `set` to its message; caller holds the
    /// input mutex
    fn apply_value(&self, key: &str, set: impl FnOnce(&mut CanMessage, &str) -> bool) -> bool {
        let Some(variable) = self.table.variable(key) else {
            log::warn!("Variable '{}' not found", key);
            return false;
        };
        if !self.table.is_sendable(variable.message_id) {
            log::warn!("Not setting variable '{}'. Variable not defined as outgoing", key);
            return false;
        }
        match self.messages.get(&variable.message_id) {
            Some(message) => set(&mut message.lock(), &variable.signal),
            None => false,
        }
    }

    fn set_value_str(&self, key: &str, text: &str) -> bool {
        let native_units = self.config.native_units;
        self.apply_value(key, |message, signal| {
            message.set_value_str(signal, text, native_units)
        })
    }

    fn send_message(&self, id: u32, force: bool) -> bool {
        if self.is_filtered(id) {
            return false;
        }
        match self.messages.get(&id) {
            Some(message) => {
                let mut message = message.lock();
                if force || message.is_modified() {
                    self.transmit(&mut message)
                } else {
                    false
                }
            }
            None => false,
        }
    }

    fn transmit(&self, message: &mut CanMessage) -> bool {
        let Some(transport) = &self.transport else {
            log::warn!("No CAN interface, message 0x{:X} not sent", message.id());
            return false;
        };
        let frame = message.assemble();
        match transport.send(&frame) {
            Ok(()) => {
                message.update_transfer(true, Direction::Send);
                message.set_modified(false);
                true
            }
            Err(e) => {
                log::warn!("{}", e);
                message.update_transfer(false, Direction::Send);
                false
            }
        }
    }

    fn read_frame(&self) -> Result<Option<CanFrame>> {
        match &self.transport {
            Some(transport) => transport.receive(self.config.reader_poll()),
            None => Ok(None),
        }
    }

    fn process_frame(&self, frame: &CanFrame) -> Option<u32> {
        if frame.is_error() {
            log::error!("{}", analyze_error_frame(frame).trim_end());
            let mut errors = self.errors.lock();
            errors.error_messages += 1;
            errors.error_size += frame.bit_size() as u64;
            return None;
        }

        if !self.is_filtered(frame.id) {
            if let Some(message) = self.messages.get(&frame.id) {
                if self.table.receive_ids().contains(&frame.id) {
                    let mut message = message.lock();
                    message.update_transfer(true, Direction::Receive);
                    return message.parse(frame).then_some(frame.id);
                }
                if self.table.send_ids().contains(&frame.id) {
                    // Own frame echoed by the bus
                    message.lock().update_transfer(true, Direction::Receive);
                    return None;
                }
            }
        }

        let mut errors = self.errors.lock();
        errors.unknown_messages += 1;
        errors.unknown_size += frame.bit_size() as u64;
        None
    }

    fn reader_loop(&self) {
        log::debug!("Reader thread started");
        while self.threads_running.load(Ordering::SeqCst) {
            let frame = match self.read_frame() {
                Ok(Some(frame)) => frame,
                Ok(None) => continue,
                Err(e) => {
                    log::warn!("{}", e);
                    thread::sleep(self.config.reader_poll());
                    continue;
                }
            };
            let Some(id) = self.process_frame(&frame) else {
                continue;
            };
            if let Some(message) = self.messages.get(&id) {
                let mut message = message.lock();
                let copy = message.clone();
                message.set_modified(false);
                drop(message);
                self.queue.push(copy);
                log::debug!("Incoming message 0x{:X} queued", id);
            }
        }
        log::debug!("Reader thread stopped");
    }

    fn sender_loop(&self) {
        log::debug!("Sender thread started");
        let tick = self.config.sender_tick();
        let mut deadline = Instant::now();
        let mut time_deadline = Instant::now();
        let mut replay = self.replay.iter().peekable();
        self.simulation_time.store(0, Ordering::SeqCst);

        while self.threads_running.load(Ordering::SeqCst)
            || self.simulation_running.load(Ordering::SeqCst)
        {
            let now = Instant::now();

            if self.simulation_running.load(Ordering::SeqCst) {
                let simulation_time = self.simulation_time.load(Ordering::SeqCst);
                while let Some(item) = replay.next_if(|item| item.timestamp_ms <= simulation_time) {
                    if item.incoming && !self.is_filtered(item.frame.id) {
                        self.send_frame(&item.frame);
                    }
                }
                let step = self.config.interval().as_millis() as u64;
                let simulation_time = self.simulation_time.fetch_add(step, Ordering::SeqCst) + step;

                let run_time = self.run_time.load(Ordering::SeqCst);
                if replay.peek().is_none()
                    || (run_time > 0 && simulation_time > run_time as u64 * 1000)
                {
                    log::info!("Replay finished after {} ms", simulation_time);
                    self.simulation_running.store(false, Ordering::SeqCst);
                }
            } else {
                let _guard = self.input.lock();
                if self.send_time && time_deadline <= now {
                    self.update_time();
                    time_deadline += self.config.time_update_interval();
                    if time_deadline < now {
                        time_deadline = now + self.config.time_update_interval();
                    }
                }
                for id in self.table.send_ids() {
                    if self.is_filtered(*id) {
                        continue;
                    }
                    if let Some(message) = self.messages.get(id) {
                        let mut message = message.lock();
                        if message.is_send_scheduled(now) && self.transmit(&mut message) {
                            log::trace!("Sent message {}", id);
                        }
                    }
                }
            }

            deadline += tick;
            if deadline < now {
                deadline = now + tick;
            }
            thread::sleep(deadline.saturating_duration_since(Instant::now()));
        }
        log::debug!("Sender thread stopped");
    }

    fn send_frame(&self, frame: &CanFrame) {
        match &self.transport {
            Some(transport) => {
                if let Err(e) = transport.send(frame) {
                    log::warn!("{}", e);
                }
            }
            None => log::debug!("No CAN interface, frame {} dropped", frame),
        }
    }

    /// Write the wall-clock time to the time-of-day variables; caller holds
    /// the input mutex
    fn update_time(&self) {
        let (year, month, day, hour, minute, second) = if self.config.use_utc {
            let now = chrono::Utc::now();
            (now.year(), now.month(), now.day(), now.hour(), now.minute(), now.second())
        } else {
            let now = chrono::Local::now();
            (now.year(), now.month(), now.day(), now.hour(), now.minute(), now.second())
        };
        self.set_value_str("year", &year.to_string());
        self.set_value_str("month", &month.to_string());
        self.set_value_str("day", &day.to_string());
        self.set_value_str("hour", &hour.to_string());
        self.set_value_str("min", &minute.to_string());
        if self.table.variable("sec").is_some() {
            self.set_value_str("sec", &second.to_string());
        }
    }
}
