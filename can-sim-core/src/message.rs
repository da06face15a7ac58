//! Runtime message: frame assembly, parsing, send scheduling and transfer counters

use crate::signal::{CanSignal, SendType};
use crate::signals::database::{AttributeValue, MessageDefinition};
use crate::types::{frame_bits, CanFrame, Direction, CAN_MAX_DLEN};
use crate::value::Value;
use std::collections::{BTreeMap, HashMap};
use std::fmt::Write as _;
use std::time::{Duration, Instant};

/// A simulated CAN message and the signals it carries
///
/// Messages are shared between the simulator threads behind a mutex; all
/// methods take `&self`/`&mut self` and never lock on their own.
#[derive(Debug, Clone)]
pub struct CanMessage {
    id: u32,
    name: String,
    dlc: usize,
    sender: Option<String>,
    description: Option<String>,
    attributes: HashMap<String, AttributeValue>,
    signals: BTreeMap<String, CanSignal>,
    direction: Direction,
    modified: bool,
    send_time: Instant,
    successful: u64,
    failed: u64,
    false_direction: u64,
}

impl CanMessage {
    pub fn new(definition: MessageDefinition) -> Self {
        let MessageDefinition {
            id,
            name,
            size,
            sender,
            description,
            attributes,
            signals,
        } = definition;

        if size > CAN_MAX_DLEN {
            log::warn!(
                "Message '{}' declares {} bytes, frames are limited to {}",
                name,
                size,
                CAN_MAX_DLEN
            );
        }

        let signals = signals
            .into_iter()
            .map(|def| (def.name.clone(), CanSignal::new(def)))
            .collect();

        Self {
            id,
            name,
            dlc: size.min(CAN_MAX_DLEN),
            sender,
            description,
            attributes,
            signals,
            direction: Direction::Send,
            modified: false,
            send_time: Instant::now(),
            successful: 0,
            failed: 0,
            false_direction: 0,
        }
    }

    pub fn id(&self) -> u32 {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn dlc(&self) -> usize {
        self.dlc
    }

    pub fn sender(&self) -> Option<&str> {
        self.sender.as_deref()
    }

    pub fn description(&self) -> Option<&str> {
        self.description.as_deref()
    }

    pub fn attribute(&self, name: &str) -> Option<&AttributeValue> {
        self.attributes.get(name)
    }

    pub fn direction(&self) -> Direction {
        self.direction
    }

    pub fn set_direction(&mut self, direction: Direction) {
        self.direction = direction;
    }

    /// Bus size of this message's frame in bits
    pub fn bit_size(&self) -> u32 {
        frame_bits(self.id, self.dlc)
    }

    pub fn signals(&self) -> impl Iterator<Item = &CanSignal> {
        self.signals.values()
    }

    pub fn signals_mut(&mut self) -> impl Iterator<Item = &mut CanSignal> {
        self.signals.values_mut()
    }

    pub fn signal(&self, name: &str) -> Option<&CanSignal> {
        self.signals.get(name)
    }

    pub fn signal_mut(&mut self, name: &str) -> Option<&mut CanSignal> {
        self.signals.get_mut(name)
    }

    pub fn is_modified(&self) -> bool {
        self.modified
    }

    /// Set the modified flag; clearing it also clears every signal's flag
    pub fn set_modified(&mut self, modified: bool) {
        self.modified = modified;
        if !modified {
            for signal in self.signals.values_mut() {
                signal.set_modified(false);
            }
        }
    }

    /// Set a signal value, marking the message modified on success
    pub fn set_value(&mut self, signal_name: &str, value: Value) -> bool {
        match self.signals.get_mut(signal_name) {
            Some(signal) => {
                let accepted = signal.set_value(value);
                self.modified |= accepted;
                accepted
            }
            None => {
                log::warn!("Signal '{}' not found in message '{}'", signal_name, self.name);
                false
            }
        }
    }

    /// Set a signal value from text, marking the message modified on success
    pub fn set_value_str(&mut self, signal_name: &str, text: &str, native_units: bool) -> bool {
        match self.signals.get_mut(signal_name) {
            Some(signal) => {
                let accepted = signal.set_value_str(text, native_units);
                self.modified |= accepted;
                accepted
            }
            None => {
                log::warn!("Signal '{}' not found in message '{}'", signal_name, self.name);
                false
            }
        }
    }

    /// Reset all signals to their defaults
    pub fn reset_values(&mut self, set: bool) {
        for signal in self.signals.values_mut() {
            if signal.reset_value(set) {
                self.modified = false;
            }
        }
    }

    /// Build a frame holding the current value of every signal
    pub fn assemble(&self) -> CanFrame {
        log::debug!("Assemble message {} (0x{:X}): {}", self.id, self.id, self.name);
        let mut frame = CanFrame {
            id: self.id,
            len: self.dlc as u8,
            data: [0; CAN_MAX_DLEN],
        };
        for signal in self.signals.values() {
            log::trace!("Add to CAN message: {}={}", signal.name(), signal.value());
            signal.pack(&mut frame.data, self.dlc);
        }
        frame
    }

    /// Decode a frame into the signals, returning true if any value changed
    pub fn parse(&mut self, frame: &CanFrame) -> bool {
        log::debug!("Parse CAN frame {} (0x{:X}), len {}", frame.id, frame.id, frame.len);
        let mut changed = false;
        for signal in self.signals.values_mut() {
            let raw = signal.unpack(&frame.data, self.dlc);
            if (!signal.is_value_set() || raw != signal.raw_value()) && signal.set_value_from_raw(raw)
            {
                changed = true;
            }
        }
        self.modified |= changed;
        changed
    }

    /// Declared `GenMsgSendType`, if any
    pub fn send_type(&self) -> Option<SendType> {
        self.attribute("GenMsgSendType")
            .map(|value| SendType::from_label(&value.to_string()))
    }

    /// Declared `GenMsgCycleTime` in milliseconds (0 when absent)
    pub fn cycle_time(&self) -> Option<i64> {
        match self.attribute("GenMsgCycleTime") {
            Some(value) => value.as_int(),
            None => Some(0),
        }
    }

    /// Decide whether the message is due at `now`.
    ///
    /// The message-level send type is checked first, then each signal's. A
    /// cyclic trigger moves the next send time to `now + cycle time`.
    pub fn is_send_scheduled(&mut self, now: Instant) -> bool {
        let Some(cycle_time) = self.cycle_time() else {
            log::warn!("Message '{}' has a non-numeric cycle time", self.name);
            return false;
        };

        let mut due = false;
        let mut reschedule = false;

        match self.send_type() {
            Some(SendType::Cyclic) if cycle_time > 0 && now >= self.send_time => {
                due = true;
                reschedule = true;
            }
            Some(send_type) if send_type.is_on_change() => due = self.modified,
            _ => {}
        }

        if !due {
            for signal in self.signals.values() {
                match signal.send_type() {
                    Some(SendType::Cyclic) if now >= self.send_time => {
                        due = true;
                        reschedule = true;
                        break;
                    }
                    Some(send_type) if send_type.is_on_change() && signal.is_modified() => {
                        due = true;
                        break;
                    }
                    _ => {}
                }
            }
        }

        if reschedule {
            self.send_time = now + Duration::from_millis(cycle_time.max(0) as u64);
        }
        due
    }

    /// Count a transfer attempt made in `direction`
    pub fn update_transfer(&mut self, successful: bool, direction: Direction) {
        if direction != self.direction {
            self.false_direction += 1;
        } else if successful {
            self.successful += 1;
        } else {
            self.failed += 1;
        }
    }

    pub fn successful(&self) -> u64 {
        self.successful
    }

    pub fn failed(&self) -> u64 {
        self.failed
    }

    pub fn false_direction(&self) -> u64 {
        self.false_direction
    }

    /// One-line overview, with attributes if `details`
    pub fn describe(&self, details: bool) -> String {
        let mut out = format!(
            "CAN message {} (0x{:x}): {}\n",
            self.id,
            self.id,
            self.description.as_deref().unwrap_or(&self.name)
        );
        if details {
            out.push_str("Message attributes:\n");
            let mut attributes: Vec<_> = self.attributes.iter().collect();
            attributes.sort_by(|a, b| a.0.cmp(b.0));
            for (name, value) in attributes {
                let _ = writeln!(out, "\t{}: {}", name, value);
            }
        }
        out
    }
}
