//! Runtime signal: current value, scaling, validation and bit placement
//!
//! A [`CanSignal`] wraps an immutable [`SignalDefinition`] with the mutable
//! state the simulator needs (current and default value, modified flag,
//! variable name). The pack/unpack routines implement the frame bit layout
//! for both byte orders.

use crate::signals::database::{
    AttributeValue, ByteOrder, Multiplexing, SignalDefinition, ValueType,
};
use crate::units::Unit;
use crate::value::{Value, ValueKind};
use std::fmt::Write as _;

/// Send type declared by the `GenMsgSendType` / `GenSigSendType` attributes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendType {
    Cyclic,
    OnChange,
    OnChangeWithRepetition,
    /// Any other declared send type, never scheduled
    Other,
}

impl SendType {
    pub fn from_label(label: &str) -> Self {
        match label {
            "Cyclic" => SendType::Cyclic,
            "OnChange" => SendType::OnChange,
            "OnChangeWithRepetition" => SendType::OnChangeWithRepetition,
            _ => SendType::Other,
        }
    }

    pub fn is_on_change(self) -> bool {
        matches!(self, SendType::OnChange | SendType::OnChangeWithRepetition)
    }
}

/// A signal of a simulated message
#[derive(Debug, Clone)]
pub struct CanSignal {
    definition: SignalDefinition,
    unit: Unit,
    value_kind: ValueKind,
    value: Value,
    default_value: Value,
    is_value_set: bool,
    modified: bool,
    variable_name: String,
}

impl CanSignal {
    pub fn new(definition: SignalDefinition) -> Self {
        let unit = Unit::from_name(&definition.unit);
        Self {
            definition,
            unit,
            value_kind: ValueKind::Integer,
            value: Value::default(),
            default_value: Value::default(),
            is_value_set: false,
            modified: false,
            variable_name: String::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.definition.name
    }

    pub fn definition(&self) -> &SignalDefinition {
        &self.definition
    }

    pub fn minimum(&self) -> f64 {
        self.definition.min
    }

    pub fn maximum(&self) -> f64 {
        self.definition.max
    }

    pub fn unit(&self) -> &str {
        &self.definition.unit
    }

    pub fn value(&self) -> Value {
        self.value
    }

    pub fn default_value(&self) -> Value {
        self.default_value
    }

    pub fn value_kind(&self) -> ValueKind {
        self.value_kind
    }

    pub fn set_value_kind(&mut self, kind: ValueKind) {
        self.value_kind = kind;
    }

    pub fn variable_name(&self) -> &str {
        &self.variable_name
    }

    pub fn set_variable_name(&mut self, name: impl Into<String>) {
        self.variable_name = name.into();
    }

    pub fn is_modified(&self) -> bool {
        self.modified
    }

    pub fn set_modified(&mut self, modified: bool) {
        self.modified = modified;
    }

    /// True once a value was set or decoded since construction or the last reset
    pub fn is_value_set(&self) -> bool {
        self.is_value_set
    }

    pub fn attribute(&self, name: &str) -> Option<&AttributeValue> {
        self.definition.attributes.get(name)
    }

    /// Declared `GenSigSendType`, if any
    pub fn send_type(&self) -> Option<SendType> {
        self.attribute("GenSigSendType")
            .map(|value| SendType::from_label(&value.to_string()))
    }

    /// Current value as the raw bit pattern (masked to the signal length)
    pub fn raw_value(&self) -> u64 {
        let d = &self.definition;
        let unscaled = d.factor == 1.0 && d.offset == 0.0;
        let raw = match self.value {
            Value::Unsigned(v) if unscaled => v,
            Value::Integer(v) if unscaled => v as u64,
            value => {
                let scaled = ((value.to_double() - d.offset) / d.factor).round();
                if scaled < 0.0 {
                    scaled as i64 as u64
                } else {
                    scaled as u64
                }
            }
        };
        raw & length_mask(d.length)
    }

    /// Check a value against `[minimum, maximum]` with a relative epsilon
    /// tolerance at the bounds
    pub fn test_value(&self, value: &Value) -> bool {
        let v = value.to_double();
        let (min, max) = (self.definition.min, self.definition.max);
        if v < min || v > max {
            (v - min).abs() <= v.min(min).abs() * f64::EPSILON
                || (v - max).abs() <= v.min(max).abs() * f64::EPSILON
        } else {
            true
        }
    }

    /// Parse a value string, converting from native units unless `native_units`
    pub fn parse_value(&self, text: &str, native_units: bool) -> Option<Value> {
        let parsed: f64 = text.trim().parse().ok()?;
        if !parsed.is_finite() {
            return None;
        }
        let converted = if native_units {
            parsed
        } else {
            self.unit.from_native(parsed)
        };
        let value = self.value_kind.make(converted);
        self.test_value(&value).then_some(value)
    }

    /// Set the current value; rejected values leave the signal unchanged
    pub fn set_value(&mut self, value: Value) -> bool {
        if self.test_value(&value) {
            self.accept(value);
            true
        } else {
            log::warn!("Invalid value: {}={}", self.name(), value);
            false
        }
    }

    /// Set the current value from text
    pub fn set_value_str(&mut self, text: &str, native_units: bool) -> bool {
        match self.parse_value(text, native_units) {
            Some(value) => {
                self.accept(value);
                true
            }
            None => {
                log::warn!("Invalid value: {}={}", self.name(), text);
                false
            }
        }
    }

    /// Set the value a reset returns to
    pub fn set_default_value_str(&mut self, text: &str, native_units: bool) -> bool {
        match self.parse_value(text, native_units) {
            Some(value) => {
                self.default_value = value;
                true
            }
            None => false,
        }
    }

    pub fn set_default_value(&mut self, value: Value) {
        self.default_value = value;
    }

    /// Decode a raw bit pattern into the current value
    pub fn set_value_from_raw(&mut self, raw: u64) -> bool {
        let d = &self.definition;
        let unscaled = d.factor == 1.0 && d.offset == 0.0;
        let value = match (d.value_type, self.value_kind) {
            (ValueType::Signed, kind) => {
                let signed = sign_extend(raw, d.length);
                match kind {
                    ValueKind::Integer if unscaled => Value::Integer(signed),
                    _ => kind.make(signed as f64 * d.factor + d.offset),
                }
            }
            (ValueType::Unsigned, ValueKind::Unsigned) if unscaled => Value::Unsigned(raw),
            (ValueType::Unsigned, ValueKind::Integer) if unscaled => Value::Integer(raw as i64),
            (ValueType::Unsigned, kind) => kind.make(raw as f64 * d.factor + d.offset),
        };
        self.set_value(value)
    }

    /// Reset to the default value, returning true if the value changed
    pub fn reset_value(&mut self, set: bool) -> bool {
        self.is_value_set = set;
        if self.value != self.default_value {
            self.value = self.default_value;
            self.modified = false;
            true
        } else {
            false
        }
    }

    fn accept(&mut self, value: Value) {
        self.is_value_set = true;
        self.modified = true;
        self.value = value;
    }

    /// Write the current raw value into `data` using the frame layout of `dlc`
    pub fn pack(&self, data: &mut [u8], dlc: usize) {
        pack_raw(&self.definition, data, dlc, self.raw_value());
    }

    /// Read this signal's raw value out of `data`
    pub fn unpack(&self, data: &[u8], dlc: usize) -> u64 {
        unpack_raw(&self.definition, data, dlc)
    }

    /// One-line overview, with value descriptions and attributes if `details`
    pub fn describe(&self, details: bool) -> String {
        let d = &self.definition;
        let mut out = String::new();
        if let Some(description) = &d.description {
            let _ = writeln!(out, "{}", description);
        }
        let _ = write!(out, "name: {}, type: {}", d.name, self.value_kind);
        let _ = match self.value_kind {
            ValueKind::Double => writeln!(
                out,
                ", value: {}, range [{}, {}] {}",
                self.value.to_double(),
                d.min,
                d.max,
                d.unit
            ),
            ValueKind::Unsigned => writeln!(
                out,
                ", value: {}, range [{}, {}] {}",
                self.value.to_unsigned(),
                d.min.round() as u64,
                d.max.round() as u64,
                d.unit
            ),
            ValueKind::Integer => writeln!(
                out,
                ", value: {}, range [{}, {}] {}",
                self.value.to_int(),
                d.min.round() as i64,
                d.max.round() as i64,
                d.unit
            ),
        };
        if details {
            match d.multiplexing {
                Multiplexing::Multiplexor => out.push_str("\tmultiplexor\n"),
                Multiplexing::Multiplexed(n) => {
                    let _ = writeln!(out, "\tmultiplexed by value {}", n);
                }
                Multiplexing::None => {}
            }
            for (raw, label) in &d.value_descriptions {
                let _ = writeln!(out, "\t{}: {}", raw, label);
            }
            out.push_str("Signal attributes:\n");
            let mut attributes: Vec<_> = d.attributes.iter().collect();
            attributes.sort_by(|a, b| a.0.cmp(b.0));
            for (name, value) in attributes {
                let _ = writeln!(out, "\t{}: {}", name, value);
            }
        }
        out
    }
}

fn length_mask(length: u16) -> u64 {
    if length >= 64 {
        u64::MAX
    } else {
        (1u64 << length) - 1
    }
}

/// Sign-extend the low `length` bits of `raw`
fn sign_extend(raw: u64, length: u16) -> i64 {
    if length == 0 || length >= 64 {
        return raw as i64;
    }
    let shift = 64 - u32::from(length);
    ((raw << shift) as i64) >> shift
}

/// Index of the first byte segment and the bit offset inside it.
///
/// Big-endian signals are addressed from the last byte of the frame, which
/// yields a negative start index walked upwards towards zero.
fn placement(definition: &SignalDefinition, dlc: usize) -> (i32, u32) {
    let start = i32::from(definition.start_bit);
    let length = i32::from(definition.length);
    let last = dlc as i32 - 1;
    let (start_bit, start_index) = match definition.byte_order {
        ByteOrder::LittleEndian => (start, start / 8),
        ByteOrder::BigEndian => {
            let bit = last * 8 - (length - 1) - (start / 8) * 8 + start % 8;
            (bit, bit / 8 - last)
        }
    };
    (start_index, start_bit.unsigned_abs() % 8)
}

/// OR `raw` into `data` at the position described by `definition`
pub(crate) fn pack_raw(definition: &SignalDefinition, data: &mut [u8], dlc: usize, raw: u64) {
    let (start_index, start_offset) = placement(definition, dlc);
    let mut left = u32::from(definition.length);
    let mut offset = start_offset;
    let mut index = start_index;

    while left > 0 {
        let size = (8 - offset).min(left);
        let mask = (1u64 << size) - 1;
        let distance = (start_index - index).unsigned_abs();
        let bits = if start_offset != 0 && distance == 0 {
            (raw & mask) << start_offset
        } else {
            raw.checked_shr(8 * distance - start_offset).unwrap_or(0) & mask
        };
        match data.get_mut(index.unsigned_abs() as usize) {
            Some(byte) => *byte |= bits as u8,
            None => log::warn!(
                "Signal '{}' segment at byte {} is outside the frame",
                definition.name,
                index
            ),
        }
        offset = 0;
        left -= size;
        index += 1;
    }
}

/// Extract the raw value described by `definition` from `data`
pub(crate) fn unpack_raw(definition: &SignalDefinition, data: &[u8], dlc: usize) -> u64 {
    let (start_index, start_offset) = placement(definition, dlc);
    let mut left = u32::from(definition.length);
    let mut offset = start_offset;
    let mut index = start_index;
    let mut value = 0u64;

    while left > 0 {
        let size = (8 - offset).min(left);
        let mask = (1u64 << size) - 1;
        let distance = (start_index - index).unsigned_abs();
        match data.get(index.unsigned_abs() as usize) {
            Some(&byte) => {
                let byte = u64::from(byte);
                value |= if start_offset != 0 && distance == 0 {
                    (byte >> start_offset) & mask
                } else {
                    (byte & mask)
                        .checked_shl(8 * distance - start_offset)
                        .unwrap_or(0)
                };
            }
            None => log::warn!(
                "Signal '{}' segment at byte {} is outside the frame",
                definition.name,
                index
            ),
        }
        left -= size;
        offset = 0;
        index += 1;
    }
    value
}
