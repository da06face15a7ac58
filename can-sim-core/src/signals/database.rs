//! Signal database
//!
//! Immutable message and signal definitions loaded from a DBC file. The
//! runtime signal and message types are built from these records.

use std::collections::{BTreeMap, HashMap};
use std::fmt;

/// A CAN message definition
#[derive(Debug, Clone, Default)]
pub struct MessageDefinition {
    /// CAN message ID (bit 31 set for extended identifiers)
    pub id: u32,
    /// Message name
    pub name: String,
    /// Message size in bytes
    pub size: usize,
    /// Sender ECU name (optional)
    pub sender: Option<String>,
    /// Comment from the DBC file
    pub description: Option<String>,
    /// Attribute values (defaults already applied)
    pub attributes: HashMap<String, AttributeValue>,
    /// All signals in this message
    pub signals: Vec<SignalDefinition>,
}

/// A CAN signal definition
#[derive(Debug, Clone)]
pub struct SignalDefinition {
    /// Signal name
    pub name: String,
    /// Start bit in DBC numbering
    pub start_bit: u16,
    /// Length in bits
    pub length: u16,
    pub byte_order: ByteOrder,
    pub value_type: ValueType,
    /// Scale factor to convert raw value to physical value
    pub factor: f64,
    /// Offset to add after scaling
    pub offset: f64,
    /// Minimum physical value
    pub min: f64,
    /// Maximum physical value
    pub max: f64,
    /// Engineering unit (e.g., "km/h", "V"), empty when absent
    pub unit: String,
    pub multiplexing: Multiplexing,
    /// Value table for enum-like values (raw_value -> description)
    pub value_descriptions: BTreeMap<i64, String>,
    /// Comment from the DBC file
    pub description: Option<String>,
    /// Attribute values (defaults already applied)
    pub attributes: HashMap<String, AttributeValue>,
}

/// Byte order for signal extraction
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ByteOrder {
    /// Little-endian (Intel format)
    LittleEndian,
    /// Big-endian (Motorola format)
    BigEndian,
}

/// Sign of the raw value
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueType {
    Signed,
    Unsigned,
}

/// Multiplexing role of a signal
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Multiplexing {
    #[default]
    None,
    /// Selects which multiplexed signals are valid
    Multiplexor,
    /// Valid when the multiplexor carries this value
    Multiplexed(u64),
}

/// A DBC attribute value, enum values are resolved to their label
#[derive(Debug, Clone, PartialEq)]
pub enum AttributeValue {
    Integer(i64),
    Double(f64),
    Text(String),
}

impl AttributeValue {
    pub fn as_int(&self) -> Option<i64> {
        match self {
            AttributeValue::Integer(v) => Some(*v),
            AttributeValue::Double(v) => Some(v.round() as i64),
            AttributeValue::Text(s) => s.trim().parse().ok(),
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            AttributeValue::Text(s) => Some(s),
            _ => None,
        }
    }
}

impl fmt::Display for AttributeValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AttributeValue::Integer(v) => write!(f, "{}", v),
            AttributeValue::Double(v) => write!(f, "{}", v),
            AttributeValue::Text(s) => write!(f, "{}", s),
        }
    }
}

impl SignalDefinition {
    /// Create an unscaled unsigned little-endian signal
    pub fn new(name: impl Into<String>, start_bit: u16, length: u16) -> Self {
        let max = if length >= 64 {
            u64::MAX as f64
        } else {
            ((1u64 << length) - 1) as f64
        };
        Self {
            name: name.into(),
            start_bit,
            length,
            byte_order: ByteOrder::LittleEndian,
            value_type: ValueType::Unsigned,
            factor: 1.0,
            offset: 0.0,
            min: 0.0,
            max,
            unit: String::new(),
            multiplexing: Multiplexing::None,
            value_descriptions: BTreeMap::new(),
            description: None,
            attributes: HashMap::new(),
        }
    }

    pub fn with_byte_order(mut self, byte_order: ByteOrder) -> Self {
        self.byte_order = byte_order;
        self
    }

    pub fn with_value_type(mut self, value_type: ValueType) -> Self {
        self.value_type = value_type;
        self
    }

    pub fn with_scaling(mut self, factor: f64, offset: f64) -> Self {
        self.factor = factor;
        self.offset = offset;
        self
    }

    pub fn with_range(mut self, min: f64, max: f64) -> Self {
        self.min = min;
        self.max = max;
        self
    }

    pub fn with_unit(mut self, unit: impl Into<String>) -> Self {
        self.unit = unit.into();
        self
    }

    pub fn with_attribute(mut self, name: impl Into<String>, value: AttributeValue) -> Self {
        self.attributes.insert(name.into(), value);
        self
    }

    /// Physical range representable by `length` bits after scaling
    pub fn scaled_range(&self) -> (f64, f64) {
        let bits = self.length.clamp(1, 64) as i32;
        let (raw_min, raw_max) = match self.value_type {
            ValueType::Signed => (-(2f64.powi(bits - 1)), 2f64.powi(bits - 1) - 1.0),
            ValueType::Unsigned => (0.0, 2f64.powi(bits) - 1.0),
        };
        let a = raw_min * self.factor + self.offset;
        let b = raw_max * self.factor + self.offset;
        (a.min(b), a.max(b))
    }

    /// Check `min < max` and that the range fits the scaled bit range.
    ///
    /// Violations are logged, never rejected.
    pub fn check_range(&self) -> bool {
        let mut ok = true;
        if self.max <= self.min && !(self.min == 0.0 && self.max == 0.0) {
            log::warn!(
                "Signal '{}': maximum {} is not above minimum {}",
                self.name,
                self.max,
                self.min
            );
            ok = false;
        }
        let (low, high) = self.scaled_range();
        let tolerance = self.factor.abs() * 0.5;
        if self.min < low - tolerance || self.max > high + tolerance {
            log::warn!(
                "Signal '{}': range [{}, {}] does not fit {} bits (representable [{}, {}])",
                self.name,
                self.min,
                self.max,
                self.length,
                low,
                high
            );
            ok = false;
        }
        ok
    }
}

impl MessageDefinition {
    pub fn new(id: u32, name: impl Into<String>, size: usize) -> Self {
        Self {
            id,
            name: name.into(),
            size,
            ..Default::default()
        }
    }

    pub fn with_signal(mut self, signal: SignalDefinition) -> Self {
        self.signals.push(signal);
        self
    }

    pub fn with_attribute(mut self, name: impl Into<String>, value: AttributeValue) -> Self {
        self.attributes.insert(name.into(), value);
        self
    }
}

/// The signal database of one DBC file
#[derive(Debug, Clone, Default)]
pub struct SignalDatabase {
    /// All message definitions by CAN ID
    messages: BTreeMap<u32, MessageDefinition>,

    /// Network-level attributes (e.g. Baudrate, VersionYear)
    attributes: HashMap<String, AttributeValue>,
}

impl SignalDatabase {
    /// Create a new empty signal database
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a message definition, replacing any previous one with the same ID
    pub fn add_message(&mut self, message: MessageDefinition) {
        if self.messages.contains_key(&message.id) {
            log::warn!("Duplicate message ID 0x{:X}, keeping the last definition", message.id);
        }
        self.messages.insert(message.id, message);
    }

    pub fn set_attribute(&mut self, name: impl Into<String>, value: AttributeValue) {
        self.attributes.insert(name.into(), value);
    }

    pub fn attribute(&self, name: &str) -> Option<&AttributeValue> {
        self.attributes.get(name)
    }

    pub fn message(&self, can_id: u32) -> Option<&MessageDefinition> {
        self.messages.get(&can_id)
    }

    pub fn messages(&self) -> impl Iterator<Item = &MessageDefinition> {
        self.messages.values()
    }

    /// Find a signal by message ID and signal name
    pub fn find_signal(&self, can_id: u32, signal_name: &str) -> Option<&SignalDefinition> {
        self.message(can_id)
            .and_then(|msg| msg.signals.iter().find(|s| s.name == signal_name))
    }

    /// Configured bus bitrate from the `Baudrate` network attribute (0 if absent)
    pub fn bitrate(&self) -> u32 {
        self.attribute("Baudrate")
            .and_then(AttributeValue::as_int)
            .and_then(|v| u32::try_from(v).ok())
            .unwrap_or(0)
    }

    /// `YYYY-MM-DD rev. N` from the Version* network attributes
    pub fn version(&self) -> String {
        let field = |name: &str| self.attribute(name).and_then(AttributeValue::as_int);
        match (
            field("VersionYear"),
            field("VersionMonth"),
            field("VersionDay"),
            field("VersionNumber"),
        ) {
            (Some(y), Some(m), Some(d), Some(n)) => format_version(y, m, d, n),
            _ => String::new(),
        }
    }

    /// Get all CAN IDs in the database, sorted
    pub fn all_can_ids(&self) -> Vec<u32> {
        self.messages.keys().copied().collect()
    }

    pub fn stats(&self) -> DatabaseStats {
        DatabaseStats {
            num_messages: self.messages.len(),
            num_signals: self.messages.values().map(|m| m.signals.len()).sum(),
        }
    }
}

/// Format a dated revision as `YYYY-MM-DD rev. N`
pub fn format_version(year: i64, month: i64, day: i64, revision: i64) -> String {
    format!("{:04}-{:02}-{:02} rev. {}", year, month, day, revision)
}

/// Database statistics
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DatabaseStats {
    pub num_messages: usize,
    pub num_signals: usize,
}
