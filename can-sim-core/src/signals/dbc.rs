//! DBC file parser
//!
//! Parses Vector DBC files with the `can-dbc` crate and converts them into the
//! signal database: messages, signals, comments, value descriptions and
//! attributes (definitions, defaults and explicit values).

use crate::signals::database::{
    AttributeValue, ByteOrder, MessageDefinition, Multiplexing, SignalDatabase,
    SignalDefinition, ValueType,
};
use crate::types::{Result, SimulatorError};
use std::collections::{BTreeMap, HashMap};
use std::path::Path;

/// Parse a DBC file into a signal database
pub fn parse_dbc_file(path: &Path) -> Result<SignalDatabase> {
    log::info!("Parsing DBC file: {:?}", path);

    let bytes = std::fs::read(path).map_err(|e| {
        SimulatorError::DbcParseError(format!("Failed to read file {:?}: {}", path, e))
    })?;

    // Try UTF-8 first, then fall back to Latin-1 (compatible with Windows-1252)
    let content = match String::from_utf8(bytes) {
        Ok(text) => text,
        Err(err) => {
            log::warn!("DBC file is not UTF-8, trying Latin-1 encoding");
            err.into_bytes().iter().map(|&b| b as char).collect()
        }
    };

    let db = parse_dbc_str(&content)
        .map_err(|e| SimulatorError::DbcParseError(format!("{:?}: {}", path, e)))?;

    log::info!("Parsed {} messages from {:?}", db.stats().num_messages, path);
    Ok(db)
}

/// Parse DBC text into a signal database
pub fn parse_dbc_str(content: &str) -> Result<SignalDatabase> {
    let dbc = can_dbc::DBC::from_slice(content.as_bytes()).map_err(|e| {
        SimulatorError::DbcParseError(format!("Failed to parse DBC content: {:?}", e))
    })?;

    let attributes = AttributeTable::build(&dbc);
    let mut db = SignalDatabase::new();

    for (name, value) in attributes.network_values() {
        db.set_attribute(name, value);
    }

    for dbc_msg in dbc.messages() {
        let message = convert_message(&dbc, dbc_msg, &attributes);
        for signal in &message.signals {
            signal.check_range();
        }
        db.add_message(message);
    }

    Ok(db)
}

/// Convert a can-dbc message to our MessageDefinition
fn convert_message(
    dbc: &can_dbc::DBC,
    dbc_msg: &can_dbc::Message,
    attributes: &AttributeTable,
) -> MessageDefinition {
    let id = dbc_msg.message_id().0;

    let signals = dbc_msg
        .signals()
        .iter()
        .map(|dbc_sig| convert_signal(dbc, id, dbc_sig, attributes))
        .collect();

    MessageDefinition {
        id,
        name: dbc_msg.message_name().to_string(),
        size: *dbc_msg.message_size() as usize,
        sender: match dbc_msg.transmitter() {
            can_dbc::Transmitter::NodeName(name) => Some(name.to_string()),
            _ => None,
        },
        description: message_comment(dbc, id),
        attributes: attributes.message_values(id),
        signals,
    }
}

/// Convert a can-dbc signal to our SignalDefinition
fn convert_signal(
    dbc: &can_dbc::DBC,
    message_id: u32,
    dbc_sig: &can_dbc::Signal,
    attributes: &AttributeTable,
) -> SignalDefinition {
    let byte_order = match *dbc_sig.byte_order() {
        can_dbc::ByteOrder::LittleEndian => ByteOrder::LittleEndian,
        can_dbc::ByteOrder::BigEndian => ByteOrder::BigEndian,
    };

    let value_type = match *dbc_sig.value_type() {
        can_dbc::ValueType::Signed => ValueType::Signed,
        can_dbc::ValueType::Unsigned => ValueType::Unsigned,
    };

    let multiplexing = match *dbc_sig.multiplexer_indicator() {
        can_dbc::MultiplexIndicator::Multiplexor => Multiplexing::Multiplexor,
        can_dbc::MultiplexIndicator::MultiplexedSignal(value) => Multiplexing::Multiplexed(value),
        can_dbc::MultiplexIndicator::MultiplexorAndMultiplexedSignal(value) => {
            Multiplexing::Multiplexed(value)
        }
        can_dbc::MultiplexIndicator::Plain => Multiplexing::None,
    };

    let value_descriptions: BTreeMap<i64, String> = dbc
        .value_descriptions_for_signal(can_dbc::MessageId(message_id), dbc_sig.name())
        .map(|descriptions| {
            descriptions
                .iter()
                .map(|d| (*d.a() as i64, d.b().to_string()))
                .collect()
        })
        .unwrap_or_default();

    SignalDefinition {
        name: dbc_sig.name().to_string(),
        start_bit: *dbc_sig.start_bit() as u16,
        length: *dbc_sig.signal_size() as u16,
        byte_order,
        value_type,
        factor: *dbc_sig.factor(),
        offset: *dbc_sig.offset(),
        min: *dbc_sig.min(),
        max: *dbc_sig.max(),
        unit: dbc_sig.unit().to_string(),
        multiplexing,
        value_descriptions,
        description: signal_comment(dbc, message_id, dbc_sig.name()),
        attributes: attributes.signal_values(message_id, dbc_sig.name()),
    }
}

fn message_comment(dbc: &can_dbc::DBC, id: u32) -> Option<String> {
    dbc.comments().iter().find_map(|comment| match comment {
        can_dbc::Comment::Message {
            message_id,
            comment,
        } if message_id.0 == id => Some(comment.to_string()),
        _ => None,
    })
}

fn signal_comment(dbc: &can_dbc::DBC, id: u32, name: &str) -> Option<String> {
    dbc.comments().iter().find_map(|comment| match comment {
        can_dbc::Comment::Signal {
            message_id,
            signal_name,
            comment,
        } if message_id.0 == id && signal_name == name => Some(comment.to_string()),
        _ => None,
    })
}

/// Object kind an attribute definition applies to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ObjectKind {
    Network,
    Node,
    Message,
    Signal,
    EnvironmentVariable,
}

/// Declared attribute type (`INT`, `HEX`, `FLOAT`, `STRING`, `ENUM`)
#[derive(Debug, Clone, PartialEq)]
enum AttributeType {
    Integer,
    Float,
    Text,
    Enum(Vec<String>),
}

#[derive(Debug, Clone)]
struct AttributeDefinition {
    kind: ObjectKind,
    value_type: AttributeType,
}

/// Resolved attribute values by object
#[derive(Debug, Default)]
struct AttributeTable {
    definitions: HashMap<String, AttributeDefinition>,
    defaults: HashMap<String, AttributeValue>,
    network: HashMap<String, AttributeValue>,
    messages: HashMap<u32, HashMap<String, AttributeValue>>,
    signals: HashMap<(u32, String), HashMap<String, AttributeValue>>,
}

impl AttributeTable {
    fn build(dbc: &can_dbc::DBC) -> Self {
        let mut table = AttributeTable::default();

        for definition in dbc.attribute_definitions() {
            let (kind, raw) = match definition {
                can_dbc::AttributeDefinition::Message(raw) => (ObjectKind::Message, raw),
                can_dbc::AttributeDefinition::Node(raw) => (ObjectKind::Node, raw),
                can_dbc::AttributeDefinition::Signal(raw) => (ObjectKind::Signal, raw),
                can_dbc::AttributeDefinition::EnvironmentVariable(raw) => {
                    (ObjectKind::EnvironmentVariable, raw)
                }
                can_dbc::AttributeDefinition::Plain(raw) => (ObjectKind::Network, raw),
            };
            match parse_definition(raw) {
                Some((name, value_type)) => {
                    table
                        .definitions
                        .insert(name, AttributeDefinition { kind, value_type });
                }
                None => log::warn!("Ignoring malformed attribute definition: {}", raw),
            }
        }

        for default in dbc.attribute_defaults() {
            let name = default.attribute_name();
            let value = table.resolve(name, default.attribute_value());
            table.defaults.insert(name.to_string(), value);
        }

        for assignment in dbc.attribute_values() {
            let name = assignment.attribute_name().to_string();
            match assignment.attribute_value() {
                can_dbc::AttributeValuedForObjectType::RawAttributeValue(value) => {
                    let value = table.resolve(&name, value);
                    table.network.insert(name, value);
                }
                can_dbc::AttributeValuedForObjectType::MessageDefinitionAttributeValue(
                    id,
                    Some(value),
                ) => {
                    let value = table.resolve(&name, value);
                    table.messages.entry(id.0).or_default().insert(name, value);
                }
                can_dbc::AttributeValuedForObjectType::SignalAttributeValue(
                    id,
                    signal,
                    value,
                ) => {
                    let value = table.resolve(&name, value);
                    table
                        .signals
                        .entry((id.0, signal.to_string()))
                        .or_default()
                        .insert(name, value);
                }
                _ => log::trace!("Skipping attribute '{}' for node/env object", name),
            }
        }

        table
    }

    /// Convert a raw attribute value, resolving enum indices to labels
    fn resolve(&self, name: &str, value: &can_dbc::AttributeValue) -> AttributeValue {
        let converted = match value {
            can_dbc::AttributeValue::AttributeValueU64(v) => AttributeValue::Integer(*v as i64),
            can_dbc::AttributeValue::AttributeValueI64(v) => AttributeValue::Integer(*v),
            can_dbc::AttributeValue::AttributeValueF64(v) => AttributeValue::Double(*v),
            can_dbc::AttributeValue::AttributeValueCharString(s) => {
                AttributeValue::Text(s.to_string())
            }
        };

        match self.definitions.get(name).map(|d| &d.value_type) {
            Some(AttributeType::Enum(labels)) => match whole_number(&converted) {
                Some(index) => usize::try_from(index)
                    .ok()
                    .and_then(|i| labels.get(i))
                    .map(|label| AttributeValue::Text(label.clone()))
                    .unwrap_or(AttributeValue::Integer(index)),
                None => converted,
            },
            Some(AttributeType::Integer) | None => match whole_number(&converted) {
                Some(v) => AttributeValue::Integer(v),
                None => converted,
            },
            Some(AttributeType::Float) => match converted {
                AttributeValue::Integer(v) => AttributeValue::Double(v as f64),
                other => other,
            },
            Some(AttributeType::Text) => converted,
        }
    }

    fn defaults_for(&self, kind: ObjectKind) -> HashMap<String, AttributeValue> {
        self.defaults
            .iter()
            .filter(|(name, _)| {
                self.definitions
                    .get(name.as_str())
                    .map(|d| d.kind == kind)
                    .unwrap_or(false)
            })
            .map(|(name, value)| (name.clone(), value.clone()))
            .collect()
    }

    fn network_values(&self) -> HashMap<String, AttributeValue> {
        let mut values = self.defaults_for(ObjectKind::Network);
        values.extend(self.network.clone());
        values
    }

    fn message_values(&self, id: u32) -> HashMap<String, AttributeValue> {
        let mut values = self.defaults_for(ObjectKind::Message);
        if let Some(explicit) = self.messages.get(&id) {
            values.extend(explicit.clone());
        }
        values
    }

    fn signal_values(&self, id: u32, signal: &str) -> HashMap<String, AttributeValue> {
        let mut values = self.defaults_for(ObjectKind::Signal);
        if let Some(explicit) = self.signals.get(&(id, signal.to_string())) {
            values.extend(explicit.clone());
        }
        values
    }
}

/// Integral value of a numeric attribute; can-dbc reports plain numbers as `f64`
fn whole_number(value: &AttributeValue) -> Option<i64> {
    match value {
        AttributeValue::Integer(v) => Some(*v),
        AttributeValue::Double(v) if v.fract() == 0.0 && v.is_finite() => Some(*v as i64),
        _ => None,
    }
}

/// Parse the remainder of a `BA_DEF_` line: `"Name" TYPE [args]`
fn parse_definition(raw: &str) -> Option<(String, AttributeType)> {
    let raw = raw.trim().trim_end_matches(';');
    let start = raw.find('"')?;
    let rest = &raw[start + 1..];
    let end = rest.find('"')?;
    let name = rest[..end].to_string();
    let declaration = rest[end + 1..].trim();

    let (type_word, args) = match declaration.split_once(char::is_whitespace) {
        Some((word, args)) => (word, args.trim()),
        None => (declaration, ""),
    };

    let value_type = match type_word {
        "INT" | "HEX" => AttributeType::Integer,
        "FLOAT" => AttributeType::Float,
        "STRING" => AttributeType::Text,
        "ENUM" => AttributeType::Enum(
            args.split(',')
                .map(|label| label.trim().trim_matches('"').to_string())
                .filter(|label| !label.is_empty())
                .collect(),
        ),
        _ => return None,
    };

    Some((name, value_type))
}
