//! Variable mapping configuration
//!
//! A JSON document maps application variable names onto DBC signals and
//! declares each variable's direction, value type and default:
//!
//! ```json
//! { "version": {"year": 2024, "month": 1, "day": 2, "revision": 3},
//!   "signals": { "VehicleSpeed": {"id": 1, "signal": "Speed", "type": "double",
//!                                 "default": "0", "direction": "out"} } }
//! ```

use crate::config::SimulatorConfig;
use crate::message::CanMessage;
use crate::signal::CanSignal;
use crate::signals::database::{format_version, SignalDatabase};
use crate::signals::dbc::parse_dbc_file;
use crate::types::{Direction, Result, SimulatorError};
use crate::value::ValueKind;
use serde::Deserialize;
use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

#[derive(Debug, Default, Deserialize)]
struct MappingFile {
    #[serde(default)]
    version: Option<MappingVersion>,
    #[serde(default)]
    signals: BTreeMap<String, VariableEntry>,
}

#[derive(Debug, Default, Deserialize)]
struct MappingVersion {
    year: Option<i64>,
    month: Option<i64>,
    day: Option<i64>,
    revision: Option<i64>,
}

#[derive(Debug, Default, Deserialize)]
struct VariableEntry {
    id: Option<u32>,
    signal: Option<String>,
    #[serde(rename = "type")]
    value_type: Option<String>,
    default: Option<serde_json::Value>,
    direction: Option<String>,
}

/// Location of a variable's signal
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Variable {
    pub message_id: u32,
    pub signal: String,
}

/// Variable lookup table and message direction sets
#[derive(Debug, Clone, Default)]
pub struct VariableTable {
    variables: BTreeMap<String, Variable>,
    send_ids: BTreeSet<u32>,
    receive_ids: BTreeSet<u32>,
    cfg_version: String,
    dbc_version: String,
    bitrate: u32,
}

impl VariableTable {
    pub fn variable(&self, name: &str) -> Option<&Variable> {
        self.variables.get(name)
    }

    /// All configured variable names, sorted
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.variables.keys().map(String::as_str)
    }

    pub fn send_ids(&self) -> &BTreeSet<u32> {
        &self.send_ids
    }

    pub fn receive_ids(&self) -> &BTreeSet<u32> {
        &self.receive_ids
    }

    pub fn is_sendable(&self, id: u32) -> bool {
        self.send_ids.contains(&id)
    }

    /// Mapping file version as `YYYY-MM-DD rev. N`, empty if incomplete
    pub fn cfg_version(&self) -> &str {
        &self.cfg_version
    }

    /// DBC version from the Version* network attributes
    pub fn dbc_version(&self) -> &str {
        &self.dbc_version
    }

    /// Bus bitrate declared by the DBC `Baudrate` attribute (0 if absent)
    pub fn bitrate(&self) -> u32 {
        self.bitrate
    }
}

/// Messages and variable table built from a DBC file and a mapping file
#[derive(Debug, Clone)]
pub struct Configuration {
    table: VariableTable,
    messages: BTreeMap<u32, CanMessage>,
}

impl Configuration {
    /// Load the DBC and mapping files
    pub fn load(dbc: &Path, mapping: &Path, config: &SimulatorConfig) -> Result<Self> {
        let db = parse_dbc_file(dbc)?;
        let text = std::fs::read_to_string(mapping).map_err(|e| {
            SimulatorError::MappingError(format!("Failed to read file {:?}: {}", mapping, e))
        })?;
        Self::from_database(db, &text, config)
    }

    /// Build the configuration from a parsed database and mapping JSON text
    pub fn from_database(db: SignalDatabase, mapping: &str, config: &SimulatorConfig) -> Result<Self> {
        let file: MappingFile = serde_json::from_str(mapping)
            .map_err(|e| SimulatorError::MappingError(e.to_string()))?;

        let mut table = VariableTable {
            cfg_version: file
                .version
                .as_ref()
                .and_then(|v| match (v.year, v.month, v.day, v.revision) {
                    (Some(y), Some(m), Some(d), Some(r)) => Some(format_version(y, m, d, r)),
                    _ => None,
                })
                .unwrap_or_default(),
            dbc_version: db.version(),
            bitrate: db.bitrate(),
            ..Default::default()
        };

        for (name, entry) in &file.signals {
            let Some(id) = entry.id else { continue };
            if config.ignore_directions {
                table.send_ids.insert(id);
                table.receive_ids.insert(id);
                continue;
            }
            match entry.direction.as_deref() {
                None | Some("out") => {
                    table.send_ids.insert(id);
                }
                Some("in") => {
                    table.receive_ids.insert(id);
                }
                Some(other) => {
                    log::warn!("Incorrect direction '{}' for variable '{}'", other, name)
                }
            }
        }

        let mut messages: BTreeMap<u32, CanMessage> = db
            .messages()
            .filter(|m| table.send_ids.contains(&m.id) || table.receive_ids.contains(&m.id))
            .map(|m| (m.id, CanMessage::new(m.clone())))
            .collect();

        for (name, entry) in &file.signals {
            let Some(id) = entry.id else { continue };
            let Some(signal_name) = entry.signal.as_deref() else {
                log::warn!("Variable '{}' has no signal name", name);
                continue;
            };
            let Some(signal) = messages
                .get_mut(&id)
                .and_then(|message| message.signal_mut(signal_name))
            else {
                log::warn!(
                    "Signal '{}' for variable '{}' not found in message 0x{:X}",
                    signal_name,
                    name,
                    id
                );
                continue;
            };

            configure_signal(signal, name, entry, config.native_units);
            table.variables.insert(
                name.clone(),
                Variable {
                    message_id: id,
                    signal: signal_name.to_string(),
                },
            );
        }

        for id in &table.receive_ids {
            if let Some(message) = messages.get_mut(id) {
                message.set_direction(Direction::Receive);
            }
        }

        for message in messages.values_mut() {
            message.reset_values(config.suppress_defaults);
        }

        log::info!(
            "Configured {} variables in {} messages ({} send, {} receive)",
            table.variables.len(),
            messages.len(),
            table.send_ids.len(),
            table.receive_ids.len()
        );

        Ok(Self { table, messages })
    }

    pub fn table(&self) -> &VariableTable {
        &self.table
    }

    pub fn messages(&self) -> &BTreeMap<u32, CanMessage> {
        &self.messages
    }

    /// Signal behind a variable name
    pub fn signal(&self, name: &str) -> Option<&CanSignal> {
        let variable = self.table.variable(name)?;
        self.messages.get(&variable.message_id)?.signal(&variable.signal)
    }

    pub fn into_parts(self) -> (VariableTable, BTreeMap<u32, CanMessage>) {
        (self.table, self.messages)
    }
}

fn configure_signal(signal: &mut CanSignal, name: &str, entry: &VariableEntry, native_units: bool) {
    if let Some(type_name) = entry.value_type.as_deref() {
        match ValueKind::from_config(type_name) {
            Some(kind) => signal.set_value_kind(kind),
            None => log::warn!("Unknown value type '{}' for variable '{}'", type_name, name),
        }
    }

    let mut default_set = false;
    if let Some(default) = &entry.default {
        let text = match default {
            serde_json::Value::String(s) => s.clone(),
            other => other.to_string(),
        };
        default_set = signal.set_default_value_str(&text, native_units);
        if !default_set {
            log::warn!("Incorrect configured default value for signal '{}'", name);
        }
    }
    if !default_set && !signal.set_default_value_str("0", native_units) {
        let minimum = signal.value_kind().make(signal.minimum());
        signal.set_default_value(minimum);
    }

    signal.set_variable_name(name);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::signals::database::{AttributeValue, MessageDefinition, SignalDefinition};
    use crate::value::Value;

    fn database() -> SignalDatabase {
        let mut db = SignalDatabase::new();
        db.add_message(
            MessageDefinition::new(1, "Speed", 8)
                .with_signal(SignalDefinition::new("VehicleSpeed", 0, 16).with_range(0.0, 300.0))
                .with_signal(
                    SignalDefinition::new("Temperature", 16, 8)
                        .with_scaling(1.0, -40.0)
                        .with_range(-40.0, 215.0)
                        .with_unit("F"),
                ),
        );
        db.add_message(
            MessageDefinition::new(2, "Door", 1)
                .with_signal(SignalDefinition::new("DoorOpen", 0, 1)),
        );
        db.add_message(
            MessageDefinition::new(3, "Unused", 1).with_signal(SignalDefinition::new("X", 0, 8)),
        );
        db.add_message(
            MessageDefinition::new(4, "Offset", 1)
                .with_signal(SignalDefinition::new("Level", 0, 8).with_range(10.0, 20.0)),
        );
        db.set_attribute("VersionYear", AttributeValue::Integer(2022));
        db.set_attribute("VersionMonth", AttributeValue::Integer(11));
        db.set_attribute("VersionDay", AttributeValue::Integer(3));
        db.set_attribute("VersionNumber", AttributeValue::Integer(7));
        db
    }

    const MAPPING: &str = r#"{
        "version": {"year": 2024, "month": 1, "day": 2, "revision": 3},
        "signals": {
            "speed": {"id": 1, "signal": "VehicleSpeed", "type": "unsigned", "default": "50"},
            "temp": {"id": 1, "signal": "Temperature", "default": 20},
            "door": {"id": 2, "signal": "DoorOpen", "direction": "in"},
            "level": {"id": 4, "signal": "Level", "default": "99"},
            "ghost": {"id": 1, "signal": "Missing"},
            "weird": {"id": 3, "signal": "X", "direction": "sideways"}
        }
    }"#;

    #[test]
    fn test_load_mapping() {
        let config = SimulatorConfig::new().with_native_units(true);
        let cfg = Configuration::from_database(database(), MAPPING, &config).unwrap();
        let table = cfg.table();

        assert_eq!(table.cfg_version(), "2024-01-02 rev. 3");
        assert_eq!(table.dbc_version(), "2022-11-03 rev. 7");
        assert_eq!(table.send_ids().iter().copied().collect::<Vec<_>>(), vec![1, 4]);
        assert_eq!(table.receive_ids().iter().copied().collect::<Vec<_>>(), vec![2]);

        // Only referenced messages with a valid direction are kept
        assert_eq!(cfg.messages().keys().copied().collect::<Vec<_>>(), vec![1, 2, 4]);
        assert_eq!(cfg.messages()[&2].direction(), Direction::Receive);
        assert_eq!(cfg.messages()[&1].direction(), Direction::Send);

        let names: Vec<_> = table.names().collect();
        assert_eq!(names, vec!["door", "level", "speed", "temp"]);
    }

    #[test]
    fn test_defaults_applied() {
        let config = SimulatorConfig::new().with_native_units(true);
        let cfg = Configuration::from_database(database(), MAPPING, &config).unwrap();

        let speed = cfg.signal("speed").unwrap();
        assert_eq!(speed.value_kind(), ValueKind::Unsigned);
        assert_eq!(speed.value(), Value::Unsigned(50));
        assert_eq!(speed.variable_name(), "speed");
        assert!(!speed.is_value_set());

        assert_eq!(cfg.signal("temp").unwrap().value(), Value::Integer(20));

        // "99" and "0" are out of range, the minimum is used
        assert_eq!(cfg.signal("level").unwrap().value(), Value::Integer(10));
    }

    #[test]
    fn test_unit_conversion_on_defaults() {
        let config = SimulatorConfig::new();
        let cfg = Configuration::from_database(database(), MAPPING, &config).unwrap();
        // 20 degrees Celsius expressed in Fahrenheit
        assert_eq!(cfg.signal("temp").unwrap().default_value(), Value::Integer(68));
    }

    #[test]
    fn test_suppress_defaults_marks_values_set() {
        let config = SimulatorConfig::new().with_suppress_defaults(true);
        let cfg = Configuration::from_database(database(), MAPPING, &config).unwrap();
        assert!(cfg.signal("speed").unwrap().is_value_set());
    }

    #[test]
    fn test_ignore_directions() {
        let config = SimulatorConfig::new().with_ignore_directions(true);
        let cfg = Configuration::from_database(database(), MAPPING, &config).unwrap();
        assert!(cfg.table().send_ids().contains(&2));
        assert!(cfg.table().receive_ids().contains(&1));
        assert!(cfg.messages().contains_key(&3));
    }

    #[test]
    fn test_invalid_json() {
        let result =
            Configuration::from_database(database(), "{ not json", &SimulatorConfig::new());
        assert!(matches!(result, Err(SimulatorError::MappingError(_))));
    }
}
