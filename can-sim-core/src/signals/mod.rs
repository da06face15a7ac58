//! Signal database and DBC parser
//!
//! This module contains the DBC loader and the immutable message/signal
//! definitions the runtime codec is built from.

pub mod dbc;
pub mod database;

// Re-export key types for convenience
pub use database::{
    AttributeValue, ByteOrder, DatabaseStats, MessageDefinition, Multiplexing,
    SignalDatabase, SignalDefinition, ValueType,
};
pub use dbc::{parse_dbc_file, parse_dbc_str};
