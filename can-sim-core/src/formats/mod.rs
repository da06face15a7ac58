//! Log file formats
//!
//! Replay recordings are read into a list of timestamped frames.

pub mod asc;

pub use asc::{AscItem, AscReader};
