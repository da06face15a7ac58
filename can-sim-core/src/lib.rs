//! CAN ECU Simulator Library
//!
//! Simulates the CAN side of an ECU from a DBC database and a JSON variable
//! mapping, or replays a recorded ASC trace.
//!
//! # Architecture
//!
//! - `signals` loads the DBC into immutable message/signal definitions
//! - `signal`/`message` hold the runtime values and the frame codec
//! - `mapping` binds user-visible variable names to signals
//! - `simulator` runs the reader and sender threads over a `CanTransport`
//! - `flood` generates randomized load for stress tests
//! - `metrics` records transfer statistics and writes the metrics report
//!
//! Front ends (command line, scripting) live in the application layer
//! (can-sim-cli).
//!
//! # Example Usage
//!
//! ```no_run
//! use can_sim_core::{SimulatorConfig, SimulatorCore, SimulatorSources, Value};
//!
//! let sources = SimulatorSources::live("ecu.dbc", "ecu.json");
//! let mut core = SimulatorCore::open(&sources, "vcan0", SimulatorConfig::new()).unwrap();
//!
//! core.start_reader_thread();
//! core.start_sender_thread();
//!
//! core.set_value("speed", Value::Double(42.5));
//! core.send_variable("speed", true);
//!
//! while let Some(id) = core.read_message() {
//!     println!("Received 0x{:X}", id);
//! }
//! ```

// Public modules
pub mod can_error;
pub mod config;
pub mod filter;
pub mod flood;
pub mod formats;
pub mod mapping;
pub mod message;
pub mod metrics;
pub mod queue;
pub mod signal;
pub mod signals;
pub mod simulator;
pub mod transport;
pub mod types;
pub mod units;
pub mod value;

// Re-export main types for convenience
pub use can_error::analyze_error_frame;
pub use config::SimulatorConfig;
pub use filter::FilterList;
pub use flood::FloodEngine;
pub use formats::{AscItem, AscReader};
pub use mapping::{Configuration, Variable, VariableTable};
pub use message::CanMessage;
pub use metrics::{metrics_file_name, MetricsCollector};
pub use queue::MessageQueue;
pub use signal::CanSignal;
pub use simulator::{SimulatorCore, SimulatorSources};
pub use transport::{CanTransport, MockTransport, SocketCanTransport};
pub use types::{CanFrame, Direction, ErrorMetrics, Result, SimulatorError};
pub use value::{Value, ValueKind};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
