//! Core types for the CAN simulator library
//!
//! This module defines the frame representation shared by the codec, the
//! transports and the replay reader, together with the library error type.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Result type for simulator operations
pub type Result<T> = std::result::Result<T, SimulatorError>;

/// Extended frame format flag (29-bit identifier)
pub const CAN_EFF_FLAG: u32 = 0x8000_0000;
/// Remote transmission request flag
pub const CAN_RTR_FLAG: u32 = 0x4000_0000;
/// Error frame flag
pub const CAN_ERR_FLAG: u32 = 0x2000_0000;
/// Standard frame identifier mask
pub const CAN_SFF_MASK: u32 = 0x0000_07FF;
/// Extended frame identifier mask
pub const CAN_EFF_MASK: u32 = 0x1FFF_FFFF;
/// Error class mask of an error frame identifier
pub const CAN_ERR_MASK: u32 = 0x1FFF_FFFF;
/// Maximum payload of a classic CAN frame
pub const CAN_MAX_DLEN: usize = 8;

/// Fixed per-frame overhead in bits (SOF, control, CRC, ACK, EOF, IFS)
pub const FRAME_OVERHEAD_BITS: u32 = 33;
/// Identifier bits of a standard frame
pub const CAN_SFF_ID_BITS: u32 = 11;
/// Identifier bits of an extended frame (including SRR and IDE)
pub const CAN_EFF_ID_BITS: u32 = 29;

/// Number of bits a frame with `len` data bytes occupies on the bus
pub fn frame_bits(id: u32, len: usize) -> u32 {
    let id_bits = if id & CAN_EFF_FLAG != 0 {
        CAN_EFF_ID_BITS
    } else {
        CAN_SFF_ID_BITS
    };
    FRAME_OVERHEAD_BITS + (len as u32) * 8 + id_bits
}

/// A classic CAN frame
///
/// The identifier uses the SocketCAN layout: the low 29 (or 11) bits are the
/// identifier, the top three bits are the EFF/RTR/ERR flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CanFrame {
    /// CAN identifier including flag bits
    pub id: u32,
    /// Number of valid data bytes
    pub len: u8,
    /// Frame payload, bytes past `len` are zero
    pub data: [u8; CAN_MAX_DLEN],
}

impl CanFrame {
    /// Create a frame from an identifier and payload (truncated to 8 bytes)
    pub fn new(id: u32, payload: &[u8]) -> Self {
        let len = payload.len().min(CAN_MAX_DLEN);
        let mut data = [0u8; CAN_MAX_DLEN];
        data[..len].copy_from_slice(&payload[..len]);
        Self {
            id,
            len: len as u8,
            data,
        }
    }

    /// Valid payload bytes
    pub fn payload(&self) -> &[u8] {
        &self.data[..(self.len as usize).min(CAN_MAX_DLEN)]
    }

    /// True if this is an extended (29-bit) frame
    pub fn is_extended(&self) -> bool {
        self.id & CAN_EFF_FLAG != 0
    }

    /// True if this is an error frame
    pub fn is_error(&self) -> bool {
        self.id & CAN_ERR_FLAG != 0
    }

    /// Identifier without flag bits
    pub fn raw_id(&self) -> u32 {
        if self.is_extended() {
            self.id & CAN_EFF_MASK
        } else {
            self.id & CAN_SFF_MASK
        }
    }

    /// Size of the frame on the bus in bits
    pub fn bit_size(&self) -> u32 {
        frame_bits(self.id, self.len as usize)
    }
}

impl fmt::Display for CanFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:X} [{}]", self.id, self.len)?;
        for byte in self.payload() {
            write!(f, " {:02X}", byte)?;
        }
        Ok(())
    }
}

/// Transfer direction of a message from the simulated ECU's point of view
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum Direction {
    /// Message is produced by the simulator
    #[default]
    Send,
    /// Message is consumed by the simulator
    Receive,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::Send => write!(f, "Tx"),
            Direction::Receive => write!(f, "Rx"),
        }
    }
}

/// Counters for bus error frames and frames with unknown identifiers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ErrorMetrics {
    /// Number of error frames received
    pub error_messages: u64,
    /// Number of frames with an unknown identifier
    pub unknown_messages: u64,
    /// Cumulative bus size of error frames in bits
    pub error_size: u64,
    /// Cumulative bus size of unknown frames in bits
    pub unknown_size: u64,
}

/// Errors that can occur while loading or running the simulator
#[derive(Debug, thiserror::Error)]
pub enum SimulatorError {
    #[error("Failed to parse DBC file: {0}")]
    DbcParseError(String),

    #[error("Failed to parse mapping file: {0}")]
    MappingError(String),

    #[error("Failed to parse ASC file: {0}")]
    AscParseError(String),

    #[error("CAN transport error: {0}")]
    TransportError(String),

    #[error("Variable not found: {0}")]
    VariableNotFound(String),

    #[error("Message not found: CAN ID 0x{0:X}")]
    MessageNotFound(u32),

    #[error("Invalid value: {0}")]
    InvalidValue(String),

    #[error("Invalid filter: {0}")]
    FilterError(String),

    #[error("Flood mode error: {0}")]
    FloodError(String),

    #[error("Invalid configuration: {0}")]
    ConfigError(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_bits() {
        let standard = CanFrame::new(0x123, &[0; 8]);
        assert_eq!(standard.bit_size(), 33 + 64 + 11);

        let extended = CanFrame::new(0x18DA_F101 | CAN_EFF_FLAG, &[0; 6]);
        assert_eq!(extended.bit_size(), 33 + 48 + 29);
        assert_eq!(extended.raw_id(), 0x18DA_F101);
    }

    #[test]
    fn test_frame_payload_truncation() {
        let frame = CanFrame::new(1, &[1, 2, 3, 4, 5, 6, 7, 8, 9, 10]);
        assert_eq!(frame.len, 8);
        assert_eq!(frame.payload(), &[1, 2, 3, 4, 5, 6, 7, 8]);
    }

    #[test]
    fn test_frame_display() {
        let frame = CanFrame::new(0x129, &[0x10, 0x20]);
        assert_eq!(format!("{}", frame), "129 [2] 10 20");
        assert!(!frame.is_error());
        assert!(CanFrame::new(CAN_ERR_FLAG | 0x4, &[]).is_error());
    }
}
