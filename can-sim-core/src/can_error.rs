//! Error frame analysis
//!
//! Decodes the SocketCAN error frame layout (`linux/can/error.h`) into a
//! readable report.

use crate::types::{CanFrame, CAN_ERR_MASK};
use std::fmt::Write;

const ERROR_CLASSES: [&str; 9] = [
    "TX timeout",
    "Lost arbitration",
    "Controller error:",
    "Protocol violation:",
    "Transceiver error:",
    "Received no ACK on transmission",
    "Bus off",
    "Bus error",
    "Controller restarted",
];

const ERR_LOSTARB: u32 = 0x02;
const ERR_CRTL: u32 = 0x04;
const ERR_PROT: u32 = 0x08;
const ERR_TRX: u32 = 0x10;

const CONTROLLER_ERRORS: [&str; 7] = [
    " RX buffer overflow",
    " TX buffer overflow",
    " Reached warning level for RX errors",
    " Reached warning level for TX errors",
    " Reached error passive status RX",
    " Reached error passive status TX",
    " Recovered to error active state",
];

const PROTOCOL_ERROR_TYPES: [&str; 8] = [
    " Single bit error",
    " Frame format error",
    " Bit stuffing error",
    " Unable to send dominant bit",
    " Unable to send recessive bit",
    " Bus overload",
    " Active error announcement",
    " Error occurred on transmission",
];

const PROTOCOL_ERROR_POSITIONS: [&str; 32] = [
    "unspecified",
    "unspecified",
    "ID bits 28-21 (SFF: 10-3)",
    "start of frame",
    "substitute RTR (SFF: RTR)",
    "identifier extension",
    "ID bits 20-18 (SFF: 2-0)",
    "ID bits 17-13",
    "CRC sequence",
    "reserved bit 0",
    "data section",
    "data length code",
    "RTR",
    "reserved bit 1",
    "ID bits 4-0",
    "ID bits 12-5",
    "unspecified",
    "unspecified",
    "intermission",
    "unspecified",
    "unspecified",
    "unspecified",
    "unspecified",
    "unspecified",
    "CRC delimiter",
    "ACK slot",
    "end of frame",
    "ACK delimiter",
    "unspecified",
    "unspecified",
    "unspecified",
    "unspecified",
];

fn push_flags(out: &mut String, flags: u8, names: &[&str]) {
    for (bit, name) in names.iter().enumerate() {
        if flags & (1 << bit) != 0 {
            out.push_str(name);
        }
    }
}

fn push_transceiver(out: &mut String, flags: u8) {
    match flags & 0x07 {
        0x04 => out.push_str(" CAN_H no wire"),
        0x05 => out.push_str(" CAN_H short to BAT"),
        0x06 => out.push_str(" CAN_H short to VCC"),
        0x07 => out.push_str(" CAN_H short to GND"),
        _ => {}
    }
    match flags & 0x70 {
        0x40 => out.push_str(" CAN_L no wire"),
        0x50 => out.push_str(" CAN_L short to BAT"),
        0x60 => out.push_str(" CAN_L short to VCC"),
        0x70 => out.push_str(" CAN_L short to GND"),
        _ => {}
    }
    if flags & 0x80 != 0 {
        out.push_str(" CAN_L short to CAN_H");
    }
}

/// Describe an error frame: a `errorframe=0x<class>` line followed by one
/// line per reported error class
pub fn analyze_error_frame(frame: &CanFrame) -> String {
    let class = frame.id & CAN_ERR_MASK;
    let data = &frame.data;
    let mut out = String::new();
    let _ = writeln!(out, "errorframe=0x{:x}", class);

    for (bit, name) in ERROR_CLASSES.iter().enumerate() {
        let mask = 1u32 << bit;
        if class & mask == 0 {
            continue;
        }
        out.push_str(name);
        match mask {
            ERR_LOSTARB if data[0] != 0 => {
                let _ = write!(out, " at bit {}", data[0]);
            }
            ERR_CRTL => push_flags(&mut out, data[1], &CONTROLLER_ERRORS),
            ERR_PROT => {
                push_flags(&mut out, data[2], &PROTOCOL_ERROR_TYPES);
                if data[2] != 0 && data[3] != 0 {
                    if let Some(position) = PROTOCOL_ERROR_POSITIONS.get(data[3] as usize) {
                        let _ = write!(out, " at {}", position);
                    }
                }
            }
            ERR_TRX => push_transceiver(&mut out, data[4]),
            _ => {}
        }
        out.push('\n');
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::CAN_ERR_FLAG;

    fn error_frame(class: u32, data: &[(usize, u8)]) -> CanFrame {
        let mut frame = CanFrame::new(CAN_ERR_FLAG | class, &[0; 8]);
        for &(index, value) in data {
            frame.data[index] = value;
        }
        frame
    }

    #[test]
    fn test_single_classes() {
        assert_eq!(
            analyze_error_frame(&error_frame(0x1, &[])),
            "errorframe=0x1\nTX timeout\n"
        );
        assert_eq!(
            analyze_error_frame(&error_frame(0x2, &[(0, 1)])),
            "errorframe=0x2\nLost arbitration at bit 1\n"
        );
        assert_eq!(
            analyze_error_frame(&error_frame(0x2, &[])),
            "errorframe=0x2\nLost arbitration\n"
        );
        assert_eq!(
            analyze_error_frame(&error_frame(0x4, &[(1, 0x40)])),
            "errorframe=0x4\nController error: Recovered to error active state\n"
        );
        assert_eq!(
            analyze_error_frame(&error_frame(0x20, &[])),
            "errorframe=0x20\nReceived no ACK on transmission\n"
        );
        assert_eq!(analyze_error_frame(&error_frame(0x40, &[])), "errorframe=0x40\nBus off\n");
        assert_eq!(analyze_error_frame(&error_frame(0x80, &[])), "errorframe=0x80\nBus error\n");
        assert_eq!(
            analyze_error_frame(&error_frame(0x100, &[])),
            "errorframe=0x100\nController restarted\n"
        );
    }

    #[test]
    fn test_protocol_violation() {
        assert_eq!(
            analyze_error_frame(&error_frame(0x8, &[(2, 0x80)])),
            "errorframe=0x8\nProtocol violation: Error occurred on transmission\n"
        );
        assert_eq!(
            analyze_error_frame(&error_frame(0x8, &[(2, 0x01), (3, 0x1A)])),
            "errorframe=0x8\nProtocol violation: Single bit error at end of frame\n"
        );
    }

    #[test]
    fn test_transceiver_error() {
        assert_eq!(
            analyze_error_frame(&error_frame(0x10, &[(4, 0x07)])),
            "errorframe=0x10\nTransceiver error: CAN_H short to GND\n"
        );
        assert_eq!(
            analyze_error_frame(&error_frame(0x10, &[(4, 0xC4)])),
            "errorframe=0x10\nTransceiver error: CAN_H no wire CAN_L no wire CAN_L short to CAN_H\n"
        );
    }

    #[test]
    fn test_multiple_classes() {
        assert_eq!(
            analyze_error_frame(&error_frame(0x21, &[])),
            "errorframe=0x21\nTX timeout\nReceived no ACK on transmission\n"
        );
    }
}
