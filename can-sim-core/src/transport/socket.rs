//! SocketCAN transport

use super::CanTransport;
use crate::types::{CanFrame, Result, SimulatorError};
use socketcan::nl::CanInterface;
use socketcan::{CanSocket, EmbeddedFrame, ExtendedId, Frame, Socket, SocketOptions, StandardId};
use std::io;
use std::time::Duration;

/// Raw CAN socket bound to one interface
pub struct SocketCanTransport {
    interface: String,
    socket: CanSocket,
    bitrate: u32,
}

impl SocketCanTransport {
    /// Open `interface`, enable error frames and try to apply `bitrate`.
    ///
    /// Bitrate configuration needs CAP_NET_ADMIN; failures are logged and the
    /// interface is used as it is. Virtual (`vcan*`) interfaces have no bitrate.
    pub fn open(interface: &str, bitrate: u32) -> Result<Self> {
        let virtual_bus = interface.starts_with("vcan");
        if !virtual_bus && bitrate > 0 {
            configure_bitrate(interface, bitrate);
        }

        let socket = CanSocket::open(interface).map_err(|e| {
            SimulatorError::TransportError(format!("Unable to open CAN interface {}: {}", interface, e))
        })?;

        if let Err(e) = socket.set_error_filter_accept_all() {
            log::warn!("Unable to enable error frames on {}: {}", interface, e);
        }

        let bitrate = if virtual_bus {
            0
        } else {
            current_bitrate(interface).unwrap_or(0)
        };

        log::info!("Opened CAN interface {} (bitrate {})", interface, bitrate);

        Ok(Self {
            interface: interface.to_string(),
            socket,
            bitrate,
        })
    }
}

fn current_bitrate(interface: &str) -> Option<u32> {
    let iface = CanInterface::open(interface).ok()?;
    match iface.bit_rate() {
        Ok(bitrate) => bitrate,
        Err(e) => {
            log::warn!("Unable to read CAN bitrate of {}: {:?}", interface, e);
            None
        }
    }
}

fn configure_bitrate(interface: &str, bitrate: u32) {
    let iface = match CanInterface::open(interface) {
        Ok(iface) => iface,
        Err(e) => {
            log::warn!("Unable to open CAN interface {} for configuration: {}", interface, e);
            return;
        }
    };

    let is_up = iface.details().map(|d| d.is_up).unwrap_or(false);
    if is_up && current_bitrate(interface) == Some(bitrate) {
        return;
    }

    if is_up {
        if let Err(e) = iface.bring_down() {
            log::warn!("Unable to stop CAN interface {}: {:?}", interface, e);
        }
    }
    if let Err(e) = iface.set_bitrate(bitrate, None::<u32>) {
        log::warn!("Unable to set CAN bitrate {} on {}: {:?}", bitrate, interface, e);
    }
    if let Err(e) = iface.bring_up() {
        log::warn!("Unable to start CAN interface {}: {:?}", interface, e);
    }
}

impl CanTransport for SocketCanTransport {
    fn receive(&self, timeout: Duration) -> Result<Option<CanFrame>> {
        match self.socket.read_frame_timeout(timeout) {
            Ok(frame) => Ok(Some(CanFrame::new(frame.id_word(), frame.data()))),
            Err(e) if matches!(e.kind(), io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock) => {
                Ok(None)
            }
            Err(e) => Err(SimulatorError::TransportError(format!(
                "Read from {} failed: {}",
                self.interface, e
            ))),
        }
    }

    fn send(&self, frame: &CanFrame) -> Result<()> {
        let out = if frame.is_extended() {
            ExtendedId::new(frame.raw_id())
                .and_then(|id| socketcan::CanFrame::new(id, frame.payload()))
        } else {
            StandardId::new(frame.raw_id() as u16)
                .and_then(|id| socketcan::CanFrame::new(id, frame.payload()))
        }
        .ok_or_else(|| SimulatorError::TransportError(format!("Invalid CAN frame {}", frame)))?;

        self.socket.write_frame(&out).map_err(|e| {
            SimulatorError::TransportError(format!("Write to {} failed: {}", self.interface, e))
        })
    }

    fn bitrate(&self) -> u32 {
        self.bitrate
    }

    fn interface(&self) -> &str {
        &self.interface
    }
}
