//! CAN transports
//!
//! The simulator core talks to the bus through the [`CanTransport`] trait:
//! - [`SocketCanTransport`] for Linux SocketCAN interfaces
//! - [`MockTransport`] for tests and offline runs

pub mod mock;
pub mod socket;

pub use self::mock::MockTransport;
pub use self::socket::SocketCanTransport;

use crate::types::{CanFrame, Result};
use std::time::Duration;

/// A bus the simulator can read frames from and write frames to
pub trait CanTransport: Send + Sync {
    /// Wait up to `timeout` for one frame; `Ok(None)` when nothing arrived
    fn receive(&self, timeout: Duration) -> Result<Option<CanFrame>>;

    /// Write one frame
    fn send(&self, frame: &CanFrame) -> Result<()>;

    /// Bus bitrate in bit/s, 0 when unknown or virtual
    fn bitrate(&self) -> u32;

    /// Interface name
    fn interface(&self) -> &str;
}
